//! HTTP 生成后端
//!
//! 通过 reqwest 调用生成服务（可配置 base_url）；支持内联媒体载荷、
//! 输出 schema 与上游缓存句柄。流式端点按行下发 `data: {json}` 片段。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;

use crate::error::LlmError;
use crate::llm::{FragmentStream, LlmClient, LlmRequest};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

#[derive(Debug, Deserialize)]
struct GenerateReply {
    #[serde(default)]
    text: String,
    #[serde(default)]
    usage: Option<UsageReply>,
}

#[derive(Debug, Deserialize)]
struct UsageReply {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    text: String,
}

/// HTTP 客户端：持有 reqwest Client 与端点配置
pub struct HttpLlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    request_timeout: Duration,
    stream_timeout: Duration,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl HttpLlmClient {
    pub fn new(base_url: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("SAGE_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            request_timeout: Duration::from_secs(60),
            stream_timeout: Duration::from_secs(120),
            usage: TokenUsage::new(),
        }
    }

    pub fn with_timeouts(mut self, request_secs: u64, stream_secs: u64) -> Self {
        self.request_timeout = Duration::from_secs(request_secs);
        self.stream_timeout = Duration::from_secs(stream_secs);
        self
    }

    fn build_body(&self, request: &LlmRequest) -> serde_json::Value {
        let mut parts: Vec<serde_json::Value> = vec![json!({ "text": request.user })];
        for media in &request.media {
            parts.push(json!({
                "inline_data": {
                    "mime_type": media.mime_type,
                    "data": BASE64.encode(&media.data),
                }
            }));
        }

        let mut body = json!({
            "model": request.model,
            "system": request.system,
            "parts": parts,
        });
        if let Some(schema) = &request.response_schema {
            body["response_schema"] = schema.clone();
        }
        if let Some(handle) = &request.cache_handle {
            body["cached_content"] = json!(handle);
        }
        body
    }

    fn map_send_error(e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Http(e.to_string())
        }
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError> {
        let response = self
            .http
            .post(format!("{}/v1/generate", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.request_timeout)
            .json(&self.build_body(request))
            .send()
            .await
            .map_err(Self::map_send_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(LlmError::Provider(format!("{}: {}", status, detail)));
        }

        let reply: GenerateReply = response
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;

        if let Some(usage) = reply.usage {
            self.usage.add(usage.prompt_tokens, usage.completion_tokens);
        }
        Ok(reply.text)
    }

    async fn complete_stream(&self, request: &LlmRequest) -> Result<FragmentStream, LlmError> {
        let response = self
            .http
            .post(format!("{}/v1/generate:stream", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.stream_timeout)
            .json(&self.build_body(request))
            .send()
            .await
            .map_err(Self::map_send_error)?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(LlmError::Provider(status.to_string()));
        }

        // 逐字节流切行：每行形如 `data: {"text": "..."}`，解析失败的行直接跳过
        let byte_stream = response.bytes_stream();
        let fragments = byte_stream
            .scan(String::new(), |carry, chunk| {
                let out: Vec<Result<String, LlmError>> = match chunk {
                    Ok(bytes) => {
                        carry.push_str(&String::from_utf8_lossy(&bytes));
                        let mut lines = Vec::new();
                        while let Some(pos) = carry.find('\n') {
                            let line: String = carry.drain(..=pos).collect();
                            let line = line.trim();
                            if let Some(payload) = line.strip_prefix("data: ") {
                                if payload == "[DONE]" {
                                    continue;
                                }
                                if let Ok(chunk) = serde_json::from_str::<StreamChunk>(payload) {
                                    if !chunk.text.is_empty() {
                                        lines.push(Ok(chunk.text));
                                    }
                                }
                            }
                        }
                        lines
                    }
                    Err(e) => vec![Err(LlmError::Http(e.to_string()))],
                };
                futures_util::future::ready(Some(futures_util::stream::iter(out)))
            })
            .flatten();

        Ok(Box::pin(fragments))
    }
}
