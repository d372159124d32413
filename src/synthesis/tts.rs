//! 语音合成客户端
//!
//! SpeechClient 抽象下游 TTS 服务；HttpSpeechClient 走 reqwest，
//! MockSpeechClient 支持按调用序号注入失败与延迟，供流水线测试
//! 构造乱序完成与失败阈值场景。

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::SpeechError;

#[async_trait]
pub trait SpeechClient: Send + Sync {
    /// 把一段文本合成为音频字节
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, SpeechError>;
}

/// Mock 客户端：伪音频为 UTF-8 文本本身，便于断言拼接顺序
#[derive(Debug, Default)]
pub struct MockSpeechClient {
    call_count: Mutex<usize>,
    /// 这些序号（从 0 起）的调用返回错误
    failing_calls: Mutex<HashSet<usize>>,
    /// 文本包含某子串时先睡眠，制造乱序完成
    delays: Mutex<HashMap<String, Duration>>,
    pub calls: Mutex<Vec<String>>,
}

impl MockSpeechClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_call(&self, index: usize) {
        self.failing_calls.lock().unwrap().insert(index);
    }

    pub fn delay_containing(&self, substr: impl Into<String>, delay: Duration) {
        self.delays.lock().unwrap().insert(substr.into(), delay);
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }
}

#[async_trait]
impl SpeechClient for MockSpeechClient {
    async fn synthesize(&self, text: &str, _voice: &str) -> Result<Vec<u8>, SpeechError> {
        let index = {
            let mut count = self.call_count.lock().unwrap();
            let index = *count;
            *count += 1;
            index
        };
        self.calls.lock().unwrap().push(text.to_string());

        let delay = {
            let delays = self.delays.lock().unwrap();
            delays
                .iter()
                .find(|(substr, _)| text.contains(substr.as_str()))
                .map(|(_, d)| *d)
        };
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }

        if self.failing_calls.lock().unwrap().contains(&index) {
            return Err(SpeechError::Provider(format!("scripted failure #{}", index)));
        }
        Ok(text.as_bytes().to_vec())
    }
}

#[derive(Serialize)]
struct SpeechRequestBody<'a> {
    text: &'a str,
    voice: &'a str,
}

/// HTTP 客户端：POST /v1/speech，响应体即音频字节
pub struct HttpSpeechClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    max_text_bytes: usize,
}

impl HttpSpeechClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        max_text_bytes: usize,
    ) -> Result<Self, SpeechError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SpeechError::Http(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key,
            max_text_bytes,
        })
    }
}

#[async_trait]
impl SpeechClient for HttpSpeechClient {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, SpeechError> {
        if text.len() > self.max_text_bytes {
            return Err(SpeechError::TextTooLong(text.len()));
        }

        let mut request = self
            .http
            .post(format!("{}/v1/speech", self.base_url))
            .json(&SpeechRequestBody { text, voice });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SpeechError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(SpeechError::Provider(format!(
                "speech backend returned {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SpeechError::Http(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}
