//! LLM 客户端抽象
//!
//! 所有后端（HTTP / Mock）实现 LlmClient：complete（非流式）、complete_stream（流式片段）。
//! 请求携带系统上下文、用户输入、可选内联媒体与期望的输出 schema。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::error::LlmError;
use crate::model::MediaPart;

/// 流式输出：片段流，拼接后构成完整载荷
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// 一次生成请求
#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    /// 使用的模型标识
    pub model: String,
    /// 系统/上下文字符串（已含指令块与历史）
    pub system: String,
    /// 学生本轮输入
    pub user: String,
    /// 内联二进制载荷（音频/图像）
    pub media: Vec<MediaPart>,
    /// 期望的 JSON 输出 schema（由 schemars 派生）
    pub response_schema: Option<serde_json::Value>,
    /// 上游缓存句柄（静态教学材料）
    pub cache_handle: Option<String>,
}

impl LlmRequest {
    pub fn new(model: impl Into<String>, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: system.into(),
            user: user.into(),
            ..Default::default()
        }
    }

    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.response_schema = Some(schema);
        self
    }

    pub fn with_media(mut self, media: Vec<MediaPart>) -> Self {
        self.media = media;
        self
    }

    pub fn with_cache_handle(mut self, handle: Option<String>) -> Self {
        self.cache_handle = handle;
        self
    }
}

/// LLM 客户端 trait：非流式完成与流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError>;

    /// 流式完成，返回片段流
    async fn complete_stream(&self, request: &LlmRequest) -> Result<FragmentStream, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
