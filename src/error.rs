//! 错误类型与失败策略
//!
//! 按失败面划分：必需上下文读取失败（如课程缺失）对整轮致命；
//! 生成/校验/合成类失败在各自模块内降级，不向学生侧传播。

use thiserror::Error;

/// 引擎层错误（一轮辅导处理中可能出现的致命错误）
#[derive(Error, Debug)]
pub enum SageError {
    /// 课程不存在：无课程则无法组装上下文，整轮中止
    #[error("Lesson not found: {0}")]
    LessonNotFound(String),

    /// 必需上下文的持久层读取失败
    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    /// LLM 调用失败且所有兜底路径耗尽
    #[error("Generation failed: {0}")]
    Generation(String),

    /// 配置加载/解析失败
    #[error("Config error: {0}")]
    Config(String),
}

/// LLM 客户端错误（网络、超时、输出畸形）
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Malformed output: {0}")]
    Malformed(String),

    #[error("Provider error: {0}")]
    Provider(String),
}

/// 语音合成错误（按块独立，可重试可丢弃）
#[derive(Error, Debug)]
pub enum SpeechError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Text too long: {0} bytes")]
    TextTooLong(usize),

    #[error("Provider error: {0}")]
    Provider(String),
}
