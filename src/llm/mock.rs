//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按入队顺序吐出预置回复；流式时把回复按预设切片逐段下发，
//! 便于本地验证路由兜底与渐进式合成的句子提取。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use crate::error::LlmError;
use crate::llm::{FragmentStream, LlmClient, LlmRequest};

/// 预置的一条 Mock 回复
#[derive(Debug, Clone)]
enum Scripted {
    /// 完整文本（流式时按 fragment_size 切片）
    Text(String),
    /// 显式片段序列（流式时逐条下发）
    Fragments(Vec<String>),
    /// 调用失败
    Error(String),
}

/// Mock 客户端：无脚本时回显用户输入
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Scripted>>,
    /// 已收到的请求（system 串），供断言注入内容
    pub seen_systems: Mutex<Vec<String>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 入队一条完整回复
    pub fn push_text(&self, text: impl Into<String>) {
        self.script.lock().unwrap().push_back(Scripted::Text(text.into()));
    }

    /// 入队一条按片段下发的回复
    pub fn push_fragments(&self, fragments: Vec<&str>) {
        self.script.lock().unwrap().push_back(Scripted::Fragments(
            fragments.into_iter().map(String::from).collect(),
        ));
    }

    /// 入队一次失败
    pub fn push_error(&self, message: impl Into<String>) {
        self.script.lock().unwrap().push_back(Scripted::Error(message.into()));
    }

    fn next_scripted(&self, request: &LlmRequest) -> Scripted {
        self.seen_systems.lock().unwrap().push(request.system.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Scripted::Text(format!("Echo from Mock: {}", request.user)))
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError> {
        match self.next_scripted(request) {
            Scripted::Text(text) => Ok(text),
            Scripted::Fragments(fragments) => Ok(fragments.concat()),
            Scripted::Error(message) => Err(LlmError::Provider(message)),
        }
    }

    async fn complete_stream(&self, request: &LlmRequest) -> Result<FragmentStream, LlmError> {
        match self.next_scripted(request) {
            Scripted::Text(text) => Ok(Box::pin(stream::iter(vec![Ok(text)]))),
            Scripted::Fragments(fragments) => Ok(Box::pin(stream::iter(
                fragments.into_iter().map(Ok).collect::<Vec<_>>(),
            ))),
            Scripted::Error(message) => Err(LlmError::Provider(message)),
        }
    }
}
