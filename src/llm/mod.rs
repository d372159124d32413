//! LLM 层：客户端抽象与实现（HTTP / Mock）、输出解析

pub mod http;
pub mod mock;
pub mod parse;
pub mod traits;

pub use http::{HttpLlmClient, TokenUsage};
pub use mock::MockLlmClient;
pub use traits::{FragmentStream, LlmClient, LlmRequest};
