//! Sage - 辅导会话编排引擎
//!
//! 模块划分：
//! - **router**: 应答者选择（连续性快路径 / 学科默认 / 协调者决策）
//! - **context**: 上下文并行组装与指令注入
//! - **mastery**: 证据聚合的掌握度计算与规则判定
//! - **adapt**: 三轴自适应教学指令生成
//! - **validator**: 延迟校验与自我修正队列（fail-open）
//! - **synthesis**: 渐进句子提取 + 有界并发语音合成
//! - **cache**: 静态教学材料的上游缓存管理
//! - **llm**: LLM 客户端抽象与实现（HTTP / Mock）、分层输出解析
//! - **store**: SQLite 持久层（交互、证据、修正、画像、课程）
//! - **orchestrator**: 回合编排入口
//! - **tasks**: fire-and-forget 后台任务
//! - **config**: 应用配置加载（TOML + 环境变量）

pub mod adapt;
pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod llm;
pub mod mastery;
pub mod model;
pub mod observability;
pub mod orchestrator;
pub mod response;
pub mod router;
pub mod store;
pub mod synthesis;
pub mod tasks;
pub mod validator;

pub use error::SageError;
pub use orchestrator::{TurnEngine, TurnOutput};
