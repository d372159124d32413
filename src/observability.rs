//! 可观测性：tracing 订阅器初始化
//!
//! 由嵌入方在进程入口调用一次；RUST_LOG 可覆盖默认级别。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sage=debug"));
    // 重复初始化（如测试进程）静默忽略
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}
