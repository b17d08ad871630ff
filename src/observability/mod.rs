//! 可观测性

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 安装 tracing 订阅器：默认 info，可用 RUST_LOG 覆盖
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}
