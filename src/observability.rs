//! 可观测性：tracing 订阅器初始化

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 初始化日志订阅器；级别可用 RUST_LOG 覆盖，默认 info
pub fn init() {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("info".parse().expect("valid directive")))
        .with(fmt::layer())
        .init();
}
