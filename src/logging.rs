//! 日志初始化
//!
//! 日志统一写到 stderr：worker 进程的 stdout 只能承载一个 JSON 对象。
//! 用 `RUST_LOG` 控制级别，例如 `RUST_LOG=yuanjing_verify=debug`。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            EnvFilter::new("yuanjing_verify=debug")
        } else {
            EnvFilter::new("yuanjing_verify=info")
        }
    });

    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .compact(),
    );

    // 重复初始化 (例如测试里) 直接忽略
    let _ = tracing::subscriber::set_global_default(subscriber);
}
