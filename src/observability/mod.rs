//! 可观测性：日志初始化与启动横幅

use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

use crate::config::AppConfig;
use crate::core::quota::QUOTA_CAP;

/// 默认 info，verbose 时 debug；RUST_LOG 仍可覆盖
pub fn init(verbose: bool) {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    // 测试或多次调用时已有全局订阅者，忽略即可
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(level.into()))
        .with(fmt::layer())
        .try_init();
}

/// 启动横幅（进程内只打印一次）
pub fn banner() -> String {
    format!(
        "Orbit (core edition) | OpenAI-compatible only | demo={} calls | no retries | no fallbacks",
        QUOTA_CAP
    )
}

/// 启动时检查本版本不支持的配置项
pub fn startup_warnings(cfg: &AppConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    if cfg
        .llm
        .local_server_url
        .as_deref()
        .is_some_and(|u| !u.trim().is_empty())
    {
        warnings.push("Local model server configured but ignored in this edition.".to_string());
    }
    if cfg.demo.enabled && cfg.demo.relay_endpoint().is_none() {
        warnings.push("Demo relay enabled without relay_url; relay calls are disabled.".to_string());
    }
    warnings
}
