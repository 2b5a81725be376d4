//! Orbit HTTP 入口
//!
//! 启动: cargo run --bin orbit-web --features web
//! 监听地址取 [web] host/port，可用 ORBIT__WEB__PORT 覆盖

#![cfg(feature = "web")]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use orbit::config::load_config;
use orbit::observability;
use orbit::server::router;
use orbit::Supervisor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    observability::init(cfg.app.verbose);

    println!("{}", observability::banner());
    for warning in observability::startup_warnings(&cfg) {
        tracing::warn!("{}", warning);
    }

    let supervisor = Supervisor::from_config(&cfg).context("Failed to build supervisor")?;
    let app = router(Arc::new(supervisor));

    let addr: SocketAddr = format!("{}:{}", cfg.web.host, cfg.web.port)
        .parse()
        .context("Invalid [web] host/port")?;
    tracing::info!("Orbit HTTP: http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
