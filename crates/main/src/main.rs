//! 主应用程序入口
//!
//! 加载配置、选择存储后端并启动 Axum Web API 服务。

use anyhow::Context;
use config::AppConfig;
use infrastructure::Infrastructure;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("加载配置失败")?;

    // 初始化日志：RUST_LOG 优先，否则使用配置中的级别
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if config.is_development_secret() {
        tracing::warn!("正在使用开发环境 JWT 密钥，请勿用于生产部署");
    }

    let infrastructure = Infrastructure::connect(&config)
        .await
        .context("初始化存储失败")?;
    tracing::info!(backend = ?infrastructure.backend, "存储后端已就绪");

    let state = AppState::build(&config, &infrastructure);
    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("无法监听 {addr}"))?;
    tracing::info!("服务器启动在 {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("服务器已停止");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "无法监听停止信号");
    }
}
