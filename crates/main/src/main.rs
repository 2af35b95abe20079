//! 主应用程序入口
//!
//! 加载配置，装配存储、广播与身份校验适配器，启动应用服务直到收到退出信号。

use anyhow::Context;
use application::ServiceContainer;
use config::AppConfig;
use infrastructure::Infrastructure;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("加载配置失败")?;

    // RUST_LOG 优先于配置文件中的过滤规则
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.filter))
        .context("日志过滤规则无效")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(config = %config.sanitize(), "配置已加载");

    let infra = Infrastructure::build(&config)
        .await
        .context("初始化基础设施失败")?;
    let services: ServiceContainer = infra.services(&config);
    tracing::info!(
        backend = ?config.storage.backend,
        subscriber_capacity = config.broadcast.subscriber_capacity,
        "服务已启动"
    );

    tokio::signal::ctrl_c()
        .await
        .context("监听退出信号失败")?;
    tracing::info!("收到退出信号，正在关闭");

    drop(services);
    if let Some(pool) = infra.pool {
        pool.close().await;
    }
    Ok(())
}
