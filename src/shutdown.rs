use anyhow::{Context, Result};
use tokio::signal;
use tracing::info;

/// 等待 SIGINT 或 SIGTERM
pub async fn wait_for_shutdown_signal() -> Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.context("安装Ctrl+C信号处理器失败") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("安装SIGTERM信号处理器失败")?
            .recv()
            .await;
        Ok::<(), anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("收到Ctrl+C信号");
        },
        result = terminate => {
            result?;
            info!("收到SIGTERM信号");
        },
    }
    Ok(())
}
