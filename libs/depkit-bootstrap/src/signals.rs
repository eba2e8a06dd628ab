use anyhow::{Context, Result};
use tokio::signal;

/// Wait for the first termination signal (Ctrl+C, or SIGTERM on unix).
pub async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?;

        tokio::select! {
            result = signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl+C")?;
                tracing::info!("Received Ctrl+C signal");
            }
            _ = terminate.recv() => {
                tracing::info!("Received SIGTERM signal");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")?;
        tracing::info!("Received Ctrl+C signal");
    }

    tracing::info!("Shutdown signal received, initiating graceful shutdown");
    Ok(())
}
