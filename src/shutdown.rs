// ABOUTME: Turns Ctrl+C and SIGTERM into cancellation of the process-wide token
// ABOUTME: Every session and the gRPC server hang off child tokens of this one

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

/// Cancel `token` on the first Ctrl+C (or SIGTERM on unix).
pub fn cancel_on_signal(token: CancellationToken) -> Result<()> {
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;

    tokio::spawn(async move {
        #[cfg(unix)]
        let terminate = async {
            sigterm.recv().await;
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            result = tokio::signal::ctrl_c() => {
                if let Err(err) = result {
                    tracing::warn!(error = %err, "failed to listen for Ctrl+C");
                    return;
                }
                tracing::info!("received Ctrl+C, shutting down");
            }
            _ = terminate => tracing::info!("received SIGTERM, shutting down"),
        }
        token.cancel();
    });
    Ok(())
}
