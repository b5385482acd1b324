//! Graceful shutdown trigger shared by the engine and gateway binaries

use tokio::signal;
use tracing::{error, info};

/// Resolve once Ctrl+C or (on unix) SIGTERM arrives.
///
/// A handler that cannot be installed is logged and never fires, so the
/// other signal still works.
pub async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_waits_without_signal() {
        let waited = tokio::time::timeout(Duration::from_millis(50), wait_for_shutdown()).await;
        assert!(waited.is_err());
    }
}
