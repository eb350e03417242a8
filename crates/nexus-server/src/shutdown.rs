//! Process signal handling.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Resolve on SIGINT or SIGTERM (Ctrl+C elsewhere).
pub async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => info!(target: "nexus::startup", "received SIGINT"),
            _ = sigterm.recv() => info!(target: "nexus::startup", "received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!(target: "nexus::startup", "received Ctrl+C");
    }

    Ok(())
}

/// Cancel `token` once a shutdown signal arrives, or as soon as it is
/// cancelled elsewhere.
pub async fn cancel_on_signal(token: CancellationToken) {
    tokio::select! {
        result = wait_for_signal() => {
            match result {
                Ok(()) => token.cancel(),
                Err(e) => {
                    tracing::error!(target: "nexus::startup", error = %e, "failed to install signal handlers");
                    token.cancelled().await;
                }
            }
        }
        _ = token.cancelled() => {}
    }
}
