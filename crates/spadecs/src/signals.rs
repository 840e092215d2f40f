//! Signal handling for graceful runtime shutdown.

use clr_bridge::Bridge;
use tokio::signal;
use tracing::info;

/// Waits for SIGINT or SIGTERM (Ctrl+C on Windows).
pub async fn wait_for_shutdown() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
        }
    }

    #[cfg(windows)]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

/// Waits for a termination signal, then tears the bridge down.
///
/// Returns whether this call performed the teardown; `false` means the exit
/// hook or another caller already did.
pub async fn teardown_on_signal(bridge: Bridge) -> std::io::Result<bool> {
    wait_for_shutdown().await?;
    let torn_down = tokio::task::spawn_blocking(move || bridge.teardown())
        .await
        .map_err(std::io::Error::other)?;
    Ok(torn_down)
}
