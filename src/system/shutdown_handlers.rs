use tracing::{info, warn};

use crate::shutdown::{ShutdownSender, request_shutdown, wait_for_shutdown};

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Flags shutdown on Ctrl-C or SIGTERM. The task ends on its own once
/// shutdown was requested elsewhere.
pub fn setup_signal_shutdown_handler(shutdown_tx: &ShutdownSender) -> tokio::task::JoinHandle<()> {
    let shutdown_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        let mut shutdown_rx = shutdown_tx.subscribe();

        #[cfg(unix)]
        let mut term_signal = match signal(SignalKind::terminate()) {
            Ok(signal) => Some(signal),
            Err(err) => {
                warn!("Failed to register SIGTERM handler: {}", err);
                None
            }
        };

        #[cfg(unix)]
        {
            tokio::select! {
                () = wait_for_shutdown(&mut shutdown_rx) => {}
                result = tokio::signal::ctrl_c() => {
                    if let Err(err) = result {
                        warn!("Failed to listen for Ctrl-C: {}", err);
                        return;
                    }
                    info!("Ctrl-C received, stopping");
                    request_shutdown(&shutdown_tx);
                }
                () = async {
                    if let Some(signal) = term_signal.as_mut() {
                        signal.recv().await;
                    } else {
                        std::future::pending::<()>().await;
                    }
                } => {
                    info!("SIGTERM received, stopping");
                    request_shutdown(&shutdown_tx);
                }
            }
        }

        #[cfg(not(unix))]
        {
            tokio::select! {
                () = wait_for_shutdown(&mut shutdown_rx) => {}
                result = tokio::signal::ctrl_c() => {
                    if let Err(err) = result {
                        warn!("Failed to listen for Ctrl-C: {}", err);
                        return;
                    }
                    info!("Ctrl-C received, stopping");
                    request_shutdown(&shutdown_tx);
                }
            }
        }
    })
}
