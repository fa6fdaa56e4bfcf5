use tokio::sync::watch;

pub type ShutdownSender = watch::Sender<bool>;
pub type ShutdownReceiver = watch::Receiver<bool>;

#[must_use]
pub fn shutdown_channel() -> (ShutdownSender, ShutdownReceiver) {
    watch::channel(false)
}

/// Flags shutdown; receivers created later still observe it.
pub fn request_shutdown(shutdown_tx: &ShutdownSender) {
    shutdown_tx.send_replace(true);
}

#[must_use]
pub fn is_shutdown(shutdown_rx: &ShutdownReceiver) -> bool {
    *shutdown_rx.borrow()
}

/// Resolves once shutdown has been requested. Never resolves if the sender is
/// dropped without signalling.
pub async fn wait_for_shutdown(shutdown_rx: &mut ShutdownReceiver) {
    let sender_dropped = shutdown_rx.wait_for(|flag| *flag).await.is_err();
    if sender_dropped {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn late_receiver_sees_shutdown() -> Result<(), String> {
        let (shutdown_tx, _shutdown_rx) = shutdown_channel();
        request_shutdown(&shutdown_tx);
        let late = shutdown_tx.subscribe();
        if !is_shutdown(&late) {
            return Err("Expected late receiver to observe shutdown".to_owned());
        }
        Ok(())
    }
}
