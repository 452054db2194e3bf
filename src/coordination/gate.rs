//! "Authentication in progress" gate.

use tokio::sync::watch;

/// Write side of the gate, owned by the auth handler.
///
/// The gate is raised while an authentication attempt is in flight and lowered
/// the instant a new credential is available.
#[derive(Debug)]
pub struct AuthGate {
    tx: watch::Sender<bool>,
}

impl AuthGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn set_in_progress(&self, in_progress: bool) {
        self.tx.send_replace(in_progress);
    }

    pub fn is_in_progress(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn reader(&self) -> GateReader {
        GateReader {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for AuthGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Read side of the gate, held by consumer servers.
#[derive(Clone, Debug)]
pub struct GateReader {
    rx: watch::Receiver<bool>,
}

impl GateReader {
    /// A gate that is never raised.
    pub fn idle() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_in_progress(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until no authentication attempt is in flight.
    ///
    /// A gate whose handler is gone counts as clear.
    pub async fn wait_clear(&mut self) {
        let _ = self.rx.wait_for(|in_progress| !*in_progress).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_clear_returns_immediately_when_lowered() {
        let gate = AuthGate::new();
        let mut reader = gate.reader();
        tokio::time::timeout(Duration::from_millis(100), reader.wait_clear())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_clear_blocks_while_raised() {
        let gate = AuthGate::new();
        gate.set_in_progress(true);
        let mut reader = gate.reader();
        assert!(reader.is_in_progress());

        let waiter = tokio::spawn(async move { reader.wait_clear().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        gate.set_in_progress(false);
        tokio::time::timeout(Duration::from_millis(100), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_gate_counts_as_clear() {
        let gate = AuthGate::new();
        gate.set_in_progress(true);
        let mut reader = gate.reader();
        drop(gate);
        tokio::time::timeout(Duration::from_millis(100), reader.wait_clear())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_idle_reader() {
        let mut reader = GateReader::idle();
        assert!(!reader.is_in_progress());
        reader.wait_clear().await;
    }
}
