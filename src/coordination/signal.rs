//! Invalid-credential signals from consumers to the auth handler.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

pub const DEFAULT_SIGNAL_CAPACITY: usize = 64;

/// A consumer's report that the credential of `generation` is no longer usable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvalidCredential {
    pub generation: u64,
    /// Consumer that raised the signal, e.g. `template:/etc/app.conf`.
    pub source: String,
    pub reason: String,
}

impl InvalidCredential {
    pub fn new(generation: u64, source: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            generation,
            source: source.into(),
            reason: reason.into(),
        }
    }
}

/// Shared sending side of the invalidity channel.
///
/// Sending never blocks. The handler collapses duplicates per generation, so a
/// full channel already carries a signal that will be honored.
#[derive(Clone, Debug)]
pub struct InvalidSignalSender {
    tx: mpsc::Sender<InvalidCredential>,
}

impl InvalidSignalSender {
    /// Returns whether the signal was queued.
    pub fn signal(&self, signal: InvalidCredential) -> bool {
        match self.tx.try_send(signal) {
            Ok(()) => true,
            Err(TrySendError::Full(signal)) => {
                tracing::debug!(
                    generation = signal.generation,
                    source = %signal.source,
                    "invalidity channel full, dropping signal"
                );
                false
            }
            Err(TrySendError::Closed(signal)) => {
                tracing::warn!(
                    generation = signal.generation,
                    source = %signal.source,
                    "auth handler is gone, invalidity signal not delivered"
                );
                false
            }
        }
    }
}

pub fn invalid_signal_channel(
    capacity: usize,
) -> (InvalidSignalSender, mpsc::Receiver<InvalidCredential>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (InvalidSignalSender { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_signal_delivered() {
        let (sender, mut rx) = invalid_signal_channel(4);
        assert!(sender.signal(InvalidCredential::new(3, "template:a", "revoked")));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.generation, 3);
        assert_eq!(received.source, "template:a");
    }

    #[test]
    fn test_full_channel_drops_without_blocking() {
        let (sender, _rx) = invalid_signal_channel(1);
        assert!(sender.signal(InvalidCredential::new(1, "a", "x")));
        assert!(!sender.signal(InvalidCredential::new(1, "b", "x")));
    }

    #[test]
    fn test_closed_channel() {
        let (sender, rx) = invalid_signal_channel(1);
        drop(rx);
        assert!(!sender.signal(InvalidCredential::new(1, "a", "x")));
    }
}
