//! Push method: credentials supplied by an external event source.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::auth::{AuthContext, AuthMethod, AuthResponse};
use crate::{Error, Result};

struct Shared {
    pending: Mutex<Option<AuthResponse>>,
    /// Unconsumed pushes; 0 or 1.
    available: watch::Sender<u64>,
    pushed: AtomicU64,
    closed: CancellationToken,
}

impl Shared {
    fn put(&self, response: AuthResponse) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        *pending = Some(response);
        self.pushed.fetch_add(1, Ordering::SeqCst);
        self.available.send_replace(1);
    }

    /// Consuming a push clears the count without notifying watchers.
    fn take(&self) -> Option<AuthResponse> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        let taken = pending.take();
        if taken.is_some() {
            self.available.send_if_modified(|count| {
                *count = 0;
                false
            });
        }
        taken
    }
}

/// Method whose attempts block until a credential is pushed through its
/// [`PushHandle`].
///
/// Only the most recent unconsumed push is kept.
pub struct PushAuthMethod {
    shared: Arc<Shared>,
}

/// Producer side of a [`PushAuthMethod`].
#[derive(Clone)]
pub struct PushHandle {
    shared: Arc<Shared>,
}

impl PushAuthMethod {
    pub fn new() -> (Self, PushHandle) {
        let (available, _rx) = watch::channel(0);
        let shared = Arc::new(Shared {
            pending: Mutex::new(None),
            available,
            pushed: AtomicU64::new(0),
            closed: CancellationToken::new(),
        });
        (
            Self {
                shared: Arc::clone(&shared),
            },
            PushHandle { shared },
        )
    }
}

impl PushHandle {
    pub fn push(&self, response: AuthResponse) {
        self.shared.put(response);
    }

    /// Number of credentials pushed so far.
    pub fn pushed(&self) -> u64 {
        self.shared.pushed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthMethod for PushAuthMethod {
    fn name(&self) -> &str {
        "push"
    }

    async fn authenticate(&self, ctx: &AuthContext) -> Result<AuthResponse> {
        let mut pushes = self.shared.available.subscribe();
        loop {
            if let Some(response) = self.shared.take() {
                return Ok(response);
            }
            tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(Error::Cancelled),
                _ = self.shared.closed.cancelled() => {
                    return Err(Error::auth("push source shut down"));
                }
                _ = pushes.changed() => {}
            }
        }
    }

    fn new_credentials(&self) -> Option<watch::Receiver<u64>> {
        Some(self.shared.available.subscribe())
    }

    async fn shutdown(&self) {
        self.shared.closed.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InMemorySecretsClient;
    use secrecy::ExposeSecret;
    use std::time::Duration;

    fn context() -> AuthContext {
        AuthContext {
            client: Arc::new(InMemorySecretsClient::new("mem://test")),
            attempt: 0,
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_blocks_until_push() {
        let (method, handle) = PushAuthMethod::new();
        let method = Arc::new(method);

        let waiter = {
            let method = Arc::clone(&method);
            tokio::spawn(async move { method.authenticate(&context()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        handle.push(AuthResponse::new("pushed"));
        let response = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(response.token.expose_secret(), "pushed");
        assert_eq!(handle.pushed(), 1);
    }

    #[tokio::test]
    async fn test_keeps_latest_push() {
        let (method, handle) = PushAuthMethod::new();
        handle.push(AuthResponse::new("first"));
        handle.push(AuthResponse::new("second"));

        let response = method.authenticate(&context()).await.unwrap();
        assert_eq!(response.token.expose_secret(), "second");
    }

    #[tokio::test]
    async fn test_new_credentials_fires_on_push() {
        let (method, handle) = PushAuthMethod::new();
        let mut notifications = method.new_credentials().unwrap();

        handle.push(AuthResponse::new("t1"));
        tokio::time::timeout(Duration::from_secs(1), notifications.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*notifications.borrow_and_update(), 1);
    }

    #[tokio::test]
    async fn test_consumed_push_clears_quietly() {
        let (method, handle) = PushAuthMethod::new();
        let mut notifications = method.new_credentials().unwrap();

        handle.push(AuthResponse::new("t1"));
        assert_eq!(*notifications.borrow_and_update(), 1);

        method.authenticate(&context()).await.unwrap();
        assert!(!notifications.has_changed().unwrap());
        assert_eq!(*notifications.borrow(), 0);
        assert_eq!(handle.pushed(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_unblocks() {
        let (method, _handle) = PushAuthMethod::new();
        method.shutdown().await;
        let err = method.authenticate(&context()).await.unwrap_err();
        assert!(matches!(err, Error::Auth { .. }));
    }
}
