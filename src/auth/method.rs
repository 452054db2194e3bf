//! Authentication method trait.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::AuthResponse;
use crate::Result;
use crate::client::SecretsClient;

/// Inputs available to one authentication attempt.
#[derive(Clone)]
pub struct AuthContext {
    /// Shared client, with no token attached while the attempt runs.
    pub client: Arc<dyn SecretsClient>,
    /// Consecutive failed attempts before this one.
    pub attempt: u32,
    pub cancel: CancellationToken,
}

/// A mechanism that produces credentials.
///
/// Pull methods derive a credential on every call. Push methods block until
/// an external event supplies one and expose a change notification through
/// [`new_credentials`](AuthMethod::new_credentials).
#[async_trait]
pub trait AuthMethod: Send + Sync {
    /// Method name for logs.
    fn name(&self) -> &str;

    /// Produce a credential. Any inability to do so is an authentication failure.
    async fn authenticate(&self, ctx: &AuthContext) -> Result<AuthResponse>;

    /// Number of credentials the source holds that `authenticate` has not
    /// yet returned. The handler re-authenticates when it changes to a
    /// non-zero value.
    fn new_credentials(&self) -> Option<watch::Receiver<u64>> {
        None
    }

    /// Release resources held by the method.
    async fn shutdown(&self) {}
}
