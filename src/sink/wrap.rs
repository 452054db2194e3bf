//! Response-wrapping step for sinks.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde_json::json;

use crate::auth::Credential;
use crate::client::SecretsClient;
use crate::{Error, Result};

/// Wraps a credential into a single-use wrapping token before it is written.
///
/// The wrapped output is cached per credential value: retrying a write of
/// the same credential writes the same wrapping token instead of minting
/// another one.
pub struct Wrapper {
    client: Arc<dyn SecretsClient>,
    ttl: Duration,
    cached: Mutex<Option<(SecretString, String)>>,
}

impl Wrapper {
    pub fn new(client: Arc<dyn SecretsClient>, ttl: Duration) -> Self {
        Self {
            client,
            ttl,
            cached: Mutex::new(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn cached_for(&self, credential: &Credential) -> Option<String> {
        let cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());
        cached
            .as_ref()
            .filter(|(token, _)| token.expose_secret() == credential.expose())
            .map(|(_, output)| output.clone())
    }

    /// JSON-encoded wrap info for `credential`.
    pub async fn wrap(&self, sink: &str, credential: &Credential) -> Result<String> {
        if let Some(output) = self.cached_for(credential) {
            tracing::debug!(sink, generation = credential.generation(), "reusing wrapped credential");
            return Ok(output);
        }

        let info = self
            .client
            .with_token(credential.token())
            .wrap(json!({ "token": credential.expose() }), self.ttl)
            .await
            .map_err(|e| Error::Sink {
                sink: sink.to_string(),
                message: format!("response wrapping failed: {}", e),
            })?;
        let output = serde_json::to_string(&info)?;

        *self.cached.lock().unwrap_or_else(|e| e.into_inner()) =
            Some((credential.token().clone(), output.clone()));
        Ok(output)
    }
}
