//! Secrets API client boundary.
//!
//! The agent core never talks to the secrets backend directly. Every component
//! that needs authenticated reads receives an `Arc<dyn SecretsClient>` at
//! construction time and scopes it to a credential with
//! [`SecretsClient::with_token`].
//!
//! Two implementations ship with the crate:
//! - [`HttpSecretsClient`]: the HTTP API (`/v1/<path>`, `X-Vault-Token`)
//! - [`InMemorySecretsClient`]: an in-process backend with tokens, policies,
//!   revocation and response wrapping, used for tests and local runs

mod error;
mod http;
mod memory;
pub mod resilience;

pub use error::ClientError;
pub use http::HttpSecretsClient;
pub use memory::InMemorySecretsClient;
pub use resilience::{ExponentialBackoff, RetryConfig};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Path used to verify a token and read its metadata.
pub const LOOKUP_SELF_PATH: &str = "auth/token/lookup-self";
/// Path used to renew a token in place.
pub const RENEW_SELF_PATH: &str = "auth/token/renew-self";
/// Path used to response-wrap arbitrary data.
pub const WRAP_PATH: &str = "sys/wrapping/wrap";

/// Authenticated access to the secrets backend.
#[async_trait]
pub trait SecretsClient: Send + Sync {
    /// Backend address.
    fn address(&self) -> &str;

    /// Token attached to outgoing requests.
    fn token(&self) -> Option<SecretString>;

    /// Replace the token attached to outgoing requests.
    fn set_token(&self, token: Option<SecretString>);

    /// Handle sharing this client's transport but bound to `token`.
    ///
    /// Changing the token on the returned handle does not affect `self`.
    fn with_token(&self, token: &SecretString) -> Arc<dyn SecretsClient>;

    /// Read a path. `Ok(None)` means nothing exists there.
    async fn read(&self, path: &str) -> Result<Option<SecretResponse>, ClientError>;

    /// Write data to a path.
    async fn write(&self, path: &str, data: Value) -> Result<Option<SecretResponse>, ClientError>;

    /// Response-wrap `data` into a single-use token valid for `ttl`.
    async fn wrap(&self, _data: Value, _ttl: Duration) -> Result<WrapInfo, ClientError> {
        Err(ClientError::Unsupported("response wrapping"))
    }
}

/// Generic API response envelope.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SecretResponse {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub lease_id: String,
    #[serde(default)]
    pub lease_duration: u64,
    #[serde(default)]
    pub renewable: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub auth: Option<SecretAuth>,
    #[serde(default)]
    pub wrap_info: Option<WrapInfo>,
    #[serde(default)]
    pub warnings: Option<Vec<String>>,
}

impl SecretResponse {
    pub fn with_data(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Default::default()
        }
    }

    pub fn with_auth(auth: SecretAuth) -> Self {
        Self {
            auth: Some(auth),
            ..Default::default()
        }
    }

    /// Look up a dotted field path (`data.username`) inside `data`.
    pub fn field(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .filter(|part| !part.is_empty())
            .try_fold(self.data.as_ref()?, |value, part| value.get(part))
    }
}

/// Auth block returned by login and renewal endpoints.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct SecretAuth {
    pub client_token: String,
    #[serde(default)]
    pub accessor: String,
    #[serde(default)]
    pub policies: Vec<String>,
    #[serde(default)]
    pub lease_duration: u64,
    #[serde(default)]
    pub renewable: bool,
}

impl fmt::Debug for SecretAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretAuth")
            .field("client_token", &"[redacted]")
            .field("accessor", &self.accessor)
            .field("policies", &self.policies)
            .field("lease_duration", &self.lease_duration)
            .field("renewable", &self.renewable)
            .finish()
    }
}

/// Response-wrapping metadata, written verbatim by wrapping sinks.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WrapInfo {
    pub token: String,
    #[serde(default)]
    pub accessor: String,
    pub ttl: u64,
    pub creation_time: DateTime<Utc>,
    #[serde(default)]
    pub creation_path: String,
}

impl fmt::Debug for WrapInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrapInfo")
            .field("token", &"[redacted]")
            .field("accessor", &self.accessor)
            .field("ttl", &self.ttl)
            .field("creation_time", &self.creation_time)
            .field("creation_path", &self.creation_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_lookup() {
        let response = SecretResponse::with_data(json!({
            "data": { "username": "bob", "port": 5432 },
            "metadata": { "version": 3 }
        }));

        assert_eq!(response.field("data.username"), Some(&json!("bob")));
        assert_eq!(response.field("data.port"), Some(&json!(5432)));
        assert_eq!(response.field("metadata.version"), Some(&json!(3)));
        assert!(response.field("data.password").is_none());
        assert!(SecretResponse::default().field("id").is_none());
    }

    #[test]
    fn test_parse_auth_response() {
        let body = r#"{
            "request_id": "abc",
            "auth": {
                "client_token": "hvs.secret",
                "accessor": "acc",
                "policies": ["default"],
                "lease_duration": 3600,
                "renewable": true
            }
        }"#;

        let response: SecretResponse = serde_json::from_str(body).unwrap();
        let auth = response.auth.unwrap();
        assert_eq!(auth.client_token, "hvs.secret");
        assert!(auth.renewable);
        assert!(!format!("{:?}", auth).contains("hvs.secret"));
    }
}
