//! Token file method.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::Value;

use crate::auth::{AuthContext, AuthMethod, AuthResponse};
use crate::client::LOOKUP_SELF_PATH;
use crate::{Error, Result};

/// Reads a token from a file on every attempt and verifies it with the
/// backend before handing it out.
///
/// If the file disappears the last token read is reused, so a revoked token
/// keeps failing verification until a replacement is written.
pub struct TokenFileMethod {
    path: PathBuf,
    cached: Mutex<Option<String>>,
}

impl TokenFileMethod {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_token(&self) -> Result<String> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let token = contents.trim().to_string();
                if token.is_empty() {
                    return Err(Error::auth(format!(
                        "token file {} is empty",
                        self.path.display()
                    )));
                }
                *self.cached.lock().unwrap_or_else(|e| e.into_inner()) = Some(token.clone());
                Ok(token)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let cached = self.cached.lock().unwrap_or_else(|e| e.into_inner()).clone();
                cached.ok_or_else(|| {
                    Error::auth(format!("token file {} not found", self.path.display()))
                })
            }
            Err(e) => Err(Error::auth(format!(
                "failed to read token file {}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}

#[async_trait]
impl AuthMethod for TokenFileMethod {
    fn name(&self) -> &str {
        "token_file"
    }

    async fn authenticate(&self, ctx: &AuthContext) -> Result<AuthResponse> {
        let token = SecretString::from(self.read_token().await?);

        let lookup = ctx
            .client
            .with_token(&token)
            .read(LOOKUP_SELF_PATH)
            .await
            .map_err(|e| Error::auth(format!("token lookup failed: {}", e)))?
            .ok_or_else(|| Error::auth("token lookup returned no data"))?;

        let ttl = lookup.field("ttl").and_then(Value::as_u64).unwrap_or(0);
        let renewable = lookup
            .field("renewable")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Ok(AuthResponse {
            token,
            renewable,
            lease_duration: Duration::from_secs(ttl),
        })
    }
}
