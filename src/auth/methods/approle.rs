//! AppRole login method.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::json;

use crate::auth::{AuthContext, AuthMethod, AuthResponse};
use crate::{Error, Result};

pub const DEFAULT_APPROLE_MOUNT: &str = "approle";

/// Logs in at `auth/<mount>/login` with a role ID and secret ID read from files.
pub struct AppRoleMethod {
    role_id_file_path: PathBuf,
    secret_id_file_path: PathBuf,
    mount_path: String,
}

impl AppRoleMethod {
    pub fn new(role_id_file_path: impl Into<PathBuf>, secret_id_file_path: impl Into<PathBuf>) -> Self {
        Self {
            role_id_file_path: role_id_file_path.into(),
            secret_id_file_path: secret_id_file_path.into(),
            mount_path: DEFAULT_APPROLE_MOUNT.to_string(),
        }
    }

    pub fn mount_path(mut self, mount_path: impl Into<String>) -> Self {
        self.mount_path = mount_path.into().trim_matches('/').to_string();
        self
    }

    fn login_path(&self) -> String {
        format!("auth/{}/login", self.mount_path)
    }
}

async fn read_trimmed(kind: &str, path: &Path) -> Result<String> {
    let value = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::auth(format!("failed to read {} from {}: {}", kind, path.display(), e)))?
        .trim()
        .to_string();
    if value.is_empty() {
        return Err(Error::auth(format!("{} file {} is empty", kind, path.display())));
    }
    Ok(value)
}

#[async_trait]
impl AuthMethod for AppRoleMethod {
    fn name(&self) -> &str {
        "approle"
    }

    async fn authenticate(&self, ctx: &AuthContext) -> Result<AuthResponse> {
        let role_id = read_trimmed("role ID", &self.role_id_file_path).await?;
        let secret_id = read_trimmed("secret ID", &self.secret_id_file_path).await?;

        let response = ctx
            .client
            .write(
                &self.login_path(),
                json!({ "role_id": role_id, "secret_id": secret_id }),
            )
            .await
            .map_err(|e| Error::auth(format!("approle login failed: {}", e)))?;

        response
            .and_then(|r| r.auth)
            .map(AuthResponse::from)
            .ok_or_else(|| Error::auth("approle login returned no auth data"))
    }
}
