//! Auth method selection.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::AuthMethod;
use super::methods::{AppRoleMethod, TokenFileMethod, approle::DEFAULT_APPROLE_MOUNT};
use crate::config::ConfigError;

fn default_approle_mount() -> String {
    DEFAULT_APPROLE_MOUNT.to_string()
}

/// Auth method configuration, selected by the `type` discriminant.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    TokenFile {
        token_file_path: PathBuf,
    },
    #[serde(rename = "approle")]
    AppRole {
        role_id_file_path: PathBuf,
        secret_id_file_path: PathBuf,
        #[serde(default = "default_approle_mount")]
        mount_path: String,
    },
}

impl AuthConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthConfig::TokenFile { .. } => "token_file",
            AuthConfig::AppRole { .. } => "approle",
        }
    }

    pub fn build_method(&self) -> Arc<dyn AuthMethod> {
        match self {
            AuthConfig::TokenFile { token_file_path } => {
                Arc::new(TokenFileMethod::new(token_file_path))
            }
            AuthConfig::AppRole {
                role_id_file_path,
                secret_id_file_path,
                mount_path,
            } => Arc::new(
                AppRoleMethod::new(role_id_file_path, secret_id_file_path)
                    .mount_path(mount_path.as_str()),
            ),
        }
    }

    /// Configuration problems, keyed relative to `auto_auth.method`.
    pub(crate) fn problems(&self) -> Vec<ConfigError> {
        let empty = |field: &str| ConfigError::InvalidValue {
            key: format!("auto_auth.method.{}", field),
            message: "must not be empty".into(),
        };
        let mut problems = Vec::new();
        match self {
            AuthConfig::TokenFile { token_file_path } => {
                if token_file_path.as_os_str().is_empty() {
                    problems.push(empty("token_file_path"));
                }
            }
            AuthConfig::AppRole {
                role_id_file_path,
                secret_id_file_path,
                mount_path,
            } => {
                if role_id_file_path.as_os_str().is_empty() {
                    problems.push(empty("role_id_file_path"));
                }
                if secret_id_file_path.as_os_str().is_empty() {
                    problems.push(empty("secret_id_file_path"));
                }
                if mount_path.trim_matches('/').is_empty() {
                    problems.push(empty("mount_path"));
                }
            }
        }
        problems
    }
}
