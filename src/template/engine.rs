//! Render engine boundary and the built-in secret placeholder engine.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use super::TemplateSpec;
use crate::auth::Credential;
use crate::client::{ClientError, SecretResponse, SecretsClient};

/// Render failure.
///
/// `CredentialRejected` and `PermissionDenied` are separate variants so the
/// template server can tell a dead credential from a policy gap without
/// inspecting messages.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The backend rejected the credential itself.
    #[error("credential rejected: {reason}")]
    CredentialRejected { reason: String },

    /// The credential is valid but policy denies a read.
    #[error("permission denied: {path}")]
    PermissionDenied { path: String },

    #[error("secret not found: {path}")]
    MissingSecret { path: String },

    #[error("field {field} not found in {path}")]
    MissingField { path: String, field: String },

    #[error("template IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("render failed: {0}")]
    Failed(String),
}

/// How the template server reacts to a [`RenderError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderFailure {
    /// Raise an invalidity signal and suspend the template.
    CredentialRejected,
    /// Report only.
    AuthorizationDenied,
    Other,
}

impl RenderError {
    pub fn kind(&self) -> RenderFailure {
        match self {
            RenderError::CredentialRejected { .. } => RenderFailure::CredentialRejected,
            RenderError::PermissionDenied { .. } => RenderFailure::AuthorizationDenied,
            _ => RenderFailure::Other,
        }
    }
}

impl From<ClientError> for RenderError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::InvalidToken | ClientError::MissingToken => {
                RenderError::CredentialRejected {
                    reason: err.to_string(),
                }
            }
            ClientError::PermissionDenied { path } => RenderError::PermissionDenied { path },
            other => RenderError::Failed(other.to_string()),
        }
    }
}

/// Renders a template with a live credential.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    async fn render(&self, spec: &TemplateSpec, credential: &Credential) -> Result<String, RenderError>;
}

static SECRET_RE: OnceLock<Regex> = OnceLock::new();

fn secret_regex() -> &'static Regex {
    SECRET_RE.get_or_init(|| {
        Regex::new(r#"\{\{\s*secret\s+"([^"]+)"\s+"([^"]+)"\s*\}\}"#).expect("valid secret regex")
    })
}

struct Placeholder {
    span: Range<usize>,
    path: String,
    field: String,
}

fn placeholders(template: &str) -> Vec<Placeholder> {
    secret_regex()
        .captures_iter(template)
        .filter_map(|caps| {
            Some(Placeholder {
                span: caps.get(0)?.range(),
                path: caps.get(1)?.as_str().to_string(),
                field: caps.get(2)?.as_str().to_string(),
            })
        })
        .collect()
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Substitutes `{{ secret "<path>" "<field.path>" }}` placeholders with
/// values read through the client bound to the live credential.
///
/// Each path is read once per render. Text outside placeholders is copied
/// verbatim.
pub struct SecretTemplateEngine {
    client: Arc<dyn SecretsClient>,
}

impl SecretTemplateEngine {
    pub fn new(client: Arc<dyn SecretsClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RenderEngine for SecretTemplateEngine {
    async fn render(&self, spec: &TemplateSpec, credential: &Credential) -> Result<String, RenderError> {
        let template = spec.load().await?;
        let found = placeholders(&template);
        if found.is_empty() {
            return Ok(template);
        }

        let client = self.client.with_token(credential.token());
        let mut secrets: HashMap<String, SecretResponse> = HashMap::new();
        let mut output = String::with_capacity(template.len());
        let mut copied = 0;

        for placeholder in found {
            if !secrets.contains_key(&placeholder.path) {
                let response = client
                    .read(&placeholder.path)
                    .await?
                    .ok_or_else(|| RenderError::MissingSecret {
                        path: placeholder.path.clone(),
                    })?;
                secrets.insert(placeholder.path.clone(), response);
            }

            let value = secrets
                .get(&placeholder.path)
                .and_then(|response| response.field(&placeholder.field))
                .ok_or_else(|| RenderError::MissingField {
                    path: placeholder.path.clone(),
                    field: placeholder.field.clone(),
                })?;

            output.push_str(&template[copied..placeholder.span.start]);
            output.push_str(&stringify(value));
            copied = placeholder.span.end;
        }
        output.push_str(&template[copied..]);

        Ok(output)
    }
}
