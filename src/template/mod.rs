//! Templated secret rendering.
//!
//! A [`TemplateSpec`] names inline contents or a source file and a
//! destination. The [`TemplateServer`] renders every spec through a
//! [`RenderEngine`] whenever the credential changes, and again on each
//! template's refresh interval.

mod engine;
mod server;

pub use engine::{RenderEngine, RenderError, RenderFailure, SecretTemplateEngine};
pub use server::{
    DEFAULT_SIGNAL_RETRY_INTERVAL, TemplateServer, TemplateServerConfig, TemplateStatus,
};

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::config::{ConfigError, de};

pub const DEFAULT_TEMPLATE_PERMS: u32 = 0o644;

fn default_perms() -> u32 {
    DEFAULT_TEMPLATE_PERMS
}

/// One template to render.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct TemplateSpec {
    /// Inline template text.
    #[serde(default)]
    pub contents: Option<String>,
    /// Template file, read on every render.
    #[serde(default)]
    pub source: Option<PathBuf>,
    pub destination: PathBuf,
    #[serde(default = "default_perms", deserialize_with = "de::file_mode")]
    pub perms: u32,
    /// Re-render on this interval even when the credential is unchanged.
    #[serde(default, deserialize_with = "de::option_duration")]
    pub refresh_interval: Option<Duration>,
}

impl TemplateSpec {
    pub fn inline(contents: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            contents: Some(contents.into()),
            source: None,
            destination: destination.into(),
            perms: DEFAULT_TEMPLATE_PERMS,
            refresh_interval: None,
        }
    }

    pub fn from_source(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            contents: None,
            source: Some(source.into()),
            destination: destination.into(),
            perms: DEFAULT_TEMPLATE_PERMS,
            refresh_interval: None,
        }
    }

    pub fn with_refresh(mut self, interval: Duration) -> Self {
        self.refresh_interval = Some(interval);
        self
    }

    pub fn with_perms(mut self, perms: u32) -> Self {
        self.perms = perms;
        self
    }

    /// Name used in logs and invalidity signals.
    pub fn name(&self) -> String {
        self.destination.display().to_string()
    }

    /// Template text, from `contents` or read from `source`.
    pub async fn load(&self) -> Result<String, RenderError> {
        match (&self.contents, &self.source) {
            (Some(contents), _) => Ok(contents.clone()),
            (None, Some(source)) => Ok(tokio::fs::read_to_string(source).await?),
            (None, None) => Err(RenderError::Failed(format!(
                "template for {} has neither contents nor source",
                self.name()
            ))),
        }
    }

    pub(crate) fn problems(&self, index: usize) -> Vec<ConfigError> {
        let key = |field: &str| format!("templates[{}].{}", index, field);
        let mut problems = Vec::new();

        if self.destination.as_os_str().is_empty() {
            problems.push(ConfigError::InvalidValue {
                key: key("destination"),
                message: "must not be empty".into(),
            });
        }
        match (&self.contents, &self.source) {
            (Some(_), Some(_)) => problems.push(ConfigError::InvalidValue {
                key: key("contents"),
                message: "contents and source are mutually exclusive".into(),
            }),
            (None, None) => problems.push(ConfigError::InvalidValue {
                key: key("contents"),
                message: "one of contents or source is required".into(),
            }),
            _ => {}
        }
        if self.refresh_interval.is_some_and(|i| i.is_zero()) {
            problems.push(ConfigError::InvalidValue {
                key: key("refresh_interval"),
                message: "must be greater than zero".into(),
            });
        }
        problems
    }
}
