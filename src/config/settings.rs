//! The agent's JSON configuration file.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::env::EnvSource;
use super::{ConfigError, ConfigResult, ValidationErrors, de};
use crate::auth::AuthConfig;
use crate::client::resilience::RetryConfig;
use crate::sink::SinkConfig;
use crate::template::TemplateSpec;

pub const DEFAULT_MIN_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(300);

fn default_min_backoff() -> Duration {
    DEFAULT_MIN_BACKOFF
}

fn default_max_backoff() -> Duration {
    DEFAULT_MAX_BACKOFF
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct VaultSettings {
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AutoAuthSettings {
    pub method: AuthConfig,

    #[serde(default)]
    pub sinks: Vec<SinkConfig>,

    #[serde(default)]
    pub enable_reauth_on_new_credentials: bool,

    /// Stop the agent on the first authentication failure.
    #[serde(default)]
    pub exit_on_error: bool,

    /// Failed attempts tolerated before giving up; unset retries forever.
    #[serde(default)]
    pub max_retries: Option<u32>,

    #[serde(default = "default_min_backoff", deserialize_with = "de::duration")]
    pub min_backoff: Duration,

    #[serde(default = "default_max_backoff", deserialize_with = "de::duration")]
    pub max_backoff: Duration,
}

impl AutoAuthSettings {
    pub fn new(method: AuthConfig) -> Self {
        Self {
            method,
            sinks: Vec::new(),
            enable_reauth_on_new_credentials: false,
            exit_on_error: false,
            max_retries: None,
            min_backoff: DEFAULT_MIN_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }

    /// Retry policy for the auth handler.
    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            ..Default::default()
        }
        .with_bounds(self.min_backoff, self.max_backoff)
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct TemplateSettings {
    /// Refresh interval for templates that do not set their own.
    #[serde(default, deserialize_with = "de::option_duration")]
    pub static_secret_render_interval: Option<Duration>,

    #[serde(default)]
    pub exit_on_retry_failure: bool,
}

/// Complete agent configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct AgentConfig {
    #[serde(default)]
    pub vault: VaultSettings,

    pub auto_auth: AutoAuthSettings,

    #[serde(default)]
    pub template_config: TemplateSettings,

    #[serde(default)]
    pub templates: Vec<TemplateSpec>,

    /// Exit once the first credential has been written to every sink.
    #[serde(default)]
    pub exit_after_auth: bool,
}

impl AgentConfig {
    pub fn new(method: AuthConfig) -> Self {
        Self {
            vault: VaultSettings::default(),
            auto_auth: AutoAuthSettings::new(method),
            template_config: TemplateSettings::default(),
            templates: Vec::new(),
            exit_after_auth: false,
        }
    }

    pub fn from_json(json: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub async fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound {
                    key: path.display().to_string(),
                }
            } else {
                ConfigError::Io(e)
            }
        })?;
        Self::from_json(&content)
    }

    /// Override values from `<prefix>ADDR` and `<prefix>EXIT_ON_ERROR`.
    pub fn apply_env(&mut self, prefix: &str) -> ConfigResult<()> {
        self.apply_env_from(&EnvSource::prefixed(prefix))
    }

    pub fn apply_env_from(&mut self, env: &EnvSource) -> ConfigResult<()> {
        if let Some(address) = env.get("addr")? {
            self.vault.address = address;
        }
        if let Some(exit) = env.get_bool("exit.on.error")? {
            self.auto_auth.exit_on_error = exit;
        }
        Ok(())
    }

    /// Check the whole configuration, reporting every problem at once.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut problems = Vec::new();

        if self.vault.address.trim().is_empty() {
            problems.push(ConfigError::InvalidValue {
                key: "vault.address".into(),
                message: "must not be empty".into(),
            });
        } else if url::Url::parse(&self.vault.address).is_err() {
            problems.push(ConfigError::InvalidValue {
                key: "vault.address".into(),
                message: format!("not a valid URL: {}", self.vault.address),
            });
        }

        problems.extend(self.auto_auth.method.problems());
        for (index, sink) in self.auto_auth.sinks.iter().enumerate() {
            problems.extend(sink.problems(index));
        }
        if self.auto_auth.min_backoff > self.auto_auth.max_backoff {
            problems.push(ConfigError::InvalidValue {
                key: "auto_auth.min_backoff".into(),
                message: "must not exceed auto_auth.max_backoff".into(),
            });
        }

        if self
            .template_config
            .static_secret_render_interval
            .is_some_and(|i| i.is_zero())
        {
            problems.push(ConfigError::InvalidValue {
                key: "template_config.static_secret_render_interval".into(),
                message: "must be greater than zero".into(),
            });
        }
        for (index, template) in self.templates.iter().enumerate() {
            problems.extend(template.problems(index));
        }

        if self.exit_after_auth && self.auto_auth.sinks.is_empty() {
            problems.push(ConfigError::InvalidValue {
                key: "exit_after_auth".into(),
                message: "requires at least one sink".into(),
            });
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationErrors(ValidationErrors(problems)))
        }
    }
}
