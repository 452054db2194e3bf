//! Environment variable lookups for configuration overrides.
//!
//! Keys are written in dotted form (`exit.on.error`) and converted to
//! upper-case underscore names behind an optional prefix
//! (`AGENT_EXIT_ON_ERROR`).

use super::{ConfigError, ConfigResult};

/// Read-only view of prefixed environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvSource {
    prefix: Option<String>,
}

impl EnvSource {
    pub fn new() -> Self {
        Self { prefix: None }
    }

    pub fn prefixed(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    /// Get the full environment variable name
    pub fn env_key(&self, key: &str) -> String {
        let name = key.to_uppercase().replace('.', "_");
        match &self.prefix {
            Some(prefix) => format!("{}{}", prefix, name),
            None => name,
        }
    }

    /// Value of `key`; `None` when unset. Blank values count as unset.
    pub fn get(&self, key: &str) -> ConfigResult<Option<String>> {
        match std::env::var(self.env_key(key)) {
            Ok(value) if value.trim().is_empty() => Ok(None),
            Ok(value) => Ok(Some(value.trim().to_string())),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(e) => Err(ConfigError::Env(e)),
        }
    }

    pub fn get_bool(&self, key: &str) -> ConfigResult<Option<bool>> {
        let Some(value) = self.get(key)? else {
            return Ok(None);
        };
        match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidValue {
                key: self.env_key(key),
                message: format!("expected a boolean, got {:?}", value),
            }),
        }
    }
}
