//! Credential sinks and the server that fans credentials out to them.

mod file;
mod server;
mod wrap;

pub use file::{DEFAULT_SINK_MODE, FileSink};
pub use server::{SinkServer, SinkServerConfig};
pub use wrap::Wrapper;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::Result;
use crate::auth::Credential;
use crate::client::SecretsClient;
use crate::config::{ConfigError, de};

/// Durably records a credential.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Sink name for logs and errors.
    fn name(&self) -> &str;

    /// Record `credential`. The write must be atomic: readers see either the
    /// previous credential or this one.
    async fn write(&self, credential: &Credential) -> Result<()>;
}

fn default_sink_mode() -> u32 {
    DEFAULT_SINK_MODE
}

/// Sink configuration, selected by the `type` discriminant.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkConfig {
    File {
        path: PathBuf,
        #[serde(default = "default_sink_mode", deserialize_with = "de::file_mode")]
        mode: u32,
        /// Response-wrap the credential before writing it.
        #[serde(default, deserialize_with = "de::option_duration")]
        wrap_ttl: Option<Duration>,
    },
}

impl SinkConfig {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        SinkConfig::File {
            path: path.into(),
            mode: DEFAULT_SINK_MODE,
            wrap_ttl: None,
        }
    }

    pub fn build(&self, client: &Arc<dyn SecretsClient>) -> Arc<dyn Sink> {
        match self {
            SinkConfig::File {
                path,
                mode,
                wrap_ttl,
            } => {
                let mut sink = FileSink::new(path).mode(*mode);
                if let Some(ttl) = wrap_ttl {
                    sink = sink.wrapped(Wrapper::new(Arc::clone(client), *ttl));
                }
                Arc::new(sink)
            }
        }
    }

    pub(crate) fn problems(&self, index: usize) -> Vec<ConfigError> {
        let mut problems = Vec::new();
        match self {
            SinkConfig::File { path, wrap_ttl, .. } => {
                if path.as_os_str().is_empty() {
                    problems.push(ConfigError::InvalidValue {
                        key: format!("auto_auth.sinks[{}].path", index),
                        message: "must not be empty".into(),
                    });
                }
                if wrap_ttl.is_some_and(|ttl| ttl.is_zero()) {
                    problems.push(ConfigError::InvalidValue {
                        key: format!("auto_auth.sinks[{}].wrap_ttl", index),
                        message: "must be greater than zero".into(),
                    });
                }
            }
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InMemorySecretsClient;

    #[test]
    fn test_parse_file_sink() {
        let config: SinkConfig = serde_json::from_str(
            r#"{ "type": "file", "path": "/run/agent/token", "mode": "0600", "wrap_ttl": "5m" }"#,
        )
        .unwrap();
        assert_eq!(
            config,
            SinkConfig::File {
                path: "/run/agent/token".into(),
                mode: 0o600,
                wrap_ttl: Some(Duration::from_secs(300)),
            }
        );

        let client: Arc<dyn SecretsClient> = Arc::new(InMemorySecretsClient::new("mem://test"));
        assert_eq!(config.build(&client).name(), "file:/run/agent/token");
    }

    #[test]
    fn test_defaults() {
        let config: SinkConfig =
            serde_json::from_str(r#"{ "type": "file", "path": "/tmp/token" }"#).unwrap();
        assert_eq!(config, SinkConfig::file("/tmp/token"));
        assert!(config.problems(0).is_empty());
    }

    #[test]
    fn test_problems() {
        let config = SinkConfig::File {
            path: PathBuf::new(),
            mode: 0o600,
            wrap_ttl: Some(Duration::ZERO),
        };
        let problems = config.problems(2);
        assert_eq!(problems.len(), 2);
        assert!(problems[0].to_string().contains("auto_auth.sinks[2].path"));
    }
}
