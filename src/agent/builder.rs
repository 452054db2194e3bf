//! AgentBuilder struct and configuration methods.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::AuthMethod;
use crate::client::{HttpSecretsClient, SecretsClient};
use crate::config::{AgentConfig, ConfigError};
use crate::observability::AgentMetrics;
use crate::sink::Sink;
use crate::template::{RenderEngine, SecretTemplateEngine};

use super::Agent;

pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
pub struct AgentBuilder {
    pub(super) config: Option<AgentConfig>,
    pub(super) client: Option<Arc<dyn SecretsClient>>,
    pub(super) auth_method: Option<Arc<dyn AuthMethod>>,
    pub(super) sinks: Vec<Arc<dyn Sink>>,
    pub(super) render_engine: Option<Arc<dyn RenderEngine>>,
    pub(super) metrics: Option<Arc<AgentMetrics>>,
    pub(super) drain_timeout: Option<Duration>,
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use `client` instead of an HTTP client for `vault.address`.
    pub fn client(mut self, client: Arc<dyn SecretsClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Use `method` instead of the one named by `auto_auth.method`.
    pub fn auth_method(mut self, method: Arc<dyn AuthMethod>) -> Self {
        self.auth_method = Some(method);
        self
    }

    /// Add a sink alongside those in `auto_auth.sinks`.
    pub fn sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn render_engine(mut self, engine: Arc<dyn RenderEngine>) -> Self {
        self.render_engine = Some(engine);
        self
    }

    pub fn metrics(mut self, metrics: Arc<AgentMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// How long workers get to stop after shutdown begins.
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> crate::Result<Agent> {
        let mut config = self.config.ok_or_else(|| ConfigError::NotFound {
            key: "auto_auth".into(),
        })?;

        if let Some(client) = &self.client
            && config.vault.address.trim().is_empty()
        {
            config.vault.address = client.address().to_string();
        }
        config.validate()?;

        let client: Arc<dyn SecretsClient> = match self.client {
            Some(client) => client,
            None => Arc::new(HttpSecretsClient::new(&config.vault.address)?),
        };
        let method = self
            .auth_method
            .unwrap_or_else(|| config.auto_auth.method.build_method());

        let mut sinks: Vec<Arc<dyn Sink>> = config
            .auto_auth
            .sinks
            .iter()
            .map(|sink| sink.build(&client))
            .collect();
        sinks.extend(self.sinks);

        let engine = self
            .render_engine
            .unwrap_or_else(|| Arc::new(SecretTemplateEngine::new(Arc::clone(&client))));

        Ok(Agent {
            config,
            client,
            method,
            sinks,
            engine,
            metrics: self.metrics.unwrap_or_default(),
            drain_timeout: self.drain_timeout.unwrap_or(DEFAULT_DRAIN_TIMEOUT),
        })
    }
}
