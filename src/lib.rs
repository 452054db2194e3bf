//! # autoauth
//!
//! Credential lifecycle core for a secrets-management agent.
//!
//! An [`AuthHandler`] obtains a short-lived credential through a pluggable
//! [`AuthMethod`] and keeps it valid. Each new credential goes to the
//! [`SinkServer`], which writes it to every configured [`Sink`], and to the
//! [`TemplateServer`], which renders templates with it. When a consumer finds
//! the credential dead it raises an invalidity signal, and the handler runs
//! exactly one re-authentication for that credential's generation.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use autoauth::{Agent, config::AgentConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), autoauth::Error> {
//!     let mut config = AgentConfig::load("/etc/agent/config.json").await?;
//!     config.apply_env("AGENT_")?;
//!
//!     let agent = Agent::builder().config(config).build()?;
//!     agent.run(CancellationToken::new()).await
//! }
//! ```

#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod agent;
pub mod auth;
pub mod client;
pub mod config;
pub mod coordination;
pub mod fs;
pub mod observability;
pub mod sink;
pub mod template;

// Re-exports for convenience
pub use agent::{Agent, AgentBuilder, DEFAULT_DRAIN_TIMEOUT};
pub use auth::{
    AppRoleMethod, AuthConfig, AuthContext, AuthHandler, AuthHandlerConfig, AuthMethod,
    AuthResponse, Credential, PushAuthMethod, PushHandle, TokenFileMethod,
};
pub use client::{
    ClientError, ExponentialBackoff, HttpSecretsClient, InMemorySecretsClient, RetryConfig,
    SecretResponse, SecretsClient, WrapInfo,
};
pub use config::{AgentConfig, ConfigError, ValidationErrors};
pub use coordination::{AuthGate, GateReader, InvalidCredential, InvalidSignalSender};
pub use observability::{AgentMetrics, MetricsSummary, TracingConfig, init_tracing};
pub use sink::{FileSink, Sink, SinkConfig, SinkServer, SinkServerConfig};
pub use template::{
    RenderEngine, RenderError, SecretTemplateEngine, TemplateServer, TemplateServerConfig,
    TemplateSpec, TemplateStatus,
};

/// Error type for autoauth operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Authentication failed.
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    /// A sink could not be written.
    #[error("Sink {sink} failed: {message}")]
    Sink { sink: String, message: String },

    /// A template could not be rendered.
    #[error("Template {template} failed: {source}")]
    Render {
        template: String,
        #[source]
        source: RenderError,
    },

    /// Secrets API request failed.
    #[error("Secrets API error: {0}")]
    Client(#[from] ClientError),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// File system operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization failed.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Operation exceeded timeout.
    #[error("Operation timed out after {:.1}s", .0.as_secs_f64())]
    Timeout(std::time::Duration),

    /// Operation was cancelled by shutdown.
    #[error("Operation cancelled")]
    Cancelled,

    /// A coordination channel closed while still needed.
    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),
}

/// Error category for unified error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Credential could not be obtained or was rejected
    Authentication,
    /// A sink write or template render failed
    Distribution,
    /// Configuration or setup errors
    Configuration,
    /// Network or server errors that may succeed on retry
    Transient,
    /// Internal errors (IO, JSON, unexpected states)
    Internal,
}

impl Error {
    pub fn auth(message: impl Into<String>) -> Self {
        Error::Auth {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Auth { .. } => ErrorCategory::Authentication,
            Error::Client(e) if e.is_invalid_token() => ErrorCategory::Authentication,

            Error::Sink { .. } | Error::Render { .. } => ErrorCategory::Distribution,
            Error::Client(ClientError::PermissionDenied { .. }) => ErrorCategory::Distribution,

            Error::Config(_) | Error::Client(ClientError::Address(_)) => {
                ErrorCategory::Configuration
            }

            Error::Client(e) if e.is_retryable() => ErrorCategory::Transient,
            Error::Timeout(_) => ErrorCategory::Transient,

            Error::Client(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::Cancelled
            | Error::ChannelClosed(_) => ErrorCategory::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    /// Errors that retrying cannot fix without operator action.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Configuration | ErrorCategory::Internal
        ) && !matches!(self, Error::Cancelled)
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
