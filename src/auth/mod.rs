//! Authentication: credentials, methods and the re-authentication loop.
//!
//! Built-in methods:
//! - **Token file**: reads a token from disk and verifies it
//! - **AppRole**: logs in with a role ID and secret ID
//! - **Push**: waits for credentials supplied programmatically

mod config;
mod credential;
mod handler;
mod method;
pub mod methods;

pub use config::AuthConfig;
pub use credential::{AuthResponse, Credential};
pub use handler::{AuthHandler, AuthHandlerConfig, DEFAULT_OUTPUT_CAPACITY};
pub use method::{AuthContext, AuthMethod};
pub use methods::{AppRoleMethod, PushAuthMethod, PushHandle, TokenFileMethod};
