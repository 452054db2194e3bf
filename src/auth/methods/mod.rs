//! Built-in authentication methods.

pub(crate) mod approle;
mod push;
mod token_file;

pub use approle::AppRoleMethod;
pub use push::{PushAuthMethod, PushHandle};
pub use token_file::TokenFileMethod;
