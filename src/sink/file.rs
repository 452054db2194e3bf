//! File sink.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{Sink, Wrapper};
use crate::auth::Credential;
use crate::{Error, Result, fs};

pub const DEFAULT_SINK_MODE: u32 = 0o640;

/// Writes the raw credential, or its wrap info, to a file.
pub struct FileSink {
    name: String,
    path: PathBuf,
    mode: u32,
    wrapper: Option<Wrapper>,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: format!("file:{}", path.display()),
            path,
            mode: DEFAULT_SINK_MODE,
            wrapper: None,
        }
    }

    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn wrapped(mut self, wrapper: Wrapper) -> Self {
        self.wrapper = Some(wrapper);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Sink for FileSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, credential: &Credential) -> Result<()> {
        let contents = match &self.wrapper {
            Some(wrapper) => wrapper.wrap(&self.name, credential).await?,
            None => credential.expose().to_string(),
        };

        fs::write_atomic(&self.path, contents.as_bytes(), self.mode)
            .await
            .map_err(|e| Error::Sink {
                sink: self.name.clone(),
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthResponse;
    use crate::client::{InMemorySecretsClient, WrapInfo};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_writes_raw_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sink/token");
        let sink = FileSink::new(&path).mode(0o600);

        sink.write(&Credential::new(AuthResponse::new("hvs.t1"), 1))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hvs.t1");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn test_wrapped_write_is_idempotent_per_value() {
        let backend = Arc::new(InMemorySecretsClient::new("mem://test"));
        let token = backend.create_token(&[]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wrapped");
        let sink = FileSink::new(&path)
            .wrapped(Wrapper::new(backend.clone(), Duration::from_secs(300)));

        let credential = Credential::new(
            AuthResponse {
                token: token.clone(),
                renewable: false,
                lease_duration: Duration::ZERO,
            },
            1,
        );
        sink.write(&credential).await.unwrap();
        let first: WrapInfo = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();

        sink.write(&credential).await.unwrap();
        let second: WrapInfo =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.ttl, 300);

        let unwrapped = backend.unwrap(&first.token).unwrap();
        assert_eq!(unwrapped["token"], secrecy::ExposeSecret::expose_secret(&token));
    }

    #[tokio::test]
    async fn test_wrap_failure_is_sink_error() {
        let backend = Arc::new(InMemorySecretsClient::new("mem://test"));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wrapped");
        let sink = FileSink::new(&path).wrapped(Wrapper::new(backend, Duration::from_secs(60)));

        let err = sink
            .write(&Credential::new(AuthResponse::new("not-a-real-token"), 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Sink { .. }));
        assert!(!path.exists());
    }
}
