//! HTTP secrets API client.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use super::{
    ClientError, LOOKUP_SELF_PATH, SecretResponse, SecretsClient, WRAP_PATH, WrapInfo,
};

const TOKEN_HEADER: &str = "X-Vault-Token";
const NAMESPACE_HEADER: &str = "X-Vault-Namespace";
const WRAP_TTL_HEADER: &str = "X-Vault-Wrap-TTL";
const REQUEST_HEADER: &str = "X-Vault-Request";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<String>,
}

/// Client for the secrets HTTP API (`<address>/v1/<path>`).
pub struct HttpSecretsClient {
    http: reqwest::Client,
    address: String,
    base: Url,
    namespace: Option<String>,
    token: RwLock<Option<SecretString>>,
}

impl HttpSecretsClient {
    pub fn new(address: &str) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Self::with_http(address, http)
    }

    /// Build on an existing `reqwest::Client` (custom TLS, proxies, timeouts).
    pub fn with_http(address: &str, http: reqwest::Client) -> Result<Self, ClientError> {
        let address = address.trim_end_matches('/').to_string();
        let base = Url::parse(&format!("{}/v1/", address))?;
        Ok(Self {
            http,
            address,
            base,
            namespace: None,
            token: RwLock::new(None),
        })
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        Ok(self.base.join(path.trim_start_matches('/'))?)
    }

    fn build_request(
        &self,
        method: Method,
        path: &str,
        token: Option<&SecretString>,
    ) -> Result<reqwest::RequestBuilder, ClientError> {
        let mut request = self
            .http
            .request(method, self.url(path)?)
            .header(REQUEST_HEADER, "true");

        if let Some(token) = token {
            request = request.header(TOKEN_HEADER, token.expose_secret());
        }
        if let Some(ref namespace) = self.namespace {
            request = request.header(NAMESPACE_HEADER, namespace);
        }

        Ok(request)
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        wrap_ttl: Option<Duration>,
    ) -> Result<Option<SecretResponse>, ClientError> {
        let token = self.token();
        let mut request = self.build_request(method, path, token.as_ref())?;
        if let Some(body) = body {
            request = request.json(&body);
        }
        if let Some(ttl) = wrap_ttl {
            request = request.header(WRAP_TTL_HEADER, format!("{}s", ttl.as_secs().max(1)));
        }

        let response = request.send().await?;
        let status = response.status();

        match status {
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(None),
            StatusCode::FORBIDDEN => Err(self.classify_forbidden(path, token.as_ref()).await),
            s if s.is_success() => {
                let bytes = response.bytes().await?;
                if bytes.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(serde_json::from_slice(&bytes)?))
                }
            }
            s => {
                let body: ErrorBody = response.json().await.unwrap_or_default();
                Err(ClientError::Api {
                    status: s.as_u16(),
                    message: body.errors.join("; "),
                })
            }
        }
    }

    /// The API answers 403 both for dead tokens and for policy denials.
    /// A follow-up `lookup-self` with the same token tells the two apart:
    /// a token that cannot look itself up is invalid.
    async fn classify_forbidden(&self, path: &str, token: Option<&SecretString>) -> ClientError {
        let Some(token) = token else {
            return ClientError::MissingToken;
        };
        if path.trim_start_matches('/') == LOOKUP_SELF_PATH {
            return ClientError::InvalidToken;
        }

        let probe = match self.build_request(Method::GET, LOOKUP_SELF_PATH, Some(token)) {
            Ok(probe) => probe,
            Err(e) => return e,
        };

        match probe.send().await {
            Ok(response) if response.status() == StatusCode::FORBIDDEN => ClientError::InvalidToken,
            Ok(_) => ClientError::PermissionDenied {
                path: path.to_string(),
            },
            Err(e) => {
                tracing::debug!(error = %e, path, "token probe failed, treating 403 as a policy denial");
                ClientError::PermissionDenied {
                    path: path.to_string(),
                }
            }
        }
    }
}

#[async_trait]
impl SecretsClient for HttpSecretsClient {
    fn address(&self) -> &str {
        &self.address
    }

    fn token(&self) -> Option<SecretString> {
        self.token.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_token(&self, token: Option<SecretString>) {
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = token;
    }

    fn with_token(&self, token: &SecretString) -> Arc<dyn SecretsClient> {
        Arc::new(Self {
            http: self.http.clone(),
            address: self.address.clone(),
            base: self.base.clone(),
            namespace: self.namespace.clone(),
            token: RwLock::new(Some(token.clone())),
        })
    }

    async fn read(&self, path: &str) -> Result<Option<SecretResponse>, ClientError> {
        self.execute(Method::GET, path, None, None).await
    }

    async fn write(&self, path: &str, data: Value) -> Result<Option<SecretResponse>, ClientError> {
        self.execute(Method::POST, path, Some(data), None).await
    }

    async fn wrap(&self, data: Value, ttl: Duration) -> Result<WrapInfo, ClientError> {
        self.execute(Method::POST, WRAP_PATH, Some(data), Some(ttl))
            .await?
            .and_then(|response| response.wrap_info)
            .ok_or_else(|| ClientError::Api {
                status: 200,
                message: "wrap response carried no wrap_info".into(),
            })
    }
}
