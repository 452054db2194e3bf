//! In-process secrets backend.
//!
//! Models the parts of the API the agent depends on: token validity and
//! revocation, path policies, token lookup and renewal, AppRole login and
//! response wrapping. Tokens with a TTL expire on their own.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};

use super::{
    ClientError, LOOKUP_SELF_PATH, RENEW_SELF_PATH, SecretAuth, SecretResponse, SecretsClient,
    WRAP_PATH, WrapInfo,
};

const ROOT_POLICY: &str = "root";

struct TokenEntry {
    policies: Vec<String>,
    ttl: Duration,
    renewable: bool,
    issued: Instant,
    revoked: bool,
}

impl TokenEntry {
    fn is_live(&self) -> bool {
        !self.revoked && (self.ttl.is_zero() || self.issued.elapsed() < self.ttl)
    }

    fn remaining(&self) -> u64 {
        if self.ttl.is_zero() {
            0
        } else {
            self.ttl.saturating_sub(self.issued.elapsed()).as_secs()
        }
    }
}

struct AppRole {
    mount: String,
    role_id: String,
    secret_id: String,
    policies: Vec<String>,
    ttl: Duration,
}

#[derive(Default)]
struct State {
    tokens: HashMap<String, TokenEntry>,
    policies: HashMap<String, Vec<String>>,
    secrets: HashMap<String, Value>,
    wrapped: HashMap<String, Value>,
    approles: Vec<AppRole>,
}

impl State {
    fn mint(&mut self, policies: Vec<String>, ttl: Duration, renewable: bool) -> String {
        let id = format!("hvs.mem{:016x}", rand::random::<u64>());
        self.tokens.insert(
            id.clone(),
            TokenEntry {
                policies,
                ttl,
                renewable,
                issued: Instant::now(),
                revoked: false,
            },
        );
        id
    }

    fn live_token(&self, token: Option<&SecretString>) -> Result<(&str, &TokenEntry), ClientError> {
        let token = token.ok_or(ClientError::MissingToken)?;
        self.tokens
            .get_key_value(token.expose_secret())
            .filter(|(_, entry)| entry.is_live())
            .map(|(id, entry)| (id.as_str(), entry))
            .ok_or(ClientError::InvalidToken)
    }

    fn allows(&self, entry: &TokenEntry, path: &str) -> bool {
        entry.policies.iter().any(|name| {
            name == ROOT_POLICY
                || self
                    .policies
                    .get(name)
                    .is_some_and(|paths| paths.iter().any(|pattern| path_matches(pattern, path)))
        })
    }

    fn authorize(&self, token: Option<&SecretString>, path: &str) -> Result<(), ClientError> {
        let (_, entry) = self.live_token(token)?;
        if self.allows(entry, path) {
            Ok(())
        } else {
            Err(ClientError::PermissionDenied {
                path: path.to_string(),
            })
        }
    }
}

fn path_matches(pattern: &str, path: &str) -> bool {
    let pattern = pattern.trim_start_matches('/');
    match pattern.strip_suffix('*') {
        Some(prefix) => path.starts_with(prefix),
        None => pattern == path,
    }
}

fn normalize(path: &str) -> &str {
    path.trim_start_matches('/')
}

/// Login mount for `auth/<mount>/login`, if `path` is a login path.
fn login_mount(path: &str) -> Option<&str> {
    path.strip_prefix("auth/")?.strip_suffix("/login")
}

/// Secrets client backed by process memory.
///
/// Handles returned by [`SecretsClient::with_token`] share the same backend,
/// so revocations and policy changes are visible to every holder.
pub struct InMemorySecretsClient {
    address: String,
    state: Arc<Mutex<State>>,
    token: RwLock<Option<SecretString>>,
}

impl InMemorySecretsClient {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            state: Arc::new(Mutex::new(State::default())),
            token: RwLock::new(None),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Issue a non-expiring, non-renewable token.
    pub fn create_token(&self, policies: &[&str]) -> SecretString {
        self.create_token_with(Duration::ZERO, false, policies)
    }

    /// Issue a token with a TTL (`Duration::ZERO` never expires).
    pub fn create_token_with(&self, ttl: Duration, renewable: bool, policies: &[&str]) -> SecretString {
        let policies = policies.iter().map(|p| p.to_string()).collect();
        SecretString::from(self.state().mint(policies, ttl, renewable))
    }

    pub fn revoke_token(&self, token: &SecretString) {
        if let Some(entry) = self.state().tokens.get_mut(token.expose_secret()) {
            entry.revoked = true;
        }
    }

    /// Define a policy granting access to `paths`. A trailing `*` matches any suffix.
    pub fn put_policy(&self, name: impl Into<String>, paths: &[&str]) {
        let paths = paths.iter().map(|p| normalize(p).to_string()).collect();
        self.state().policies.insert(name.into(), paths);
    }

    pub fn put_secret(&self, path: &str, data: Value) {
        self.state().secrets.insert(normalize(path).to_string(), data);
    }

    /// Register an AppRole under `auth/<mount>/login`.
    pub fn add_approle(
        &self,
        mount: &str,
        role_id: &str,
        secret_id: &str,
        ttl: Duration,
        policies: &[&str],
    ) {
        self.state().approles.push(AppRole {
            mount: mount.trim_matches('/').to_string(),
            role_id: role_id.to_string(),
            secret_id: secret_id.to_string(),
            policies: policies.iter().map(|p| p.to_string()).collect(),
            ttl,
        });
    }

    /// Consume a wrapping token, returning the wrapped data once.
    pub fn unwrap(&self, wrapping_token: &str) -> Option<Value> {
        self.state().wrapped.remove(wrapping_token)
    }

    fn login(&self, mount: &str, data: &Value) -> Result<Option<SecretResponse>, ClientError> {
        let role_id = data.get("role_id").and_then(Value::as_str).unwrap_or_default();
        let secret_id = data.get("secret_id").and_then(Value::as_str).unwrap_or_default();

        let mut state = self.state();
        let (policies, ttl) = state
            .approles
            .iter()
            .find(|r| r.mount == mount && r.role_id == role_id && r.secret_id == secret_id)
            .map(|r| (r.policies.clone(), r.ttl))
            .ok_or_else(|| ClientError::Api {
                status: 400,
                message: "invalid role or secret ID".into(),
            })?;

        let renewable = !ttl.is_zero();
        let client_token = state.mint(policies.clone(), ttl, renewable);
        Ok(Some(SecretResponse::with_auth(SecretAuth {
            client_token,
            accessor: String::new(),
            policies,
            lease_duration: ttl.as_secs(),
            renewable,
        })))
    }

    fn renew_self(&self, token: Option<&SecretString>) -> Result<Option<SecretResponse>, ClientError> {
        let mut state = self.state();
        let id = state.live_token(token)?.0.to_string();
        let Some(entry) = state.tokens.get_mut(&id) else {
            return Err(ClientError::InvalidToken);
        };
        if !entry.renewable {
            return Err(ClientError::Api {
                status: 400,
                message: "lease is not renewable".into(),
            });
        }

        entry.issued = Instant::now();
        Ok(Some(SecretResponse::with_auth(SecretAuth {
            client_token: id,
            accessor: String::new(),
            policies: entry.policies.clone(),
            lease_duration: entry.ttl.as_secs(),
            renewable: true,
        })))
    }
}

#[async_trait]
impl SecretsClient for InMemorySecretsClient {
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
            address: self.address.clone(),
            state: Arc::clone(&self.state),
            token: RwLock::new(Some(token.clone())),
        })
    }

    async fn read(&self, path: &str) -> Result<Option<SecretResponse>, ClientError> {
        let path = normalize(path);
        let token = self.token();
        let state = self.state();

        if path == LOOKUP_SELF_PATH {
            let (id, entry) = state.live_token(token.as_ref())?;
            return Ok(Some(SecretResponse::with_data(json!({
                "id": id,
                "policies": entry.policies,
                "ttl": entry.remaining(),
                "renewable": entry.renewable,
            }))));
        }

        state.authorize(token.as_ref(), path)?;
        Ok(state.secrets.get(path).cloned().map(SecretResponse::with_data))
    }

    async fn write(&self, path: &str, data: Value) -> Result<Option<SecretResponse>, ClientError> {
        let path = normalize(path);
        if let Some(mount) = login_mount(path) {
            return self.login(mount, &data);
        }

        let token = self.token();
        if path == RENEW_SELF_PATH {
            return self.renew_self(token.as_ref());
        }

        let mut state = self.state();
        state.authorize(token.as_ref(), path)?;
        state.secrets.insert(path.to_string(), data);
        Ok(None)
    }

    async fn wrap(&self, data: Value, ttl: Duration) -> Result<WrapInfo, ClientError> {
        let token = self.token();
        let mut state = self.state();
        state.live_token(token.as_ref())?;

        let wrapping_token = format!("hvs.wrap{:016x}", rand::random::<u64>());
        state.wrapped.insert(wrapping_token.clone(), data);

        Ok(WrapInfo {
            token: wrapping_token,
            accessor: format!("acc{:08x}", rand::random::<u32>()),
            ttl: ttl.as_secs(),
            creation_time: Utc::now(),
            creation_path: WRAP_PATH.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scoped(client: &InMemorySecretsClient, token: &SecretString) -> Arc<dyn SecretsClient> {
        client.with_token(token)
    }

    #[tokio::test]
    async fn test_policy_allows_and_denies() {
        let backend = InMemorySecretsClient::new("mem://test");
        backend.put_policy("app", &["secret/data/app/*"]);
        backend.put_secret("secret/data/app/db", json!({ "data": { "password": "pw" } }));
        backend.put_secret("secret/data/other", json!({ "data": {} }));

        let token = backend.create_token(&["app"]);
        let client = scoped(&backend, &token);

        let response = client.read("secret/data/app/db").await.unwrap().unwrap();
        assert_eq!(response.field("data.password"), Some(&json!("pw")));

        let err = client.read("secret/data/other").await.unwrap_err();
        assert!(err.is_permission_denied());
    }

    #[tokio::test]
    async fn test_revoked_token_is_invalid() {
        let backend = InMemorySecretsClient::new("mem://test");
        let token = backend.create_token(&["root"]);
        let client = scoped(&backend, &token);
        assert!(client.read(LOOKUP_SELF_PATH).await.is_ok());

        backend.revoke_token(&token);
        assert!(matches!(
            client.read(LOOKUP_SELF_PATH).await,
            Err(ClientError::InvalidToken)
        ));
        assert!(matches!(
            client.read("secret/data/anything").await,
            Err(ClientError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_missing_token() {
        let backend = InMemorySecretsClient::new("mem://test");
        let err = backend.read("secret/data/app").await.unwrap_err();
        assert!(matches!(err, ClientError::MissingToken));
        assert!(err.is_invalid_token());
    }

    #[tokio::test]
    async fn test_lookup_self_needs_no_policy() {
        let backend = InMemorySecretsClient::new("mem://test");
        let token = backend.create_token(&[]);
        let response = scoped(&backend, &token)
            .read(LOOKUP_SELF_PATH)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.field("id"), Some(&json!(token.expose_secret())));
    }

    #[tokio::test]
    async fn test_token_expires() {
        let backend = InMemorySecretsClient::new("mem://test");
        let token = backend.create_token_with(Duration::from_millis(50), true, &["root"]);
        let client = scoped(&backend, &token);
        assert!(client.read(LOOKUP_SELF_PATH).await.is_ok());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(client.read(LOOKUP_SELF_PATH).await.unwrap_err().is_invalid_token());
    }

    #[tokio::test]
    async fn test_renew_self() {
        let backend = InMemorySecretsClient::new("mem://test");
        let renewable = backend.create_token_with(Duration::from_secs(60), true, &[]);
        let response = scoped(&backend, &renewable)
            .write(RENEW_SELF_PATH, json!({}))
            .await
            .unwrap()
            .unwrap();
        let auth = response.auth.unwrap();
        assert_eq!(auth.client_token, renewable.expose_secret());
        assert_eq!(auth.lease_duration, 60);

        let fixed = backend.create_token(&[]);
        let err = scoped(&backend, &fixed)
            .write(RENEW_SELF_PATH, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Api { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_approle_login() {
        let backend = InMemorySecretsClient::new("mem://test");
        backend.add_approle("approle", "role", "secret", Duration::from_secs(30), &["app"]);

        let response = backend
            .write(
                "auth/approle/login",
                json!({ "role_id": "role", "secret_id": "secret" }),
            )
            .await
            .unwrap()
            .unwrap();
        let auth = response.auth.unwrap();
        assert!(auth.renewable);
        assert_eq!(auth.policies, vec!["app".to_string()]);

        let err = backend
            .write(
                "auth/approle/login",
                json!({ "role_id": "role", "secret_id": "wrong" }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Api { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_wrap_is_single_use() {
        let backend = InMemorySecretsClient::new("mem://test");
        let token = backend.create_token(&[]);
        let info = scoped(&backend, &token)
            .wrap(json!({ "token": "inner" }), Duration::from_secs(300))
            .await
            .unwrap();

        assert_eq!(info.ttl, 300);
        assert_eq!(info.creation_path, WRAP_PATH);
        assert_eq!(backend.unwrap(&info.token), Some(json!({ "token": "inner" })));
        assert!(backend.unwrap(&info.token).is_none());
    }

    #[test]
    fn test_path_matching() {
        assert!(path_matches("secret/data/app/*", "secret/data/app/db"));
        assert!(path_matches("/secret/data/app", "secret/data/app"));
        assert!(!path_matches("secret/data/app", "secret/data/app/db"));
        assert_eq!(login_mount("auth/approle/login"), Some("approle"));
        assert_eq!(login_mount("auth/token/lookup-self"), None);
    }
}
