//! Authentication orchestrator.
//!
//! The handler runs one authentication attempt at a time, publishes every
//! resulting credential to one bounded channel per consumer, and returns to
//! authenticating when a consumer reports the current credential as invalid,
//! when the method reports a new credential, or when renewal fails.

use std::sync::Arc;

use secrecy::ExposeSecret;
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{AuthContext, AuthMethod, AuthResponse, Credential};
use crate::client::{RENEW_SELF_PATH, RetryConfig, SecretsClient};
use crate::coordination::{
    AuthGate, DEFAULT_SIGNAL_CAPACITY, GateReader, InvalidCredential, InvalidSignalSender,
    invalid_signal_channel,
};
use crate::observability::AgentMetrics;
use crate::{Error, Result};

pub const DEFAULT_OUTPUT_CAPACITY: usize = 2;

/// Auth handler settings.
#[derive(Clone)]
pub struct AuthHandlerConfig {
    pub client: Arc<dyn SecretsClient>,
    /// Re-authenticate when the method reports a new credential.
    pub enable_reauth_on_new_credentials: bool,
    /// Treat any authentication failure as fatal.
    pub exit_on_error: bool,
    pub retry: RetryConfig,
    /// Renew renewable credentials in place before their lease runs out.
    pub enable_renewal: bool,
    /// Capacity of each consumer channel.
    pub output_capacity: usize,
    pub metrics: Arc<AgentMetrics>,
}

impl AuthHandlerConfig {
    pub fn new(client: Arc<dyn SecretsClient>) -> Self {
        Self {
            client,
            enable_reauth_on_new_credentials: false,
            exit_on_error: false,
            retry: RetryConfig::default(),
            enable_renewal: true,
            output_capacity: DEFAULT_OUTPUT_CAPACITY,
            metrics: Arc::new(AgentMetrics::default()),
        }
    }

    pub fn reauth_on_new_credentials(mut self, enabled: bool) -> Self {
        self.enable_reauth_on_new_credentials = enabled;
        self
    }

    pub fn exit_on_error(mut self, exit: bool) -> Self {
        self.exit_on_error = exit;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn renewal(mut self, enabled: bool) -> Self {
        self.enable_renewal = enabled;
        self
    }

    pub fn output_capacity(mut self, capacity: usize) -> Self {
        self.output_capacity = capacity.max(1);
        self
    }

    pub fn metrics(mut self, metrics: Arc<AgentMetrics>) -> Self {
        self.metrics = metrics;
        self
    }
}

struct Output {
    name: String,
    latest: watch::Sender<Option<Credential>>,
    tx: mpsc::Sender<Credential>,
}

enum Wake {
    Cancelled,
    Invalid(InvalidCredential),
    NewCredentials,
    Renew,
}

/// Owns the re-authentication loop.
pub struct AuthHandler {
    config: AuthHandlerConfig,
    gate: AuthGate,
    outputs: Vec<Output>,
    invalid_tx: InvalidSignalSender,
    invalid_rx: mpsc::Receiver<InvalidCredential>,
    generation: u64,
    current: Option<Credential>,
    renew_at: Option<Instant>,
}

impl AuthHandler {
    pub fn new(config: AuthHandlerConfig) -> Self {
        let (invalid_tx, invalid_rx) = invalid_signal_channel(DEFAULT_SIGNAL_CAPACITY);
        Self {
            config,
            gate: AuthGate::new(),
            outputs: Vec::new(),
            invalid_tx,
            invalid_rx,
            generation: 0,
            current: None,
            renew_at: None,
        }
    }

    /// Register a consumer and return its credential channel.
    ///
    /// Each consumer gets its own channel. A consumer that falls behind only
    /// ever has the newest credential waiting for it; superseded ones are
    /// never queued behind it.
    pub fn subscribe(&mut self, name: impl Into<String>) -> mpsc::Receiver<Credential> {
        let (tx, rx) = mpsc::channel(self.config.output_capacity.max(1));
        let (latest, _) = watch::channel(None);
        self.outputs.push(Output {
            name: name.into(),
            latest,
            tx,
        });
        rx
    }

    pub fn gate(&self) -> GateReader {
        self.gate.reader()
    }

    pub fn invalid_signal_sender(&self) -> InvalidSignalSender {
        self.invalid_tx.clone()
    }

    /// Run until cancelled, or until authentication fails fatally.
    pub async fn run(mut self, cancel: CancellationToken, method: Arc<dyn AuthMethod>) -> Result<()> {
        info!(method = method.name(), consumers = self.outputs.len(), "auth handler starting");

        let forwarding = cancel.child_token();
        let mut forwarders = JoinSet::new();
        for output in &self.outputs {
            forwarders.spawn(forward_latest(
                output.name.clone(),
                output.latest.subscribe(),
                output.tx.clone(),
                forwarding.clone(),
            ));
        }

        let result = self.run_loop(&cancel, method.as_ref()).await;

        method.shutdown().await;
        self.gate.set_in_progress(false);
        forwarding.cancel();
        while forwarders.join_next().await.is_some() {}

        match &result {
            Ok(()) => info!("auth handler stopped"),
            Err(e) => error!(error = %e, "auth handler stopped"),
        }
        result
    }

    async fn run_loop(&mut self, cancel: &CancellationToken, method: &dyn AuthMethod) -> Result<()> {
        let metrics = Arc::clone(&self.config.metrics);
        let mut new_credentials = if self.config.enable_reauth_on_new_credentials {
            method.new_credentials()
        } else {
            None
        };
        let mut attempt: u32 = 0;

        loop {
            self.gate.set_in_progress(true);

            // Only failed attempts back off. A cycle started by a signal,
            // a new credential or a failed renewal always has attempt == 0.
            if attempt > 0 {
                let delay = self.config.retry.backoff.delay_for(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off");
                if !self.backoff(cancel, delay).await {
                    return Ok(());
                }
            }

            self.config.client.set_token(None);
            metrics.auth_attempts.inc();
            let ctx = AuthContext {
                client: Arc::clone(&self.config.client),
                attempt,
                cancel: cancel.clone(),
            };
            if let Some(rx) = new_credentials.as_mut() {
                rx.borrow_and_update();
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                outcome = method.authenticate(&ctx) => outcome,
            };

            let response = match outcome {
                Ok(response) => response,
                Err(Error::Cancelled) if cancel.is_cancelled() => return Ok(()),
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    metrics.auth_failures.inc();
                    error!(method = method.name(), attempt, error = %e, "authentication failed");

                    if self.config.exit_on_error {
                        return Err(e);
                    }
                    if self.config.retry.exhausted(attempt) {
                        return Err(Error::auth(format!(
                            "giving up after {} failed attempts: {}",
                            attempt, e
                        )));
                    }
                    continue;
                }
            };

            attempt = 0;
            metrics.auth_successes.inc();
            self.issue(response);

            loop {
                match self.wait(cancel, &mut new_credentials).await {
                    Wake::Cancelled => return Ok(()),
                    Wake::Invalid(signal) if signal.generation == self.generation => {
                        metrics.invalid_signals_honored.inc();
                        info!(
                            generation = signal.generation,
                            source = %signal.source,
                            reason = %signal.reason,
                            "credential reported invalid, re-authenticating"
                        );
                        break;
                    }
                    Wake::Invalid(signal) => {
                        debug!(
                            generation = signal.generation,
                            current = self.generation,
                            source = %signal.source,
                            "ignoring invalidity signal for a superseded credential"
                        );
                    }
                    Wake::NewCredentials => {
                        info!(method = method.name(), "new credentials available, re-authenticating");
                        break;
                    }
                    Wake::Renew => {
                        let renewed = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Ok(()),
                            renewed = self.renew() => renewed,
                        };
                        match renewed {
                            Ok(response) => {
                                metrics.renewals.inc();
                                self.issue(response);
                            }
                            Err(e) => {
                                warn!(generation = self.generation, error = %e, "renewal failed, re-authenticating");
                                break;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Publish a new generation to every consumer and lower the gate.
    fn issue(&mut self, response: AuthResponse) {
        self.generation += 1;
        let credential = Credential::new(response, self.generation);

        self.config.client.set_token(Some(credential.token().clone()));
        self.renew_at = credential
            .renew_after()
            .filter(|_| self.config.enable_renewal)
            .map(|after| Instant::now() + after);

        for output in &self.outputs {
            output.latest.send_replace(Some(credential.clone()));
        }
        self.gate.set_in_progress(false);
        self.config.metrics.current_generation.set(self.generation as i64);

        info!(
            generation = self.generation,
            renewable = credential.renewable(),
            lease_secs = credential.lease_duration().as_secs(),
            "credential issued"
        );
        self.current = Some(credential);
    }

    async fn wait(
        &mut self,
        cancel: &CancellationToken,
        new_credentials: &mut Option<watch::Receiver<u64>>,
    ) -> Wake {
        let renew_at = self.renew_at;
        let metrics = &self.config.metrics;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Wake::Cancelled,
            Some(signal) = self.invalid_rx.recv() => {
                metrics.invalid_signals_received.inc();
                Wake::Invalid(signal)
            }
            Ok(()) = async {
                match new_credentials.as_mut() {
                    Some(rx) => loop {
                        if let Err(closed) = rx.changed().await {
                            return Err(closed);
                        }
                        if *rx.borrow_and_update() > 0 {
                            return Ok(());
                        }
                    },
                    None => std::future::pending().await,
                }
            } => Wake::NewCredentials,
            _ = async {
                match renew_at {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending().await,
                }
            } => Wake::Renew,
        }
    }

    /// Sleep for `delay`. Signals received meanwhile refer to a credential
    /// that is already being replaced and are dropped.
    async fn backoff(&mut self, cancel: &CancellationToken, delay: std::time::Duration) -> bool {
        let timer = sleep(delay);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                Some(signal) = self.invalid_rx.recv() => {
                    self.config.metrics.invalid_signals_received.inc();
                    debug!(
                        generation = signal.generation,
                        source = %signal.source,
                        "ignoring invalidity signal during backoff"
                    );
                }
                _ = &mut timer => return true,
            }
        }
    }

    async fn renew(&self) -> Result<AuthResponse> {
        let current = self
            .current
            .as_ref()
            .ok_or_else(|| Error::auth("no credential to renew"))?;

        let auth = self
            .config
            .client
            .with_token(current.token())
            .write(RENEW_SELF_PATH, json!({}))
            .await?
            .and_then(|response| response.auth)
            .ok_or_else(|| Error::auth("renewal returned no auth data"))?;

        let mut renewed = AuthResponse::from(auth);
        if renewed.token.expose_secret().is_empty() {
            renewed.token = current.token().clone();
        }
        debug!(
            generation = current.generation(),
            lease_secs = renewed.lease_duration.as_secs(),
            "credential renewed"
        );
        Ok(renewed)
    }
}

/// Forward the newest credential from `latest` into a consumer channel.
///
/// While the consumer's channel is full, newer credentials replace older
/// ones in `latest`, so only the newest is sent once space frees up.
async fn forward_latest(
    name: String,
    mut latest: watch::Receiver<Option<Credential>>,
    tx: mpsc::Sender<Credential>,
    cancel: CancellationToken,
) {
    loop {
        let credential = latest.borrow_and_update().clone();
        if let Some(credential) = credential {
            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                sent = tx.send(credential) => sent,
            };
            if sent.is_err() {
                debug!(consumer = %name, "consumer channel closed, stopping forwarder");
                return;
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            changed = latest.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::methods::{PushAuthMethod, PushHandle};
    use crate::client::InMemorySecretsClient;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::task::JoinHandle;

    const WAIT: Duration = Duration::from_secs(2);

    /// Plays back a fixed sequence of outcomes, then blocks forever.
    struct ScriptedMethod {
        script: Mutex<VecDeque<Result<AuthResponse>>>,
        calls: AtomicU32,
    }

    impl ScriptedMethod {
        fn new(script: Vec<Result<AuthResponse>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AuthMethod for ScriptedMethod {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn authenticate(&self, _ctx: &AuthContext) -> Result<AuthResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(outcome) => outcome,
                None => std::future::pending().await,
            }
        }
    }

    /// Push method that queues `follow_up` just before its first attempt returns.
    struct PushesDuringAttempt {
        inner: PushAuthMethod,
        handle: PushHandle,
        follow_up: Mutex<Option<AuthResponse>>,
    }

    #[async_trait]
    impl AuthMethod for PushesDuringAttempt {
        fn name(&self) -> &str {
            "push"
        }

        async fn authenticate(&self, ctx: &AuthContext) -> Result<AuthResponse> {
            let response = self.inner.authenticate(ctx).await?;
            let follow_up = self.follow_up.lock().unwrap().take();
            if let Some(next) = follow_up {
                self.handle.push(next);
            }
            Ok(response)
        }

        fn new_credentials(&self) -> Option<watch::Receiver<u64>> {
            self.inner.new_credentials()
        }
    }

    fn fast_config() -> AuthHandlerConfig {
        AuthHandlerConfig::new(Arc::new(InMemorySecretsClient::new("mem://test"))).retry(
            RetryConfig::unbounded().with_bounds(Duration::from_millis(1), Duration::from_millis(5)),
        )
    }

    fn spawn(
        handler: AuthHandler,
        method: Arc<dyn AuthMethod>,
    ) -> (CancellationToken, JoinHandle<Result<()>>) {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(handler.run(cancel.clone(), method));
        (cancel, task)
    }

    async fn next(rx: &mut mpsc::Receiver<Credential>) -> Credential {
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for credential")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_publishes_to_every_consumer() {
        let method = ScriptedMethod::new(vec![Ok(AuthResponse::new("t1"))]);
        let mut handler = AuthHandler::new(fast_config());
        let mut sinks = handler.subscribe("sinks");
        let mut templates = handler.subscribe("templates");
        let gate = handler.gate();
        let (cancel, task) = spawn(handler, method.clone());

        let a = next(&mut sinks).await;
        let b = next(&mut templates).await;
        assert_eq!(a.expose(), "t1");
        assert_eq!(a.generation(), 1);
        assert_eq!(b.generation(), 1);
        assert!(!gate.is_in_progress());

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_gate_raised_while_authenticating() {
        let method = ScriptedMethod::new(vec![]);
        let handler = AuthHandler::new(fast_config());
        let gate = handler.gate();
        let (cancel, task) = spawn(handler, method.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(gate.is_in_progress());

        cancel.cancel();
        task.await.unwrap().unwrap();
        assert!(!gate.is_in_progress());
    }

    #[tokio::test]
    async fn test_exit_on_error() {
        let method = ScriptedMethod::new(vec![Err(Error::auth("denied")), Ok(AuthResponse::new("t1"))]);
        let handler = AuthHandler::new(fast_config().exit_on_error(true));
        let (_cancel, task) = spawn(handler, method.clone());

        let result = tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
        assert!(matches!(result, Err(Error::Auth { .. })));
        assert_eq!(method.calls(), 1);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let metrics = Arc::new(AgentMetrics::default());
        let method = ScriptedMethod::new(vec![
            Err(Error::auth("not yet")),
            Err(Error::auth("not yet")),
            Ok(AuthResponse::new("t1")),
        ]);
        let mut handler = AuthHandler::new(fast_config().metrics(metrics.clone()));
        let mut rx = handler.subscribe("sinks");
        let (cancel, task) = spawn(handler, method.clone());

        let credential = next(&mut rx).await;
        assert_eq!(credential.expose(), "t1");
        assert_eq!(credential.generation(), 1);
        assert_eq!(metrics.auth_failures.get(), 2);
        assert_eq!(metrics.auth_successes.get(), 1);

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_max_retries_exhausted() {
        let method = ScriptedMethod::new(vec![
            Err(Error::auth("a")),
            Err(Error::auth("b")),
            Err(Error::auth("c")),
            Ok(AuthResponse::new("never")),
        ]);
        let config = fast_config().retry(
            RetryConfig::bounded(2).with_bounds(Duration::from_millis(1), Duration::from_millis(2)),
        );
        let (_cancel, task) = spawn(AuthHandler::new(config), method.clone());

        let result = tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
        let err = result.unwrap_err();
        assert!(err.to_string().contains("3 failed attempts"));
        assert_eq!(method.calls(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_signals_trigger_one_cycle() {
        let metrics = Arc::new(AgentMetrics::default());
        let method = ScriptedMethod::new(vec![
            Ok(AuthResponse::new("t1")),
            Ok(AuthResponse::new("t2")),
        ]);
        let mut handler = AuthHandler::new(fast_config().metrics(metrics.clone()));
        let mut rx = handler.subscribe("templates");
        let signals = handler.invalid_signal_sender();
        let (cancel, task) = spawn(handler, method.clone());

        let first = next(&mut rx).await;
        assert!(signals.signal(InvalidCredential::new(first.generation(), "template:a", "revoked")));
        assert!(signals.signal(InvalidCredential::new(first.generation(), "template:b", "revoked")));

        let second = next(&mut rx).await;
        assert_eq!(second.expose(), "t2");
        assert_eq!(second.generation(), 2);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(method.calls(), 2);
        assert_eq!(metrics.invalid_signals_received.get(), 2);
        assert_eq!(metrics.invalid_signals_honored.get(), 1);

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stale_signal_ignored() {
        let method = ScriptedMethod::new(vec![Ok(AuthResponse::new("t1"))]);
        let mut handler = AuthHandler::new(fast_config());
        let mut rx = handler.subscribe("templates");
        let signals = handler.invalid_signal_sender();
        let gate = handler.gate();
        let (cancel, task) = spawn(handler, method.clone());

        let credential = next(&mut rx).await;
        signals.signal(InvalidCredential::new(credential.generation() - 1, "template:a", "old"));
        signals.signal(InvalidCredential::new(credential.generation() + 1, "template:a", "future"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(method.calls(), 1);
        assert!(!gate.is_in_progress());

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_signal_reauthenticates_without_backoff() {
        let method = ScriptedMethod::new(vec![
            Err(Error::auth("first attempt fails")),
            Ok(AuthResponse::new("t1")),
            Ok(AuthResponse::new("t2")),
        ]);
        let config = fast_config().retry(
            RetryConfig::unbounded().with_bounds(Duration::from_millis(200), Duration::from_secs(60)),
        );
        let mut handler = AuthHandler::new(config);
        let mut rx = handler.subscribe("templates");
        let signals = handler.invalid_signal_sender();
        let (cancel, task) = spawn(handler, method.clone());

        let first = next(&mut rx).await;
        let started = std::time::Instant::now();
        signals.signal(InvalidCredential::new(first.generation(), "template:a", "revoked"));
        let second = next(&mut rx).await;

        assert_eq!(second.expose(), "t2");
        assert!(started.elapsed() < Duration::from_millis(150));

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_reauth_on_new_credentials() {
        let (method, push) = PushAuthMethod::new();
        let mut handler = AuthHandler::new(fast_config().reauth_on_new_credentials(true));
        let mut rx = handler.subscribe("sinks");
        let (cancel, task) = spawn(handler, Arc::new(method));

        push.push(AuthResponse::new("t1"));
        assert_eq!(next(&mut rx).await.expose(), "t1");

        push.push(AuthResponse::new("t2"));
        let second = next(&mut rx).await;
        assert_eq!(second.expose(), "t2");
        assert_eq!(second.generation(), 2);

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_push_during_attempt_triggers_another_cycle() {
        let (inner, push) = PushAuthMethod::new();
        let method = Arc::new(PushesDuringAttempt {
            inner,
            handle: push.clone(),
            follow_up: Mutex::new(Some(AuthResponse::new("t2"))),
        });
        let mut handler = AuthHandler::new(fast_config().reauth_on_new_credentials(true));
        let mut rx = handler.subscribe("sinks");
        let gate = handler.gate();
        let (cancel, task) = spawn(handler, method);

        push.push(AuthResponse::new("t1"));
        assert_eq!(next(&mut rx).await.expose(), "t1");

        let second = next(&mut rx).await;
        assert_eq!(second.expose(), "t2");
        assert_eq!(second.generation(), 2);

        cancel.cancel();
        task.await.unwrap().unwrap();
        assert!(!gate.is_in_progress());
    }

    #[tokio::test]
    async fn test_consumed_push_does_not_hold_gate() {
        let (method, push) = PushAuthMethod::new();
        let mut handler = AuthHandler::new(fast_config().reauth_on_new_credentials(true));
        let mut rx = handler.subscribe("sinks");
        let gate = handler.gate();
        let (cancel, task) = spawn(handler, Arc::new(method));

        push.push(AuthResponse::new("t1"));
        assert_eq!(next(&mut rx).await.expose(), "t1");
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!gate.is_in_progress());
        let nothing = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(nothing.is_err());

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_new_credentials_ignored_when_disabled() {
        let (method, push) = PushAuthMethod::new();
        let mut handler = AuthHandler::new(fast_config());
        let mut rx = handler.subscribe("sinks");
        let (cancel, task) = spawn(handler, Arc::new(method));

        push.push(AuthResponse::new("t1"));
        assert_eq!(next(&mut rx).await.expose(), "t1");

        push.push(AuthResponse::new("t2"));
        let nothing = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(nothing.is_err());

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_renews_in_place() {
        let backend = Arc::new(InMemorySecretsClient::new("mem://test"));
        let token = backend.create_token_with(Duration::from_millis(150), true, &[]);
        let metrics = Arc::new(AgentMetrics::default());

        let method = ScriptedMethod::new(vec![Ok(AuthResponse {
            token: token.clone(),
            renewable: true,
            lease_duration: Duration::from_millis(150),
        })]);
        let config = AuthHandlerConfig::new(backend.clone()).metrics(metrics.clone());
        let mut handler = AuthHandler::new(config);
        let mut rx = handler.subscribe("sinks");
        let (cancel, task) = spawn(handler, method.clone());

        let first = next(&mut rx).await;
        let renewed = next(&mut rx).await;
        assert_eq!(renewed.generation(), first.generation() + 1);
        assert!(renewed.same_value(&first));
        assert_eq!(metrics.renewals.get(), 1);
        assert_eq!(method.calls(), 1);

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_failed_renewal_reauthenticates() {
        let backend = Arc::new(InMemorySecretsClient::new("mem://test"));
        let token = backend.create_token_with(Duration::from_millis(150), true, &[]);
        backend.revoke_token(&token);

        let method = ScriptedMethod::new(vec![
            Ok(AuthResponse {
                token,
                renewable: true,
                lease_duration: Duration::from_millis(150),
            }),
            Ok(AuthResponse::new("t2")),
        ]);
        let mut handler = AuthHandler::new(AuthHandlerConfig::new(backend.clone()));
        let mut rx = handler.subscribe("sinks");
        let (cancel, task) = spawn(handler, method.clone());

        next(&mut rx).await;
        let second = next(&mut rx).await;
        assert_eq!(second.expose(), "t2");
        assert_eq!(method.calls(), 2);

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_slow_consumer_sees_latest() {
        let method = ScriptedMethod::new(vec![
            Ok(AuthResponse::new("t1")),
            Ok(AuthResponse::new("t2")),
            Ok(AuthResponse::new("t3")),
            Ok(AuthResponse::new("t4")),
        ]);
        let mut handler = AuthHandler::new(fast_config().output_capacity(1));
        let mut fast = handler.subscribe("templates");
        let mut slow = handler.subscribe("sinks");
        let signals = handler.invalid_signal_sender();
        let (cancel, task) = spawn(handler, method.clone());

        for generation in 1..=3 {
            let credential = next(&mut fast).await;
            assert_eq!(credential.generation(), generation);
            signals.signal(InvalidCredential::new(generation, "template:a", "revoked"));
        }
        assert_eq!(next(&mut fast).await.generation(), 4);

        let mut last = next(&mut slow).await;
        while let Ok(Some(credential)) =
            tokio::time::timeout(Duration::from_millis(50), slow.recv()).await
        {
            assert!(credential.generation() > last.generation());
            last = credential;
        }
        assert_eq!(last.expose(), "t4");

        cancel.cancel();
        task.await.unwrap().unwrap();
    }
}
