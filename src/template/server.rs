//! Template server: renders templates on credential changes and refresh ticks.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;
use tracing::{debug, error, info, warn};

use super::{RenderEngine, RenderError, RenderFailure, TemplateSpec};
use crate::auth::Credential;
use crate::coordination::{GateReader, InvalidCredential, InvalidSignalSender, skip_superseded};
use crate::observability::AgentMetrics;
use crate::{Error, Result, fs};

pub const DEFAULT_SIGNAL_RETRY_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct TemplateServerConfig {
    pub engine: Arc<dyn RenderEngine>,
    /// Refresh interval for templates that do not set their own.
    pub static_secret_render_interval: Option<Duration>,
    /// Stop the server when a render fails for a reason other than the
    /// credential or its policy.
    pub exit_on_retry_failure: bool,
    /// How often a rejection signal that could not be queued is raised again.
    pub signal_retry_interval: Duration,
    pub metrics: Arc<AgentMetrics>,
}

impl TemplateServerConfig {
    pub fn new(engine: Arc<dyn RenderEngine>) -> Self {
        Self {
            engine,
            static_secret_render_interval: None,
            exit_on_retry_failure: false,
            signal_retry_interval: DEFAULT_SIGNAL_RETRY_INTERVAL,
            metrics: Arc::new(AgentMetrics::default()),
        }
    }

    pub fn static_secret_render_interval(mut self, interval: Option<Duration>) -> Self {
        self.static_secret_render_interval = interval;
        self
    }

    pub fn exit_on_retry_failure(mut self, exit: bool) -> Self {
        self.exit_on_retry_failure = exit;
        self
    }

    pub fn signal_retry_interval(mut self, interval: Duration) -> Self {
        self.signal_retry_interval = interval;
        self
    }

    pub fn metrics(mut self, metrics: Arc<AgentMetrics>) -> Self {
        self.metrics = metrics;
        self
    }
}

/// Per-template render state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TemplateStatus {
    Unrendered,
    Rendering,
    Rendered,
    /// The credential of `generation` was rejected; waiting for a newer one.
    Suspended { generation: u64 },
}

#[derive(Clone, Copy, Debug)]
enum Timer {
    Refresh(usize),
    SignalRetry(usize),
}

struct TemplateState {
    spec: TemplateSpec,
    name: String,
    interval: Option<Duration>,
    status: TemplateStatus,
    last_output: Option<String>,
    rendered_with: Option<Credential>,
    signaled: Option<u64>,
    /// Reason of a rejection whose signal is not queued yet.
    unsent_rejection: Option<String>,
    retry_armed: bool,
}

impl TemplateState {
    fn new(spec: TemplateSpec, default_interval: Option<Duration>) -> Self {
        Self {
            name: spec.name(),
            interval: spec.refresh_interval.or(default_interval),
            spec,
            status: TemplateStatus::Unrendered,
            last_output: None,
            rendered_with: None,
            signaled: None,
            unsent_rejection: None,
            retry_armed: false,
        }
    }

    fn settled_status(&self) -> TemplateStatus {
        if self.last_output.is_some() {
            TemplateStatus::Rendered
        } else {
            TemplateStatus::Unrendered
        }
    }

    /// Raise the invalidity signal for `generation`, at most once. A signal
    /// the channel cannot take is remembered for [`Self::resend_signal`].
    fn signal(&mut self, generation: u64, reason: String, invalid: &InvalidSignalSender) {
        if self.signaled == Some(generation) {
            return;
        }
        let signal = InvalidCredential::new(
            generation,
            format!("template:{}", self.name),
            reason.clone(),
        );
        if invalid.signal(signal) {
            self.signaled = Some(generation);
            self.unsent_rejection = None;
        } else {
            self.unsent_rejection = Some(reason);
        }
    }

    fn signal_pending(&self) -> bool {
        matches!(self.status, TemplateStatus::Suspended { generation } if self.signaled != Some(generation))
    }

    fn resend_signal(&mut self, invalid: &InvalidSignalSender) {
        let TemplateStatus::Suspended { generation } = self.status else {
            return;
        };
        if self.signaled == Some(generation) {
            return;
        }
        let reason = self
            .unsent_rejection
            .clone()
            .unwrap_or_else(|| "credential rejected".to_string());
        debug!(template = %self.name, generation, "retrying invalidity signal");
        self.signal(generation, reason, invalid);
    }
}

pub struct TemplateServer {
    config: TemplateServerConfig,
}

impl TemplateServer {
    pub fn new(config: TemplateServerConfig) -> Self {
        Self { config }
    }

    /// Render `templates` for every credential received on `incoming` and on
    /// each template's refresh interval.
    ///
    /// New credentials take priority over refresh ticks. A render that
    /// fails because the credential was rejected raises one invalidity
    /// signal for that generation and suspends the template until a newer
    /// credential arrives. A render denied by policy is only reported.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        mut incoming: mpsc::Receiver<Credential>,
        templates: Vec<TemplateSpec>,
        mut gate: GateReader,
        invalid: InvalidSignalSender,
    ) -> Result<()> {
        info!(templates = templates.len(), "template server starting");

        let mut states: Vec<TemplateState> = templates
            .into_iter()
            .map(|spec| TemplateState::new(spec, self.config.static_secret_render_interval))
            .collect();

        let mut timers: DelayQueue<Timer> = DelayQueue::new();
        for (index, state) in states.iter().enumerate() {
            if let Some(interval) = state.interval {
                timers.insert(Timer::Refresh(index), interval);
            }
        }

        let mut current: Option<Credential> = None;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = incoming.recv() => {
                    let Some(credential) = received else {
                        debug!("credential channel closed");
                        break;
                    };

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = gate.wait_clear() => {}
                    }
                    let credential = skip_superseded(credential, &mut incoming);

                    for (index, state) in states.iter_mut().enumerate() {
                        self.on_credential(state, &credential, &invalid).await?;
                        self.arm_signal_retry(index, state, &mut timers);
                    }
                    current = Some(credential);
                }
                Some(expired) = timers.next(), if !timers.is_empty() => {
                    match expired.into_inner() {
                        Timer::Refresh(index) => {
                            if let Some(state) = states.get_mut(index) {
                                self.on_refresh(state, current.as_ref(), &gate, &invalid).await?;
                                if let Some(interval) = state.interval {
                                    timers.insert(Timer::Refresh(index), interval);
                                }
                                self.arm_signal_retry(index, state, &mut timers);
                            }
                        }
                        Timer::SignalRetry(index) => {
                            if let Some(state) = states.get_mut(index) {
                                state.retry_armed = false;
                                if !gate.is_in_progress() {
                                    state.resend_signal(&invalid);
                                }
                                self.arm_signal_retry(index, state, &mut timers);
                            }
                        }
                    }
                }
            }
        }

        info!("template server stopped");
        Ok(())
    }

    /// Schedule a retry for a rejection signal that is still unsent.
    fn arm_signal_retry(&self, index: usize, state: &mut TemplateState, timers: &mut DelayQueue<Timer>) {
        if state.signal_pending() && !state.retry_armed {
            timers.insert(Timer::SignalRetry(index), self.config.signal_retry_interval);
            state.retry_armed = true;
        }
    }

    async fn on_credential(
        &self,
        state: &mut TemplateState,
        credential: &Credential,
        invalid: &InvalidSignalSender,
    ) -> Result<()> {
        let unchanged = state
            .rendered_with
            .as_ref()
            .is_some_and(|previous| previous.same_value(credential));

        match state.status {
            TemplateStatus::Rendered if unchanged => {
                debug!(
                    template = %state.name,
                    generation = credential.generation(),
                    "credential value unchanged, skipping render"
                );
                Ok(())
            }
            TemplateStatus::Suspended { generation } if generation >= credential.generation() => {
                state.resend_signal(invalid);
                Ok(())
            }
            _ => self.render(state, credential, invalid).await,
        }
    }

    async fn on_refresh(
        &self,
        state: &mut TemplateState,
        current: Option<&Credential>,
        gate: &GateReader,
        invalid: &InvalidSignalSender,
    ) -> Result<()> {
        let Some(credential) = current else {
            debug!(template = %state.name, "no credential yet, skipping refresh");
            return Ok(());
        };
        if gate.is_in_progress() {
            debug!(template = %state.name, "authentication in progress, skipping refresh");
            return Ok(());
        }
        if let TemplateStatus::Suspended { .. } = state.status {
            state.resend_signal(invalid);
            return Ok(());
        }

        self.render(state, credential, invalid).await
    }

    async fn render(
        &self,
        state: &mut TemplateState,
        credential: &Credential,
        invalid: &InvalidSignalSender,
    ) -> Result<()> {
        let metrics = &self.config.metrics;
        let generation = credential.generation();
        state.status = TemplateStatus::Rendering;
        metrics.renders.inc();

        let rendered = match self.config.engine.render(&state.spec, credential).await {
            Ok(output) => self.write_output(state, output).await,
            Err(e) => Err(e),
        };

        let err = match rendered {
            Ok(()) => {
                state.status = TemplateStatus::Rendered;
                state.rendered_with = Some(credential.clone());
                return Ok(());
            }
            Err(e) => e,
        };

        metrics.render_failures.inc();
        match err.kind() {
            RenderFailure::CredentialRejected => {
                warn!(
                    template = %state.name,
                    generation,
                    error = %err,
                    "credential rejected, suspending template"
                );
                state.status = TemplateStatus::Suspended { generation };
                state.signal(generation, err.to_string(), invalid);
                Ok(())
            }
            RenderFailure::AuthorizationDenied => {
                metrics.authorization_denials.inc();
                error!(
                    template = %state.name,
                    generation,
                    error = %err,
                    "template read denied by policy"
                );
                state.status = state.settled_status();
                Ok(())
            }
            RenderFailure::Other => {
                error!(template = %state.name, generation, error = %err, "template render failed");
                state.status = state.settled_status();
                if self.config.exit_on_retry_failure {
                    return Err(Error::Render {
                        template: state.name.clone(),
                        source: err,
                    });
                }
                Ok(())
            }
        }
    }

    async fn write_output(
        &self,
        state: &mut TemplateState,
        output: String,
    ) -> std::result::Result<(), RenderError> {
        if state.last_output.as_deref() == Some(output.as_str()) {
            debug!(template = %state.name, "rendered output unchanged");
            return Ok(());
        }

        fs::write_atomic(&state.spec.destination, output.as_bytes(), state.spec.perms).await?;
        info!(template = %state.name, "template rendered");
        state.last_output = Some(output);
        Ok(())
    }
}
