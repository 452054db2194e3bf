//! Agent runner: wires the auth handler to the sink and template servers.

mod builder;

pub use builder::{AgentBuilder, DEFAULT_DRAIN_TIMEOUT};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auth::{AuthHandler, AuthHandlerConfig, AuthMethod};
use crate::client::SecretsClient;
use crate::config::AgentConfig;
use crate::coordination::WorkerExit;
use crate::observability::AgentMetrics;
use crate::sink::{Sink, SinkServer, SinkServerConfig};
use crate::template::{RenderEngine, TemplateServer, TemplateServerConfig};
use crate::{Error, Result};

const AUTH_WORKER: &str = "auth_handler";
const SINK_WORKER: &str = "sink_server";
const TEMPLATE_WORKER: &str = "template_server";

/// A configured agent, ready to run.
pub struct Agent {
    config: AgentConfig,
    client: Arc<dyn SecretsClient>,
    method: Arc<dyn AuthMethod>,
    sinks: Vec<Arc<dyn Sink>>,
    engine: Arc<dyn RenderEngine>,
    metrics: Arc<AgentMetrics>,
    drain_timeout: Duration,
}

impl Agent {
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<AgentMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Run every worker until `cancel` fires, a worker fails, or, with
    /// `exit_after_auth`, the sink server finishes its first fan-out.
    ///
    /// On the way out all workers are cancelled and given the drain timeout
    /// to stop; stragglers are aborted.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let shutdown = cancel.child_token();
        let auth = &self.config.auto_auth;

        let handler_config = AuthHandlerConfig::new(Arc::clone(&self.client))
            .reauth_on_new_credentials(auth.enable_reauth_on_new_credentials)
            .exit_on_error(auth.exit_on_error)
            .retry(auth.retry())
            .metrics(Arc::clone(&self.metrics));
        let mut handler = AuthHandler::new(handler_config);

        let sink_rx = (!self.sinks.is_empty()).then(|| handler.subscribe(SINK_WORKER));
        let template_rx =
            (!self.config.templates.is_empty()).then(|| handler.subscribe(TEMPLATE_WORKER));
        let gate = handler.gate();
        let invalid = handler.invalid_signal_sender();

        let (done_tx, mut done_rx) = mpsc::channel::<WorkerExit>(3);
        let mut workers = JoinSet::new();

        if let Some(incoming) = sink_rx {
            let server = SinkServer::new(
                SinkServerConfig::default()
                    .exit_after_auth(self.config.exit_after_auth)
                    .metrics(Arc::clone(&self.metrics)),
            );
            let sinks = self.sinks.clone();
            let (cancel, gate) = (shutdown.clone(), gate.clone());
            workers.spawn(report(done_tx.clone(), SINK_WORKER, async move {
                server.run(cancel, incoming, sinks, gate).await
            }));
        }

        if let Some(incoming) = template_rx {
            let server = TemplateServer::new(
                TemplateServerConfig::new(Arc::clone(&self.engine))
                    .static_secret_render_interval(
                        self.config.template_config.static_secret_render_interval,
                    )
                    .exit_on_retry_failure(self.config.template_config.exit_on_retry_failure)
                    .metrics(Arc::clone(&self.metrics)),
            );
            let templates = self.config.templates.clone();
            let (cancel, gate, invalid) = (shutdown.clone(), gate.clone(), invalid.clone());
            workers.spawn(report(done_tx.clone(), TEMPLATE_WORKER, async move {
                server.run(cancel, incoming, templates, gate, invalid).await
            }));
        }

        let method = Arc::clone(&self.method);
        workers.spawn(report(
            done_tx.clone(),
            AUTH_WORKER,
            handler.run(shutdown.clone(), method),
        ));
        drop(done_tx);

        info!(
            workers = workers.len(),
            sinks = self.sinks.len(),
            templates = self.config.templates.len(),
            "agent started"
        );

        let outcome = self.supervise(&shutdown, &mut done_rx).await;

        shutdown.cancel();
        let drained = tokio::time::timeout(self.drain_timeout, async {
            while workers.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                timeout_ms = self.drain_timeout.as_millis() as u64,
                remaining = workers.len(),
                "workers did not stop in time, aborting"
            );
            workers.shutdown().await;
            if outcome.is_ok() {
                return Err(Error::Timeout(self.drain_timeout));
            }
        }

        info!(summary = ?self.metrics.summary(), "agent stopped");
        outcome
    }

    /// Wait for the first worker exit that ends the agent.
    async fn supervise(
        &self,
        shutdown: &CancellationToken,
        done_rx: &mut mpsc::Receiver<WorkerExit>,
    ) -> Result<()> {
        loop {
            let exit = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                exit = done_rx.recv() => exit,
            };
            let Some(exit) = exit else {
                return Ok(());
            };

            match exit.result {
                Err(e) => {
                    error!(worker = exit.worker, error = %e, "worker failed, shutting down");
                    return Err(e);
                }
                Ok(()) if exit.worker == SINK_WORKER && self.config.exit_after_auth => {
                    info!("credential delivered to every sink, exiting after auth");
                    return Ok(());
                }
                Ok(()) if exit.worker == AUTH_WORKER => {
                    debug!("auth handler finished, shutting down");
                    return Ok(());
                }
                Ok(()) => debug!(worker = exit.worker, "worker finished"),
            }
        }
    }
}

async fn report(
    done: mpsc::Sender<WorkerExit>,
    worker: &'static str,
    task: impl Future<Output = Result<()>>,
) {
    let result = task.await;
    // The receiver is gone once supervision has ended.
    let _ = done.send(WorkerExit::new(worker, result)).await;
}
