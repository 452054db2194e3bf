//! Sink server: fans each credential out to every configured sink.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::Sink;
use crate::auth::Credential;
use crate::client::RetryConfig;
use crate::coordination::{GateReader, skip_superseded};
use crate::observability::AgentMetrics;
use crate::{Error, Result};

pub const DEFAULT_SINK_RETRIES: u32 = 3;

#[derive(Clone)]
pub struct SinkServerConfig {
    /// Return after the first credential has been written to every sink.
    pub exit_after_auth: bool,
    /// Retry policy for failed sink writes.
    pub retry: RetryConfig,
    pub metrics: Arc<AgentMetrics>,
}

impl Default for SinkServerConfig {
    fn default() -> Self {
        Self {
            exit_after_auth: false,
            retry: RetryConfig::bounded(DEFAULT_SINK_RETRIES)
                .with_bounds(Duration::from_secs(1), Duration::from_secs(30)),
            metrics: Arc::new(AgentMetrics::default()),
        }
    }
}

impl SinkServerConfig {
    pub fn exit_after_auth(mut self, exit: bool) -> Self {
        self.exit_after_auth = exit;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn metrics(mut self, metrics: Arc<AgentMetrics>) -> Self {
        self.metrics = metrics;
        self
    }
}

enum Distribution {
    Complete,
    /// Some sinks still lack the credential after the retry budget ran out.
    Incomplete(Vec<String>),
    /// A newer credential arrived while retrying.
    Superseded,
    Cancelled,
}

pub struct SinkServer {
    config: SinkServerConfig,
}

impl SinkServer {
    pub fn new(config: SinkServerConfig) -> Self {
        Self { config }
    }

    /// Write every credential received on `incoming` to all `sinks`.
    ///
    /// Writes wait for `gate` to clear. A sink that already holds a
    /// credential's value is not written again.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        mut incoming: mpsc::Receiver<Credential>,
        sinks: Vec<Arc<dyn Sink>>,
        mut gate: GateReader,
    ) -> Result<()> {
        info!(sinks = sinks.len(), "sink server starting");
        let mut written: Vec<Option<Credential>> = vec![None; sinks.len()];

        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = incoming.recv() => received,
            };
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

            if sinks.is_empty() {
                continue;
            }

            match self
                .distribute(&cancel, &credential, &sinks, &mut written, &incoming, &mut gate)
                .await
            {
                Distribution::Complete if self.config.exit_after_auth => {
                    info!(generation = credential.generation(), "credential written, exiting after auth");
                    return Ok(());
                }
                Distribution::Incomplete(failed) if self.config.exit_after_auth => {
                    return Err(Error::Sink {
                        sink: failed.join(", "),
                        message: "write failed after retries".into(),
                    });
                }
                Distribution::Cancelled => break,
                _ => {}
            }
        }

        info!("sink server stopped");
        Ok(())
    }

    async fn distribute(
        &self,
        cancel: &CancellationToken,
        credential: &Credential,
        sinks: &[Arc<dyn Sink>],
        written: &mut [Option<Credential>],
        incoming: &mpsc::Receiver<Credential>,
        gate: &mut GateReader,
    ) -> Distribution {
        let generation = credential.generation();
        let mut pending: Vec<usize> = (0..sinks.len())
            .filter(|&i| !written[i].as_ref().is_some_and(|w| w.same_value(credential)))
            .collect();

        if pending.is_empty() {
            debug!(generation, "credential value unchanged, skipping sink writes");
            return Distribution::Complete;
        }

        let mut attempt: u32 = 0;
        loop {
            let writes = pending.iter().map(|&i| {
                let sink = Arc::clone(&sinks[i]);
                async move { (i, sink.write(credential).await) }
            });
            let results = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Distribution::Cancelled,
                results = join_all(writes) => results,
            };

            pending.clear();
            for (i, result) in results {
                let sink = sinks[i].name();
                match result {
                    Ok(()) => {
                        self.config.metrics.sink_writes.inc();
                        written[i] = Some(credential.clone());
                        debug!(sink, generation, "credential written");
                    }
                    Err(e) => {
                        self.config.metrics.sink_write_failures.inc();
                        error!(sink, generation, attempt, error = %e, "sink write failed");
                        pending.push(i);
                    }
                }
            }

            if pending.is_empty() {
                info!(generation, sinks = sinks.len(), "credential written to all sinks");
                return Distribution::Complete;
            }

            attempt += 1;
            if self.config.retry.exhausted(attempt) {
                let failed: Vec<String> = pending.iter().map(|&i| sinks[i].name().to_string()).collect();
                warn!(generation, failed = ?failed, "giving up on sink writes");
                return Distribution::Incomplete(failed);
            }
            if !incoming.is_empty() {
                info!(generation, "newer credential queued, abandoning sink retries");
                return Distribution::Superseded;
            }

            let delay = self.config.retry.backoff.delay_for(attempt);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Distribution::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
            if gate.is_in_progress() {
                debug!(generation, "authentication in progress, holding sink retry");
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Distribution::Cancelled,
                _ = gate.wait_clear() => {}
            }
            if !incoming.is_empty() {
                info!(generation, "newer credential queued, abandoning sink retries");
                return Distribution::Superseded;
            }
        }
    }
}
