//! Agent metrics.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Thread-safe atomic counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Thread-safe atomic gauge.
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicI64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Counters shared by the auth handler, sink server and template server.
#[derive(Debug, Default)]
pub struct AgentMetrics {
    pub auth_attempts: Counter,
    pub auth_failures: Counter,
    pub auth_successes: Counter,
    pub renewals: Counter,
    pub invalid_signals_received: Counter,
    pub invalid_signals_honored: Counter,
    pub sink_writes: Counter,
    pub sink_write_failures: Counter,
    pub renders: Counter,
    pub render_failures: Counter,
    pub authorization_denials: Counter,
    pub current_generation: Gauge,
}

impl AgentMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary::from_metrics(self)
    }
}

/// Point-in-time snapshot of [`AgentMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSummary {
    pub auth_attempts: u64,
    pub auth_failures: u64,
    pub auth_successes: u64,
    pub renewals: u64,
    pub invalid_signals_received: u64,
    pub invalid_signals_honored: u64,
    pub sink_writes: u64,
    pub sink_write_failures: u64,
    pub renders: u64,
    pub render_failures: u64,
    pub authorization_denials: u64,
    pub current_generation: u64,
}

impl MetricsSummary {
    pub fn from_metrics(metrics: &AgentMetrics) -> Self {
        Self {
            auth_attempts: metrics.auth_attempts.get(),
            auth_failures: metrics.auth_failures.get(),
            auth_successes: metrics.auth_successes.get(),
            renewals: metrics.renewals.get(),
            invalid_signals_received: metrics.invalid_signals_received.get(),
            invalid_signals_honored: metrics.invalid_signals_honored.get(),
            sink_writes: metrics.sink_writes.get(),
            sink_write_failures: metrics.sink_write_failures.get(),
            renders: metrics.renders.get(),
            render_failures: metrics.render_failures.get(),
            authorization_denials: metrics.authorization_denials.get(),
            current_generation: metrics.current_generation.get().max(0) as u64,
        }
    }
}
