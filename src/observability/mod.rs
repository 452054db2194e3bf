//! Observability: structured logging setup and agent metrics.

mod logging;
mod metrics;

pub use logging::{TracingConfig, TracingLevel, init_tracing};
pub use metrics::{AgentMetrics, Counter, Gauge, MetricsSummary};
