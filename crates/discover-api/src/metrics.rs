//! Metrics collection for the API service.
//!
//! Metrics live in a registry owned by [`ServiceMetrics`], not the
//! process-global default registry.

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Service metrics for observability
#[derive(Debug)]
pub struct ServiceMetrics {
    registry: Registry,

    pub queries_total: IntCounter,
    pub query_failures_total: IntCounterVec,
    pub query_duration_seconds: Histogram,
    pub query_rows_returned: Histogram,
    pub events_stored: IntGauge,
}

impl ServiceMetrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let queries_total = IntCounter::new(
            "discover_queries_total",
            "Total discover queries received",
        )?;
        let query_failures_total = IntCounterVec::new(
            Opts::new(
                "discover_query_failures_total",
                "Failed discover queries by reason",
            ),
            &["reason"],
        )?;
        let query_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "discover_query_duration_seconds",
                "Discover query processing time",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        let query_rows_returned = Histogram::with_opts(
            HistogramOpts::new(
                "discover_query_rows_returned",
                "Rows returned per successful discover query",
            )
            .buckets(vec![0.0, 1.0, 10.0, 100.0, 1000.0]),
        )?;
        let events_stored = IntGauge::new("discover_events_stored", "Events held by the store")?;

        registry.register(Box::new(queries_total.clone()))?;
        registry.register(Box::new(query_failures_total.clone()))?;
        registry.register(Box::new(query_duration_seconds.clone()))?;
        registry.register(Box::new(query_rows_returned.clone()))?;
        registry.register(Box::new(events_stored.clone()))?;

        Ok(Arc::new(Self {
            registry,
            queries_total,
            query_failures_total,
            query_duration_seconds,
            query_rows_returned,
            events_stored,
        }))
    }

    pub fn record_query(&self, duration: std::time::Duration, rows: usize) {
        self.queries_total.inc();
        self.query_duration_seconds.observe(duration.as_secs_f64());
        self.query_rows_returned.observe(rows as f64);
    }

    pub fn record_failure(&self, duration: std::time::Duration, reason: &str) {
        self.queries_total.inc();
        self.query_duration_seconds.observe(duration.as_secs_f64());
        self.query_failures_total.with_label_values(&[reason]).inc();
    }

    pub fn set_events_stored(&self, count: usize) {
        self.events_stored.set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Render all metrics in the Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}
