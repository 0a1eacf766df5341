//! Prometheus metrics for the flash-sale pipeline.
//!
//! This module provides metric collection for:
//! - Admission decisions
//! - Cache reads per strategy and background rebuilds
//! - Order commits and their retries
//! - Lock contention
//!
//! # Example
//!
//! ```rust,no_run
//! use flashsale_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! if let Some(text) = server.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics endpoint.
///
/// Installs the global recorder, serves it over HTTP and renders the scrape
/// payload on demand.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server for `addr`.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Describe all metrics, install the Prometheus recorder and serve
    /// `GET /metrics` on the configured address.
    ///
    /// Must be called from within a Tokio runtime: the HTTP listener is bound
    /// here and its accept loop is spawned onto the current runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built (including a failure to
    /// bind the address) or installed. A recorder that is already installed
    /// (e.g. by another test) is not an error; the listener is then not served.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;
        let handle = recorder.handle();

        match metrics::set_global_recorder(recorder) {
            Ok(()) => {
                tokio::spawn(async move {
                    if exporter.await.is_err() {
                        tracing::error!("Metrics HTTP listener stopped");
                    }
                });
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Serving Prometheus metrics");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Address the scrape endpoint binds.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if this instance did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    // Admission
    describe_counter!(
        "seckill_admissions_total",
        "Admission decisions by outcome"
    );
    describe_counter!(
        "seckill_rollbacks_total",
        "Reservations undone after a failed hand-off"
    );
    describe_histogram!(
        "seckill_admission_duration_seconds",
        "Time taken to reach an admission decision"
    );

    // Cache
    describe_counter!(
        "cache_requests_total",
        "Cache reads by strategy and result"
    );
    describe_counter!(
        "cache_rebuilds_total",
        "Background logical-expiration rebuilds by result"
    );
    describe_gauge!(
        "cache_rebuilds_in_flight",
        "Rebuild tasks currently scheduled or running"
    );

    // Commit
    describe_counter!(
        "order_commits_total",
        "Order commit attempts by outcome"
    );
    describe_histogram!(
        "order_commit_duration_seconds",
        "Time taken to commit one order"
    );

    // Locks
    describe_counter!(
        "lock_acquisitions_total",
        "Lock acquisition attempts by result"
    );
}

/// Admission metrics recorder.
pub struct AdmissionMetrics;

impl AdmissionMetrics {
    /// Record a decision.
    pub fn record(outcome: &'static str, duration: Duration) {
        counter!("seckill_admissions_total", "outcome" => outcome).increment(1);
        histogram!("seckill_admission_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a compensated reservation.
    pub fn record_rollback() {
        counter!("seckill_rollbacks_total").increment(1);
    }
}

/// Cache metrics recorder.
pub struct CacheMetrics;

impl CacheMetrics {
    /// Record a read served by `strategy`.
    pub fn record_request(strategy: &'static str, result: &'static str) {
        counter!("cache_requests_total", "strategy" => strategy, "result" => result).increment(1);
    }

    /// Record a finished background rebuild.
    pub fn record_rebuild(result: &'static str) {
        counter!("cache_rebuilds_total", "result" => result).increment(1);
    }

    /// Record the number of rebuilds in flight.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_in_flight(n: usize) {
        gauge!("cache_rebuilds_in_flight").set(n as f64);
    }
}

/// Commit worker metrics recorder.
pub struct CommitMetrics;

impl CommitMetrics {
    /// Record a handled order.
    pub fn record(outcome: &'static str, duration: Duration) {
        counter!("order_commits_total", "outcome" => outcome).increment(1);
        histogram!("order_commit_duration_seconds").record(duration.as_secs_f64());
    }
}

/// Lock metrics recorder.
pub struct LockMetrics;

impl LockMetrics {
    /// Record an acquisition attempt (`acquired`, `contended` or `error`).
    pub fn record_attempt(result: &'static str) {
        counter!("lock_acquisitions_total", "result" => result).increment(1);
    }
}
