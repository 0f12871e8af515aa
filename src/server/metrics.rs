//! Prometheus metrics for the exporter itself
//!
//! - Build information
//! - Upstream reachability and scrape timings
//! - Health check results

use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;

use crate::BuildInfo;

/// Exporter metrics registry
///
/// Thread-safe container for all Prometheus metrics.
#[derive(Clone)]
pub struct ExporterMetrics {
    registry: Registry,
    /// Constant 1, labelled with version and commit
    pub build_info: IntGaugeVec,
    /// 1 if the last upstream query succeeded, 0 otherwise
    pub jolokia_up: IntGauge,
    /// Upstream queries by result (success, error)
    pub scrapes_total: IntCounterVec,
    /// Upstream query duration in seconds
    pub scrape_duration_seconds: HistogramVec,
    /// /healthz requests by result (healthy, unhealthy)
    pub health_checks_total: IntCounterVec,
}

impl ExporterMetrics {
    /// Create a new metrics registry with all exporter metrics
    pub fn new(build: &BuildInfo) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let build_info = IntGaugeVec::new(
            Opts::new("seastat_build_info", "Build information of the exporter"),
            &["version", "commit"],
        )?;
        registry.register(Box::new(build_info.clone()))?;
        build_info
            .with_label_values(&[build.version.as_str(), build.commit.as_str()])
            .set(1);

        let jolokia_up = IntGauge::new(
            "seastat_jolokia_up",
            "Whether the last query to the Jolokia agent succeeded",
        )?;
        registry.register(Box::new(jolokia_up.clone()))?;

        let scrapes_total = IntCounterVec::new(
            Opts::new("seastat_scrapes_total", "Total number of upstream queries"),
            &["result"], // success, error
        )?;
        registry.register(Box::new(scrapes_total.clone()))?;

        let scrape_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "seastat_scrape_duration_seconds",
                "Duration of upstream queries in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["result"],
        )?;
        registry.register(Box::new(scrape_duration_seconds.clone()))?;

        let health_checks_total = IntCounterVec::new(
            Opts::new("seastat_health_checks_total", "Total number of health checks"),
            &["result"], // healthy, unhealthy
        )?;
        registry.register(Box::new(health_checks_total.clone()))?;

        Ok(Self {
            registry,
            build_info,
            jolokia_up,
            scrapes_total,
            scrape_duration_seconds,
            health_checks_total,
        })
    }

    /// Record a successful upstream query
    pub fn record_scrape_success(&self, duration_secs: f64) {
        self.jolokia_up.set(1);
        self.scrapes_total.with_label_values(&["success"]).inc();
        self.scrape_duration_seconds
            .with_label_values(&["success"])
            .observe(duration_secs);
    }

    /// Record a failed upstream query
    pub fn record_scrape_error(&self, duration_secs: f64) {
        self.jolokia_up.set(0);
        self.scrapes_total.with_label_values(&["error"]).inc();
        self.scrape_duration_seconds
            .with_label_values(&["error"])
            .observe(duration_secs);
    }

    /// Record the result of a /healthz request
    pub fn record_health_check(&self, healthy: bool) {
        let result = if healthy { "healthy" } else { "unhealthy" };
        self.health_checks_total.with_label_values(&[result]).inc();
    }

    /// Encode all metrics to Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| {
            prometheus::Error::Msg(format!("Failed to encode metrics as UTF-8: {}", e))
        })
    }
}

/// Shared metrics handle for use across workers and handlers
pub type SharedMetrics = Arc<ExporterMetrics>;

/// Create a new shared metrics instance
pub fn create_metrics(build: &BuildInfo) -> Result<SharedMetrics, prometheus::Error> {
    Ok(Arc::new(ExporterMetrics::new(build)?))
}
