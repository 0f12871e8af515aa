//! Upstream poller
//!
//! Queries the Jolokia agent once per scrape interval and records the
//! result in the exporter metrics. Upstream errors are recorded and logged,
//! never escalated: an unreachable agent is an expected condition for an
//! exporter.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::jolokia::JolokiaClient;
use crate::server::{SharedMetrics, ShutdownSignal, Worker, WorkerResult};

/// Default time between upstream queries
pub const DEFAULT_SCRAPE_INTERVAL: Duration = Duration::from_secs(30);

/// Run one upstream query and record its outcome
pub async fn scrape_once(client: &dyn JolokiaClient, metrics: &SharedMetrics) -> bool {
    let started = Instant::now();
    let result = client.version().await;
    let elapsed = started.elapsed().as_secs_f64();

    match result {
        Ok(version) => {
            debug!(version = %version, elapsed_secs = elapsed, "Scraped Jolokia");
            metrics.record_scrape_success(elapsed);
            true
        }
        Err(e) => {
            warn!(error = %e, elapsed_secs = elapsed, "Failed to scrape Jolokia");
            metrics.record_scrape_error(elapsed);
            false
        }
    }
}

/// Poll the upstream every `interval` until shutdown fires
pub async fn run_scraper(
    client: Arc<dyn JolokiaClient>,
    metrics: SharedMetrics,
    interval: Duration,
    mut shutdown: ShutdownSignal,
) -> WorkerResult {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_secs = interval.as_secs_f64(), "Scraper started");

    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            _ = ticker.tick() => {
                // A slow upstream must not hold up shutdown
                tokio::select! {
                    _ = shutdown.wait() => break,
                    _ = scrape_once(client.as_ref(), &metrics) => {}
                }
            }
        }
    }

    info!("Scraper stopped");
    Ok(())
}

/// Worker wrapping `run_scraper`
pub fn scraper_worker(
    client: Arc<dyn JolokiaClient>,
    metrics: SharedMetrics,
    interval: Duration,
) -> Worker {
    Worker::new("scraper", move |ctx| {
        run_scraper(client, metrics, interval, ctx.shutdown_signal())
    })
}
