use anyhow::Context as _;
use seastat::config::Config;
use seastat::jolokia::{HttpJolokiaClient, JolokiaClient};
use seastat::scraper::scraper_worker;
use seastat::server::{
    build_router, create_metrics, http_worker, ServerState, ShutdownOutcome, Supervisor,
    TerminationReason, TerminationSignals,
};
use seastat::BuildInfo;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

/// Exit status when shutdown was caused by a worker failure
const FAILURE_EXIT_CODE: u8 = 1;

/// Map the termination reason and shutdown outcome to a process exit status
///
/// A forced shutdown always wins; otherwise a worker failure is reported
/// as a non-zero status even though shutdown itself was clean.
fn exit_status(reason: &TerminationReason, outcome: ShutdownOutcome) -> i32 {
    match (outcome, reason) {
        (ShutdownOutcome::Forced, _) => outcome.exit_code(),
        (ShutdownOutcome::Clean, TerminationReason::InternalFailure(_)) => {
            i32::from(FAILURE_EXIT_CODE)
        }
        (ShutdownOutcome::Clean, _) => outcome.exit_code(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let build = BuildInfo::from_build_env();
    info!(version = %build.version, commit = %build.commit, "Starting Seastat exporter");

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        jolokia = %config.jolokia_url,
        port = config.port,
        interval_secs = config.scrape_interval.as_secs(),
        "Configuration loaded"
    );

    let metrics = create_metrics(&build).context("Failed to create metrics registry")?;
    info!("Prometheus metrics registry initialized");

    let client: Arc<dyn JolokiaClient> = Arc::new(
        HttpJolokiaClient::new(config.jolokia_url.clone(), config.jolokia_timeout)
            .context("Failed to create Jolokia client")?,
    );

    // Register before starting workers so a failure here is a startup error
    let mut signals =
        TerminationSignals::register().context("Failed to register signal handlers")?;

    let app = build_router(ServerState::new(build, client.clone(), metrics.clone()));

    let mut supervisor = Supervisor::new();
    supervisor.start([
        http_worker(config.port, app, config.drain_timeout),
        scraper_worker(client, metrics, config.scrape_interval),
    ])?;

    let reason = supervisor.await_termination(signals.recv()).await?;
    let outcome = supervisor.shutdown(config.shutdown_grace).await?;

    let status = exit_status(&reason, outcome);
    if outcome == ShutdownOutcome::Forced {
        error!(exit_code = status, "Forced exit after grace period");
        // Stuck workers would keep the runtime alive on a normal return
        std::process::exit(status);
    }

    if status != 0 {
        error!(exit_code = status, "Exporter stopped after a worker failure");
    } else {
        info!("Seastat exporter shut down gracefully");
    }
    Ok(ExitCode::from(u8::try_from(status).unwrap_or(FAILURE_EXIT_CODE)))
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
