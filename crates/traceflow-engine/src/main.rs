//! Batch runner binary for the Traceflow simulator.
//!
//! Loads the YAML configuration, picks a storage backend and runs every
//! configured country through the yearly pipeline.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `$TRACEFLOW_CONFIG` or `traceflow.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Validate every country before any sampling
//! 4. Install the Ctrl-C handler
//! 5. Connect the storage backend
//! 6. Run the batch and log each country's outcome

mod error;

use std::path::PathBuf;

use traceflow_core::analytics::trade_evolution;
use traceflow_core::batch::{BatchReport, BatchRunner, CountryOutcome};
use traceflow_core::config::{LoggingConfig, SimulationConfig, StorageBackend};
use traceflow_core::interrupt::Interrupt;
use traceflow_core::store::{MemoryStore, SupplyChainStore};
use traceflow_db::{PgStore, PostgresConfig, PostgresPool};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "traceflow.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, the database connection or any
/// country fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let (config, source) = load_config()?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!("traceflow-engine starting");
    info!(config_file = ?source, "Configuration loaded");

    // 3. Validate.
    config.validate().map_err(EngineError::from)?;
    let backend = config.infrastructure.backend;
    info!(
        seed = config.simulation.seed,
        num_years = config.simulation.num_years,
        countries = config.countries.len(),
        max_parallel_countries = config.simulation.max_parallel_countries,
        backend = ?backend,
        "Configuration validated"
    );

    // 4. Ctrl-C aborts at the next checkpoint; committed years stay.
    let interrupt = Interrupt::new();
    let handle = interrupt.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received shutdown signal, aborting");
            handle.abort();
        }
    });

    // 5 + 6. Connect the backend and run.
    let report = match backend {
        StorageBackend::Memory => run_batch(MemoryStore::new(), config, interrupt).await,
        StorageBackend::Postgres => {
            let pg_config = PostgresConfig::for_batch(
                &config.infrastructure,
                config.simulation.max_parallel_countries,
            );
            let pool = PostgresPool::connect(&pg_config)
                .await
                .map_err(EngineError::from)?;
            pool.run_migrations().await.map_err(EngineError::from)?;
            let report = run_batch(PgStore::from_pool(&pool), config, interrupt).await;
            pool.close().await;
            report
        }
    };

    log_report(&report);
    let failed = report.failed();
    if failed > 0 {
        return Err(EngineError::CountriesFailed {
            failed,
            total: report.countries.len(),
        }
        .into());
    }
    info!("traceflow-engine finished");
    Ok(())
}

/// Load configuration from `$TRACEFLOW_CONFIG`, then `traceflow.yaml`.
///
/// Returns the path that was read, or `None` when defaults are used.
fn load_config() -> Result<(SimulationConfig, Option<PathBuf>), EngineError> {
    let path = std::env::var_os("TRACEFLOW_CONFIG")
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    if path.exists() {
        let config = SimulationConfig::from_file(&path)?;
        Ok((config, Some(path)))
    } else {
        let mut config = SimulationConfig::default();
        config.infrastructure.apply_env_overrides();
        Ok((config, None))
    }
}

/// `RUST_LOG` wins over the configured level.
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

async fn run_batch<S: SupplyChainStore>(
    store: S,
    config: SimulationConfig,
    interrupt: Interrupt,
) -> BatchReport {
    BatchRunner::new(store, config)
        .with_interrupt(interrupt)
        .run()
        .await
}

fn log_report(report: &BatchReport) {
    for (country, outcome) in &report.countries {
        match outcome {
            CountryOutcome::Succeeded { years } => {
                let traded_kg: u64 = years.iter().map(|y| y.metrics.traded_kg).sum();
                let eu_kg: u64 = years.iter().map(|y| y.allocation.achieved_kg).sum();
                let shortfall_kg: u64 = years.iter().map(|y| y.allocation.shortfall_kg).sum();
                let unplaced: usize = years.iter().map(|y| y.unplaced_farmers).sum();
                let trend = trade_evolution(
                    years
                        .iter()
                        .map(|y| (y.year, &y.metrics, y.active_edges(), y.edges_ended)),
                );
                info!(
                    country = %country,
                    years = years.len(),
                    traded_kg,
                    eu_kg,
                    shortfall_kg,
                    unplaced,
                    privileged_ratio_change = trend.privileged_ratio_change,
                    traceable_share_change = trend.traceable_share_change,
                    mean_churn = trend.mean_churn,
                    "Country succeeded"
                );
            }
            CountryOutcome::Failed { reason } => {
                error!(country = %country, reason = %reason, "Country failed");
            }
        }
    }
    if let Ok(json) = serde_json::to_string(report) {
        debug!(report = %json, "Batch report");
    }
}
