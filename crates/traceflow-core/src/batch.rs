//! Multi-country batch runs.
//!
//! Each country runs as its own tokio task inside an `info_span!("country")`.
//! A semaphore bounds how many run at once. A failing country is recorded in
//! the [`BatchReport`] and never stops the others.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{Instrument, error, info, info_span};
use traceflow_types::{CountryId, RunId};

use crate::config::SimulationConfig;
use crate::error::CoreError;
use crate::interrupt::Interrupt;
use crate::simulation::{CountrySimulation, YearSummary};
use crate::store::SupplyChainStore;

/// How one country's run ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CountryOutcome {
    /// Every year was committed.
    Succeeded {
        /// Per-year summaries in year order.
        years: Vec<YearSummary>,
    },
    /// The country stopped at an error.
    Failed {
        /// The error, rendered.
        reason: String,
    },
}

impl CountryOutcome {
    /// Whether the country completed.
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

/// Result of a batch run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    /// Identifier of this run.
    pub run_id: RunId,
    /// When the batch started.
    pub started_at: DateTime<Utc>,
    /// When the last country finished.
    pub finished_at: DateTime<Utc>,
    /// Outcome per country.
    pub countries: BTreeMap<CountryId, CountryOutcome>,
}

impl BatchReport {
    /// Countries that completed.
    pub fn succeeded(&self) -> usize {
        self.countries.values().filter(|o| o.is_success()).count()
    }

    /// Countries that failed.
    pub fn failed(&self) -> usize {
        self.countries.len() - self.succeeded()
    }
}

/// Runs every configured country against one store.
#[derive(Debug, Clone)]
pub struct BatchRunner<S> {
    store: S,
    config: SimulationConfig,
    interrupt: Interrupt,
}

impl<S: SupplyChainStore> BatchRunner<S> {
    /// A runner over an already validated configuration.
    pub fn new(store: S, config: SimulationConfig) -> Self {
        Self {
            store,
            config,
            interrupt: Interrupt::new(),
        }
    }

    /// Use a shared cancellation handle.
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Run all countries and collect their outcomes.
    pub async fn run(&self) -> BatchReport {
        let run_id = RunId::new();
        let started_at = Utc::now();
        let run = &self.config.simulation;
        let interrupt = if run.timeout_secs > 0 {
            self.interrupt
                .clone()
                .with_timeout(Duration::from_secs(run.timeout_secs))
        } else {
            self.interrupt.clone()
        };
        info!(
            run_id = %run_id,
            countries = self.config.countries.len(),
            years = run.num_years,
            parallel = run.max_parallel_countries,
            "Batch starting"
        );

        let permits = Arc::new(Semaphore::new(run.max_parallel_countries.max(1)));
        let mut tasks = JoinSet::new();
        let mut countries = BTreeMap::new();
        for country in &self.config.countries {
            let id = CountryId::new(country.id.as_str());
            countries.insert(
                id.clone(),
                CountryOutcome::Failed {
                    reason: "task did not complete".to_owned(),
                },
            );
            let simulation = CountrySimulation::new(
                self.store.clone(),
                country.to_country(),
                country.to_geographies(),
                self.config.assignment.clone(),
                run.seed,
            )
            .with_interrupt(interrupt.clone());
            let permits = Arc::clone(&permits);
            let num_years = run.num_years;
            let span = info_span!("country", country = %id);
            tasks.spawn(
                async move {
                    let result = match permits.acquire_owned().await {
                        Ok(_permit) => simulation.run(num_years).await,
                        Err(_) => Err(CoreError::Cancelled),
                    };
                    (id, result)
                }
                .instrument(span),
            );
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, Ok(years))) => {
                    info!(country = %id, years = years.len(), "Country completed");
                    countries.insert(id, CountryOutcome::Succeeded { years });
                }
                Ok((id, Err(e))) => {
                    error!(country = %id, error = %e, "Country failed");
                    countries.insert(
                        id,
                        CountryOutcome::Failed {
                            reason: e.to_string(),
                        },
                    );
                }
                Err(e) => error!(error = %e, "Country task aborted"),
            }
        }

        let report = BatchReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            countries,
        };
        info!(
            run_id = %report.run_id,
            succeeded = report.succeeded(),
            failed = report.failed(),
            elapsed_ms = (report.finished_at - report.started_at).num_milliseconds(),
            "Batch finished"
        );
        report
    }
}
