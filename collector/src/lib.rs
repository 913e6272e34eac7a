pub mod batch;
pub mod cache;
pub mod extraction;
pub mod identity;
pub mod models;
pub mod scheduler;
pub mod source;
pub mod utils;

use common::config::Settings;
use common::{Error, Result};
use identity::IdentityContext;
use models::CollectionResult;
use source::{DataSource, ReplayDataSource, ReplayOptions};
use tracing::{info, warn};

/// Outcome of a driven collection run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    pub cycles: u64,
    pub records: usize,
    pub failed_results: usize,
}

/// Drives a data source until it runs out of batches or `max_iterations`
/// cycles have run. `on_cycle` sees every cycle's results.
pub fn drive<S, F>(source: &mut S, max_iterations: Option<u64>, mut on_cycle: F) -> RunSummary
where
    S: DataSource + ?Sized,
    F: FnMut(u64, &[CollectionResult]),
{
    let mut summary = RunSummary::default();

    while source.has_more_batches() {
        if max_iterations.is_some_and(|max| summary.cycles >= max) {
            info!(cycles = summary.cycles, "Iteration limit reached");
            break;
        }

        let iteration = source.begin_cycle();
        let results = source.collect_all();

        for result in &results {
            summary.records += result.record_count();
            if result.success {
                info!(
                    iteration,
                    category = %result.category,
                    records = result.record_count(),
                    "Collected"
                );
            } else {
                summary.failed_results += 1;
                warn!(
                    iteration,
                    category = %result.category,
                    error = result.error_message.as_deref().unwrap_or("unknown error"),
                    "Collection incomplete"
                );
            }
        }

        on_cycle(iteration, &results);
        summary.cycles += 1;

        if !source.advance_batch() {
            break;
        }
    }

    info!(
        cycles = summary.cycles,
        records = summary.records,
        failed = summary.failed_results,
        "Replay finished"
    );
    summary
}

/// Builds a replay source from settings, initializes it, and drives it to
/// completion.
pub fn run_replay_pipeline<F>(settings: &Settings, on_cycle: F) -> Result<RunSummary>
where
    F: FnMut(u64, &[CollectionResult]),
{
    let directory = settings.replay.directory.clone().ok_or_else(|| {
        Error::Configuration(
            "No replay directory configured. Pass --directory or set COLLECTOR_REPLAY__DIRECTORY."
                .to_string(),
        )
    })?;

    let options = ReplayOptions {
        directory,
        system_id: settings.replay.system_id.clone(),
        base_interval_secs: settings.collector.base_interval_secs,
    };

    let mut source = ReplayDataSource::new(options, IdentityContext::new())?;
    source.initialize()?;

    Ok(drive(&mut source, settings.collector.max_iterations, on_cycle))
}
