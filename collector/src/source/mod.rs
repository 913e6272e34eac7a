pub mod replay;

pub use replay::{ReplayDataSource, ReplayOptions, read_json_file};

use crate::models::{CollectionCategory, CollectionResult};
use common::Result;

/// Contract shared by every source of telemetry, live or replayed.
///
/// Collection methods never fail past this boundary: problems with
/// individual files or payloads are reported through
/// [`CollectionResult::success`] and `error_message`. Only `initialize` may
/// return a fatal error.
pub trait DataSource {
    /// Validates configuration and establishes the system identity.
    fn initialize(&mut self) -> Result<()>;

    /// Starts a collection cycle and returns its iteration number. Called
    /// once per cycle before any `collect_*` method.
    fn begin_cycle(&mut self) -> u64;

    fn collect_performance_data(&mut self) -> CollectionResult;

    /// Returns only the configuration entity types due this cycle.
    fn collect_configuration_data(&mut self) -> CollectionResult;

    fn collect_event_data(&mut self) -> CollectionResult;

    fn collect_environmental_data(&mut self) -> CollectionResult;

    /// Moves to the next batch of data. Returns false when none remains.
    fn advance_batch(&mut self) -> bool;

    fn has_more_batches(&self) -> bool;

    fn collect(&mut self, category: CollectionCategory) -> CollectionResult {
        match category {
            CollectionCategory::Performance => self.collect_performance_data(),
            CollectionCategory::Configuration => self.collect_configuration_data(),
            CollectionCategory::Events => self.collect_event_data(),
            CollectionCategory::Environmental => self.collect_environmental_data(),
        }
    }

    /// One result per category, in a fixed order.
    fn collect_all(&mut self) -> Vec<CollectionResult> {
        CollectionCategory::ALL
            .into_iter()
            .map(|category| self.collect(category))
            .collect()
    }
}
