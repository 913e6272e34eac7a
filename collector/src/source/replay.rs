use super::DataSource;
use crate::batch::{Batch, BatchReader, BatchSummary};
use crate::cache::ConfigCache;
use crate::extraction::{
    decode_records, extract_configuration, extract_performance, extract_records, unwrap_envelope,
};
use crate::identity::{IdentityContext, Provenance};
use crate::models::{
    CollectionCategory, CollectionResult, Measurement, Record, TelemetryRecord, classify_file_name,
};
use crate::scheduler::CollectionScheduler;
use crate::utils::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use common::{Error, Result};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub directory: PathBuf,
    /// Required whenever the directory holds more than one system's files.
    pub system_id: Option<String>,
    pub base_interval_secs: u64,
}

/// Reads a JSON file into a value.
pub fn read_json_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

#[derive(Debug, Default)]
struct CategoryData {
    data: BTreeMap<String, Vec<Record>>,
    typed: BTreeMap<String, Vec<TelemetryRecord>>,
    errors: Vec<String>,
    files: usize,
    rejected_records: usize,
}

#[derive(Debug)]
struct LoadedBatch {
    index: usize,
    minute: i64,
    started_at: Option<DateTime<Utc>>,
    categories: BTreeMap<CollectionCategory, CategoryData>,
}

/// Replays previously dumped JSON files as if they were collected live.
///
/// Each batch is parsed once, on the first `collect_*` call that needs it,
/// and shared by the remaining collect calls of the cycle.
#[derive(Debug)]
pub struct ReplayDataSource {
    options: ReplayOptions,
    system_id: Option<String>,
    reader: Option<BatchReader>,
    scheduler: CollectionScheduler,
    config_cache: ConfigCache,
    identity: IdentityContext,
    loaded: Option<LoadedBatch>,
}

impl ReplayDataSource {
    pub fn new(options: ReplayOptions, identity: IdentityContext) -> Result<Self> {
        Self::with_clock(options, identity, Arc::new(SystemClock))
    }

    /// Fails immediately if the base interval is not supported.
    pub fn with_clock(
        options: ReplayOptions,
        identity: IdentityContext,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let scheduler = CollectionScheduler::new(options.base_interval_secs)?;
        let config_cache = ConfigCache::new(scheduler.base_interval(), clock);
        Ok(Self {
            options,
            system_id: None,
            reader: None,
            scheduler,
            config_cache,
            identity,
            loaded: None,
        })
    }

    /// The resolved, upper-cased system identifier once initialized.
    pub fn system_id(&self) -> Option<&str> {
        self.system_id.as_deref()
    }

    pub fn identity(&self) -> &IdentityContext {
        &self.identity
    }

    pub fn scheduler(&self) -> &CollectionScheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut CollectionScheduler {
        &mut self.scheduler
    }

    pub fn config_cache_mut(&mut self) -> &mut ConfigCache {
        &mut self.config_cache
    }

    pub fn batch_summary(&self) -> Option<BatchSummary> {
        self.reader.as_ref().map(BatchReader::summary)
    }

    fn resolve_system_id(&self, discovered: &[String]) -> Result<String> {
        match &self.options.system_id {
            Some(id) if !id.trim().is_empty() => {
                let id = id.trim().to_uppercase();
                if !discovered.is_empty() && !discovered.contains(&id) {
                    warn!(
                        system_id = %id,
                        discovered = ?discovered,
                        "Declared system id does not appear in any file name"
                    );
                }
                Ok(id)
            }
            _ => match discovered {
                [only] => {
                    info!(system_id = %only, "Single system found in replay directory");
                    Ok(only.clone())
                }
                [] => Err(Error::Configuration(format!(
                    "No system identifier supplied and none could be found in {}. \
                     Set SYSTEM_ID to the WWN of the system to replay.",
                    self.options.directory.display()
                ))),
                many => Err(Error::Configuration(format!(
                    "Replay directory {} contains files for {} systems ({}). \
                     Set SYSTEM_ID to the one to replay.",
                    self.options.directory.display(),
                    many.len(),
                    many.join(", ")
                ))),
            },
        }
    }

    /// Newest readable system config file for the replayed system.
    ///
    /// `Ok(None)` only when the archive holds no system config file at all;
    /// files that exist but cannot be read are an identity error.
    fn find_system_config(reader: &BatchReader, system_id: &str) -> Result<Option<Value>> {
        let candidates: Vec<_> = reader
            .batches()
            .iter()
            .rev()
            .flat_map(|batch| batch.files.iter().rev())
            .filter(|file| {
                classify_file_name(&file.file_name).is_some_and(|m| m.name == "system")
            })
            .collect();
        if candidates.is_empty() {
            return Ok(None);
        }

        let mut failures = Vec::new();
        for file in &candidates {
            match read_json_file(&file.path) {
                Ok(value) => {
                    debug!(file = %file.file_name, "Using system config for identity");
                    return Ok(Some(unwrap_envelope(value).0));
                }
                Err(e) => {
                    warn!(file = %file.file_name, error = %e, "Unreadable system config");
                    failures.push(format!("{}: {}", file.file_name, e));
                }
            }
        }
        Err(Error::Identity(format!(
            "{} system config file(s) for {} exist but none could be read ({})",
            candidates.len(),
            system_id,
            failures.join("; ")
        )))
    }

    fn load_batch(
        index: usize,
        batch: Batch,
        identity: &IdentityContext,
        system_id: &str,
    ) -> LoadedBatch {
        let mut categories: BTreeMap<CollectionCategory, CategoryData> = BTreeMap::new();

        for file in &batch.files {
            let Some(measurement) = classify_file_name(&file.file_name) else {
                debug!(file = %file.file_name, "Skipping unclassified file");
                continue;
            };
            let entry = categories.entry(measurement.category).or_default();
            entry.files += 1;

            match Self::parse_file(&file.path, measurement, identity, system_id) {
                Ok(Some(records)) => {
                    let (decoded, rejected) = decode_records(measurement.name, records);
                    for reason in &rejected {
                        warn!(file = %file.file_name, reason = %reason, "Rejected record");
                    }
                    entry.rejected_records += rejected.len();
                    if decoded.is_empty() && !rejected.is_empty() {
                        entry.errors.push(format!(
                            "{}: all {} record(s) rejected ({})",
                            file.file_name,
                            rejected.len(),
                            rejected.join("; ")
                        ));
                        continue;
                    }

                    let (records, typed): (Vec<Record>, Vec<TelemetryRecord>) =
                        decoded.into_iter().unzip();
                    entry
                        .data
                        .entry(measurement.name.to_string())
                        .or_default()
                        .extend(records);
                    entry
                        .typed
                        .entry(measurement.name.to_string())
                        .or_default()
                        .extend(typed);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(file = %file.file_name, error = %e, "Skipping file");
                    entry.errors.push(format!("{}: {}", file.file_name, e));
                }
            }
        }

        info!(
            batch = index,
            minute = batch.minute,
            files = batch.len(),
            "Loaded replay batch"
        );

        LoadedBatch {
            index,
            minute: batch.minute,
            started_at: batch.started_at(),
            categories,
        }
    }

    /// `Ok(None)` means the file belongs to another system and was skipped.
    fn parse_file(
        path: &Path,
        measurement: &Measurement,
        identity: &IdentityContext,
        system_id: &str,
    ) -> Result<Option<Vec<Record>>> {
        let (payload, envelope_system) = unwrap_envelope(read_json_file(path)?);
        if let Some(found) = envelope_system {
            if !found.eq_ignore_ascii_case(system_id) {
                debug!(
                    path = %path.display(),
                    found = %found,
                    "Envelope belongs to another system"
                );
                return Ok(None);
            }
        }

        let wwn = Some(system_id);
        let records = match measurement.category {
            CollectionCategory::Performance => {
                extract_performance(measurement, payload, identity, wwn)?
            }
            CollectionCategory::Configuration => extract_configuration(payload, identity, wwn)?,
            CollectionCategory::Events | CollectionCategory::Environmental => {
                extract_records(payload, identity, wwn)?
            }
        };
        Ok(Some(records))
    }

    /// Parses the batch under the cursor unless it is already loaded.
    fn ensure_loaded(&mut self) {
        let (Some(reader), Some(system_id)) = (self.reader.as_ref(), self.system_id.as_deref())
        else {
            return;
        };
        let index = reader.current_index();
        if self.loaded.as_ref().is_some_and(|loaded| loaded.index == index) {
            return;
        }
        self.loaded = reader
            .get_current_batch(Some(system_id))
            .map(|batch| Self::load_batch(index, batch, &self.identity, system_id));
    }

    fn metadata(&self, loaded: &LoadedBatch, data: &CategoryData) -> Map<String, Value> {
        let mut metadata = Map::new();
        metadata.insert("source".to_string(), json!(Provenance::JsonReplay.as_str()));
        metadata.insert("iteration".to_string(), json!(self.scheduler.iteration_count()));
        metadata.insert("batch_index".to_string(), json!(loaded.index));
        metadata.insert("batch_minute".to_string(), json!(loaded.minute));
        if let Some(started) = loaded.started_at {
            metadata.insert("batch_started_at".to_string(), json!(started.to_rfc3339()));
        }
        metadata.insert("files".to_string(), json!(data.files));
        metadata.insert("rejected_records".to_string(), json!(data.rejected_records));
        metadata
    }

    /// Result for categories without scheduling: everything in the batch.
    fn collect_category(&mut self, category: CollectionCategory) -> CollectionResult {
        if self.reader.is_none() {
            return CollectionResult::failure(category, "replay data source is not initialized");
        }
        self.ensure_loaded();

        let Some(loaded) = self.loaded.as_ref() else {
            return Self::exhausted(category);
        };
        let empty = CategoryData::default();
        let data = loaded.categories.get(&category).unwrap_or(&empty);
        let metadata = self.metadata(loaded, data);

        CollectionResult::from_parts(category, data.data.clone(), &data.errors)
            .with_metadata(metadata)
    }

    fn exhausted(category: CollectionCategory) -> CollectionResult {
        let mut metadata = Map::new();
        metadata.insert("exhausted".to_string(), json!(true));
        CollectionResult::success(category, BTreeMap::new()).with_metadata(metadata)
    }

    fn cache_typed_configs(
        &mut self,
        system_id: &str,
        typed: &BTreeMap<String, Vec<TelemetryRecord>>,
    ) {
        let provenance = Some(Provenance::JsonReplay.as_str());
        for record in typed.values().flatten() {
            match record {
                TelemetryRecord::VolumeConfig(volume) => {
                    self.config_cache
                        .store_volume(system_id, &volume.id, volume.clone(), provenance)
                }
                TelemetryRecord::DriveConfig(drive) => {
                    self.config_cache
                        .store_drive(system_id, &drive.id, drive.clone(), provenance)
                }
                TelemetryRecord::StoragePoolConfig(pool) => {
                    self.config_cache
                        .store_storage_pool(system_id, &pool.id, pool.clone(), provenance)
                }
                TelemetryRecord::SystemConfig(system) => {
                    self.config_cache.store_system(system.clone(), provenance)
                }
                _ => {}
            }
        }
    }
}

impl DataSource for ReplayDataSource {
    fn initialize(&mut self) -> Result<()> {
        let directory = self.options.directory.clone();
        if !directory.is_dir() {
            return Err(Error::Configuration(format!(
                "Replay directory does not exist: {}",
                directory.display()
            )));
        }

        let survey = BatchReader::new(&directory, None)?;
        let discovered = survey.discovered_system_ids();
        let system_id = self.resolve_system_id(&discovered)?;

        let reader = BatchReader::new(&directory, Some(&system_id))?;
        let system_config = Self::find_system_config(&reader, &system_id)?;
        let context = self
            .identity
            .register_system_from_json_replay(&system_id, system_config.as_ref())?;

        info!(
            system_id = %context.wwn,
            name = %context.name,
            batches = reader.batch_count(),
            files = reader.total_files(),
            "Replay data source initialized"
        );

        self.system_id = Some(system_id);
        self.reader = Some(reader);
        self.loaded = None;
        Ok(())
    }

    fn begin_cycle(&mut self) -> u64 {
        self.scheduler.increment_iteration()
    }

    fn collect_performance_data(&mut self) -> CollectionResult {
        self.collect_category(CollectionCategory::Performance)
    }

    fn collect_configuration_data(&mut self) -> CollectionResult {
        let category = CollectionCategory::Configuration;
        if self.reader.is_none() {
            return CollectionResult::failure(category, "replay data source is not initialized");
        }
        self.ensure_loaded();

        let (Some(loaded), Some(system_id)) = (self.loaded.take(), self.system_id.clone()) else {
            return Self::exhausted(category);
        };

        let due = self.scheduler.due_entities();
        let empty = CategoryData::default();
        let all = loaded.categories.get(&category).unwrap_or(&empty);

        let mut data = BTreeMap::new();
        let mut typed = BTreeMap::new();
        let mut skipped = Vec::new();
        for (entity, records) in &all.data {
            if due.iter().any(|name| *name == entity.as_str()) {
                data.insert(entity.clone(), records.clone());
                if let Some(records) = all.typed.get(entity) {
                    typed.insert(entity.clone(), records.clone());
                }
            } else {
                skipped.push(entity.clone());
            }
        }
        if !skipped.is_empty() {
            debug!(
                skipped = ?skipped,
                iteration = self.scheduler.iteration_count(),
                "Configuration not due"
            );
        }

        for entity in data.keys() {
            self.scheduler.mark_collected(entity);
        }
        self.cache_typed_configs(&system_id, &typed);

        let mut metadata = self.metadata(&loaded, all);
        metadata.insert("due_entities".to_string(), json!(due));
        metadata.insert("skipped_entities".to_string(), json!(skipped));
        let result =
            CollectionResult::from_parts(category, data, &all.errors).with_metadata(metadata);

        self.loaded = Some(loaded);
        result
    }

    fn collect_event_data(&mut self) -> CollectionResult {
        self.collect_category(CollectionCategory::Events)
    }

    fn collect_environmental_data(&mut self) -> CollectionResult {
        self.collect_category(CollectionCategory::Environmental)
    }

    fn advance_batch(&mut self) -> bool {
        match self.reader.as_mut() {
            Some(reader) => reader.advance_to_next_batch(),
            None => false,
        }
    }

    fn has_more_batches(&self) -> bool {
        self.reader
            .as_ref()
            .is_some_and(BatchReader::has_more_batches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, value: Value) {
        fs::write(dir.join(name), serde_json::to_string(&value).unwrap()).unwrap();
    }

    fn options(dir: &Path, system_id: Option<&str>) -> ReplayOptions {
        ReplayOptions {
            directory: dir.to_path_buf(),
            system_id: system_id.map(str::to_string),
            base_interval_secs: 60,
        }
    }

    fn replay(dir: &Path, system_id: Option<&str>) -> ReplayDataSource {
        ReplayDataSource::new(options(dir, system_id), IdentityContext::new()).unwrap()
    }

    fn write_system(dir: &Path, config: Value) {
        write(dir, "config_system_ABC_202401010000.json", config);
    }

    #[test]
    fn test_unsupported_interval_fails_at_construction() {
        let dir = TempDir::new().unwrap();
        let mut opts = options(dir.path(), Some("ABC"));
        opts.base_interval_secs = 90;
        let err = ReplayDataSource::new(opts, IdentityContext::new()).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_missing_directory_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut source = replay(&dir.path().join("gone"), Some("ABC"));
        assert!(matches!(source.initialize(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_multi_system_archive_requires_system_id() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "env_power_AAA111_202401010000.json", json!([]));
        write(dir.path(), "env_power_BBB222_202401010000.json", json!([]));

        let mut source = replay(dir.path(), None);
        let err = source.initialize().unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(message.contains("AAA111"));
        assert!(message.contains("BBB222"));
    }

    #[test]
    fn test_single_system_is_inferred() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "env_power_aaa111_202401010000.json", json!([{"psu": 1}]));

        let mut source = replay(dir.path(), None);
        source.initialize().unwrap();
        assert_eq!(source.system_id(), Some("AAA111"));
        assert_eq!(source.identity().primary_system().unwrap().name, "AAA111");
    }

    #[test]
    fn test_collect_before_initialize_reports_failure() {
        let dir = TempDir::new().unwrap();
        let mut source = replay(dir.path(), Some("ABC"));
        let result = source.collect_event_data();
        assert!(!result.success);
        assert!(!source.has_more_batches());
        assert!(!source.advance_batch());
    }

    #[test]
    fn test_bad_file_is_skipped_and_reported() {
        let dir = TempDir::new().unwrap();
        write_system(dir.path(), json!({"wwn": "ABC", "name": "Sys1"}));
        write(dir.path(), "env_power_ABC_202401010000.json", json!([{"psu": 1}]));
        fs::write(dir.path().join("env_temperature_ABC_202401010000.json"), "{not json").unwrap();

        let mut source = replay(dir.path(), Some("ABC"));
        source.initialize().unwrap();
        source.begin_cycle();

        let result = source.collect_environmental_data();
        assert!(!result.success);
        assert_eq!(result.data["power"].len(), 1);
        assert!(result.error_message.unwrap().contains("env_temperature_ABC"));
    }

    #[test]
    fn test_foreign_envelope_is_skipped() {
        let dir = TempDir::new().unwrap();
        write_system(dir.path(), json!({"wwn": "ABC", "name": "Sys1"}));
        write(
            dir.path(),
            "events_system_failures_ABC_202401010000.json",
            json!({"system_id": "OTHER", "data": [{"failureType": "x"}]}),
        );

        let mut source = replay(dir.path(), Some("ABC"));
        source.initialize().unwrap();
        source.begin_cycle();
        let result = source.collect_event_data();
        assert!(result.success);
        assert_eq!(result.record_count(), 0);
    }

    #[test]
    fn test_configuration_follows_schedule_and_fills_cache() {
        let dir = TempDir::new().unwrap();
        write_system(dir.path(), json!({"wwn": "ABC", "name": "Sys1"}));
        for minute in ["202401010000", "202401010001"] {
            write(
                dir.path(),
                &format!("config_volumes_ABC_{}.json", minute),
                json!([{"id": "v1", "name": "vol1", "volumeGroupRef": "p1"}]),
            );
            write(
                dir.path(),
                &format!("config_storage_pools_ABC_{}.json", minute),
                json!([{"id": "p1", "label": "pool1"}]),
            );
        }

        let mut source = replay(dir.path(), Some("ABC"));
        source.initialize().unwrap();

        assert_eq!(source.begin_cycle(), 1);
        let first = source.collect_configuration_data();
        assert!(first.success);
        assert!(first.data.contains_key("volumes"));
        assert!(first.data.contains_key("storage_pools"));
        assert!(first.data.contains_key("system"));
        assert_eq!(source.scheduler().last_collected("storage_pools"), 1);

        let cache = source.config_cache_mut();
        assert_eq!(cache.volumes_in_pool("ABC", "p1").len(), 1);
        assert_eq!(cache.get_storage_pool("ABC", "p1").unwrap().label, "pool1");
        assert_eq!(cache.get_system("ABC").unwrap().name, "Sys1");

        assert!(source.advance_batch());
        assert_eq!(source.begin_cycle(), 2);
        let second = source.collect_configuration_data();
        assert!(second.data.contains_key("volumes"));
        assert!(!second.data.contains_key("storage_pools"));
        assert_eq!(second.metadata.unwrap()["skipped_entities"], json!(["storage_pools"]));
    }

    #[test]
    fn test_system_config_with_alternate_name_is_kept() {
        let dir = TempDir::new().unwrap();
        write_system(dir.path(), json!({"wwn": "ABC", "storageSystemName": "Sys1"}));

        let mut source = replay(dir.path(), Some("ABC"));
        source.initialize().unwrap();
        assert_eq!(source.identity().primary_system().unwrap().name, "Sys1");

        source.begin_cycle();
        let result = source.collect_configuration_data();
        assert!(result.success);
        assert_eq!(result.data["system"].len(), 1);
        assert_eq!(result.metadata.unwrap()["rejected_records"], json!(0));
        assert_eq!(source.config_cache_mut().get_system("ABC").unwrap().name, "Sys1");
    }

    #[test]
    fn test_fully_rejected_file_marks_result_failed() {
        let dir = TempDir::new().unwrap();
        write_system(dir.path(), json!({"wwn": "ABC", "name": "Sys1"}));
        write(
            dir.path(),
            "config_volumes_ABC_202401010000.json",
            json!([{"name": "no id"}, {"name": "also no id"}]),
        );

        let mut source = replay(dir.path(), Some("ABC"));
        source.initialize().unwrap();
        source.begin_cycle();

        let result = source.collect_configuration_data();
        assert!(!result.success);
        assert!(!result.data.contains_key("volumes"));
        assert!(result.data.contains_key("system"));
        let message = result.error_message.unwrap();
        assert!(message.contains("config_volumes_ABC"));
        assert!(message.contains("all 2 record(s) rejected"));
    }

    #[test]
    fn test_unreadable_system_config_is_identity_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("config_system_ABC_202401010000.json"), "{truncated").unwrap();
        write(dir.path(), "env_power_ABC_202401010000.json", json!([{"psu": 1}]));

        let mut source = replay(dir.path(), Some("ABC"));
        let err = source.initialize().unwrap_err();
        assert!(matches!(err, Error::Identity(_)));
        assert!(err.to_string().contains("config_system_ABC_202401010000.json"));
        assert!(!source.identity().is_registered());
    }

    #[test]
    fn test_newest_readable_system_config_wins() {
        let dir = TempDir::new().unwrap();
        write_system(dir.path(), json!({"wwn": "ABC", "name": "Older"}));
        fs::write(dir.path().join("config_system_ABC_202401010005.json"), "{truncated").unwrap();

        let mut source = replay(dir.path(), Some("ABC"));
        source.initialize().unwrap();
        assert_eq!(source.identity().primary_system().unwrap().name, "Older");
    }

    #[test]
    fn test_other_systems_config_is_identity_error() {
        let dir = TempDir::new().unwrap();
        write_system(dir.path(), json!([{"wwn": "OTHER", "name": "Elsewhere"}]));

        let mut source = replay(dir.path(), Some("ABC"));
        assert!(matches!(source.initialize(), Err(Error::Identity(_))));
    }
}
