//! Chronological batching of previously dumped JSON files.
//!
//! Files are bucketed by the minute embedded in their name and served one
//! batch at a time, oldest first. The cursor only moves forward; `reset` is
//! the single way back to the start.

use crate::models::{MEASUREMENTS, system_id_from_file_name};
use crate::utils::{TimestampSource, minute_bucket, parse_file_timestamp};
use chrono::{DateTime, Utc};
use common::{Error, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayFile {
    pub path: PathBuf,
    pub file_name: String,
    /// Unix minutes.
    pub minute: i64,
    pub timestamp_source: TimestampSource,
}

impl ReplayFile {
    pub fn matches_system(&self, system_id: &str) -> bool {
        self.file_name
            .to_lowercase()
            .contains(&system_id.to_lowercase())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub minute: i64,
    /// Sorted by file name.
    pub files: Vec<ReplayFile>,
}

impl Batch {
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.minute * 60, 0)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn filtered(&self, system_id: Option<&str>) -> Batch {
        match system_id {
            None => self.clone(),
            Some(id) => Batch {
                minute: self.minute,
                files: self
                    .files
                    .iter()
                    .filter(|f| f.matches_system(id))
                    .cloned()
                    .collect(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub directory: PathBuf,
    pub total_files: usize,
    pub batch_count: usize,
    pub current_index: usize,
    pub first_minute: Option<i64>,
    pub last_minute: Option<i64>,
}

#[derive(Debug)]
pub struct BatchReader {
    directory: PathBuf,
    system_filter: Option<String>,
    batches: Vec<Batch>,
    current: usize,
    discovered_systems: BTreeSet<String>,
}

fn discover_files(directory: &Path) -> Result<BTreeSet<PathBuf>> {
    let base = directory
        .to_str()
        .ok_or_else(|| {
            Error::Configuration(format!(
                "Replay directory is not valid UTF-8: {:?}",
                directory
            ))
        })?;
    let base = glob::Pattern::escape(base);

    let mut files = BTreeSet::new();
    for measurement in MEASUREMENTS {
        let pattern = format!("{}/{}_*.json", base, measurement.prefix);
        let paths = glob::glob(&pattern)
            .map_err(|e| {
                Error::Configuration(format!("Invalid replay pattern {}: {}", pattern, e))
            })?;
        for entry in paths {
            match entry {
                Ok(path) if path.is_file() => {
                    files.insert(path);
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Skipping unreadable replay entry"),
            }
        }
    }
    Ok(files)
}

fn resolve_minute(path: &Path, file_name: &str) -> (i64, TimestampSource) {
    if let Ok((ts, source)) = parse_file_timestamp(file_name) {
        return (minute_bucket(ts), source);
    }

    let modified = std::fs::metadata(path).and_then(|meta| meta.modified());
    match modified {
        Ok(mtime) => {
            debug!(file = file_name, "No timestamp in file name, using modification time");
            (minute_bucket(DateTime::<Utc>::from(mtime)), TimestampSource::ModifiedTime)
        }
        Err(e) => {
            warn!(file = file_name, error = %e, "No usable timestamp, ordering file first");
            (0, TimestampSource::ModifiedTime)
        }
    }
}

/// Groups `(minute, file)` pairs sorted by `(minute, file_name)` into batches.
fn group_into_batches(mut files: Vec<ReplayFile>) -> Vec<Batch> {
    files.sort_by(|a, b| {
        a.minute
            .cmp(&b.minute)
            .then_with(|| a.file_name.cmp(&b.file_name))
    });

    let mut batches: Vec<Batch> = Vec::new();
    for file in files {
        match batches.last_mut() {
            Some(batch) if batch.minute == file.minute => batch.files.push(file),
            _ => batches.push(Batch {
                minute: file.minute,
                files: vec![file],
            }),
        }
    }
    batches
}

impl BatchReader {
    /// Scans `directory` for replay files, optionally keeping only those
    /// whose name contains `system_filter` (case-insensitive).
    ///
    /// A directory with no matching files yields zero batches.
    pub fn new(directory: impl AsRef<Path>, system_filter: Option<&str>) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        if !directory.is_dir() {
            return Err(Error::Configuration(format!(
                "Replay directory does not exist or is not a directory: {}",
                directory.display()
            )));
        }

        let paths = discover_files(&directory)?;
        let mut discovered_systems = BTreeSet::new();
        let mut files = Vec::new();

        for path in paths {
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string)
            else {
                continue;
            };
            if let Some(system_id) = system_id_from_file_name(&file_name) {
                discovered_systems.insert(system_id.to_uppercase());
            }

            let (minute, timestamp_source) = resolve_minute(&path, &file_name);
            let file = ReplayFile {
                path,
                file_name,
                minute,
                timestamp_source,
            };
            if system_filter.is_none_or(|id| file.matches_system(id)) {
                files.push(file);
            }
        }

        let batches = group_into_batches(files);
        let reader = Self {
            directory,
            system_filter: system_filter.map(str::to_string),
            batches,
            current: 0,
            discovered_systems,
        };

        info!(
            directory = %reader.directory.display(),
            system_filter = ?reader.system_filter,
            files = reader.total_files(),
            batches = reader.batch_count(),
            "Replay batches prepared"
        );
        Ok(reader)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn total_files(&self) -> usize {
        self.batches.iter().map(Batch::len).sum()
    }

    /// Upper-cased system identifiers seen in file names, before filtering.
    pub fn discovered_system_ids(&self) -> Vec<String> {
        self.discovered_systems.iter().cloned().collect()
    }

    /// The batch under the cursor, optionally re-filtered. Does not advance.
    pub fn get_current_batch(&self, system_id: Option<&str>) -> Option<Batch> {
        self.batches
            .get(self.current)
            .map(|batch| batch.filtered(system_id))
    }

    /// The batch under the cursor; the cursor then moves past it.
    pub fn get_next_batch(&mut self, system_id: Option<&str>) -> Option<Batch> {
        let batch = self.get_current_batch(system_id)?;
        self.current += 1;
        Some(batch)
    }

    /// Moves the cursor forward. Returns false once no batch remains.
    pub fn advance_to_next_batch(&mut self) -> bool {
        if self.current < self.batches.len() {
            self.current += 1;
        }
        if !self.has_more_batches() {
            info!(batches = self.batches.len(), "No more batches");
            return false;
        }
        true
    }

    pub fn has_more_batches(&self) -> bool {
        self.current < self.batches.len()
    }

    /// Rewinds to the first batch to restart replay from the beginning.
    pub fn reset(&mut self) {
        self.current = 0;
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            directory: self.directory.clone(),
            total_files: self.total_files(),
            batch_count: self.batch_count(),
            current_index: self.current,
            first_minute: self.batches.first().map(|b| b.minute),
            last_minute: self.batches.last().map(|b| b.minute),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), "[]").unwrap();
    }

    // minute m → 10-digit unix seconds inside that minute
    fn stamp(minute: i64) -> String {
        format!("{}", 1_700_000_040 + minute * 60)
    }

    #[test]
    fn test_groups_by_minute_in_order() {
        let dir = TempDir::new().unwrap();
        let files = [
            ("performance_volume_statistics_SYS1", 5),
            ("performance_drive_statistics_SYS1", 5),
            ("env_power_SYS1", 3),
            ("config_volumes_SYS1", 3),
            ("events_system_failures_SYS1", 3),
            ("env_temperature_SYS1", 4),
        ];
        for (prefix, minute) in files {
            touch(dir.path(), &format!("{}_{}.json", prefix, stamp(minute)));
        }

        let reader = BatchReader::new(dir.path(), None).unwrap();
        assert_eq!(reader.batch_count(), 3);

        let minutes: Vec<i64> = reader.batches().iter().map(|b| b.minute).collect();
        let base = (1_700_000_040 / 60) as i64;
        assert_eq!(minutes, vec![base + 3, base + 4, base + 5]);

        let first = &reader.batches()[0];
        assert_eq!(first.len(), 3);
        let names: Vec<&str> = first.files.iter().map(|f| f.file_name.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_empty_directory_has_no_batches() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "notes.json");
        let mut reader = BatchReader::new(dir.path(), None).unwrap();
        assert_eq!(reader.batch_count(), 0);
        assert!(!reader.has_more_batches());
        assert!(reader.get_current_batch(None).is_none());
        assert!(reader.get_next_batch(None).is_none());
        assert!(!reader.advance_to_next_batch());
    }

    #[test]
    fn test_missing_directory_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        let err = BatchReader::new(dir.path().join("missing"), None).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_system_filter_is_case_insensitive_substring() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "config_drives_600a0b80aaaa_202401010000.json");
        touch(dir.path(), "config_drives_600A0B80BBBB_202401010000.json");
        touch(dir.path(), "config_volumes_600A0B80AAAA_202401010001.json");

        let reader = BatchReader::new(dir.path(), Some("600A0B80AAAA")).unwrap();
        assert_eq!(reader.total_files(), 2);
        assert_eq!(reader.batch_count(), 2);
        assert_eq!(
            reader.discovered_system_ids(),
            vec!["600A0B80AAAA".to_string(), "600A0B80BBBB".to_string()]
        );
    }

    #[test]
    fn test_current_batch_refilter() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "config_drives_SYSA_202401010000.json");
        touch(dir.path(), "config_drives_SYSB_202401010000.json");

        let reader = BatchReader::new(dir.path(), None).unwrap();
        assert_eq!(reader.get_current_batch(None).unwrap().len(), 2);
        assert_eq!(reader.get_current_batch(Some("sysb")).unwrap().len(), 1);
        assert_eq!(reader.current_index(), 0);
    }

    #[test]
    fn test_cursor_moves_forward_until_reset() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "env_power_SYS1_202401010000.json");
        touch(dir.path(), "env_power_SYS1_202401010001.json");
        touch(dir.path(), "env_power_SYS1_202401010002.json");

        let mut reader = BatchReader::new(dir.path(), None).unwrap();
        let first = reader.get_next_batch(None).unwrap();
        let second = reader.get_current_batch(None).unwrap();
        assert!(second.minute > first.minute);

        assert!(reader.advance_to_next_batch());
        assert!(reader.has_more_batches());
        assert!(!reader.advance_to_next_batch());
        assert!(!reader.has_more_batches());
        assert!(!reader.advance_to_next_batch());
        assert_eq!(reader.current_index(), 3);

        reader.reset();
        assert_eq!(reader.get_current_batch(None).unwrap(), first);
    }

    #[test]
    fn test_mtime_fallback() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "env_power_SYS1.json");
        let reader = BatchReader::new(dir.path(), None).unwrap();
        let batch = reader.get_current_batch(None).unwrap();
        assert_eq!(batch.files[0].timestamp_source, TimestampSource::ModifiedTime);
        assert!(batch.minute > 0);
    }
}
