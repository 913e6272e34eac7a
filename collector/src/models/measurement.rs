use serde::{Deserialize, Serialize};
use std::fmt;
use CollectionCategory::{Configuration, Environmental, Events, Performance};
use PayloadShape::{BareArray, StatisticsArray, WrappedObject};

/// Top-level grouping of collected data. One `CollectionResult` is produced
/// per category and cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionCategory {
    Performance,
    Configuration,
    Events,
    Environmental,
}

impl CollectionCategory {
    pub const ALL: [CollectionCategory; 4] = [
        CollectionCategory::Performance,
        CollectionCategory::Configuration,
        CollectionCategory::Events,
        CollectionCategory::Environmental,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionCategory::Performance => "performance",
            CollectionCategory::Configuration => "configuration",
            CollectionCategory::Events => "events",
            CollectionCategory::Environmental => "environmental",
        }
    }
}

impl fmt::Display for CollectionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire shape of a payload. Some shapes cannot be told apart by looking at
/// the payload alone, so the shape is a property of the measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    /// `{"statistics": {...}}` or a bare object: one aggregate record.
    WrappedObject,
    /// `{"statistics": [...]}`.
    StatisticsArray,
    /// `[...]`, occasionally a single object.
    BareArray,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measurement {
    /// Logical name, also the key in `CollectionResult::data`.
    pub name: &'static str,
    /// Filename prefix used by dumped replay files.
    pub prefix: &'static str,
    pub category: CollectionCategory,
    pub shape: PayloadShape,
}

const fn measurement(
    name: &'static str,
    prefix: &'static str,
    category: CollectionCategory,
    shape: PayloadShape,
) -> Measurement {
    Measurement {
        name,
        prefix,
        category,
        shape,
    }
}

pub const MEASUREMENTS: &[Measurement] = &[
    measurement("volume_statistics", "performance_volume_statistics", Performance, BareArray),
    measurement("drive_statistics", "performance_drive_statistics", Performance, BareArray),
    measurement("interface_statistics", "performance_interface_statistics", Performance, BareArray),
    measurement(
        "controller_statistics",
        "performance_controller_statistics",
        Performance,
        StatisticsArray,
    ),
    measurement("system_statistics", "performance_system_statistics", Performance, WrappedObject),
    measurement("system", "config_system", Configuration, BareArray),
    measurement("volumes", "config_volumes", Configuration, BareArray),
    measurement("drives", "config_drives", Configuration, BareArray),
    measurement("storage_pools", "config_storage_pools", Configuration, BareArray),
    measurement("controllers", "config_controllers", Configuration, BareArray),
    measurement("hosts", "config_hosts", Configuration, BareArray),
    measurement("host_groups", "config_host_groups", Configuration, BareArray),
    measurement("volume_mappings", "config_volume_mappings", Configuration, BareArray),
    measurement("interfaces", "config_interfaces", Configuration, BareArray),
    measurement("ethernet_interfaces", "config_ethernet_interfaces", Configuration, BareArray),
    measurement("snapshot_groups", "config_snapshot_groups", Configuration, BareArray),
    measurement("trays", "config_trays", Configuration, BareArray),
    measurement("hardware_inventory", "config_hardware_inventory", Configuration, BareArray),
    measurement("system_failures", "events_system_failures", Events, BareArray),
    measurement("lockdown_status", "events_lockdown_status", Events, BareArray),
    measurement("parity_scan_jobs", "events_parity_scan_jobs", Events, BareArray),
    measurement("volume_copy_jobs", "events_volume_copy_jobs", Events, BareArray),
    measurement("volume_expansion_jobs", "events_volume_expansion_jobs", Events, BareArray),
    measurement("power", "env_power", Environmental, BareArray),
    measurement("temperature", "env_temperature", Environmental, BareArray),
];

pub fn find_measurement(name: &str) -> Option<&'static Measurement> {
    MEASUREMENTS.iter().find(|m| m.name == name)
}

/// Classifies a replay filename by substring match on `<prefix>_`. When
/// several prefixes match, the longest one wins.
pub fn classify_file_name(file_name: &str) -> Option<&'static Measurement> {
    MEASUREMENTS
        .iter()
        .filter(|m| {
            file_name
                .find(m.prefix)
                .is_some_and(|idx| file_name[idx + m.prefix.len()..].starts_with('_'))
        })
        .max_by_key(|m| m.prefix.len())
}

/// Returns the `<system-id>` token of `<prefix>_<system-id>[_<object-id>]_<ts>.json`,
/// or `None` when the name carries only a timestamp after the prefix.
pub fn system_id_from_file_name(file_name: &str) -> Option<String> {
    let measurement = classify_file_name(file_name)?;
    let start = file_name.find(measurement.prefix)? + measurement.prefix.len() + 1;
    let rest = file_name[start..].strip_suffix(".json")?;
    let token = rest.split('_').next()?;
    let is_timestamp = token.chars().all(|c| c.is_ascii_digit()) && matches!(token.len(), 10 | 12);
    if token.is_empty() || is_timestamp {
        None
    } else {
        Some(token.to_string())
    }
}
