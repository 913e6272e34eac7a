use common::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One flat telemetry record as it travels through extraction and tagging.
pub type Record = Map<String, Value>;

/// Keys a system config may carry its WWN under, in order of preference.
pub const SYSTEM_WWN_KEYS: &[&str] = &["wwn", "storageSystemWWN"];

/// Keys a system config may carry its display name under, in order of
/// preference.
pub const SYSTEM_NAME_KEYS: &[&str] = &["name", "storageSystemName", "label"];

/// First of `keys` holding a non-empty string other than "unknown".
pub fn text_field<'a>(record: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| record.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|value| !value.is_empty() && !value.eq_ignore_ascii_case("unknown"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeStatistics {
    pub volume_id: String,
    #[serde(flatten)]
    pub fields: Record,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveStatistics {
    pub disk_id: String,
    #[serde(flatten)]
    pub fields: Record,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerStatistics {
    pub controller_id: String,
    #[serde(flatten)]
    pub fields: Record,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceStatistics {
    pub interface_id: String,
    #[serde(flatten)]
    pub fields: Record,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatistics {
    #[serde(flatten)]
    pub fields: Record,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeConfig {
    pub id: String,
    pub name: String,
    /// Storage pool the volume is carved from.
    pub volume_group_ref: String,
    #[serde(flatten)]
    pub fields: Record,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveConfig {
    pub id: String,
    /// Storage pool membership; absent for unassigned drives.
    #[serde(default)]
    pub current_volume_group_ref: Option<String>,
    #[serde(flatten)]
    pub fields: Record,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoragePoolConfig {
    pub id: String,
    pub label: String,
    #[serde(flatten)]
    pub fields: Record,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    pub wwn: String,
    pub name: String,
    #[serde(flatten)]
    pub fields: Record,
}

/// A record validated against the schema of its measurement.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryRecord {
    VolumeStatistics(VolumeStatistics),
    DriveStatistics(DriveStatistics),
    ControllerStatistics(ControllerStatistics),
    InterfaceStatistics(InterfaceStatistics),
    SystemStatistics(SystemStatistics),
    VolumeConfig(VolumeConfig),
    DriveConfig(DriveConfig),
    StoragePoolConfig(StoragePoolConfig),
    SystemConfig(SystemConfig),
    /// Measurements without a dedicated schema.
    Generic(Record),
}

fn decode_as<T: DeserializeOwned>(measurement: &str, record: &Record) -> Result<T> {
    serde_json::from_value(Value::Object(record.clone())).map_err(|e| {
        Error::Extraction(format!("invalid {} record: {}", measurement, e))
    })
}

/// System configs name their fields inconsistently across firmware
/// generations; `wwn` and `name` are resolved from the same keys the
/// identity registry accepts.
fn decode_system(record: &Record) -> Result<SystemConfig> {
    let mut resolved = record.clone();
    for (field, keys) in [("wwn", SYSTEM_WWN_KEYS), ("name", SYSTEM_NAME_KEYS)] {
        if let Some(value) = text_field(record, keys) {
            resolved.insert(field.to_string(), Value::String(value.to_string()));
        }
    }
    decode_as("system", &resolved)
}

impl TelemetryRecord {
    /// Decodes a record for the named measurement. Missing required fields
    /// are reported here instead of surfacing later as absent values.
    pub fn decode(measurement: &str, record: &Record) -> Result<Self> {
        let decoded = match measurement {
            "volume_statistics" => Self::VolumeStatistics(decode_as(measurement, record)?),
            "drive_statistics" => Self::DriveStatistics(decode_as(measurement, record)?),
            "controller_statistics" => Self::ControllerStatistics(decode_as(measurement, record)?),
            "interface_statistics" => Self::InterfaceStatistics(decode_as(measurement, record)?),
            "system_statistics" => Self::SystemStatistics(decode_as(measurement, record)?),
            "volumes" => Self::VolumeConfig(decode_as(measurement, record)?),
            "drives" => Self::DriveConfig(decode_as(measurement, record)?),
            "storage_pools" => Self::StoragePoolConfig(decode_as(measurement, record)?),
            "system" => Self::SystemConfig(decode_system(record)?),
            _ => Self::Generic(record.clone()),
        };
        Ok(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_decode_volume_statistics() {
        let r = record(json!({"volumeId": "v1", "readIOps": 12.5}));
        match TelemetryRecord::decode("volume_statistics", &r).unwrap() {
            TelemetryRecord::VolumeStatistics(stats) => {
                assert_eq!(stats.volume_id, "v1");
                assert_eq!(stats.fields.get("readIOps"), Some(&json!(12.5)));
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_missing_required_field_is_decode_error() {
        let r = record(json!({"readIOps": 1}));
        let err = TelemetryRecord::decode("volume_statistics", &r).unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
        assert!(err.to_string().contains("volumeId"));
    }

    #[test]
    fn test_unknown_measurement_is_generic() {
        let r = record(json!({"anything": true}));
        assert_eq!(
            TelemetryRecord::decode("hosts", &r).unwrap(),
            TelemetryRecord::Generic(r)
        );
    }

    #[test]
    fn test_unassigned_drive_has_no_pool() {
        let r = record(json!({"id": "d1"}));
        match TelemetryRecord::decode("drives", &r).unwrap() {
            TelemetryRecord::DriveConfig(drive) => {
                assert!(drive.current_volume_group_ref.is_none())
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_system_config_name_fallbacks() {
        let r = record(json!({"storageSystemWWN": "ABC", "storageSystemName": "Sys1"}));
        match TelemetryRecord::decode("system", &r).unwrap() {
            TelemetryRecord::SystemConfig(system) => {
                assert_eq!(system.wwn, "ABC");
                assert_eq!(system.name, "Sys1");
            }
            other => panic!("unexpected variant: {:?}", other),
        }

        let r = record(json!({"wwn": "ABC", "name": "unknown", "label": "Labelled"}));
        match TelemetryRecord::decode("system", &r).unwrap() {
            TelemetryRecord::SystemConfig(system) => assert_eq!(system.name, "Labelled"),
            other => panic!("unexpected variant: {:?}", other),
        }

        let r = record(json!({"wwn": "ABC"}));
        assert!(TelemetryRecord::decode("system", &r).is_err());
    }
}
