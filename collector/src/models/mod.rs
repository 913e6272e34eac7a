mod measurement;
mod records;
mod result;

pub use measurement::{
    CollectionCategory, MEASUREMENTS, Measurement, PayloadShape, classify_file_name,
    find_measurement, system_id_from_file_name,
};
pub use records::{
    ControllerStatistics, DriveConfig, DriveStatistics, InterfaceStatistics, Record,
    SYSTEM_NAME_KEYS, SYSTEM_WWN_KEYS, StoragePoolConfig, SystemConfig, SystemStatistics,
    TelemetryRecord, VolumeConfig, VolumeStatistics, text_field,
};
pub use result::CollectionResult;
