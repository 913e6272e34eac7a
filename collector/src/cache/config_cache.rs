use super::ttl::TtlCache;
use crate::models::{DriveConfig, StoragePoolConfig, SystemConfig, VolumeConfig};
use crate::scheduler::{BaseInterval, ScheduleFrequency, frequency_for_entity};
use crate::utils::Clock;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Safety margin applied on top of the slowest collection interval.
const TTL_MARGIN: f64 = 1.25;

/// TTL long enough that no entry expires before the slowest-scheduled type
/// would refresh it: `ceil(base × max multiplier × 1.25)` seconds.
pub fn calculate_ttl(base_interval_secs: u64) -> u64 {
    (base_interval_secs as f64 * ScheduleFrequency::max_multiplier() as f64 * TTL_MARGIN).ceil()
        as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKind {
    Drive,
    Volume,
    StoragePool,
    System,
}

impl ConfigKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKind::Drive => "drive",
            ConfigKind::Volume => "volume",
            ConfigKind::StoragePool => "storage_pool",
            ConfigKind::System => "system",
        }
    }

    /// Scheduler entity type collecting this kind.
    pub fn entity(&self) -> &'static str {
        match self {
            ConfigKind::Drive => "drives",
            ConfigKind::Volume => "volumes",
            ConfigKind::StoragePool => "storage_pools",
            ConfigKind::System => "system",
        }
    }

    pub fn frequency(&self) -> ScheduleFrequency {
        frequency_for_entity(self.entity())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CachedConfig {
    Drive(DriveConfig),
    Volume(VolumeConfig),
    StoragePool(StoragePoolConfig),
    System(SystemConfig),
}

fn cache_key(system_id: &str, entity_id: &str) -> String {
    format!("{}:{}", system_id, entity_id)
}

fn system_prefix(system_id: &str) -> String {
    format!("{}:", system_id)
}

/// Typed facade over [`TtlCache`] for configuration snapshots.
///
/// Keys are `"{system_id}:{entity_id}"` so one instance can serve several
/// systems. Relationship queries are linear scans over live entries.
#[derive(Debug)]
pub struct ConfigCache {
    cache: TtlCache<CachedConfig>,
    base_interval: BaseInterval,
}

macro_rules! typed_accessors {
    ($kind:ident, $ty:ty, $store:ident, $get:ident, $get_all:ident) => {
        pub fn $store(&mut self, system_id: &str, id: &str, config: $ty, provenance: Option<&str>) {
            self.cache.set_with_provenance(
                ConfigKind::$kind.as_str(),
                &cache_key(system_id, id),
                CachedConfig::$kind(config),
                provenance,
            );
        }

        pub fn $get(&mut self, system_id: &str, id: &str) -> Option<$ty> {
            match self.cache.get(ConfigKind::$kind.as_str(), &cache_key(system_id, id))? {
                CachedConfig::$kind(config) => Some(config),
                _ => None,
            }
        }

        pub fn $get_all(&mut self, system_id: &str) -> Vec<$ty> {
            let prefix = system_prefix(system_id);
            self.cache
                .get_all(ConfigKind::$kind.as_str())
                .into_iter()
                .filter(|(key, _)| key.starts_with(&prefix))
                .filter_map(|(_, value)| match value {
                    CachedConfig::$kind(config) => Some(config),
                    _ => None,
                })
                .collect()
        }
    };
}

impl ConfigCache {
    pub fn new(base_interval: BaseInterval, clock: Arc<dyn Clock>) -> Self {
        let ttl = calculate_ttl(base_interval.secs());
        Self::with_ttl(base_interval, Duration::from_secs(ttl), clock)
    }

    /// Overrides the derived TTL.
    pub fn with_ttl(base_interval: BaseInterval, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        debug!(
            base_interval_secs = base_interval.secs(),
            ttl_secs = ttl.as_secs(),
            "Config cache initialized"
        );
        Self {
            cache: TtlCache::new(ttl, clock),
            base_interval,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.cache.ttl()
    }

    pub fn collection_interval(&self, kind: ConfigKind) -> Duration {
        self.base_interval.as_duration() * kind.frequency().multiplier() as u32
    }

    /// Throttle for re-fetching one kind for one system.
    pub fn should_collect(&mut self, system_id: &str, kind: ConfigKind) -> bool {
        let interval = self.collection_interval(kind);
        self.cache
            .should_collect(&cache_key(system_id, kind.as_str()), interval)
    }

    typed_accessors!(Drive, DriveConfig, store_drive, get_drive, get_all_drives);
    typed_accessors!(Volume, VolumeConfig, store_volume, get_volume, get_all_volumes);
    typed_accessors!(
        StoragePool,
        StoragePoolConfig,
        store_storage_pool,
        get_storage_pool,
        get_all_storage_pools
    );

    pub fn store_system(&mut self, config: SystemConfig, provenance: Option<&str>) {
        let wwn = config.wwn.clone();
        self.cache.set_with_provenance(
            ConfigKind::System.as_str(),
            &cache_key(&wwn, &wwn),
            CachedConfig::System(config),
            provenance,
        );
    }

    pub fn get_system(&mut self, system_id: &str) -> Option<SystemConfig> {
        match self
            .cache
            .get(ConfigKind::System.as_str(), &cache_key(system_id, system_id))?
        {
            CachedConfig::System(config) => Some(config),
            _ => None,
        }
    }

    pub fn volumes_in_pool(&mut self, system_id: &str, pool_id: &str) -> Vec<VolumeConfig> {
        self.get_all_volumes(system_id)
            .into_iter()
            .filter(|volume| volume.volume_group_ref == pool_id)
            .collect()
    }

    pub fn drives_in_pool(&mut self, system_id: &str, pool_id: &str) -> Vec<DriveConfig> {
        self.get_all_drives(system_id)
            .into_iter()
            .filter(|drive| drive.current_volume_group_ref.as_deref() == Some(pool_id))
            .collect()
    }

    pub fn clear(&mut self, kind: Option<ConfigKind>) {
        self.cache.clear(kind.as_ref().map(ConfigKind::as_str));
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Record;
    use crate::utils::ManualClock;

    fn new_cache() -> (ConfigCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let base = BaseInterval::try_from(60).unwrap();
        (ConfigCache::new(base, clock.clone()), clock)
    }

    fn volume(id: &str, pool: &str) -> VolumeConfig {
        VolumeConfig {
            id: id.to_string(),
            name: format!("vol-{}", id),
            volume_group_ref: pool.to_string(),
            fields: Record::new(),
        }
    }

    fn drive(id: &str, pool: Option<&str>) -> DriveConfig {
        DriveConfig {
            id: id.to_string(),
            current_volume_group_ref: pool.map(str::to_string),
            fields: Record::new(),
        }
    }

    #[test]
    fn test_calculate_ttl() {
        assert_eq!(calculate_ttl(60), 756_000);
        assert_eq!(calculate_ttl(300), 3_780_000);
        let (cache, _) = new_cache();
        assert_eq!(cache.ttl(), Duration::from_secs(756_000));
    }

    #[test]
    fn test_kind_intervals_follow_schedule() {
        let (cache, _) = new_cache();
        assert_eq!(cache.collection_interval(ConfigKind::Volume), Duration::from_secs(60));
        assert_eq!(cache.collection_interval(ConfigKind::StoragePool), Duration::from_secs(900));
        assert_eq!(cache.collection_interval(ConfigKind::Drive), Duration::from_secs(21_600));
        assert_eq!(cache.collection_interval(ConfigKind::System), Duration::from_secs(21_600));
    }

    #[test]
    fn test_keys_are_scoped_per_system() {
        let (mut cache, _) = new_cache();
        cache.store_volume("SYS1", "v1", volume("v1", "p1"), None);
        cache.store_volume("SYS2", "v1", volume("v1", "p9"), None);

        assert_eq!(cache.get_volume("SYS1", "v1").unwrap().volume_group_ref, "p1");
        assert_eq!(cache.get_volume("SYS2", "v1").unwrap().volume_group_ref, "p9");
        assert_eq!(cache.get_all_volumes("SYS1").len(), 1);
        assert!(cache.get_volume("SYS3", "v1").is_none());
    }

    #[test]
    fn test_relationship_queries() {
        let (mut cache, _) = new_cache();
        cache.store_volume("SYS1", "v1", volume("v1", "p1"), None);
        cache.store_volume("SYS1", "v2", volume("v2", "p2"), None);
        cache.store_volume("SYS1", "v3", volume("v3", "p1"), None);
        cache.store_drive("SYS1", "d1", drive("d1", Some("p1")), None);
        cache.store_drive("SYS1", "d2", drive("d2", None), None);

        let ids: Vec<_> = cache
            .volumes_in_pool("SYS1", "p1")
            .into_iter()
            .map(|v| v.id)
            .collect();
        assert_eq!(ids, vec!["v1", "v3"]);
        assert_eq!(cache.drives_in_pool("SYS1", "p1").len(), 1);
        assert!(cache.drives_in_pool("SYS1", "p2").is_empty());
    }

    #[test]
    fn test_system_config_round_trip_and_expiry() {
        let (mut cache, clock) = new_cache();
        cache.store_system(
            SystemConfig {
                wwn: "ABC".to_string(),
                name: "Sys1".to_string(),
                fields: Record::new(),
            },
            Some("json_replay"),
        );
        assert_eq!(cache.get_system("ABC").unwrap().name, "Sys1");

        clock.advance(chrono::Duration::seconds(756_001));
        assert!(cache.get_system("ABC").is_none());
    }

    #[test]
    fn test_should_collect_uses_kind_interval() {
        let (mut cache, clock) = new_cache();
        assert!(cache.should_collect("SYS1", ConfigKind::StoragePool));
        assert!(!cache.should_collect("SYS1", ConfigKind::StoragePool));
        assert!(cache.should_collect("SYS2", ConfigKind::StoragePool));

        clock.advance(chrono::Duration::seconds(900));
        assert!(cache.should_collect("SYS1", ConfigKind::StoragePool));
    }

    #[test]
    fn test_clear_one_kind() {
        let (mut cache, _) = new_cache();
        cache.store_volume("SYS1", "v1", volume("v1", "p1"), None);
        cache.store_drive("SYS1", "d1", drive("d1", None), None);
        cache.clear(Some(ConfigKind::Volume));
        assert!(cache.get_volume("SYS1", "v1").is_none());
        assert!(cache.get_drive("SYS1", "d1").is_some());
    }
}
