//! Iteration-based collection scheduling.
//!
//! Every configuration entity type is mapped to a [`ScheduleFrequency`]. The
//! owning process calls [`CollectionScheduler::increment_iteration`] once per
//! cycle and then asks which entity types are due. An entity with multiplier
//! `m` is due on iterations where `iteration % m == 0`, except that the first
//! cycle (iteration 1) collects everything to seed a complete baseline.

use common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Base intervals a collector may run at, in seconds.
pub const SUPPORTED_BASE_INTERVALS: [u64; 4] = [60, 120, 180, 300];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleFrequency {
    High,
    Medium,
    Low,
    Daily,
    Weekly,
}

impl ScheduleFrequency {
    pub const ALL: [ScheduleFrequency; 5] = [
        ScheduleFrequency::High,
        ScheduleFrequency::Medium,
        ScheduleFrequency::Low,
        ScheduleFrequency::Daily,
        ScheduleFrequency::Weekly,
    ];

    /// Number of base intervals between collections.
    pub fn multiplier(&self) -> u64 {
        match self {
            ScheduleFrequency::High => 1,
            ScheduleFrequency::Medium => 15,
            ScheduleFrequency::Low => 360,
            ScheduleFrequency::Daily => 1440,
            ScheduleFrequency::Weekly => 10080,
        }
    }

    pub fn max_multiplier() -> u64 {
        Self::ALL.iter().map(Self::multiplier).max().unwrap_or(1)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleFrequency::High => "high",
            ScheduleFrequency::Medium => "medium",
            ScheduleFrequency::Low => "low",
            ScheduleFrequency::Daily => "daily",
            ScheduleFrequency::Weekly => "weekly",
        }
    }
}

impl fmt::Display for ScheduleFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleFrequency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidInput(format!("unknown schedule frequency '{}'", s)))
    }
}

/// Entity type → frequency. Types not listed here run at medium frequency.
pub const ENTITY_SCHEDULE: &[(&str, ScheduleFrequency)] = &[
    ("volumes", ScheduleFrequency::High),
    ("volume_mappings", ScheduleFrequency::High),
    ("storage_pools", ScheduleFrequency::Medium),
    ("hosts", ScheduleFrequency::Medium),
    ("host_groups", ScheduleFrequency::Medium),
    ("controllers", ScheduleFrequency::Medium),
    ("interfaces", ScheduleFrequency::Medium),
    ("drives", ScheduleFrequency::Low),
    ("system", ScheduleFrequency::Low),
    ("ethernet_interfaces", ScheduleFrequency::Daily),
    ("snapshot_groups", ScheduleFrequency::Daily),
    ("trays", ScheduleFrequency::Weekly),
    ("hardware_inventory", ScheduleFrequency::Weekly),
];

pub fn frequency_for_entity(entity: &str) -> ScheduleFrequency {
    ENTITY_SCHEDULE
        .iter()
        .find(|(name, _)| *name == entity)
        .map(|(_, frequency)| *frequency)
        .unwrap_or(ScheduleFrequency::Medium)
}

pub fn is_mapped_entity(entity: &str) -> bool {
    ENTITY_SCHEDULE.iter().any(|(name, _)| *name == entity)
}

/// A base interval from the supported allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BaseInterval(u64);

impl BaseInterval {
    pub fn secs(&self) -> u64 {
        self.0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.0)
    }
}

impl TryFrom<u64> for BaseInterval {
    type Error = Error;

    fn try_from(secs: u64) -> Result<Self> {
        if SUPPORTED_BASE_INTERVALS.contains(&secs) {
            Ok(Self(secs))
        } else {
            Err(Error::Configuration(format!(
                "unsupported base interval {}s; supported intervals are {:?}",
                secs, SUPPORTED_BASE_INTERVALS
            )))
        }
    }
}

/// A frequency materialized against a base interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CollectionSchedule {
    pub frequency: ScheduleFrequency,
    pub base_interval: BaseInterval,
    pub effective_interval: Duration,
}

impl CollectionSchedule {
    pub fn new(frequency: ScheduleFrequency, base_interval: BaseInterval) -> Self {
        Self {
            frequency,
            base_interval,
            effective_interval: Duration::from_secs(base_interval.secs() * frequency.multiplier()),
        }
    }

    pub fn multiplier(&self) -> u64 {
        self.frequency.multiplier()
    }

    pub fn should_collect_on_iteration(&self, iteration: u64) -> bool {
        iteration % self.multiplier() == 0
    }
}

/// Diagnostic view of one entity type.
#[derive(Debug, Clone, Serialize)]
pub struct EntityStatus {
    pub entity: String,
    pub frequency: ScheduleFrequency,
    pub effective_interval_secs: u64,
    pub last_collected_iteration: u64,
    pub next_collection_iteration: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub iteration_count: u64,
    pub base_interval_secs: u64,
    pub entities: Vec<EntityStatus>,
}

#[derive(Debug)]
pub struct CollectionScheduler {
    base_interval: BaseInterval,
    iteration_count: u64,
    schedules: BTreeMap<ScheduleFrequency, CollectionSchedule>,
    last_collected: BTreeMap<String, u64>,
}

impl CollectionScheduler {
    /// Fails with a configuration error when `base_interval_secs` is not one
    /// of [`SUPPORTED_BASE_INTERVALS`].
    pub fn new(base_interval_secs: u64) -> Result<Self> {
        let base_interval = BaseInterval::try_from(base_interval_secs)?;
        let schedules = ScheduleFrequency::ALL
            .into_iter()
            .map(|f| (f, CollectionSchedule::new(f, base_interval)))
            .collect();

        info!(base_interval_secs, "Collection scheduler initialized");

        Ok(Self {
            base_interval,
            iteration_count: 0,
            schedules,
            last_collected: BTreeMap::new(),
        })
    }

    pub fn base_interval(&self) -> BaseInterval {
        self.base_interval
    }

    pub fn iteration_count(&self) -> u64 {
        self.iteration_count
    }

    /// Advances to the next cycle. Must run once per cycle, before any
    /// scheduling decision for that cycle.
    pub fn increment_iteration(&mut self) -> u64 {
        self.iteration_count += 1;
        debug!(iteration = self.iteration_count, "Scheduler iteration advanced");
        self.iteration_count
    }

    pub fn frequency_for(&self, entity: &str) -> ScheduleFrequency {
        frequency_for_entity(entity)
    }

    pub fn schedule_for(&self, entity: &str) -> CollectionSchedule {
        let frequency = self.frequency_for(entity);
        self.schedules
            .get(&frequency)
            .copied()
            .unwrap_or_else(|| CollectionSchedule::new(frequency, self.base_interval))
    }

    /// Decision for an arbitrary iteration. Iteration 0 is never due, and
    /// iteration 1 is due for every entity type.
    pub fn should_collect_on_iteration(&self, entity: &str, iteration: u64) -> bool {
        match iteration {
            0 => false,
            1 => true,
            _ => self.schedule_for(entity).should_collect_on_iteration(iteration),
        }
    }

    pub fn should_collect(&self, entity: &str) -> bool {
        self.should_collect_on_iteration(entity, self.iteration_count)
    }

    /// Mapped entity types due on the current iteration.
    pub fn due_entities(&self) -> Vec<&'static str> {
        let due: Vec<&'static str> = ENTITY_SCHEDULE
            .iter()
            .map(|(name, _)| *name)
            .filter(|name| self.should_collect(name))
            .collect();

        if self.iteration_count == 1 {
            info!(entities = due.len(), "Baseline iteration: collecting every entity type");
        }
        due
    }

    pub fn mark_collected(&mut self, entity: &str) {
        self.last_collected
            .insert(entity.to_string(), self.iteration_count);
    }

    pub fn last_collected(&self, entity: &str) -> u64 {
        self.last_collected.get(entity).copied().unwrap_or(0)
    }

    /// Resets the last-collected bookkeeping for one entity type, or all.
    ///
    /// This does not make the entity due: the decision still follows the
    /// modulo rule on the next iteration.
    pub fn force_collection(&mut self, entity: Option<&str>) {
        match entity {
            Some(entity) => {
                self.last_collected.insert(entity.to_string(), 0);
            }
            None => {
                for value in self.last_collected.values_mut() {
                    *value = 0;
                }
                for (name, _) in ENTITY_SCHEDULE {
                    self.last_collected.insert((*name).to_string(), 0);
                }
            }
        }
        warn!(
            entity = entity.unwrap_or("all"),
            iteration = self.iteration_count,
            "force_collection only resets bookkeeping; \
             collection still waits for the next scheduled tick"
        );
    }

    /// First iteration after the current one on which `entity` is due.
    pub fn next_collection_iteration(&self, entity: &str) -> u64 {
        let current = self.iteration_count;
        if current == 0 {
            return 1;
        }
        let multiplier = self.schedule_for(entity).multiplier();
        (current / multiplier + 1) * multiplier
    }

    pub fn time_until_next_collection(&self, entity: &str) -> Duration {
        let remaining = self.next_collection_iteration(entity) - self.iteration_count;
        self.base_interval.as_duration() * remaining as u32
    }

    pub fn status(&self) -> SchedulerStatus {
        let entities = ENTITY_SCHEDULE
            .iter()
            .map(|(name, frequency)| EntityStatus {
                entity: (*name).to_string(),
                frequency: *frequency,
                effective_interval_secs: self.schedule_for(name).effective_interval.as_secs(),
                last_collected_iteration: self.last_collected(name),
                next_collection_iteration: self.next_collection_iteration(name),
            })
            .collect();

        SchedulerStatus {
            iteration_count: self.iteration_count,
            base_interval_secs: self.base_interval.secs(),
            entities,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_unsupported_base_interval() {
        for secs in [0, 30, 61, 240, 600] {
            let err = CollectionScheduler::new(secs).unwrap_err();
            assert!(matches!(err, Error::Configuration(_)), "{} accepted", secs);
        }
        for secs in SUPPORTED_BASE_INTERVALS {
            assert!(CollectionScheduler::new(secs).is_ok());
        }
    }

    #[test]
    fn test_multipliers_are_fixed() {
        let multipliers: Vec<u64> = ScheduleFrequency::ALL.iter().map(|f| f.multiplier()).collect();
        assert_eq!(multipliers, vec![1, 15, 360, 1440, 10080]);
        assert_eq!(ScheduleFrequency::max_multiplier(), 10080);
    }

    #[test]
    fn test_effective_interval() {
        let scheduler = CollectionScheduler::new(120).unwrap();
        let schedule = scheduler.schedule_for("storage_pools");
        assert_eq!(schedule.effective_interval, Duration::from_secs(120 * 15));
    }

    #[test]
    fn test_modulo_rule_from_iteration_two() {
        let scheduler = CollectionScheduler::new(60).unwrap();
        for (entity, _) in ENTITY_SCHEDULE {
            let m = scheduler.schedule_for(entity).multiplier();
            for i in 2..=25_000u64 {
                assert_eq!(scheduler.should_collect_on_iteration(entity, i), i % m == 0);
            }
        }
    }

    #[test]
    fn test_first_iteration_collects_everything() {
        let mut scheduler = CollectionScheduler::new(60).unwrap();
        assert!(scheduler.due_entities().is_empty());

        scheduler.increment_iteration();
        assert_eq!(scheduler.due_entities().len(), ENTITY_SCHEDULE.len());

        scheduler.increment_iteration();
        assert_eq!(scheduler.due_entities(), vec!["volumes", "volume_mappings"]);
    }

    #[test]
    fn test_unmapped_entity_defaults_to_medium() {
        let scheduler = CollectionScheduler::new(60).unwrap();
        assert_eq!(scheduler.frequency_for("mystery"), ScheduleFrequency::Medium);
        assert!(!is_mapped_entity("mystery"));
        assert!(scheduler.should_collect_on_iteration("mystery", 30));
        assert!(!scheduler.should_collect_on_iteration("mystery", 31));
    }

    #[test]
    fn test_force_collection_only_clears_bookkeeping() {
        let mut scheduler = CollectionScheduler::new(60).unwrap();
        scheduler.increment_iteration();
        scheduler.mark_collected("drives");
        scheduler.increment_iteration();
        assert_eq!(scheduler.last_collected("drives"), 1);

        scheduler.force_collection(Some("drives"));
        assert_eq!(scheduler.last_collected("drives"), 0);
        assert!(!scheduler.should_collect("drives"));

        scheduler.mark_collected("volumes");
        scheduler.force_collection(None);
        assert_eq!(scheduler.last_collected("volumes"), 0);
    }

    #[test]
    fn test_next_collection_iteration() {
        let mut scheduler = CollectionScheduler::new(60).unwrap();
        assert_eq!(scheduler.next_collection_iteration("storage_pools"), 1);

        for _ in 0..16 {
            scheduler.increment_iteration();
        }
        assert_eq!(scheduler.next_collection_iteration("storage_pools"), 30);
        assert_eq!(scheduler.next_collection_iteration("volumes"), 17);
        assert_eq!(
            scheduler.time_until_next_collection("storage_pools"),
            Duration::from_secs(14 * 60)
        );
    }

    #[test]
    fn test_frequency_from_str() {
        assert_eq!("Daily".parse::<ScheduleFrequency>().unwrap(), ScheduleFrequency::Daily);
        assert!("hourly".parse::<ScheduleFrequency>().is_err());
    }
}
