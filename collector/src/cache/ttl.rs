use crate::utils::Clock;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub inserted_at: DateTime<Utc>,
    /// Caller-supplied tag naming who wrote the entry.
    pub provenance: Option<String>,
}

/// Key/value store with per-entry expiration, grouped by a type tag.
///
/// Expiration is checked on read only; there is no background sweep. The
/// collection throttle (`should_collect`) is tracked separately from the
/// cached values.
#[derive(Debug)]
pub struct TtlCache<V> {
    ttl: Duration,
    entries: HashMap<String, HashMap<String, CacheEntry<V>>>,
    last_allowed: HashMap<String, DateTime<Utc>>,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
            last_allowed: HashMap::new(),
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_live(&self, inserted_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        // A stamp in the future (clock moved back) counts as fresh.
        match (now - inserted_at).to_std() {
            Ok(age) => age <= self.ttl,
            Err(_) => true,
        }
    }

    pub fn set(&mut self, kind: &str, key: &str, value: V) {
        self.set_with_provenance(kind, key, value, None);
    }

    /// Stores or overwrites an entry and stamps it with the current time.
    pub fn set_with_provenance(
        &mut self,
        kind: &str,
        key: &str,
        value: V,
        provenance: Option<&str>,
    ) {
        let now = self.clock.now();
        debug!(
            target: "collector::audit",
            kind,
            key,
            provenance = provenance.unwrap_or("unspecified"),
            "cache set"
        );
        self.entries.entry(kind.to_string()).or_default().insert(
            key.to_string(),
            CacheEntry {
                value,
                inserted_at: now,
                provenance: provenance.map(str::to_string),
            },
        );
    }

    /// Returns the value if it has not outlived the TTL. An expired entry is
    /// evicted as a side effect.
    pub fn get(&mut self, kind: &str, key: &str) -> Option<V> {
        let now = self.clock.now();
        let inserted_at = self.entries.get(kind)?.get(key)?.inserted_at;

        if self.is_live(inserted_at, now) {
            return self
                .entries
                .get(kind)
                .and_then(|bucket| bucket.get(key))
                .map(|entry| entry.value.clone());
        }

        debug!(kind, key, "cache entry expired");
        if let Some(bucket) = self.entries.get_mut(kind) {
            bucket.remove(key);
        }
        None
    }

    /// Returns every live entry of a type sorted by key, evicting the
    /// expired ones.
    pub fn get_all(&mut self, kind: &str) -> Vec<(String, V)> {
        let now = self.clock.now();
        let ttl = self.ttl;
        let Some(bucket) = self.entries.get_mut(kind) else {
            return Vec::new();
        };

        let before = bucket.len();
        bucket.retain(|_, entry| match (now - entry.inserted_at).to_std() {
            Ok(age) => age <= ttl,
            Err(_) => true,
        });
        if bucket.len() < before {
            debug!(kind, evicted = before - bucket.len(), "evicted expired cache entries");
        }

        let mut live: Vec<(String, V)> = bucket
            .iter()
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect();
        live.sort_by(|a, b| a.0.cmp(&b.0));
        live
    }

    /// Throttle independent of cached values: true at most once per
    /// `interval` for a given type. Returning true restarts the timer.
    pub fn should_collect(&mut self, kind: &str, interval: Duration) -> bool {
        let now = self.clock.now();
        let due = match self.last_allowed.get(kind) {
            None => true,
            Some(last) => match (now - *last).to_std() {
                Ok(elapsed) => elapsed >= interval,
                Err(_) => false,
            },
        };
        if due {
            self.last_allowed.insert(kind.to_string(), now);
        }
        due
    }

    /// Forgets the throttle state for one type, or all types.
    pub fn reset_throttle(&mut self, kind: Option<&str>) {
        match kind {
            Some(kind) => {
                self.last_allowed.remove(kind);
            }
            None => self.last_allowed.clear(),
        }
    }

    /// Removes entries of one type, or of every type. Each entry carries its
    /// own stamp so values and stamps always go together.
    pub fn clear(&mut self, kind: Option<&str>) {
        match kind {
            Some(kind) => {
                self.entries.remove(kind);
            }
            None => self.entries.clear(),
        }
    }

    /// Number of stored entries, expired ones included until they are read.
    pub fn len(&self) -> usize {
        self.entries.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entry(&self, kind: &str, key: &str) -> Option<&CacheEntry<V>> {
        self.entries.get(kind)?.get(key)
    }
}
