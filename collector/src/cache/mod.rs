mod config_cache;
mod ttl;

pub use config_cache::{CachedConfig, ConfigCache, ConfigKind, calculate_ttl};
pub use ttl::{CacheEntry, TtlCache};
