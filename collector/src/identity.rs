//! Canonical storage-system identity for one run.
//!
//! Every record leaving the collector is tagged from the same
//! [`SystemContext`], whether it came from a live API session or from
//! replayed JSON. The context is an explicit object owned by the data
//! source rather than process-global state.

use crate::models::{Record, SYSTEM_NAME_KEYS, SYSTEM_WWN_KEYS, text_field};
use chrono::{DateTime, Utc};
use common::{Error, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Number of keys in a [`SystemTags`] set.
pub const SYSTEM_TAG_COUNT: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    LiveApi,
    JsonReplay,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::LiveApi => "live_api",
            Provenance::JsonReplay => "json_replay",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemContext {
    /// Upper-cased world-wide name; primary key.
    pub wwn: String,
    pub name: String,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
    pub management_addresses: Vec<String>,
    pub provenance: Provenance,
    pub registered_at: DateTime<Utc>,
}

/// Identity tags injected into every record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemTags {
    pub system_id: String,
    pub system_wwn: String,
    pub sys_id: String,
    pub sys_wwn: String,
    pub system_name: String,
    pub sys_name: String,
    pub storage_system_name: String,
}

impl SystemTags {
    fn from_context(context: &SystemContext) -> Self {
        Self {
            system_id: context.wwn.clone(),
            system_wwn: context.wwn.clone(),
            sys_id: context.wwn.clone(),
            sys_wwn: context.wwn.clone(),
            system_name: context.name.clone(),
            sys_name: context.name.clone(),
            storage_system_name: context.name.clone(),
        }
    }

    pub fn pairs(&self) -> [(&'static str, &str); SYSTEM_TAG_COUNT] {
        [
            ("system_id", self.system_id.as_str()),
            ("system_wwn", self.system_wwn.as_str()),
            ("sys_id", self.sys_id.as_str()),
            ("sys_wwn", self.sys_wwn.as_str()),
            ("system_name", self.system_name.as_str()),
            ("sys_name", self.sys_name.as_str()),
            ("storage_system_name", self.storage_system_name.as_str()),
        ]
    }
}

/// True for values an upstream source left unset: null, empty or "unknown".
fn is_sentinel(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => {
            let s = s.trim();
            s.is_empty() || s.eq_ignore_ascii_case("unknown")
        }
        _ => false,
    }
}

fn system_wwn(config: &Map<String, Value>) -> Option<&str> {
    text_field(config, SYSTEM_WWN_KEYS)
}

/// Accepts an object, a `{system_id, data}` envelope or an array of system
/// objects, and returns the object describing `wwn`.
///
/// An array must contain an entry for `wwn`, except that a single entry
/// carrying no WWN at all is taken as is.
fn select_system_object<'a>(config: &'a Value, wwn: &str) -> Result<&'a Map<String, Value>> {
    match config {
        Value::Object(map) => match map.get("data") {
            Some(inner) if map.contains_key("system_id") => select_system_object(inner, wwn),
            _ => Ok(map),
        },
        Value::Array(items) => {
            let objects: Vec<&Map<String, Value>> =
                items.iter().filter_map(Value::as_object).collect();
            let describes = |obj: &Map<String, Value>| {
                system_wwn(obj).is_some_and(|found| found.eq_ignore_ascii_case(wwn))
            };
            if let Some(found) = objects.iter().copied().find(|obj| describes(*obj)) {
                return Ok(found);
            }
            match objects.as_slice() {
                [only] if system_wwn(only).is_none() => Ok(*only),
                _ => {
                    let found: Vec<&str> =
                        objects.iter().filter_map(|obj| system_wwn(obj)).collect();
                    Err(Error::Identity(format!(
                        "system config lists no entry for {} (found: {})",
                        wwn,
                        if found.is_empty() { "none".to_string() } else { found.join(", ") }
                    )))
                }
            }
        }
        _ => Err(Error::Identity(format!(
            "system config for {} is neither an object nor a list of objects",
            wwn
        ))),
    }
}

fn management_addresses(config: &Map<String, Value>) -> Vec<String> {
    ["ip1", "ip2"]
        .iter()
        .filter_map(|key| config.get(*key).and_then(Value::as_str))
        .filter(|addr| !addr.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Default)]
pub struct IdentityContext {
    systems: BTreeMap<String, SystemContext>,
    primary: Option<String>,
}

impl IdentityContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the system described by a live system-config payload.
    /// Both `wwn` and `name` are required.
    pub fn register_system_from_live_api(&mut self, config: &Value) -> Result<&SystemContext> {
        let map = config.as_object().ok_or_else(|| {
            Error::Identity("live system config is not a JSON object".to_string())
        })?;
        let wwn = text_field(map, &["wwn"]).ok_or_else(|| {
            Error::Identity("live system config has no WWN; refusing to tag telemetry".to_string())
        })?;
        let name = text_field(map, &["name"]).ok_or_else(|| {
            Error::Identity(format!("live system config for WWN {} has no name", wwn))
        })?;

        let context = SystemContext {
            wwn: wwn.to_uppercase(),
            name: name.to_string(),
            model: text_field(map, &["model"]).map(str::to_string),
            firmware_version: text_field(map, &["fwVersion"]).map(str::to_string),
            management_addresses: management_addresses(map),
            provenance: Provenance::LiveApi,
            registered_at: Utc::now(),
        };
        Ok(self.insert(context))
    }

    /// Registers a replayed system. The WWN comes from the operator because
    /// it cannot be inferred from mixed dumps. When a config payload is
    /// given it must yield a real display name.
    pub fn register_system_from_json_replay(
        &mut self,
        wwn: &str,
        config: Option<&Value>,
    ) -> Result<&SystemContext> {
        let wwn = wwn.trim().to_uppercase();
        if wwn.is_empty() || wwn.eq_ignore_ascii_case("unknown") {
            return Err(Error::Identity(
                "replay system identifier is empty".to_string(),
            ));
        }

        let context = match config {
            Some(config) => {
                let map = select_system_object(config, &wwn)?;
                let name = text_field(map, SYSTEM_NAME_KEYS)
                    .ok_or_else(|| {
                        Error::Identity(format!(
                            "system config for {} carries no display name",
                            wwn
                        ))
                    })?;
                if let Some(found) = system_wwn(map) {
                    if !found.eq_ignore_ascii_case(&wwn) {
                        return Err(Error::Identity(format!(
                            "system config describes {} but {} was declared",
                            found, wwn
                        )));
                    }
                }
                SystemContext {
                    wwn,
                    name: name.to_string(),
                    model: text_field(map, &["model"]).map(str::to_string),
                    firmware_version: text_field(map, &["fwVersion"]).map(str::to_string),
                    management_addresses: management_addresses(map),
                    provenance: Provenance::JsonReplay,
                    registered_at: Utc::now(),
                }
            }
            None => {
                warn!(wwn = %wwn, "No system config supplied; using the WWN as display name");
                SystemContext {
                    name: wwn.clone(),
                    wwn,
                    model: None,
                    firmware_version: None,
                    management_addresses: Vec::new(),
                    provenance: Provenance::JsonReplay,
                    registered_at: Utc::now(),
                }
            }
        };
        Ok(self.insert(context))
    }

    fn insert(&mut self, context: SystemContext) -> &SystemContext {
        let wwn = context.wwn.clone();
        if let Some(existing) = self.systems.get(&wwn) {
            if existing.name != context.name {
                warn!(
                    wwn = %wwn,
                    registered = %existing.name,
                    ignored = %context.name,
                    "System already registered; keeping the original identity"
                );
            } else {
                debug!(wwn = %wwn, "System already registered");
            }
        } else {
            info!(
                wwn = %context.wwn,
                name = %context.name,
                provenance = context.provenance.as_str(),
                primary = self.primary.is_none(),
                "Registered storage system"
            );
            self.systems.insert(wwn.clone(), context);
        }
        if self.primary.is_none() {
            self.primary = Some(wwn.clone());
        }
        &self.systems[&wwn]
    }

    pub fn is_registered(&self) -> bool {
        self.primary.is_some()
    }

    pub fn primary_system(&self) -> Option<&SystemContext> {
        self.primary.as_ref().and_then(|wwn| self.systems.get(wwn))
    }

    pub fn get_system(&self, wwn: &str) -> Option<&SystemContext> {
        self.systems.get(&wwn.to_uppercase())
    }

    fn resolve(&self, wwn: Option<&str>) -> Result<&SystemContext> {
        match wwn {
            Some(wwn) => self.get_system(wwn).ok_or_else(|| {
                Error::Identity(format!("system {} has not been registered", wwn))
            }),
            None => self.primary_system().ok_or_else(|| {
                Error::Identity("no storage system registered; cannot tag records".to_string())
            }),
        }
    }

    /// Tag set for `wwn`, or for the primary system when `wwn` is `None`.
    pub fn get_system_tags(&self, wwn: Option<&str>) -> Result<SystemTags> {
        self.resolve(wwn).map(SystemTags::from_context)
    }

    /// Adds identity tags to each record, keeping any value a record already
    /// carries unless it is null, empty or "unknown".
    pub fn inject_system_context(&self, records: &mut [Record], wwn: Option<&str>) -> Result<()> {
        let tags = self.get_system_tags(wwn)?;
        for record in records.iter_mut() {
            for (key, value) in tags.pairs() {
                let keep = record.get(key).is_some_and(|existing| !is_sentinel(existing));
                if !keep {
                    record.insert(key.to_string(), Value::String(value.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Drops every registration.
    pub fn reset(&mut self) {
        self.systems.clear();
        self.primary = None;
    }
}
