//! Settings & property reflection.
//!
//! A property schema is a tagged union of `(name, getter, setter)`
//! closures over a typed record, so a schema is just
//! `Vec<PropertyField<T>>` for whatever record `T` it describes. `core`
//! only ships one concrete record, [`crate::epg::scrape::ScrapeConfig`]
//! under the key `scrape/config`, but the schema machinery itself is
//! generic.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::epg::scrape::ScrapeConfig;
use crate::error::SettingsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    Bool,
    Int,
    Str,
}

/// One named, typed field of a configuration record `T`, expressed as
/// a getter/setter pair instead of a byte offset.
pub struct PropertyField<T> {
    pub name: &'static str,
    pub kind: PropertyType,
    get: Box<dyn Fn(&T) -> Value + Send + Sync>,
    set: Box<dyn Fn(&mut T, &Value) -> bool + Send + Sync>,
}

impl<T> PropertyField<T> {
    #[must_use]
    pub fn bool(
        name: &'static str,
        get: impl Fn(&T) -> bool + Send + Sync + 'static,
        set: impl Fn(&mut T, bool) + Send + Sync + 'static,
    ) -> Self {
        let get = std::sync::Arc::new(get);
        let get2 = get.clone();
        Self {
            name,
            kind: PropertyType::Bool,
            get: Box::new(move |t| Value::Bool(get(t))),
            set: Box::new(move |t, v| match v.as_bool() {
                Some(b) if get2(t) != b => {
                    set(t, b);
                    true
                }
                _ => false,
            }),
        }
    }

    #[must_use]
    pub fn str(
        name: &'static str,
        get: impl Fn(&T) -> String + Send + Sync + 'static,
        set: impl Fn(&mut T, String) + Send + Sync + 'static,
    ) -> Self {
        let get = std::sync::Arc::new(get);
        let get2 = get.clone();
        Self {
            name,
            kind: PropertyType::Str,
            get: Box::new(move |t| Value::String(get(t))),
            set: Box::new(move |t, v| match v.as_str() {
                Some(s) if get2(t) != s => {
                    set(t, s.to_string());
                    true
                }
                _ => false,
            }),
        }
    }
}

/// Reads every field in `schema` off `record` into a JSON map, from
/// names to scalar values.
#[must_use]
pub fn read_values<T>(record: &T, schema: &[PropertyField<T>]) -> Map<String, Value> {
    let mut map = Map::new();
    for field in schema {
        map.insert(field.name.to_string(), (field.get)(record));
    }
    map
}

/// Writes recognized field names from `values` back into `record`,
/// returning the number of fields actually changed.
pub fn write_values<T>(record: &mut T, schema: &[PropertyField<T>], values: &Map<String, Value>) -> usize {
    let mut changed = 0;
    for field in schema {
        if let Some(value) = values.get(field.name) {
            if (field.set)(record, value) {
                changed += 1;
            }
        }
    }
    changed
}

/// Persistent key/value store. The mapping from `key` to storage paths
/// is opaque to the core.
pub trait SettingsStore: Send + Sync {
    fn save(&self, key: &str, map: &Map<String, Value>) -> Result<(), SettingsError>;
    fn load(&self, key: &str) -> Result<Map<String, Value>, SettingsError>;
}

/// One JSON file per key under a base directory.
pub struct FileSettingsStore {
    base_dir: PathBuf,
}

impl FileSettingsStore {
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{key}.json"))
    }
}

impl SettingsStore for FileSettingsStore {
    fn save(&self, key: &str, map: &Map<String, Value>) -> Result<(), SettingsError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_vec_pretty(map).map_err(|err| SettingsError::ParseError {
            key: key.to_string(),
            reason: err.to_string(),
        })?;
        fs::write(path, serialized)?;
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Map<String, Value>, SettingsError> {
        let path = self.path_for(key);
        if !Path::new(&path).exists() {
            return Err(SettingsError::NotFound(key.to_string()));
        }
        let bytes = fs::read(path)?;
        let value: Value = serde_json::from_slice(&bytes).map_err(|err| SettingsError::ParseError {
            key: key.to_string(),
            reason: err.to_string(),
        })?;
        match value {
            Value::Object(map) => Ok(map),
            _ => Err(SettingsError::ParseError {
                key: key.to_string(),
                reason: "stored value is not a JSON object".into(),
            }),
        }
    }
}

/// The schema for [`ScrapeConfig`], the only settings record `core`
/// ships.
#[must_use]
pub fn scrape_config_schema() -> Vec<PropertyField<ScrapeConfig>> {
    vec![
        PropertyField::bool("enabled", |c: &ScrapeConfig| c.enabled, |c, v| c.enabled = v),
        PropertyField::str(
            "exec",
            |c: &ScrapeConfig| c.exec.clone().unwrap_or_default(),
            |c, v| c.exec = if v.is_empty() { None } else { Some(v) },
        ),
    ]
}

/// Loads `scrape/config` from `store` into a [`ScrapeConfig`],
/// returning the default config if the store has nothing saved yet.
#[must_use]
pub fn get_config(store: &dyn SettingsStore) -> ScrapeConfig {
    let schema = scrape_config_schema();
    match store.load("scrape/config") {
        Ok(map) => {
            let mut config = ScrapeConfig::default();
            write_values(&mut config, &schema, &map);
            config
        }
        Err(err) => {
            log::debug!("settings: no stored scrape config, using default ({err})");
            ScrapeConfig::default()
        }
    }
}

/// Persists `config` to `store` under `scrape/config`.
pub fn set_config(store: &dyn SettingsStore, config: &ScrapeConfig) -> Result<(), SettingsError> {
    let schema = scrape_config_schema();
    let map = read_values(config, &schema);
    store.save("scrape/config", &map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_values_emits_every_field() {
        let config = ScrapeConfig { enabled: true, exec: Some("/bin/scrape".into()) };
        let schema = scrape_config_schema();
        let map = read_values(&config, &schema);
        assert_eq!(map.get("enabled"), Some(&Value::Bool(true)));
        assert_eq!(map.get("exec"), Some(&Value::String("/bin/scrape".into())));
    }

    #[test]
    fn write_values_counts_only_actual_changes() {
        let mut config = ScrapeConfig { enabled: false, exec: None };
        let schema = scrape_config_schema();
        let mut values = Map::new();
        values.insert("enabled".into(), Value::Bool(false)); // unchanged
        values.insert("exec".into(), Value::String("/bin/scrape".into())); // changed
        let changed = write_values(&mut config, &schema, &values);
        assert_eq!(changed, 1);
        assert_eq!(config.exec.as_deref(), Some("/bin/scrape"));
    }

    #[test]
    fn file_store_round_trips_through_a_tempdir() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let store = FileSettingsStore::new(temp_dir.path());
        let config = ScrapeConfig { enabled: true, exec: Some("/usr/bin/scraper".into()) };
        set_config(&store, &config).unwrap();
        let loaded = get_config(&store);
        assert!(loaded.enabled);
        assert_eq!(loaded.exec.as_deref(), Some("/usr/bin/scraper"));
    }

    #[test]
    fn load_missing_key_returns_not_found() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let store = FileSettingsStore::new(temp_dir.path());
        assert!(matches!(store.load("nope"), Err(SettingsError::NotFound(_))));
    }
}
