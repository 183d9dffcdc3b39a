//! Configuration layer for GrooveKeeper.
//!
//! A single YAML document drives the whole engine. Defaults are embedded in
//! the binary; the first readable file among an ordered candidate list
//! (explicit path, `GROOVEKEEPER_CONFIG` env var, `./.groovekeeper.yml`,
//! `~/.groovekeeper.yml`) is merged on top, and `GROOVEKEEPER_CONFIG__`-
//! prefixed environment variables override individual keys (`__` separates
//! path segments). Keys are lower-cased on load so lookups are
//! case-insensitive.
//!
//! Domain crates attach their own typed getters through extension traits on
//! [`Config`] rather than this crate knowing every key.

use anyhow::{anyhow, Result};
use dirs::home_dir;
use lazy_static::lazy_static;
use serde_yaml::{Mapping, Value};
use std::{
    env, fs, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tracing::{info, warn};

// Embedded default configuration
const DEFAULT_CONFIG: &str = include_str!("groovekeeper.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load_config("").expect("Failed to load GrooveKeeper configuration"));
}

const ENV_CONFIG_FILE: &str = "GROOVEKEEPER_CONFIG";
const ENV_PREFIX: &str = "GROOVEKEEPER_CONFIG__";

#[derive(Debug)]
pub struct Config {
    path: Option<String>,
    data: Mutex<Value>,
}

impl Clone for Config {
    fn clone(&self) -> Self {
        let data = self.data.lock().unwrap().clone();
        Self {
            path: self.path.clone(),
            data: Mutex::new(data),
        }
    }
}

impl Config {
    /// Loads the configuration: embedded defaults, then the first readable
    /// candidate file, then env overrides. Remembers a writable location
    /// for [`Config::save`].
    pub fn load_config(filename: &str) -> Result<Self> {
        let mut document: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        let candidates = Self::candidate_paths(filename);
        let mut loaded: Option<String> = None;
        for candidate in &candidates {
            match fs::read(candidate) {
                Ok(bytes) => {
                    let external: Value = serde_yaml::from_slice(&bytes)?;
                    // an empty file parses to null and must not wipe defaults
                    if !external.is_null() {
                        merge_into(&mut document, &external);
                    }
                    info!(config_file = %candidate, "Loaded configuration file");
                    loaded = Some(candidate.clone());
                    break;
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(config_file = %candidate, error = %err, "Cannot read config file, trying the next candidate");
                }
            }
        }
        if loaded.is_none() {
            info!("No configuration file found, using embedded defaults");
        }

        let mut document = lower_keys(document);
        Self::apply_env_overrides(&mut document);

        // prefer persisting back to the file that was loaded
        let path = match &loaded {
            Some(p) if Self::parent_is_writable(p) => Some(p.clone()),
            _ => candidates
                .iter()
                .find(|c| Self::parent_is_writable(c))
                .cloned(),
        };
        match &path {
            Some(p) => info!(config_file = %p, "Config file will be stored here"),
            None => warn!("No writable location for the config file, running read-only"),
        }

        let config = Config {
            path,
            data: Mutex::new(document),
        };
        config.save()?;
        Ok(config)
    }

    /// Builds a config from a YAML string merged over the embedded defaults.
    ///
    /// No file is read or written; the env-var cascade is skipped. Intended
    /// for tests and embedding hosts that manage their own files.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let mut document: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;
        let external: Value = serde_yaml::from_str(yaml)?;
        if !external.is_null() {
            merge_into(&mut document, &external);
        }

        Ok(Config {
            path: None,
            data: Mutex::new(lower_keys(document)),
        })
    }

    /// Locations probed for an external config file, highest priority first.
    fn candidate_paths(filename: &str) -> Vec<String> {
        let mut candidates = Vec::new();
        if !filename.is_empty() {
            candidates.push(filename.to_string());
        }
        if let Ok(env_path) = env::var(ENV_CONFIG_FILE) {
            if !env_path.is_empty() {
                candidates.push(env_path);
            }
        }
        candidates.push(".groovekeeper.yml".to_string());
        if let Some(home) = home_dir() {
            candidates.push(home.join(".groovekeeper.yml").to_string_lossy().to_string());
        }
        candidates
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let data = self.data.lock().unwrap();
        let yaml = serde_yaml::to_string(&*data)?;
        fs::write(path, yaml)?;
        Ok(())
    }

    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        {
            let mut data = self.data.lock().unwrap();
            Self::write_path(&mut data, path, value)?;
        }
        self.save()
    }

    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.data.lock().unwrap();
        Self::read_path(&data, path).map(Clone::clone)
    }

    /// Walks mappings down to the parent of the last segment, creating
    /// sections as needed, and inserts the value there.
    fn write_path(document: &mut Value, segments: &[&str], value: Value) -> Result<()> {
        let Some((last, parents)) = segments.split_last() else {
            *document = value;
            return Ok(());
        };

        let mut node = document;
        for segment in parents {
            let Value::Mapping(map) = node else {
                return Err(anyhow!("{segment} is not a section"));
            };
            node = map
                .entry(Value::String(segment.to_lowercase()))
                .or_insert_with(|| Value::Mapping(Mapping::new()));
        }

        let Value::Mapping(map) = node else {
            return Err(anyhow!("{last} is not a section"));
        };
        map.insert(Value::String(last.to_lowercase()), value);
        Ok(())
    }

    fn read_path<'a>(document: &'a Value, segments: &[&str]) -> Result<&'a Value> {
        segments
            .iter()
            .enumerate()
            .try_fold(document, |node, (depth, segment)| {
                let Value::Mapping(map) = node else {
                    return Err(anyhow!("{} is not a section", segments[..depth].join(".")));
                };
                map.get(&Value::String(segment.to_lowercase()))
                    .ok_or_else(|| anyhow!("{} is not set", segments[..=depth].join(".")))
            })
    }

    /// String at `path`, or `default` when absent, empty, or mistyped.
    pub fn get_string_or(&self, path: &[&str], default: &str) -> String {
        match self.get_value(path) {
            Ok(Value::String(s)) if !s.is_empty() => s,
            Ok(Value::String(_)) | Ok(Value::Null) | Err(_) => default.to_string(),
            Ok(other) => {
                warn!(path = %path.join("."), ?other, "Config value is not a string, using default");
                default.to_string()
            }
        }
    }

    /// Non-negative integer at `path`, or `default` when absent or mistyped.
    pub fn get_u64_or(&self, path: &[&str], default: u64) -> u64 {
        match self.get_value(path) {
            Ok(Value::Number(n)) if n.is_u64() => n.as_u64().unwrap(),
            Ok(Value::Number(n)) if n.is_i64() && n.as_i64().unwrap() >= 0 => {
                n.as_i64().unwrap() as u64
            }
            Ok(Value::String(s)) => match s.parse::<u64>() {
                Ok(v) => v,
                Err(_) => {
                    warn!(path = %path.join("."), value = %s, "Invalid integer in config, using default");
                    default
                }
            },
            Err(_) => default,
            Ok(other) => {
                warn!(path = %path.join("."), ?other, "Config value is not an integer, using default");
                default
            }
        }
    }

    /// Boolean at `path`, or `default` when absent or mistyped.
    pub fn get_bool_or(&self, path: &[&str], default: bool) -> bool {
        match self.get_value(path) {
            Ok(Value::Bool(b)) => b,
            Ok(Value::String(s)) => match s.parse::<bool>() {
                Ok(v) => v,
                Err(_) => {
                    warn!(path = %path.join("."), value = %s, "Invalid boolean in config, using default");
                    default
                }
            },
            Err(_) => default,
            Ok(other) => {
                warn!(path = %path.join("."), ?other, "Config value is not a boolean, using default");
                default
            }
        }
    }

    /// Root directory for durable engine data (queue snapshots live under
    /// `<data_dir>/queues/`).
    pub fn get_data_dir(&self) -> PathBuf {
        PathBuf::from(self.get_string_or(&["host", "data_dir"], "./.groovekeeper"))
    }

    fn apply_env_overrides(document: &mut Value) {
        for (key, raw) in env::vars().filter(|(k, _)| k.starts_with(ENV_PREFIX)) {
            let segments: Vec<&str> = key[ENV_PREFIX.len()..].split("__").collect();
            // values that parse as YAML keep their type, anything else is a string
            let value =
                serde_yaml::from_str(&raw).unwrap_or_else(|_| Value::String(raw.clone()));
            if Self::write_path(document, &segments, value).is_err() {
                warn!(var = %key, "Ignoring malformed configuration override");
            }
        }
    }

    fn parent_is_writable(path: &str) -> bool {
        let parent = match Path::new(path).parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::metadata(parent)
            .map(|m| !m.permissions().readonly())
            .unwrap_or(false)
    }
}

/// Returns the global configuration instance.
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

/// Deep-merges `overlay` into `base`: mappings merge key by key, anything
/// else is replaced wholesale.
fn merge_into(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) => merge_into(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Lower-cases every string key so lookups are case-insensitive.
fn lower_keys(value: Value) -> Value {
    match value {
        Value::Mapping(map) => Value::Mapping(
            map.into_iter()
                .map(|(key, value)| {
                    let key = match key {
                        Value::String(s) => Value::String(s.to_lowercase()),
                        other => other,
                    };
                    (key, lower_keys(value))
                })
                .collect(),
        ),
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(lower_keys).collect()),
        scalar => scalar,
    }
}
