//! Per-plugin file storage
//!
//! Every plugin `P` owns up to four files next to each other:
//! `P.json` (data), `P_state.json` (dynamic registrations and timer runs),
//! `P.yaml` (configuration) and `P.pkl` (legacy data, read once).
//! Directory based plugins keep them in `plugins/P/`, single-file plugins
//! directly in `plugins/`.

use chrono::NaiveDateTime;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

use crate::application::errors::StorageError;

const DATA_FORMAT_VERSION: u32 = 1;

/// A persisted value together with the name of the type that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataEntry {
    #[serde(rename = "type")]
    pub type_name: String,
    pub value: Value,
}

impl DataEntry {
    pub fn new(type_name: impl Into<String>, value: Value) -> Self {
        Self {
            type_name: type_name.into(),
            value,
        }
    }

    /// Entry for values that arrived without a type tag
    pub fn untyped(value: Value) -> Self {
        Self::new("any", value)
    }
}

pub type PluginData = BTreeMap<String, DataEntry>;

#[derive(Debug, Serialize, Deserialize)]
struct DataFile {
    version: u32,
    data: PluginData,
}

/// Locations of a single plugin's files
#[derive(Debug, Clone)]
pub struct PluginStore {
    name: String,
    plugins_dir: PathBuf,
    basepath: PathBuf,
    is_directory_based: bool,
}

impl PluginStore {
    /// A plugin is directory based when `plugins_dir/name` is a directory
    pub fn new(plugins_dir: impl Into<PathBuf>, name: &str) -> Self {
        let plugins_dir = plugins_dir.into();
        let plugin_dir = plugins_dir.join(name);
        let is_directory_based = plugin_dir.is_dir();
        let basepath = if is_directory_based {
            plugin_dir.join(name)
        } else {
            plugins_dir.join(name)
        };

        Self {
            name: name.to_string(),
            plugins_dir,
            basepath,
            is_directory_based,
        }
    }

    pub fn is_directory_based(&self) -> bool {
        self.is_directory_based
    }

    pub fn data_path(&self) -> PathBuf {
        self.with_suffix(".json")
    }

    pub fn legacy_path(&self) -> PathBuf {
        self.with_suffix(".pkl")
    }

    pub fn state_path(&self) -> PathBuf {
        self.with_suffix("_state.json")
    }

    pub fn config_path(&self) -> PathBuf {
        self.with_suffix(".yaml")
    }

    /// Data file of the layout before plugins had their own directory
    pub fn abandoned_path(&self) -> PathBuf {
        self.plugins_dir.join(format!("{}.json", self.name))
    }

    fn with_suffix(&self, suffix: &str) -> PathBuf {
        let mut path = self.basepath.clone().into_os_string();
        path.push(suffix);
        PathBuf::from(path)
    }

    /// Load the plugin's data, migrating older files on the way.
    ///
    /// Never fails: unreadable files are logged and yield empty data.
    pub fn load_data(&self) -> PluginData {
        let data_path = self.data_path();
        let legacy_path = self.legacy_path();

        if data_path.is_file() {
            if legacy_path.is_file() {
                warn!(
                    "Data for {} read from {}, but {} still exists. After verifying that {} is running correctly, please remove {}",
                    self.name,
                    data_path.display(),
                    legacy_path.display(),
                    self.name,
                    legacy_path.display()
                );
            }
            return self.read_or_empty(&data_path, read_data_file);
        }

        if legacy_path.is_file() {
            warn!(
                "Reading data for {} from pickle. This should only happen once. Data will be stored in new format.",
                self.name
            );
            let data = self.read_or_empty(&legacy_path, read_pickle_file);
            if !data.is_empty() {
                warn!(
                    "Converting data for {} to {}. This should only happen once.",
                    self.name,
                    data_path.display()
                );
                if self.write_data(&data_path, &data).is_ok() {
                    warn!("You may remove {} now, it is no longer being used.", legacy_path.display());
                }
            }
            return data;
        }

        if self.is_directory_based {
            let abandoned = self.abandoned_path();
            if abandoned.is_file() {
                warn!(
                    "Loading abandoned data for {} from {}. This should only happen once.",
                    self.name,
                    abandoned.display()
                );
                let data = self.read_or_empty(&abandoned, read_data_file);
                if !data.is_empty() && self.write_data(&data_path, &data).is_ok() {
                    warn!("You may remove {} now, it is no longer being used.", abandoned.display());
                }
                return data;
            }
        }

        debug!("No data found for {}, plugin data will be empty", self.name);
        PluginData::new()
    }

    fn read_or_empty(&self, path: &Path, reader: fn(&Path) -> Result<PluginData, StorageError>) -> PluginData {
        match reader(path) {
            Ok(data) => data,
            Err(e) => {
                error!("Could not load plugin data for {} from {}: {}", self.name, path.display(), e);
                PluginData::new()
            }
        }
    }

    /// Persist `data`; empty data removes the data files instead
    pub fn save_data(&self, data: &PluginData) -> Result<(), StorageError> {
        if data.is_empty() {
            debug!("No data to save for {}, removing data files", self.name);
            remove_if_exists(&self.legacy_path())?;
            remove_if_exists(&self.data_path())?;
            return Ok(());
        }
        self.write_data(&self.data_path(), data)
    }

    /// Write `data` to `P.json.bak.<YYYYMMDD-HHMMSS>` and return that path.
    ///
    /// Returns `None` if there is nothing to back up.
    pub fn backup_data(&self, data: &PluginData, now: NaiveDateTime) -> Result<Option<PathBuf>, StorageError> {
        if data.is_empty() {
            return Ok(None);
        }
        let mut path = self.data_path().into_os_string();
        path.push(format!(".bak.{}", now.format("%Y%m%d-%H%M%S")));
        let path = PathBuf::from(path);

        self.write_data(&path, data)?;
        Ok(Some(path))
    }

    fn write_data(&self, path: &Path, data: &PluginData) -> Result<(), StorageError> {
        let file = DataFile {
            version: DATA_FORMAT_VERSION,
            data: data.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;
        write_atomic(path, &bytes).map_err(|e| {
            error!("Could not write plugin data to {}: {}", path.display(), e);
            e
        })
    }

    /// Persist a state snapshot, or remove the state file if `is_empty`
    pub fn save_state<T: Serialize>(&self, state: &T, is_empty: bool) -> Result<(), StorageError> {
        let path = self.state_path();
        if is_empty {
            return remove_if_exists(&path);
        }
        let bytes = serde_json::to_vec_pretty(state)?;
        write_atomic(&path, &bytes).map_err(|e| {
            error!("Could not write plugin state to {}: {}", path.display(), e);
            e
        })
    }

    /// Read the state snapshot, `None` if missing or unreadable
    pub fn load_state<T: DeserializeOwned>(&self) -> Option<T> {
        let path = self.state_path();
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("Could not load plugin state from {}: {}", path.display(), e);
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(state) => Some(state),
            Err(e) => {
                error!("Could not decode plugin state from {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Read `P.yaml` as a mapping, `None` if absent or unreadable
    pub fn load_config(&self) -> Option<serde_yaml::Mapping> {
        let path = self.config_path();
        if !path.exists() {
            return None;
        }
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                warn!("Error loading {}: {}", path.display(), e);
                return None;
            }
        };
        match serde_yaml::from_str::<serde_yaml::Value>(&content) {
            Ok(serde_yaml::Value::Mapping(map)) => Some(map),
            Ok(serde_yaml::Value::Null) => None,
            Ok(_) => {
                warn!("{} is not a mapping, ignoring it", path.display());
                None
            }
            Err(e) => {
                warn!("Error parsing {}: {}", path.display(), e);
                None
            }
        }
    }
}

fn read_data_file(path: &Path) -> Result<PluginData, StorageError> {
    let bytes = std::fs::read(path)?;
    let value: Value = serde_json::from_slice(&bytes)?;

    if value.get("version").is_some() && value.get("data").is_some() {
        let file: DataFile = serde_json::from_value(value)?;
        return Ok(file.data);
    }

    match value {
        Value::Object(map) => Ok(map
            .into_iter()
            .map(|(k, v)| (k, DataEntry::untyped(v)))
            .collect()),
        Value::Null => Ok(PluginData::new()),
        _ => Err(StorageError::Serialization(format!(
            "{} does not contain an object",
            path.display()
        ))),
    }
}

fn read_pickle_file(path: &Path) -> Result<PluginData, StorageError> {
    let bytes = std::fs::read(path)?;
    let options = serde_pickle::DeOptions::new().replace_unresolved_globals();
    let map: BTreeMap<String, Value> =
        serde_pickle::from_slice(&bytes, options).map_err(|e| StorageError::Legacy(e.to_string()))?;

    Ok(map
        .into_iter()
        .map(|(k, v)| (k, DataEntry::untyped(v)))
        .collect())
}

/// Write to `<path>.tmp` and rename over `path`
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<(), StorageError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            error!("Could not remove file {}: {}", path.display(), e);
            Err(e.into())
        }
    }
}
