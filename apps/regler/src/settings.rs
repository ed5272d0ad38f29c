use crate::error::PersistenceError;
use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

const COMMENT: &str = "#";

/// A setting as it arrived: settings published on the bus are strings,
/// settings written by hand are usually numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Number(f64),
    Text(String),
}

impl SettingValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SettingValue::Number(n) => Some(*n),
            SettingValue::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl From<f64> for SettingValue {
    fn from(v: f64) -> Self {
        SettingValue::Number(v)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("setting {name} is not a number: {value:?}")]
pub struct InvalidSetting {
    pub name: &'static str,
    pub value: SettingValue,
}

/// Tunable control parameters: `nominal = a * outside_air_temp + b`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub a: SettingValue,
    pub b: SettingValue,
    pub tolerance: SettingValue,
    pub mode: String,
    pub modified: NaiveDateTime,
    // Anything else an operator published; kept so it round-trips.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            a: SettingValue::Number(-0.2),
            b: SettingValue::Number(28.0),
            tolerance: SettingValue::Number(1.0),
            mode: "auto".to_string(),
            modified: Local::now().naive_local(),
            extra: BTreeMap::new(),
        }
    }
}

impl Settings {
    pub fn a(&self) -> Result<f64, InvalidSetting> {
        coerce("a", &self.a)
    }

    pub fn b(&self) -> Result<f64, InvalidSetting> {
        coerce("b", &self.b)
    }

    pub fn tolerance(&self) -> Result<f64, InvalidSetting> {
        coerce("tolerance", &self.tolerance)
    }

    /// Stores the raw value; coercion happens when the value is used.
    pub fn set(&mut self, name: &str, raw: &str) {
        match name {
            "a" => self.a = SettingValue::Text(raw.to_string()),
            "b" => self.b = SettingValue::Text(raw.to_string()),
            "tolerance" => self.tolerance = SettingValue::Text(raw.to_string()),
            "mode" => self.mode = raw.to_string(),
            "modified" => debug!("ignoring externally supplied modification time"),
            _ => {
                self.extra
                    .insert(name.to_string(), Value::String(raw.to_string()));
            }
        }
    }

    /// Equality ignoring the modification time.
    pub fn same_values(&self, other: &Settings) -> bool {
        self.a == other.a
            && self.b == other.b
            && self.tolerance == other.tolerance
            && self.mode == other.mode
            && self.extra == other.extra
    }
}

fn coerce(name: &'static str, value: &SettingValue) -> Result<f64, InvalidSetting> {
    value.as_f64().ok_or_else(|| InvalidSetting {
        name,
        value: value.clone(),
    })
}

/// Append-only settings log: one JSON object per line, the last valid line
/// wins, `#` lines are comments. Prior lines are never rewritten.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    persisted: Settings,
}

impl SettingsStore {
    /// Loads the newest settings from `path`, or keeps `defaults` when the
    /// log holds none.
    pub fn open(
        path: impl Into<PathBuf>,
        defaults: Settings,
    ) -> Result<(SettingsStore, Settings), PersistenceError> {
        let path = path.into();
        let settings = match load(&path)? {
            Some(s) => s,
            None => {
                info!("no stored settings in {}, using defaults", path.display());
                defaults
            }
        };
        let store = SettingsStore {
            path,
            persisted: settings.clone(),
        };
        Ok((store, settings))
    }

    /// Appends `settings` if they differ from the last persisted snapshot,
    /// stamping `modified` first. Returns whether a line was written.
    pub fn persist_if_changed(&mut self, settings: &mut Settings) -> Result<bool, PersistenceError> {
        if settings.same_values(&self.persisted) {
            return Ok(false);
        }
        settings.modified = Local::now().naive_local();
        let mut line = serde_json::to_string(settings)?;
        line.push('\n');
        self.append(line.as_bytes()).map_err(|source| PersistenceError::Io {
            path: self.path.clone(),
            source,
        })?;
        self.persisted = settings.clone();
        info!("settings stored: {}", line.trim_end());
        Ok(true)
    }

    fn append(&self, line: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line)?;
        file.sync_data()
    }
}

pub fn load(path: &Path) -> Result<Option<Settings>, PersistenceError> {
    let io_err = |source| PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!("settings file {} does not exist", path.display());
            return Ok(None);
        }
        Err(e) => return Err(io_err(e)),
    };

    let mut last = None;
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(io_err)?;
        let line = line.trim();
        if line.is_empty() || line.starts_with(COMMENT) {
            continue;
        }
        match serde_json::from_str::<Settings>(line) {
            Ok(s) => last = Some(s),
            Err(e) => warn!("{}:{}: skipping malformed settings: {e}", path.display(), n + 1),
        }
    }
    if let Some(s) = &last {
        info!("settings loaded: {}", serde_json::to_string(s)?);
    }
    Ok(last)
}
