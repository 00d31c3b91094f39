use crate::error::{Result, SessionError};
use crate::scene::Scene;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Maximum number of records kept in history unless a session asks for another depth.
pub const DEFAULT_DEPTH: usize = 53;

/// Settings schema stored in `_settings.json`.
///
/// Applications with their own settings implement this for their type and open a
/// `Session<TheirSettings>`. The two switches drive how eagerly `Session::set` writes.
pub trait SessionSettings:
    Serialize + DeserializeOwned + Default + Clone + fmt::Debug + Send + 'static
{
    /// Write each data entry to `data/<key>.json` as soon as it is set.
    fn autosync(&self) -> bool;

    /// Dump the complete session state after each data mutation.
    fn autosave(&self) -> bool;

    /// Update one top-level field by round-tripping through JSON.
    fn set_field(&mut self, key: &str, value: Value) -> Result<()> {
        let mut fields = match serde_json::to_value(&*self)? {
            Value::Object(map) => map,
            _ => return Err(SessionError::UnknownSetting(key.to_string())),
        };
        fields.insert(key.to_string(), value);
        *self = serde_json::from_value(Value::Object(fields))?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub autosave: bool,
    #[serde(default = "default_autosync")]
    pub autosync: bool,
    /// Keys written by other tools are kept so a dump does not drop them.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn default_autosync() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            autosave: false,
            autosync: true,
            extra: BTreeMap::new(),
        }
    }
}

impl SessionSettings for Settings {
    fn autosync(&self) -> bool {
        self.autosync
    }

    fn autosave(&self) -> bool {
        self.autosave
    }
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "autosave={} autosync={}", self.autosave, self.autosync)?;
        for (key, value) in &self.extra {
            write!(f, " {key}={value}")?;
        }
        Ok(())
    }
}

/// Geometric tolerances persisted alongside the session state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tolerance {
    pub absolute: f64,
    pub relative: f64,
    pub angular: f64,
    pub approximation: f64,
    pub precision: u32,
    pub lineardeflection: f64,
    pub angulardeflection: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            absolute: 1e-9,
            relative: 1e-6,
            angular: 1e-6,
            approximation: 1e-3,
            precision: 3,
            lineardeflection: 1e-3,
            angulardeflection: 1e-1,
        }
    }
}

impl fmt::Display for Tolerance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "absolute={:e} relative={:e} angular={:e} precision={}",
            self.absolute, self.relative, self.angular, self.precision
        )
    }
}

/// One named state in the undo/redo log. `id` doubles as the folder name under `__records`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl HistoryRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

/// Contents of `_history.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryState {
    pub depth: usize,
    #[serde(with = "current_index")]
    pub current: Option<usize>,
    pub records: Vec<HistoryRecord>,
}

impl Default for HistoryState {
    fn default() -> Self {
        Self {
            depth: DEFAULT_DEPTH,
            current: None,
            records: Vec::new(),
        }
    }
}

/// The history pointer is stored as a signed index with -1 meaning "no record".
mod current_index {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<usize>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(index) => serializer.serialize_i64(*index as i64),
            None => serializer.serialize_i64(-1),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<usize>, D::Error> {
        let raw = i64::deserialize(deserializer)?;
        Ok(usize::try_from(raw).ok())
    }
}

/// Parameters for opening a session directory.
#[derive(Debug, Clone)]
pub struct SessionOptions<S = Settings> {
    pub name: Option<String>,
    pub basedir: Option<PathBuf>,
    pub depth: Option<usize>,
    pub scene: Option<Scene>,
    pub settings: Option<S>,
    pub delete_existing: bool,
}

impl<S> Default for SessionOptions<S> {
    fn default() -> Self {
        Self {
            name: None,
            basedir: None,
            depth: None,
            scene: None,
            settings: None,
            delete_existing: false,
        }
    }
}

impl<S> SessionOptions<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_basedir(mut self, basedir: impl Into<PathBuf>) -> Self {
        self.basedir = Some(basedir.into());
        self
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn with_scene(mut self, scene: Scene) -> Self {
        self.scene = Some(scene);
        self
    }

    pub fn with_settings(mut self, settings: S) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn delete_existing(mut self, delete: bool) -> Self {
        self.delete_existing = delete;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::default();
        assert!(!settings.autosave);
        assert!(settings.autosync);
    }

    #[test]
    fn test_settings_missing_fields_use_defaults() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_settings_keep_unknown_keys() {
        let settings: Settings =
            serde_json::from_str(r#"{"autosave": true, "layer": "walls"}"#).unwrap();
        assert!(settings.autosave);
        assert_eq!(settings.extra.get("layer"), Some(&Value::from("walls")));

        let json = serde_json::to_value(&settings).unwrap();
        assert_eq!(json["layer"], "walls");
    }

    #[test]
    fn test_settings_set_field() {
        let mut settings = Settings::default();
        settings.set_field("autosave", Value::Bool(true)).unwrap();
        settings.set_field("units", Value::from("mm")).unwrap();
        assert!(settings.autosave);
        assert_eq!(settings.extra.get("units"), Some(&Value::from("mm")));
    }

    #[test]
    fn test_settings_set_field_rejects_wrong_type() {
        let mut settings = Settings::default();
        assert!(settings.set_field("autosync", Value::from("yes")).is_err());
        assert!(settings.autosync);
    }

    #[test]
    fn test_history_state_empty_pointer_is_minus_one() {
        let state = HistoryState::default();
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["current"], -1);
        assert_eq!(json["depth"], 53);

        let back: HistoryState = serde_json::from_value(json).unwrap();
        assert_eq!(back.current, None);
    }

    #[test]
    fn test_history_state_pointer() {
        let state: HistoryState =
            serde_json::from_str(r#"{"depth": 10, "current": 2, "records": []}"#).unwrap();
        assert_eq!(state.current, Some(2));
        assert_eq!(state.depth, 10);
    }

    #[test]
    fn test_tolerance_partial_file() {
        let tol: Tolerance = serde_json::from_str(r#"{"absolute": 0.001}"#).unwrap();
        assert_eq!(tol.absolute, 0.001);
        assert_eq!(tol.precision, 3);
    }

    #[test]
    fn test_options_builder() {
        let options: SessionOptions = SessionOptions::new()
            .with_name("bridge")
            .with_depth(5)
            .delete_existing(true);
        assert_eq!(options.name.as_deref(), Some("bridge"));
        assert_eq!(options.depth, Some(5));
        assert!(options.delete_existing);
        assert!(options.basedir.is_none());
    }
}
