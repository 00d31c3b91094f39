use crate::error::{IoContext, Result, SessionError};
use crate::scene::Scene;
use crate::store::{copy_dir, read_json, read_json_if_exists, remove_dir, remove_file, write_json};
use crate::types::{
    HistoryRecord, HistoryState, SessionOptions, SessionSettings, Settings, Tolerance,
    DEFAULT_DEPTH,
};
use chrono::Utc;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

const DATA_DIR: &str = "data";
const RECORDS_DIR: &str = "__records";
const TEMP_DIR: &str = "__temp";
const HISTORY_FILE: &str = "_history.json";
const SCENE_FILE: &str = "_scene.json";
const SETTINGS_FILE: &str = "_settings.json";
const TOLERANCE_FILE: &str = "_tolerance.json";
const VERSION_FILE: &str = "_version.json";

/// Files captured next to `data/` in every history record.
const STATE_FILES: [&str; 4] = [SCENE_FILE, SETTINGS_FILE, TOLERANCE_FILE, VERSION_FILE];

const CRATE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Data keys become file names under `data/`.
static KEY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]*$").expect("key pattern compiles"));

/// Application state persisted in `<basedir>/<name>.session`.
///
/// Data entries, the scene and the settings are loaded lazily: nothing is read from
/// disk until it is first asked for, and undo/redo drops the in-memory copies so the
/// restored files are picked up on the next access.
#[derive(Debug)]
pub struct Session<S: SessionSettings = Settings> {
    name: String,
    timestamp: i64,
    basedir: PathBuf,
    history: HistoryState,
    default_depth: usize,
    data: BTreeMap<String, Value>,
    settings: Option<S>,
    scene: Option<Scene>,
    tolerance: Tolerance,
}

/// Resolve the session name and base directory the same way `Session::open` does.
pub(crate) fn resolve_identity<S>(options: &SessionOptions<S>) -> Result<(String, PathBuf)> {
    let basedir = match &options.basedir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().at(".")?,
    };
    let name = options
        .name
        .clone()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| {
            basedir
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "session".to_string())
        });
    Ok((name, basedir))
}

impl<S: SessionSettings> Session<S> {
    /// Open (or create) the session directory and load its history.
    pub fn open(options: SessionOptions<S>) -> Result<Self> {
        let (name, basedir) = resolve_identity(&options)?;
        let default_depth = options.depth.unwrap_or(DEFAULT_DEPTH).max(1);

        let mut session = Self {
            name,
            timestamp: Utc::now().timestamp(),
            basedir,
            history: HistoryState {
                depth: default_depth,
                ..HistoryState::default()
            },
            default_depth,
            data: BTreeMap::new(),
            settings: options.settings,
            scene: options.scene,
            tolerance: Tolerance::default(),
        };

        if options.delete_existing {
            session.delete_dirs()?;
        }
        remove_dir(&session.tempdir())?;
        session.create_dirs()?;
        session.check_version()?;
        session.load_tolerance()?;
        session.load_history()?;
        if let Some(depth) = options.depth {
            session.history.depth = depth.max(1);
        }

        debug!(
            session = %session.name,
            dir = %session.sessiondir().display(),
            records = session.history.records.len(),
            "opened session"
        );
        Ok(session)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unix timestamp (seconds) of when this instance was opened.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn basedir(&self) -> &Path {
        &self.basedir
    }

    pub fn sessiondir(&self) -> PathBuf {
        self.basedir.join(format!("{}.session", self.name))
    }

    pub fn datadir(&self) -> PathBuf {
        self.sessiondir().join(DATA_DIR)
    }

    pub fn recordsdir(&self) -> PathBuf {
        self.sessiondir().join(RECORDS_DIR)
    }

    pub fn tempdir(&self) -> PathBuf {
        self.sessiondir().join(TEMP_DIR)
    }

    pub fn historyfile(&self) -> PathBuf {
        self.sessiondir().join(HISTORY_FILE)
    }

    pub fn scenefile(&self) -> PathBuf {
        self.sessiondir().join(SCENE_FILE)
    }

    pub fn settingsfile(&self) -> PathBuf {
        self.sessiondir().join(SETTINGS_FILE)
    }

    pub fn tolerancefile(&self) -> PathBuf {
        self.sessiondir().join(TOLERANCE_FILE)
    }

    pub fn versionfile(&self) -> PathBuf {
        self.sessiondir().join(VERSION_FILE)
    }

    /// Index of the active history record, `None` when nothing has been recorded.
    pub fn current(&self) -> Option<usize> {
        self.history.current
    }

    pub fn depth(&self) -> usize {
        self.history.depth
    }

    pub fn history(&self) -> &[HistoryRecord] {
        &self.history.records
    }

    pub fn tolerance(&self) -> &Tolerance {
        &self.tolerance
    }

    pub fn set_tolerance(&mut self, tolerance: Tolerance) {
        self.tolerance = tolerance;
    }

    // ------------------------------------------------------------------
    // Directories
    // ------------------------------------------------------------------

    pub fn delete_dirs(&self) -> Result<()> {
        remove_dir(&self.sessiondir())
    }

    pub fn create_dirs(&self) -> Result<()> {
        for dir in [
            self.sessiondir(),
            self.tempdir(),
            self.recordsdir(),
            self.datadir(),
        ] {
            fs::create_dir_all(&dir).at(&dir)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Scene and settings
    // ------------------------------------------------------------------

    pub fn scene(&mut self) -> Result<&Scene> {
        self.scene_mut().map(|scene| &*scene)
    }

    pub fn scene_mut(&mut self) -> Result<&mut Scene> {
        if self.scene.is_none() {
            self.load_scene()?;
        }
        Ok(self.scene.get_or_insert_with(Scene::default))
    }

    pub fn set_scene(&mut self, scene: Scene) {
        self.scene = Some(scene);
    }

    pub fn settings(&mut self) -> Result<&S> {
        self.settings_mut().map(|settings| &*settings)
    }

    pub fn settings_mut(&mut self) -> Result<&mut S> {
        if self.settings.is_none() {
            self.load_settings()?;
        }
        Ok(self.settings.get_or_insert_with(S::default))
    }

    pub fn set_settings(&mut self, settings: S) {
        self.settings = Some(settings);
    }

    pub fn load_scene(&mut self) -> Result<()> {
        if let Some(scene) = read_json_if_exists(&self.scenefile())? {
            debug!(session = %self.name, "loaded scene from disk");
            self.scene = Some(scene);
        }
        Ok(())
    }

    pub fn dump_scene(&mut self) -> Result<()> {
        let path = self.scenefile();
        write_json(&path, self.scene()?)
    }

    pub fn load_settings(&mut self) -> Result<()> {
        if let Some(settings) = read_json_if_exists(&self.settingsfile())? {
            debug!(session = %self.name, "loaded settings from disk");
            self.settings = Some(settings);
        }
        Ok(())
    }

    pub fn dump_settings(&mut self) -> Result<()> {
        let path = self.settingsfile();
        write_json(&path, self.settings()?)
    }

    pub fn load_tolerance(&mut self) -> Result<()> {
        if let Some(tolerance) = read_json_if_exists(&self.tolerancefile())? {
            self.tolerance = tolerance;
        }
        Ok(())
    }

    pub fn dump_tolerance(&self) -> Result<()> {
        write_json(&self.tolerancefile(), &self.tolerance)
    }

    /// Warn when the session was written by a newer major version of this crate.
    fn check_version(&self) -> Result<()> {
        let Some(written) = read_json_if_exists::<String>(&self.versionfile())? else {
            return Ok(());
        };
        match (
            semver::Version::parse(&written),
            semver::Version::parse(CRATE_VERSION),
        ) {
            (Ok(written), Ok(ours)) if written.major > ours.major => {
                warn!(
                    session = %self.name,
                    written = %written,
                    ours = %ours,
                    "session was written by a newer major version"
                );
            }
            (Err(err), _) => {
                warn!(session = %self.name, version = %written, "unreadable session version: {err}");
            }
            _ => {}
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Data
    // ------------------------------------------------------------------

    fn data_path(&self, key: &str) -> PathBuf {
        self.datadir().join(format!("{key}.json"))
    }

    /// Value for `key`, loading `data/<key>.json` on first access.
    pub fn get(&mut self, key: &str) -> Result<Option<&Value>> {
        let path = self.data_path(key);
        self.get_from(key, &path)
    }

    /// Value for `key`, loading it from `filepath` if it is not held in memory yet.
    pub fn get_from(&mut self, key: &str, filepath: &Path) -> Result<Option<&Value>> {
        validate_key(key)?;
        if !self.data.contains_key(key) && filepath.exists() {
            if filepath.extension().and_then(|ext| ext.to_str()) != Some("json") {
                return Err(SessionError::UnsupportedFormat(filepath.to_path_buf()));
            }
            let value: Value = read_json(filepath)?;
            debug!(session = %self.name, key, "loaded data entry");
            self.data.insert(key.to_string(), value);
        }
        Ok(self.data.get(key))
    }

    pub fn get_or(&mut self, key: &str, default: Value) -> Result<Value> {
        Ok(self.get(key)?.cloned().unwrap_or(default))
    }

    /// Deserialize the value for `key` into `T`.
    pub fn get_as<T: DeserializeOwned>(&mut self, key: &str) -> Result<Option<T>> {
        match self.get(key)? {
            Some(value) => Ok(Some(T::deserialize(value)?)),
            None => Ok(None),
        }
    }

    pub fn contains(&mut self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Keys held in memory plus keys stored under `data/`, sorted.
    pub fn keys(&self) -> Result<Vec<String>> {
        let mut keys: BTreeSet<String> = self.data.keys().cloned().collect();
        let datadir = self.datadir();
        if datadir.is_dir() {
            for entry in fs::read_dir(&datadir).at(&datadir)? {
                let path = entry.at(&datadir)?.path();
                if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                    if KEY_PATTERN.is_match(stem) {
                        keys.insert(stem.to_string());
                    }
                }
            }
        }
        Ok(keys.into_iter().collect())
    }

    /// Store `value` under `key`, syncing to disk according to the settings.
    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> Result<()> {
        validate_key(key)?;
        let value = serde_json::to_value(value)?;
        let (autosync, autosave) = {
            let settings = self.settings()?;
            (settings.autosync(), settings.autosave())
        };

        if autosync {
            write_json(&self.data_path(key), &value)?;
        }
        self.data.insert(key.to_string(), value);

        if autosave {
            self.dump()?;
        }
        Ok(())
    }

    /// Value for `key`, storing the result of `factory` first if the key is missing.
    pub fn setdefault<T, F>(&mut self, key: &str, factory: F) -> Result<&Value>
    where
        T: Serialize,
        F: FnOnce() -> T,
    {
        if !self.contains(key)? {
            self.set(key, factory())?;
        }
        Ok(&*self.data.entry(key.to_string()).or_insert(Value::Null))
    }

    /// Drop `key` from memory and from `data/`.
    pub fn remove(&mut self, key: &str) -> Result<Option<Value>> {
        let previous = self.get(key)?.cloned();
        self.data.remove(key);
        remove_file(&self.data_path(key))?;
        Ok(previous)
    }

    /// Read a JSON file outside the session, optionally picking one top-level field.
    pub fn get_from_file(&self, filepath: &Path, field: Option<&str>) -> Result<Option<Value>> {
        let mut value: Value = read_json(filepath)?;
        Ok(match field {
            Some(field) => value.get_mut(field).map(Value::take),
            None => Some(value),
        })
    }

    /// Like `get_from_file`, storing the value under `key` when one was found.
    pub fn set_from_file(
        &mut self,
        key: &str,
        filepath: &Path,
        field: Option<&str>,
    ) -> Result<Option<Value>> {
        let value = self.get_from_file(filepath, field)?;
        if let Some(value) = &value {
            self.set(key, value)?;
        }
        Ok(value)
    }

    // ------------------------------------------------------------------
    // Complete state
    // ------------------------------------------------------------------

    /// Write history, scene, settings, tolerance, version and in-memory data.
    pub fn dump(&mut self) -> Result<()> {
        let sessiondir = self.sessiondir();
        self.dump_to(&sessiondir)
    }

    /// Write the complete session layout into `dir`.
    ///
    /// When `dir` is not this session's own directory, entries that only live on disk
    /// are copied along so the export is complete.
    pub fn dump_to(&mut self, dir: &Path) -> Result<()> {
        let datadir = dir.join(DATA_DIR);
        fs::create_dir_all(&datadir).at(&datadir)?;
        let own = same_dir(dir, &self.sessiondir())?;

        if !own {
            copy_dir(&self.datadir(), &datadir)?;
        }

        write_json(&dir.join(HISTORY_FILE), &self.history)?;
        write_json(&dir.join(SCENE_FILE), self.scene()?)?;
        write_json(&dir.join(SETTINGS_FILE), self.settings()?)?;
        write_json(&dir.join(TOLERANCE_FILE), &self.tolerance)?;
        write_json(&dir.join(VERSION_FILE), CRATE_VERSION)?;

        for (key, value) in &self.data {
            write_json(&datadir.join(format!("{key}.json")), value)?;
        }
        debug!(session = %self.name, dir = %dir.display(), "dumped session state");
        Ok(())
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    pub fn load_history(&mut self) -> Result<()> {
        if let Some(mut history) = read_json_if_exists::<HistoryState>(&self.historyfile())? {
            history.depth = history.depth.max(1);
            history.current = match history.current {
                Some(index) if index < history.records.len() => Some(index),
                _ if history.records.is_empty() => None,
                _ => Some(history.records.len() - 1),
            };
            self.history = history;
        }
        Ok(())
    }

    pub fn dump_history(&self) -> Result<()> {
        write_json(&self.historyfile(), &self.history)
    }

    /// Forget every record and delete the snapshot folders.
    pub fn clear_history(&mut self) -> Result<()> {
        for record in std::mem::take(&mut self.history.records) {
            self.remove_record_dir(&record);
        }
        self.history.current = None;
        self.history.depth = self.default_depth;
        self.dump_history()
    }

    /// Snapshot the current state as a new history record named `name`.
    ///
    /// The snapshot folder is complete before the history points at it. Records after
    /// the current one are discarded, and the oldest records are evicted once the
    /// history grows beyond `depth`.
    pub fn record(&mut self, name: &str) -> Result<&HistoryRecord> {
        self.dump()?;

        let id = self.next_record_id();
        let folder = self.recordsdir().join(&id);
        if let Err(err) = self.fill_record(&folder) {
            if let Err(cleanup) = remove_dir(&folder) {
                warn!(session = %self.name, record = %id, "failed to remove partial record: {cleanup}");
            }
            return Err(err);
        }

        if let Some(current) = self.history.current {
            if current + 1 < self.history.records.len() {
                let dropped: Vec<HistoryRecord> =
                    self.history.records.drain(current + 1..).collect();
                for record in &dropped {
                    self.remove_record_dir(record);
                }
            }
        }

        self.history.records.push(HistoryRecord::new(id, name));

        let len = self.history.records.len();
        if len > self.history.depth {
            let evicted: Vec<HistoryRecord> =
                self.history.records.drain(..len - self.history.depth).collect();
            for record in &evicted {
                self.remove_record_dir(record);
            }
        }
        self.history.current = Some(self.history.records.len() - 1);
        self.dump_history()?;

        let record = &self.history.records[self.history.records.len() - 1];
        info!(session = %self.name, record = %record.id, "recorded '{}'", record.name);
        Ok(record)
    }

    /// Copy `data/` and the state files into a new record folder.
    fn fill_record(&self, folder: &Path) -> Result<()> {
        fs::create_dir_all(folder).at(folder)?;
        copy_dir(&self.datadir(), &folder.join(DATA_DIR))?;
        let sessiondir = self.sessiondir();
        for file in STATE_FILES {
            let source = sessiondir.join(file);
            fs::copy(&source, folder.join(file)).at(&source)?;
        }
        Ok(())
    }

    /// Step back one record. Returns `false` when there is nothing left to undo.
    pub fn undo(&mut self) -> Result<bool> {
        match self.history.current {
            None => {
                info!(session = %self.name, "nothing to undo");
                Ok(false)
            }
            Some(0) => {
                info!(session = %self.name, "nothing more to undo");
                Ok(false)
            }
            Some(current) => {
                self.restore(current - 1)?;
                Ok(true)
            }
        }
    }

    /// Step forward one record. Returns `false` when there is nothing left to redo.
    pub fn redo(&mut self) -> Result<bool> {
        let next = self.history.current.map_or(0, |current| current + 1);
        if next >= self.history.records.len() {
            info!(session = %self.name, "nothing more to redo");
            return Ok(false);
        }
        self.restore(next)?;
        Ok(true)
    }

    /// Replace the working files with the snapshot of record `index`.
    fn restore(&mut self, index: usize) -> Result<()> {
        let record = self.history.records[index].clone();
        let folder = self.recordsdir().join(&record.id);
        let complete = folder.join(DATA_DIR).is_dir()
            && STATE_FILES.iter().all(|file| folder.join(file).is_file());
        if !complete {
            return Err(SessionError::MissingRecord {
                id: record.id,
                name: record.name,
                path: folder,
            });
        }

        info!(session = %self.name, record = %record.id, "loading '{}'", record.name);

        // Stage the copy so a failed read leaves the working data in place.
        let staged = self.tempdir().join(DATA_DIR);
        remove_dir(&staged)?;
        copy_dir(&folder.join(DATA_DIR), &staged)?;
        let datadir = self.datadir();
        remove_dir(&datadir)?;
        fs::rename(&staged, &datadir).at(&staged)?;

        let sessiondir = self.sessiondir();
        for file in STATE_FILES {
            let source = folder.join(file);
            fs::copy(&source, sessiondir.join(file)).at(&source)?;
        }

        self.data.clear();
        self.scene = None;
        self.settings = None;
        self.load_tolerance()?;

        self.history.current = Some(index);
        self.dump_history()
    }

    fn next_record_id(&self) -> String {
        let base = Utc::now().timestamp_micros().to_string();
        let recordsdir = self.recordsdir();
        let taken = |id: &str| {
            recordsdir.join(id).exists() || self.history.records.iter().any(|r| r.id == id)
        };

        if !taken(&base) {
            return base;
        }
        let mut suffix = 1;
        loop {
            let candidate = format!("{base}-{suffix}");
            if !taken(&candidate) {
                return candidate;
            }
            suffix += 1;
        }
    }

    fn remove_record_dir(&self, record: &HistoryRecord) {
        let folder = self.recordsdir().join(&record.id);
        if let Err(err) = remove_dir(&folder) {
            warn!(session = %self.name, record = %record.id, "failed to remove record folder: {err}");
        }
    }
}

/// Whether two paths name the same existing directory.
fn same_dir(a: &Path, b: &Path) -> Result<bool> {
    Ok(fs::canonicalize(a).at(a)? == fs::canonicalize(b).at(b)?)
}

fn validate_key(key: &str) -> Result<()> {
    if KEY_PATTERN.is_match(key) {
        Ok(())
    } else {
        Err(SessionError::InvalidKey(key.to_string()))
    }
}

impl<S: SessionSettings + fmt::Display> fmt::Display for Session<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Session: {} ({})", self.name, self.sessiondir().display())?;
        writeln!(f, "Data: {} loaded", self.data.len())?;
        for (key, value) in &self.data {
            writeln!(f, "  {key}: {value}")?;
        }
        writeln!(f, "Tolerance: {}", self.tolerance)?;
        match &self.settings {
            Some(settings) => writeln!(f, "Settings: {settings}")?,
            None => writeln!(f, "Settings: (not loaded)")?,
        }
        match &self.scene {
            Some(scene) => writeln!(f, "Scene: {scene}")?,
            None => writeln!(f, "Scene: (not loaded)")?,
        }
        let current = self
            .history
            .current
            .map_or_else(|| "-".to_string(), |index| index.to_string());
        write!(
            f,
            "History: {} records, current {}, depth {}",
            self.history.records.len(),
            current,
            self.history.depth
        )
    }
}
