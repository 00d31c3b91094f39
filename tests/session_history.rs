//! Integration tests for session persistence and undo/redo history.
//!
//! Every test works in its own temporary base directory.

use anyhow::Result;
use design_session::types::HistoryState;
use design_session::{Scene, Session, SessionOptions, SessionSettings, SessionRegistry};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fs;
use tempfile::TempDir;

fn open(dir: &TempDir) -> Result<Session> {
    Ok(Session::open(
        SessionOptions::new().with_name("studio").with_basedir(dir.path()),
    )?)
}

#[test]
fn test_state_survives_restart() -> Result<()> {
    let dir = tempfile::tempdir()?;
    {
        let mut session = open(&dir)?;
        session.set("span", 12.5)?;
        session
            .scene_mut()?
            .add("deck", json!({"material": "timber"}), None)?;
        session.settings_mut()?.autosave = true;
        session.dump()?;
    }

    let mut session = open(&dir)?;
    assert_eq!(session.get("span")?, Some(&json!(12.5)));
    assert_eq!(session.scene()?.len(), 1);
    assert!(session.settings()?.autosave);
    Ok(())
}

#[test]
fn test_undo_restores_scene_and_settings() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut session = open(&dir)?;

    session.set("storeys", 2)?;
    session.record("two storeys")?;

    session.set("storeys", 3)?;
    session.scene_mut()?.add("roof", Value::Null, None)?;
    session.settings_mut()?.autosave = true;
    session.record("three storeys with roof")?;

    assert!(session.undo()?);
    assert_eq!(session.get("storeys")?, Some(&json!(2)));
    assert!(session.scene()?.is_empty());
    assert!(!session.settings()?.autosave);

    assert!(session.redo()?);
    assert_eq!(session.get("storeys")?, Some(&json!(3)));
    assert!(session.scene()?.find_by_name("roof").is_some());
    assert!(session.settings()?.autosave);
    Ok(())
}

#[test]
fn test_undo_removes_keys_added_later() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut session = open(&dir)?;

    session.set("a", 1)?;
    session.record("only a")?;
    session.set("b", 2)?;
    session.record("a and b")?;

    session.undo()?;
    assert_eq!(session.keys()?, vec!["a".to_string()]);
    assert!(!session.contains("b")?);
    Ok(())
}

#[test]
fn test_history_file_layout() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut session = open(&dir)?;
    session.record("first")?;
    session.record("second")?;
    session.undo()?;

    let raw: Value = serde_json::from_slice(&fs::read(session.historyfile())?)?;
    assert_eq!(raw["current"], 0);
    assert_eq!(raw["depth"], 53);
    assert_eq!(raw["records"][1]["name"], "second");

    let history: HistoryState = serde_json::from_value(raw)?;
    for record in &history.records {
        let folder = session.recordsdir().join(&record.id);
        assert!(folder.join("data").is_dir());
        for file in ["_scene.json", "_settings.json", "_tolerance.json", "_version.json"] {
            assert!(folder.join(file).is_file(), "{file} missing in record");
        }
    }
    Ok(())
}

#[test]
fn test_history_continues_across_processes() -> Result<()> {
    let dir = tempfile::tempdir()?;
    {
        let mut session = open(&dir)?;
        session.set("x", 1)?;
        session.record("x=1")?;
        session.set("x", 2)?;
        session.record("x=2")?;
    }

    let mut session = open(&dir)?;
    assert_eq!(session.current(), Some(1));
    assert!(session.undo()?);
    assert_eq!(session.get("x")?, Some(&json!(1)));

    session.set("x", 5)?;
    session.record("x=5")?;
    let names: Vec<&str> = session.history().iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["x=1", "x=5"]);
    Ok(())
}

#[test]
fn test_export_is_a_complete_session() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut session = open(&dir)?;
    session.set("grid", json!([0, 6, 12]))?;
    session.set_scene(Scene::new("export"));

    let export_base = dir.path().join("copy");
    let export_dir = export_base.join("studio.session");
    session.dump_to(&export_dir)?;

    let mut copy: Session = Session::open(
        SessionOptions::new()
            .with_name("studio")
            .with_basedir(&export_base),
    )?;
    assert_eq!(copy.get("grid")?, Some(&json!([0, 6, 12])));
    assert_eq!(copy.scene()?.name, "export");
    Ok(())
}

#[test]
fn test_registry_shares_history() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let registry: SessionRegistry = SessionRegistry::new();
    let options = || SessionOptions::new().with_name("shared").with_basedir(dir.path());

    let first = registry.open(options())?;
    first.lock().record("from first handle")?;

    let second = registry.open(options())?;
    assert_eq!(second.lock().history().len(), 1);
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReviewSettings {
    reviewer: String,
    sync_each_change: bool,
}

impl Default for ReviewSettings {
    fn default() -> Self {
        Self {
            reviewer: "nobody".to_string(),
            sync_each_change: false,
        }
    }
}

impl SessionSettings for ReviewSettings {
    fn autosync(&self) -> bool {
        self.sync_each_change
    }

    fn autosave(&self) -> bool {
        false
    }
}

#[test]
fn test_custom_settings_schema() -> Result<()> {
    let dir = tempfile::tempdir()?;
    {
        let mut session: Session<ReviewSettings> = Session::open(
            SessionOptions::new().with_name("review").with_basedir(dir.path()),
        )?;
        session.set("notes", "check cantilever")?;
        assert!(!session.datadir().join("notes.json").exists());

        session.settings_mut()?.set_field("reviewer", json!("kim"))?;
        session.dump()?;
    }

    let mut session: Session<ReviewSettings> = Session::open(
        SessionOptions::new().with_name("review").with_basedir(dir.path()),
    )?;
    assert_eq!(session.settings()?.reviewer, "kim");
    assert_eq!(session.get("notes")?, Some(&json!("check cantilever")));
    Ok(())
}
