//! Process-wide session instances.
//!
//! A host application (a CAD plugin, a long-running server) opens the same session by
//! name from many entry points. The registry hands every caller the same instance, and
//! re-reads the history file on each access so records written by another process are
//! picked up.

use crate::error::Result;
use crate::session::{resolve_identity, Session};
use crate::types::{SessionOptions, SessionSettings, Settings};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tracing::debug;

pub type SharedSession<S = Settings> = Arc<Mutex<Session<S>>>;

pub struct SessionRegistry<S: SessionSettings = Settings> {
    sessions: Mutex<HashMap<String, SharedSession<S>>>,
}

impl<S: SessionSettings> Default for SessionRegistry<S> {
    fn default() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

impl<S: SessionSettings> SessionRegistry<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the instance registered under the resolved name, opening it on first use.
    ///
    /// Options other than the name only apply when the session is first opened. The
    /// registry lock is never held while a session is locked or read from disk.
    pub fn open(&self, options: SessionOptions<S>) -> Result<SharedSession<S>> {
        let (name, _) = resolve_identity(&options)?;

        let existing = self.sessions.lock().get(&name).cloned();
        if let Some(existing) = existing {
            // A caller holding the session already sees its newest state.
            match existing.try_lock() {
                Some(mut session) => session.load_history()?,
                None => debug!(session = %name, "session in use, history not reloaded"),
            }
            debug!(session = %name, "reusing registered session");
            return Ok(existing);
        }

        let opened = Arc::new(Mutex::new(Session::open(options)?));
        let mut sessions = self.sessions.lock();
        let session = sessions.entry(name).or_insert(opened);
        Ok(Arc::clone(session))
    }

    pub fn get(&self, name: &str) -> Option<SharedSession<S>> {
        self.sessions.lock().get(name).cloned()
    }

    /// Forget an instance. Files on disk are left alone.
    pub fn remove(&self, name: &str) -> Option<SharedSession<S>> {
        self.sessions.lock().remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

static GLOBAL: LazyLock<SessionRegistry> = LazyLock::new(SessionRegistry::new);

/// Open a session through the process-wide registry.
pub fn shared(options: SessionOptions) -> Result<SharedSession> {
    GLOBAL.open(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(dir: &tempfile::TempDir, name: &str) -> SessionOptions {
        SessionOptions::new().with_name(name).with_basedir(dir.path())
    }

    #[test]
    fn test_same_name_same_instance() {
        let dir = tempfile::tempdir().unwrap();
        let registry: SessionRegistry = SessionRegistry::new();
        let one_a = registry.open(options(&dir, "One")).unwrap();
        let one_b = registry.open(options(&dir, "One")).unwrap();
        let two = registry.open(options(&dir, "Two")).unwrap();

        assert!(Arc::ptr_eq(&one_a, &one_b));
        assert!(!Arc::ptr_eq(&one_a, &two));
        assert_eq!(registry.names(), vec!["One".to_string(), "Two".to_string()]);
    }

    #[test]
    fn test_settings_are_per_session() {
        let dir = tempfile::tempdir().unwrap();
        let registry: SessionRegistry = SessionRegistry::new();
        let one = registry.open(options(&dir, "One")).unwrap();
        let two = registry.open(options(&dir, "Two")).unwrap();

        one.lock().settings_mut().unwrap().autosave = true;

        let again = registry.open(options(&dir, "One")).unwrap();
        assert!(again.lock().settings().unwrap().autosave);
        assert!(!two.lock().settings().unwrap().autosave);
    }

    #[test]
    fn test_reopen_keeps_memory_state() {
        let dir = tempfile::tempdir().unwrap();
        let registry: SessionRegistry = SessionRegistry::new();
        let first = registry.open(options(&dir, "One")).unwrap();
        first.lock().settings_mut().unwrap().autosync = false;
        first.lock().set("draft", json!("unsaved")).unwrap();

        let second = registry.open(options(&dir, "One")).unwrap();
        assert_eq!(second.lock().get("draft").unwrap(), Some(&json!("unsaved")));
    }

    #[test]
    fn test_open_while_session_locked() {
        let dir = tempfile::tempdir().unwrap();
        let registry: SessionRegistry = SessionRegistry::new();
        let first = registry.open(options(&dir, "One")).unwrap();

        let guard = first.lock();
        let again = registry.open(options(&dir, "One")).unwrap();
        let other = registry.open(options(&dir, "Two")).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(registry.names(), vec!["One".to_string(), "Two".to_string()]);
        drop(guard);
    }

    #[test]
    fn test_registry_usable_from_other_thread_while_locked() {
        let dir = tempfile::tempdir().unwrap();
        let registry: Arc<SessionRegistry> = Arc::new(SessionRegistry::new());
        let first = registry.open(options(&dir, "One")).unwrap();
        let guard = first.lock();

        let handle = {
            let registry = Arc::clone(&registry);
            let basedir = dir.path().to_path_buf();
            std::thread::spawn(move || {
                let again = registry
                    .open(SessionOptions::new().with_name("One").with_basedir(basedir))
                    .unwrap();
                (registry.names(), again)
            })
        };
        let (names, again) = handle.join().unwrap();
        assert_eq!(names, vec!["One".to_string()]);
        assert!(Arc::ptr_eq(&first, &again));
        drop(guard);
    }

    #[test]
    fn test_remove_forgets_instance() {
        let dir = tempfile::tempdir().unwrap();
        let registry: SessionRegistry = SessionRegistry::new();
        let first = registry.open(options(&dir, "One")).unwrap();
        assert!(registry.remove("One").is_some());
        assert!(registry.get("One").is_none());

        let fresh = registry.open(options(&dir, "One")).unwrap();
        assert!(!Arc::ptr_eq(&first, &fresh));
    }

    #[test]
    fn test_global_registry() {
        let dir = tempfile::tempdir().unwrap();
        let a = shared(options(&dir, "global-registry-test")).unwrap();
        let b = shared(options(&dir, "global-registry-test")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
