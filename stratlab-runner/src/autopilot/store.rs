//! Session persistence.
//!
//! `JsonFileStore` keeps one pretty-printed `{id}.json` snapshot per session
//! in a directory, replaced atomically (write to `{id}.json.tmp`, then
//! rename). A stop request is an empty `{id}.stop` marker file next to it.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::ResearchError;

use super::session::{decode, encode, ResearchSession};

/// Load/save of session snapshots plus out-of-band stop requests.
pub trait SessionStore: Send + Sync {
    fn load(&self, session_id: &str) -> Result<Option<ResearchSession>, ResearchError>;

    fn save(&self, session: &ResearchSession) -> Result<(), ResearchError>;

    fn request_stop(&self, session_id: &str) -> Result<(), ResearchError>;

    fn stop_requested(&self, session_id: &str) -> Result<bool, ResearchError>;

    fn clear_stop(&self, session_id: &str) -> Result<(), ResearchError>;

    /// Ids of every stored session, sorted.
    fn list(&self) -> Result<Vec<String>, ResearchError>;
}

/// Session ids become file names.
pub fn validate_session_id(id: &str) -> Result<(), ResearchError> {
    let ok = !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(ResearchError::invalid(format!(
            "session id {id:?} must be 1-64 characters of [A-Za-z0-9_-]"
        )))
    }
}

// ─── Filesystem ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, ResearchError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn snapshot_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }

    fn stop_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.stop"))
    }
}

impl SessionStore for JsonFileStore {
    fn load(&self, session_id: &str) -> Result<Option<ResearchSession>, ResearchError> {
        validate_session_id(session_id)?;
        let path = self.snapshot_path(session_id);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path)?;
        decode(&json)
            .map(Some)
            .map_err(|e| ResearchError::Persistence(format!("{}: {e}", path.display())))
    }

    fn save(&self, session: &ResearchSession) -> Result<(), ResearchError> {
        validate_session_id(&session.session_id)?;
        let path = self.snapshot_path(&session.session_id);
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(encode(session)?.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn request_stop(&self, session_id: &str) -> Result<(), ResearchError> {
        validate_session_id(session_id)?;
        fs::File::create(self.stop_path(session_id))?;
        Ok(())
    }

    fn stop_requested(&self, session_id: &str) -> Result<bool, ResearchError> {
        validate_session_id(session_id)?;
        Ok(self.stop_path(session_id).exists())
    }

    fn clear_stop(&self, session_id: &str) -> Result<(), ResearchError> {
        validate_session_id(session_id)?;
        match fs::remove_file(self.stop_path(session_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> Result<Vec<String>, ResearchError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

// ─── In-memory ───────────────────────────────────────────────────────

/// Holds encoded snapshots, so a save/load round trip goes through the same
/// codec as the file store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshots: Mutex<BTreeMap<String, String>>,
    stops: Mutex<BTreeSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> ResearchError {
    ResearchError::Persistence("memory store lock poisoned".into())
}

impl SessionStore for MemoryStore {
    fn load(&self, session_id: &str) -> Result<Option<ResearchSession>, ResearchError> {
        let snapshots = self.snapshots.lock().map_err(poisoned)?;
        snapshots.get(session_id).map(|json| decode(json)).transpose()
    }

    fn save(&self, session: &ResearchSession) -> Result<(), ResearchError> {
        let json = encode(session)?;
        self.snapshots
            .lock()
            .map_err(poisoned)?
            .insert(session.session_id.clone(), json);
        Ok(())
    }

    fn request_stop(&self, session_id: &str) -> Result<(), ResearchError> {
        self.stops
            .lock()
            .map_err(poisoned)?
            .insert(session_id.to_string());
        Ok(())
    }

    fn stop_requested(&self, session_id: &str) -> Result<bool, ResearchError> {
        Ok(self.stops.lock().map_err(poisoned)?.contains(session_id))
    }

    fn clear_stop(&self, session_id: &str) -> Result<(), ResearchError> {
        self.stops.lock().map_err(poisoned)?.remove(session_id);
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, ResearchError> {
        Ok(self.snapshots.lock().map_err(poisoned)?.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autopilot::tests::test_config;

    fn session(id: &str) -> ResearchSession {
        let mut config = test_config();
        config.session_id = id.to_string();
        ResearchSession::new(config, chrono::DateTime::UNIX_EPOCH)
    }

    #[test]
    fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("sessions")).unwrap();
        assert!(store.load("alpha").unwrap().is_none());

        let s = session("alpha");
        store.save(&s).unwrap();
        store.save(&s).unwrap();
        assert_eq!(store.load("alpha").unwrap().unwrap(), s);
        assert!(!store.dir().join("alpha.json.tmp").exists());

        store.save(&session("beta")).unwrap();
        assert_eq!(store.list().unwrap(), vec!["alpha", "beta"]);
    }

    #[test]
    fn file_store_stop_marker() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path()).unwrap();
        assert!(!store.stop_requested("alpha").unwrap());
        store.request_stop("alpha").unwrap();
        assert!(store.stop_requested("alpha").unwrap());
        store.clear_stop("alpha").unwrap();
        store.clear_stop("alpha").unwrap();
        assert!(!store.stop_requested("alpha").unwrap());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn file_store_rejects_newer_snapshots_and_bad_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path()).unwrap();
        std::fs::write(
            store.snapshot_path("future"),
            r#"{"schema_version": 99, "session_id": "future"}"#,
        )
        .unwrap();
        assert!(matches!(store.load("future"), Err(ResearchError::Persistence(_))));
        assert!(store.load("../etc").is_err());
    }

    #[test]
    fn memory_store_behaves_like_file_store() {
        let store = MemoryStore::new();
        let s = session("gamma");
        store.save(&s).unwrap();
        assert_eq!(store.load("gamma").unwrap().unwrap(), s);
        assert!(store.load("delta").unwrap().is_none());
        store.request_stop("gamma").unwrap();
        assert!(store.stop_requested("gamma").unwrap());
        store.clear_stop("gamma").unwrap();
        assert!(!store.stop_requested("gamma").unwrap());
        assert_eq!(store.list().unwrap(), vec!["gamma"]);
    }
}
