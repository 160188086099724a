use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use uuid::Uuid;

const STORE_FILE_NAME: &str = "sessions.json";

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("key store io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("key store file {path} is corrupt: {detail}")]
    Corrupt { path: PathBuf, detail: String },
}

/// Process-wide string key/value storage that survives a reload.
pub trait KeyStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> Result<Option<String>, KeyStoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), KeyStoreError>;

    fn remove(&self, key: &str) -> Result<(), KeyStoreError>;
}

pub fn session_key(exam_id: &str) -> String {
    format!("exam_session_uuid_{exam_id}")
}

/// Returns the attempt id stored for `exam_id`, starting a fresh attempt when none is stored.
pub fn resolve_session_id(store: &dyn KeyStore, exam_id: &str) -> Result<Uuid, KeyStoreError> {
    let key = session_key(exam_id);

    if let Some(stored) = store.get(&key)? {
        match Uuid::parse_str(stored.trim()) {
            Ok(session_id) => {
                tracing::info!(exam_id, session_id = %session_id, "Resuming stored exam attempt");
                return Ok(session_id);
            }
            Err(err) => {
                tracing::warn!(
                    exam_id,
                    stored = %stored,
                    error = %err,
                    "Stored session id is not a UUID; starting a fresh attempt"
                );
            }
        }
    }

    let session_id = Uuid::new_v4();
    store.set(&key, &session_id.to_string())?;
    tracing::info!(exam_id, session_id = %session_id, "Started new exam attempt");
    Ok(session_id)
}

#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for MemoryKeyStore {
    fn get(&self, key: &str) -> Result<Option<String>, KeyStoreError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KeyStoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), KeyStoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// JSON object file in a directory, rewritten through a temp file and rename.
#[derive(Debug)]
pub struct FileKeyStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileKeyStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, KeyStoreError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .map_err(|source| KeyStoreError::Io { path: dir.to_path_buf(), source })?;
        Ok(Self { path: dir.join(STORE_FILE_NAME), lock: Mutex::new(()) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, KeyStoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => return Err(KeyStoreError::Io { path: self.path.clone(), source }),
        };

        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_json::from_str(&raw).map_err(|err| KeyStoreError::Corrupt {
            path: self.path.clone(),
            detail: err.to_string(),
        })
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<(), KeyStoreError> {
        let body = serde_json::to_vec_pretty(entries).map_err(|err| KeyStoreError::Corrupt {
            path: self.path.clone(),
            detail: err.to_string(),
        })?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body).map_err(|source| KeyStoreError::Io { path: tmp.clone(), source })?;
        fs::rename(&tmp, &self.path)
            .map_err(|source| KeyStoreError::Io { path: self.path.clone(), source })
    }
}

impl KeyStore for FileKeyStore {
    fn get(&self, key: &str) -> Result<Option<String>, KeyStoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KeyStoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.read_all()?;
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), KeyStoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.read_all()?;
        if entries.remove(key).is_some() {
            self.write_all(&entries)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_key_embeds_exam_id() {
        assert_eq!(session_key("exam-42"), "exam_session_uuid_exam-42");
    }

    #[test]
    fn resolve_session_id_writes_once_and_then_resumes() {
        let store = MemoryKeyStore::new();

        let first = resolve_session_id(&store, "exam-1").expect("first");
        let second = resolve_session_id(&store, "exam-1").expect("second");
        let other = resolve_session_id(&store, "exam-2").expect("other exam");

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(
            store.get(&session_key("exam-1")).expect("get"),
            Some(first.to_string())
        );
    }

    #[test]
    fn resolve_session_id_replaces_garbage() {
        let store = MemoryKeyStore::new();
        store.set(&session_key("exam-1"), "not-a-uuid").expect("seed");

        let session_id = resolve_session_id(&store, "exam-1").expect("resolve");
        assert_eq!(store.get(&session_key("exam-1")).expect("get"), Some(session_id.to_string()));
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");

        let store = FileKeyStore::open(dir.path()).expect("open");
        store.set("exam_session_uuid_a", "one").expect("set a");
        store.set("exam_session_uuid_b", "two").expect("set b");
        store.remove("exam_session_uuid_a").expect("remove a");
        drop(store);

        let reopened = FileKeyStore::open(dir.path()).expect("reopen");
        assert_eq!(reopened.get("exam_session_uuid_a").expect("get a"), None);
        assert_eq!(reopened.get("exam_session_uuid_b").expect("get b"), Some("two".to_string()));
    }

    #[test]
    fn file_store_reports_corruption() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileKeyStore::open(dir.path()).expect("open");
        fs::write(store.path(), "{ nope").expect("corrupt");

        let err = store.get("anything").expect_err("corrupt");
        assert!(matches!(err, KeyStoreError::Corrupt { .. }));
    }

    #[test]
    fn removing_missing_key_is_a_no_op() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileKeyStore::open(dir.path()).expect("open");
        store.remove("missing").expect("remove");
        assert!(!store.path().exists());
    }
}
