pub mod backend;
pub mod key_store;

pub use backend::{BackendError, ExamBackend, HttpExamBackend};
pub use key_store::{
    resolve_session_id, session_key, FileKeyStore, KeyStore, KeyStoreError, MemoryKeyStore,
};
