pub mod encryption;
pub mod kv_store;
pub mod log_redact;
pub mod logging;
pub mod pbkdf2;
pub mod secure_storage;

pub use kv_store::{FileStore, KeyValueStore, MemoryStore};
pub use secure_storage::{EncryptedBlob, SecureStorageService};
