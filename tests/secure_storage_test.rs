//! 加密存储集成测试
//!
//! 运行: cargo test --test secure_storage_test

mod common;

use std::sync::Arc;

use common::FailingWriteStore;
use ironlink::infrastructure::{
    EncryptedBlob, FileStore, KeyValueStore, MemoryStore, SecureStorageService,
};

#[tokio::test]
async fn test_tampered_record_is_discarded() {
    let backend = Arc::new(MemoryStore::new());
    let storage = SecureStorageService::new(backend.clone(), "app_");

    storage.store("secret", "top secret value").await.unwrap();

    let raw = backend.get("app_secret").unwrap().unwrap();
    let mut blob: EncryptedBlob = serde_json::from_str(&raw).unwrap();
    // 改动密文首字符，GCM 认证必然失败
    let replacement = if blob.data.starts_with('A') { "B" } else { "A" };
    blob.data.replace_range(0..1, replacement);
    backend
        .set("app_secret", &serde_json::to_string(&blob).unwrap())
        .unwrap();

    assert_eq!(storage.retrieve("secret").await.unwrap(), None);
    // 损坏的记录已删除
    assert!(!storage.has("secret").unwrap());
}

#[tokio::test]
async fn test_records_do_not_decrypt_under_another_salt() {
    let backend = Arc::new(MemoryStore::new());
    let first = SecureStorageService::new(backend.clone(), "first_");
    let second = SecureStorageService::new(backend.clone(), "second_");

    first.store("key", "value").await.unwrap();
    second.store("other", "unrelated").await.unwrap();
    assert_eq!(second.retrieve("key").await.unwrap(), None);

    // 把 first 的密文搬到 second 的命名空间：盐值不同，无法解密
    let raw = backend.get("first_key").unwrap().unwrap();
    backend.set("second_key", &raw).unwrap();
    assert_eq!(second.retrieve("key").await.unwrap(), None);
    assert!(!backend.contains("second_key").unwrap());

    assert_eq!(first.retrieve("key").await.unwrap().as_deref(), Some("value"));
}

#[tokio::test]
async fn test_each_write_uses_fresh_iv() {
    let backend = Arc::new(MemoryStore::new());
    let storage = SecureStorageService::new(backend.clone(), "app_");

    storage.store("k", "same plaintext").await.unwrap();
    let first: EncryptedBlob =
        serde_json::from_str(&backend.get("app_k").unwrap().unwrap()).unwrap();
    storage.store("k", "same plaintext").await.unwrap();
    let second: EncryptedBlob =
        serde_json::from_str(&backend.get("app_k").unwrap().unwrap()).unwrap();

    assert_ne!(first.iv, second.iv);
    assert_ne!(first.data, second.data);
    assert!(!first.data.contains("same plaintext"));
}

#[tokio::test]
async fn test_file_store_persists_across_instances() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("secure_storage.json");

    {
        let backend = Arc::new(FileStore::open(&path).unwrap());
        let storage = SecureStorageService::new(backend, "ironlink_");
        storage.store("wallet", "deadbeef").await.unwrap();
    }

    // 新实例从文件读取盐值，重新派生出同一个密钥
    let backend = Arc::new(FileStore::open(&path).unwrap());
    let storage = SecureStorageService::new(backend, "ironlink_");
    assert_eq!(
        storage.retrieve("wallet").await.unwrap().as_deref(),
        Some("deadbeef")
    );
}

#[tokio::test]
async fn test_clear_all_makes_old_ciphertext_unreadable() {
    let backend = Arc::new(MemoryStore::new());
    let storage = SecureStorageService::new(backend.clone(), "app_");

    storage.store("k", "v").await.unwrap();
    let old_blob = backend.get("app_k").unwrap().unwrap();

    storage.clear_all().await.unwrap();
    assert!(!storage.has("k").unwrap());

    // 盐值已更换，旧密文即使写回也无法解密
    backend.set("app_k", &old_blob).unwrap();
    assert_eq!(storage.retrieve("k").await.unwrap(), None);
}

#[tokio::test]
async fn test_write_failure_reaches_caller() {
    let backend = Arc::new(FailingWriteStore::new("Disk is full"));
    let storage = SecureStorageService::new(backend.clone(), "app_");

    let err = storage.store("k", "v").await.unwrap_err();
    assert_eq!(err.message, "Disk is full");
    assert!(!backend.get_writes().is_empty());
    assert!(!storage.has("k").unwrap());
}
