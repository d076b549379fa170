//! 本地加密存储服务
//!
//! - 首次使用时生成 32 字节安装盐值，以 base64 明文保存（盐值不是秘密）
//! - 存储密钥由 PBKDF2(盐值) 派生，只缓存在内存中，从不落盘
//! - 每条记录保存为 `{data, iv, version}` JSON，每次写入使用新的 96 位 IV
//! - 任何解密失败都会删除该记录并返回 `None`，损坏的密文不会暴露给调用方
//! - `clear_all` 删除盐值后，所有旧密文永久无法解密

use std::sync::Arc;

use anyhow::{anyhow, Context};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::AppError;
use crate::infrastructure::encryption::{decrypt_data, encrypt_data, EncryptionKey};
use crate::infrastructure::kv_store::KeyValueStore;
use crate::infrastructure::pbkdf2::{derive_storage_key, generate_salt, SALT_LENGTH};

/// 当前记录格式版本
pub const STORAGE_FORMAT_VERSION: u32 = 1;

/// 盐值记录名（加前缀后保存）
const SALT_KEY: &str = "salt";

/// 加密记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedBlob {
    /// base64 密文（含 GCM 认证标签）
    pub data: String,
    /// base64 IV
    pub iv: String,
    pub version: u32,
}

pub struct SecureStorageService {
    backend: Arc<dyn KeyValueStore>,
    prefix: String,
    key: Mutex<Option<Arc<EncryptionKey>>>,
}

impl SecureStorageService {
    pub fn new(backend: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
            key: Mutex::new(None),
        }
    }

    /// 记录在后端中的实际键名
    pub fn namespaced_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// 加密保存
    ///
    /// 写入失败直接返回错误
    pub async fn store(&self, key: &str, plaintext: &str) -> Result<(), AppError> {
        if key == SALT_KEY {
            return Err(AppError::bad_request(format!(
                "'{}' is a reserved storage key",
                SALT_KEY
            )));
        }

        let encryption_key = self.encryption_key().await?;
        let sealed = encrypt_data(plaintext.as_bytes(), &encryption_key)
            .map_err(|e| AppError::encryption_failed(e.to_string()))?;

        let blob = EncryptedBlob {
            data: BASE64.encode(&sealed.ciphertext),
            iv: BASE64.encode(&sealed.iv),
            version: STORAGE_FORMAT_VERSION,
        };

        self.backend
            .set(&self.namespaced_key(key), &serde_json::to_string(&blob)?)?;

        tracing::debug!(key = %key, "secure storage record written");
        Ok(())
    }

    /// 读取并解密
    ///
    /// 记录不存在返回 `Ok(None)`；解密失败删除记录并返回 `Ok(None)`；
    /// 只有后端读写本身失败时返回错误
    pub async fn retrieve(&self, key: &str) -> Result<Option<String>, AppError> {
        let storage_key = self.namespaced_key(key);
        let Some(raw) = self.backend.get(&storage_key)? else {
            return Ok(None);
        };

        let encryption_key = self.encryption_key().await?;

        match open_blob(&raw, &encryption_key) {
            Ok(plaintext) => Ok(Some(plaintext)),
            Err(e) => {
                tracing::warn!(
                    key = %key,
                    error = %e,
                    "secure storage record could not be decrypted, removing it"
                );
                self.backend.remove(&storage_key)?;
                Ok(None)
            }
        }
    }

    pub fn remove(&self, key: &str) -> Result<(), AppError> {
        self.backend.remove(&self.namespaced_key(key))
    }

    pub fn has(&self, key: &str) -> Result<bool, AppError> {
        self.backend.contains(&self.namespaced_key(key))
    }

    /// 删除盐值和所有带前缀的记录，并丢弃内存中的密钥
    pub async fn clear_all(&self) -> Result<(), AppError> {
        let mut cached = self.key.lock().await;
        *cached = None;

        let mut removed = 0usize;
        for key in self.backend.keys()? {
            if key.starts_with(&self.prefix) {
                self.backend.remove(&key)?;
                removed += 1;
            }
        }

        tracing::info!(removed, "secure storage wiped");
        Ok(())
    }

    /// 获取（必要时派生）存储密钥
    async fn encryption_key(&self) -> Result<Arc<EncryptionKey>, AppError> {
        let mut cached = self.key.lock().await;
        if let Some(key) = cached.as_ref() {
            return Ok(key.clone());
        }

        let salt = self.load_or_create_salt()?;

        // PBKDF2 十万次迭代，放到阻塞线程执行
        let key = tokio::task::spawn_blocking(move || derive_storage_key(&salt))
            .await
            .map_err(|e| AppError::internal(format!("Key derivation task failed: {}", e)))?
            .map_err(|e| AppError::encryption_failed(e.to_string()))?;

        let key = Arc::new(key);
        *cached = Some(key.clone());
        Ok(key)
    }

    fn load_or_create_salt(&self) -> Result<Vec<u8>, AppError> {
        let salt_key = self.namespaced_key(SALT_KEY);

        if let Some(encoded) = self.backend.get(&salt_key)? {
            match BASE64.decode(encoded.trim()) {
                Ok(salt) if salt.len() == SALT_LENGTH => return Ok(salt),
                _ => tracing::warn!("stored salt is malformed, generating a new one"),
            }
        }

        let salt = generate_salt();
        self.backend.set(&salt_key, &BASE64.encode(&salt))?;
        tracing::info!("secure storage salt created");
        Ok(salt)
    }
}

fn open_blob(raw: &str, key: &EncryptionKey) -> anyhow::Result<String> {
    let blob: EncryptedBlob = serde_json::from_str(raw).context("Malformed record")?;

    if blob.version != STORAGE_FORMAT_VERSION {
        return Err(anyhow!("Unsupported record version {}", blob.version));
    }

    let ciphertext = BASE64.decode(&blob.data).context("Malformed ciphertext")?;
    let iv = BASE64.decode(&blob.iv).context("Malformed iv")?;

    let plaintext = decrypt_data(&iv, &ciphertext, key)?;
    String::from_utf8(plaintext).context("Plaintext is not valid UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::kv_store::MemoryStore;

    fn service() -> (Arc<MemoryStore>, SecureStorageService) {
        let backend = Arc::new(MemoryStore::new());
        let storage = SecureStorageService::new(backend.clone(), "test_");
        (backend, storage)
    }

    #[tokio::test]
    async fn test_store_and_retrieve() {
        let (backend, storage) = service();

        storage.store("k", "secret").await.unwrap();
        assert_eq!(storage.retrieve("k").await.unwrap().as_deref(), Some("secret"));

        // 盐值以 base64 明文保存
        let salt = backend.get("test_salt").unwrap().unwrap();
        assert_eq!(BASE64.decode(salt).unwrap().len(), SALT_LENGTH);

        // 记录格式
        let raw = backend.get("test_k").unwrap().unwrap();
        let blob: EncryptedBlob = serde_json::from_str(&raw).unwrap();
        assert_eq!(blob.version, 1);
        assert_eq!(BASE64.decode(&blob.iv).unwrap().len(), 12);
    }

    #[tokio::test]
    async fn test_salt_is_reserved() {
        let (_, storage) = service();
        assert!(storage.store("salt", "x").await.is_err());
    }

    #[tokio::test]
    async fn test_unsupported_version_is_discarded() {
        let (backend, storage) = service();
        storage.store("k", "secret").await.unwrap();

        let raw = backend.get("test_k").unwrap().unwrap();
        let mut blob: EncryptedBlob = serde_json::from_str(&raw).unwrap();
        blob.version = 2;
        backend
            .set("test_k", &serde_json::to_string(&blob).unwrap())
            .unwrap();

        assert_eq!(storage.retrieve("k").await.unwrap(), None);
        assert!(!storage.has("k").unwrap());
    }

    #[tokio::test]
    async fn test_clear_all_keeps_foreign_keys() {
        let (backend, storage) = service();
        backend.set("other_app", "untouched").unwrap();
        storage.store("a", "1").await.unwrap();
        storage.store("b", "2").await.unwrap();

        storage.clear_all().await.unwrap();

        assert!(!storage.has("a").unwrap());
        assert!(!storage.has("b").unwrap());
        assert_eq!(backend.get("test_salt").unwrap(), None);
        assert_eq!(backend.get("other_app").unwrap().as_deref(), Some("untouched"));
    }
}
