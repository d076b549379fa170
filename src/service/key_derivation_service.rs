//! 交易链密钥派生服务
//!
//! 签名派生、私钥/助记词导入、恢复与导出。服务只返回结果，
//! 写入会话由调用方（编排器）负责。持久化的始终是原始私钥，不保存助记词。

use std::sync::Arc;

use crate::domain::derivation::{
    derive_hd_key_from_mnemonic, derive_hd_key_from_signature, parse_mnemonic, LocalWallet,
};
use crate::domain::wallet::PrivateInformation;
use crate::error::AppError;
use crate::infrastructure::log_redact::redact_address;
use crate::infrastructure::secure_storage::SecureStorageService;

/// 唯一的持久化槽位
pub const WALLET_STORAGE_KEY: &str = "trading_wallet_key";

#[derive(Debug, Clone)]
pub struct WalletCreationResult {
    pub wallet: LocalWallet,
    /// 私钥导入路径没有 HD 材料
    pub key_material: Option<PrivateInformation>,
    pub persisted: bool,
}

impl WalletCreationResult {
    pub fn address(&self) -> &str {
        self.wallet.address()
    }
}

pub struct KeyDerivationService {
    storage: Arc<SecureStorageService>,
    address_prefix: String,
}

impl KeyDerivationService {
    pub fn new(storage: Arc<SecureStorageService>, address_prefix: impl Into<String>) -> Self {
        Self {
            storage,
            address_prefix: address_prefix.into(),
        }
    }

    pub fn address_prefix(&self) -> &str {
        &self.address_prefix
    }

    /// 从原始私钥导入（`0x` 前缀可选）
    pub async fn import_from_private_key(
        &self,
        private_key: &str,
        persist: bool,
    ) -> Result<WalletCreationResult, AppError> {
        let wallet = LocalWallet::from_private_key(private_key, &self.address_prefix)
            .map_err(|e| AppError::invalid_private_key(e.to_string()))?;

        if persist {
            self.storage
                .store(WALLET_STORAGE_KEY, &normalize_private_key(private_key))
                .await?;
        }

        tracing::info!(
            address = %redact_address(wallet.address()),
            persisted = persist,
            "wallet imported from private key"
        );

        Ok(WalletCreationResult {
            wallet,
            key_material: None,
            persisted: persist,
        })
    }

    /// 从 12/24 词助记词导入，持久化派生出的私钥
    pub async fn import_from_mnemonic(
        &self,
        mnemonic: &str,
        persist: bool,
    ) -> Result<WalletCreationResult, AppError> {
        let parsed = parse_mnemonic(mnemonic)
            .map_err(|e| AppError::invalid_mnemonic(e.to_string()))?;
        let keys = derive_hd_key_from_mnemonic(&parsed)
            .map_err(|e| AppError::derivation_failed(e.to_string()))?;
        let wallet = LocalWallet::from_mnemonic(&keys.mnemonic, &self.address_prefix)
            .map_err(|e| AppError::derivation_failed(e.to_string()))?;

        let mut result = WalletCreationResult {
            wallet,
            key_material: Some(keys),
            persisted: false,
        };

        if persist {
            self.persist_wallet(&mut result).await?;
        }

        tracing::info!(
            address = %redact_address(result.address()),
            persisted = persist,
            "wallet imported from mnemonic"
        );

        Ok(result)
    }

    /// 助记词格式校验
    pub fn validate_mnemonic(mnemonic: &str) -> Result<(), AppError> {
        parse_mnemonic(mnemonic)
            .map(|_| ())
            .map_err(|e| AppError::invalid_mnemonic(e.to_string()))
    }

    /// 从持久化私钥恢复，不重复写入
    ///
    /// 任何失败都会删除存储的记录并返回 `None`
    pub async fn restore_from_storage(&self) -> Option<WalletCreationResult> {
        let stored = match self.storage.retrieve(WALLET_STORAGE_KEY).await {
            Ok(Some(key)) => key,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read stored wallet, clearing it");
                self.clear_quietly();
                return None;
            }
        };

        match self.import_from_private_key(&stored, false).await {
            Ok(mut result) => {
                result.persisted = true;
                tracing::info!(
                    address = %redact_address(result.address()),
                    "wallet restored from storage"
                );
                Some(result)
            }
            Err(e) => {
                tracing::warn!(error = %e, "stored wallet is invalid, clearing it");
                self.clear_quietly();
                None
            }
        }
    }

    /// 从钱包签名确定性派生
    pub async fn derive_from_signature(
        &self,
        signature: &str,
        persist: bool,
    ) -> Result<WalletCreationResult, AppError> {
        let keys = derive_hd_key_from_signature(signature)
            .map_err(|e| AppError::invalid_signature(e.to_string()))?;
        let wallet = LocalWallet::from_mnemonic(&keys.mnemonic, &self.address_prefix)
            .map_err(|e| AppError::derivation_failed(e.to_string()))?;

        if wallet.address().is_empty() || !keys.is_complete() {
            return Err(AppError::derivation_failed(
                "Failed to derive wallet from signature.",
            ));
        }

        let mut result = WalletCreationResult {
            wallet,
            key_material: Some(keys),
            persisted: false,
        };

        if persist {
            self.persist_wallet(&mut result).await?;
        }

        tracing::info!(
            address = %redact_address(result.address()),
            persisted = persist,
            "wallet derived from signature"
        );

        Ok(result)
    }

    /// 持久化已派生结果中的私钥；两个密钥分量都存在才写入
    pub async fn persist_wallet(&self, result: &mut WalletCreationResult) -> Result<(), AppError> {
        let private_key_hex = match &result.key_material {
            Some(keys) if keys.is_complete() => keys.private_key_hex(),
            _ => {
                return Err(AppError::bad_request(
                    "Wallet has no key material to persist",
                ))
            }
        };

        self.storage.store(WALLET_STORAGE_KEY, &private_key_hex).await?;
        result.persisted = true;
        Ok(())
    }

    /// 导出持久化的私钥（hex，无 `0x` 前缀）
    pub async fn export_private_key(&self) -> Result<Option<String>, AppError> {
        self.storage.retrieve(WALLET_STORAGE_KEY).await
    }

    pub fn has_stored_wallet(&self) -> Result<bool, AppError> {
        self.storage.has(WALLET_STORAGE_KEY)
    }

    pub fn clear_stored_wallet(&self) -> Result<(), AppError> {
        self.storage.remove(WALLET_STORAGE_KEY)?;
        tracing::info!("stored wallet cleared");
        Ok(())
    }

    fn clear_quietly(&self) {
        if let Err(e) = self.clear_stored_wallet() {
            tracing::warn!(error = %e, "failed to clear stored wallet");
        }
    }
}

fn normalize_private_key(private_key: &str) -> String {
    let trimmed = private_key.trim();
    trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed)
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppErrorCode;
    use crate::infrastructure::kv_store::MemoryStore;

    const SIGNATURE: &str = "0xaabbccddeeff00112233445566778899aabbccddeeff00112233445566778899\
                             00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff1c";

    fn service() -> KeyDerivationService {
        let storage = SecureStorageService::new(Arc::new(MemoryStore::new()), "test_");
        KeyDerivationService::new(Arc::new(storage), "dydx")
    }

    #[tokio::test]
    async fn test_derive_from_signature_persists_private_key() {
        let service = service();

        let result = service.derive_from_signature(SIGNATURE, true).await.unwrap();
        assert!(result.persisted);
        assert!(result.address().starts_with("dydx1"));

        let keys = result.key_material.as_ref().unwrap();
        let exported = service.export_private_key().await.unwrap().unwrap();
        assert_eq!(exported, keys.private_key_hex());
        // 不保存助记词
        assert!(!exported.contains(' '));
    }

    #[tokio::test]
    async fn test_derive_without_persist_then_persist_later() {
        let service = service();

        let mut result = service.derive_from_signature(SIGNATURE, false).await.unwrap();
        assert!(!result.persisted);
        assert!(!service.has_stored_wallet().unwrap());

        service.persist_wallet(&mut result).await.unwrap();
        assert!(result.persisted);
        assert!(service.has_stored_wallet().unwrap());
    }

    #[tokio::test]
    async fn test_restore_gives_same_address() {
        let service = service();
        let derived = service.derive_from_signature(SIGNATURE, true).await.unwrap();

        let restored = service.restore_from_storage().await.unwrap();
        assert_eq!(restored.address(), derived.address());
        assert!(restored.key_material.is_none());
    }

    #[tokio::test]
    async fn test_restore_clears_invalid_entry() {
        let storage = Arc::new(SecureStorageService::new(Arc::new(MemoryStore::new()), "test_"));
        let service = KeyDerivationService::new(storage.clone(), "dydx");

        storage.store(WALLET_STORAGE_KEY, "not-a-key").await.unwrap();
        assert!(service.restore_from_storage().await.is_none());
        assert!(!service.has_stored_wallet().unwrap());

        // 没有记录时直接返回 None
        assert!(service.restore_from_storage().await.is_none());
    }

    #[tokio::test]
    async fn test_import_from_private_key_normalizes() {
        let service = service();
        let key = "0xAB".to_string() + &"11".repeat(31);

        let result = service.import_from_private_key(&key, true).await.unwrap();
        assert!(result.key_material.is_none());
        assert_eq!(
            service.export_private_key().await.unwrap().unwrap(),
            "ab".to_string() + &"11".repeat(31)
        );

        let err = service.import_from_private_key("0x12", true).await.unwrap_err();
        assert_eq!(err.code, AppErrorCode::InvalidPrivateKey);
    }

    #[tokio::test]
    async fn test_import_from_mnemonic() {
        let service = service();
        let mnemonic = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

        let result = service.import_from_mnemonic(mnemonic, true).await.unwrap();
        let keys = result.key_material.as_ref().unwrap();
        assert_eq!(keys.mnemonic, mnemonic);

        // 恢复得到同一地址
        let restored = service.restore_from_storage().await.unwrap();
        assert_eq!(restored.address(), result.address());

        let err = service.import_from_mnemonic("abandon about", true).await.unwrap_err();
        assert_eq!(err.code, AppErrorCode::InvalidMnemonic);
    }

    #[test]
    fn test_validate_mnemonic() {
        assert!(KeyDerivationService::validate_mnemonic(
            "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about"
        )
        .is_ok());
        // 词数对但校验和不对
        assert!(KeyDerivationService::validate_mnemonic(
            "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon"
        )
        .is_err());
    }

    #[tokio::test]
    async fn test_clear_stored_wallet() {
        let service = service();
        service.derive_from_signature(SIGNATURE, true).await.unwrap();

        service.clear_stored_wallet().unwrap();
        assert!(!service.has_stored_wallet().unwrap());
        assert_eq!(service.export_private_key().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_signature_code() {
        let err = service().derive_from_signature("0xdead", true).await.unwrap_err();
        assert_eq!(err.code, AppErrorCode::InvalidSignature);
    }
}
