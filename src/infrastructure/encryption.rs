//! AES-256-GCM 加密/解密模块
//! 用于本地敏感数据加密存储

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Result};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// IV 长度（96 位）
pub const IV_LENGTH: usize = 12;
/// 密钥长度（AES-256）
pub const KEY_LENGTH: usize = 32;

/// 加密结果：每次调用都使用新的随机 IV
#[derive(Debug, Clone)]
pub struct Sealed {
    pub iv: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

/// 加密密钥（使用Zeroize保护）
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    key: [u8; KEY_LENGTH],
}

impl EncryptionKey {
    pub fn new(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LENGTH] = bytes
            .try_into()
            .map_err(|_| anyhow!("Key must be {} bytes for AES-256", KEY_LENGTH))?;
        Ok(Self { key })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.key
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(***)")
    }
}

/// 加密数据
///
/// # Arguments
/// * `data` - 要加密的原始数据
/// * `key` - 32字节加密密钥
///
/// # Returns
/// 返回 IV 与密文（GCM 认证标签附在密文末尾）
pub fn encrypt_data(data: &[u8], key: &EncryptionKey) -> Result<Sealed> {
    let cipher =
        Aes256Gcm::new_from_slice(key.as_slice()).map_err(|e| anyhow!("Invalid key: {}", e))?;

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, data)
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    Ok(Sealed {
        iv: nonce.to_vec(),
        ciphertext,
    })
}

/// 解密数据
///
/// 密钥错误、密文被篡改或 IV 长度不对都会返回错误
pub fn decrypt_data(iv: &[u8], ciphertext: &[u8], key: &EncryptionKey) -> Result<Vec<u8>> {
    if iv.len() != IV_LENGTH {
        return Err(anyhow!("IV must be {} bytes", IV_LENGTH));
    }

    let cipher =
        Aes256Gcm::new_from_slice(key.as_slice()).map_err(|e| anyhow!("Invalid key: {}", e))?;

    let nonce = Nonce::from_slice(iv);

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| anyhow!("Decryption failed: {}", e))?;

    Ok(plaintext)
}
