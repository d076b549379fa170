//! PBKDF2 密钥派生模块
//! 用于从本地安装盐值派生存储加密密钥

use anyhow::{anyhow, Result};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;

use crate::infrastructure::encryption::{EncryptionKey, KEY_LENGTH};

/// PBKDF2 密钥派生参数
const PBKDF2_ITERATIONS: u32 = 100_000; // 100,000次迭代
pub const SALT_LENGTH: usize = 32; // 32字节安装盐值

/// 固定的应用常量，作为 PBKDF2 的 salt 参数
const APP_KDF_SALT: &[u8] = b"ironlink-secure-storage-v1";

/// 生成随机安装盐值
pub fn generate_salt() -> Vec<u8> {
    let mut salt = vec![0u8; SALT_LENGTH];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// 从安装盐值派生存储密钥
///
/// 安装盐值作为密码输入，固定应用常量作为 PBKDF2 salt 参数
///
/// # Arguments
/// * `install_salt` - 安装盐值（明文保存，不是秘密）
///
/// # Returns
/// 返回 32 字节 AES-256 密钥
pub fn derive_storage_key(install_salt: &[u8]) -> Result<EncryptionKey> {
    if install_salt.len() != SALT_LENGTH {
        return Err(anyhow!("Salt must be {} bytes", SALT_LENGTH));
    }

    let mut key = [0u8; KEY_LENGTH];
    pbkdf2_hmac::<Sha256>(install_salt, APP_KDF_SALT, PBKDF2_ITERATIONS, &mut key);

    Ok(EncryptionKey::new(key))
}

/// 获取PBKDF2迭代次数
pub fn get_iterations() -> u32 {
    PBKDF2_ITERATIONS
}
