//! 交易链钱包派生
//!
//! 签名 → keccak256 熵 → 24 词助记词 → 种子 → `m/44'/118'/0'/0/0` secp256k1 密钥
//! → bech32(前缀, hash160(压缩公钥))。同一签名永远得到同一密钥，不依赖网络。

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use bip39::{Language, Mnemonic};
use bitcoin::hashes::{hash160, Hash};
use coins_bip32::path::DerivationPath;
use k256::ecdsa::{signature::Signer, Signature, SigningKey};
use sha3::{Digest, Keccak256};
use zeroize::Zeroize;

use crate::domain::wallet::PrivateInformation;

/// Cosmos 标准派生路径
pub const COSMOS_HD_PATH: &str = "m/44'/118'/0'/0/0";

/// 签名中参与派生的 r‖s 长度
const RS_LENGTH: usize = 64;

/// 链原生签名器（如 Cosmos 钱包扩展提供的 offline signer）
#[async_trait]
pub trait OfflineSigner: Send + Sync {
    /// 签名器账户地址
    fn address(&self) -> String;

    /// 对任意字节签名
    async fn sign(&self, payload: &[u8]) -> Result<Vec<u8>>;
}

#[derive(Clone)]
enum SignerBackend {
    Local(SigningKey),
    Offline(Arc<dyn OfflineSigner>),
    /// 只有地址，无法签名（测试/冒充模式）
    AddressOnly,
}

/// 派生出的交易链钱包句柄
#[derive(Clone)]
pub struct LocalWallet {
    address: String,
    backend: SignerBackend,
}

impl LocalWallet {
    /// 从助记词构建钱包
    pub fn from_mnemonic(phrase: &str, prefix: &str) -> Result<Self> {
        let mnemonic = Mnemonic::parse_in(Language::English, phrase.trim())
            .context("Invalid mnemonic")?;
        let signing_key = signing_key_from_mnemonic(&mnemonic)?;
        Self::from_signing_key(signing_key, prefix)
    }

    /// 从原始私钥构建钱包（`0x` 前缀可选），此路径没有助记词
    pub fn from_private_key(hex_key: &str, prefix: &str) -> Result<Self> {
        let mut bytes = hex::decode(strip_hex_prefix(hex_key.trim()))
            .context("Private key is not valid hex")?;
        if bytes.len() != 32 {
            let len = bytes.len();
            bytes.zeroize();
            bail!("Private key must be 32 bytes, got {}", len);
        }

        let signing_key = SigningKey::from_slice(&bytes);
        bytes.zeroize();
        let signing_key = signing_key.map_err(|_| anyhow!("Private key is out of range"))?;

        Self::from_signing_key(signing_key, prefix)
    }

    pub fn from_offline_signer(signer: Arc<dyn OfflineSigner>) -> Self {
        Self {
            address: signer.address(),
            backend: SignerBackend::Offline(signer),
        }
    }

    /// 只携带地址的钱包，不能签名
    pub fn for_address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            backend: SignerBackend::AddressOnly,
        }
    }

    fn from_signing_key(signing_key: SigningKey, prefix: &str) -> Result<Self> {
        let public_key = compressed_public_key(&signing_key);
        let address = public_key_to_address(&public_key, prefix)?;
        Ok(Self {
            address,
            backend: SignerBackend::Local(signing_key),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// 压缩公钥；非本地密钥返回 `None`
    pub fn public_key(&self) -> Option<Vec<u8>> {
        match &self.backend {
            SignerBackend::Local(key) => Some(compressed_public_key(key)),
            _ => None,
        }
    }

    pub fn can_sign(&self) -> bool {
        !matches!(self.backend, SignerBackend::AddressOnly)
    }

    /// 签名；本地密钥使用 SHA-256 摘要的 ECDSA，返回 64 字节 r‖s
    pub async fn sign(&self, payload: &[u8]) -> Result<Vec<u8>> {
        match &self.backend {
            SignerBackend::Local(key) => {
                let signature: Signature = key
                    .try_sign(payload)
                    .map_err(|e| anyhow!("Signing failed: {}", e))?;
                Ok(signature.to_bytes().to_vec())
            }
            SignerBackend::Offline(signer) => signer.sign(payload).await,
            SignerBackend::AddressOnly => {
                bail!("Wallet {} has no signing capability", self.address)
            }
        }
    }
}

impl PartialEq for LocalWallet {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for LocalWallet {}

impl std::fmt::Debug for LocalWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match self.backend {
            SignerBackend::Local(_) => "local",
            SignerBackend::Offline(_) => "offline_signer",
            SignerBackend::AddressOnly => "address_only",
        };
        f.debug_struct("LocalWallet")
            .field("address", &self.address)
            .field("backend", &backend)
            .finish()
    }
}

/// 从钱包签名确定性派生 HD 密钥材料
///
/// 只使用签名的前 64 字节（r‖s），恢复位 v 不参与派生
pub fn derive_hd_key_from_signature(signature: &str) -> Result<PrivateInformation> {
    let bytes = hex::decode(strip_hex_prefix(signature.trim()))
        .context("Signature is not valid hex")?;
    if bytes.len() < RS_LENGTH {
        bail!(
            "Signature must be at least {} bytes, got {}",
            RS_LENGTH,
            bytes.len()
        );
    }

    let mut entropy: [u8; 32] = Keccak256::digest(&bytes[..RS_LENGTH]).into();
    let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy);
    entropy.zeroize();
    let mnemonic = mnemonic.context("Failed to build mnemonic from entropy")?;

    derive_hd_key_from_mnemonic(&mnemonic)
}

/// 助记词 → 私钥/公钥
pub fn derive_hd_key_from_mnemonic(mnemonic: &Mnemonic) -> Result<PrivateInformation> {
    let signing_key = signing_key_from_mnemonic(mnemonic)?;

    Ok(PrivateInformation {
        mnemonic: mnemonic.to_string(),
        private_key: signing_key.to_bytes().to_vec(),
        public_key: compressed_public_key(&signing_key),
    })
}

/// 校验 BIP-39 助记词（12 或 24 词）
pub fn parse_mnemonic(phrase: &str) -> Result<Mnemonic> {
    let mnemonic = Mnemonic::parse_in(Language::English, phrase.trim())
        .context("Invalid mnemonic")?;

    match mnemonic.word_count() {
        12 | 24 => Ok(mnemonic),
        n => bail!("Mnemonic must have 12 or 24 words, got {}", n),
    }
}

/// bech32(前缀, RIPEMD160(SHA256(压缩公钥)))
pub fn public_key_to_address(public_key: &[u8], prefix: &str) -> Result<String> {
    let hrp = bech32::Hrp::parse(prefix).context("Invalid bech32 prefix")?;
    let hash = hash160::Hash::hash(public_key).to_byte_array();

    bech32::encode::<bech32::Bech32>(hrp, &hash).context("Failed to encode bech32 address")
}

/// 地址前缀与 20 字节载荷校验
pub fn validate_address(address: &str, prefix: &str) -> bool {
    match bech32::decode(address) {
        Ok((hrp, data)) => hrp.as_str() == prefix && data.len() == 20,
        Err(_) => false,
    }
}

fn signing_key_from_mnemonic(mnemonic: &Mnemonic) -> Result<SigningKey> {
    use coins_bip32::prelude::*;

    let mut seed = mnemonic.to_seed("");

    let derivation_path = COSMOS_HD_PATH
        .parse::<DerivationPath>()
        .context("Invalid derivation path")?;

    let master_key = XPriv::root_from_seed(&seed, None);
    seed.zeroize();
    let master_key = master_key.context("Failed to derive master key")?;

    let derived_key = master_key
        .derive_path(&derivation_path)
        .context("Failed to derive key")?;

    // XPriv 实现 AsRef<SigningKey>
    let signing_key: &SigningKey = derived_key.as_ref();
    Ok(signing_key.clone())
}

fn compressed_public_key(signing_key: &SigningKey) -> Vec<u8> {
    signing_key
        .verifying_key()
        .to_encoded_point(true)
        .as_bytes()
        .to_vec()
}

fn strip_hex_prefix(value: &str) -> &str {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}
