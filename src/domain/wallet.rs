//! 钱包领域模型
//!
//! 描述外部钱包（链族 + 连接器类型）以及派生得到的密钥材料

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// 源链链族
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletNetworkType {
    Evm,
    Cosmos,
    Solana,
}

impl WalletNetworkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletNetworkType::Evm => "evm",
            WalletNetworkType::Cosmos => "cosmos",
            WalletNetworkType::Solana => "solana",
        }
    }
}

impl std::fmt::Display for WalletNetworkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 连接器类型（钱包如何签名）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectorType {
    /// 浏览器注入钱包
    Injected,
    WalletConnect,
    Coinbase,
    /// 社交登录嵌入式钱包
    Privy,
    /// 托管钱包
    Turnkey,
    /// 链原生 offline signer
    Cosmos,
    PhantomSolana,
    /// 测试/冒充模式
    Test,
}

/// 钱包描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletInfo {
    pub network: WalletNetworkType,
    pub connector_type: ConnectorType,
    pub name: String,
    /// 社交登录提供方（如 google）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_name: Option<String>,
}

impl WalletInfo {
    pub fn new(
        network: WalletNetworkType,
        connector_type: ConnectorType,
        name: impl Into<String>,
    ) -> Self {
        Self {
            network,
            connector_type,
            name: name.into(),
            provider_name: None,
        }
    }

    pub fn with_provider(mut self, provider_name: impl Into<String>) -> Self {
        self.provider_name = Some(provider_name.into());
        self
    }

    pub fn is_custodial(&self) -> bool {
        self.connector_type == ConnectorType::Turnkey
    }

    /// 链原生签名器和测试钱包自带地址，不需要签名派生
    pub fn requires_derivation(&self) -> bool {
        !matches!(
            self.connector_type,
            ConnectorType::Cosmos | ConnectorType::Test
        )
    }
}

pub fn is_turnkey_wallet(wallet: Option<&WalletInfo>) -> bool {
    wallet.is_some_and(WalletInfo::is_custodial)
}

/// 未选择钱包时不需要派生
pub fn requires_account_derivation(wallet: Option<&WalletInfo>) -> bool {
    wallet.is_some_and(WalletInfo::requires_derivation)
}

/// 当前关联的外部账户
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceAccount {
    pub address: Option<String>,
    pub chain: Option<WalletNetworkType>,
    pub wallet_info: Option<WalletInfo>,
}

/// 派生出的私密信息
///
/// 只存在于内存或加密存储中；drop 时清零
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct PrivateInformation {
    pub mnemonic: String,
    /// 32 字节私钥
    pub private_key: Vec<u8>,
    /// 33 字节压缩公钥
    pub public_key: Vec<u8>,
}

impl PrivateInformation {
    /// 两个密钥分量是否都存在
    pub fn is_complete(&self) -> bool {
        !self.private_key.is_empty() && !self.public_key.is_empty()
    }

    pub fn private_key_hex(&self) -> String {
        hex::encode(&self.private_key)
    }
}

impl std::fmt::Debug for PrivateInformation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateInformation")
            .field("mnemonic", &"[REDACTED]")
            .field("private_key", &"[REDACTED]")
            .field("public_key", &hex::encode(&self.public_key))
            .finish()
    }
}
