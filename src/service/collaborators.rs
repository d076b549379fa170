//! 外部协作方接口
//!
//! 钱包连接、签名请求、地址上传和链原生签名器都由外部实现，
//! 编排器是唯一调用这些接口的组件

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::domain::wallet::WalletInfo;

pub use crate::domain::derivation::OfflineSigner;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectWalletRequest {
    pub wallet: WalletInfo,
    pub force_connect: bool,
    pub is_evm_account_connected: bool,
}

/// 连接后各链族可用的地址
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedAddresses {
    pub evm: Option<String>,
    pub solana: Option<String>,
    pub cosmos: Option<String>,
}

#[async_trait]
pub trait WalletConnector: Send + Sync {
    async fn connect_wallet(&self, request: ConnectWalletRequest) -> Result<(), AppError>;

    async fn disconnect_wallet(&self) -> Result<(), AppError>;

    /// 当前已连接的地址（连接成功后读取）
    async fn connected_addresses(&self) -> ConnectedAddresses;
}

#[async_trait]
pub trait MessageSigner: Send + Sync {
    /// 请求对固定入驻消息签名；用户拒绝或签名不可用时返回 `None`
    async fn sign_message(&self) -> Result<Option<String>, AppError>;

    /// 该地址是否已有缓存签名（可以免确认自动派生）
    async fn has_cached_signature(&self, address: &str) -> bool;
}

#[async_trait]
pub trait AddressUploader: Send + Sync {
    async fn upload_address(&self, dydx_address: &str) -> Result<(), AppError>;
}

#[async_trait]
pub trait OfflineSignerProvider: Send + Sync {
    async fn get_offline_signer(&self, chain_id: &str) -> Result<Arc<dyn OfflineSigner>, AppError>;
}
