//! Domain 模块
//!
//! 钱包描述、确定性派生和会话模型

pub mod derivation;
pub mod session;
pub mod wallet;

// 重新导出常用类型
pub use derivation::{derive_hd_key_from_signature, LocalWallet, OfflineSigner};
pub use session::{OnboardingState, WalletSession};
pub use wallet::{
    is_turnkey_wallet, requires_account_derivation, ConnectorType, PrivateInformation,
    SourceAccount, WalletInfo, WalletNetworkType,
};
