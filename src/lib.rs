//! IronLink - 交易链钱包入驻核心
//!
//! 用外部钱包签名确定性派生交易链账户，本地加密保存私钥，
//! 由状态机驱动连接、认证、派生、上传的完整流程

pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod service;

// 重新导出常用类型
pub use error::{AppError, AppErrorCode};

pub mod prelude {
    pub use crate::{
        config::Config,
        domain::{LocalWallet, OnboardingState, WalletInfo, WalletNetworkType},
        error::{AppError, AppErrorCode},
        infrastructure::SecureStorageService,
        service::{
            KeyDerivationService, OnboardingEvent, OnboardingMachineState,
            OnboardingOrchestrator, WalletFlowSupervisor,
        },
    };
}
