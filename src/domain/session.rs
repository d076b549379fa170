//! 会话状态
//!
//! 由编排器显式持有并传递，派生服务只返回结果，不直接写会话

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::derivation::LocalWallet;
use crate::domain::wallet::PrivateInformation;

/// 简化的三值入驻状态，供不关心完整状态机的调用方使用
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OnboardingState {
    #[default]
    Disconnected,
    WalletConnected,
    AccountConnected,
}

impl OnboardingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnboardingState::Disconnected => "disconnected",
            OnboardingState::WalletConnected => "wallet_connected",
            OnboardingState::AccountConnected => "account_connected",
        }
    }
}

impl std::fmt::Display for OnboardingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
pub struct WalletSession {
    local_wallet: Option<LocalWallet>,
    hd_keys: HashMap<String, PrivateInformation>,
    onboarding_state: OnboardingState,
}

impl WalletSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录派生结果；有密钥材料时按地址缓存
    pub fn record(&mut self, wallet: LocalWallet, key_material: Option<PrivateInformation>) {
        if let Some(keys) = key_material {
            self.hd_keys.insert(wallet.address().to_string(), keys);
        }
        self.local_wallet = Some(wallet);
        self.onboarding_state = OnboardingState::AccountConnected;
    }

    pub fn set_onboarding_state(&mut self, state: OnboardingState) {
        self.onboarding_state = state;
    }

    /// 丢弃钱包和内存中的全部密钥材料
    pub fn clear(&mut self) {
        self.local_wallet = None;
        // PrivateInformation drop 时清零
        self.hd_keys.clear();
        self.onboarding_state = OnboardingState::Disconnected;
    }

    pub fn local_wallet(&self) -> Option<&LocalWallet> {
        self.local_wallet.as_ref()
    }

    pub fn hd_key(&self, address: &str) -> Option<&PrivateInformation> {
        self.hd_keys.get(address)
    }

    pub fn onboarding_state(&self) -> OnboardingState {
        self.onboarding_state
    }

    pub fn has_wallet(&self) -> bool {
        self.local_wallet.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_clear() {
        let mut session = WalletSession::new();
        assert_eq!(session.onboarding_state(), OnboardingState::Disconnected);

        let keys = PrivateInformation {
            mnemonic: "m".into(),
            private_key: vec![1; 32],
            public_key: vec![2; 33],
        };
        session.record(LocalWallet::for_address("dydx1abc"), Some(keys.clone()));

        assert!(session.has_wallet());
        assert_eq!(session.hd_key("dydx1abc"), Some(&keys));
        assert_eq!(session.onboarding_state(), OnboardingState::AccountConnected);

        session.clear();
        assert!(!session.has_wallet());
        assert!(session.hd_key("dydx1abc").is_none());
        assert_eq!(session.onboarding_state(), OnboardingState::Disconnected);
    }
}
