//! 钱包流程决策
//!
//! 按钱包类型（托管、测试、Cosmos 原生、EVM、Solana）决定下一步入驻状态，
//! 需要时请求签名并派生交易链钱包。结果总是一个完整的决策，从不返回错误。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use crate::config::OnboardingConfig;
use crate::domain::derivation::LocalWallet;
use crate::domain::session::OnboardingState;
use crate::domain::wallet::{ConnectorType, PrivateInformation, SourceAccount, WalletNetworkType};
use crate::infrastructure::log_redact::redact_address;
use crate::service::collaborators::{MessageSigner, OfflineSigner, OfflineSignerProvider};
use crate::service::key_derivation_service::KeyDerivationService;

/// 默认社交登录等待时间
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(1000);

/// 按需派生的 Cosmos 链
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CosmosChain {
    Noble,
    Osmosis,
    Neutron,
}

impl CosmosChain {
    pub fn bech32_prefix(&self) -> &'static str {
        match self {
            CosmosChain::Noble => "noble",
            CosmosChain::Osmosis => "osmo",
            CosmosChain::Neutron => "neutron",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CosmosChain::Noble => "noble",
            CosmosChain::Osmosis => "osmosis",
            CosmosChain::Neutron => "neutron",
        }
    }
}

/// 流程输入
#[derive(Clone, Default)]
pub struct WalletFlowRequest {
    pub source_account: SourceAccount,
    /// 已有（从存储恢复的）交易链钱包
    pub has_local_wallet: bool,
    pub blocked_geo: bool,
    /// Cosmos 原生钱包已连接
    pub is_connected_native_cosmos: bool,
    /// 社交登录已认证
    pub authenticated: bool,
    /// 社交登录 SDK 已就绪
    pub ready: bool,
    pub signer: Option<Arc<dyn MessageSigner>>,
    pub offline_signer_provider: Option<Arc<dyn OfflineSignerProvider>>,
    pub chain_id: Option<String>,
}

impl WalletFlowRequest {
    pub fn new(source_account: SourceAccount) -> Self {
        Self {
            source_account,
            ..Default::default()
        }
    }

    pub fn with_signer(mut self, signer: Arc<dyn MessageSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_offline_signer_provider(
        mut self,
        provider: Arc<dyn OfflineSignerProvider>,
        chain_id: impl Into<String>,
    ) -> Self {
        self.offline_signer_provider = Some(provider);
        self.chain_id = Some(chain_id.into());
        self
    }
}

/// 流程决策
#[derive(Debug, Clone, Default)]
pub struct WalletDerivationResult {
    pub wallet: Option<LocalWallet>,
    pub hd_key: Option<PrivateInformation>,
    pub onboarding_state: OnboardingState,
    pub error: Option<String>,
}

impl WalletDerivationResult {
    fn state(onboarding_state: OnboardingState) -> Self {
        Self {
            onboarding_state,
            ..Default::default()
        }
    }

    fn failed(onboarding_state: OnboardingState, error: impl Into<String>) -> Self {
        Self {
            onboarding_state,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    fn connected(wallet: LocalWallet, hd_key: Option<PrivateInformation>) -> Self {
        Self {
            wallet: Some(wallet),
            hd_key,
            onboarding_state: OnboardingState::AccountConnected,
            error: None,
        }
    }
}

pub struct WalletFlowSupervisor {
    key_derivation: Arc<KeyDerivationService>,
    settle_delay: Duration,
    persist_keys: bool,
    /// 请求未携带 chain id 时 Cosmos 离线签名器使用的链
    default_chain_id: Option<String>,
}

impl WalletFlowSupervisor {
    pub fn new(key_derivation: Arc<KeyDerivationService>) -> Self {
        Self {
            key_derivation,
            settle_delay: DEFAULT_SETTLE_DELAY,
            persist_keys: true,
            default_chain_id: None,
        }
    }

    pub fn from_config(key_derivation: Arc<KeyDerivationService>, config: &OnboardingConfig) -> Self {
        Self::new(key_derivation)
            .with_settle_delay(Duration::from_millis(config.social_login_settle_ms))
            .with_persist_keys(config.persist_derived_keys)
            .with_chain_id(config.chain_id.clone())
    }

    pub fn with_chain_id(mut self, chain_id: impl Into<String>) -> Self {
        self.default_chain_id = Some(chain_id.into());
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_persist_keys(mut self, persist: bool) -> Self {
        self.persist_keys = persist;
        self
    }

    /// 处理钱包连接，返回下一步状态；内部 panic 也会转成 Disconnected
    pub async fn handle_wallet_connection(&self, request: WalletFlowRequest) -> WalletDerivationResult {
        match AssertUnwindSafe(self.dispatch(request)).catch_unwind().await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!("wallet flow panicked");
                WalletDerivationResult::failed(OnboardingState::Disconnected, "Unknown error")
            }
        }
    }

    async fn dispatch(&self, request: WalletFlowRequest) -> WalletDerivationResult {
        let connector = request
            .source_account
            .wallet_info
            .as_ref()
            .map(|w| w.connector_type);

        match connector {
            Some(ConnectorType::Turnkey) => return self.handle_turnkey_flow(&request).await,
            Some(ConnectorType::Test) => return handle_test_wallet_flow(&request.source_account),
            _ => {}
        }

        match request.source_account.chain {
            Some(WalletNetworkType::Cosmos) if request.is_connected_native_cosmos => {
                handle_cosmos_flow(&request, self.default_chain_id.as_deref()).await
            }
            Some(WalletNetworkType::Evm) => self.handle_evm_flow(&request).await,
            Some(WalletNetworkType::Solana) => self.handle_solana_flow(&request).await,
            _ => WalletDerivationResult::state(OnboardingState::Disconnected),
        }
    }

    /// 托管钱包没有 WalletConnected 中间态
    async fn handle_turnkey_flow(&self, request: &WalletFlowRequest) -> WalletDerivationResult {
        if request.has_local_wallet {
            return WalletDerivationResult::state(OnboardingState::AccountConnected);
        }

        match (&request.signer, request.blocked_geo) {
            (Some(signer), false) => match self.sign_and_derive(signer.as_ref()).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(error = %e, "turnkey signing failed");
                    WalletDerivationResult::failed(
                        OnboardingState::Disconnected,
                        "Failed to sign with Turnkey",
                    )
                }
            },
            _ => WalletDerivationResult::state(OnboardingState::Disconnected),
        }
    }

    async fn handle_evm_flow(&self, request: &WalletFlowRequest) -> WalletDerivationResult {
        if request.has_local_wallet {
            return WalletDerivationResult::state(OnboardingState::AccountConnected);
        }

        if request.blocked_geo {
            return WalletDerivationResult::state(OnboardingState::WalletConnected);
        }

        let is_privy = request
            .source_account
            .wallet_info
            .as_ref()
            .is_some_and(|w| w.connector_type == ConnectorType::Privy);

        if is_privy && request.authenticated && request.ready {
            // 等社交登录流程稳定后再请求签名
            tokio::time::sleep(self.settle_delay).await;

            let outcome = match &request.signer {
                Some(signer) => self.sign_and_derive(signer.as_ref()).await,
                None => Err("No message signer available".to_string()),
            };

            return match outcome {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(error = %e, "privy signing failed");
                    WalletDerivationResult::failed(
                        OnboardingState::WalletConnected,
                        "Failed to sign with Privy",
                    )
                }
            };
        }

        // 其它 EVM 钱包等待显式触发派生
        WalletDerivationResult::state(OnboardingState::WalletConnected)
    }

    async fn handle_solana_flow(&self, request: &WalletFlowRequest) -> WalletDerivationResult {
        if request.has_local_wallet {
            return WalletDerivationResult::state(OnboardingState::AccountConnected);
        }

        if request.blocked_geo {
            return WalletDerivationResult::state(OnboardingState::WalletConnected);
        }

        if let Some(signer) = &request.signer {
            return match self.sign_and_derive(signer.as_ref()).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(error = %e, "solana signing failed");
                    WalletDerivationResult::failed(
                        OnboardingState::WalletConnected,
                        "Failed to sign with Solana wallet",
                    )
                }
            };
        }

        WalletDerivationResult::state(OnboardingState::WalletConnected)
    }

    async fn sign_and_derive(
        &self,
        signer: &dyn MessageSigner,
    ) -> Result<WalletDerivationResult, String> {
        let signature = signer
            .sign_message()
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| "Failed to get signature".to_string())?;

        let result = self
            .key_derivation
            .derive_from_signature(&signature, self.persist_keys)
            .await
            .map_err(|e| e.to_string())?;

        let hd_key = result
            .key_material
            .clone()
            .filter(PrivateInformation::is_complete)
            .ok_or_else(|| "Failed to derive wallet from signature".to_string())?;

        Ok(WalletDerivationResult::connected(result.wallet, Some(hd_key)))
    }

    /// 从助记词按需派生 Cosmos 链钱包
    pub fn derive_cosmos_wallet(&self, mnemonic: &str, chain: CosmosChain) -> Option<LocalWallet> {
        match LocalWallet::from_mnemonic(mnemonic, chain.bech32_prefix()) {
            Ok(wallet) => Some(wallet),
            Err(e) => {
                tracing::error!(chain = chain.as_str(), error = %e, "failed to derive cosmos wallet");
                None
            }
        }
    }

    /// 从已连接的 Cosmos 原生签名器构建钱包
    pub fn derive_cosmos_wallet_from_signer(
        &self,
        signer: Arc<dyn OfflineSigner>,
        chain: &str,
    ) -> Option<LocalWallet> {
        let wallet = LocalWallet::from_offline_signer(signer);
        if wallet.address().is_empty() {
            tracing::error!(chain, "offline signer has no address");
            return None;
        }
        Some(wallet)
    }
}

/// 测试/冒充钱包：只有地址，没有密钥材料
fn handle_test_wallet_flow(source_account: &SourceAccount) -> WalletDerivationResult {
    match &source_account.address {
        Some(address) => {
            tracing::debug!(address = %redact_address(address), "impersonating wallet");
            WalletDerivationResult::connected(LocalWallet::for_address(address.clone()), None)
        }
        None => WalletDerivationResult::failed(
            OnboardingState::Disconnected,
            "Missing test wallet address",
        ),
    }
}

/// Cosmos 原生签名器自带地址，不需要签名派生，也没有密钥材料可持久化
async fn handle_cosmos_flow(
    request: &WalletFlowRequest,
    default_chain_id: Option<&str>,
) -> WalletDerivationResult {
    let chain_id = request.chain_id.as_deref().or(default_chain_id);
    let (Some(provider), Some(chain_id)) = (&request.offline_signer_provider, chain_id) else {
        return WalletDerivationResult::failed(
            OnboardingState::Disconnected,
            "Missing Cosmos dependencies",
        );
    };

    match provider.get_offline_signer(chain_id).await {
        Ok(signer) => {
            let wallet = LocalWallet::from_offline_signer(signer);
            if !wallet.address().is_empty() {
                return WalletDerivationResult::connected(wallet, None);
            }
            tracing::error!(chain_id = %chain_id, "offline signer has no address");
        }
        Err(e) => {
            tracing::error!(chain_id = %chain_id, error = %e, "cosmos wallet creation failed");
        }
    }

    WalletDerivationResult::failed(OnboardingState::Disconnected, "Failed to create Cosmos wallet")
}
