//! 入驻编排器
//!
//! 把状态机和外部协作方（钱包连接、签名、地址上传）绑在一起，驱动完整流程。
//! 只有编排器调用有副作用的协作方。
//!
//! 并发模型：
//! - `select_wallet` / `derive_account` / `disconnect` 由 `op_lock` 串行化
//! - 状态机本身由独立的 mutex 保护，只在单次 `send` 期间持有
//! - 重复的派生请求通过 `deriving` 标志直接丢弃，不排队
//! - 派生开始时记录上下文代数，完成时代数已变化则丢弃结果

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::OnboardingConfig;
use crate::domain::derivation::LocalWallet;
use crate::domain::session::{OnboardingState, WalletSession};
use crate::domain::wallet::{is_turnkey_wallet, ConnectorType, WalletInfo, WalletNetworkType};
use crate::error::AppError;
use crate::infrastructure::log_redact::{redact_address, redact_signature};
use crate::service::collaborators::{
    AddressUploader, ConnectWalletRequest, ConnectedAddresses, MessageSigner, WalletConnector,
};
use crate::service::key_derivation_service::{KeyDerivationService, WalletCreationResult};
use crate::service::onboarding_state_machine::{
    create_onboarding_state_machine, map_machine_state_to_onboarding_state, ContextGeneration,
    EventKind, OnboardingEvent, OnboardingMachineContext, OnboardingMachineState,
    OnboardingStateMachine, TurnkeyAuthMethod,
};
use crate::service::state_machine::SendOutcome;

/// 编排器依赖的协作方
#[derive(Clone)]
pub struct OnboardingDependencies {
    pub connector: Arc<dyn WalletConnector>,
    pub signer: Arc<dyn MessageSigner>,
    pub uploader: Option<Arc<dyn AddressUploader>>,
    pub key_derivation: Arc<KeyDerivationService>,
}

/// 托管钱包邮箱登录状态（由外部认证组件上报）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustodialAuthStatus {
    Idle,
    Loading,
    Success { session: String },
    Error(String),
}

/// `derive_account` 的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeriveOutcome {
    /// 状态不允许、已有派生在进行或状态机未接受开始事件
    Skipped,
    Derived { dydx_address: String },
    Failed { error: String },
    /// 派生期间会话被断开或重置，结果被丢弃
    Discarded,
}

/// 对外暴露的只读视图
#[derive(Debug, Clone)]
pub struct OnboardingSnapshot {
    pub state: OnboardingMachineState,
    pub context: Arc<OnboardingMachineContext>,
    pub onboarding_state: OnboardingState,
}

impl OnboardingSnapshot {
    pub fn is_idle(&self) -> bool {
        self.state == OnboardingMachineState::Idle
    }

    pub fn is_selecting_wallet(&self) -> bool {
        self.state == OnboardingMachineState::SelectingWallet
    }

    pub fn is_connecting_wallet(&self) -> bool {
        self.state == OnboardingMachineState::ConnectingWallet
    }

    pub fn is_wallet_connected(&self) -> bool {
        self.state == OnboardingMachineState::WalletConnected
    }

    pub fn is_authenticating_turnkey(&self) -> bool {
        self.state == OnboardingMachineState::AuthenticatingTurnkey
    }

    pub fn is_turnkey_awaiting_email(&self) -> bool {
        self.state == OnboardingMachineState::TurnkeyAwaitingEmail
    }

    pub fn is_turnkey_authenticated(&self) -> bool {
        self.state == OnboardingMachineState::TurnkeyAuthenticated
    }

    pub fn is_deriving_account(&self) -> bool {
        self.state == OnboardingMachineState::DerivingAccount
    }

    pub fn is_uploading_turnkey_address(&self) -> bool {
        self.state == OnboardingMachineState::UploadingTurnkeyAddress
    }

    pub fn is_account_connected(&self) -> bool {
        self.state == OnboardingMachineState::AccountConnected
    }

    pub fn is_disconnecting(&self) -> bool {
        self.state == OnboardingMachineState::Disconnecting
    }

    pub fn is_error(&self) -> bool {
        self.state == OnboardingMachineState::Error
    }

    pub fn error(&self) -> Option<&str> {
        self.context.error.as_deref()
    }

    pub fn onboarding_state(&self) -> OnboardingState {
        self.onboarding_state
    }
}

/// 进行中标志，drop 时释放
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct OnboardingOrchestrator {
    machine: Mutex<OnboardingStateMachine>,
    op_lock: Mutex<()>,
    deriving: AtomicBool,
    generation: ContextGeneration,
    session: Mutex<WalletSession>,
    deps: OnboardingDependencies,
    persist_keys: bool,
}

impl OnboardingOrchestrator {
    pub fn new(deps: OnboardingDependencies) -> Self {
        let generation = ContextGeneration::new();
        Self {
            machine: Mutex::new(create_onboarding_state_machine(generation.clone())),
            op_lock: Mutex::new(()),
            deriving: AtomicBool::new(false),
            generation,
            session: Mutex::new(WalletSession::new()),
            deps,
            persist_keys: true,
        }
    }

    pub fn from_config(deps: OnboardingDependencies, config: &OnboardingConfig) -> Self {
        Self::new(deps).with_persist_keys(config.persist_derived_keys)
    }

    pub fn with_persist_keys(mut self, persist: bool) -> Self {
        self.persist_keys = persist;
        self
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 状态机访问
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// 外部事件入口（如托管认证组件上报的事件）
    ///
    /// 到达 WalletConnected 且已有缓存签名时自动派生；
    /// 若其它操作正在进行，由该操作自己负责
    pub async fn send(&self, event: OnboardingEvent) -> SendOutcome<OnboardingMachineState> {
        let outcome = self.dispatch(event).await;

        if outcome.is_transitioned() && self.should_auto_derive().await {
            if let Ok(_op) = self.op_lock.try_lock() {
                self.auto_derive_locked().await;
            }
        }

        outcome
    }

    pub async fn state(&self) -> OnboardingMachineState {
        self.machine.lock().await.state()
    }

    pub async fn context(&self) -> Arc<OnboardingMachineContext> {
        self.machine.lock().await.context()
    }

    pub async fn matches(&self, state: OnboardingMachineState) -> bool {
        self.machine.lock().await.matches(state)
    }

    pub async fn can(&self, kind: EventKind) -> bool {
        self.machine.lock().await.can(kind)
    }

    pub async fn snapshot(&self) -> OnboardingSnapshot {
        let machine = self.machine.lock().await;
        let state = machine.state();
        OnboardingSnapshot {
            state,
            context: machine.context(),
            onboarding_state: map_machine_state_to_onboarding_state(state),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.current()
    }

    /// 当前会话中的交易链钱包
    pub async fn session_wallet(&self) -> Option<LocalWallet> {
        self.session.lock().await.local_wallet().cloned()
    }

    pub async fn session_onboarding_state(&self) -> OnboardingState {
        self.session.lock().await.onboarding_state()
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 操作
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// 选择钱包；`None` 表示断开
    pub async fn select_wallet(&self, wallet: Option<WalletInfo>) {
        let _op = self.op_lock.lock().await;

        let Some(wallet) = wallet else {
            self.disconnect_locked().await;
            return;
        };

        let selected = self
            .dispatch(OnboardingEvent::SelectWallet {
                wallet: wallet.clone(),
            })
            .await;
        if !selected.is_transitioned() {
            tracing::debug!(wallet = %wallet.name, "wallet selection ignored in current state");
            return;
        }

        // 托管钱包的认证由外部组件完成，之后上报 TURNKEY_AUTHENTICATED/FAILED
        if wallet.is_custodial() {
            self.dispatch(OnboardingEvent::TurnkeyAuthStarted {
                method: TurnkeyAuthMethod::Oauth,
            })
            .await;
            return;
        }

        let is_evm_account_connected = self.is_evm_account_connected().await;
        let request = ConnectWalletRequest {
            wallet: wallet.clone(),
            force_connect: false,
            is_evm_account_connected,
        };

        match self.deps.connector.connect_wallet(request).await {
            Ok(()) => {
                let addresses = self.deps.connector.connected_addresses().await;
                let Some((address, chain)) =
                    resolve_source_address(wallet.connector_type, &addresses)
                else {
                    tracing::warn!(wallet = %wallet.name, "wallet connected but no address available");
                    return;
                };

                tracing::info!(
                    wallet = %wallet.name,
                    chain = %chain,
                    address = %redact_address(&address),
                    "wallet connected"
                );
                self.dispatch(OnboardingEvent::WalletConnected { address, chain })
                    .await;

                if self.should_auto_derive().await {
                    self.auto_derive_locked().await;
                }
            }
            Err(e) => {
                tracing::warn!(wallet = %wallet.name, error = %e, "wallet connection failed");
                self.dispatch(OnboardingEvent::WalletConnectionFailed { error: e.message })
                    .await;
            }
        }
    }

    /// 派生交易链账户
    ///
    /// 只在 WalletConnected / TurnkeyAuthenticated 下执行；已有派生进行中时直接丢弃
    pub async fn derive_account(&self) -> DeriveOutcome {
        let Some(_in_flight) = InFlight::acquire(&self.deriving) else {
            tracing::debug!("derivation already in progress, request dropped");
            return DeriveOutcome::Skipped;
        };

        let _op = self.op_lock.lock().await;
        self.derive_locked().await
    }

    /// DISCONNECT → 外部断开 → RESET，并清空会话钱包
    pub async fn disconnect(&self) {
        let _op = self.op_lock.lock().await;
        self.disconnect_locked().await;
    }

    /// 断开并删除持久化的私钥
    pub async fn sign_out(&self) -> Result<(), AppError> {
        let _op = self.op_lock.lock().await;
        self.disconnect_locked().await;
        self.deps.key_derivation.clear_stored_wallet()
    }

    /// 从加密存储恢复钱包到会话，返回地址
    pub async fn restore_session(&self) -> Option<String> {
        let _op = self.op_lock.lock().await;

        let result = self.deps.key_derivation.restore_from_storage().await?;
        let address = result.address().to_string();
        self.session
            .lock()
            .await
            .record(result.wallet.clone(), result.key_material.clone());

        tracing::info!(address = %redact_address(&address), "session restored");
        Some(address)
    }

    /// 托管钱包派生后是否需要上传地址（外部策略）
    pub async fn set_needs_address_upload(&self, needs_upload: bool) {
        self.machine
            .lock()
            .await
            .update_context(|ctx| ctx.needs_address_upload = needs_upload);
    }

    /// 处理托管钱包邮箱登录状态变化
    pub async fn handle_custodial_auth_status(
        &self,
        status: CustodialAuthStatus,
    ) -> SendOutcome<OnboardingMachineState> {
        let snapshot = self.snapshot().await;
        if !is_turnkey_wallet(snapshot.context.selected_wallet.as_ref()) {
            return SendOutcome::Ignored;
        }

        match status {
            CustodialAuthStatus::Success { session } if snapshot.is_authenticating_turnkey() => {
                self.send(OnboardingEvent::TurnkeyAuthenticated { session })
                    .await
            }
            CustodialAuthStatus::Error(error) => {
                self.send(OnboardingEvent::TurnkeyAuthFailed { error }).await
            }
            _ => SendOutcome::Ignored,
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // 内部实现（调用方已持有 op_lock）
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    async fn dispatch(&self, event: OnboardingEvent) -> SendOutcome<OnboardingMachineState> {
        let (outcome, state) = {
            let mut machine = self.machine.lock().await;
            let outcome = machine.send(event).await;
            (outcome, machine.state())
        };

        let mut session = self.session.lock().await;
        // 回到 Idle 时会话钱包和内存密钥随上下文一起销毁
        if let SendOutcome::Transitioned { from, to } = &outcome {
            if *to == OnboardingMachineState::Idle && *from != OnboardingMachineState::Idle {
                session.clear();
            }
        }
        session.set_onboarding_state(map_machine_state_to_onboarding_state(state));

        outcome
    }

    async fn disconnect_locked(&self) {
        self.dispatch(OnboardingEvent::Disconnect).await;

        if let Err(e) = self.deps.connector.disconnect_wallet().await {
            tracing::warn!(error = %e, "external wallet disconnect failed");
        }

        self.dispatch(OnboardingEvent::Reset).await;
        self.session.lock().await.clear();
        tracing::info!("wallet disconnected");
    }

    async fn auto_derive_locked(&self) {
        let Some(_in_flight) = InFlight::acquire(&self.deriving) else {
            return;
        };

        tracing::debug!("cached signature found, deriving account automatically");
        self.derive_locked().await;
    }

    async fn derive_locked(&self) -> DeriveOutcome {
        let state = self.state().await;
        if !matches!(
            state,
            OnboardingMachineState::WalletConnected | OnboardingMachineState::TurnkeyAuthenticated
        ) {
            return DeriveOutcome::Skipped;
        }

        let generation = self.generation.current();

        if !self
            .dispatch(OnboardingEvent::StartDeriveAccount)
            .await
            .is_transitioned()
        {
            tracing::debug!(state = %state, "START_DERIVE_ACCOUNT not accepted");
            return DeriveOutcome::Skipped;
        }

        match self.run_derivation(generation).await {
            Ok(outcome) => outcome,
            Err(error) => {
                if !self.generation.is_current(generation) {
                    tracing::warn!(error = %error, "derivation failed after session changed, ignoring");
                    return DeriveOutcome::Discarded;
                }

                tracing::warn!(error = %error, "account derivation failed");
                self.dispatch(OnboardingEvent::AccountDerivationFailed {
                    error: error.clone(),
                })
                .await;
                DeriveOutcome::Failed { error }
            }
        }
    }

    async fn run_derivation(&self, generation: u64) -> Result<DeriveOutcome, String> {
        let signature = self
            .deps
            .signer
            .sign_message()
            .await
            .map_err(|e| e.message)?
            .ok_or_else(|| "Failed to get signature".to_string())?;
        tracing::debug!(signature = %redact_signature(&signature), "onboarding signature received");

        let mut result = self
            .deps
            .key_derivation
            .derive_from_signature(&signature, false)
            .await
            .map_err(|e| e.message)?;

        // 签名期间会话被断开或重置：丢弃结果，不写存储也不发事件
        if !self.is_still_deriving(generation).await {
            tracing::warn!("session changed during derivation, discarding derived wallet");
            return Ok(DeriveOutcome::Discarded);
        }

        if self.persist_keys {
            self.deps
                .key_derivation
                .persist_wallet(&mut result)
                .await
                .map_err(|e| e.message)?;

            if !self.is_still_deriving(generation).await {
                tracing::warn!("session changed while persisting, discarding derived wallet");
                return Ok(self.discard_derived(&result));
            }
        }

        let dydx_address = result.address().to_string();
        let context = self.context().await;
        let upload_required =
            is_turnkey_wallet(context.selected_wallet.as_ref()) && context.needs_address_upload;

        // 需要上传时 ACCOUNT_DERIVED 被守卫忽略，由 TURNKEY_UPLOAD_STARTED 推进
        let derived = self
            .dispatch(OnboardingEvent::AccountDerived {
                dydx_address: dydx_address.clone(),
                wallet: Some(result.wallet.clone()),
            })
            .await;
        let advanced = if upload_required {
            self.dispatch(OnboardingEvent::TurnkeyUploadStarted).await
        } else {
            derived
        };

        let SendOutcome::Transitioned { to, .. } = advanced else {
            tracing::warn!("derived account not accepted in current state, discarding it");
            return Ok(self.discard_derived(&result));
        };

        {
            // 持有会话锁检查代数：之后的重置一定会清空这里写入的钱包
            let mut session = self.session.lock().await;
            if !self.generation.is_current(generation) {
                return Ok(self.discard_derived(&result));
            }
            session.record(result.wallet.clone(), result.key_material.clone());
            session.set_onboarding_state(map_machine_state_to_onboarding_state(to));
        }

        if upload_required {
            let upload = match &self.deps.uploader {
                Some(uploader) => uploader.upload_address(&dydx_address).await,
                None => Err(AppError::upload_failed("No address uploader configured")),
            };

            if let Err(e) = upload {
                tracing::warn!(error = %e, "turnkey address upload failed");
                self.dispatch(OnboardingEvent::TurnkeyUploadFailed {
                    error: e.message.clone(),
                })
                .await;
                return Ok(DeriveOutcome::Failed { error: e.message });
            }

            self.dispatch(OnboardingEvent::TurnkeyUploadSuccess).await;
        }

        tracing::info!(address = %redact_address(&dydx_address), "account derived");
        Ok(DeriveOutcome::Derived { dydx_address })
    }

    /// 代数未变且仍处于 DerivingAccount
    async fn is_still_deriving(&self, generation: u64) -> bool {
        self.generation.is_current(generation)
            && self.matches(OnboardingMachineState::DerivingAccount).await
    }

    /// 丢弃过期的派生结果；已写入的私钥一并删除
    fn discard_derived(&self, result: &WalletCreationResult) -> DeriveOutcome {
        if result.persisted {
            if let Err(e) = self.deps.key_derivation.clear_stored_wallet() {
                tracing::warn!(error = %e, "failed to remove discarded wallet from storage");
            }
        }
        DeriveOutcome::Discarded
    }

    /// WalletConnected、有源地址、尚未派生，且该地址有缓存签名
    async fn should_auto_derive(&self) -> bool {
        let (state, context) = {
            let machine = self.machine.lock().await;
            (machine.state(), machine.context())
        };

        if state != OnboardingMachineState::WalletConnected
            || context.dydx_address.is_some()
            || self.deriving.load(Ordering::SeqCst)
        {
            return false;
        }

        match &context.wallet_address {
            Some(address) => self.deps.signer.has_cached_signature(address).await,
            None => false,
        }
    }

    async fn is_evm_account_connected(&self) -> bool {
        match self.deps.connector.connected_addresses().await.evm {
            Some(address) => self.deps.signer.has_cached_signature(&address).await,
            None => false,
        }
    }
}

/// 按钱包类型选择源地址：Phantom → Solana，Cosmos 连接器 → Cosmos，否则 EVM
pub fn resolve_source_address(
    connector: ConnectorType,
    addresses: &ConnectedAddresses,
) -> Option<(String, WalletNetworkType)> {
    match (connector, &addresses.solana, &addresses.cosmos) {
        (ConnectorType::PhantomSolana, Some(solana), _) => {
            return Some((solana.clone(), WalletNetworkType::Solana))
        }
        (ConnectorType::Cosmos, _, Some(cosmos)) => {
            return Some((cosmos.clone(), WalletNetworkType::Cosmos))
        }
        _ => {}
    }

    addresses
        .evm
        .clone()
        .map(|evm| (evm, WalletNetworkType::Evm))
}
