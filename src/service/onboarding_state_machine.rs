//! 入驻状态机定义
//!
//! 状态、事件、守卫和动作的完整转换表。托管钱包（Turnkey）走认证分支，
//! 永远不会经过 WalletConnected；其它钱包连接后再派生交易链账户。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::derivation::LocalWallet;
use crate::domain::session::OnboardingState;
use crate::domain::wallet::{
    is_turnkey_wallet, requires_account_derivation, WalletInfo, WalletNetworkType,
};
use crate::infrastructure::log_redact::redact_email;
use crate::service::state_machine::{
    MachineConfig, MachineEvent, StateMachine, StateNode, Transition,
};

/// 入驻状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OnboardingMachineState {
    Idle,
    SelectingWallet,
    /// 保留状态：当前流程没有进入它的转换
    ConnectingWallet,
    WalletConnected,
    AuthenticatingTurnkey,
    TurnkeyAwaitingEmail,
    TurnkeyAuthenticated,
    DerivingAccount,
    UploadingTurnkeyAddress,
    AccountConnected,
    Error,
    Disconnecting,
}

impl OnboardingMachineState {
    pub const ALL: [OnboardingMachineState; 12] = [
        Self::Idle,
        Self::SelectingWallet,
        Self::ConnectingWallet,
        Self::WalletConnected,
        Self::AuthenticatingTurnkey,
        Self::TurnkeyAwaitingEmail,
        Self::TurnkeyAuthenticated,
        Self::DerivingAccount,
        Self::UploadingTurnkeyAddress,
        Self::AccountConnected,
        Self::Error,
        Self::Disconnecting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::SelectingWallet => "selecting_wallet",
            Self::ConnectingWallet => "connecting_wallet",
            Self::WalletConnected => "wallet_connected",
            Self::AuthenticatingTurnkey => "authenticating_turnkey",
            Self::TurnkeyAwaitingEmail => "turnkey_awaiting_email",
            Self::TurnkeyAuthenticated => "turnkey_authenticated",
            Self::DerivingAccount => "deriving_account",
            Self::UploadingTurnkeyAddress => "uploading_turnkey_address",
            Self::AccountConnected => "account_connected",
            Self::Error => "error",
            Self::Disconnecting => "disconnecting",
        }
    }
}

impl std::fmt::Display for OnboardingMachineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Turnkey 认证方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnkeyAuthMethod {
    Email,
    Oauth,
    Passkey,
}

#[derive(Debug, Clone)]
pub enum OnboardingEvent {
    SelectWallet {
        wallet: WalletInfo,
    },
    WalletConnected {
        address: String,
        chain: WalletNetworkType,
    },
    WalletConnectionFailed {
        error: String,
    },
    StartDeriveAccount,
    AccountDerived {
        dydx_address: String,
        wallet: Option<LocalWallet>,
    },
    AccountDerivationFailed {
        error: String,
    },
    TurnkeyAuthStarted {
        method: TurnkeyAuthMethod,
    },
    TurnkeyEmailSent {
        email: String,
    },
    TurnkeyEmailReceived {
        token: String,
    },
    TurnkeyAuthenticated {
        session: String,
    },
    TurnkeyAuthFailed {
        error: String,
    },
    TurnkeyUploadStarted,
    TurnkeyUploadSuccess,
    TurnkeyUploadFailed {
        error: String,
    },
    Disconnect,
    Reset,
    Retry,
    ClearError,
}

/// 事件类型（分派键）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SelectWallet,
    WalletConnected,
    WalletConnectionFailed,
    StartDeriveAccount,
    AccountDerived,
    AccountDerivationFailed,
    TurnkeyAuthStarted,
    TurnkeyEmailSent,
    TurnkeyEmailReceived,
    TurnkeyAuthenticated,
    TurnkeyAuthFailed,
    TurnkeyUploadStarted,
    TurnkeyUploadSuccess,
    TurnkeyUploadFailed,
    Disconnect,
    Reset,
    Retry,
    ClearError,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SelectWallet => "SELECT_WALLET",
            EventKind::WalletConnected => "WALLET_CONNECTED",
            EventKind::WalletConnectionFailed => "WALLET_CONNECTION_FAILED",
            EventKind::StartDeriveAccount => "START_DERIVE_ACCOUNT",
            EventKind::AccountDerived => "ACCOUNT_DERIVED",
            EventKind::AccountDerivationFailed => "ACCOUNT_DERIVATION_FAILED",
            EventKind::TurnkeyAuthStarted => "TURNKEY_AUTH_STARTED",
            EventKind::TurnkeyEmailSent => "TURNKEY_EMAIL_SENT",
            EventKind::TurnkeyEmailReceived => "TURNKEY_EMAIL_RECEIVED",
            EventKind::TurnkeyAuthenticated => "TURNKEY_AUTHENTICATED",
            EventKind::TurnkeyAuthFailed => "TURNKEY_AUTH_FAILED",
            EventKind::TurnkeyUploadStarted => "TURNKEY_UPLOAD_STARTED",
            EventKind::TurnkeyUploadSuccess => "TURNKEY_UPLOAD_SUCCESS",
            EventKind::TurnkeyUploadFailed => "TURNKEY_UPLOAD_FAILED",
            EventKind::Disconnect => "DISCONNECT",
            EventKind::Reset => "RESET",
            EventKind::Retry => "RETRY",
            EventKind::ClearError => "CLEAR_ERROR",
        }
    }
}

impl MachineEvent for OnboardingEvent {
    type Kind = EventKind;

    fn kind(&self) -> EventKind {
        match self {
            OnboardingEvent::SelectWallet { .. } => EventKind::SelectWallet,
            OnboardingEvent::WalletConnected { .. } => EventKind::WalletConnected,
            OnboardingEvent::WalletConnectionFailed { .. } => EventKind::WalletConnectionFailed,
            OnboardingEvent::StartDeriveAccount => EventKind::StartDeriveAccount,
            OnboardingEvent::AccountDerived { .. } => EventKind::AccountDerived,
            OnboardingEvent::AccountDerivationFailed { .. } => EventKind::AccountDerivationFailed,
            OnboardingEvent::TurnkeyAuthStarted { .. } => EventKind::TurnkeyAuthStarted,
            OnboardingEvent::TurnkeyEmailSent { .. } => EventKind::TurnkeyEmailSent,
            OnboardingEvent::TurnkeyEmailReceived { .. } => EventKind::TurnkeyEmailReceived,
            OnboardingEvent::TurnkeyAuthenticated { .. } => EventKind::TurnkeyAuthenticated,
            OnboardingEvent::TurnkeyAuthFailed { .. } => EventKind::TurnkeyAuthFailed,
            OnboardingEvent::TurnkeyUploadStarted => EventKind::TurnkeyUploadStarted,
            OnboardingEvent::TurnkeyUploadSuccess => EventKind::TurnkeyUploadSuccess,
            OnboardingEvent::TurnkeyUploadFailed { .. } => EventKind::TurnkeyUploadFailed,
            OnboardingEvent::Disconnect => EventKind::Disconnect,
            OnboardingEvent::Reset => EventKind::Reset,
            OnboardingEvent::Retry => EventKind::Retry,
            OnboardingEvent::ClearError => EventKind::ClearError,
        }
    }
}

/// 状态机上下文
#[derive(Debug, Clone, PartialEq)]
pub struct OnboardingMachineContext {
    pub selected_wallet: Option<WalletInfo>,
    pub wallet_address: Option<String>,
    pub wallet_chain: Option<WalletNetworkType>,
    /// 派生出的交易链地址
    pub dydx_address: Option<String>,
    pub local_wallet: Option<LocalWallet>,
    pub turnkey_email: Option<String>,
    pub turnkey_token: Option<String>,
    pub turnkey_session: Option<String>,
    pub error: Option<String>,
    pub previous_error: Option<String>,
    /// 托管钱包派生后是否需要上传地址，由外部策略设置
    pub needs_address_upload: bool,
    pub last_transition_timestamp: DateTime<Utc>,
}

impl OnboardingMachineContext {
    pub fn new() -> Self {
        Self::cleared(Utc::now())
    }

    /// 除时间戳外全部清空
    fn cleared(timestamp: DateTime<Utc>) -> Self {
        Self {
            selected_wallet: None,
            wallet_address: None,
            wallet_chain: None,
            dydx_address: None,
            local_wallet: None,
            turnkey_email: None,
            turnkey_token: None,
            turnkey_session: None,
            error: None,
            previous_error: None,
            needs_address_upload: false,
            last_transition_timestamp: timestamp,
        }
    }

    fn reset(&mut self) {
        *self = Self::cleared(Utc::now());
    }

    fn touch(&mut self) {
        self.last_transition_timestamp = Utc::now();
    }
}

impl Default for OnboardingMachineContext {
    fn default() -> Self {
        Self::new()
    }
}

/// 上下文代数
///
/// 状态机每次进入 Disconnecting 或从其它状态回到 Idle 时递增。
/// 编排器在派生开始时记录代数，完成时代数已变化则丢弃结果。
#[derive(Debug, Clone, Default)]
pub struct ContextGeneration(Arc<AtomicU64>);

impl ContextGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// 递增并返回新代数
    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.current() == generation
    }
}

pub type OnboardingStateMachine =
    StateMachine<OnboardingMachineState, OnboardingMachineContext, OnboardingEvent>;

type Node = StateNode<OnboardingMachineState, OnboardingMachineContext, OnboardingEvent>;
type Edge = Transition<OnboardingMachineState, OnboardingMachineContext, OnboardingEvent>;

pub fn create_onboarding_state_machine(generation: ContextGeneration) -> OnboardingStateMachine {
    StateMachine::new(onboarding_machine_config(generation))
}

/// 完整的状态机定义
pub fn onboarding_machine_config(
    generation: ContextGeneration,
) -> MachineConfig<OnboardingMachineState, OnboardingMachineContext, OnboardingEvent> {
    use EventKind as K;
    use OnboardingMachineState as S;

    let on_disconnect = generation.clone();

    MachineConfig::new(S::Idle, OnboardingMachineContext::new())
        .state(
            S::Idle,
            Node::new()
                .entry(move |_, _| {
                    let current = generation.advance();
                    tracing::trace!(generation = current, "onboarding context generation advanced");
                    Ok(())
                })
                .on(
                    K::SelectWallet,
                    Edge::to(S::SelectingWallet).action(|ctx, event| {
                        if let OnboardingEvent::SelectWallet { wallet } = event {
                            ctx.selected_wallet = Some(wallet.clone());
                        }
                        ctx.error = None;
                        ctx.touch();
                        Ok(())
                    }),
                ),
        )
        .state(
            S::SelectingWallet,
            Node::new()
                .on(
                    K::TurnkeyAuthStarted,
                    Edge::to(S::AuthenticatingTurnkey)
                        .guard(|ctx, _| is_turnkey_wallet(ctx.selected_wallet.as_ref()))
                        .action(touch),
                )
                .on(
                    K::WalletConnected,
                    Edge::to(S::WalletConnected)
                        .guard(|ctx, _| !is_turnkey_wallet(ctx.selected_wallet.as_ref()))
                        .action(set_wallet_connected),
                )
                .on(K::WalletConnectionFailed, Edge::to(S::Error).action(set_error))
                .on(K::Disconnect, Edge::to(S::Disconnecting)),
        )
        .state(
            S::ConnectingWallet,
            Node::new()
                .on(
                    K::WalletConnected,
                    Edge::to(S::WalletConnected).action(set_wallet_connected),
                )
                .on(K::WalletConnectionFailed, Edge::to(S::Error).action(set_error))
                .on(K::Disconnect, Edge::to(S::Disconnecting)),
        )
        .state(
            S::WalletConnected,
            Node::new()
                .on(
                    K::StartDeriveAccount,
                    Edge::to(S::DerivingAccount)
                        .guard(|ctx, _| requires_account_derivation(ctx.selected_wallet.as_ref()))
                        .action(touch),
                )
                // 链原生签名器/测试钱包自带地址，跳过派生
                .on(
                    K::AccountDerived,
                    Edge::to(S::AccountConnected)
                        .guard(|ctx, _| !requires_account_derivation(ctx.selected_wallet.as_ref()))
                        .action(set_account_derived),
                )
                .on(K::Disconnect, Edge::to(S::Disconnecting)),
        )
        .state(
            S::AuthenticatingTurnkey,
            Node::new()
                .on(
                    K::TurnkeyEmailSent,
                    Edge::to(S::TurnkeyAwaitingEmail).action(|ctx, event| {
                        if let OnboardingEvent::TurnkeyEmailSent { email } = event {
                            tracing::debug!(email = %redact_email(email), "turnkey email sent");
                            ctx.turnkey_email = Some(email.clone());
                        }
                        ctx.touch();
                        Ok(())
                    }),
                )
                .on(
                    K::TurnkeyAuthenticated,
                    Edge::to(S::TurnkeyAuthenticated).action(set_turnkey_session),
                )
                .on(K::TurnkeyAuthFailed, Edge::to(S::Error).action(set_error))
                .on(K::Disconnect, Edge::to(S::Disconnecting)),
        )
        .state(
            S::TurnkeyAwaitingEmail,
            Node::new()
                .on(
                    K::TurnkeyEmailReceived,
                    Edge::to(S::AuthenticatingTurnkey).action(|ctx, event| {
                        if let OnboardingEvent::TurnkeyEmailReceived { token } = event {
                            ctx.turnkey_token = Some(token.clone());
                        }
                        ctx.touch();
                        Ok(())
                    }),
                )
                .on(
                    K::TurnkeyAuthenticated,
                    Edge::to(S::TurnkeyAuthenticated).action(set_turnkey_session),
                )
                .on(K::TurnkeyAuthFailed, Edge::to(S::Error).action(set_error))
                .on(K::Disconnect, Edge::to(S::Disconnecting)),
        )
        .state(
            S::TurnkeyAuthenticated,
            Node::new()
                .on(K::StartDeriveAccount, Edge::to(S::DerivingAccount).action(touch))
                .on(
                    K::AccountDerived,
                    Edge::to(S::UploadingTurnkeyAddress)
                        .guard(|ctx, _| ctx.needs_address_upload)
                        .action(set_account_derived),
                )
                .on(K::Disconnect, Edge::to(S::Disconnecting)),
        )
        .state(
            S::DerivingAccount,
            Node::new()
                .on(
                    K::AccountDerived,
                    Edge::to(S::AccountConnected)
                        .guard(|ctx, _| {
                            !is_turnkey_wallet(ctx.selected_wallet.as_ref())
                                || !ctx.needs_address_upload
                        })
                        .action(set_account_derived),
                )
                .on(
                    K::TurnkeyUploadStarted,
                    Edge::to(S::UploadingTurnkeyAddress)
                        .guard(|ctx, _| {
                            is_turnkey_wallet(ctx.selected_wallet.as_ref())
                                && ctx.needs_address_upload
                        })
                        .action(touch),
                )
                .on(K::AccountDerivationFailed, Edge::to(S::Error).action(set_error))
                .on(K::Disconnect, Edge::to(S::Disconnecting)),
        )
        .state(
            S::UploadingTurnkeyAddress,
            Node::new()
                .on(
                    K::TurnkeyUploadSuccess,
                    Edge::to(S::AccountConnected).action(|ctx, _| {
                        ctx.needs_address_upload = false;
                        ctx.touch();
                        Ok(())
                    }),
                )
                .on(K::TurnkeyUploadFailed, Edge::to(S::Error).action(set_error))
                .on(K::Disconnect, Edge::to(S::Disconnecting)),
        )
        .state(
            S::AccountConnected,
            Node::new()
                .on(K::Disconnect, Edge::to(S::Disconnecting))
                .on(K::Reset, Edge::to(S::Idle).action(reset)),
        )
        .state(
            S::Error,
            Node::new()
                .entry(|ctx, _| {
                    ctx.previous_error = ctx.error.clone();
                    Ok(())
                })
                .on(
                    K::Retry,
                    Edge::to(S::SelectingWallet)
                        .guard(|ctx, _| ctx.selected_wallet.is_some())
                        .action(|ctx, _| {
                            ctx.error = None;
                            ctx.touch();
                            Ok(())
                        }),
                )
                .on(
                    K::ClearError,
                    Edge::to(S::Idle).action(|ctx, _| {
                        ctx.error = None;
                        ctx.selected_wallet = None;
                        ctx.touch();
                        Ok(())
                    }),
                )
                .on(K::Disconnect, Edge::to(S::Disconnecting))
                .on(K::Reset, Edge::to(S::Idle).action(reset)),
        )
        .state(
            S::Disconnecting,
            Node::new()
                .entry(move |_, _| {
                    let current = on_disconnect.advance();
                    tracing::trace!(generation = current, "onboarding context generation advanced");
                    Ok(())
                })
                .on(K::Reset, Edge::to(S::Idle).action(reset)),
        )
        .on_transition(|from, to, event: &OnboardingEvent| {
            tracing::debug!(
                from = from.as_str(),
                to = to.as_str(),
                event = event.kind().as_str(),
                "onboarding transition"
            );
        })
        .on_error(|error, state: OnboardingMachineState, event: &OnboardingEvent| {
            tracing::error!(
                state = state.as_str(),
                event = event.kind().as_str(),
                error = %error,
                "onboarding state machine action failed"
            );
        })
}

fn touch(ctx: &mut OnboardingMachineContext, _: &OnboardingEvent) -> anyhow::Result<()> {
    ctx.touch();
    Ok(())
}

fn reset(ctx: &mut OnboardingMachineContext, _: &OnboardingEvent) -> anyhow::Result<()> {
    ctx.reset();
    Ok(())
}

fn set_wallet_connected(
    ctx: &mut OnboardingMachineContext,
    event: &OnboardingEvent,
) -> anyhow::Result<()> {
    if let OnboardingEvent::WalletConnected { address, chain } = event {
        ctx.wallet_address = Some(address.clone());
        ctx.wallet_chain = Some(*chain);
    }
    ctx.touch();
    Ok(())
}

fn set_account_derived(
    ctx: &mut OnboardingMachineContext,
    event: &OnboardingEvent,
) -> anyhow::Result<()> {
    if let OnboardingEvent::AccountDerived {
        dydx_address,
        wallet,
    } = event
    {
        ctx.dydx_address = Some(dydx_address.clone());
        ctx.local_wallet = wallet.clone();
    }
    ctx.touch();
    Ok(())
}

fn set_turnkey_session(
    ctx: &mut OnboardingMachineContext,
    event: &OnboardingEvent,
) -> anyhow::Result<()> {
    if let OnboardingEvent::TurnkeyAuthenticated { session } = event {
        ctx.turnkey_session = Some(session.clone());
    }
    ctx.touch();
    Ok(())
}

/// 所有 `*_FAILED` 事件共用
fn set_error(ctx: &mut OnboardingMachineContext, event: &OnboardingEvent) -> anyhow::Result<()> {
    match event {
        OnboardingEvent::WalletConnectionFailed { error }
        | OnboardingEvent::AccountDerivationFailed { error }
        | OnboardingEvent::TurnkeyAuthFailed { error }
        | OnboardingEvent::TurnkeyUploadFailed { error } => {
            ctx.error = Some(error.clone());
        }
        _ => {}
    }
    ctx.touch();
    Ok(())
}

/// 完整状态 → 三值简化状态
pub fn map_machine_state_to_onboarding_state(state: OnboardingMachineState) -> OnboardingState {
    use OnboardingMachineState as S;

    match state {
        S::Idle | S::SelectingWallet | S::Disconnecting | S::Error => OnboardingState::Disconnected,
        S::ConnectingWallet
        | S::WalletConnected
        | S::AuthenticatingTurnkey
        | S::TurnkeyAwaitingEmail
        | S::TurnkeyAuthenticated
        | S::DerivingAccount
        | S::UploadingTurnkeyAddress => OnboardingState::WalletConnected,
        S::AccountConnected => OnboardingState::AccountConnected,
    }
}
