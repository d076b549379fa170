pub mod collaborators;
pub mod key_derivation_service;
pub mod onboarding_orchestrator; // 入驻编排（唯一调用外部协作方）
pub mod onboarding_state_machine;
pub mod state_machine; // 通用状态机引擎
pub mod wallet_flow_supervisor;

pub use collaborators::{
    AddressUploader, ConnectWalletRequest, ConnectedAddresses, MessageSigner, OfflineSigner,
    OfflineSignerProvider, WalletConnector,
};
pub use key_derivation_service::{KeyDerivationService, WalletCreationResult, WALLET_STORAGE_KEY};
pub use onboarding_orchestrator::{
    CustodialAuthStatus, DeriveOutcome, OnboardingDependencies, OnboardingOrchestrator,
    OnboardingSnapshot,
};
pub use onboarding_state_machine::{
    create_onboarding_state_machine, map_machine_state_to_onboarding_state, ContextGeneration,
    EventKind, OnboardingEvent, OnboardingMachineContext, OnboardingMachineState,
    OnboardingStateMachine, TurnkeyAuthMethod,
};
pub use state_machine::{MachineConfig, MachineEvent, SendOutcome, StateMachine, StateNode, Transition};
pub use wallet_flow_supervisor::{
    CosmosChain, WalletDerivationResult, WalletFlowRequest, WalletFlowSupervisor,
};
