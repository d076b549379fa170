//! 测试辅助模块
//! 记录调用的协作方 mock 和编排器构造函数

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ironlink::{
    domain::{ConnectorType, WalletInfo, WalletNetworkType},
    infrastructure::{KeyValueStore, MemoryStore, SecureStorageService},
    service::{
        AddressUploader, ConnectWalletRequest, ConnectedAddresses, KeyDerivationService,
        MessageSigner, OnboardingDependencies, OnboardingOrchestrator, WalletConnector,
    },
    AppError,
};
use tokio::sync::Notify;

/// 65 字节（r‖s‖v）测试签名
pub const TEST_SIGNATURE: &str = "0xaabbccddeeff00112233445566778899aabbccddeeff00112233445566778899\
                                  00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff1c";

pub const TEST_EVM_ADDRESS: &str = "0x1234567890abcdef1234567890abcdef12345678";

pub fn metamask() -> WalletInfo {
    WalletInfo::new(WalletNetworkType::Evm, ConnectorType::Injected, "MetaMask")
}

pub fn turnkey() -> WalletInfo {
    WalletInfo::new(WalletNetworkType::Evm, ConnectorType::Turnkey, "Turnkey")
}

pub fn keplr() -> WalletInfo {
    WalletInfo::new(WalletNetworkType::Cosmos, ConnectorType::Cosmos, "Keplr")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 钱包连接
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default)]
pub struct MockWalletConnector {
    calls: Arc<Mutex<Vec<String>>>,
    requests: Arc<Mutex<Vec<ConnectWalletRequest>>>,
    addresses: ConnectedAddresses,
    connect_error: Option<String>,
    disconnect_error: Option<String>,
}

impl MockWalletConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_evm_address(mut self, address: &str) -> Self {
        self.addresses.evm = Some(address.to_string());
        self
    }

    pub fn with_cosmos_address(mut self, address: &str) -> Self {
        self.addresses.cosmos = Some(address.to_string());
        self
    }

    pub fn with_connect_error(mut self, message: &str) -> Self {
        self.connect_error = Some(message.to_string());
        self
    }

    pub fn with_disconnect_error(mut self, message: &str) -> Self {
        self.disconnect_error = Some(message.to_string());
        self
    }

    pub fn get_calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn get_requests(&self) -> Vec<ConnectWalletRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl WalletConnector for MockWalletConnector {
    async fn connect_wallet(&self, request: ConnectWalletRequest) -> Result<(), AppError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("connect:{}", request.wallet.name));
        self.requests.lock().unwrap().push(request);

        match &self.connect_error {
            Some(message) => Err(AppError::wallet_connection_failed(message.clone())),
            None => Ok(()),
        }
    }

    async fn disconnect_wallet(&self) -> Result<(), AppError> {
        self.calls.lock().unwrap().push("disconnect".to_string());

        match &self.disconnect_error {
            Some(message) => Err(AppError::external(message.clone())),
            None => Ok(()),
        }
    }

    async fn connected_addresses(&self) -> ConnectedAddresses {
        self.addresses.clone()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 签名
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default)]
pub struct MockMessageSigner {
    calls: Arc<Mutex<Vec<String>>>,
    signature: Option<String>,
    error: Option<String>,
    cached: bool,
    /// 签名请求到达时通知
    entered: Option<Arc<Notify>>,
    /// 放行前阻塞签名请求
    gate: Option<Arc<Notify>>,
}

impl MockMessageSigner {
    pub fn new() -> Self {
        Self {
            signature: Some(TEST_SIGNATURE.to_string()),
            ..Default::default()
        }
    }

    /// 用户拒绝签名
    pub fn rejecting() -> Self {
        Self::default()
    }

    pub fn with_error(mut self, message: &str) -> Self {
        self.error = Some(message.to_string());
        self
    }

    pub fn with_cached_signature(mut self) -> Self {
        self.cached = true;
        self
    }

    pub fn with_gate(mut self, entered: Arc<Notify>, gate: Arc<Notify>) -> Self {
        self.entered = Some(entered);
        self.gate = Some(gate);
        self
    }

    pub fn sign_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.as_str() == "sign")
            .count()
    }
}

#[async_trait]
impl MessageSigner for MockMessageSigner {
    async fn sign_message(&self) -> Result<Option<String>, AppError> {
        self.calls.lock().unwrap().push("sign".to_string());

        if let Some(entered) = &self.entered {
            entered.notify_one();
        }
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        match &self.error {
            Some(message) => Err(AppError::signing_failed(message.clone())),
            None => Ok(self.signature.clone()),
        }
    }

    async fn has_cached_signature(&self, address: &str) -> bool {
        self.calls
            .lock()
            .unwrap()
            .push(format!("cached:{}", address));
        self.cached
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 地址上传
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default)]
pub struct MockAddressUploader {
    uploads: Arc<Mutex<Vec<String>>>,
    error: Option<String>,
}

impl MockAddressUploader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_error(mut self, message: &str) -> Self {
        self.error = Some(message.to_string());
        self
    }

    pub fn get_uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl AddressUploader for MockAddressUploader {
    async fn upload_address(&self, dydx_address: &str) -> Result<(), AppError> {
        self.uploads.lock().unwrap().push(dydx_address.to_string());

        match &self.error {
            Some(message) => Err(AppError::upload_failed(message.clone())),
            None => Ok(()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 存储后端
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// 可读但所有写入都失败的后端（如磁盘已满）
#[derive(Debug)]
pub struct FailingWriteStore {
    inner: MemoryStore,
    message: String,
    writes: Arc<Mutex<Vec<String>>>,
}

impl FailingWriteStore {
    pub fn new(message: &str) -> Self {
        Self {
            inner: MemoryStore::new(),
            message: message.to_string(),
            writes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn get_writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }
}

impl KeyValueStore for FailingWriteStore {
    fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, _value: &str) -> Result<(), AppError> {
        self.writes.lock().unwrap().push(key.to_string());
        Err(AppError::storage_failed(self.message.clone()))
    }

    fn remove(&self, key: &str) -> Result<(), AppError> {
        self.inner.remove(key)
    }

    fn keys(&self) -> Result<Vec<String>, AppError> {
        self.inner.keys()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 构造
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn memory_key_service() -> Arc<KeyDerivationService> {
    key_service_on(Arc::new(MemoryStore::new()))
}

pub fn key_service_on(backend: Arc<dyn KeyValueStore>) -> Arc<KeyDerivationService> {
    let storage = SecureStorageService::new(backend, "test_secure_");
    Arc::new(KeyDerivationService::new(Arc::new(storage), "dydx"))
}

pub struct Harness {
    pub orchestrator: Arc<OnboardingOrchestrator>,
    pub connector: Arc<MockWalletConnector>,
    pub signer: Arc<MockMessageSigner>,
    pub uploader: Arc<MockAddressUploader>,
    pub keys: Arc<KeyDerivationService>,
}

pub fn harness(connector: MockWalletConnector, signer: MockMessageSigner) -> Harness {
    harness_with(
        connector,
        signer,
        MockAddressUploader::new(),
        memory_key_service(),
    )
}

pub fn harness_with(
    connector: MockWalletConnector,
    signer: MockMessageSigner,
    uploader: MockAddressUploader,
    keys: Arc<KeyDerivationService>,
) -> Harness {
    let connector = Arc::new(connector);
    let signer = Arc::new(signer);
    let uploader = Arc::new(uploader);

    let deps = OnboardingDependencies {
        connector: connector.clone(),
        signer: signer.clone(),
        uploader: Some(uploader.clone()),
        key_derivation: keys.clone(),
    };

    Harness {
        orchestrator: Arc::new(OnboardingOrchestrator::new(deps)),
        connector,
        signer,
        uploader,
        keys,
    }
}
