//! 统一错误类型
//!
//! 所有服务边界只暴露 `AppError`，底层加密/存储辅助函数使用 `anyhow`，
//! 在服务边界映射为带错误码的 `AppError`。

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppErrorCode {
    // 基础错误码
    BadRequest,
    NotFound,
    Internal,
    Config,

    // 钱包/派生错误码
    WalletNotFound,
    InvalidMnemonic,
    InvalidPrivateKey,
    InvalidSignature,
    InvalidAddress,
    DerivationFailed,
    ChainNotSupported,

    // 存储错误码
    EncryptionFailed,
    DecryptionFailed,
    StorageFailed,

    // 外部协作方错误码
    WalletConnectionFailed,
    SigningFailed,
    UploadFailed,
    ExternalServiceError,
}

impl AppErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppErrorCode::BadRequest => "bad_request",
            AppErrorCode::NotFound => "not_found",
            AppErrorCode::Internal => "internal",
            AppErrorCode::Config => "config",

            AppErrorCode::WalletNotFound => "wallet_not_found",
            AppErrorCode::InvalidMnemonic => "invalid_mnemonic",
            AppErrorCode::InvalidPrivateKey => "invalid_private_key",
            AppErrorCode::InvalidSignature => "invalid_signature",
            AppErrorCode::InvalidAddress => "invalid_address",
            AppErrorCode::DerivationFailed => "derivation_failed",
            AppErrorCode::ChainNotSupported => "chain_not_supported",

            AppErrorCode::EncryptionFailed => "encryption_failed",
            AppErrorCode::DecryptionFailed => "decryption_failed",
            AppErrorCode::StorageFailed => "storage_failed",

            AppErrorCode::WalletConnectionFailed => "wallet_connection_failed",
            AppErrorCode::SigningFailed => "signing_failed",
            AppErrorCode::UploadFailed => "upload_failed",
            AppErrorCode::ExternalServiceError => "external_service_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct AppError {
    pub code: AppErrorCode,
    pub message: String,
}

impl AppError {
    pub fn new(code: AppErrorCode, msg: impl Into<String>) -> Self {
        Self {
            code,
            message: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(AppErrorCode::BadRequest, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(AppErrorCode::NotFound, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(AppErrorCode::Internal, msg)
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::new(AppErrorCode::Config, msg)
    }

    // 钱包相关辅助函数
    pub fn wallet_not_found(msg: impl Into<String>) -> Self {
        Self::new(AppErrorCode::WalletNotFound, msg)
    }

    pub fn invalid_mnemonic(msg: impl Into<String>) -> Self {
        Self::new(AppErrorCode::InvalidMnemonic, msg)
    }

    pub fn invalid_private_key(msg: impl Into<String>) -> Self {
        Self::new(AppErrorCode::InvalidPrivateKey, msg)
    }

    pub fn invalid_signature(msg: impl Into<String>) -> Self {
        Self::new(AppErrorCode::InvalidSignature, msg)
    }

    pub fn invalid_address(msg: impl Into<String>) -> Self {
        Self::new(AppErrorCode::InvalidAddress, msg)
    }

    pub fn derivation_failed(msg: impl Into<String>) -> Self {
        Self::new(AppErrorCode::DerivationFailed, msg)
    }

    pub fn chain_not_supported(msg: impl Into<String>) -> Self {
        Self::new(AppErrorCode::ChainNotSupported, msg)
    }

    // 存储相关辅助函数
    pub fn encryption_failed(msg: impl Into<String>) -> Self {
        Self::new(AppErrorCode::EncryptionFailed, msg)
    }

    pub fn decryption_failed(msg: impl Into<String>) -> Self {
        Self::new(AppErrorCode::DecryptionFailed, msg)
    }

    pub fn storage_failed(msg: impl Into<String>) -> Self {
        Self::new(AppErrorCode::StorageFailed, msg)
    }

    // 外部协作方相关辅助函数
    pub fn wallet_connection_failed(msg: impl Into<String>) -> Self {
        Self::new(AppErrorCode::WalletConnectionFailed, msg)
    }

    pub fn signing_failed(msg: impl Into<String>) -> Self {
        Self::new(AppErrorCode::SigningFailed, msg)
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::new(AppErrorCode::UploadFailed, msg)
    }

    pub fn external(msg: impl Into<String>) -> Self {
        Self::new(AppErrorCode::ExternalServiceError, msg)
    }

    /// 错误码字符串
    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::storage_failed(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::storage_failed(format!("Serialization failed: {}", err))
    }
}
