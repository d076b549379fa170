//! 配置管理模块
//! 支持从环境变量和配置文件加载配置

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// 应用配置结构体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub onboarding: OnboardingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 加密存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: String, // "file" or "memory"
    pub path: String,
    pub key_prefix: String,
}

/// 开户流程配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnboardingConfig {
    /// 交易链地址 bech32 前缀
    pub address_prefix: String,
    /// 交易链 chain id（Cosmos 离线签名器使用）
    pub chain_id: String,
    /// 社交登录钱包签名前的等待时间
    pub social_login_settle_ms: u64,
    /// 派生成功后是否持久化私钥
    pub persist_derived_keys: bool,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "text"
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: std::env::var("IRONLINK_STORAGE_BACKEND").unwrap_or_else(|_| "file".into()),
            path: std::env::var("IRONLINK_STORAGE_PATH")
                .unwrap_or_else(|_| "./data/secure_storage.json".into()),
            key_prefix: std::env::var("IRONLINK_KEY_PREFIX")
                .unwrap_or_else(|_| "ironlink_secure_".into()),
        }
    }
}

impl Default for OnboardingConfig {
    fn default() -> Self {
        Self {
            address_prefix: std::env::var("IRONLINK_ADDRESS_PREFIX")
                .unwrap_or_else(|_| "dydx".into()),
            chain_id: std::env::var("IRONLINK_CHAIN_ID")
                .unwrap_or_else(|_| "dydx-mainnet-1".into()),
            social_login_settle_ms: std::env::var("IRONLINK_SOCIAL_LOGIN_SETTLE_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
            persist_derived_keys: std::env::var("IRONLINK_PERSIST_KEYS")
                .ok()
                .map(|v| v != "0")
                .unwrap_or(true),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".into()),
        }
    }
}

impl Config {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            storage: StorageConfig::default(),
            onboarding: OnboardingConfig::default(),
            logging: LoggingConfig::default(),
        })
    }

    /// 从配置文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// 从环境变量和配置文件合并加载（配置文件优先级更高）
    pub fn from_env_and_file<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut config = Self::from_env()?;

        if let Some(path) = path {
            if path.as_ref().exists() {
                config = Self::from_file(path)?;
            }
        }

        Ok(config)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        if self.storage.backend != "file" && self.storage.backend != "memory" {
            anyhow::bail!("IRONLINK_STORAGE_BACKEND must be 'file' or 'memory'");
        }

        if self.storage.backend == "file" && self.storage.path.trim().is_empty() {
            anyhow::bail!("IRONLINK_STORAGE_PATH must not be empty for the file backend");
        }

        if self.storage.key_prefix.is_empty() {
            anyhow::bail!("IRONLINK_KEY_PREFIX must not be empty");
        }

        // bech32 前缀必须合法
        bech32::Hrp::parse(&self.onboarding.address_prefix).map_err(|e| {
            anyhow::anyhow!(
                "IRONLINK_ADDRESS_PREFIX is not a valid bech32 prefix: {:?}",
                e
            )
        })?;

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("LOG_LEVEL must be one of: {:?}", valid_levels);
        }

        if self.logging.format != "json" && self.logging.format != "text" {
            anyhow::bail!("LOG_FORMAT must be 'json' or 'text'");
        }

        Ok(())
    }
}
