//! IronLink 命令行入口
//!
//! 交易链钱包的派生、导入、恢复和导出

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ironlink::{
    config::Config,
    infrastructure::{
        log_redact::redact_address, logging::init_logging, FileStore, KeyValueStore,
        MemoryStore, SecureStorageService,
    },
    service::{KeyDerivationService, WalletCreationResult},
};

/// IronLink - trading chain wallet onboarding
#[derive(Parser, Debug)]
#[command(
    name = "ironlink",
    version = env!("CARGO_PKG_VERSION"),
    about = "Derive, import and manage the local trading chain wallet"
)]
struct CliApp {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (TOML)
    #[arg(short, long, value_name = "FILE", global = true, env = "CONFIG_PATH")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Derive the wallet from an onboarding signature
    Derive {
        /// Hex signature (0x optional, at least 64 bytes)
        #[arg(long)]
        signature: String,

        /// Do not persist the derived private key
        #[arg(long)]
        no_persist: bool,
    },

    /// Import a raw secp256k1 private key
    Import {
        #[arg(long)]
        private_key: String,
    },

    /// Import a 12 or 24 word mnemonic
    ImportMnemonic {
        #[arg(long)]
        mnemonic: String,
    },

    /// Restore the wallet from encrypted storage
    Restore,

    /// Print the stored private key
    Export,

    /// Show whether a wallet is stored
    Status,

    /// Delete the stored wallet
    Clear,

    /// Delete every entry under the configured prefix
    Wipe,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let app = CliApp::parse();

    let config = Config::from_env_and_file(app.config.as_ref())?;
    config.validate()?;

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let backend: Arc<dyn KeyValueStore> = match config.storage.backend.as_str() {
        "memory" => Arc::new(MemoryStore::new()),
        _ => Arc::new(
            FileStore::open(&config.storage.path)
                .with_context(|| format!("Failed to open storage at {}", config.storage.path))?,
        ),
    };
    let storage = Arc::new(SecureStorageService::new(
        backend,
        config.storage.key_prefix.clone(),
    ));
    let keys = KeyDerivationService::new(storage.clone(), config.onboarding.address_prefix.clone());

    tracing::debug!(
        backend = %config.storage.backend,
        prefix = %config.onboarding.address_prefix,
        "ironlink started"
    );

    match app.command {
        Command::Derive {
            signature,
            no_persist,
        } => {
            let persist = !no_persist && config.onboarding.persist_derived_keys;
            let result = keys.derive_from_signature(&signature, persist).await?;
            print_wallet(&result);
        }
        Command::Import { private_key } => {
            let result = keys.import_from_private_key(&private_key, true).await?;
            print_wallet(&result);
        }
        Command::ImportMnemonic { mnemonic } => {
            let result = keys.import_from_mnemonic(&mnemonic, true).await?;
            print_wallet(&result);
        }
        Command::Restore => match keys.restore_from_storage().await {
            Some(result) => print_wallet(&result),
            None => println!("No stored wallet"),
        },
        Command::Export => match keys.export_private_key().await? {
            Some(private_key) => println!("{}", private_key),
            None => println!("No stored wallet"),
        },
        Command::Status => {
            if keys.has_stored_wallet()? {
                match keys.restore_from_storage().await {
                    Some(result) => println!("stored: {}", redact_address(result.address())),
                    None => println!("stored wallet was invalid and has been cleared"),
                }
            } else {
                println!("No stored wallet");
            }
        }
        Command::Clear => {
            keys.clear_stored_wallet()?;
            println!("Stored wallet cleared");
        }
        Command::Wipe => {
            storage.clear_all().await?;
            println!("Secure storage wiped");
        }
    }

    Ok(())
}

fn print_wallet(result: &WalletCreationResult) {
    println!("address:   {}", result.address());
    println!("persisted: {}", result.persisted);
}
