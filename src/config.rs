//! Service configuration loaded once at startup.
//!
//! Every tunable of the bridge comes from environment variables with sensible
//! defaults, validated before any component is constructed. Configuration is
//! supplied to each component explicitly by the composition root; nothing
//! reads the environment after startup.

use std::env;
use std::time::Duration;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("configuration validation failed: {0}")]
    Validation(String),
}

/// Source-ledger (Aeternity) connectivity and ingestion settings.
#[derive(Debug, Clone)]
pub struct AeternityConfig {
    pub network: String,
    pub rpc_url: String,
    pub ws_url: String,
    /// Escrow contract to watch. When unset, all contract transactions are
    /// inspected for recognized event logs.
    pub contract_address: Option<String>,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
}

/// Target-ledger (Solana) connectivity and signing settings.
#[derive(Debug, Clone)]
pub struct SolanaConfig {
    pub cluster: String,
    pub rpc_url: String,
    pub program_id: String,
    pub oracle_seed: String,
    pub request_timeout: Duration,
}

/// Dispatcher tuning: batching, retries, and the concurrency cap.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub batch_size: usize,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub max_concurrent_operations: usize,
    pub dispatch_interval: Duration,
}

/// Top-level configuration for the bridge process.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub aeternity: AeternityConfig,
    pub solana: SolanaConfig,
    pub sync: SyncConfig,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError> {
    let raw = env_or(key, default);
    raw.parse()
        .map_err(|_| ConfigError::InvalidValue { key, value: raw })
}

impl BridgeConfig {
    /// Load configuration from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let aeternity = AeternityConfig {
            network: env_or("AETERNITY_NETWORK", "testnet"),
            rpc_url: env_or("AETERNITY_RPC_URL", "https://testnet.aeternity.io"),
            ws_url: env_or("AETERNITY_WS_URL", "wss://testnet.aeternity.io/websocket"),
            contract_address: env::var("AETERNITY_CONTRACT_ADDRESS").ok(),
            poll_interval: Duration::from_millis(env_parse(
                "AETERNITY_POLLING_INTERVAL",
                "10000",
            )?),
            request_timeout: Duration::from_secs(env_parse("AETERNITY_REQUEST_TIMEOUT", "30")?),
            heartbeat_interval: Duration::from_secs(env_parse(
                "AETERNITY_HEARTBEAT_INTERVAL",
                "30",
            )?),
            max_reconnect_attempts: env_parse("AETERNITY_MAX_RECONNECT_ATTEMPTS", "5")?,
            reconnect_delay: Duration::from_millis(env_parse(
                "AETERNITY_RECONNECT_DELAY",
                "5000",
            )?),
        };

        let solana = SolanaConfig {
            cluster: env_or("SOLANA_CLUSTER", "devnet"),
            rpc_url: env_or("SOLANA_RPC_URL", "https://api.devnet.solana.com"),
            program_id: env_or(
                "SOLANA_PROGRAM_ID",
                "Fg6PaFpoGXkYsidMpWTK6W2BeZ7FEfcYkg476zPFsLnS",
            ),
            oracle_seed: env_or("SOLANA_ORACLE_SEED", "trustlens-oracle-sync"),
            request_timeout: Duration::from_secs(env_parse("SOLANA_REQUEST_TIMEOUT", "30")?),
        };

        let sync = SyncConfig {
            batch_size: env_parse("SYNC_BATCH_SIZE", "10")?,
            retry_attempts: env_parse("SYNC_RETRY_ATTEMPTS", "3")?,
            retry_delay: Duration::from_millis(env_parse("SYNC_RETRY_DELAY", "5000")?),
            max_concurrent_operations: env_parse("SYNC_MAX_CONCURRENT", "5")?,
            dispatch_interval: Duration::from_millis(env_parse("SYNC_DISPATCH_INTERVAL", "1000")?),
        };

        let config = Self {
            aeternity,
            solana,
            sync,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot produce a working bridge.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.aeternity.rpc_url.is_empty() {
            errors.push("AETERNITY_RPC_URL must not be empty");
        }
        if self.aeternity.ws_url.is_empty() {
            errors.push("AETERNITY_WS_URL must not be empty");
        }
        if self.aeternity.poll_interval < Duration::from_millis(1000) {
            errors.push("AETERNITY_POLLING_INTERVAL must be at least 1000ms");
        }
        if self.solana.rpc_url.is_empty() {
            errors.push("SOLANA_RPC_URL must not be empty");
        }
        if self.solana.program_id.is_empty() {
            errors.push("SOLANA_PROGRAM_ID must not be empty");
        }
        if self.solana.oracle_seed.is_empty() {
            errors.push("SOLANA_ORACLE_SEED must not be empty");
        }
        if self.sync.batch_size == 0 {
            errors.push("SYNC_BATCH_SIZE must be at least 1");
        }
        if self.sync.max_concurrent_operations == 0 {
            errors.push("SYNC_MAX_CONCURRENT must be at least 1");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors.join("; ")))
        }
    }
}
