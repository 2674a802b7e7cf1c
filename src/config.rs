use alloy::primitives::Address;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::coordination::ShutdownConfig;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub mailbox: MailboxConfig,
    #[serde(default)]
    pub subscriptions: SubscriptionConfig,
    #[serde(default)]
    pub deposits: DepositConfig,
    #[serde(default)]
    pub shutdown: ShutdownSettings,
    pub intents: IntentConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Health server port; disabled when unset
    #[serde(default)]
    pub health_port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// JSON-RPC endpoint of the execution ledger
    pub rpc_url: String,
    /// Store registry contract
    pub registry_address: Address,
    /// Privileged account used for mirror updates and callbacks
    pub system_account: Address,
    /// Gas ceiling for mirror store writes
    #[serde(default = "default_ledger_gas_limit")]
    pub gas_limit: u64,
    /// Gas ceiling for strategy callbacks (events, effect and funding results)
    #[serde(default = "default_callback_gas_limit")]
    pub callback_gas_limit: u64,
}

fn default_ledger_gas_limit() -> u64 {
    5_000_000
}

fn default_callback_gas_limit() -> u64 {
    1_000_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub rpc_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_intake_capacity")]
    pub intake_capacity: usize,
}

fn default_workers() -> usize {
    4
}

fn default_intake_capacity() -> usize {
    1024
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            intake_capacity: default_intake_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailboxConfig {
    /// How often idle mailboxes are reaped
    #[serde(default = "default_reap_interval")]
    pub reap_interval_secs: u64,
    /// Inactivity after which an empty mailbox is dropped
    #[serde(default = "default_max_idle")]
    pub max_idle_secs: u64,
}

fn default_reap_interval() -> u64 {
    300
}

fn default_max_idle() -> u64 {
    3600
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            reap_interval_secs: default_reap_interval(),
            max_idle_secs: default_max_idle(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionConfig {
    /// Consecutive delivery failures before a subscription is disabled
    #[serde(default = "default_max_delivery_failures")]
    pub max_delivery_failures: u32,
}

fn default_max_delivery_failures() -> u32 {
    3
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            max_delivery_failures: default_max_delivery_failures(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DepositConfig {
    /// Blocks behind the newest seen deposit for which transfers are still
    /// de-duplicated; older transfers are refused
    #[serde(default = "default_dedupe_window_blocks")]
    pub dedupe_window_blocks: u64,
}

fn default_dedupe_window_blocks() -> u64 {
    50_000
}

impl Default for DepositConfig {
    fn default() -> Self {
        Self {
            dedupe_window_blocks: default_dedupe_window_blocks(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownSettings {
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
    #[serde(default = "default_shutdown_poll")]
    pub poll_interval_ms: u64,
}

fn default_drain_timeout() -> u64 {
    60
}

fn default_shutdown_poll() -> u64 {
    500
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            drain_timeout_secs: default_drain_timeout(),
            poll_interval_ms: default_shutdown_poll(),
        }
    }
}

impl From<&ShutdownSettings> for ShutdownConfig {
    fn from(settings: &ShutdownSettings) -> Self {
        ShutdownConfig {
            drain_timeout_secs: settings.drain_timeout_secs,
            poll_interval_ms: settings.poll_interval_ms,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntentConfig {
    /// JSON file holding signed strategy intents
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("ledger.gas_limit", default_ledger_gas_limit())?
            .set_default("executor.workers", default_workers() as u64)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Environment-specific overrides, e.g. config/production.toml
            .add_source(
                File::from(config_dir.join(
                    std::env::var("ORCH_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // ORCH_LEDGER__RPC_URL, ORCH_EXECUTOR__WORKERS, ...
            .add_source(
                Environment::with_prefix("ORCH")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    pub fn chain_ids(&self) -> Vec<u64> {
        self.chains.iter().map(|c| c.chain_id).collect()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.ledger.rpc_url.trim().is_empty() {
            errors.push("ledger.rpc_url must be set".to_string());
        }
        if self.ledger.registry_address == Address::ZERO {
            errors.push("ledger.registry_address must not be the zero address".to_string());
        }
        if self.ledger.system_account == Address::ZERO {
            errors.push("ledger.system_account must not be the zero address".to_string());
        }
        if self.ledger.gas_limit == 0 || self.ledger.callback_gas_limit == 0 {
            errors.push("ledger gas limits must be positive".to_string());
        }

        if self.chains.is_empty() {
            errors.push("at least one chain must be configured".to_string());
        }
        let mut seen = HashSet::new();
        for chain in &self.chains {
            if !seen.insert(chain.chain_id) {
                errors.push(format!("chain {} is configured more than once", chain.chain_id));
            }
            if chain.rpc_url.trim().is_empty() {
                errors.push(format!("chain {} has no rpc_url", chain.chain_id));
            }
        }

        if self.executor.workers == 0 {
            errors.push("executor.workers must be at least 1".to_string());
        }
        if self.executor.intake_capacity == 0 {
            errors.push("executor.intake_capacity must be at least 1".to_string());
        }
        if self.mailbox.reap_interval_secs == 0 {
            errors.push("mailbox.reap_interval_secs must be positive".to_string());
        }
        if self.subscriptions.max_delivery_failures == 0 {
            errors.push("subscriptions.max_delivery_failures must be at least 1".to_string());
        }
        if self.deposits.dedupe_window_blocks == 0 {
            errors.push("deposits.dedupe_window_blocks must be positive".to_string());
        }
        if self.shutdown.drain_timeout_secs == 0 {
            errors.push("shutdown.drain_timeout_secs must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, body: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join("default.toml"), body).unwrap();
    }

    const BASE: &str = r#"
[ledger]
rpc_url = "http://127.0.0.1:8545"
registry_address = "0x00000000000000000000000000000000000000e1"
system_account = "0x00000000000000000000000000000000000000e2"

[[chains]]
chain_id = 1
rpc_url = "http://127.0.0.1:9545"

[intents]
path = "intents.json"
"#;

    #[test]
    fn test_defaults_fill_missing_sections() {
        let dir = std::env::temp_dir().join(format!("orch-config-{}", std::process::id()));
        write_config(&dir, BASE);

        let config = AppConfig::load_from(&dir).unwrap();
        assert_eq!(config.ledger.gas_limit, 5_000_000);
        assert_eq!(config.executor.workers, 4);
        assert_eq!(config.executor.intake_capacity, 1024);
        assert_eq!(config.mailbox.max_idle_secs, 3600);
        assert_eq!(config.subscriptions.max_delivery_failures, 3);
        assert_eq!(config.deposits.dedupe_window_blocks, 50_000);
        assert_eq!(config.shutdown.drain_timeout_secs, 60);
        assert_eq!(config.chain_ids(), vec![1]);
        assert!(config.validate().is_ok());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_validate_collects_every_error() {
        let dir = std::env::temp_dir().join(format!("orch-config-bad-{}", std::process::id()));
        write_config(
            &dir,
            r#"
[ledger]
rpc_url = "http://127.0.0.1:8545"
registry_address = "0x00000000000000000000000000000000000000e1"
system_account = "0x00000000000000000000000000000000000000e2"

[[chains]]
chain_id = 1
rpc_url = "http://127.0.0.1:9545"

[[chains]]
chain_id = 1
rpc_url = ""

[executor]
workers = 0

[intents]
path = "intents.json"
"#,
        );

        let config = AppConfig::load_from(&dir).unwrap();
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("more than once")));
        assert!(errors.iter().any(|e| e.contains("no rpc_url")));
        assert!(errors.iter().any(|e| e.contains("executor.workers")));

        std::fs::remove_dir_all(&dir).ok();
    }
}
