//! Configuration management for the swapper
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::error::{SwapperError, SwapperResult};
use crate::model::{Chain, ChainFamily};

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub watcher: WatcherConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub chains: HashMap<String, ChainConfig>,
    #[serde(default)]
    pub screener: ScreenerConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatcherConfig {
    pub instance_id: String,
    pub order_workers: usize,
    pub order_poll_interval_ms: u64,
    /// Unfilled orders are cancelled after this long
    pub order_timeout_secs: u64,
    /// Filled orders with no leg started are cancelled after this long
    pub swap_initiation_timeout_secs: u64,
    #[serde(default = "default_swap_concurrency")]
    pub swap_concurrency: usize,
    #[serde(default = "default_wait_initial_ms")]
    pub wait_initial_backoff_ms: u64,
    #[serde(default = "default_wait_max_ms")]
    pub wait_max_backoff_ms: u64,
    #[serde(default = "default_true")]
    pub halt_on_failed_hard: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `postgres://...`, or `memory://` for the in-process store
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    /// Bearer token guarding operator endpoints
    #[serde(default)]
    pub operator_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain: Chain,
    pub rpc_urls: Vec<String>,
    /// HTLC contract, account chains only
    #[serde(default)]
    pub contract_address: Option<String>,
    pub poll_interval_ms: u64,
    /// Zero falls back to the chain's recommended depth
    #[serde(default)]
    pub min_confirmations: u64,
    /// First block scanned for HTLC logs
    #[serde(default)]
    pub start_block: u64,
    #[serde(default = "default_max_block_range")]
    pub max_block_range: u64,
    #[serde(default = "default_gas_strategy")]
    pub gas_price_strategy: GasPriceStrategy,
    #[serde(default = "default_max_gas_price_gwei")]
    pub max_gas_price_gwei: u64,
    /// Fee rate for UTXO spends, sat/vB
    #[serde(default = "default_fee_rate")]
    pub fee_rate_sat_vb: u64,
    pub enabled: bool,
}

impl ChainConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum GasPriceStrategy {
    Legacy,
    Eip1559,
    Arbitrum,
    Optimism,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScreenerConfig {
    pub url: Option<String>,
    pub deny_list_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertsConfig {
    pub webhook_url: Option<String>,
}

fn default_swap_concurrency() -> usize {
    16
}

fn default_wait_initial_ms() -> u64 {
    1_000
}

fn default_wait_max_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

fn default_max_block_range() -> u64 {
    1_000
}

fn default_gas_strategy() -> GasPriceStrategy {
    GasPriceStrategy::Eip1559
}

fn default_max_gas_price_gwei() -> u64 {
    200
}

fn default_fee_rate() -> u64 {
    10
}

impl Settings {
    /// Load settings from the file named by `SWAPPER_CONFIG`
    pub fn load() -> SwapperResult<Self> {
        let config_path = env::var("SWAPPER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));
        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(config_path: &Path) -> SwapperResult<Self> {
        let config_str = std::fs::read_to_string(config_path).map_err(|e| {
            SwapperError::Config(format!("Failed to read config file {:?}: {}", config_path, e))
        })?;
        Self::from_toml(&config_str)
    }

    pub fn from_toml(config_str: &str) -> SwapperResult<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(config_str);

        let settings: Settings = toml::from_str(&config_str)
            .map_err(|e| SwapperError::Config(format!("Failed to parse configuration: {}", e)))?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> SwapperResult<()> {
        if self.enabled_chains().is_empty() {
            return Err(SwapperError::Config(
                "At least one chain must be enabled".to_string(),
            ));
        }
        if self.watcher.order_workers == 0 {
            return Err(SwapperError::Config(
                "watcher.order_workers must be at least 1".to_string(),
            ));
        }
        if self.watcher.order_poll_interval_ms == 0 {
            return Err(SwapperError::Config(
                "watcher.order_poll_interval_ms must be non-zero".to_string(),
            ));
        }

        for (name, chain) in self.enabled_chains() {
            if chain.rpc_urls.is_empty() {
                return Err(SwapperError::Config(format!(
                    "Chain {} has no RPC URLs configured",
                    name
                )));
            }
            if chain.poll_interval_ms == 0 {
                return Err(SwapperError::Config(format!(
                    "Chain {} has a zero poll interval",
                    name
                )));
            }
            if chain.chain.family() != ChainFamily::Utxo
                && chain.contract_address.as_deref().unwrap_or("").is_empty()
            {
                return Err(SwapperError::Config(format!(
                    "Chain {} has no HTLC contract address",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        self.chains.iter().filter(|(_, c)| c.enabled).collect()
    }

    /// Get chain config by chain identifier
    pub fn get_chain(&self, chain: Chain) -> Option<&ChainConfig> {
        self.chains.values().find(|c| c.enabled && c.chain == chain)
    }
}

lazy_static! {
    static ref ENV_VAR: Regex = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    ENV_VAR
        .replace_all(input, |cap: &regex::Captures<'_>| {
            env::var(&cap[1]).unwrap_or_default()
        })
        .into_owned()
}
