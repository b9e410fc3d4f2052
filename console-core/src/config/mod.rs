use ::config::{Config, Environment, File};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

use crate::engine::amount::MAX_INTERVAL_SECS;
use crate::engine::BalanceRefresh;
use crate::error::ConfigError;
use crate::security::{IvMode, TransportCipher};

/// Environment variable holding the process-wide default passphrase.
pub const TRANSPORT_KEY_ENV: &str = "CONSOLE_TRANSPORT_KEY";
const DEFAULT_TRANSPORT_KEY: &str = "default_secure_key";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    #[serde(default = "default_networks")]
    pub networks: Vec<NetworkConfig>,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    pub rpc_url: String,
    #[serde(default)]
    pub chain_id: Option<u64>,
    #[serde(default = "default_native_symbol")]
    pub native_symbol: String,
    /// Tokens addressable by symbol on this network.
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
}

impl NetworkConfig {
    /// Finds a configured token by symbol or contract address, ignoring case.
    pub fn token(&self, symbol_or_address: &str) -> Option<&TokenConfig> {
        let wanted = symbol_or_address.trim();
        self.tokens.iter().find(|t| {
            t.contract_address.eq_ignore_ascii_case(wanted)
                || t.symbol.as_deref().is_some_and(|s| s.eq_ignore_ascii_case(wanted))
        })
    }
}

/// ERC-20 style token. The contract stays the source of truth for
/// `decimals`; a configured value is only checked against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenConfig {
    pub contract_address: String,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub decimals: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub interval_min_secs: f64,
    pub interval_max_secs: f64,
    /// Kept back from native full-balance transfers to pay the fee.
    pub native_reserve: Decimal,
    pub balance_refresh: BalanceRefresh,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interval_min_secs: 3.0,
            interval_max_secs: 8.0,
            native_reserve: Decimal::new(1, 3),
            balance_refresh: BalanceRefresh::BeforeEach,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub iv_mode: IvMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    Sqlite { path: String },
    Backend { base_url: String },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: "console.db".to_string(),
        }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            networks: default_networks(),
            engine: EngineConfig::default(),
            security: SecurityConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl ConsoleConfig {
    /// Loads a TOML file, then lets `CONSOLE__SECTION__KEY` variables override it.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        if !Path::new(path).exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_string(),
            }
            .into());
        }

        let settings = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("CONSOLE").separator("__"))
            .build()?;

        let config: ConsoleConfig = settings
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!(e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for network in &self.networks {
            if !(network.rpc_url.starts_with("http://") || network.rpc_url.starts_with("https://"))
            {
                return Err(ConfigError::InvalidRpcUrl {
                    url: network.rpc_url.clone(),
                });
            }
        }
        for secs in [self.engine.interval_min_secs, self.engine.interval_max_secs] {
            if !secs.is_finite() || secs < 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: "engine.interval".to_string(),
                    reason: "intervals must be finite and not negative".to_string(),
                });
            }
            if secs > MAX_INTERVAL_SECS {
                return Err(ConfigError::InvalidValue {
                    field: "engine.interval".to_string(),
                    reason: format!("intervals must not exceed {} seconds", MAX_INTERVAL_SECS),
                });
            }
        }
        if self.engine.native_reserve.is_sign_negative() {
            return Err(ConfigError::InvalidValue {
                field: "engine.native_reserve".to_string(),
                reason: "reserve must not be negative".to_string(),
            });
        }
        Ok(())
    }

    pub fn network(&self, name: &str) -> Result<&NetworkConfig, ConfigError> {
        self.networks
            .iter()
            .find(|n| n.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| ConfigError::UnknownNetwork {
                name: name.to_string(),
            })
    }

    /// Transport cipher keyed with `CONSOLE_TRANSPORT_KEY`, or the shared
    /// default when unset. `security.iv_mode` only governs at-rest blobs.
    pub fn transport_cipher(&self) -> TransportCipher {
        TransportCipher::new(transport_key())
    }
}

/// `CONSOLE_TRANSPORT_KEY`, or the default shared with the back-end.
pub fn transport_key() -> String {
    env::var(TRANSPORT_KEY_ENV).unwrap_or_else(|_| DEFAULT_TRANSPORT_KEY.to_string())
}

fn default_native_symbol() -> String {
    "ETH".to_string()
}

fn default_networks() -> Vec<NetworkConfig> {
    [
        ("Ethereum Mainnet", 1, "https://eth.llamarpc.com", "ETH"),
        ("BSC Mainnet", 56, "https://binance.llamarpc.com", "BNB"),
        ("Polygon Mainnet", 137, "https://polygon.llamarpc.com", "POL"),
        ("Arbitrum One", 42161, "https://arbitrum.llamarpc.com", "ETH"),
        ("Optimism", 10, "https://optimism.llamarpc.com", "ETH"),
        ("Sepolia Testnet", 11155111, "https://rpc.sepolia.org", "ETH"),
    ]
    .into_iter()
    .map(|(name, chain_id, rpc, symbol)| NetworkConfig {
        name: name.to_string(),
        rpc_url: rpc.to_string(),
        chain_id: Some(chain_id),
        native_symbol: symbol.to_string(),
        tokens: Vec::new(),
    })
    .collect()
}
