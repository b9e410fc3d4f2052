use ::config::{Config, File};
use anyhow::Result;
use console_core::config::ConsoleConfig;
use console_core::engine::IntervalRange;
use serde::Deserialize;
use std::time::Duration;

/// Settings only the EVM binary cares about, under `[chain]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChainSettings {
    /// Network used when `--network` is not given.
    pub default_network: Option<String>,
    pub confirm_timeout_secs: u64,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            default_network: None,
            confirm_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ChainSection {
    #[serde(default)]
    chain: ChainSettings,
}

#[derive(Debug, Clone)]
pub struct EvmConfig {
    pub console: ConsoleConfig,
    pub chain: ChainSettings,
}

impl EvmConfig {
    /// Shared sections go through [`ConsoleConfig::load`]; `[chain]` is read
    /// from the same file.
    pub fn load(path: &str) -> Result<Self> {
        let console = ConsoleConfig::load(path)?;
        let section: ChainSection = Config::builder()
            .add_source(File::with_name(path))
            .build()?
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!(e))?;

        Ok(Self {
            console,
            chain: section.chain,
        })
    }

    pub fn interval(&self) -> IntervalRange {
        IntervalRange::new(
            self.console.engine.interval_min_secs,
            self.console.engine.interval_max_secs,
        )
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.chain.confirm_timeout_secs)
    }

    /// Explicit choice first, then `[chain].default_network`, then the first
    /// configured network.
    pub fn network_name<'a>(&'a self, requested: Option<&'a str>) -> Option<&'a str> {
        requested
            .or(self.chain.default_network.as_deref())
            .or_else(|| self.console.networks.first().map(|n| n.name.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    #[test]
    fn test_chain_section_is_optional() {
        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[[networks]]
name = "Local"
rpc_url = "http://127.0.0.1:8545"
chain_id = 31337

[engine]
interval_min_secs = 1.5
interval_max_secs = 0.5
"#
        )
        .unwrap();

        let config = EvmConfig::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.chain.confirm_timeout_secs, 120);
        assert_eq!(config.network_name(None), Some("Local"));
        assert_eq!(config.network_name(Some("Other")), Some("Other"));

        let interval = config.interval();
        assert_eq!(interval.min_secs(), 1.5);
        assert_eq!(interval.max_secs(), 1.5);
    }

    #[test]
    fn test_chain_section_overrides() {
        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[chain]
default_network = "Sepolia Testnet"
confirm_timeout_secs = 30
"#
        )
        .unwrap();

        let config = EvmConfig::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.network_name(None), Some("Sepolia Testnet"));
        assert_eq!(config.confirm_timeout(), Duration::from_secs(30));
        assert!(config.console.network("sepolia testnet").is_ok());
    }
}
