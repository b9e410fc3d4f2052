//! # Chain Client
//!
//! Read balances and token metadata, broadcast native and ERC-20 transfers,
//! and wait for inclusion. Sends return as soon as the node accepts the
//! transaction; confirmation is a separate call so the caller decides how
//! long to wait.

use async_trait::async_trait;
use console_core::config::NetworkConfig;
use console_core::engine::FailureKind;
use console_core::utils::{with_retry, RetryConfig};
use ethers::abi::Abi;
use ethers::contract::Contract;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, MiddlewareError, PendingTransaction, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Eip1559TransactionRequest, H256, U256, U64};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::units::{from_base_units, to_base_units};

const ERC20_ABI: &str = r#"[
    {"constant":true,"inputs":[{"name":"_owner","type":"address"}],"name":"balanceOf","outputs":[{"name":"balance","type":"uint256"}],"type":"function"},
    {"constant":true,"inputs":[],"name":"decimals","outputs":[{"name":"","type":"uint8"}],"type":"function"},
    {"constant":true,"inputs":[],"name":"symbol","outputs":[{"name":"","type":"string"}],"type":"function"},
    {"constant":false,"inputs":[{"name":"_to","type":"address"},{"name":"_value","type":"uint256"}],"name":"transfer","outputs":[{"name":"","type":"bool"}],"type":"function"}
]"#;

const RPC_TIMEOUT_SECS: u64 = 30;
const RECEIPT_POLL: Duration = Duration::from_secs(2);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChainError {
    /// JSON-RPC error returned by the node, e.g. "insufficient funds".
    #[error("{0}")]
    Rpc(String),

    #[error("RPC transport error: {0}")]
    Transport(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid private key")]
    InvalidKey,

    #[error("Amount conversion failed: {0}")]
    Conversion(String),

    #[error("Transaction {tx_hash} reverted")]
    Reverted { tx_hash: String },

    #[error("Transaction {tx_hash} not confirmed: {reason}")]
    Dropped { tx_hash: String, reason: String },

    #[error("Contract call failed: {0}")]
    Contract(String),
}

impl ChainError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ChainError::Transport(_) | ChainError::Dropped { .. } => FailureKind::Network,
            ChainError::InvalidAddress(_) | ChainError::InvalidKey | ChainError::Conversion(_) => {
                FailureKind::Validation
            }
            ChainError::Rpc(_) | ChainError::Reverted { .. } | ChainError::Contract(_) => {
                FailureKind::Rejected
            }
        }
    }

    /// Hash of a transaction that made it to the node before failing.
    pub fn tx_hash(&self) -> Option<&str> {
        match self {
            ChainError::Reverted { tx_hash } | ChainError::Dropped { tx_hash, .. } => Some(tx_hash),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMetadata {
    pub contract: String,
    pub symbol: String,
    pub decimals: u8,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    fn chain_id(&self) -> u64;

    fn is_valid_address(&self, address: &str) -> bool {
        parse_address(address).is_ok()
    }

    async fn native_balance(&self, address: &str) -> Result<Decimal, ChainError>;

    async fn token_metadata(&self, contract: &str) -> Result<TokenMetadata, ChainError>;

    async fn token_balance(&self, token: &TokenMetadata, address: &str) -> Result<Decimal, ChainError>;

    /// Broadcasts a native transfer and returns its hash.
    async fn send_native(&self, key: &str, to: &str, amount: Decimal) -> Result<String, ChainError>;

    /// Broadcasts an ERC-20 `transfer` and returns its hash.
    async fn send_token(
        &self,
        token: &TokenMetadata,
        key: &str,
        to: &str,
        amount: Decimal,
    ) -> Result<String, ChainError>;

    /// Waits for the receipt. A reverted receipt is an error.
    async fn wait_for_inclusion(&self, tx_hash: &str) -> Result<(), ChainError>;
}

pub fn parse_address(address: &str) -> Result<Address, ChainError> {
    address
        .trim()
        .parse::<Address>()
        .map_err(|_| ChainError::InvalidAddress(address.to_string()))
}

fn middleware_error<E: MiddlewareError>(e: E) -> ChainError {
    match e.as_error_response() {
        Some(rpc) => ChainError::Rpc(rpc.message.clone()),
        None => ChainError::Transport(e.to_string()),
    }
}

pub struct EvmClient {
    provider: Arc<Provider<Http>>,
    chain_id: u64,
    erc20: Abi,
    retry: RetryConfig,
    confirm_timeout: Duration,
}

impl EvmClient {
    /// Builds the HTTP provider. The chain id is queried when the network
    /// config does not pin one.
    pub async fn connect(network: &NetworkConfig, confirm_timeout: Duration) -> Result<Self, ChainError> {
        let url = reqwest::Url::parse(&network.rpc_url)
            .map_err(|e| ChainError::Transport(format!("{}: {}", network.rpc_url, e)))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(RPC_TIMEOUT_SECS))
            .build()
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        let provider = Arc::new(Provider::new(Http::new_with_client(url, http)));

        let chain_id = match network.chain_id {
            Some(id) => id,
            None => provider.get_chainid().await.map_err(middleware_error)?.as_u64(),
        };
        let erc20: Abi =
            serde_json::from_str(ERC20_ABI).map_err(|e| ChainError::Contract(e.to_string()))?;

        debug!("Connected to {} (chain {})", network.name, chain_id);
        Ok(Self {
            provider,
            chain_id,
            erc20,
            retry: RetryConfig::default(),
            confirm_timeout,
        })
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn token_contract(&self, contract: &str) -> Result<Contract<Provider<Http>>, ChainError> {
        Ok(Contract::new(
            parse_address(contract)?,
            self.erc20.clone(),
            self.provider.clone(),
        ))
    }

    fn signer(&self, key: &str) -> Result<SignerMiddleware<Provider<Http>, LocalWallet>, ChainError> {
        let wallet = key
            .trim()
            .parse::<LocalWallet>()
            .map_err(|_| ChainError::InvalidKey)?
            .with_chain_id(self.chain_id);
        Ok(SignerMiddleware::new((*self.provider).clone(), wallet))
    }

    async fn broadcast(&self, key: &str, tx: Eip1559TransactionRequest) -> Result<String, ChainError> {
        let client = self.signer(key)?;
        let tx = tx.from(client.address());
        let pending = client
            .send_transaction(tx, None)
            .await
            .map_err(middleware_error)?;
        Ok(format!("{:?}", pending.tx_hash()))
    }

    async fn read_u256(&self, contract: &str, owner: Address) -> Result<U256, ChainError> {
        let token = self.token_contract(contract)?;
        let result = with_retry(self.retry, "balanceOf", || {
            let token = token.clone();
            async move {
                let balance: U256 = token.method("balanceOf", owner)?.call().await?;
                Ok(balance)
            }
        })
        .await;
        result.map_err(|e| ChainError::Contract(format!("{:#}", e)))
    }
}

#[async_trait]
impl ChainClient for EvmClient {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn native_balance(&self, address: &str) -> Result<Decimal, ChainError> {
        let owner = parse_address(address)?;
        let provider = self.provider.clone();
        let wei = with_retry(self.retry, "get_balance", || {
            let provider = provider.clone();
            async move { Ok(provider.get_balance(owner, None).await?) }
        })
        .await
        .map_err(|e| ChainError::Transport(format!("{:#}", e)))?;
        from_base_units(wei, 18)
    }

    async fn token_metadata(&self, contract: &str) -> Result<TokenMetadata, ChainError> {
        let token = self.token_contract(contract)?;
        let (decimals, symbol) = with_retry(self.retry, "token_metadata", || {
            let token = token.clone();
            async move {
                let decimals: u8 = token.method("decimals", ())?.call().await?;
                let symbol: String = token.method("symbol", ())?.call().await?;
                Ok((decimals, symbol))
            }
        })
        .await
        .map_err(|e| ChainError::Contract(format!("{:#}", e)))?;

        Ok(TokenMetadata {
            contract: contract.trim().to_string(),
            symbol,
            decimals,
        })
    }

    async fn token_balance(&self, token: &TokenMetadata, address: &str) -> Result<Decimal, ChainError> {
        let raw = self.read_u256(&token.contract, parse_address(address)?).await?;
        from_base_units(raw, token.decimals)
    }

    async fn send_native(&self, key: &str, to: &str, amount: Decimal) -> Result<String, ChainError> {
        let value = to_base_units(amount, 18)?;
        let tx = Eip1559TransactionRequest::new()
            .to(parse_address(to)?)
            .value(value);
        self.broadcast(key, tx).await
    }

    async fn send_token(
        &self,
        token: &TokenMetadata,
        key: &str,
        to: &str,
        amount: Decimal,
    ) -> Result<String, ChainError> {
        let value = to_base_units(amount, token.decimals)?;
        let contract = self.token_contract(&token.contract)?;
        let data = contract
            .encode("transfer", (parse_address(to)?, value))
            .map_err(|e| ChainError::Contract(e.to_string()))?;
        let tx = Eip1559TransactionRequest::new()
            .to(parse_address(&token.contract)?)
            .data(data);
        self.broadcast(key, tx).await
    }

    async fn wait_for_inclusion(&self, tx_hash: &str) -> Result<(), ChainError> {
        let hash: H256 = tx_hash
            .parse()
            .map_err(|_| ChainError::Contract(format!("malformed tx hash {}", tx_hash)))?;
        let pending = PendingTransaction::new(hash, &*self.provider).interval(RECEIPT_POLL);

        let receipt = match tokio::time::timeout(self.confirm_timeout, pending).await {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(e)) => {
                return Err(ChainError::Dropped {
                    tx_hash: tx_hash.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(ChainError::Dropped {
                    tx_hash: tx_hash.to_string(),
                    reason: format!("no receipt after {}s", self.confirm_timeout.as_secs()),
                })
            }
        };

        match receipt {
            Some(r) if r.status == Some(U64::from(1)) => Ok(()),
            Some(_) => Err(ChainError::Reverted {
                tx_hash: tx_hash.to_string(),
            }),
            None => Err(ChainError::Dropped {
                tx_hash: tx_hash.to_string(),
                reason: "dropped from mempool".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kinds() {
        assert_eq!(
            ChainError::Rpc("insufficient funds for gas * price + value".into()).failure_kind(),
            FailureKind::Rejected
        );
        assert_eq!(ChainError::Transport("timeout".into()).failure_kind(), FailureKind::Network);
        assert_eq!(ChainError::InvalidKey.failure_kind(), FailureKind::Validation);

        let reverted = ChainError::Reverted { tx_hash: "0xabc".into() };
        assert_eq!(reverted.tx_hash(), Some("0xabc"));
        assert_eq!(reverted.failure_kind(), FailureKind::Rejected);
    }

    #[test]
    fn test_rpc_message_is_shown_verbatim() {
        let err = ChainError::Rpc("nonce too low".into());
        assert_eq!(err.to_string(), "nonce too low");
    }

    #[test]
    fn test_address_parsing() {
        assert!(parse_address("0x000000000000000000000000000000000000dEaD").is_ok());
        assert!(matches!(
            parse_address("0x123"),
            Err(ChainError::InvalidAddress(_))
        ));
    }
}
