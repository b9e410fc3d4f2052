//! Exchange withdrawals driven through the same sequential engine.

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::{AssetKind, ExecutionError, ExecutionOutcome, ExecutionRequest, TaskExecutor};
use crate::error::CoreError;
use crate::traits::{ExchangeGateway, WithdrawRequest};

/// Sends each task as a withdrawal of `coin` on `network` from one exchange
/// account. Balances are not available, so only fixed and random policies
/// make sense here.
pub struct WithdrawExecutor<G: ExchangeGateway> {
    gateway: G,
    exchange: String,
    network: String,
    coin: String,
}

impl<G: ExchangeGateway> WithdrawExecutor<G> {
    pub fn new(
        gateway: G,
        exchange: impl Into<String>,
        network: impl Into<String>,
        coin: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            exchange: exchange.into(),
            network: network.into(),
            coin: coin.into(),
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }
}

#[async_trait]
impl<G: ExchangeGateway> TaskExecutor for WithdrawExecutor<G> {
    fn asset(&self) -> AssetKind {
        AssetKind::Token
    }

    async fn balance(&self, _address: &str) -> Result<Decimal, ExecutionError> {
        Err(ExecutionError::validation(
            "exchange balances are not available",
        ))
    }

    async fn execute(
        &self,
        request: &ExecutionRequest<'_>,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let withdraw = WithdrawRequest {
            exchange: self.exchange.clone(),
            to_address: request.to.to_string(),
            network: self.network.clone(),
            coin: self.coin.clone(),
            amount: request.amount,
        };

        let receipt = self
            .gateway
            .withdraw(&withdraw, request.session)
            .await
            .map_err(|e| match e {
                CoreError::Network(n) => ExecutionError::network(n.to_string()),
                CoreError::Api { msg, .. } => ExecutionError::rejected(msg),
                other => ExecutionError::rejected(other.to_string()),
            })?;

        Ok(ExecutionOutcome {
            tx_hash: receipt.txid.or(receipt.withdraw_id).filter(|id| !id.is_empty()),
        })
    }
}
