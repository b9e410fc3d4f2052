use async_trait::async_trait;
use console_core::engine::{
    AssetKind, ExecutionError, ExecutionOutcome, ExecutionRequest, TaskExecutor,
};
use rust_decimal::Decimal;
use tracing::debug;

use crate::client::{ChainClient, ChainError, TokenMetadata};

/// Binds engine tasks to one chain: either native transfers or transfers of
/// a single ERC-20 token.
pub struct TransferExecutor<C: ChainClient> {
    client: C,
    token: Option<TokenMetadata>,
    confirm: bool,
}

impl<C: ChainClient> TransferExecutor<C> {
    pub fn native(client: C) -> Self {
        Self {
            client,
            token: None,
            confirm: true,
        }
    }

    /// Reads symbol and decimals from the contract up front so every amount
    /// conversion in the batch uses the token's real precision.
    pub async fn token(client: C, contract: &str) -> Result<Self, ChainError> {
        let token = client.token_metadata(contract).await?;
        debug!("Token {} has {} decimals", token.symbol, token.decimals);
        Ok(Self {
            client,
            token: Some(token),
            confirm: true,
        })
    }

    /// Return right after broadcast instead of waiting for the receipt.
    pub fn without_confirmation(mut self) -> Self {
        self.confirm = false;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn token_metadata(&self) -> Option<&TokenMetadata> {
        self.token.as_ref()
    }
}

fn chain_failure(e: ChainError) -> ExecutionError {
    let tx_hash = e.tx_hash().map(str::to_string);
    let err = ExecutionError::new(e.failure_kind(), e.to_string());
    match tx_hash {
        Some(hash) => err.with_tx_hash(hash),
        None => err,
    }
}

#[async_trait]
impl<C: ChainClient> TaskExecutor for TransferExecutor<C> {
    fn asset(&self) -> AssetKind {
        if self.token.is_some() {
            AssetKind::Token
        } else {
            AssetKind::Native
        }
    }

    fn validate_address(&self, address: &str) -> bool {
        self.client.is_valid_address(address)
    }

    async fn balance(&self, address: &str) -> Result<Decimal, ExecutionError> {
        let balance = match &self.token {
            Some(token) => self.client.token_balance(token, address).await,
            None => self.client.native_balance(address).await,
        };
        balance.map_err(chain_failure)
    }

    async fn execute(
        &self,
        request: &ExecutionRequest<'_>,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let key = request
            .signing_key
            .ok_or_else(|| ExecutionError::validation("no signing key for source wallet"))?;

        let tx_hash = match &self.token {
            Some(token) => {
                self.client
                    .send_token(token, key, request.to, request.amount)
                    .await
            }
            None => self.client.send_native(key, request.to, request.amount).await,
        }
        .map_err(chain_failure)?;

        if self.confirm {
            self.client
                .wait_for_inclusion(&tx_hash)
                .await
                .map_err(|e| chain_failure(e).with_tx_hash(tx_hash.clone()))?;
        }

        Ok(ExecutionOutcome {
            tx_hash: Some(tx_hash),
        })
    }
}
