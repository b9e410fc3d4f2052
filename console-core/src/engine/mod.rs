//! # Batch Transfer Engine
//!
//! Turns a set of source wallets and a target resolution into an ordered
//! task list, resolves per-task amounts, and drains the list strictly one
//! task at a time with a randomized pause between tasks.
//!
//! The engine knows nothing about a particular chain. Balances and sends go
//! through a [`TaskExecutor`]; the EVM implementation lives in the
//! `evm-console` crate and exchange withdrawals in [`withdraw`].

pub mod amount;
pub mod control;
pub mod controller;
pub mod task;
pub mod withdraw;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::session::SessionContext;

pub use amount::{AmountPolicy, IntervalRange, ResolvedAmount};
pub use control::ControlHandle;
pub use controller::{BatchController, BatchSummary, TargetResolution, TaskSource};
pub use task::{FailureKind, Task, TaskKind, TaskStatus};
pub use withdraw::WithdrawExecutor;

/// When full-balance style policies read the source balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceRefresh {
    /// Fetch a fresh balance immediately before each task executes.
    #[default]
    BeforeEach,
    /// Reuse the balance captured by the last snapshot; fetch only if none.
    Snapshot,
}

/// What a batch moves. Only affects amount resolution (fee reserve).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Native,
    Token,
}

/// One send, handed to the executor after the amount has been resolved and
/// the signing key unlocked.
pub struct ExecutionRequest<'a> {
    pub task_id: usize,
    pub from: &'a str,
    pub to: &'a str,
    pub amount: Decimal,
    /// Plaintext key. `None` for executors that do not sign locally.
    pub signing_key: Option<&'a str>,
    pub session: &'a SessionContext,
}

impl fmt::Debug for ExecutionRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionRequest")
            .field("task_id", &self.task_id)
            .field("from", &self.from)
            .field("to", &self.to)
            .field("amount", &self.amount)
            .field("signing_key", &self.signing_key.map(|_| "***REDACTED***"))
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionOutcome {
    pub tx_hash: Option<String>,
}

/// Per-task failure reported by an executor. Never aborts the batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionError {
    pub kind: FailureKind,
    pub reason: String,
    /// Set when the transaction was broadcast before failing.
    pub tx_hash: Option<String>,
}

impl ExecutionError {
    pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
            tx_hash: None,
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::new(FailureKind::Validation, reason)
    }

    pub fn network(reason: impl Into<String>) -> Self {
        Self::new(FailureKind::Network, reason)
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::new(FailureKind::Rejected, reason)
    }

    pub fn with_tx_hash(mut self, tx_hash: impl Into<String>) -> Self {
        self.tx_hash = Some(tx_hash.into());
        self
    }
}

impl std::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.reason)
    }
}

/// Chain (or exchange) side of the engine.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Asset moved by this executor.
    fn asset(&self) -> AssetKind;

    /// Whether `address` is well formed for this executor's chain.
    fn validate_address(&self, _address: &str) -> bool {
        true
    }

    /// Current balance of `address` in whole units.
    async fn balance(&self, address: &str) -> Result<Decimal, ExecutionError>;

    /// Sends and waits for the outcome.
    async fn execute(
        &self,
        request: &ExecutionRequest<'_>,
    ) -> Result<ExecutionOutcome, ExecutionError>;
}
