use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::EngineError;
use crate::wallet_manager::SigningKeyRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// One source to its mapped (or single) target.
    Transfer,
    /// One funding wallet to many targets.
    Distribution,
    /// Exchange account to a target address.
    Withdrawal,
}

/// Why a task ended in [`TaskStatus::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Bad input detected before anything was sent.
    Validation,
    /// Amount resolved to zero; a later balance may change that.
    Ineligible,
    /// Signing key could not be unlocked. Excluded from automatic passes.
    Decryption,
    /// RPC or HTTP transport failure.
    Network,
    /// Node, contract or exchange refused the request.
    Rejected,
}

/// One unit of batch work. Only the controller mutates it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    id: usize,
    kind: TaskKind,
    from: String,
    #[serde(skip)]
    signing_key: Option<SigningKeyRef>,
    to: String,
    amount: Option<Decimal>,
    amount_override: Option<Decimal>,
    balance: Option<Decimal>,
    status: TaskStatus,
    tx_hash: Option<String>,
    error_message: Option<String>,
    failure: Option<FailureKind>,
    selected: bool,
}

impl Task {
    pub(crate) fn new(
        id: usize,
        kind: TaskKind,
        from: String,
        signing_key: Option<SigningKeyRef>,
        to: String,
    ) -> Self {
        Self {
            id,
            kind,
            from,
            signing_key,
            to,
            amount: None,
            amount_override: None,
            balance: None,
            status: TaskStatus::Pending,
            tx_hash: None,
            error_message: None,
            failure: None,
            selected: true,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn to(&self) -> &str {
        &self.to
    }

    pub fn signing_key(&self) -> Option<&SigningKeyRef> {
        self.signing_key.as_ref()
    }

    /// Last resolved amount, if the task has been attempted.
    pub fn amount(&self) -> Option<Decimal> {
        self.amount
    }

    pub fn amount_override(&self) -> Option<Decimal> {
        self.amount_override
    }

    /// Last known source balance.
    pub fn balance(&self) -> Option<Decimal> {
        self.balance
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn tx_hash(&self) -> Option<&str> {
        self.tx_hash.as_deref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn failure(&self) -> Option<FailureKind> {
        self.failure
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub fn has_target(&self) -> bool {
        !self.to.trim().is_empty()
    }

    fn automatic_allowed(&self) -> bool {
        self.has_target() && self.failure != Some(FailureKind::Decryption)
    }

    /// Eligible for a full pass.
    pub fn is_runnable(&self, selected_only: bool) -> bool {
        (self.selected || !selected_only)
            && matches!(self.status, TaskStatus::Pending | TaskStatus::Error)
            && self.automatic_allowed()
    }

    /// Eligible for a retry pass.
    pub fn is_retryable(&self) -> bool {
        self.selected && self.status == TaskStatus::Error && self.automatic_allowed()
    }

    pub(crate) fn set_selected(&mut self, selected: bool) {
        self.selected = selected;
    }

    pub(crate) fn set_target(&mut self, to: String) -> Result<(), EngineError> {
        self.ensure_idle()?;
        self.to = to;
        Ok(())
    }

    pub(crate) fn set_amount_override(&mut self, amount: Option<Decimal>) -> Result<(), EngineError> {
        self.ensure_idle()?;
        self.amount_override = amount;
        Ok(())
    }

    pub(crate) fn set_balance(&mut self, balance: Decimal) {
        self.balance = Some(balance);
    }

    pub(crate) fn set_amount(&mut self, amount: Decimal) {
        self.amount = Some(amount);
    }

    /// Pending/Error -> Processing. Clears the previous failure.
    pub(crate) fn begin(&mut self) -> Result<(), EngineError> {
        self.ensure_idle()?;
        self.status = TaskStatus::Processing;
        self.error_message = None;
        self.failure = None;
        Ok(())
    }

    pub(crate) fn succeed(&mut self, tx_hash: Option<String>) {
        self.status = TaskStatus::Success;
        if tx_hash.is_some() {
            self.tx_hash = tx_hash;
        }
        self.error_message = None;
        self.failure = None;
    }

    pub(crate) fn fail(&mut self, kind: FailureKind, reason: impl Into<String>) {
        self.status = TaskStatus::Error;
        self.failure = Some(kind);
        self.error_message = Some(reason.into());
    }

    pub(crate) fn record_tx_hash(&mut self, tx_hash: String) {
        self.tx_hash = Some(tx_hash);
    }

    /// Back to Pending with results cleared. Selection and override survive.
    pub(crate) fn reset(&mut self) {
        self.status = TaskStatus::Pending;
        self.amount = None;
        self.tx_hash = None;
        self.error_message = None;
        self.failure = None;
    }

    fn ensure_idle(&self) -> Result<(), EngineError> {
        if self.status == TaskStatus::Processing {
            return Err(EngineError::TaskBusy { id: self.id });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(to: &str) -> Task {
        Task::new(0, TaskKind::Transfer, "0xaaa".into(), None, to.into())
    }

    #[test]
    fn test_begin_clears_previous_error() {
        let mut t = task("0xbbb");
        t.begin().unwrap();
        t.fail(FailureKind::Network, "timeout");
        assert!(t.is_retryable());
        t.begin().unwrap();
        assert_eq!(t.status(), TaskStatus::Processing);
        assert!(t.error_message().is_none());
        assert_eq!(t.begin(), Err(EngineError::TaskBusy { id: 0 }));
    }

    #[test]
    fn test_decryption_failure_blocks_automatic_passes() {
        let mut t = task("0xbbb");
        t.begin().unwrap();
        t.fail(FailureKind::Decryption, "decryption failed");
        assert!(!t.is_runnable(true));
        assert!(!t.is_retryable());
    }

    #[test]
    fn test_missing_target_is_not_runnable() {
        let t = task("  ");
        assert!(!t.is_runnable(false));
    }
}
