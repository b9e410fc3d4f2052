//! # Execution Controller
//!
//! Owns the task list for one batch and drains it strictly sequentially:
//! balance, amount, key, send, confirm, then the next task after a random
//! pause. A failing task is recorded and the loop moves on.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::amount::{AmountPolicy, IntervalRange};
use super::control::{ControlHandle, RunGuard};
use super::task::{FailureKind, Task, TaskKind, TaskStatus};
use super::{BalanceRefresh, ExecutionRequest, TaskExecutor};
use crate::error::{CoreResult, EngineError, ValidationError};
use crate::mapping::AddressMap;
use crate::session::SessionContext;
use crate::utils::TASK_RESULT_TARGET;
use crate::wallet_manager::{KeyUnlocker, SigningKeyRef, WalletRecord};

const MSG_LIMIT: usize = 125;

/// A wallet that can fund tasks.
#[derive(Debug, Clone)]
pub struct TaskSource {
    pub address: String,
    pub signing_key: Option<SigningKeyRef>,
}

impl TaskSource {
    pub fn new(address: impl Into<String>, signing_key: Option<SigningKeyRef>) -> Self {
        Self {
            address: address.into(),
            signing_key,
        }
    }
}

impl From<&WalletRecord> for TaskSource {
    fn from(record: &WalletRecord) -> Self {
        Self::new(record.address.clone(), record.signing_key())
    }
}

/// Where each generated transfer task sends to.
#[derive(Debug, Clone)]
pub enum TargetResolution {
    /// Per-source target from the mapping store; unmapped sources get an
    /// empty target and are skipped until one is set.
    Mapped(AddressMap),
    /// Every source sends to the same address.
    Single(String),
    /// Targets are filled in later with [`BatchController::set_target`].
    Manual,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub success: usize,
    pub error: usize,
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Total: {} | Success: {} | Failed: {} | Pending: {}",
            self.total, self.success, self.error, self.pending
        )
    }
}

pub struct BatchController<E: TaskExecutor> {
    executor: E,
    unlocker: KeyUnlocker,
    policy: Option<AmountPolicy>,
    interval: IntervalRange,
    refresh: BalanceRefresh,
    control: ControlHandle,
    tasks: Vec<Task>,
    rng: StdRng,
}

impl<E: TaskExecutor> BatchController<E> {
    pub fn new(executor: E, unlocker: KeyUnlocker) -> Self {
        Self {
            executor,
            unlocker,
            policy: None,
            interval: IntervalRange::default(),
            refresh: BalanceRefresh::default(),
            control: ControlHandle::new(),
            tasks: Vec::new(),
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_interval(mut self, interval: IntervalRange) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_balance_refresh(mut self, refresh: BalanceRefresh) -> Self {
        self.refresh = refresh;
        self
    }

    /// Shares run state with other controllers holding the same handle.
    pub fn with_control(mut self, control: ControlHandle) -> Self {
        self.control = control;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn policy(&self) -> Option<&AmountPolicy> {
        self.policy.as_ref()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, id: usize) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id() == id)
    }

    // ---- generation ----

    /// One transfer task per distinct source (case-insensitive, first wins).
    /// Replaces the current list.
    pub fn generate_tasks(
        &mut self,
        sources: Vec<TaskSource>,
        targets: TargetResolution,
        policy: AmountPolicy,
    ) -> CoreResult<usize> {
        self.ensure_idle()?;
        if sources.is_empty() {
            return Err(ValidationError::EmptySources.into());
        }

        if let TargetResolution::Single(to) = &targets {
            self.check_address(to)?;
        }

        let mut seen = HashSet::new();
        let mut tasks = Vec::with_capacity(sources.len());
        for source in sources {
            if !seen.insert(source.address.trim().to_lowercase()) {
                debug!("Skipping duplicate source {}", source.address);
                continue;
            }
            let to = match &targets {
                TargetResolution::Mapped(map) => {
                    let to = map.get(&source.address).unwrap_or_default();
                    if to.is_empty() || self.check_address(to).is_ok() {
                        to.to_string()
                    } else {
                        warn!("Mapped target {} for {} is not a valid address, leaving it unset", to, source.address);
                        String::new()
                    }
                }
                TargetResolution::Single(to) => to.clone(),
                TargetResolution::Manual => String::new(),
            };
            tasks.push(Task::new(
                tasks.len(),
                TaskKind::Transfer,
                source.address,
                source.signing_key,
                to,
            ));
        }

        self.install(tasks, policy, "transfer")
    }

    /// One task per distinct target, all funded by `source`.
    pub fn generate_distribution(
        &mut self,
        source: TaskSource,
        targets: Vec<String>,
        policy: AmountPolicy,
    ) -> CoreResult<usize> {
        self.ensure_idle()?;
        if policy.needs_balance() {
            return Err(unsupported(&policy, "distribution"));
        }
        let targets = self.distinct_targets(targets)?;

        let tasks = targets
            .into_iter()
            .enumerate()
            .map(|(id, to)| {
                Task::new(
                    id,
                    TaskKind::Distribution,
                    source.address.clone(),
                    source.signing_key.clone(),
                    to,
                )
            })
            .collect();

        self.install(tasks, policy, "distribution")
    }

    /// One withdrawal per distinct target from the named exchange account.
    pub fn generate_withdrawals(
        &mut self,
        exchange: &str,
        targets: Vec<String>,
        policy: AmountPolicy,
    ) -> CoreResult<usize> {
        self.ensure_idle()?;
        if policy.needs_balance() {
            return Err(unsupported(&policy, "withdrawal"));
        }
        let targets = self.distinct_targets(targets)?;

        let tasks = targets
            .into_iter()
            .enumerate()
            .map(|(id, to)| Task::new(id, TaskKind::Withdrawal, exchange.to_string(), None, to))
            .collect();

        self.install(tasks, policy, "withdrawal")
    }

    fn install(&mut self, tasks: Vec<Task>, policy: AmountPolicy, label: &str) -> CoreResult<usize> {
        let unmapped = tasks.iter().filter(|t| !t.has_target()).count();
        info!(
            "Generated {} {} tasks ({}){}",
            tasks.len(),
            label,
            policy.describe(),
            if unmapped > 0 {
                format!(", {} without target", unmapped)
            } else {
                String::new()
            }
        );
        self.tasks = tasks;
        self.policy = Some(policy);
        Ok(self.tasks.len())
    }

    fn distinct_targets(&self, targets: Vec<String>) -> CoreResult<Vec<String>> {
        let mut seen = HashSet::new();
        let mut distinct = Vec::with_capacity(targets.len());
        for to in targets {
            let to = to.trim().to_string();
            if to.is_empty() {
                continue;
            }
            self.check_address(&to)?;
            if seen.insert(to.to_lowercase()) {
                distinct.push(to);
            }
        }
        if distinct.is_empty() {
            return Err(ValidationError::EmptyTargets.into());
        }
        Ok(distinct)
    }

    fn check_address(&self, address: &str) -> Result<(), ValidationError> {
        if address.trim().is_empty() || !self.executor.validate_address(address.trim()) {
            return Err(ValidationError::InvalidAddress {
                address: address.to_string(),
            });
        }
        Ok(())
    }

    // ---- editing ----

    pub fn set_selected(&mut self, id: usize, selected: bool) -> CoreResult<()> {
        self.task_mut(id)?.set_selected(selected);
        Ok(())
    }

    pub fn select_all(&mut self, selected: bool) {
        for task in &mut self.tasks {
            task.set_selected(selected);
        }
    }

    pub fn set_target(&mut self, id: usize, to: &str) -> CoreResult<()> {
        self.check_address(to)?;
        self.task_mut(id)?.set_target(to.trim().to_string())?;
        Ok(())
    }

    /// Per-task amount for the fixed policy. `None` falls back to the
    /// policy's value.
    pub fn set_amount_override(&mut self, id: usize, amount: Option<Decimal>) -> CoreResult<()> {
        if let Some(amount) = amount {
            if amount <= Decimal::ZERO {
                return Err(ValidationError::NonPositiveAmount {
                    field: format!("task {}", id),
                }
                .into());
            }
        }
        self.task_mut(id)?.set_amount_override(amount)?;
        Ok(())
    }

    /// Returns every idle task to Pending.
    pub fn reset(&mut self) {
        for task in &mut self.tasks {
            if task.status() != TaskStatus::Processing {
                task.reset();
            }
        }
    }

    pub fn clear(&mut self) -> CoreResult<()> {
        self.ensure_idle()?;
        self.tasks.clear();
        self.policy = None;
        Ok(())
    }

    pub fn summary(&self) -> BatchSummary {
        let mut summary = BatchSummary {
            total: self.tasks.len(),
            ..Default::default()
        };
        for task in &self.tasks {
            match task.status() {
                TaskStatus::Pending => summary.pending += 1,
                TaskStatus::Processing => summary.processing += 1,
                TaskStatus::Success => summary.success += 1,
                TaskStatus::Error => summary.error += 1,
            }
        }
        summary
    }

    fn task_mut(&mut self, id: usize) -> Result<&mut Task, EngineError> {
        self.tasks
            .iter_mut()
            .find(|t| t.id() == id)
            .ok_or(EngineError::TaskNotFound { id })
    }

    fn ensure_idle(&self) -> Result<(), EngineError> {
        if self.control.is_running() {
            return Err(EngineError::AlreadyRunning);
        }
        Ok(())
    }

    // ---- balances ----

    /// Reads the balance of every distinct source and stores it on its tasks.
    /// Failures are logged and leave the previous value in place.
    pub async fn snapshot_balances(&mut self) -> usize {
        let mut fetched: HashMap<String, Decimal> = HashMap::new();
        let mut updated = 0;

        for task in &mut self.tasks {
            if task.kind() == TaskKind::Withdrawal {
                continue;
            }
            let key = task.from().to_lowercase();
            let balance = match fetched.get(&key) {
                Some(balance) => *balance,
                None => match self.executor.balance(task.from()).await {
                    Ok(balance) => {
                        fetched.insert(key, balance);
                        balance
                    }
                    Err(e) => {
                        warn!("Balance query failed for {}: {}", task.from(), e);
                        continue;
                    }
                },
            };
            task.set_balance(balance);
            updated += 1;
        }

        debug!("Balance snapshot: {} tasks updated", updated);
        updated
    }

    // ---- execution ----

    /// Runs a single task regardless of selection. Refuses tasks that
    /// already succeeded.
    pub async fn run_one(&mut self, id: usize, session: &SessionContext) -> CoreResult<TaskStatus> {
        let idx = self
            .tasks
            .iter()
            .position(|t| t.id() == id)
            .ok_or(EngineError::TaskNotFound { id })?;
        match self.tasks[idx].status() {
            TaskStatus::Success => return Err(EngineError::AlreadyCompleted { id }.into()),
            TaskStatus::Processing => return Err(EngineError::TaskBusy { id }.into()),
            _ => {}
        }

        let guard = self.control.start()?;
        if guard.is_cancelled() {
            return Err(EngineError::Cancelled.into());
        }
        self.execute_at(idx, session, 1, 1).await;
        Ok(self.tasks[idx].status())
    }

    /// Runs every eligible task in list order: not yet succeeded, with a
    /// target, and not blocked by a decryption failure.
    pub async fn run_all(
        &mut self,
        session: &SessionContext,
        selected_only: bool,
    ) -> CoreResult<BatchSummary> {
        let indices = self.collect(|t| t.is_runnable(selected_only));
        self.drain(indices, session, "run").await
    }

    /// Runs selected tasks currently in Error, in list order.
    pub async fn retry_failed(&mut self, session: &SessionContext) -> CoreResult<BatchSummary> {
        let indices = self.collect(Task::is_retryable);
        self.drain(indices, session, "retry").await
    }

    fn collect(&self, eligible: impl Fn(&Task) -> bool) -> Vec<usize> {
        self.tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| eligible(t))
            .map(|(idx, _)| idx)
            .collect()
    }

    async fn drain(
        &mut self,
        indices: Vec<usize>,
        session: &SessionContext,
        label: &str,
    ) -> CoreResult<BatchSummary> {
        let guard = self.control.start()?;
        let total = indices.len();
        if total == 0 {
            info!("Nothing to {}: no eligible tasks", label);
            return Ok(self.summary());
        }

        info!("Starting {} of {} tasks", label, total);
        let started = Instant::now();

        for (pos, idx) in indices.into_iter().enumerate() {
            if !guard.checkpoint().await {
                warn!("Batch cancelled after {}/{} tasks", pos, total);
                break;
            }

            self.execute_at(idx, session, pos + 1, total).await;

            if pos + 1 < total && !self.pause_between(&guard).await {
                warn!("Batch cancelled after {}/{} tasks", pos + 1, total);
                break;
            }
        }
        drop(guard);

        let summary = self.summary();
        info!(
            "Batch {} finished in {:.1}s. {}",
            label,
            started.elapsed().as_secs_f64(),
            summary
        );
        Ok(summary)
    }

    async fn pause_between(&mut self, guard: &RunGuard) -> bool {
        let delay = self.interval.sample(&mut self.rng);
        if delay.is_zero() {
            return !guard.is_cancelled();
        }
        debug!("Waiting {:.1}s before next task", delay.as_secs_f64());
        guard.sleep(delay).await
    }

    async fn execute_at(&mut self, idx: usize, session: &SessionContext, pos: usize, total: usize) {
        let started = Instant::now();
        let asset = self.executor.asset();
        let task = &mut self.tasks[idx];
        let tag = format!("[T:{}/{}][#{}]", pos, total, task.id());

        if !task.has_target() {
            task.fail(FailureKind::Validation, "target address missing");
            log_failure(&tag, task, started);
            return;
        }
        if let Err(e) = task.begin() {
            warn!("{} {}", tag, e);
            return;
        }
        // The backend hands out no key when it cannot decrypt the wallet.
        if task.kind() != TaskKind::Withdrawal && task.signing_key().is_none() {
            task.fail(FailureKind::Decryption, "decryption failed");
            log_failure(&tag, task, started);
            return;
        }

        let Some(policy) = self.policy.as_ref() else {
            task.fail(FailureKind::Validation, "no amount policy");
            log_failure(&tag, task, started);
            return;
        };

        let balance = if policy.needs_balance() {
            match (self.refresh, task.balance()) {
                (BalanceRefresh::Snapshot, Some(balance)) => balance,
                _ => match self.executor.balance(task.from()).await {
                    Ok(balance) => {
                        task.set_balance(balance);
                        balance
                    }
                    Err(e) => {
                        task.fail(e.kind, format!("balance query failed: {}", e.reason));
                        log_failure(&tag, task, started);
                        return;
                    }
                },
            }
        } else {
            task.balance().unwrap_or_default()
        };

        let resolved = policy.resolve(balance, asset, task.amount_override(), &mut self.rng);
        task.set_amount(resolved.amount);
        if !resolved.eligible {
            task.fail(
                FailureKind::Ineligible,
                format!("amount resolves to zero (balance {})", balance),
            );
            log_failure(&tag, task, started);
            return;
        }

        let key = match task.signing_key().cloned() {
            Some(key_ref) => match self.unlocker.unlock(&key_ref, session) {
                Ok(key) => Some(key),
                Err(e) => {
                    debug!("{} key unlock failed: {}", tag, e);
                    task.fail(FailureKind::Decryption, "decryption failed");
                    log_failure(&tag, task, started);
                    return;
                }
            },
            None => None,
        };

        let result = {
            let request = ExecutionRequest {
                task_id: task.id(),
                from: task.from(),
                to: task.to(),
                amount: resolved.amount,
                signing_key: key.as_deref().map(String::as_str),
                session,
            };
            self.executor.execute(&request).await
        };
        drop(key);

        match result {
            Ok(outcome) => {
                task.succeed(outcome.tx_hash);
                info!(
                    target: TASK_RESULT_TARGET,
                    "{} Success [{}] {} -> {} {} {} in {:.1}s",
                    tag,
                    kind_label(task.kind()),
                    short(task.from()),
                    short(task.to()),
                    resolved.amount,
                    task.tx_hash().unwrap_or("-"),
                    started.elapsed().as_secs_f64()
                );
            }
            Err(e) => {
                if let Some(tx_hash) = e.tx_hash {
                    task.record_tx_hash(tx_hash);
                }
                task.fail(e.kind, e.reason);
                log_failure(&tag, task, started);
            }
        }
    }
}

fn unsupported(policy: &AmountPolicy, action: &str) -> crate::error::CoreError {
    ValidationError::UnsupportedPolicy {
        policy: policy.describe(),
        action: action.to_string(),
    }
    .into()
}

fn log_failure(tag: &str, task: &Task, started: Instant) {
    let raw = task.error_message().unwrap_or("unknown error").replace('\n', " | ");
    let clipped = if raw.chars().count() > MSG_LIMIT {
        let truncated: String = raw.chars().take(MSG_LIMIT - 3).collect();
        format!("{}...", truncated)
    } else {
        raw
    };
    warn!(
        target: TASK_RESULT_TARGET,
        "{} Failed  [{}] {} -> {} {} in {:.1}s",
        tag,
        kind_label(task.kind()),
        short(task.from()),
        short(task.to()),
        clipped,
        started.elapsed().as_secs_f64()
    );
}

fn kind_label(kind: TaskKind) -> &'static str {
    match kind {
        TaskKind::Transfer => "transfer",
        TaskKind::Distribution => "distribute",
        TaskKind::Withdrawal => "withdraw",
    }
}

fn short(address: &str) -> String {
    if address.len() > 12 && address.is_char_boundary(6) && address.is_char_boundary(address.len() - 4) {
        format!("{}..{}", &address[..6], &address[address.len() - 4..])
    } else if address.is_empty() {
        "-".to_string()
    } else {
        address.to_string()
    }
}
