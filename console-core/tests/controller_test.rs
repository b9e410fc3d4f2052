use async_trait::async_trait;
use console_core::engine::{
    AmountPolicy, AssetKind, BalanceRefresh, BatchController, ControlHandle, ExecutionError,
    ExecutionOutcome, ExecutionRequest, FailureKind, IntervalRange, TargetResolution,
    TaskExecutor, TaskSource, TaskStatus,
};
use console_core::error::{CoreError, EngineError, ValidationError};
use console_core::mapping::AddressMap;
use console_core::security::{CredentialCipher, TransportCipher};
use console_core::session::SessionContext;
use console_core::wallet_manager::{KeyUnlocker, SigningKeyRef};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const PASS: &str = "operator-pass";

#[derive(Debug, Clone, PartialEq)]
struct Call {
    from: String,
    to: String,
    amount: Decimal,
    key: Option<String>,
}

#[derive(Clone, Default)]
struct MockExecutor {
    asset: Option<AssetKind>,
    balances: HashMap<String, Decimal>,
    failures: HashMap<String, String>,
    delay: Duration,
    calls: Arc<Mutex<Vec<Call>>>,
    balance_queries: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockExecutor {
    fn native() -> Self {
        Self {
            asset: Some(AssetKind::Native),
            ..Default::default()
        }
    }

    fn with_balance(mut self, address: &str, balance: &str) -> Self {
        self.balances.insert(address.to_lowercase(), d(balance));
        self
    }

    fn failing_for(mut self, from: &str, reason: &str) -> Self {
        self.failures.insert(from.to_lowercase(), reason.to_string());
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskExecutor for MockExecutor {
    fn asset(&self) -> AssetKind {
        self.asset.unwrap_or(AssetKind::Native)
    }

    fn validate_address(&self, address: &str) -> bool {
        address.starts_with("0x")
    }

    async fn balance(&self, address: &str) -> Result<Decimal, ExecutionError> {
        self.balance_queries.fetch_add(1, Ordering::SeqCst);
        self.balances
            .get(&address.to_lowercase())
            .copied()
            .ok_or_else(|| ExecutionError::network("balance unavailable"))
    }

    async fn execute(
        &self,
        request: &ExecutionRequest<'_>,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.calls.lock().unwrap().push(Call {
            from: request.from.to_string(),
            to: request.to.to_string(),
            amount: request.amount,
            key: request.signing_key.map(str::to_string),
        });
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.failures.get(&request.from.to_lowercase()) {
            Some(reason) => Err(ExecutionError::rejected(reason.clone())),
            None => Ok(ExecutionOutcome {
                tx_hash: Some(format!("0xhash{}", request.task_id)),
            }),
        }
    }
}

fn d(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn unlocker() -> KeyUnlocker {
    KeyUnlocker::new(
        CredentialCipher::legacy(),
        TransportCipher::new("default_secure_key"),
    )
}

fn session() -> SessionContext {
    SessionContext::new(PASS).unwrap()
}

fn source(address: &str) -> TaskSource {
    let sealed = CredentialCipher::legacy().seal(&format!("key-{}", address), PASS);
    TaskSource::new(address, Some(SigningKeyRef::sealed(sealed)))
}

fn controller(executor: MockExecutor) -> BatchController<MockExecutor> {
    BatchController::new(executor, unlocker())
        .with_interval(IntervalRange::none())
        .with_seed(9)
}

#[tokio::test]
async fn test_duplicate_sources_are_collapsed() {
    let mut ctl = controller(MockExecutor::native());
    let count = ctl
        .generate_tasks(
            vec![source("0xAAA"), source("0xaaa"), source("0xBBB")],
            TargetResolution::Single("0xTARGET".into()),
            AmountPolicy::fixed(d("0.1")).unwrap(),
        )
        .unwrap();

    assert_eq!(count, 2);
    assert_eq!(ctl.tasks()[0].from(), "0xAAA");
    assert_eq!(ctl.tasks()[1].from(), "0xBBB");
}

#[tokio::test]
async fn test_invalid_single_target_is_rejected_before_tasks_exist() {
    let mut ctl = controller(MockExecutor::native());
    let err = ctl
        .generate_tasks(
            vec![source("0xAAA")],
            TargetResolution::Single("not-an-address".into()),
            AmountPolicy::fixed(d("0.1")).unwrap(),
        )
        .unwrap_err();

    assert!(matches!(
        err,
        CoreError::Validation(ValidationError::InvalidAddress { .. })
    ));
    assert!(ctl.tasks().is_empty());
}

#[tokio::test]
async fn test_sequential_run_records_failure_and_continues() {
    let executor = MockExecutor::native()
        .failing_for("0xB", "insufficient funds for gas * price + value")
        .with_delay(Duration::from_millis(5));
    let mut ctl = controller(executor.clone());
    ctl.generate_tasks(
        vec![source("0xA"), source("0xB"), source("0xC")],
        TargetResolution::Single("0xT".into()),
        AmountPolicy::fixed(d("0.1")).unwrap(),
    )
    .unwrap();

    let summary = ctl.run_all(&session(), true).await.unwrap();

    assert_eq!(summary.success, 2);
    assert_eq!(summary.error, 1);
    let order: Vec<String> = executor.calls().into_iter().map(|c| c.from).collect();
    assert_eq!(order, vec!["0xA", "0xB", "0xC"]);
    assert_eq!(executor.max_in_flight.load(Ordering::SeqCst), 1);

    let failed = &ctl.tasks()[1];
    assert_eq!(failed.status(), TaskStatus::Error);
    assert_eq!(
        failed.error_message(),
        Some("insufficient funds for gas * price + value")
    );
    assert_eq!(ctl.tasks()[0].tx_hash(), Some("0xhash0"));
}

#[tokio::test]
async fn test_signing_key_is_unlocked_for_each_send() {
    let executor = MockExecutor::native();
    let mut ctl = controller(executor.clone());
    ctl.generate_tasks(
        vec![source("0xA")],
        TargetResolution::Single("0xT".into()),
        AmountPolicy::fixed(d("1")).unwrap(),
    )
    .unwrap();

    ctl.run_all(&session(), true).await.unwrap();

    assert_eq!(executor.calls()[0].key.as_deref(), Some("key-0xA"));
}

#[tokio::test]
async fn test_unmapped_source_is_skipped() {
    let executor = MockExecutor::native();
    let mut ctl = controller(executor.clone());
    let map: AddressMap = [("0xa", "0xT1"), ("0xC", "0xT3")].into_iter().collect();
    ctl.generate_tasks(
        vec![source("0xA"), source("0xB"), source("0xc")],
        TargetResolution::Mapped(map),
        AmountPolicy::fixed(d("0.5")).unwrap(),
    )
    .unwrap();

    assert!(!ctl.tasks()[1].has_target());

    let summary = ctl.run_all(&session(), true).await.unwrap();

    assert_eq!(summary.success, 2);
    assert_eq!(summary.pending, 1);
    assert_eq!(ctl.tasks()[1].status(), TaskStatus::Pending);
    let targets: Vec<String> = executor.calls().into_iter().map(|c| c.to).collect();
    assert_eq!(targets, vec!["0xT1", "0xT3"]);

    ctl.set_target(1, "0xT2").unwrap();
    let summary = ctl.run_all(&session(), true).await.unwrap();
    assert_eq!(summary.success, 3);
    assert_eq!(executor.calls().len(), 3);
}

#[tokio::test]
async fn test_invalid_mapped_target_is_left_unset() {
    let executor = MockExecutor::native();
    let mut ctl = controller(executor.clone());
    let map: AddressMap = [("0xa", "0xT1"), ("0xb", "bad"), ("0xc", "0xT3")]
        .into_iter()
        .collect();
    let count = ctl
        .generate_tasks(
            vec![source("0xA"), source("0xB"), source("0xC")],
            TargetResolution::Mapped(map),
            AmountPolicy::fixed(d("0.5")).unwrap(),
        )
        .unwrap();

    assert_eq!(count, 3);
    assert!(!ctl.tasks()[1].has_target());

    let summary = ctl.run_all(&session(), true).await.unwrap();
    assert_eq!(summary.success, 2);
    assert_eq!(summary.pending, 1);
    assert_eq!(ctl.tasks()[1].status(), TaskStatus::Pending);
}

#[tokio::test]
async fn test_retry_only_touches_failed_tasks() {
    let executor = MockExecutor::native().failing_for("0xB", "nonce too low");
    let mut ctl = controller(executor.clone());
    ctl.generate_tasks(
        vec![source("0xA"), source("0xB"), source("0xC")],
        TargetResolution::Single("0xT".into()),
        AmountPolicy::fixed(d("0.1")).unwrap(),
    )
    .unwrap();
    ctl.run_all(&session(), true).await.unwrap();
    assert_eq!(executor.calls().len(), 3);

    ctl.retry_failed(&session()).await.unwrap();

    let calls = executor.calls();
    assert_eq!(calls.len(), 4);
    assert_eq!(calls[3].from, "0xB");
    assert_eq!(ctl.tasks()[0].status(), TaskStatus::Success);
    assert_eq!(ctl.tasks()[2].status(), TaskStatus::Success);
}

#[tokio::test]
async fn test_unselected_tasks_are_left_alone() {
    let executor = MockExecutor::native();
    let mut ctl = controller(executor.clone());
    ctl.generate_tasks(
        vec![source("0xA"), source("0xB")],
        TargetResolution::Single("0xT".into()),
        AmountPolicy::fixed(d("0.1")).unwrap(),
    )
    .unwrap();
    ctl.select_all(false);
    ctl.set_selected(1, true).unwrap();

    ctl.run_all(&session(), true).await.unwrap();
    assert_eq!(ctl.tasks()[0].status(), TaskStatus::Pending);
    assert_eq!(executor.calls().len(), 1);

    ctl.run_all(&session(), false).await.unwrap();
    assert_eq!(ctl.tasks()[0].status(), TaskStatus::Success);
    assert_eq!(executor.calls().len(), 2);
}

#[tokio::test]
async fn test_wrong_passphrase_marks_decryption_failure() {
    let executor = MockExecutor::native();
    let mut ctl = controller(executor.clone());
    let foreign = CredentialCipher::legacy().seal("key-0xB", "someone-else");
    ctl.generate_tasks(
        vec![
            source("0xA"),
            TaskSource::new("0xB", Some(SigningKeyRef::sealed(foreign))),
        ],
        TargetResolution::Single("0xT".into()),
        AmountPolicy::fixed(d("0.1")).unwrap(),
    )
    .unwrap();

    ctl.run_all(&session(), true).await.unwrap();

    let task = &ctl.tasks()[1];
    assert_eq!(task.status(), TaskStatus::Error);
    assert_eq!(task.failure(), Some(FailureKind::Decryption));
    assert_eq!(task.error_message(), Some("decryption failed"));
    assert_eq!(executor.calls().len(), 1);

    ctl.retry_failed(&session()).await.unwrap();
    assert_eq!(executor.calls().len(), 1);

    // Still reachable manually.
    let status = ctl.run_one(1, &session()).await.unwrap();
    assert_eq!(status, TaskStatus::Error);
}

#[tokio::test]
async fn test_full_balance_reads_fresh_balance() {
    let executor = MockExecutor::native()
        .with_balance("0xA", "1.5")
        .with_balance("0xB", "0.0005");
    let mut ctl = controller(executor.clone());
    ctl.generate_tasks(
        vec![source("0xA"), source("0xB")],
        TargetResolution::Single("0xT".into()),
        AmountPolicy::full_balance(d("0.001")).unwrap(),
    )
    .unwrap();

    ctl.run_all(&session(), true).await.unwrap();

    assert_eq!(executor.calls()[0].amount, d("1.499"));
    let skipped = &ctl.tasks()[1];
    assert_eq!(skipped.status(), TaskStatus::Error);
    assert_eq!(skipped.failure(), Some(FailureKind::Ineligible));
    assert_eq!(skipped.amount(), Some(Decimal::ZERO));
    assert_eq!(executor.calls().len(), 1);
}

#[tokio::test]
async fn test_snapshot_mode_reuses_captured_balance() {
    let executor = MockExecutor::native().with_balance("0xA", "3");
    let mut ctl = controller(executor.clone()).with_balance_refresh(BalanceRefresh::Snapshot);
    ctl.generate_tasks(
        vec![source("0xA")],
        TargetResolution::Single("0xT".into()),
        AmountPolicy::remaining_above(d("1")).unwrap(),
    )
    .unwrap();

    assert_eq!(ctl.snapshot_balances().await, 1);
    ctl.run_all(&session(), true).await.unwrap();

    assert_eq!(executor.balance_queries.load(Ordering::SeqCst), 1);
    assert_eq!(executor.calls()[0].amount, d("2"));
}

#[tokio::test]
async fn test_fixed_override_applies_per_task() {
    let executor = MockExecutor::native();
    let mut ctl = controller(executor.clone());
    ctl.generate_tasks(
        vec![source("0xA"), source("0xB")],
        TargetResolution::Single("0xT".into()),
        AmountPolicy::fixed(d("0.1")).unwrap(),
    )
    .unwrap();
    ctl.set_amount_override(1, Some(d("0.7"))).unwrap();
    assert!(ctl.set_amount_override(0, Some(Decimal::ZERO)).is_err());

    ctl.run_all(&session(), true).await.unwrap();

    let amounts: Vec<Decimal> = executor.calls().into_iter().map(|c| c.amount).collect();
    assert_eq!(amounts, vec![d("0.1"), d("0.7")]);
}

#[tokio::test]
async fn test_distribution_fans_out_from_one_source() {
    let executor = MockExecutor::native();
    let mut ctl = controller(executor.clone());
    let count = ctl
        .generate_distribution(
            source("0xFUND"),
            vec!["0x1".into(), "0x2".into(), "0X1".into(), "".into()],
            AmountPolicy::random_range(d("0.01"), d("0.02")).unwrap(),
        )
        .unwrap();
    assert_eq!(count, 2);

    ctl.run_all(&session(), true).await.unwrap();

    let calls = executor.calls();
    assert!(calls.iter().all(|c| c.from == "0xFUND"));
    assert!(calls
        .iter()
        .all(|c| c.amount >= d("0.01") && c.amount <= d("0.02")));

    let err = ctl
        .generate_distribution(
            source("0xFUND"),
            vec!["0x1".into()],
            AmountPolicy::full_balance(Decimal::ZERO).unwrap(),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Validation(ValidationError::UnsupportedPolicy { .. })
    ));
}

#[tokio::test]
async fn test_cancel_leaves_remaining_tasks_pending() {
    let executor = MockExecutor::native();
    let mut ctl = BatchController::new(executor.clone(), unlocker())
        .with_interval(IntervalRange::new(0.2, 0.2));
    ctl.generate_tasks(
        vec![source("0xA"), source("0xB"), source("0xC")],
        TargetResolution::Single("0xT".into()),
        AmountPolicy::fixed(d("0.1")).unwrap(),
    )
    .unwrap();

    let control = ctl.control();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        control.cancel();
    });

    let summary = ctl.run_all(&session(), true).await.unwrap();

    assert_eq!(summary.success, 1);
    assert_eq!(summary.pending, 2);
    assert!(!ctl.control().is_running());
}

#[tokio::test]
async fn test_cancel_blocks_later_retry_rounds() {
    let executor = MockExecutor::native().failing_for("0xA", "nonce too low");
    let mut ctl = BatchController::new(executor.clone(), unlocker())
        .with_interval(IntervalRange::new(0.2, 0.2));
    ctl.generate_tasks(
        vec![source("0xA"), source("0xB")],
        TargetResolution::Single("0xT".into()),
        AmountPolicy::fixed(d("0.1")).unwrap(),
    )
    .unwrap();

    let control = ctl.control();
    let canceller = control.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let session = session();
    let summary = ctl.run_all(&session, true).await.unwrap();
    assert_eq!(summary.error, 1);
    assert_eq!(summary.pending, 1);
    assert_eq!(executor.calls().len(), 1);

    let summary = ctl.retry_failed(&session).await.unwrap();
    assert_eq!(summary.error, 1);
    assert_eq!(executor.calls().len(), 1);
    assert!(matches!(
        ctl.run_one(0, &session).await,
        Err(CoreError::Engine(EngineError::Cancelled))
    ));

    control.rearm();
    ctl.retry_failed(&session).await.unwrap();
    assert_eq!(executor.calls().len(), 2);
}

#[tokio::test]
async fn test_paused_batch_waits_for_resume() {
    let executor = MockExecutor::native();
    let mut ctl = BatchController::new(executor.clone(), unlocker())
        .with_interval(IntervalRange::new(0.1, 0.1));
    ctl.generate_tasks(
        vec![source("0xA"), source("0xB")],
        TargetResolution::Single("0xT".into()),
        AmountPolicy::fixed(d("0.1")).unwrap(),
    )
    .unwrap();

    let control = ctl.control();
    let watcher = executor.clone();
    let driver = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        control.pause();
        tokio::time::sleep(Duration::from_millis(250)).await;
        let seen_while_paused = watcher.calls().len();
        control.resume();
        seen_while_paused
    });

    let summary = ctl.run_all(&session(), true).await.unwrap();
    assert_eq!(driver.await.unwrap(), 1);
    assert_eq!(summary.success, 2);
}

#[tokio::test]
async fn test_source_without_key_fails_as_decryption() {
    let executor = MockExecutor::native();
    let mut ctl = controller(executor.clone());
    ctl.generate_tasks(
        vec![TaskSource::new("0xA", None), source("0xB")],
        TargetResolution::Single("0xT".into()),
        AmountPolicy::fixed(d("0.1")).unwrap(),
    )
    .unwrap();

    let session = session();
    ctl.run_all(&session, true).await.unwrap();

    let task = ctl.task(0).unwrap();
    assert_eq!(task.status(), TaskStatus::Error);
    assert_eq!(task.failure(), Some(FailureKind::Decryption));
    assert_eq!(task.error_message(), Some("decryption failed"));
    assert!(!task.is_retryable());
    assert_eq!(executor.calls().len(), 1);

    ctl.retry_failed(&session).await.unwrap();
    assert_eq!(executor.calls().len(), 1);
}

#[tokio::test]
async fn test_concurrent_run_is_rejected() {
    let control = ControlHandle::new();
    let slow = MockExecutor::native().with_delay(Duration::from_millis(100));
    let mut first = controller(slow).with_control(control.clone());
    let mut second = controller(MockExecutor::native()).with_control(control.clone());

    for ctl in [&mut first, &mut second] {
        ctl.generate_tasks(
            vec![source("0xA")],
            TargetResolution::Single("0xT".into()),
            AmountPolicy::fixed(d("0.1")).unwrap(),
        )
        .unwrap();
    }

    let running = tokio::spawn(async move {
        let session = session();
        first.run_all(&session, true).await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let err = second.run_all(&session(), true).await.unwrap_err();
    assert!(matches!(err, CoreError::Engine(EngineError::AlreadyRunning)));

    assert_eq!(running.await.unwrap().unwrap().success, 1);
    assert!(!control.is_running());
}

#[tokio::test]
async fn test_run_one_refuses_completed_task() {
    let mut ctl = controller(MockExecutor::native());
    ctl.generate_tasks(
        vec![source("0xA")],
        TargetResolution::Single("0xT".into()),
        AmountPolicy::fixed(d("0.1")).unwrap(),
    )
    .unwrap();

    assert_eq!(ctl.run_one(0, &session()).await.unwrap(), TaskStatus::Success);
    let err = ctl.run_one(0, &session()).await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::Engine(EngineError::AlreadyCompleted { id: 0 })
    ));

    ctl.reset();
    assert_eq!(ctl.tasks()[0].status(), TaskStatus::Pending);
    assert!(ctl.tasks()[0].tx_hash().is_none());
}
