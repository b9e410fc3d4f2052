use console_core::utils::{is_transient_error, with_retry, RetryConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_retry_success_first_try() {
    let counter = Arc::new(AtomicUsize::new(0));
    let config = RetryConfig::new(3, 10).without_jitter();

    let result: Result<String, anyhow::Error> = with_retry(config, "get_balance", || async {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok("1.5".to_string())
    })
    .await;

    assert!(result.is_ok());
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retry_recovers_from_transient_errors() {
    let counter = Arc::new(AtomicUsize::new(0));
    let config = RetryConfig::new(3, 10).without_jitter();

    let result: Result<String, anyhow::Error> = with_retry(config, "get_balance", || async {
        let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
        if count < 3 {
            Err(anyhow::anyhow!("connection reset by peer"))
        } else {
            Ok("1.5".to_string())
        }
    })
    .await;

    assert!(result.is_ok());
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retry_gives_up_after_max_transient_attempts() {
    let counter = Arc::new(AtomicUsize::new(0));
    let config = RetryConfig::new(3, 10).without_jitter();

    let result: Result<String, anyhow::Error> = with_retry(config, "get_balance", || async {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(anyhow::anyhow!("request timeout"))
    })
    .await;

    assert!(result.is_err());
    assert_eq!(counter.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_permanent_error_is_not_retried() {
    let counter = Arc::new(AtomicUsize::new(0));
    let config = RetryConfig::new(3, 10).without_jitter();

    let result: Result<String, anyhow::Error> = with_retry(config, "get_balance", || async {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(anyhow::anyhow!("execution reverted"))
    })
    .await;

    let err = result.unwrap_err();
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert!(format!("{:#}", err).contains("execution reverted"));
}

#[tokio::test]
async fn test_retry_waits_between_attempts() {
    let counter = Arc::new(AtomicUsize::new(0));
    let config = RetryConfig::new(2, 50).without_jitter();

    let start = tokio::time::Instant::now();
    let _: Result<String, anyhow::Error> = with_retry(config, "get_balance", || async {
        if counter.fetch_add(1, Ordering::SeqCst) + 1 < 3 {
            Err(anyhow::anyhow!("service unavailable"))
        } else {
            Ok("done".to_string())
        }
    })
    .await;

    // 50ms then 100ms
    assert!(start.elapsed() >= Duration::from_millis(150));
}

#[test]
fn test_transient_error_detection() {
    assert!(is_transient_error(&anyhow::anyhow!("Request timeout")));
    assert!(is_transient_error(&anyhow::anyhow!("429 Too Many Requests")));
    assert!(is_transient_error(&anyhow::anyhow!("database is locked")));
    assert!(!is_transient_error(&anyhow::anyhow!(
        "insufficient funds for gas * price + value"
    )));
    assert!(!is_transient_error(&anyhow::anyhow!("execution reverted")));
}
