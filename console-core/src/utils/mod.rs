//! # Utilities Module
//!
//! Logging and retry helpers shared by the console binaries.

pub mod logger;
pub mod retry;

pub use logger::{setup_logger, TASK_RESULT_TARGET};
pub use retry::{is_transient_error, with_retry, RetryConfig};
