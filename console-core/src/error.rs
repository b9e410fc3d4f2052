//! # Core Error Types
//!
//! Centralized error definitions for the console-core crate.
//! All errors implement `std::error::Error` and `std::fmt::Display`.

use thiserror::Error;

/// Unified error type for console-core operations.
///
/// This enum wraps all specific error types and provides a unified
/// error interface for the application layer.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Config(ConfigError),

    #[error("Database error: {0}")]
    Database(DatabaseError),

    #[error(transparent)]
    Wallet(WalletError),

    #[error(transparent)]
    Network(NetworkError),

    #[error(transparent)]
    Security(SecurityError),

    #[error(transparent)]
    Validation(ValidationError),

    #[error(transparent)]
    Engine(EngineError),

    #[error("Backend rejected request (code {code}): {msg}")]
    Api { code: i64, msg: String },
}

impl From<ConfigError> for CoreError {
    fn from(e: ConfigError) -> Self {
        CoreError::Config(e)
    }
}

impl From<DatabaseError> for CoreError {
    fn from(e: DatabaseError) -> Self {
        CoreError::Database(e)
    }
}

impl From<WalletError> for CoreError {
    fn from(e: WalletError) -> Self {
        CoreError::Wallet(e)
    }
}

impl From<NetworkError> for CoreError {
    fn from(e: NetworkError) -> Self {
        CoreError::Network(e)
    }
}

impl From<SecurityError> for CoreError {
    fn from(e: SecurityError) -> Self {
        CoreError::Security(e)
    }
}

impl From<DecryptionError> for CoreError {
    fn from(e: DecryptionError) -> Self {
        CoreError::Security(SecurityError::Decryption(e))
    }
}

impl From<ValidationError> for CoreError {
    fn from(e: ValidationError) -> Self {
        CoreError::Validation(e)
    }
}

impl From<EngineError> for CoreError {
    fn from(e: EngineError) -> Self {
        CoreError::Engine(e)
    }
}

/// Configuration-related errors
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("Invalid RPC URL format: '{url}'")]
    InvalidRpcUrl { url: String },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Unknown network: '{name}'")]
    UnknownNetwork { name: String },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("I/O error reading {path}: {msg}")]
    IoError { path: String, msg: String },
}

/// Wallet record and import errors
#[derive(Error, Debug, Clone)]
pub enum WalletError {
    #[error("Decryption failed for wallet '{address}': {reason}")]
    DecryptionFailed { address: String, reason: String },

    #[error("Wallet not found: {address}")]
    NotFound { address: String },

    #[error("Invalid private key format: expected hex string")]
    InvalidKeyFormat,

    #[error("Wallet address mismatch: expected {expected}, got {actual}")]
    AddressMismatch { expected: String, actual: String },

    #[error("Invalid import line {line}: {reason}")]
    InvalidImportLine { line: usize, reason: String },
}

/// Database operation errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Connection pool exhausted (max: {max_size})")]
    PoolExhausted { max_size: u32 },

    #[error("Transaction failed: {msg}")]
    TransactionFailed { msg: String },

    #[error("Constraint violation: {constraint}")]
    ConstraintViolation { constraint: String },
}

impl From<sqlx::Error> for DatabaseError {
    fn from(e: sqlx::Error) -> Self {
        DatabaseError::TransactionFailed { msg: e.to_string() }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(e: sqlx::Error) -> Self {
        CoreError::Database(e.into())
    }
}

/// Network and HTTP-related errors
#[derive(Error, Debug, Clone)]
pub enum NetworkError {
    #[error("Request timeout after {timeout_ms}ms to {endpoint}")]
    Timeout { timeout_ms: u64, endpoint: String },

    #[error("Connection refused to {endpoint}: {reason}")]
    ConnectionRefused { endpoint: String, reason: String },

    #[error("HTTP error {status_code} from {endpoint}")]
    HttpError { status_code: u16, endpoint: String },

    #[error("Invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },
}

/// Failure to turn a credential blob back into text.
///
/// Raised both when the ciphertext does not decode or unpad and when the
/// plaintext is not valid UTF-8, which is how a wrong passphrase usually shows
/// up once padding happens to validate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecryptionError {
    #[error("credential blob is not valid base64")]
    InvalidEncoding,

    #[error("credential blob has an invalid length ({len} bytes)")]
    InvalidLength { len: usize },

    #[error("padding check failed")]
    BadPadding,

    #[error("decrypted bytes are not valid UTF-8")]
    InvalidUtf8,
}

/// Security-related errors
#[derive(Error, Debug, Clone)]
pub enum SecurityError {
    #[error("Decryption failed: {0}")]
    Decryption(#[from] DecryptionError),
}

/// Local validation errors: rejected before any task is created or run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Operator password is required")]
    MissingPassword,

    #[error("Invalid address: '{address}'")]
    InvalidAddress { address: String },

    #[error("Amount for '{field}' must be greater than zero")]
    NonPositiveAmount { field: String },

    #[error("Amount for '{field}' must not be negative")]
    NegativeAmount { field: String },

    #[error("Amount for '{field}' exceeds the largest supported value {limit}")]
    AmountTooLarge { field: String, limit: String },

    #[error("Invalid range: min {min} is greater than max {max}")]
    InvalidRange { min: String, max: String },

    #[error("No targets given")]
    EmptyTargets,

    #[error("No source wallets given")]
    EmptySources,

    #[error("Amount policy '{policy}' cannot be used for {action}")]
    UnsupportedPolicy { policy: String, action: String },
}

/// Batch engine errors. Per-task failures never surface here; they are
/// recorded on the task itself.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("A batch run is already in progress")]
    AlreadyRunning,

    #[error("Task {id} not found")]
    TaskNotFound { id: usize },

    #[error("Task {id} is currently processing")]
    TaskBusy { id: usize },

    #[error("Task {id} already succeeded")]
    AlreadyCompleted { id: usize },

    #[error("Batch was cancelled; rearm the control handle to run again")]
    Cancelled,
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
