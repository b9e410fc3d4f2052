//! # Console Core - Shared Logic for the Batch Wallet Console
//!
//! Chain-agnostic pieces of the operator console: credential encryption,
//! wallet and mapping stores, the backend client and the sequential batch
//! transfer engine.
//!
//! ## Modules
//!
//! - [`api`] - Backend HTTP client and response envelope
//! - [`config`] - TOML/env configuration
//! - [`database`] - Local SQLite wallet and mapping store
//! - [`engine`] - Task generation, amount policies and the execution controller
//! - [`error`] - Typed error handling with thiserror
//! - [`mapping`] - Source -> target address resolution
//! - [`security`] - AES-256-CBC credential cipher
//! - [`session`] - Operator passphrase and selection
//! - [`traits`] - Store and gateway seams
//! - [`utils`] - Logging and retry helpers
//! - [`wallet_manager`] - Wallet records and just-in-time key unlocking

pub mod api;
pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod mapping;
pub mod security;
pub mod session;
pub mod traits;
pub mod utils;
pub mod wallet_manager;

pub use api::{ApiResponse, BackendClient, SUCCESS_CODE};
pub use config::{ConsoleConfig, EngineConfig, NetworkConfig, StorageConfig, TokenConfig};
pub use database::DatabaseManager;
pub use engine::{
    AmountPolicy, AssetKind, BalanceRefresh, BatchController, BatchSummary, ControlHandle,
    ExecutionError, ExecutionOutcome, ExecutionRequest, FailureKind, IntervalRange,
    TargetResolution, Task, TaskExecutor, TaskKind, TaskSource, TaskStatus, WithdrawExecutor,
};
pub use error::{
    ConfigError, CoreError, CoreResult, DatabaseError, DecryptionError, EngineError,
    NetworkError, SecurityError, ValidationError, WalletError,
};
pub use mapping::{AddressMap, AddressMappingResolver};
pub use security::{CredentialBlob, CredentialCipher, IvMode, TransportCipher};
pub use session::SessionContext;
pub use traits::{
    AddressMapping, ExchangeAccount, ExchangeGateway, MappingStore, WalletFilter, WalletStore,
    WithdrawReceipt, WithdrawRequest,
};
pub use utils::{setup_logger, with_retry, RetryConfig};
pub use wallet_manager::{KeyScheme, KeyUnlocker, NewWallet, SigningKeyRef, WalletManager, WalletRecord};
