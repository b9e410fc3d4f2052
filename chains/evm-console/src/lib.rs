//! EVM side of the batch wallet console: JSON-RPC client, the transfer
//! executor the engine drives, and BIP-39 wallet generation.

pub mod client;
pub mod config;
pub mod executor;
pub mod units;
pub mod wallet_factory;

pub use client::{ChainClient, ChainError, EvmClient, TokenMetadata};
pub use config::{ChainSettings, EvmConfig};
pub use executor::TransferExecutor;
pub use wallet_factory::{generate_wallets, parse_import_line, parse_import_lines};
