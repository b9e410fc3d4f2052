use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CoreResult;
use crate::session::SessionContext;
use crate::wallet_manager::{NewWallet, WalletRecord};

/// Narrows a wallet query. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalletFilter {
    pub project: Option<String>,
    pub address: Option<String>,
}

impl WalletFilter {
    pub fn project(project: impl Into<String>) -> Self {
        Self {
            project: Some(project.into()),
            address: None,
        }
    }
}

/// Source -> target pairing used to pick each wallet's destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressMapping {
    pub source_address: String,
    pub target_address: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub remark: Option<String>,
}

#[async_trait]
pub trait WalletStore: Send + Sync {
    /// Wallets matching `filter`, ordered by index. Some stores need the
    /// session passphrase to release keys.
    async fn fetch_wallets_by_filter(
        &self,
        filter: &WalletFilter,
        session: &SessionContext,
    ) -> CoreResult<Vec<WalletRecord>>;

    async fn projects(&self) -> CoreResult<Vec<String>>;

    /// Seals and stores plaintext wallets, skipping addresses the project
    /// already holds. Returns how many were inserted.
    async fn insert_wallets(
        &self,
        wallets: &[NewWallet],
        project: &str,
        remark: Option<&str>,
        session: &SessionContext,
    ) -> CoreResult<usize>;
}

#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Mappings whose source matches one of `sources`, compared
    /// case-insensitively. Unmapped sources are simply absent.
    async fn fetch_address_mappings(&self, sources: &[String]) -> CoreResult<Vec<AddressMapping>>;

    /// Upserts by source address. Returns how many rows were written.
    async fn import_mappings(
        &self,
        mappings: &[AddressMapping],
        project: Option<&str>,
        remark: Option<&str>,
    ) -> CoreResult<usize>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WithdrawRequest {
    pub exchange: String,
    pub to_address: String,
    pub network: String,
    pub coin: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WithdrawReceipt {
    #[serde(default)]
    pub txid: Option<String>,
    #[serde(default)]
    pub withdraw_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeAccount {
    pub name: String,
    #[serde(default)]
    pub platform: Option<String>,
}

/// API credentials of one exchange account, in plaintext while held here.
/// The backend stores them sealed under the operator passphrase.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct ExchangeCredentials {
    pub name: String,
    pub platform: String,
    pub apikey: String,
    pub secret: String,
    /// Passphrase some platforms (OKX, Bitget) require on top of the key pair.
    #[serde(default)]
    pub password: String,
    /// Proxy the backend routes this account's API calls through.
    #[serde(default)]
    pub ip: Option<String>,
}

impl fmt::Debug for ExchangeCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeCredentials")
            .field("name", &self.name)
            .field("platform", &self.platform)
            .field("apikey", &"***REDACTED***")
            .field("secret", &"***REDACTED***")
            .field("password", &"***REDACTED***")
            .field("ip", &self.ip)
            .finish()
    }
}

/// Withdrawal fee and minimum for one coin on one network. Values the
/// exchange does not report are `None`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WithdrawFee {
    pub coin: String,
    pub network: String,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub fee: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub min_withdraw: Option<Decimal>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// Exchange-side balance of one coin.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExchangeBalance {
    pub coin: String,
    #[serde(default, deserialize_with = "decimal_or_zero")]
    pub free: Decimal,
    #[serde(default, deserialize_with = "decimal_or_zero")]
    pub used: Decimal,
    #[serde(default, deserialize_with = "decimal_or_zero")]
    pub total: Decimal,
}

/// Accepts numbers, numeric strings and scientific notation; anything else
/// (`"N/A"`, null) becomes `None`.
fn lenient_decimal<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Decimal>, D::Error> {
    let raw = match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.trim().to_string(),
        _ => return Ok(None),
    };
    Ok(Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .ok())
}

fn decimal_or_zero<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Decimal, D::Error> {
    Ok(lenient_decimal(deserializer)?.unwrap_or_default())
}

/// Places a withdrawal from a centralized exchange account.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    async fn withdraw(
        &self,
        request: &WithdrawRequest,
        session: &SessionContext,
    ) -> CoreResult<WithdrawReceipt>;

    /// Configured exchange accounts.
    async fn exchanges(&self) -> CoreResult<Vec<ExchangeAccount>>;

    async fn withdraw_fee(
        &self,
        exchange: &str,
        coin: &str,
        network: &str,
        session: &SessionContext,
    ) -> CoreResult<WithdrawFee>;

    /// Balance of `coin`, or every non-zero balance when `coin` is `None`.
    async fn balances(
        &self,
        exchange: &str,
        coin: Option<&str>,
        session: &SessionContext,
    ) -> CoreResult<Vec<ExchangeBalance>>;
}
