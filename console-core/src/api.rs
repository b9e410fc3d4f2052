//! # Backend API client
//!
//! JSON over HTTP to the wallet back-end. Every response is wrapped in
//! `{code, data, msg}`; `code == 20000` means success and anything else is
//! surfaced as [`CoreError::Api`] with the server's message.
//!
//! Password-like fields are obfuscated with the transport cipher before a
//! request leaves the process, and private keys and exchange credentials come
//! back encrypted under the same transport key.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::error::{CoreError, CoreResult, NetworkError, SecurityError};
use crate::security::{CredentialBlob, TransportCipher};
use crate::session::SessionContext;
use crate::traits::{
    AddressMapping, ExchangeAccount, ExchangeBalance, ExchangeCredentials, ExchangeGateway,
    MappingStore, WalletFilter, WalletStore, WithdrawFee, WithdrawReceipt, WithdrawRequest,
};
use crate::wallet_manager::{KeyScheme, NewWallet, WalletRecord};

pub const SUCCESS_CODE: i64 = 20000;

/// Request fields carrying operator or exchange secrets.
pub const CREDENTIAL_FIELDS: &[&str] = &["pwd", "password", "secret", "apikey"];

#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i64,
    pub data: Option<T>,
    #[serde(default)]
    pub msg: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn into_result(self) -> CoreResult<Option<T>> {
        if self.code == SUCCESS_CODE {
            Ok(self.data)
        } else {
            Err(CoreError::Api {
                code: self.code,
                msg: self.msg.unwrap_or_else(|| "request failed".to_string()),
            })
        }
    }
}

/// Replaces every non-empty credential field (at any depth) with its
/// transport-encrypted form.
pub fn obfuscate_credentials(value: &mut Value, transport: &TransportCipher) {
    match value {
        Value::Object(map) => {
            for (key, field) in map.iter_mut() {
                if CREDENTIAL_FIELDS.contains(&key.as_str()) {
                    if let Value::String(plain) = field {
                        if !plain.is_empty() {
                            *plain = transport.encrypt(plain).into_inner();
                        }
                    }
                } else {
                    obfuscate_credentials(field, transport);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                obfuscate_credentials(item, transport);
            }
        }
        _ => {}
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletItem {
    #[serde(default)]
    index: i64,
    address: String,
    #[serde(default)]
    private_key: Option<String>,
    #[serde(default)]
    phrase: Option<String>,
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    remark: Option<String>,
}

impl From<WalletItem> for WalletRecord {
    fn from(item: WalletItem) -> Self {
        WalletRecord {
            index: item.index,
            address: item.address,
            private_key: item.private_key.map(Into::into),
            phrase: item.phrase.map(Into::into),
            project: item.project.unwrap_or_default(),
            remark: item.remark,
            scheme: KeyScheme::Transport,
        }
    }
}

/// `/exchange/one` row; secret fields are transport-encrypted.
#[derive(Deserialize)]
struct ExchangeItem {
    name: String,
    #[serde(default)]
    platform: Option<String>,
    #[serde(default)]
    apikey: Option<String>,
    #[serde(default)]
    secret: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    ip: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportCount {
    #[serde(default)]
    success_count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MappingPair<'a> {
    source_address: &'a str,
    target_address: &'a str,
}

/// Remote wallet store, mapping store and exchange gateway.
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: Client,
    base_url: String,
    transport: TransportCipher,
}

impl BackendClient {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

    pub fn new(base_url: impl Into<String>, transport: TransportCipher) -> CoreResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(Self::DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| NetworkError::ConnectionRefused {
                endpoint: "http client".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            transport,
        })
    }

    fn reveal(&self, field: Option<String>) -> CoreResult<String> {
        match field {
            Some(blob) if !blob.is_empty() => Ok(self
                .transport
                .decrypt(&CredentialBlob::new(blob))
                .map_err(SecurityError::from)?),
            _ => Ok(String::new()),
        }
    }

    /// One exchange account with its credentials opened. `None` when the
    /// name is unknown or the passphrase does not open it.
    pub async fn exchange_account(
        &self,
        name: &str,
        session: &SessionContext,
    ) -> CoreResult<Option<ExchangeCredentials>> {
        let item: Option<ExchangeItem> = self
            .get("/exchange/one", &[("name", name), ("pwd", session.passphrase())])
            .await?;
        let Some(item) = item else {
            return Ok(None);
        };
        Ok(Some(ExchangeCredentials {
            apikey: self.reveal(item.apikey)?,
            secret: self.reveal(item.secret)?,
            password: self.reveal(item.password)?,
            name: item.name,
            platform: item.platform.unwrap_or_default(),
            ip: item.ip,
        }))
    }

    pub async fn insert_exchange(
        &self,
        account: &ExchangeCredentials,
        session: &SessionContext,
    ) -> CoreResult<()> {
        let _: Option<Value> = self
            .post("/exchange/insert", exchange_body(account, session))
            .await?;
        debug!("Exchange account '{}' added", account.name);
        Ok(())
    }

    /// Blank credential fields keep the stored value.
    pub async fn update_exchange(
        &self,
        account: &ExchangeCredentials,
        session: &SessionContext,
    ) -> CoreResult<()> {
        let _: Option<Value> = self
            .post("/exchange/update", exchange_body(account, session))
            .await?;
        debug!("Exchange account '{}' updated", account.name);
        Ok(())
    }

    /// Returns the number of rows the backend removed.
    pub async fn delete_exchange(&self, name: &str) -> CoreResult<u64> {
        let removed: Option<Value> = self
            .post("/exchange/delete", json!({ "name": name }))
            .await?;
        Ok(removed.and_then(|v| v.as_u64()).unwrap_or_default())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn post<T: DeserializeOwned>(&self, path: &str, mut body: Value) -> CoreResult<Option<T>> {
        obfuscate_credentials(&mut body, &self.transport);
        let endpoint = self.url(path);
        debug!("POST {}", endpoint);
        let response = self
            .http
            .post(&endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(&endpoint, e))?;
        decode(&endpoint, response).await
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> CoreResult<Option<T>> {
        let endpoint = self.url(path);
        debug!("GET {}", endpoint);
        let query: Vec<(&str, String)> = query
            .iter()
            .map(|(k, v)| {
                if CREDENTIAL_FIELDS.contains(k) && !v.is_empty() {
                    (*k, self.transport.encrypt(v).into_inner())
                } else {
                    (*k, v.to_string())
                }
            })
            .collect();
        let response = self
            .http
            .get(&endpoint)
            .query(&query)
            .send()
            .await
            .map_err(|e| transport_error(&endpoint, e))?;
        decode(&endpoint, response).await
    }
}

fn transport_error(endpoint: &str, e: reqwest::Error) -> CoreError {
    if e.is_timeout() {
        NetworkError::Timeout {
            timeout_ms: BackendClient::DEFAULT_TIMEOUT_SECS * 1000,
            endpoint: endpoint.to_string(),
        }
        .into()
    } else {
        NetworkError::ConnectionRefused {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        }
        .into()
    }
}

async fn decode<T: DeserializeOwned>(endpoint: &str, response: reqwest::Response) -> CoreResult<Option<T>> {
    let status = response.status();
    if !status.is_success() {
        return Err(NetworkError::HttpError {
            status_code: status.as_u16(),
            endpoint: endpoint.to_string(),
        }
        .into());
    }
    let envelope: ApiResponse<T> =
        response
            .json()
            .await
            .map_err(|e| NetworkError::InvalidResponse {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;
    envelope.into_result()
}

fn exchange_body(account: &ExchangeCredentials, session: &SessionContext) -> Value {
    json!({
        "name": account.name,
        "platform": account.platform,
        "apikey": account.apikey,
        "secret": account.secret,
        "password": account.password,
        "ip": account.ip,
        "pwd": session.passphrase(),
    })
}

#[async_trait]
impl WalletStore for BackendClient {
    async fn fetch_wallets_by_filter(
        &self,
        filter: &WalletFilter,
        session: &SessionContext,
    ) -> CoreResult<Vec<WalletRecord>> {
        let body = json!({
            "address": filter.address,
            "project": filter.project,
            "pwd": session.passphrase(),
        });
        let items: Vec<WalletItem> = self.post("/wallet/list", body).await?.unwrap_or_default();
        Ok(items.into_iter().map(WalletRecord::from).collect())
    }

    async fn projects(&self) -> CoreResult<Vec<String>> {
        Ok(self.get("/wallet/projects", &[]).await?.unwrap_or_default())
    }

    /// Keys travel transport-encrypted; the back-end reseals them under the
    /// operator passphrase and skips addresses it already holds.
    async fn insert_wallets(
        &self,
        wallets: &[NewWallet],
        project: &str,
        remark: Option<&str>,
        session: &SessionContext,
    ) -> CoreResult<usize> {
        let lines: Vec<String> = wallets
            .iter()
            .map(|w| {
                format!(
                    "{},{},{}",
                    w.address,
                    self.transport.encrypt(&w.private_key),
                    self.transport.encrypt(&w.phrase)
                )
            })
            .collect();
        let body = json!({
            "walletList": lines,
            "project": project,
            "remark": remark.unwrap_or_default(),
            "pwd": session.passphrase(),
        });
        let _: Option<Value> = self.post("/wallet/insert", body).await?;
        // The endpoint acknowledges without a count.
        Ok(wallets.len())
    }
}

#[async_trait]
impl MappingStore for BackendClient {
    /// The backend compares addresses verbatim, so each source is asked for
    /// as given and lowercased; returned sources come back lowercased.
    async fn fetch_address_mappings(&self, sources: &[String]) -> CoreResult<Vec<AddressMapping>> {
        let mut query: Vec<String> = Vec::with_capacity(sources.len() * 2);
        for source in sources {
            let source = source.trim();
            for form in [source.to_string(), source.to_lowercase()] {
                if !form.is_empty() && !query.contains(&form) {
                    query.push(form);
                }
            }
        }
        let body = json!({ "sourceAddresses": query });
        let rows: Vec<AddressMapping> = self
            .post("/wallet/mapping/batch-query", body)
            .await?
            .unwrap_or_default();
        Ok(rows
            .into_iter()
            .map(|mut row| {
                row.source_address = row.source_address.to_lowercase();
                row
            })
            .collect())
    }

    async fn import_mappings(
        &self,
        mappings: &[AddressMapping],
        project: Option<&str>,
        remark: Option<&str>,
    ) -> CoreResult<usize> {
        let sources: Vec<String> = mappings
            .iter()
            .map(|m| m.source_address.trim().to_lowercase())
            .collect();
        let pairs: Vec<MappingPair<'_>> = mappings
            .iter()
            .zip(&sources)
            .map(|(m, source)| MappingPair {
                source_address: source,
                target_address: m.target_address.trim(),
            })
            .collect();
        let body = json!({
            "mappingList": pairs,
            "project": project.unwrap_or_default(),
            "remark": remark.unwrap_or_default(),
        });
        let count: Option<ImportCount> = self.post("/wallet/mapping/batch-import", body).await?;
        Ok(count.map(|c| c.success_count).unwrap_or_default())
    }
}

#[async_trait]
impl ExchangeGateway for BackendClient {
    async fn withdraw(
        &self,
        request: &WithdrawRequest,
        session: &SessionContext,
    ) -> CoreResult<WithdrawReceipt> {
        let body = json!({
            "exchange": request.exchange,
            "pwd": session.passphrase(),
            "toAddress": request.to_address,
            "network": request.network,
            "coin": request.coin,
            "amount": request.amount.to_string(),
        });
        Ok(self.post("/exchange/withdraw", body).await?.unwrap_or_default())
    }

    async fn exchanges(&self) -> CoreResult<Vec<ExchangeAccount>> {
        Ok(self.get("/exchange/names", &[]).await?.unwrap_or_default())
    }

    async fn withdraw_fee(
        &self,
        exchange: &str,
        coin: &str,
        network: &str,
        session: &SessionContext,
    ) -> CoreResult<WithdrawFee> {
        let body = json!({
            "exchange": exchange,
            "pwd": session.passphrase(),
            "coin": coin,
            "network": network,
        });
        Ok(self.post("/exchange/withdraw/fee", body).await?.unwrap_or_default())
    }

    async fn balances(
        &self,
        exchange: &str,
        coin: Option<&str>,
        session: &SessionContext,
    ) -> CoreResult<Vec<ExchangeBalance>> {
        let body = json!({
            "exchange": exchange,
            "pwd": session.passphrase(),
            "coin": coin,
        });
        // A single coin comes back as one object, the full listing as an array.
        let data: Option<Value> = self.post("/exchange/balance", body).await?;
        let balances = match data {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => Vec::new(),
            Some(one) => vec![one],
        };
        balances
            .into_iter()
            .map(|item| {
                serde_json::from_value(item).map_err(|e| {
                    CoreError::from(NetworkError::InvalidResponse {
                        endpoint: self.url("/exchange/balance"),
                        reason: e.to_string(),
                    })
                })
            })
            .collect()
    }
}
