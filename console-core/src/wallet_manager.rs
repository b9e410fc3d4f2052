//! Wallet records as they come out of a store, and just-in-time unlocking of
//! their signing keys.
//!
//! Keys stay encrypted inside records and tasks. [`KeyUnlocker::unlock`] is
//! the only place a plaintext key is produced, and it hands it back wrapped
//! in [`Zeroizing`] so it is wiped as soon as the send is done.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{CoreResult, DecryptionError, ValidationError, WalletError};
use crate::security::{CredentialBlob, CredentialCipher, TransportCipher};
use crate::session::SessionContext;
use crate::traits::{WalletFilter, WalletStore};

/// Which layer protects a key blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyScheme {
    /// Two-layer at-rest seal under the operator passphrase.
    Sealed,
    /// Single layer under the process-wide transport key, as returned by the
    /// backend after it re-encrypts.
    Transport,
}

/// Encrypted signing key plus the knowledge of how to open it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningKeyRef {
    blob: CredentialBlob,
    scheme: KeyScheme,
}

impl SigningKeyRef {
    pub fn new(blob: CredentialBlob, scheme: KeyScheme) -> Self {
        Self { blob, scheme }
    }

    pub fn sealed(blob: CredentialBlob) -> Self {
        Self::new(blob, KeyScheme::Sealed)
    }

    pub fn transport(blob: CredentialBlob) -> Self {
        Self::new(blob, KeyScheme::Transport)
    }

    pub fn scheme(&self) -> KeyScheme {
        self.scheme
    }

    pub fn blob(&self) -> &CredentialBlob {
        &self.blob
    }
}

/// Stored wallet. Secret fields are ciphertext.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletRecord {
    pub index: i64,
    pub address: String,
    #[serde(skip)]
    pub private_key: Option<CredentialBlob>,
    #[serde(skip)]
    pub phrase: Option<CredentialBlob>,
    pub project: String,
    pub remark: Option<String>,
    pub scheme: KeyScheme,
}

impl WalletRecord {
    pub fn signing_key(&self) -> Option<SigningKeyRef> {
        self.private_key
            .as_ref()
            .filter(|blob| !blob.is_empty())
            .map(|blob| SigningKeyRef::new(blob.clone(), self.scheme))
    }
}

/// Plaintext wallet on its way into a store (freshly generated or parsed from
/// an import file).
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct NewWallet {
    pub address: String,
    pub private_key: String,
    pub phrase: String,
}

impl fmt::Debug for NewWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewWallet")
            .field("address", &self.address)
            .field("private_key", &"***REDACTED***")
            .field("phrase", &"***REDACTED***")
            .finish()
    }
}

/// Opens signing keys for exactly as long as a send needs them.
#[derive(Debug, Clone)]
pub struct KeyUnlocker {
    cipher: CredentialCipher,
    transport: TransportCipher,
}

impl KeyUnlocker {
    pub fn new(cipher: CredentialCipher, transport: TransportCipher) -> Self {
        Self { cipher, transport }
    }

    pub fn unlock(
        &self,
        key: &SigningKeyRef,
        session: &SessionContext,
    ) -> Result<Zeroizing<String>, DecryptionError> {
        let plain = match key.scheme {
            KeyScheme::Sealed => self.cipher.open(&key.blob, session.passphrase())?,
            KeyScheme::Transport => self.transport.decrypt(&key.blob)?,
        };
        let plain = Zeroizing::new(plain);
        if plain.trim().is_empty() {
            return Err(DecryptionError::InvalidLength { len: 0 });
        }
        Ok(plain)
    }
}

/// Loads and imports wallets through whichever store is configured.
pub struct WalletManager {
    store: Arc<dyn WalletStore>,
    unlocker: KeyUnlocker,
}

impl WalletManager {
    pub fn new(store: Arc<dyn WalletStore>, unlocker: KeyUnlocker) -> Self {
        Self { store, unlocker }
    }

    pub fn unlocker(&self) -> &KeyUnlocker {
        &self.unlocker
    }

    pub async fn load(
        &self,
        filter: &WalletFilter,
        session: &SessionContext,
    ) -> CoreResult<Vec<WalletRecord>> {
        let wallets = self.store.fetch_wallets_by_filter(filter, session).await?;
        info!(
            "[WalletManager] Loaded {} wallets (project: {})",
            wallets.len(),
            filter.project.as_deref().unwrap_or("*")
        );
        Ok(wallets)
    }

    pub async fn projects(&self) -> CoreResult<Vec<String>> {
        self.store.projects().await
    }

    /// Checks that a record's key opens under the session passphrase without
    /// keeping the plaintext.
    pub fn verify(&self, record: &WalletRecord, session: &SessionContext) -> CoreResult<()> {
        let key = record.signing_key().ok_or_else(|| WalletError::NotFound {
            address: record.address.clone(),
        })?;
        self.unlocker
            .unlock(&key, session)
            .map(|_| ())
            .map_err(|e| {
                WalletError::DecryptionFailed {
                    address: record.address.clone(),
                    reason: e.to_string(),
                }
                .into()
            })
    }

    /// Stores new wallets under `project`. Addresses already present in the
    /// project are skipped. Returns the number inserted.
    pub async fn import(
        &self,
        wallets: &[NewWallet],
        project: &str,
        remark: Option<&str>,
        session: &SessionContext,
    ) -> CoreResult<usize> {
        if project.trim().is_empty() {
            return Err(WalletError::InvalidImportLine {
                line: 0,
                reason: "project name is required".to_string(),
            }
            .into());
        }
        if wallets.is_empty() {
            return Err(ValidationError::EmptySources.into());
        }
        debug!("[WalletManager] Importing {} wallets into {}", wallets.len(), project);
        let inserted = self
            .store
            .insert_wallets(wallets, project, remark, session)
            .await?;
        info!(
            "[WalletManager] Imported {} new wallets into {} ({} skipped)",
            inserted,
            project,
            wallets.len() - inserted
        );
        Ok(inserted)
    }
}
