//! # Credential Cipher
//!
//! AES-256-CBC with PKCS#7 padding; the key is the SHA-256 digest of the
//! passphrase. Blobs are base64 text so they can travel in JSON bodies and
//! live in TEXT columns.
//!
//! The legacy store and its clients agree on a fixed IV of sixteen ASCII `'0'`
//! bytes, which makes encryption deterministic: equal plaintexts under equal
//! passphrases give equal blobs. [`IvMode::Random`] prefixes a fresh IV to the
//! ciphertext instead, at the cost of being unreadable by legacy peers.

use aes::Aes256;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, Iv, Key, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroizing;

use crate::error::DecryptionError;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const BLOCK_SIZE: usize = 16;

/// IV shared with the legacy back-end: `b'0000000000000000'`.
pub const LEGACY_IV: [u8; BLOCK_SIZE] = [b'0'; BLOCK_SIZE];

/// Suffix appended to the passphrase for the outer layer of an at-rest seal.
pub const SEAL_SUFFIX: &str = "@tea";

/// How the initialization vector is chosen for each encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IvMode {
    /// Legacy-compatible constant IV. Deterministic output.
    #[default]
    Fixed,
    /// Fresh random IV per call, stored in front of the ciphertext.
    Random,
}

/// Base64 ciphertext of a private key, seed phrase, API secret or password.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialBlob(String);

impl CredentialBlob {
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for CredentialBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CredentialBlob({} chars)", self.0.len())
    }
}

impl fmt::Display for CredentialBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CredentialBlob {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CredentialBlob {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Symmetric encrypt/decrypt primitive used by every other component.
#[derive(Debug, Clone, Copy, Default)]
pub struct CredentialCipher {
    iv_mode: IvMode,
}

impl CredentialCipher {
    pub fn new(iv_mode: IvMode) -> Self {
        Self { iv_mode }
    }

    /// Cipher that interoperates with the existing encrypted store.
    pub fn legacy() -> Self {
        Self::new(IvMode::Fixed)
    }

    pub fn iv_mode(&self) -> IvMode {
        self.iv_mode
    }

    pub fn encrypt(&self, plaintext: &str, passphrase: &str) -> CredentialBlob {
        let key = derive_key(passphrase);
        let blob = match self.iv_mode {
            IvMode::Fixed => encrypt_block_chain(&key, &LEGACY_IV, plaintext.as_bytes()),
            IvMode::Random => {
                let mut iv = [0u8; BLOCK_SIZE];
                OsRng.fill_bytes(&mut iv);
                let mut out = iv.to_vec();
                out.extend(encrypt_block_chain(&key, &iv, plaintext.as_bytes()));
                out
            }
        };
        CredentialBlob(STANDARD.encode(blob))
    }

    pub fn decrypt(
        &self,
        blob: &CredentialBlob,
        passphrase: &str,
    ) -> Result<String, DecryptionError> {
        let raw = STANDARD
            .decode(blob.as_str().trim())
            .map_err(|_| DecryptionError::InvalidEncoding)?;

        let (iv, ciphertext) = match self.iv_mode {
            IvMode::Fixed => (LEGACY_IV, raw.as_slice()),
            IvMode::Random => {
                if raw.len() < BLOCK_SIZE * 2 {
                    return Err(DecryptionError::InvalidLength { len: raw.len() });
                }
                let mut iv = [0u8; BLOCK_SIZE];
                iv.copy_from_slice(&raw[..BLOCK_SIZE]);
                (iv, &raw[BLOCK_SIZE..])
            }
        };

        if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(DecryptionError::InvalidLength {
                len: ciphertext.len(),
            });
        }

        let key = derive_key(passphrase);
        let plain = Aes256CbcDec::new(
            Key::<Aes256CbcDec>::from_slice(key.as_slice()),
            Iv::<Aes256CbcDec>::from_slice(&iv),
        )
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| DecryptionError::BadPadding)?;

        String::from_utf8(plain).map_err(|_| DecryptionError::InvalidUtf8)
    }

    /// Two-layer at-rest format used by the wallet store:
    /// `encrypt(encrypt(content, pass), pass + "@tea")`.
    pub fn seal(&self, content: &str, passphrase: &str) -> CredentialBlob {
        let inner = self.encrypt(content, passphrase);
        self.encrypt(inner.as_str(), &outer_passphrase(passphrase))
    }

    pub fn open(
        &self,
        sealed: &CredentialBlob,
        passphrase: &str,
    ) -> Result<String, DecryptionError> {
        let inner = Zeroizing::new(self.decrypt(sealed, &outer_passphrase(passphrase))?);
        self.decrypt(&CredentialBlob::new(inner.as_str()), passphrase)
    }
}

/// Channel-level obfuscation with the process-wide default passphrase.
///
/// Applied to password/secret fields of backend requests and to private keys
/// the backend hands back to the console. Always uses the fixed IV: the
/// backend cannot read anything else, whatever the at-rest mode.
#[derive(Clone)]
pub struct TransportCipher {
    cipher: CredentialCipher,
    passphrase: Zeroizing<String>,
}

impl TransportCipher {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            cipher: CredentialCipher::new(IvMode::Fixed),
            passphrase: Zeroizing::new(passphrase.into()),
        }
    }

    /// Empty values pass through untouched, matching the backend.
    pub fn encrypt(&self, value: &str) -> CredentialBlob {
        if value.is_empty() {
            return CredentialBlob::new("");
        }
        self.cipher.encrypt(value, &self.passphrase)
    }

    pub fn decrypt(&self, blob: &CredentialBlob) -> Result<String, DecryptionError> {
        if blob.is_empty() {
            return Ok(String::new());
        }
        self.cipher.decrypt(blob, &self.passphrase)
    }
}

impl fmt::Debug for TransportCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportCipher")
            .field("iv_mode", &self.cipher.iv_mode())
            .field("passphrase", &"***REDACTED***")
            .finish()
    }
}

fn derive_key(passphrase: &str) -> Zeroizing<[u8; 32]> {
    let digest = Sha256::digest(passphrase.as_bytes());
    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&digest);
    key
}

fn outer_passphrase(passphrase: &str) -> Zeroizing<String> {
    Zeroizing::new(format!("{}{}", passphrase, SEAL_SUFFIX))
}

fn encrypt_block_chain(key: &[u8; 32], iv: &[u8; BLOCK_SIZE], plaintext: &[u8]) -> Vec<u8> {
    // Key and IV lengths are fixed by the array types.
    Aes256CbcEnc::new(
        Key::<Aes256CbcEnc>::from_slice(key),
        Iv::<Aes256CbcEnc>::from_slice(iv),
    )
    .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_legacy_vector() {
        let cipher = CredentialCipher::legacy();
        let blob = cipher.encrypt("hello world", "secret-pass");
        assert_eq!(blob.as_str(), "pMqHt2Jwr3YKhlZc8tjpCA==");
    }

    #[test]
    fn test_seal_matches_legacy_store() {
        let cipher = CredentialCipher::legacy();
        let sealed = cipher.seal("hello world", "secret-pass");
        assert_eq!(
            sealed.as_str(),
            "rgu1djthHoAZ+xxLg0CU0hFF14yemtT23JmJLm70kYg="
        );
        assert_eq!(cipher.open(&sealed, "secret-pass").unwrap(), "hello world");
    }

    #[test]
    fn test_wrong_passphrase_fails_padding() {
        let cipher = CredentialCipher::legacy();
        let blob = CredentialBlob::new("pMqHt2Jwr3YKhlZc8tjpCA==");
        assert_eq!(
            cipher.decrypt(&blob, "wrong-pass"),
            Err(DecryptionError::BadPadding)
        );
    }

    #[test]
    fn test_random_iv_is_not_deterministic() {
        let cipher = CredentialCipher::new(IvMode::Random);
        let a = cipher.encrypt("same", "pass");
        let b = cipher.encrypt("same", "pass");
        assert_ne!(a, b);
        assert_eq!(cipher.decrypt(&a, "pass").unwrap(), "same");
        assert_eq!(cipher.decrypt(&b, "pass").unwrap(), "same");
    }

    #[test]
    fn test_rejects_malformed_blobs() {
        let cipher = CredentialCipher::legacy();
        assert_eq!(
            cipher.decrypt(&CredentialBlob::new("not base64!!"), "p"),
            Err(DecryptionError::InvalidEncoding)
        );
        assert_eq!(
            cipher.decrypt(&CredentialBlob::new("AAAA"), "p"),
            Err(DecryptionError::InvalidLength { len: 3 })
        );
    }

    #[test]
    fn test_transport_passes_empty_through() {
        let transport = TransportCipher::new("default_secure_key");
        assert!(transport.encrypt("").is_empty());
        assert_eq!(transport.decrypt(&CredentialBlob::new("")).unwrap(), "");
        let blob = transport.encrypt("operator-pass");
        assert_eq!(transport.decrypt(&blob).unwrap(), "operator-pass");
    }
}
