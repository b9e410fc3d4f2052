//! Batch creation of EVM wallets and validation of imported key lines.
//!
//! Generated wallets use a fresh 12-word English mnemonic each, derived at
//! `m/44'/60'/0'/0/0`. Keys leave this module in plaintext inside
//! [`NewWallet`], which zeroizes on drop; the store seals them.

use console_core::error::WalletError;
use console_core::wallet_manager::NewWallet;
use ethers::signers::coins_bip39::{English, Mnemonic};
use ethers::signers::{LocalWallet, MnemonicBuilder, Signer};
use ethers::utils::to_checksum;
use rand::{CryptoRng, Rng};

pub const DERIVATION_PATH: &str = "m/44'/60'/0'/0/0";
const WORD_COUNT: usize = 12;

fn key_hex(wallet: &LocalWallet) -> String {
    format!("0x{}", hex::encode(wallet.signer().to_bytes()))
}

fn from_phrase(phrase: &str) -> Result<LocalWallet, WalletError> {
    let builder = MnemonicBuilder::<English>::default()
        .phrase(phrase)
        .derivation_path(DERIVATION_PATH)
        .map_err(|_| WalletError::InvalidKeyFormat)?;
    builder.build().map_err(|_| WalletError::InvalidKeyFormat)
}

/// Creates `count` independent wallets.
pub fn generate_wallets<R: Rng + CryptoRng>(
    count: usize,
    rng: &mut R,
) -> Result<Vec<NewWallet>, WalletError> {
    let mut wallets = Vec::with_capacity(count);
    for _ in 0..count {
        let mnemonic = Mnemonic::<English>::new_with_count(&mut *rng, WORD_COUNT)
            .map_err(|_| WalletError::InvalidKeyFormat)?;
        let phrase = mnemonic.to_phrase();
        let wallet = from_phrase(&phrase)?;
        wallets.push(NewWallet {
            address: to_checksum(&wallet.address(), None),
            private_key: key_hex(&wallet),
            phrase,
        });
    }
    Ok(wallets)
}

/// Parses `address,private_key[,phrase]`. The key may be left empty when a
/// phrase is given. Whatever is supplied must derive the stated address.
pub fn parse_import_line(line_no: usize, line: &str) -> Result<NewWallet, WalletError> {
    let invalid = |reason: &str| WalletError::InvalidImportLine {
        line: line_no,
        reason: reason.to_string(),
    };

    let mut fields = line.splitn(3, ',').map(str::trim);
    let address = fields.next().filter(|a| !a.is_empty()).ok_or_else(|| invalid("missing address"))?;
    let key = fields.next().unwrap_or_default();
    let phrase = fields.next().unwrap_or_default();

    let wallet = if !key.is_empty() {
        key.parse::<LocalWallet>().map_err(|_| invalid("private key is not valid hex"))?
    } else if !phrase.is_empty() {
        from_phrase(phrase).map_err(|_| invalid("mnemonic phrase is not valid"))?
    } else {
        return Err(invalid("need a private key or a mnemonic phrase"));
    };

    let derived = to_checksum(&wallet.address(), None);
    if !derived.eq_ignore_ascii_case(address) {
        return Err(WalletError::AddressMismatch {
            expected: address.to_string(),
            actual: derived,
        });
    }

    Ok(NewWallet {
        address: derived,
        private_key: key_hex(&wallet),
        phrase: phrase.to_string(),
    })
}

/// Parses every non-blank line, skipping `#` comments. Stops at the first
/// bad line so a partially broken file is never half-imported.
pub fn parse_import_lines(text: &str) -> Result<Vec<NewWallet>, WalletError> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(idx, line)| parse_import_line(idx + 1, line))
        .collect()
}
