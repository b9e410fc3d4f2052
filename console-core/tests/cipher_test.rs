use console_core::error::DecryptionError;
use console_core::security::{CredentialBlob, CredentialCipher, IvMode, TransportCipher};

const KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

#[test]
fn test_round_trip_for_both_iv_modes() {
    for mode in [IvMode::Fixed, IvMode::Random] {
        let cipher = CredentialCipher::new(mode);
        let blob = cipher.encrypt(KEY, "operator-pass");
        assert_eq!(cipher.decrypt(&blob, "operator-pass").unwrap(), KEY);

        let sealed = cipher.seal(KEY, "operator-pass");
        assert_eq!(cipher.open(&sealed, "operator-pass").unwrap(), KEY);
    }
}

#[test]
fn test_fixed_iv_is_deterministic() {
    let cipher = CredentialCipher::legacy();
    assert_eq!(
        cipher.encrypt(KEY, "operator-pass"),
        cipher.encrypt(KEY, "operator-pass")
    );
}

#[test]
fn test_seal_is_not_single_layer() {
    let cipher = CredentialCipher::legacy();
    let sealed = cipher.seal(KEY, "operator-pass");
    assert_ne!(sealed, cipher.encrypt(KEY, "operator-pass"));
    assert!(cipher.decrypt(&sealed, "operator-pass").is_err());
}

#[test]
fn test_empty_plaintext_round_trips() {
    let cipher = CredentialCipher::legacy();
    let blob = cipher.encrypt("", "p");
    assert_eq!(cipher.decrypt(&blob, "p").unwrap(), "");
}

#[test]
fn test_known_blob_rejects_wrong_passphrase() {
    let cipher = CredentialCipher::legacy();
    let blob = CredentialBlob::new("pMqHt2Jwr3YKhlZc8tjpCA==");
    assert_eq!(cipher.decrypt(&blob, "secret-pass").unwrap(), "hello world");
    assert_eq!(
        cipher.decrypt(&blob, "wrong-pass"),
        Err(DecryptionError::BadPadding)
    );
}

#[test]
fn test_random_blob_is_unreadable_in_fixed_mode() {
    let random = CredentialCipher::new(IvMode::Random);
    let blob = random.encrypt(KEY, "p");
    assert_ne!(
        CredentialCipher::legacy().decrypt(&blob, "p").ok().as_deref(),
        Some(KEY)
    );
}

#[test]
fn test_transport_cipher_uses_its_own_key() {
    let transport = TransportCipher::new("default_secure_key");
    let blob = transport.encrypt("operator-pass");
    assert_eq!(
        CredentialCipher::legacy()
            .decrypt(&blob, "default_secure_key")
            .unwrap(),
        "operator-pass"
    );
    let debug = format!("{:?}", transport);
    assert!(!debug.contains("default_secure_key"));
}
