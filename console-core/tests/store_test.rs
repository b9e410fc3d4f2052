use console_core::database::DatabaseManager;
use console_core::mapping::AddressMappingResolver;
use console_core::security::{CredentialCipher, TransportCipher};
use console_core::session::SessionContext;
use console_core::traits::{AddressMapping, MappingStore, WalletFilter, WalletStore};
use console_core::wallet_manager::{KeyScheme, KeyUnlocker, NewWallet, WalletManager};
use std::sync::Arc;
use tempfile::TempDir;

const PASS: &str = "store-pass";

async fn open_store(dir: &TempDir) -> DatabaseManager {
    let path = dir.path().join("wallets.db");
    DatabaseManager::new(path.to_str().unwrap()).await.unwrap()
}

fn wallet(address: &str) -> NewWallet {
    NewWallet {
        address: address.to_string(),
        private_key: format!("0xkey{}", &address[2..]),
        phrase: "abandon abandon ability".to_string(),
    }
}

fn mapping(source: &str, target: &str) -> AddressMapping {
    AddressMapping {
        source_address: source.to_string(),
        target_address: target.to_string(),
        project: None,
        remark: None,
    }
}

fn unlocker() -> KeyUnlocker {
    KeyUnlocker::new(
        CredentialCipher::legacy(),
        TransportCipher::new("default_secure_key"),
    )
}

#[tokio::test]
async fn test_insert_seals_keys_and_assigns_indices() {
    let dir = TempDir::new().unwrap();
    let db = open_store(&dir).await;
    let session = SessionContext::new(PASS).unwrap();

    let inserted = db
        .insert_wallets(&[wallet("0xA1"), wallet("0xB2")], "airdrop", Some("batch 1"), &session)
        .await
        .unwrap();
    assert_eq!(inserted, 2);

    let records = db
        .fetch_wallets_by_filter(&WalletFilter::project("airdrop"), &session)
        .await
        .unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].index, 1);
    assert_eq!(records[1].index, 2);
    assert_eq!(records[0].scheme, KeyScheme::Sealed);
    assert_eq!(records[0].remark.as_deref(), Some("batch 1"));

    let blob = records[0].private_key.as_ref().unwrap();
    assert_ne!(blob.as_str(), "0xkeyA1");

    let key = unlocker()
        .unlock(&records[0].signing_key().unwrap(), &session)
        .unwrap();
    assert_eq!(key.as_str(), "0xkeyA1");

    db.close().await;
}

#[tokio::test]
async fn test_existing_addresses_are_skipped() {
    let dir = TempDir::new().unwrap();
    let db = open_store(&dir).await;
    let session = SessionContext::new(PASS).unwrap();

    db.insert_wallets(&[wallet("0xA1")], "airdrop", None, &session)
        .await
        .unwrap();
    let inserted = db
        .insert_wallets(&[wallet("0xa1"), wallet("0xC3")], "airdrop", None, &session)
        .await
        .unwrap();
    assert_eq!(inserted, 1);

    // Same address in another project is a separate wallet.
    let other = db
        .insert_wallets(&[wallet("0xA1")], "mainnet", None, &session)
        .await
        .unwrap();
    assert_eq!(other, 1);

    let records = db
        .fetch_wallets_by_filter(&WalletFilter::project("airdrop"), &session)
        .await
        .unwrap();
    let addresses: Vec<&str> = records.iter().map(|r| r.address.as_str()).collect();
    assert_eq!(addresses, vec!["0xA1", "0xC3"]);
    assert_eq!(records[1].index, 2);

    let mut projects = db.projects().await.unwrap();
    projects.sort();
    assert_eq!(projects, vec!["airdrop", "mainnet"]);
}

#[tokio::test]
async fn test_wallet_manager_verifies_passphrase() {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(open_store(&dir).await);
    let manager = WalletManager::new(db, unlocker());
    let session = SessionContext::new(PASS).unwrap();

    manager
        .import(&[wallet("0xA1")], "airdrop", None, &session)
        .await
        .unwrap();
    let records = manager
        .load(&WalletFilter::project("airdrop"), &session)
        .await
        .unwrap();

    assert!(manager.verify(&records[0], &session).is_ok());
    let wrong = SessionContext::new("not-the-pass").unwrap();
    assert!(manager.verify(&records[0], &wrong).is_err());

    assert!(manager
        .import(&[wallet("0xB2")], " ", None, &session)
        .await
        .is_err());
}

#[tokio::test]
async fn test_mapping_upsert_and_lookup() {
    let dir = TempDir::new().unwrap();
    let db = open_store(&dir).await;

    let written = db
        .import_mappings(
            &[mapping("0xAAA", "0xT1"), mapping("0xBBB", "0xT2"), mapping("0xCCC", " ")],
            Some("airdrop"),
            None,
        )
        .await
        .unwrap();
    assert_eq!(written, 2);

    let written = db
        .import_mappings(&[mapping("0xaaa", "0xT9")], None, Some("moved"))
        .await
        .unwrap();
    assert_eq!(written, 1);

    let rows = db
        .fetch_address_mappings(&["0xAAA".to_string()])
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].target_address, "0xT9");
    assert_eq!(rows[0].remark.as_deref(), Some("moved"));
}

#[tokio::test]
async fn test_resolver_builds_case_insensitive_map() {
    let dir = TempDir::new().unwrap();
    let db = open_store(&dir).await;
    db.import_mappings(&[mapping("0xAAA", "0xT1")], None, None)
        .await
        .unwrap();

    let sources = vec!["0xaaa".to_string(), "0xDDD".to_string()];
    let map = AddressMappingResolver::new(&db).resolve(&sources).await.unwrap();

    assert_eq!(map.len(), 1);
    assert_eq!(map.get("0xAAA"), Some("0xT1"));
    assert_eq!(map.get("0xDDD"), None);
}
