use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{ConfigError, CoreResult, DatabaseError};
use crate::security::CredentialCipher;
use crate::session::SessionContext;
use crate::traits::{AddressMapping, MappingStore, WalletFilter, WalletStore};
use crate::wallet_manager::{KeyScheme, NewWallet, WalletRecord};

/// SQLite bound-parameter budget per statement.
const QUERY_CHUNK: usize = 500;

#[derive(Debug, Clone, sqlx::FromRow)]
struct WalletRow {
    idx: i64,
    address: String,
    private_key: Option<String>,
    phrase: Option<String>,
    project: String,
    remark: Option<String>,
}

impl From<WalletRow> for WalletRecord {
    fn from(row: WalletRow) -> Self {
        WalletRecord {
            index: row.idx,
            address: row.address,
            private_key: row.private_key.map(Into::into),
            phrase: row.phrase.map(Into::into),
            project: row.project,
            remark: row.remark,
            scheme: KeyScheme::Sealed,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct MappingRow {
    source_address: String,
    target_address: String,
    project: Option<String>,
    remark: Option<String>,
}

/// Local wallet and mapping store. Keys are sealed under the operator
/// passphrase before they reach disk.
#[derive(Debug, Clone)]
pub struct DatabaseManager {
    pool: SqlitePool,
    cipher: CredentialCipher,
}

impl DatabaseManager {
    pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
    pub const DEFAULT_TIMEOUT_MS: u64 = 30000;

    pub async fn new(db_path: &str) -> Result<Self> {
        if !Path::new(db_path).exists() {
            std::fs::File::create(db_path).map_err(|e| ConfigError::IoError {
                path: db_path.to_string(),
                msg: e.to_string(),
            })?;
            info!("Created new database file: {}", db_path);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(Self::DEFAULT_MAX_CONNECTIONS)
            .acquire_timeout(Duration::from_millis(Self::DEFAULT_TIMEOUT_MS))
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("PRAGMA journal_mode=WAL;")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("PRAGMA synchronous=NORMAL;")
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(&format!("sqlite://{}", db_path))
            .await
            .map_err(|e| DatabaseError::TransactionFailed { msg: e.to_string() })?;

        let manager = Self {
            pool,
            cipher: CredentialCipher::default(),
        };
        manager.init_schema().await?;
        info!("Wallet store opened at {} (WAL Mode)", db_path);
        Ok(manager)
    }

    /// Cipher used to seal keys on insert. Defaults to the legacy fixed-IV mode.
    pub fn with_cipher(mut self, cipher: CredentialCipher) -> Self {
        self.cipher = cipher;
        self
    }

    async fn init_schema(&self) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|_| DatabaseError::PoolExhausted {
                max_size: Self::DEFAULT_MAX_CONNECTIONS,
            })?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS wallet (
                id INTEGER PRIMARY KEY,
                idx INTEGER NOT NULL,
                address TEXT NOT NULL COLLATE NOCASE,
                public_key TEXT,
                private_key TEXT,
                phrase TEXT,
                project TEXT NOT NULL,
                remark TEXT,
                UNIQUE (project, address)
            );
            CREATE TABLE IF NOT EXISTS wallet_mapping (
                id INTEGER PRIMARY KEY,
                source_address TEXT NOT NULL UNIQUE COLLATE NOCASE,
                target_address TEXT NOT NULL,
                project TEXT,
                remark TEXT,
                created_at INTEGER,
                updated_at INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_wallet_project ON wallet(project, idx);
            CREATE INDEX IF NOT EXISTS idx_wallet_address ON wallet(address);",
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| DatabaseError::TransactionFailed { msg: e.to_string() })?;

        debug!("Database schema initialized");
        Ok(())
    }

    pub async fn last_index(&self, project: &str) -> CoreResult<i64> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(idx) FROM wallet WHERE project = ?")
            .bind(project)
            .fetch_one(&self.pool)
            .await?;
        Ok(max.unwrap_or(0))
    }

    async fn existing_addresses(&self, project: &str, addresses: &[&str]) -> CoreResult<HashSet<String>> {
        let mut found = HashSet::new();
        for chunk in addresses.chunks(QUERY_CHUNK) {
            let mut query = QueryBuilder::<Sqlite>::new("SELECT address FROM wallet WHERE project = ");
            query.push_bind(project).push(" AND address IN (");
            let mut separated = query.separated(", ");
            for address in chunk {
                separated.push_bind(*address);
            }
            separated.push_unseparated(")");

            let rows: Vec<String> = query.build_query_scalar::<String>().fetch_all(&self.pool).await?;
            found.extend(rows.into_iter().map(|a| a.to_lowercase()));
        }
        Ok(found)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl WalletStore for DatabaseManager {
    async fn fetch_wallets_by_filter(
        &self,
        filter: &WalletFilter,
        _session: &SessionContext,
    ) -> CoreResult<Vec<WalletRecord>> {
        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT idx, address, private_key, phrase, project, remark FROM wallet WHERE 1 = 1",
        );
        if let Some(project) = filter.project.as_deref().filter(|p| !p.is_empty()) {
            query.push(" AND project = ").push_bind(project);
        }
        if let Some(address) = filter.address.as_deref().filter(|a| !a.is_empty()) {
            query.push(" AND address = ").push_bind(address);
        }
        query.push(" ORDER BY project, idx");

        let rows = query.build_query_as::<WalletRow>().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(WalletRecord::from).collect())
    }

    async fn projects(&self) -> CoreResult<Vec<String>> {
        let projects: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT project FROM wallet ORDER BY project")
                .fetch_all(&self.pool)
                .await?;
        Ok(projects)
    }

    async fn insert_wallets(
        &self,
        wallets: &[NewWallet],
        project: &str,
        remark: Option<&str>,
        session: &SessionContext,
    ) -> CoreResult<usize> {
        let addresses: Vec<&str> = wallets.iter().map(|w| w.address.as_str()).collect();
        let mut existing = self.existing_addresses(project, &addresses).await?;
        let mut next_index = self.last_index(project).await?;
        let passphrase = session.passphrase();

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for wallet in wallets {
            if !existing.insert(wallet.address.to_lowercase()) {
                debug!("Skipping existing wallet {}", wallet.address);
                continue;
            }
            next_index += 1;

            let private_key = self.cipher.seal(&wallet.private_key, passphrase);
            let phrase = (!wallet.phrase.is_empty()).then(|| self.cipher.seal(&wallet.phrase, passphrase));

            sqlx::query(
                "INSERT INTO wallet (idx, address, private_key, phrase, project, remark) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(next_index)
            .bind(&wallet.address)
            .bind(private_key.as_str())
            .bind(phrase.as_ref().map(|p| p.as_str()))
            .bind(project)
            .bind(remark)
            .execute(&mut *tx)
            .await?;
            inserted += 1;
        }
        tx.commit().await?;

        Ok(inserted)
    }
}

#[async_trait]
impl MappingStore for DatabaseManager {
    async fn fetch_address_mappings(&self, sources: &[String]) -> CoreResult<Vec<AddressMapping>> {
        let mut mappings = Vec::new();
        for chunk in sources.chunks(QUERY_CHUNK) {
            let mut query = QueryBuilder::<Sqlite>::new(
                "SELECT source_address, target_address, project, remark FROM wallet_mapping WHERE source_address IN (",
            );
            let mut separated = query.separated(", ");
            for source in chunk {
                separated.push_bind(source.trim());
            }
            separated.push_unseparated(")");

            let rows = query.build_query_as::<MappingRow>().fetch_all(&self.pool).await?;
            mappings.extend(rows.into_iter().map(|row| AddressMapping {
                source_address: row.source_address,
                target_address: row.target_address,
                project: row.project,
                remark: row.remark,
            }));
        }
        Ok(mappings)
    }

    async fn import_mappings(
        &self,
        mappings: &[AddressMapping],
        project: Option<&str>,
        remark: Option<&str>,
    ) -> CoreResult<usize> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        let mut written = 0;

        for mapping in mappings {
            let source = mapping.source_address.trim();
            let target = mapping.target_address.trim();
            if source.is_empty() || target.is_empty() {
                continue;
            }
            sqlx::query(
                "INSERT INTO wallet_mapping (source_address, target_address, project, remark, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(source_address) DO UPDATE SET
                    target_address = excluded.target_address,
                    project = excluded.project,
                    remark = excluded.remark,
                    updated_at = excluded.updated_at",
            )
            .bind(source)
            .bind(target)
            .bind(mapping.project.as_deref().or(project))
            .bind(mapping.remark.as_deref().or(remark))
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| DatabaseError::ConstraintViolation {
                constraint: e.to_string(),
            })?;
            written += 1;
        }
        tx.commit().await?;

        info!("Imported {} address mappings", written);
        Ok(written)
    }
}
