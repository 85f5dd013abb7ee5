//! SQLite-based storage

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use openid_core::{Association, AssociationType};
use rusqlite::{params, Connection, OptionalExtension};

use super::{OpenIdStore, SkewWindow, StoreResult};
use crate::error::StoreError;

/// Current schema version
const SCHEMA_VERSION: i32 = 1;

/// Columns of `oid_associations`, in the order `row_to_association` reads them
const ASSOCIATION_COLUMNS: &str = "handle, secret, issued, lifetime, assoc_type";

fn db_err(e: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

/// A row of `oid_associations`, before validation
struct AssociationRow {
    handle: String,
    secret: Vec<u8>,
    issued: i64,
    lifetime: i64,
    assoc_type: String,
}

impl AssociationRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            handle: row.get(0)?,
            secret: row.get(1)?,
            issued: row.get(2)?,
            lifetime: row.get(3)?,
            assoc_type: row.get(4)?,
        })
    }

    fn into_association(self) -> StoreResult<Association> {
        let assoc_type: AssociationType = self.assoc_type.parse()?;
        let issued = DateTime::from_timestamp(self.issued, 0).ok_or_else(|| {
            openid_core::Error::MalformedAssociation(format!("issued out of range: {}", self.issued))
        })?;
        let lifetime = Duration::try_seconds(self.lifetime).ok_or_else(|| {
            openid_core::Error::MalformedAssociation(format!("lifetime out of range: {}", self.lifetime))
        })?;
        Ok(Association::new(
            self.handle,
            self.secret,
            issued,
            lifetime,
            assoc_type,
        ))
    }
}

/// SQLite-backed store
pub struct SqliteStore {
    conn: Mutex<Connection>,
    skew: SkewWindow,
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::with_connection(conn)
    }

    /// A private database that lives as long as the store
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        let store = Self {
            conn: Mutex::new(conn),
            skew: SkewWindow::default(),
        };
        store.create_tables()?;
        Ok(store)
    }

    /// Create the association and nonce tables if they are missing
    pub fn create_tables(&self) -> StoreResult<()> {
        Self::migrate(&*self.conn()?)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        Ok(self.conn.lock()?)
    }

    /// Run database migrations
    fn migrate(conn: &Connection) -> StoreResult<()> {
        let current_version = Self::get_schema_version(conn)?;

        if current_version < SCHEMA_VERSION {
            tracing::info!(
                current = current_version,
                target = SCHEMA_VERSION,
                "Running database migrations"
            );

            if current_version < 1 {
                Self::migrate_v1(conn)?;
            }

            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                params![SCHEMA_VERSION],
            )
            .map_err(db_err)?;

            tracing::info!("Database migrations complete");
        }

        Ok(())
    }

    /// Get current schema version (0 if no schema exists)
    fn get_schema_version(conn: &Connection) -> StoreResult<i32> {
        let table_exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
                [],
                |row| row.get(0),
            )
            .map_err(db_err)?;

        if !table_exists {
            return Ok(0);
        }

        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get::<_, Option<i32>>(0).map(|v| v.unwrap_or(0))
        })
        .map_err(db_err)
    }

    /// Migration to version 1: initial schema
    fn migrate_v1(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS oid_associations (
                server_url TEXT NOT NULL,
                handle TEXT NOT NULL,
                secret BLOB NOT NULL,
                issued INTEGER NOT NULL,
                lifetime INTEGER NOT NULL,
                assoc_type TEXT NOT NULL,
                PRIMARY KEY (server_url, handle)
            );

            CREATE TABLE IF NOT EXISTS oid_nonces (
                server_url TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                salt TEXT NOT NULL,
                PRIMARY KEY (server_url, timestamp, salt)
            );
            CREATE INDEX IF NOT EXISTS idx_nonces_timestamp ON oid_nonces(timestamp);
            "#,
        )
        .map_err(db_err)
    }
}

impl OpenIdStore for SqliteStore {
    fn store_association(&self, server_url: &str, association: &Association) -> StoreResult<()> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO oid_associations
                 (server_url, handle, secret, issued, lifetime, assoc_type)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    server_url,
                    association.handle(),
                    association.secret(),
                    association.issued().timestamp(),
                    association.lifetime().num_seconds(),
                    association.assoc_type().as_str(),
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn get_association(
        &self,
        server_url: &str,
        handle: Option<&str>,
    ) -> StoreResult<Option<Association>> {
        let now = Utc::now().timestamp();
        let conn = self.conn()?;

        let row = match handle {
            Some(handle) => conn
                .query_row(
                    &format!(
                        "SELECT {} FROM oid_associations
                         WHERE server_url = ?1 AND handle = ?2 AND issued + lifetime > ?3",
                        ASSOCIATION_COLUMNS
                    ),
                    params![server_url, handle, now],
                    AssociationRow::from_row,
                )
                .optional(),
            None => conn
                .query_row(
                    &format!(
                        "SELECT {} FROM oid_associations
                         WHERE server_url = ?1 AND issued + lifetime > ?2
                         ORDER BY issued DESC, handle DESC LIMIT 1",
                        ASSOCIATION_COLUMNS
                    ),
                    params![server_url, now],
                    AssociationRow::from_row,
                )
                .optional(),
        }
        .map_err(db_err)?;

        row.map(AssociationRow::into_association).transpose()
    }

    fn remove_association(&self, server_url: &str, handle: &str) -> StoreResult<bool> {
        let removed = self
            .conn()?
            .execute(
                "DELETE FROM oid_associations WHERE server_url = ?1 AND handle = ?2",
                params![server_url, handle],
            )
            .map_err(db_err)?;
        Ok(removed > 0)
    }

    fn cleanup_associations(&self) -> StoreResult<u64> {
        let removed = self
            .conn()?
            .execute(
                "DELETE FROM oid_associations WHERE issued + lifetime <= ?1",
                params![Utc::now().timestamp()],
            )
            .map_err(db_err)?;

        tracing::debug!(removed, "Cleaned up expired associations");
        Ok(removed as u64)
    }

    fn use_nonce(&self, server_url: &str, timestamp: i64, salt: &str) -> StoreResult<bool> {
        if !self.skew.accepts(timestamp, Utc::now().timestamp()) {
            return Ok(false);
        }
        let inserted = self
            .conn()?
            .execute(
                "INSERT OR IGNORE INTO oid_nonces (server_url, timestamp, salt) VALUES (?1, ?2, ?3)",
                params![server_url, timestamp, salt],
            )
            .map_err(db_err)?;
        Ok(inserted == 1)
    }

    fn cleanup_nonces(&self) -> StoreResult<u64> {
        let cutoff = self.skew.cutoff(Utc::now().timestamp());
        let removed = self
            .conn()?
            .execute(
                "DELETE FROM oid_nonces WHERE timestamp < ?1",
                params![cutoff],
            )
            .map_err(db_err)?;

        tracing::debug!(removed, "Cleaned up stale nonces");
        Ok(removed as u64)
    }

    fn nonce_skew(&self) -> Duration {
        self.skew.get()
    }

    fn set_nonce_skew(&self, skew: Duration) {
        self.skew.set(skew)
    }
}
