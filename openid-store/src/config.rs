//! Store configuration

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Duration;
use openid_core::nonce::DEFAULT_SKEW_SECS;
use serde::Deserialize;

use crate::error::StoreError;
use crate::store::{FileStore, MemoryStore, OpenIdStore, SqliteStore, StoreResult};

/// Which backend holds associations and nonces
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Memory,
    Sqlite { path: PathBuf },
    File { directory: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: Backend,

    /// How far a nonce's timestamp may be from the local clock, in seconds
    pub nonce_skew_secs: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            nonce_skew_secs: DEFAULT_SKEW_SECS,
        }
    }
}

impl StoreConfig {
    /// Read `OPENID_STORE_BACKEND`, `OPENID_STORE_PATH` and
    /// `OPENID_NONCE_SKEW_SECS`, defaulting whatever is unset
    pub fn from_env() -> StoreResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> StoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = || {
            lookup("OPENID_STORE_PATH").map(PathBuf::from).ok_or_else(|| {
                StoreError::InvalidConfig("OPENID_STORE_PATH must be set for this backend".into())
            })
        };

        let backend = match lookup("OPENID_STORE_BACKEND").as_deref() {
            None | Some("memory") => Backend::Memory,
            Some("sqlite") => Backend::Sqlite { path: path()? },
            Some("file") => Backend::File { directory: path()? },
            Some(other) => {
                return Err(StoreError::InvalidConfig(format!(
                    "unknown backend {:?}",
                    other
                )))
            }
        };

        let nonce_skew_secs = match lookup("OPENID_NONCE_SKEW_SECS") {
            None => DEFAULT_SKEW_SECS,
            Some(raw) => raw
                .parse::<i64>()
                .ok()
                .filter(|secs| *secs >= 0)
                .ok_or_else(|| {
                    StoreError::InvalidConfig(format!("bad OPENID_NONCE_SKEW_SECS {:?}", raw))
                })?,
        };

        Ok(Self {
            backend,
            nonce_skew_secs,
        })
    }

    pub fn nonce_skew(&self) -> Duration {
        Duration::seconds(self.nonce_skew_secs)
    }
}

/// Build the configured store
pub fn open_store(config: &StoreConfig) -> StoreResult<Arc<dyn OpenIdStore>> {
    let store: Arc<dyn OpenIdStore> = match &config.backend {
        Backend::Memory => Arc::new(MemoryStore::new()),
        Backend::Sqlite { path } => Arc::new(SqliteStore::open(path)?),
        Backend::File { directory } => Arc::new(FileStore::open(directory)?),
    };
    store.set_nonce_skew(config.nonce_skew());

    tracing::info!(backend = ?config.backend, skew_secs = config.nonce_skew_secs, "Opened OpenID store");
    Ok(store)
}
