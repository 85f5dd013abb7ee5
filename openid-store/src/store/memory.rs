//! In-memory storage

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};

use chrono::{Duration, Utc};
use openid_core::Association;

use super::{newest_unexpired, OpenIdStore, SkewWindow, StoreResult};

type NonceKey = (String, i64, String);

/// Process-local store. Everything is lost when it is dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// server_url -> handle -> association
    associations: RwLock<HashMap<String, HashMap<String, Association>>>,
    nonces: Mutex<HashSet<NonceKey>>,
    skew: SkewWindow,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_skew(skew: Duration) -> Self {
        Self {
            skew: SkewWindow::new(skew),
            ..Self::default()
        }
    }
}

impl OpenIdStore for MemoryStore {
    fn store_association(&self, server_url: &str, association: &Association) -> StoreResult<()> {
        self.associations
            .write()?
            .entry(server_url.to_string())
            .or_default()
            .insert(association.handle().to_string(), association.clone());
        Ok(())
    }

    fn get_association(
        &self,
        server_url: &str,
        handle: Option<&str>,
    ) -> StoreResult<Option<Association>> {
        let now = Utc::now();
        let associations = self.associations.read()?;
        let Some(by_handle) = associations.get(server_url) else {
            return Ok(None);
        };

        Ok(match handle {
            Some(handle) => by_handle
                .get(handle)
                .filter(|a| !a.is_expired(now))
                .cloned(),
            None => newest_unexpired(by_handle.values().cloned(), now),
        })
    }

    fn remove_association(&self, server_url: &str, handle: &str) -> StoreResult<bool> {
        let mut associations = self.associations.write()?;
        let Some(by_handle) = associations.get_mut(server_url) else {
            return Ok(false);
        };
        let removed = by_handle.remove(handle).is_some();
        if by_handle.is_empty() {
            associations.remove(server_url);
        }
        Ok(removed)
    }

    fn cleanup_associations(&self) -> StoreResult<u64> {
        let now = Utc::now();
        let mut associations = self.associations.write()?;
        let mut removed = 0u64;
        for by_handle in associations.values_mut() {
            let before = by_handle.len();
            by_handle.retain(|_, a| !a.is_expired(now));
            removed += (before - by_handle.len()) as u64;
        }
        associations.retain(|_, by_handle| !by_handle.is_empty());

        tracing::debug!(removed, "Cleaned up expired associations");
        Ok(removed)
    }

    fn use_nonce(&self, server_url: &str, timestamp: i64, salt: &str) -> StoreResult<bool> {
        if !self.skew.accepts(timestamp, Utc::now().timestamp()) {
            return Ok(false);
        }
        let key = (server_url.to_string(), timestamp, salt.to_string());
        Ok(self.nonces.lock()?.insert(key))
    }

    fn cleanup_nonces(&self) -> StoreResult<u64> {
        let cutoff = self.skew.cutoff(Utc::now().timestamp());
        let mut nonces = self.nonces.lock()?;
        let before = nonces.len();
        nonces.retain(|(_, timestamp, _)| *timestamp >= cutoff);
        let removed = (before - nonces.len()) as u64;

        tracing::debug!(removed, "Cleaned up stale nonces");
        Ok(removed)
    }

    fn nonce_skew(&self) -> Duration {
        self.skew.get()
    }

    fn set_nonce_skew(&self, skew: Duration) {
        self.skew.set(skew)
    }
}
