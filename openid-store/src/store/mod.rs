//! Association and nonce storage

pub mod file;
pub mod memory;
pub mod sqlite;
pub mod window;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use openid_core::nonce::split_nonce;
use openid_core::Association;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use window::SkewWindow;

use crate::error::StoreError;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Storage for associations and consumed nonces
///
/// Associations are keyed by `(server_url, handle)`. Nonces are keyed by
/// `(server_url, timestamp, salt)` and are accepted at most once, and only
/// while their timestamp is inside the store's skew window.
pub trait OpenIdStore: Send + Sync {
    /// Insert or replace an association
    fn store_association(&self, server_url: &str, association: &Association) -> StoreResult<()>;

    /// Look up an association by handle, or the newest unexpired one for the server
    fn get_association(
        &self,
        server_url: &str,
        handle: Option<&str>,
    ) -> StoreResult<Option<Association>>;

    /// Remove an association, reporting whether one was there
    fn remove_association(&self, server_url: &str, handle: &str) -> StoreResult<bool>;

    /// Delete expired associations, returning how many went
    fn cleanup_associations(&self) -> StoreResult<u64>;

    /// Record a nonce. True only the first time, and only inside the skew window.
    fn use_nonce(&self, server_url: &str, timestamp: i64, salt: &str) -> StoreResult<bool>;

    /// Forget nonces too old to be accepted, returning how many went
    fn cleanup_nonces(&self) -> StoreResult<u64>;

    fn nonce_skew(&self) -> Duration;

    fn set_nonce_skew(&self, skew: Duration);

    /// Parse a nonce token and record it. Malformed tokens are never accepted.
    fn use_nonce_token(&self, server_url: &str, token: &str) -> StoreResult<bool> {
        match split_nonce(token) {
            Ok((timestamp, salt)) => self.use_nonce(server_url, timestamp, salt),
            Err(e) => {
                tracing::debug!(server_url = %server_url, error = %e, "Rejecting malformed nonce");
                Ok(false)
            }
        }
    }
}

impl<S: OpenIdStore + ?Sized> OpenIdStore for Arc<S> {
    fn store_association(&self, server_url: &str, association: &Association) -> StoreResult<()> {
        (**self).store_association(server_url, association)
    }

    fn get_association(
        &self,
        server_url: &str,
        handle: Option<&str>,
    ) -> StoreResult<Option<Association>> {
        (**self).get_association(server_url, handle)
    }

    fn remove_association(&self, server_url: &str, handle: &str) -> StoreResult<bool> {
        (**self).remove_association(server_url, handle)
    }

    fn cleanup_associations(&self) -> StoreResult<u64> {
        (**self).cleanup_associations()
    }

    fn use_nonce(&self, server_url: &str, timestamp: i64, salt: &str) -> StoreResult<bool> {
        (**self).use_nonce(server_url, timestamp, salt)
    }

    fn cleanup_nonces(&self) -> StoreResult<u64> {
        (**self).cleanup_nonces()
    }

    fn nonce_skew(&self) -> Duration {
        (**self).nonce_skew()
    }

    fn set_nonce_skew(&self, skew: Duration) {
        (**self).set_nonce_skew(skew)
    }
}

/// The unexpired association issued last, ties going to the larger handle
pub(crate) fn newest_unexpired<I>(associations: I, now: DateTime<Utc>) -> Option<Association>
where
    I: IntoIterator<Item = Association>,
{
    associations
        .into_iter()
        .filter(|a| !a.is_expired(now))
        .max_by(|a, b| {
            a.issued()
                .cmp(&b.issued())
                .then_with(|| a.handle().cmp(b.handle()))
        })
}
