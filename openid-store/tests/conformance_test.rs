//! Store Conformance Tests
//!
//! One suite, run against every backend. These are the guarantees replay
//! protection rests on:
//! - Associations are keyed by (server_url, handle) and upserts never duplicate
//! - Without a handle, the newest unexpired association wins
//! - A nonce is accepted once, and only inside the skew window
//! - Cleanups remove exactly the expired/stale records and report the count

use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{Duration, Utc};
use openid_core::{Association, AssociationType, Nonce};
use openid_store::{FileStore, MemoryStore, OpenIdStore, SqliteStore};
use tempfile::TempDir;

const SERVER: &str = "http://www.myopenid.com/openid";
const OTHER_SERVER: &str = "http://openid.example.com/server";

/// An association issued `issued_ago` seconds ago that lives `lifetime` seconds
fn assoc(handle: &str, issued_ago: i64, lifetime: i64) -> Association {
    Association::new(
        handle,
        format!("secret-of-{}", handle).into_bytes(),
        Utc::now() - Duration::seconds(issued_ago),
        Duration::seconds(lifetime),
        AssociationType::HmacSha1,
    )
}

fn now() -> i64 {
    Utc::now().timestamp()
}

// =============================================================================
// Associations
// =============================================================================

fn check_missing(store: &dyn OpenIdStore) {
    assert_eq!(store.get_association(SERVER, None).unwrap(), None);
    assert_eq!(store.get_association(SERVER, Some("nope")).unwrap(), None);
    assert!(!store.remove_association(SERVER, "nope").unwrap());
}

fn check_store_and_get(store: &dyn OpenIdStore) {
    let a = assoc("{HMAC-SHA1}{4a2b}{x/y=z%\n}", 0, 600);
    store.store_association(SERVER, &a).unwrap();

    assert_eq!(store.get_association(SERVER, Some(a.handle())).unwrap(), Some(a.clone()));
    assert_eq!(store.get_association(SERVER, None).unwrap(), Some(a));
}

fn check_store_is_idempotent(store: &dyn OpenIdStore) {
    let a = assoc("handle", 0, 600);
    store.store_association(SERVER, &a).unwrap();
    store.store_association(SERVER, &a).unwrap();

    assert!(store.remove_association(SERVER, "handle").unwrap());
    assert_eq!(store.get_association(SERVER, Some("handle")).unwrap(), None);
    assert_eq!(store.get_association(SERVER, None).unwrap(), None);
    assert!(!store.remove_association(SERVER, "handle").unwrap());
}

fn check_store_replaces(store: &dyn OpenIdStore) {
    store.store_association(SERVER, &assoc("handle", 0, 600)).unwrap();
    let replacement = Association::new(
        "handle",
        b"a different secret".to_vec(),
        Utc::now(),
        Duration::seconds(1200),
        AssociationType::HmacSha256,
    );
    store.store_association(SERVER, &replacement).unwrap();

    assert_eq!(
        store.get_association(SERVER, Some("handle")).unwrap(),
        Some(replacement)
    );
}

fn check_newest_wins(store: &dyn OpenIdStore) {
    let older = assoc("older", 100, 600);
    let newer = assoc("newer", 10, 600);
    store.store_association(SERVER, &older).unwrap();
    store.store_association(SERVER, &newer).unwrap();

    assert_eq!(store.get_association(SERVER, None).unwrap(), Some(newer.clone()));
    assert_eq!(store.get_association(SERVER, Some("older")).unwrap(), Some(older.clone()));

    // Storing the older one again does not make it newest
    store.store_association(SERVER, &older).unwrap();
    assert_eq!(store.get_association(SERVER, None).unwrap(), Some(newer));

    assert!(store.remove_association(SERVER, "newer").unwrap());
    assert_eq!(store.get_association(SERVER, None).unwrap(), Some(older));
}

fn check_expired_hidden(store: &dyn OpenIdStore) {
    let live = assoc("live", 500, 600);
    let expired = assoc("expired", 10, 5);
    store.store_association(SERVER, &live).unwrap();
    store.store_association(SERVER, &expired).unwrap();

    assert_eq!(store.get_association(SERVER, None).unwrap(), Some(live));
    assert_eq!(store.get_association(SERVER, Some("expired")).unwrap(), None);
}

fn check_servers_separate(store: &dyn OpenIdStore) {
    let a = assoc("shared-handle", 0, 600);
    store.store_association(SERVER, &a).unwrap();

    assert_eq!(store.get_association(OTHER_SERVER, None).unwrap(), None);
    assert_eq!(store.get_association(OTHER_SERVER, Some("shared-handle")).unwrap(), None);
    assert!(!store.remove_association(OTHER_SERVER, "shared-handle").unwrap());
    assert_eq!(store.get_association(SERVER, None).unwrap(), Some(a));
}

fn check_cleanup_associations(store: &dyn OpenIdStore) {
    let live = assoc("live", 0, 600);
    store.store_association(SERVER, &live).unwrap();
    store.store_association(SERVER, &assoc("dead-1", 100, 10)).unwrap();
    store.store_association(OTHER_SERVER, &assoc("dead-2", 100, 50)).unwrap();

    assert_eq!(store.cleanup_associations().unwrap(), 2);
    assert_eq!(store.cleanup_associations().unwrap(), 0);
    assert_eq!(store.get_association(SERVER, None).unwrap(), Some(live));
    assert!(!store.remove_association(SERVER, "dead-1").unwrap());
}

fn check_far_future_expiry(store: &dyn OpenIdStore) {
    let lasting = assoc("lasting", 0, 100_000_000_000_000);
    store.store_association(SERVER, &lasting).unwrap();

    assert_eq!(store.cleanup_associations().unwrap(), 0);
    assert_eq!(store.get_association(SERVER, None).unwrap(), Some(lasting.clone()));
    assert_eq!(
        store.get_association(SERVER, Some("lasting")).unwrap(),
        Some(lasting)
    );
}

// =============================================================================
// Nonces
// =============================================================================

fn check_nonce_used_once(store: &dyn OpenIdStore) {
    let ts = now();
    assert!(store.use_nonce(SERVER, ts, "asdf").unwrap());
    assert!(!store.use_nonce(SERVER, ts, "asdf").unwrap());
    assert!(!store.use_nonce(SERVER, ts, "asdf").unwrap());

    assert!(store.use_nonce(SERVER, ts, "qwer").unwrap());
    assert!(store.use_nonce(SERVER, ts - 1, "asdf").unwrap());
    assert!(store.use_nonce(OTHER_SERVER, ts, "asdf").unwrap());
}

fn check_nonce_outside_window(store: &dyn OpenIdStore) {
    let skew = store.nonce_skew().num_seconds();
    assert!(!store.use_nonce(SERVER, now() - skew - 10, "old").unwrap());
    assert!(!store.use_nonce(SERVER, now() + skew + 10, "future").unwrap());
}

fn check_rejected_nonce_not_recorded(store: &dyn OpenIdStore) {
    let ts = now() - 100;
    store.set_nonce_skew(Duration::seconds(10));
    assert!(!store.use_nonce(SERVER, ts, "salt").unwrap());

    store.set_nonce_skew(Duration::seconds(3600));
    assert!(store.use_nonce(SERVER, ts, "salt").unwrap());
}

fn check_cleanup_nonces(store: &dyn OpenIdStore) {
    let ts = now();
    assert!(store.use_nonce(SERVER, ts - 1000, "a").unwrap());
    assert!(store.use_nonce(SERVER, ts - 900, "b").unwrap());
    assert!(store.use_nonce(SERVER, ts, "c").unwrap());

    store.set_nonce_skew(Duration::seconds(500));
    assert_eq!(store.cleanup_nonces().unwrap(), 2);
    assert_eq!(store.cleanup_nonces().unwrap(), 0);

    // The survivor is still remembered
    assert!(!store.use_nonce(SERVER, ts, "c").unwrap());
}

fn check_nonce_token(store: &dyn OpenIdStore) {
    let token = Nonce::generate().to_string();
    assert!(store.use_nonce_token(SERVER, &token).unwrap());
    assert!(!store.use_nonce_token(SERVER, &token).unwrap());

    assert!(!store.use_nonce_token(SERVER, "garbage").unwrap());
    let stale = Nonce::at(Utc::now() - Duration::days(2)).to_string();
    assert!(!store.use_nonce_token(SERVER, &stale).unwrap());
}

fn check_concurrent_nonce(store: &dyn OpenIdStore) {
    let ts = now();
    let accepted = AtomicUsize::new(0);
    std::thread::scope(|s| {
        for _ in 0..16 {
            s.spawn(|| {
                if store.use_nonce(SERVER, ts, "race").unwrap() {
                    accepted.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
    });
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Backends
// =============================================================================

fn memory_store() -> (MemoryStore, Option<TempDir>) {
    (MemoryStore::new(), None)
}

fn sqlite_store() -> (SqliteStore, Option<TempDir>) {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(dir.path().join("openid.db")).unwrap();
    (store, Some(dir)) // Return dir to keep it alive
}

fn file_store() -> (FileStore, Option<TempDir>) {
    let dir = TempDir::new().unwrap();
    let store = FileStore::open(dir.path()).unwrap();
    (store, Some(dir))
}

macro_rules! conformance_suite {
    ($backend:ident, $make:path, [$($check:ident),* $(,)?]) => {
        mod $backend {
            use super::*;

            $(
                #[test]
                fn $check() {
                    let (store, _dir) = $make();
                    super::$check(&store);
                }
            )*
        }
    };
}

macro_rules! all_backends {
    ($($check:ident),* $(,)?) => {
        conformance_suite!(memory, memory_store, [$($check),*]);
        conformance_suite!(sqlite, sqlite_store, [$($check),*]);
        conformance_suite!(file, file_store, [$($check),*]);
    };
}

all_backends!(
    check_missing,
    check_store_and_get,
    check_store_is_idempotent,
    check_store_replaces,
    check_newest_wins,
    check_expired_hidden,
    check_servers_separate,
    check_cleanup_associations,
    check_far_future_expiry,
    check_nonce_used_once,
    check_nonce_outside_window,
    check_rejected_nonce_not_recorded,
    check_cleanup_nonces,
    check_nonce_token,
    check_concurrent_nonce,
);

/// Test: a store shared through an Arc behaves like the store itself
#[test]
fn test_arc_store() {
    let store = std::sync::Arc::new(MemoryStore::new());
    let shared = store.clone();
    let a = assoc("handle", 0, 600);
    shared.store_association(SERVER, &a).unwrap();
    assert_eq!(store.get_association(SERVER, None).unwrap(), Some(a));
}
