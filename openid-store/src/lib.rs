//! OpenID Association and Nonce Store
//!
//! Where consumers and providers keep the associations they have
//! negotiated and the response nonces they have already seen. Three
//! backends share one contract: in-memory, SQLite and a plain directory.

pub mod config;
pub mod error;
pub mod store;

pub use config::{open_store, Backend, StoreConfig};
pub use error::StoreError;
pub use store::{FileStore, MemoryStore, OpenIdStore, SkewWindow, SqliteStore, StoreResult};
