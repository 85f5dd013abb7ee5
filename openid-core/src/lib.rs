//! OpenID Core Library
//!
//! The security-critical part of OpenID authentication:
//! - Consumers and providers agree on a shared secret (an association)
//! - Providers sign assertions with it, consumers verify them
//! - Single-use nonces let stores reject replayed responses

pub mod association;
pub mod dh;
pub mod error;
pub mod handshake;
pub mod message;
pub mod nonce;
pub mod session;

pub use association::{Association, AssociationType, SessionNegotiator};
pub use dh::{DhKeyPair, DhParams, DiffieHellman};
pub use error::Error;
pub use handshake::{build_associate_request, complete_associate, AssociateRequest};
pub use message::{Message, Namespace, ProtocolVersion};
pub use nonce::Nonce;
pub use session::{ConsumerSession, ServerSession, SessionType};

/// Result type for openid-core operations
pub type Result<T> = std::result::Result<T, Error>;
