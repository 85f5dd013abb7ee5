//! Error types for the OpenID core

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid Diffie-Hellman parameters: {0}")]
    InvalidParameters(String),

    #[error("Peer public value is outside [1, p)")]
    InvalidPeerValue,

    #[error("Length mismatch: {left} bytes vs {right} bytes")]
    LengthMismatch { left: usize, right: usize },

    #[error("Malformed association: {0}")]
    MalformedAssociation(String),

    #[error("Malformed nonce: {0}")]
    MalformedNonce(String),

    #[error("Message has no signed list")]
    MissingSignedList,

    #[error("Message has no signature")]
    MissingSignature,

    #[error("Signature verification failed")]
    SignatureMismatch,

    #[error("Unsupported session type: {0}")]
    UnsupportedSessionType(String),

    #[error("Unsupported association type: {0}")]
    UnsupportedAssociationType(String),

    #[error("Invalid handshake parameters: {0}")]
    InvalidHandshakeParameters(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}
