//! Association session types
//!
//! A session decides how the association secret crosses the wire: in the
//! clear (`no-encryption`, only over an already-confidential transport) or
//! masked with a digest of a Diffie-Hellman shared secret. Each session is
//! used for exactly one handshake; `extract_secret` and `answer` consume it.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD, Engine};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use sha2::Sha256;

use crate::dh::{base64_to_long, long_to_base64, DhParams, DiffieHellman};
use crate::message::{Message, Namespace};
use crate::{Error, Result};

/// How the association secret is transported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionType {
    #[serde(rename = "no-encryption")]
    NoEncryption,
    #[serde(rename = "DH-SHA1")]
    DhSha1,
    #[serde(rename = "DH-SHA256")]
    DhSha256,
}

impl SessionType {
    /// Encrypted sessions first
    pub const ALL: [SessionType; 3] = [
        SessionType::DhSha1,
        SessionType::DhSha256,
        SessionType::NoEncryption,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::NoEncryption => "no-encryption",
            SessionType::DhSha1 => "DH-SHA1",
            SessionType::DhSha256 => "DH-SHA256",
        }
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "no-encryption" => Ok(SessionType::NoEncryption),
            "DH-SHA1" => Ok(SessionType::DhSha1),
            "DH-SHA256" => Ok(SessionType::DhSha256),
            other => Err(Error::UnsupportedSessionType(other.to_string())),
        }
    }
}

fn sha1_digest(data: &[u8]) -> Vec<u8> {
    Sha1::digest(data).to_vec()
}

fn sha256_digest(data: &[u8]) -> Vec<u8> {
    Sha256::digest(data).to_vec()
}

fn required_arg<'a>(message: &'a Message, key: &str) -> Result<&'a str> {
    message
        .get_arg(Namespace::OpenId, key)
        .ok_or_else(|| Error::InvalidHandshakeParameters(format!("missing {}", key)))
}

fn decode_bytes(message: &Message, key: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(required_arg(message, key)?)
        .map_err(|e| Error::InvalidHandshakeParameters(format!("bad base64 in {}: {}", key, e)))
}

/// Consumer half of a session
#[derive(Debug)]
pub enum ConsumerSession {
    NoEncryption,
    DhSha1(DiffieHellman),
    DhSha256(DiffieHellman),
}

impl ConsumerSession {
    /// Start a session in the default Diffie-Hellman group
    pub fn new(session_type: SessionType) -> Self {
        Self::with_params(session_type, DhParams::default())
    }

    /// Start a session with custom group parameters (ignored for `no-encryption`)
    pub fn with_params(session_type: SessionType, params: DhParams) -> Self {
        match session_type {
            SessionType::NoEncryption => ConsumerSession::NoEncryption,
            SessionType::DhSha1 => ConsumerSession::DhSha1(DiffieHellman::new(params)),
            SessionType::DhSha256 => ConsumerSession::DhSha256(DiffieHellman::new(params)),
        }
    }

    pub fn session_type(&self) -> SessionType {
        match self {
            ConsumerSession::NoEncryption => SessionType::NoEncryption,
            ConsumerSession::DhSha1(_) => SessionType::DhSha1,
            ConsumerSession::DhSha256(_) => SessionType::DhSha256,
        }
    }

    /// Request fields for the OpenID namespace.
    ///
    /// The group parameters are only sent when they are not the defaults.
    pub fn build_request(&self) -> BTreeMap<String, String> {
        let mut args = BTreeMap::new();
        args.insert(
            "session_type".to_string(),
            self.session_type().as_str().to_string(),
        );

        if let ConsumerSession::DhSha1(dh) | ConsumerSession::DhSha256(dh) = self {
            args.insert("dh_consumer_public".to_string(), long_to_base64(dh.public()));
            if !dh.uses_default_params() {
                args.insert("dh_modulus".to_string(), long_to_base64(dh.params().prime()));
                args.insert("dh_gen".to_string(), long_to_base64(dh.params().generator()));
            }
        }
        args
    }

    /// Recover the association secret from the provider's answer
    pub fn extract_secret(self, response: &Message) -> Result<Vec<u8>> {
        let (dh, digest): (DiffieHellman, fn(&[u8]) -> Vec<u8>) = match self {
            ConsumerSession::NoEncryption => return decode_bytes(response, "mac_key"),
            ConsumerSession::DhSha1(dh) => (dh, sha1_digest),
            ConsumerSession::DhSha256(dh) => (dh, sha256_digest),
        };

        let server_public = base64_to_long(required_arg(response, "dh_server_public")?)?;
        let enc_mac_key = decode_bytes(response, "enc_mac_key")?;
        dh.xor_secret(&server_public, &enc_mac_key, digest)
    }
}

/// Provider-side state of a Diffie-Hellman session
#[derive(Debug)]
pub struct DhServerSession {
    dh: DiffieHellman,
    consumer_public: BigUint,
}

impl DhServerSession {
    fn from_request(message: &Message) -> Result<Self> {
        let modulus = message.get_arg(Namespace::OpenId, "dh_modulus");
        let generator = message.get_arg(Namespace::OpenId, "dh_gen");

        let params = match (modulus, generator) {
            (None, None) => DhParams::default(),
            (Some(m), Some(g)) => DhParams::new(base64_to_long(m)?, base64_to_long(g)?)?,
            (None, Some(_)) | (Some(_), None) => {
                return Err(Error::InvalidHandshakeParameters(
                    "dh_modulus and dh_gen must be supplied together".into(),
                ))
            }
        };

        let consumer_public = base64_to_long(required_arg(message, "dh_consumer_public")?)?;
        params.check_public(&consumer_public)?;

        Ok(Self {
            dh: DiffieHellman::new(params),
            consumer_public,
        })
    }

    fn answer(self, secret: &[u8], digest: fn(&[u8]) -> Vec<u8>) -> Result<BTreeMap<String, String>> {
        let enc_mac_key = self.dh.xor_secret(&self.consumer_public, secret, digest)?;
        let mut args = BTreeMap::new();
        args.insert(
            "dh_server_public".to_string(),
            long_to_base64(self.dh.public()),
        );
        args.insert("enc_mac_key".to_string(), STANDARD.encode(enc_mac_key));
        Ok(args)
    }
}

/// Provider half of a session
#[derive(Debug)]
pub enum ServerSession {
    NoEncryption,
    DhSha1(DhServerSession),
    DhSha256(DhServerSession),
}

impl ServerSession {
    /// Select and initialize a session from the consumer's request.
    ///
    /// OpenID 1 requests may omit `session_type` (or leave it empty) to mean
    /// `no-encryption`.
    pub fn from_request(message: &Message) -> Result<Self> {
        let session_type = match message.get_arg(Namespace::OpenId, "session_type") {
            Some(s) if !s.is_empty() => s.parse()?,
            _ if message.is_openid1() => SessionType::NoEncryption,
            _ => {
                return Err(Error::InvalidHandshakeParameters(
                    "missing session_type".into(),
                ))
            }
        };
        Self::from_request_as(session_type, message)
    }

    /// Initialize a session of a known type from the consumer's request
    pub fn from_request_as(session_type: SessionType, message: &Message) -> Result<Self> {
        Ok(match session_type {
            SessionType::NoEncryption => ServerSession::NoEncryption,
            SessionType::DhSha1 => ServerSession::DhSha1(DhServerSession::from_request(message)?),
            SessionType::DhSha256 => {
                ServerSession::DhSha256(DhServerSession::from_request(message)?)
            }
        })
    }

    pub fn session_type(&self) -> SessionType {
        match self {
            ServerSession::NoEncryption => SessionType::NoEncryption,
            ServerSession::DhSha1(_) => SessionType::DhSha1,
            ServerSession::DhSha256(_) => SessionType::DhSha256,
        }
    }

    /// Answer fields carrying `secret` to the consumer
    pub fn answer(self, secret: &[u8]) -> Result<BTreeMap<String, String>> {
        match self {
            ServerSession::NoEncryption => {
                let mut args = BTreeMap::new();
                args.insert("mac_key".to_string(), STANDARD.encode(secret));
                Ok(args)
            }
            ServerSession::DhSha1(session) => session.answer(secret, sha1_digest),
            ServerSession::DhSha256(session) => session.answer(secret, sha256_digest),
        }
    }
}
