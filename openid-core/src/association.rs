//! Associations: a shared MAC secret plus the metadata naming it
//!
//! A provider signs positive assertions with an association's secret and a
//! consumer holding the same association verifies them. Which fields are
//! signed, and in what order, is carried in the message's `signed` list so
//! both sides feed byte-identical input to the MAC.
//!
//! The MAC input is key-value form: one `key:value\n` line per signed
//! field. Keys may not contain `:` or a newline and values may not contain
//! a newline; anything else is carried byte for byte.

use std::fmt;
use std::str::FromStr;

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::message::{Message, Namespace};
use crate::session::SessionType;
use crate::{Error, Result};

/// Version tag written at the top of the serialized form
const SERIALIZATION_VERSION: &str = "2";

/// Field order of the serialized form
const SERIALIZED_KEYS: [&str; 6] = ["version", "handle", "secret", "issued", "lifetime", "assoc_type"];

/// Random bytes in a generated handle token
const HANDLE_TOKEN_BYTES: usize = 6;

/// MAC algorithm of an association
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssociationType {
    #[serde(rename = "HMAC-SHA1")]
    HmacSha1,
    #[serde(rename = "HMAC-SHA256")]
    HmacSha256,
}

impl AssociationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssociationType::HmacSha1 => "HMAC-SHA1",
            AssociationType::HmacSha256 => "HMAC-SHA256",
        }
    }

    /// Length of a secret for this MAC
    pub fn secret_len(&self) -> usize {
        match self {
            AssociationType::HmacSha1 => 20,
            AssociationType::HmacSha256 => 32,
        }
    }

    /// Whether a secret of this type may travel over `session_type`.
    ///
    /// Unencrypted transport is only permitted for HMAC-SHA1, the weakest MAC.
    pub fn allows_session(&self, session_type: SessionType) -> bool {
        matches!(
            (self, session_type),
            (AssociationType::HmacSha1, SessionType::DhSha1)
                | (AssociationType::HmacSha1, SessionType::NoEncryption)
                | (AssociationType::HmacSha256, SessionType::DhSha256)
        )
    }

    fn mac(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        let bad_key = |_| Error::MalformedAssociation("unusable MAC key".into());
        match self {
            AssociationType::HmacSha1 => {
                let mut mac = <Hmac<Sha1> as Mac>::new_from_slice(key).map_err(bad_key)?;
                mac.update(data);
                Ok(mac.finalize().into_bytes().to_vec())
            }
            AssociationType::HmacSha256 => {
                let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key).map_err(bad_key)?;
                mac.update(data);
                Ok(mac.finalize().into_bytes().to_vec())
            }
        }
    }

    /// Constant-time check of `tag` against the MAC of `data`
    fn verify(&self, key: &[u8], data: &[u8], tag: &[u8]) -> bool {
        match self {
            AssociationType::HmacSha1 => <Hmac<Sha1> as Mac>::new_from_slice(key)
                .map(|mut mac| {
                    mac.update(data);
                    mac.verify_slice(tag).is_ok()
                })
                .unwrap_or(false),
            AssociationType::HmacSha256 => <Hmac<Sha256> as Mac>::new_from_slice(key)
                .map(|mut mac| {
                    mac.update(data);
                    mac.verify_slice(tag).is_ok()
                })
                .unwrap_or(false),
        }
    }
}

impl fmt::Display for AssociationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssociationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "HMAC-SHA1" => Ok(AssociationType::HmacSha1),
            "HMAC-SHA256" => Ok(AssociationType::HmacSha256),
            other => Err(Error::UnsupportedAssociationType(other.to_string())),
        }
    }
}

/// Which (association type, session type) pairs a party will negotiate,
/// most preferred first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionNegotiator {
    allowed: Vec<(AssociationType, SessionType)>,
}

impl SessionNegotiator {
    /// Every pair must be one the association type may travel over
    pub fn new(allowed: Vec<(AssociationType, SessionType)>) -> Result<Self> {
        for (assoc_type, session_type) in &allowed {
            check_pair(*assoc_type, *session_type)?;
        }
        Ok(Self { allowed })
    }

    /// Only Diffie-Hellman sessions; the secret never crosses the wire in the clear
    pub fn encrypted() -> Self {
        Self {
            allowed: vec![
                (AssociationType::HmacSha1, SessionType::DhSha1),
                (AssociationType::HmacSha256, SessionType::DhSha256),
            ],
        }
    }

    pub fn allowed_types(&self) -> &[(AssociationType, SessionType)] {
        &self.allowed
    }

    /// Append a pair at the lowest preference. Without a session type,
    /// every session the association type permits is appended.
    pub fn add_allowed_type(
        &mut self,
        assoc_type: AssociationType,
        session_type: Option<SessionType>,
    ) -> Result<()> {
        match session_type {
            Some(session_type) => {
                check_pair(assoc_type, session_type)?;
                self.allowed.push((assoc_type, session_type));
            }
            None => self.allowed.extend(
                SessionType::ALL
                    .into_iter()
                    .filter(|s| assoc_type.allows_session(*s))
                    .map(|s| (assoc_type, s)),
            ),
        }
        Ok(())
    }

    pub fn is_allowed(&self, assoc_type: AssociationType, session_type: SessionType) -> bool {
        self.allowed.contains(&(assoc_type, session_type))
    }

    /// The most preferred pair, if any is allowed
    pub fn allowed_type(&self) -> Option<(AssociationType, SessionType)> {
        self.allowed.first().copied()
    }
}

impl Default for SessionNegotiator {
    fn default() -> Self {
        Self {
            allowed: vec![
                (AssociationType::HmacSha1, SessionType::DhSha1),
                (AssociationType::HmacSha1, SessionType::NoEncryption),
                (AssociationType::HmacSha256, SessionType::DhSha256),
            ],
        }
    }
}

pub(crate) fn check_pair(assoc_type: AssociationType, session_type: SessionType) -> Result<()> {
    if assoc_type.allows_session(session_type) {
        Ok(())
    } else {
        Err(Error::UnsupportedSessionType(format!(
            "{} cannot carry {} secrets",
            session_type, assoc_type
        )))
    }
}

/// An established shared secret between a consumer and a provider
#[derive(Clone, PartialEq, Eq)]
pub struct Association {
    handle: String,
    secret: Zeroizing<Vec<u8>>,
    issued: DateTime<Utc>,
    lifetime: Duration,
    assoc_type: AssociationType,
}

impl Association {
    /// Create an association. Times are kept at whole-second precision.
    pub fn new(
        handle: impl Into<String>,
        secret: impl Into<Vec<u8>>,
        issued: DateTime<Utc>,
        lifetime: Duration,
        assoc_type: AssociationType,
    ) -> Self {
        let issued = DateTime::from_timestamp(issued.timestamp(), 0).unwrap_or(issued);
        Self {
            handle: handle.into(),
            secret: Zeroizing::new(secret.into()),
            issued,
            lifetime: Duration::try_seconds(lifetime.num_seconds()).unwrap_or(lifetime),
            assoc_type,
        }
    }

    /// Create an association issued now, its handle being `handle_prefix` plus a random token
    pub fn from_expires_in(
        lifetime: Duration,
        handle_prefix: &str,
        secret: impl Into<Vec<u8>>,
        assoc_type: AssociationType,
    ) -> Self {
        let handle = format!("{}{}", handle_prefix, random_token());
        Self::new(handle, secret, Utc::now(), lifetime, assoc_type)
    }

    /// Create a provider-side association with a fresh random secret
    pub fn generate(lifetime: Duration, assoc_type: AssociationType) -> Self {
        let mut secret = Zeroizing::new(vec![0u8; assoc_type.secret_len()]);
        OsRng.fill_bytes(&mut secret);
        let issued = Utc::now();
        let handle = format!(
            "{{{}}}{{{:x}}}{{{}}}",
            assoc_type,
            issued.timestamp(),
            random_token()
        );
        Self::new(handle, secret.to_vec(), issued, lifetime, assoc_type)
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn secret(&self) -> &[u8] {
        &self.secret
    }

    pub fn issued(&self) -> DateTime<Utc> {
        self.issued
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    pub fn assoc_type(&self) -> AssociationType {
        self.assoc_type
    }

    /// Expiry time, saturating at the latest representable instant
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.issued
            .checked_add_signed(self.lifetime)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Time left before expiry, never negative
    pub fn expires_in(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at() - now).max(Duration::zero())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() <= now
    }

    /// Encode as ordered `key:value` lines
    pub fn serialize(&self) -> String {
        let values = [
            SERIALIZATION_VERSION.to_string(),
            escape_value(&self.handle),
            STANDARD.encode(self.secret.as_slice()),
            self.issued.timestamp().to_string(),
            self.lifetime.num_seconds().to_string(),
            self.assoc_type.as_str().to_string(),
        ];
        SERIALIZED_KEYS
            .iter()
            .zip(values.iter())
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect()
    }

    /// Decode the form produced by [`Association::serialize`]
    pub fn deserialize(s: &str) -> Result<Self> {
        let body = s.strip_suffix('\n').unwrap_or(s);
        let lines: Vec<&str> = body.split('\n').collect();
        if lines.len() != SERIALIZED_KEYS.len() {
            return Err(malformed(format!(
                "expected {} lines, got {}",
                SERIALIZED_KEYS.len(),
                lines.len()
            )));
        }

        let mut values = Vec::with_capacity(lines.len());
        for (line, expected) in lines.iter().zip(SERIALIZED_KEYS) {
            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| malformed(format!("line without separator: {:?}", line)))?;
            if key != expected {
                return Err(malformed(format!("expected key {}, got {}", expected, key)));
            }
            values.push(value);
        }

        if values[0] != SERIALIZATION_VERSION {
            return Err(malformed(format!("unknown version {}", values[0])));
        }
        let handle = unescape_value(values[1])
            .ok_or_else(|| malformed("bad escape in handle".to_string()))?;
        let secret = STANDARD
            .decode(values[2])
            .map_err(|e| malformed(format!("bad secret encoding: {}", e)))?;
        let issued: i64 = values[3]
            .parse()
            .map_err(|_| malformed(format!("bad issued time: {}", values[3])))?;
        let issued = DateTime::from_timestamp(issued, 0)
            .ok_or_else(|| malformed(format!("issued time out of range: {}", issued)))?;
        let lifetime = values[4]
            .parse::<i64>()
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| malformed(format!("bad lifetime: {}", values[4])))?;
        let assoc_type = values[5]
            .parse()
            .map_err(|_| malformed(format!("bad association type: {}", values[5])))?;

        Ok(Self::new(handle, secret, issued, lifetime, assoc_type))
    }

    /// MAC over the key-value form of `pairs`, in order
    pub fn sign<K, V>(&self, pairs: &[(K, V)]) -> Result<Vec<u8>>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.assoc_type.mac(&self.secret, &signing_input(pairs)?)
    }

    /// The fields a message declares signed, in the order its `signed` list gives
    pub fn make_signed_pairs(&self, message: &Message) -> Result<Vec<(String, String)>> {
        let signed = message
            .get_arg(Namespace::OpenId, "signed")
            .filter(|list| !list.is_empty())
            .ok_or(Error::MissingSignedList)?;

        Ok(signed
            .split(',')
            .map(|field| {
                let value = message
                    .get_arg(Namespace::OpenId, field)
                    .or_else(|| message.get_arg(Namespace::Bare, field))
                    .unwrap_or("");
                (field.to_string(), value.to_string())
            })
            .collect())
    }

    /// Base64 signature over the message's signed fields
    pub fn message_signature(&self, message: &Message) -> Result<String> {
        let pairs = self.make_signed_pairs(message)?;
        Ok(STANDARD.encode(self.sign(&pairs)?))
    }

    /// Return a copy of `message` with `assoc_handle`, `signed` and `sig` set
    ///
    /// Every field of the OpenID namespace is signed, along with the
    /// `signed` list itself, sorted by name.
    pub fn sign_message(&self, message: &Message) -> Result<Message> {
        if message.has_key(Namespace::OpenId, "sig") || message.has_key(Namespace::OpenId, "signed")
        {
            return Err(Error::InvalidMessage(
                "message already has a signed list or signature".into(),
            ));
        }
        if let Some(existing) = message.get_arg(Namespace::OpenId, "assoc_handle") {
            if existing != self.handle {
                return Err(Error::InvalidMessage(format!(
                    "message is for association {}, not {}",
                    existing, self.handle
                )));
            }
        }

        let mut signed_message = message.clone();
        signed_message.set_arg(Namespace::OpenId, "assoc_handle", self.handle.as_str());

        let signed_list = {
            let mut fields: Vec<&str> = signed_message.openid_keys().collect();
            fields.push("signed");
            fields.sort_unstable();
            fields.join(",")
        };
        signed_message.set_arg(Namespace::OpenId, "signed", signed_list);

        let sig = self.message_signature(&signed_message)?;
        signed_message.set_arg(Namespace::OpenId, "sig", sig);
        Ok(signed_message)
    }

    /// Check a message's `sig` against its signed fields
    pub fn check_message_signature(&self, message: &Message) -> Result<()> {
        let pairs = self.make_signed_pairs(message)?;
        let sig = message
            .get_arg(Namespace::OpenId, "sig")
            .ok_or(Error::MissingSignature)?;
        let tag = STANDARD.decode(sig).map_err(|_| Error::SignatureMismatch)?;

        if self
            .assoc_type
            .verify(&self.secret, &signing_input(&pairs)?, &tag)
        {
            Ok(())
        } else {
            Err(Error::SignatureMismatch)
        }
    }
}

impl fmt::Debug for Association {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Association")
            .field("handle", &self.handle)
            .field("secret", &"<redacted>")
            .field("issued", &self.issued)
            .field("lifetime", &self.lifetime)
            .field("assoc_type", &self.assoc_type)
            .finish()
    }
}

fn malformed(reason: String) -> Error {
    Error::MalformedAssociation(reason)
}

fn random_token() -> String {
    let mut bytes = [0u8; HANDLE_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn signing_input<K, V>(pairs: &[(K, V)]) -> Result<Vec<u8>>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut out = String::new();
    for (key, value) in pairs {
        let (key, value) = (key.as_ref(), value.as_ref());
        if key.contains([':', '\n']) {
            return Err(Error::InvalidMessage(format!("cannot sign key {:?}", key)));
        }
        if value.contains('\n') {
            return Err(Error::InvalidMessage(format!(
                "cannot sign value of {} containing a newline",
                key
            )));
        }
        out.push_str(key);
        out.push(':');
        out.push_str(value);
        out.push('\n');
    }
    Ok(out.into_bytes())
}

/// Percent-escape the characters that would break a serialized `key:value` line
fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '%' => out.push_str("%25"),
            '\n' => out.push_str("%0A"),
            '=' => out.push_str("%3D"),
            '\\' => out.push_str("%5C"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_value(value: &str) -> Option<String> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3)?;
            if !hex.iter().all(u8::is_ascii_hexdigit) {
                return None;
            }
            let hex = std::str::from_utf8(hex).ok()?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
