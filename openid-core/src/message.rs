//! Namespaced protocol messages
//!
//! Only as much of the message model as signing and the association
//! handshake need. Key-value form, URL encoding and alias negotiation belong
//! to the framing layer; this type holds already-parsed fields.

use std::collections::BTreeMap;

use crate::{Error, Result};

/// Namespace URI of OpenID 2.0 messages
pub const OPENID2_NS: &str = "http://specs.openid.net/auth/2.0";

/// Namespace URI of OpenID 1.1 messages (never sent on the wire)
pub const OPENID1_NS: &str = "http://openid.net/signon/1.1";

const OPENID_PREFIX: &str = "openid.";

/// Protocol version a message is written in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    V1,
    V2,
}

/// Where a field lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// `openid.`-prefixed fields, including extension fields (`<alias>.<key>`)
    OpenId,
    /// Unprefixed fields carried alongside the protocol fields
    Bare,
}

/// A parsed protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    version: ProtocolVersion,
    openid: BTreeMap<String, String>,
    bare: BTreeMap<String, String>,
}

impl Message {
    /// Create an empty message. OpenID 2 messages carry their `ns` field.
    pub fn new(version: ProtocolVersion) -> Self {
        let mut openid = BTreeMap::new();
        if version == ProtocolVersion::V2 {
            openid.insert("ns".to_string(), OPENID2_NS.to_string());
        }
        Self {
            version,
            openid,
            bare: BTreeMap::new(),
        }
    }

    /// Build a message from fields of the OpenID namespace (keys without the `openid.` prefix)
    pub fn from_openid_args<I, K, V>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let openid: BTreeMap<String, String> = args
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::from_parts(openid, BTreeMap::new())
    }

    /// Build a message from POST-style arguments (`openid.`-prefixed and bare keys)
    pub fn from_post_args<I, K, V>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut openid = BTreeMap::new();
        let mut bare = BTreeMap::new();
        for (key, value) in args {
            let key = key.into();
            match key.strip_prefix(OPENID_PREFIX) {
                Some(rest) => openid.insert(rest.to_string(), value.into()),
                None => bare.insert(key, value.into()),
            };
        }
        Self::from_parts(openid, bare)
    }

    fn from_parts(openid: BTreeMap<String, String>, bare: BTreeMap<String, String>) -> Result<Self> {
        let version = match openid.get("ns").map(String::as_str) {
            None => ProtocolVersion::V1,
            Some(OPENID2_NS) => ProtocolVersion::V2,
            Some(OPENID1_NS) => ProtocolVersion::V1,
            Some(other) => {
                return Err(Error::InvalidMessage(format!(
                    "unrecognized OpenID namespace: {}",
                    other
                )))
            }
        };
        Ok(Self {
            version,
            openid,
            bare,
        })
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn is_openid1(&self) -> bool {
        self.version == ProtocolVersion::V1
    }

    fn fields(&self, ns: Namespace) -> &BTreeMap<String, String> {
        match ns {
            Namespace::OpenId => &self.openid,
            Namespace::Bare => &self.bare,
        }
    }

    fn fields_mut(&mut self, ns: Namespace) -> &mut BTreeMap<String, String> {
        match ns {
            Namespace::OpenId => &mut self.openid,
            Namespace::Bare => &mut self.bare,
        }
    }

    pub fn get_arg(&self, ns: Namespace, key: &str) -> Option<&str> {
        self.fields(ns).get(key).map(String::as_str)
    }

    pub fn has_key(&self, ns: Namespace, key: &str) -> bool {
        self.fields(ns).contains_key(key)
    }

    pub fn set_arg(&mut self, ns: Namespace, key: impl Into<String>, value: impl Into<String>) {
        self.fields_mut(ns).insert(key.into(), value.into());
    }

    pub fn del_arg(&mut self, ns: Namespace, key: &str) -> Option<String> {
        self.fields_mut(ns).remove(key)
    }

    /// Set an extension field, declaring the extension's namespace under `alias`
    pub fn set_extension_arg(
        &mut self,
        alias: &str,
        type_uri: &str,
        key: &str,
        value: impl Into<String>,
    ) {
        self.openid
            .insert(format!("ns.{}", alias), type_uri.to_string());
        self.openid.insert(format!("{}.{}", alias, key), value.into());
    }

    /// Keys of the OpenID namespace in sorted order
    pub fn openid_keys(&self) -> impl Iterator<Item = &str> {
        self.openid.keys().map(String::as_str)
    }

    /// Flatten to POST-style arguments
    pub fn to_post_args(&self) -> Vec<(String, String)> {
        self.openid
            .iter()
            .map(|(k, v)| (format!("{}{}", OPENID_PREFIX, k), v.clone()))
            .chain(self.bare.iter().map(|(k, v)| (k.clone(), v.clone())))
            .collect()
    }
}
