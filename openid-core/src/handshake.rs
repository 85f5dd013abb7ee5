//! The `associate` exchange
//!
//! The consumer sends `mode=associate` with the association type it wants and
//! its session fields. The provider answers with the new association's handle,
//! lifetime and secret (carried by the session). Nothing is returned unless
//! every step succeeds.

use chrono::{Duration, Utc};

use crate::message::{Message, Namespace, ProtocolVersion};
use crate::session::{ConsumerSession, ServerSession, SessionType};
use crate::association::check_pair;
use crate::{Association, AssociationType, Error, Result};

/// Build the consumer's `associate` request for a session
pub fn build_associate_request(session: &ConsumerSession, assoc_type: AssociationType) -> Message {
    let mut message = Message::new(ProtocolVersion::V2);
    message.set_arg(Namespace::OpenId, "mode", "associate");
    message.set_arg(Namespace::OpenId, "assoc_type", assoc_type.as_str());
    for (key, value) in session.build_request() {
        message.set_arg(Namespace::OpenId, key, value);
    }
    message
}

fn required<'a>(message: &'a Message, key: &str) -> Result<&'a str> {
    match message.get_arg(Namespace::OpenId, key) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(Error::InvalidHandshakeParameters(format!("missing {}", key))),
    }
}

fn check_compatible(assoc_type: AssociationType, session_type: SessionType) -> Result<()> {
    check_pair(assoc_type, session_type).inspect_err(|_| {
        tracing::debug!(%assoc_type, %session_type, "Rejecting association negotiation");
    })
}

/// A provider's view of a parsed `associate` request
#[derive(Debug)]
pub struct AssociateRequest {
    version: ProtocolVersion,
    assoc_type: AssociationType,
    session: ServerSession,
}

impl AssociateRequest {
    /// Parse and validate an `associate` request
    pub fn from_message(message: &Message) -> Result<Self> {
        let mode = required(message, "mode")?;
        if mode != "associate" {
            return Err(Error::InvalidHandshakeParameters(format!(
                "expected mode associate, got {}",
                mode
            )));
        }

        let session = ServerSession::from_request(message)?;
        let assoc_type: AssociationType = required(message, "assoc_type")?.parse()?;
        check_compatible(assoc_type, session.session_type())?;

        Ok(Self {
            version: message.version(),
            assoc_type,
            session,
        })
    }

    pub fn assoc_type(&self) -> AssociationType {
        self.assoc_type
    }

    pub fn session_type(&self) -> SessionType {
        self.session.session_type()
    }

    /// Answer with an association of the requested type
    pub fn answer(self, association: &Association) -> Result<Message> {
        if association.assoc_type() != self.assoc_type {
            return Err(Error::InvalidHandshakeParameters(format!(
                "requested {} but answered with {}",
                self.assoc_type,
                association.assoc_type()
            )));
        }

        let session_type = self.session.session_type();
        let fields = self.session.answer(association.secret())?;

        let mut response = Message::new(self.version);
        response.set_arg(Namespace::OpenId, "assoc_handle", association.handle());
        response.set_arg(Namespace::OpenId, "assoc_type", self.assoc_type.as_str());
        response.set_arg(
            Namespace::OpenId,
            "expires_in",
            association.expires_in(Utc::now()).num_seconds().to_string(),
        );
        // OpenID 1 signals no-encryption by leaving session_type out.
        if !(self.version == ProtocolVersion::V1 && session_type == SessionType::NoEncryption) {
            response.set_arg(Namespace::OpenId, "session_type", session_type.as_str());
        }
        for (key, value) in fields {
            response.set_arg(Namespace::OpenId, key, value);
        }
        Ok(response)
    }
}

/// Turn the provider's answer into an association, consuming the session
pub fn complete_associate(
    session: ConsumerSession,
    assoc_type: AssociationType,
    response: &Message,
) -> Result<Association> {
    let answered_type: AssociationType = required(response, "assoc_type")?.parse()?;
    if answered_type != assoc_type {
        return Err(Error::InvalidHandshakeParameters(format!(
            "requested {} but provider answered {}",
            assoc_type, answered_type
        )));
    }

    let session_type = match response.get_arg(Namespace::OpenId, "session_type") {
        Some(s) if !s.is_empty() => s.parse()?,
        _ if response.is_openid1() => SessionType::NoEncryption,
        _ => {
            return Err(Error::InvalidHandshakeParameters(
                "missing session_type".into(),
            ))
        }
    };
    if session_type != session.session_type() {
        return Err(Error::InvalidHandshakeParameters(format!(
            "sent {} but provider answered {}",
            session.session_type(),
            session_type
        )));
    }
    check_compatible(assoc_type, session_type)?;

    let handle = required(response, "assoc_handle")?.to_string();
    let expires_in = required(response, "expires_in")?
        .parse::<i64>()
        .ok()
        .filter(|secs| *secs >= 0)
        .and_then(Duration::try_seconds)
        .ok_or_else(|| Error::InvalidHandshakeParameters("bad expires_in".into()))?;

    let secret = session.extract_secret(response)?;
    if secret.len() != assoc_type.secret_len() {
        return Err(Error::InvalidHandshakeParameters(format!(
            "{} secret must be {} bytes, got {}",
            assoc_type,
            assoc_type.secret_len(),
            secret.len()
        )));
    }

    tracing::debug!(
        %handle,
        %assoc_type,
        %session_type,
        expires_in = expires_in.num_seconds(),
        "Association established"
    );
    Ok(Association::new(handle, secret, Utc::now(), expires_in, assoc_type))
}
