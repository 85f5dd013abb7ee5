//! Response nonces
//!
//! A nonce is a UTC timestamp followed by a short random salt, e.g.
//! `2024-03-01T12:00:00ZAbc123`. Stores remember consumed nonces for the
//! skew window so a captured response cannot be replayed.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};

use crate::{Error, Result};

/// Default tolerated clock drift, in seconds
pub const DEFAULT_SKEW_SECS: i64 = 3600;

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const TIME_STR_LEN: usize = "0000-00-00T00:00:00Z".len();
const SALT_LEN: usize = 6;

/// Default tolerated clock drift
pub fn default_skew() -> Duration {
    Duration::seconds(DEFAULT_SKEW_SECS)
}

/// A parsed or freshly minted nonce
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nonce {
    timestamp: DateTime<Utc>,
    salt: String,
}

impl Nonce {
    /// Mint a nonce for the current time
    pub fn generate() -> Self {
        Self::at(Utc::now())
    }

    /// Mint a nonce for a given time (truncated to whole seconds)
    pub fn at(when: DateTime<Utc>) -> Self {
        let salt = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SALT_LEN)
            .map(char::from)
            .collect();
        Self::new(when, salt)
    }

    pub fn new(timestamp: DateTime<Utc>, salt: String) -> Self {
        let timestamp = DateTime::from_timestamp(timestamp.timestamp(), 0).unwrap_or(timestamp);
        Self { timestamp, salt }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Seconds since the Unix epoch
    pub fn unix_timestamp(&self) -> i64 {
        self.timestamp.timestamp()
    }

    pub fn salt(&self) -> &str {
        &self.salt
    }

    /// Whether the timestamp lies in `[now - skew, now + skew]`
    pub fn is_within(&self, skew: Duration, now: DateTime<Utc>) -> bool {
        now - skew <= self.timestamp && self.timestamp <= now + skew
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.timestamp.format(TIME_FORMAT), self.salt)
    }
}

impl FromStr for Nonce {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (timestamp, salt) = split_nonce(s)?;
        let timestamp = DateTime::from_timestamp(timestamp, 0)
            .ok_or_else(|| Error::MalformedNonce("time out of range".into()))?;
        Ok(Self {
            timestamp,
            salt: salt.to_string(),
        })
    }
}

/// Split a nonce token into its Unix timestamp and salt
pub fn split_nonce(s: &str) -> Result<(i64, &str)> {
    let time_str = s
        .get(..TIME_STR_LEN)
        .ok_or_else(|| Error::MalformedNonce(format!("too short: {:?}", s)))?;
    let parsed = NaiveDateTime::parse_from_str(time_str, TIME_FORMAT)
        .map_err(|e| Error::MalformedNonce(format!("bad time {:?}: {}", time_str, e)))?;
    let timestamp = parsed.and_utc().timestamp();
    if timestamp < 0 {
        return Err(Error::MalformedNonce("time before the epoch".into()));
    }
    Ok((timestamp, &s[TIME_STR_LEN..]))
}

/// Whether a token parses and its time is within `skew` of `now`
pub fn check_timestamp(token: &str, skew: Duration, now: DateTime<Utc>) -> bool {
    match token.parse::<Nonce>() {
        Ok(nonce) => nonce.is_within(skew, now),
        Err(_) => false,
    }
}
