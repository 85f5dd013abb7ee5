//! Diffie-Hellman key agreement over a fixed safe-prime group
//!
//! Pure modular arithmetic: no I/O, no shared state. Integers travel on the
//! wire as "btwoc" bytes (big-endian, with a leading zero byte whenever the
//! high bit would otherwise be set), usually base64-encoded.

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine};
use num_bigint::{BigUint, RandBigInt};
use rand::rngs::OsRng;

use crate::{Error, Result};

/// The well-known 1024-bit OpenID default modulus, big-endian.
const DEFAULT_PRIME: [u8; 128] = [
    0xdc, 0xf9, 0x3a, 0x0b, 0x88, 0x39, 0x72, 0xec, 0x0e, 0x19, 0x98, 0x9a,
    0xc5, 0xa2, 0xce, 0x31, 0x0e, 0x1d, 0x37, 0x71, 0x7e, 0x8d, 0x95, 0x71,
    0xbb, 0x76, 0x23, 0x73, 0x18, 0x66, 0xe6, 0x1e, 0xf7, 0x5a, 0x2e, 0x27,
    0x89, 0x8b, 0x05, 0x7f, 0x98, 0x91, 0xc2, 0xe2, 0x7a, 0x63, 0x9c, 0x3f,
    0x29, 0xb6, 0x08, 0x14, 0x58, 0x1c, 0xd3, 0xb2, 0xca, 0x39, 0x86, 0xd2,
    0x68, 0x37, 0x05, 0x57, 0x7d, 0x45, 0xc2, 0xe7, 0xe5, 0x2d, 0xc8, 0x1c,
    0x7a, 0x17, 0x18, 0x76, 0xe5, 0xce, 0xa7, 0x4b, 0x14, 0x48, 0xbf, 0xdf,
    0xaf, 0x18, 0x82, 0x8e, 0xfd, 0x25, 0x19, 0xf1, 0x4e, 0x45, 0xe3, 0x82,
    0x66, 0x34, 0xaf, 0x19, 0x49, 0xe5, 0xb5, 0x35, 0xcc, 0x82, 0x9a, 0x48,
    0x3b, 0x8a, 0x76, 0x22, 0x3e, 0x5d, 0x49, 0x0a, 0x25, 0x7f, 0x05, 0xbd,
    0xff, 0x16, 0xf2, 0xfb, 0x22, 0xc5, 0x83, 0xab,
];

const DEFAULT_GENERATOR: u32 = 2;

/// Group parameters `(prime, generator)` with `1 < generator < prime`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhParams {
    prime: BigUint,
    generator: BigUint,
}

impl DhParams {
    /// Create custom parameters, rejecting values outside the group
    pub fn new(prime: BigUint, generator: BigUint) -> Result<Self> {
        let one = BigUint::from(1u32);
        if prime < BigUint::from(2u32) {
            return Err(Error::InvalidParameters("prime must be at least 2".into()));
        }
        if generator <= one || generator >= prime {
            return Err(Error::InvalidParameters(
                "generator must lie strictly between 1 and the prime".into(),
            ));
        }
        Ok(Self { prime, generator })
    }

    pub fn prime(&self) -> &BigUint {
        &self.prime
    }

    pub fn generator(&self) -> &BigUint {
        &self.generator
    }

    /// Reject a peer public value outside `[1, prime)`
    pub fn check_public(&self, value: &BigUint) -> Result<()> {
        if *value < BigUint::from(1u32) || *value >= self.prime {
            return Err(Error::InvalidPeerValue);
        }
        Ok(())
    }

    /// Whether these are the protocol defaults (which are never sent on the wire)
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

impl Default for DhParams {
    fn default() -> Self {
        Self {
            prime: BigUint::from_bytes_be(&DEFAULT_PRIME),
            generator: BigUint::from(DEFAULT_GENERATOR),
        }
    }
}

/// An ephemeral keypair. The private half never leaves the session that made it.
#[derive(Clone)]
pub struct DhKeyPair {
    private: BigUint,
    public: BigUint,
}

impl DhKeyPair {
    /// Build a keypair from a known private value (deterministic tests, vectors)
    pub fn from_private(params: &DhParams, private: BigUint) -> Self {
        let public = params.generator.modpow(&private, &params.prime);
        Self { private, public }
    }

    pub fn private(&self) -> &BigUint {
        &self.private
    }

    pub fn public(&self) -> &BigUint {
        &self.public
    }
}

impl fmt::Debug for DhKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DhKeyPair")
            .field("private", &"<redacted>")
            .field("public", &self.public)
            .finish()
    }
}

/// Pick a private value uniformly from `[1, prime - 1)` and derive its public value
pub fn generate_keypair(params: &DhParams) -> DhKeyPair {
    // 1 < generator < prime forces prime >= 3, so the range is never empty.
    let low = BigUint::from(1u32);
    let high = &params.prime - 1u32;
    let private = OsRng.gen_biguint_range(&low, &high);
    DhKeyPair::from_private(params, private)
}

/// Compute `peer_public ^ own_private mod prime` as btwoc bytes
pub fn shared_secret(
    params: &DhParams,
    own_private: &BigUint,
    peer_public: &BigUint,
) -> Result<Vec<u8>> {
    params.check_public(peer_public)?;
    let shared = peer_public.modpow(own_private, &params.prime);
    Ok(btwoc(&shared))
}

/// Byte-wise XOR of two equal-length strings
pub fn xor(a: &[u8], b: &[u8]) -> Result<Vec<u8>> {
    if a.len() != b.len() {
        return Err(Error::LengthMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    Ok(a.iter().zip(b).map(|(x, y)| x ^ y).collect())
}

/// Encode a non-negative integer as btwoc bytes
pub fn btwoc(value: &BigUint) -> Vec<u8> {
    let bytes = value.to_bytes_be();
    if bytes[0] & 0x80 != 0 {
        let mut padded = Vec::with_capacity(bytes.len() + 1);
        padded.push(0);
        padded.extend_from_slice(&bytes);
        padded
    } else {
        bytes
    }
}

/// Decode btwoc bytes, rejecting empty input and negative values
pub fn from_btwoc(bytes: &[u8]) -> Result<BigUint> {
    match bytes.first() {
        None => Err(Error::InvalidHandshakeParameters("empty integer".into())),
        Some(b) if b & 0x80 != 0 => Err(Error::InvalidHandshakeParameters(
            "negative integer".into(),
        )),
        Some(_) => Ok(BigUint::from_bytes_be(bytes)),
    }
}

/// Encode an integer as base64 of its btwoc bytes
pub fn long_to_base64(value: &BigUint) -> String {
    STANDARD.encode(btwoc(value))
}

/// Decode an integer from base64 of its btwoc bytes
pub fn base64_to_long(s: &str) -> Result<BigUint> {
    let bytes = STANDARD
        .decode(s)
        .map_err(|e| Error::InvalidHandshakeParameters(format!("bad base64 integer: {}", e)))?;
    from_btwoc(&bytes)
}

/// One party's side of a key agreement: group parameters plus an ephemeral keypair
#[derive(Debug, Clone)]
pub struct DiffieHellman {
    params: DhParams,
    keypair: DhKeyPair,
}

impl DiffieHellman {
    /// Generate a fresh keypair in the given group
    pub fn new(params: DhParams) -> Self {
        let keypair = generate_keypair(&params);
        Self { params, keypair }
    }

    /// Generate a fresh keypair in the default group
    pub fn from_defaults() -> Self {
        Self::new(DhParams::default())
    }

    pub fn params(&self) -> &DhParams {
        &self.params
    }

    pub fn public(&self) -> &BigUint {
        self.keypair.public()
    }

    pub fn uses_default_params(&self) -> bool {
        self.params.is_default()
    }

    /// Shared secret with a peer, as btwoc bytes
    pub fn shared_secret(&self, peer_public: &BigUint) -> Result<Vec<u8>> {
        shared_secret(&self.params, self.keypair.private(), peer_public)
    }

    /// Mask (or unmask) `secret` with the digest of the shared secret
    pub fn xor_secret<H>(&self, peer_public: &BigUint, secret: &[u8], digest: H) -> Result<Vec<u8>>
    where
        H: Fn(&[u8]) -> Vec<u8>,
    {
        let shared = self.shared_secret(peer_public)?;
        xor(&digest(&shared), secret)
    }
}
