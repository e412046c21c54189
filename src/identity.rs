//! Agent identity derived from the signing credential.
//!
//! The identity is the EVM address of the agent's secp256k1 key, rendered in
//! EIP-55 mixed-case form. It scopes the dispatch subscription and stamps
//! every status event, and never changes for the lifetime of the process.

use std::fmt;

use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use secrecy::{ExposeSecret, SecretString};
use sha3::{Digest, Keccak256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("signing credential is empty")]
    Empty,

    #[error("signing credential is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("signing credential must be 32 bytes, got {0}")]
    InvalidLength(usize),

    #[error("signing credential is not a valid secp256k1 secret key")]
    InvalidKey,
}

/// Stable agent address, e.g. `0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AgentIdentity {
    address: [u8; 20],
    rendered: String,
}

impl AgentIdentity {
    pub fn from_address(address: [u8; 20]) -> Self {
        Self {
            rendered: to_checksum_address(&address),
            address,
        }
    }

    pub fn address(&self) -> &[u8; 20] {
        &self.address
    }

    pub fn as_str(&self) -> &str {
        &self.rendered
    }
}

impl fmt::Display for AgentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

/// Parsed signing key together with the identity derived from it.
#[derive(Clone)]
pub struct AgentCredential {
    signing_key: SigningKey,
    identity: AgentIdentity,
}

impl fmt::Debug for AgentCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentCredential")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl AgentCredential {
    /// Parse a hex secret key (optional `0x` prefix) and derive the agent identity.
    pub fn from_hex(secret: &str) -> Result<Self, IdentityError> {
        let trimmed = secret.trim();
        let trimmed = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if trimmed.is_empty() {
            return Err(IdentityError::Empty);
        }

        let bytes = hex::decode(trimmed)?;
        if bytes.len() != 32 {
            return Err(IdentityError::InvalidLength(bytes.len()));
        }
        let signing_key =
            SigningKey::from_slice(&bytes).map_err(|_| IdentityError::InvalidKey)?;
        let identity = AgentIdentity::from_address(derive_address(&signing_key));

        Ok(Self {
            signing_key,
            identity,
        })
    }

    /// Same as [`from_hex`](Self::from_hex) for a key held as a secret.
    pub fn from_secret(secret: &SecretString) -> Result<Self, IdentityError> {
        Self::from_hex(secret.expose_secret())
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// Last 20 bytes of keccak256 over the uncompressed public key, minus its 0x04 tag.
fn derive_address(key: &SigningKey) -> [u8; 20] {
    let point = key.verifying_key().as_affine().to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    address
}

/// EIP-55 checksum encoding.
pub fn to_checksum_address(address: &[u8; 20]) -> String {
    let lower = hex::encode(address);
    let hash = keccak256(lower.as_bytes());

    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = (hash[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}
