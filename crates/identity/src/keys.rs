//! Fixed-size key, challenge and response types.

use std::fmt;

use p256::ecdsa::{Signature, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;

use crate::error::DecodeError;

/// Uncompressed P-256 public key size without the SEC1 `0x04` prefix.
pub const PUBLIC_KEY_SIZE: usize = 64;
/// Challenge size (one SHA-256 digest).
pub const CHALLENGE_SIZE: usize = 32;
/// Response size (`r || s`).
pub const RESPONSE_SIZE: usize = 64;

const SEC1_UNCOMPRESSED_TAG: u8 = 0x04;

/// P-256 public key stored as `X || Y`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    pub const fn from_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, DecodeError> {
        let bytes: [u8; PUBLIC_KEY_SIZE] = bytes.try_into().map_err(|_| DecodeError::PublicKey)?;
        Ok(Self(bytes))
    }

    /// Parse a SEC1 uncompressed point (`0x04 || X || Y`).
    pub fn from_sec1(bytes: &[u8]) -> Result<Self, DecodeError> {
        match bytes.split_first() {
            Some((&SEC1_UNCOMPRESSED_TAG, point)) => Self::from_slice(point),
            _ => Err(DecodeError::PublicKey),
        }
    }

    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        let point = p256::PublicKey::from(key).to_encoded_point(false);
        let mut bytes = [0u8; PUBLIC_KEY_SIZE];
        // An uncompressed encoded point is always 65 bytes.
        bytes.copy_from_slice(&point.as_bytes()[1..]);
        Self(bytes)
    }

    pub fn to_verifying_key(&self) -> Result<VerifyingKey, DecodeError> {
        VerifyingKey::from_sec1_bytes(&self.to_sec1()).map_err(|_| DecodeError::PublicKey)
    }

    /// SEC1 uncompressed encoding (`0x04 || X || Y`).
    pub fn to_sec1(&self) -> [u8; PUBLIC_KEY_SIZE + 1] {
        let mut out = [0u8; PUBLIC_KEY_SIZE + 1];
        out[0] = SEC1_UNCOMPRESSED_TAG;
        out[1..].copy_from_slice(&self.0);
        out
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

impl AsRef<[u8]> for PublicKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Random challenge issued by the host.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Challenge([u8; CHALLENGE_SIZE]);

impl Challenge {
    pub const fn from_bytes(bytes: [u8; CHALLENGE_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; CHALLENGE_SIZE] {
        &self.0
    }
}

impl fmt::Debug for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Challenge({})", hex::encode(self.0))
    }
}

impl AsRef<[u8]> for Challenge {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Client signature over a challenge, `r || s`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Response([u8; RESPONSE_SIZE]);

impl Response {
    pub const fn from_bytes(bytes: [u8; RESPONSE_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_signature(signature: &Signature) -> Self {
        let mut bytes = [0u8; RESPONSE_SIZE];
        bytes.copy_from_slice(&signature.to_bytes());
        Self(bytes)
    }

    pub fn to_signature(&self) -> Result<Signature, DecodeError> {
        Signature::from_slice(&self.0).map_err(|_| DecodeError::Signature)
    }

    pub fn as_bytes(&self) -> &[u8; RESPONSE_SIZE] {
        &self.0
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Response({})", hex::encode(self.0))
    }
}

impl AsRef<[u8]> for Response {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
