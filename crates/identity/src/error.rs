//! Error types for node authentication.
//!
//! Every stage returns a distinguishable error. `AuthError::code` gives the
//! numeric code reported to the operator.

use std::fmt;

use thiserror::Error;

use crate::element::ElementError;
use crate::session::Stage;

/// Signature checks that can reject a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrustCheck {
    /// Signer certificate against the root CA public key (hop 1).
    SignerCertificate,
    /// Device certificate against the signer public key (hop 2).
    DeviceCertificate,
    /// Response signature over the challenge.
    ChallengeResponse,
}

impl fmt::Display for TrustCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SignerCertificate => "signer certificate",
            Self::DeviceCertificate => "device certificate",
            Self::ChallengeResponse => "challenge response",
        };
        f.write_str(name)
    }
}

/// Failures turning stored bytes into certificates and keys.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("compact certificate is {actual} bytes, expected {expected}")]
    CompactSize { expected: usize, actual: usize },

    #[error("compact certificate {field} is {found}, definition expects {expected}")]
    TemplateMismatch {
        field: &'static str,
        expected: u8,
        found: u8,
    },

    #[error("invalid encoded date")]
    InvalidDate,

    #[error("certificate of {len} bytes does not fit buffer of {capacity}")]
    BufferTooSmall { len: usize, capacity: usize },

    #[error("malformed certificate: {0}")]
    Malformed(String),

    #[error("unsupported subject public key encoding")]
    PublicKey,

    #[error("certificate subject does not match the {role} definition")]
    RoleMismatch { role: crate::definition::CertRole },

    #[error("no certificate present")]
    Absent,

    #[error("invalid signature scalars")]
    Signature,
}

impl From<x509_cert::der::Error> for DecodeError {
    fn from(err: x509_cert::der::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// Errors that can occur during node authentication.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Secure element unreachable, slow, or refusing the request
    #[error("Secure element error: {0}")]
    Hardware(#[from] ElementError),

    /// Compact certificate malformed or undersized buffer
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Signature check failed
    #[error("Verification failed: {check}")]
    Verification { check: TrustCheck },

    /// Stage invoked before its prerequisite succeeded
    #[error("Stage {attempted} requires {required} to succeed first")]
    Sequencing { attempted: Stage, required: Stage },

    /// No root CA public key provisioned or configured
    #[error("No root CA public key available")]
    MissingTrustAnchor,

    /// Core errors
    #[error("Core error: {0}")]
    Core(#[from] nodeauth_core::Error),
}

impl AuthError {
    pub(crate) fn verification(check: TrustCheck) -> Self {
        Self::Verification { check }
    }

    /// Numeric code reported by the console.
    pub fn code(&self) -> u32 {
        match self {
            Self::Decode(err) => match err {
                DecodeError::Malformed(_) | DecodeError::Signature => 0x01,
                DecodeError::InvalidDate => 0x02,
                DecodeError::CompactSize { .. } => 0x03,
                DecodeError::TemplateMismatch { .. } => 0x04,
                DecodeError::BufferTooSmall { .. } => 0x05,
                DecodeError::PublicKey => 0x06,
                DecodeError::RoleMismatch { .. } => 0x07,
                DecodeError::Absent => 0x08,
            },
            Self::Verification { .. } => 0x0C,
            Self::Sequencing { .. } => 0x10,
            Self::MissingTrustAnchor => 0x11,
            Self::Core(_) => 0x20,
            Self::Hardware(err) => err.code(),
        }
    }

    /// Whether this error is a failed signature check.
    pub fn is_verification_failure(&self) -> bool {
        matches!(self, Self::Verification { .. })
    }
}

/// Result type for authentication operations.
pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct_per_category() {
        let verification = AuthError::verification(TrustCheck::DeviceCertificate);
        let sequencing = AuthError::Sequencing {
            attempted: Stage::VerifyChain,
            required: Stage::RebuildCerts,
        };
        let decode = AuthError::from(DecodeError::CompactSize {
            expected: 72,
            actual: 10,
        });
        let timeout = AuthError::from(ElementError::Timeout {
            operation: "sign",
            timeout_ms: 10,
        });

        let codes = [
            verification.code(),
            sequencing.code(),
            decode.code(),
            timeout.code(),
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert!(verification.is_verification_failure());
        assert!(!timeout.is_verification_failure());
    }

    #[test]
    fn test_verification_message_names_the_hop() {
        let err = AuthError::verification(TrustCheck::SignerCertificate);
        assert_eq!(err.to_string(), "Verification failed: signer certificate");
    }
}
