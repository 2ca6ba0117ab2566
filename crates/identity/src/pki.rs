//! Certificate reconstruction and chain verification.
//!
//! Certificates are rebuilt from compact records and verified hop by hop:
//! root CA key → signer certificate → device certificate.

use std::fmt;

use const_oid::db::rfc5912::{ECDSA_WITH_SHA_256, ID_EC_PUBLIC_KEY, SECP_256_R_1};
use p256::ecdsa::signature::hazmat::PrehashVerifier;
use p256::ecdsa::Signature;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use x509_cert::certificate::TbsCertificate;
use x509_cert::der::asn1::BitString;
use x509_cert::der::{Any, Decode, Encode};

use crate::compact::CompactCertificate;
use crate::definition::{
    signature_algorithm, CertificateDefinition, DynamicFields, SerialSource, DEVICE_DEFINITION,
    SIGNER_DEFINITION,
};
use crate::element::{HardwareGateway, SecureElement, SERIAL_NUMBER_SIZE};
use crate::error::{AuthError, AuthResult, DecodeError};
use crate::keys::PublicKey;

/// Capacity of a reconstructed certificate buffer.
pub const MAX_CERT_SIZE: usize = 1024;

/// DER certificate in a fixed-capacity buffer.
///
/// Zero length is the absent state. The recorded length never exceeds
/// [`MAX_CERT_SIZE`].
#[derive(Clone)]
pub struct Certificate {
    buf: [u8; MAX_CERT_SIZE],
    len: usize,
}

impl Certificate {
    pub const fn empty() -> Self {
        Self {
            buf: [0u8; MAX_CERT_SIZE],
            len: 0,
        }
    }

    pub fn from_der(der: &[u8]) -> Result<Self, DecodeError> {
        if der.len() > MAX_CERT_SIZE {
            return Err(DecodeError::BufferTooSmall {
                len: der.len(),
                capacity: MAX_CERT_SIZE,
            });
        }
        let mut cert = Self::empty();
        cert.buf[..der.len()].copy_from_slice(der);
        cert.len = der.len();
        Ok(cert)
    }

    pub fn as_der(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.buf[..self.len].fill(0);
        self.len = 0;
    }

    fn parse(&self) -> Result<x509_cert::Certificate, DecodeError> {
        if self.is_empty() {
            return Err(DecodeError::Absent);
        }
        Ok(x509_cert::Certificate::from_der(self.as_der())?)
    }
}

impl Default for Certificate {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.as_der() == other.as_der()
    }
}

impl Eq for Certificate {}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate").field("len", &self.len).finish()
    }
}

/// Dynamic inputs to reconstruction, read from the secure element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactSource {
    /// Raw compact record as stored; validated by [`reconstruct`].
    pub compact: Vec<u8>,
    pub subject_public_key: PublicKey,
    /// Element serial number, needed by [`SerialSource::DeviceSerial`].
    pub device_serial: Option<[u8; SERIAL_NUMBER_SIZE]>,
}

impl CompactSource {
    pub async fn read<E: SecureElement>(
        gateway: &HardwareGateway<E>,
        definition: &CertificateDefinition,
    ) -> AuthResult<Self> {
        let compact_slot = definition.compact_slot;
        let compact = gateway
            .run("read compact certificate", move |element| {
                element.read_slot(compact_slot)
            })
            .await?;

        let key_slot = definition.public_key_slot;
        let subject_public_key = gateway
            .run("read public key", move |element| {
                element.read_public_key(key_slot)
            })
            .await?;

        let device_serial = match definition.serial_source {
            SerialSource::DeviceSerial => Some(
                gateway
                    .run("read serial number", |element| element.serial_number())
                    .await?,
            ),
            SerialSource::SignerId | SerialSource::PublicKeyHash => None,
        };

        debug!(
            role = %definition.role,
            slot = %compact_slot,
            len = compact.len(),
            "compact certificate read"
        );
        Ok(Self {
            compact,
            subject_public_key,
            device_serial,
        })
    }
}

/// Rebuild the full certificate described by `definition`.
///
/// Nothing is returned unless the whole certificate was built and fits in a
/// [`Certificate`] buffer.
pub fn reconstruct(
    definition: &CertificateDefinition,
    issuer_public_key: &PublicKey,
    source: &CompactSource,
) -> AuthResult<Certificate> {
    let compact = CompactCertificate::try_from(source.compact.as_slice())?;
    definition.check_compact(&compact)?;

    let fields = DynamicFields {
        subject_public_key: &source.subject_public_key,
        issuer_public_key,
        date: compact.encoded_date()?,
        signer_id: compact.signer_id(),
        device_serial: source.device_serial.as_ref(),
    };
    let tbs = definition.build_tbs(&fields)?;
    let der = assemble(tbs, &compact.signature()?)?;
    let certificate = Certificate::from_der(&der)?;

    debug!(
        role = %definition.role,
        len = certificate.len(),
        "certificate reconstructed"
    );
    Ok(certificate)
}

/// DER encoding of a signed certificate.
pub(crate) fn assemble(
    tbs_certificate: TbsCertificate,
    signature: &Signature,
) -> Result<Vec<u8>, DecodeError> {
    let certificate = x509_cert::Certificate {
        tbs_certificate,
        signature_algorithm: signature_algorithm(),
        signature: BitString::from_bytes(signature.to_der().as_bytes())?,
    };
    Ok(certificate.to_der()?)
}

/// SHA-256 digest of a TBS certificate, the message signed by the issuer.
pub(crate) fn tbs_digest(tbs: &TbsCertificate) -> Result<[u8; 32], DecodeError> {
    Ok(Sha256::digest(tbs.to_der()?).into())
}

/// Subject public key of a certificate issued under `definition`.
pub fn extract_public_key(
    definition: &CertificateDefinition,
    certificate: &Certificate,
) -> Result<PublicKey, DecodeError> {
    let parsed = certificate.parse()?;
    let tbs = &parsed.tbs_certificate;

    let expected_cn = format!("CN={}", definition.subject.common_name);
    if !tbs.subject.to_string().contains(&expected_cn) {
        return Err(DecodeError::RoleMismatch {
            role: definition.role,
        });
    }

    let spki = &tbs.subject_public_key_info;
    let curve = Any::encode_from(&SECP_256_R_1)?;
    if spki.algorithm.oid != ID_EC_PUBLIC_KEY || spki.algorithm.parameters.as_ref() != Some(&curve)
    {
        return Err(DecodeError::PublicKey);
    }

    let point = spki
        .subject_public_key
        .as_bytes()
        .ok_or(DecodeError::PublicKey)?;
    PublicKey::from_sec1(point)
}

/// Verify one hop: `certificate` must be signed by `issuer_public_key`.
///
/// Every failure, including a certificate that does not parse, is reported
/// as a [`AuthError::Verification`] naming the hop.
pub fn verify_hop(
    definition: &CertificateDefinition,
    certificate: &Certificate,
    issuer_public_key: &PublicKey,
) -> AuthResult<()> {
    let check = definition.role.trust_check();
    let signed = certificate.parse().and_then(|parsed| {
        let digest = tbs_digest(&parsed.tbs_certificate)?;
        let verifying_key = issuer_public_key.to_verifying_key()?;
        Ok((parsed, digest, verifying_key))
    });
    let (parsed, digest, verifying_key) = match signed {
        Ok(signed) => signed,
        Err(err) => {
            warn!(%check, error = %err, "TrustGate :: Certificate REJECTED :: Undecodable");
            return Err(AuthError::verification(check));
        }
    };

    let verified = parsed.signature_algorithm.oid == ECDSA_WITH_SHA_256
        && parsed
            .signature
            .as_bytes()
            .and_then(|der| Signature::from_der(der).ok())
            .is_some_and(|signature| verifying_key.verify_prehash(&digest, &signature).is_ok());

    if !verified {
        warn!(%check, "TrustGate :: Certificate REJECTED :: Signature Mismatch");
        return Err(AuthError::verification(check));
    }

    info!(%check, "TrustGate :: Certificate Verified");
    Ok(())
}

/// Verify the two-hop chain and return the trusted device public key.
///
/// Hop 2 is never attempted when hop 1 fails.
pub fn verify_chain(
    root_public_key: &PublicKey,
    signer: &Certificate,
    device: &Certificate,
) -> AuthResult<PublicKey> {
    verify_hop(&SIGNER_DEFINITION, signer, root_public_key)?;
    let signer_public_key = extract_public_key(&SIGNER_DEFINITION, signer)?;

    verify_hop(&DEVICE_DEFINITION, device, &signer_public_key)?;
    Ok(extract_public_key(&DEVICE_DEFINITION, device)?)
}
