//! Certificate definitions: the fixed half of every certificate.
//!
//! A definition pairs with a [`CompactCertificate`] to rebuild a full X.509
//! certificate. It supplies names, serial number rules, extensions and the
//! secure element slots that hold the compact record and the keys.

use std::fmt;
use std::str::FromStr;

use const_oid::db::rfc5280::{
    ID_CE_AUTHORITY_KEY_IDENTIFIER, ID_CE_BASIC_CONSTRAINTS, ID_CE_SUBJECT_KEY_IDENTIFIER,
};
use const_oid::db::rfc5912::{ECDSA_WITH_SHA_256, ID_EC_PUBLIC_KEY, SECP_256_R_1};
use const_oid::ObjectIdentifier;
use sha2::{Digest, Sha256};
use x509_cert::certificate::{TbsCertificate, Version};
use x509_cert::der::asn1::{BitString, OctetString};
use x509_cert::der::{Any, Encode};
use x509_cert::ext::pkix::{AuthorityKeyIdentifier, BasicConstraints, SubjectKeyIdentifier};
use x509_cert::ext::Extension;
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};

use crate::compact::{CompactCertificate, EncodedDate};
use crate::element::{Slot, SERIAL_NUMBER_SIZE};
use crate::error::{DecodeError, TrustCheck};
use crate::keys::PublicKey;

/// Key identifier length (leftmost 160 bits of SHA-256, RFC 7093 method 1).
pub const KEY_IDENTIFIER_SIZE: usize = 20;

/// Position of a certificate in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CertRole {
    Signer,
    Device,
}

impl CertRole {
    /// The chain hop that checks a certificate of this role.
    pub fn trust_check(&self) -> TrustCheck {
        match self {
            Self::Signer => TrustCheck::SignerCertificate,
            Self::Device => TrustCheck::DeviceCertificate,
        }
    }
}

impl fmt::Display for CertRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signer => f.write_str("signer"),
            Self::Device => f.write_str("device"),
        }
    }
}

/// How the certificate serial number is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SerialSource {
    /// `0x40 || device serial number` (10 bytes).
    DeviceSerial = 0x8,
    /// `0x40 || signer id` (3 bytes).
    SignerId = 0x9,
    /// First 16 bytes of `SHA-256(public key || encoded date)`, top bits `01`.
    PublicKeyHash = 0xA,
}

impl SerialSource {
    pub fn serial_number(&self, fields: &DynamicFields<'_>) -> Result<Vec<u8>, DecodeError> {
        let serial = match self {
            Self::DeviceSerial => {
                let device_serial = fields.device_serial.ok_or_else(|| {
                    DecodeError::Malformed("device serial number required".to_string())
                })?;
                let mut serial = Vec::with_capacity(1 + SERIAL_NUMBER_SIZE);
                serial.push(0x40);
                serial.extend_from_slice(device_serial);
                serial
            }
            Self::SignerId => {
                let [high, low] = fields.signer_id.to_be_bytes();
                vec![0x40, high, low]
            }
            Self::PublicKeyHash => {
                let mut hasher = Sha256::new();
                hasher.update(fields.subject_public_key.as_bytes());
                hasher.update(fields.date.to_bytes());
                let mut serial = hasher.finalize()[..16].to_vec();
                serial[0] = (serial[0] & 0x7F) | 0x40;
                serial
            }
        };
        Ok(serial)
    }
}

/// Distinguished name of the form `O=<organization>,CN=<common name>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameTemplate {
    pub organization: &'static str,
    pub common_name: &'static str,
    /// Append the signer id as four upper-case hex digits to the common name.
    pub append_signer_id: bool,
}

impl NameTemplate {
    pub fn render(&self, signer_id: u16) -> String {
        if self.append_signer_id {
            format!(
                "O={},CN={} {:04X}",
                self.organization, self.common_name, signer_id
            )
        } else {
            format!("O={},CN={}", self.organization, self.common_name)
        }
    }

    pub fn to_name(&self, signer_id: u16) -> Result<Name, DecodeError> {
        Ok(Name::from_str(&self.render(signer_id))?)
    }
}

/// Per-certificate values combined with a definition.
#[derive(Debug, Clone, Copy)]
pub struct DynamicFields<'a> {
    pub subject_public_key: &'a PublicKey,
    pub issuer_public_key: &'a PublicKey,
    pub date: EncodedDate,
    pub signer_id: u16,
    pub device_serial: Option<&'a [u8; SERIAL_NUMBER_SIZE]>,
}

/// Immutable template for one certificate role.
#[derive(Debug)]
pub struct CertificateDefinition {
    pub role: CertRole,
    pub template_id: u8,
    pub chain_id: u8,
    pub serial_source: SerialSource,
    pub issuer: NameTemplate,
    pub subject: NameTemplate,
    /// Slot holding the compact certificate.
    pub compact_slot: Slot,
    /// Slot the subject public key is read from.
    pub public_key_slot: Slot,
    /// Slot of the private key certified by this definition, if held on the element.
    pub private_key_slot: Option<Slot>,
    /// Definition of the issuing certificate, when the issuer is not the root.
    pub ca_definition: Option<&'static CertificateDefinition>,
}

const ORGANIZATION: &str = "Example Inc";

const ROOT_NAME: NameTemplate = NameTemplate {
    organization: ORGANIZATION,
    common_name: "Example Root CA",
    append_signer_id: false,
};

const SIGNER_NAME: NameTemplate = NameTemplate {
    organization: ORGANIZATION,
    common_name: "Example Signer",
    append_signer_id: true,
};

const DEVICE_NAME: NameTemplate = NameTemplate {
    organization: ORGANIZATION,
    common_name: "Example Device",
    append_signer_id: false,
};

/// Signer certificate, issued by the root CA.
pub static SIGNER_DEFINITION: CertificateDefinition = CertificateDefinition {
    role: CertRole::Signer,
    template_id: 1,
    chain_id: 0,
    serial_source: SerialSource::SignerId,
    issuer: ROOT_NAME,
    subject: SIGNER_NAME,
    compact_slot: Slot(12),
    public_key_slot: Slot(11),
    private_key_slot: None,
    ca_definition: None,
};

/// Device certificate, issued by the signer.
pub static DEVICE_DEFINITION: CertificateDefinition = CertificateDefinition {
    role: CertRole::Device,
    template_id: 2,
    chain_id: 0,
    serial_source: SerialSource::DeviceSerial,
    issuer: SIGNER_NAME,
    subject: DEVICE_NAME,
    compact_slot: Slot(10),
    public_key_slot: Slot(0),
    private_key_slot: Some(Slot(0)),
    ca_definition: Some(&SIGNER_DEFINITION),
};

impl CertificateDefinition {
    /// Check that a compact record was written for this definition.
    pub fn check_compact(&self, compact: &CompactCertificate) -> Result<(), DecodeError> {
        let expectations = [
            ("format version", CompactCertificate::FORMAT_VERSION, compact.format_version()),
            ("template id", self.template_id, compact.template_id()),
            ("chain id", self.chain_id, compact.chain_id()),
            ("serial source", self.serial_source as u8, compact.serial_source()),
        ];

        for (field, expected, found) in expectations {
            if expected != found {
                return Err(DecodeError::TemplateMismatch {
                    field,
                    expected,
                    found,
                });
            }
        }
        Ok(())
    }

    /// Build the to-be-signed portion of a certificate.
    pub fn build_tbs(&self, fields: &DynamicFields<'_>) -> Result<TbsCertificate, DecodeError> {
        let serial = self.serial_source.serial_number(fields)?;

        let mut extensions = vec![
            extension(
                ID_CE_SUBJECT_KEY_IDENTIFIER,
                false,
                &SubjectKeyIdentifier(OctetString::new(
                    key_identifier(fields.subject_public_key).to_vec(),
                )?),
            )?,
            extension(
                ID_CE_AUTHORITY_KEY_IDENTIFIER,
                false,
                &AuthorityKeyIdentifier {
                    key_identifier: Some(OctetString::new(
                        key_identifier(fields.issuer_public_key).to_vec(),
                    )?),
                    authority_cert_issuer: None,
                    authority_cert_serial_number: None,
                },
            )?,
        ];
        if self.role == CertRole::Signer {
            extensions.push(extension(
                ID_CE_BASIC_CONSTRAINTS,
                true,
                &BasicConstraints {
                    ca: true,
                    path_len_constraint: Some(0),
                },
            )?);
        }

        Ok(TbsCertificate {
            version: Version::V3,
            serial_number: SerialNumber::new(&serial)?,
            signature: signature_algorithm(),
            issuer: self.issuer.to_name(fields.signer_id)?,
            validity: fields.date.validity()?,
            subject: self.subject.to_name(fields.signer_id)?,
            subject_public_key_info: SubjectPublicKeyInfoOwned {
                algorithm: AlgorithmIdentifierOwned {
                    oid: ID_EC_PUBLIC_KEY,
                    parameters: Some(Any::encode_from(&SECP_256_R_1)?),
                },
                subject_public_key: BitString::from_bytes(&fields.subject_public_key.to_sec1())?,
            },
            issuer_unique_id: None,
            subject_unique_id: None,
            extensions: Some(extensions),
        })
    }
}

/// `ecdsa-with-SHA256`, the only supported signature algorithm.
pub fn signature_algorithm() -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned {
        oid: ECDSA_WITH_SHA_256,
        parameters: None,
    }
}

pub fn key_identifier(key: &PublicKey) -> [u8; KEY_IDENTIFIER_SIZE] {
    let digest = Sha256::digest(key.to_sec1());
    let mut id = [0u8; KEY_IDENTIFIER_SIZE];
    id.copy_from_slice(&digest[..KEY_IDENTIFIER_SIZE]);
    id
}

fn extension(
    extn_id: ObjectIdentifier,
    critical: bool,
    value: &impl Encode,
) -> Result<Extension, DecodeError> {
    Ok(Extension {
        extn_id,
        critical,
        extn_value: OctetString::new(value.to_der()?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::SigningKey;
    use rand::rngs::OsRng;
    use x509_cert::der::Decode;

    fn random_key() -> PublicKey {
        PublicKey::from_verifying_key(SigningKey::random(&mut OsRng).verifying_key())
    }

    fn fields<'a>(
        subject: &'a PublicKey,
        issuer: &'a PublicKey,
        serial: Option<&'a [u8; SERIAL_NUMBER_SIZE]>,
    ) -> DynamicFields<'a> {
        DynamicFields {
            subject_public_key: subject,
            issuer_public_key: issuer,
            date: EncodedDate::new(2024, 1, 15, 12, 10).unwrap(),
            signer_id: 0x0A1B,
            device_serial: serial,
        }
    }

    #[test]
    fn test_signer_id_serial() {
        let key = random_key();
        let serial = SerialSource::SignerId
            .serial_number(&fields(&key, &key, None))
            .unwrap();
        assert_eq!(serial, vec![0x40, 0x0A, 0x1B]);
    }

    #[test]
    fn test_device_serial_requires_element_serial() {
        let key = random_key();
        let sn = [0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF, 0xEE];

        let serial = SerialSource::DeviceSerial
            .serial_number(&fields(&key, &key, Some(&sn)))
            .unwrap();
        assert_eq!(serial[0], 0x40);
        assert_eq!(&serial[1..], &sn);

        let missing = SerialSource::DeviceSerial.serial_number(&fields(&key, &key, None));
        assert!(matches!(missing, Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_public_key_hash_serial_is_positive() {
        let key = random_key();
        let serial = SerialSource::PublicKeyHash
            .serial_number(&fields(&key, &key, None))
            .unwrap();
        assert_eq!(serial.len(), 16);
        assert_eq!(serial[0] & 0xC0, 0x40);
    }

    #[test]
    fn test_name_template_appends_signer_id() {
        assert_eq!(
            SIGNER_NAME.render(0x0A1B),
            "O=Example Inc,CN=Example Signer 0A1B"
        );
        assert_eq!(ROOT_NAME.render(0x0A1B), "O=Example Inc,CN=Example Root CA");
        assert!(SIGNER_NAME.to_name(0xFFFF).is_ok());
    }

    #[test]
    fn test_device_issuer_is_signer_subject() {
        assert_eq!(DEVICE_DEFINITION.issuer, SIGNER_DEFINITION.subject);
        assert_eq!(
            DEVICE_DEFINITION.ca_definition.map(|def| def.role),
            Some(CertRole::Signer)
        );
    }

    #[test]
    fn test_build_tbs_is_deterministic() {
        let subject = random_key();
        let issuer = random_key();
        let sn = [7u8; SERIAL_NUMBER_SIZE];
        let fields = fields(&subject, &issuer, Some(&sn));

        let first = DEVICE_DEFINITION.build_tbs(&fields).unwrap().to_der().unwrap();
        let second = DEVICE_DEFINITION.build_tbs(&fields).unwrap().to_der().unwrap();
        assert_eq!(first, second);

        let decoded = TbsCertificate::from_der(&first).unwrap();
        assert_eq!(
            decoded.subject_public_key_info.subject_public_key.raw_bytes(),
            &subject.to_sec1()[..]
        );
        assert!(decoded.subject.to_string().contains("Example Device"));
    }

    #[test]
    fn test_signer_tbs_is_a_ca() {
        let subject = random_key();
        let issuer = random_key();
        let tbs = SIGNER_DEFINITION
            .build_tbs(&fields(&subject, &issuer, None))
            .unwrap();

        let extensions = tbs.extensions.unwrap();
        let basic = extensions
            .iter()
            .find(|ext| ext.extn_id == ID_CE_BASIC_CONSTRAINTS)
            .expect("signer carries basic constraints");
        assert!(basic.critical);
    }

    #[test]
    fn test_check_compact_rejects_other_template() {
        let signing_key = SigningKey::random(&mut OsRng);
        let signature: p256::ecdsa::Signature =
            p256::ecdsa::signature::Signer::sign(&signing_key, b"tbs");
        let date = EncodedDate::new(2024, 1, 15, 12, 10).unwrap();
        let compact = CompactCertificate::new(
            &signature,
            date,
            1,
            SIGNER_DEFINITION.template_id,
            SIGNER_DEFINITION.chain_id,
            SIGNER_DEFINITION.serial_source,
        );

        assert!(SIGNER_DEFINITION.check_compact(&compact).is_ok());
        assert_eq!(
            DEVICE_DEFINITION.check_compact(&compact),
            Err(DecodeError::TemplateMismatch {
                field: "template id",
                expected: 2,
                found: 1
            })
        );
    }
}
