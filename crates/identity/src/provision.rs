//! Client provisioning.
//!
//! Creates the root CA and signer keys off-device, generates the device key
//! inside the secure element, and writes the signer public key and both
//! compact certificates to their slots.

use p256::ecdsa::signature::hazmat::PrehashSigner;
use p256::ecdsa::{Signature, SigningKey};
use rand::rngs::OsRng;
use tracing::info;
use x509_cert::der::DateTime;

use crate::compact::{CompactCertificate, EncodedDate};
use crate::definition::{
    CertificateDefinition, DynamicFields, SerialSource, DEVICE_DEFINITION, SIGNER_DEFINITION,
};
use crate::element::{ElementError, HardwareGateway, LockZone, Provisionable};
use crate::error::{AuthResult, DecodeError};
use crate::keys::PublicKey;
use crate::pki::tbs_digest;

/// Off-device certificate authority key.
pub struct CertificateIssuer {
    key: SigningKey,
    public_key: PublicKey,
}

impl CertificateIssuer {
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::random(&mut OsRng))
    }

    pub fn from_signing_key(key: SigningKey) -> Self {
        let public_key = PublicKey::from_verifying_key(key.verifying_key());
        Self { key, public_key }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Sign a certificate for `definition` and return its compact record.
    pub fn issue(
        &self,
        definition: &CertificateDefinition,
        fields: &DynamicFields<'_>,
    ) -> Result<CompactCertificate, DecodeError> {
        let tbs = definition.build_tbs(fields)?;
        let digest = tbs_digest(&tbs)?;
        let signature: Signature = self
            .key
            .sign_prehash(&digest)
            .map_err(|_| DecodeError::Signature)?;

        Ok(CompactCertificate::new(
            &signature,
            fields.date,
            fields.signer_id,
            definition.template_id,
            definition.chain_id,
            definition.serial_source,
        ))
    }
}

/// Parameters for [`provision_chain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvisionOptions {
    pub signer_id: u16,
    /// Issue date and validity of both certificates.
    pub date: EncodedDate,
}

impl ProvisionOptions {
    pub const DEFAULT_SIGNER_ID: u16 = 0xC4_8B;
    pub const DEFAULT_EXPIRE_YEARS: u8 = 28;

    /// Options dated at the current hour.
    pub fn now() -> Result<Self, DecodeError> {
        let issued = DateTime::from_system_time(std::time::SystemTime::now())?;
        Ok(Self {
            signer_id: Self::DEFAULT_SIGNER_ID,
            date: EncodedDate::from_date_time(&issued, Self::DEFAULT_EXPIRE_YEARS)?,
        })
    }
}

/// Public results of provisioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedChain {
    /// Trust anchor the host verifies the signer certificate against.
    pub root_public_key: PublicKey,
    pub signer_public_key: PublicKey,
    pub device_public_key: PublicKey,
    pub signer_id: u16,
}

/// Personalise an element with a fresh root → signer → device chain.
///
/// Refuses to touch an element whose data zone is locked.
pub async fn provision_chain<E: Provisionable>(
    gateway: &HardwareGateway<E>,
    options: ProvisionOptions,
) -> AuthResult<ProvisionedChain> {
    let data_locked = gateway
        .run("lock status", |element| element.is_locked(LockZone::Data))
        .await?;
    if data_locked {
        return Err(ElementError::rejected("provision", "data zone is locked").into());
    }

    let root = CertificateIssuer::generate();
    let signer = CertificateIssuer::generate();

    let device_slot = DEVICE_DEFINITION.public_key_slot;
    let device_public_key = gateway
        .run("generate key", move |element| {
            element.generate_key(device_slot)
        })
        .await?;

    let device_serial = match DEVICE_DEFINITION.serial_source {
        SerialSource::DeviceSerial => Some(
            gateway
                .run("read serial number", |element| element.serial_number())
                .await?,
        ),
        SerialSource::SignerId | SerialSource::PublicKeyHash => None,
    };

    let signer_compact = root.issue(
        &SIGNER_DEFINITION,
        &DynamicFields {
            subject_public_key: signer.public_key(),
            issuer_public_key: root.public_key(),
            date: options.date,
            signer_id: options.signer_id,
            device_serial: None,
        },
    )?;
    let device_compact = signer.issue(
        &DEVICE_DEFINITION,
        &DynamicFields {
            subject_public_key: &device_public_key,
            issuer_public_key: signer.public_key(),
            date: options.date,
            signer_id: options.signer_id,
            device_serial: device_serial.as_ref(),
        },
    )?;

    let writes = [
        (SIGNER_DEFINITION.public_key_slot, signer.public_key().as_bytes().to_vec()),
        (SIGNER_DEFINITION.compact_slot, signer_compact.as_bytes().to_vec()),
        (DEVICE_DEFINITION.compact_slot, device_compact.as_bytes().to_vec()),
    ];
    for (slot, data) in writes {
        gateway
            .run("write slot", move |element| element.write_slot(slot, &data))
            .await?;
    }

    info!(
        signer_id = options.signer_id,
        root = %hex::encode_upper(root.public_key().as_bytes()),
        "STATUS: Provisioning :: certificate chain :: WRITTEN"
    );
    Ok(ProvisionedChain {
        root_public_key: *root.public_key(),
        signer_public_key: *signer.public_key(),
        device_public_key,
        signer_id: options.signer_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{SecureElement, Slot};
    use crate::soft_element::SoftwareSecureElement;
    use nodeauth_core::ElementConfig;

    fn options() -> ProvisionOptions {
        ProvisionOptions {
            signer_id: 0x0A1B,
            date: EncodedDate::new(2024, 3, 4, 5, 10).unwrap(),
        }
    }

    #[test]
    fn test_options_now_is_valid() {
        let options = ProvisionOptions::now().unwrap();
        assert!(options.date.year() >= 2024);
        assert_eq!(options.date.expire_years(), ProvisionOptions::DEFAULT_EXPIRE_YEARS);
    }

    #[test]
    fn test_issue_records_definition_ids() {
        let issuer = CertificateIssuer::generate();
        let compact = issuer
            .issue(
                &SIGNER_DEFINITION,
                &DynamicFields {
                    subject_public_key: issuer.public_key(),
                    issuer_public_key: issuer.public_key(),
                    date: options().date,
                    signer_id: 0x0A1B,
                    device_serial: None,
                },
            )
            .unwrap();

        assert_eq!(compact.template_id(), SIGNER_DEFINITION.template_id);
        assert_eq!(compact.signer_id(), 0x0A1B);
        assert!(SIGNER_DEFINITION.check_compact(&compact).is_ok());
    }

    #[tokio::test]
    async fn test_provision_writes_slots() {
        let gateway =
            HardwareGateway::new(SoftwareSecureElement::new(), &ElementConfig::default());
        let chain = provision_chain(&gateway, options()).await.unwrap();

        let signer_key = gateway
            .run("read", |element| element.read_public_key(Slot(11)))
            .await
            .unwrap();
        assert_eq!(signer_key, chain.signer_public_key);

        let device_key = gateway
            .run("read", |element| element.read_public_key(Slot(0)))
            .await
            .unwrap();
        assert_eq!(device_key, chain.device_public_key);

        for slot in [Slot(10), Slot(12)] {
            let compact = gateway
                .run("read", move |element| element.read_slot(slot))
                .await
                .unwrap();
            assert_eq!(compact.len(), CompactCertificate::SIZE);
        }
    }

    #[tokio::test]
    async fn test_provision_refuses_locked_element() {
        let mut element = SoftwareSecureElement::new();
        element.lock(LockZone::Config).unwrap();
        element.lock(LockZone::Data).unwrap();
        let gateway = HardwareGateway::new(element, &ElementConfig::default());

        let err = provision_chain(&gateway, options()).await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::AuthError::Hardware(ElementError::Rejected { .. })
        ));
    }
}
