//! Buffers shared by the authentication stages.

use crate::compact::CompactCertificate;
use crate::definition::CertRole;
use crate::keys::{Challenge, PublicKey, Response};
use crate::pki::Certificate;

/// Certificates, keys and challenge state for one client.
///
/// Allocated once and overwritten in place. [`CertificateStore::reset`] must
/// run at the start of every attempt so nothing from a previous run is reused.
#[derive(Debug, Default)]
pub struct CertificateStore {
    root_public_key: Option<PublicKey>,
    signer_compact: Option<CompactCertificate>,
    device_compact: Option<CompactCertificate>,
    signer_certificate: Certificate,
    device_certificate: Certificate,
    trusted_device_key: Option<PublicKey>,
    challenge: Option<Challenge>,
    response: Option<Response>,
}

impl CertificateStore {
    pub fn new(root_public_key: Option<PublicKey>) -> Self {
        Self {
            root_public_key,
            ..Self::default()
        }
    }

    /// Forget everything derived during an attempt. The root key is kept.
    pub fn reset(&mut self) {
        self.signer_compact = None;
        self.device_compact = None;
        self.signer_certificate.clear();
        self.device_certificate.clear();
        self.trusted_device_key = None;
        self.challenge = None;
        self.response = None;
    }

    pub fn root_public_key(&self) -> Option<&PublicKey> {
        self.root_public_key.as_ref()
    }

    pub fn set_root_public_key(&mut self, key: PublicKey) {
        self.root_public_key = Some(key);
    }

    pub fn certificate(&self, role: CertRole) -> &Certificate {
        match role {
            CertRole::Signer => &self.signer_certificate,
            CertRole::Device => &self.device_certificate,
        }
    }

    pub fn compact(&self, role: CertRole) -> Option<&CompactCertificate> {
        match role {
            CertRole::Signer => self.signer_compact.as_ref(),
            CertRole::Device => self.device_compact.as_ref(),
        }
    }

    /// Record a fully reconstructed certificate and the compact record it came from.
    pub fn commit(
        &mut self,
        role: CertRole,
        compact: CompactCertificate,
        certificate: Certificate,
    ) {
        match role {
            CertRole::Signer => {
                self.signer_compact = Some(compact);
                self.signer_certificate = certificate;
            }
            CertRole::Device => {
                self.device_compact = Some(compact);
                self.device_certificate = certificate;
            }
        }
    }

    /// Device public key from a chain that passed verification.
    pub fn trusted_device_key(&self) -> Option<&PublicKey> {
        self.trusted_device_key.as_ref()
    }

    pub fn set_trusted_device_key(&mut self, key: PublicKey) {
        self.trusted_device_key = Some(key);
    }

    pub fn challenge(&self) -> Option<&Challenge> {
        self.challenge.as_ref()
    }

    pub fn set_challenge(&mut self, challenge: Challenge) {
        self.challenge = Some(challenge);
        self.response = None;
    }

    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    pub fn set_response(&mut self, response: Response) {
        self.response = Some(response);
    }
}
