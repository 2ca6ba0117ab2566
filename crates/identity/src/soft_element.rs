//! Software secure element.
//!
//! Holds P-256 keys per slot in process memory so the protocol runs without
//! hardware. It follows the element's zone rules: the data zone can only be
//! locked after the config zone, and nothing is written once data is locked.

use std::collections::HashMap;
use std::fmt;

use p256::ecdsa::signature::hazmat::PrehashSigner;
use p256::ecdsa::{Signature, SigningKey};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{info, warn};

use crate::element::{
    ElementError, LockZone, Provisionable, SecureElement, Slot, REVISION_SIZE, SERIAL_NUMBER_SIZE,
};
use crate::keys::{Challenge, PublicKey, Response, PUBLIC_KEY_SIZE};

/// In-memory stand-in for a hardware secure element.
pub struct SoftwareSecureElement {
    serial: [u8; SERIAL_NUMBER_SIZE],
    config_locked: bool,
    data_locked: bool,
    keys: HashMap<Slot, SigningKey>,
    data: HashMap<Slot, Vec<u8>>,
}

impl SoftwareSecureElement {
    pub const REVISION: [u8; REVISION_SIZE] = [0x00, 0x00, 0x50, 0x00];

    /// New unlocked element with a random serial number.
    pub fn new() -> Self {
        let mut serial = [0u8; SERIAL_NUMBER_SIZE];
        OsRng.fill_bytes(&mut serial);
        Self::with_serial(serial)
    }

    /// New unlocked element. The manufacturer bytes of `serial` are forced to
    /// `01 23 .. EE`.
    pub fn with_serial(mut serial: [u8; SERIAL_NUMBER_SIZE]) -> Self {
        serial[0] = 0x01;
        serial[1] = 0x23;
        serial[SERIAL_NUMBER_SIZE - 1] = 0xEE;
        info!(
            serial = %hex::encode_upper(serial),
            "STATUS: SoftwareSecureElement :: Hardware Root of Trust :: SOFTWARE"
        );
        Self {
            serial,
            config_locked: false,
            data_locked: false,
            keys: HashMap::new(),
            data: HashMap::new(),
        }
    }

    fn ensure_writable(&self, operation: &'static str) -> Result<(), ElementError> {
        if self.data_locked {
            warn!(operation, "SoftwareSecureElement :: write refused :: data zone locked");
            return Err(ElementError::rejected(operation, "data zone is locked"));
        }
        Ok(())
    }
}

impl fmt::Debug for SoftwareSecureElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftwareSecureElement")
            .field("serial", &hex::encode_upper(self.serial))
            .field("config_locked", &self.config_locked)
            .field("data_locked", &self.data_locked)
            .field("key_slots", &self.keys.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Default for SoftwareSecureElement {
    fn default() -> Self {
        Self::new()
    }
}

impl SecureElement for SoftwareSecureElement {
    fn info(&mut self) -> Result<[u8; REVISION_SIZE], ElementError> {
        Ok(Self::REVISION)
    }

    fn serial_number(&mut self) -> Result<[u8; SERIAL_NUMBER_SIZE], ElementError> {
        Ok(self.serial)
    }

    fn is_locked(&mut self, zone: LockZone) -> Result<bool, ElementError> {
        Ok(match zone {
            LockZone::Config => self.config_locked,
            LockZone::Data => self.data_locked,
        })
    }

    fn lock(&mut self, zone: LockZone) -> Result<(), ElementError> {
        match zone {
            LockZone::Config if self.config_locked => {
                Err(ElementError::rejected("lock", "config zone already locked"))
            }
            LockZone::Config => {
                self.config_locked = true;
                info!(%zone, "STATUS: SoftwareSecureElement :: zone :: LOCKED");
                Ok(())
            }
            LockZone::Data if !self.config_locked => Err(ElementError::rejected(
                "lock",
                "config zone must be locked before the data zone",
            )),
            LockZone::Data if self.data_locked => {
                Err(ElementError::rejected("lock", "data zone already locked"))
            }
            LockZone::Data => {
                self.data_locked = true;
                info!(%zone, "STATUS: SoftwareSecureElement :: zone :: LOCKED");
                Ok(())
            }
        }
    }

    fn random_bytes(&mut self, len: usize) -> Result<Vec<u8>, ElementError> {
        let mut bytes = vec![0u8; len];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|_| ElementError::RandomUnavailable)?;
        Ok(bytes)
    }

    fn sign(&mut self, slot: Slot, digest: &Challenge) -> Result<Response, ElementError> {
        let key = self.keys.get(&slot).ok_or(ElementError::EmptySlot(slot))?;
        let signature: Signature = key
            .sign_prehash(digest.as_bytes())
            .map_err(|err| ElementError::rejected("sign", err.to_string()))?;
        Ok(Response::from_signature(&signature))
    }

    fn read_public_key(&mut self, slot: Slot) -> Result<PublicKey, ElementError> {
        if let Some(key) = self.keys.get(&slot) {
            return Ok(PublicKey::from_verifying_key(key.verifying_key()));
        }
        let data = self.data.get(&slot).ok_or(ElementError::EmptySlot(slot))?;
        data.get(..PUBLIC_KEY_SIZE)
            .and_then(|bytes| PublicKey::from_slice(bytes).ok())
            .ok_or_else(|| ElementError::rejected("read public key", format!("{slot} holds no key")))
    }

    fn read_slot(&mut self, slot: Slot) -> Result<Vec<u8>, ElementError> {
        self.data
            .get(&slot)
            .cloned()
            .ok_or(ElementError::EmptySlot(slot))
    }
}

impl Provisionable for SoftwareSecureElement {
    fn generate_key(&mut self, slot: Slot) -> Result<PublicKey, ElementError> {
        self.ensure_writable("generate key")?;
        let key = SigningKey::random(&mut OsRng);
        let public_key = PublicKey::from_verifying_key(key.verifying_key());
        self.keys.insert(slot, key);
        info!(%slot, "STATUS: SoftwareSecureElement :: private key :: GENERATED");
        Ok(public_key)
    }

    fn write_slot(&mut self, slot: Slot, data: &[u8]) -> Result<(), ElementError> {
        self.ensure_writable("write")?;
        self.data.insert(slot, data.to_vec());
        Ok(())
    }
}
