//! Node authentication over a secure-element-backed certificate chain.
//!
//! A client holds a device certificate issued by a signer, itself issued by a
//! root CA. The secure element stores only compact 72-byte records; the full
//! X.509 certificates are rebuilt from them before the host verifies the chain
//! and runs a challenge-response against the device key.
//!
//! # Stages
//!
//! 1. `client_rebuild_certs`: rebuild signer and device certificates
//! 2. `host_verify_cert_chain`: root → signer → device
//! 3. `host_generate_challenge`: 32 random bytes from the element
//! 4. `client_generate_response`: the element signs the challenge
//! 5. `host_verify_response`: check the signature against the trusted device key
//!
//! [`AuthSession`] enforces this order with proof tokens. Provisioning
//! ([`provision_chain`]) creates and writes a fresh chain.
//!
//! # Hardware
//!
//! All element calls go through a [`HardwareGateway`], which bounds them with
//! a timeout. [`SoftwareSecureElement`] runs the protocol without hardware.

pub mod challenge;
pub mod compact;
pub mod definition;
pub mod element;
pub mod error;
pub mod keys;
pub mod pki;
pub mod provision;
pub mod session;
pub mod soft_element;
pub mod store;

pub use challenge::{generate_challenge, sign_challenge, verify_response};
pub use compact::{CompactCertificate, EncodedDate};
pub use definition::{
    CertRole, CertificateDefinition, NameTemplate, SerialSource, DEVICE_DEFINITION,
    SIGNER_DEFINITION,
};
pub use element::{
    ElementError, HardwareGateway, LockZone, Provisionable, SecureElement, Slot, REVISION_SIZE,
    SERIAL_NUMBER_SIZE,
};
pub use error::{AuthError, AuthResult, DecodeError, TrustCheck};
pub use keys::{Challenge, PublicKey, Response};
pub use pki::{
    extract_public_key, reconstruct, verify_chain, verify_hop, Certificate, CompactSource,
    MAX_CERT_SIZE,
};
pub use provision::{provision_chain, CertificateIssuer, ProvisionOptions, ProvisionedChain};
pub use session::{
    AuthSession, AuthState, CertsReconstructed, ChainVerified, ChallengeGenerated, Orchestrator,
    ResponseGenerated, SessionStatus, Stage, StateTransition, Trusted,
};
pub use soft_element::SoftwareSecureElement;
pub use store::CertificateStore;
