//! End-to-end authentication against the software secure element.
//!
//! These tests drive the public API the way a client/host pair would:
//! - provisioning a fresh chain and trusting it via configuration
//! - consecutive attempts, where a later attempt must not reuse earlier state
//! - corrupted and truncated compact certificates

use nodeauth_core::{Config, ElementConfig};
use nodeauth_identity::{
    provision_chain, AuthError, AuthSession, AuthState, CertRole, DecodeError, EncodedDate,
    HardwareGateway, Orchestrator, ProvisionOptions, Provisionable, PublicKey, Slot,
    SoftwareSecureElement, Stage, TrustCheck, DEVICE_DEFINITION,
};

fn options() -> ProvisionOptions {
    ProvisionOptions {
        signer_id: 0x3C01,
        date: EncodedDate::new(2025, 11, 20, 8, 15).unwrap(),
    }
}

async fn provisioned() -> (HardwareGateway<SoftwareSecureElement>, PublicKey) {
    let gateway = HardwareGateway::new(SoftwareSecureElement::new(), &ElementConfig::default());
    let chain = provision_chain(&gateway, options()).await.unwrap();
    (gateway, chain.root_public_key)
}

async fn overwrite_slot(gateway: &HardwareGateway<SoftwareSecureElement>, slot: Slot, data: Vec<u8>) {
    gateway
        .run("write slot", move |element| element.write_slot(slot, &data))
        .await
        .unwrap();
}

async fn read_slot(gateway: &HardwareGateway<SoftwareSecureElement>, slot: Slot) -> Vec<u8> {
    use nodeauth_identity::SecureElement;
    gateway
        .run("read slot", move |element| element.read_slot(slot))
        .await
        .unwrap()
}

#[tokio::test]
async fn integration_root_key_from_config() {
    let (gateway, root) = provisioned().await;

    let toml = format!(
        "[trust]\nroot_public_key = \"{}\"\n",
        hex::encode(root.as_bytes())
    );
    let config = Config::parse(&toml).unwrap();
    let configured = config
        .trust
        .root_public_key_bytes()
        .unwrap()
        .map(PublicKey::from_bytes);
    assert_eq!(configured, Some(root));

    let mut session = AuthSession::new(gateway, configured);
    let trusted = session.authenticate().await.unwrap();
    assert_eq!(trusted.attempt(), 1);
}

#[tokio::test]
async fn integration_second_attempt_does_not_reuse_state() {
    let (gateway, root) = provisioned().await;
    let device_slot = DEVICE_DEFINITION.compact_slot;
    let original = read_slot(&gateway, device_slot).await;

    let mut session = AuthSession::new(gateway, Some(root));
    session.authenticate().await.unwrap();

    // Point the device certificate at a different signer id.
    let mut corrupted = original.clone();
    corrupted[67] ^= 0xFF;
    overwrite_slot(session.gateway(), device_slot, corrupted).await;

    let certs = session.client_rebuild_certs().await.unwrap();
    assert!(session.store().trusted_device_key().is_none());
    assert!(session.store().challenge().is_none());
    assert!(session.store().response().is_none());

    let err = session.host_verify_cert_chain(certs).await.unwrap_err();
    assert!(matches!(
        err,
        AuthError::Verification {
            check: TrustCheck::DeviceCertificate
        }
    ));

    overwrite_slot(session.gateway(), device_slot, original).await;
    assert_eq!(session.authenticate().await.unwrap().attempt(), 3);
}

#[tokio::test]
async fn integration_truncated_compact_leaves_certificate_absent() {
    let (gateway, root) = provisioned().await;
    let device_slot = DEVICE_DEFINITION.compact_slot;
    let mut truncated = read_slot(&gateway, device_slot).await;
    truncated.truncate(40);
    overwrite_slot(&gateway, device_slot, truncated).await;

    let mut session = AuthSession::new(gateway, Some(root));
    let err = session.client_rebuild_certs().await.unwrap_err();
    assert!(matches!(
        err,
        AuthError::Decode(DecodeError::CompactSize {
            expected: 72,
            actual: 40
        })
    ));
    assert!(session.store().certificate(CertRole::Device).is_empty());
    assert!(session.store().compact(CertRole::Device).is_none());
}

#[tokio::test]
async fn integration_orchestrator_console_sequence() {
    let (gateway, root) = provisioned().await;
    let mut orchestrator = Orchestrator::new(AuthSession::new(gateway, Some(root)));

    // Out of order before anything ran.
    let err = orchestrator.advance(Stage::GenerateResponse).await.unwrap_err();
    assert_eq!(err.code(), 0x10);

    for stage in Stage::ALL {
        orchestrator.advance(stage).await.unwrap();
    }
    assert_eq!(orchestrator.state(), AuthState::Trusted);
    assert_eq!(
        orchestrator.history().len(),
        Stage::ALL.len(),
        "one transition per successful stage"
    );
}

#[tokio::test]
async fn integration_locked_element_keeps_working() {
    let (gateway, root) = provisioned().await;
    gateway
        .run("lock", |element| {
            use nodeauth_identity::{LockZone, SecureElement};
            element.lock(LockZone::Config)?;
            element.lock(LockZone::Data)
        })
        .await
        .unwrap();

    let mut session = AuthSession::new(gateway, Some(root));
    assert!(session.authenticate().await.is_ok());

    let err = provision_chain(session.gateway(), options()).await.unwrap_err();
    assert!(matches!(err, AuthError::Hardware(_)));
}
