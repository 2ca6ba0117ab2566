//! Authentication stage sequencing.
//!
//! # Stages
//!
//! ```text
//! Idle
//!     ↓ (client_rebuild_certs)
//! CertsReconstructed
//!     ↓ (host_verify_cert_chain)
//! ChainVerified
//!     ↓ (host_generate_challenge)
//! ChallengeGenerated
//!     ↓ (client_generate_response)
//! ResponseGenerated
//!     ↓ (host_verify_response)
//! Trusted
//! ```
//!
//! [`AuthSession`] enforces the order at compile time: each stage consumes
//! the proof token returned by the previous one. [`Orchestrator`] wraps a
//! session for callers that pick stages at runtime, such as the console, and
//! reports out-of-order requests as [`AuthError::Sequencing`].

use std::collections::VecDeque;
use std::fmt;

use nodeauth_core::Config;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::challenge::{generate_challenge, sign_challenge, verify_response};
use crate::compact::CompactCertificate;
use crate::definition::{CertificateDefinition, DEVICE_DEFINITION, SIGNER_DEFINITION};
use crate::element::{HardwareGateway, Provisionable, SecureElement};
use crate::error::{AuthError, AuthResult};
use crate::keys::PublicKey;
use crate::pki::{extract_public_key, reconstruct, verify_chain, Certificate, CompactSource};
use crate::provision::{provision_chain, ProvisionOptions, ProvisionedChain};
use crate::store::CertificateStore;

/// Maximum number of state transitions kept by an [`Orchestrator`].
const MAX_HISTORY_SIZE: usize = 100;

/// The five protocol stages of one authentication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    RebuildCerts,
    VerifyChain,
    GenerateChallenge,
    GenerateResponse,
    VerifyResponse,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::RebuildCerts,
        Stage::VerifyChain,
        Stage::GenerateChallenge,
        Stage::GenerateResponse,
        Stage::VerifyResponse,
    ];

    /// Stage that must have succeeded in the current attempt first.
    pub fn prerequisite(&self) -> Option<Stage> {
        match self {
            Self::RebuildCerts => None,
            Self::VerifyChain => Some(Self::RebuildCerts),
            Self::GenerateChallenge => Some(Self::VerifyChain),
            Self::GenerateResponse => Some(Self::GenerateChallenge),
            Self::VerifyResponse => Some(Self::GenerateResponse),
        }
    }

    /// Name used in operator diagnostics.
    pub fn function_name(&self) -> &'static str {
        match self {
            Self::RebuildCerts => "client_rebuild_certs",
            Self::VerifyChain => "host_verify_cert_chain",
            Self::GenerateChallenge => "host_generate_challenge",
            Self::GenerateResponse => "client_generate_response",
            Self::VerifyResponse => "verify_response",
        }
    }

    fn sequencing_error(self) -> AuthError {
        AuthError::Sequencing {
            attempted: self,
            required: self.prerequisite().unwrap_or(Stage::RebuildCerts),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RebuildCerts => "client-build",
            Self::VerifyChain => "host-chain-verify",
            Self::GenerateChallenge => "host-gen-chal",
            Self::GenerateResponse => "client-gen-resp",
            Self::VerifyResponse => "host-verify-resp",
        };
        f.write_str(name)
    }
}

/// Proof that both certificates were rebuilt in the current attempt.
#[derive(Debug)]
#[must_use]
pub struct CertsReconstructed {
    epoch: u64,
}

/// Proof that the chain verified and the device key is trusted.
#[derive(Debug)]
#[must_use]
pub struct ChainVerified {
    epoch: u64,
}

#[derive(Debug)]
#[must_use]
pub struct ChallengeGenerated {
    epoch: u64,
}

#[derive(Debug)]
#[must_use]
pub struct ResponseGenerated {
    epoch: u64,
}

/// Outcome of a successful attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trusted {
    attempt: u64,
    device_public_key: PublicKey,
}

impl Trusted {
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn device_public_key(&self) -> &PublicKey {
        &self.device_public_key
    }
}

/// One client/host pair running the authentication protocol.
#[derive(Debug)]
pub struct AuthSession<E> {
    gateway: HardwareGateway<E>,
    store: CertificateStore,
    attempt: u64,
    epoch: u64,
}

impl<E: SecureElement> AuthSession<E> {
    pub fn new(gateway: HardwareGateway<E>, root_public_key: Option<PublicKey>) -> Self {
        Self {
            gateway,
            store: CertificateStore::new(root_public_key),
            attempt: 0,
            epoch: 0,
        }
    }

    /// Session over `element` with the call bounds and trust anchor from
    /// `config`.
    pub fn from_config(element: E, config: &Config) -> AuthResult<Self> {
        let root_public_key = config
            .trust
            .root_public_key_bytes()?
            .map(PublicKey::from_bytes);
        Ok(Self::new(
            HardwareGateway::new(element, &config.element),
            root_public_key,
        ))
    }

    pub fn gateway(&self) -> &HardwareGateway<E> {
        &self.gateway
    }

    pub fn store(&self) -> &CertificateStore {
        &self.store
    }

    /// Current attempt number; 0 before the first rebuild.
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn set_root_public_key(&mut self, key: PublicKey) {
        self.store.set_root_public_key(key);
    }

    /// Clear attempt state. Every token issued so far becomes stale.
    fn invalidate(&mut self) -> u64 {
        self.epoch += 1;
        self.store.reset();
        self.epoch
    }

    /// Start a new attempt.
    fn begin_attempt(&mut self) -> u64 {
        self.attempt += 1;
        self.invalidate()
    }

    fn check_epoch(&self, epoch: u64, stage: Stage) -> AuthResult<()> {
        if epoch != self.epoch {
            warn!(
                epoch,
                current = self.epoch,
                %stage,
                "AuthSession :: stale stage token"
            );
            return Err(stage.sequencing_error());
        }
        Ok(())
    }

    fn root_public_key(&self) -> AuthResult<PublicKey> {
        self.store
            .root_public_key()
            .copied()
            .ok_or(AuthError::MissingTrustAnchor)
    }

    async fn rebuild_one(
        &mut self,
        definition: &CertificateDefinition,
        issuer_public_key: &PublicKey,
    ) -> AuthResult<Certificate> {
        let source = CompactSource::read(&self.gateway, definition).await?;
        let certificate = reconstruct(definition, issuer_public_key, &source)?;
        let compact = CompactCertificate::try_from(source.compact.as_slice())?;
        self.store.commit(definition.role, compact, certificate.clone());
        Ok(certificate)
    }

    /// Read both compact certificates from the element and rebuild them,
    /// signer first.
    pub async fn client_rebuild_certs(&mut self) -> AuthResult<CertsReconstructed> {
        let epoch = self.begin_attempt();
        let stage = Stage::RebuildCerts;
        let root = self.root_public_key()?;

        let signer = self.rebuild_one(&SIGNER_DEFINITION, &root).await?;
        let signer_public_key = extract_public_key(&SIGNER_DEFINITION, &signer)?;
        let device = self
            .rebuild_one(&DEVICE_DEFINITION, &signer_public_key)
            .await?;

        info!(
            attempt = self.attempt,
            %stage,
            signer_len = signer.len(),
            device_len = device.len(),
            "STATUS: AuthSession :: certificates :: REBUILT"
        );
        Ok(CertsReconstructed { epoch })
    }

    /// Verify signer against the root key, then device against the signer.
    pub async fn host_verify_cert_chain(
        &mut self,
        token: CertsReconstructed,
    ) -> AuthResult<ChainVerified> {
        let stage = Stage::VerifyChain;
        self.check_epoch(token.epoch, stage)?;
        let root = self.root_public_key()?;

        let device_public_key = verify_chain(
            &root,
            self.store.certificate(SIGNER_DEFINITION.role),
            self.store.certificate(DEVICE_DEFINITION.role),
        )?;
        self.store.set_trusted_device_key(device_public_key);

        info!(
            attempt = self.attempt,
            %stage,
            "STATUS: AuthSession :: certificate chain :: VERIFIED"
        );
        Ok(ChainVerified { epoch: token.epoch })
    }

    pub async fn host_generate_challenge(
        &mut self,
        token: ChainVerified,
    ) -> AuthResult<ChallengeGenerated> {
        let stage = Stage::GenerateChallenge;
        self.check_epoch(token.epoch, stage)?;

        let challenge = generate_challenge(&self.gateway).await?;
        self.store.set_challenge(challenge);

        info!(attempt = self.attempt, %stage, "STATUS: AuthSession :: challenge :: ISSUED");
        Ok(ChallengeGenerated { epoch: token.epoch })
    }

    /// Sign the stored challenge with the device private key.
    pub async fn client_generate_response(
        &mut self,
        token: ChallengeGenerated,
    ) -> AuthResult<ResponseGenerated> {
        let stage = Stage::GenerateResponse;
        self.check_epoch(token.epoch, stage)?;

        let challenge = *self
            .store
            .challenge()
            .ok_or_else(|| stage.sequencing_error())?;
        let key_slot = DEVICE_DEFINITION
            .private_key_slot
            .unwrap_or(DEVICE_DEFINITION.public_key_slot);
        let response = sign_challenge(&self.gateway, key_slot, &challenge).await?;
        self.store.set_response(response);

        info!(
            attempt = self.attempt,
            %stage,
            slot = %key_slot,
            "STATUS: AuthSession :: response :: SIGNED"
        );
        Ok(ResponseGenerated { epoch: token.epoch })
    }

    /// Check the response against the device key from the verified chain.
    pub fn host_verify_response(&mut self, token: ResponseGenerated) -> AuthResult<Trusted> {
        let stage = Stage::VerifyResponse;
        self.check_epoch(token.epoch, stage)?;

        let (Some(device_public_key), Some(challenge), Some(response)) = (
            self.store.trusted_device_key().copied(),
            self.store.challenge(),
            self.store.response(),
        ) else {
            return Err(stage.sequencing_error());
        };
        verify_response(&device_public_key, challenge, response)?;

        info!(
            attempt = self.attempt,
            %stage,
            "STATUS: AuthSession :: client :: TRUSTED"
        );
        Ok(Trusted {
            attempt: self.attempt,
            device_public_key,
        })
    }

    /// Run all five stages in order.
    pub async fn authenticate(&mut self) -> AuthResult<Trusted> {
        let certs = self.client_rebuild_certs().await?;
        let chain = self.host_verify_cert_chain(certs).await?;
        let challenge = self.host_generate_challenge(chain).await?;
        let response = self.client_generate_response(challenge).await?;
        self.host_verify_response(response)
    }
}

impl<E: Provisionable> AuthSession<E> {
    /// Provision the element and adopt the new root key as trust anchor.
    ///
    /// Any attempt in progress is discarded. Provisioning does not count as
    /// an attempt.
    pub async fn client_provision(
        &mut self,
        options: ProvisionOptions,
    ) -> AuthResult<ProvisionedChain> {
        let chain = provision_chain(&self.gateway, options).await?;
        self.invalidate();
        self.store.set_root_public_key(chain.root_public_key);
        Ok(chain)
    }
}

/// Observable progress of an [`Orchestrator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    Idle,
    CertsReconstructed,
    ChainVerified,
    ChallengeGenerated,
    ResponseGenerated,
    Trusted,
    Failed,
}

/// Record of a state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: AuthState,
    pub to: AuthState,
    pub attempt: u64,
}

/// Snapshot reported by the console `status` command.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: AuthState,
    pub attempt: u64,
    pub root_key_loaded: bool,
    pub signer_certificate_len: usize,
    pub device_certificate_len: usize,
    pub transitions: usize,
}

enum Held {
    Idle,
    Certs(CertsReconstructed),
    Chain(ChainVerified),
    Challenge(ChallengeGenerated),
    Response(ResponseGenerated),
    Trusted(Trusted),
    Failed,
}

impl Held {
    fn state(&self) -> AuthState {
        match self {
            Self::Idle => AuthState::Idle,
            Self::Certs(_) => AuthState::CertsReconstructed,
            Self::Chain(_) => AuthState::ChainVerified,
            Self::Challenge(_) => AuthState::ChallengeGenerated,
            Self::Response(_) => AuthState::ResponseGenerated,
            Self::Trusted(_) => AuthState::Trusted,
            Self::Failed => AuthState::Failed,
        }
    }
}

/// Runtime state machine over an [`AuthSession`].
pub struct Orchestrator<E> {
    session: AuthSession<E>,
    held: Held,
    history: VecDeque<StateTransition>,
}

impl<E: SecureElement> Orchestrator<E> {
    pub fn new(session: AuthSession<E>) -> Self {
        Self {
            session,
            held: Held::Idle,
            history: VecDeque::with_capacity(MAX_HISTORY_SIZE),
        }
    }

    pub fn state(&self) -> AuthState {
        self.held.state()
    }

    pub fn session(&self) -> &AuthSession<E> {
        &self.session
    }

    pub fn history(&self) -> &VecDeque<StateTransition> {
        &self.history
    }

    /// Outcome of the last attempt, while it is still the current state.
    pub fn trusted(&self) -> Option<&Trusted> {
        match &self.held {
            Held::Trusted(trusted) => Some(trusted),
            _ => None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        let store = self.session.store();
        SessionStatus {
            state: self.state(),
            attempt: self.session.attempt(),
            root_key_loaded: store.root_public_key().is_some(),
            signer_certificate_len: store.certificate(SIGNER_DEFINITION.role).len(),
            device_certificate_len: store.certificate(DEVICE_DEFINITION.role).len(),
            transitions: self.history.len(),
        }
    }

    /// Run `stage` if its prerequisite holds.
    ///
    /// An out-of-order request fails with [`AuthError::Sequencing`] and leaves
    /// the state unchanged. Any other failure moves to [`AuthState::Failed`].
    pub async fn advance(&mut self, stage: Stage) -> AuthResult<AuthState> {
        let held = std::mem::replace(&mut self.held, Held::Idle);
        let result = match (stage, held) {
            (Stage::RebuildCerts, _) => self.session.client_rebuild_certs().await.map(Held::Certs),
            (Stage::VerifyChain, Held::Certs(token)) => self
                .session
                .host_verify_cert_chain(token)
                .await
                .map(Held::Chain),
            (Stage::GenerateChallenge, Held::Chain(token)) => self
                .session
                .host_generate_challenge(token)
                .await
                .map(Held::Challenge),
            (Stage::GenerateResponse, Held::Challenge(token)) => self
                .session
                .client_generate_response(token)
                .await
                .map(Held::Response),
            (Stage::VerifyResponse, Held::Response(token)) => {
                self.session.host_verify_response(token).map(Held::Trusted)
            }
            (stage, held) => {
                let current = held.state();
                self.held = held;
                warn!(%stage, state = ?current, "Orchestrator :: stage out of order");
                return Err(stage.sequencing_error());
            }
        };

        match result {
            Ok(next) => {
                self.transition(next);
                Ok(self.state())
            }
            Err(err) => {
                error!(%stage, code = err.code(), error = %err, "Orchestrator :: stage FAILED");
                self.transition(Held::Failed);
                Err(err)
            }
        }
    }

    fn transition(&mut self, next: Held) {
        let from = self.history.back().map_or(AuthState::Idle, |last| last.to);
        self.held = next;
        if self.history.len() >= MAX_HISTORY_SIZE {
            self.history.pop_front();
        }
        self.history.push_back(StateTransition {
            from,
            to: self.held.state(),
            attempt: self.session.attempt(),
        });
    }
}

impl<E: Provisionable> Orchestrator<E> {
    /// Provision the element and return to [`AuthState::Idle`].
    pub async fn provision(&mut self, options: ProvisionOptions) -> AuthResult<ProvisionedChain> {
        let chain = self.session.client_provision(options).await?;
        self.transition(Held::Idle);
        Ok(chain)
    }
}
