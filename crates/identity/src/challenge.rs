//! Challenge-response engine.
//!
//! The host draws a random challenge, the client's secure element signs it
//! with the device private key, and the host checks the signature against the
//! device public key taken from the verified certificate chain.

use p256::ecdsa::signature::hazmat::PrehashVerifier;
use tracing::{info, warn};

use crate::element::{ElementError, HardwareGateway, SecureElement, Slot};
use crate::error::{AuthError, AuthResult, TrustCheck};
use crate::keys::{Challenge, PublicKey, Response, CHALLENGE_SIZE};

/// Draw a challenge from the element's random number generator.
///
/// A short read is treated as an unavailable generator; there is no fallback
/// source.
pub async fn generate_challenge<E: SecureElement>(
    gateway: &HardwareGateway<E>,
) -> AuthResult<Challenge> {
    let bytes = gateway
        .run("random", |element| element.random_bytes(CHALLENGE_SIZE))
        .await?;
    let bytes: [u8; CHALLENGE_SIZE] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| ElementError::RandomUnavailable)?;
    Ok(Challenge::from_bytes(bytes))
}

/// Have the key in `key_slot` sign `challenge`. The key never leaves the element.
pub async fn sign_challenge<E: SecureElement>(
    gateway: &HardwareGateway<E>,
    key_slot: Slot,
    challenge: &Challenge,
) -> AuthResult<Response> {
    let challenge = *challenge;
    let response = gateway
        .run("sign", move |element| element.sign(key_slot, &challenge))
        .await?;
    Ok(response)
}

/// Check `response` as a signature over `challenge` by `device_public_key`.
pub fn verify_response(
    device_public_key: &PublicKey,
    challenge: &Challenge,
    response: &Response,
) -> AuthResult<()> {
    let check = TrustCheck::ChallengeResponse;
    let verifying_key = device_public_key.to_verifying_key()?;

    let verified = response
        .to_signature()
        .is_ok_and(|signature| {
            verifying_key
                .verify_prehash(challenge.as_bytes(), &signature)
                .is_ok()
        });
    if !verified {
        warn!(%check, "TrustGate :: Response REJECTED :: Signature Mismatch");
        return Err(AuthError::verification(check));
    }

    info!(%check, "TrustGate :: Response Verified");
    Ok(())
}
