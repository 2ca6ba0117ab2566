//! Secure element interface and the gateway every hardware call goes through.
//!
//! The element owns private keys and the data zone. Callers never touch it
//! directly; [`HardwareGateway::run`] bounds each call with a timeout and
//! retries transient communication errors.

use std::fmt;
use std::sync::{Arc, Mutex, TryLockError};
use std::time::Duration;

use nodeauth_core::ElementConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::keys::{Challenge, PublicKey, Response};

/// Element serial number size.
pub const SERIAL_NUMBER_SIZE: usize = 9;
/// Silicon revision size.
pub const REVISION_SIZE: usize = 4;

/// Opaque secure element slot identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Slot(pub u8);

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {}", self.0)
    }
}

/// Lockable element zones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockZone {
    Config,
    Data,
}

impl fmt::Display for LockZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config => f.write_str("config"),
            Self::Data => f.write_str("data"),
        }
    }
}

/// Hardware failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ElementError {
    #[error("communication failure: {0}")]
    Communication(String),

    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("secure element busy with an abandoned operation")]
    Busy,

    #[error("{operation} rejected: {reason}")]
    Rejected {
        operation: &'static str,
        reason: String,
    },

    #[error("{0} is empty")]
    EmptySlot(Slot),

    #[error("random number generator unavailable")]
    RandomUnavailable,
}

impl ElementError {
    pub fn code(&self) -> u32 {
        match self {
            Self::Communication(_) => 0xF0,
            Self::Timeout { .. } => 0xF1,
            Self::Busy => 0xF2,
            Self::Rejected { .. } => 0xF3,
            Self::EmptySlot(_) => 0xF4,
            Self::RandomUnavailable => 0xF5,
        }
    }

    pub(crate) fn rejected(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Rejected {
            operation,
            reason: reason.into(),
        }
    }
}

/// Operations the protocol needs from a secure element.
///
/// Calls are blocking and may be slow. Private keys never leave the element;
/// they are referenced by [`Slot`] only.
pub trait SecureElement: Send + 'static {
    /// Silicon revision bytes.
    fn info(&mut self) -> Result<[u8; REVISION_SIZE], ElementError>;

    fn serial_number(&mut self) -> Result<[u8; SERIAL_NUMBER_SIZE], ElementError>;

    fn is_locked(&mut self, zone: LockZone) -> Result<bool, ElementError>;

    fn lock(&mut self, zone: LockZone) -> Result<(), ElementError>;

    /// `len` bytes from the element's random number generator.
    fn random_bytes(&mut self, len: usize) -> Result<Vec<u8>, ElementError>;

    /// Sign a 32-byte digest with the private key in `slot`.
    fn sign(&mut self, slot: Slot, digest: &Challenge) -> Result<Response, ElementError>;

    /// Public key stored in, or derived from the private key in, `slot`.
    fn read_public_key(&mut self, slot: Slot) -> Result<PublicKey, ElementError>;

    /// Raw contents of a data slot.
    fn read_slot(&mut self, slot: Slot) -> Result<Vec<u8>, ElementError>;
}

/// Personalisation operations, only valid before the data zone is locked.
pub trait Provisionable: SecureElement {
    /// Generate a private key inside `slot` and return its public half.
    fn generate_key(&mut self, slot: Slot) -> Result<PublicKey, ElementError>;

    fn write_slot(&mut self, slot: Slot, data: &[u8]) -> Result<(), ElementError>;
}

/// Serialised, time-bounded access to a secure element.
pub struct HardwareGateway<E> {
    element: Arc<Mutex<E>>,
    timeout: Duration,
    max_attempts: u32,
}

impl<E> fmt::Debug for HardwareGateway<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HardwareGateway")
            .field("timeout", &self.timeout)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl<E: SecureElement> HardwareGateway<E> {
    pub fn new(element: E, config: &ElementConfig) -> Self {
        Self {
            element: Arc::new(Mutex::new(element)),
            timeout: Duration::from_millis(config.operation_timeout_ms),
            max_attempts: config.max_attempts.max(1),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `op` against the element on the blocking pool.
    ///
    /// A call that exceeds the timeout is abandoned and reported as
    /// [`ElementError::Timeout`]; until it finishes, further calls fail with
    /// [`ElementError::Busy`]. Only [`ElementError::Communication`] is retried.
    pub async fn run<T, F>(&self, operation: &'static str, op: F) -> Result<T, ElementError>
    where
        T: Send + 'static,
        F: Fn(&mut E) -> Result<T, ElementError> + Clone + Send + 'static,
    {
        let mut attempt = 1;
        loop {
            match self.run_once(operation, op.clone()).await {
                Err(ElementError::Communication(reason)) if attempt < self.max_attempts => {
                    warn!(
                        operation,
                        attempt,
                        %reason,
                        "STATUS: HardwareGateway :: communication error :: RETRYING"
                    );
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn run_once<T, F>(&self, operation: &'static str, op: F) -> Result<T, ElementError>
    where
        T: Send + 'static,
        F: FnOnce(&mut E) -> Result<T, ElementError> + Send + 'static,
    {
        let element = Arc::clone(&self.element);
        let task = tokio::task::spawn_blocking(move || {
            let mut guard = match element.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::WouldBlock) => return Err(ElementError::Busy),
                Err(TryLockError::Poisoned(poisoned)) => {
                    warn!(
                        operation,
                        "STATUS: HardwareGateway :: previous call panicked :: RECOVERING"
                    );
                    element.clear_poison();
                    poisoned.into_inner()
                }
            };
            op(&mut guard)
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => {
                debug!(operation, ok = result.is_ok(), "HardwareGateway :: call complete");
                result
            }
            Ok(Err(join_error)) => Err(ElementError::Communication(format!(
                "{operation} task failed: {join_error}"
            ))),
            Err(_) => {
                let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(
                    operation,
                    timeout_ms, "STATUS: HardwareGateway :: call abandoned :: TIMEOUT"
                );
                Err(ElementError::Timeout {
                    operation,
                    timeout_ms,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Element whose calls can be slowed down or made to fail.
    struct FlakyElement {
        delay: Duration,
        communication_failures: u32,
        calls: Arc<AtomicU32>,
    }

    impl FlakyElement {
        fn new(calls: Arc<AtomicU32>) -> Self {
            Self {
                delay: Duration::ZERO,
                communication_failures: 0,
                calls,
            }
        }

        fn touch(&mut self) -> Result<(), ElementError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if self.communication_failures > 0 {
                self.communication_failures -= 1;
                return Err(ElementError::Communication("nak".to_string()));
            }
            Ok(())
        }
    }

    impl SecureElement for FlakyElement {
        fn info(&mut self) -> Result<[u8; REVISION_SIZE], ElementError> {
            self.touch()?;
            Ok([0, 0, 0x50, 0])
        }

        fn serial_number(&mut self) -> Result<[u8; SERIAL_NUMBER_SIZE], ElementError> {
            self.touch()?;
            Ok([0; SERIAL_NUMBER_SIZE])
        }

        fn is_locked(&mut self, _zone: LockZone) -> Result<bool, ElementError> {
            self.touch()?;
            Ok(false)
        }

        fn lock(&mut self, zone: LockZone) -> Result<(), ElementError> {
            self.touch()?;
            Err(ElementError::rejected("lock", format!("{zone} zone is fused")))
        }

        fn random_bytes(&mut self, len: usize) -> Result<Vec<u8>, ElementError> {
            self.touch()?;
            Ok(vec![0x5A; len])
        }

        fn sign(&mut self, slot: Slot, _digest: &Challenge) -> Result<Response, ElementError> {
            self.touch()?;
            Err(ElementError::EmptySlot(slot))
        }

        fn read_public_key(&mut self, slot: Slot) -> Result<PublicKey, ElementError> {
            self.touch()?;
            Err(ElementError::EmptySlot(slot))
        }

        fn read_slot(&mut self, slot: Slot) -> Result<Vec<u8>, ElementError> {
            self.touch()?;
            Err(ElementError::EmptySlot(slot))
        }
    }

    fn config(timeout_ms: u64, max_attempts: u32) -> ElementConfig {
        ElementConfig {
            operation_timeout_ms: timeout_ms,
            max_attempts,
        }
    }

    #[tokio::test]
    async fn test_run_returns_element_result() {
        let calls = Arc::new(AtomicU32::new(0));
        let gateway = HardwareGateway::new(FlakyElement::new(calls.clone()), &config(1000, 3));

        let revision = gateway.run("info", |element| element.info()).await.unwrap();
        assert_eq!(revision, [0, 0, 0x50, 0]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_communication_errors_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut element = FlakyElement::new(calls.clone());
        element.communication_failures = 2;
        let gateway = HardwareGateway::new(element, &config(1000, 3));

        let bytes = gateway
            .run("random", |element| element.random_bytes(4))
            .await
            .unwrap();
        assert_eq!(bytes.len(), 4);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_stop_at_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut element = FlakyElement::new(calls.clone());
        element.communication_failures = 10;
        let gateway = HardwareGateway::new(element, &config(1000, 2));

        let result = gateway.run("info", |element| element.info()).await;
        assert!(matches!(result, Err(ElementError::Communication(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let gateway = HardwareGateway::new(FlakyElement::new(calls.clone()), &config(1000, 3));

        let result = gateway
            .run("lock", |element| element.lock(LockZone::Config))
            .await;
        assert!(matches!(result, Err(ElementError::Rejected { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_then_busy_then_recovers() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut element = FlakyElement::new(calls.clone());
        element.delay = Duration::from_millis(300);
        let gateway = HardwareGateway::new(element, &config(20, 3));

        let timed_out = gateway.run("sign", |element| element.info()).await;
        assert_eq!(
            timed_out,
            Err(ElementError::Timeout {
                operation: "sign",
                timeout_ms: 20
            })
        );

        // The abandoned call still holds the element.
        let busy = gateway.run("info", |element| element.info()).await;
        assert_eq!(busy, Err(ElementError::Busy));

        tokio::time::sleep(Duration::from_millis(400)).await;
        let element = Arc::clone(&gateway.element);
        element.lock().unwrap().delay = Duration::ZERO;
        assert!(gateway.run("info", |element| element.info()).await.is_ok());
    }

    #[tokio::test]
    async fn test_panicking_call_does_not_break_gateway() {
        let calls = Arc::new(AtomicU32::new(0));
        let gateway = HardwareGateway::new(FlakyElement::new(calls.clone()), &config(1000, 3));

        let result = gateway
            .run("read slot", |_element| -> Result<Vec<u8>, ElementError> {
                panic!("bus fault")
            })
            .await;
        assert!(matches!(result, Err(ElementError::Communication(_))));

        for _ in 0..3 {
            let revision = gateway.run("info", |element| element.info()).await;
            assert_eq!(revision, Ok([0, 0, 0x50, 0]));
        }
        assert!(!gateway.element.is_poisoned());
    }

    #[test]
    fn test_hardware_codes_are_distinct() {
        let errors = [
            ElementError::Communication(String::new()),
            ElementError::Timeout {
                operation: "x",
                timeout_ms: 1,
            },
            ElementError::Busy,
            ElementError::rejected("x", "y"),
            ElementError::EmptySlot(Slot(0)),
            ElementError::RandomUnavailable,
        ];
        let mut codes: Vec<u32> = errors.iter().map(ElementError::code).collect();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }
}
