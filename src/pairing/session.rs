//! Per-attempt handling of the stack's pairing prompts.
//!
//! A [`PairingSession`] lives for exactly one negotiation. PIN-entry
//! prompts are forwarded to the UI through the [`PinExchange`]; every
//! other ceremony is accepted automatically.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::ble::address::DeviceAddress;
use crate::pairing::stack::PairingHandler;
use crate::pairing::{PairingDecision, PairingRequest};
use crate::pin::PinExchange;
use crate::utils::redact;

/// Prompt handler for one pairing attempt.
#[derive(Debug)]
pub struct PairingSession {
    address: DeviceAddress,
    pins: Arc<PinExchange>,
    pin_timeout: Duration,
    prompts: Mutex<Vec<(PairingRequest, PairingDecision)>>,
}

impl PairingSession {
    /// Create a session for `address`.
    pub fn new(address: DeviceAddress, pins: Arc<PinExchange>, pin_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            address,
            pins,
            pin_timeout,
            prompts: Mutex::new(Vec::new()),
        })
    }

    /// The device being paired.
    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    /// Prompts answered so far, with the decision taken for each.
    pub fn prompts(&self) -> Vec<(PairingRequest, PairingDecision)> {
        self.prompts.lock().clone()
    }

    /// Check if any prompt was declined.
    pub fn declined_any(&self) -> bool {
        self.prompts
            .lock()
            .iter()
            .any(|(_, decision)| !decision.is_accept())
    }
}

#[async_trait]
impl PairingHandler for PairingSession {
    async fn on_pairing_requested(&self, request: PairingRequest) -> PairingDecision {
        debug!("Pairing prompt for {}: {}", self.address, request);

        let decision = match &request {
            PairingRequest::ProvidePin => {
                request_pin_from_user(&self.pins, self.address, self.pin_timeout).await
            }
            other => auto_accept(other),
        };

        self.prompts.lock().push((request, decision.clone()));
        decision
    }
}

/// Ask the UI for the PIN shown on the device.
///
/// Declines when the user does not answer within `timeout` or submits an
/// empty PIN.
pub async fn request_pin_from_user(
    pins: &PinExchange,
    address: DeviceAddress,
    timeout: Duration,
) -> PairingDecision {
    info!("Device {} requires a PIN, waiting for user input", address);

    match pins.request_pin(address, timeout).await {
        Some(pin) if pin.is_empty() => {
            warn!("Empty PIN submitted for {}; declining", address);
            PairingDecision::Decline
        }
        Some(pin) => {
            info!("Accepting pairing for {} with PIN {}", address, redact(&pin));
            PairingDecision::AcceptWithPin(pin)
        }
        None => {
            warn!("No PIN provided for {}; declining", address);
            PairingDecision::Decline
        }
    }
}

/// Accept a prompt that needs no user input.
pub fn auto_accept(request: &PairingRequest) -> PairingDecision {
    match request {
        PairingRequest::ConfirmPinMatch { pin } => {
            info!("Auto-accepting PIN match ({})", redact(pin));
        }
        PairingRequest::DisplayPin { pin } => {
            info!("Device displays PIN ({}); accepting", redact(pin));
        }
        PairingRequest::ConfirmOnly => {
            info!("Auto-accepting confirm-only pairing");
        }
        PairingRequest::Other { kind } => {
            warn!("Unrecognised pairing ceremony {}; accepting", kind);
        }
        PairingRequest::ProvidePin => {
            warn!("PIN entry prompt accepted without a PIN");
        }
    }
    PairingDecision::Accept
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn addr() -> DeviceAddress {
        DeviceAddress::parse("AA:BB:CC:DD:EE:FF").unwrap()
    }

    #[test]
    fn test_auto_accept_every_non_pin_ceremony() {
        let prompts = [
            PairingRequest::ConfirmOnly,
            PairingRequest::DisplayPin {
                pin: "123456".to_string(),
            },
            PairingRequest::ConfirmPinMatch {
                pin: "654321".to_string(),
            },
            PairingRequest::Other {
                kind: "out-of-band".to_string(),
            },
        ];

        for prompt in prompts.iter() {
            assert_eq!(auto_accept(prompt), PairingDecision::Accept, "{}", prompt);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_provide_pin_forwards_user_pin() {
        let pins = PinExchange::new();
        let mut requests = pins.subscribe();
        let session = PairingSession::new(addr(), pins.clone(), Duration::from_secs(60));

        let prompt = tokio::spawn({
            let session = session.clone();
            async move { session.on_pairing_requested(PairingRequest::ProvidePin).await }
        });

        requests.recv().await.unwrap();
        pins.submit_pin("748506");

        assert_eq!(
            prompt.await.unwrap(),
            PairingDecision::AcceptWithPin("748506".to_string())
        );
        assert_eq!(
            session.prompts(),
            vec![(
                PairingRequest::ProvidePin,
                PairingDecision::AcceptWithPin("748506".to_string())
            )]
        );
        assert!(!session.declined_any());
    }

    #[tokio::test(start_paused = true)]
    async fn test_provide_pin_declines_on_timeout() {
        let pins = PinExchange::new();
        let session = PairingSession::new(addr(), pins, Duration::from_secs(60));

        let start = tokio::time::Instant::now();
        let decision = session
            .on_pairing_requested(PairingRequest::ProvidePin)
            .await;

        assert_eq!(decision, PairingDecision::Decline);
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert!(session.declined_any());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_pin_is_declined() {
        let pins = PinExchange::new();
        let mut requests = pins.subscribe();

        let prompt = tokio::spawn({
            let pins = pins.clone();
            async move { request_pin_from_user(&pins, addr(), Duration::from_secs(60)).await }
        });

        requests.recv().await.unwrap();
        assert!(pins.submit_pin(""));
        assert_eq!(prompt.await.unwrap(), PairingDecision::Decline);
    }
}
