//! In-memory host pairing stack.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::ble::address::DeviceAddress;
use crate::error::{Error, Result};
use crate::pairing::stack::{NativeDevice, PairingHandler, PairingStack};
use crate::pairing::{PairingDecision, PairingKinds, PairingRequest, ProtectionLevel};
use crate::protocol::{PairingResultStatus, UnpairResultStatus};

/// Behaviour of one simulated device.
#[derive(Debug, Clone, Default)]
pub struct SimulatedDevice {
    name: Option<String>,
    paired: bool,
    pin: Option<String>,
    prompts: Vec<PairingRequest>,
    result: Option<PairingResultStatus>,
    pair_error: Option<String>,
    unpair_error: Option<String>,
    resolve_error: Option<String>,
    lost_on_pair: bool,
}

impl SimulatedDevice {
    /// A device that pairs with a plain confirmation.
    pub fn new(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }

    /// Start out bonded with the host.
    pub fn paired(mut self) -> Self {
        self.paired = true;
        self
    }

    /// Require the user to enter `pin`.
    pub fn with_pin(mut self, pin: &str) -> Self {
        self.pin = Some(pin.to_string());
        self
    }

    /// Raise `prompt` during negotiation. Prompts are raised in the order added.
    pub fn with_prompt(mut self, prompt: PairingRequest) -> Self {
        self.prompts.push(prompt);
        self
    }

    /// Report `status` once every prompt has been accepted.
    pub fn with_result(mut self, status: PairingResultStatus) -> Self {
        self.result = Some(status);
        self
    }

    /// Make the pairing call raise a stack error.
    pub fn failing_pair(mut self, message: &str) -> Self {
        self.pair_error = Some(message.to_string());
        self
    }

    /// Make the unpair call raise a stack error.
    pub fn failing_unpair(mut self, message: &str) -> Self {
        self.unpair_error = Some(message.to_string());
        self
    }

    /// Make device resolution raise a stack error.
    pub fn failing_resolve(mut self, message: &str) -> Self {
        self.resolve_error = Some(message.to_string());
        self
    }

    /// Go out of range after resolution, so the pairing call cannot find it.
    pub fn lost_before_pairing(mut self) -> Self {
        self.lost_on_pair = true;
        self
    }

    fn negotiation_prompts(&self) -> Vec<PairingRequest> {
        if !self.prompts.is_empty() {
            self.prompts.clone()
        } else if self.pin.is_some() {
            vec![PairingRequest::ProvidePin]
        } else {
            vec![PairingRequest::ConfirmOnly]
        }
    }
}

/// A call made against the simulated stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackCall {
    /// Device resolution.
    Resolve(DeviceAddress),
    /// Bond removal.
    Unpair(DeviceAddress),
    /// Pairing negotiation.
    Pair {
        /// The device.
        address: DeviceAddress,
        /// Ceremonies offered.
        kinds: PairingKinds,
        /// Protection demanded.
        protection: ProtectionLevel,
    },
}

/// Record of one completed negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiation {
    /// The device.
    pub address: DeviceAddress,
    /// Prompts raised and the handler's answers.
    pub prompts: Vec<(PairingRequest, PairingDecision)>,
    /// The status reported.
    pub result: PairingResultStatus,
}

/// [`PairingStack`] that keeps its bonds in memory.
#[derive(Debug, Default)]
pub struct SimulatedStack {
    devices: Mutex<HashMap<DeviceAddress, SimulatedDevice>>,
    hold: Mutex<Option<Arc<Semaphore>>>,
    calls: Mutex<Vec<StackCall>>,
    negotiations: Mutex<Vec<Negotiation>>,
}

impl SimulatedStack {
    /// Create an empty stack.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make a device known to the stack, replacing any previous one.
    pub fn add_device(&self, address: DeviceAddress, device: SimulatedDevice) {
        self.devices.lock().insert(address, device);
    }

    /// Check if the stack holds a bond with `address`.
    pub fn is_paired(&self, address: DeviceAddress) -> bool {
        self.devices
            .lock()
            .get(&address)
            .map(|d| d.paired)
            .unwrap_or(false)
    }

    /// Suspend every negotiation before its first prompt until
    /// [`SimulatedStack::release_pairing`] is called.
    pub fn hold_pairing(&self) {
        *self.hold.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let held negotiations continue.
    pub fn release_pairing(&self) {
        if let Some(gate) = self.hold.lock().take() {
            gate.close();
        }
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<StackCall> {
        self.calls.lock().clone()
    }

    /// Number of pairing calls made for `address`.
    pub fn pair_calls(&self, address: DeviceAddress) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, StackCall::Pair { address: a, .. } if *a == address))
            .count()
    }

    /// Every completed negotiation, in order.
    pub fn negotiations(&self) -> Vec<Negotiation> {
        self.negotiations.lock().clone()
    }

    fn device(&self, address: DeviceAddress) -> Option<SimulatedDevice> {
        self.devices.lock().get(&address).cloned()
    }
}

#[async_trait]
impl PairingStack for SimulatedStack {
    async fn resolve(&self, address: DeviceAddress) -> Result<Option<NativeDevice>> {
        self.calls.lock().push(StackCall::Resolve(address));

        let device = match self.device(address) {
            Some(device) => device,
            None => return Ok(None),
        };
        if let Some(message) = device.resolve_error {
            return Err(Error::Native(message));
        }

        Ok(Some(NativeDevice {
            address,
            name: device.name,
            is_paired: device.paired,
        }))
    }

    async fn unpair(&self, address: DeviceAddress) -> Result<UnpairResultStatus> {
        self.calls.lock().push(StackCall::Unpair(address));

        let mut devices = self.devices.lock();
        let device = devices
            .get_mut(&address)
            .ok_or_else(|| Error::Native(format!("no device {}", address)))?;

        if let Some(message) = &device.unpair_error {
            return Err(Error::Native(message.clone()));
        }

        if device.paired {
            device.paired = false;
            Ok(UnpairResultStatus::Unpaired)
        } else {
            Ok(UnpairResultStatus::AlreadyUnpaired)
        }
    }

    async fn pair(
        &self,
        address: DeviceAddress,
        kinds: PairingKinds,
        protection: ProtectionLevel,
        handler: Arc<dyn PairingHandler>,
    ) -> Result<PairingResultStatus> {
        self.calls.lock().push(StackCall::Pair {
            address,
            kinds,
            protection,
        });

        let device = self
            .device(address)
            .filter(|device| !device.lost_on_pair)
            .ok_or_else(|| Error::DeviceNotFound {
                address: address.to_string(),
            })?;

        if let Some(message) = device.pair_error.clone() {
            return Err(Error::Native(message));
        }
        if device.paired {
            return Ok(PairingResultStatus::AlreadyPaired);
        }

        let hold = self.hold.lock().clone();
        if let Some(gate) = hold {
            debug!("Negotiation for {} held", address);
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let mut answered = Vec::new();
        let mut status = PairingResultStatus::Paired;

        for prompt in device.negotiation_prompts() {
            if let Some(kind) = prompt.kind() {
                if !kinds.contains(kind) {
                    status = PairingResultStatus::RequiredHandlerNotRegistered;
                    break;
                }
            }

            let decision = handler.on_pairing_requested(prompt.clone()).await;
            answered.push((prompt.clone(), decision.clone()));

            status = match (&prompt, &decision) {
                (PairingRequest::ProvidePin, PairingDecision::Decline) => {
                    PairingResultStatus::AuthenticationTimeout
                }
                (_, PairingDecision::Decline) => PairingResultStatus::RejectedByHandler,
                (PairingRequest::ProvidePin, PairingDecision::Accept) => {
                    PairingResultStatus::InvalidCeremonyData
                }
                (PairingRequest::ProvidePin, PairingDecision::AcceptWithPin(pin))
                    if device.pin.as_deref().is_some_and(|expected| expected != pin) =>
                {
                    PairingResultStatus::AuthenticationFailure
                }
                _ => PairingResultStatus::Paired,
            };

            if !status.is_success() {
                break;
            }
        }

        if status == PairingResultStatus::Paired {
            if let Some(forced) = device.result {
                status = forced;
            }
        }

        if status.is_success() {
            if let Some(device) = self.devices.lock().get_mut(&address) {
                device.paired = true;
            }
        }

        self.negotiations.lock().push(Negotiation {
            address,
            prompts: answered,
            result: status,
        });

        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Answer(PairingDecision);

    #[async_trait]
    impl PairingHandler for Answer {
        async fn on_pairing_requested(&self, _request: PairingRequest) -> PairingDecision {
            self.0.clone()
        }
    }

    fn addr() -> DeviceAddress {
        DeviceAddress::parse("AA:BB:CC:DD:EE:FF").unwrap()
    }

    #[tokio::test]
    async fn test_pin_mismatch_is_authentication_failure() {
        let stack = SimulatedStack::new();
        stack.add_device(addr(), SimulatedDevice::new("node").with_pin("748506"));

        let status = stack
            .pair(
                addr(),
                PairingKinds::ALL,
                ProtectionLevel::EncryptionAndAuthentication,
                Arc::new(Answer(PairingDecision::AcceptWithPin("000000".to_string()))),
            )
            .await
            .unwrap();

        assert_eq!(status, PairingResultStatus::AuthenticationFailure);
        assert!(!stack.is_paired(addr()));
    }

    #[tokio::test]
    async fn test_unoffered_ceremony_needs_handler() {
        let stack = SimulatedStack::new();
        stack.add_device(addr(), SimulatedDevice::new("node").with_pin("1234"));

        let status = stack
            .pair(
                addr(),
                PairingKinds::CONFIRM_ONLY,
                ProtectionLevel::Encryption,
                Arc::new(Answer(PairingDecision::Accept)),
            )
            .await
            .unwrap();

        assert_eq!(status, PairingResultStatus::RequiredHandlerNotRegistered);
        assert_eq!(stack.negotiations()[0].prompts, vec![]);
    }

    #[tokio::test]
    async fn test_unpair_round_trip() {
        let stack = SimulatedStack::new();
        stack.add_device(addr(), SimulatedDevice::new("node").paired());

        assert_eq!(stack.unpair(addr()).await.unwrap(), UnpairResultStatus::Unpaired);
        assert_eq!(
            stack.unpair(addr()).await.unwrap(),
            UnpairResultStatus::AlreadyUnpaired
        );
        assert_eq!(
            stack.calls(),
            vec![StackCall::Unpair(addr()), StackCall::Unpair(addr())]
        );
    }
}
