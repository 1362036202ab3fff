//! Seam between the pairing coordinator and the host's Bluetooth stack.

use async_trait::async_trait;
use std::sync::Arc;

use crate::ble::address::DeviceAddress;
use crate::error::Result;
use crate::pairing::{PairingDecision, PairingKinds, PairingRequest, ProtectionLevel};
use crate::protocol::{PairingResultStatus, UnpairResultStatus};

/// A device as known to the host stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeDevice {
    /// The device address.
    pub address: DeviceAddress,
    /// Name reported by the stack, if any.
    pub name: Option<String>,
    /// Whether the host currently holds a bond with the device.
    pub is_paired: bool,
}

/// Answers the stack's prompts during a pairing negotiation.
///
/// The stack waits for the returned future before continuing the
/// negotiation, so a handler may suspend (for example while the user
/// types a PIN).
#[async_trait]
pub trait PairingHandler: Send + Sync {
    /// Decide how to answer one pairing prompt.
    async fn on_pairing_requested(&self, request: PairingRequest) -> PairingDecision;
}

/// Native pairing operations of the host Bluetooth stack.
#[async_trait]
pub trait PairingStack: Send + Sync {
    /// Resolve a device by address. `Ok(None)` when the stack does not know it.
    async fn resolve(&self, address: DeviceAddress) -> Result<Option<NativeDevice>>;

    /// Remove any bond with the device.
    async fn unpair(&self, address: DeviceAddress) -> Result<UnpairResultStatus>;

    /// Run a custom pairing negotiation.
    ///
    /// Every prompt the stack raises is routed through `handler`.
    async fn pair(
        &self,
        address: DeviceAddress,
        kinds: PairingKinds,
        protection: ProtectionLevel,
        handler: Arc<dyn PairingHandler>,
    ) -> Result<PairingResultStatus>;
}
