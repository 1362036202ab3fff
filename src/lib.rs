// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # ble-provisioner
//!
//! Pairs a host with a BLE peripheral and provisions WiFi credentials on it
//! over a custom GATT service.
//!
//! ## Features
//!
//! - **Reset-before-pair**: any existing bond is removed before every attempt
//! - **Custom pairing**: PIN entry is forwarded to the UI; confirm-style
//!   ceremonies are accepted automatically
//! - **One operation per device**: concurrent pair/unpair calls for the same
//!   address are refused immediately
//! - **Background execution**: pairing never blocks the caller's thread
//! - **Provisioning**: SSID/PSK writes, connect command and status polling
//! - **Simulation**: an in-memory stack and peripheral for hardware-free use
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ble_provisioner::sim::{SimulatedDevice, SimulatedPeripheral, SimulatedStack};
//! use ble_provisioner::{DeviceAddress, EngineConfig, PairingEngine, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let address = DeviceAddress::parse("AA:BB:CC:DD:EE:FF")?;
//!     let stack = SimulatedStack::new();
//!     stack.add_device(address, SimulatedDevice::new("sensor"));
//!
//!     let engine = PairingEngine::new(
//!         stack,
//!         Arc::new(SimulatedPeripheral::new(address)),
//!         EngineConfig::default(),
//!     );
//!
//!     let mut session = engine.connect_and_pair("AA:BB:CC:DD:EE:FF", true).await?;
//!     let report = session.provision("HomeNet", "secret123").await?;
//!     println!("Provisioning finished: {:?}", report.outcome);
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### Linux
//! The `bluez` feature enables [`pairing::BluezStack`], which registers a
//! pairing agent with bluetoothd. The user may need to be in the
//! `bluetooth` group.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types
//! - `bluez`: BlueZ pairing backend (Linux only)

// Public modules
pub mod ble;
pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod pairing;
pub mod pin;
pub mod protocol;
pub mod provisioning;
pub mod registry;
pub mod sim;
pub mod utils;

// Re-exports for convenience
pub use ble::address::DeviceAddress;
pub use channel::{MethodCall, MethodChannel, Value};
pub use config::EngineConfig;
pub use engine::PairingEngine;
pub use error::{Error, Result, WriteFailure};
pub use executor::{BackgroundExecutor, ExecutionContext, OperationHandle};
pub use pairing::{PairingCoordinator, PairingDecision, PairingKinds, PairingRequest, ProtectionLevel};
pub use pin::{PinExchange, PinRequest};
pub use protocol::{ControlCommand, PairingResultStatus, ProvisioningStatus, UnpairResultStatus};
pub use provisioning::{
    ProvisioningFailure, ProvisioningOutcome, ProvisioningReport, ProvisioningState,
    WifiProvisioner,
};
pub use registry::{DeviceRegistry, OperationGuard};
pub use utils::redact;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        let _ = std::any::TypeId::of::<PairingEngine>();
        let _ = std::any::TypeId::of::<MethodChannel>();
        let _ = std::any::TypeId::of::<WifiProvisioner>();
        let _ = std::any::TypeId::of::<DeviceRegistry>();
        let _ = std::any::TypeId::of::<Error>();
    }

    #[test]
    fn test_redact_reexport() {
        assert_eq!(redact("secret123"), "<9 chars>");
    }
}
