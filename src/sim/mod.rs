//! Hardware-free backends.
//!
//! [`SimulatedStack`] stands in for the host pairing stack and
//! [`SimulatedPeripheral`] for a provisioning peripheral. Together they let
//! the whole pair-then-provision flow run without a Bluetooth adapter,
//! which is how the UI layer is developed and how this crate's tests run.

pub mod peripheral;
pub mod stack;

pub use peripheral::SimulatedPeripheral;
pub use stack::{Negotiation, SimulatedDevice, SimulatedStack, StackCall};
