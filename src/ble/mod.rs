//! BLE module for discovering and talking to provisioning peripherals.

pub mod address;
pub mod connection;
pub mod resolver;
pub mod scanner;
pub mod uuids;

pub use address::DeviceAddress;
pub use connection::{BtleplugConnector, BtleplugLink, ConnectionState, GattConnector, GattLink};
pub use resolver::{GattHandleSet, ResolvedService, ServiceResolver};
pub use scanner::{default_adapter, DiscoveredDevice, ProvisioningScanner};
pub use uuids::*;
