//! Protocol module for the provisioning wire format and native result codes.
//!
//! This module contains:
//! - Provisioning status byte decoding
//! - Control characteristic commands
//! - Native pairing/unpairing result classification

pub mod command;
pub mod pairing_result;
pub mod status;

pub use command::ControlCommand;
pub use pairing_result::{PairingResultStatus, UnpairResultStatus};
pub use status::{ProvisioningStatus, FAILURE_THRESHOLD};
