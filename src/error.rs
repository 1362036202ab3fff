//! Error types for the ble-provisioner crate.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::pairing_result::PairingResultStatus;

/// Reason a characteristic write was not acknowledged by the peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteFailure {
    /// The peripheral could not be reached (link dropped, out of range).
    Unreachable,
    /// The GATT exchange failed at the protocol level.
    ProtocolError,
    /// The peripheral refused the write (pairing/encryption required).
    AccessDenied,
}

impl WriteFailure {
    /// Classify a btleplug error into a write failure.
    pub fn from_bluetooth(error: &btleplug::Error) -> Self {
        match error {
            btleplug::Error::NotConnected
            | btleplug::Error::DeviceNotFound
            | btleplug::Error::TimedOut(_) => Self::Unreachable,
            btleplug::Error::PermissionDenied => Self::AccessDenied,
            _ => Self::ProtocolError,
        }
    }

    /// Classify any crate error raised by a characteristic write.
    pub fn from_error(error: &Error) -> Self {
        match error {
            Error::WriteFailed { cause, .. } => *cause,
            Error::Bluetooth(e) => Self::from_bluetooth(e),
            Error::NotConnected | Error::DeviceNotFound { .. } => Self::Unreachable,
            _ => Self::ProtocolError,
        }
    }
}

impl std::fmt::Display for WriteFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unreachable => write!(f, "unreachable"),
            Self::ProtocolError => write!(f, "protocol-error"),
            Self::AccessDenied => write!(f, "access-denied"),
        }
    }
}

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// The request arguments were malformed.
    #[error("Invalid arguments: {reason}")]
    InvalidArguments {
        /// Description of what was wrong with the arguments.
        reason: String,
    },

    /// A required argument was not supplied.
    #[error("Missing argument: {name} is required")]
    MissingArgument {
        /// The name of the missing argument.
        name: String,
    },

    /// A pairing or unpairing operation is already running for this device.
    #[error("An operation is already in progress for device {address}")]
    OperationInProgress {
        /// The device address that is busy.
        address: String,
    },

    /// The address string could not be parsed as a Bluetooth address.
    #[error("Invalid Bluetooth address format: {input}")]
    InvalidAddress {
        /// The string that failed to parse.
        input: String,
    },

    /// The native stack could not resolve a device for the address.
    #[error("Device not found: {address}")]
    DeviceNotFound {
        /// The address that could not be resolved.
        address: String,
    },

    /// The native pairing negotiation did not end in a paired state.
    #[error("Pairing failed: {message}")]
    PairingFailed {
        /// The native result status, when the negotiation produced one.
        status: Option<PairingResultStatus>,
        /// Human-readable description of the failure.
        message: String,
        /// Suggested wait before the caller retries, if any.
        retry_after: Option<Duration>,
    },

    /// Querying the pairing status threw inside the native stack.
    #[error("Pairing status check failed: {message}")]
    CheckFailed {
        /// The native error message.
        message: String,
    },

    /// The native unpair call threw.
    #[error("Unpair failed: {message}")]
    UnpairFailed {
        /// The native error message.
        message: String,
    },

    /// The provisioning service or one of its characteristics is missing.
    #[error("Service not found: {uuid}")]
    ServiceNotFound {
        /// The UUID of the service that was not found.
        uuid: String,
    },

    /// A characteristic write was rejected or never acknowledged.
    #[error("Write to {characteristic} failed: {cause}")]
    WriteFailed {
        /// The characteristic that was being written.
        characteristic: String,
        /// Why the write failed.
        cause: WriteFailure,
    },

    /// The native pairing stack raised an error.
    #[error("Native Bluetooth stack error: {0}")]
    Native(String),

    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// Invalid data was received from the peripheral.
    #[error("Invalid data received: {context}")]
    InvalidData {
        /// Description of what was invalid about the data.
        context: String,
    },

    /// Operation requires a connection but the peripheral is not connected.
    #[error("Peripheral not connected")]
    NotConnected,

    /// The requested method does not exist on this channel.
    #[error("Method not implemented: {method}")]
    NotImplemented {
        /// The method name that was requested.
        method: String,
    },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The stable error code reported to the UI layer.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArguments { .. } => "INVALID_ARGUMENTS",
            Self::MissingArgument { .. } => "MISSING_ARGUMENT",
            Self::OperationInProgress { .. } => "OPERATION_IN_PROGRESS",
            Self::InvalidAddress { .. } => "INVALID_ADDRESS",
            Self::DeviceNotFound { .. } => "DEVICE_NOT_FOUND",
            Self::PairingFailed { .. } => "PAIRING_FAILED",
            Self::CheckFailed { .. } => "CHECK_FAILED",
            Self::UnpairFailed { .. } => "UNPAIR_FAILED",
            Self::ServiceNotFound { .. } => "SERVICE_NOT_FOUND",
            Self::WriteFailed { .. } => "WRITE_FAILED",
            Self::Native(_) => "NATIVE_ERROR",
            Self::Bluetooth(_) => "BLUETOOTH",
            Self::BluetoothUnavailable => "BLUETOOTH_UNAVAILABLE",
            Self::InvalidData { .. } => "INVALID_DATA",
            Self::NotConnected => "NOT_CONNECTED",
            Self::NotImplemented { .. } => "NOT_IMPLEMENTED",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Suggested cooldown before retrying, when the failure calls for one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::PairingFailed { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let busy = Error::OperationInProgress {
            address: "AA:BB:CC:DD:EE:FF".to_string(),
        };
        assert_eq!(busy.code(), "OPERATION_IN_PROGRESS");
        assert_eq!(Error::BluetoothUnavailable.code(), "BLUETOOTH_UNAVAILABLE");
        assert_eq!(
            Error::MissingArgument {
                name: "deviceAddress".to_string()
            }
            .code(),
            "MISSING_ARGUMENT"
        );
    }

    #[test]
    fn test_retry_after_only_on_pairing_failure() {
        let failed = Error::PairingFailed {
            status: Some(PairingResultStatus::Failed),
            message: "Failed with unknown status".to_string(),
            retry_after: Some(Duration::from_secs(30)),
        };
        assert_eq!(failed.retry_after(), Some(Duration::from_secs(30)));
        assert_eq!(Error::NotConnected.retry_after(), None);
    }

    #[test]
    fn test_write_failure_classification() {
        assert_eq!(
            WriteFailure::from_bluetooth(&btleplug::Error::NotConnected),
            WriteFailure::Unreachable
        );
        assert_eq!(
            WriteFailure::from_bluetooth(&btleplug::Error::PermissionDenied),
            WriteFailure::AccessDenied
        );
        assert_eq!(
            WriteFailure::from_bluetooth(&btleplug::Error::NoSuchCharacteristic),
            WriteFailure::ProtocolError
        );
        assert_eq!(WriteFailure::AccessDenied.to_string(), "access-denied");
    }
}
