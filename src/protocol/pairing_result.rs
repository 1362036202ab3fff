//! Native pairing and unpairing result codes.
//!
//! The host stack reports the outcome of a pairing negotiation as a small
//! integer. Only [`PairingResultStatus::Paired`] and
//! [`PairingResultStatus::AlreadyPaired`] count as success; every other
//! status is surfaced to the caller verbatim with a readable message.
//!
//! Code 19 (`Failed`) is the value the stack has been observed to return
//! after rapid repeated attempts with no other diagnostics. Its meaning is
//! inferred from retry behaviour, so it is grouped with unrecognised codes
//! for cooldown advice rather than treated as a documented condition.

/// Outcome of a native pairing negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PairingResultStatus {
    /// Pairing completed (0).
    Paired,
    /// The device is not ready to pair (1).
    NotReadyToPair,
    /// The device did not pair (2).
    NotPaired,
    /// The device was already paired (3).
    AlreadyPaired,
    /// The connection was rejected (4).
    ConnectionRejected,
    /// Too many connections on the adapter (5).
    TooManyConnections,
    /// Adapter hardware failure (6).
    HardwareFailure,
    /// Authentication timed out (7).
    AuthenticationTimeout,
    /// Authentication is not allowed (8).
    AuthenticationNotAllowed,
    /// Authentication failed, usually a wrong PIN (9).
    AuthenticationFailure,
    /// The device exposes no supported profiles (10).
    NoSupportedProfiles,
    /// The requested protection level could not be met (11).
    ProtectionLevelCouldNotBeMet,
    /// Access denied (12).
    AccessDenied,
    /// Ceremony data was invalid, usually a missing PIN (13).
    InvalidCeremonyData,
    /// The negotiation was canceled (14).
    PairingCanceled,
    /// Another pairing is still running inside the stack (15).
    OperationAlreadyInProgress,
    /// The stack needed a pairing handler that was not registered (16).
    RequiredHandlerNotRegistered,
    /// The pairing handler rejected the negotiation (17).
    RejectedByHandler,
    /// The remote device is associated with another host (18).
    RemoteDeviceHasAssociation,
    /// Generic failure (19).
    Failed,
    /// A code outside the known table.
    Unrecognized(i32),
}

impl PairingResultStatus {
    /// Create from the native numeric code.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Paired,
            1 => Self::NotReadyToPair,
            2 => Self::NotPaired,
            3 => Self::AlreadyPaired,
            4 => Self::ConnectionRejected,
            5 => Self::TooManyConnections,
            6 => Self::HardwareFailure,
            7 => Self::AuthenticationTimeout,
            8 => Self::AuthenticationNotAllowed,
            9 => Self::AuthenticationFailure,
            10 => Self::NoSupportedProfiles,
            11 => Self::ProtectionLevelCouldNotBeMet,
            12 => Self::AccessDenied,
            13 => Self::InvalidCeremonyData,
            14 => Self::PairingCanceled,
            15 => Self::OperationAlreadyInProgress,
            16 => Self::RequiredHandlerNotRegistered,
            17 => Self::RejectedByHandler,
            18 => Self::RemoteDeviceHasAssociation,
            19 => Self::Failed,
            other => Self::Unrecognized(other),
        }
    }

    /// The native numeric code.
    pub fn code(&self) -> i32 {
        match self {
            Self::Paired => 0,
            Self::NotReadyToPair => 1,
            Self::NotPaired => 2,
            Self::AlreadyPaired => 3,
            Self::ConnectionRejected => 4,
            Self::TooManyConnections => 5,
            Self::HardwareFailure => 6,
            Self::AuthenticationTimeout => 7,
            Self::AuthenticationNotAllowed => 8,
            Self::AuthenticationFailure => 9,
            Self::NoSupportedProfiles => 10,
            Self::ProtectionLevelCouldNotBeMet => 11,
            Self::AccessDenied => 12,
            Self::InvalidCeremonyData => 13,
            Self::PairingCanceled => 14,
            Self::OperationAlreadyInProgress => 15,
            Self::RequiredHandlerNotRegistered => 16,
            Self::RejectedByHandler => 17,
            Self::RemoteDeviceHasAssociation => 18,
            Self::Failed => 19,
            Self::Unrecognized(code) => *code,
        }
    }

    /// Check if the negotiation left the device paired.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Paired | Self::AlreadyPaired)
    }

    /// Check if the caller should wait before retrying.
    ///
    /// Immediate retries after these codes tend to reproduce them.
    pub fn needs_cooldown(&self) -> bool {
        matches!(self, Self::Failed | Self::Unrecognized(_))
    }

    /// Human-readable description for the UI layer.
    pub fn message(&self) -> String {
        match self {
            Self::Paired => "Paired successfully".to_string(),
            Self::NotReadyToPair => "Device not ready to pair".to_string(),
            Self::NotPaired => "Pairing rejected or failed".to_string(),
            Self::AlreadyPaired => "Already paired".to_string(),
            Self::ConnectionRejected => "Connection rejected".to_string(),
            Self::TooManyConnections => "Too many connections".to_string(),
            Self::HardwareFailure => "Bluetooth hardware failure".to_string(),
            Self::AuthenticationTimeout => "Authentication timeout".to_string(),
            Self::AuthenticationNotAllowed => "Authentication not allowed".to_string(),
            Self::AuthenticationFailure => "Authentication failure - incorrect PIN?".to_string(),
            Self::NoSupportedProfiles => "No supported profiles".to_string(),
            Self::ProtectionLevelCouldNotBeMet => "Protection level could not be met".to_string(),
            Self::AccessDenied => "Access denied".to_string(),
            Self::InvalidCeremonyData => {
                "Invalid ceremony data - PIN required but not provided".to_string()
            }
            Self::PairingCanceled => "Pairing canceled".to_string(),
            Self::OperationAlreadyInProgress => "Operation already in progress".to_string(),
            Self::RequiredHandlerNotRegistered => "Required handler not registered".to_string(),
            Self::RejectedByHandler => "Rejected by handler".to_string(),
            Self::RemoteDeviceHasAssociation => "Remote device has association".to_string(),
            Self::Failed => "Failed with unknown status".to_string(),
            Self::Unrecognized(code) => format!("Failed with unknown status (code={})", code),
        }
    }
}

impl std::fmt::Display for PairingResultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (status {})", self.message(), self.code())
    }
}

/// Outcome of a native unpair call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UnpairResultStatus {
    /// The device was unpaired (0).
    Unpaired,
    /// The device was not paired to begin with (1).
    AlreadyUnpaired,
    /// Another operation is running inside the stack (2).
    OperationAlreadyInProgress,
    /// Access denied (3).
    AccessDenied,
    /// Generic failure (4).
    Failed,
    /// A code outside the known table.
    Unrecognized(i32),
}

impl UnpairResultStatus {
    /// Create from the native numeric code.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Unpaired,
            1 => Self::AlreadyUnpaired,
            2 => Self::OperationAlreadyInProgress,
            3 => Self::AccessDenied,
            4 => Self::Failed,
            other => Self::Unrecognized(other),
        }
    }

    /// The native numeric code.
    pub fn code(&self) -> i32 {
        match self {
            Self::Unpaired => 0,
            Self::AlreadyUnpaired => 1,
            Self::OperationAlreadyInProgress => 2,
            Self::AccessDenied => 3,
            Self::Failed => 4,
            Self::Unrecognized(code) => *code,
        }
    }

    /// Check if the device is unpaired afterwards. Already-unpaired counts.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Unpaired | Self::AlreadyUnpaired)
    }
}

impl std::fmt::Display for UnpairResultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unpaired => write!(f, "Unpaired"),
            Self::AlreadyUnpaired => write!(f, "Already unpaired"),
            Self::OperationAlreadyInProgress => write!(f, "Operation already in progress"),
            Self::AccessDenied => write!(f, "Access denied"),
            Self::Failed => write!(f, "Failed"),
            Self::Unrecognized(code) => write!(f, "Unknown status (code={})", code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_paired_and_already_paired_succeed() {
        for code in 0..=19 {
            let status = PairingResultStatus::from_code(code);
            assert_eq!(status.code(), code);
            assert_eq!(
                status.is_success(),
                matches!(
                    status,
                    PairingResultStatus::Paired | PairingResultStatus::AlreadyPaired
                ),
                "code {}",
                code
            );
        }
    }

    #[test]
    fn test_unrecognized_code_is_generic_failure_with_cooldown() {
        let status = PairingResultStatus::from_code(42);
        assert_eq!(status, PairingResultStatus::Unrecognized(42));
        assert!(!status.is_success());
        assert!(status.needs_cooldown());
        assert!(status.message().contains("42"));

        assert!(PairingResultStatus::Failed.needs_cooldown());
        assert!(!PairingResultStatus::AuthenticationFailure.needs_cooldown());
    }

    #[test]
    fn test_unpair_status() {
        assert!(UnpairResultStatus::Unpaired.is_success());
        assert!(UnpairResultStatus::from_code(1).is_success());
        assert!(!UnpairResultStatus::AccessDenied.is_success());
        assert_eq!(UnpairResultStatus::from_code(9), UnpairResultStatus::Unrecognized(9));
    }
}
