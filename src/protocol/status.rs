//! Provisioning status parsing.
//!
//! The peripheral reports its WiFi provisioning progress as a single byte
//! on the status characteristic.

use crate::error::{Error, Result};

/// Codes at or above this value are failures.
pub const FAILURE_THRESHOLD: u8 = 0xF0;

/// Decoded provisioning status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ProvisioningStatus {
    /// No credentials, nothing in progress (0x01).
    Idle,
    /// Peripheral is pairing with a client (0x02).
    Pairing,
    /// Paired and ready to receive credentials (0x03).
    Ready,
    /// Associating with the access point (0x04).
    Connecting,
    /// WPA handshake in progress (0x05).
    Authenticating,
    /// Waiting for DHCP (0x06).
    ObtainingAddress,
    /// Joined the network (0x07).
    Success,
    /// Pairing failed on the peripheral (0xF0).
    PairingFailed,
    /// The access point rejected the credentials (0xF1).
    AuthenticationFailed,
    /// Network unreachable or no address obtained (0xF2).
    NetworkFailed,
    /// Internal peripheral error (0xF3).
    InternalError,
    /// Any other failure code (0xF4..=0xFF).
    Failed(u8),
    /// A code outside the table that is not a failure.
    Unknown(u8),
}

impl ProvisioningStatus {
    /// Create from raw byte value.
    pub fn from_raw(value: u8) -> Self {
        match value {
            0x01 => Self::Idle,
            0x02 => Self::Pairing,
            0x03 => Self::Ready,
            0x04 => Self::Connecting,
            0x05 => Self::Authenticating,
            0x06 => Self::ObtainingAddress,
            0x07 => Self::Success,
            0xF0 => Self::PairingFailed,
            0xF1 => Self::AuthenticationFailed,
            0xF2 => Self::NetworkFailed,
            0xF3 => Self::InternalError,
            v if v >= FAILURE_THRESHOLD => Self::Failed(v),
            v => Self::Unknown(v),
        }
    }

    /// Parse the status characteristic value.
    pub fn parse(data: &[u8]) -> Result<Self> {
        match data.first() {
            Some(&value) => Ok(Self::from_raw(value)),
            None => Err(Error::InvalidData {
                context: "Status characteristic returned no data".to_string(),
            }),
        }
    }

    /// Convert to raw byte value.
    pub fn to_raw(&self) -> u8 {
        match self {
            Self::Idle => 0x01,
            Self::Pairing => 0x02,
            Self::Ready => 0x03,
            Self::Connecting => 0x04,
            Self::Authenticating => 0x05,
            Self::ObtainingAddress => 0x06,
            Self::Success => 0x07,
            Self::PairingFailed => 0xF0,
            Self::AuthenticationFailed => 0xF1,
            Self::NetworkFailed => 0xF2,
            Self::InternalError => 0xF3,
            Self::Failed(v) | Self::Unknown(v) => *v,
        }
    }

    /// Check if this is the success code.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Check if this is a failure code.
    pub fn is_failure(&self) -> bool {
        self.to_raw() >= FAILURE_THRESHOLD
    }

    /// Check if polling should stop on this code.
    pub fn is_terminal(&self) -> bool {
        self.is_success() || self.is_failure()
    }
}

impl std::fmt::Display for ProvisioningStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Pairing => write!(f, "pairing"),
            Self::Ready => write!(f, "ready"),
            Self::Connecting => write!(f, "connecting"),
            Self::Authenticating => write!(f, "authenticating"),
            Self::ObtainingAddress => write!(f, "obtaining address"),
            Self::Success => write!(f, "success"),
            Self::PairingFailed => write!(f, "pairing failed"),
            Self::AuthenticationFailed => write!(f, "authentication failed"),
            Self::NetworkFailed => write!(f, "network failed"),
            Self::InternalError => write!(f, "internal error"),
            Self::Failed(v) => write!(f, "failed ({:#04x})", v),
            Self::Unknown(v) => write!(f, "unknown ({:#04x})", v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_table() {
        assert_eq!(ProvisioningStatus::from_raw(0x01), ProvisioningStatus::Idle);
        assert_eq!(ProvisioningStatus::from_raw(0x03), ProvisioningStatus::Ready);
        assert_eq!(
            ProvisioningStatus::from_raw(0x06),
            ProvisioningStatus::ObtainingAddress
        );
        assert_eq!(ProvisioningStatus::from_raw(0x07), ProvisioningStatus::Success);
        assert_eq!(
            ProvisioningStatus::from_raw(0xF2),
            ProvisioningStatus::NetworkFailed
        );
        assert_eq!(
            ProvisioningStatus::from_raw(0xFE),
            ProvisioningStatus::Failed(0xFE)
        );
        assert_eq!(
            ProvisioningStatus::from_raw(0x42),
            ProvisioningStatus::Unknown(0x42)
        );
    }

    #[test]
    fn test_terminal_codes() {
        for raw in 0x01..=0x06u8 {
            assert!(!ProvisioningStatus::from_raw(raw).is_terminal());
        }
        assert!(ProvisioningStatus::from_raw(0x07).is_terminal());
        for raw in FAILURE_THRESHOLD..=0xFF {
            let status = ProvisioningStatus::from_raw(raw);
            assert!(status.is_failure());
            assert_eq!(status.to_raw(), raw);
        }
        assert!(!ProvisioningStatus::Unknown(0x00).is_terminal());
    }

    #[test]
    fn test_parse_empty() {
        assert!(ProvisioningStatus::parse(&[]).is_err());
        assert_eq!(
            ProvisioningStatus::parse(&[0x05, 0xAA]).unwrap(),
            ProvisioningStatus::Authenticating
        );
    }
}
