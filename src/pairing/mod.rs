//! Pairing module for bonding with provisioning peripherals.
//!
//! This module contains:
//! - The vocabulary of a custom pairing negotiation
//! - The per-attempt [`PairingSession`] that answers stack prompts
//! - The [`PairingStack`] seam to the host Bluetooth stack
//! - Reset-before-pair handling and the [`PairingCoordinator`]

pub mod coordinator;
pub mod reset;
pub mod session;
pub mod stack;

#[cfg(all(target_os = "linux", feature = "bluez"))]
pub mod bluez;

pub use coordinator::PairingCoordinator;
pub use reset::ResetManager;
pub use session::{auto_accept, request_pin_from_user, PairingSession};
pub use stack::{NativeDevice, PairingHandler, PairingStack};

#[cfg(all(target_os = "linux", feature = "bluez"))]
pub use bluez::BluezStack;

use std::ops::BitOr;

/// Set of pairing ceremonies offered to the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PairingKinds(u8);

impl PairingKinds {
    /// No ceremony.
    pub const NONE: Self = Self(0);
    /// Just-works confirmation.
    pub const CONFIRM_ONLY: Self = Self(0x01);
    /// The device shows a PIN for the user to read.
    pub const DISPLAY_PIN: Self = Self(0x02);
    /// The user enters a PIN shown by the device.
    pub const PROVIDE_PIN: Self = Self(0x04);
    /// Both sides show a PIN and the user confirms they match.
    pub const CONFIRM_PIN_MATCH: Self = Self(0x08);

    /// Every ceremony this crate knows how to answer.
    pub const ALL: Self = Self(0x0F);

    /// Create from raw bit value.
    pub fn from_raw(value: u8) -> Self {
        Self(value & Self::ALL.0)
    }

    /// Convert to raw bit value.
    pub fn to_raw(&self) -> u8 {
        self.0
    }

    /// Check if every ceremony in `other` is offered.
    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Check if no ceremony is offered.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for PairingKinds {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::fmt::Display for PairingKinds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = [
            (Self::CONFIRM_ONLY, "confirm-only"),
            (Self::DISPLAY_PIN, "display-pin"),
            (Self::PROVIDE_PIN, "provide-pin"),
            (Self::CONFIRM_PIN_MATCH, "confirm-pin-match"),
        ]
        .iter()
        .filter(|(kind, _)| self.contains(*kind))
        .map(|(_, name)| *name)
        .collect();

        if names.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// Minimum link protection demanded during pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ProtectionLevel {
    /// Let the stack decide.
    #[default]
    Default,
    /// No protection.
    None,
    /// Encrypted link.
    Encryption,
    /// Encrypted and authenticated (MITM-protected) link.
    EncryptionAndAuthentication,
}

impl ProtectionLevel {
    /// Level requested for a pairing call.
    pub fn for_authentication(require_authentication: bool) -> Self {
        if require_authentication {
            Self::EncryptionAndAuthentication
        } else {
            Self::Encryption
        }
    }

    /// Check if a MITM-protected ceremony is demanded.
    pub fn requires_authentication(&self) -> bool {
        matches!(self, Self::EncryptionAndAuthentication)
    }
}

impl std::fmt::Display for ProtectionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "Default"),
            Self::None => write!(f, "None"),
            Self::Encryption => write!(f, "Encryption"),
            Self::EncryptionAndAuthentication => write!(f, "EncryptionAndAuthentication"),
        }
    }
}

/// One prompt raised by the stack during a negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingRequest {
    /// The user must type the PIN shown on the device.
    ProvidePin,
    /// Confirm that the PIN shown on both sides matches.
    ConfirmPinMatch {
        /// The PIN to compare.
        pin: String,
    },
    /// The device shows this PIN.
    DisplayPin {
        /// The displayed PIN.
        pin: String,
    },
    /// Plain confirmation.
    ConfirmOnly,
    /// A ceremony this crate does not model.
    Other {
        /// Stack-specific identifier of the ceremony.
        kind: String,
    },
}

impl PairingRequest {
    /// The ceremony this prompt belongs to, if it is a known one.
    pub fn kind(&self) -> Option<PairingKinds> {
        match self {
            Self::ProvidePin => Some(PairingKinds::PROVIDE_PIN),
            Self::ConfirmPinMatch { .. } => Some(PairingKinds::CONFIRM_PIN_MATCH),
            Self::DisplayPin { .. } => Some(PairingKinds::DISPLAY_PIN),
            Self::ConfirmOnly => Some(PairingKinds::CONFIRM_ONLY),
            Self::Other { .. } => None,
        }
    }
}

impl std::fmt::Display for PairingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProvidePin => write!(f, "provide-pin"),
            Self::ConfirmPinMatch { .. } => write!(f, "confirm-pin-match"),
            Self::DisplayPin { .. } => write!(f, "display-pin"),
            Self::ConfirmOnly => write!(f, "confirm-only"),
            Self::Other { kind } => write!(f, "other ({})", kind),
        }
    }
}

/// Answer to a pairing prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingDecision {
    /// Accept the prompt.
    Accept,
    /// Accept, supplying the PIN the user entered.
    AcceptWithPin(String),
    /// Complete the prompt without accepting it.
    Decline,
}

impl PairingDecision {
    /// Check if the prompt was accepted.
    pub fn is_accept(&self) -> bool {
        !matches!(self, Self::Decline)
    }
}
