//! Control characteristic commands.

/// One-byte command written to the control characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ControlCommand {
    /// Join the network using the SSID/PSK written beforehand (0x01).
    Connect = 0x01,
    /// Forget stored credentials (0x02).
    ClearCredentials = 0x02,
    /// Restore the peripheral to factory state (0x03).
    FactoryReset = 0x03,
}

impl ControlCommand {
    /// Create from raw byte value.
    pub fn from_raw(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Connect),
            0x02 => Some(Self::ClearCredentials),
            0x03 => Some(Self::FactoryReset),
            _ => None,
        }
    }

    /// Convert to raw byte value.
    pub fn to_raw(&self) -> u8 {
        *self as u8
    }

    /// The characteristic payload for this command.
    pub fn to_bytes(&self) -> [u8; 1] {
        [self.to_raw()]
    }
}

impl std::fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::ClearCredentials => write!(f, "clear credentials"),
            Self::FactoryReset => write!(f, "factory reset"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_bytes() {
        assert_eq!(ControlCommand::Connect.to_bytes(), [0x01]);
        assert_eq!(ControlCommand::ClearCredentials.to_raw(), 0x02);
        assert_eq!(ControlCommand::FactoryReset.to_raw(), 0x03);
        assert_eq!(ControlCommand::from_raw(0x03), Some(ControlCommand::FactoryReset));
        assert_eq!(ControlCommand::from_raw(0x04), None);
    }
}
