//! Bluetooth hardware addresses.
//!
//! The UI layer hands addresses over as MAC strings (`AA:BB:CC:DD:EE:FF`,
//! `aa-bb-cc-dd-ee-ff`, or bare hex). Everything inside the engine keys
//! on the canonical [`DeviceAddress`] instead.

use std::fmt;
use std::str::FromStr;

use btleplug::api::BDAddr;

use crate::error::{Error, Result};

/// Canonical 48-bit Bluetooth device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceAddress(u64);

impl DeviceAddress {
    /// Number of bytes in an address.
    pub const LEN: usize = 6;

    const MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

    /// Parse a colon/dash delimited or bare hex MAC string.
    ///
    /// Exactly twelve hex digits are required and the all-zero address is
    /// rejected.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = || Error::InvalidAddress {
            input: input.to_string(),
        };

        let digits: String = input
            .trim()
            .chars()
            .filter(|c| *c != ':' && *c != '-')
            .collect();

        if digits.len() != Self::LEN * 2 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        let value = u64::from_str_radix(&digits, 16).map_err(|_| invalid())?;
        if value == 0 {
            return Err(invalid());
        }

        Ok(Self(value))
    }

    /// Create from a 48-bit integer. Bits above 48 are discarded.
    pub fn from_u64(value: u64) -> Self {
        Self(value & Self::MASK)
    }

    /// The address as a 48-bit integer.
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// The address bytes, most significant first.
    pub fn octets(&self) -> [u8; 6] {
        let bytes = self.0.to_be_bytes();
        [bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7]]
    }

    /// Create from address bytes, most significant first.
    pub fn from_octets(octets: [u8; 6]) -> Self {
        let mut bytes = [0u8; 8];
        bytes[2..].copy_from_slice(&octets);
        Self(u64::from_be_bytes(bytes))
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.octets();
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl FromStr for DeviceAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<BDAddr> for DeviceAddress {
    fn from(addr: BDAddr) -> Self {
        Self::from_octets(addr.into_inner())
    }
}

impl From<DeviceAddress> for BDAddr {
    fn from(addr: DeviceAddress) -> Self {
        BDAddr::from(addr.octets())
    }
}

#[cfg(all(target_os = "linux", feature = "bluez"))]
impl From<DeviceAddress> for bluer::Address {
    fn from(addr: DeviceAddress) -> Self {
        bluer::Address::new(addr.octets())
    }
}

#[cfg(all(target_os = "linux", feature = "bluez"))]
impl From<bluer::Address> for DeviceAddress {
    fn from(addr: bluer::Address) -> Self {
        Self::from_octets(addr.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_parse_delimiters() {
        let colon = DeviceAddress::parse("AA:BB:CC:DD:EE:FF").unwrap();
        let dash = DeviceAddress::parse("aa-bb-cc-dd-ee-ff").unwrap();
        let bare = DeviceAddress::parse("AABBCCDDEEFF").unwrap();

        assert_eq!(colon, dash);
        assert_eq!(colon, bare);
        assert_eq!(colon.as_u64(), 0xAABB_CCDD_EEFF);
        assert_eq!(colon.to_string(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for input in ["", "AA:BB:CC", "AA:BB:CC:DD:EE:FF:00", "GG:BB:CC:DD:EE:FF", "not an address"] {
            let err = DeviceAddress::parse(input).unwrap_err();
            assert_eq!(err.code(), "INVALID_ADDRESS", "input {:?}", input);
        }
    }

    #[test]
    fn test_zero_address_is_invalid() {
        assert!(DeviceAddress::parse("00:00:00:00:00:00").is_err());
    }

    #[test]
    fn test_bdaddr_conversion() {
        let addr = DeviceAddress::parse("01:23:45:67:89:AB").unwrap();
        let bd: BDAddr = addr.into();
        assert_eq!(bd.into_inner(), [0x01, 0x23, 0x45, 0x67, 0x89, 0xAB]);
        assert_eq!(DeviceAddress::from(bd), addr);
    }

    #[test]
    fn test_from_u64_masks_high_bits() {
        let addr = DeviceAddress::from_u64(0xFFFF_0000_0000_0001);
        assert_eq!(addr.as_u64(), 1);
    }

    proptest! {
        #[test]
        fn prop_display_parses_back(value in 1u64..=0xFFFF_FFFF_FFFF) {
            let addr = DeviceAddress::from_u64(value);
            let parsed = DeviceAddress::parse(&addr.to_string()).unwrap();
            prop_assert_eq!(parsed, addr);
        }

        #[test]
        fn prop_case_insensitive(value in 1u64..=0xFFFF_FFFF_FFFF) {
            let upper = DeviceAddress::from_u64(value).to_string();
            let lower = upper.to_lowercase();
            prop_assert_eq!(
                DeviceAddress::parse(&upper).unwrap(),
                DeviceAddress::parse(&lower).unwrap()
            );
        }
    }
}
