//! BLE Service and Characteristic UUIDs.
//!
//! The provisioning peripheral exposes one custom service. All of its
//! identifiers share the base `c0deXXXX-7e1a-4f83-bf3a-0c0ffee0c0de`, with
//! the role encoded in the `XXXX` field.

use uuid::Uuid;

/// Build a provisioning UUID from its 16-bit role suffix.
pub const fn provisioning_uuid(suffix: u16) -> Uuid {
    Uuid::from_u128(0xc0de_0000_7e1a_4f83_bf3a_0c0ffee0c0de | ((suffix as u128) << 96))
}

/// WiFi provisioning service UUID.
pub const PROVISIONING_SERVICE_UUID: Uuid = provisioning_uuid(0x0000);
/// SSID characteristic UUID (write, UTF-8 text).
pub const SSID_CHARACTERISTIC_UUID: Uuid = provisioning_uuid(0x0001);
/// Pre-shared key characteristic UUID (write, UTF-8 text).
pub const PSK_CHARACTERISTIC_UUID: Uuid = provisioning_uuid(0x0002);
/// Control characteristic UUID (write, one command byte).
pub const CONTROL_CHARACTERISTIC_UUID: Uuid = provisioning_uuid(0x0003);
/// Status characteristic UUID (read, one status byte).
pub const STATUS_CHARACTERISTIC_UUID: Uuid = provisioning_uuid(0x0004);

/// Check if a service UUID is the provisioning service.
pub fn is_provisioning_service(uuid: &Uuid) -> bool {
    *uuid == PROVISIONING_SERVICE_UUID
}

/// Human-readable name of a provisioning characteristic, for logs and errors.
pub fn characteristic_name(uuid: &Uuid) -> &'static str {
    match *uuid {
        SSID_CHARACTERISTIC_UUID => "ssid",
        PSK_CHARACTERISTIC_UUID => "psk",
        CONTROL_CHARACTERISTIC_UUID => "control",
        STATUS_CHARACTERISTIC_UUID => "status",
        PROVISIONING_SERVICE_UUID => "provisioning-service",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_format() {
        assert_eq!(
            PROVISIONING_SERVICE_UUID.to_string(),
            "c0de0000-7e1a-4f83-bf3a-0c0ffee0c0de"
        );
        assert_eq!(
            SSID_CHARACTERISTIC_UUID.to_string(),
            "c0de0001-7e1a-4f83-bf3a-0c0ffee0c0de"
        );
        assert_eq!(
            STATUS_CHARACTERISTIC_UUID.to_string(),
            "c0de0004-7e1a-4f83-bf3a-0c0ffee0c0de"
        );
    }

    #[test]
    fn test_characteristics_are_distinct() {
        let all = [
            PROVISIONING_SERVICE_UUID,
            SSID_CHARACTERISTIC_UUID,
            PSK_CHARACTERISTIC_UUID,
            CONTROL_CHARACTERISTIC_UUID,
            STATUS_CHARACTERISTIC_UUID,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_is_provisioning_service() {
        assert!(is_provisioning_service(&PROVISIONING_SERVICE_UUID));
        assert!(!is_provisioning_service(&STATUS_CHARACTERISTIC_UUID));
        assert_eq!(characteristic_name(&PSK_CHARACTERISTIC_UUID), "psk");
    }
}
