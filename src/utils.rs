//! Utility functions for the ble-provisioner crate.

/// Describe a secret for log output without revealing it.
///
/// PINs and pre-shared keys are only ever logged through this helper.
///
/// # Example
///
/// ```
/// use ble_provisioner::redact;
///
/// assert_eq!(redact("748506"), "<6 chars>");
/// assert_eq!(redact(""), "<empty>");
/// ```
pub fn redact(secret: &str) -> String {
    match secret.chars().count() {
        0 => "<empty>".to_string(),
        1 => "<1 char>".to_string(),
        n => format!("<{} chars>", n),
    }
}

/// Format a byte for log output as `0xNN`.
#[inline]
pub fn hex_byte(value: u8) -> String {
    format!("{:#04x}", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact() {
        assert_eq!(redact("secret123"), "<9 chars>");
        assert_eq!(redact("x"), "<1 char>");
        assert!(!redact("748506").contains("748506"));
    }

    #[test]
    fn test_redact_counts_characters_not_bytes() {
        assert_eq!(redact("café"), "<4 chars>");
    }

    #[test]
    fn test_hex_byte() {
        assert_eq!(hex_byte(0x07), "0x07");
        assert_eq!(hex_byte(0xF2), "0xf2");
    }
}
