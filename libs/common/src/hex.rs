//! Hex rendering for frame dumps and CLI input

use std::fmt::Write;

/// Encode bytes to uppercase hex string
/// Example: [0x12, 0x34, 0xAB] -> "1234AB"
pub fn encode_upper(data: &[u8]) -> String {
    let mut result = String::with_capacity(data.len() * 2);
    for byte in data {
        // Writing to String buffer is infallible
        let _ = write!(&mut result, "{:02X}", byte);
    }
    result
}

/// Encode bytes as space separated uppercase pairs, the way frames are logged
/// Example: [0x01, 0x06, 0x00] -> "01 06 00"
pub fn encode_spaced(data: &[u8]) -> String {
    let mut result = String::with_capacity(data.len() * 3);
    for (i, byte) in data.iter().enumerate() {
        if i > 0 {
            result.push(' ');
        }
        let _ = write!(&mut result, "{:02X}", byte);
    }
    result
}

/// Parse hex text into bytes. Whitespace, `:` and `-` separators are ignored,
/// as is a leading `0x`.
pub fn decode(text: &str) -> Result<Vec<u8>, String> {
    let trimmed = text.trim();
    let trimmed = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let digits: Vec<char> = trimmed
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':' && *c != '-')
        .collect();

    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits ({})", digits.len()));
    }

    digits
        .chunks(2)
        .map(|pair| {
            let hi = pair[0]
                .to_digit(16)
                .ok_or_else(|| format!("invalid hex digit '{}'", pair[0]))?;
            let lo = pair[1]
                .to_digit(16)
                .ok_or_else(|| format!("invalid hex digit '{}'", pair[1]))?;
            Ok(((hi << 4) | lo) as u8)
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_encode_upper_basic() {
        assert_eq!(encode_upper(&[0x12, 0x34, 0xAB]), "1234AB");
        assert_eq!(encode_upper(&[]), "");
    }

    #[test]
    fn test_encode_spaced() {
        assert_eq!(encode_spaced(&[0x01, 0x06, 0x00, 0x20]), "01 06 00 20");
        assert_eq!(encode_spaced(&[0xFF]), "FF");
        assert_eq!(encode_spaced(&[]), "");
    }

    #[test]
    fn test_decode_separators() {
        assert_eq!(
            decode("01 03 00 00 00 0a").unwrap(),
            vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x0A]
        );
        assert_eq!(decode("0x0106").unwrap(), vec![0x01, 0x06]);
        assert_eq!(decode("c5:cd").unwrap(), vec![0xC5, 0xCD]);
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert!(decode("123").is_err());
        assert!(decode("zz").is_err());
    }
}
