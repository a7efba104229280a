// SPDX-License-Identifier: AGPL-3.0

//! Hex codecs shared by the collector, the state loader and the report.
//!
//! Signed quantities use the `-0x…` / `0x…` convention on both sides of the
//! artifact boundary, so a coefficient never has to guess its sign context.

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::Zero;

/// Encode an unsigned big integer as minimal lowercase `0x` hex.
pub fn encode_uint(v: &BigUint) -> String {
    format!("0x{}", v.to_str_radix(16))
}

/// Encode a signed big integer as `0x…` or `-0x…`.
pub fn encode_signed(v: &BigInt) -> String {
    match v.sign() {
        Sign::Minus => format!("-0x{}", v.magnitude().to_str_radix(16)),
        _ => format!("0x{}", v.magnitude().to_str_radix(16)),
    }
}

/// Decode a `0x…` / `-0x…` signed hex string.
pub fn decode_signed(s: &str) -> Option<BigInt> {
    let (neg, rest) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let digits = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X"))?;
    let mag = BigUint::parse_bytes(digits.as_bytes(), 16)?;
    let v = BigInt::from(mag);
    Some(if neg { -v } else { v })
}

/// Parse a big integer from `0x` hex or decimal text, either sign.
pub fn parse_bigint(s: &str) -> Option<BigInt> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }
    if t.starts_with("0x") || t.starts_with("0X") || t.starts_with("-0x") || t.starts_with("-0X") {
        return decode_signed(t);
    }
    t.parse::<BigInt>().ok()
}

/// Normalize a storage-slot key to `0x` + 64 lowercase hex characters:
/// left-zero-padded, right-truncated if longer.
pub fn normalize_slot(s: &str) -> String {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
        .to_lowercase();
    let digits = if digits.len() > 64 {
        digits[..64].to_string()
    } else {
        digits
    };
    format!("0x{:0>64}", digits)
}

/// Normalize a balance/nonce quantity (decimal or hex text) to minimal
/// lowercase `0x` hex. Zero-like values normalize to `None`.
pub fn normalize_quantity(s: &str) -> Option<String> {
    let v = parse_bigint(s)?;
    if v.is_zero() {
        return None;
    }
    let (_, mag) = v.into_parts();
    Some(encode_uint(&mag))
}

/// Unsigned 256-bit wraparound of an arbitrary signed integer, as used by
/// two's-complement truncation in coercions.
pub fn truncate_to_bits(v: &BigInt, bits: u16) -> BigUint {
    let modulus = BigUint::from(1u8) << bits as usize;
    let reduced = ((v % BigInt::from(modulus.clone())) + BigInt::from(modulus.clone()))
        % BigInt::from(modulus);
    let (_, mag) = reduced.into_parts();
    mag
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_roundtrip() {
        let v = BigInt::from(-255);
        assert_eq!(encode_signed(&v), "-0xff");
        assert_eq!(decode_signed("-0xff"), Some(v));

        let v = BigInt::from(4);
        assert_eq!(encode_signed(&v), "0x4");
        assert_eq!(decode_signed("0x4"), Some(v));
    }

    #[test]
    fn test_parse_bigint_forms() {
        assert_eq!(parse_bigint("0xDEAD"), Some(BigInt::from(0xDEADu32)));
        assert_eq!(parse_bigint("65537"), Some(BigInt::from(65537)));
        assert_eq!(parse_bigint("-12"), Some(BigInt::from(-12)));
        assert_eq!(parse_bigint(""), None);
        assert_eq!(parse_bigint("zz"), None);
    }

    #[test]
    fn test_normalize_slot_pads_left() {
        assert_eq!(
            normalize_slot("0x1"),
            "0x0000000000000000000000000000000000000000000000000000000000000001"
        );
    }

    #[test]
    fn test_normalize_slot_truncates_right() {
        let long = format!("0x{}", "ab".repeat(40));
        let norm = normalize_slot(&long);
        assert_eq!(norm.len(), 66);
        assert!(norm.starts_with("0xabab"));
    }

    #[test]
    fn test_normalize_quantity() {
        assert_eq!(normalize_quantity("1000"), Some("0x3e8".to_string()));
        assert_eq!(normalize_quantity("0x3E8"), Some("0x3e8".to_string()));
        assert_eq!(normalize_quantity("0"), None);
        assert_eq!(normalize_quantity("0x0"), None);
    }

    #[test]
    fn test_truncate_to_bits() {
        // 65537 mod 2^16 == 1
        assert_eq!(
            truncate_to_bits(&BigInt::from(65537), 16),
            BigUint::from(1u8)
        );
        // -1 wraps to 0xffff
        assert_eq!(
            truncate_to_bits(&BigInt::from(-1), 16),
            BigUint::from(0xffffu32)
        );
        assert_eq!(
            truncate_to_bits(&BigInt::from(0xDEADu32), 16),
            BigUint::from(0xDEADu32)
        );
    }
}
