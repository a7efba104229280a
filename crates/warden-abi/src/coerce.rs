// SPDX-License-Identifier: AGPL-3.0

//! Total, deterministic coercions from mutated values to declared ABI types.
//!
//! Mutation produces values whose shape can drift from the declared type
//! (a numeric seed on a bytes parameter, a decimal string on an address).
//! Every combination lands somewhere: either a normalized value of the
//! declared type, or the input passed through untouched for the encoder to
//! accept or reject.

use alloy_primitives::Address;
use num_bigint::{BigInt, Sign};
use num_traits::Zero;
use warden_types::hexnum::{parse_bigint, truncate_to_bits};
use warden_types::{SolType, Value};

/// Coerce `value` toward `ty`. Never fails; unconvertible combinations pass
/// through unchanged.
pub fn coerce(value: &Value, ty: &SolType) -> Value {
    match ty {
        SolType::Address => coerce_address(value),
        SolType::Uint(bits) | SolType::Int(bits) => coerce_numeric(value, *bits),
        SolType::Bytes => coerce_bytes(value),
        SolType::FixedBytes(n) => coerce_fixed_bytes(value, *n),
        SolType::String => coerce_string(value),
        SolType::Bool => value.clone(),
        SolType::Array { elem, .. } => coerce_array(value, elem),
    }
}

fn bigint_to_address(v: &BigInt) -> Address {
    let word = truncate_to_bits(v, 160).to_bytes_be();
    let mut out = [0u8; 20];
    out[20 - word.len()..].copy_from_slice(&word);
    Address::from(out)
}

fn coerce_address(value: &Value) -> Value {
    match value {
        Value::Address(_) => value.clone(),
        Value::Str(s) => {
            if let Some(digits) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                if digits.len() == 40 {
                    if let Ok(bytes) = hex::decode(digits) {
                        let mut out = [0u8; 20];
                        out.copy_from_slice(&bytes);
                        return Value::Address(Address::from(out));
                    }
                }
            }
            match parse_bigint(s) {
                Some(v) => Value::Address(bigint_to_address(&v)),
                None => value.clone(),
            }
        }
        Value::Int(v) => Value::Address(bigint_to_address(v)),
        Value::Bytes(b) => {
            let v = BigInt::from_bytes_be(Sign::Plus, b);
            Value::Address(bigint_to_address(&v))
        }
        _ => value.clone(),
    }
}

fn coerce_numeric(value: &Value, bits: u16) -> Value {
    let v = match value {
        Value::Int(v) => Some(v.clone()),
        Value::Str(s) => parse_bigint(s),
        Value::Bytes(b) => {
            if b.is_empty() {
                Some(BigInt::zero())
            } else {
                Some(BigInt::from_bytes_be(Sign::Plus, b))
            }
        }
        Value::Bool(b) => Some(BigInt::from(*b as u8)),
        Value::Address(a) => Some(BigInt::from_bytes_be(Sign::Plus, a.as_slice())),
        Value::List(_) => None,
    };
    match v {
        // Overflow is not an error: two's-complement truncation to width.
        Some(v) => Value::Int(BigInt::from(truncate_to_bits(&v, bits))),
        None => value.clone(),
    }
}

fn coerce_bytes(value: &Value) -> Value {
    match value {
        Value::Bytes(_) => value.clone(),
        Value::Str(s) => {
            if let Some(digits) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                if let Ok(bytes) = hex::decode(digits) {
                    return Value::Bytes(bytes);
                }
            }
            Value::Bytes(s.as_bytes().to_vec())
        }
        Value::Int(v) => {
            if v.is_zero() {
                Value::Bytes(Vec::new())
            } else {
                let (_, bytes) = v.to_bytes_be();
                Value::Bytes(bytes)
            }
        }
        _ => value.clone(),
    }
}

fn coerce_fixed_bytes(value: &Value, n: u8) -> Value {
    let n = n as usize;
    let normalize = |mut bytes: Vec<u8>| {
        bytes.truncate(n);
        while bytes.len() < n {
            bytes.push(0);
        }
        Value::Bytes(bytes)
    };
    match coerce_bytes(value) {
        Value::Bytes(b) => normalize(b),
        other => other,
    }
}

fn coerce_string(value: &Value) -> Value {
    match value {
        Value::Str(_) => value.clone(),
        Value::Bytes(b) => Value::Str(String::from_utf8_lossy(b).into_owned()),
        Value::Int(v) => Value::Str(v.to_string()),
        _ => value.clone(),
    }
}

fn coerce_array(value: &Value, elem: &SolType) -> Value {
    let is_u8_elem = matches!(elem, SolType::Uint(8));
    match value {
        Value::List(items) => Value::List(items.iter().map(|v| coerce(v, elem)).collect()),
        // A byte vector is already a uint8[].
        Value::Bytes(_) if is_u8_elem => value.clone(),
        Value::Int(v) if is_u8_elem => {
            if v >= &BigInt::zero() && v <= &BigInt::from(255u16) {
                Value::List(vec![Value::Int(v.clone())])
            } else {
                Value::List(vec![coerce_numeric(value, 8)])
            }
        }
        Value::Str(s) if is_u8_elem => {
            if let Some(digits) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                if let Ok(bytes) = hex::decode(digits) {
                    return Value::Bytes(bytes);
                }
            }
            match parse_bigint(s) {
                Some(_) => Value::List(vec![coerce_numeric(value, 8)]),
                None => value.clone(),
            }
        }
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_string_to_uint16() {
        let v = coerce(&Value::Str("0xDEAD".to_string()), &SolType::Uint(16));
        assert_eq!(v, Value::Int(BigInt::from(0xDEADu32)));
    }

    #[test]
    fn test_decimal_overflow_truncates() {
        // 65537 mod 2^16 == 1
        let v = coerce(&Value::Str("65537".to_string()), &SolType::Uint(16));
        assert_eq!(v, Value::Int(BigInt::from(1)));
    }

    #[test]
    fn test_negative_wraps() {
        let v = coerce(&Value::Int(BigInt::from(-1)), &SolType::Uint(8));
        assert_eq!(v, Value::Int(BigInt::from(255)));
    }

    #[test]
    fn test_bytes_to_numeric_is_big_endian() {
        let v = coerce(&Value::Bytes(vec![0x01, 0x00]), &SolType::Uint(256));
        assert_eq!(v, Value::Int(BigInt::from(256)));
    }

    #[test]
    fn test_address_from_decimal_takes_low_bytes() {
        let v = coerce(&Value::Str("1".to_string()), &SolType::Address);
        match v {
            Value::Address(a) => {
                assert_eq!(a.as_slice()[19], 1);
                assert!(a.as_slice()[..19].iter().all(|&b| b == 0));
            }
            other => panic!("expected address, got {:?}", other),
        }
    }

    #[test]
    fn test_address_from_hex_string() {
        let s = format!("0x{}", "ab".repeat(20));
        let v = coerce(&Value::Str(s), &SolType::Address);
        assert_eq!(v, Value::Address(Address::repeat_byte(0xab)));
    }

    #[test]
    fn test_address_passthrough() {
        let a = Value::Address(Address::repeat_byte(0x11));
        assert_eq!(coerce(&a, &SolType::Address), a);
    }

    #[test]
    fn test_dynamic_bytes_conversions() {
        assert_eq!(
            coerce(&Value::Str("0xdead".to_string()), &SolType::Bytes),
            Value::Bytes(vec![0xde, 0xad])
        );
        assert_eq!(
            coerce(&Value::Str("hi".to_string()), &SolType::Bytes),
            Value::Bytes(vec![b'h', b'i'])
        );
        assert_eq!(
            coerce(&Value::Int(BigInt::from(256)), &SolType::Bytes),
            Value::Bytes(vec![0x01, 0x00])
        );
    }

    #[test]
    fn test_fixed_bytes_normalizes_length() {
        let v = coerce(&Value::Bytes(vec![0xaa]), &SolType::FixedBytes(4));
        assert_eq!(v, Value::Bytes(vec![0xaa, 0, 0, 0]));

        let v = coerce(
            &Value::Bytes(vec![1, 2, 3, 4, 5, 6]),
            &SolType::FixedBytes(4),
        );
        assert_eq!(v, Value::Bytes(vec![1, 2, 3, 4]));
    }

    #[test]
    fn test_uint8_array_conversions() {
        let arr: SolType = "uint8[]".parse().unwrap();
        assert_eq!(
            coerce(&Value::Bytes(vec![1, 2]), &arr),
            Value::Bytes(vec![1, 2])
        );
        assert_eq!(
            coerce(&Value::Int(BigInt::from(7)), &arr),
            Value::List(vec![Value::Int(BigInt::from(7))])
        );
        assert_eq!(
            coerce(&Value::Str("0x0102".to_string()), &arr),
            Value::Bytes(vec![1, 2])
        );
        assert_eq!(
            coerce(&Value::Str("9".to_string()), &arr),
            Value::List(vec![Value::Int(BigInt::from(9))])
        );
    }

    #[test]
    fn test_array_elementwise() {
        let arr: SolType = "uint16[]".parse().unwrap();
        let v = coerce(
            &Value::List(vec![
                Value::Str("65537".to_string()),
                Value::Int(BigInt::from(3)),
            ]),
            &arr,
        );
        assert_eq!(
            v,
            Value::List(vec![Value::Int(BigInt::from(1)), Value::Int(BigInt::from(3))])
        );
    }

    #[test]
    fn test_unconvertible_passes_through() {
        let list = Value::List(vec![Value::Bool(true)]);
        assert_eq!(coerce(&list, &SolType::Uint(256)), list);
    }
}
