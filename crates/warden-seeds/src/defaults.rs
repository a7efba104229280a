// SPDX-License-Identifier: AGPL-3.0

//! Type-specific default mutation, used when a parameter has no seeds and as
//! the random phase of the pipeline.

use alloy_primitives::Address;
use num_bigint::{BigInt, Sign};
use num_traits::{One, Zero};
use rand::Rng;
use warden_config::{AddressMutation, RangeConfig};
use warden_types::hexnum::truncate_to_bits;
use warden_types::{SolType, Value};

/// Magic quantities that frequently sit on interesting branches.
fn magic_values() -> Vec<BigInt> {
    vec![
        BigInt::from(0xDEADBEEFu64),
        BigInt::parse_bytes(b"1000000000000000000", 10).unwrap(), // 1e18
        BigInt::from(1_000_000u64),                               // 1e6
    ]
}

/// Max of an unsigned width.
pub fn uint_max(bits: u16) -> BigInt {
    (BigInt::one() << bits as usize) - 1
}

/// `value ± percent`, halving instead of crossing zero on underflow.
pub fn percent_offsets(value: &BigInt, percent: f64) -> Vec<BigInt> {
    let bps = BigInt::from((percent * 100.0).round().max(0.0) as u64);
    let delta = value * &bps / BigInt::from(10_000u32);
    if delta.is_zero() {
        return Vec::new();
    }
    let up = value + &delta;
    let down = if &delta > value {
        value / 2
    } else {
        value - &delta
    };
    vec![up, down]
}

/// Small additive steps around a value.
pub fn microsteps(value: &BigInt) -> Vec<BigInt> {
    let mut out = Vec::new();
    for step in [1u32, 10, 100, 1000] {
        let step = BigInt::from(step);
        out.push(value + &step);
        if value >= &step {
            out.push(value - &step);
        }
    }
    out
}

fn clamp_width(values: Vec<BigInt>, bits: u16) -> Vec<Value> {
    values
        .into_iter()
        .map(|v| Value::Int(BigInt::from(truncate_to_bits(&v, bits))))
        .collect()
}

/// Default generator for integer parameters.
pub fn numeric_defaults<R: Rng>(
    original: &BigInt,
    bits: u16,
    range: &RangeConfig,
    _rng: &mut R,
) -> Vec<Value> {
    let mut out = vec![
        BigInt::zero(),
        BigInt::one(),
        BigInt::from(2u8),
        uint_max(bits),
    ];
    out.extend(magic_values());
    for p in &range.numeric_range_percent {
        out.extend(percent_offsets(original, *p));
    }
    if range.bit_flips {
        for bit in 0..bits as usize {
            out.push(original ^ (BigInt::one() << bit));
        }
    }
    clamp_width(out, bits)
}

fn address_from_bigint(v: &BigInt) -> Address {
    let bytes = truncate_to_bits(v, 160).to_bytes_be();
    let mut out = [0u8; 20];
    out[20 - bytes.len()..].copy_from_slice(&bytes);
    Address::from(out)
}

/// Default generator for address parameters. Restricted mode keeps the
/// original only: a random address almost always reverts for lack of
/// deployed code.
pub fn address_defaults(original: Address, modes: &[AddressMutation]) -> Vec<Value> {
    let mut out = vec![Value::Address(original)];
    let as_int = BigInt::from_bytes_be(Sign::Plus, original.as_slice());

    for mode in modes {
        match mode {
            AddressMutation::Original => {}
            AddressMutation::Bitflip1 => {
                for bit in 0..160usize {
                    out.push(Value::Address(address_from_bigint(
                        &(&as_int ^ (BigInt::one() << bit)),
                    )));
                }
            }
            AddressMutation::Bitflip2 => {
                for bit in 0..159usize {
                    let flipped = &as_int ^ (BigInt::from(3u8) << bit);
                    out.push(Value::Address(address_from_bigint(&flipped)));
                }
            }
            AddressMutation::Nearby => {
                for step in [1u32, 10, 100, 1000] {
                    out.push(Value::Address(address_from_bigint(
                        &(&as_int + BigInt::from(step)),
                    )));
                    out.push(Value::Address(address_from_bigint(
                        &(&as_int - BigInt::from(step)),
                    )));
                }
            }
        }
    }
    out
}

/// Default generator for fixed-size byte parameters: single-byte flips.
pub fn fixed_bytes_defaults(original: &[u8]) -> Vec<Value> {
    let mut out = vec![Value::Bytes(original.to_vec())];
    for i in 0..original.len() {
        let mut flipped = original.to_vec();
        flipped[i] ^= 0xff;
        out.push(Value::Bytes(flipped));
    }
    out
}

/// Default generator for dynamic byte parameters.
pub fn bytes_defaults(original: &[u8]) -> Vec<Value> {
    let len = original.len().max(1);
    let mut reversed = original.to_vec();
    reversed.reverse();
    vec![
        Value::Bytes(Vec::new()),
        Value::Bytes(vec![0x00; len]),
        Value::Bytes(vec![0xff; len]),
        Value::Bytes((0..len).map(|i| (i % 256) as u8).collect()),
        Value::Bytes(reversed),
    ]
}

/// Default generator for string parameters.
pub fn string_defaults(original: &str) -> Vec<Value> {
    vec![
        Value::Str(String::new()),
        Value::Str("A".repeat(32)),
        Value::Str(original.chars().rev().collect()),
    ]
}

/// Default generator for array parameters: homogeneous sequences of standard
/// lengths, bounded by `max_elements`.
pub fn array_defaults(original: &Value, elem: &SolType, max_elements: usize) -> Vec<Value> {
    let fill = match original {
        Value::List(items) if !items.is_empty() => items[0].clone(),
        Value::Bytes(b) if !b.is_empty() => Value::Int(BigInt::from(b[0])),
        _ => Value::default_for(elem),
    };
    [0usize, 1, 2, 10, 100, 1000]
        .iter()
        .filter(|&&n| n <= max_elements)
        .map(|&n| Value::List(vec![fill.clone(); n]))
        .collect()
}

/// Boundary values for a type, emitted by the boundary phase.
pub fn boundary_values(ty: &SolType) -> Vec<Value> {
    match ty {
        SolType::Uint(bits) | SolType::Int(bits) => vec![
            Value::Int(BigInt::zero()),
            Value::Int(BigInt::one()),
            Value::Int(BigInt::from(2u8)),
            Value::Int(uint_max(*bits)),
        ],
        SolType::Address => vec![
            Value::Address(Address::ZERO),
            Value::Address(Address::repeat_byte(0xff)),
        ],
        SolType::Bool => vec![Value::Bool(true), Value::Bool(false)],
        SolType::Bytes | SolType::String => vec![Value::Bytes(Vec::new())],
        SolType::FixedBytes(n) => vec![
            Value::Bytes(vec![0x00; *n as usize]),
            Value::Bytes(vec![0xff; *n as usize]),
        ],
        SolType::Array { .. } => vec![Value::List(Vec::new())],
    }
}

/// Dispatch the default random generator by declared type.
pub fn defaults_for<R: Rng>(
    ty: &SolType,
    original: &Value,
    range: &RangeConfig,
    modes: &[AddressMutation],
    rng: &mut R,
) -> Vec<Value> {
    match ty {
        SolType::Uint(bits) | SolType::Int(bits) => {
            let base = original.as_bigint().unwrap_or_default();
            numeric_defaults(&base, *bits, range, rng)
        }
        SolType::Address => match original {
            Value::Address(a) => address_defaults(*a, modes),
            _ => Vec::new(),
        },
        SolType::Bool => vec![Value::Bool(true), Value::Bool(false)],
        SolType::FixedBytes(_) => match original {
            Value::Bytes(b) => fixed_bytes_defaults(b),
            _ => Vec::new(),
        },
        SolType::Bytes => match original {
            Value::Bytes(b) => bytes_defaults(b),
            _ => bytes_defaults(&[]),
        },
        SolType::String => match original {
            Value::Str(s) => string_defaults(s),
            _ => string_defaults(""),
        },
        SolType::Array { elem, .. } => array_defaults(original, elem, range.max_elements),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_percent_offsets_halves_on_underflow() {
        let v = BigInt::from(100);
        let offsets = percent_offsets(&v, 150.0);
        assert_eq!(offsets, vec![BigInt::from(250), BigInt::from(50)]);
    }

    #[test]
    fn test_percent_offsets_zero_delta_skipped() {
        assert!(percent_offsets(&BigInt::zero(), 10.0).is_empty());
    }

    #[test]
    fn test_microsteps_skip_negative() {
        let steps = microsteps(&BigInt::from(5));
        assert!(steps.contains(&BigInt::from(6)));
        assert!(steps.contains(&BigInt::from(4)));
        // 5 - 10 would go negative and is skipped.
        assert!(!steps.iter().any(|v| v.sign() == Sign::Minus));
    }

    #[test]
    fn test_numeric_defaults_cover_extremes() {
        let mut rng = StdRng::seed_from_u64(1);
        let values = numeric_defaults(
            &BigInt::from(1000),
            16,
            &RangeConfig::default(),
            &mut rng,
        );
        assert!(values.contains(&Value::Int(BigInt::zero())));
        assert!(values.contains(&Value::Int(BigInt::from(0xffffu32))));
        // Magic values clamp into the declared width.
        assert!(values.iter().all(|v| match v {
            Value::Int(n) => n <= &BigInt::from(0xffffu32),
            _ => false,
        }));
    }

    #[test]
    fn test_address_defaults_restricted() {
        let a = Address::repeat_byte(0x11);
        let values = address_defaults(a, &[AddressMutation::Original]);
        assert_eq!(values, vec![Value::Address(a)]);
    }

    #[test]
    fn test_address_defaults_nearby() {
        let a = Address::repeat_byte(0x11);
        let values = address_defaults(a, &[AddressMutation::Nearby]);
        assert_eq!(values.len(), 9);
        assert_eq!(values[0], Value::Address(a));
    }

    #[test]
    fn test_fixed_bytes_flips_each_byte() {
        let values = fixed_bytes_defaults(&[0xaa, 0xbb]);
        assert_eq!(values.len(), 3);
        assert_eq!(values[1], Value::Bytes(vec![0x55, 0xbb]));
        assert_eq!(values[2], Value::Bytes(vec![0xaa, 0x44]));
    }

    #[test]
    fn test_array_defaults_respect_cap() {
        let elem = SolType::Uint(256);
        let original = Value::List(vec![Value::Int(BigInt::from(9))]);
        let values = array_defaults(&original, &elem, 50);
        let lens: Vec<usize> = values
            .iter()
            .map(|v| match v {
                Value::List(items) => items.len(),
                _ => panic!("expected list"),
            })
            .collect();
        assert_eq!(lens, vec![0, 1, 2, 10]);
    }

    #[test]
    fn test_boundary_values_per_type() {
        assert_eq!(boundary_values(&SolType::Bool).len(), 2);
        let uint8 = boundary_values(&SolType::Uint(8));
        assert!(uint8.contains(&Value::Int(BigInt::from(255))));
        let addr = boundary_values(&SolType::Address);
        assert!(addr.contains(&Value::Address(Address::ZERO)));
    }
}
