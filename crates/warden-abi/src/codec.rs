// SPDX-License-Identifier: AGPL-3.0

//! Word-level ABI encoding and decoding.
//!
//! Head words first; dynamic data in the tail addressed by offsets relative
//! to the start of the argument block (or of the enclosing array's data).

use num_bigint::{BigInt, Sign};
use num_traits::Zero;
use warden_exceptions::{AbiError, AbiResult};
use warden_types::hexnum::truncate_to_bits;
use warden_types::{SolType, Value};

const WORD: usize = 32;

fn word_at(data: &[u8], pos: usize) -> AbiResult<&[u8]> {
    data.get(pos..pos + WORD)
        .ok_or_else(|| AbiError::Decode(format!("word read out of bounds at {}", pos)))
}

fn usize_at(data: &[u8], pos: usize) -> AbiResult<usize> {
    let word = word_at(data, pos)?;
    if word[..24].iter().any(|&b| b != 0) {
        return Err(AbiError::Decode(format!(
            "unreasonably large quantity at {}",
            pos
        )));
    }
    let mut v = 0u64;
    for &b in &word[24..] {
        v = (v << 8) | b as u64;
    }
    usize::try_from(v).map_err(|_| AbiError::Decode(format!("quantity overflow at {}", pos)))
}

/// Decode the argument block (calldata minus selector) against declared
/// types.
pub fn decode_arguments(types: &[SolType], data: &[u8]) -> AbiResult<Vec<Value>> {
    let mut out = Vec::with_capacity(types.len());
    let mut head = 0usize;
    for ty in types {
        if ty.is_static() {
            out.push(decode_static(ty, data, head)?);
            head += ty.static_words() * WORD;
        } else {
            let offset = usize_at(data, head)?;
            out.push(decode_dynamic(ty, data, offset)?);
            head += WORD;
        }
    }
    Ok(out)
}

fn decode_static(ty: &SolType, data: &[u8], pos: usize) -> AbiResult<Value> {
    let word = word_at(data, pos)?;
    match ty {
        SolType::Uint(_) => Ok(Value::Int(BigInt::from_bytes_be(Sign::Plus, word))),
        SolType::Int(_) => {
            let unsigned = BigInt::from_bytes_be(Sign::Plus, word);
            let half = BigInt::from(1u8) << 255;
            let v = if unsigned >= half {
                unsigned - (BigInt::from(1u8) << 256)
            } else {
                unsigned
            };
            Ok(Value::Int(v))
        }
        SolType::Address => {
            let mut out = [0u8; 20];
            out.copy_from_slice(&word[12..]);
            Ok(Value::Address(out.into()))
        }
        SolType::Bool => Ok(Value::Bool(word[31] != 0)),
        SolType::FixedBytes(n) => Ok(Value::Bytes(word[..*n as usize].to_vec())),
        SolType::Array {
            elem,
            len: Some(n),
        } => {
            let mut items = Vec::with_capacity(*n as usize);
            let stride = elem.static_words() * WORD;
            for i in 0..*n as usize {
                items.push(decode_static(elem, data, pos + i * stride)?);
            }
            Ok(Value::List(items))
        }
        other => Err(AbiError::Decode(format!(
            "type {} is not head-encoded",
            other
        ))),
    }
}

fn decode_dynamic(ty: &SolType, data: &[u8], pos: usize) -> AbiResult<Value> {
    match ty {
        SolType::Bytes | SolType::String => {
            let len = usize_at(data, pos)?;
            let bytes = data
                .get(pos + WORD..pos + WORD + len)
                .ok_or_else(|| AbiError::Decode(format!("bytes read out of bounds at {}", pos)))?
                .to_vec();
            if matches!(ty, SolType::String) {
                Ok(Value::Str(String::from_utf8_lossy(&bytes).into_owned()))
            } else {
                Ok(Value::Bytes(bytes))
            }
        }
        SolType::Array { elem, len } => {
            let (count, base) = match len {
                // Fixed array lands here only when its element is dynamic.
                Some(n) => (*n as usize, pos),
                None => (usize_at(data, pos)?, pos + WORD),
            };
            let mut items = Vec::with_capacity(count);
            if elem.is_static() {
                let stride = elem.static_words() * WORD;
                for i in 0..count {
                    items.push(decode_static(elem, data, base + i * stride)?);
                }
            } else {
                for i in 0..count {
                    let offset = usize_at(data, base + i * WORD)?;
                    items.push(decode_dynamic(elem, data, base + offset)?);
                }
            }
            Ok(Value::List(items))
        }
        other => Err(AbiError::Decode(format!(
            "type {} is not tail-encoded",
            other
        ))),
    }
}

/// Encode values against declared types into an argument block.
pub fn encode_arguments(types: &[SolType], values: &[Value]) -> AbiResult<Vec<u8>> {
    if types.len() != values.len() {
        return Err(AbiError::Encode(format!(
            "arity mismatch: {} types, {} values",
            types.len(),
            values.len()
        )));
    }
    let head_size: usize = types
        .iter()
        .map(|t| if t.is_static() { t.static_words() * WORD } else { WORD })
        .sum();

    let mut head = Vec::with_capacity(head_size);
    let mut tail = Vec::new();
    for (ty, value) in types.iter().zip(values) {
        if ty.is_static() {
            head.extend(encode_static(ty, value)?);
        } else {
            head.extend(uint_word(&BigInt::from(head_size + tail.len()))?);
            tail.extend(encode_dynamic(ty, value)?);
        }
    }
    head.extend(tail);
    Ok(head)
}

fn uint_word(v: &BigInt) -> AbiResult<[u8; 32]> {
    if v.sign() == Sign::Minus {
        return Err(AbiError::Encode(format!("negative quantity: {}", v)));
    }
    let bytes = v.magnitude().to_bytes_be();
    if bytes.len() > WORD {
        return Err(AbiError::Encode(format!("quantity exceeds 256 bits: {}", v)));
    }
    let mut out = [0u8; 32];
    out[WORD - bytes.len()..].copy_from_slice(&bytes);
    Ok(out)
}

fn numeric_word(v: &BigInt) -> AbiResult<[u8; 32]> {
    // Negative values encode in 256-bit two's complement.
    if (v.magnitude().bits() as usize) > 256 {
        return Err(AbiError::Encode(format!("value exceeds 256 bits: {}", v)));
    }
    let wrapped = truncate_to_bits(v, 256);
    uint_word(&BigInt::from(wrapped))
}

fn encode_static(ty: &SolType, value: &Value) -> AbiResult<Vec<u8>> {
    match ty {
        SolType::Uint(_) | SolType::Int(_) => {
            let v = value
                .as_bigint()
                .ok_or_else(|| AbiError::Encode(format!("{} is not numeric", value.type_tag())))?;
            Ok(numeric_word(&v)?.to_vec())
        }
        SolType::Address => match value {
            Value::Address(a) => {
                let mut out = vec![0u8; 32];
                out[12..].copy_from_slice(a.as_slice());
                Ok(out)
            }
            other => Err(AbiError::Encode(format!(
                "{} is not an address",
                other.type_tag()
            ))),
        },
        SolType::Bool => match value {
            Value::Bool(b) => Ok(uint_word(&BigInt::from(*b as u8))?.to_vec()),
            Value::Int(v) if !v.is_zero() => Ok(uint_word(&BigInt::from(1u8))?.to_vec()),
            Value::Int(_) => Ok(uint_word(&BigInt::zero())?.to_vec()),
            other => Err(AbiError::Encode(format!(
                "{} is not a bool",
                other.type_tag()
            ))),
        },
        SolType::FixedBytes(n) => match value {
            Value::Bytes(b) if b.len() <= WORD => {
                let mut out = vec![0u8; 32];
                let take = b.len().min(*n as usize);
                out[..take].copy_from_slice(&b[..take]);
                Ok(out)
            }
            other => Err(AbiError::Encode(format!(
                "{} does not fit bytes{}",
                other.type_tag(),
                n
            ))),
        },
        SolType::Array {
            elem,
            len: Some(n),
        } => {
            let items = array_items(value, elem)?;
            if items.len() != *n as usize {
                return Err(AbiError::Encode(format!(
                    "fixed array length mismatch: want {}, got {}",
                    n,
                    items.len()
                )));
            }
            let mut out = Vec::new();
            for item in &items {
                out.extend(encode_static(elem, item)?);
            }
            Ok(out)
        }
        other => Err(AbiError::Encode(format!("type {} is not head-encoded", other))),
    }
}

fn encode_dynamic(ty: &SolType, value: &Value) -> AbiResult<Vec<u8>> {
    match ty {
        SolType::Bytes | SolType::String => {
            let bytes = match value {
                Value::Bytes(b) => b.clone(),
                Value::Str(s) => s.as_bytes().to_vec(),
                other => {
                    return Err(AbiError::Encode(format!(
                        "{} is not byte-like",
                        other.type_tag()
                    )))
                }
            };
            let mut out = uint_word(&BigInt::from(bytes.len()))?.to_vec();
            out.extend(&bytes);
            let pad = (WORD - bytes.len() % WORD) % WORD;
            out.extend(std::iter::repeat(0u8).take(pad));
            Ok(out)
        }
        SolType::Array { elem, len } => {
            let items = array_items(value, elem)?;
            let mut out = Vec::new();
            if len.is_none() {
                out.extend(uint_word(&BigInt::from(items.len()))?);
            } else if items.len() != len.unwrap() as usize {
                return Err(AbiError::Encode(format!(
                    "fixed array length mismatch: want {}, got {}",
                    len.unwrap(),
                    items.len()
                )));
            }
            if elem.is_static() {
                for item in &items {
                    out.extend(encode_static(elem, item)?);
                }
            } else {
                let head_size = items.len() * WORD;
                let mut heads = Vec::new();
                let mut tails = Vec::new();
                for item in &items {
                    heads.extend(uint_word(&BigInt::from(head_size + tails.len()))?);
                    tails.extend(encode_dynamic(elem, item)?);
                }
                out.extend(heads);
                out.extend(tails);
            }
            Ok(out)
        }
        other => Err(AbiError::Encode(format!("type {} is not tail-encoded", other))),
    }
}

fn array_items(value: &Value, elem: &SolType) -> AbiResult<Vec<Value>> {
    match value {
        Value::List(items) => Ok(items.clone()),
        // uint8[] and a byte vector are interchangeable.
        Value::Bytes(b) if matches!(elem, SolType::Uint(8)) => {
            Ok(b.iter().map(|&x| Value::Int(BigInt::from(x))).collect())
        }
        other => Err(AbiError::Encode(format!(
            "{} is not an array",
            other.type_tag()
        ))),
    }
}
