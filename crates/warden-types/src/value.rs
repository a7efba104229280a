// SPDX-License-Identifier: AGPL-3.0

//! Solidity type strings and dynamically typed parameter values.

use lazy_static::lazy_static;
use num_bigint::BigInt;
use num_traits::Zero;
use regex::Regex;
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use warden_exceptions::{AbiError, AbiResult};

use alloy_primitives::Address;

lazy_static! {
    static ref ARRAY_RE: Regex = Regex::new(r"^(.*)\[([0-9]*)\]$").unwrap();
    static ref INT_RE: Regex = Regex::new(r"^(u?)int([0-9]*)$").unwrap();
    static ref BYTES_RE: Regex = Regex::new(r"^bytes([0-9]+)$").unwrap();
}

/// A parsed Solidity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolType {
    Uint(u16),
    Int(u16),
    Address,
    Bool,
    FixedBytes(u8),
    Bytes,
    String,
    /// Array of `elem`; `len` is `None` for dynamic arrays.
    Array {
        elem: Box<SolType>,
        len: Option<u32>,
    },
}

impl SolType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, SolType::Uint(_) | SolType::Int(_))
    }

    pub fn is_address(&self) -> bool {
        matches!(self, SolType::Address)
    }

    pub fn is_array(&self) -> bool {
        matches!(self, SolType::Array { .. })
    }

    /// Bit width of numeric types.
    pub fn bits(&self) -> Option<u16> {
        match self {
            SolType::Uint(b) | SolType::Int(b) => Some(*b),
            _ => None,
        }
    }

    /// Whether the ABI head of this type is a 32-byte word (as opposed to an
    /// offset into the tail).
    pub fn is_static(&self) -> bool {
        match self {
            SolType::Bytes | SolType::String => false,
            SolType::Array { len: None, .. } => false,
            SolType::Array {
                elem,
                len: Some(_),
            } => elem.is_static(),
            _ => true,
        }
    }

    /// Number of 32-byte head words a static type occupies.
    pub fn static_words(&self) -> usize {
        match self {
            SolType::Array {
                elem,
                len: Some(n),
            } => elem.static_words() * *n as usize,
            _ => 1,
        }
    }
}

impl FromStr for SolType {
    type Err = AbiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(caps) = ARRAY_RE.captures(s) {
            let elem: SolType = caps.get(1).unwrap().as_str().parse()?;
            let dim = caps.get(2).unwrap().as_str();
            let len = if dim.is_empty() {
                None
            } else {
                Some(
                    dim.parse::<u32>()
                        .map_err(|e| AbiError::TypeParse(format!("{}: {}", s, e)))?,
                )
            };
            return Ok(SolType::Array {
                elem: Box::new(elem),
                len,
            });
        }

        if let Some(caps) = INT_RE.captures(s) {
            let unsigned = !caps.get(1).unwrap().as_str().is_empty();
            let bits_str = caps.get(2).unwrap().as_str();
            let bits = if bits_str.is_empty() {
                256
            } else {
                bits_str
                    .parse::<u16>()
                    .map_err(|e| AbiError::TypeParse(format!("{}: {}", s, e)))?
            };
            if bits == 0 || bits > 256 || bits % 8 != 0 {
                return Err(AbiError::TypeParse(format!("bad integer width: {}", s)));
            }
            return Ok(if unsigned {
                SolType::Uint(bits)
            } else {
                SolType::Int(bits)
            });
        }

        if let Some(caps) = BYTES_RE.captures(s) {
            let n = caps
                .get(1)
                .unwrap()
                .as_str()
                .parse::<u8>()
                .map_err(|e| AbiError::TypeParse(format!("{}: {}", s, e)))?;
            if n == 0 || n > 32 {
                return Err(AbiError::TypeParse(format!("bad bytes width: {}", s)));
            }
            return Ok(SolType::FixedBytes(n));
        }

        match s {
            "address" => Ok(SolType::Address),
            "bool" => Ok(SolType::Bool),
            "bytes" => Ok(SolType::Bytes),
            "string" => Ok(SolType::String),
            _ => Err(AbiError::TypeParse(s.to_string())),
        }
    }
}

impl fmt::Display for SolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolType::Uint(b) => write!(f, "uint{}", b),
            SolType::Int(b) => write!(f, "int{}", b),
            SolType::Address => write!(f, "address"),
            SolType::Bool => write!(f, "bool"),
            SolType::FixedBytes(n) => write!(f, "bytes{}", n),
            SolType::Bytes => write!(f, "bytes"),
            SolType::String => write!(f, "string"),
            SolType::Array { elem, len: None } => write!(f, "{}[]", elem),
            SolType::Array {
                elem,
                len: Some(n),
            } => write!(f, "{}[{}]", elem, n),
        }
    }
}

impl Serialize for SolType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SolType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Split the outermost array dimension off a type string.
///
/// Returns `(element_type, length, is_array)` where `length` is −1 for a
/// dynamic array and 0 for non-arrays.
pub fn parse_array_type(s: &str) -> AbiResult<(SolType, i64, bool)> {
    let ty: SolType = s.parse()?;
    match ty {
        SolType::Array { elem, len } => {
            let n = len.map(|n| n as i64).unwrap_or(-1);
            Ok((*elem, n, true))
        }
        other => Ok((other, 0, false)),
    }
}

/// A decoded argument value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Signed or unsigned integer of arbitrary precision.
    Int(BigInt),
    Address(Address),
    Bool(bool),
    Bytes(Vec<u8>),
    Str(String),
    /// Homogeneous list.
    List(Vec<Value>),
}

impl Value {
    pub fn type_tag(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Address(_) => "address",
            Value::Bool(_) => "bool",
            Value::Bytes(_) => "bytes",
            Value::Str(_) => "string",
            Value::List(_) => "list",
        }
    }

    /// Canonical string form, used as the dedup key for generated variants
    /// and as the feedback-map key.
    pub fn canonical_string(&self) -> String {
        match self {
            Value::Int(v) => v.to_string(),
            Value::Address(a) => format!("0x{}", hex::encode(a.as_slice())),
            Value::Bool(b) => b.to_string(),
            Value::Bytes(b) => format!("0x{}", hex::encode(b)),
            Value::Str(s) => s.clone(),
            Value::List(items) => {
                let inner: Vec<String> = items.iter().map(|v| v.canonical_string()).collect();
                format!("[{}]", inner.join(","))
            }
        }
    }

    /// Numeric view of the value, if one exists. Bytes read as a big-endian
    /// unsigned quantity; strings parse as hex or decimal.
    pub fn as_bigint(&self) -> Option<BigInt> {
        match self {
            Value::Int(v) => Some(v.clone()),
            Value::Bool(b) => Some(BigInt::from(*b as u8)),
            Value::Address(a) => Some(BigInt::from_bytes_be(
                num_bigint::Sign::Plus,
                a.as_slice(),
            )),
            Value::Bytes(b) => {
                if b.is_empty() {
                    Some(BigInt::zero())
                } else {
                    Some(BigInt::from_bytes_be(num_bigint::Sign::Plus, b))
                }
            }
            Value::Str(s) => crate::hexnum::parse_bigint(s),
            Value::List(_) => None,
        }
    }

    /// Whether this value is shaped like the declared type.
    pub fn matches_type(&self, ty: &SolType) -> bool {
        match (self, ty) {
            (Value::Int(_), t) if t.is_numeric() => true,
            (Value::Address(_), SolType::Address) => true,
            (Value::Bool(_), SolType::Bool) => true,
            (Value::Bytes(_), SolType::Bytes | SolType::FixedBytes(_)) => true,
            (Value::Str(_), SolType::String) => true,
            (Value::List(items), SolType::Array { elem, len }) => {
                if let Some(n) = len {
                    if items.len() != *n as usize {
                        return false;
                    }
                }
                items.iter().all(|v| v.matches_type(elem))
            }
            (Value::Bytes(_), SolType::Array { elem, .. }) => {
                matches!(**elem, SolType::Uint(8))
            }
            _ => false,
        }
    }

    /// Zero value for a type.
    pub fn default_for(ty: &SolType) -> Value {
        match ty {
            SolType::Uint(_) | SolType::Int(_) => Value::Int(BigInt::zero()),
            SolType::Address => Value::Address(Address::ZERO),
            SolType::Bool => Value::Bool(false),
            SolType::FixedBytes(n) => Value::Bytes(vec![0u8; *n as usize]),
            SolType::Bytes => Value::Bytes(Vec::new()),
            SolType::String => Value::Str(String::new()),
            SolType::Array { .. } => Value::List(Vec::new()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            // Decimal string: JSON numbers cannot carry 256-bit quantities.
            Value::Int(v) => serializer.serialize_str(&v.to_string()),
            Value::Address(a) => {
                serializer.serialize_str(&format!("0x{}", hex::encode(a.as_slice())))
            }
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Bytes(b) => serializer.serialize_str(&format!("0x{}", hex::encode(b))),
            Value::Str(s) => serializer.serialize_str(s),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a bool, integer, string, or array")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Int(BigInt::from(v)))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        Ok(Value::Int(BigInt::from(v)))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        // Type-directed coercion happens at use sites, so raw text is kept.
        Ok(Value::Str(v.to_string()))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::List(items))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

/// A decoded call argument with its position and declared type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub ty: SolType,
    pub value: Value,
    pub is_array: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_len: Option<u32>,
}

impl Parameter {
    pub fn new(index: u32, ty: SolType, value: Value) -> Self {
        let (is_array, array_len) = match &ty {
            SolType::Array { len, .. } => (true, *len),
            _ => (false, None),
        };
        Self {
            index,
            name: None,
            ty,
            value,
            is_array,
            array_len,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}
