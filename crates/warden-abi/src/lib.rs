// SPDX-License-Identifier: AGPL-3.0

//! Calldata parsing and re-encoding.
//!
//! Preferred path: an on-disk ABI resolves the selector to a method and the
//! arguments decode with full type recovery. Fallback path: the argument
//! region is chunked into 32-byte words with per-word type guessing, enough
//! to count parameters and drive mutation.

pub mod codec;
pub mod coerce;

use lazy_static::lazy_static;
use num_bigint::{BigInt, Sign};
use std::collections::HashMap;
use warden_exceptions::{AbiError, AbiResult};
use warden_hashes::function_selector;
use warden_types::{Parameter, SolType, Value};

pub use coerce::coerce;

lazy_static! {
    /// Known no-argument entry points treated as pseudo-methods when the
    /// selector has no matching ABI, so downstream code does not
    /// special-case missing ABIs for them.
    static ref SELECTOR_ALIASES: HashMap<[u8; 4], &'static str> = {
        let mut m = HashMap::new();
        for (sig, name) in [
            ("deposit()", "deposit"),
            ("withdraw()", "withdraw"),
            ("claim()", "claim"),
            ("harvest()", "harvest"),
            ("compound()", "compound"),
            ("exit()", "exit"),
        ] {
            m.insert(function_selector(sig), name);
        }
        m
    };
}

/// Pseudo-method name for a selector in the static alias table.
pub fn selector_alias(selector: &[u8; 4]) -> Option<&'static str> {
    SELECTOR_ALIASES.get(selector).copied()
}

/// First 4 bytes of keccak256 of a canonical signature.
pub fn get_selector(signature: &str) -> [u8; 4] {
    function_selector(signature)
}

/// One declared input of an ABI function.
#[derive(Debug, Clone)]
pub struct AbiInput {
    pub name: String,
    pub type_str: String,
    /// `None` when the type is outside the supported surface (tuples).
    pub parsed: Option<SolType>,
}

/// One function of a contract ABI.
#[derive(Debug, Clone)]
pub struct AbiFunction {
    pub name: String,
    pub signature: String,
    pub selector: [u8; 4],
    pub inputs: Vec<AbiInput>,
}

impl AbiFunction {
    /// Whether every input type is decodable.
    pub fn decodable(&self) -> bool {
        self.inputs.iter().all(|i| i.parsed.is_some())
    }

    fn input_types(&self) -> Vec<SolType> {
        self.inputs
            .iter()
            .filter_map(|i| i.parsed.clone())
            .collect()
    }
}

/// Selector-indexed view of a contract ABI.
#[derive(Debug, Clone, Default)]
pub struct ContractAbi {
    functions: HashMap<[u8; 4], AbiFunction>,
}

impl ContractAbi {
    /// Build from an `abi.json` document: either a bare item array or an
    /// object with an `abi` array.
    pub fn from_json(doc: &serde_json::Value) -> AbiResult<Self> {
        let items = doc
            .as_array()
            .or_else(|| doc.get("abi").and_then(|v| v.as_array()))
            .ok_or_else(|| AbiError::Decode("ABI document has no item array".to_string()))?;

        let mut functions = HashMap::new();
        for item in items {
            if item.get("type").and_then(|v| v.as_str()) != Some("function") {
                continue;
            }
            let name = item
                .get("name")
                .and_then(|v| v.as_str())
                .ok_or_else(|| AbiError::Decode("function item missing name".to_string()))?
                .to_string();
            let inputs_json = item
                .get("inputs")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();

            let mut inputs = Vec::with_capacity(inputs_json.len());
            let mut sig_types = Vec::with_capacity(inputs_json.len());
            for input in &inputs_json {
                let type_str = input
                    .get("type")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| AbiError::Decode("input missing type".to_string()))?
                    .to_string();
                let input_name = input
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                sig_types.push(signature_type(&type_str, input)?);
                inputs.push(AbiInput {
                    name: input_name,
                    parsed: type_str.parse::<SolType>().ok(),
                    type_str,
                });
            }

            let signature = format!("{}({})", name, sig_types.join(","));
            let selector = function_selector(&signature);
            functions.insert(
                selector,
                AbiFunction {
                    name,
                    signature,
                    selector,
                    inputs,
                },
            );
        }
        Ok(Self { functions })
    }

    pub fn function_by_selector(&self, selector: &[u8; 4]) -> Option<&AbiFunction> {
        self.functions.get(selector)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// Canonical signature fragment for a declared type, expanding tuples.
fn signature_type(type_str: &str, item: &serde_json::Value) -> AbiResult<String> {
    if let Some(rest) = type_str.strip_prefix("tuple") {
        let components = item
            .get("components")
            .and_then(|v| v.as_array())
            .ok_or_else(|| AbiError::Decode("tuple missing components".to_string()))?;
        let mut parts = Vec::with_capacity(components.len());
        for c in components {
            let t = c
                .get("type")
                .and_then(|v| v.as_str())
                .ok_or_else(|| AbiError::Decode("component missing type".to_string()))?;
            parts.push(signature_type(t, c)?);
        }
        return Ok(format!("({}){}", parts.join(","), rest));
    }
    Ok(type_str.to_string())
}

/// A decoded call.
#[derive(Debug, Clone)]
pub struct ParsedCall {
    pub selector: [u8; 4],
    pub params: Vec<Parameter>,
    /// Resolved method name, from the ABI or the alias table.
    pub method: Option<String>,
    /// Whether full ABI type recovery succeeded.
    pub abi_decoded: bool,
}

impl ParsedCall {
    pub fn values(&self) -> Vec<Value> {
        self.params.iter().map(|p| p.value.clone()).collect()
    }
}

/// Parse calldata into a selector and parameter list, ABI-guided when
/// possible and falling back to the 32-byte heuristic otherwise.
pub fn parse(calldata: &[u8], abi: Option<&ContractAbi>) -> AbiResult<ParsedCall> {
    if calldata.len() < 4 {
        return Err(AbiError::Malformed(format!(
            "calldata shorter than a selector: {} bytes",
            calldata.len()
        )));
    }
    let mut selector = [0u8; 4];
    selector.copy_from_slice(&calldata[..4]);
    let args = &calldata[4..];

    if let Some(func) = abi.and_then(|a| a.function_by_selector(&selector)) {
        if func.decodable() {
            match codec::decode_arguments(&func.input_types(), args) {
                Ok(values) => {
                    let params = values
                        .into_iter()
                        .zip(&func.inputs)
                        .enumerate()
                        .map(|(i, (value, input))| {
                            let ty = input.parsed.clone().unwrap();
                            let mut p = Parameter::new(i as u32, ty, value);
                            if !input.name.is_empty() {
                                p = p.with_name(input.name.clone());
                            }
                            p
                        })
                        .collect();
                    return Ok(ParsedCall {
                        selector,
                        params,
                        method: Some(func.name.clone()),
                        abi_decoded: true,
                    });
                }
                Err(e) => {
                    warden_logs::warn_unique(&format!(
                        "ABI decode of {} failed ({}), using heuristic layout",
                        func.signature, e
                    ));
                }
            }
        }
    }

    if let Some(alias) = selector_alias(&selector) {
        if abi.map(|a| a.function_by_selector(&selector).is_none()).unwrap_or(true) {
            return Ok(ParsedCall {
                selector,
                params: Vec::new(),
                method: Some(alias.to_string()),
                abi_decoded: false,
            });
        }
    }

    Ok(ParsedCall {
        selector,
        params: heuristic_decode(args),
        method: None,
        abi_decoded: false,
    })
}

/// Chunk the argument region into 32-byte words and guess each word's type.
pub fn heuristic_decode(args: &[u8]) -> Vec<Parameter> {
    let mut params = Vec::new();
    for (i, chunk) in args.chunks(32).enumerate() {
        let mut word = [0u8; 32];
        word[..chunk.len()].copy_from_slice(chunk);
        let leading_zeros = word.iter().take_while(|&&b| b == 0).count();

        let (ty, value) = if leading_zeros >= 28 && (word[31] == 0 || word[31] == 1) {
            (SolType::Bool, Value::Bool(word[31] == 1))
        } else if leading_zeros >= 12 && leading_zeros < 28 {
            let mut addr = [0u8; 20];
            addr.copy_from_slice(&word[12..]);
            (SolType::Address, Value::Address(addr.into()))
        } else {
            (
                SolType::Uint(256),
                Value::Int(BigInt::from_bytes_be(Sign::Plus, &word)),
            )
        };
        params.push(Parameter::new(i as u32, ty, value));
    }
    params
}

/// Re-pack a mutated value tuple into calldata.
///
/// With a decodable ABI function each value is first normalized to the
/// declared type; an encode failure after that propagates so the caller can
/// drop the variant. Without one, the 32-byte heuristic layout applies.
pub fn encode(
    selector: [u8; 4],
    values: &[Value],
    func: Option<&AbiFunction>,
) -> AbiResult<Vec<u8>> {
    let mut out = selector.to_vec();
    match func {
        Some(func) if func.decodable() => {
            let types = func.input_types();
            let coerced: Vec<Value> = values
                .iter()
                .zip(&types)
                .map(|(v, t)| coerce::coerce(v, t))
                .collect();
            out.extend(codec::encode_arguments(&types, &coerced)?);
        }
        _ => {
            for value in values {
                out.extend(heuristic_word(value)?);
            }
        }
    }
    Ok(out)
}

fn heuristic_word(value: &Value) -> AbiResult<[u8; 32]> {
    let mut out = [0u8; 32];
    match value {
        Value::Address(a) => {
            out[12..].copy_from_slice(a.as_slice());
            Ok(out)
        }
        Value::Bool(b) => {
            out[31] = *b as u8;
            Ok(out)
        }
        other => {
            let v = other.as_bigint().ok_or_else(|| {
                AbiError::Encode(format!("{} has no word form", other.type_tag()))
            })?;
            let bytes = warden_types::hexnum::truncate_to_bits(&v, 256).to_bytes_be();
            out[32 - bytes.len()..].copy_from_slice(&bytes);
            Ok(out)
        }
    }
}
