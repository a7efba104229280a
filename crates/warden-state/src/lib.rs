// SPDX-License-Identifier: AGPL-3.0

//! On-disk resources consumed by a session: extracted contract ABIs, known
//! attack-state snapshots, and externally supplied constraint rules.
//!
//! Lookups are cached in [`Catalogs`], a write-once map owned by the session
//! (or shared between sessions by the caller); entries are keyed by
//! immutable strings and never invalidated.

use alloy_primitives::{Address, B256, U256};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use warden_abi::ContractAbi;
use warden_types::hexnum::normalize_slot;
use warden_types::{AccountOverride, StateOverride, Value};

/// Environment variables overriding the on-disk search root, in priority
/// order.
pub const PROJECT_ROOT_ENV: [&str; 3] = ["FIREWALL_PROJECT_ROOT", "PROJECT_ROOT", "FW_PROJECT_ROOT"];

/// Directory tree searched for `abi.json` files.
pub const EXTRACTED_CONTRACTS_DIR: &str = "extracted_contracts";

/// File name of a project's known attack-state snapshot.
pub const ATTACK_STATE_FILE: &str = "attack_state.json";

/// File name of the externally supplied constraint-range rules.
pub const CONSTRAINT_RULES_FILE: &str = "constraint_rules_v2.json";

/// Resolve the search root from the environment, falling back to the
/// current directory.
pub fn project_root() -> PathBuf {
    for key in PROJECT_ROOT_ENV {
        if let Ok(v) = std::env::var(key) {
            if !v.trim().is_empty() {
                return PathBuf::from(v);
            }
        }
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Locate the `abi.json` for an address: any directory under
/// `extracted_contracts/` whose lowercased path contains the lowercased
/// 40-hex form of the address.
pub fn find_abi_path(root: &Path, address: Address) -> Option<PathBuf> {
    let needle = hex::encode(address.as_slice());
    let base = root.join(EXTRACTED_CONTRACTS_DIR);
    if !base.is_dir() {
        return None;
    }

    let mut stack = vec![base];
    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if path.to_string_lossy().to_lowercase().contains(&needle) {
                let candidate = path.join("abi.json");
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
            stack.push(path);
        }
    }
    None
}

/// Load and index an `abi.json`.
pub fn load_abi(path: &Path) -> Result<ContractAbi> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let doc: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("invalid JSON in {}", path.display()))?;
    ContractAbi::from_json(&doc)
        .map_err(|e| anyhow::anyhow!("failed to index {}: {}", path.display(), e))
}

fn json_quantity_u256(v: &serde_json::Value) -> Option<U256> {
    match v {
        serde_json::Value::Number(n) => n.as_u64().map(U256::from),
        serde_json::Value::String(s) => {
            let t = s.trim();
            if t.is_empty() {
                return None;
            }
            if let Some(digits) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
                U256::from_str_radix(digits, 16).ok()
            } else {
                U256::from_str_radix(t, 10).ok()
            }
        }
        _ => None,
    }
}

fn json_quantity_u64(v: &serde_json::Value) -> Option<u64> {
    json_quantity_u256(v).and_then(|v| u64::try_from(v).ok())
}

fn parse_address(s: &str) -> Option<Address> {
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))?;
    if digits.len() != 40 {
        return None;
    }
    let bytes = hex::decode(digits).ok()?;
    let mut out = [0u8; 20];
    out.copy_from_slice(&bytes);
    Some(Address::from(out))
}

fn parse_b256_quantity(s: &str) -> Option<B256> {
    let v = json_quantity_u256(&serde_json::Value::String(s.to_string()))?;
    Some(B256::from(v.to_be_bytes::<32>()))
}

#[derive(Debug, Deserialize)]
struct RawAccountState {
    #[serde(default)]
    balance_wei: Option<serde_json::Value>,
    #[serde(default)]
    nonce: Option<serde_json::Value>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    storage: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RawAttackState {
    #[serde(default)]
    addresses: BTreeMap<String, RawAccountState>,
}

/// Load an `attack_state.json` into an injectable [`StateOverride`].
///
/// Integer fields accept decimal or `0x` hex; slot keys normalize to
/// `0x` + 64 hex; zero-like balances and nonces and empty code are treated
/// as absent.
pub fn load_attack_state(path: &Path) -> Result<StateOverride> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let raw: RawAttackState = serde_json::from_str(&text)
        .with_context(|| format!("invalid attack state in {}", path.display()))?;

    let mut overrides = StateOverride::new();
    for (addr_str, account) in raw.addresses {
        let Some(address) = parse_address(&addr_str) else {
            warden_logs::warn_unique(&format!(
                "skipping attack-state entry with bad address: {}",
                addr_str
            ));
            continue;
        };

        let mut out = AccountOverride::default();
        if let Some(balance) = account.balance_wei.as_ref().and_then(json_quantity_u256) {
            if balance != U256::ZERO {
                out.balance = Some(balance);
            }
        }
        if let Some(nonce) = account.nonce.as_ref().and_then(json_quantity_u64) {
            if nonce != 0 {
                out.nonce = Some(nonce);
            }
        }
        if let Some(code) = account.code.as_deref() {
            let digits = code.strip_prefix("0x").unwrap_or(code);
            if let Ok(bytes) = hex::decode(digits) {
                if !bytes.is_empty() {
                    out.code = Some(bytes);
                }
            }
        }
        if !account.storage.is_empty() {
            let mut slots = BTreeMap::new();
            for (slot, value) in &account.storage {
                let key = normalize_slot(slot);
                let Some(slot_key) = parse_b256_quantity(&key) else {
                    continue;
                };
                let Some(slot_value) = parse_b256_quantity(value) else {
                    continue;
                };
                slots.insert(slot_key, slot_value);
            }
            if !slots.is_empty() {
                out.storage = Some(slots);
            }
        }
        overrides.insert(address, out);
    }
    Ok(overrides)
}

/// One externally supplied constraint entry for a function parameter.
#[derive(Debug, Clone, Deserialize)]
pub struct FunctionConstraint {
    pub param_index: u32,
    #[serde(default)]
    pub safe_threshold: Option<Value>,
    #[serde(default)]
    pub danger_threshold: Option<Value>,
    #[serde(default)]
    pub is_safe_upper: Option<bool>,
    #[serde(default)]
    pub attack_values: Vec<Value>,
}

/// Contents of `constraint_rules_v2.json`, keyed by function name or full
/// signature.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConstraintRules {
    #[serde(default)]
    pub functions: BTreeMap<String, Vec<FunctionConstraint>>,
}

impl ConstraintRules {
    /// Look up by full signature first, then by bare name.
    pub fn lookup(&self, signature: &str) -> Option<&Vec<FunctionConstraint>> {
        if let Some(entry) = self.functions.get(signature) {
            return Some(entry);
        }
        let name = signature.split('(').next().unwrap_or(signature);
        self.functions.get(name)
    }
}

/// Load `constraint_rules_v2.json`.
pub fn load_constraint_rules(path: &Path) -> Result<ConstraintRules> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("invalid constraint rules in {}", path.display()))
}

/// Session-owned caches over the on-disk resources. Entries are write-once;
/// negative lookups are cached too so a missing ABI costs one directory walk
/// per address, not one per variant.
pub struct Catalogs {
    root: PathBuf,
    abis: Mutex<HashMap<Address, Option<Arc<ContractAbi>>>>,
    attack_states: Mutex<HashMap<String, Option<Arc<StateOverride>>>>,
    constraint_rules: Mutex<Option<Arc<ConstraintRules>>>,
}

impl Catalogs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            abis: Mutex::new(HashMap::new()),
            attack_states: Mutex::new(HashMap::new()),
            constraint_rules: Mutex::new(None),
        }
    }

    /// Catalogs rooted at the environment-resolved project root.
    pub fn from_env() -> Self {
        Self::new(project_root())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// ABI for an address, searched lazily and cached (including misses).
    pub fn abi_for(&self, address: Address) -> Option<Arc<ContractAbi>> {
        let mut abis = self.abis.lock().unwrap();
        if let Some(cached) = abis.get(&address) {
            return cached.clone();
        }
        let loaded = find_abi_path(&self.root, address).and_then(|path| {
            match load_abi(&path) {
                Ok(abi) => Some(Arc::new(abi)),
                Err(e) => {
                    warden_logs::warn_unique(&format!("{:#}", e));
                    None
                }
            }
        });
        abis.insert(address, loaded.clone());
        loaded
    }

    /// Known attack state for a project id, looked up at
    /// `<root>/<project>/attack_state.json` then `<root>/attack_state.json`.
    pub fn attack_state(&self, project_id: &str) -> Option<Arc<StateOverride>> {
        let mut states = self.attack_states.lock().unwrap();
        if let Some(cached) = states.get(project_id) {
            return cached.clone();
        }
        let candidates = [
            self.root.join(project_id).join(ATTACK_STATE_FILE),
            self.root.join(ATTACK_STATE_FILE),
        ];
        let loaded = candidates.iter().find(|p| p.is_file()).and_then(|path| {
            match load_attack_state(path) {
                Ok(state) => {
                    tracing::debug!(path = %path.display(), accounts = state.len(), "loaded attack state");
                    Some(Arc::new(state))
                }
                Err(e) => {
                    warden_logs::warn_unique(&format!("{:#}", e));
                    None
                }
            }
        });
        states.insert(project_id.to_string(), loaded.clone());
        loaded
    }

    /// The constraint-rules file at the root, loaded once.
    pub fn constraint_rules(&self) -> Arc<ConstraintRules> {
        let mut rules = self.constraint_rules.lock().unwrap();
        if let Some(cached) = rules.as_ref() {
            return cached.clone();
        }
        let path = self.root.join(CONSTRAINT_RULES_FILE);
        let loaded = if path.is_file() {
            match load_constraint_rules(&path) {
                Ok(r) => Arc::new(r),
                Err(e) => {
                    warden_logs::warn_unique(&format!("{:#}", e));
                    Arc::new(ConstraintRules::default())
                }
            }
        } else {
            Arc::new(ConstraintRules::default())
        };
        *rules = Some(loaded.clone());
        loaded
    }
}
