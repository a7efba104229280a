// SPDX-License-Identifier: AGPL-3.0

//! Simulation results and injectable pre-states.

use crate::frames::ExecPath;
use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Hex-string serde for raw byte fields (`0x…`).
pub mod serde_hex_bytes {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        let digits = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(digits).map_err(de::Error::custom)
    }
}

/// Optional variant of [`serde_hex_bytes`].
pub mod serde_hex_bytes_opt {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_str(&format!("0x{}", hex::encode(b))),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let s: Option<String> = Option::deserialize(deserializer)?;
        match s {
            Some(s) => {
                let digits = s.strip_prefix("0x").unwrap_or(&s);
                hex::decode(digits).map(Some).map_err(de::Error::custom)
            }
            None => Ok(None),
        }
    }
}

/// Before/after of a single storage slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotChange {
    pub before: B256,
    pub after: B256,
}

/// Per-account observed mutation during a simulation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StateChange {
    /// Hex big-int.
    pub balance_before: String,
    pub balance_after: String,
    #[serde(default)]
    pub storage_changes: BTreeMap<B256, SlotChange>,
}

/// Outcome of a single simulated execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub success: bool,
    /// Raw program counters, unqualified.
    pub jump_dests: Vec<u64>,
    /// Contract-qualified path with the protected entry index.
    pub path: ExecPath,
    pub gas_used: u64,
    #[serde(with = "serde_hex_bytes")]
    pub return_data: Vec<u8>,
    #[serde(default)]
    pub state_changes: BTreeMap<Address, StateChange>,
}

impl SimulationResult {
    /// Storage slots of `contract` that changed, with their post-values.
    pub fn changed_slots(&self, contract: Address) -> Vec<(B256, B256)> {
        self.state_changes
            .get(&contract)
            .map(|c| {
                c.storage_changes
                    .iter()
                    .filter(|(_, ch)| ch.before != ch.after)
                    .map(|(slot, ch)| (*slot, ch.after))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Injected starting state for one account.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccountOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
    #[serde(
        default,
        with = "serde_hex_bytes_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub code: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<BTreeMap<B256, B256>>,
}

impl AccountOverride {
    /// Overlay `other` on top of this override; `other` wins per field, and
    /// storage merges slot-wise.
    pub fn merge_from(&mut self, other: &AccountOverride) {
        if other.balance.is_some() {
            self.balance = other.balance;
        }
        if other.nonce.is_some() {
            self.nonce = other.nonce;
        }
        if other.code.is_some() {
            self.code = other.code.clone();
        }
        if let Some(theirs) = &other.storage {
            let slots = self.storage.get_or_insert_with(BTreeMap::new);
            for (slot, value) in theirs {
                slots.insert(*slot, *value);
            }
        }
    }

    pub fn has_code(&self) -> bool {
        self.code.as_ref().map(|c| !c.is_empty()).unwrap_or(false)
    }
}

/// Pre-state for a simulated run, per account.
pub type StateOverride = BTreeMap<Address, AccountOverride>;

/// Overlay `overlay` onto `base`, account by account.
pub fn merge_overrides(base: &mut StateOverride, overlay: &StateOverride) {
    for (addr, acc) in overlay {
        base.entry(*addr).or_default().merge_from(acc);
    }
}

/// State captured at a specific protected-call site of the original
/// transaction, for injection ahead of variant runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSnapshot {
    pub call_index: usize,
    pub overrides: StateOverride,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn b256(byte: u8) -> B256 {
        B256::repeat_byte(byte)
    }

    #[test]
    fn test_changed_slots_filters_noops() {
        let mut storage_changes = BTreeMap::new();
        storage_changes.insert(
            b256(1),
            SlotChange {
                before: b256(0),
                after: b256(9),
            },
        );
        storage_changes.insert(
            b256(2),
            SlotChange {
                before: b256(5),
                after: b256(5),
            },
        );

        let mut state_changes = BTreeMap::new();
        state_changes.insert(
            addr(0xaa),
            StateChange {
                balance_before: "0x0".to_string(),
                balance_after: "0x0".to_string(),
                storage_changes,
            },
        );

        let result = SimulationResult {
            success: true,
            jump_dests: vec![],
            path: ExecPath::empty(),
            gas_used: 21_000,
            return_data: vec![],
            state_changes,
        };

        let changed = result.changed_slots(addr(0xaa));
        assert_eq!(changed, vec![(b256(1), b256(9))]);
        assert!(result.changed_slots(addr(0xbb)).is_empty());
    }

    #[test]
    fn test_account_override_merge() {
        let mut base = AccountOverride {
            balance: Some(U256::from(1u64)),
            nonce: None,
            code: Some(vec![0x60]),
            storage: Some(BTreeMap::from([(b256(1), b256(1))])),
        };
        let overlay = AccountOverride {
            balance: None,
            nonce: Some(7),
            code: None,
            storage: Some(BTreeMap::from([(b256(1), b256(2)), (b256(3), b256(3))])),
        };

        base.merge_from(&overlay);
        assert_eq!(base.balance, Some(U256::from(1u64)));
        assert_eq!(base.nonce, Some(7));
        assert!(base.has_code());
        let storage = base.storage.unwrap();
        assert_eq!(storage.get(&b256(1)), Some(&b256(2)));
        assert_eq!(storage.get(&b256(3)), Some(&b256(3)));
    }

    #[test]
    fn test_merge_overrides_adds_accounts() {
        let mut base: StateOverride = BTreeMap::new();
        base.insert(
            addr(1),
            AccountOverride {
                balance: Some(U256::from(5u64)),
                ..Default::default()
            },
        );

        let mut overlay: StateOverride = BTreeMap::new();
        overlay.insert(
            addr(2),
            AccountOverride {
                nonce: Some(1),
                ..Default::default()
            },
        );

        merge_overrides(&mut base, &overlay);
        assert_eq!(base.len(), 2);
        assert_eq!(base.get(&addr(2)).unwrap().nonce, Some(1));
    }

    #[test]
    fn test_hex_bytes_serde() {
        #[derive(Serialize, Deserialize)]
        struct Wrap {
            #[serde(with = "serde_hex_bytes")]
            data: Vec<u8>,
        }

        let w = Wrap {
            data: vec![0xde, 0xad],
        };
        let json = serde_json::to_string(&w).unwrap();
        assert_eq!(json, r#"{"data":"0xdead"}"#);

        let back: Wrap = serde_json::from_str(&json).unwrap();
        assert_eq!(back.data, vec![0xde, 0xad]);
    }
}
