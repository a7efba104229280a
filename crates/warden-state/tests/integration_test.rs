// SPDX-License-Identifier: AGPL-3.0

use alloy_primitives::{Address, B256, U256};
use warden_state::{load_attack_state, Catalogs};

fn addr(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

fn write(path: &std::path::Path, content: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

#[test]
fn test_abi_discovery_by_address_path() {
    let root = tempfile::tempdir().unwrap();
    let address = addr(0xab);
    let dir = format!(
        "extracted_contracts/Vault_0x{}",
        hex::encode_upper(address.as_slice())
    );
    write(
        &root.path().join(dir).join("abi.json"),
        r#"[{"type": "function", "name": "withdraw", "inputs": [{"name": "amount", "type": "uint256"}]}]"#,
    );

    let catalogs = Catalogs::new(root.path());
    let abi = catalogs.abi_for(address).expect("abi should be found");
    assert_eq!(abi.len(), 1);

    // Second lookup hits the cache; a missing address caches the miss.
    assert!(catalogs.abi_for(address).is_some());
    assert!(catalogs.abi_for(addr(0xcd)).is_none());
    assert!(catalogs.abi_for(addr(0xcd)).is_none());
}

#[test]
fn test_attack_state_normalization() {
    let root = tempfile::tempdir().unwrap();
    let path = root.path().join("attack_state.json");
    let account = format!("0x{}", "aa".repeat(20));
    write(
        &path,
        &format!(
            r#"{{
                "addresses": {{
                    "{}": {{
                        "balance_wei": "1000",
                        "nonce": "0x5",
                        "code": "0x6001",
                        "storage": {{
                            "0x1": "0x64",
                            "2": "100"
                        }}
                    }},
                    "not-an-address": {{"balance_wei": "5"}}
                }}
            }}"#,
            account
        ),
    );

    let state = load_attack_state(&path).unwrap();
    assert_eq!(state.len(), 1);

    let acc = state.get(&addr(0xaa)).unwrap();
    assert_eq!(acc.balance, Some(U256::from(1000u64)));
    assert_eq!(acc.nonce, Some(5));
    assert_eq!(acc.code.as_deref(), Some(&[0x60u8, 0x01][..]));

    let storage = acc.storage.as_ref().unwrap();
    let slot1 = B256::from(U256::from(1u64).to_be_bytes::<32>());
    let slot2 = B256::from(U256::from(2u64).to_be_bytes::<32>());
    assert_eq!(
        storage.get(&slot1),
        Some(&B256::from(U256::from(100u64).to_be_bytes::<32>()))
    );
    assert_eq!(
        storage.get(&slot2),
        Some(&B256::from(U256::from(100u64).to_be_bytes::<32>()))
    );
}

#[test]
fn test_attack_state_zero_like_fields_absent() {
    let root = tempfile::tempdir().unwrap();
    let path = root.path().join("attack_state.json");
    let account = format!("0x{}", "bb".repeat(20));
    write(
        &path,
        &format!(
            r#"{{"addresses": {{"{}": {{"balance_wei": "0", "nonce": 0, "code": "0x"}}}}}}"#,
            account
        ),
    );

    let state = load_attack_state(&path).unwrap();
    let acc = state.get(&addr(0xbb)).unwrap();
    assert!(acc.balance.is_none());
    assert!(acc.nonce.is_none());
    assert!(acc.code.is_none());
    assert!(acc.storage.is_none());
}

#[test]
fn test_attack_state_catalog_project_scoping() {
    let root = tempfile::tempdir().unwrap();
    let account = format!("0x{}", "cc".repeat(20));
    write(
        &root.path().join("proj-1").join("attack_state.json"),
        &format!(r#"{{"addresses": {{"{}": {{"balance_wei": "7"}}}}}}"#, account),
    );

    let catalogs = Catalogs::new(root.path());
    let state = catalogs.attack_state("proj-1").expect("state should load");
    assert_eq!(
        state.get(&addr(0xcc)).unwrap().balance,
        Some(U256::from(7u64))
    );
    assert!(catalogs.attack_state("proj-2").is_none());
}

#[test]
fn test_constraint_rules_catalog_defaults_empty() {
    let root = tempfile::tempdir().unwrap();
    let catalogs = Catalogs::new(root.path());
    assert!(catalogs.constraint_rules().functions.is_empty());

    write(
        &root.path().join("constraint_rules_v2.json"),
        r#"{"functions": {"withdraw(uint256)": [{"param_index": 0, "safe_threshold": "4", "is_safe_upper": true}]}}"#,
    );
    // Already cached as empty for this catalog instance.
    assert!(catalogs.constraint_rules().functions.is_empty());

    let fresh = Catalogs::new(root.path());
    assert_eq!(fresh.constraint_rules().functions.len(), 1);
}
