// SPDX-License-Identifier: AGPL-3.0

//! Call trees and contract-qualified execution paths.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One visited `JUMPDEST`, qualified by the executing contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JumpDest {
    pub contract: Address,
    pub pc: u64,
}

impl JumpDest {
    pub fn new(contract: Address, pc: u64) -> Self {
        Self { contract, pc }
    }
}

impl fmt::Display for JumpDest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.contract, self.pc)
    }
}

/// An ordered `JumpDest` sequence with the position of the first frame inside
/// the protected contract (−1 when the protected contract never executes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecPath {
    pub dests: Vec<JumpDest>,
    pub protected_start_index: isize,
}

impl ExecPath {
    /// Build a path and locate the protected entry point.
    pub fn new(dests: Vec<JumpDest>, protected: Address) -> Self {
        let protected_start_index = dests
            .iter()
            .position(|d| d.contract == protected)
            .map(|i| i as isize)
            .unwrap_or(-1);
        Self {
            dests,
            protected_start_index,
        }
    }

    pub fn empty() -> Self {
        Self {
            dests: Vec::new(),
            protected_start_index: -1,
        }
    }

    pub fn len(&self) -> usize {
        self.dests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dests.is_empty()
    }

    /// Sub-path from the first protected `JumpDest` onward. The recorded
    /// index is trusted only if it still points at the protected contract;
    /// otherwise a linear scan recovers it.
    pub fn protected_slice(&self, protected: Address) -> &[JumpDest] {
        if self.protected_start_index >= 0 {
            let i = self.protected_start_index as usize;
            if self
                .dests
                .get(i)
                .map(|d| d.contract == protected)
                .unwrap_or(false)
            {
                return &self.dests[i..];
            }
        }
        match self.dests.iter().position(|d| d.contract == protected) {
            Some(i) => &self.dests[i..],
            None => &[],
        }
    }

    /// Sub-path starting at an arbitrary index, restricted to the protected
    /// contract's frames.
    pub fn protected_slice_from(&self, start: usize, protected: Address) -> Vec<JumpDest> {
        self.dests[start.min(self.dests.len())..]
            .iter()
            .filter(|d| d.contract == protected)
            .copied()
            .collect()
    }

    /// Whether any `(contract, pc)` pair of the protected contract repeats.
    pub fn has_repeated_pair(&self, protected: Address) -> bool {
        let mut seen = std::collections::HashSet::new();
        for d in &self.dests {
            if d.contract == protected && !seen.insert(d.pc) {
                return true;
            }
        }
        false
    }
}

/// A recorded call frame, possibly with nested sub-calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallFrame {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    #[serde(with = "crate::sim::serde_hex_bytes")]
    pub input: Vec<u8>,
    #[serde(default)]
    pub sub_calls: Vec<CallFrame>,
}

impl CallFrame {
    /// 4-byte selector of this frame's calldata, if present.
    pub fn selector(&self) -> Option<[u8; 4]> {
        if self.input.len() < 4 {
            return None;
        }
        let mut sel = [0u8; 4];
        sel.copy_from_slice(&self.input[..4]);
        Some(sel)
    }

    /// Argument bytes after the selector.
    pub fn args(&self) -> &[u8] {
        if self.input.len() < 4 {
            &[]
        } else {
            &self.input[4..]
        }
    }

    /// Preorder depth-first traversal. Trees from real traces can be deep,
    /// so this uses an explicit stack instead of recursion.
    pub fn walk(&self) -> Vec<&CallFrame> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(frame) = stack.pop() {
            out.push(frame);
            for child in frame.sub_calls.iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// All frames calling into `target`, in traversal order.
    pub fn calls_to(&self, target: Address) -> Vec<&CallFrame> {
        self.walk()
            .into_iter()
            .filter(|f| f.to == target)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn frame(to: Address, input: Vec<u8>, sub_calls: Vec<CallFrame>) -> CallFrame {
        CallFrame {
            from: addr(0xee),
            to,
            value: U256::ZERO,
            input,
            sub_calls,
        }
    }

    #[test]
    fn test_protected_start_index() {
        let protected = addr(0xaa);
        let other = addr(0xbb);
        let path = ExecPath::new(
            vec![
                JumpDest::new(other, 1),
                JumpDest::new(protected, 7),
                JumpDest::new(protected, 9),
            ],
            protected,
        );
        assert_eq!(path.protected_start_index, 1);
        assert_eq!(path.protected_slice(protected).len(), 2);
    }

    #[test]
    fn test_protected_slice_linear_fallback() {
        let protected = addr(0xaa);
        // Stale index pointing at a non-protected entry.
        let path = ExecPath {
            dests: vec![
                JumpDest::new(addr(0xbb), 1),
                JumpDest::new(protected, 5),
            ],
            protected_start_index: 0,
        };
        let slice = path.protected_slice(protected);
        assert_eq!(slice.len(), 1);
        assert_eq!(slice[0].pc, 5);
    }

    #[test]
    fn test_protected_slice_absent() {
        let path = ExecPath::new(vec![JumpDest::new(addr(0xbb), 1)], addr(0xaa));
        assert_eq!(path.protected_start_index, -1);
        assert!(path.protected_slice(addr(0xaa)).is_empty());
    }

    #[test]
    fn test_repeated_pair_detection() {
        let protected = addr(0xaa);
        let looped = ExecPath::new(
            vec![
                JumpDest::new(protected, 1),
                JumpDest::new(protected, 2),
                JumpDest::new(protected, 1),
            ],
            protected,
        );
        assert!(looped.has_repeated_pair(protected));

        let straight = ExecPath::new(
            vec![JumpDest::new(protected, 1), JumpDest::new(protected, 2)],
            protected,
        );
        assert!(!straight.has_repeated_pair(protected));
    }

    #[test]
    fn test_walk_preorder() {
        let leaf1 = frame(addr(1), vec![], vec![]);
        let leaf2 = frame(addr(2), vec![], vec![]);
        let mid = frame(addr(3), vec![], vec![leaf1, leaf2]);
        let root = frame(addr(4), vec![], vec![mid]);

        let order: Vec<Address> = root.walk().iter().map(|f| f.to).collect();
        assert_eq!(order, vec![addr(4), addr(3), addr(1), addr(2)]);
    }

    #[test]
    fn test_walk_deep_tree() {
        // A pathological 10k-deep chain must not overflow the stack.
        let mut frame_acc = frame(addr(1), vec![], vec![]);
        for _ in 0..10_000 {
            frame_acc = frame(addr(1), vec![], vec![frame_acc]);
        }
        assert_eq!(frame_acc.walk().len(), 10_001);
    }

    #[test]
    fn test_calls_to_and_selector() {
        let target = addr(0xaa);
        let hit = frame(target, vec![0xa9, 0x05, 0x9c, 0xbb, 0x01], vec![]);
        let miss = frame(addr(0xbb), vec![], vec![hit]);
        let root = frame(target, vec![0xde, 0xad], vec![miss]);

        let calls = root.calls_to(target);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].selector(), None); // 2-byte input
        assert_eq!(calls[1].selector(), Some([0xa9, 0x05, 0x9c, 0xbb]));
        assert_eq!(calls[1].args(), &[0x01]);
    }
}
