// SDB - Source-level debugger for EVM-style virtual machines
// Copyright (C) 2026 The sdb contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Position assignment over [`Detail`] trees.
//!
//! Post-order placement per backing location:
//!
//! - **Stack**: the node sits directly in the slot tracked on the variable,
//!   so its own position is 0.
//! - **Memory**: sequence members at consecutive 32-byte boundaries behind
//!   the variable's base pointer; dynamic arrays are skipped because their
//!   length only exists at runtime.
//! - **Storage**: the VM's packing rules. Value types pack into the current
//!   slot when they fit after the existing offset; structs and fixed arrays
//!   start at a fresh slot and advance on exit; dynamic arrays, byte
//!   arrays, strings and mappings each hold exactly one slot, with their
//!   payload addressed through `keccak256` at decode time.

use alloy_primitives::U256;

use super::{Detail, DetailBody};

/// Slot/offset cursor for the storage packing walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageCursor {
    /// Current slot.
    pub slot: U256,
    /// Bytes already used in the current slot, from the low-order end.
    pub offset: usize,
}

impl StorageCursor {
    /// Move to the next slot if the current one is partially used.
    fn align_slot(&mut self) {
        if self.offset > 0 {
            self.next_slot();
        }
    }

    /// Unconditionally move to the next slot.
    fn next_slot(&mut self) {
        self.slot += U256::from(1);
        self.offset = 0;
    }
}

/// Place a stack-resident value. The slot itself is tracked on the
/// variable, so the node position is zero.
pub fn apply_stack_positions(detail: &mut Detail) {
    detail.position = U256::ZERO;
    detail.offset = 0;
}

/// Place a memory-resident tree behind the variable's base pointer.
pub fn apply_memory_positions(detail: &mut Detail) {
    let mut cursor = 0usize;
    layout_memory(detail, &mut cursor);
}

fn layout_memory(detail: &mut Detail, cursor: &mut usize) {
    detail.position = U256::from(*cursor);
    match &mut detail.body {
        DetailBody::Value { .. } => *cursor += 32,
        DetailBody::Struct { members } => {
            for (_, member) in members {
                member.position = U256::from(*cursor);
                *cursor += 32;
            }
        }
        DetailBody::Array(array) if !array.is_dynamic => {
            array.members = vec![(*array.element).clone(); array.length];
            for member in &mut array.members {
                member.position = U256::from(*cursor);
                *cursor += 32;
            }
        }
        // dynamic arrays: length unknown at declaration, members resolved
        // lazily at decode time
        DetailBody::Array(_) | DetailBody::Mapping { .. } => {}
    }
}

/// Place a storage-resident tree, packing through `cursor`.
///
/// For state variables the cursor runs across the whole contract, so the
/// assigned slots are absolute. Mapping values and dynamic-array elements
/// are laid out from a fresh relative cursor and rebased at decode time.
pub fn apply_storage_positions(detail: &mut Detail, cursor: &mut StorageCursor) {
    match &mut detail.body {
        DetailBody::Value { bytes, .. } => {
            if cursor.offset + *bytes > 32 {
                cursor.next_slot();
            }
            detail.position = cursor.slot;
            detail.offset = cursor.offset;
            cursor.offset += *bytes;
            if cursor.offset == 32 {
                cursor.next_slot();
            }
        }
        DetailBody::Struct { members } => {
            cursor.align_slot();
            detail.position = cursor.slot;
            detail.offset = 0;
            for (_, member) in members {
                apply_storage_positions(member, cursor);
            }
            cursor.align_slot();
        }
        DetailBody::Array(array) if !array.is_dynamic && !array.is_string => {
            cursor.align_slot();
            detail.position = cursor.slot;
            detail.offset = 0;
            array.members = vec![(*array.element).clone(); array.length];
            for member in &mut array.members {
                apply_storage_positions(member, cursor);
            }
            cursor.align_slot();
        }
        DetailBody::Array(array) => {
            cursor.align_slot();
            detail.position = cursor.slot;
            detail.offset = 0;
            cursor.next_slot();
            let mut relative = StorageCursor::default();
            apply_storage_positions(&mut array.element, &mut relative);
        }
        DetailBody::Mapping { value, .. } => {
            cursor.align_slot();
            detail.position = cursor.slot;
            detail.offset = 0;
            cursor.next_slot();
            let mut relative = StorageCursor::default();
            apply_storage_positions(value, &mut relative);
        }
    }
}

/// Number of whole storage slots one instance of `detail` occupies,
/// counting partially used slots as full.
pub fn slots_occupied(detail: &Detail) -> U256 {
    let mut probe = detail.clone();
    let mut cursor = StorageCursor::default();
    apply_storage_positions(&mut probe, &mut cursor);
    let mut slots = cursor.slot;
    if cursor.offset > 0 {
        slots += U256::from(1);
    }
    slots.max(U256::from(1))
}

/// How many elements of a packed value type fit in one storage slot.
pub fn elements_per_slot(element: &Detail) -> usize {
    match element.body {
        DetailBody::Value { bytes, .. } if bytes > 0 && bytes <= 32 => 32 / bytes,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{parse_type, DataLocation, StructResolver};

    struct Pair;

    impl StructResolver for Pair {
        fn resolve_struct(&self, _contract: &str, name: &str) -> Option<Vec<(String, String)>> {
            (name == "Pair").then(|| {
                vec![
                    ("a".to_string(), "uint128".to_string()),
                    ("b".to_string(), "uint128".to_string()),
                ]
            })
        }
    }

    fn storage(type_name: &str) -> (Detail, StorageCursor) {
        let mut detail = parse_type(type_name, &Pair, DataLocation::Storage).unwrap();
        let mut cursor = StorageCursor::default();
        apply_storage_positions(&mut detail, &mut cursor);
        (detail, cursor)
    }

    #[test]
    fn test_value_packing_same_slot() {
        let mut cursor = StorageCursor::default();
        let mut first = parse_type("uint128", &(), DataLocation::Storage).unwrap();
        let mut second = parse_type("uint128", &(), DataLocation::Storage).unwrap();
        apply_storage_positions(&mut first, &mut cursor);
        apply_storage_positions(&mut second, &mut cursor);
        assert_eq!((first.position, first.offset), (U256::ZERO, 0));
        assert_eq!((second.position, second.offset), (U256::ZERO, 16));
        // the slot filled exactly, so the cursor moved on
        assert_eq!(cursor, StorageCursor { slot: U256::from(1), offset: 0 });
    }

    #[test]
    fn test_value_packing_overflow_advances() {
        let mut cursor = StorageCursor::default();
        let mut first = parse_type("uint64", &(), DataLocation::Storage).unwrap();
        let mut second = parse_type("uint256", &(), DataLocation::Storage).unwrap();
        apply_storage_positions(&mut first, &mut cursor);
        apply_storage_positions(&mut second, &mut cursor);
        assert_eq!(first.position, U256::ZERO);
        assert_eq!(second.position, U256::from(1));
        assert_eq!(second.offset, 0);
    }

    #[test]
    fn test_struct_starts_fresh_and_advances() {
        let mut cursor = StorageCursor::default();
        let mut lead = parse_type("uint8", &(), DataLocation::Storage).unwrap();
        apply_storage_positions(&mut lead, &mut cursor);
        let mut pair = parse_type("struct T.Pair", &Pair, DataLocation::Storage).unwrap();
        apply_storage_positions(&mut pair, &mut cursor);
        // the struct skipped the partially used slot 0
        assert_eq!(pair.position, U256::from(1));
        let DetailBody::Struct { members } = &pair.body else { panic!("expected struct") };
        assert_eq!(members[0].1.position, U256::from(1));
        assert_eq!(members[1].1.offset, 16);
        // exit advanced to a fresh slot
        assert_eq!(cursor, StorageCursor { slot: U256::from(2), offset: 0 });
    }

    #[test]
    fn test_fixed_array_packs_members() {
        let (detail, cursor) = storage("uint64[6]");
        let DetailBody::Array(array) = &detail.body else { panic!("expected array") };
        assert_eq!(array.members.len(), 6);
        // four to a slot, then two in the next
        assert_eq!(array.members[3].position, U256::ZERO);
        assert_eq!(array.members[3].offset, 24);
        assert_eq!(array.members[4].position, U256::from(1));
        assert_eq!(cursor.slot, U256::from(2));
    }

    #[test]
    fn test_dynamic_array_occupies_one_slot() {
        let mut cursor = StorageCursor::default();
        let mut lead = parse_type("uint8", &(), DataLocation::Storage).unwrap();
        let mut array = parse_type("uint256[]", &(), DataLocation::Storage).unwrap();
        let mut tail = parse_type("uint8", &(), DataLocation::Storage).unwrap();
        apply_storage_positions(&mut lead, &mut cursor);
        apply_storage_positions(&mut array, &mut cursor);
        apply_storage_positions(&mut tail, &mut cursor);
        assert_eq!(array.position, U256::from(1));
        assert_eq!(tail.position, U256::from(2));
    }

    #[test]
    fn test_mapping_value_layout_is_relative() {
        let (detail, cursor) = storage("mapping(uint256 => struct T.Pair)");
        assert_eq!(detail.position, U256::ZERO);
        assert_eq!(cursor.slot, U256::from(1));
        let DetailBody::Mapping { value, .. } = &detail.body else { panic!("expected mapping") };
        // the value tree is laid out from relative slot 0
        assert_eq!(value.position, U256::ZERO);
    }

    #[test]
    fn test_memory_struct_heads() {
        let mut detail = parse_type("struct T.Pair memory", &Pair, DataLocation::Stack).unwrap();
        apply_memory_positions(&mut detail);
        let DetailBody::Struct { members } = &detail.body else { panic!("expected struct") };
        assert_eq!(members[0].1.position, U256::ZERO);
        assert_eq!(members[1].1.position, U256::from(32));
    }

    #[test]
    fn test_memory_fixed_array_members() {
        let mut detail = parse_type("uint256[3] memory", &(), DataLocation::Stack).unwrap();
        apply_memory_positions(&mut detail);
        let DetailBody::Array(array) = &detail.body else { panic!("expected array") };
        assert_eq!(array.members.len(), 3);
        assert_eq!(array.members[2].position, U256::from(64));
    }

    #[test]
    fn test_slots_occupied() {
        let pair = parse_type("struct T.Pair", &Pair, DataLocation::Storage).unwrap();
        assert_eq!(slots_occupied(&pair), U256::from(1));
        let wide = parse_type("uint256[3]", &(), DataLocation::Storage).unwrap();
        assert_eq!(slots_occupied(&wide), U256::from(3));
        let value = parse_type("uint8", &(), DataLocation::Storage).unwrap();
        assert_eq!(slots_occupied(&value), U256::from(1));
    }

    #[test]
    fn test_elements_per_slot() {
        let byte = parse_type("uint8", &(), DataLocation::Storage).unwrap();
        assert_eq!(elements_per_slot(&byte), 32);
        let word = parse_type("uint256", &(), DataLocation::Storage).unwrap();
        assert_eq!(elements_per_slot(&word), 1);
        let pair = parse_type("struct T.Pair", &Pair, DataLocation::Storage).unwrap();
        assert_eq!(elements_per_slot(&pair), 1);
    }
}
