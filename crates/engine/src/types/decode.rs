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

//! Decoding of raw VM words into human-readable values.
//!
//! Decoding never fails: malformed or out-of-range raw data degrades to
//! the literal [`INVALID_VALUE`]. What decoding *can* do is suspend:
//! storage-resident values are read through a [`StorageView`], and a slot
//! the view cannot serve yet is reported as [`Decoded::NeedSlot`] so the
//! engine can fetch it from the adapter and retry.

use alloy_primitives::{keccak256, Address, B256, I256, U256};

use super::{elements_per_slot, slots_occupied, ArrayDetail, DataLocation, Detail, DetailBody, ValueKind};

/// Placeholder reported when raw data does not decode under its type.
pub const INVALID_VALUE: &str = "(invalid value)";

/// Read access to a contract's storage, usually backed by a cache of words
/// previously fetched over the adapter channel.
pub trait StorageView {
    /// The 32-byte word at `slot`, or `None` when it has not been fetched.
    fn storage_word(&self, slot: U256) -> Option<B256>;
}

impl StorageView for std::collections::HashMap<U256, B256> {
    fn storage_word(&self, slot: U256) -> Option<B256> {
        self.get(&slot).copied()
    }
}

/// Outcome of a decode attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// The rendered value.
    Value(String),
    /// The decode needs this storage slot before it can make progress.
    NeedSlot(U256),
}

/// Outcome of a child-expansion attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Children {
    /// The expandable children, in order.
    Expanded(Vec<ChildSlot>),
    /// Expansion needs this storage slot first.
    NeedSlot(U256),
}

/// One expandable child of a composite detail.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildSlot {
    /// Display name (`member` or `[index]`).
    pub name: String,
    /// The child's placement-resolved detail.
    pub detail: Detail,
    /// Storage base the child's positions are relative to.
    pub base_slot: U256,
}

/// Raw VM state a decode runs against.
pub struct DecodeCx<'a> {
    /// Operand stack, bottom first.
    pub stack: &'a [B256],
    /// Linear memory.
    pub memory: &'a [u8],
    /// The variable's frozen stack position, if already observed.
    pub stack_position: Option<usize>,
    /// Storage access for the current contract.
    pub storage: &'a dyn StorageView,
}

impl DecodeCx<'_> {
    fn stack_word(&self, delta: U256) -> Option<B256> {
        let position = self.stack_position?;
        let index = position.checked_add(usize::try_from(delta).ok()?)?;
        self.stack.get(index).copied()
    }

    fn memory_base(&self) -> Option<usize> {
        let position = self.stack_position?;
        let word = self.stack.get(position)?;
        usize::try_from(U256::from_be_bytes(word.0)).ok()
    }

    /// A 32-byte memory word at `offset`; bytes beyond the materialized
    /// memory read as zero, matching VM semantics.
    fn memory_word(&self, offset: usize) -> [u8; 32] {
        let mut word = [0u8; 32];
        for (i, byte) in word.iter_mut().enumerate() {
            if let Some(value) = self.memory.get(offset + i) {
                *byte = *value;
            }
        }
        word
    }
}

/// Storage slot of a dynamic array's or long byte-string's payload.
pub fn element_data_slot(slot: U256) -> U256 {
    U256::from_be_bytes(keccak256(slot.to_be_bytes::<32>()).0)
}

/// Storage base slot of a mapping value: `keccak256(key ‖ slot)`.
pub fn mapping_value_slot(slot: U256, key: B256) -> U256 {
    let mut preimage = [0u8; 64];
    preimage[..32].copy_from_slice(key.as_slice());
    preimage[32..].copy_from_slice(&slot.to_be_bytes::<32>());
    U256::from_be_bytes(keccak256(preimage).0)
}

/// Decode one detail node against raw VM state.
///
/// `base_slot` rebases storage positions: zero for state variables (whose
/// slots are absolute), a keccak-derived base for mapping values and
/// dynamic-array elements.
pub fn decode_detail(detail: &Detail, base_slot: U256, cx: &DecodeCx<'_>) -> Decoded {
    match &detail.body {
        DetailBody::Value { kind, bytes } => decode_value(detail, *kind, *bytes, base_slot, cx),
        DetailBody::Array(array) if array.is_string => decode_byte_array(detail, array, base_slot, cx),
        DetailBody::Array(array) => decode_array_summary(detail, array, base_slot, cx),
        DetailBody::Struct { members } => Decoded::Value(format!("struct({})", members.len())),
        DetailBody::Mapping { .. } => Decoded::Value("mapping".to_string()),
    }
}

fn decode_value(
    detail: &Detail,
    kind: ValueKind,
    bytes: usize,
    base_slot: U256,
    cx: &DecodeCx<'_>,
) -> Decoded {
    if bytes == 0 || bytes > 32 {
        return Decoded::Value(INVALID_VALUE.to_string());
    }
    match detail.location {
        DataLocation::Stack | DataLocation::CallData => match cx.stack_word(detail.position) {
            Some(word) => Decoded::Value(interpret_word(word.0, kind, bytes)),
            None => Decoded::Value(INVALID_VALUE.to_string()),
        },
        DataLocation::Memory => match cx.memory_base() {
            Some(base) => {
                let offset = match usize::try_from(detail.position) {
                    Ok(position) => base + position,
                    Err(_) => return Decoded::Value(INVALID_VALUE.to_string()),
                };
                Decoded::Value(interpret_word(cx.memory_word(offset), kind, bytes))
            }
            None => Decoded::Value(INVALID_VALUE.to_string()),
        },
        DataLocation::Storage => {
            let slot = base_slot.wrapping_add(detail.position);
            let Some(word) = cx.storage.storage_word(slot) else {
                return Decoded::NeedSlot(slot);
            };
            Decoded::Value(extract_field(word.0, detail.offset, kind, bytes))
        }
    }
}

/// Decode a `bytes`/`string` shorthand array.
///
/// Storage packs short payloads (≤ 31 bytes) into the slot itself with
/// `length * 2` in the lowest byte; longer payloads store `length * 2 + 1`
/// in the slot and the data at `keccak256(slot)`.
fn decode_byte_array(
    detail: &Detail,
    array: &ArrayDetail,
    base_slot: U256,
    cx: &DecodeCx<'_>,
) -> Decoded {
    let render = |data: &[u8]| {
        if is_string_array(array) {
            format!("\"{}\"", String::from_utf8_lossy(data))
        } else {
            format!("0x{}", alloy_primitives::hex::encode(data))
        }
    };

    match detail.location {
        DataLocation::Storage => {
            let slot = base_slot.wrapping_add(detail.position);
            let Some(word) = cx.storage.storage_word(slot) else {
                return Decoded::NeedSlot(slot);
            };
            let marker = word.0[31];
            if marker & 1 == 0 {
                let length = (marker / 2) as usize;
                if length > 31 {
                    return Decoded::Value(INVALID_VALUE.to_string());
                }
                return Decoded::Value(render(&word.0[..length]));
            }
            let length = match usize::try_from(
                U256::from_be_bytes(word.0).wrapping_sub(U256::from(1)) >> 1,
            ) {
                Ok(length) => length,
                Err(_) => return Decoded::Value(INVALID_VALUE.to_string()),
            };
            let data_base = element_data_slot(slot);
            let mut data = Vec::with_capacity(length);
            for chunk in 0..length.div_ceil(32) {
                let chunk_slot = data_base.wrapping_add(U256::from(chunk));
                let Some(word) = cx.storage.storage_word(chunk_slot) else {
                    return Decoded::NeedSlot(chunk_slot);
                };
                let take = (length - chunk * 32).min(32);
                data.extend_from_slice(&word.0[..take]);
            }
            Decoded::Value(render(&data))
        }
        DataLocation::Memory | DataLocation::CallData => {
            let Some(base) = cx.memory_base() else {
                return Decoded::Value(INVALID_VALUE.to_string());
            };
            let Ok(position) = usize::try_from(detail.position) else {
                return Decoded::Value(INVALID_VALUE.to_string());
            };
            let start = base + position;
            let Ok(length) = usize::try_from(U256::from_be_bytes(cx.memory_word(start))) else {
                return Decoded::Value(INVALID_VALUE.to_string());
            };
            if length > cx.memory.len() {
                return Decoded::Value(INVALID_VALUE.to_string());
            }
            let data: Vec<u8> =
                (0..length).map(|i| cx.memory.get(start + 32 + i).copied().unwrap_or(0)).collect();
            Decoded::Value(render(&data))
        }
        DataLocation::Stack => Decoded::Value(INVALID_VALUE.to_string()),
    }
}

fn decode_array_summary(
    detail: &Detail,
    array: &ArrayDetail,
    base_slot: U256,
    cx: &DecodeCx<'_>,
) -> Decoded {
    if !array.is_dynamic {
        return Decoded::Value(format!("array({})", array.length));
    }
    match detail.location {
        DataLocation::Storage => {
            let slot = base_slot.wrapping_add(detail.position);
            match cx.storage.storage_word(slot) {
                Some(word) => match usize::try_from(U256::from_be_bytes(word.0)) {
                    Ok(length) => Decoded::Value(format!("array({length})")),
                    Err(_) => Decoded::Value(INVALID_VALUE.to_string()),
                },
                None => Decoded::NeedSlot(slot),
            }
        }
        DataLocation::Memory | DataLocation::CallData => match cx.memory_base() {
            Some(base) => {
                let start = base + usize::try_from(detail.position).unwrap_or(0);
                match usize::try_from(U256::from_be_bytes(cx.memory_word(start))) {
                    Ok(length) => Decoded::Value(format!("array({length})")),
                    Err(_) => Decoded::Value(INVALID_VALUE.to_string()),
                }
            }
            None => Decoded::Value("array".to_string()),
        },
        DataLocation::Stack => Decoded::Value(INVALID_VALUE.to_string()),
    }
}

/// Enumerate the expandable children of a composite detail.
pub fn detail_children(detail: &Detail, base_slot: U256, cx: &DecodeCx<'_>) -> Children {
    match &detail.body {
        DetailBody::Struct { members } => Children::Expanded(
            members
                .iter()
                .map(|(name, member)| ChildSlot {
                    name: name.clone(),
                    detail: member.clone(),
                    base_slot,
                })
                .collect(),
        ),
        DetailBody::Array(array) if !array.is_dynamic => Children::Expanded(
            array
                .members
                .iter()
                .enumerate()
                .map(|(index, member)| ChildSlot {
                    name: format!("[{index}]"),
                    detail: member.clone(),
                    base_slot,
                })
                .collect(),
        ),
        DetailBody::Array(array) if !array.is_string => {
            dynamic_array_children(detail, array, base_slot, cx)
        }
        // mappings cannot enumerate their keys; leaves and byte arrays have
        // no expandable children
        _ => Children::Expanded(Vec::new()),
    }
}

fn dynamic_array_children(
    detail: &Detail,
    array: &ArrayDetail,
    base_slot: U256,
    cx: &DecodeCx<'_>,
) -> Children {
    match detail.location {
        DataLocation::Storage => {
            let slot = base_slot.wrapping_add(detail.position);
            let Some(word) = cx.storage.storage_word(slot) else {
                return Children::NeedSlot(slot);
            };
            let Ok(length) = usize::try_from(U256::from_be_bytes(word.0)) else {
                return Children::Expanded(Vec::new());
            };
            let shown = length.min(MAX_CHILDREN);
            if shown < length {
                tracing::warn!(length, shown, "truncating dynamic array expansion");
            }
            let data_base = element_data_slot(slot);
            let per_slot = elements_per_slot(&array.element);
            let element_slots = slots_occupied(&array.element);
            let children = (0..shown)
                .map(|index| {
                    let mut element = (*array.element).clone();
                    if per_slot > 1 {
                        if let DetailBody::Value { bytes, .. } = element.body {
                            element.position = U256::from(index / per_slot);
                            element.offset = (index % per_slot) * bytes;
                        }
                        ChildSlot {
                            name: format!("[{index}]"),
                            detail: element,
                            base_slot: data_base,
                        }
                    } else {
                        let base = data_base
                            .wrapping_add(element_slots.wrapping_mul(U256::from(index)));
                        ChildSlot { name: format!("[{index}]"), detail: element, base_slot: base }
                    }
                })
                .collect();
            Children::Expanded(children)
        }
        DataLocation::Memory | DataLocation::CallData => {
            let Some(base) = cx.memory_base() else {
                return Children::Expanded(Vec::new());
            };
            let start = base + usize::try_from(detail.position).unwrap_or(0);
            let Ok(length) = usize::try_from(U256::from_be_bytes(cx.memory_word(start))) else {
                return Children::Expanded(Vec::new());
            };
            let shown = length.min(MAX_CHILDREN);
            let children = (0..shown)
                .map(|index| {
                    let mut element = (*array.element).clone();
                    element.position =
                        detail.position.wrapping_add(U256::from(32 * (index + 1)));
                    ChildSlot { name: format!("[{index}]"), detail: element, base_slot }
                })
                .collect();
            Children::Expanded(children)
        }
        DataLocation::Stack => Children::Expanded(Vec::new()),
    }
}

/// Upper bound on one expansion round, to keep UI payloads sane.
const MAX_CHILDREN: usize = 1000;

/// Decode the value stored under `key` in a mapping detail.
pub fn decode_mapping_value(
    detail: &Detail,
    base_slot: U256,
    key: B256,
    cx: &DecodeCx<'_>,
) -> Decoded {
    let DetailBody::Mapping { value, .. } = &detail.body else {
        return Decoded::Value(INVALID_VALUE.to_string());
    };
    let slot = base_slot.wrapping_add(detail.position);
    let value_base = mapping_value_slot(slot, key);
    decode_detail(value, value_base, cx)
}

fn is_string_array(array: &ArrayDetail) -> bool {
    matches!(array.element.body, DetailBody::Value { kind: ValueKind::Unsigned, bytes: 1 })
}

/// Render a full 32-byte word under a value kind. Numeric kinds are
/// right-aligned in the word, fixed bytes left-aligned.
pub fn interpret_word(word: [u8; 32], kind: ValueKind, bytes: usize) -> String {
    match kind {
        ValueKind::Boolean => {
            if U256::from_be_bytes(word).is_zero() { "false" } else { "true" }.to_string()
        }
        ValueKind::Unsigned => {
            let mut value = U256::from_be_bytes(word);
            if bytes < 32 {
                value &= width_mask(bytes);
            }
            value.to_string()
        }
        ValueKind::Signed => {
            let mut value = U256::from_be_bytes(word);
            if bytes < 32 {
                value &= width_mask(bytes);
                if value.bit(bytes * 8 - 1) {
                    value |= !width_mask(bytes);
                }
            }
            I256::from_raw(value).to_string()
        }
        ValueKind::Address => Address::from_word(B256::from(word)).to_string(),
        ValueKind::FixedBytes => {
            format!("0x{}", alloy_primitives::hex::encode(&word[..bytes.min(32)]))
        }
    }
}

/// Extract the packed field at `[offset, offset + bytes)` (from the
/// low-order end) out of a storage word, then render it.
fn extract_field(word: [u8; 32], offset: usize, kind: ValueKind, bytes: usize) -> String {
    if offset + bytes > 32 {
        return INVALID_VALUE.to_string();
    }
    let mut field = U256::from_be_bytes(word) >> (offset * 8);
    if bytes < 32 {
        field &= width_mask(bytes);
    }
    // fixed bytes are left-aligned in their rendered word
    let normalized = if kind == ValueKind::FixedBytes {
        field << ((32 - bytes) * 8)
    } else {
        field
    };
    interpret_word(normalized.to_be_bytes::<32>(), kind, bytes)
}

fn width_mask(bytes: usize) -> U256 {
    (U256::from(1) << (bytes * 8)) - U256::from(1)
}
