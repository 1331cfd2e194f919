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

//! The typed, placement-resolved view of a variable.
//!
//! A [`Detail`] tree is built from a textual type descriptor
//! (`"mapping(uint256 => uint8[2])"`), placed at concrete stack slots,
//! memory offsets or storage slots ([`layout`]), and finally decoded
//! against raw VM state into human-readable strings ([`decode`]).
//!
//! The tree is a tagged variant with exhaustive matching throughout; there
//! is deliberately no virtual-dispatch hierarchy here.

mod decode;
mod layout;

pub use decode::*;
pub use layout::*;

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::error::DebugError;

/// Where a variable's backing bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DataLocation {
    /// A fixed slot of the operand stack.
    #[default]
    Stack,
    /// Linear memory, behind a stack-held base pointer.
    Memory,
    /// Persistent contract storage.
    Storage,
    /// The call's input data.
    CallData,
}

/// Primitive kind of a value-type leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    /// `bool`.
    Boolean,
    /// `uintN`.
    Unsigned,
    /// `intN`, two's complement at its declared width.
    Signed,
    /// `address`, 20 bytes.
    Address,
    /// `bytesN`, left-aligned in its word.
    FixedBytes,
}

/// One placement-resolved node of a variable's type tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detail {
    /// Backing location of this node.
    pub location: DataLocation,
    /// Stack-slot delta, memory byte offset, or storage slot, depending on
    /// `location`. Storage slots of state variables are absolute; nodes
    /// under a mapping or dynamic array are relative to a computed base.
    pub position: U256,
    /// Byte offset within a storage slot, counted from the low-order end.
    pub offset: usize,
    /// The node's shape.
    pub body: DetailBody,
}

/// Shape of a [`Detail`] node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DetailBody {
    /// A primitive with a byte width.
    Value {
        /// Primitive kind.
        kind: ValueKind,
        /// Width in bytes, 1..=32.
        bytes: usize,
    },
    /// A fixed or dynamic array.
    Array(ArrayDetail),
    /// An ordered sequence of named members.
    Struct {
        /// Members in declaration order.
        members: Vec<(String, Detail)>,
    },
    /// A key-value mapping; values are placed at `keccak256(key ‖ slot)`.
    Mapping {
        /// Key shape.
        key: Box<Detail>,
        /// Value shape, placed relative to the computed base slot.
        value: Box<Detail>,
    },
}

/// Array-specific detail fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayDetail {
    /// Element shape.
    pub element: Box<Detail>,
    /// Whether the length is only known at runtime.
    pub is_dynamic: bool,
    /// Declared length; 0 for dynamic arrays.
    pub length: usize,
    /// Storage reference held through a pointer rather than inline.
    pub is_pointer: bool,
    /// `bytes`/`string` shorthand arrays render as text or hex, not as
    /// element lists.
    pub is_string: bool,
    /// Pre-materialized members, populated for fixed arrays at layout time.
    pub members: Vec<Detail>,
}

impl Detail {
    fn leaf(kind: ValueKind, bytes: usize, location: DataLocation) -> Self {
        Self { location, position: U256::ZERO, offset: 0, body: DetailBody::Value { kind, bytes } }
    }

    /// Whether this node is a value-type leaf.
    pub fn is_value(&self) -> bool {
        matches!(self.body, DetailBody::Value { .. })
    }

    /// Canonical display string of this node's type.
    pub fn type_string(&self) -> String {
        match &self.body {
            DetailBody::Value { kind, bytes } => match kind {
                ValueKind::Boolean => "bool".to_string(),
                ValueKind::Unsigned => format!("uint{}", bytes * 8),
                ValueKind::Signed => format!("int{}", bytes * 8),
                ValueKind::Address => "address".to_string(),
                ValueKind::FixedBytes => format!("bytes{bytes}"),
            },
            DetailBody::Array(array) if array.is_string => {
                if matches!(array.element.body, DetailBody::Value { kind: ValueKind::Unsigned, .. })
                {
                    "string".to_string()
                } else {
                    "bytes".to_string()
                }
            }
            DetailBody::Array(array) => {
                if array.is_dynamic {
                    format!("{}[]", array.element.type_string())
                } else {
                    format!("{}[{}]", array.element.type_string(), array.length)
                }
            }
            DetailBody::Struct { .. } => "struct".to_string(),
            DetailBody::Mapping { key, value } => {
                format!("mapping({} => {})", key.type_string(), value.type_string())
            }
        }
    }
}

/// Resolver for struct definitions referenced by name from type strings.
///
/// The program model implements this over the contract's AST; the parser
/// defers member expansion through it.
pub trait StructResolver {
    /// Members `(name, type)` of `struct <contract>.<name>`.
    fn resolve_struct(&self, contract: &str, name: &str) -> Option<Vec<(String, String)>>;
}

impl StructResolver for () {
    fn resolve_struct(&self, _contract: &str, _name: &str) -> Option<Vec<(String, String)>> {
        None
    }
}

/// Strip one trailing data-location annotation, returning the base string,
/// the annotated location, and whether a `pointer`/`ref` suffix was seen.
fn strip_location(type_name: &str) -> (&str, Option<DataLocation>, bool) {
    let mut base = type_name.trim();
    let mut is_pointer = false;
    for suffix in [" pointer", " ref"] {
        if let Some(stripped) = base.strip_suffix(suffix) {
            base = stripped.trim_end();
            is_pointer = true;
        }
    }
    let location = if let Some(stripped) = base.strip_suffix(" storage") {
        base = stripped.trim_end();
        Some(DataLocation::Storage)
    } else if let Some(stripped) = base.strip_suffix(" memory") {
        base = stripped.trim_end();
        Some(DataLocation::Memory)
    } else if let Some(stripped) = base.strip_suffix(" calldata") {
        base = stripped.trim_end();
        Some(DataLocation::CallData)
    } else {
        None
    };
    (base, location, is_pointer)
}

/// Split `mapping(K => V)` innards at the top-level arrow.
fn split_mapping(inner: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    let bytes = inner.as_bytes();
    for at in 0..bytes.len().saturating_sub(1) {
        match bytes[at] {
            b'(' | b'[' => depth += 1,
            b')' | b']' => depth = depth.saturating_sub(1),
            b'=' if depth == 0 && bytes[at + 1] == b'>' => {
                return Some((inner[..at].trim(), inner[at + 2..].trim()));
            }
            _ => {}
        }
    }
    None
}

/// Build a [`Detail`] tree from a textual type descriptor.
///
/// Recognition is applied leaf-first, then `[N?]` suffixes are peeled so
/// that in `T[a][b]` the innermost element type is `T` and the outermost
/// dimension is `b`. Struct members are expanded through `resolver`.
pub fn parse_type(
    type_name: &str,
    resolver: &dyn StructResolver,
    default_location: DataLocation,
) -> Result<Detail, DebugError> {
    let (mut base, annotated, is_pointer) = strip_location(type_name);
    let location = annotated.unwrap_or(default_location);

    // peel array dimensions, outermost first
    let mut dims: Vec<Option<usize>> = Vec::new();
    while base.ends_with(']') {
        let open = base
            .rfind('[')
            .ok_or_else(|| DebugError::Decoding(format!("unbalanced type `{type_name}`")))?;
        let dim = base[open + 1..base.len() - 1].trim();
        if dim.is_empty() {
            dims.push(None);
        } else {
            let length = dim
                .parse::<usize>()
                .map_err(|_| DebugError::Decoding(format!("bad array length in `{type_name}`")))?;
            dims.push(Some(length));
        }
        base = base[..open].trim_end();
    }

    let mut detail = parse_leaf(base, resolver, location, is_pointer)?;

    // wrap outermost-last: the innermost dimension closes around the leaf
    for dim in dims.into_iter().rev() {
        detail = Detail {
            location,
            position: U256::ZERO,
            offset: 0,
            body: DetailBody::Array(ArrayDetail {
                element: Box::new(detail),
                is_dynamic: dim.is_none(),
                length: dim.unwrap_or(0),
                is_pointer,
                is_string: false,
                members: Vec::new(),
            }),
        };
    }

    Ok(detail)
}

fn parse_leaf(
    base: &str,
    resolver: &dyn StructResolver,
    location: DataLocation,
    is_pointer: bool,
) -> Result<Detail, DebugError> {
    if base == "bool" {
        return Ok(Detail::leaf(ValueKind::Boolean, 32, location));
    }
    if let Some(width) = base.strip_prefix("uint") {
        if let Some(bytes) = parse_width(width) {
            return Ok(Detail::leaf(ValueKind::Unsigned, bytes, location));
        }
    }
    if let Some(width) = base.strip_prefix("int") {
        if let Some(bytes) = parse_width(width) {
            return Ok(Detail::leaf(ValueKind::Signed, bytes, location));
        }
    }
    if base == "address" || base == "address payable" || base.starts_with("contract ") {
        return Ok(Detail::leaf(ValueKind::Address, 20, location));
    }
    if let Some(width) = base.strip_prefix("bytes") {
        if let Ok(bytes) = width.parse::<usize>() {
            if (1..=32).contains(&bytes) {
                return Ok(Detail::leaf(ValueKind::FixedBytes, bytes, location));
            }
            return Err(DebugError::Decoding(format!("bad fixed-bytes width `{base}`")));
        }
    }
    if base == "bytes" || base == "string" {
        let element = Detail::leaf(ValueKind::Unsigned, 1, location);
        return Ok(Detail {
            location,
            position: U256::ZERO,
            offset: 0,
            body: DetailBody::Array(ArrayDetail {
                element: Box::new(element),
                is_dynamic: true,
                length: 0,
                is_pointer,
                is_string: true,
                members: Vec::new(),
            }),
        });
    }
    if base.starts_with("enum ") {
        return Ok(Detail::leaf(ValueKind::Unsigned, 1, location));
    }
    if let Some(qualified) = base.strip_prefix("struct ") {
        let (contract, name) = match qualified.split_once('.') {
            Some((contract, name)) => (contract, name),
            None => ("", qualified),
        };
        let members = resolver
            .resolve_struct(contract, name)
            .ok_or_else(|| DebugError::Decoding(format!("unknown struct `{qualified}`")))?;
        let members = members
            .into_iter()
            .map(|(member_name, member_type)| {
                parse_type(&member_type, resolver, location)
                    .map(|member| (member_name, member))
            })
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Detail {
            location,
            position: U256::ZERO,
            offset: 0,
            body: DetailBody::Struct { members },
        });
    }
    if let Some(inner) = base.strip_prefix("mapping(").and_then(|rest| rest.strip_suffix(')')) {
        let (key_type, value_type) = split_mapping(inner)
            .ok_or_else(|| DebugError::Decoding(format!("bad mapping type `{base}`")))?;
        let key = parse_type(key_type, resolver, DataLocation::Storage)?;
        let value = parse_type(value_type, resolver, DataLocation::Storage)?;
        return Ok(Detail {
            location: DataLocation::Storage,
            position: U256::ZERO,
            offset: 0,
            body: DetailBody::Mapping { key: Box::new(key), value: Box::new(value) },
        });
    }

    Err(DebugError::Decoding(format!("unrecognized type `{base}`")))
}

fn parse_width(width: &str) -> Option<usize> {
    if width.is_empty() {
        return Some(32);
    }
    let bits: usize = width.parse().ok()?;
    (bits > 0 && bits <= 256 && bits % 8 == 0).then(|| bits / 8)
}
