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

//! Compressed source-map handling and line-break arithmetic.
//!
//! A runtime source map is a `;`-separated list of `s:l:f:j` entries, one
//! per instruction index. Every field may be empty, meaning "inherit the
//! value of the previous entry", which is what makes the format compact.
//! This module decompresses the format, inverts it (source location back to
//! instruction index), and converts byte offsets to line/column pairs via a
//! lower-bound search over a line-break table.

use serde::{Deserialize, Serialize};

/// Jump classification of one mapping entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JumpKind {
    /// `i`: the instruction enters a function.
    In,
    /// `o`: the instruction returns from a function.
    Out,
    /// `-`: ordinary control flow.
    #[default]
    None,
}

impl JumpKind {
    fn parse(field: &str) -> Option<Self> {
        match field {
            "i" => Some(Self::In),
            "o" => Some(Self::Out),
            "-" => Some(Self::None),
            _ => None,
        }
    }

    /// The single-character wire form of this jump kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::In => "i",
            Self::Out => "o",
            Self::None => "-",
        }
    }
}

/// One decompressed source-map entry.
///
/// `start` and `length` are byte coordinates into the source file with id
/// `file`. Compiler-generated code carries `-1` coordinates; such entries
/// are kept (indices must stay aligned) but report `!is_resolved()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Byte offset of the mapped source range.
    pub start: i64,
    /// Byte length of the mapped source range.
    pub length: i64,
    /// Source file id, in compiler numbering.
    pub file: i64,
    /// Jump classification.
    pub jump: JumpKind,
}

impl SourceLocation {
    /// Whether the entry points at real source text.
    pub fn is_resolved(&self) -> bool {
        self.start >= 0 && self.length >= 0
    }

    /// The `[start, start + length)` byte range, when resolved.
    pub fn range(&self) -> Option<(usize, usize)> {
        self.is_resolved().then(|| (self.start as usize, (self.start + self.length) as usize))
    }
}

/// A fully decompressed runtime source map, indexed by instruction index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMap {
    entries: Vec<SourceLocation>,
}

impl SourceMap {
    /// Decompress a `s:l:f:j` mapping string.
    ///
    /// Missing or empty fields inherit the previous entry's value; the jump
    /// field additionally tolerates unknown characters (treated as `-`),
    /// which some compiler versions emit for modifier depth suffixes.
    pub fn parse(raw: &str) -> Self {
        let mut entries = Vec::new();
        if raw.is_empty() {
            return Self { entries };
        }

        let (mut start, mut length, mut file) = (0i64, 0i64, -1i64);
        let mut jump = JumpKind::None;

        for chunk in raw.split(';') {
            let mut fields = chunk.split(':');
            if let Some(s) = fields.next().filter(|s| !s.is_empty()) {
                start = s.parse().unwrap_or(start);
            }
            if let Some(l) = fields.next().filter(|l| !l.is_empty()) {
                length = l.parse().unwrap_or(length);
            }
            if let Some(f) = fields.next().filter(|f| !f.is_empty()) {
                file = f.parse().unwrap_or(file);
            }
            if let Some(j) = fields.next().filter(|j| !j.is_empty()) {
                jump = JumpKind::parse(j).unwrap_or(JumpKind::None);
            }
            entries.push(SourceLocation { start, length, file, jump });
        }

        Self { entries }
    }

    /// The entry for an instruction index.
    pub fn at_index(&self, index: usize) -> Option<&SourceLocation> {
        self.entries.get(index)
    }

    /// Invert the map: the first instruction index mapped to `(start,
    /// length)`, with the jump kind compared only when one is supplied.
    ///
    /// The file id is deliberately left out of the comparison; `(start,
    /// length)` alone identify a mapping in practice.
    pub fn to_index(&self, start: i64, length: i64, jump: Option<JumpKind>) -> Option<usize> {
        self.entries.iter().position(|entry| {
            entry.start == start
                && entry.length == length
                && jump.is_none_or(|jump| entry.jump == jump)
        })
    }

    /// Number of entries (equals the instruction count the map was built
    /// for).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Byte positions of every `\n` in `source`, strictly increasing.
pub fn line_breaks(source: &str) -> Vec<usize> {
    source.bytes().enumerate().filter(|&(_, b)| b == b'\n').map(|(i, _)| i).collect()
}

/// Convert a byte offset to a zero-based `(line, column)` pair.
///
/// Lower-bound rule: an offset equal to a stored line-break position *is*
/// that newline and counts as the next line.
pub fn offset_to_line_column(offset: usize, breaks: &[usize]) -> (u32, u32) {
    let line = breaks.partition_point(|&pos| pos <= offset);
    let column = if line == 0 { offset } else { offset - breaks[line - 1] - 1 };
    (line as u32, column as u32)
}

/// Byte range `[start, end)` of a zero-based line, excluding its newline.
pub fn line_span(line: u32, breaks: &[usize], source_len: usize) -> (usize, usize) {
    let line = line as usize;
    let start = if line == 0 { 0 } else { breaks.get(line - 1).map_or(source_len, |p| p + 1) };
    let end = breaks.get(line).copied().unwrap_or(source_len);
    (start, end.max(start))
}

/// Byte offset of the first character of a zero-based line.
pub fn line_start_offset(line: u32, breaks: &[usize], source_len: usize) -> usize {
    line_span(line, breaks, source_len).0
}
