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

//! Opcode classification helpers on top of the base `revm` opcode table.
//!
//! The engine never executes bytecode; it only needs to walk it. The one
//! property the walk depends on is the width of PUSH immediates, so that
//! instruction indices are allocated for opcodes and never for payload
//! bytes.

use revm::bytecode::opcode::{self, OpCode};

/// Extension trait for the bytecode walk.
pub trait OpcodeExt {
    /// Check if this opcode is `PUSH1..PUSH32`.
    fn is_push(&self) -> bool;

    /// Width of the immediate payload in bytes; 0 for non-PUSH opcodes.
    fn push_size(&self) -> usize;
}

impl OpcodeExt for OpCode {
    fn is_push(&self) -> bool {
        (opcode::PUSH1..=opcode::PUSH32).contains(&self.get())
    }

    fn push_size(&self) -> usize {
        if self.is_push() {
            (self.get() - opcode::PUSH1 + 1) as usize
        } else {
            0
        }
    }
}

/// Iterate the opcode positions of `bytecode`, skipping PUSH payloads.
///
/// Yields `(pc, opcode byte)` for every instruction boundary, in order.
/// Truncated trailing PUSH payloads are tolerated: the PUSH itself is still
/// yielded and iteration ends.
pub fn instruction_boundaries(bytecode: &[u8]) -> impl Iterator<Item = (usize, u8)> + '_ {
    let mut pc = 0;
    std::iter::from_fn(move || {
        if pc >= bytecode.len() {
            return None;
        }
        let at = pc;
        let byte = bytecode[at];
        let payload = unsafe { OpCode::new_unchecked(byte) }.push_size();
        pc = at + 1 + payload;
        Some((at, byte))
    })
}
