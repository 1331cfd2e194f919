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

//! SDB Common - Shared functionality for SDB components
//!
//! This crate provides the wire-protocol message types spoken on the two
//! debugger channels (the UI client channel and the VM adapter channel),
//! together with small shared utilities used by both the engine crate and
//! any transport binary.

pub mod expression;
pub mod messages;
pub mod opcode;

pub use expression::*;
pub use messages::*;
pub use opcode::*;
