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

//! Engine error taxonomy.
//!
//! Every kind except [`DebugError::Fatal`] is recovered locally: protocol
//! errors are answered on the offending channel, model gaps degrade the
//! step to a null location, unresolvable breakpoints stay registered for
//! retry, evaluator failures abort the evaluation with the VM untouched,
//! and decoding failures degrade to a literal `(invalid value)`. Only a
//! fatal adapter loss surfaces to the user, as the `end` event.

use thiserror::Error;

/// Errors raised inside the engine.
#[derive(Debug, Error)]
pub enum DebugError {
    /// Malformed or unknown traffic on either channel.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An event referenced state the program model does not have, e.g. a
    /// step for an unlinked address or a pc without a source mapping.
    #[error("no model for {0}")]
    ModelGap(String),

    /// A breakpoint could not be bound to any program counter.
    #[error("breakpoint on {path}:{line} does not resolve to an instruction")]
    Resolution {
        /// Source file of the breakpoint.
        path: String,
        /// Requested line.
        line: u32,
    },

    /// Expression evaluation failed before any VM mutation.
    #[error("evaluation failed: {0}")]
    Evaluator(String),

    /// A raw value did not decode under its declared type.
    #[error("cannot decode {0}")]
    Decoding(String),

    /// The VM adapter is gone; the session is over.
    #[error("vm adapter disconnected")]
    Fatal,
}

impl DebugError {
    /// Shorthand for a [`DebugError::Protocol`].
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Shorthand for a [`DebugError::Evaluator`].
    pub fn evaluator(msg: impl Into<String>) -> Self {
        Self::Evaluator(msg.into())
    }
}
