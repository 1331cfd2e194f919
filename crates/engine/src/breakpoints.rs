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

//! Line-keyed breakpoint registry.
//!
//! Breakpoints are stored per file in mutated-source line numbering and
//! resolved to `(address, pc)` pairs through the AST and the runtime
//! source map. Unresolvable breakpoints stay registered and are retried on
//! every address binding. Clearing always notifies the adapter with the
//! same id, even for breakpoints that never resolved.

use alloy_primitives::Address;
use sdb_common::{ui_events, AdapterRequest};

use crate::{
    ast::node_kinds,
    sourcemap::line_span,
    Debugger, PendingRequest,
};

/// One registered breakpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    /// Engine-assigned id, stable for the breakpoint's lifetime.
    pub id: u32,
    /// Zero-based line, in mutated-source numbering.
    pub line: u32,
    /// Whether an `(address, pc)` binding exists.
    pub verified: bool,
    /// User-visible breakpoints stop the UI; internal ones (installed by
    /// the evaluator) only pause the VM.
    pub visible: bool,
    /// Whether the registered line was originally expressed in the user's
    /// unmutated source.
    pub original_source: bool,
    /// The resolved binding, when verified.
    pub bound: Option<(Address, usize)>,
}

impl Debugger {
    /// Register a breakpoint and try to bind it.
    ///
    /// Returns `(id, line, verified)` with the line in the registered
    /// (mutated) numbering.
    pub(crate) fn set_breakpoint(
        &mut self,
        path: &str,
        line: u32,
        visible: bool,
        original_source: bool,
    ) -> (u32, u32, bool) {
        let id = self.next_breakpoint_id;
        self.next_breakpoint_id += 1;

        let file = self.files.entry(path.to_string()).or_insert_with(|| {
            crate::program::SourceFile::new(path, "", crate::ast::AstNode::default())
        });
        let line = if original_source { file.to_mutated_line(line) } else { line };
        file.breakpoints.push(Breakpoint {
            id,
            line,
            verified: false,
            visible,
            original_source,
            bound: None,
        });
        tracing::debug!(%path, line, id, visible, "registered breakpoint");

        self.verify_breakpoints(path);
        let verified = self
            .files
            .get(path)
            .and_then(|file| file.breakpoints.iter().find(|bp| bp.id == id))
            .is_some_and(|bp| bp.verified);
        (id, line, verified)
    }

    /// Try to bind every unverified breakpoint of a file. Called after
    /// registration and again on every address binding.
    pub(crate) fn verify_breakpoints(&mut self, path: &str) {
        let Some(file) = self.files.get(path) else { return };
        let contracts = file.contracts.clone();
        let unverified: Vec<(u32, u32, bool)> = file
            .breakpoints
            .iter()
            .filter(|bp| !bp.verified)
            .map(|bp| (bp.id, bp.line, bp.visible))
            .collect();

        for (id, line, visible) in unverified {
            let Some((address, pc)) = self.resolve_line(path, line, &contracts) else {
                // kept registered; retried on the next address binding
                let error =
                    crate::DebugError::Resolution { path: path.to_string(), line };
                tracing::debug!(id, %error, "breakpoint unresolved");
                continue;
            };
            if let Some(bp) = self
                .files
                .get_mut(path)
                .and_then(|file| file.breakpoints.iter_mut().find(|bp| bp.id == id))
            {
                bp.verified = true;
                bp.bound = Some((address, pc));
            }
            self.send_adapter_request(
                AdapterRequest::SendBreakpoint { id, address, pc, enabled: true, runtime: true },
                PendingRequest::BreakpointSync,
            );
            if visible {
                self.emit_event(
                    ui_events::BREAKPOINT_VALIDATED,
                    vec![serde_json::json!({ "id": id, "path": path, "line": line, "verified": true })],
                );
            }
            tracing::info!(%path, line, id, %address, pc, "breakpoint bound");
        }
    }

    /// Resolve a (mutated) line to the first matching `(address, pc)`
    /// among the file's linked contracts.
    fn resolve_line(&self, path: &str, line: u32, contracts: &[String]) -> Option<(Address, usize)> {
        let file = self.files.get(path)?;
        let (line_start, line_end) = line_span(line, &file.line_breaks, file.source.len());

        for contract_name in contracts {
            let Some(contract) = self.contracts.get(contract_name) else { continue };
            let Some(address) = contract.address else { continue };

            // the first AST node starting inside the target line
            let mut best: Option<(usize, usize)> = None;
            contract.ast.for_each(&mut |node| {
                if node.name == node_kinds::CONTRACT_DEFINITION {
                    return;
                }
                if let Some((start, length)) = node.src_range() {
                    if start >= line_start
                        && start < line_end
                        && best.is_none_or(|(found, _)| start < found)
                    {
                        best = Some((start, length));
                    }
                }
            });
            let Some((start, length)) = best else { continue };

            let Some(index) =
                contract.srcmap_runtime.to_index(start as i64, length as i64, None)
            else {
                continue;
            };
            let Some(pc) = contract.first_pc_of_index(index) else { continue };
            return Some((address, pc));
        }
        None
    }

    /// Remove every breakpoint of a file, always notifying the adapter
    /// with `enabled = false` under the original ids.
    pub(crate) fn clear_breakpoints(&mut self, path: &str) {
        let Some(file) = self.files.get_mut(path) else { return };
        let removed: Vec<Breakpoint> = file.breakpoints.drain(..).collect();
        for bp in removed {
            self.send_breakpoint_disable(&bp);
        }
        tracing::debug!(%path, "cleared breakpoints");
    }

    /// Remove a single breakpoint by id.
    pub(crate) fn clear_breakpoint(&mut self, path: &str, id: u32) {
        let Some(file) = self.files.get_mut(path) else { return };
        let Some(at) = file.breakpoints.iter().position(|bp| bp.id == id) else { return };
        let bp = file.breakpoints.remove(at);
        self.send_breakpoint_disable(&bp);
    }

    fn send_breakpoint_disable(&mut self, bp: &Breakpoint) {
        let (address, pc) = bp.bound.unwrap_or((Address::ZERO, 0));
        self.send_adapter_request(
            AdapterRequest::SendBreakpoint {
                id: bp.id,
                address,
                pc,
                enabled: false,
                runtime: true,
            },
            PendingRequest::BreakpointSync,
        );
    }

    /// The verified breakpoint sitting on `line` of `path`, if any.
    /// Internal (invisible) breakpoints take precedence over user-visible
    /// ones sharing the line, so an evaluation settle stays silent.
    pub(crate) fn breakpoint_on_line(&self, path: &str, line: u32) -> Option<&Breakpoint> {
        self.files
            .get(path)?
            .breakpoints
            .iter()
            .filter(|bp| bp.verified && bp.line == line)
            .min_by_key(|bp| bp.visible)
    }
}
