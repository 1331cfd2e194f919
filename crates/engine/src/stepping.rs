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

//! The step engine: a state machine driven by the VM's instruction stream.
//!
//! Every `step` trigger is correlated with the program model to produce a
//! fresh [`StepData`], the logical call stack is maintained from the
//! *previous* step's jump classification, and the stop predicates decide
//! whether to halt (emit a `stopOn*` event and leave the VM paused) or to
//! acknowledge with a fast-step hint.
//!
//! Exactly one acknowledgement is issued per step id; duplicates are
//! dropped through a membership check.

use alloy_primitives::{Address, B256};
use sdb_common::{
    ui_events, EvaluateResponse, StepAck, StepEventPayload, UiAction, VmEnvelope,
};

use crate::{
    ast::{node_kinds, ScopeRef},
    sourcemap::{offset_to_line_column, JumpKind, SourceLocation},
    types::{interpret_word, parse_type, DataLocation, DetailBody},
    Debugger, PendingAction,
};

/// Volatile per-instruction state, replaced wholesale on every VM event.
#[derive(Debug, Clone, Default)]
pub struct StepData {
    /// Id of the pending `step` request from the VM.
    pub request_id: String,
    /// Executing contract address.
    pub address: Address,
    /// Program counter.
    pub pc: usize,
    /// Instruction index, when the pc has a mapping.
    pub index: Option<usize>,
    /// Source location of the instruction, when mapped.
    pub location: Option<SourceLocation>,
    /// Zero-based line in mutated-source numbering.
    pub line: Option<u32>,
    /// Zero-based column.
    pub column: Option<u32>,
    /// Path of the contract's source file.
    pub path: Option<String>,
    /// Raw operand stack, bottom first.
    pub stack: Vec<B256>,
    /// Raw linear memory.
    pub memory: Vec<u8>,
    /// Remaining gas.
    pub gas_left: u64,
    /// Lexical scope chain at the instruction, innermost first.
    pub scope_chain: Vec<ScopeRef>,
}

/// One reconstructed logical stack frame. The frame for the *currently*
/// executing line is synthesized from [`StepData`] on demand and never
/// stored here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    /// Name of the called function.
    pub function_name: String,
    /// Source file of the call site.
    pub path: String,
    /// Line of the call site, mutated numbering.
    pub line: u32,
    /// Program counter at the call site.
    pub pc: usize,
}

impl Debugger {
    /// Process one `step` trigger from the VM adapter.
    pub(crate) fn handle_step_event(&mut self, request_id: String, event: StepEventPayload) {
        let Some(contract_name) = self.contract_name_by_address(event.address) else {
            // no compilation linked yet, or an unlinked address: bundle a
            // null-location step and acknowledge immediately
            let gap = crate::DebugError::ModelGap(format!("address {}", event.address));
            tracing::debug!(%gap, pc = event.pc, "step outside the model");
            self.install_step(StepData {
                request_id: request_id.clone(),
                address: event.address,
                pc: event.pc,
                stack: event.stack.clone(),
                memory: event.memory.to_vec(),
                gas_left: event.gas_left,
                ..StepData::default()
            });
            self.acknowledge_step(&request_id, true);
            return;
        };

        let step = self.build_step_data(request_id, &contract_name, &event);
        self.update_call_stack(&contract_name, &step);
        self.freeze_declaration_position(&contract_name, &step);
        self.install_step(step);

        if let Some(action) = self.buffered_action.take() {
            tracing::debug!(?action, "applying buffered user action");
            self.arm_pending_action(action);
        }

        self.evaluate_pause();
    }

    fn contract_name_by_address(&self, address: Address) -> Option<String> {
        self.contracts
            .values()
            .find(|contract| contract.address == Some(address))
            .map(|contract| contract.name.clone())
    }

    fn build_step_data(
        &self,
        request_id: String,
        contract_name: &str,
        event: &StepEventPayload,
    ) -> StepData {
        let contract = &self.contracts[contract_name];
        let index = contract.instruction_index(event.pc);
        let location = index.and_then(|index| contract.srcmap_runtime.at_index(index)).copied();
        let file = self.files.get(&contract.path);

        let mut line = None;
        let mut column = None;
        let mut scope_chain = Vec::new();
        if let (Some(location), Some(file)) = (&location, file) {
            if let Some((start, _)) = location.range() {
                let (l, c) = offset_to_line_column(start, &file.line_breaks);
                line = Some(l);
                column = Some(c);
                scope_chain = contract.ast.scopes_at(start);
            }
        }

        StepData {
            request_id,
            address: event.address,
            pc: event.pc,
            index,
            location,
            line,
            column,
            path: Some(contract.path.clone()),
            stack: event.stack.clone(),
            memory: event.memory.to_vec(),
            gas_left: event.gas_left,
            scope_chain,
        }
    }

    fn install_step(&mut self, step: StepData) {
        self.previous_step = self.current_step.take();
        self.current_step = Some(step);
    }

    /// Maintain the logical call stack from the previous step's jump
    /// classification, or from an external function entry at the current
    /// pc.
    fn update_call_stack(&mut self, contract_name: &str, step: &StepData) {
        let previous_jump =
            self.current_step.as_ref().and_then(|prev| prev.location).map(|loc| loc.jump);

        match previous_jump {
            Some(JumpKind::In) => {
                if let Some(frame) = self.frame_from_previous_step() {
                    tracing::trace!(function = %frame.function_name, "call stack push");
                    self.call_stack.push(frame);
                }
            }
            Some(JumpKind::Out) => {
                self.recover_evaluation_result(step);
                if let Some(frame) = self.call_stack.pop() {
                    tracing::trace!(function = %frame.function_name, "call stack pop");
                }
            }
            _ => {
                let contract = &self.contracts[contract_name];
                if let Some(entry) = contract.function_entry_map.get(&step.pc) {
                    // skip the double push when dispatch falls through the
                    // entry the stack already ends in
                    let already_entered = self
                        .call_stack
                        .last()
                        .is_some_and(|frame| frame.function_name == *entry);
                    if !already_entered {
                        self.call_stack.push(StackFrame {
                            function_name: entry.clone(),
                            path: contract.path.clone(),
                            line: step.line.unwrap_or(0),
                            pc: step.pc,
                        });
                    }
                }
            }
        }
    }

    /// Build the frame for a `jump = i` transition out of the previous
    /// step: the function definition containing the call site.
    fn frame_from_previous_step(&self) -> Option<StackFrame> {
        let prev = self.current_step.as_ref()?;
        let (start, length) = prev.location?.range()?;
        let path = prev.path.clone()?;
        let contract = self.contracts.values().find(|contract| contract.path == path)?;
        let function =
            contract.ast.find_enclosing(node_kinds::FUNCTION_DEFINITION, start, length)?;
        Some(StackFrame {
            function_name: function.attribute_str("name").unwrap_or("<anonymous>").to_string(),
            path,
            line: prev.line.unwrap_or(0),
            pc: prev.pc,
        })
    }

    /// When a pending evaluation's wrapper pops, its return value is the
    /// topmost stack word of the current event. Decode it under the
    /// recorded return type and answer the stored client request.
    ///
    /// The function being exited is identified from the previous step's
    /// location (the return instruction sits inside the wrapper's body).
    fn recover_evaluation_result(&mut self, step: &StepData) {
        let Some(eval) = &self.pending_evaluation else { return };
        let exited = self
            .frame_from_previous_step()
            .map(|frame| frame.function_name);
        if exited.as_deref() != Some(eval.function_name.as_str()) {
            return;
        }
        let eval = self.pending_evaluation.take().expect("checked above");

        let result = match step.stack.last() {
            Some(word) => decode_return_word(*word, &eval.return_type),
            None => crate::types::INVALID_VALUE.to_string(),
        };
        tracing::info!(function = %eval.function_name, %result, "evaluation result recovered");
        self.respond_to_client_id(
            &eval.client_id,
            "evaluate",
            serde_json::to_value(EvaluateResponse { result, variables_reference: 0 })
                .unwrap_or_default(),
        );
    }

    /// Freeze a variable's stack position the first time its declaration
    /// is stepped on.
    fn freeze_declaration_position(&mut self, contract_name: &str, step: &StepData) {
        let Some(location) = &step.location else { return };
        let declared = {
            let contract = &self.contracts[contract_name];
            contract
                .declaration_at(location)
                .and_then(|node| node.attribute_str("name"))
                .map(str::to_string)
        };
        let Some(name) = declared else { return };
        let stack_length = step.stack.len();
        let Some(contract) = self.contracts.get_mut(contract_name) else { return };
        if let Some(variable) = contract.resolve_variable_mut(&step.scope_chain, &name) {
            if variable.stack_position.is_none() {
                tracing::debug!(%name, position = stack_length, "froze variable stack position");
                variable.stack_position = Some(stack_length);
            }
        }
    }

    /// Decide whether the current step is a stop: test the entry flag,
    /// breakpoints, then the pending user action's predicate. On a miss,
    /// acknowledge with the fast-step hint.
    fn evaluate_pause(&mut self) {
        let Some(step) = &self.current_step else { return };
        let request_id = step.request_id.clone();
        let (Some(line), Some(path)) = (step.line, step.path.clone()) else {
            // a model gap is never a stop candidate
            self.acknowledge_step(&request_id, true);
            return;
        };
        let depth = self.call_stack.len();
        let previous_position = self
            .previous_step
            .as_ref()
            .and_then(|prev| prev.line.map(|l| (prev.path.clone().unwrap_or_default(), l)));

        if self.entry_pending {
            self.entry_pending = false;
            self.pending_action = None;
            self.stop(ui_events::STOP_ON_ENTRY, &path, line, depth);
            return;
        }

        // breakpoints re-arm when the line is left
        let entered_line = previous_position != Some((path.clone(), line));
        if entered_line {
            if let Some(bp) = self.breakpoint_on_line(&path, line) {
                let (visible, id) = (bp.visible, bp.id);
                if visible {
                    self.pending_action = None;
                    self.stop(ui_events::STOP_ON_BREAKPOINT, &path, line, depth);
                } else {
                    // an evaluator-internal breakpoint: the VM pauses where
                    // the UI already believes it is paused; consume it
                    tracing::debug!(id, "internal breakpoint consumed");
                    self.clear_breakpoint(&path.clone(), id);
                    self.internal_breakpoint = None;
                    self.record_stop_position(&path, line, depth);
                }
                return;
            }
        }

        if let Some(pending) = &self.pending_action {
            let line_changed =
                pending.path.as_deref() != Some(path.as_str()) || pending.line != Some(line);
            let stop_event = match pending.action {
                UiAction::StepOver if depth == pending.depth && line_changed => {
                    Some(ui_events::STOP_ON_STEP_OVER)
                }
                UiAction::StepIn
                    if depth > pending.depth
                        && line_changed
                        && !self.on_function_header() =>
                {
                    Some(ui_events::STOP_ON_STEP_IN)
                }
                UiAction::StepOut if depth < pending.depth && line_changed => {
                    Some(ui_events::STOP_ON_STEP_OUT)
                }
                _ => None,
            };
            if let Some(event) = stop_event {
                self.pending_action = None;
                self.stop(event, &path, line, depth);
                return;
            }
        }

        self.acknowledge_step(&request_id, true);
    }

    /// Whether the current location covers a whole `FunctionDefinition`,
    /// i.e. the dispatcher shim before the first real statement.
    fn on_function_header(&self) -> bool {
        let Some(step) = &self.current_step else { return false };
        let Some((start, length)) = step.location.and_then(|loc| loc.range()) else {
            return false;
        };
        let Some(path) = &step.path else { return false };
        let Some(contract) = self.contracts.values().find(|contract| contract.path == *path)
        else {
            return false;
        };
        contract
            .ast
            .find_enclosing(node_kinds::FUNCTION_DEFINITION, start, length)
            .and_then(|function| function.src_range())
            .is_some_and(|range| range == (start, length))
    }

    /// Emit a stop event (with the line translated back to the user's
    /// original numbering) and leave the VM paused.
    fn stop(&mut self, event: &str, path: &str, line: u32, depth: usize) {
        let reported_line =
            self.files.get(path).map_or(line, |file| file.to_original_line(line));
        tracing::info!(event, %path, line = reported_line, "stopping");
        self.record_stop_position(path, line, depth);
        self.emit_event(
            event,
            vec![serde_json::json!({ "path": path, "line": reported_line })],
        );
    }

    fn record_stop_position(&mut self, path: &str, line: u32, depth: usize) {
        self.last_stop = Some(crate::StopSnapshot {
            path: Some(path.to_string()),
            line: Some(line),
            depth,
        });
    }

    /// Issue the single allowed acknowledgement for a step id. Duplicate
    /// acknowledgements are silently dropped.
    pub(crate) fn acknowledge_step(&mut self, request_id: &str, fast_step: bool) {
        if !self.answered_steps.insert(request_id.to_string()) {
            tracing::trace!(%request_id, "duplicate step response dropped");
            return;
        }
        let fast_step = fast_step && self.config.fast_step;
        self.outbox.push_vm(VmEnvelope::response(
            request_id,
            serde_json::to_value(StepAck { fast_step }).unwrap_or_default(),
        ));
    }

    /// Whether the VM is paused on an unacknowledged step.
    pub(crate) fn is_paused(&self) -> bool {
        self.current_step
            .as_ref()
            .is_some_and(|step| !self.answered_steps.contains(&step.request_id))
    }

    /// Apply a UI execution-control action: arm its predicate and resume
    /// the paused VM, or buffer it for the next pause.
    pub(crate) fn apply_ui_action(&mut self, action: UiAction) -> Result<(), String> {
        match action {
            UiAction::ContinueReverse | UiAction::StepBack => {
                return Err("reverse execution is not supported".to_string());
            }
            _ => {}
        }

        if self.is_paused() {
            self.arm_pending_action(action);
            let request_id =
                self.current_step.as_ref().map(|step| step.request_id.clone()).unwrap_or_default();
            self.acknowledge_step(&request_id, true);
            Ok(())
        } else if self.buffered_action.is_some() {
            Err("another command is already pending".to_string())
        } else {
            tracing::debug!(?action, "buffering user action until the next pause");
            self.buffered_action = Some(action);
            Ok(())
        }
    }

    fn arm_pending_action(&mut self, action: UiAction) {
        let (path, line) = match &self.current_step {
            Some(step) => (step.path.clone(), step.line),
            None => (None, None),
        };
        self.pending_action = Some(PendingAction {
            action,
            path,
            line,
            depth: self.call_stack.len(),
        });
    }

    /// Handle an `exception` trigger: report it and acknowledge.
    pub(crate) fn handle_exception(&mut self, request_id: &str, payload: serde_json::Value) {
        let message = payload
            .get("message")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("vm exception")
            .to_string();
        tracing::warn!(%message, "vm exception");
        self.emit_event(ui_events::STOP_ON_EXCEPTION, vec![serde_json::json!({ "message": message })]);
        self.outbox.push_vm(VmEnvelope::response(request_id, serde_json::Value::Null));
    }
}

/// Decode an evaluation wrapper's raw return word under its textual return
/// type. Reference types degrade to a hex rendering of the word.
fn decode_return_word(word: B256, return_type: &str) -> String {
    match parse_type(return_type, &(), DataLocation::Stack) {
        Ok(detail) => match detail.body {
            DetailBody::Value { kind, bytes } => interpret_word(word.0, kind, bytes),
            _ => format!("0x{}", alloy_primitives::hex::encode(word.0)),
        },
        Err(_) => format!("0x{}", alloy_primitives::hex::encode(word.0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;

    #[test]
    fn test_decode_return_word_value_types() {
        let word = B256::from(U256::from(20).to_be_bytes::<32>());
        assert_eq!(decode_return_word(word, "uint256"), "20");
        assert_eq!(decode_return_word(word, "bool"), "true");
        let zero = B256::ZERO;
        assert_eq!(decode_return_word(zero, "bool"), "false");
    }

    #[test]
    fn test_decode_return_word_reference_type_falls_back_to_hex() {
        let word = B256::from(U256::from(0x20).to_be_bytes::<32>());
        let rendered = decode_return_word(word, "string memory");
        assert!(rendered.starts_with("0x"));
    }
}
