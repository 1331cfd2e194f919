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

//! The UI-facing facade: request dispatch and event emission.
//!
//! Exposes the coarse debugger API (`start`, `setBreakpoint`, `stack`,
//! `variables`, `uiAction`, `evaluate`, `ping`) over [`ClientEnvelope`]
//! messages. `variables` supports lazy expansion: reference 0 yields the
//! in-scope roots, a composite's detail id yields its children. Storage-
//! backed values may suspend on a `getStorage` round-trip and answer the
//! client once the word arrives.

use alloy_primitives::{Address, U256};
use sdb_common::{
    ui_events, AdapterRequest, ClearBreakpointsRequest, ClientEnvelope, FrameInfo,
    SetBreakpointRequest, SetBreakpointResponse, StackRequest, StackResponse, StartRequest,
    UiActionRequest, VariableView, VariablesRequest, VariablesResponse,
};

use crate::{
    ast::node_kinds,
    types::{decode_detail, detail_children, Children, DecodeCx, Decoded, Detail, StorageView},
    Debugger, PendingRequest, ResumeAfterStorage,
};

/// A composite detail registered for lazy child expansion.
#[derive(Debug, Clone)]
pub(crate) struct Expansion {
    /// Contract whose state backs the detail.
    pub address: Address,
    /// The composite's placement-resolved detail.
    pub detail: Detail,
    /// Storage base its positions are relative to.
    pub base_slot: U256,
    /// Stack position of the owning variable.
    pub stack_position: Option<usize>,
}

/// [`StorageView`] over the engine's per-address word cache.
struct CachedStorage<'a> {
    cache: &'a std::collections::HashMap<(Address, U256), alloy_primitives::B256>,
    address: Address,
}

impl StorageView for CachedStorage<'_> {
    fn storage_word(&self, slot: U256) -> Option<alloy_primitives::B256> {
        self.cache.get(&(self.address, slot)).copied()
    }
}

impl Debugger {
    /// Process one message from the UI client channel.
    pub fn handle_client_message(&mut self, message: ClientEnvelope) {
        if !message.is_request {
            // responses to engine-initiated events need no bookkeeping
            return;
        }
        tracing::debug!(kind = %message.kind, id = %message.id, "client request");
        match message.kind.as_str() {
            "start" => {
                let payload: StartRequest =
                    serde_json::from_value(message.content.clone()).unwrap_or_default();
                self.entry_pending = payload.stop_on_entry;
                self.respond(&message, serde_json::json!({}));
            }
            "setBreakpoint" => match serde_json::from_value::<SetBreakpointRequest>(
                message.content.clone(),
            ) {
                Ok(payload) => {
                    let (id, line, verified) =
                        self.set_breakpoint(&payload.path, payload.line, true, true);
                    let response = SetBreakpointResponse { id, line, verified };
                    self.respond(&message, serde_json::to_value(response).unwrap_or_default());
                }
                Err(error) => self.respond_error(&message, format!("malformed request: {error}")),
            },
            "clearBreakpoints" => match serde_json::from_value::<ClearBreakpointsRequest>(
                message.content.clone(),
            ) {
                Ok(payload) => {
                    self.clear_breakpoints(&payload.path);
                    self.respond(&message, serde_json::json!({}));
                }
                Err(error) => self.respond_error(&message, format!("malformed request: {error}")),
            },
            "stack" => match serde_json::from_value::<StackRequest>(message.content.clone()) {
                Ok(payload) => {
                    let response = self.stack_response(payload);
                    self.respond(&message, serde_json::to_value(response).unwrap_or_default());
                }
                Err(error) => self.respond_error(&message, format!("malformed request: {error}")),
            },
            "variables" => match serde_json::from_value::<VariablesRequest>(message.content.clone())
            {
                Ok(payload) => self.answer_variables(&message.id, payload.variables_reference),
                Err(error) => self.respond_error(&message, format!("malformed request: {error}")),
            },
            "uiAction" => match serde_json::from_value::<UiActionRequest>(message.content.clone()) {
                Ok(payload) => match self.apply_ui_action(payload.action) {
                    Ok(()) => self.respond(&message, serde_json::json!({})),
                    Err(error) => self.respond_error(&message, error),
                },
                Err(error) => self.respond_error(&message, format!("malformed request: {error}")),
            },
            "evaluate" => self.handle_evaluate(&message),
            "ping" => self.respond(&message, serde_json::json!({})),
            other => {
                let error = crate::DebugError::protocol(format!("unknown request type `{other}`"));
                self.respond_error(&message, error.to_string());
            }
        }
    }

    /// The UI client went away: report the end of the session but leave
    /// the VM adapter untouched.
    pub fn client_disconnected(&mut self) {
        tracing::info!("ui client disconnected");
        self.pending_action = None;
        self.buffered_action = None;
        self.emit_event(ui_events::END, vec![]);
    }

    fn respond(&mut self, request: &ClientEnvelope, content: serde_json::Value) {
        self.outbox.push_client(ClientEnvelope::response(request, content));
    }

    fn respond_error(&mut self, request: &ClientEnvelope, error: String) {
        tracing::debug!(kind = %request.kind, %error, "request failed");
        self.outbox.push_client(ClientEnvelope::error_response(&request.id, &request.kind, error));
    }

    /// Answer a `stack` request: the top frame is synthesized from the
    /// live step, outer frames come from the reconstructed call stack.
    fn stack_response(&self, request: StackRequest) -> StackResponse {
        let mut frames = Vec::new();
        if let Some(step) = &self.current_step {
            let path = step.path.clone().unwrap_or_default();
            let function_name = step
                .location
                .and_then(|location| location.range())
                .and_then(|(start, length)| {
                    self.contracts
                        .values()
                        .find(|contract| Some(contract.path.as_str()) == step.path.as_deref())
                        .and_then(|contract| {
                            contract.ast.find_enclosing(
                                node_kinds::FUNCTION_DEFINITION,
                                start,
                                length,
                            )
                        })
                        .and_then(|function| function.attribute_str("name"))
                })
                .unwrap_or("<unknown>")
                .to_string();
            let line = step.line.unwrap_or(0);
            let reported =
                self.files.get(&path).map_or(line, |file| file.to_original_line(line));
            frames.push(FrameInfo { index: 0, name: function_name, path, line: reported, pc: step.pc });
        }
        for (offset, frame) in self.call_stack.iter().rev().enumerate() {
            let reported = self
                .files
                .get(&frame.path)
                .map_or(frame.line, |file| file.to_original_line(frame.line));
            frames.push(FrameInfo {
                index: offset + 1,
                name: frame.function_name.clone(),
                path: frame.path.clone(),
                line: reported,
                pc: frame.pc,
            });
        }

        let total_frames = frames.len();
        let window = frames
            .into_iter()
            .skip(request.start_frame)
            .take(request.end_frame.saturating_sub(request.start_frame))
            .collect();
        StackResponse { frames: window, total_frames }
    }

    /// Answer a `variables` request, possibly after one or more storage
    /// round-trips. Re-entered with the same arguments whenever an awaited
    /// storage word arrives.
    pub(crate) fn answer_variables(&mut self, request_id: &str, reference: u64) {
        match self.collect_variables(request_id, reference) {
            Ok(Some(variables)) => {
                let response = VariablesResponse { variables };
                self.outbox.push_client(ClientEnvelope {
                    id: request_id.to_string(),
                    is_request: false,
                    kind: "variables".to_string(),
                    content: serde_json::to_value(response).unwrap_or_default(),
                    error: None,
                });
            }
            Ok(None) => {
                // suspended on a storage read; the response resumes us
            }
            Err(error) => {
                self.outbox.push_client(ClientEnvelope::error_response(
                    request_id,
                    "variables",
                    error,
                ));
            }
        }
    }

    /// Gather the requested variable views. `Ok(None)` means a storage
    /// fetch is in flight and the request will be answered later.
    fn collect_variables(
        &mut self,
        request_id: &str,
        reference: u64,
    ) -> Result<Option<Vec<VariableView>>, String> {
        let items: Vec<(String, Detail, U256, Option<usize>, Address)> = if reference == 0 {
            let step = self.current_step.as_ref().ok_or("the vm is not paused")?;
            let address = step.address;
            let contract = self
                .contracts
                .values()
                .find(|contract| contract.address == Some(address))
                .ok_or("no contract at the current address")?;
            let mut seen = std::collections::BTreeSet::new();
            let mut roots = Vec::new();
            for scope in &step.scope_chain {
                let Some(variables) = contract.scope_variables.get(&scope.ast_id) else {
                    continue;
                };
                for (name, variable) in variables {
                    if seen.insert(name.clone()) {
                        roots.push((
                            name.clone(),
                            variable.detail.clone(),
                            U256::ZERO,
                            variable.stack_position,
                            address,
                        ));
                    }
                }
            }
            roots
        } else {
            let expansion =
                self.expansions.get(&reference).cloned().ok_or("unknown variables reference")?;
            let expanded = {
                let step = self.current_step.as_ref().ok_or("the vm is not paused")?;
                let cx = DecodeCx {
                    stack: &step.stack,
                    memory: &step.memory,
                    stack_position: expansion.stack_position,
                    storage: &CachedStorage {
                        cache: &self.storage_cache,
                        address: expansion.address,
                    },
                };
                detail_children(&expansion.detail, expansion.base_slot, &cx)
            };
            match expanded {
                Children::Expanded(children) => children
                    .into_iter()
                    .map(|child| {
                        (
                            child.name,
                            child.detail,
                            child.base_slot,
                            expansion.stack_position,
                            expansion.address,
                        )
                    })
                    .collect(),
                Children::NeedSlot(slot) => {
                    self.request_storage_word(expansion.address, slot, request_id, reference);
                    return Ok(None);
                }
            }
        };

        let mut views = Vec::new();
        for (name, detail, base_slot, stack_position, address) in items {
            let outcome = {
                let step = self.current_step.as_ref().ok_or("the vm is not paused")?;
                let cx = DecodeCx {
                    stack: &step.stack,
                    memory: &step.memory,
                    stack_position,
                    storage: &CachedStorage { cache: &self.storage_cache, address },
                };
                decode_detail(&detail, base_slot, &cx)
            };
            let value = match outcome {
                Decoded::Value(value) => value,
                Decoded::NeedSlot(slot) => {
                    self.request_storage_word(address, slot, request_id, reference);
                    return Ok(None);
                }
            };
            let variables_reference = if detail.is_value() {
                0
            } else {
                let id = self.next_reference;
                self.next_reference += 1;
                self.expansions.insert(
                    id,
                    Expansion { address, detail: detail.clone(), base_slot, stack_position },
                );
                id
            };
            views.push(VariableView {
                name,
                type_name: detail.type_string(),
                value,
                variables_reference,
            });
        }
        Ok(Some(views))
    }

    fn request_storage_word(
        &mut self,
        address: Address,
        slot: U256,
        request_id: &str,
        reference: u64,
    ) {
        tracing::debug!(%address, %slot, "fetching storage word");
        self.send_adapter_request(
            AdapterRequest::GetStorage { address, position: slot },
            PendingRequest::GetStorage {
                address,
                slot,
                resume: ResumeAfterStorage::Variables {
                    request_id: request_id.to_string(),
                    reference,
                },
            },
        );
    }
}
