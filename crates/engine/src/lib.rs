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

//! SDB Engine - Execution tracking and evaluation for EVM-style debugging
//!
//! This crate is the debugger's core: it ingests compilation artifacts and
//! builds a searchable program model, consumes the instrumented VM's
//! per-instruction event stream, reconstructs the logical call stack and
//! lexical scope, enforces breakpoints and step semantics, decodes typed
//! values out of raw stack/memory/storage words, and evaluates expressions
//! in place by recompiling the source and injecting fresh bytecode into
//! the paused VM.
//!
//! The engine is single-threaded, cooperative and sans-IO: the host feeds
//! it one message at a time ([`Debugger::handle_client_message`],
//! [`Debugger::handle_vm_message`]) and drains the outbox afterwards.
//! Anything that needs the adapter's help suspends into a correlation map
//! keyed by the request id; the matching response resumes the stored
//! continuation, and an unknown id is a silent no-op.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

use std::collections::{HashMap, HashSet, VecDeque};

use alloy_primitives::{Address, B256, U256};
use sdb_common::{
    ui_events, AdapterRequest, ClientEnvelope, CompilationResult, GetStorageResponse,
    LinkCompilerOutputPayload, LinkContractAddressPayload, NewContractPayload, StepEventPayload,
    TriggerKind, UiAction, VmEnvelope, VmMessageType,
};

pub mod ast;
pub mod breakpoints;
mod client;
pub mod error;
mod eval;
pub mod program;
pub mod sourcemap;
mod stepping;
pub mod types;

pub use client::*;
pub use error::DebugError;
pub use program::{Contract, SourceFile, Variable};
pub use stepping::{StackFrame, StepData};

/// The compiler toolchain seam. The engine never touches the filesystem or
/// a compiler binary itself; the host supplies both behind this trait.
pub trait Compiler {
    /// Compile one source file, returning artifacts in the same shape the
    /// adapter's `linkCompilerOutput` delivers.
    fn compile(&self, path: &str, source: &str) -> Result<CompilationResult, CompileFailure>;
}

/// A failed compilation, carrying the toolchain's diagnostics verbatim.
#[derive(Debug, Clone)]
pub struct CompileFailure {
    /// The compiler's error output.
    pub message: String,
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct DebuggerConfig {
    /// Whether step acknowledgements may carry the fast-step hint that
    /// lets the VM batch-skip line-unchanged instructions.
    pub fast_step: bool,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self { fast_step: true }
    }
}

/// Outbound messages produced while handling an inbound one. The host
/// drains both queues after every `handle_*` call.
#[derive(Debug, Default)]
pub struct Outbox {
    client: VecDeque<ClientEnvelope>,
    vm: VecDeque<VmEnvelope>,
}

impl Outbox {
    pub(crate) fn push_client(&mut self, message: ClientEnvelope) {
        self.client.push_back(message);
    }

    pub(crate) fn push_vm(&mut self, message: VmEnvelope) {
        self.vm.push_back(message);
    }
}

/// A suspended engine-side continuation, resumed by the adapter response
/// with the matching id.
#[derive(Debug, Clone)]
pub(crate) enum PendingRequest {
    /// Breakpoint enable/disable sync; the ack needs no work.
    BreakpointSync,
    /// Declaration-table sync; the ack needs no work.
    DeclarationSync,
    /// Jump-destination sync; the ack needs no work.
    JumpDestinationSync,
    /// A storage word was requested; cache it and resume the suspended
    /// operation.
    GetStorage {
        address: Address,
        slot: U256,
        resume: ResumeAfterStorage,
    },
    /// Evaluation bytecode was injected; on the ack, resume the paused
    /// step by running to the injected pc.
    InjectCode {
        paused_step: String,
        pc: usize,
    },
    /// The VM is running to a pc; the ack needs no work.
    RunUntilPc,
}

/// What to resume once an awaited storage word arrives.
#[derive(Debug, Clone)]
pub(crate) enum ResumeAfterStorage {
    /// Re-answer a client `variables` request.
    Variables { request_id: String, reference: u64 },
}

/// Position and depth of the last reported stop, the reference point for
/// the step predicates.
#[derive(Debug, Clone)]
pub(crate) struct StopSnapshot {
    pub path: Option<String>,
    pub line: Option<u32>,
    pub depth: usize,
}

/// An armed user action waiting for its stop predicate to match.
#[derive(Debug, Clone)]
pub(crate) struct PendingAction {
    pub action: UiAction,
    pub path: Option<String>,
    pub line: Option<u32>,
    pub depth: usize,
}

/// An in-flight expression evaluation, completed by the step engine when
/// the wrapper's frame pops.
#[derive(Debug, Clone)]
pub(crate) struct PendingEvaluation {
    /// Name of the synthesized wrapper function.
    pub function_name: String,
    /// Textual return type the wrapper was compiled with.
    pub return_type: String,
    /// Client request to answer with the recovered value.
    pub client_id: String,
}

/// The debugger engine. One value owns the whole program model and all
/// session state; components receive it explicitly instead of reaching for
/// globals.
pub struct Debugger {
    pub(crate) config: DebuggerConfig,
    pub(crate) compiler: Box<dyn Compiler>,

    /// Path → source file.
    pub(crate) files: HashMap<String, SourceFile>,
    /// Contract name → contract.
    pub(crate) contracts: HashMap<String, Contract>,
    /// Whether a compilation has been linked yet.
    pub(crate) linked: bool,

    pub(crate) current_step: Option<StepData>,
    pub(crate) previous_step: Option<StepData>,
    pub(crate) call_stack: Vec<StackFrame>,
    /// Step ids already acknowledged; the double-response guard.
    pub(crate) answered_steps: HashSet<String>,

    /// Correlation map for engine-initiated adapter requests.
    pub(crate) pending_requests: HashMap<String, PendingRequest>,
    pub(crate) pending_action: Option<PendingAction>,
    pub(crate) buffered_action: Option<UiAction>,
    pub(crate) pending_evaluation: Option<PendingEvaluation>,
    /// The evaluator's invisible breakpoint, removed once consumed.
    pub(crate) internal_breakpoint: Option<(String, u32)>,
    /// Stop on the first step after `start(true)`.
    pub(crate) entry_pending: bool,
    pub(crate) last_stop: Option<StopSnapshot>,

    /// Fetched storage words, keyed by contract address and slot.
    pub(crate) storage_cache: HashMap<(Address, U256), B256>,

    pub(crate) next_breakpoint_id: u32,
    pub(crate) next_reference: u64,
    /// Detail id → registered composite, for lazy child expansion.
    pub(crate) expansions: HashMap<u64, Expansion>,

    pub(crate) outbox: Outbox,
    pub(crate) ended: bool,
}

impl Debugger {
    /// Create an engine with the default configuration.
    pub fn new(compiler: Box<dyn Compiler>) -> Self {
        Self::with_config(compiler, DebuggerConfig::default())
    }

    /// Create an engine with an explicit configuration.
    pub fn with_config(compiler: Box<dyn Compiler>, config: DebuggerConfig) -> Self {
        Self {
            config,
            compiler,
            files: HashMap::new(),
            contracts: HashMap::new(),
            linked: false,
            current_step: None,
            previous_step: None,
            call_stack: Vec::new(),
            answered_steps: HashSet::new(),
            pending_requests: HashMap::new(),
            pending_action: None,
            buffered_action: None,
            pending_evaluation: None,
            internal_breakpoint: None,
            entry_pending: false,
            last_stop: None,
            storage_cache: HashMap::new(),
            next_breakpoint_id: 1,
            next_reference: 1,
            expansions: HashMap::new(),
            outbox: Outbox::default(),
            ended: false,
        }
    }

    /// Process one message from the VM adapter channel.
    pub fn handle_vm_message(&mut self, message: VmEnvelope) {
        if self.ended {
            tracing::debug!("dropping vm message after session end");
            return;
        }
        match message.message_type {
            VmMessageType::Request => self.handle_vm_trigger(message),
            VmMessageType::Response => self.handle_vm_response(message),
        }
    }

    fn handle_vm_trigger(&mut self, message: VmEnvelope) {
        let Some(trigger) = message.trigger_type else {
            tracing::warn!(id = %message.id, "vm request without trigger type");
            self.outbox.push_vm(VmEnvelope::response(&message.id, serde_json::Value::Null));
            return;
        };
        tracing::debug!(?trigger, id = %message.id, "vm trigger");
        match trigger {
            TriggerKind::LinkCompilerOutput => {
                match serde_json::from_value::<LinkCompilerOutputPayload>(message.content) {
                    Ok(payload) => self.link_compiler_output(payload),
                    Err(error) => tracing::warn!(%error, "malformed linkCompilerOutput"),
                }
                self.outbox.push_vm(VmEnvelope::response(&message.id, serde_json::json!({})));
            }
            TriggerKind::LinkContractAddress => {
                match serde_json::from_value::<LinkContractAddressPayload>(message.content) {
                    Ok(payload) => self.link_contract_address(&payload.contract_name, payload.address),
                    Err(error) => tracing::warn!(%error, "malformed linkContractAddress"),
                }
                self.outbox.push_vm(VmEnvelope::response(&message.id, serde_json::json!({})));
            }
            TriggerKind::NewContract => {
                match serde_json::from_value::<NewContractPayload>(message.content) {
                    Ok(payload) => self.bind_new_contract(&payload.code, payload.address),
                    Err(error) => tracing::warn!(%error, "malformed newContract"),
                }
                self.outbox.push_vm(VmEnvelope::response(&message.id, serde_json::json!({})));
            }
            TriggerKind::Step => {
                match serde_json::from_value::<StepEventPayload>(message.content) {
                    Ok(payload) => self.handle_step_event(message.id, payload),
                    Err(error) => {
                        tracing::warn!(%error, "malformed step event");
                        self.acknowledge_step(&message.id, false);
                    }
                }
            }
            TriggerKind::Exception => self.handle_exception(&message.id, message.content),
        }
    }

    fn handle_vm_response(&mut self, message: VmEnvelope) {
        // idempotent duplicate delivery: an unknown id is a silent no-op
        let Some(pending) = self.pending_requests.remove(&message.id) else {
            tracing::trace!(id = %message.id, "response for unknown request id");
            return;
        };
        match pending {
            PendingRequest::BreakpointSync
            | PendingRequest::DeclarationSync
            | PendingRequest::JumpDestinationSync
            | PendingRequest::RunUntilPc => {}
            PendingRequest::GetStorage { address, slot, resume } => {
                match serde_json::from_value::<GetStorageResponse>(message.content) {
                    Ok(response) => {
                        self.storage_cache.insert((address, slot), response.value);
                    }
                    Err(error) => {
                        tracing::warn!(%error, "malformed getStorage response");
                        self.storage_cache.insert((address, slot), B256::ZERO);
                    }
                }
                match resume {
                    ResumeAfterStorage::Variables { request_id, reference } => {
                        self.answer_variables(&request_id, reference);
                    }
                }
            }
            PendingRequest::InjectCode { paused_step, pc } => {
                tracing::debug!(pc, "injection acknowledged, resuming to the call site");
                // the runUntilPc doubles as the paused step's resume
                self.answered_steps.insert(paused_step.clone());
                self.send_adapter_request(
                    AdapterRequest::RunUntilPc { step_id: paused_step, pc },
                    PendingRequest::RunUntilPc,
                );
            }
        }
    }

    /// The VM adapter is gone: clear every pending continuation and report
    /// the end of the session.
    pub fn vm_disconnected(&mut self) {
        if self.ended {
            return;
        }
        tracing::info!(error = %DebugError::Fatal, "vm adapter disconnected, ending session");
        self.ended = true;
        self.pending_requests.clear();
        self.pending_evaluation = None;
        self.pending_action = None;
        self.buffered_action = None;
        self.emit_event(ui_events::END, vec![]);
    }

    /// Convenience entry: parse and handle a raw client-channel JSON frame.
    pub fn handle_client_json(&mut self, raw: &str) -> eyre::Result<()> {
        let message: ClientEnvelope = serde_json::from_str(raw)?;
        self.handle_client_message(message);
        Ok(())
    }

    /// Convenience entry: parse and handle a raw adapter-channel JSON
    /// frame.
    pub fn handle_vm_json(&mut self, raw: &str) -> eyre::Result<()> {
        let message: VmEnvelope = serde_json::from_str(raw)?;
        self.handle_vm_message(message);
        Ok(())
    }

    /// Drain the messages addressed to the UI client.
    pub fn drain_client_messages(&mut self) -> Vec<ClientEnvelope> {
        self.outbox.client.drain(..).collect()
    }

    /// Drain the messages addressed to the VM adapter.
    pub fn drain_vm_messages(&mut self) -> Vec<VmEnvelope> {
        self.outbox.vm.drain(..).collect()
    }

    /// Issue an adapter request and register its continuation under the
    /// fresh id.
    pub(crate) fn send_adapter_request(
        &mut self,
        request: AdapterRequest,
        pending: PendingRequest,
    ) -> String {
        let envelope = VmEnvelope::request(&request);
        let id = envelope.id.clone();
        self.pending_requests.insert(id.clone(), pending);
        self.outbox.push_vm(envelope);
        id
    }

    /// Emit an engine-initiated UI event.
    pub(crate) fn emit_event(&mut self, event: &str, args: Vec<serde_json::Value>) {
        self.outbox.push_client(ClientEnvelope::event(event, args));
    }

    /// Answer a stored client request by id.
    pub(crate) fn respond_to_client_id(
        &mut self,
        id: &str,
        kind: &str,
        content: serde_json::Value,
    ) {
        self.outbox.push_client(ClientEnvelope {
            id: id.to_string(),
            is_request: false,
            kind: kind.to_string(),
            content,
            error: None,
        });
    }
}

impl std::fmt::Debug for Debugger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debugger")
            .field("files", &self.files.len())
            .field("contracts", &self.contracts.len())
            .field("linked", &self.linked)
            .field("call_depth", &self.call_stack.len())
            .field("pending_requests", &self.pending_requests.len())
            .field("ended", &self.ended)
            .finish_non_exhaustive()
    }
}
