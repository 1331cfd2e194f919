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

//! Wire-protocol message types for the two debugger channels.
//!
//! The engine talks to two peers, each over a bidirectional stream of framed
//! JSON messages (framing itself is owned by the transport, not this crate):
//!
//! - the **UI client channel** ([`ClientEnvelope`]): requests such as
//!   `setBreakpoint` or `evaluate` come in, responses and `event` messages
//!   (`stopOnBreakpoint`, `end`, ...) go out;
//! - the **VM adapter channel** ([`VmEnvelope`]): trigger requests such as
//!   `step` or `linkCompilerOutput` come in, typed [`AdapterRequest`]s
//!   (storage reads, code injection, breakpoint sync) go out.
//!
//! Both channels correlate request and response by an opaque id; fresh ids
//! are minted with [`new_id`].

use std::collections::BTreeMap;

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

/// Mint a fresh opaque message id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ---------------------------------------------------------------------------
// UI client channel
// ---------------------------------------------------------------------------

/// A single message on the UI client channel.
///
/// Requests carry `isRequest = true`; responses echo the request's `id` and
/// `type` with `isRequest = false`. Engine-initiated notifications are
/// requests of type `"event"` whose content is an [`EventPayload`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientEnvelope {
    /// Opaque correlation id.
    pub id: String,
    /// Whether this message expects a response.
    pub is_request: bool,
    /// Request or response type, e.g. `"setBreakpoint"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific payload.
    #[serde(default)]
    pub content: serde_json::Value,
    /// Error string for failed requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ClientEnvelope {
    /// Build a request with a fresh id.
    pub fn request(kind: impl Into<String>, content: serde_json::Value) -> Self {
        Self { id: new_id(), is_request: true, kind: kind.into(), content, error: None }
    }

    /// Build the successful response to a request.
    pub fn response(request: &Self, content: serde_json::Value) -> Self {
        Self {
            id: request.id.clone(),
            is_request: false,
            kind: request.kind.clone(),
            content,
            error: None,
        }
    }

    /// Build a response carrying only an error string.
    pub fn error_response(id: impl Into<String>, kind: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_request: false,
            kind: kind.into(),
            content: serde_json::Value::Null,
            error: Some(error.into()),
        }
    }

    /// Build an engine-initiated `event` notification.
    pub fn event(event: &str, args: Vec<serde_json::Value>) -> Self {
        let payload = EventPayload { event: event.to_string(), args };
        Self::request("event", serde_json::to_value(payload).unwrap_or_default())
    }
}

/// Content of an engine-initiated `event` message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventPayload {
    /// Event name, one of the [`ui_events`] constants.
    pub event: String,
    /// Positional event arguments.
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
}

/// Names of the engine-initiated UI events.
pub mod ui_events {
    /// Execution halted on the first instruction after `start(true)`.
    pub const STOP_ON_ENTRY: &str = "stopOnEntry";
    /// A step-over request completed.
    pub const STOP_ON_STEP_OVER: &str = "stopOnStepOver";
    /// A step-in request completed.
    pub const STOP_ON_STEP_IN: &str = "stopOnStepIn";
    /// A step-out request completed.
    pub const STOP_ON_STEP_OUT: &str = "stopOnStepOut";
    /// Execution halted on a verified breakpoint.
    pub const STOP_ON_BREAKPOINT: &str = "stopOnBreakpoint";
    /// The VM raised an exception.
    pub const STOP_ON_EXCEPTION: &str = "stopOnException";
    /// A breakpoint has been bound to an `(address, pc)` pair.
    pub const BREAKPOINT_VALIDATED: &str = "breakpointValidated";
    /// The debug session is over.
    pub const END: &str = "end";
}

/// `start` request content.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    /// Halt on the first step event instead of free-running.
    #[serde(default)]
    pub stop_on_entry: bool,
}

/// `setBreakpoint` request content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetBreakpointRequest {
    /// Absolute path of the source file.
    pub path: String,
    /// Zero-based line in the user's original source.
    pub line: u32,
}

/// `setBreakpoint` response content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetBreakpointResponse {
    /// Engine-assigned breakpoint id.
    pub id: u32,
    /// The line the breakpoint was registered on.
    pub line: u32,
    /// Whether the breakpoint is already bound to an `(address, pc)`.
    pub verified: bool,
}

/// `clearBreakpoints` request content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClearBreakpointsRequest {
    /// Absolute path of the source file.
    pub path: String,
}

/// `stack` request content.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StackRequest {
    /// First frame to return, 0 being the innermost.
    pub start_frame: usize,
    /// One past the last frame to return.
    pub end_frame: usize,
}

/// `stack` response content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StackResponse {
    /// The requested frame window, innermost first.
    pub frames: Vec<FrameInfo>,
    /// Total depth of the logical call stack.
    pub total_frames: usize,
}

/// One logical stack frame as reported to the UI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrameInfo {
    /// Frame index, 0 being the innermost.
    pub index: usize,
    /// Function name.
    pub name: String,
    /// Source file path.
    pub path: String,
    /// Zero-based line in the user's original source.
    pub line: u32,
    /// Program counter (call site for outer frames, current pc for the top).
    pub pc: usize,
}

/// `variables` request content.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VariablesRequest {
    /// 0 requests the in-scope roots, otherwise the children of the detail
    /// node previously reported under this reference.
    pub variables_reference: u64,
}

/// `variables` response content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VariablesResponse {
    /// Decoded variables, in scope order.
    pub variables: Vec<VariableView>,
}

/// One decoded variable as reported to the UI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VariableView {
    /// Variable or member name.
    pub name: String,
    /// Canonical type string.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Human-readable value; `(invalid value)` when decoding failed.
    pub value: String,
    /// 0 for leaves, a detail id for lazily expandable composites.
    pub variables_reference: u64,
}

/// `uiAction` request content.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UiActionRequest {
    /// The requested action.
    pub action: UiAction,
}

/// Execution-control actions a UI may request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum UiAction {
    /// Run until the next breakpoint or the end of execution.
    Continue,
    /// Reverse continue; always rejected (reverse execution is unsupported).
    ContinueReverse,
    /// Step to the next line in the same frame.
    StepOver,
    /// Reverse step; always rejected (reverse execution is unsupported).
    StepBack,
    /// Step into the next call.
    StepIn,
    /// Run until the current frame returns.
    StepOut,
}

/// `evaluate` request content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateRequest {
    /// Expression in the debuggee's source language.
    pub expression: String,
    /// UI context hint (`"watch"`, `"repl"`, `"hover"`, ...).
    #[serde(default)]
    pub context: Option<String>,
    /// Frame the expression should be evaluated in.
    #[serde(default)]
    pub frame_id: Option<usize>,
}

/// `evaluate` response content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResponse {
    /// Decoded result value.
    pub result: String,
    /// Always 0; evaluation results are not expandable.
    pub variables_reference: u64,
}

// ---------------------------------------------------------------------------
// VM adapter channel
// ---------------------------------------------------------------------------

/// A single message on the VM adapter channel.
///
/// The channel is symmetric: both peers send requests and answer with
/// responses echoing the request id. Adapter-initiated requests additionally
/// carry a [`TriggerKind`] naming the event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VmEnvelope {
    /// Opaque correlation id.
    pub id: String,
    /// Whether this message is a request or a response.
    pub message_type: VmMessageType,
    /// Event kind for adapter-initiated requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_type: Option<TriggerKind>,
    /// Type-specific payload.
    #[serde(default)]
    pub content: serde_json::Value,
}

impl VmEnvelope {
    /// Build an engine-initiated request with a fresh id.
    pub fn request(content: &AdapterRequest) -> Self {
        Self {
            id: new_id(),
            message_type: VmMessageType::Request,
            trigger_type: None,
            content: serde_json::to_value(content).unwrap_or_default(),
        }
    }

    /// Build the response to an adapter-initiated request.
    pub fn response(id: impl Into<String>, content: serde_json::Value) -> Self {
        Self { id: id.into(), message_type: VmMessageType::Response, trigger_type: None, content }
    }

    /// Build an adapter-initiated trigger request (used by tests and stub
    /// adapters; real adapters produce these on the wire).
    pub fn trigger(kind: TriggerKind, content: serde_json::Value) -> Self {
        Self {
            id: new_id(),
            message_type: VmMessageType::Request,
            trigger_type: Some(kind),
            content,
        }
    }
}

/// Direction discriminant of a [`VmEnvelope`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VmMessageType {
    /// The message expects a response with the same id.
    Request,
    /// The message answers a previous request.
    Response,
}

/// Event kinds of adapter-initiated requests.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TriggerKind {
    /// A compilation finished; artifacts follow.
    LinkCompilerOutput,
    /// A known contract has been bound to a deployment address.
    LinkContractAddress,
    /// A contract was deployed; the engine must identify it by its code.
    NewContract,
    /// The VM halted before an instruction.
    Step,
    /// The VM raised an exception.
    Exception,
}

/// `linkCompilerOutput` trigger content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LinkCompilerOutputPayload {
    /// Directory all relative source paths resolve against.
    pub source_root_path: String,
    /// The compiler's output.
    pub compilation_result: CompilationResult,
}

/// Compiler output as delivered over the adapter channel (and returned by
/// the engine's `Compiler` seam): contracts keyed `"path:Name"`, sources
/// keyed by path.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CompilationResult {
    /// Per-contract artifacts.
    pub contracts: BTreeMap<String, ContractArtifact>,
    /// Per-file artifacts.
    pub sources: BTreeMap<String, SourceArtifact>,
}

/// Build artifacts of a single contract.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContractArtifact {
    /// Creation bytecode, hex.
    #[serde(default)]
    pub bin: String,
    /// Runtime bytecode, hex.
    #[serde(default, rename = "bin-runtime")]
    pub bin_runtime: String,
    /// Compressed runtime source map (`s:l:f:j` entries joined by `;`).
    #[serde(default, rename = "srcmap-runtime")]
    pub srcmap_runtime: String,
}

/// Artifacts of a single source file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SourceArtifact {
    /// Full source text. Carried in the artifact because the engine has no
    /// filesystem access.
    #[serde(default)]
    pub content: String,
    /// The file's AST as emitted by the compiler.
    #[serde(default, rename = "AST")]
    pub ast: serde_json::Value,
}

/// `linkContractAddress` trigger content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LinkContractAddressPayload {
    /// Name the contract was compiled under.
    pub contract_name: String,
    /// Deployment address.
    pub address: Address,
}

/// `newContract` trigger content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewContractPayload {
    /// Runtime code now living at `address`.
    pub code: Bytes,
    /// Deployment address.
    pub address: Address,
}

/// `step` trigger content: one halted instruction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StepEventPayload {
    /// Address of the executing contract.
    pub address: Address,
    /// Program counter of the next instruction.
    pub pc: usize,
    /// Operand stack, top last.
    #[serde(default)]
    pub stack: Vec<B256>,
    /// Linear memory contents.
    #[serde(default)]
    pub memory: Bytes,
    /// Remaining gas.
    #[serde(default)]
    pub gas_left: u64,
    /// Mnemonic of the instruction at `pc`.
    #[serde(default)]
    pub opcode: String,
}

/// `exception` trigger content.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExceptionPayload {
    /// Faulting contract, if known.
    #[serde(default)]
    pub address: Option<Address>,
    /// Faulting program counter, if known.
    #[serde(default)]
    pub pc: Option<usize>,
    /// Adapter-provided description.
    #[serde(default)]
    pub message: Option<String>,
}

/// Response content the engine sends to acknowledge a `step` trigger.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StepAck {
    /// Permission for the VM to batch-skip line-unchanged instructions.
    pub fast_step: bool,
}

/// Response content of a `getStorage` request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetStorageResponse {
    /// The 32-byte storage word.
    pub value: B256,
}

/// Engine-initiated requests to the VM adapter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum AdapterRequest {
    /// Replace the code at `address` in the live, paused VM and position the
    /// program counter at `pc`.
    InjectNewCode {
        /// Target contract.
        address: Address,
        /// New runtime bytecode.
        code: Bytes,
        /// Program counter to resume at.
        pc: usize,
        /// Stack/memory sub-state to restore alongside the code.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<VmSubState>,
    },
    /// Acknowledge the step with id `step_id` and run without further step
    /// events until `pc` is reached.
    RunUntilPc {
        /// The paused step event being acknowledged.
        step_id: String,
        /// Program counter to run to.
        pc: usize,
    },
    /// Read one storage word.
    GetStorage {
        /// Contract whose storage is read.
        address: Address,
        /// Slot index.
        position: U256,
    },
    /// Enable or disable a breakpoint at a resolved `(address, pc)`.
    SendBreakpoint {
        /// Engine-assigned breakpoint id; stable across enable/disable.
        id: u32,
        /// Target contract.
        address: Address,
        /// Resolved program counter.
        pc: usize,
        /// Whether the VM should halt at `pc`.
        enabled: bool,
        /// The breakpoint targets runtime (not creation) code.
        runtime: bool,
    },
    /// Tell the adapter where variable declarations live, so instrumented
    /// VMs can emit full state at those pcs even while fast-stepping.
    SendDeclarations {
        /// Target contract.
        address: Address,
        /// Declaration sites.
        declarations: Vec<DeclarationInfo>,
    },
    /// Tell the adapter where external function entries live.
    SendJumpDestinations {
        /// Target contract.
        address: Address,
        /// Entry pcs.
        jump_destinations: Vec<usize>,
    },
}

/// Stack/memory snapshot shipped with code injection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VmSubState {
    /// Operand stack, top last.
    pub stack: Vec<B256>,
    /// Linear memory contents.
    pub memory: Bytes,
    /// Remaining gas.
    pub gas_left: u64,
}

/// One variable-declaration site reported via `sendDeclarations`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeclarationInfo {
    /// Program counter of the declaration.
    pub pc: usize,
    /// Declared variable name.
    pub name: String,
}
