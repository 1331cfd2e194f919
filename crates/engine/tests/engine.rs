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

//! End-to-end scenarios: a scripted VM event stream and a stub compiler
//! drive the whole engine through both channels.

use std::cell::Cell;

use alloy_primitives::{address, keccak256, Address, B256, U256};
use sdb_common::{
    AdapterRequest, ClientEnvelope, CompilationResult, ContractArtifact, EventPayload,
    SourceArtifact, StepAck, StepEventPayload, TriggerKind, VariablesResponse, VmEnvelope,
    VmMessageType,
};
use sdb_engine::{CompileFailure, Compiler, Debugger};
use serde_json::json;

const SOURCE: &str = "contract Test {\n    uint256 total;\n    function set(uint256 value) public {\n        uint256 doubled = value * 2;\n        total = doubled;\n    }\n}\n";
const PATH: &str = "/project/test.sol";
const ADDRESS: Address = address!("00000000000000000000000000000000000000aa");

const ENTRY_PC: usize = 8;
const DECL_PC: usize = 9;
const ASSIGN_PC: usize = 10;
const RETURN_PC: usize = 11;
const AFTER_PC: usize = 12;

fn word(value: u64) -> B256 {
    B256::from(U256::from(value).to_be_bytes::<32>())
}

fn src(start: usize, length: usize) -> String {
    format!("{start}:{length}:0")
}

/// AST of [`SOURCE`] in the compiler's wire shape, with ranges computed
/// from the text itself.
fn source_ast(source: &str) -> serde_json::Value {
    let t_start = source.find("uint256 total").unwrap();
    let f_start = source.find("function set").unwrap();
    let f_len = source.find("    }\n").unwrap() + 5 - f_start;
    let v_start = source.find("uint256 value").unwrap();
    let v_len = "uint256 value".len();
    let b_start = source.find(") public {").unwrap() + ") public ".len();
    let b_len = f_start + f_len - b_start;
    let d_start = source.find("uint256 doubled").unwrap();
    let d_len = "uint256 doubled = value * 2;".len();
    let a_start = source.find("total = doubled").unwrap();
    let a_len = "total = doubled;".len();

    json!({
        "id": 100, "name": "SourceUnit", "src": src(0, source.len()),
        "children": [{
            "id": 1, "name": "ContractDefinition", "src": src(0, source.len()),
            "attributes": {"name": "Test"},
            "children": [
                {
                    "id": 2, "name": "VariableDeclaration", "src": src(t_start, "uint256 total".len()),
                    "attributes": {"name": "total", "type": "uint256"}
                },
                {
                    "id": 3, "name": "FunctionDefinition", "src": src(f_start, f_len),
                    "attributes": {"name": "set"},
                    "children": [
                        {
                            "id": 4, "name": "ParameterList", "src": src(v_start, v_len),
                            "children": [{
                                "id": 5, "name": "VariableDeclaration", "src": src(v_start, v_len),
                                "attributes": {"name": "value", "type": "uint256"}
                            }]
                        },
                        {
                            "id": 7, "name": "Block", "src": src(b_start, b_len),
                            "children": [
                                {
                                    "id": 8, "name": "VariableDeclaration", "src": src(d_start, d_len),
                                    "attributes": {"name": "doubled", "type": "uint256"}
                                },
                                {"id": 9, "name": "ExpressionStatement", "src": src(a_start, a_len)}
                            ]
                        }
                    ]
                }
            ]
        }]
    })
}

/// Runtime bytecode with a canonical dispatcher fragment for
/// `set(uint256)` and one JUMPDEST per interesting source position.
fn runtime_bytecode() -> Vec<u8> {
    let selector = &keccak256("set(uint256)".as_bytes())[..4];
    let mut code = vec![0x63];
    code.extend_from_slice(selector);
    // EQ, PUSH1 <entry>, JUMPDEST(entry), JUMPDEST(decl),
    // JUMPDEST(assign), STOP(return), JUMPDEST(after)
    code.extend_from_slice(&[0x14, 0x60, ENTRY_PC as u8, 0x5b, 0x5b, 0x5b, 0x00, 0x5b]);
    code
}

fn runtime_srcmap(source: &str) -> String {
    let f_start = source.find("function set").unwrap();
    let f_len = source.find("    }\n").unwrap() + 5 - f_start;
    let v_start = source.find("uint256 value").unwrap();
    let v_len = "uint256 value".len();
    let d_start = source.find("uint256 doubled").unwrap();
    let d_len = "uint256 doubled = value * 2;".len();
    let a_start = source.find("total = doubled").unwrap();
    let a_len = "total = doubled;".len();

    format!(
        "{f_start}:{f_len}:0:-;;;{v_start}:{v_len}:0:-;{d_start}:{d_len}:0:-;\
         {a_start}:{a_len}:0:-;{a_start}:{a_len}:0:o;{f_start}:{f_len}:0:-"
    )
    .replace(' ', "")
}

fn compilation_result() -> CompilationResult {
    let runtime = runtime_bytecode();
    let mut result = CompilationResult::default();
    result.contracts.insert(
        "test.sol:Test".to_string(),
        ContractArtifact {
            bin: alloy_primitives::hex::encode(&runtime),
            bin_runtime: alloy_primitives::hex::encode(&runtime),
            srcmap_runtime: runtime_srcmap(SOURCE),
        },
    );
    result.sources.insert(
        "test.sol".to_string(),
        SourceArtifact { content: SOURCE.to_string(), ast: source_ast(SOURCE) },
    );
    result
}

/// A compiler that first reports a bool-conversion failure, then builds a
/// coherent artifact for the spliced source it receives.
struct EvalCompiler {
    calls: Cell<usize>,
}

impl EvalCompiler {
    fn new() -> Self {
        Self { calls: Cell::new(0) }
    }
}

impl Compiler for EvalCompiler {
    fn compile(&self, _path: &str, source: &str) -> Result<CompilationResult, CompileFailure> {
        let call = self.calls.get();
        self.calls.set(call + 1);
        if call == 0 {
            return Err(CompileFailure {
                message: "Type error: Return argument type uint256 is not implicitly \
                          convertible to expected type (type of first return variable) bool."
                    .to_string(),
            });
        }
        Ok(eval_compilation_result(source))
    }
}

/// Artifacts for the spliced source: the wrapper definition, the reference
/// call, and a four-instruction runtime addressing them.
fn eval_compilation_result(source: &str) -> CompilationResult {
    let name_start = source.find("function sdb_").unwrap() + "function ".len();
    let name_end = source[name_start..].find('(').unwrap() + name_start;
    let wrapper = source[name_start..name_end].to_string();

    let w_start = source.find(&format!("function {wrapper}")).unwrap();
    let w_len = source[w_start..].find('\n').unwrap();
    let ref_start = source.find(&format!("\n{wrapper}(")).unwrap() + 1;
    let ref_len = source[ref_start..].find(';').unwrap() + 1;
    let f_start = source.find("function set").unwrap();
    let f_len = source.find("    }\n").unwrap() + 5 - f_start;
    let v_start = source.find("uint256 value").unwrap();
    let v_len = "uint256 value".len();
    let d_start = source.find("uint256 doubled").unwrap();
    let d_len = "uint256 doubled = value * 2;".len();
    let a_start = source.find("total = doubled").unwrap();
    let a_len = "total = doubled;".len();

    let ast = json!({
        "id": 100, "name": "SourceUnit", "src": src(0, source.len()),
        "children": [{
            "id": 1, "name": "ContractDefinition", "src": src(0, source.len()),
            "attributes": {"name": "Test"},
            "children": [
                {
                    "id": 40, "name": "FunctionDefinition", "src": src(w_start, w_len),
                    "attributes": {"name": wrapper}
                },
                {
                    "id": 3, "name": "FunctionDefinition", "src": src(f_start, f_len),
                    "attributes": {"name": "set"},
                    "children": [
                        {
                            "id": 4, "name": "ParameterList", "src": src(v_start, v_len),
                            "children": [{
                                "id": 5, "name": "VariableDeclaration", "src": src(v_start, v_len),
                                "attributes": {"name": "value", "type": "uint256"}
                            }]
                        },
                        {
                            "id": 7, "name": "Block", "src": src(ref_start, a_start + a_len - ref_start),
                            "children": [
                                {
                                    "id": 50, "name": "FunctionCall", "src": src(ref_start, ref_len),
                                    "children": [{
                                        "id": 51, "name": "Identifier", "src": src(ref_start, wrapper.len()),
                                        "attributes": {"value": wrapper}
                                    }]
                                },
                                {
                                    "id": 8, "name": "VariableDeclaration", "src": src(d_start, d_len),
                                    "attributes": {"name": "doubled", "type": "uint256"}
                                },
                                {"id": 9, "name": "ExpressionStatement", "src": src(a_start, a_len)}
                            ]
                        }
                    ]
                }
            ]
        }]
    });

    let srcmap = format!(
        "{ref_start}:{ref_len}:0:-;{ref_start}:{ref_len}:0:i;{w_start}:{w_len}:0:o;{a_start}:{a_len}:0:-"
    );
    let runtime = vec![0x5b, 0x5b, 0x5b, 0x5b];

    let mut result = CompilationResult::default();
    result.contracts.insert(
        "test.sol:Test".to_string(),
        ContractArtifact {
            bin: alloy_primitives::hex::encode(&runtime),
            bin_runtime: alloy_primitives::hex::encode(&runtime),
            srcmap_runtime: srcmap,
        },
    );
    result
        .sources
        .insert("test.sol".to_string(), SourceArtifact { content: source.to_string(), ast });
    result
}

/// A compiler for scenarios that never evaluate.
struct NoCompiler;

impl Compiler for NoCompiler {
    fn compile(&self, _path: &str, _source: &str) -> Result<CompilationResult, CompileFailure> {
        Err(CompileFailure { message: "compilation not available".to_string() })
    }
}

// --- harness -------------------------------------------------------------

fn engine() -> Debugger {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    Debugger::new(Box::new(NoCompiler))
}

fn link(debugger: &mut Debugger) {
    let envelope = VmEnvelope::trigger(
        TriggerKind::LinkCompilerOutput,
        json!({
            "sourceRootPath": "/project",
            "compilationResult": serde_json::to_value(compilation_result()).unwrap(),
        }),
    );
    debugger.handle_vm_message(envelope);
    debugger.drain_vm_messages();
}

fn deploy(debugger: &mut Debugger) {
    let envelope = VmEnvelope::trigger(
        TriggerKind::NewContract,
        json!({
            "code": format!("0x{}", alloy_primitives::hex::encode(runtime_bytecode())),
            "address": ADDRESS,
        }),
    );
    debugger.handle_vm_message(envelope);
}

fn step(debugger: &mut Debugger, pc: usize, stack: Vec<B256>) -> String {
    let payload = StepEventPayload {
        address: ADDRESS,
        pc,
        stack,
        memory: Default::default(),
        gas_left: 100_000,
        opcode: "JUMPDEST".to_string(),
    };
    let envelope =
        VmEnvelope::trigger(TriggerKind::Step, serde_json::to_value(payload).unwrap());
    let id = envelope.id.clone();
    debugger.handle_vm_message(envelope);
    id
}

fn client_request(debugger: &mut Debugger, kind: &str, content: serde_json::Value) -> String {
    let envelope = ClientEnvelope::request(kind, content);
    let id = envelope.id.clone();
    debugger.handle_client_message(envelope);
    id
}

fn events_of(messages: &[ClientEnvelope]) -> Vec<String> {
    messages
        .iter()
        .filter(|message| message.kind == "event")
        .filter_map(|message| {
            serde_json::from_value::<EventPayload>(message.content.clone()).ok()
        })
        .map(|payload| payload.event)
        .collect()
}

fn step_ack_for<'a>(messages: &'a [VmEnvelope], id: &str) -> Option<StepAck> {
    messages
        .iter()
        .find(|message| message.id == id && message.message_type == VmMessageType::Response)
        .and_then(|message| serde_json::from_value(message.content.clone()).ok())
}

fn adapter_requests(messages: &[VmEnvelope]) -> Vec<(String, AdapterRequest)> {
    messages
        .iter()
        .filter(|message| message.message_type == VmMessageType::Request)
        .filter_map(|message| {
            serde_json::from_value::<AdapterRequest>(message.content.clone())
                .ok()
                .map(|request| (message.id.clone(), request))
        })
        .collect()
}

/// Walk to the verified breakpoint on the assignment line and stop there.
/// Returns the id of the still-unacknowledged paused step.
fn run_to_assignment_breakpoint(debugger: &mut Debugger) -> String {
    client_request(debugger, "setBreakpoint", json!({"path": PATH, "line": 4}));
    link(debugger);
    deploy(debugger);
    debugger.drain_client_messages();
    debugger.drain_vm_messages();

    let first = step(debugger, ENTRY_PC, vec![word(0)]);
    let second = step(debugger, DECL_PC, vec![word(0), word(5)]);
    let paused = step(debugger, ASSIGN_PC, vec![word(0), word(5), word(6)]);

    let vm = debugger.drain_vm_messages();
    assert!(step_ack_for(&vm, &first).is_some_and(|ack| ack.fast_step));
    assert!(step_ack_for(&vm, &second).is_some_and(|ack| ack.fast_step));
    assert!(step_ack_for(&vm, &paused).is_none(), "the breakpoint step must stay pending");

    let events = events_of(&debugger.drain_client_messages());
    assert!(events.contains(&"stopOnBreakpoint".to_string()));
    paused
}

// --- scenarios -----------------------------------------------------------

#[test]
fn test_breakpoint_before_deployment_verifies_and_hits() {
    let mut debugger = engine();

    let request = client_request(&mut debugger, "setBreakpoint", json!({"path": PATH, "line": 4}));
    let responses = debugger.drain_client_messages();
    let response = responses.iter().find(|message| message.id == request).unwrap();
    assert_eq!(response.content["verified"], false, "nothing is linked yet");

    link(&mut debugger);
    deploy(&mut debugger);

    // binding the address resolves the breakpoint and syncs the adapter
    let vm = debugger.drain_vm_messages();
    let requests = adapter_requests(&vm);
    assert!(requests.iter().any(|(_, request)| matches!(
        request,
        AdapterRequest::SendBreakpoint { pc: ASSIGN_PC, enabled: true, runtime: true, .. }
    )));
    assert!(requests.iter().any(|(_, request)| matches!(
        request,
        AdapterRequest::SendJumpDestinations { jump_destinations, .. }
            if jump_destinations == &vec![ENTRY_PC]
    )));
    assert!(requests.iter().any(|(_, request)| matches!(
        request,
        AdapterRequest::SendDeclarations { declarations, .. } if declarations.len() == 2
    )));
    let events = events_of(&debugger.drain_client_messages());
    assert!(events.contains(&"breakpointValidated".to_string()));

    // run: two pass-through steps, then the breakpoint line
    let first = step(&mut debugger, ENTRY_PC, vec![word(0)]);
    let second = step(&mut debugger, DECL_PC, vec![word(0), word(5)]);
    let third = step(&mut debugger, ASSIGN_PC, vec![word(0), word(5), word(6)]);

    let vm = debugger.drain_vm_messages();
    assert!(step_ack_for(&vm, &first).is_some());
    assert!(step_ack_for(&vm, &second).is_some());
    assert!(step_ack_for(&vm, &third).is_none());
    let events = events_of(&debugger.drain_client_messages());
    assert_eq!(events, vec!["stopOnBreakpoint"]);

    // continue to completion, then the adapter goes away
    client_request(&mut debugger, "uiAction", json!({"action": "continue"}));
    let vm = debugger.drain_vm_messages();
    assert!(step_ack_for(&vm, &third).is_some(), "continue resumes the paused step");
    step(&mut debugger, RETURN_PC, vec![word(0)]);
    step(&mut debugger, AFTER_PC, vec![word(0)]);
    debugger.drain_vm_messages();
    debugger.vm_disconnected();
    let events = events_of(&debugger.drain_client_messages());
    assert_eq!(events, vec!["end"]);
}

#[test]
fn test_variables_decode_with_storage_roundtrip() {
    let mut debugger = engine();
    run_to_assignment_breakpoint(&mut debugger);

    let request = client_request(&mut debugger, "variables", json!({"variablesReference": 0}));

    // the storage-resident state variable suspends on a getStorage fetch
    let vm = debugger.drain_vm_messages();
    let (storage_id, storage_request) = adapter_requests(&vm)
        .into_iter()
        .find(|(_, request)| matches!(request, AdapterRequest::GetStorage { .. }))
        .expect("a storage fetch must be issued");
    let AdapterRequest::GetStorage { address, position } = storage_request else { unreachable!() };
    assert_eq!(address, ADDRESS);
    assert_eq!(position, U256::ZERO);
    assert!(debugger.drain_client_messages().is_empty(), "the answer waits for the word");

    debugger.handle_vm_message(VmEnvelope::response(
        &storage_id,
        json!({"value": word(42)}),
    ));

    let responses = debugger.drain_client_messages();
    let response = responses.iter().find(|message| message.id == request).unwrap();
    let variables: VariablesResponse =
        serde_json::from_value(response.content.clone()).unwrap();
    let get = |name: &str| {
        variables
            .variables
            .iter()
            .find(|variable| variable.name == name)
            .unwrap_or_else(|| panic!("missing variable {name}"))
    };
    assert_eq!(get("value").value, "5");
    assert_eq!(get("doubled").value, "6");
    assert_eq!(get("total").value, "42");
    assert!(variables.variables.iter().all(|variable| variable.variables_reference == 0));
}

#[test]
fn test_step_over_stops_on_next_line() {
    let mut debugger = engine();
    client_request(&mut debugger, "setBreakpoint", json!({"path": PATH, "line": 3}));
    link(&mut debugger);
    deploy(&mut debugger);
    debugger.drain_client_messages();
    debugger.drain_vm_messages();

    step(&mut debugger, ENTRY_PC, vec![word(0)]);
    let paused = step(&mut debugger, DECL_PC, vec![word(0), word(5)]);
    let events = events_of(&debugger.drain_client_messages());
    assert!(events.contains(&"stopOnBreakpoint".to_string()));
    debugger.drain_vm_messages();

    client_request(&mut debugger, "uiAction", json!({"action": "stepOver"}));
    let vm = debugger.drain_vm_messages();
    assert!(step_ack_for(&vm, &paused).is_some());

    // same depth, next line
    let stopped = step(&mut debugger, ASSIGN_PC, vec![word(0), word(5), word(6)]);
    let events = events_of(&debugger.drain_client_messages());
    assert_eq!(events, vec!["stopOnStepOver"]);
    assert!(step_ack_for(&debugger.drain_vm_messages(), &stopped).is_none());
}

#[test]
fn test_step_out_pops_exactly_one_frame() {
    let mut debugger = engine();
    let paused = run_to_assignment_breakpoint(&mut debugger);

    // the entry push gave us depth 1: top synthesized frame + the entry
    let request = client_request(
        &mut debugger,
        "stack",
        json!({"startFrame": 0, "endFrame": 16}),
    );
    let responses = debugger.drain_client_messages();
    let response = responses.iter().find(|message| message.id == request).unwrap();
    assert_eq!(response.content["totalFrames"], 2);
    assert_eq!(response.content["frames"][0]["name"], "set");

    client_request(&mut debugger, "uiAction", json!({"action": "stepOut"}));
    assert!(step_ack_for(&debugger.drain_vm_messages(), &paused).is_some());

    // still inside: same line, jump-out not yet consumed
    let inside = step(&mut debugger, RETURN_PC, vec![word(0), word(5), word(6)]);
    assert!(step_ack_for(&debugger.drain_vm_messages(), &inside).is_some());
    assert!(events_of(&debugger.drain_client_messages()).is_empty());

    // the step after the jump-out pops the frame and stops
    let outside = step(&mut debugger, AFTER_PC, vec![word(0)]);
    let events = events_of(&debugger.drain_client_messages());
    assert_eq!(events, vec!["stopOnStepOut"]);
    assert!(step_ack_for(&debugger.drain_vm_messages(), &outside).is_none());

    let request = client_request(
        &mut debugger,
        "stack",
        json!({"startFrame": 0, "endFrame": 16}),
    );
    let responses = debugger.drain_client_messages();
    let response = responses.iter().find(|message| message.id == request).unwrap();
    assert_eq!(response.content["totalFrames"], 1, "depth decreased by exactly one");
}

#[test]
fn test_clear_breakpoints_net_zero_adapter_effect() {
    let mut debugger = engine();
    link(&mut debugger);
    deploy(&mut debugger);
    debugger.drain_vm_messages();
    debugger.drain_client_messages();

    for line in [2u32, 3, 4] {
        client_request(&mut debugger, "setBreakpoint", json!({"path": PATH, "line": line}));
    }
    let enables: Vec<u32> = adapter_requests(&debugger.drain_vm_messages())
        .into_iter()
        .filter_map(|(_, request)| match request {
            AdapterRequest::SendBreakpoint { id, enabled: true, .. } => Some(id),
            _ => None,
        })
        .collect();
    assert_eq!(enables.len(), 3);

    client_request(&mut debugger, "clearBreakpoints", json!({"path": PATH}));
    let disables: Vec<u32> = adapter_requests(&debugger.drain_vm_messages())
        .into_iter()
        .filter_map(|(_, request)| match request {
            AdapterRequest::SendBreakpoint { id, enabled: false, .. } => Some(id),
            _ => None,
        })
        .collect();
    assert_eq!(disables, enables, "every enable is matched by a disable with the same id");

    // the registry is empty: a fresh hit on any of the old lines passes
    let free = step(&mut debugger, ASSIGN_PC, vec![word(0), word(5), word(6)]);
    assert!(step_ack_for(&debugger.drain_vm_messages(), &free).is_some());
}

#[test]
fn test_stop_on_entry() {
    let mut debugger = engine();
    link(&mut debugger);
    deploy(&mut debugger);
    debugger.drain_vm_messages();
    debugger.drain_client_messages();

    client_request(&mut debugger, "start", json!({"stopOnEntry": true}));
    debugger.drain_client_messages();

    let first = step(&mut debugger, ENTRY_PC, vec![word(0)]);
    let events = events_of(&debugger.drain_client_messages());
    assert_eq!(events, vec!["stopOnEntry"]);
    assert!(step_ack_for(&debugger.drain_vm_messages(), &first).is_none());
}

#[test]
fn test_reverse_actions_are_rejected() {
    let mut debugger = engine();
    let request = client_request(&mut debugger, "uiAction", json!({"action": "stepBack"}));
    let responses = debugger.drain_client_messages();
    let response = responses.iter().find(|message| message.id == request).unwrap();
    assert!(response.error.as_deref().unwrap_or_default().contains("reverse"));
}

#[test]
fn test_evaluate_recompiles_injects_and_recovers() {
    let mut debugger = Debugger::new(Box::new(EvalCompiler::new()));
    let paused = run_to_assignment_breakpoint(&mut debugger);

    let request = client_request(
        &mut debugger,
        "evaluate",
        json!({"expression": "value * 2", "context": "watch", "frameId": 0}),
    );

    // the engine recompiled (with one return-type repair) and asked for a
    // code injection at the reference call's pc, plus an invisible
    // breakpoint on the resume line
    let vm = debugger.drain_vm_messages();
    let requests = adapter_requests(&vm);
    let (inject_id, inject) = requests
        .iter()
        .find(|(_, request)| matches!(request, AdapterRequest::InjectNewCode { .. }))
        .expect("code injection must be requested");
    let AdapterRequest::InjectNewCode { address, pc, state, .. } = inject else { unreachable!() };
    assert_eq!(*address, ADDRESS);
    assert_eq!(*pc, 0);
    assert_eq!(state.as_ref().unwrap().stack.len(), 3);
    let internal_bp = requests
        .iter()
        .find_map(|(_, request)| match request {
            AdapterRequest::SendBreakpoint { id, enabled: true, pc: 3, .. } => Some(*id),
            _ => None,
        })
        .expect("the invisible breakpoint must be synced");
    // internal breakpoints are not announced to the UI
    assert!(events_of(&debugger.drain_client_messages()).is_empty());

    // the injection ack turns into a runUntilPc resume of the paused step
    debugger.handle_vm_message(VmEnvelope::response(inject_id, json!({})));
    let vm = debugger.drain_vm_messages();
    let resumed = adapter_requests(&vm).into_iter().any(|(_, request)| {
        matches!(request, AdapterRequest::RunUntilPc { step_id, pc: 0 } if step_id == paused)
    });
    assert!(resumed);

    // the wrapper executes: call (jump i), body (jump o), back on the
    // original line where the wrapper's return value tops the stack
    step(&mut debugger, 1, vec![word(0), word(5), word(6)]);
    step(&mut debugger, 2, vec![word(0), word(5), word(6)]);
    let settled = step(&mut debugger, 3, vec![word(0), word(5), word(6), word(10)]);

    let responses = debugger.drain_client_messages();
    let response = responses.iter().find(|message| message.id == request).unwrap();
    assert_eq!(response.content["result"], "10");
    assert!(events_of(&responses).is_empty(), "no stop event for the silent settle");

    // the VM rests where the user believes it is paused, and the internal
    // breakpoint is retired under its own id
    let vm = debugger.drain_vm_messages();
    assert!(step_ack_for(&vm, &settled).is_none());
    let retired = adapter_requests(&vm).into_iter().any(|(_, request)| {
        matches!(request, AdapterRequest::SendBreakpoint { id, enabled: false, .. } if id == internal_bp)
    });
    assert!(retired);

    // evaluation is repeatable once settled
    let second = client_request(
        &mut debugger,
        "evaluate",
        json!({"expression": "value * 2", "context": "hover"}),
    );
    let responses = debugger.drain_client_messages();
    let response = responses.iter().find(|message| message.id == second).unwrap();
    assert!(response.error.as_deref().unwrap_or_default().contains("hover"));
}

#[test]
fn test_unknown_request_gets_protocol_error() {
    let mut debugger = engine();
    let request = client_request(&mut debugger, "teleport", json!({}));
    let responses = debugger.drain_client_messages();
    let response = responses.iter().find(|message| message.id == request).unwrap();
    assert!(response.error.as_deref().unwrap_or_default().contains("unknown request type"));
}

#[test]
fn test_unlinked_step_is_acknowledged_with_null_location() {
    let mut debugger = engine();
    let id = step(&mut debugger, 0, vec![]);
    let ack = step_ack_for(&debugger.drain_vm_messages(), &id);
    assert!(ack.is_some_and(|ack| ack.fast_step));
    assert!(events_of(&debugger.drain_client_messages()).is_empty());
}

#[test]
fn test_duplicate_storage_response_is_silent() {
    let mut debugger = engine();
    run_to_assignment_breakpoint(&mut debugger);
    client_request(&mut debugger, "variables", json!({"variablesReference": 0}));
    let vm = debugger.drain_vm_messages();
    let (storage_id, _) = adapter_requests(&vm)
        .into_iter()
        .find(|(_, request)| matches!(request, AdapterRequest::GetStorage { .. }))
        .unwrap();
    debugger.handle_vm_message(VmEnvelope::response(&storage_id, json!({"value": word(42)})));
    let answered = debugger.drain_client_messages().len();
    assert!(answered > 0);
    // the duplicate delivery resolves no continuation and answers nothing
    debugger.handle_vm_message(VmEnvelope::response(&storage_id, json!({"value": word(42)})));
    assert!(debugger.drain_client_messages().is_empty());
    assert!(debugger.drain_vm_messages().is_empty());
}
