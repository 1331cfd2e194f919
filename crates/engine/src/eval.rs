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

//! In-place expression evaluation through recompile-and-inject.
//!
//! At a pause, the expression is wrapped in a synthesized helper function
//! (`sdb_<uuid>`), a call to the helper is spliced in front of the current
//! line, the mutated source is recompiled, the fresh runtime bytecode is
//! injected into the paused VM at the call site's pc, and execution
//! resumes. The helper's return value is recovered by the step engine on
//! the matching jump-out and answered to the stored client request.
//!
//! The mutation happens on shadow copies of the file and contract; the
//! live model is only swapped once everything (bytecode, source map, pc
//! map, scope index, breakpoints, line offsets) is coherent, so concurrent
//! VM events never observe a half-mutated model.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use sdb_common::{
    normalize_expression, AdapterRequest, ClientEnvelope, CompilationResult, EvaluateRequest,
    VmSubState,
};
use solang_parser::lexer::{Lexer, Token};

use crate::{
    ast::{node_kinds, AstNode},
    program::{split_contract_key, SourceFile},
    sourcemap::{line_start_offset, offset_to_line_column},
    Debugger, PendingEvaluation, PendingRequest,
};

static RETURN_TYPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Return argument type (.*) is not implicitly convertible")
        .expect("valid pattern")
});

impl Debugger {
    /// Entry point for the client `evaluate` request.
    pub(crate) fn handle_evaluate(&mut self, request: &ClientEnvelope) {
        let payload: EvaluateRequest = match serde_json::from_value(request.content.clone()) {
            Ok(payload) => payload,
            Err(error) => {
                self.outbox.push_client(ClientEnvelope::error_response(
                    &request.id,
                    &request.kind,
                    format!("malformed evaluate request: {error}"),
                ));
                return;
            }
        };
        if let Err(message) = self.begin_evaluation(&request.id, payload) {
            let error = crate::DebugError::evaluator(message);
            tracing::warn!(%error, "evaluation rejected");
            self.outbox.push_client(ClientEnvelope::error_response(
                &request.id,
                "evaluate",
                error.to_string(),
            ));
        }
    }

    fn begin_evaluation(&mut self, client_id: &str, request: EvaluateRequest) -> Result<(), String> {
        if self.pending_evaluation.is_some() || self.internal_breakpoint.is_some() {
            return Err("another evaluation is in progress".to_string());
        }
        if request.context.as_deref() == Some("hover") {
            return Err("hover evaluation is not supported".to_string());
        }
        if !self.is_paused() {
            return Err("the vm is not paused".to_string());
        }

        let step = self.current_step.clone().ok_or("no active step")?;
        let line = step.line.ok_or("the current instruction has no source line")?;
        let path = step.path.clone().ok_or("the current instruction has no source file")?;
        let contract_name = self
            .contracts
            .values()
            .find(|contract| contract.address == Some(step.address))
            .map(|contract| contract.name.clone())
            .ok_or("no contract at the current address")?;

        let expression = normalize_expression(&request.expression);
        if expression.is_empty() {
            return Err("empty expression".to_string());
        }

        // resolve the expression's identifiers against the frame's scope
        // chain; unresolved names are left to the compiler (globals etc.)
        let base_contract = self.contracts.get(&contract_name).expect("looked up above");
        let arguments: Vec<(String, String)> = extract_identifiers(&expression)
            .into_iter()
            .filter_map(|name| {
                base_contract
                    .resolve_variable(&step.scope_chain, &name)
                    .map(|variable| (name, clean_parameter_type(&variable.type_name)))
            })
            .collect();

        let wrapper_name = format!("sdb_{}", uuid::Uuid::new_v4().simple());

        // compile, repairing the wrapper's return type once if the
        // compiler tells us what the expression actually yields
        let mut return_type = "bool".to_string();
        let (file, splice, compiled) = loop {
            let mut working =
                self.files.get(&path).cloned().ok_or("no source file in the model")?;
            let splice = splice_wrapper(
                &mut working,
                &contract_name,
                &wrapper_name,
                &arguments,
                &expression,
                &return_type,
                line,
            )?;
            match self.compiler.compile(&path, &working.source) {
                Ok(result) => break (working, splice, result),
                Err(failure) => {
                    if let Some(captured) = RETURN_TYPE_RE
                        .captures(&failure.message)
                        .and_then(|caps| caps.get(1))
                        .filter(|_| return_type == "bool")
                    {
                        tracing::debug!(actual = captured.as_str(), "repairing wrapper return type");
                        return_type = captured.as_str().trim().to_string();
                        continue;
                    }
                    return Err(format!("compilation failed: {}", failure.message));
                }
            }
        };

        self.finish_evaluation(
            client_id,
            &contract_name,
            &path,
            file,
            splice,
            compiled,
            wrapper_name,
            return_type,
        )
    }

    /// Patch the working contract from the fresh compilation, locate the
    /// injected call site, commit the shadow copies, and drive the VM.
    #[allow(clippy::too_many_arguments)]
    fn finish_evaluation(
        &mut self,
        client_id: &str,
        contract_name: &str,
        path: &str,
        mut file: SourceFile,
        splice: SpliceOutcome,
        compiled: CompilationResult,
        wrapper_name: String,
        return_type: String,
    ) -> Result<(), String> {
        let artifact = compiled
            .contracts
            .iter()
            .find(|(key, _)| split_contract_key(key).1 == contract_name)
            .map(|(_, artifact)| artifact.clone())
            .ok_or("recompilation lost the contract")?;
        let new_ast = compiled
            .sources
            .values()
            .next()
            .and_then(|source| AstNode::from_value(source.ast.clone()))
            .ok_or("recompilation produced no ast")?;

        let mut contract =
            self.contracts.get(contract_name).cloned().ok_or("contract disappeared")?;
        let old_scopes = contract.scope_variables.clone();

        file.ast = new_ast;
        contract.bytecode = alloy_primitives::hex::decode(artifact.bin.trim_start_matches("0x"))
            .map(alloy_primitives::Bytes::from)
            .unwrap_or_else(|_| contract.bytecode.clone());
        contract.runtime_bytecode =
            alloy_primitives::hex::decode(artifact.bin_runtime.trim_start_matches("0x"))
                .map(alloy_primitives::Bytes::from)
                .map_err(|error| format!("bad runtime bytecode: {error}"))?;
        contract.srcmap_runtime = crate::sourcemap::SourceMap::parse(&artifact.srcmap_runtime);
        contract.ast = file.ast.contract(contract_name).cloned().unwrap_or_default();
        contract.rebuild_indices(&file.ast);

        // same-name variables at the same scope depth keep their frozen
        // stack positions across the rebuild
        for variables in contract.scope_variables.values_mut() {
            for variable in variables.values_mut() {
                let preserved = old_scopes.values().find_map(|old| {
                    old.get(&variable.name)
                        .filter(|old_var| old_var.scope.depth == variable.scope.depth)
                        .and_then(|old_var| old_var.stack_position)
                });
                if let Some(position) = preserved {
                    variable.stack_position = Some(position);
                }
            }
        }

        // locate the spliced reference call
        let call_site = find_wrapper_call(&contract.ast, &wrapper_name)
            .ok_or("cannot locate the injected call")?;
        let index = contract
            .srcmap_runtime
            .to_index(call_site.0 as i64, call_site.1 as i64, None)
            .ok_or("the injected call has no instruction mapping")?;
        let pc = contract
            .first_pc_of_index(index)
            .ok_or("the injected call has no program counter")?;
        let address = contract.address.ok_or("contract has no address")?;
        let runtime = contract.runtime_bytecode.clone();

        // commit the shadow copies in one uninterrupted sequence
        self.files.insert(path.to_string(), file);
        self.contracts.insert(contract_name.to_string(), contract);
        self.shift_tracked_lines(path, &splice);

        // invisible breakpoint on the line after the reference: the spot
        // the user believes execution is paused at
        let (bp_id, _, _) =
            self.set_breakpoint(path, splice.resume_line, false, false);
        self.internal_breakpoint = Some((path.to_string(), bp_id));

        let paused_step = self
            .current_step
            .as_ref()
            .map(|step| step.request_id.clone())
            .ok_or("lost the paused step")?;
        let state = self.current_step.as_ref().map(|step| VmSubState {
            stack: step.stack.clone(),
            memory: step.memory.clone().into(),
            gas_left: step.gas_left,
        });

        self.pending_evaluation = Some(PendingEvaluation {
            function_name: wrapper_name,
            return_type,
            client_id: client_id.to_string(),
        });

        tracing::info!(%contract_name, pc, "injecting evaluation bytecode");
        self.send_adapter_request(
            AdapterRequest::InjectNewCode { address, code: runtime, pc, state },
            PendingRequest::InjectCode { paused_step, pc },
        );
        Ok(())
    }

    /// After the splice, every tracked line at or below an insertion point
    /// moves down: stack frames, the stop snapshot, and the live step.
    fn shift_tracked_lines(&mut self, path: &str, splice: &SpliceOutcome) {
        // tracked values still carry pre-splice numbering
        let old_current = splice.reference_line.saturating_sub(1);
        let shift = |line: &mut u32| {
            if *line >= old_current {
                *line += 2;
            } else if *line >= splice.function_line {
                *line += 1;
            }
        };
        for frame in &mut self.call_stack {
            if frame.path == path {
                shift(&mut frame.line);
            }
        }
        if let Some(stop) = &mut self.last_stop {
            if stop.path.as_deref() == Some(path) {
                if let Some(line) = &mut stop.line {
                    shift(line);
                }
            }
        }
        if let Some(step) = &mut self.current_step {
            if step.path.as_deref() == Some(path) {
                if let Some(line) = &mut step.line {
                    shift(line);
                }
            }
        }
        if let Some(action) = &mut self.pending_action {
            if action.path.as_deref() == Some(path) {
                if let Some(line) = &mut action.line {
                    shift(line);
                }
            }
        }
    }
}

/// Where the two insertions landed, in post-mutation line numbering.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SpliceOutcome {
    /// Line of the wrapper function body.
    pub function_line: u32,
    /// Line of the spliced reference call.
    pub reference_line: u32,
    /// Line the VM should come to rest on after the evaluation: the
    /// original current line, now right after the reference.
    pub resume_line: u32,
}

/// Splice the reference call in front of the current line and the wrapper
/// function right after the `contract <Name>` header, keeping the file's
/// line bookkeeping consistent.
fn splice_wrapper(
    file: &mut SourceFile,
    contract_name: &str,
    wrapper_name: &str,
    arguments: &[(String, String)],
    expression: &str,
    return_type: &str,
    current_line: u32,
) -> Result<SpliceOutcome, String> {
    let params = arguments
        .iter()
        .map(|(name, type_name)| format!("{type_name} {name}"))
        .collect::<Vec<_>>()
        .join(", ");
    let names = arguments.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>().join(", ");
    let reference = format!("{wrapper_name}({names});\n");
    let function =
        format!("function {wrapper_name}({params}) returns ({return_type}) {{ return ({expression}); }}\n");

    let header = format!("contract {contract_name}");
    let header_at = file
        .source
        .find(&header)
        .ok_or_else(|| format!("contract {contract_name} not found in source"))?;
    let function_offset = file.source[header_at..]
        .find('\n')
        .map(|at| header_at + at + 1)
        .ok_or("contract header has no line break")?;
    let (function_line, _) = offset_to_line_column(function_offset, &file.line_breaks);

    let reference_offset =
        line_start_offset(current_line, &file.line_breaks, file.source.len());
    if reference_offset < function_offset {
        return Err("the current line precedes the contract body".to_string());
    }

    // splice back to front so the earlier offset stays valid
    let mut source = file.source.clone();
    source.insert_str(reference_offset, &reference);
    source.insert_str(function_offset, &function);
    file.set_source(source);

    // record the insertions against original line numbering
    let function_origin = file.to_original_line(function_line);
    let reference_origin = file.to_original_line(current_line);
    *file.line_offsets.entry(function_origin).or_insert(0) += 1;
    *file.line_offsets.entry(reference_origin).or_insert(0) += 1;

    // registered breakpoints move with their lines
    for bp in &mut file.breakpoints {
        if bp.line >= current_line {
            bp.line += 2;
        } else if bp.line >= function_line {
            bp.line += 1;
        }
    }

    Ok(SpliceOutcome {
        function_line,
        reference_line: current_line + 1,
        resume_line: current_line + 2,
    })
}

/// The `FunctionCall` node whose callee identifier is `wrapper_name`;
/// returns its `(start, length)` source range.
fn find_wrapper_call(contract_ast: &AstNode, wrapper_name: &str) -> Option<(usize, usize)> {
    let mut found = None;
    contract_ast.for_each(&mut |node| {
        if found.is_some() || node.name != node_kinds::FUNCTION_CALL {
            return;
        }
        let callee = node.children.first();
        let is_wrapper = callee.is_some_and(|callee| {
            callee.name == node_kinds::IDENTIFIER
                && callee.attribute_str("value") == Some(wrapper_name)
        });
        if is_wrapper {
            found = node.src_range();
        }
    });
    found
}

/// Identifiers appearing in an expression, in first-appearance order.
fn extract_identifiers(expression: &str) -> Vec<String> {
    let mut comments = Vec::new();
    let mut errors = Vec::new();
    let lexer = Lexer::new(expression, 0, &mut comments, &mut errors);
    let mut seen = BTreeSet::new();
    let mut identifiers = Vec::new();
    for item in lexer {
        if let (_, Token::Identifier(name), _) = item {
            if seen.insert(name.to_string()) {
                identifiers.push(name.to_string());
            }
        }
    }
    identifiers
}

/// Parameter types for the wrapper drop `pointer`/`ref` suffixes the AST
/// spells out but the language does not accept in signatures.
fn clean_parameter_type(type_name: &str) -> String {
    type_name
        .split_whitespace()
        .filter(|word| !matches!(*word, "pointer" | "ref"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_identifiers() {
        assert_eq!(extract_identifiers("x * 2"), vec!["x"]);
        assert_eq!(extract_identifiers("a + b * a"), vec!["a", "b"]);
        assert_eq!(extract_identifiers("balances[msg.sender]"), vec!["balances", "msg", "sender"]);
        assert!(extract_identifiers("1 + 2").is_empty());
    }

    #[test]
    fn test_clean_parameter_type() {
        assert_eq!(clean_parameter_type("uint256"), "uint256");
        assert_eq!(clean_parameter_type("uint256[] storage pointer"), "uint256[] storage");
        assert_eq!(clean_parameter_type("string memory ref"), "string memory");
    }

    #[test]
    fn test_return_type_pattern() {
        let message = "Type error: Return argument type uint256 is not implicitly convertible to expected type (type of first return variable) bool.";
        let captured = RETURN_TYPE_RE.captures(message).unwrap();
        assert_eq!(captured.get(1).unwrap().as_str().trim(), "uint256");
    }

    #[test]
    fn test_splice_wrapper_layout() {
        let source = "pragma solidity ^0.4.0;\ncontract C {\n    function f(uint a) {\n        uint b = a + 1;\n    }\n}\n";
        let mut file = SourceFile::new("/c.sol", source, AstNode::default());
        let splice = splice_wrapper(
            &mut file,
            "C",
            "sdb_test",
            &[("a".to_string(), "uint256".to_string())],
            "a * 2",
            "bool",
            3,
        )
        .unwrap();

        // the wrapper body sits right under the contract header
        assert_eq!(splice.function_line, 2);
        let lines: Vec<&str> = file.source.lines().collect();
        assert!(lines[2].starts_with("function sdb_test(uint256 a) returns (bool)"));
        // the reference sits in front of the old current line
        assert_eq!(splice.reference_line, 4);
        assert!(lines[4].starts_with("sdb_test(a);"));
        assert_eq!(splice.resume_line, 5);
        assert!(lines[5].contains("uint b = a + 1;"));
        // line bookkeeping is recorded against original numbering
        assert_eq!(file.line_offsets.get(&2), Some(&1));
        assert_eq!(file.line_offsets.get(&3), Some(&1));
        // the table translates the old current line to its new position
        assert_eq!(file.to_mutated_line(3), 5);
    }

    #[test]
    fn test_splice_rejects_line_before_contract() {
        let source = "pragma solidity ^0.4.0;\ncontract C {\n}\n";
        let mut file = SourceFile::new("/c.sol", source, AstNode::default());
        let result = splice_wrapper(&mut file, "C", "sdb_x", &[], "1", "bool", 0);
        assert!(result.is_err());
    }

    #[test]
    fn test_find_wrapper_call() {
        use serde_json::json;
        let callee = AstNode {
            name: node_kinds::IDENTIFIER.into(),
            attributes: json!({"value": "sdb_abc"}),
            ..Default::default()
        };
        let call = AstNode {
            name: node_kinds::FUNCTION_CALL.into(),
            src: "120:12:0".into(),
            children: vec![callee],
            ..Default::default()
        };
        let root = AstNode { children: vec![call], ..Default::default() };
        assert_eq!(find_wrapper_call(&root, "sdb_abc"), Some((120, 12)));
        assert_eq!(find_wrapper_call(&root, "sdb_other"), None);
    }
}
