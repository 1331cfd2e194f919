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

//! The searchable program model: files, contracts, and their indices.
//!
//! Built in one pass per `linkCompilerOutput` and mutated only by address
//! binding and the evaluator's atomic commit. Files refer to contracts and
//! contracts to files through map keys, never through owning back-pointers.

use std::collections::BTreeMap;

use alloy_primitives::{hex, Address, Bytes};
use revm::bytecode::opcode;
use sdb_common::{
    instruction_boundaries, AdapterRequest, ContractArtifact, DeclarationInfo,
    LinkCompilerOutputPayload,
};

use crate::{
    ast::{function_selector, node_kinds, AstNode, ScopeRef},
    breakpoints::Breakpoint,
    sourcemap::{self, SourceLocation, SourceMap},
    types::{
        apply_memory_positions, apply_stack_positions, apply_storage_positions, parse_type,
        DataLocation, Detail, StorageCursor, StructResolver,
    },
    Debugger, PendingRequest,
};

/// One source file of the debuggee, in its current (possibly evaluator-
/// mutated) form.
#[derive(Debug, Clone, Default)]
pub struct SourceFile {
    /// Absolute path; also the file-map key.
    pub path: String,
    /// Current source text.
    pub source: String,
    /// Byte positions of every `\n` in `source`.
    pub line_breaks: Vec<usize>,
    /// Names of the contracts whose source lives here.
    pub contracts: Vec<String>,
    /// Registered breakpoints, user-visible and internal.
    pub breakpoints: Vec<Breakpoint>,
    /// Original line → lines inserted at it by the evaluator. Translates
    /// between original and mutated line numbering.
    pub line_offsets: BTreeMap<u32, i64>,
    /// The file's AST.
    pub ast: AstNode,
}

impl SourceFile {
    /// Create a file and compute its line-break table.
    pub fn new(path: impl Into<String>, source: impl Into<String>, ast: AstNode) -> Self {
        let source = source.into();
        let line_breaks = sourcemap::line_breaks(&source);
        Self {
            path: path.into(),
            source,
            line_breaks,
            contracts: Vec::new(),
            breakpoints: Vec::new(),
            line_offsets: BTreeMap::new(),
            ast,
        }
    }

    /// Replace the source text, keeping the line-break table consistent.
    pub fn set_source(&mut self, source: String) {
        self.source = source;
        self.line_breaks = sourcemap::line_breaks(&self.source);
    }

    /// Translate a line from original to mutated numbering: the sum of all
    /// insertion deltas at or before the line is added.
    pub fn to_mutated_line(&self, line: u32) -> u32 {
        let delta: i64 = self.line_offsets.range(..=line).map(|(_, d)| *d).sum();
        (i64::from(line) + delta).max(0) as u32
    }

    /// Translate a line from mutated back to original numbering.
    pub fn to_original_line(&self, line: u32) -> u32 {
        let mut shift = 0i64;
        for (&key, &delta) in &self.line_offsets {
            if i64::from(key) + shift < i64::from(line) {
                shift += delta;
            } else {
                break;
            }
        }
        (i64::from(line) - shift).max(0) as u32
    }
}

/// One variable known to the program model.
#[derive(Debug, Clone)]
pub struct Variable {
    /// Declared name.
    pub name: String,
    /// Declared textual type.
    pub type_name: String,
    /// The declaring scope node's position in the AST.
    pub scope: ScopeRef,
    /// Backing location.
    pub location: DataLocation,
    /// Absolute operand-stack slot, frozen at the first step observed on
    /// the declaration.
    pub stack_position: Option<usize>,
    /// Placement-resolved type tree.
    pub detail: Detail,
}

/// One compiled contract of the debuggee.
#[derive(Debug, Clone, Default)]
pub struct Contract {
    /// Contract name; also the contract-map key.
    pub name: String,
    /// Path of the owning source file.
    pub path: String,
    /// Deployment address, once linked.
    pub address: Option<Address>,
    /// Creation bytecode.
    pub bytecode: Bytes,
    /// Runtime bytecode.
    pub runtime_bytecode: Bytes,
    /// Decompressed runtime source map.
    pub srcmap_runtime: SourceMap,
    /// Program counter → instruction index, over non-PUSH-payload bytes.
    pub pc_map: BTreeMap<usize, usize>,
    /// Function entry pcs found through the dispatcher scan.
    pub function_entry_map: BTreeMap<usize, String>,
    /// This contract's AST subtree.
    pub ast: AstNode,
    /// Scope AST id → variable name → variable.
    pub scope_variables: BTreeMap<u64, BTreeMap<String, Variable>>,
}

impl Contract {
    /// Build a contract from its compiler artifact and the owning file's
    /// AST.
    pub fn from_artifact(
        name: impl Into<String>,
        path: impl Into<String>,
        artifact: &ContractArtifact,
        file_ast: &AstNode,
    ) -> Self {
        let name = name.into();
        let bytecode = decode_hex(&artifact.bin);
        let runtime_bytecode = decode_hex(&artifact.bin_runtime);
        let ast = file_ast.contract(&name).cloned().unwrap_or_default();

        let mut contract = Self {
            name,
            path: path.into(),
            address: None,
            bytecode,
            runtime_bytecode,
            srcmap_runtime: SourceMap::parse(&artifact.srcmap_runtime),
            pc_map: BTreeMap::new(),
            function_entry_map: BTreeMap::new(),
            ast,
            scope_variables: BTreeMap::new(),
        };
        contract.rebuild_indices(file_ast);
        contract
    }

    /// Recompute every derived index from the bytecode and AST. Used both
    /// at link time and after the evaluator swaps artifacts.
    pub fn rebuild_indices(&mut self, file_ast: &AstNode) {
        self.pc_map = build_pc_map(&self.runtime_bytecode);
        self.function_entry_map = scan_function_entries(&self.runtime_bytecode, &self.ast);
        self.scope_variables = build_scope_variables(&self.ast, file_ast);
    }

    /// The instruction index of a program counter.
    pub fn instruction_index(&self, pc: usize) -> Option<usize> {
        self.pc_map.get(&pc).copied()
    }

    /// The first program counter whose instruction index matches.
    pub fn first_pc_of_index(&self, index: usize) -> Option<usize> {
        self.pc_map.iter().find(|(_, i)| **i == index).map(|(pc, _)| *pc)
    }

    /// The innermost AST node at a source location, when it is a variable
    /// declaration.
    pub fn declaration_at(&self, location: &SourceLocation) -> Option<&AstNode> {
        let (start, length) = location.range()?;
        self.ast
            .find_enclosing(node_kinds::ANY, start, length)
            .filter(|node| node.name == node_kinds::VARIABLE_DECLARATION)
    }

    /// Look a variable up through a resolved scope chain, innermost scope
    /// first.
    pub fn resolve_variable(&self, scope_chain: &[ScopeRef], name: &str) -> Option<&Variable> {
        scope_chain
            .iter()
            .filter_map(|scope| self.scope_variables.get(&scope.ast_id))
            .find_map(|variables| variables.get(name))
    }

    /// Mutable variant of [`Self::resolve_variable`].
    pub fn resolve_variable_mut(
        &mut self,
        scope_chain: &[ScopeRef],
        name: &str,
    ) -> Option<&mut Variable> {
        let scope = scope_chain
            .iter()
            .find(|scope| {
                self.scope_variables
                    .get(&scope.ast_id)
                    .is_some_and(|variables| variables.contains_key(name))
            })?
            .ast_id;
        self.scope_variables.get_mut(&scope)?.get_mut(name)
    }
}

fn decode_hex(hex_str: &str) -> Bytes {
    let stripped = hex_str.trim().trim_start_matches("0x");
    hex::decode(stripped).map(Bytes::from).unwrap_or_default()
}

/// Number the opcodes of `code`: program counter → instruction index, with
/// PUSH payloads skipped (they get no index of their own).
pub fn build_pc_map(code: &[u8]) -> BTreeMap<usize, usize> {
    instruction_boundaries(code).enumerate().map(|(index, (pc, _))| (pc, index)).collect()
}

/// Scan for the canonical dispatcher sequence `DUP1 PUSH4 <selector> EQ
/// PUSH1 <pc>` (`63<selector>1460<pc>`) and map every recognized selector
/// to its entry pc.
///
/// Selectors are computed from the contract AST's function definitions, so
/// only functions the model knows about are mapped.
pub fn scan_function_entries(code: &[u8], contract_ast: &AstNode) -> BTreeMap<usize, String> {
    let mut selectors: BTreeMap<[u8; 4], String> = BTreeMap::new();
    contract_ast.for_each(&mut |node| {
        if node.name == node_kinds::FUNCTION_DEFINITION {
            if let (Some(selector), Some(name)) =
                (function_selector(node), node.attribute_str("name"))
            {
                selectors.insert(selector, name.to_string());
            }
        }
    });

    let boundaries: Vec<usize> = instruction_boundaries(code).map(|(pc, _)| pc).collect();
    let mut entries = BTreeMap::new();
    for window in boundaries.windows(3) {
        let &[push4_at, eq_at, push1_at] = window else { continue };
        if code[push4_at] != opcode::PUSH4
            || code[eq_at] != opcode::EQ
            || code[push1_at] != opcode::PUSH1
        {
            continue;
        }
        let Some(selector) = code.get(push4_at + 1..push4_at + 5) else { continue };
        let Some(&entry_pc) = code.get(push1_at + 1) else { continue };
        let selector: [u8; 4] = selector.try_into().unwrap_or_default();
        if let Some(name) = selectors.get(&selector) {
            entries.insert(entry_pc as usize, name.clone());
        }
    }
    entries
}

/// Scope node kinds: only these AST nodes open a lexical region variables
/// can be declared in.
fn is_scope_kind(kind: &str) -> bool {
    matches!(
        kind,
        "SourceUnit"
            | "ContractDefinition"
            | "FunctionDefinition"
            | "ModifierDefinition"
            | "Block"
            | "UncheckedBlock"
            | "ForStatement"
    )
}

fn is_reference_type(type_name: &str) -> bool {
    let base = type_name.trim();
    base.contains('[')
        || base.starts_with("struct ")
        || base.starts_with("mapping(")
        || base == "bytes"
        || base.starts_with("bytes ")
        || base == "string"
        || base.starts_with("string ")
}

struct FileStructs<'a> {
    file_ast: &'a AstNode,
}

impl StructResolver for FileStructs<'_> {
    fn resolve_struct(&self, contract: &str, name: &str) -> Option<Vec<(String, String)>> {
        self.file_ast
            .struct_members(contract, name)
            .or_else(|| self.file_ast.struct_members("", name))
    }
}

/// Walk a contract's AST and index every variable declaration under its
/// declaring scope.
///
/// State variables share one storage cursor in declaration order, which is
/// what makes their slots absolute. Locals get stack or memory placement;
/// storage-pointer locals are laid out from a relative cursor.
pub fn build_scope_variables(
    contract_ast: &AstNode,
    file_ast: &AstNode,
) -> BTreeMap<u64, BTreeMap<String, Variable>> {
    let resolver = FileStructs { file_ast };
    let mut index: BTreeMap<u64, BTreeMap<String, Variable>> = BTreeMap::new();
    let mut state_cursor = StorageCursor::default();
    walk_declarations(
        contract_ast,
        ScopeRef { ast_id: contract_ast.id, child_index: 0, depth: 0 },
        false,
        false,
        &resolver,
        &mut state_cursor,
        &mut index,
    );
    index
}

#[allow(clippy::too_many_arguments)]
fn walk_declarations(
    node: &AstNode,
    enclosing_scope: ScopeRef,
    in_parameter_list: bool,
    parent_is_contract: bool,
    resolver: &dyn StructResolver,
    state_cursor: &mut StorageCursor,
    index: &mut BTreeMap<u64, BTreeMap<String, Variable>>,
) {
    if node.name == node_kinds::VARIABLE_DECLARATION {
        if let Some(variable) = build_variable(
            node,
            enclosing_scope,
            in_parameter_list,
            parent_is_contract,
            resolver,
            state_cursor,
        ) {
            index.entry(enclosing_scope.ast_id).or_default().insert(variable.name.clone(), variable);
        }
    }

    for (child_index, child) in node.children.iter().enumerate() {
        let child_scope = if is_scope_kind(&child.name) {
            ScopeRef {
                ast_id: child.id,
                child_index,
                depth: enclosing_scope.depth + 1,
            }
        } else {
            enclosing_scope
        };
        walk_declarations(
            child,
            child_scope,
            in_parameter_list || child.name == node_kinds::PARAMETER_LIST,
            node.name == node_kinds::CONTRACT_DEFINITION,
            resolver,
            state_cursor,
            index,
        );
    }
}

fn build_variable(
    node: &AstNode,
    scope: ScopeRef,
    in_parameter_list: bool,
    is_state: bool,
    resolver: &dyn StructResolver,
    state_cursor: &mut StorageCursor,
) -> Option<Variable> {
    let name = node.attribute_str("name")?.to_string();
    if name.is_empty() {
        return None;
    }
    let type_name = node.attribute_str("type")?.to_string();

    let default_location = if is_state {
        DataLocation::Storage
    } else if is_reference_type(&type_name) {
        if in_parameter_list {
            DataLocation::Memory
        } else {
            DataLocation::Storage
        }
    } else {
        DataLocation::Stack
    };

    let mut detail = match parse_type(&type_name, resolver, default_location) {
        Ok(detail) => detail,
        Err(error) => {
            tracing::debug!(%name, %type_name, %error, "skipping undecodable declaration");
            return None;
        }
    };

    match detail.location {
        DataLocation::Stack | DataLocation::CallData => apply_stack_positions(&mut detail),
        DataLocation::Memory => apply_memory_positions(&mut detail),
        DataLocation::Storage => {
            if is_state {
                apply_storage_positions(&mut detail, state_cursor);
            } else {
                let mut local_cursor = StorageCursor::default();
                apply_storage_positions(&mut detail, &mut local_cursor);
            }
        }
    }

    let location = detail.location;
    Some(Variable { name, type_name, scope, location, stack_position: None, detail })
}

/// Strip the CBOR metadata trailer (length-suffixed) from runtime code, so
/// deployed code can be matched against artifacts that differ only in the
/// metadata hash.
pub fn strip_metadata(code: &[u8]) -> &[u8] {
    if code.len() < 2 {
        return code;
    }
    let trailer = u16::from_be_bytes([code[code.len() - 2], code[code.len() - 1]]) as usize;
    match code.len().checked_sub(trailer + 2) {
        Some(kept) => &code[..kept],
        None => code,
    }
}

impl Debugger {
    /// Ingest a compilation: build files, contracts and all derived
    /// indices in one pass.
    pub(crate) fn link_compiler_output(&mut self, payload: LinkCompilerOutputPayload) {
        let root = payload.source_root_path.clone();
        for (path, source) in &payload.compilation_result.sources {
            let absolute = resolve_path(&root, path);
            let ast = AstNode::from_value(source.ast.clone()).unwrap_or_default();
            if let Some(existing) = self.files.get_mut(&absolute) {
                // a placeholder created by an early setBreakpoint gains its
                // real content now; files with content are left untouched
                if existing.source.is_empty() {
                    existing.set_source(source.content.clone());
                    existing.ast = ast;
                }
                continue;
            }
            tracing::debug!(path = %absolute, "registering source file");
            self.files.insert(absolute.clone(), SourceFile::new(absolute, source.content.clone(), ast));
        }

        for (key, artifact) in &payload.compilation_result.contracts {
            let (path, name) = split_contract_key(key);
            let absolute = resolve_path(&root, path);
            let Some(file) = self.files.get_mut(&absolute) else {
                tracing::warn!(%key, "contract artifact without a source file");
                continue;
            };
            if !file.contracts.iter().any(|existing| existing == name) {
                file.contracts.push(name.to_string());
            }
            let contract = Contract::from_artifact(name, absolute.clone(), artifact, &file.ast);
            tracing::info!(
                contract = %name,
                instructions = contract.pc_map.len(),
                entries = contract.function_entry_map.len(),
                "linked contract"
            );
            self.contracts.insert(name.to_string(), contract);
        }
        self.linked = true;
    }

    /// Bind a named contract to its deployment address.
    pub(crate) fn link_contract_address(&mut self, contract_name: &str, address: Address) {
        let Some(contract) = self.contracts.get_mut(contract_name) else {
            tracing::warn!(%contract_name, "address link for unknown contract");
            return;
        };
        contract.address = Some(address);
        let path = contract.path.clone();
        tracing::info!(%contract_name, %address, "bound contract address");
        self.after_address_bound(contract_name.to_string(), path);
    }

    /// Identify a freshly deployed contract by its runtime code and bind
    /// the address.
    pub(crate) fn bind_new_contract(&mut self, code: &[u8], address: Address) {
        let deployed = strip_metadata(code);
        let matched = self.contracts.values().find_map(|contract| {
            (strip_metadata(&contract.runtime_bytecode) == deployed)
                .then(|| contract.name.clone())
        });
        match matched {
            Some(name) => self.link_contract_address(&name, address),
            None => tracing::warn!(%address, "deployed code matches no known contract"),
        }
    }

    /// Post-binding work shared by `linkContractAddress` and
    /// `newContract`: re-verify breakpoints for the source path and push
    /// declaration and entry-point tables to the adapter.
    fn after_address_bound(&mut self, contract_name: String, path: String) {
        self.verify_breakpoints(&path);
        self.send_declarations(&contract_name);
        self.send_jump_destinations(&contract_name);
    }

    fn send_declarations(&mut self, contract_name: &str) {
        let Some(contract) = self.contracts.get(contract_name) else { return };
        let Some(address) = contract.address else { return };
        let mut declarations = Vec::new();
        for (&pc, &index) in &contract.pc_map {
            let Some(location) = contract.srcmap_runtime.at_index(index) else { continue };
            if let Some(node) = contract.declaration_at(location) {
                if let Some(name) = node.attribute_str("name") {
                    declarations.push(DeclarationInfo { pc, name: name.to_string() });
                }
            }
        }
        if declarations.is_empty() {
            return;
        }
        self.send_adapter_request(
            AdapterRequest::SendDeclarations { address, declarations },
            PendingRequest::DeclarationSync,
        );
    }

    fn send_jump_destinations(&mut self, contract_name: &str) {
        let Some(contract) = self.contracts.get(contract_name) else { return };
        let Some(address) = contract.address else { return };
        let jump_destinations: Vec<usize> = contract.function_entry_map.keys().copied().collect();
        if jump_destinations.is_empty() {
            return;
        }
        self.send_adapter_request(
            AdapterRequest::SendJumpDestinations { address, jump_destinations },
            PendingRequest::JumpDestinationSync,
        );
    }
}

/// Split a combined artifact key `path:Name` into its parts. Keys without
/// a path map the contract onto an empty path.
pub fn split_contract_key(key: &str) -> (&str, &str) {
    match key.rsplit_once(':') {
        Some((path, name)) => (path, name),
        None => ("", key),
    }
}

/// Join a relative artifact path onto the source root.
pub fn resolve_path(root: &str, path: &str) -> String {
    if path.starts_with('/') || root.is_empty() {
        path.to_string()
    } else {
        format!("{}/{}", root.trim_end_matches('/'), path)
    }
}
