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

//! Compiler AST model and the tree walks the engine is built on.
//!
//! The compiler ships its AST as plain JSON: every node carries a numeric
//! `id`, a kind discriminator in `name` (`FunctionDefinition`,
//! `VariableDeclaration`, ...), a `src` triple `start:length:file`, a bag
//! of `attributes`, and `children`. The engine keeps the nodes generic and
//! layers three queries on top: innermost-node search by kind, lexical
//! scope enumeration at a byte offset, and selector signatures for the
//! function dispatcher scan.

use alloy_primitives::keccak256;
use serde::{Deserialize, Serialize};

/// Node kind discriminators the engine dispatches on.
pub mod node_kinds {
    /// Matches any node kind in [`AstNode::find_enclosing`].
    pub const ANY: &str = "*";
    /// A contract definition.
    pub const CONTRACT_DEFINITION: &str = "ContractDefinition";
    /// A function definition.
    pub const FUNCTION_DEFINITION: &str = "FunctionDefinition";
    /// A variable declaration (state variable, local, or parameter).
    pub const VARIABLE_DECLARATION: &str = "VariableDeclaration";
    /// A function call expression.
    pub const FUNCTION_CALL: &str = "FunctionCall";
    /// An identifier expression.
    pub const IDENTIFIER: &str = "Identifier";
    /// A struct definition.
    pub const STRUCT_DEFINITION: &str = "StructDefinition";
    /// A parameter list.
    pub const PARAMETER_LIST: &str = "ParameterList";
}

/// One node of the compiler's AST.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AstNode {
    /// Compiler-assigned node id.
    #[serde(default)]
    pub id: u64,
    /// Node kind discriminator.
    #[serde(default)]
    pub name: String,
    /// `start:length:file` source coordinates.
    #[serde(default)]
    pub src: String,
    /// Kind-specific attributes.
    #[serde(default)]
    pub attributes: serde_json::Value,
    /// Child nodes, in source order.
    #[serde(default)]
    pub children: Vec<AstNode>,
}

/// Position of a node inside the lexical scope chain: its AST id, its child
/// index within its parent, and its depth below the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeRef {
    /// AST id of the scope node.
    pub ast_id: u64,
    /// Index of the node within its parent's children.
    pub child_index: usize,
    /// Depth below the AST root (root = 0).
    pub depth: usize,
}

impl AstNode {
    /// Parse this crate from a raw compiler AST value.
    pub fn from_value(value: serde_json::Value) -> Option<Self> {
        serde_json::from_value(value).ok()
    }

    /// The `(start, length)` byte range from `src`, when well-formed.
    pub fn src_range(&self) -> Option<(usize, usize)> {
        let mut fields = self.src.split(':');
        let start: i64 = fields.next()?.parse().ok()?;
        let length: i64 = fields.next()?.parse().ok()?;
        (start >= 0 && length >= 0).then_some((start as usize, length as usize))
    }

    /// A string attribute by key.
    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key)?.as_str()
    }

    /// A boolean attribute by key, defaulting to `false`.
    pub fn attribute_bool(&self, key: &str) -> bool {
        self.attributes.get(key).and_then(serde_json::Value::as_bool).unwrap_or(false)
    }

    /// Whether this node's byte range contains `[start, start + length)`.
    ///
    /// Nodes without usable coordinates are treated as containing, so the
    /// walk can descend through them.
    pub fn contains_range(&self, start: usize, length: usize) -> bool {
        match self.src_range() {
            Some((node_start, node_length)) => {
                node_start <= start && start + length <= node_start + node_length
            }
            None => true,
        }
    }

    /// Whether this node's byte range contains the single byte at `offset`.
    pub fn contains_offset(&self, offset: usize) -> bool {
        match self.src_range() {
            Some((start, length)) => start <= offset && offset < start + length,
            None => true,
        }
    }

    /// Locate the innermost node of kind `kind` whose range contains
    /// `[start, start + length)`. `kind` may be [`node_kinds::ANY`].
    ///
    /// Depth-first: descent continues past matches, so the deepest match
    /// wins ties.
    pub fn find_enclosing(&self, kind: &str, start: usize, length: usize) -> Option<&AstNode> {
        if !self.contains_range(start, length) {
            return None;
        }
        let mut found =
            (kind == node_kinds::ANY || self.name == kind).then_some(self);
        for child in &self.children {
            if let Some(inner) = child.find_enclosing(kind, start, length) {
                found = Some(inner);
            }
        }
        found
    }

    /// Enumerate the lexical scope chain at a byte offset, innermost first.
    ///
    /// Every node whose byte range contains the offset is part of the
    /// chain; callers filter by looking the ids up in their scope indices.
    pub fn scopes_at(&self, offset: usize) -> Vec<ScopeRef> {
        let mut chain = Vec::new();
        self.collect_scopes(offset, 0, 0, &mut chain);
        chain.reverse();
        chain
    }

    fn collect_scopes(
        &self,
        offset: usize,
        child_index: usize,
        depth: usize,
        chain: &mut Vec<ScopeRef>,
    ) {
        if !self.contains_offset(offset) {
            return;
        }
        chain.push(ScopeRef { ast_id: self.id, child_index, depth });
        for (index, child) in self.children.iter().enumerate() {
            child.collect_scopes(offset, index, depth + 1, chain);
        }
    }

    /// Visit every node in depth-first order.
    pub fn for_each<'a>(&'a self, f: &mut impl FnMut(&'a AstNode)) {
        f(self);
        for child in &self.children {
            child.for_each(f);
        }
    }

    /// The `ContractDefinition` child with the given name, if any.
    pub fn contract(&self, name: &str) -> Option<&AstNode> {
        self.children.iter().find(|node| {
            node.name == node_kinds::CONTRACT_DEFINITION && node.attribute_str("name") == Some(name)
        })
    }

    /// Members `(name, type)` of the struct `<contract>.<name>` under this
    /// root, for the type decoder's struct resolution.
    pub fn struct_members(&self, contract: &str, name: &str) -> Option<Vec<(String, String)>> {
        let scope: &AstNode = if contract.is_empty() { self } else { self.contract(contract)? };
        let mut members = None;
        scope.for_each(&mut |node| {
            if members.is_none()
                && node.name == node_kinds::STRUCT_DEFINITION
                && node.attribute_str("name") == Some(name)
            {
                members = Some(
                    node.children
                        .iter()
                        .filter(|child| child.name == node_kinds::VARIABLE_DECLARATION)
                        .filter_map(|child| {
                            Some((
                                child.attribute_str("name")?.to_string(),
                                child.attribute_str("type")?.to_string(),
                            ))
                        })
                        .collect(),
                );
            }
        });
        members
    }
}

/// The selector signature `name(type,...)` of a function definition node,
/// built from its first parameter list.
pub fn selector_signature(function: &AstNode) -> Option<String> {
    if function.name != node_kinds::FUNCTION_DEFINITION {
        return None;
    }
    let name = function.attribute_str("name").filter(|name| !name.is_empty())?;
    let params = function
        .children
        .iter()
        .find(|child| child.name == node_kinds::PARAMETER_LIST)?;
    let types = params
        .children
        .iter()
        .filter(|child| child.name == node_kinds::VARIABLE_DECLARATION)
        .filter_map(|child| child.attribute_str("type"))
        .map(canonical_type)
        .collect::<Vec<_>>()
        .join(",");
    Some(format!("{name}({types})"))
}

/// The 4-byte dispatcher selector of a function definition node.
pub fn function_selector(function: &AstNode) -> Option<[u8; 4]> {
    let signature = selector_signature(function)?;
    let hash = keccak256(signature.as_bytes());
    Some([hash[0], hash[1], hash[2], hash[3]])
}

/// Canonicalize a textual type for selector hashing: width defaults are
/// made explicit, reference kinds collapse to their ABI form, and data
/// location annotations are dropped.
pub fn canonical_type(type_name: &str) -> String {
    let base = type_name
        .split_whitespace()
        .take_while(|word| !matches!(*word, "storage" | "memory" | "calldata" | "pointer" | "ref"))
        .collect::<Vec<_>>()
        .join(" ");

    // split off array suffixes so the element canonicalizes independently
    let (element, dims) = match base.find('[') {
        Some(at) => (&base[..at], &base[at..]),
        None => (base.as_str(), ""),
    };

    let element = match element {
        "uint" => "uint256".to_string(),
        "int" => "int256".to_string(),
        "address payable" => "address".to_string(),
        other if other.starts_with("contract ") => "address".to_string(),
        other if other.starts_with("enum ") => "uint8".to_string(),
        other => other.to_string(),
    };

    format!("{element}{dims}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(id: u64, kind: &str, src: &str, children: Vec<AstNode>) -> AstNode {
        AstNode {
            id,
            name: kind.to_string(),
            src: src.to_string(),
            attributes: json!({}),
            children,
        }
    }

    fn sample_tree() -> AstNode {
        // SourceUnit [0, 100)
        //   ContractDefinition [0, 100)
        //     FunctionDefinition [10, 60)
        //       Block [30, 40)
        //         VariableDeclaration [32, 6)
        let decl = AstNode {
            attributes: json!({"name": "x", "type": "uint256"}),
            ..node(5, node_kinds::VARIABLE_DECLARATION, "32:6:0", vec![])
        };
        let block = node(4, "Block", "30:40:0", vec![decl]);
        let func = AstNode {
            attributes: json!({"name": "f"}),
            ..node(3, node_kinds::FUNCTION_DEFINITION, "10:60:0", vec![block])
        };
        let contract = AstNode {
            attributes: json!({"name": "C"}),
            ..node(2, node_kinds::CONTRACT_DEFINITION, "0:100:0", vec![func])
        };
        node(1, "SourceUnit", "0:100:0", vec![contract])
    }

    #[test]
    fn test_src_range_parsing() {
        let tree = sample_tree();
        assert_eq!(tree.src_range(), Some((0, 100)));
        let bad = node(9, "X", "-1:-1:-1", vec![]);
        assert_eq!(bad.src_range(), None);
        assert!(bad.contains_range(5, 1));
    }

    #[test]
    fn test_find_enclosing_innermost_wins() {
        let tree = sample_tree();
        let hit = tree.find_enclosing(node_kinds::ANY, 33, 2).unwrap();
        assert_eq!(hit.id, 5);
        let func = tree.find_enclosing(node_kinds::FUNCTION_DEFINITION, 33, 2).unwrap();
        assert_eq!(func.id, 3);
        assert!(tree.find_enclosing(node_kinds::FUNCTION_CALL, 33, 2).is_none());
    }

    #[test]
    fn test_find_enclosing_outside_range() {
        let tree = sample_tree();
        // offset inside the contract but outside the function
        let hit = tree.find_enclosing(node_kinds::ANY, 80, 5).unwrap();
        assert_eq!(hit.id, 2);
        assert!(tree.find_enclosing(node_kinds::FUNCTION_DEFINITION, 80, 5).is_none());
    }

    #[test]
    fn test_scopes_at_innermost_first() {
        let tree = sample_tree();
        let chain = tree.scopes_at(34);
        let ids: Vec<u64> = chain.iter().map(|scope| scope.ast_id).collect();
        assert_eq!(ids, vec![5, 4, 3, 2, 1]);
        // depths decrease towards the root
        assert_eq!(chain[0].depth, 4);
        assert_eq!(chain.last().unwrap().depth, 0);
        assert_eq!(chain.last().unwrap().child_index, 0);
    }

    #[test]
    fn test_scopes_at_offset_outside_leaf() {
        let tree = sample_tree();
        let chain = tree.scopes_at(45);
        let ids: Vec<u64> = chain.iter().map(|scope| scope.ast_id).collect();
        assert_eq!(ids, vec![4, 3, 2, 1]);
    }

    #[test]
    fn test_selector_signature() {
        let param = AstNode {
            attributes: json!({"name": "a", "type": "uint"}),
            ..node(11, node_kinds::VARIABLE_DECLARATION, "0:0:0", vec![])
        };
        let params = node(10, node_kinds::PARAMETER_LIST, "0:0:0", vec![param]);
        let func = AstNode {
            attributes: json!({"name": "transfer"}),
            ..node(9, node_kinds::FUNCTION_DEFINITION, "0:0:0", vec![params])
        };
        assert_eq!(selector_signature(&func).unwrap(), "transfer(uint256)");
        assert!(function_selector(&func).is_some());
    }

    #[test]
    fn test_canonical_type() {
        assert_eq!(canonical_type("uint"), "uint256");
        assert_eq!(canonical_type("int"), "int256");
        assert_eq!(canonical_type("uint8"), "uint8");
        assert_eq!(canonical_type("bytes storage pointer"), "bytes");
        assert_eq!(canonical_type("uint256[3] memory"), "uint256[3]");
        assert_eq!(canonical_type("uint[2][]"), "uint256[2][]");
        assert_eq!(canonical_type("contract Token"), "address");
        assert_eq!(canonical_type("address payable"), "address");
    }

    #[test]
    fn test_struct_members() {
        let member = AstNode {
            attributes: json!({"name": "balance", "type": "uint256"}),
            ..node(21, node_kinds::VARIABLE_DECLARATION, "0:0:0", vec![])
        };
        let def = AstNode {
            attributes: json!({"name": "Account"}),
            ..node(20, node_kinds::STRUCT_DEFINITION, "0:0:0", vec![member])
        };
        let contract = AstNode {
            attributes: json!({"name": "Bank"}),
            ..node(19, node_kinds::CONTRACT_DEFINITION, "0:0:0", vec![def])
        };
        let root = node(18, "SourceUnit", "0:0:0", vec![contract]);
        let members = root.struct_members("Bank", "Account").unwrap();
        assert_eq!(members, vec![("balance".to_string(), "uint256".to_string())]);
        assert!(root.struct_members("Bank", "Missing").is_none());
    }

    #[test]
    fn test_parse_from_json() {
        let value = json!({
            "id": 1,
            "name": "SourceUnit",
            "src": "0:10:0",
            "children": [
                {"id": 2, "name": "PragmaDirective", "src": "0:4:0", "attributes": {}}
            ]
        });
        let tree = AstNode::from_value(value).unwrap();
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].name, "PragmaDirective");
    }
}
