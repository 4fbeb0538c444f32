//! Syntax-aware location of top-level definitions.

use super::detection::Grammar;
use std::ops::Range;
use thiserror::Error;
use tree_sitter::{Node, Parser};

/// A top-level definition found by a parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionSpan {
    /// Byte range of the whole definition node
    pub byte_range: Range<usize>,

    /// Grammar node kind, e.g. `function_definition`
    pub kind: &'static str,

    /// Defined name, when the grammar exposes one
    pub symbol: Option<String>,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("grammar could not be loaded: {0}")]
    Grammar(String),

    #[error("parser produced no syntax tree")]
    NoTree,

    #[error("source contains syntax errors")]
    Syntax,
}

/// Parser capability used by the chunker.
pub trait SyntaxParser: Send + Sync {
    /// Top-level definitions in source order.
    fn parse(&self, text: &str, grammar: Grammar) -> Result<Vec<DefinitionSpan>, ParseError>;
}

/// tree-sitter backed parser. A fresh `tree_sitter::Parser` is built per
/// call so one instance can be shared across worker threads.
#[derive(Debug, Default, Clone, Copy)]
pub struct TreeSitterParser;

impl SyntaxParser for TreeSitterParser {
    fn parse(&self, text: &str, grammar: Grammar) -> Result<Vec<DefinitionSpan>, ParseError> {
        let mut parser = Parser::new();
        parser
            .set_language(&grammar.tree_sitter_language())
            .map_err(|e| ParseError::Grammar(e.to_string()))?;

        let tree = parser.parse(text, None).ok_or(ParseError::NoTree)?;
        let root = tree.root_node();
        if root.has_error() {
            return Err(ParseError::Syntax);
        }

        let source = text.as_bytes();
        let mut cursor = root.walk();
        let spans = root
            .named_children(&mut cursor)
            .filter_map(|node| {
                definition_symbol(node, grammar, source).map(|symbol| DefinitionSpan {
                    byte_range: node.start_byte()..node.end_byte(),
                    kind: node.kind(),
                    symbol,
                })
            })
            .collect();

        Ok(spans)
    }
}

/// `None` when the node is not a definition, otherwise its (optional) name.
fn definition_symbol(node: Node<'_>, grammar: Grammar, source: &[u8]) -> Option<Option<String>> {
    match grammar {
        Grammar::Python => python_definition(node, source),
        Grammar::Rust => rust_definition(node, source),
        Grammar::JavaScript | Grammar::TypeScript | Grammar::Tsx => {
            script_definition(node, source)
        }
        Grammar::Go => go_definition(node, source),
    }
}

fn field_text(node: Node<'_>, field: &str, source: &[u8]) -> Option<String> {
    node.child_by_field_name(field)
        .and_then(|n| n.utf8_text(source).ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn python_definition(node: Node<'_>, source: &[u8]) -> Option<Option<String>> {
    match node.kind() {
        "function_definition" | "class_definition" => Some(field_text(node, "name", source)),
        "decorated_definition" => Some(
            node.child_by_field_name("definition")
                .and_then(|def| field_text(def, "name", source)),
        ),
        _ => None,
    }
}

fn rust_definition(node: Node<'_>, source: &[u8]) -> Option<Option<String>> {
    match node.kind() {
        "function_item" | "struct_item" | "enum_item" | "union_item" | "trait_item"
        | "mod_item" | "const_item" | "static_item" | "type_item" | "macro_definition" => {
            Some(field_text(node, "name", source))
        }
        "impl_item" => Some(field_text(node, "type", source)),
        _ => None,
    }
}

fn is_function_like(kind: &str) -> bool {
    matches!(
        kind,
        "arrow_function"
            | "function"
            | "function_expression"
            | "generator_function"
            | "class"
            | "class_expression"
    )
}

fn script_definition(node: Node<'_>, source: &[u8]) -> Option<Option<String>> {
    match node.kind() {
        "function_declaration"
        | "generator_function_declaration"
        | "class_declaration"
        | "abstract_class_declaration"
        | "interface_declaration"
        | "type_alias_declaration"
        | "enum_declaration" => Some(field_text(node, "name", source)),
        // `const handler = () => {}` counts; plain constants stay module-level.
        "lexical_declaration" | "variable_declaration" => {
            let mut cursor = node.walk();
            let declarator = node.named_children(&mut cursor).find(|child| {
                child.kind() == "variable_declarator"
                    && child
                        .child_by_field_name("value")
                        .is_some_and(|value| is_function_like(value.kind()))
            })?;
            Some(field_text(declarator, "name", source))
        }
        "export_statement" => {
            if let Some(declaration) = node.child_by_field_name("declaration") {
                return script_definition(declaration, source);
            }
            node.child_by_field_name("value")
                .filter(|value| is_function_like(value.kind()))
                .map(|value| field_text(value, "name", source))
        }
        _ => None,
    }
}

fn go_definition(node: Node<'_>, source: &[u8]) -> Option<Option<String>> {
    match node.kind() {
        "function_declaration" | "method_declaration" => Some(field_text(node, "name", source)),
        "type_declaration" => {
            let mut cursor = node.walk();
            let spec = node
                .named_children(&mut cursor)
                .find(|child| matches!(child.kind(), "type_spec" | "type_alias"));
            Some(spec.and_then(|spec| field_text(spec, "name", source)))
        }
        _ => None,
    }
}
