//! Body-feature extraction shared by the language parsers.
//!
//! Each parser hands function and method bodies to [`extract`] together with
//! a [`LanguageSpec`] table mapping its grammar's node kinds onto the
//! feature categories the differ compares. The traversal is purely
//! syntactic: same bytes in, same features out.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tree_sitter::Node;

/// Feature sets and histograms extracted from one node's body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BodyFeatures {
    /// Control-flow constructs present, keyed by normalized label
    /// (`if`, `for`, `while`, `try`, `match`, ...), with counts.
    pub control_flow: BTreeMap<String, u32>,
    /// Exception types named by handlers; `*` for an untyped handler.
    pub handled_exceptions: BTreeSet<String>,
    /// Number of exception handlers.
    pub handler_count: u32,
    /// Number of yield points.
    pub yield_count: u32,
    /// Shapes of return statements: `bare`, `value`, `tuple<N>`.
    pub return_shapes: BTreeSet<String>,
    /// Number of return statements.
    pub return_count: u32,
    /// Distinct call targets, as written.
    pub internal_calls: BTreeSet<String>,
    /// Comprehension expressions (list/set/dict/generator).
    pub comprehension_count: u32,
    /// Anonymous functions (lambdas, arrow functions, closures).
    pub lambda_count: u32,
    /// Calls to map/filter/reduce-style builtins.
    pub functional_calls: u32,
    /// Names declared `global`.
    pub global_names: BTreeSet<String>,
    /// Names declared `nonlocal`.
    pub nonlocal_names: BTreeSet<String>,
    /// Attribute/member reads keyed by attribute name.
    pub attribute_reads: BTreeMap<String, u32>,
    /// Subscript reads keyed by the subscripted expression.
    pub subscript_reads: BTreeMap<String, u32>,
    /// Assignment statements keyed by target shape
    /// (`simple`, `attribute`, `subscript`, `destructuring`, `other`).
    pub assignment_shapes: BTreeMap<String, u32>,
    /// Augmented assignments keyed by operator.
    pub augmented_ops: BTreeMap<String, u32>,
    /// Arithmetic/bitwise binary operators keyed by operator token.
    pub binary_ops: BTreeMap<String, u32>,
    /// Unary operators keyed by operator token.
    pub unary_ops: BTreeMap<String, u32>,
    /// Comparison operators keyed by operator token.
    pub comparison_ops: BTreeMap<String, u32>,
    /// Logical operators keyed by operator token.
    pub logical_ops: BTreeMap<String, u32>,
    /// String literal count.
    pub string_literals: u32,
    /// Numeric literal count.
    pub numeric_literals: u32,
    /// Boolean literal count.
    pub boolean_literals: u32,
    /// Assertion statement/call count.
    pub assertion_count: u32,
    /// Decision-point count used as the complexity proxy.
    pub decision_points: u32,
}

impl BodyFeatures {
    /// Whether the body contains at least one yield point.
    pub fn is_generator(&self) -> bool {
        self.yield_count > 0
    }

    /// Whether the body contains any exception handler.
    pub fn has_handlers(&self) -> bool {
        self.handler_count > 0
    }

    /// Comprehensions + lambdas + functional builtin calls.
    pub fn functional_constructs(&self) -> u32 {
        self.comprehension_count + self.lambda_count + self.functional_calls
    }
}

/// Operator family used when classifying binary operator tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpFamily {
    Comparison,
    Logical,
    Arithmetic,
}

fn classify_operator(op: &str) -> OpFamily {
    match op {
        "==" | "!=" | "<" | ">" | "<=" | ">=" | "===" | "!==" | "<>" | "<=>" | "is" | "in"
        | "instanceof" => OpFamily::Comparison,
        "and" | "or" | "not" | "&&" | "||" | "??" | "xor" => OpFamily::Logical,
        _ => OpFamily::Arithmetic,
    }
}

/// Normalized label for a control-flow node kind.
fn control_label(kind: &str) -> &'static str {
    match kind {
        "if_statement" | "if_expression" | "elif_clause" => "if",
        "for_statement" | "for_in_statement" | "for_of_statement" | "foreach_statement" => "for",
        "while_statement" | "do_statement" | "do_while_statement" => "while",
        "try_statement" | "try_expression" => "try",
        "match_statement" | "match_expression" | "switch_statement"
        | "expression_switch_statement" | "type_switch_statement" | "select_statement" => "match",
        "with_statement" => "with",
        "conditional_expression" | "ternary_expression" => "ternary",
        "go_statement" => "go",
        "defer_statement" => "defer",
        _ => "other",
    }
}

/// Node-kind tables binding one grammar to the feature categories.
///
/// Empty slices are fine; a language simply never produces that feature.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default)]
pub struct LanguageSpec {
    pub control_flow: &'static [&'static str],
    pub handlers: &'static [&'static str],
    pub yields: &'static [&'static str],
    pub returns: &'static [&'static str],
    pub calls: &'static [&'static str],
    pub lambdas: &'static [&'static str],
    pub comprehensions: &'static [&'static str],
    pub binary: &'static [&'static str],
    pub unary: &'static [&'static str],
    pub attributes: &'static [&'static str],
    pub subscripts: &'static [&'static str],
    pub assignments: &'static [&'static str],
    pub augmented: &'static [&'static str],
    pub strings: &'static [&'static str],
    pub numbers: &'static [&'static str],
    pub booleans: &'static [&'static str],
    pub assertions: &'static [&'static str],
    pub globals: &'static [&'static str],
    pub nonlocals: &'static [&'static str],
    /// Call targets counted as functional builtins (`map`, `filter`, ...).
    pub functional_builtins: &'static [&'static str],
    /// Definition kinds whose subtrees belong to their own IR nodes and are
    /// not descended into.
    pub nested_defs: &'static [&'static str],
    /// Expression kinds whose return shape counts as a tuple.
    pub tuple_kinds: &'static [&'static str],
}

/// Walk `body` and collect its [`BodyFeatures`].
pub fn extract(body: Node<'_>, source: &[u8], spec: &LanguageSpec) -> BodyFeatures {
    let mut out = BodyFeatures::default();
    // The root is processed like any other node: expression-bodied arrows
    // hand in a bare expression, and block roots match no table anyway.
    let mut stack: Vec<Node<'_>> = vec![body];

    while let Some(node) = stack.pop() {
        let kind = node.kind();

        if spec.nested_defs.contains(&kind) {
            continue;
        }

        if spec.control_flow.contains(&kind) {
            *out.control_flow.entry(control_label(kind).to_string()).or_insert(0) += 1;
        }
        if spec.handlers.contains(&kind) {
            out.handler_count += 1;
            out.handled_exceptions.insert(handler_type(node, source));
        }
        if spec.yields.contains(&kind) {
            out.yield_count += 1;
        }
        if spec.returns.contains(&kind) {
            out.return_count += 1;
            out.return_shapes.insert(return_shape(node, spec));
        }
        if spec.calls.contains(&kind) {
            if let Some(callee) = call_target(node, source) {
                if is_functional_builtin(&callee, spec.functional_builtins) {
                    out.functional_calls += 1;
                }
                if callee == "assert" || callee.ends_with(".assert") {
                    out.assertion_count += 1;
                }
                out.internal_calls.insert(callee);
            }
        }
        if spec.lambdas.contains(&kind) {
            out.lambda_count += 1;
        }
        if spec.comprehensions.contains(&kind) {
            out.comprehension_count += 1;
        }
        if spec.binary.contains(&kind) {
            if let Some(op) = operator_text(node, source) {
                let bucket = match classify_operator(&op) {
                    OpFamily::Comparison => &mut out.comparison_ops,
                    OpFamily::Logical => &mut out.logical_ops,
                    OpFamily::Arithmetic => &mut out.binary_ops,
                };
                *bucket.entry(op).or_insert(0) += 1;
            }
        }
        if spec.unary.contains(&kind) {
            if let Some(op) = operator_text(node, source) {
                *out.unary_ops.entry(op).or_insert(0) += 1;
            }
        }
        if spec.attributes.contains(&kind) {
            if let Some(attr) = attribute_name(node, source) {
                *out.attribute_reads.entry(attr).or_insert(0) += 1;
            }
        }
        if spec.subscripts.contains(&kind) {
            let target = subscript_target(node, source);
            *out.subscript_reads.entry(target).or_insert(0) += 1;
        }
        if spec.assignments.contains(&kind) {
            let shape = assignment_shape(node, spec);
            *out.assignment_shapes.entry(shape.to_string()).or_insert(0) += 1;
        }
        if spec.augmented.contains(&kind) {
            if let Some(op) = operator_text(node, source) {
                *out.augmented_ops.entry(op).or_insert(0) += 1;
            }
        }
        if spec.strings.contains(&kind) {
            out.string_literals += 1;
        }
        if spec.numbers.contains(&kind) {
            out.numeric_literals += 1;
        }
        if spec.booleans.contains(&kind) {
            out.boolean_literals += 1;
        }
        if spec.assertions.contains(&kind) {
            out.assertion_count += 1;
        }
        if spec.globals.contains(&kind) {
            for name in declared_names(node, source) {
                out.global_names.insert(name);
            }
        }
        if spec.nonlocals.contains(&kind) {
            for name in declared_names(node, source) {
                out.nonlocal_names.insert(name);
            }
        }

        for i in (0..node.child_count()).rev() {
            if let Some(child) = node.child(i) {
                stack.push(child);
            }
        }
    }

    out.decision_points = out.control_flow.values().sum::<u32>()
        + out.logical_ops.values().sum::<u32>()
        + out.handler_count;
    out
}

fn node_text(node: Node<'_>, source: &[u8]) -> String {
    node.utf8_text(source).unwrap_or("").to_string()
}

/// Operator token of a binary/unary/augmented node.
fn operator_text(node: Node<'_>, source: &[u8]) -> Option<String> {
    if let Some(op) = node.child_by_field_name("operator") {
        return Some(node_text(op, source));
    }
    if let Some(op) = node.child_by_field_name("operators") {
        return Some(node_text(op, source));
    }
    // Fall back to the first anonymous child, which is the operator token in
    // most grammars (`not_operator`, keyword operators).
    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            if !child.is_named() {
                return Some(node_text(child, source));
            }
        }
    }
    None
}

/// Exception type named by a handler clause; `*` when untyped.
fn handler_type(node: Node<'_>, source: &[u8]) -> String {
    for field in ["type", "type_list"] {
        if let Some(child) = node.child_by_field_name(field) {
            return node_text(child, source);
        }
    }
    // Untyped catch parameters (JS `catch (e)`) must not read as a type.
    let param_id = node.child_by_field_name("parameter").map(|n| n.id());
    for i in 0..node.named_child_count() {
        if let Some(child) = node.named_child(i) {
            if Some(child.id()) == param_id {
                continue;
            }
            match child.kind() {
                "block" | "compound_statement" | "statement_block" | "variable_name"
                | "comment" => continue,
                // `except ValueError as e`: the type alone, not the alias.
                "as_pattern" => {
                    if let Some(ty) = child.named_child(0) {
                        return node_text(ty, source);
                    }
                }
                _ => return node_text(child, source),
            }
        }
    }
    "*".to_string()
}

/// Shape of one return statement.
fn return_shape(node: Node<'_>, spec: &LanguageSpec) -> String {
    match node.named_child(0) {
        None => "bare".to_string(),
        Some(value) if spec.tuple_kinds.contains(&value.kind()) => {
            format!("tuple{}", value.named_child_count())
        }
        Some(_) => "value".to_string(),
    }
}

/// Callee of a call node, as written in source.
fn call_target(node: Node<'_>, source: &[u8]) -> Option<String> {
    let callee = node
        .child_by_field_name("function")
        .or_else(|| node.child_by_field_name("name"))
        .or_else(|| node.child(0))?;
    let text = node_text(callee, source);
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn is_functional_builtin(callee: &str, builtins: &[&str]) -> bool {
    builtins
        .iter()
        .any(|b| callee == *b || callee.ends_with(&format!(".{b}")))
}

/// Attribute name of a member/attribute access.
fn attribute_name(node: Node<'_>, source: &[u8]) -> Option<String> {
    for field in ["attribute", "property", "field", "name"] {
        if let Some(child) = node.child_by_field_name(field) {
            return Some(node_text(child, source));
        }
    }
    None
}

/// The subscripted expression of an index/subscript access, truncated.
fn subscript_target(node: Node<'_>, source: &[u8]) -> String {
    let target = node
        .child_by_field_name("value")
        .or_else(|| node.child_by_field_name("object"))
        .or_else(|| node.child_by_field_name("operand"))
        .or_else(|| node.child(0));
    let mut text = target.map(|t| node_text(t, source)).unwrap_or_default();
    text.truncate(64);
    text
}

/// Target shape of an assignment node.
fn assignment_shape(node: Node<'_>, spec: &LanguageSpec) -> &'static str {
    let left = node.child_by_field_name("left").or_else(|| node.child(0));
    match left.map(|l| l.kind()) {
        Some("identifier" | "variable_name") => "simple",
        Some(
            "attribute" | "member_expression" | "selector_expression" | "member_access_expression",
        ) => "attribute",
        Some("subscript" | "subscript_expression" | "index_expression" | "element_access_expression") => {
            "subscript"
        }
        Some(kind) if spec.tuple_kinds.contains(&kind) => "destructuring",
        Some("pattern_list" | "tuple_pattern" | "array_pattern" | "object_pattern" | "list_pattern") => {
            "destructuring"
        }
        Some(_) => "other",
        None => "other",
    }
}

/// Identifier names declared by a `global`/`nonlocal` statement.
fn declared_names(node: Node<'_>, source: &[u8]) -> Vec<String> {
    let mut names = Vec::new();
    for i in 0..node.named_child_count() {
        if let Some(child) = node.named_child(i) {
            if child.kind() == "identifier" {
                names.push(node_text(child, source));
            }
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_operator_families() {
        assert_eq!(classify_operator("=="), OpFamily::Comparison);
        assert_eq!(classify_operator("<="), OpFamily::Comparison);
        assert_eq!(classify_operator("and"), OpFamily::Logical);
        assert_eq!(classify_operator("||"), OpFamily::Logical);
        assert_eq!(classify_operator("+"), OpFamily::Arithmetic);
        assert_eq!(classify_operator("<<"), OpFamily::Arithmetic);
    }

    #[test]
    fn control_labels_normalize_across_grammars() {
        assert_eq!(control_label("if_statement"), "if");
        assert_eq!(control_label("foreach_statement"), "for");
        assert_eq!(control_label("expression_switch_statement"), "match");
        assert_eq!(control_label("try_statement"), "try");
    }

    #[test]
    fn functional_builtin_matches_bare_and_member_calls() {
        let builtins = &["map", "filter", "reduce"];
        assert!(is_functional_builtin("map", builtins));
        assert!(is_functional_builtin("items.filter", builtins));
        assert!(!is_functional_builtin("remap", builtins));
    }
}
