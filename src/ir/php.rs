//! PHP source → IR.
//!
//! Tiered: the tree-sitter grammar handles PHP 7.4+/8.x (typed properties,
//! attributes, enums, union/intersection types, readonly, match, constructor
//! promotion, nullsafe). When the grammar recovers nothing usable, a
//! line-oriented regex extractor of top-level class/function names is the
//! final fallback. The tier that produced the IR is recorded in the degraded
//! detail.

use std::sync::LazyLock;

use regex::Regex;
use tree_sitter::Node;

use super::features::{self, LanguageSpec};
use super::{
    fingerprint, module_stem, ts_parser, FileIr, LanguageParser, Modifiers, NodeKind, Parameter,
    ProgramNode, Signature, Visibility,
};

const SPEC: LanguageSpec = LanguageSpec {
    control_flow: &[
        "if_statement",
        "for_statement",
        "foreach_statement",
        "while_statement",
        "do_statement",
        "switch_statement",
        "match_expression",
        "try_statement",
        "conditional_expression",
    ],
    handlers: &["catch_clause"],
    yields: &["yield_expression"],
    returns: &["return_statement"],
    calls: &[
        "function_call_expression",
        "member_call_expression",
        "scoped_call_expression",
        "nullsafe_member_call_expression",
    ],
    lambdas: &["anonymous_function", "anonymous_function_creation_expression", "arrow_function"],
    comprehensions: &[],
    binary: &["binary_expression"],
    unary: &["unary_op_expression"],
    attributes: &["member_access_expression", "nullsafe_member_access_expression"],
    subscripts: &["subscript_expression"],
    assignments: &["assignment_expression"],
    augmented: &["augmented_assignment_expression"],
    strings: &["string", "encapsed_string", "heredoc"],
    numbers: &["integer", "float"],
    booleans: &["boolean"],
    assertions: &[],
    globals: &["global_declaration"],
    nonlocals: &[],
    functional_builtins: &["array_map", "array_filter", "array_reduce"],
    nested_defs: &[
        "function_definition",
        "method_declaration",
        "class_declaration",
        "interface_declaration",
        "trait_declaration",
        "enum_declaration",
    ],
    tuple_kinds: &["list_literal"],
};

/// Parser for `.php` files, with grammar → regex tier fallback.
pub struct PhpParser;

impl LanguageParser for PhpParser {
    fn language(&self) -> &'static str {
        "php"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["php"]
    }

    fn parse(&self, path: &str, source: &str) -> FileIr {
        match self.parse_grammar(path, source) {
            Some(ir) => ir,
            None => regex_tier(path, source),
        }
    }
}

impl PhpParser {
    /// Grammar tier. Returns `None` when nothing usable was recovered, which
    /// sends the file to the regex tier.
    fn parse_grammar(&self, path: &str, source: &str) -> Option<FileIr> {
        let language: tree_sitter::Language = tree_sitter_php::LANGUAGE_PHP.into();
        let mut parser = ts_parser(&language)?;
        let tree = parser.parse(source, None)?;
        let root = tree.root_node();

        let mut ir = FileIr {
            path: path.to_string(),
            language: self.language(),
            ..FileIr::default()
        };
        if root.has_error() {
            ir.degraded = Some("grammar tier: syntax errors; IR is partial".to_string());
        }

        let src = source.as_bytes();
        let stem = module_stem(path);
        let module_qname = format!("module:{stem}");

        let mut module = ProgramNode::new(NodeKind::Module, module_qname.clone(), stem);
        module.dependencies = collect_uses(root, src);
        module.body_fingerprint = fingerprint(root);
        module.features = features::extract(root, src, &SPEC);
        module.span = span(root);
        ir.insert(module);
        ir.materialize_imports(&module_qname);

        walk_declarations(root, src, &mut ir, &module_qname);

        // Error-dominated trees that yielded no declarations fall through to
        // the regex tier.
        if root.has_error() && ir.nodes.len() == 1 && !source.trim().is_empty() {
            return None;
        }
        Some(ir)
    }
}

fn span(node: Node<'_>) -> (u32, u32) {
    (
        node.start_position().row as u32 + 1,
        node.end_position().row as u32 + 1,
    )
}

fn text(node: Node<'_>, src: &[u8]) -> String {
    node.utf8_text(src).unwrap_or("").to_string()
}

/// `use Foo\Bar;` imports anywhere in the file.
fn collect_uses(root: Node<'_>, src: &[u8]) -> std::collections::BTreeSet<String> {
    let mut deps = std::collections::BTreeSet::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.kind() == "namespace_use_declaration" {
            let mut inner = vec![node];
            while let Some(n) = inner.pop() {
                for i in 0..n.named_child_count() {
                    if let Some(child) = n.named_child(i) {
                        match child.kind() {
                            "namespace_use_clause" | "namespace_use_group" => inner.push(child),
                            "qualified_name" | "name" => {
                                deps.insert(text(child, src));
                            }
                            _ => {}
                        }
                    }
                }
            }
            continue;
        }
        for i in 0..node.named_child_count() {
            if let Some(child) = node.named_child(i) {
                stack.push(child);
            }
        }
    }
    deps
}

/// Walk top-level declarations, flattening namespace blocks.
fn walk_declarations(node: Node<'_>, src: &[u8], ir: &mut FileIr, module_qname: &str) {
    for i in 0..node.named_child_count() {
        let Some(stmt) = node.named_child(i) else {
            continue;
        };
        match stmt.kind() {
            "namespace_definition" => {
                if let Some(body) = stmt.child_by_field_name("body") {
                    walk_declarations(body, src, ir, module_qname);
                }
            }
            "function_definition" => {
                extract_callable(stmt, src, ir, module_qname, "", NodeKind::Function);
            }
            "class_declaration" => {
                extract_classlike(stmt, src, ir, module_qname, NodeKind::Class);
            }
            "interface_declaration" => {
                extract_classlike(stmt, src, ir, module_qname, NodeKind::Interface);
            }
            "trait_declaration" => {
                extract_classlike(stmt, src, ir, module_qname, NodeKind::Trait);
            }
            "enum_declaration" => {
                extract_classlike(stmt, src, ir, module_qname, NodeKind::Enum);
            }
            "const_declaration" => extract_consts(stmt, src, ir, module_qname, ""),
            _ => {}
        }
    }
}

/// A function or method declaration.
fn extract_callable(
    def: Node<'_>,
    src: &[u8],
    ir: &mut FileIr,
    parent: &str,
    qual_prefix: &str,
    kind: NodeKind,
) {
    let Some(name_node) = def.child_by_field_name("name") else {
        return;
    };
    let name = text(name_node, src);
    let qname = format!("{qual_prefix}{}:{name}", kind.prefix());
    let mut node = ProgramNode::new(kind, qname, name);
    node.parent = Some(parent.to_string());
    node.modifiers = declaration_modifiers(def, src);
    node.decorators = attribute_names(def, src);
    node.signature = Some(signature(def, src));
    node.span = span(def);
    if let Some(rt) = node.signature.as_ref().and_then(|s| s.return_type.clone()) {
        apply_type(&mut node.modifiers, &rt);
    }
    if let Some(body) = def.child_by_field_name("body") {
        node.body_fingerprint = fingerprint(body);
        node.features = features::extract(body, src, &SPEC);
        node.modifiers.is_generator = node.features.is_generator();
    }
    let qname = ir.insert(node);
    ir.materialize_decorators(&qname);
}

/// A class, interface, trait, or enum with its members.
fn extract_classlike(
    def: Node<'_>,
    src: &[u8],
    ir: &mut FileIr,
    module_qname: &str,
    kind: NodeKind,
) {
    let Some(name_node) = def.child_by_field_name("name") else {
        return;
    };
    let name = text(name_node, src);
    let qname = format!("{}:{name}", kind.prefix());
    let mut node = ProgramNode::new(kind, qname, name);
    node.parent = Some(module_qname.to_string());
    node.modifiers = declaration_modifiers(def, src);
    node.decorators = attribute_names(def, src);
    node.bases = bases(def, src);
    node.span = span(def);
    if let Some(body) = def.child_by_field_name("body") {
        node.body_fingerprint = fingerprint(body);
    }
    let qname = ir.insert(node);
    ir.materialize_decorators(&qname);

    let Some(body) = def.child_by_field_name("body") else {
        return;
    };
    let prefix = format!("{qname}.");
    for i in 0..body.named_child_count() {
        let Some(member) = body.named_child(i) else {
            continue;
        };
        match member.kind() {
            "method_declaration" => {
                extract_callable(member, src, ir, &qname, &prefix, NodeKind::Method);
            }
            "property_declaration" => extract_properties(member, src, ir, &qname, &prefix),
            "const_declaration" => extract_consts(member, src, ir, &qname, &prefix),
            "enum_case" => {
                if let Some(case_name) = member.child_by_field_name("name") {
                    let case_name = text(case_name, src);
                    let mut case = ProgramNode::new(
                        NodeKind::EnumCase,
                        format!("{prefix}case:{case_name}"),
                        case_name,
                    );
                    case.parent = Some(qname.clone());
                    case.span = span(member);
                    ir.insert(case);
                }
            }
            _ => {}
        }
    }
}

/// Typed/visible/readonly properties of one `property_declaration`.
fn extract_properties(member: Node<'_>, src: &[u8], ir: &mut FileIr, class_qname: &str, prefix: &str) {
    let modifiers_base = declaration_modifiers(member, src);
    let attributes = attribute_names(member, src);
    let ty = member.child_by_field_name("type").map(|t| text(t, src));
    for i in 0..member.named_child_count() {
        let Some(child) = member.named_child(i) else {
            continue;
        };
        if child.kind() != "property_element" {
            continue;
        }
        let prop_name = text(child, src)
            .trim_start_matches('$')
            .split('=')
            .next()
            .unwrap_or("")
            .trim()
            .to_string();
        if prop_name.is_empty() {
            continue;
        }
        let mut node = ProgramNode::new(
            NodeKind::Property,
            format!("{prefix}prop:{prop_name}"),
            prop_name,
        );
        node.parent = Some(class_qname.to_string());
        node.modifiers = modifiers_base.clone();
        node.modifiers.typed = ty.is_some();
        if let Some(ty) = &ty {
            apply_type(&mut node.modifiers, ty);
        }
        node.decorators = attributes.clone();
        node.span = span(child);
        node.body_fingerprint = fingerprint(child);
        let qname = ir.insert(node);
        ir.materialize_decorators(&qname);
    }
}

fn extract_consts(member: Node<'_>, src: &[u8], ir: &mut FileIr, parent: &str, prefix: &str) {
    for i in 0..member.named_child_count() {
        let Some(child) = member.named_child(i) else {
            continue;
        };
        if child.kind() != "const_element" {
            continue;
        }
        let Some(name_node) = child.named_child(0) else {
            continue;
        };
        let const_name = text(name_node, src);
        let mut node = ProgramNode::new(
            NodeKind::Constant,
            format!("{prefix}const:{const_name}"),
            const_name,
        );
        node.parent = Some(parent.to_string());
        node.span = span(child);
        node.body_fingerprint = fingerprint(child);
        ir.insert(node);
    }
}

/// Visibility / static / abstract / final / readonly modifiers present on a
/// declaration node.
fn declaration_modifiers(def: Node<'_>, src: &[u8]) -> Modifiers {
    let mut m = Modifiers::default();
    for i in 0..def.child_count() {
        let Some(child) = def.child(i) else { continue };
        match child.kind() {
            "visibility_modifier" => {
                m.visibility = match text(child, src).as_str() {
                    "private" => Some(Visibility::Private),
                    "protected" => Some(Visibility::Protected),
                    _ => Some(Visibility::Public),
                };
            }
            "static_modifier" => m.is_static = true,
            "abstract_modifier" => m.is_abstract = true,
            "readonly_modifier" => m.readonly = true,
            _ => {}
        }
    }
    m
}

/// `#[Attr]` attribute names on a declaration.
fn attribute_names(def: Node<'_>, src: &[u8]) -> Vec<String> {
    let mut names = Vec::new();
    let mut stack = Vec::new();
    for i in 0..def.child_count() {
        if let Some(child) = def.child(i) {
            if child.kind() == "attribute_list" {
                stack.push(child);
            }
        }
    }
    while let Some(node) = stack.pop() {
        for i in 0..node.named_child_count() {
            if let Some(child) = node.named_child(i) {
                match child.kind() {
                    "attribute_group" => stack.push(child),
                    "attribute" => {
                        if let Some(name) = child.named_child(0) {
                            names.push(text(name, src));
                        }
                    }
                    _ => {}
                }
            }
        }
    }
    names
}

/// `extends` + `implements` names.
fn bases(def: Node<'_>, src: &[u8]) -> Vec<String> {
    let mut out = Vec::new();
    for i in 0..def.child_count() {
        let Some(child) = def.child(i) else { continue };
        if matches!(child.kind(), "base_clause" | "class_interface_clause") {
            for j in 0..child.named_child_count() {
                if let Some(base) = child.named_child(j) {
                    out.push(text(base, src));
                }
            }
        }
    }
    out.sort();
    out
}

/// Union/intersection/nullable facets from a type's text.
fn apply_type(modifiers: &mut Modifiers, ty: &str) {
    let mut ty = ty.trim();
    if let Some(inner) = ty.strip_prefix('?') {
        modifiers.nullable = true;
        ty = inner;
    }
    if ty.contains('|') {
        let mut members: Vec<String> = ty.split('|').map(|s| s.trim().to_string()).collect();
        members.sort();
        modifiers.nullable |= members.iter().any(|m| m.eq_ignore_ascii_case("null"));
        modifiers.union_types = members;
    } else if ty.contains('&') {
        let mut members: Vec<String> = ty.split('&').map(|s| s.trim().to_string()).collect();
        members.sort();
        modifiers.intersection_types = members;
    }
}

fn signature(def: Node<'_>, src: &[u8]) -> Signature {
    let mut sig = Signature {
        params: Vec::new(),
        return_type: return_type(def, src),
    };
    let Some(params) = def.child_by_field_name("parameters") else {
        return sig;
    };
    for i in 0..params.named_child_count() {
        let Some(param) = params.named_child(i) else {
            continue;
        };
        let entry = match param.kind() {
            "simple_parameter" | "property_promotion_parameter" => Parameter {
                name: param
                    .child_by_field_name("name")
                    .map(|n| text(n, src).trim_start_matches('$').to_string())
                    .unwrap_or_default(),
                has_default: param.child_by_field_name("default_value").is_some(),
                annotation: param.child_by_field_name("type").map(|t| text(t, src)),
                variadic: false,
            },
            "variadic_parameter" => Parameter {
                name: param
                    .child_by_field_name("name")
                    .map(|n| text(n, src).trim_start_matches('$').to_string())
                    .unwrap_or_else(|| text(param, src)),
                variadic: true,
                annotation: param.child_by_field_name("type").map(|t| text(t, src)),
                has_default: false,
            },
            _ => continue,
        };
        if !entry.name.is_empty() {
            sig.params.push(entry);
        }
    }
    sig
}

/// Declared return type. Looks for the `return_type` field, then falls back
/// to the first type node after the parameter list.
fn return_type(def: Node<'_>, src: &[u8]) -> Option<String> {
    if let Some(rt) = def.child_by_field_name("return_type") {
        return Some(text(rt, src));
    }
    let params = def.child_by_field_name("parameters")?;
    for i in 0..def.child_count() {
        let Some(child) = def.child(i) else { continue };
        if child.start_byte() <= params.end_byte() {
            continue;
        }
        if matches!(
            child.kind(),
            "named_type" | "primitive_type" | "optional_type" | "union_type" | "intersection_type"
        ) {
            return Some(text(child, src));
        }
    }
    None
}

static RE_CLASSLIKE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"(?m)^\s*(?:abstract\s+|final\s+|readonly\s+)*(class|interface|trait|enum)\s+([A-Za-z_]\w*)")
        .expect("static pattern")
});
static RE_FUNCTION: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"(?m)^function\s+&?\s*([A-Za-z_]\w*)").expect("static pattern")
});

/// Final fallback: top-level class/function names only, no bodies.
fn regex_tier(path: &str, source: &str) -> FileIr {
    let mut ir = FileIr {
        path: path.to_string(),
        language: "php",
        degraded: Some("regex tier: grammar failed; top-level names only".to_string()),
        ..FileIr::default()
    };
    let stem = module_stem(path);
    let module_qname = format!("module:{stem}");
    ir.insert(ProgramNode::new(NodeKind::Module, module_qname.clone(), stem));

    for caps in RE_CLASSLIKE.captures_iter(source) {
        let kind = match &caps[1] {
            "interface" => NodeKind::Interface,
            "trait" => NodeKind::Trait,
            "enum" => NodeKind::Enum,
            _ => NodeKind::Class,
        };
        let name = caps[2].to_string();
        let mut node = ProgramNode::new(kind, format!("{}:{name}", kind.prefix()), name);
        node.parent = Some(module_qname.clone());
        ir.insert(node);
    }
    for caps in RE_FUNCTION.captures_iter(source) {
        let name = caps[1].to_string();
        let mut node = ProgramNode::new(NodeKind::Function, format!("func:{name}"), name);
        node.parent = Some(module_qname.clone());
        ir.insert(node);
    }
    ir
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> FileIr {
        PhpParser.parse("auth.php", source)
    }

    #[test]
    fn extracts_class_with_typed_members() {
        let ir = parse(
            "<?php\nclass Auth extends Base {\n    private readonly ?string $token;\n    public function login(string $user, int $tries = 3): bool {\n        return true;\n    }\n}\n",
        );
        assert!(ir.degraded.is_none());
        let class = &ir.nodes["class:Auth"];
        assert_eq!(class.bases, vec!["Base".to_string()]);
        let token = &ir.nodes["class:Auth.prop:token"];
        assert!(token.modifiers.typed);
        assert!(token.modifiers.readonly);
        assert!(token.modifiers.nullable);
        assert_eq!(token.modifiers.visibility, Some(Visibility::Private));
        let login = &ir.nodes["class:Auth.method:login"];
        let sig = login.signature.as_ref().unwrap();
        assert_eq!(sig.params.len(), 2);
        assert!(sig.params[1].has_default);
        assert_eq!(sig.return_type.as_deref(), Some("bool"));
    }

    #[test]
    fn extracts_enum_cases_and_uses() {
        let ir = parse(
            "<?php\nuse App\\Contracts\\Clock;\nenum Suit {\n    case Hearts;\n    case Spades;\n}\n",
        );
        assert!(ir.nodes.contains_key("enum:Suit"));
        assert!(ir.nodes.contains_key("enum:Suit.case:Hearts"));
        let module = ir.module().unwrap();
        assert!(module.dependencies.contains("App\\Contracts\\Clock"));
        let import = &ir.nodes["import:App\\Contracts\\Clock"];
        assert_eq!(import.kind, NodeKind::NamespaceImport);
    }

    #[test]
    fn attributes_become_decorator_nodes() {
        let ir = parse("<?php\n#[Route('/login')]\nclass Auth {\n}\n");
        let class = &ir.nodes["class:Auth"];
        assert_eq!(class.decorators, vec!["Route".to_string()]);
        let attr = &ir.nodes["class:Auth.attr:Route"];
        assert_eq!(attr.kind, NodeKind::AttributeDecorator);
        assert_eq!(attr.parent.as_deref(), Some("class:Auth"));
    }

    #[test]
    fn union_types_are_recorded() {
        let ir = parse("<?php\nclass J {\n    public int|string $id;\n}\n");
        let prop = &ir.nodes["class:J.prop:id"];
        assert_eq!(prop.modifiers.union_types.len(), 2);
    }

    #[test]
    fn regex_tier_recovers_top_level_names() {
        // Not PHP at all as far as the grammar is concerned.
        let ir = regex_tier("legacy.php", "class Legacy {\nfunction helper() {}\n");
        assert!(ir.degraded.as_deref().unwrap_or("").starts_with("regex tier"));
        assert!(ir.nodes.contains_key("class:Legacy"));
    }

    #[test]
    fn generator_methods_are_flagged() {
        let ir = parse(
            "<?php\nfunction ints(int $n) {\n    for ($i = 0; $i < $n; $i++) {\n        yield $i;\n    }\n}\n",
        );
        let func = &ir.nodes["func:ints"];
        assert!(func.modifiers.is_generator);
        assert_eq!(func.features.control_flow.get("for"), Some(&1));
    }
}
