//! JavaScript / TypeScript source → IR.
//!
//! One parser covers both: the grammar is selected per extension
//! (`.ts`/`.tsx` use the TypeScript grammars, everything else the JavaScript
//! one). Extracts classes, function and arrow declarations, async and
//! generator flags, static and private members, exports, decorators, and
//! TypeScript interfaces and enums.

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
        "for_in_statement",
        "while_statement",
        "do_statement",
        "try_statement",
        "switch_statement",
        "ternary_expression",
    ],
    handlers: &["catch_clause"],
    yields: &["yield_expression"],
    returns: &["return_statement"],
    calls: &["call_expression"],
    lambdas: &["arrow_function", "function_expression"],
    comprehensions: &[],
    binary: &["binary_expression"],
    unary: &["unary_expression"],
    attributes: &["member_expression"],
    subscripts: &["subscript_expression"],
    assignments: &["assignment_expression", "variable_declarator"],
    augmented: &["augmented_assignment_expression"],
    strings: &["string", "template_string"],
    numbers: &["number"],
    booleans: &["true", "false"],
    assertions: &[],
    globals: &[],
    nonlocals: &[],
    functional_builtins: &["map", "filter", "reduce"],
    nested_defs: &[
        "function_declaration",
        "generator_function_declaration",
        "class_declaration",
        "abstract_class_declaration",
        "method_definition",
    ],
    tuple_kinds: &["array", "array_pattern", "object_pattern"],
};

/// Parser for `.js` / `.jsx` / `.mjs` / `.cjs` / `.ts` / `.tsx` files.
pub struct JavaScriptParser;

impl LanguageParser for JavaScriptParser {
    fn language(&self) -> &'static str {
        "javascript"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["js", "jsx", "mjs", "cjs", "ts", "tsx"]
    }

    fn parse(&self, path: &str, source: &str) -> FileIr {
        let ext = std::path::Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        let language: tree_sitter::Language = match ext.as_str() {
            "ts" => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            "tsx" => tree_sitter_typescript::LANGUAGE_TSX.into(),
            _ => tree_sitter_javascript::LANGUAGE.into(),
        };
        let Some(mut parser) = ts_parser(&language) else {
            return FileIr::degraded_empty(path, self.language(), "grammar unavailable");
        };
        let Some(tree) = parser.parse(source, None) else {
            return FileIr::degraded_empty(path, self.language(), "parse timed out");
        };

        let root = tree.root_node();
        let mut ir = FileIr {
            path: path.to_string(),
            language: self.language(),
            ..FileIr::default()
        };
        if root.has_error() {
            ir.degraded = Some("syntax errors; IR is partial".to_string());
        }

        let src = source.as_bytes();
        let stem = module_stem(path);
        let module_qname = format!("module:{stem}");

        let mut module = ProgramNode::new(NodeKind::Module, module_qname.clone(), stem);
        module.dependencies = collect_imports(root, src);
        module.body_fingerprint = fingerprint(root);
        module.features = features::extract(root, src, &SPEC);
        module.span = span(root);
        ir.insert(module);
        ir.materialize_imports(&module_qname);

        for i in 0..root.named_child_count() {
            if let Some(stmt) = root.named_child(i) {
                extract_statement(stmt, src, &mut ir, &module_qname);
            }
        }
        ir
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

fn collect_imports(root: Node<'_>, src: &[u8]) -> std::collections::BTreeSet<String> {
    let mut deps = std::collections::BTreeSet::new();
    for i in 0..root.named_child_count() {
        if let Some(stmt) = root.named_child(i) {
            if stmt.kind() == "import_statement" {
                if let Some(source_node) = stmt.child_by_field_name("source") {
                    deps.insert(text(source_node, src).trim_matches(['"', '\'', '`']).to_string());
                }
            }
        }
    }
    deps
}

/// Extract one top-level statement, unwrapping `export` wrappers.
fn extract_statement(stmt: Node<'_>, src: &[u8], ir: &mut FileIr, module_qname: &str) {
    match stmt.kind() {
        "export_statement" => {
            if let Some(decl) = stmt.child_by_field_name("declaration") {
                extract_statement(decl, src, ir, module_qname);
            }
        }
        "function_declaration" | "generator_function_declaration" => {
            extract_function(stmt, src, ir, module_qname);
        }
        "class_declaration" | "abstract_class_declaration" => {
            extract_class(stmt, src, ir, module_qname);
        }
        "interface_declaration" => {
            if let Some(name) = stmt.child_by_field_name("name") {
                let name = text(name, src);
                let mut node =
                    ProgramNode::new(NodeKind::Interface, format!("interface:{name}"), name);
                node.parent = Some(module_qname.to_string());
                node.bases = heritage(stmt, src);
                node.body_fingerprint = fingerprint(stmt);
                node.span = span(stmt);
                ir.insert(node);
            }
        }
        "enum_declaration" => extract_enum(stmt, src, ir, module_qname),
        "lexical_declaration" | "variable_declaration" => {
            extract_bound_functions(stmt, src, ir, module_qname);
        }
        _ => {}
    }
}

/// `const f = (x) => ...` and `const f = function (x) {...}` produce
/// function nodes named after the binding.
fn extract_bound_functions(decl: Node<'_>, src: &[u8], ir: &mut FileIr, module_qname: &str) {
    for i in 0..decl.named_child_count() {
        let Some(declarator) = decl.named_child(i) else {
            continue;
        };
        if declarator.kind() != "variable_declarator" {
            continue;
        }
        let (Some(name_node), Some(value)) = (
            declarator.child_by_field_name("name"),
            declarator.child_by_field_name("value"),
        ) else {
            continue;
        };
        if !matches!(
            value.kind(),
            "arrow_function" | "function_expression" | "generator_function"
        ) {
            continue;
        }
        let name = text(name_node, src);
        let mut node = ProgramNode::new(NodeKind::Function, format!("func:{name}"), name);
        node.parent = Some(module_qname.to_string());
        node.modifiers.is_async = has_keyword_child(value, "async");
        node.signature = Some(signature(value, src));
        node.span = span(declarator);
        let body = value.child_by_field_name("body");
        if let Some(body) = body {
            node.body_fingerprint = fingerprint(body);
            node.features = features::extract(body, src, &SPEC);
        }
        node.modifiers.is_generator =
            value.kind() == "generator_function" || node.features.is_generator();
        ir.insert(node);
    }
}

fn extract_function(def: Node<'_>, src: &[u8], ir: &mut FileIr, module_qname: &str) {
    let Some(name_node) = def.child_by_field_name("name") else {
        return;
    };
    let name = text(name_node, src);
    let mut node = ProgramNode::new(NodeKind::Function, format!("func:{name}"), name);
    node.parent = Some(module_qname.to_string());
    node.modifiers.is_async = has_keyword_child(def, "async");
    node.signature = Some(signature(def, src));
    node.span = span(def);
    if let Some(body) = def.child_by_field_name("body") {
        node.body_fingerprint = fingerprint(body);
        node.features = features::extract(body, src, &SPEC);
    }
    node.modifiers.is_generator =
        def.kind() == "generator_function_declaration" || node.features.is_generator();
    ir.insert(node);
}

fn extract_class(def: Node<'_>, src: &[u8], ir: &mut FileIr, module_qname: &str) {
    let Some(name_node) = def.child_by_field_name("name") else {
        return;
    };
    let name = text(name_node, src);
    let qname = format!("class:{name}");
    let mut node = ProgramNode::new(NodeKind::Class, qname, name);
    node.parent = Some(module_qname.to_string());
    node.modifiers.is_abstract = def.kind() == "abstract_class_declaration";
    node.bases = heritage(def, src);
    node.decorators = decorator_children(def, src);
    node.span = span(def);
    if let Some(body) = def.child_by_field_name("body") {
        node.body_fingerprint = fingerprint(body);
    }
    let qname = ir.insert(node);
    ir.materialize_decorators(&qname);

    let Some(body) = def.child_by_field_name("body") else {
        return;
    };
    let mut pending_decorators: Vec<String> = Vec::new();
    for i in 0..body.named_child_count() {
        let Some(member) = body.named_child(i) else {
            continue;
        };
        match member.kind() {
            "decorator" => {
                if let Some(expr) = member.named_child(0) {
                    pending_decorators.push(decorator_name(expr, src));
                }
            }
            "method_definition" | "abstract_method_signature" => {
                extract_method(member, src, ir, &qname, std::mem::take(&mut pending_decorators));
            }
            "public_field_definition" | "field_definition" | "property_signature" => {
                extract_field(member, src, ir, &qname, std::mem::take(&mut pending_decorators));
            }
            _ => {
                pending_decorators.clear();
            }
        }
    }
}

fn extract_method(
    member: Node<'_>,
    src: &[u8],
    ir: &mut FileIr,
    class_qname: &str,
    decorators: Vec<String>,
) {
    let Some(name_node) = member.child_by_field_name("name") else {
        return;
    };
    let name = text(name_node, src);
    let mut node = ProgramNode::new(
        NodeKind::Method,
        format!("{class_qname}.method:{name}"),
        name.clone(),
    );
    node.parent = Some(class_qname.to_string());
    node.decorators = decorators;
    node.modifiers = member_modifiers(member, &name, src);
    node.signature = Some(signature(member, src));
    node.span = span(member);
    if let Some(body) = member.child_by_field_name("body") {
        node.body_fingerprint = fingerprint(body);
        node.features = features::extract(body, src, &SPEC);
        if node.features.is_generator() {
            node.modifiers.is_generator = true;
        }
    }
    let qname = ir.insert(node);
    ir.materialize_decorators(&qname);
}

fn extract_field(
    member: Node<'_>,
    src: &[u8],
    ir: &mut FileIr,
    class_qname: &str,
    decorators: Vec<String>,
) {
    let Some(name_node) = member.child_by_field_name("name") else {
        return;
    };
    let name = text(name_node, src);
    let mut node = ProgramNode::new(
        NodeKind::Property,
        format!("{class_qname}.prop:{name}"),
        name.clone(),
    );
    node.parent = Some(class_qname.to_string());
    node.decorators = decorators;
    node.modifiers = member_modifiers(member, &name, src);
    node.modifiers.typed = member.child_by_field_name("type").is_some();
    if let Some(ty) = member.child_by_field_name("type") {
        apply_type_annotation(&mut node.modifiers, &annotation_text(ty, src));
    }
    node.span = span(member);
    node.body_fingerprint = fingerprint(member);
    let qname = ir.insert(node);
    ir.materialize_decorators(&qname);
}

fn extract_enum(def: Node<'_>, src: &[u8], ir: &mut FileIr, module_qname: &str) {
    let Some(name_node) = def.child_by_field_name("name") else {
        return;
    };
    let name = text(name_node, src);
    let qname = format!("enum:{name}");
    let mut node = ProgramNode::new(NodeKind::Enum, qname.clone(), name);
    node.parent = Some(module_qname.to_string());
    node.body_fingerprint = fingerprint(def);
    node.span = span(def);
    let qname = ir.insert(node);

    let Some(body) = def.child_by_field_name("body") else {
        return;
    };
    for i in 0..body.named_child_count() {
        let Some(member) = body.named_child(i) else {
            continue;
        };
        let case_name = match member.kind() {
            "property_identifier" => text(member, src),
            "enum_assignment" => member
                .child_by_field_name("name")
                .map(|n| text(n, src))
                .unwrap_or_default(),
            _ => continue,
        };
        if case_name.is_empty() {
            continue;
        }
        let mut case = ProgramNode::new(
            NodeKind::EnumCase,
            format!("{qname}.case:{case_name}"),
            case_name,
        );
        case.parent = Some(qname.clone());
        case.span = span(member);
        ir.insert(case);
    }
}

/// Modifier set of a class member: async, static, generator star,
/// TS accessibility, readonly, and `#private` names.
fn member_modifiers(member: Node<'_>, name: &str, src: &[u8]) -> Modifiers {
    let mut m = Modifiers {
        is_async: has_keyword_child(member, "async"),
        is_static: has_keyword_child(member, "static"),
        is_abstract: has_keyword_child(member, "abstract")
            || member.kind() == "abstract_method_signature",
        readonly: has_keyword_child(member, "readonly"),
        is_generator: has_keyword_child(member, "*"),
        ..Modifiers::default()
    };
    if name.starts_with('#') {
        m.visibility = Some(Visibility::Private);
    }
    for i in 0..member.child_count() {
        if let Some(child) = member.child(i) {
            if child.kind() == "accessibility_modifier" {
                m.visibility = match text(child, src).as_str() {
                    "private" => Some(Visibility::Private),
                    "protected" => Some(Visibility::Protected),
                    _ => Some(Visibility::Public),
                };
            }
        }
    }
    m
}

fn has_keyword_child(node: Node<'_>, keyword: &str) -> bool {
    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            if !child.is_named() && child.kind() == keyword {
                return true;
            }
        }
    }
    false
}

/// Base classes and implemented interfaces from the heritage clause.
fn heritage(def: Node<'_>, src: &[u8]) -> Vec<String> {
    let mut bases = Vec::new();
    let mut stack = Vec::new();
    for i in 0..def.child_count() {
        if let Some(child) = def.child(i) {
            if matches!(
                child.kind(),
                "class_heritage" | "extends_clause" | "implements_clause" | "extends_type_clause"
            ) {
                stack.push(child);
            }
        }
    }
    while let Some(node) = stack.pop() {
        for i in 0..node.named_child_count() {
            if let Some(child) = node.named_child(i) {
                match child.kind() {
                    "extends_clause" | "implements_clause" => stack.push(child),
                    "identifier" | "member_expression" | "type_identifier" | "generic_type" => {
                        bases.push(text(child, src));
                    }
                    _ => {}
                }
            }
        }
    }
    bases.sort();
    bases
}

fn decorator_children(def: Node<'_>, src: &[u8]) -> Vec<String> {
    let mut names = Vec::new();
    for i in 0..def.child_count() {
        if let Some(child) = def.child(i) {
            if child.kind() == "decorator" {
                if let Some(expr) = child.named_child(0) {
                    names.push(decorator_name(expr, src));
                }
            }
        }
    }
    names
}

fn decorator_name(expr: Node<'_>, src: &[u8]) -> String {
    if expr.kind() == "call_expression" {
        expr.child_by_field_name("function")
            .map(|f| text(f, src))
            .unwrap_or_else(|| text(expr, src))
    } else {
        text(expr, src)
    }
}

/// `: T` annotation text with the leading colon stripped.
fn annotation_text(ty: Node<'_>, src: &[u8]) -> String {
    text(ty, src).trim_start_matches(':').trim().to_string()
}

/// Populate union/intersection/nullable modifier facets from an annotation.
fn apply_type_annotation(modifiers: &mut Modifiers, annotation: &str) {
    if annotation.contains('|') {
        let mut members: Vec<String> =
            annotation.split('|').map(|s| s.trim().to_string()).collect();
        members.sort();
        modifiers.nullable = members.iter().any(|m| m == "null" || m == "undefined");
        modifiers.union_types = members;
    } else if annotation.contains('&') {
        let mut members: Vec<String> =
            annotation.split('&').map(|s| s.trim().to_string()).collect();
        members.sort();
        modifiers.intersection_types = members;
    }
}

fn signature(def: Node<'_>, src: &[u8]) -> Signature {
    let mut sig = Signature {
        params: Vec::new(),
        return_type: def
            .child_by_field_name("return_type")
            .map(|t| annotation_text(t, src)),
    };
    let Some(params) = def.child_by_field_name("parameters") else {
        return sig;
    };
    for i in 0..params.named_child_count() {
        let Some(param) = params.named_child(i) else {
            continue;
        };
        let entry = match param.kind() {
            "identifier" => Parameter {
                name: text(param, src),
                ..Parameter::default()
            },
            "assignment_pattern" => Parameter {
                name: param
                    .child_by_field_name("left")
                    .map(|n| text(n, src))
                    .unwrap_or_default(),
                has_default: true,
                ..Parameter::default()
            },
            "rest_pattern" => Parameter {
                name: text(param, src).trim_start_matches("...").to_string(),
                variadic: true,
                ..Parameter::default()
            },
            "required_parameter" | "optional_parameter" => {
                let pattern = param.child_by_field_name("pattern");
                let variadic = pattern.is_some_and(|p| p.kind() == "rest_pattern");
                Parameter {
                    name: pattern
                        .map(|p| text(p, src).trim_start_matches("...").to_string())
                        .unwrap_or_default(),
                    has_default: param.kind() == "optional_parameter"
                        || param.child_by_field_name("value").is_some(),
                    annotation: param
                        .child_by_field_name("type")
                        .map(|t| annotation_text(t, src)),
                    variadic,
                }
            }
            // Destructured parameters keep their pattern text as the name.
            "object_pattern" | "array_pattern" => Parameter {
                name: text(param, src),
                ..Parameter::default()
            },
            _ => continue,
        };
        if !entry.name.is_empty() {
            sig.params.push(entry);
        }
    }
    sig
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_js(source: &str) -> FileIr {
        JavaScriptParser.parse("app.js", source)
    }

    fn parse_ts(source: &str) -> FileIr {
        JavaScriptParser.parse("app.ts", source)
    }

    #[test]
    fn extracts_function_and_arrow_bindings() {
        let ir = parse_js("function greet(name) { return name; }\nconst shout = async (s) => s.toUpperCase();\n");
        assert!(ir.nodes.contains_key("func:greet"));
        let shout = &ir.nodes["func:shout"];
        assert!(shout.modifiers.is_async);
    }

    #[test]
    fn extracts_class_members_with_modifiers() {
        let ir = parse_js(
            "class Queue extends Base {\n  static of(items) { return new Queue(items); }\n  async *drain() { yield 1; }\n  #peek() { return this.items[0]; }\n}\n",
        );
        let class = &ir.nodes["class:Queue"];
        assert_eq!(class.bases, vec!["Base".to_string()]);
        assert!(ir.nodes["class:Queue.method:of"].modifiers.is_static);
        let drain = &ir.nodes["class:Queue.method:drain"];
        assert!(drain.modifiers.is_async);
        assert!(drain.modifiers.is_generator);
        let peek = &ir.nodes["class:Queue.method:#peek"];
        assert_eq!(peek.modifiers.visibility, Some(Visibility::Private));
    }

    #[test]
    fn unwraps_export_statements() {
        let ir = parse_js("export function publish(evt) { return evt; }\n");
        assert!(ir.nodes.contains_key("func:publish"));
    }

    #[test]
    fn collects_import_sources() {
        let ir = parse_js("import fs from 'fs';\nimport { join } from \"path\";\n");
        let module = ir.module().unwrap();
        assert!(module.dependencies.contains("fs"));
        assert!(module.dependencies.contains("path"));
        let import = &ir.nodes["import:fs"];
        assert_eq!(import.kind, NodeKind::NamespaceImport);
        assert_eq!(import.parent.as_deref(), Some("module:app"));
    }

    #[test]
    fn class_decorators_become_nodes() {
        let ir = parse_ts("@injectable\nclass Service {\n  run() { return 1; }\n}\n");
        let class = &ir.nodes["class:Service"];
        assert_eq!(class.decorators, vec!["injectable".to_string()]);
        let attr = &ir.nodes["class:Service.attr:injectable"];
        assert_eq!(attr.kind, NodeKind::AttributeDecorator);
        assert_eq!(attr.parent.as_deref(), Some("class:Service"));
    }

    #[test]
    fn typescript_interfaces_enums_and_types() {
        let ir = parse_ts(
            "interface Shape { area(): number; }\nenum Color { Red, Green }\nfunction paint(c: Color, depth?: number): void {}\n",
        );
        assert!(ir.nodes.contains_key("interface:Shape"));
        assert!(ir.nodes.contains_key("enum:Color"));
        assert!(ir.nodes.contains_key("enum:Color.case:Red"));
        let sig = ir.nodes["func:paint"].signature.as_ref().unwrap();
        assert_eq!(sig.params[0].annotation.as_deref(), Some("Color"));
        assert!(sig.params[1].has_default);
        assert_eq!(sig.return_type.as_deref(), Some("void"));
    }

    #[test]
    fn typescript_union_types_on_fields() {
        let ir = parse_ts("class Box {\n  value: string | null = null;\n}\n");
        let prop = &ir.nodes["class:Box.prop:value"];
        assert!(prop.modifiers.typed);
        assert!(prop.modifiers.nullable);
        assert_eq!(prop.modifiers.union_types.len(), 2);
    }

    #[test]
    fn malformed_source_degrades_without_panic() {
        let ir = parse_js("class {{{{");
        assert!(ir.degraded.is_some());
    }
}
