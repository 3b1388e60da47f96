//! Go source → IR.
//!
//! Packages, imports, functions, methods with their receiver, structs, and
//! interfaces. Structs map onto the class kind so methods pair with their
//! receiver type the same way across languages.

use tree_sitter::Node;

use super::features::{self, LanguageSpec};
use super::{
    fingerprint, module_stem, ts_parser, FileIr, LanguageParser, NodeKind, Parameter, ProgramNode,
    Signature,
};

const SPEC: LanguageSpec = LanguageSpec {
    control_flow: &[
        "if_statement",
        "for_statement",
        "expression_switch_statement",
        "type_switch_statement",
        "select_statement",
        "go_statement",
        "defer_statement",
    ],
    handlers: &[],
    yields: &[],
    returns: &["return_statement"],
    calls: &["call_expression"],
    lambdas: &["func_literal"],
    comprehensions: &[],
    binary: &["binary_expression"],
    unary: &["unary_expression"],
    attributes: &["selector_expression"],
    subscripts: &["index_expression"],
    assignments: &["assignment_statement", "short_var_declaration"],
    augmented: &[],
    strings: &["interpreted_string_literal", "raw_string_literal"],
    numbers: &["int_literal", "float_literal", "imaginary_literal"],
    booleans: &["true", "false"],
    assertions: &[],
    globals: &[],
    nonlocals: &[],
    functional_builtins: &[],
    nested_defs: &["function_declaration", "method_declaration", "type_declaration"],
    tuple_kinds: &["expression_list"],
};

/// Parser for `.go` files.
pub struct GoParser;

impl LanguageParser for GoParser {
    fn language(&self) -> &'static str {
        "go"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["go"]
    }

    fn parse(&self, path: &str, source: &str) -> FileIr {
        let language = tree_sitter_go::LANGUAGE.into();
        let Some(mut parser) = ts_parser(&language) else {
            return FileIr::degraded_empty(path, self.language(), "go grammar unavailable");
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

        // Types first so methods can parent onto their receiver's node.
        for i in 0..root.named_child_count() {
            if let Some(stmt) = root.named_child(i) {
                if stmt.kind() == "type_declaration" {
                    extract_types(stmt, src, &mut ir, &module_qname);
                }
            }
        }
        for i in 0..root.named_child_count() {
            let Some(stmt) = root.named_child(i) else {
                continue;
            };
            match stmt.kind() {
                "function_declaration" => extract_function(stmt, src, &mut ir, &module_qname),
                "method_declaration" => extract_method(stmt, src, &mut ir, &module_qname),
                "const_declaration" => extract_consts(stmt, src, &mut ir, &module_qname),
                _ => {}
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
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.kind() == "import_spec" {
            if let Some(path_node) = node.child_by_field_name("path") {
                deps.insert(text(path_node, src).trim_matches('"').to_string());
            }
            continue;
        }
        if matches!(node.kind(), "source_file" | "import_declaration" | "import_spec_list") {
            for i in 0..node.named_child_count() {
                if let Some(child) = node.named_child(i) {
                    stack.push(child);
                }
            }
        }
    }
    deps
}

fn extract_function(def: Node<'_>, src: &[u8], ir: &mut FileIr, module_qname: &str) {
    let Some(name_node) = def.child_by_field_name("name") else {
        return;
    };
    let name = text(name_node, src);
    let mut node = ProgramNode::new(NodeKind::Function, format!("func:{name}"), name);
    node.parent = Some(module_qname.to_string());
    node.signature = Some(signature(def, src));
    node.span = span(def);
    if let Some(body) = def.child_by_field_name("body") {
        node.body_fingerprint = fingerprint(body);
        node.features = features::extract(body, src, &SPEC);
    }
    ir.insert(node);
}

fn extract_method(def: Node<'_>, src: &[u8], ir: &mut FileIr, module_qname: &str) {
    let Some(name_node) = def.child_by_field_name("name") else {
        return;
    };
    let name = text(name_node, src);
    let receiver = receiver_type(def, src);
    let class_qname = format!("class:{receiver}");
    let qname = format!("{class_qname}.method:{name}");

    let mut node = ProgramNode::new(NodeKind::Method, qname, name);
    // Receiver types declared in another file still get a method node; the
    // parent then falls back to the module so every parent link resolves.
    node.parent = if ir.nodes.contains_key(&class_qname) {
        Some(class_qname)
    } else {
        Some(module_qname.to_string())
    };
    node.signature = Some(signature(def, src));
    node.span = span(def);
    if let Some(body) = def.child_by_field_name("body") {
        node.body_fingerprint = fingerprint(body);
        node.features = features::extract(body, src, &SPEC);
    }
    ir.insert(node);
}

/// The receiver's base type name, pointer stripped.
fn receiver_type(def: Node<'_>, src: &[u8]) -> String {
    let Some(receiver) = def.child_by_field_name("receiver") else {
        return "unknown".to_string();
    };
    for i in 0..receiver.named_child_count() {
        if let Some(decl) = receiver.named_child(i) {
            if decl.kind() == "parameter_declaration" {
                if let Some(ty) = decl.child_by_field_name("type") {
                    return text(ty, src)
                        .trim_start_matches('*')
                        .trim()
                        .to_string();
                }
            }
        }
    }
    "unknown".to_string()
}

fn extract_types(decl: Node<'_>, src: &[u8], ir: &mut FileIr, module_qname: &str) {
    for i in 0..decl.named_child_count() {
        let Some(spec) = decl.named_child(i) else {
            continue;
        };
        if spec.kind() != "type_spec" {
            continue;
        }
        let (Some(name_node), Some(ty)) = (
            spec.child_by_field_name("name"),
            spec.child_by_field_name("type"),
        ) else {
            continue;
        };
        let name = text(name_node, src);
        match ty.kind() {
            "struct_type" => {
                let qname = format!("class:{name}");
                let mut node = ProgramNode::new(NodeKind::Class, qname.clone(), name);
                node.parent = Some(module_qname.to_string());
                node.body_fingerprint = fingerprint(ty);
                node.span = span(spec);
                let qname = ir.insert(node);
                extract_struct_fields(ty, src, ir, &qname);
            }
            "interface_type" => {
                let qname = format!("interface:{name}");
                let mut node = ProgramNode::new(NodeKind::Interface, qname.clone(), name);
                node.parent = Some(module_qname.to_string());
                node.body_fingerprint = fingerprint(ty);
                node.span = span(spec);
                let qname = ir.insert(node);
                extract_interface_methods(ty, src, ir, &qname);
            }
            _ => {}
        }
    }
}

fn extract_struct_fields(struct_ty: Node<'_>, src: &[u8], ir: &mut FileIr, class_qname: &str) {
    let mut stack = vec![struct_ty];
    while let Some(node) = stack.pop() {
        if node.kind() == "field_declaration" {
            for i in 0..node.named_child_count() {
                if let Some(child) = node.named_child(i) {
                    if child.kind() == "field_identifier" {
                        let field_name = text(child, src);
                        let mut prop = ProgramNode::new(
                            NodeKind::Property,
                            format!("{class_qname}.prop:{field_name}"),
                            field_name,
                        );
                        prop.parent = Some(class_qname.to_string());
                        prop.modifiers.typed = node.child_by_field_name("type").is_some();
                        prop.span = span(node);
                        prop.body_fingerprint = fingerprint(node);
                        ir.insert(prop);
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
}

fn extract_interface_methods(iface_ty: Node<'_>, src: &[u8], ir: &mut FileIr, iface_qname: &str) {
    let mut stack = vec![iface_ty];
    while let Some(node) = stack.pop() {
        if matches!(node.kind(), "method_spec" | "method_elem") {
            if let Some(name_node) = node.child_by_field_name("name") {
                let method_name = text(name_node, src);
                let mut method = ProgramNode::new(
                    NodeKind::Method,
                    format!("{iface_qname}.method:{method_name}"),
                    method_name,
                );
                method.parent = Some(iface_qname.to_string());
                method.signature = Some(signature(node, src));
                method.span = span(node);
                ir.insert(method);
            }
            continue;
        }
        for i in 0..node.named_child_count() {
            if let Some(child) = node.named_child(i) {
                stack.push(child);
            }
        }
    }
}

fn extract_consts(decl: Node<'_>, src: &[u8], ir: &mut FileIr, module_qname: &str) {
    let mut stack = vec![decl];
    while let Some(node) = stack.pop() {
        if node.kind() == "const_spec" {
            if let Some(name_node) = node.child_by_field_name("name") {
                let const_name = text(name_node, src);
                let mut c = ProgramNode::new(
                    NodeKind::Constant,
                    format!("const:{const_name}"),
                    const_name,
                );
                c.parent = Some(module_qname.to_string());
                c.span = span(node);
                c.body_fingerprint = fingerprint(node);
                ir.insert(c);
            }
            continue;
        }
        for i in 0..node.named_child_count() {
            if let Some(child) = node.named_child(i) {
                stack.push(child);
            }
        }
    }
}

fn signature(def: Node<'_>, src: &[u8]) -> Signature {
    let mut sig = Signature {
        params: Vec::new(),
        return_type: def.child_by_field_name("result").map(|r| text(r, src)),
    };
    let Some(params) = def.child_by_field_name("parameters") else {
        return sig;
    };
    for i in 0..params.named_child_count() {
        let Some(decl) = params.named_child(i) else {
            continue;
        };
        let variadic = decl.kind() == "variadic_parameter_declaration";
        if !matches!(decl.kind(), "parameter_declaration" | "variadic_parameter_declaration") {
            continue;
        }
        let annotation = decl.child_by_field_name("type").map(|t| text(t, src));
        let mut found_name = false;
        for j in 0..decl.named_child_count() {
            if let Some(child) = decl.named_child(j) {
                if child.kind() == "identifier" {
                    found_name = true;
                    sig.params.push(Parameter {
                        name: text(child, src),
                        annotation: annotation.clone(),
                        variadic,
                        has_default: false,
                    });
                }
            }
        }
        // Unnamed parameters (interface method specs) still count.
        if !found_name {
            if let Some(annotation) = annotation {
                sig.params.push(Parameter {
                    name: annotation.clone(),
                    annotation: Some(annotation),
                    variadic,
                    has_default: false,
                });
            }
        }
    }
    sig
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> FileIr {
        GoParser.parse("server.go", source)
    }

    #[test]
    fn extracts_functions_and_imports() {
        let ir = parse(
            "package main\n\nimport (\n\t\"fmt\"\n\t\"net/http\"\n)\n\nfunc Serve(addr string) error {\n\treturn nil\n}\n",
        );
        assert!(ir.degraded.is_none());
        let module = ir.module().unwrap();
        assert!(module.dependencies.contains("fmt"));
        assert!(module.dependencies.contains("net/http"));
        let import = &ir.nodes["import:net/http"];
        assert_eq!(import.kind, NodeKind::NamespaceImport);
        assert_eq!(import.parent.as_deref(), Some("module:server"));
        let serve = &ir.nodes["func:Serve"];
        let sig = serve.signature.as_ref().unwrap();
        assert_eq!(sig.params[0].name, "addr");
        assert_eq!(sig.params[0].annotation.as_deref(), Some("string"));
        assert_eq!(sig.return_type.as_deref(), Some("error"));
    }

    #[test]
    fn methods_parent_onto_their_receiver_struct() {
        let ir = parse(
            "package main\n\ntype Server struct {\n\taddr string\n}\n\nfunc (s *Server) Start() error {\n\treturn nil\n}\n",
        );
        assert!(ir.nodes.contains_key("class:Server"));
        assert!(ir.nodes.contains_key("class:Server.prop:addr"));
        let start = &ir.nodes["class:Server.method:Start"];
        assert_eq!(start.parent.as_deref(), Some("class:Server"));
    }

    #[test]
    fn interfaces_carry_method_specs() {
        let ir = parse(
            "package main\n\ntype Handler interface {\n\tHandle(req string) error\n}\n",
        );
        assert!(ir.nodes.contains_key("interface:Handler"));
        assert!(ir.nodes.contains_key("interface:Handler.method:Handle"));
    }

    #[test]
    fn goroutines_and_defers_count_as_control_flow() {
        let ir = parse(
            "package main\n\nfunc run() {\n\tdefer cleanup()\n\tgo worker()\n\tfor i := 0; i < 3; i++ {\n\t\tif i > 1 {\n\t\t\tbreak\n\t\t}\n\t}\n}\n",
        );
        let f = &ir.nodes["func:run"];
        assert_eq!(f.features.control_flow.get("go"), Some(&1));
        assert_eq!(f.features.control_flow.get("defer"), Some(&1));
        assert_eq!(f.features.control_flow.get("for"), Some(&1));
    }
}
