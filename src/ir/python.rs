//! Python source → IR.
//!
//! Full AST walk over the tree-sitter grammar: functions, classes, methods,
//! async/generator flags, decorators, defaults, annotations, and the body
//! features the semantic layers compare.

use tree_sitter::Node;

use super::features::{self, LanguageSpec};
use super::{
    fingerprint, module_stem, ts_parser, FileIr, LanguageParser, NodeKind, Parameter, ProgramNode,
    Signature,
};

const SPEC: LanguageSpec = LanguageSpec {
    control_flow: &[
        "if_statement",
        "elif_clause",
        "for_statement",
        "while_statement",
        "try_statement",
        "match_statement",
        "with_statement",
        "conditional_expression",
    ],
    handlers: &["except_clause"],
    yields: &["yield"],
    returns: &["return_statement"],
    calls: &["call"],
    lambdas: &["lambda"],
    comprehensions: &[
        "list_comprehension",
        "set_comprehension",
        "dictionary_comprehension",
        "generator_expression",
    ],
    binary: &["binary_operator", "comparison_operator", "boolean_operator"],
    unary: &["unary_operator", "not_operator"],
    attributes: &["attribute"],
    subscripts: &["subscript"],
    assignments: &["assignment"],
    augmented: &["augmented_assignment"],
    strings: &["string"],
    numbers: &["integer", "float"],
    booleans: &["true", "false"],
    assertions: &["assert_statement"],
    globals: &["global_statement"],
    nonlocals: &["nonlocal_statement"],
    functional_builtins: &["map", "filter", "reduce"],
    nested_defs: &["function_definition", "class_definition"],
    tuple_kinds: &["tuple", "expression_list", "tuple_pattern", "pattern_list"],
};

/// Parser for `.py` / `.pyi` files.
pub struct PythonParser;

impl LanguageParser for PythonParser {
    fn language(&self) -> &'static str {
        "python"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["py", "pyi"]
    }

    fn parse(&self, path: &str, source: &str) -> FileIr {
        let language = tree_sitter_python::LANGUAGE.into();
        let Some(mut parser) = ts_parser(&language) else {
            return FileIr::degraded_empty(path, self.language(), "python grammar unavailable");
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

        walk_block(root, src, &mut ir, &module_qname, "");
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

/// Imported module names from `import x` / `from x import y` statements,
/// anywhere in the file.
fn collect_imports(root: Node<'_>, src: &[u8]) -> std::collections::BTreeSet<String> {
    let mut deps = std::collections::BTreeSet::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        match node.kind() {
            "import_statement" => {
                for i in 0..node.named_child_count() {
                    if let Some(child) = node.named_child(i) {
                        match child.kind() {
                            "dotted_name" => {
                                deps.insert(text(child, src));
                            }
                            "aliased_import" => {
                                if let Some(name) = child.child_by_field_name("name") {
                                    deps.insert(text(name, src));
                                }
                            }
                            _ => {}
                        }
                    }
                }
            }
            "import_from_statement" => {
                if let Some(module) = node.child_by_field_name("module_name") {
                    deps.insert(text(module, src));
                }
            }
            _ => {}
        }
        for i in 0..node.child_count() {
            if let Some(child) = node.child(i) {
                stack.push(child);
            }
        }
    }
    deps
}

/// Walk the statements of a module, class body, or function body, extracting
/// definitions. `qual_prefix` is prepended to qualified names of definitions
/// found here (`""` at module level, `class:Auth.` inside a class).
fn walk_block(block: Node<'_>, src: &[u8], ir: &mut FileIr, parent: &str, qual_prefix: &str) {
    for i in 0..block.named_child_count() {
        let Some(stmt) = block.named_child(i) else {
            continue;
        };
        match stmt.kind() {
            "decorated_definition" => {
                let decorators = decorator_names(stmt, src);
                if let Some(def) = stmt.child_by_field_name("definition") {
                    extract_definition(def, src, ir, parent, qual_prefix, decorators, false);
                }
            }
            "function_definition" | "class_definition" => {
                extract_definition(stmt, src, ir, parent, qual_prefix, Vec::new(), false);
            }
            _ => {}
        }
    }
}

fn decorator_names(decorated: Node<'_>, src: &[u8]) -> Vec<String> {
    let mut names = Vec::new();
    for i in 0..decorated.named_child_count() {
        if let Some(child) = decorated.named_child(i) {
            if child.kind() == "decorator" {
                if let Some(expr) = child.named_child(0) {
                    // Strip call arguments: `@lru_cache(maxsize=1)` → lru_cache
                    let name = if expr.kind() == "call" {
                        expr.child_by_field_name("function")
                            .map(|f| text(f, src))
                            .unwrap_or_else(|| text(expr, src))
                    } else {
                        text(expr, src)
                    };
                    names.push(name);
                }
            }
        }
    }
    names
}

/// Extract one `def` or `class` plus its nested definitions.
fn extract_definition(
    def: Node<'_>,
    src: &[u8],
    ir: &mut FileIr,
    parent: &str,
    qual_prefix: &str,
    decorators: Vec<String>,
    inside_class: bool,
) {
    let name = def
        .child_by_field_name("name")
        .map(|n| text(n, src))
        .unwrap_or_default();
    if name.is_empty() {
        return;
    }

    match def.kind() {
        "function_definition" => {
            let kind = if inside_class {
                NodeKind::Method
            } else {
                NodeKind::Function
            };
            let qname = format!("{qual_prefix}{}:{name}", kind.prefix());
            let mut node = ProgramNode::new(kind, qname, name);
            node.parent = Some(parent.to_string());
            node.modifiers.is_async = def.child(0).is_some_and(|c| c.kind() == "async");
            node.modifiers.is_static = decorators
                .iter()
                .any(|d| d == "staticmethod" || d == "classmethod");
            node.modifiers.is_abstract = decorators.iter().any(|d| d.contains("abstractmethod"));
            node.decorators = decorators;
            node.signature = Some(signature(def, src));
            node.span = span(def);
            if let Some(body) = def.child_by_field_name("body") {
                node.body_fingerprint = fingerprint(body);
                node.features = features::extract(body, src, &SPEC);
                node.modifiers.is_generator = node.features.is_generator();
            }
            let qname = ir.insert(node);
            ir.materialize_decorators(&qname);
            if let Some(body) = def.child_by_field_name("body") {
                walk_block(body, src, ir, &qname, &format!("{qname}."));
            }
        }
        "class_definition" => {
            let qname = format!("{qual_prefix}class:{name}");
            let mut node = ProgramNode::new(NodeKind::Class, qname, name);
            node.parent = Some(parent.to_string());
            node.decorators = decorators;
            node.bases = base_classes(def, src);
            node.span = span(def);
            if let Some(body) = def.child_by_field_name("body") {
                node.body_fingerprint = fingerprint(body);
            }
            let qname = ir.insert(node);
            ir.materialize_decorators(&qname);
            if let Some(body) = def.child_by_field_name("body") {
                extract_class_members(body, src, ir, &qname);
            }
        }
        _ => {}
    }
}

fn base_classes(class_def: Node<'_>, src: &[u8]) -> Vec<String> {
    let Some(supers) = class_def.child_by_field_name("superclasses") else {
        return Vec::new();
    };
    let mut bases = Vec::new();
    for i in 0..supers.named_child_count() {
        if let Some(base) = supers.named_child(i) {
            // Keyword arguments (metaclass=...) are not bases.
            if base.kind() != "keyword_argument" {
                bases.push(text(base, src));
            }
        }
    }
    bases
}

/// Methods, class attributes, and nested classes of a class body.
fn extract_class_members(body: Node<'_>, src: &[u8], ir: &mut FileIr, class_qname: &str) {
    let prefix = format!("{class_qname}.");
    for i in 0..body.named_child_count() {
        let Some(stmt) = body.named_child(i) else {
            continue;
        };
        match stmt.kind() {
            "decorated_definition" => {
                let decorators = decorator_names(stmt, src);
                if let Some(def) = stmt.child_by_field_name("definition") {
                    extract_definition(def, src, ir, class_qname, &prefix, decorators, true);
                }
            }
            "function_definition" | "class_definition" => {
                extract_definition(stmt, src, ir, class_qname, &prefix, Vec::new(), true);
            }
            "expression_statement" => {
                let Some(expr) = stmt.named_child(0) else {
                    continue;
                };
                if expr.kind() != "assignment" {
                    continue;
                }
                let Some(left) = expr.child_by_field_name("left") else {
                    continue;
                };
                if left.kind() != "identifier" {
                    continue;
                }
                let attr_name = text(left, src);
                let qname = format!("{prefix}prop:{attr_name}");
                let mut node = ProgramNode::new(NodeKind::Property, qname, attr_name);
                node.parent = Some(class_qname.to_string());
                node.modifiers.typed = expr.child_by_field_name("type").is_some();
                node.span = span(stmt);
                node.body_fingerprint = fingerprint(expr);
                ir.insert(node);
            }
            _ => {}
        }
    }
}

/// Canonicalized parameter list and return annotation.
fn signature(def: Node<'_>, src: &[u8]) -> Signature {
    let mut sig = Signature {
        params: Vec::new(),
        return_type: def
            .child_by_field_name("return_type")
            .map(|t| text(t, src)),
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
            "typed_parameter" => Parameter {
                name: param.named_child(0).map(|n| text(n, src)).unwrap_or_default(),
                annotation: param.child_by_field_name("type").map(|t| text(t, src)),
                variadic: param
                    .named_child(0)
                    .is_some_and(|n| n.kind().ends_with("splat_pattern")),
                ..Parameter::default()
            },
            "default_parameter" => Parameter {
                name: param
                    .child_by_field_name("name")
                    .map(|n| text(n, src))
                    .unwrap_or_default(),
                has_default: true,
                ..Parameter::default()
            },
            "typed_default_parameter" => Parameter {
                name: param
                    .child_by_field_name("name")
                    .map(|n| text(n, src))
                    .unwrap_or_default(),
                has_default: true,
                annotation: param.child_by_field_name("type").map(|t| text(t, src)),
                ..Parameter::default()
            },
            "list_splat_pattern" | "dictionary_splat_pattern" => Parameter {
                name: text(param, src).trim_start_matches('*').to_string(),
                variadic: true,
                ..Parameter::default()
            },
            // Bare `*` and `/` markers carry no parameter.
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

    fn parse(source: &str) -> FileIr {
        PythonParser.parse("greet.py", source)
    }

    #[test]
    fn extracts_module_and_function() {
        let ir = parse("def greet(name):\n    return f\"Hello, {name}!\"\n");
        assert!(ir.degraded.is_none());
        assert!(ir.nodes.contains_key("module:greet"));
        let func = &ir.nodes["func:greet"];
        assert_eq!(func.kind, NodeKind::Function);
        assert_eq!(func.parent.as_deref(), Some("module:greet"));
        let sig = func.signature.as_ref().unwrap();
        assert_eq!(sig.params.len(), 1);
        assert_eq!(sig.params[0].name, "name");
        assert!(!sig.params[0].has_default);
    }

    #[test]
    fn extracts_default_and_annotated_parameters() {
        let ir = parse("def greet(name: str, greeting=\"Hello\", *args, **kwargs):\n    pass\n");
        let sig = ir.nodes["func:greet"].signature.as_ref().unwrap();
        assert_eq!(sig.params.len(), 4);
        assert_eq!(sig.params[0].annotation.as_deref(), Some("str"));
        assert!(sig.params[1].has_default);
        assert!(sig.params[2].variadic);
        assert!(sig.params[3].variadic);
        assert_eq!(sig.defaulted_params(), 1);
    }

    #[test]
    fn extracts_class_with_methods_and_attributes() {
        let ir = parse(
            "class Auth(Base):\n    retries = 3\n\n    def login(self, user):\n        return user\n",
        );
        let class = &ir.nodes["class:Auth"];
        assert_eq!(class.bases, vec!["Base".to_string()]);
        let method = &ir.nodes["class:Auth.method:login"];
        assert_eq!(method.kind, NodeKind::Method);
        assert_eq!(method.parent.as_deref(), Some("class:Auth"));
        let prop = &ir.nodes["class:Auth.prop:retries"];
        assert_eq!(prop.kind, NodeKind::Property);
    }

    #[test]
    fn detects_async_generator_and_decorators() {
        let ir = parse(
            "@lru_cache(maxsize=1)\nasync def stream(n):\n    for i in range(n):\n        yield i\n",
        );
        let func = &ir.nodes["func:stream"];
        assert!(func.modifiers.is_async);
        assert!(func.modifiers.is_generator);
        assert_eq!(func.decorators, vec!["lru_cache".to_string()]);
        assert_eq!(func.features.yield_count, 1);
        let attr = &ir.nodes["func:stream.attr:lru_cache"];
        assert_eq!(attr.kind, NodeKind::AttributeDecorator);
        assert_eq!(attr.parent.as_deref(), Some("func:stream"));
    }

    #[test]
    fn collects_imports_as_module_dependencies() {
        let ir = parse("import os\nimport requests\nfrom pathlib import Path\n");
        let module = ir.module().unwrap();
        assert!(module.dependencies.contains("os"));
        assert!(module.dependencies.contains("requests"));
        assert!(module.dependencies.contains("pathlib"));
        // Each dependency also exists as a first-class import node.
        let import = &ir.nodes["import:requests"];
        assert_eq!(import.kind, NodeKind::NamespaceImport);
        assert_eq!(import.parent.as_deref(), Some("module:greet"));
        assert!(ir.nodes.contains_key("import:os"));
        assert!(ir.nodes.contains_key("import:pathlib"));
    }

    #[test]
    fn body_features_capture_exception_handling() {
        let ir = parse(
            "def f(x):\n    try:\n        return 1 / x\n    except ZeroDivisionError:\n        return 0\n",
        );
        let func = &ir.nodes["func:f"];
        assert!(func.features.has_handlers());
        assert!(func.features.handled_exceptions.contains("ZeroDivisionError"));
        assert_eq!(func.features.control_flow.get("try"), Some(&1));
    }

    #[test]
    fn malformed_source_degrades_without_panic() {
        let ir = parse("def broken(:\n");
        assert!(ir.degraded.is_some());
    }

    #[test]
    fn nested_functions_are_parent_qualified() {
        let ir = parse("def outer():\n    def inner():\n        pass\n    return inner\n");
        let inner = &ir.nodes["func:outer.func:inner"];
        assert_eq!(inner.parent.as_deref(), Some("func:outer"));
    }
}
