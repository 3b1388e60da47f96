//! Intermediate representation of parsed source files.
//!
//! Each parser turns one version of one file into a [`FileIr`]: a flat,
//! single-run collection of [`ProgramNode`]s keyed by qualified name. Parent
//! links are qualified-name strings, never owned references, so the IR stays
//! arena-local and trivially cloneable. IRs are produced per analysis run and
//! never persisted.

use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::time::Duration;

use serde::Serialize;

pub mod features;
pub mod go;
pub mod javascript;
pub mod php;
pub mod python;

pub use features::BodyFeatures;

/// Soft per-file parsing timeout. Files that exceed it degrade to an empty IR
/// instead of stalling the hook.
pub const PARSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Kind of program construct a node represents.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Module,
    Function,
    Method,
    Class,
    Interface,
    Trait,
    Enum,
    EnumCase,
    Property,
    Constant,
    NamespaceImport,
    AttributeDecorator,
}

impl NodeKind {
    /// Human label used in event details.
    pub fn label(self) -> &'static str {
        match self {
            NodeKind::Module => "module",
            NodeKind::Function => "function",
            NodeKind::Method => "method",
            NodeKind::Class => "class",
            NodeKind::Interface => "interface",
            NodeKind::Trait => "trait",
            NodeKind::Enum => "enum",
            NodeKind::EnumCase => "enum case",
            NodeKind::Property => "property",
            NodeKind::Constant => "constant",
            NodeKind::NamespaceImport => "import",
            NodeKind::AttributeDecorator => "decorator",
        }
    }

    /// Qualified-name prefix for this kind (`func:` in `func:greet`).
    pub fn prefix(self) -> &'static str {
        match self {
            NodeKind::Module => "module",
            NodeKind::Function => "func",
            NodeKind::Method => "method",
            NodeKind::Class => "class",
            NodeKind::Interface => "interface",
            NodeKind::Trait => "trait",
            NodeKind::Enum => "enum",
            NodeKind::EnumCase => "case",
            NodeKind::Property => "prop",
            NodeKind::Constant => "const",
            NodeKind::NamespaceImport => "import",
            NodeKind::AttributeDecorator => "attr",
        }
    }
}

/// One formal parameter of a function or method.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Parameter {
    /// Parameter name with any sigils stripped.
    pub name: String,
    /// Whether a default value is present.
    pub has_default: bool,
    /// Type annotation text, if any.
    pub annotation: Option<String>,
    /// `*args` / `...rest` / variadic marker.
    pub variadic: bool,
}

/// Canonicalized signature of a callable node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Signature {
    /// Parameters in declaration order.
    pub params: Vec<Parameter>,
    /// Return-type annotation text, if any.
    pub return_type: Option<String>,
}

impl Signature {
    /// Number of parameters carrying a default value.
    pub fn defaulted_params(&self) -> usize {
        self.params.iter().filter(|p| p.has_default).count()
    }
}

/// Member visibility for languages that declare it.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Protected,
    Private,
}

impl Visibility {
    /// The keyword as written in source.
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Protected => "protected",
            Visibility::Private => "private",
        }
    }
}

/// Modifier set attached to a node.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Modifiers {
    pub is_async: bool,
    pub is_generator: bool,
    pub is_static: bool,
    pub is_abstract: bool,
    pub readonly: bool,
    pub visibility: Option<Visibility>,
    /// Property carries an explicit type (PHP typed properties, TS fields).
    pub typed: bool,
    /// Type is nullable (`?T`).
    pub nullable: bool,
    /// Members of a union type annotation, sorted.
    pub union_types: Vec<String>,
    /// Members of an intersection type annotation, sorted.
    pub intersection_types: Vec<String>,
}

/// A named program construct extracted by a parser.
#[derive(Debug, Clone, Serialize)]
pub struct ProgramNode {
    pub kind: NodeKind,
    /// Unique id within the file's IR, e.g. `class:Auth.method:login`.
    pub qualified_name: String,
    /// Bare declared name.
    pub name: String,
    /// Qualified name of the enclosing node; `None` only for the module node.
    pub parent: Option<String>,
    /// Present for callable kinds.
    pub signature: Option<Signature>,
    pub modifiers: Modifiers,
    /// Decorator / attribute names in declaration order.
    pub decorators: Vec<String>,
    /// Base classes / implemented interfaces for class-like kinds.
    pub bases: Vec<String>,
    /// Imported module names; populated on the module node only.
    pub dependencies: BTreeSet<String>,
    /// Structural hash of the body AST. Fast-equality only, never
    /// authoritative for change detection.
    pub body_fingerprint: u64,
    pub features: BodyFeatures,
    /// 1-based (start_line, end_line).
    pub span: (u32, u32),
}

impl ProgramNode {
    /// Construct a node with empty body-derived attributes.
    pub fn new(kind: NodeKind, qualified_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            qualified_name: qualified_name.into(),
            name: name.into(),
            parent: None,
            signature: None,
            modifiers: Modifiers::default(),
            decorators: Vec::new(),
            bases: Vec::new(),
            dependencies: BTreeSet::new(),
            body_fingerprint: 0,
            features: BodyFeatures::default(),
            span: (0, 0),
        }
    }
}

/// The parsed IR of one version of one file.
#[derive(Debug, Clone, Default)]
pub struct FileIr {
    /// Repository-relative path of the file.
    pub path: String,
    /// Language name of the parser that produced this IR.
    pub language: &'static str,
    /// Nodes keyed by qualified name. BTreeMap so iteration order is stable
    /// across runs.
    pub nodes: BTreeMap<String, ProgramNode>,
    /// `Some(detail)` when syntax was not fully recoverable and the IR is
    /// partial. The detail names the tier that produced the IR.
    pub degraded: Option<String>,
}

impl FileIr {
    /// An empty IR for a file that failed to parse entirely.
    pub fn degraded_empty(path: &str, language: &'static str, detail: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            language,
            nodes: BTreeMap::new(),
            degraded: Some(detail.into()),
        }
    }

    /// The module-level node, when present.
    pub fn module(&self) -> Option<&ProgramNode> {
        self.nodes.values().find(|n| n.kind == NodeKind::Module)
    }

    /// Materialize one `namespace_import` node per entry in the module
    /// node's dependency set. Parsers call this once, after inserting the
    /// module node.
    pub fn materialize_imports(&mut self, module_qname: &str) {
        let Some(module) = self.nodes.get(module_qname) else {
            return;
        };
        let deps: Vec<String> = module.dependencies.iter().cloned().collect();
        for dep in deps {
            let mut node =
                ProgramNode::new(NodeKind::NamespaceImport, format!("import:{dep}"), dep);
            node.parent = Some(module_qname.to_string());
            self.insert(node);
        }
    }

    /// Materialize one `attribute_decorator` node per decorator or attribute
    /// applied to `owner`, parent-qualified so the same decorator on two
    /// nodes stays distinct. Parsers call this after inserting the owner.
    pub fn materialize_decorators(&mut self, owner_qname: &str) {
        let Some(owner) = self.nodes.get(owner_qname) else {
            return;
        };
        let decorators = owner.decorators.clone();
        let span = owner.span;
        for name in decorators {
            let mut node = ProgramNode::new(
                NodeKind::AttributeDecorator,
                format!("{owner_qname}.attr:{name}"),
                name,
            );
            node.parent = Some(owner_qname.to_string());
            node.span = span;
            self.insert(node);
        }
    }

    /// Insert a node, disambiguating qualified-name collisions by occurrence
    /// index (`#2`, `#3`, ...) so overloaded or shadowed names never collide.
    pub fn insert(&mut self, mut node: ProgramNode) -> String {
        if self.nodes.contains_key(&node.qualified_name) {
            let base = node.qualified_name.clone();
            let mut n = 2;
            while self.nodes.contains_key(&format!("{base}#{n}")) {
                n += 1;
            }
            node.qualified_name = format!("{base}#{n}");
        }
        let key = node.qualified_name.clone();
        self.nodes.insert(key.clone(), node);
        key
    }
}

/// Structural fingerprint of a syntax subtree.
///
/// Hashes the s-expression of the node, which folds away concrete text but
/// keeps the tree shape. Uses a fixed-key hasher so the value is stable
/// across runs.
pub fn fingerprint(node: tree_sitter::Node<'_>) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    node.to_sexp().hash(&mut hasher);
    hasher.finish()
}

/// A language-specific source-to-IR adapter.
///
/// Parsing is total: implementations never fail. Malformed input yields a
/// best-effort IR with [`FileIr::degraded`] set.
pub trait LanguageParser: Send + Sync {
    /// Language name recorded on produced IRs.
    fn language(&self) -> &'static str;

    /// File extensions (lowercase, no dot) this parser accepts.
    fn extensions(&self) -> &'static [&'static str];

    /// Parse one version of one file.
    fn parse(&self, path: &str, source: &str) -> FileIr;
}

/// Extension-keyed dispatch over the available language parsers.
pub struct ParserRegistry {
    parsers: Vec<Box<dyn LanguageParser>>,
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ParserRegistry {
    /// Registry with all built-in languages.
    pub fn new() -> Self {
        Self {
            parsers: vec![
                Box::new(python::PythonParser),
                Box::new(javascript::JavaScriptParser),
                Box::new(php::PhpParser),
                Box::new(go::GoParser),
            ],
        }
    }

    /// Select a parser by the path's extension.
    pub fn for_path(&self, path: &str) -> Option<&dyn LanguageParser> {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())?
            .to_ascii_lowercase();
        self.parsers
            .iter()
            .map(AsRef::as_ref)
            .find(|p| p.extensions().contains(&ext.as_str()))
    }

    /// Whether any parser accepts this path.
    pub fn supports(&self, path: &str) -> bool {
        self.for_path(path).is_some()
    }

    /// Parse a file with the parser selected by extension.
    pub fn parse(&self, path: &str, source: &str) -> Option<FileIr> {
        self.for_path(path).map(|p| p.parse(path, source))
    }
}

/// Build a tree-sitter parser for `language` with the soft timeout applied.
///
/// Returns `None` when the grammar ABI is incompatible with the linked
/// tree-sitter runtime; callers degrade to an empty IR.
pub(crate) fn ts_parser(language: &tree_sitter::Language) -> Option<tree_sitter::Parser> {
    let mut parser = tree_sitter::Parser::new();
    parser.set_language(language).ok()?;
    #[allow(deprecated)]
    parser.set_timeout_micros(PARSE_TIMEOUT.as_micros() as u64);
    Some(parser)
}

/// The module stem used in `module:<stem>` qualified names.
pub(crate) fn module_stem(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_dispatches_by_extension() {
        let registry = ParserRegistry::new();
        assert_eq!(registry.for_path("a/b/app.py").map(|p| p.language()), Some("python"));
        assert_eq!(registry.for_path("x.ts").map(|p| p.language()), Some("javascript"));
        assert_eq!(registry.for_path("x.php").map(|p| p.language()), Some("php"));
        assert_eq!(registry.for_path("x.go").map(|p| p.language()), Some("go"));
        assert!(registry.for_path("x.rb").is_none());
        assert!(registry.for_path("Makefile").is_none());
    }

    #[test]
    fn insert_disambiguates_collisions() {
        let mut ir = FileIr::default();
        let a = ir.insert(ProgramNode::new(NodeKind::Function, "func:f", "f"));
        let b = ir.insert(ProgramNode::new(NodeKind::Function, "func:f", "f"));
        let c = ir.insert(ProgramNode::new(NodeKind::Function, "func:f", "f"));
        assert_eq!(a, "func:f");
        assert_eq!(b, "func:f#2");
        assert_eq!(c, "func:f#3");
        assert_eq!(ir.nodes.len(), 3);
    }

    #[test]
    fn module_stem_strips_path_and_extension() {
        assert_eq!(module_stem("src/pkg/greet.py"), "greet");
        assert_eq!(module_stem("greet.py"), "greet");
    }
}
