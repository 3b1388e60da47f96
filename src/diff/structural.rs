//! Layer 1: file, node, and dependency structure.

use crate::ir::{FileIr, NodeKind};

use super::event::{EventType, SemanticEvent};
use super::DiffContext;

/// Emit layer 1 events for one file change.
pub fn emit(ctx: &DiffContext<'_>) -> Vec<SemanticEvent> {
    let mut events = Vec::new();

    match (ctx.before, ctx.after) {
        (None, Some(after)) => {
            events.push(SemanticEvent::deterministic(
                EventType::FileAdded,
                ctx.file_id(),
                ctx.file_path,
                format!("file {} added", ctx.file_path),
            ));
            for node in after.nodes.values() {
                if tracked_kind(node.kind) {
                    events.push(node_event(ctx, EventType::NodeAdded, node, "added"));
                }
            }
        }
        (Some(before), None) => {
            events.push(SemanticEvent::deterministic(
                EventType::FileRemoved,
                ctx.file_id(),
                ctx.file_path,
                format!("file {} removed", ctx.file_path),
            ));
            for node in before.nodes.values() {
                if tracked_kind(node.kind) {
                    events.push(node_event(ctx, EventType::NodeRemoved, node, "removed"));
                }
            }
        }
        (Some(before), Some(after)) => {
            for (qname, node) in &after.nodes {
                if tracked_kind(node.kind) && !before.nodes.contains_key(qname) {
                    events.push(node_event(ctx, EventType::NodeAdded, node, "added"));
                }
            }
            for (qname, node) in &before.nodes {
                if tracked_kind(node.kind) && !after.nodes.contains_key(qname) {
                    events.push(node_event(ctx, EventType::NodeRemoved, node, "removed"));
                }
            }
            events.extend(dependency_events(ctx, before, after));
        }
        (None, None) => {}
    }

    events
}

/// Kinds that produce `node_added`/`node_removed` events. The module node is
/// covered by the file events; import and decorator nodes are covered by the
/// `dependency_*` and `decorator_*` facets, so reporting them here would say
/// the same thing twice.
fn tracked_kind(kind: NodeKind) -> bool {
    !matches!(
        kind,
        NodeKind::Module | NodeKind::NamespaceImport | NodeKind::AttributeDecorator
    )
}

fn node_event(
    ctx: &DiffContext<'_>,
    ty: EventType,
    node: &crate::ir::ProgramNode,
    verb: &str,
) -> SemanticEvent {
    SemanticEvent::deterministic(
        ty,
        node.qualified_name.clone(),
        ctx.node_location(node),
        format!("{} '{}' {verb}", node.kind.label(), node.name),
    )
}

/// Module import-set diff: one event per added/removed dependency, the
/// dependency name alone as the details.
fn dependency_events(
    ctx: &DiffContext<'_>,
    before: &FileIr,
    after: &FileIr,
) -> Vec<SemanticEvent> {
    let (Some(before_module), Some(after_module)) = (before.module(), after.module()) else {
        return Vec::new();
    };
    let mut events = Vec::new();
    for dep in after_module.dependencies.difference(&before_module.dependencies) {
        events.push(SemanticEvent::deterministic(
            EventType::DependencyAdded,
            after_module.qualified_name.clone(),
            ctx.file_path,
            dep.clone(),
        ));
    }
    for dep in before_module.dependencies.difference(&after_module.dependencies) {
        events.push(SemanticEvent::deterministic(
            EventType::DependencyRemoved,
            before_module.qualified_name.clone(),
            ctx.file_path,
            dep.clone(),
        ));
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::DiffContext;
    use crate::ir::ParserRegistry;

    #[test]
    fn dependency_change_is_not_double_reported_as_node_events() {
        let registry = ParserRegistry::new();
        let before = registry
            .parse("m.py", "import requests\n\nVALUE = 1\n")
            .unwrap();
        let after = registry.parse("m.py", "VALUE = 1\n").unwrap();
        assert!(before.nodes.contains_key("import:requests"));
        let ctx = DiffContext {
            file_path: "m.py",
            before: Some(&before),
            after: Some(&after),
            before_source: None,
            after_source: None,
        };
        let events = emit(&ctx);
        assert!(events
            .iter()
            .any(|e| e.event_type == EventType::DependencyRemoved));
        assert!(!events
            .iter()
            .any(|e| e.event_type == EventType::NodeRemoved));
    }

    #[test]
    fn file_removal_reports_every_node() {
        let registry = ParserRegistry::new();
        let ir = registry
            .parse("m.py", "def a():\n    pass\n\ndef b():\n    pass\n")
            .unwrap();
        let ctx = DiffContext {
            file_path: "m.py",
            before: Some(&ir),
            after: None,
            before_source: None,
            after_source: None,
        };
        let events = emit(&ctx);
        assert_eq!(
            events
                .iter()
                .filter(|e| e.event_type == EventType::FileRemoved)
                .count(),
            1
        );
        assert_eq!(
            events
                .iter()
                .filter(|e| e.event_type == EventType::NodeRemoved)
                .count(),
            2
        );
    }
}
