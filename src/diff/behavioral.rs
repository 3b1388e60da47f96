//! Layer 4: quantitative histogram diffs for matched pairs.

use std::collections::{BTreeMap, BTreeSet};

use crate::ir::NodeKind;

use super::event::{EventType, SemanticEvent};
use super::{DiffContext, NodePair};

/// Emit layer 4 events for matched pairs, plus class-member rollups.
pub fn emit(ctx: &DiffContext<'_>, pairs: &[NodePair<'_>]) -> Vec<SemanticEvent> {
    let mut events = Vec::new();
    for pair in pairs {
        if !pair.body_unchanged() {
            emit_pair(ctx, pair, &mut events);
        }
        if matches!(pair.after.kind, NodeKind::Class | NodeKind::Interface | NodeKind::Trait) {
            emit_class_rollup(ctx, pair, &mut events);
        }
    }
    events
}

fn emit_pair(ctx: &DiffContext<'_>, pair: &NodePair<'_>, events: &mut Vec<SemanticEvent>) {
    let before = &pair.before.features;
    let after = &pair.after.features;
    let location = ctx.node_location(pair.after);
    let qname = pair.qualified_name;

    if before.decision_points != after.decision_points {
        events.push(SemanticEvent::deterministic(
            EventType::FunctionComplexityChanged,
            qname,
            location.clone(),
            format!(
                "{} -> {} decision points",
                before.decision_points, after.decision_points
            ),
        ));
    }

    let before_fp = before.functional_constructs();
    let after_fp = after.functional_constructs();
    match (before_fp, after_fp) {
        (0, n) if n > 0 => events.push(SemanticEvent::deterministic(
            EventType::FunctionalProgrammingAdopted,
            qname,
            location.clone(),
            format!("{n} functional constructs introduced"),
        )),
        (n, 0) if n > 0 => events.push(SemanticEvent::deterministic(
            EventType::FunctionalProgrammingRemoved,
            qname,
            location.clone(),
            format!("{n} functional constructs removed"),
        )),
        (b, a) if b != a => events.push(SemanticEvent::deterministic(
            EventType::FunctionalProgrammingChanged,
            qname,
            location.clone(),
            format!("{b} -> {a} functional constructs"),
        )),
        _ => {}
    }

    let histograms: [(EventType, &BTreeMap<String, u32>, &BTreeMap<String, u32>); 8] = [
        (EventType::AttributeAccessChanged, &before.attribute_reads, &after.attribute_reads),
        (EventType::SubscriptAccessChanged, &before.subscript_reads, &after.subscript_reads),
        (
            EventType::AssignmentPatternChanged,
            &before.assignment_shapes,
            &after.assignment_shapes,
        ),
        (EventType::AugmentedAssignmentChanged, &before.augmented_ops, &after.augmented_ops),
        (EventType::BinaryOperatorUsageChanged, &before.binary_ops, &after.binary_ops),
        (EventType::UnaryOperatorUsageChanged, &before.unary_ops, &after.unary_ops),
        (
            EventType::ComparisonOperatorUsageChanged,
            &before.comparison_ops,
            &after.comparison_ops,
        ),
        (EventType::LogicalOperatorUsageChanged, &before.logical_ops, &after.logical_ops),
    ];
    for (ty, b, a) in histograms {
        if b != a {
            events.push(SemanticEvent::deterministic(
                ty,
                qname,
                location.clone(),
                format!("{} -> {}", fmt_histogram(b), fmt_histogram(a)),
            ));
        }
    }

    let counts: [(EventType, u32, u32, &str); 4] = [
        (
            EventType::StringLiteralUsageChanged,
            before.string_literals,
            after.string_literals,
            "string literals",
        ),
        (
            EventType::NumericLiteralUsageChanged,
            before.numeric_literals,
            after.numeric_literals,
            "numeric literals",
        ),
        (
            EventType::BooleanLiteralUsageChanged,
            before.boolean_literals,
            after.boolean_literals,
            "boolean literals",
        ),
        (
            EventType::AssertionUsageChanged,
            before.assertion_count,
            after.assertion_count,
            "assertions",
        ),
    ];
    for (ty, b, a, label) in counts {
        if b != a {
            events.push(SemanticEvent::deterministic(
                ty,
                qname,
                location.clone(),
                format!("{b} -> {a} {label}"),
            ));
        }
    }
}

/// Rollup of a class's direct member sets, on top of the per-member events.
fn emit_class_rollup(ctx: &DiffContext<'_>, pair: &NodePair<'_>, events: &mut Vec<SemanticEvent>) {
    let (Some(before_ir), Some(after_ir)) = (ctx.before, ctx.after) else {
        return;
    };
    let location = ctx.node_location(pair.after);
    let qname = pair.qualified_name;

    let before_methods = member_names(before_ir, qname, NodeKind::Method);
    let after_methods = member_names(after_ir, qname, NodeKind::Method);
    if before_methods != after_methods {
        events.push(SemanticEvent::deterministic(
            EventType::ClassMethodsChanged,
            qname,
            location.clone(),
            member_delta(&before_methods, &after_methods),
        ));
    }

    let before_attrs = member_names(before_ir, qname, NodeKind::Property);
    let after_attrs = member_names(after_ir, qname, NodeKind::Property);
    if before_attrs != after_attrs {
        events.push(SemanticEvent::deterministic(
            EventType::ClassAttributesChanged,
            qname,
            location,
            member_delta(&before_attrs, &after_attrs),
        ));
    }
}

fn member_names(ir: &crate::ir::FileIr, class_qname: &str, kind: NodeKind) -> BTreeSet<String> {
    ir.nodes
        .values()
        .filter(|n| n.kind == kind && n.parent.as_deref() == Some(class_qname))
        .map(|n| n.name.clone())
        .collect()
}

fn member_delta(before: &BTreeSet<String>, after: &BTreeSet<String>) -> String {
    let added: Vec<_> = after.difference(before).cloned().collect();
    let removed: Vec<_> = before.difference(after).cloned().collect();
    let mut parts = Vec::new();
    if !added.is_empty() {
        parts.push(format!("+{}", added.join(",+")));
    }
    if !removed.is_empty() {
        parts.push(format!("-{}", removed.join(",-")));
    }
    parts.join(" ")
}

fn fmt_histogram(map: &BTreeMap<String, u32>) -> String {
    if map.is_empty() {
        return "none".to_string();
    }
    map.iter()
        .map(|(k, v)| format!("{k}:{v}"))
        .collect::<Vec<_>>()
        .join(",")
}
