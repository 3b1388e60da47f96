//! Layer 2: signatures, decorators, modifiers, inheritance.
//!
//! One event per facet that differs on a matched pair. A single edit may
//! legitimately produce several events (signature + return type); all are
//! emitted, ordered by the alphabet's declaration order.

use std::collections::BTreeMap;

use crate::ir::{NodeKind, Signature};

use super::event::{EventType, SemanticEvent};
use super::{DiffContext, NodePair};

/// Emit layer 2 events for every matched pair.
pub fn emit(ctx: &DiffContext<'_>, pairs: &[NodePair<'_>]) -> Vec<SemanticEvent> {
    let mut events = Vec::new();
    for pair in pairs {
        emit_pair(ctx, pair, &mut events);
    }
    events
}

fn emit_pair(ctx: &DiffContext<'_>, pair: &NodePair<'_>, events: &mut Vec<SemanticEvent>) {
    let before = pair.before;
    let after = pair.after;
    let location = ctx.node_location(after);
    let qname = pair.qualified_name;

    if let (Some(before_sig), Some(after_sig)) = (&before.signature, &after.signature) {
        if before_sig.params != after_sig.params {
            events.push(SemanticEvent::deterministic(
                EventType::SignatureChanged,
                qname,
                location.clone(),
                format!(
                    "({}) -> ({})",
                    fmt_params(before_sig),
                    fmt_params(after_sig)
                ),
            ));
        }
    }

    let before_decorators = counted(&before.decorators);
    let after_decorators = counted(&after.decorators);
    for (name, &count) in &after_decorators {
        let prior = before_decorators.get(name).copied().unwrap_or(0);
        for _ in prior..count {
            events.push(SemanticEvent::deterministic(
                EventType::DecoratorAdded,
                qname,
                location.clone(),
                (*name).to_string(),
            ));
        }
    }
    for (name, &count) in &before_decorators {
        let now = after_decorators.get(name).copied().unwrap_or(0);
        for _ in now..count {
            events.push(SemanticEvent::deterministic(
                EventType::DecoratorRemoved,
                qname,
                location.clone(),
                (*name).to_string(),
            ));
        }
    }

    if !before.modifiers.is_async && after.modifiers.is_async {
        events.push(SemanticEvent::deterministic(
            EventType::FunctionMadeAsync,
            qname,
            location.clone(),
            format!("{} '{}' became async", after.kind.label(), after.name),
        ));
    }
    if before.modifiers.is_async && !after.modifiers.is_async {
        events.push(SemanticEvent::deterministic(
            EventType::FunctionMadeSync,
            qname,
            location.clone(),
            format!("{} '{}' became synchronous", after.kind.label(), after.name),
        ));
    }

    if matches!(
        after.kind,
        NodeKind::Class | NodeKind::Interface | NodeKind::Trait | NodeKind::Enum
    ) && before.bases != after.bases
    {
        events.push(SemanticEvent::deterministic(
            EventType::InheritanceChanged,
            qname,
            location.clone(),
            format!("[{}] -> [{}]", before.bases.join(", "), after.bases.join(", ")),
        ));
    }

    if let (Some(before_sig), Some(after_sig)) = (&before.signature, &after.signature) {
        let before_defaults = before_sig.defaulted_params();
        let after_defaults = after_sig.defaulted_params();
        if after_defaults > before_defaults {
            events.push(SemanticEvent::deterministic(
                EventType::DefaultParametersAdded,
                qname,
                location.clone(),
                format!("{before_defaults} -> {after_defaults} defaulted parameters"),
            ));
        }
        if after_defaults < before_defaults {
            events.push(SemanticEvent::deterministic(
                EventType::DefaultParametersRemoved,
                qname,
                location.clone(),
                format!("{before_defaults} -> {after_defaults} defaulted parameters"),
            ));
        }
    }

    if after.kind == NodeKind::Property && before.modifiers.typed != after.modifiers.typed {
        events.push(SemanticEvent::deterministic(
            EventType::TypedPropertyChanged,
            qname,
            location.clone(),
            if after.modifiers.typed {
                "property gained a type declaration"
            } else {
                "property lost its type declaration"
            },
        ));
    }

    if before.modifiers.visibility != after.modifiers.visibility {
        events.push(SemanticEvent::deterministic(
            EventType::VisibilityChanged,
            qname,
            location.clone(),
            format!(
                "{} -> {}",
                before.modifiers.visibility.map_or("unspecified", |v| v.as_str()),
                after.modifiers.visibility.map_or("unspecified", |v| v.as_str()),
            ),
        ));
    }

    let before_return = before.signature.as_ref().and_then(|s| s.return_type.as_deref());
    let after_return = after.signature.as_ref().and_then(|s| s.return_type.as_deref());
    if before.signature.is_some() && after.signature.is_some() && before_return != after_return {
        events.push(SemanticEvent::deterministic(
            EventType::ReturnTypeChanged,
            qname,
            location.clone(),
            format!(
                "{} -> {}",
                before_return.unwrap_or("(none)"),
                after_return.unwrap_or("(none)")
            ),
        ));
    }

    if before.modifiers.readonly != after.modifiers.readonly {
        events.push(SemanticEvent::deterministic(
            EventType::ReadonlyToggled,
            qname,
            location.clone(),
            if after.modifiers.readonly {
                "readonly added"
            } else {
                "readonly removed"
            },
        ));
    }

    if before.modifiers.union_types != after.modifiers.union_types {
        events.push(SemanticEvent::deterministic(
            EventType::UnionTypesChanged,
            qname,
            location.clone(),
            format!(
                "{} -> {}",
                before.modifiers.union_types.join("|"),
                after.modifiers.union_types.join("|")
            ),
        ));
    }
    if before.modifiers.intersection_types != after.modifiers.intersection_types {
        events.push(SemanticEvent::deterministic(
            EventType::IntersectionTypesChanged,
            qname,
            location,
            format!(
                "{} -> {}",
                before.modifiers.intersection_types.join("&"),
                after.modifiers.intersection_types.join("&")
            ),
        ));
    }
}

fn counted(decorators: &[String]) -> BTreeMap<&str, u32> {
    let mut map = BTreeMap::new();
    for d in decorators {
        *map.entry(d.as_str()).or_insert(0) += 1;
    }
    map
}

/// Compact parameter list rendering for event details.
fn fmt_params(sig: &Signature) -> String {
    sig.params
        .iter()
        .map(|p| {
            let mut s = String::new();
            if p.variadic {
                s.push('*');
            }
            s.push_str(&p.name);
            if let Some(annotation) = &p.annotation {
                s.push_str(": ");
                s.push_str(annotation);
            }
            if p.has_default {
                s.push_str("=…");
            }
            s
        })
        .collect::<Vec<_>>()
        .join(", ")
}
