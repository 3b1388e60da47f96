//! Layer 3: body semantics compared through parser feature sets.
//!
//! Never reads raw source; everything here is a comparison of the
//! [`BodyFeatures`](crate::ir::BodyFeatures) the parsers extracted, so the
//! layer stays deterministic and cheap.

use std::collections::BTreeMap;

use super::event::{EventType, SemanticEvent};
use super::{DiffContext, NodePair};

/// Emit layer 3 events for pairs whose bodies differ.
pub fn emit(ctx: &DiffContext<'_>, pairs: &[NodePair<'_>]) -> Vec<SemanticEvent> {
    let mut events = Vec::new();
    for pair in pairs {
        if pair.body_unchanged() {
            continue;
        }
        emit_pair(ctx, pair, &mut events);
    }
    events
}

fn emit_pair(ctx: &DiffContext<'_>, pair: &NodePair<'_>, events: &mut Vec<SemanticEvent>) {
    let before = &pair.before.features;
    let after = &pair.after.features;
    let location = ctx.node_location(pair.after);
    let qname = pair.qualified_name;

    if before.control_flow != after.control_flow {
        events.push(SemanticEvent::deterministic(
            EventType::ControlFlowChanged,
            qname,
            location.clone(),
            format!(
                "{} -> {}",
                fmt_histogram(&before.control_flow),
                fmt_histogram(&after.control_flow)
            ),
        ));
    }

    match (before.is_generator(), after.is_generator()) {
        (false, true) => events.push(SemanticEvent::deterministic(
            EventType::FunctionMadeGenerator,
            qname,
            location.clone(),
            format!("'{}' now yields", pair.after.name),
        )),
        (true, false) => events.push(SemanticEvent::deterministic(
            EventType::GeneratorMadeFunction,
            qname,
            location.clone(),
            format!("'{}' no longer yields", pair.after.name),
        )),
        (true, true) if before.yield_count != after.yield_count => {
            events.push(SemanticEvent::deterministic(
                EventType::YieldPatternChanged,
                qname,
                location.clone(),
                format!("{} -> {} yield points", before.yield_count, after.yield_count),
            ));
        }
        _ => {}
    }

    if before.return_shapes != after.return_shapes || before.return_count != after.return_count {
        events.push(SemanticEvent::deterministic(
            EventType::ReturnPatternChanged,
            qname,
            location.clone(),
            format!(
                "{}x{{{}}} -> {}x{{{}}}",
                before.return_count,
                fmt_set(&before.return_shapes),
                after.return_count,
                fmt_set(&after.return_shapes)
            ),
        ));
    }

    match (before.has_handlers(), after.has_handlers()) {
        (false, true) => events.push(SemanticEvent::deterministic(
            EventType::ExceptionHandlingAdded,
            qname,
            location.clone(),
            format!("handles {{{}}}", fmt_set(&after.handled_exceptions)),
        )),
        (true, false) => events.push(SemanticEvent::deterministic(
            EventType::ExceptionHandlingRemoved,
            qname,
            location.clone(),
            format!("no longer handles {{{}}}", fmt_set(&before.handled_exceptions)),
        )),
        (true, true)
            if before.handled_exceptions != after.handled_exceptions
                || before.handler_count != after.handler_count =>
        {
            events.push(SemanticEvent::deterministic(
                EventType::ExceptionHandlingChanged,
                qname,
                location.clone(),
                format!(
                    "{{{}}} -> {{{}}}",
                    fmt_set(&before.handled_exceptions),
                    fmt_set(&after.handled_exceptions)
                ),
            ));
        }
        _ => {}
    }

    // A first try block anywhere in the body, handlers or not.
    let before_try = before.control_flow.get("try").copied().unwrap_or(0);
    let after_try = after.control_flow.get("try").copied().unwrap_or(0);
    if before_try == 0 && after_try > 0 {
        events.push(SemanticEvent::deterministic(
            EventType::ErrorHandlingIntroduced,
            qname,
            location.clone(),
            format!("'{}' gained its first try block", pair.after.name),
        ));
    }

    for callee in after.internal_calls.difference(&before.internal_calls) {
        events.push(SemanticEvent::deterministic(
            EventType::InternalCallAdded,
            qname,
            location.clone(),
            callee.clone(),
        ));
    }
    for callee in before.internal_calls.difference(&after.internal_calls) {
        events.push(SemanticEvent::deterministic(
            EventType::InternalCallRemoved,
            qname,
            location.clone(),
            callee.clone(),
        ));
    }

    if before.comprehension_count != after.comprehension_count {
        events.push(SemanticEvent::deterministic(
            EventType::ComprehensionUsageChanged,
            qname,
            location.clone(),
            format!(
                "{} -> {} comprehensions",
                before.comprehension_count, after.comprehension_count
            ),
        ));
    }
    if before.lambda_count != after.lambda_count {
        events.push(SemanticEvent::deterministic(
            EventType::LambdaUsageChanged,
            qname,
            location.clone(),
            format!("{} -> {} lambdas", before.lambda_count, after.lambda_count),
        ));
    }

    if before.global_names != after.global_names {
        events.push(SemanticEvent::deterministic(
            EventType::GlobalScopeChanged,
            qname,
            location.clone(),
            format!(
                "{{{}}} -> {{{}}}",
                fmt_set(&before.global_names),
                fmt_set(&after.global_names)
            ),
        ));
    }
    if before.nonlocal_names != after.nonlocal_names {
        events.push(SemanticEvent::deterministic(
            EventType::NonlocalScopeChanged,
            qname,
            location,
            format!(
                "{{{}}} -> {{{}}}",
                fmt_set(&before.nonlocal_names),
                fmt_set(&after.nonlocal_names)
            ),
        ));
    }
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

fn fmt_set(set: &std::collections::BTreeSet<String>) -> String {
    set.iter().cloned().collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ParserRegistry;

    fn events_for(before: &str, after: &str) -> Vec<SemanticEvent> {
        let registry = ParserRegistry::new();
        let before_ir = registry.parse("m.py", before).unwrap();
        let after_ir = registry.parse("m.py", after).unwrap();
        let ctx = DiffContext {
            file_path: "m.py",
            before: Some(&before_ir),
            after: Some(&after_ir),
            before_source: Some(before),
            after_source: Some(after),
        };
        let pairs = crate::diff::matched_pairs(&before_ir, &after_ir);
        emit(&ctx, &pairs)
    }

    #[test]
    fn generator_toggle_and_yield_pattern() {
        let made = events_for(
            "def f(n):\n    return list(range(n))\n",
            "def f(n):\n    for i in range(n):\n        yield i\n",
        );
        assert!(made
            .iter()
            .any(|e| e.event_type == EventType::FunctionMadeGenerator));

        let reshaped = events_for(
            "def f(n):\n    yield n\n",
            "def f(n):\n    yield n\n    yield n + 1\n",
        );
        assert!(reshaped
            .iter()
            .any(|e| e.event_type == EventType::YieldPatternChanged));
    }

    #[test]
    fn internal_call_tracking_per_callee() {
        let events = events_for(
            "def f(x):\n    return helper(x)\n",
            "def f(x):\n    return transform(validate(x))\n",
        );
        let added: Vec<_> = events
            .iter()
            .filter(|e| e.event_type == EventType::InternalCallAdded)
            .map(|e| e.details.as_str())
            .collect();
        assert!(added.contains(&"transform"));
        assert!(added.contains(&"validate"));
        assert!(events
            .iter()
            .any(|e| e.event_type == EventType::InternalCallRemoved && e.details == "helper"));
    }

    #[test]
    fn scope_declaration_changes() {
        let events = events_for(
            "def f():\n    return 1\n",
            "def f():\n    global counter\n    counter = 1\n    return counter\n",
        );
        assert!(events
            .iter()
            .any(|e| e.event_type == EventType::GlobalScopeChanged));
    }

    #[test]
    fn unchanged_bodies_are_skipped() {
        let events = events_for("def f(x):\n    return x\n", "def f(x):\n    return x\n");
        assert!(events.is_empty());
    }
}
