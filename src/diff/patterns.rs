//! Layer 5a: heuristic pattern recognition over the deterministic event
//! stream and the paired feature sets.
//!
//! Every rule is a fixed predicate with a fixed confidence, so the layer is
//! replayable: same inputs, same events, same confidences. Events whose
//! confidence falls below the configured floor are dropped. No external
//! calls happen here.

use crate::ir::NodeKind;

use super::event::{EventType, SemanticEvent};
use super::{DiffContext, NodePair};

/// Class-name suffixes that advertise a design pattern.
const PATTERN_SUFFIXES: &[&str] = &[
    "Factory", "Builder", "Observer", "Strategy", "Singleton", "Adapter", "Decorator", "Proxy",
    "Visitor", "Command",
];

/// Call-target fragments that read as hardening.
const HARDENING_CALLS: &[&str] = &["hash", "escape", "sanitize", "bcrypt", "secrets", "hmac"];

/// Call targets that read as dangerous sinks.
const DANGEROUS_CALLS: &[&str] = &["eval", "exec", "system", "popen"];

/// Decorators that memoize.
const CACHING_DECORATORS: &[&str] = &["lru_cache", "cache", "cached", "memoize"];

/// Emit layer 5a events from the deterministic stream, dropping anything
/// below the confidence floor.
pub fn emit(
    ctx: &DiffContext<'_>,
    pairs: &[NodePair<'_>],
    prior: &[SemanticEvent],
    floor: f64,
) -> Vec<SemanticEvent> {
    let mut events = Vec::new();
    let file_id = ctx.file_id();
    let has = |ty: EventType| prior.iter().any(|e| e.event_type == ty);

    // Error handling.
    if has(EventType::ErrorHandlingIntroduced) || has(EventType::ExceptionHandlingAdded) {
        let nodes: Vec<&str> = prior
            .iter()
            .filter(|e| e.event_type == EventType::ExceptionHandlingAdded)
            .map(|e| e.node_id.as_str())
            .collect();
        events.push(SemanticEvent::scored(
            EventType::ErrorHandlingImprovement,
            nodes.first().copied().unwrap_or(file_id.as_str()),
            ctx.file_path,
            "exception handling introduced where none existed",
            0.75,
            "deterministic layers report new exception handlers",
            "failures in this path are now contained",
        ));
    }

    // Concurrency.
    if has(EventType::FunctionMadeAsync) {
        events.push(SemanticEvent::scored(
            EventType::ConcurrencyIntroduction,
            first_node(prior, EventType::FunctionMadeAsync).unwrap_or(file_id.as_str()),
            ctx.file_path,
            "synchronous code became async",
            0.85,
            "async modifier toggled on at least one callable",
            "callers must await; scheduling behavior changes",
        ));
    } else if pairs.iter().any(|p| {
        control(p.after, "go") > control(p.before, "go")
    }) {
        events.push(SemanticEvent::scored(
            EventType::ConcurrencyIntroduction,
            file_id.as_str(),
            ctx.file_path,
            "goroutines introduced",
            0.7,
            "go statements appear where there were none",
            "work now runs concurrently",
        ));
    }

    // Simplification / complication from the complexity proxy.
    let complexity_before: u32 = pairs.iter().map(|p| p.before.features.decision_points).sum();
    let complexity_after: u32 = pairs.iter().map(|p| p.after.features.decision_points).sum();
    let comprehension_gain = pairs.iter().any(|p| {
        p.after.features.comprehension_count > p.before.features.comprehension_count
    });
    let loops_dropped = pairs.iter().any(|p| {
        control(p.before, "for") + control(p.before, "while")
            > control(p.after, "for") + control(p.after, "while")
    });
    if comprehension_gain && loops_dropped {
        events.push(SemanticEvent::scored(
            EventType::CodeSimplification,
            best_simplified_node(pairs).unwrap_or(file_id.as_str()),
            ctx.file_path,
            "explicit loop replaced by a comprehension",
            0.75,
            "loop count fell while comprehension count rose",
            "same behavior, less control flow to read",
        ));
    } else if complexity_after + 2 <= complexity_before {
        events.push(SemanticEvent::scored(
            EventType::CodeSimplification,
            file_id.as_str(),
            ctx.file_path,
            format!("decision points fell {complexity_before} -> {complexity_after}"),
            0.6,
            "aggregate complexity proxy decreased",
            "lower branching density",
        ));
    }
    if complexity_after >= complexity_before + 3 {
        events.push(SemanticEvent::scored(
            EventType::CodeComplication,
            file_id.as_str(),
            ctx.file_path,
            format!("decision points rose {complexity_before} -> {complexity_after}"),
            0.6,
            "aggregate complexity proxy increased",
            "higher branching density",
        ));
    }

    // Extract / inline method.
    for added in nodes_of(prior, EventType::NodeAdded) {
        if let Some(name) = callable_name(ctx.after, added) {
            let newly_called = pairs.iter().any(|p| {
                p.after.features.internal_calls.contains(&name)
                    && !p.before.features.internal_calls.contains(&name)
            });
            if newly_called {
                events.push(SemanticEvent::scored(
                    EventType::RefactoringExtractMethod,
                    added,
                    ctx.file_path,
                    format!("'{name}' extracted and called from existing code"),
                    0.7,
                    "new callable plus new call sites to it in matched nodes",
                    "logic moved behind a named seam",
                ));
            }
        }
    }
    for removed in nodes_of(prior, EventType::NodeRemoved) {
        if let Some(name) = callable_name(ctx.before, removed) {
            let no_longer_called = pairs.iter().any(|p| {
                p.before.features.internal_calls.contains(&name)
                    && !p.after.features.internal_calls.contains(&name)
            });
            if no_longer_called {
                events.push(SemanticEvent::scored(
                    EventType::RefactoringInlineMethod,
                    removed,
                    ctx.file_path,
                    format!("'{name}' removed together with its call sites"),
                    0.65,
                    "callable deleted and former callers no longer call it",
                    "indirection removed",
                ));
            }
        }
    }

    // API surface.
    for pair in pairs {
        let (Some(before_sig), Some(after_sig)) = (&pair.before.signature, &pair.after.signature)
        else {
            continue;
        };
        if before_sig.params == after_sig.params {
            continue;
        }
        let dropped_param = before_sig
            .params
            .iter()
            .any(|bp| !after_sig.params.iter().any(|ap| ap.name == bp.name));
        let defaults_lost = after_sig.defaulted_params() < before_sig.defaulted_params();
        if dropped_param || defaults_lost {
            events.push(SemanticEvent::scored(
                EventType::ApiBreakingChange,
                pair.qualified_name,
                ctx.file_path,
                "parameters removed or defaults dropped",
                0.8,
                "existing call sites cannot satisfy the new parameter list",
                "callers must be updated",
            ));
        } else {
            let additions_defaulted = after_sig
                .params
                .iter()
                .filter(|ap| !before_sig.params.iter().any(|bp| bp.name == ap.name))
                .all(|ap| ap.has_default || ap.variadic);
            if additions_defaulted {
                events.push(SemanticEvent::scored(
                    EventType::ApiEnhancement,
                    pair.qualified_name,
                    ctx.file_path,
                    "parameters added with defaults; existing calls keep working",
                    0.7,
                    "every new parameter is optional",
                    "backwards-compatible extension",
                ));
            }
        }
    }

    // Optimizations.
    if has(EventType::FunctionMadeGenerator) {
        events.push(SemanticEvent::scored(
            EventType::MemoryOptimization,
            first_node(prior, EventType::FunctionMadeGenerator).unwrap_or(file_id.as_str()),
            ctx.file_path,
            "eager collection replaced by lazy generation",
            0.65,
            "yield points introduced in a previously plain function",
            "peak memory bound by one item, not the whole sequence",
        ));
    }
    if loops_dropped && complexity_after < complexity_before && !comprehension_gain {
        events.push(SemanticEvent::scored(
            EventType::OptimizationAlgorithm,
            file_id.as_str(),
            ctx.file_path,
            "loop structure reduced without a comprehension rewrite",
            0.6,
            "iteration constructs fell alongside the complexity proxy",
            "likely algorithmic rework",
        ));
    }
    let data_structure_calls = pairs.iter().any(|p| {
        p.after
            .features
            .internal_calls
            .difference(&p.before.features.internal_calls)
            .any(|c| matches!(c.as_str(), "set" | "dict" | "frozenset" | "Map" | "Set"))
    });
    if data_structure_calls {
        events.push(SemanticEvent::scored(
            EventType::OptimizationDataStructure,
            file_id.as_str(),
            ctx.file_path,
            "constant-time container introduced",
            0.6,
            "new calls construct set/dict-family containers",
            "lookup cost profile changes",
        ));
    }
    let caching_added = prior.iter().any(|e| {
        e.event_type == EventType::DecoratorAdded
            && CACHING_DECORATORS.iter().any(|c| e.details.contains(c))
    });
    if caching_added {
        events.push(SemanticEvent::scored(
            EventType::PerformanceImprovement,
            first_node(prior, EventType::DecoratorAdded).unwrap_or(file_id.as_str()),
            ctx.file_path,
            "memoization decorator added",
            0.75,
            "a caching decorator now wraps the callable",
            "repeated calls become cheap",
        ));
    }
    let loops_gained_sharply = pairs.iter().any(|p| {
        control(p.after, "for") + control(p.after, "while")
            >= control(p.before, "for") + control(p.before, "while") + 2
    });
    if loops_gained_sharply || complexity_after >= complexity_before + 4 {
        events.push(SemanticEvent::scored(
            EventType::PerformanceRegression,
            file_id.as_str(),
            ctx.file_path,
            "iteration depth grew sharply",
            0.6,
            "loop constructs or decision points rose steeply",
            "hot paths may slow down",
        ));
    }

    // Design patterns by class-name convention.
    for added in nodes_of(prior, EventType::NodeAdded) {
        if let Some(name) = class_name(ctx.after, added) {
            if PATTERN_SUFFIXES.iter().any(|s| name.ends_with(s)) {
                events.push(SemanticEvent::scored(
                    EventType::DesignPatternImplementation,
                    added,
                    ctx.file_path,
                    format!("class '{name}' follows a named design pattern"),
                    0.7,
                    "class name carries a well-known pattern suffix",
                    "structure signals intent to collaborators",
                ));
            }
        }
    }
    for removed in nodes_of(prior, EventType::NodeRemoved) {
        if let Some(name) = class_name(ctx.before, removed) {
            if PATTERN_SUFFIXES.iter().any(|s| name.ends_with(s)) {
                events.push(SemanticEvent::scored(
                    EventType::DesignPatternRemoval,
                    removed,
                    ctx.file_path,
                    format!("pattern class '{name}' removed"),
                    0.65,
                    "class with a pattern-suffixed name deleted",
                    "collaborators lose the seam",
                ));
            }
        }
    }

    // Security signals from new call targets.
    for pair in pairs {
        let new_calls: Vec<&String> = pair
            .after
            .features
            .internal_calls
            .difference(&pair.before.features.internal_calls)
            .collect();
        if new_calls.iter().any(|c| {
            let lower = c.to_lowercase();
            HARDENING_CALLS.iter().any(|h| lower.contains(h))
        }) {
            events.push(SemanticEvent::scored(
                EventType::SecurityImprovement,
                pair.qualified_name,
                ctx.file_path,
                "hardening primitives now called",
                0.6,
                "new call targets name hashing/escaping primitives",
                "input handling is better protected",
            ));
        }
        if new_calls.iter().any(|c| {
            let last = c.rsplit('.').next().unwrap_or(c);
            DANGEROUS_CALLS.contains(&last)
        }) {
            events.push(SemanticEvent::scored(
                EventType::SecurityVulnerability,
                pair.qualified_name,
                ctx.file_path,
                "dynamic execution sink introduced",
                0.7,
                "new call targets include eval/exec-family sinks",
                "injection surface added",
            ));
        }
    }

    // Architecture-level churn.
    let classes_added = nodes_of(prior, EventType::NodeAdded)
        .filter(|n| class_name(ctx.after, n).is_some())
        .count();
    let classes_removed = nodes_of(prior, EventType::NodeRemoved)
        .filter(|n| class_name(ctx.before, n).is_some())
        .count();
    if has(EventType::InheritanceChanged) || classes_added + classes_removed >= 2 {
        events.push(SemanticEvent::scored(
            EventType::ArchitectureChange,
            file_id.as_str(),
            ctx.file_path,
            "type hierarchy reshaped",
            0.6,
            "inheritance edges or multiple class-level nodes changed",
            "module-level structure moved",
        ));
    }

    events.retain(|e| e.confidence.unwrap_or(0.0) >= floor);
    events
}

fn control(node: &crate::ir::ProgramNode, label: &str) -> u32 {
    node.features.control_flow.get(label).copied().unwrap_or(0)
}

fn first_node(prior: &[SemanticEvent], ty: EventType) -> Option<&str> {
    prior
        .iter()
        .find(|e| e.event_type == ty)
        .map(|e| e.node_id.as_str())
}

fn nodes_of(prior: &[SemanticEvent], ty: EventType) -> impl Iterator<Item = &str> {
    prior
        .iter()
        .filter(move |e| e.event_type == ty)
        .map(|e| e.node_id.as_str())
}

/// Bare name of a callable node id in the given IR, if it is one.
fn callable_name(ir: Option<&crate::ir::FileIr>, qname: &str) -> Option<String> {
    let node = ir?.nodes.get(qname)?;
    matches!(node.kind, NodeKind::Function | NodeKind::Method).then(|| node.name.clone())
}

/// Bare name of a class-like node id in the given IR, if it is one.
fn class_name(ir: Option<&crate::ir::FileIr>, qname: &str) -> Option<String> {
    let node = ir?.nodes.get(qname)?;
    matches!(node.kind, NodeKind::Class | NodeKind::Interface | NodeKind::Trait)
        .then(|| node.name.clone())
}

/// The pair whose complexity fell the most, for simplification attribution.
fn best_simplified_node<'a>(pairs: &'a [NodePair<'_>]) -> Option<&'a str> {
    pairs
        .iter()
        .filter(|p| p.after.features.decision_points < p.before.features.decision_points)
        .max_by_key(|p| p.before.features.decision_points - p.after.features.decision_points)
        .map(|p| p.qualified_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{DiffContext, LayeredDiff};
    use crate::ir::ParserRegistry;

    fn analyze(before: &str, after: &str) -> Vec<SemanticEvent> {
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
        LayeredDiff::default().analyze(&ctx)
    }

    #[test]
    fn extract_method_detected() {
        let events = analyze(
            "def handle(req):\n    token = req.headers.get('auth')\n    if token is None:\n        return None\n    return token\n",
            "def handle(req):\n    return read_token(req)\n\ndef read_token(req):\n    token = req.headers.get('auth')\n    if token is None:\n        return None\n    return token\n",
        );
        let extract = events
            .iter()
            .find(|e| e.event_type == EventType::RefactoringExtractMethod)
            .expect("extract-method heuristic should fire");
        assert_eq!(extract.node_id, "func:read_token");
        assert!(extract.confidence.unwrap() >= 0.6);
    }

    #[test]
    fn api_breaking_vs_enhancement() {
        let breaking = analyze(
            "def f(a, b):\n    return a + b\n",
            "def f(a):\n    return a\n",
        );
        assert!(breaking
            .iter()
            .any(|e| e.event_type == EventType::ApiBreakingChange));

        let enhancement = analyze(
            "def f(a):\n    return a\n",
            "def f(a, scale=1):\n    return a * scale\n",
        );
        assert!(enhancement
            .iter()
            .any(|e| e.event_type == EventType::ApiEnhancement));
        assert!(!enhancement
            .iter()
            .any(|e| e.event_type == EventType::ApiBreakingChange));
    }

    #[test]
    fn security_sink_flagged() {
        let events = analyze(
            "def run(cmd):\n    return cmd\n",
            "def run(cmd):\n    return eval(cmd)\n",
        );
        assert!(events
            .iter()
            .any(|e| e.event_type == EventType::SecurityVulnerability));
    }

    #[test]
    fn design_pattern_by_name() {
        let events = analyze(
            "x = 1\n",
            "x = 1\n\nclass SessionFactory:\n    def build(self):\n        return object()\n",
        );
        assert!(events
            .iter()
            .any(|e| e.event_type == EventType::DesignPatternImplementation
                && e.node_id == "class:SessionFactory"));
    }

    #[test]
    fn floor_filters_low_confidence() {
        let registry = ParserRegistry::new();
        let before = "def f(a, b):\n    return a + b\n";
        let after = "def f(a):\n    return a\n";
        let before_ir = registry.parse("m.py", before).unwrap();
        let after_ir = registry.parse("m.py", after).unwrap();
        let ctx = DiffContext {
            file_path: "m.py",
            before: Some(&before_ir),
            after: Some(&after_ir),
            before_source: Some(before),
            after_source: Some(after),
        };
        let events = LayeredDiff::new(0.95).analyze(&ctx);
        assert!(events
            .iter()
            .all(|e| e.confidence.map_or(true, |c| c >= 0.95)));
    }
}
