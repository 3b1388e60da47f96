//! The layered semantic differ.
//!
//! Given the before/after IR of one file (plus raw source for the model
//! layer), [`LayeredDiff::analyze`] runs five layered comparators and emits
//! an ordered stream of [`SemanticEvent`]s. Layers 1-4 are deterministic:
//! the same inputs always produce the same multiset of events. Layer 5a is
//! heuristic with fixed confidences (still replayable), layer 5b is an
//! optional external-model pass that contributes nothing on failure.

use tracing::{debug, warn};

use crate::ir::{FileIr, ProgramNode};

pub mod ai;
pub mod behavioral;
pub mod event;
pub mod patterns;
pub mod semantic;
pub mod structural;
pub mod syntactic;

pub use event::{EventType, Layer, SemanticEvent};

/// Default confidence floor for layer 5a events.
pub const DEFAULT_CONFIDENCE_FLOOR: f64 = 0.6;

/// Inputs for one file's analysis.
///
/// `None` on a side means the file does not exist in that version; an empty
/// degraded IR means it exists but could not be parsed.
#[allow(missing_docs)]
pub struct DiffContext<'a> {
    pub file_path: &'a str,
    pub before: Option<&'a FileIr>,
    pub after: Option<&'a FileIr>,
    pub before_source: Option<&'a str>,
    pub after_source: Option<&'a str>,
}

impl DiffContext<'_> {
    /// `file:<path>` id used by file-level events.
    pub fn file_id(&self) -> String {
        format!("file:{}", self.file_path)
    }

    /// Location string for a node: path plus line span when known.
    pub fn node_location(&self, node: &ProgramNode) -> String {
        if node.span == (0, 0) {
            self.file_path.to_string()
        } else {
            format!("{}:{}-{}", self.file_path, node.span.0, node.span.1)
        }
    }

    /// Whether either side's IR is degraded; layers 3/4 are suppressed then
    /// because body feature sets are unreliable.
    pub fn degraded(&self) -> bool {
        self.before.is_some_and(|ir| ir.degraded.is_some())
            || self.after.is_some_and(|ir| ir.degraded.is_some())
    }
}

/// A node present on both sides, paired by qualified name.
#[allow(missing_docs)]
pub struct NodePair<'a> {
    pub qualified_name: &'a str,
    pub before: &'a ProgramNode,
    pub after: &'a ProgramNode,
}

impl NodePair<'_> {
    /// Fast-equality check on the body fingerprints.
    pub fn body_unchanged(&self) -> bool {
        self.before.body_fingerprint == self.after.body_fingerprint
    }
}

/// Pair nodes across the two IRs by qualified name, in stable order.
pub fn matched_pairs<'a>(before: &'a FileIr, after: &'a FileIr) -> Vec<NodePair<'a>> {
    before
        .nodes
        .iter()
        .filter_map(|(qname, before_node)| {
            after.nodes.get(qname).map(|after_node| NodePair {
                qualified_name: qname,
                before: before_node,
                after: after_node,
            })
        })
        .collect()
}

/// The composed differ pipeline.
pub struct LayeredDiff {
    confidence_floor: f64,
    /// When false only layers 1-2 run (shallow analysis).
    deep: bool,
    model: Option<ai::ModelProvider>,
    /// Minimum event count from the earlier layers before the model pass is
    /// worth a call.
    model_threshold: usize,
}

impl Default for LayeredDiff {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_FLOOR)
    }
}

impl LayeredDiff {
    /// Full-depth pipeline with the given layer 5a confidence floor.
    pub fn new(confidence_floor: f64) -> Self {
        Self {
            confidence_floor,
            deep: true,
            model: None,
            model_threshold: 0,
        }
    }

    /// Restrict analysis to layers 1-2.
    pub fn shallow(mut self) -> Self {
        self.deep = false;
        self
    }

    /// Attach the optional layer 5b provider, gated on a minimum event count.
    pub fn with_model(mut self, model: Option<ai::ModelProvider>, threshold: usize) -> Self {
        self.model = model;
        self.model_threshold = threshold;
        self
    }

    /// Run all layers over one file. Never fails: a layer that cannot run is
    /// skipped and the remaining layers still contribute.
    pub fn analyze(&self, ctx: &DiffContext<'_>) -> Vec<SemanticEvent> {
        let mut events = structural::emit(ctx);
        events.extend(degradation_markers(ctx));

        let pairs = match (ctx.before, ctx.after) {
            (Some(before), Some(after)) => matched_pairs(before, after),
            _ => Vec::new(),
        };

        events.extend(syntactic::emit(ctx, &pairs));

        if !self.deep {
            return events;
        }

        if ctx.degraded() {
            debug!(
                file = ctx.file_path,
                "degraded IR; semantic and behavioral layers suppressed"
            );
        } else {
            events.extend(semantic::emit(ctx, &pairs));
            events.extend(behavioral::emit(ctx, &pairs));
        }

        let heuristics = patterns::emit(ctx, &pairs, &events, self.confidence_floor);
        events.extend(heuristics);

        if let Some(model) = &self.model {
            if events.len() < self.model_threshold {
                debug!(
                    file = ctx.file_path,
                    events = events.len(),
                    "below model threshold; layer 5b skipped"
                );
            } else {
                match ctx.after_source {
                    Some(after_src) => {
                        events.extend(model.analyze(
                            ctx.file_path,
                            ctx.before_source.unwrap_or(""),
                            after_src,
                        ));
                    }
                    None => warn!(file = ctx.file_path, "model layer skipped; no after source"),
                }
            }
        }

        events
    }
}

/// `parse_degraded` markers for sides whose parser could not fully recover
/// the syntax.
fn degradation_markers(ctx: &DiffContext<'_>) -> Vec<SemanticEvent> {
    let mut events = Vec::new();
    let mut push = |side: &str, ir: &FileIr| {
        if let Some(detail) = &ir.degraded {
            events.push(SemanticEvent::deterministic(
                EventType::ParseDegraded,
                ctx.file_id(),
                ctx.file_path,
                format!("{side} version: {detail}"),
            ));
        }
    };
    if let Some(before) = ctx.before {
        push("before", before);
    }
    if let Some(after) = ctx.after {
        push("after", after);
    }
    events
}
