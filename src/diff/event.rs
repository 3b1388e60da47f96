//! The semantic event model: the closed event-type alphabet and the event
//! record the differ emits.
//!
//! The alphabet is a tagged enumeration with exhaustive matching; adding a
//! variant is a schema-versioned change. The store rejects any type outside
//! it at insert time.

use serde::{Deserialize, Serialize};

/// One stage of the differ pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Layer {
    /// Layer 1: file/node/dependency structure.
    Structural,
    /// Layer 2: signatures, decorators, modifiers.
    Syntactic,
    /// Layer 3: body semantics from parser feature sets.
    Semantic,
    /// Layer 4: quantitative histogram diffs.
    Behavioral,
    /// Layer 5a: heuristic patterns with confidence.
    Patterns,
    /// Layer 5b: external-model findings.
    Model,
    /// Pipeline-level markers (parse degradation).
    Core,
}

impl Layer {
    /// The short layer id stored and serialized (`"1"`..`"5b"`, `"core"`).
    pub fn as_str(self) -> &'static str {
        match self {
            Layer::Structural => "1",
            Layer::Syntactic => "2",
            Layer::Semantic => "3",
            Layer::Behavioral => "4",
            Layer::Patterns => "5a",
            Layer::Model => "5b",
            Layer::Core => "core",
        }
    }

    /// Human label recorded alongside events.
    pub fn description(self) -> &'static str {
        match self {
            Layer::Structural => "Structural analysis",
            Layer::Syntactic => "Syntactic analysis",
            Layer::Semantic => "Semantic analysis",
            Layer::Behavioral => "Behavioral analysis",
            Layer::Patterns => "AI pattern analysis",
            Layer::Model => "Model-assisted analysis",
            Layer::Core => "Core pipeline",
        }
    }

    /// Parse a stored layer id.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1" => Some(Layer::Structural),
            "2" => Some(Layer::Syntactic),
            "3" => Some(Layer::Semantic),
            "4" => Some(Layer::Behavioral),
            "5a" => Some(Layer::Patterns),
            "5b" => Some(Layer::Model),
            "core" => Some(Layer::Core),
            _ => None,
        }
    }
}

macro_rules! event_alphabet {
    ($($variant:ident => $name:literal, $layer:ident;)+) => {
        /// The closed alphabet of semantic event types, grouped by layer.
        #[allow(missing_docs)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum EventType {
            $($variant,)+
        }

        impl EventType {
            /// Every member of the alphabet, in declaration (= emission) order.
            pub const ALL: &'static [EventType] = &[$(EventType::$variant,)+];

            /// The snake_case name stored and serialized.
            pub fn as_str(self) -> &'static str {
                match self {
                    $(EventType::$variant => $name,)+
                }
            }

            /// Parse a stored string; `None` for anything outside the alphabet.
            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($name => Some(EventType::$variant),)+
                    _ => None,
                }
            }

            /// The pipeline layer this type belongs to.
            pub fn layer(self) -> Layer {
                match self {
                    $(EventType::$variant => Layer::$layer,)+
                }
            }
        }
    };
}

event_alphabet! {
    // Layer 1: structural
    FileAdded => "file_added", Structural;
    FileRemoved => "file_removed", Structural;
    NodeAdded => "node_added", Structural;
    NodeRemoved => "node_removed", Structural;
    DependencyAdded => "dependency_added", Structural;
    DependencyRemoved => "dependency_removed", Structural;

    // Layer 2: syntactic
    SignatureChanged => "signature_changed", Syntactic;
    DecoratorAdded => "decorator_added", Syntactic;
    DecoratorRemoved => "decorator_removed", Syntactic;
    FunctionMadeAsync => "function_made_async", Syntactic;
    FunctionMadeSync => "function_made_sync", Syntactic;
    InheritanceChanged => "inheritance_changed", Syntactic;
    DefaultParametersAdded => "default_parameters_added", Syntactic;
    DefaultParametersRemoved => "default_parameters_removed", Syntactic;
    TypedPropertyChanged => "typed_property_changed", Syntactic;
    VisibilityChanged => "visibility_changed", Syntactic;
    ReturnTypeChanged => "return_type_changed", Syntactic;
    ReadonlyToggled => "readonly_toggled", Syntactic;
    UnionTypesChanged => "union_types_changed", Syntactic;
    IntersectionTypesChanged => "intersection_types_changed", Syntactic;

    // Layer 3: semantic
    ControlFlowChanged => "control_flow_changed", Semantic;
    FunctionMadeGenerator => "function_made_generator", Semantic;
    GeneratorMadeFunction => "generator_made_function", Semantic;
    YieldPatternChanged => "yield_pattern_changed", Semantic;
    ReturnPatternChanged => "return_pattern_changed", Semantic;
    ExceptionHandlingAdded => "exception_handling_added", Semantic;
    ExceptionHandlingRemoved => "exception_handling_removed", Semantic;
    ExceptionHandlingChanged => "exception_handling_changed", Semantic;
    ErrorHandlingIntroduced => "error_handling_introduced", Semantic;
    InternalCallAdded => "internal_call_added", Semantic;
    InternalCallRemoved => "internal_call_removed", Semantic;
    ComprehensionUsageChanged => "comprehension_usage_changed", Semantic;
    LambdaUsageChanged => "lambda_usage_changed", Semantic;
    GlobalScopeChanged => "global_scope_changed", Semantic;
    NonlocalScopeChanged => "nonlocal_scope_changed", Semantic;

    // Layer 4: behavioral
    FunctionComplexityChanged => "function_complexity_changed", Behavioral;
    FunctionalProgrammingAdopted => "functional_programming_adopted", Behavioral;
    FunctionalProgrammingRemoved => "functional_programming_removed", Behavioral;
    FunctionalProgrammingChanged => "functional_programming_changed", Behavioral;
    AttributeAccessChanged => "attribute_access_changed", Behavioral;
    SubscriptAccessChanged => "subscript_access_changed", Behavioral;
    AssignmentPatternChanged => "assignment_pattern_changed", Behavioral;
    AugmentedAssignmentChanged => "augmented_assignment_changed", Behavioral;
    BinaryOperatorUsageChanged => "binary_operator_usage_changed", Behavioral;
    UnaryOperatorUsageChanged => "unary_operator_usage_changed", Behavioral;
    ComparisonOperatorUsageChanged => "comparison_operator_usage_changed", Behavioral;
    LogicalOperatorUsageChanged => "logical_operator_usage_changed", Behavioral;
    StringLiteralUsageChanged => "string_literal_usage_changed", Behavioral;
    NumericLiteralUsageChanged => "numeric_literal_usage_changed", Behavioral;
    BooleanLiteralUsageChanged => "boolean_literal_usage_changed", Behavioral;
    AssertionUsageChanged => "assertion_usage_changed", Behavioral;
    ClassMethodsChanged => "class_methods_changed", Behavioral;
    ClassAttributesChanged => "class_attributes_changed", Behavioral;

    // Layer 5a: heuristic patterns
    RefactoringExtractMethod => "refactoring_extract_method", Patterns;
    RefactoringInlineMethod => "refactoring_inline_method", Patterns;
    OptimizationAlgorithm => "optimization_algorithm", Patterns;
    OptimizationDataStructure => "optimization_data_structure", Patterns;
    MemoryOptimization => "memory_optimization", Patterns;
    DesignPatternImplementation => "design_pattern_implementation", Patterns;
    DesignPatternRemoval => "design_pattern_removal", Patterns;
    SecurityImprovement => "security_improvement", Patterns;
    SecurityVulnerability => "security_vulnerability", Patterns;
    PerformanceImprovement => "performance_improvement", Patterns;
    PerformanceRegression => "performance_regression", Patterns;
    ApiBreakingChange => "api_breaking_change", Patterns;
    ApiEnhancement => "api_enhancement", Patterns;
    CodeSimplification => "code_simplification", Patterns;
    CodeComplication => "code_complication", Patterns;
    ErrorHandlingImprovement => "error_handling_improvement", Patterns;
    ConcurrencyIntroduction => "concurrency_introduction", Patterns;
    ArchitectureChange => "architecture_change", Patterns;

    // Layer 5b: external model
    AlgorithmOptimized => "algorithm_optimized", Model;
    DesignPatternApplied => "design_pattern_applied", Model;
    ManualAnalysis => "manual_analysis", Model;

    // Core pipeline markers
    ParseDegraded => "parse_degraded", Core;
}

/// One record emitted by the differ.
///
/// Commit context (hash, branch, author, timestamps) is attached by the
/// store at insert time; the differ only knows about source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticEvent {
    /// Type drawn from the closed alphabet.
    pub event_type: EventType,
    /// Qualified name of the affected node, or `file:<path>` for file-level
    /// events.
    pub node_id: String,
    /// File path, optionally with a `:start-end` line span.
    pub location: String,
    /// Short human description of the change.
    pub details: String,
    /// `None` for deterministic layers; `Some` in [0, 1] for layers 5a/5b.
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<String>,
}

impl SemanticEvent {
    /// Event from a deterministic layer (1-4, core): no confidence.
    pub fn deterministic(
        event_type: EventType,
        node_id: impl Into<String>,
        location: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            node_id: node_id.into(),
            location: location.into(),
            details: details.into(),
            confidence: None,
            reasoning: None,
            impact: None,
        }
    }

    /// Event from a probabilistic layer (5a/5b), confidence clamped to [0, 1].
    pub fn scored(
        event_type: EventType,
        node_id: impl Into<String>,
        location: impl Into<String>,
        details: impl Into<String>,
        confidence: f64,
        reasoning: impl Into<String>,
        impact: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            node_id: node_id.into(),
            location: location.into(),
            details: details.into(),
            confidence: Some(confidence.clamp(0.0, 1.0)),
            reasoning: Some(reasoning.into()),
            impact: Some(impact.into()),
        }
    }

    pub fn layer(&self) -> Layer {
        self.event_type.layer()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alphabet_round_trips_through_strings() {
        for ty in EventType::ALL {
            assert_eq!(EventType::parse(ty.as_str()), Some(*ty));
        }
        assert_eq!(EventType::parse("made_up_event"), None);
    }

    #[test]
    fn alphabet_size_is_stable() {
        // Schema-versioned: growing or shrinking this is a breaking change.
        assert_eq!(EventType::ALL.len(), 75);
    }

    #[test]
    fn layers_partition_the_alphabet() {
        let deterministic = EventType::ALL
            .iter()
            .filter(|t| {
                matches!(
                    t.layer(),
                    Layer::Structural | Layer::Syntactic | Layer::Semantic | Layer::Behavioral
                )
            })
            .count();
        let scored = EventType::ALL
            .iter()
            .filter(|t| matches!(t.layer(), Layer::Patterns | Layer::Model))
            .count();
        assert_eq!(deterministic, 53);
        assert_eq!(scored, 21);
        assert_eq!(EventType::ParseDegraded.layer(), Layer::Core);
    }

    #[test]
    fn serde_names_match_as_str() {
        let json = serde_json::to_string(&EventType::FunctionMadeAsync).unwrap();
        assert_eq!(json, "\"function_made_async\"");
        let back: EventType = serde_json::from_str("\"dependency_removed\"").unwrap();
        assert_eq!(back, EventType::DependencyRemoved);
        assert!(serde_json::from_str::<EventType>("\"nope\"").is_err());
    }

    #[test]
    fn scored_confidence_is_clamped() {
        let e = SemanticEvent::scored(
            EventType::CodeSimplification,
            "func:f",
            "a.py",
            "d",
            1.7,
            "r",
            "i",
        );
        assert_eq!(e.confidence, Some(1.0));
    }
}
