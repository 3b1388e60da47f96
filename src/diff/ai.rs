//! Layer 5b: optional external-model analysis.
//!
//! When a provider API key is configured, a bounded slice of the before and
//! after source is posted to an Anthropic-compatible messages endpoint and
//! the structured findings come back as events. Every failure mode (missing
//! key, network error, malformed response, timeout) contributes zero events
//! and never fails the pipeline. The model identifier is prefixed onto each
//! finding's reasoning so downstream consumers can filter replicated model
//! events.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::event::{EventType, SemanticEvent};

const API_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const DEFAULT_MODEL: &str = "claude-3-5-haiku-20241022";
const MAX_SLICE_LINES: usize = 200;

/// Types the model layer is allowed to emit. Anything else in a response is
/// dropped.
const MODEL_ALPHABET: &[EventType] = &[
    EventType::AlgorithmOptimized,
    EventType::DesignPatternApplied,
    EventType::ManualAnalysis,
];

/// Provider-level errors. Internal only: callers of [`ModelProvider::analyze`]
/// never see them, they are logged and swallowed.
#[derive(Error, Debug)]
enum ModelError {
    #[error("model request failed: {0}")]
    RequestFailed(String),

    #[error("invalid response format: {0}")]
    InvalidResponse(String),

    #[error("network error: {0}")]
    Network(String),
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ModelRequest {
    model: String,
    max_tokens: i32,
    system: String,
    messages: Vec<Message>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(rename = "type")]
    content_type: String,
    text: String,
}

#[derive(Deserialize)]
struct ModelResponse {
    content: Vec<Content>,
}

/// One structured finding in the model's reply.
#[derive(Deserialize)]
struct Finding {
    event_type: String,
    #[serde(default)]
    node_id: Option<String>,
    details: String,
    confidence: f64,
    reasoning: String,
    impact: String,
}

/// The configured layer 5b provider.
pub struct ModelProvider {
    api_key: String,
    model: String,
    timeout: Duration,
}

impl ModelProvider {
    /// Provider with the given key, optional model override, and per-call
    /// timeout.
    pub fn new(api_key: String, model: Option<String>, timeout: Duration) -> Self {
        Self {
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            timeout,
        }
    }

    /// Analyze one file change. Never fails: on any error the layer
    /// contributes no events.
    pub fn analyze(&self, file_path: &str, before: &str, after: &str) -> Vec<SemanticEvent> {
        match self.request_findings(file_path, before, after) {
            Ok(events) => events,
            Err(err) => {
                warn!(file = file_path, error = %err, "model layer contributed nothing");
                Vec::new()
            }
        }
    }

    fn request_findings(
        &self,
        file_path: &str,
        before: &str,
        after: &str,
    ) -> Result<Vec<SemanticEvent>, ModelError> {
        let request = ModelRequest {
            model: self.model.clone(),
            max_tokens: 1024,
            system: SYSTEM_PROMPT.to_string(),
            messages: vec![Message {
                role: "user".to_string(),
                content: format!(
                    "File: {file_path}\n\n--- BEFORE ---\n{}\n\n--- AFTER ---\n{}\n",
                    truncate_lines(before, MAX_SLICE_LINES),
                    truncate_lines(after, MAX_SLICE_LINES),
                ),
            }],
        };

        debug!(model = %self.model, file = file_path, "sending model analysis request");

        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| ModelError::Network(e.to_string()))?;
        let response = client
            .post(API_ENDPOINT)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .map_err(|e| ModelError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(ModelError::RequestFailed(format!("HTTP {status}: {body}")));
        }

        let parsed: ModelResponse = response
            .json()
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;
        let text = parsed
            .content
            .first()
            .filter(|c| c.content_type == "text")
            .map(|c| c.text.as_str())
            .ok_or_else(|| ModelError::InvalidResponse("no text content".to_string()))?;

        Ok(self.findings_to_events(file_path, text))
    }

    /// Parse the reply's JSON array, keeping only alphabet-constrained types.
    fn findings_to_events(&self, file_path: &str, text: &str) -> Vec<SemanticEvent> {
        let json = extract_json_array(text).unwrap_or(text);
        let findings: Vec<Finding> = match serde_json::from_str(json) {
            Ok(f) => f,
            Err(err) => {
                warn!(error = %err, "model reply was not a findings array");
                return Vec::new();
            }
        };

        findings
            .into_iter()
            .filter_map(|f| {
                let ty = EventType::parse(&f.event_type)?;
                if !MODEL_ALPHABET.contains(&ty) {
                    debug!(event_type = %f.event_type, "model emitted a type outside its alphabet");
                    return None;
                }
                Some(SemanticEvent::scored(
                    ty,
                    f.node_id.unwrap_or_else(|| format!("file:{file_path}")),
                    file_path,
                    f.details,
                    f.confidence,
                    format!("model={}: {}", self.model, f.reasoning),
                    f.impact,
                ))
            })
            .collect()
    }
}

const SYSTEM_PROMPT: &str = "You review a before/after pair of one source file and report higher-level \
change findings. Reply with a JSON array only. Each element: {\"event_type\": \
\"algorithm_optimized\"|\"design_pattern_applied\"|\"manual_analysis\", \
\"node_id\": optional string, \"details\": string, \"confidence\": number 0..1, \
\"reasoning\": string, \"impact\": string}. Report nothing speculative; an \
empty array is a good answer.";

/// Cut a source blob at a natural line boundary.
fn truncate_lines(source: &str, max_lines: usize) -> String {
    let mut out = String::new();
    for (i, line) in source.lines().enumerate() {
        if i >= max_lines {
            out.push_str("… (truncated)\n");
            break;
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Models often wrap JSON in prose or fences; find the outermost array.
fn extract_json_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> ModelProvider {
        ModelProvider::new("key".to_string(), None, Duration::from_secs(30))
    }

    #[test]
    fn findings_outside_the_model_alphabet_are_dropped() {
        let reply = r#"[
            {"event_type": "algorithm_optimized", "details": "binary search", "confidence": 0.8, "reasoning": "r", "impact": "i"},
            {"event_type": "file_added", "details": "nope", "confidence": 0.9, "reasoning": "r", "impact": "i"},
            {"event_type": "not_in_alphabet", "details": "nope", "confidence": 0.9, "reasoning": "r", "impact": "i"}
        ]"#;
        let events = provider().findings_to_events("a.py", reply);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::AlgorithmOptimized);
    }

    #[test]
    fn reasoning_carries_the_model_identifier() {
        let reply = r#"[{"event_type": "manual_analysis", "details": "d", "confidence": 0.7, "reasoning": "looked at it", "impact": "i"}]"#;
        let events = provider().findings_to_events("a.py", reply);
        assert!(events[0]
            .reasoning
            .as_deref()
            .unwrap()
            .starts_with("model=claude-3-5-haiku"));
    }

    #[test]
    fn prose_wrapped_json_is_recovered() {
        let reply = "Here are the findings:\n```json\n[{\"event_type\": \"design_pattern_applied\", \"details\": \"d\", \"confidence\": 0.9, \"reasoning\": \"r\", \"impact\": \"i\"}]\n```\nDone.";
        let events = provider().findings_to_events("a.py", reply);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn garbage_reply_contributes_nothing() {
        assert!(provider().findings_to_events("a.py", "no json here").is_empty());
    }

    #[test]
    fn truncation_stops_at_line_boundary() {
        let long = "line\n".repeat(500);
        let cut = truncate_lines(&long, 10);
        assert_eq!(cut.lines().count(), 11);
        assert!(cut.ends_with("… (truncated)\n"));
    }
}
