//! Git-notes transport for semantic events.
//!
//! Each analyzed commit gets one JSON payload attached under a dedicated
//! notes ref so the semantic history travels with the repository. Writing
//! and reading go through libgit2; push and fetch shell out to the `git`
//! binary so the user's credential helpers apply.

use std::process::Command;

use anyhow::{Context, Result};
use git2::Signature;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::diff::{EventType, SemanticEvent};
use crate::git::SvcsRepository;
use crate::store::Store;

/// The dedicated notes ref.
pub const NOTES_REF: &str = "refs/notes/svcs-semantic";
/// Refspec used for both push and fetch.
pub const NOTES_REFSPEC: &str = "+refs/notes/svcs-semantic:refs/notes/svcs-semantic";
/// Payload format version.
pub const PAYLOAD_VERSION: &str = "1.0";

/// Producer id recorded in payloads.
pub fn analyzer_id() -> String {
    format!("svcs-rust/{}", env!("CARGO_PKG_VERSION"))
}

/// The JSON payload attached as a note to one commit.
#[allow(missing_docs)]
#[derive(Debug, Serialize, Deserialize)]
pub struct NotePayload {
    pub version: String,
    pub commit_hash: String,
    /// Unix seconds at serialization time.
    pub timestamp: i64,
    pub analyzer: String,
    pub semantic_events: Vec<NoteEvent>,
}

/// One event as serialized into a note. `event_type` stays a plain string
/// here so a payload from a newer producer deserializes; unknown types are
/// rejected at import instead.
#[allow(missing_docs)]
#[derive(Debug, Serialize, Deserialize)]
pub struct NoteEvent {
    pub event_type: String,
    pub node_id: String,
    pub location: String,
    pub details: String,
    pub layer: String,
    pub layer_description: String,
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<String>,
}

impl NoteEvent {
    pub fn from_event(event: &SemanticEvent) -> Self {
        let layer = event.layer();
        Self {
            event_type: event.event_type.as_str().to_string(),
            node_id: event.node_id.clone(),
            location: event.location.clone(),
            details: event.details.clone(),
            layer: layer.as_str().to_string(),
            layer_description: layer.description().to_string(),
            confidence: event.confidence,
            reasoning: event.reasoning.clone(),
            impact: event.impact.clone(),
        }
    }

    /// Back to a typed event; `None` when the type is outside the alphabet.
    pub fn into_event(self) -> Option<SemanticEvent> {
        let event_type = EventType::parse(&self.event_type)?;
        Some(SemanticEvent {
            event_type,
            node_id: self.node_id,
            location: self.location,
            details: self.details,
            confidence: self.confidence,
            reasoning: self.reasoning,
            impact: self.impact,
        })
    }
}

/// Counters from a note import run.
#[allow(missing_docs)]
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub commits_imported: usize,
    pub events_inserted: usize,
    pub commits_skipped_unknown: usize,
    pub events_rejected: usize,
}

/// Note operations bound to one repository.
pub struct Notes<'r> {
    repo: &'r SvcsRepository,
}

impl<'r> Notes<'r> {
    /// Bind note operations to a repository.
    pub fn new(repo: &'r SvcsRepository) -> Self {
        Self { repo }
    }

    /// Attach `events` as the commit's note, overwriting any existing one.
    pub fn write(&self, commit_hash: &str, events: &[SemanticEvent]) -> Result<()> {
        let payload = NotePayload {
            version: PAYLOAD_VERSION.to_string(),
            commit_hash: commit_hash.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
            analyzer: analyzer_id(),
            semantic_events: events.iter().map(NoteEvent::from_event).collect(),
        };
        let content = serde_json::to_string(&payload).context("Failed to serialize note payload")?;

        let oid = git2::Oid::from_str(commit_hash).context("Invalid commit hash")?;
        let git = self.repo.repository();
        let sig = git
            .signature()
            .or_else(|_| Signature::now("svcs", "svcs@localhost"))
            .context("Failed to build a signature for the note")?;
        git.note(&sig, &sig, Some(NOTES_REF), oid, &content, true)
            .context("Failed to write git note")?;
        debug!(commit = commit_hash, events = events.len(), "note written");
        Ok(())
    }

    /// Read and parse the commit's note, `None` when absent.
    pub fn read(&self, commit_hash: &str) -> Result<Option<NotePayload>> {
        let oid = git2::Oid::from_str(commit_hash).context("Invalid commit hash")?;
        let git = self.repo.repository();
        let Ok(note) = git.find_note(Some(NOTES_REF), oid) else {
            return Ok(None);
        };
        let Some(message) = note.message() else {
            return Ok(None);
        };
        let payload: NotePayload =
            serde_json::from_str(message).context("Failed to parse note payload")?;
        Ok(Some(payload))
    }

    /// Whether the local notes ref exists.
    pub fn has_local_ref(&self) -> bool {
        self.repo.has_ref(NOTES_REF)
    }

    /// Whether the remote advertises the notes ref.
    pub fn remote_has_ref(&self, remote: &str) -> Result<bool> {
        let workdir = self.repo.workdir()?;
        let output = Command::new("git")
            .args(["ls-remote", remote, NOTES_REF])
            .current_dir(&workdir)
            .output()
            .context("Failed to run git ls-remote")?;
        if !output.status.success() {
            anyhow::bail!(
                "git ls-remote failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(!output.stdout.is_empty())
    }

    /// Push the notes ref to `remote`.
    pub fn push_remote(&self, remote: &str) -> Result<()> {
        let workdir = self.repo.workdir()?;
        let output = Command::new("git")
            .args(["push", remote, NOTES_REFSPEC])
            .current_dir(&workdir)
            .output()
            .context("Failed to run git push")?;
        if !output.status.success() {
            anyhow::bail!(
                "git push of notes ref failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        info!(remote, "notes ref pushed");
        Ok(())
    }

    /// Fetch the notes ref from `remote`.
    pub fn fetch_remote(&self, remote: &str) -> Result<()> {
        let workdir = self.repo.workdir()?;
        let output = Command::new("git")
            .args(["fetch", remote, NOTES_REFSPEC])
            .current_dir(&workdir)
            .output()
            .context("Failed to run git fetch")?;
        if !output.status.success() {
            anyhow::bail!(
                "git fetch of notes ref failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        info!(remote, "notes ref fetched");
        Ok(())
    }

    /// For each commit in `commit_hashes`, read its note and merge the
    /// events into the store. Commits unknown to git are skipped with a
    /// warning; events with unknown types are rejected.
    pub fn import_into_store(
        &self,
        store: &mut Store,
        commit_hashes: &[String],
    ) -> Result<ImportReport> {
        let mut report = ImportReport::default();
        for hash in commit_hashes {
            if !self.repo.knows_commit(hash) {
                warn!(commit = %hash, "note references a commit unknown to git; skipped");
                report.commits_skipped_unknown += 1;
                continue;
            }
            let Some(payload) = self.read(hash)? else {
                continue;
            };

            let mut events = Vec::new();
            for note_event in payload.semantic_events {
                let type_name = note_event.event_type.clone();
                match note_event.into_event() {
                    Some(event) => events.push(event),
                    None => {
                        warn!(event_type = %type_name, commit = %hash, "unknown event type in note; rejected");
                        report.events_rejected += 1;
                    }
                }
            }
            if events.is_empty() {
                continue;
            }

            let oid = git2::Oid::from_str(hash).context("Invalid commit hash")?;
            let meta = self.repo.commit_meta(oid)?;
            store.record_commit(&meta)?;
            let inserted = store.merge_events(hash, &events)?;
            if inserted > 0 {
                report.commits_imported += 1;
                report.events_inserted += inserted;
            }
        }
        info!(
            commits = report.commits_imported,
            events = report.events_inserted,
            skipped = report.commits_skipped_unknown,
            "note import finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::EventType;

    #[test]
    fn note_event_round_trips() {
        let event = SemanticEvent::scored(
            EventType::CodeSimplification,
            "func:f",
            "a.py:1-3",
            "details",
            0.8,
            "reasoning",
            "impact",
        );
        let note = NoteEvent::from_event(&event);
        assert_eq!(note.event_type, "code_simplification");
        assert_eq!(note.layer, "5a");
        let back = note.into_event().unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn unknown_type_fails_conversion() {
        let note = NoteEvent {
            event_type: "invented_type".to_string(),
            node_id: "n".to_string(),
            location: "l".to_string(),
            details: "d".to_string(),
            layer: "1".to_string(),
            layer_description: "x".to_string(),
            confidence: None,
            reasoning: None,
            impact: None,
        };
        assert!(note.into_event().is_none());
    }

    #[test]
    fn payload_serializes_with_version() {
        let payload = NotePayload {
            version: PAYLOAD_VERSION.to_string(),
            commit_hash: "c".repeat(40),
            timestamp: 1_700_000_000,
            analyzer: analyzer_id(),
            semantic_events: Vec::new(),
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"version\":\"1.0\""));
        assert!(json.contains("svcs-rust/"));
        let back: NotePayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back.version, PAYLOAD_VERSION);
    }
}
