//! Commit metadata and per-commit file changes.

use anyhow::Result;
use git2::Commit;
use serde::{Deserialize, Serialize};

/// Commit record persisted by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitMeta {
    /// Full SHA-1 hash of the commit.
    pub hash: String,
    /// Branch name at the time of analysis.
    pub branch: String,
    /// Author name and email address.
    pub author: String,
    /// Author timestamp, unix seconds.
    pub timestamp: i64,
    /// The commit message as written.
    pub message: String,
    /// Parent commit hashes in order.
    pub parent_hashes: Vec<String>,
}

impl CommitMeta {
    /// Build from a `git2::Commit`.
    pub fn from_git_commit(commit: &Commit<'_>, branch: &str) -> Result<Self> {
        let author = format!(
            "{} <{}>",
            commit.author().name().unwrap_or("Unknown"),
            commit.author().email().unwrap_or("unknown@example.com")
        );
        Ok(Self {
            hash: commit.id().to_string(),
            branch: branch.to_string(),
            author,
            timestamp: commit.author().when().seconds(),
            message: commit.message().unwrap_or("").to_string(),
            parent_hashes: commit.parent_ids().map(|id| id.to_string()).collect(),
        })
    }
}

/// How one file changed within a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    /// Copies, type changes, and everything else the differ skips.
    Other,
}

/// One changed file within a commit/parent diff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    pub kind: ChangeKind,
    /// Path relative to the repository root.
    pub path: String,
}
