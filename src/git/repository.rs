//! Git repository wrapper used by the analysis pipeline and hooks.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use git2::{Oid, Repository};

use crate::git::commit::{ChangeKind, CommitMeta, FileChange};

/// Wrapper around `git2::Repository` with the operations the pipeline needs.
pub struct SvcsRepository {
    repo: Repository,
}

impl SvcsRepository {
    /// Discover the repository containing `path` (hooks may run from a
    /// subdirectory of the working tree).
    pub fn discover<P: AsRef<Path>>(path: P) -> Result<Self> {
        let repo = Repository::discover(path).context("Not in a git repository")?;
        Ok(Self { repo })
    }

    /// Open the repository at exactly `path`.
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        let repo = Repository::open(path).context("Failed to open git repository")?;
        Ok(Self { repo })
    }

    /// Root of the working tree.
    pub fn workdir(&self) -> Result<PathBuf> {
        self.repo
            .workdir()
            .map(Path::to_path_buf)
            .context("Repository has no working tree")
    }

    /// Access to the underlying git2::Repository.
    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// Current branch name; `HEAD` when detached or unborn.
    pub fn current_branch(&self) -> String {
        self.repo
            .head()
            .ok()
            .and_then(|head| head.shorthand().map(str::to_string))
            .unwrap_or_else(|| "HEAD".to_string())
    }

    /// The commit HEAD points at.
    pub fn head_commit(&self) -> Result<Oid> {
        let head = self.repo.head().context("Failed to get HEAD reference")?;
        let commit = head
            .peel_to_commit()
            .context("Failed to peel HEAD to commit")?;
        Ok(commit.id())
    }

    /// Resolve a revision string to a commit id.
    pub fn resolve_commit(&self, rev: &str) -> Result<Oid> {
        let obj = self
            .repo
            .revparse_single(rev)
            .with_context(|| format!("Failed to parse revision: {rev}"))?;
        let commit = obj
            .peel_to_commit()
            .with_context(|| format!("Revision is not a commit: {rev}"))?;
        Ok(commit.id())
    }

    /// Whether the object database knows this commit.
    pub fn knows_commit(&self, hash: &str) -> bool {
        Oid::from_str(hash)
            .ok()
            .and_then(|oid| self.repo.find_commit(oid).ok())
            .is_some()
    }

    /// Commit metadata for the store.
    pub fn commit_meta(&self, oid: Oid) -> Result<CommitMeta> {
        let commit = self.repo.find_commit(oid).context("Failed to find commit")?;
        CommitMeta::from_git_commit(&commit, &self.current_branch())
    }

    /// Files changed between `commit` and one parent (or the empty tree for
    /// a root commit), modeled as status + path pairs. Rename detection is
    /// off: a rename reads as a delete plus an add.
    pub fn changed_files(&self, oid: Oid, parent_index: Option<usize>) -> Result<Vec<FileChange>> {
        let commit = self.repo.find_commit(oid).context("Failed to find commit")?;
        let commit_tree = commit.tree().context("Failed to get commit tree")?;

        let parent_tree = match parent_index {
            Some(i) => Some(
                commit
                    .parent(i)
                    .context("Failed to get parent commit")?
                    .tree()
                    .context("Failed to get parent tree")?,
            ),
            None => None,
        };

        let diff = self
            .repo
            .diff_tree_to_tree(parent_tree.as_ref(), Some(&commit_tree), None)
            .context("Failed to create diff")?;

        let mut changes = Vec::new();
        diff.foreach(
            &mut |delta, _progress| {
                let kind = match delta.status() {
                    git2::Delta::Added => ChangeKind::Added,
                    git2::Delta::Deleted => ChangeKind::Deleted,
                    git2::Delta::Modified => ChangeKind::Modified,
                    _ => ChangeKind::Other,
                };
                let path = match kind {
                    ChangeKind::Deleted => delta.old_file().path(),
                    _ => delta.new_file().path(),
                };
                if let Some(path) = path.and_then(|p| p.to_str()) {
                    changes.push(FileChange {
                        kind,
                        path: path.to_string(),
                    });
                }
                true
            },
            None,
            None,
            None,
        )
        .context("Failed to process diff")?;

        Ok(changes)
    }

    /// UTF-8 content of `path` in the given commit's tree, `None` when the
    /// path is absent or the blob is binary.
    pub fn blob_at(&self, oid: Oid, path: &str) -> Result<Option<String>> {
        let commit = self.repo.find_commit(oid).context("Failed to find commit")?;
        let tree = commit.tree().context("Failed to get commit tree")?;
        let Ok(entry) = tree.get_path(Path::new(path)) else {
            return Ok(None);
        };
        let object = entry
            .to_object(&self.repo)
            .context("Failed to load tree entry")?;
        let Some(blob) = object.as_blob() else {
            return Ok(None);
        };
        if blob.is_binary() {
            return Ok(None);
        }
        Ok(std::str::from_utf8(blob.content())
            .ok()
            .map(str::to_string))
    }

    /// Number of parents of a commit.
    pub fn parent_count(&self, oid: Oid) -> Result<usize> {
        Ok(self
            .repo
            .find_commit(oid)
            .context("Failed to find commit")?
            .parent_count())
    }

    /// Id of the i-th parent of a commit.
    pub fn parent_oid(&self, oid: Oid, index: usize) -> Result<Oid> {
        Ok(self
            .repo
            .find_commit(oid)
            .context("Failed to find commit")?
            .parent(index)
            .context("Failed to get parent commit")?
            .id())
    }

    /// Hashes reachable from HEAD, newest first.
    pub fn commits_from_head(&self) -> Result<Vec<String>> {
        let mut walker = self.repo.revwalk().context("Failed to create revwalk")?;
        walker.push_head().context("Failed to push HEAD")?;
        let mut hashes = Vec::new();
        for oid in walker {
            hashes.push(oid.context("Failed to walk commit")?.to_string());
        }
        Ok(hashes)
    }

    /// Hashes reachable from any local or remote ref: the reachable set that
    /// cleanup keeps.
    pub fn reachable_commits(&self) -> Result<HashSet<String>> {
        let mut walker = self.repo.revwalk().context("Failed to create revwalk")?;
        walker.push_glob("refs/*").context("Failed to push refs")?;
        if self.repo.head().is_ok() {
            // Detached HEAD is not under refs/*.
            walker.push_head().context("Failed to push HEAD")?;
        }
        let mut hashes = HashSet::new();
        for oid in walker {
            hashes.insert(oid.context("Failed to walk commit")?.to_string());
        }
        Ok(hashes)
    }

    /// The directory git runs hooks from, honoring `core.hooksPath`.
    pub fn hooks_dir(&self) -> Result<PathBuf> {
        if let Ok(config) = self.repo.config() {
            if let Ok(custom) = config.get_path("core.hookspath") {
                return Ok(if custom.is_absolute() {
                    custom
                } else {
                    self.workdir()?.join(custom)
                });
            }
        }
        Ok(self.repo.path().join("hooks"))
    }

    /// Whether a local reference exists.
    pub fn has_ref(&self, name: &str) -> bool {
        self.repo.find_reference(name).is_ok()
    }

    /// First configured remote, preferring `origin`.
    pub fn default_remote(&self) -> Option<String> {
        let remotes = self.repo.remotes().ok()?;
        if remotes.iter().flatten().any(|r| r == "origin") {
            return Some("origin".to_string());
        }
        remotes.iter().flatten().next().map(str::to_string)
    }
}
