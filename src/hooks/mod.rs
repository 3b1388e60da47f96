//! Hook-driven orchestration.
//!
//! Git invokes four thin shims (post-commit, post-merge, post-checkout,
//! pre-push); each delegates here. The contract is strict: analysis and
//! transport failures are logged and swallowed so a hook never blocks the
//! git operation that triggered it. Re-running any hook is safe: commit
//! analysis replaces the commit's event set and note import deduplicates.

use std::path::Path;

use anyhow::{Context, Result};
use git2::Oid;
use tracing::{debug, error, info, warn};

use crate::config::{AnalysisDepth, SvcsConfig};
use crate::diff::{DiffContext, LayeredDiff, DEFAULT_CONFIDENCE_FLOOR};
use crate::git::{ChangeKind, SvcsRepository};
use crate::ir::ParserRegistry;
use crate::notes::{ImportReport, Notes};
use crate::store::Store;

/// The git lifecycle points svcs hooks into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    PostCommit,
    PostMerge,
    PostCheckout,
    PrePush,
}

impl HookKind {
    /// All hook kinds, in installation order.
    pub const ALL: &'static [HookKind] = &[
        HookKind::PostCommit,
        HookKind::PostMerge,
        HookKind::PostCheckout,
        HookKind::PrePush,
    ];

    /// The git hook file name.
    pub fn as_str(self) -> &'static str {
        match self {
            HookKind::PostCommit => "post-commit",
            HookKind::PostMerge => "post-merge",
            HookKind::PostCheckout => "post-checkout",
            HookKind::PrePush => "pre-push",
        }
    }

    /// Parse a hook file name.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == s)
    }
}

/// Run one hook. Always returns exit code 0; failures are logged only.
pub fn run_hook(kind: HookKind, args: &[String], cwd: &Path) -> i32 {
    match Analyzer::open(cwd).and_then(|mut analyzer| analyzer.run(kind, args)) {
        Ok(()) => {}
        Err(err) => {
            error!(hook = kind.as_str(), error = %err, "hook failed; git operation unaffected");
        }
    }
    0
}

/// The pipeline driver: repository + store + config + parsers + differ.
pub struct Analyzer {
    repo: SvcsRepository,
    store: Store,
    config: SvcsConfig,
    registry: ParserRegistry,
}

impl Analyzer {
    /// Open everything relative to the repository containing `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let repo = SvcsRepository::discover(path)?;
        let workdir = repo.workdir()?;
        let config = SvcsConfig::load(&workdir)?;
        let store = Store::open(SvcsConfig::db_path(&workdir)).context("Failed to open store")?;
        Ok(Self {
            repo,
            store,
            config,
            registry: ParserRegistry::new(),
        })
    }

    /// Read access to the store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Write access to the store.
    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    /// The repository this analyzer is bound to.
    pub fn repo(&self) -> &SvcsRepository {
        &self.repo
    }

    /// The loaded configuration.
    pub fn config(&self) -> &SvcsConfig {
        &self.config
    }

    fn run(&mut self, kind: HookKind, args: &[String]) -> Result<()> {
        match kind {
            HookKind::PostCommit => self.post_commit(),
            HookKind::PostMerge => self.post_merge(),
            HookKind::PostCheckout => self.post_checkout(),
            HookKind::PrePush => self.pre_push(args.first().map(String::as_str)),
        }
    }

    /// post-commit: analyze the new HEAD commit.
    fn post_commit(&mut self) -> Result<()> {
        let head = self.repo.head_commit()?;
        let count = self.analyze_commit(head)?;
        info!(commit = %head, events = count, "post-commit analysis done");
        Ok(())
    }

    /// post-merge / post-rewrite: import events for commits that arrived
    /// with the merge, then make sure the merge commit itself is analyzed.
    fn post_merge(&mut self) -> Result<()> {
        let report = self.import_missing()?;
        debug!(imported = report.commits_imported, "post-merge import done");
        let head = self.repo.head_commit()?;
        if !self.store.is_analyzed(&head.to_string())? {
            self.analyze_commit(head)?;
        }
        Ok(())
    }

    /// post-checkout: refresh branch metadata; on the first checkout of a
    /// fresh clone, fetch the notes ref and import everything reachable.
    fn post_checkout(&mut self) -> Result<()> {
        let branch = self.repo.current_branch();
        self.store.set_meta("current_branch", &branch)?;

        let store_empty = self.store.analyzed_commits()?.is_empty();
        if !store_empty {
            debug!(branch = %branch, "branch switch; store already populated");
            return Ok(());
        }

        let notes = Notes::new(&self.repo);
        if !notes.has_local_ref() {
            let Some(remote) = self.repo.default_remote() else {
                return Ok(());
            };
            if !self.config.auto_sync_notes {
                return Ok(());
            }
            match notes.remote_has_ref(&remote) {
                Ok(true) => notes
                    .fetch_remote(&remote)
                    .context("Failed to fetch notes after clone")?,
                Ok(false) => return Ok(()),
                Err(err) => {
                    warn!(error = %err, "could not probe remote for notes ref");
                    return Ok(());
                }
            }
        }

        let commits = self.repo.commits_from_head()?;
        let report = notes.import_into_store(&mut self.store, &commits)?;
        info!(
            commits = report.commits_imported,
            events = report.events_inserted,
            "fresh-clone note import done"
        );
        Ok(())
    }

    /// pre-push: ship the notes ref alongside the code push. Never blocks
    /// the push.
    fn pre_push(&mut self, remote: Option<&str>) -> Result<()> {
        if !self.config.auto_sync_notes {
            debug!("auto_sync_notes disabled; pre-push does nothing");
            return Ok(());
        }
        let Some(remote) = remote
            .map(str::to_string)
            .or_else(|| self.repo.default_remote())
        else {
            return Ok(());
        };
        let notes = Notes::new(&self.repo);
        if !notes.has_local_ref() {
            return Ok(());
        }
        if let Err(err) = notes.push_remote(&remote) {
            warn!(error = %err, "notes push failed; retry with `svcs sync`");
        }
        Ok(())
    }

    /// Analyze one commit: diff every changed source file against each
    /// parent, replace the commit's event set, and attach the note.
    /// Idempotent by construction.
    pub fn analyze_commit(&mut self, oid: Oid) -> Result<usize> {
        let meta = self.repo.commit_meta(oid)?;
        self.store.record_commit(&meta)?;

        let ignore = self.config.ignore_set();
        let differ = self.build_differ();
        let parent_count = self.repo.parent_count(oid)?;
        let parents: Vec<Option<usize>> = if parent_count == 0 {
            vec![None]
        } else {
            (0..parent_count).map(Some).collect()
        };

        let mut all_events = Vec::new();
        for parent_index in parents {
            let changes = self.repo.changed_files(oid, parent_index)?;
            let parent_oid = match parent_index {
                Some(i) => Some(self.repo.parent_oid(oid, i)?),
                None => None,
            };
            for change in changes {
                if change.kind == ChangeKind::Other {
                    continue;
                }
                if !self.registry.supports(&change.path) {
                    continue;
                }
                if ignore.is_match(&change.path) {
                    debug!(path = %change.path, "ignored by configuration");
                    continue;
                }

                let before_source = match (parent_oid, change.kind) {
                    (Some(parent), kind) if kind != ChangeKind::Added => {
                        self.repo.blob_at(parent, &change.path)?
                    }
                    _ => None,
                };
                let after_source = if change.kind == ChangeKind::Deleted {
                    None
                } else {
                    self.repo.blob_at(oid, &change.path)?
                };

                let before_ir = before_source
                    .as_deref()
                    .and_then(|src| self.registry.parse(&change.path, src));
                let after_ir = after_source
                    .as_deref()
                    .and_then(|src| self.registry.parse(&change.path, src));

                let ctx = DiffContext {
                    file_path: &change.path,
                    before: before_ir.as_ref(),
                    after: after_ir.as_ref(),
                    before_source: before_source.as_deref(),
                    after_source: after_source.as_deref(),
                };
                for event in differ.analyze(&ctx) {
                    // Merge commits can surface the same fact against both
                    // parents; keep one copy.
                    if !all_events.contains(&event) {
                        all_events.push(event);
                    }
                }
            }
        }

        let hash = oid.to_string();
        let count = self.store.replace_events(&hash, &all_events)?;
        self.store.set_meta("last_analyzed_commit", &hash)?;

        if self.config.auto_sync_notes {
            let notes = Notes::new(&self.repo);
            if let Err(err) = notes.write(&hash, &all_events) {
                // Non-fatal: the store is authoritative; `svcs status` shows
                // commits whose notes are missing and `svcs sync` retries.
                warn!(commit = %hash, error = %err, "failed to attach note");
            }
        }
        Ok(count)
    }

    fn build_differ(&self) -> LayeredDiff {
        let differ = LayeredDiff::new(DEFAULT_CONFIDENCE_FLOOR);
        let differ = match self.config.analysis_depth {
            AnalysisDepth::Shallow => differ.shallow(),
            AnalysisDepth::Full => differ,
        };
        differ.with_model(
            self.config.model_provider(),
            self.config.ai_complexity_threshold as usize,
        )
    }

    /// Import note events for reachable commits the store has not analyzed.
    pub fn import_missing(&mut self) -> Result<ImportReport> {
        let mut missing = Vec::new();
        for hash in self.repo.commits_from_head()? {
            if !self.store.is_analyzed(&hash)? {
                missing.push(hash);
            }
        }
        let notes = Notes::new(&self.repo);
        notes.import_into_store(&mut self.store, &missing)
    }

    /// Manual notes synchronization: push, fetch, import. The retry path for
    /// transport failures in the hooks.
    pub fn sync(&mut self, remote: Option<&str>) -> Result<ImportReport> {
        let Some(remote) = remote
            .map(str::to_string)
            .or_else(|| self.repo.default_remote())
        else {
            anyhow::bail!("no remote configured");
        };
        let notes = Notes::new(&self.repo);
        if notes.has_local_ref() {
            notes.push_remote(&remote)?;
        }
        notes.fetch_remote(&remote)?;
        self.import_missing()
    }
}

/// Shell shim installed for each hook. Chains to a pre-existing hook first
/// (its failure still blocks the git operation), then hands off to svcs in a
/// way that cannot fail the hook.
fn hook_script(kind: HookKind) -> String {
    format!(
        "#!/bin/sh\n\
         # Installed by svcs. Do not edit; reinstall with `svcs install-hooks`.\n\
         if [ -x \"$0.pre-svcs\" ]; then\n  \"$0.pre-svcs\" \"$@\" || exit $?\nfi\n\
         svcs hook {} \"$@\" || true\n\
         exit 0\n",
        kind.as_str()
    )
}

/// Install the four hook shims, preserving any pre-existing hooks by
/// renaming them to `<name>.pre-svcs`.
pub fn install_hooks(repo: &SvcsRepository) -> Result<()> {
    let hooks_dir = repo.hooks_dir()?;
    std::fs::create_dir_all(&hooks_dir)
        .with_context(|| format!("Failed to create hooks dir: {}", hooks_dir.display()))?;

    for kind in HookKind::ALL {
        let path = hooks_dir.join(kind.as_str());
        if path.exists() {
            let existing = std::fs::read_to_string(&path).unwrap_or_default();
            if !existing.contains("Installed by svcs") {
                let backup = hooks_dir.join(format!("{}.pre-svcs", kind.as_str()));
                std::fs::rename(&path, &backup).with_context(|| {
                    format!("Failed to preserve existing hook: {}", path.display())
                })?;
                info!(hook = kind.as_str(), "existing hook preserved as .pre-svcs");
            }
        }
        std::fs::write(&path, hook_script(*kind))
            .with_context(|| format!("Failed to write hook: {}", path.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .context("Failed to mark hook executable")?;
        }
    }
    info!(dir = %hooks_dir.display(), "hooks installed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_kind_parse_round_trips() {
        for kind in HookKind::ALL {
            assert_eq!(HookKind::parse(kind.as_str()), Some(*kind));
        }
        assert_eq!(HookKind::parse("pre-commit"), None);
    }

    #[test]
    fn hook_script_never_propagates_failure() {
        let script = hook_script(HookKind::PostCommit);
        assert!(script.ends_with("exit 0\n"));
        assert!(script.contains("|| true"));
        assert!(script.contains("svcs hook post-commit"));
    }

    #[test]
    fn run_hook_outside_a_repo_still_exits_zero() {
        let dir = tempfile::tempdir().unwrap();
        let code = run_hook(HookKind::PostCommit, &[], dir.path());
        assert_eq!(code, 0);
    }
}
