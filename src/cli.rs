//! CLI interface for svcs.
//!
//! Thin shells over the core: the real behavior lives in the library
//! modules. The `hook` subcommand is what the installed git hooks invoke.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;

use crate::config::SvcsConfig;
use crate::git::SvcsRepository;
use crate::hooks::{self, Analyzer, HookKind};
use crate::notes::Notes;
use crate::store::{EventFilter, OrderBy, StoredEvent};

/// svcs: repository-local semantic version-control analyzer
#[derive(Parser)]
#[command(name = "svcs")]
#[command(about = "Semantic change events per commit, stored locally and shared as git notes", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Repository path (defaults to the current directory)
    #[arg(short = 'C', long, global = true)]
    pub repo: Option<PathBuf>,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Main command categories
#[derive(Subcommand)]
pub enum Commands {
    /// Initialize svcs in this repository: store, config, hooks
    Init,
    /// Analyze HEAD or a given commit (safe to re-run)
    Analyze {
        /// Commit revision to analyze instead of HEAD
        #[arg(long)]
        commit: Option<String>,
    },
    /// Run a git hook (invoked by the installed shims)
    Hook {
        /// Which hook fired
        #[arg(value_enum)]
        kind: HookArg,
        /// Arguments git passed to the hook
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Push, fetch, and import notes for the configured remote
    Sync {
        /// Remote name (defaults to origin)
        #[arg(long)]
        remote: Option<String>,
    },
    /// Query stored events
    Query(QueryArgs),
    /// Events for one node across its history
    Evolution {
        /// Qualified node id, e.g. func:greet
        node_id: String,
    },
    /// Store statistics
    Stats,
    /// Delete events for commits no longer reachable from any ref
    Cleanup,
    /// Store/notes consistency report
    Status,
    /// (Re)install the git hook shims
    InstallHooks,
}

/// Filter flags for `svcs query`, mirroring the store's filter surface.
#[allow(missing_docs)]
#[derive(clap::Args)]
pub struct QueryArgs {
    /// Restrict to one branch
    #[arg(long)]
    pub branch: Option<String>,
    /// Substring match on the author field
    #[arg(long)]
    pub author: Option<String>,
    /// Restrict to these event types (repeatable)
    #[arg(long = "event-type")]
    pub event_types: Vec<String>,
    /// Substring match on node ids
    #[arg(long)]
    pub node: Option<String>,
    /// Substring match on file locations
    #[arg(long)]
    pub path: Option<String>,
    /// Only events from commits on or after this date (YYYY-MM-DD)
    #[arg(long)]
    pub since: Option<String>,
    /// Only events from commits on or before this date (YYYY-MM-DD)
    #[arg(long)]
    pub until: Option<String>,
    #[arg(long)]
    pub min_confidence: Option<f64>,
    /// Restrict to these layers (repeatable): 1 2 3 4 5a 5b core
    #[arg(long = "layer")]
    pub layers: Vec<String>,
    #[arg(long, default_value_t = 100)]
    pub limit: u32,
    #[arg(long, default_value_t = 0)]
    pub offset: u32,
    /// Sort by commit timestamp or by confidence
    #[arg(long, value_enum, default_value = "timestamp")]
    pub order: Order,
}

/// Sort order flag.
#[allow(missing_docs)]
#[derive(Clone, Copy, ValueEnum)]
pub enum Order {
    Timestamp,
    Confidence,
}

/// Hook names as git invokes them. An unknown name is an argument error, so
/// clap rejects it with exit code 2 before any analysis runs.
#[allow(missing_docs)]
#[derive(Clone, Copy, ValueEnum)]
pub enum HookArg {
    PostCommit,
    PostMerge,
    PostCheckout,
    PrePush,
}

impl From<HookArg> for HookKind {
    fn from(arg: HookArg) -> Self {
        match arg {
            HookArg::PostCommit => HookKind::PostCommit,
            HookArg::PostMerge => HookKind::PostMerge,
            HookArg::PostCheckout => HookKind::PostCheckout,
            HookArg::PrePush => HookKind::PrePush,
        }
    }
}

impl Cli {
    /// Execute the CLI command.
    pub fn execute(self) -> Result<()> {
        let cwd = match &self.repo {
            Some(path) => path.clone(),
            None => std::env::current_dir().context("Failed to get current directory")?,
        };

        match self.command {
            Commands::Init => init(&cwd),
            Commands::Analyze { commit } => analyze(&cwd, commit.as_deref()),
            Commands::Hook { kind, args } => {
                std::process::exit(hooks::run_hook(kind.into(), &args, &cwd));
            }
            Commands::Sync { remote } => {
                let mut analyzer = Analyzer::open(&cwd)?;
                let report = analyzer.sync(remote.as_deref())?;
                println!(
                    "synced: {} commits imported, {} events inserted",
                    report.commits_imported, report.events_inserted
                );
                Ok(())
            }
            Commands::Query(args) => query(&cwd, &args),
            Commands::Evolution { node_id } => evolution(&cwd, &node_id),
            Commands::Stats => stats(&cwd),
            Commands::Cleanup => cleanup(&cwd),
            Commands::Status => status(&cwd),
            Commands::InstallHooks => {
                let repo = SvcsRepository::discover(&cwd)?;
                hooks::install_hooks(&repo)
            }
        }
    }
}

fn init(cwd: &std::path::Path) -> Result<()> {
    let repo = SvcsRepository::discover(cwd)?;
    let workdir = repo.workdir()?;

    let config_path = SvcsConfig::config_path(&workdir);
    if !config_path.exists() {
        SvcsConfig::default().save(&workdir)?;
    }
    let config = SvcsConfig::load(&workdir)?;

    let store = crate::store::Store::open(SvcsConfig::db_path(&workdir))?;
    store.init_metadata(&workdir.display().to_string(), &repo.current_branch())?;
    store.set_meta("config_blob", &serde_json::to_string(&config)?)?;

    hooks::install_hooks(&repo)?;
    println!("svcs initialized in {}", workdir.display());
    Ok(())
}

fn analyze(cwd: &std::path::Path, commit: Option<&str>) -> Result<()> {
    let mut analyzer = Analyzer::open(cwd)?;
    let oid = match commit {
        Some(rev) => analyzer.repo().resolve_commit(rev)?,
        None => analyzer.repo().head_commit()?,
    };
    let count = analyzer.analyze_commit(oid)?;
    println!("{oid}: {count} events recorded");
    Ok(())
}

fn query(cwd: &std::path::Path, args: &QueryArgs) -> Result<()> {
    let analyzer = Analyzer::open(cwd)?;

    let mut event_types = Vec::new();
    for name in &args.event_types {
        let ty = crate::diff::EventType::parse(name)
            .with_context(|| format!("unknown event type '{name}'"))?;
        event_types.push(ty);
    }
    let mut layers = Vec::new();
    for name in &args.layers {
        let layer = crate::diff::Layer::parse(name)
            .with_context(|| format!("unknown layer '{name}'"))?;
        layers.push(layer);
    }

    let filter = EventFilter {
        branch: args.branch.clone(),
        author_pattern: args.author.clone(),
        event_types: (!event_types.is_empty()).then_some(event_types),
        node_pattern: args.node.clone(),
        path_pattern: args.path.clone(),
        since: args.since.as_deref().map(parse_date).transpose()?,
        until: args.until.as_deref().map(parse_date).transpose()?,
        min_confidence: args.min_confidence,
        max_confidence: None,
        layers: (!layers.is_empty()).then_some(layers),
        limit: Some(args.limit),
        offset: Some(args.offset),
        order: match args.order {
            Order::Timestamp => OrderBy::Timestamp,
            Order::Confidence => OrderBy::Confidence,
        },
    };

    let events = analyzer.store().query_events(&filter)?;
    print_events(&events)
}

fn evolution(cwd: &std::path::Path, node_id: &str) -> Result<()> {
    let analyzer = Analyzer::open(cwd)?;
    let events = analyzer
        .store()
        .evolution_of(node_id, &EventFilter::default())?;
    print_events(&events)
}

fn stats(cwd: &std::path::Path) -> Result<()> {
    let analyzer = Analyzer::open(cwd)?;
    let stats = analyzer.store().stats()?;
    let out = json!({
        "commits": stats.commit_count,
        "events": stats.event_count,
        "distinct_event_types": stats.distinct_event_types,
        "by_layer": stats.events_per_layer,
        "by_author": stats.events_per_author,
        "by_type": stats.events_per_type,
        "by_branch": stats.events_per_branch,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn cleanup(cwd: &std::path::Path) -> Result<()> {
    let mut analyzer = Analyzer::open(cwd)?;
    let reachable = analyzer.repo().reachable_commits()?;
    let report = analyzer.store_mut().cleanup_unreachable(&reachable)?;
    println!(
        "cleanup: {} commits and {} events removed",
        report.commits_deleted, report.events_deleted
    );
    Ok(())
}

fn status(cwd: &std::path::Path) -> Result<()> {
    let analyzer = Analyzer::open(cwd)?;
    let analyzed = analyzer.store().analyzed_commits()?;
    let notes = Notes::new(analyzer.repo());

    let mut missing_notes = Vec::new();
    for hash in &analyzed {
        if notes.read(hash)?.is_none() {
            missing_notes.push(hash.clone());
        }
    }

    let out = json!({
        "branch": analyzer.repo().current_branch(),
        "auto_sync_notes": analyzer.config().auto_sync_notes,
        "analyzed_commits": analyzed.len(),
        "last_analyzed_commit": analyzer.store().get_meta("last_analyzed_commit")?,
        "commits_missing_notes": missing_notes,
        "notes_ref_present": notes.has_local_ref(),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    if !missing_notes.is_empty() {
        eprintln!("hint: run `svcs analyze --commit <hash>` or `svcs sync` to repair notes");
    }
    Ok(())
}

fn print_events(events: &[StoredEvent]) -> Result<()> {
    let rows: Vec<_> = events
        .iter()
        .map(|e| {
            json!({
                "event_id": e.event_id,
                "commit_hash": e.commit_hash,
                "branch": e.branch,
                "author": e.author,
                "created_at": e.created_at,
                "event_type": e.event.event_type.as_str(),
                "node_id": e.event.node_id,
                "location": e.event.location,
                "details": e.event.details,
                "layer": e.layer.as_str(),
                "layer_description": e.layer.description(),
                "confidence": e.event.confidence,
                "reasoning": e.event.reasoning,
                "impact": e.event.impact,
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}

/// Parse `YYYY-MM-DD` into unix seconds at midnight UTC.
fn parse_date(s: &str) -> Result<i64> {
    let date = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{s}', expected YYYY-MM-DD"))?;
    let datetime = date
        .and_hms_opt(0, 0, 0)
        .context("invalid midnight timestamp")?;
    Ok(datetime.and_utc().timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_parsing() {
        assert_eq!(parse_date("1970-01-01").unwrap(), 0);
        assert!(parse_date("not-a-date").is_err());
    }

    #[test]
    fn cli_parses_hook_invocation() {
        let cli = Cli::try_parse_from(["svcs", "hook", "post-commit"]).unwrap();
        match cli.command {
            Commands::Hook { kind, args } => {
                assert!(matches!(HookKind::from(kind), HookKind::PostCommit));
                assert!(args.is_empty());
            }
            _ => panic!("expected hook command"),
        }
    }

    #[test]
    fn unknown_hook_name_is_an_argument_error() {
        assert!(Cli::try_parse_from(["svcs", "hook", "pre-commit"]).is_err());
    }

    #[test]
    fn cli_parses_query_filters() {
        let cli = Cli::try_parse_from([
            "svcs",
            "query",
            "--branch",
            "main",
            "--event-type",
            "signature_changed",
            "--layer",
            "2",
            "--limit",
            "10",
        ])
        .unwrap();
        match cli.command {
            Commands::Query(args) => {
                assert_eq!(args.branch.as_deref(), Some("main"));
                assert_eq!(args.event_types, vec!["signature_changed".to_string()]);
                assert_eq!(args.layers, vec!["2".to_string()]);
                assert_eq!(args.limit, 10);
            }
            _ => panic!("expected query command"),
        }
    }
}
