#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::PathBuf;
use std::process::Command;

use anyhow::Result;
use git2::{Oid, Repository, Signature};
use tempfile::TempDir;

use svcs::diff::EventType;
use svcs::hooks::{self, Analyzer, HookKind};
use svcs::notes::Notes;
use svcs::store::{EventFilter, Store};

/// Test setup that creates a temporary git repository with test commits
struct TestRepo {
    _temp_dir: TempDir,
    repo_path: PathBuf,
    repo: Repository,
}

impl TestRepo {
    fn new() -> Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let repo_path = temp_dir.path().to_path_buf();
        let repo = Repository::init(&repo_path)?;

        let mut config = repo.config()?;
        config.set_str("user.name", "Test User")?;
        config.set_str("user.email", "test@example.com")?;

        Ok(Self {
            _temp_dir: temp_dir,
            repo_path,
            repo,
        })
    }

    fn signature(&self) -> Result<Signature<'static>> {
        Ok(Signature::now("Test User", "test@example.com")?)
    }

    /// Write `content` to `name`, stage it, and commit on HEAD.
    fn commit_file(&self, name: &str, content: &str, message: &str) -> Result<Oid> {
        std::fs::write(self.repo_path.join(name), content)?;
        let mut index = self.repo.index()?;
        index.add_path(std::path::Path::new(name))?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;
        let sig = self.signature()?;

        let parents = match self.repo.head() {
            Ok(head) => vec![head.peel_to_commit()?],
            Err(_) => Vec::new(),
        };
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
        Ok(self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)?)
    }

    /// Stage a file deletion and commit on HEAD.
    fn commit_removal(&self, name: &str, message: &str) -> Result<Oid> {
        std::fs::remove_file(self.repo_path.join(name))?;
        let mut index = self.repo.index()?;
        index.remove_path(std::path::Path::new(name))?;
        index.write()?;

        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;
        let sig = self.signature()?;
        let parent = self.repo.head()?.peel_to_commit()?;
        Ok(self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])?)
    }

    fn analyzer(&self) -> Result<Analyzer> {
        Ok(Analyzer::open(&self.repo_path)?)
    }

    fn analyze_head(&self) -> Result<(Analyzer, String)> {
        let mut analyzer = self.analyzer()?;
        let head = analyzer.repo().head_commit()?;
        analyzer.analyze_commit(head)?;
        Ok((analyzer, head.to_string()))
    }
}

fn event_types(analyzer: &Analyzer, commit: &str) -> Vec<EventType> {
    analyzer
        .store()
        .events_for_commit(commit)
        .unwrap()
        .iter()
        .map(|e| e.event.event_type)
        .collect()
}

#[test]
fn initial_commit_adds_file_and_function() {
    let repo = TestRepo::new().unwrap();
    repo.commit_file(
        "greet.py",
        "def greet(name): return f\"Hello, {name}!\"\n",
        "add greet",
    )
    .unwrap();

    let (analyzer, head) = repo.analyze_head().unwrap();
    let types = event_types(&analyzer, &head);
    assert!(types.contains(&EventType::FileAdded));
    assert!(types.contains(&EventType::NodeAdded));
    assert!(!types.contains(&EventType::NodeRemoved));
    assert!(!types.contains(&EventType::FileRemoved));

    let events = analyzer.store().events_for_commit(&head).unwrap();
    let node_added = events
        .iter()
        .find(|e| e.event.event_type == EventType::NodeAdded)
        .unwrap();
    assert_eq!(node_added.event.node_id, "func:greet");
    assert_eq!(node_added.author, "Test User <test@example.com>");
    assert!(analyzer.store().is_analyzed(&head).unwrap());
}

#[test]
fn parameter_added_with_default() {
    let repo = TestRepo::new().unwrap();
    repo.commit_file("greet.py", "def greet(name):\n    return name\n", "v1")
        .unwrap();
    repo.commit_file(
        "greet.py",
        "def greet(name, greeting=\"Hello\"):\n    return name\n",
        "v2",
    )
    .unwrap();

    let (analyzer, head) = repo.analyze_head().unwrap();
    let events = analyzer.store().events_for_commit(&head).unwrap();
    let on_greet: Vec<_> = events
        .iter()
        .filter(|e| e.event.node_id == "func:greet")
        .map(|e| e.event.event_type)
        .collect();
    assert!(on_greet.contains(&EventType::SignatureChanged));
    assert!(on_greet.contains(&EventType::DefaultParametersAdded));
}

#[test]
fn function_becomes_async_with_error_handling() {
    let repo = TestRepo::new().unwrap();
    repo.commit_file("calc.py", "def f(x):\n    return 1 / x\n", "v1")
        .unwrap();
    repo.commit_file(
        "calc.py",
        "async def f(x):\n    try:\n        return 1 / x\n    except ZeroDivisionError:\n        return 0\n",
        "v2",
    )
    .unwrap();

    let (analyzer, head) = repo.analyze_head().unwrap();
    let types = event_types(&analyzer, &head);
    for expected in [
        EventType::FunctionMadeAsync,
        EventType::ExceptionHandlingAdded,
        EventType::ErrorHandlingIntroduced,
        EventType::ControlFlowChanged,
        EventType::ReturnPatternChanged,
    ] {
        assert!(types.contains(&expected), "missing {expected:?} in {types:?}");
    }
}

#[test]
fn loop_refactored_to_comprehension_scores_simplification() {
    let repo = TestRepo::new().unwrap();
    repo.commit_file(
        "pick.py",
        "def pick(items):\n    out = []\n    for item in items:\n        if item > 0:\n            out.append(item)\n    return out\n",
        "v1",
    )
    .unwrap();
    repo.commit_file(
        "pick.py",
        "def pick(items):\n    return [item for item in items if item > 0]\n",
        "v2",
    )
    .unwrap();

    let (analyzer, head) = repo.analyze_head().unwrap();
    let events = analyzer.store().events_for_commit(&head).unwrap();
    let types: Vec<_> = events.iter().map(|e| e.event.event_type).collect();
    assert!(types.contains(&EventType::ControlFlowChanged));
    assert!(types.contains(&EventType::ComprehensionUsageChanged));

    let simplification = events
        .iter()
        .find(|e| e.event.event_type == EventType::CodeSimplification)
        .expect("layer 5a should flag the rewrite");
    assert!(simplification.event.confidence.unwrap() >= 0.6);
}

#[test]
fn dependency_removed_only() {
    let repo = TestRepo::new().unwrap();
    repo.commit_file("mod.py", "import requests\n\nVALUE = 1\n", "v1")
        .unwrap();
    repo.commit_file("mod.py", "VALUE = 1\n", "v2").unwrap();

    let (analyzer, head) = repo.analyze_head().unwrap();
    let events = analyzer.store().events_for_commit(&head).unwrap();
    let dep_removed: Vec<_> = events
        .iter()
        .filter(|e| e.event.event_type == EventType::DependencyRemoved)
        .collect();
    assert_eq!(dep_removed.len(), 1);
    assert_eq!(dep_removed[0].event.details, "requests");
    assert_eq!(dep_removed[0].event.node_id, "module:mod");
    assert!(!events
        .iter()
        .any(|e| e.event.event_type == EventType::DependencyAdded));
}

#[test]
fn file_removal_is_reported() {
    let repo = TestRepo::new().unwrap();
    repo.commit_file("gone.py", "def f():\n    pass\n", "add").unwrap();
    repo.commit_removal("gone.py", "remove").unwrap();

    let (analyzer, head) = repo.analyze_head().unwrap();
    let types = event_types(&analyzer, &head);
    assert!(types.contains(&EventType::FileRemoved));
    assert!(types.contains(&EventType::NodeRemoved));
}

#[test]
fn reanalysis_is_idempotent() {
    let repo = TestRepo::new().unwrap();
    repo.commit_file("a.py", "def f(x):\n    return x\n", "v1").unwrap();
    repo.commit_file(
        "a.py",
        "def f(x, y=1):\n    if y:\n        return x\n    return None\n",
        "v2",
    )
    .unwrap();

    let mut analyzer = repo.analyzer().unwrap();
    let head = analyzer.repo().head_commit().unwrap();
    analyzer.analyze_commit(head).unwrap();
    let first = analyzer.store().events_for_commit(&head.to_string()).unwrap();
    analyzer.analyze_commit(head).unwrap();
    let second = analyzer.store().events_for_commit(&head.to_string()).unwrap();

    assert_eq!(first.len(), second.len());
    let key = |events: &[svcs::store::StoredEvent]| {
        let mut keys: Vec<_> = events
            .iter()
            .map(|e| {
                (
                    e.event.event_type,
                    e.event.node_id.clone(),
                    e.event.details.clone(),
                )
            })
            .collect();
        keys.sort();
        keys
    };
    assert_eq!(key(&first), key(&second));
}

#[test]
fn merge_commit_records_events_from_both_parent_diffs() {
    let repo = TestRepo::new().unwrap();
    let base = repo
        .commit_file("a.py", "def f(x):\n    return x\n", "base")
        .unwrap();

    // Side branch: add b.py on top of base without moving HEAD.
    let sig = repo.signature().unwrap();
    let blob = repo.repo.blob(b"def side():\n    return 2\n").unwrap();
    let base_tree = repo.repo.find_commit(base).unwrap().tree().unwrap();
    let mut builder = repo.repo.treebuilder(Some(&base_tree)).unwrap();
    builder.insert("b.py", blob, 0o100_644).unwrap();
    let side_tree = repo.repo.find_tree(builder.write().unwrap()).unwrap();
    let base_commit = repo.repo.find_commit(base).unwrap();
    let side = repo
        .repo
        .commit(None, &sig, &sig, "side", &side_tree, &[&base_commit])
        .unwrap();

    // Mainline: change a.py.
    let main = repo
        .commit_file("a.py", "def f(x, y=0):\n    return x + y\n", "main change")
        .unwrap();

    // Merge commit carrying both changes.
    let main_tree = repo.repo.find_commit(main).unwrap().tree().unwrap();
    let mut builder = repo.repo.treebuilder(Some(&main_tree)).unwrap();
    builder.insert("b.py", blob, 0o100_644).unwrap();
    let merge_tree = repo.repo.find_tree(builder.write().unwrap()).unwrap();
    let main_commit = repo.repo.find_commit(main).unwrap();
    let side_commit = repo.repo.find_commit(side).unwrap();
    let merge = repo
        .repo
        .commit(
            Some("HEAD"),
            &sig,
            &sig,
            "merge side",
            &merge_tree,
            &[&main_commit, &side_commit],
        )
        .unwrap();

    let mut analyzer = repo.analyzer().unwrap();
    analyzer.analyze_commit(merge).unwrap();
    let events = analyzer
        .store()
        .events_for_commit(&merge.to_string())
        .unwrap();

    // vs main parent: b.py arrives; vs side parent: a.py changed.
    assert!(events
        .iter()
        .any(|e| e.event.event_type == EventType::FileAdded && e.event.node_id == "file:b.py"));
    assert!(events
        .iter()
        .any(|e| e.event.event_type == EventType::SignatureChanged
            && e.event.node_id == "func:f"));
}

#[test]
fn note_round_trips_into_a_fresh_store() {
    let repo = TestRepo::new().unwrap();
    repo.commit_file("greet.py", "def greet(name):\n    return name\n", "add")
        .unwrap();

    let (analyzer, head) = repo.analyze_head().unwrap();
    let original = analyzer.store().events_for_commit(&head).unwrap();
    assert!(!original.is_empty());

    let notes = Notes::new(analyzer.repo());
    let payload = notes.read(&head).unwrap().expect("note should exist");
    assert_eq!(payload.version, "1.0");
    assert_eq!(payload.commit_hash, head);
    assert_eq!(payload.semantic_events.len(), original.len());

    // A second machine's store: import from the note alone.
    let mut fresh = Store::open_in_memory().unwrap();
    let report = notes
        .import_into_store(&mut fresh, &[head.clone()])
        .unwrap();
    assert_eq!(report.commits_imported, 1);
    assert_eq!(report.events_inserted, original.len());

    // Same multiset up to the dedup key.
    let imported = fresh.events_for_commit(&head).unwrap();
    let key = |events: &[svcs::store::StoredEvent]| {
        let mut keys: Vec<_> = events
            .iter()
            .map(|e| {
                (
                    e.event.event_type,
                    e.event.node_id.clone(),
                    e.event.details.clone(),
                )
            })
            .collect();
        keys.sort();
        keys
    };
    assert_eq!(key(&original), key(&imported));

    // Importing again inserts nothing.
    let again = notes.import_into_store(&mut fresh, &[head]).unwrap();
    assert_eq!(again.events_inserted, 0);
}

#[test]
fn import_skips_commits_unknown_to_git() {
    let repo = TestRepo::new().unwrap();
    repo.commit_file("a.py", "x = 1\n", "add").unwrap();

    let analyzer = repo.analyzer().unwrap();
    let notes = Notes::new(analyzer.repo());
    let mut store = Store::open_in_memory().unwrap();
    let bogus = "0123456789abcdef0123456789abcdef01234567".to_string();
    let report = notes.import_into_store(&mut store, &[bogus]).unwrap();
    assert_eq!(report.commits_skipped_unknown, 1);
    assert_eq!(report.commits_imported, 0);
}

#[test]
fn hooks_never_block_git() {
    // Outside a repository entirely: still exit 0.
    let dir = tempfile::tempdir().unwrap();
    for kind in HookKind::ALL {
        assert_eq!(hooks::run_hook(*kind, &[], dir.path()), 0);
    }

    // Inside a repository with an unborn HEAD: still exit 0.
    let repo = TestRepo::new().unwrap();
    for kind in HookKind::ALL {
        assert_eq!(hooks::run_hook(*kind, &[], &repo.repo_path), 0);
    }
}

#[test]
fn install_hooks_preserves_existing_hooks() {
    let repo = TestRepo::new().unwrap();
    let analyzer = repo.analyzer().unwrap();
    let hooks_dir = analyzer.repo().hooks_dir().unwrap();
    std::fs::create_dir_all(&hooks_dir).unwrap();
    std::fs::write(hooks_dir.join("post-commit"), "#!/bin/sh\necho custom\n").unwrap();

    hooks::install_hooks(analyzer.repo()).unwrap();

    for kind in HookKind::ALL {
        let script = std::fs::read_to_string(hooks_dir.join(kind.as_str())).unwrap();
        assert!(script.contains("Installed by svcs"));
        assert!(script.ends_with("exit 0\n"));
    }
    let preserved = std::fs::read_to_string(hooks_dir.join("post-commit.pre-svcs")).unwrap();
    assert!(preserved.contains("echo custom"));

    // Re-install must not clobber the preserved hook with our own shim.
    hooks::install_hooks(analyzer.repo()).unwrap();
    let preserved = std::fs::read_to_string(hooks_dir.join("post-commit.pre-svcs")).unwrap();
    assert!(preserved.contains("echo custom"));
}

#[test]
fn query_surface_filters_by_node_and_path() {
    let repo = TestRepo::new().unwrap();
    repo.commit_file("app.py", "def handler(req):\n    return req\n", "v1")
        .unwrap();
    repo.commit_file(
        "app.py",
        "def handler(req, verbose=False):\n    return req\n",
        "v2",
    )
    .unwrap();

    let (analyzer, _) = repo.analyze_head().unwrap();
    let by_node = analyzer
        .store()
        .query_events(&EventFilter {
            node_pattern: Some("handler".to_string()),
            ..EventFilter::default()
        })
        .unwrap();
    assert!(!by_node.is_empty());
    assert!(by_node.iter().all(|e| e.event.node_id.contains("handler")));

    let by_path = analyzer
        .store()
        .query_events(&EventFilter {
            path_pattern: Some("app.py".to_string()),
            ..EventFilter::default()
        })
        .unwrap();
    assert_eq!(by_node.len(), by_path.len());
}

/// Full transport loop through a real `git clone`: notes pushed from the
/// origin travel to the clone and rebuild the same store content.
#[test]
fn clone_then_import_reproduces_the_store() {
    if Command::new("git").arg("--version").output().is_err() {
        eprintln!("git binary unavailable; skipping transport test");
        return;
    }

    let origin = TestRepo::new().unwrap();
    origin
        .commit_file("greet.py", "def greet(name):\n    return name\n", "add greet")
        .unwrap();
    let (origin_analyzer, head) = origin.analyze_head().unwrap();
    let origin_events = origin_analyzer.store().events_for_commit(&head).unwrap();
    assert!(!origin_events.is_empty());

    let clone_parent = tempfile::tempdir().unwrap();
    let clone_path = clone_parent.path().join("clone");
    let status = Command::new("git")
        .args([
            "clone",
            &origin.repo_path.display().to_string(),
            &clone_path.display().to_string(),
        ])
        .output()
        .unwrap();
    assert!(status.status.success());

    let mut clone_analyzer = Analyzer::open(&clone_path).unwrap();
    let report = clone_analyzer.sync(Some("origin")).unwrap();
    assert_eq!(report.commits_imported, 1);

    let imported = clone_analyzer.store().events_for_commit(&head).unwrap();
    let key = |events: &[svcs::store::StoredEvent]| {
        let mut keys: Vec<_> = events
            .iter()
            .map(|e| {
                (
                    e.event.event_type,
                    e.event.node_id.clone(),
                    e.event.details.clone(),
                )
            })
            .collect();
        keys.sort();
        keys
    };
    assert_eq!(key(&origin_events), key(&imported));
}
