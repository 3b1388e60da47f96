//! The repository-local event store.
//!
//! SQLite database at `.svcs/semantic.db` holding commits and their semantic
//! events. Events are immutable once stored; re-analysis of a commit replaces
//! its event set inside one transaction so repeated runs converge on the same
//! content. Schema changes are forward-only, keyed by `schema_version` in the
//! meta table.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::diff::{EventType, Layer, SemanticEvent};
use crate::git::CommitMeta;

/// Current schema version; migrations run forward from whatever is stored.
pub const SCHEMA_VERSION: i64 = 1;

/// Errors a store caller can usefully match on.
#[derive(Error, Debug)]
pub enum StoreError {
    /// `append`/`merge` against a commit that was never recorded.
    #[error("commit {0} is not recorded in the store")]
    UnknownCommit(String),

    /// A stored or imported event type is outside the alphabet.
    #[error("unknown event type '{0}' rejected at the store boundary")]
    UnknownEventType(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Store-local result type.
pub type Result<T> = std::result::Result<T, StoreError>;

/// One event row as persisted, with its commit context attached.
#[allow(missing_docs)]
#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub event_id: i64,
    pub commit_hash: String,
    pub branch: String,
    pub author: String,
    pub created_at: i64,
    pub layer: Layer,
    pub event: SemanticEvent,
}

/// Sort order for event queries.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderBy {
    #[default]
    Timestamp,
    Confidence,
}

/// Filter for [`Store::query_events`]. Every field is optional; defaults
/// select everything, newest first.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub branch: Option<String>,
    pub author_pattern: Option<String>,
    pub event_types: Option<Vec<EventType>>,
    pub node_pattern: Option<String>,
    pub path_pattern: Option<String>,
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub min_confidence: Option<f64>,
    pub max_confidence: Option<f64>,
    pub layers: Option<Vec<Layer>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub order: OrderBy,
}

/// Counters returned by [`Store::cleanup_unreachable`].
#[allow(missing_docs)]
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub commits_deleted: usize,
    pub events_deleted: usize,
}

/// Aggregate statistics over the store.
#[allow(missing_docs)]
#[derive(Debug, Default)]
pub struct StoreStats {
    pub commit_count: i64,
    pub event_count: i64,
    pub distinct_event_types: i64,
    pub events_per_layer: BTreeMap<String, i64>,
    pub events_per_author: BTreeMap<String, i64>,
    pub events_per_type: BTreeMap<String, i64>,
    pub events_per_branch: BTreeMap<String, i64>,
}

/// Handle to one repository's store. Single writer, multiple readers;
/// SQLite's own locking covers concurrent read access.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (creating and migrating as needed) the store at `db_path`.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    /// Create the schema if absent and roll it forward. Idempotent.
    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS meta (
                 key   TEXT PRIMARY KEY,
                 value TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS commits (
                 commit_hash   TEXT PRIMARY KEY,
                 branch        TEXT NOT NULL,
                 author        TEXT NOT NULL,
                 timestamp     INTEGER NOT NULL,
                 message       TEXT NOT NULL,
                 parent_hashes TEXT NOT NULL,
                 analyzed      INTEGER NOT NULL DEFAULT 0
             );
             CREATE TABLE IF NOT EXISTS semantic_events (
                 event_id          INTEGER PRIMARY KEY AUTOINCREMENT,
                 commit_hash       TEXT NOT NULL REFERENCES commits(commit_hash) ON DELETE CASCADE,
                 branch            TEXT NOT NULL,
                 event_type        TEXT NOT NULL,
                 node_id           TEXT NOT NULL,
                 location          TEXT NOT NULL,
                 details           TEXT NOT NULL,
                 layer             TEXT NOT NULL,
                 layer_description TEXT NOT NULL,
                 confidence        REAL,
                 reasoning         TEXT,
                 impact            TEXT,
                 created_at        INTEGER NOT NULL,
                 author            TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_events_commit ON semantic_events(commit_hash);
             CREATE INDEX IF NOT EXISTS idx_events_type ON semantic_events(event_type);
             CREATE INDEX IF NOT EXISTS idx_events_node ON semantic_events(node_id);",
        )?;

        let stored: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        match stored.and_then(|v| v.parse::<i64>().ok()) {
            None => {
                self.conn.execute(
                    "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)",
                    params![SCHEMA_VERSION.to_string()],
                )?;
            }
            Some(v) if v < SCHEMA_VERSION => {
                // Forward-only migrations land here as the schema grows.
                info!(from = v, to = SCHEMA_VERSION, "migrating store schema");
                self.conn.execute(
                    "UPDATE meta SET value = ?1 WHERE key = 'schema_version'",
                    params![SCHEMA_VERSION.to_string()],
                )?;
            }
            Some(_) => {}
        }
        Ok(())
    }

    /// Set repository metadata on first init; later calls refresh only the
    /// mutable keys.
    pub fn init_metadata(&self, repo_path: &str, branch: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        self.conn.execute(
            "INSERT OR IGNORE INTO meta (key, value) VALUES ('repo_path', ?1)",
            params![repo_path],
        )?;
        self.conn.execute(
            "INSERT OR IGNORE INTO meta (key, value) VALUES ('initialized_at', ?1)",
            params![now.to_string()],
        )?;
        self.set_meta("current_branch", branch)?;
        Ok(())
    }

    /// Upsert one metadata key.
    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Read one metadata key.
    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |r| {
                r.get(0)
            })
            .optional()?)
    }

    /// Insert-if-absent commit record.
    pub fn record_commit(&self, meta: &CommitMeta) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO commits
                 (commit_hash, branch, author, timestamp, message, parent_hashes, analyzed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
            params![
                meta.hash,
                meta.branch,
                meta.author,
                meta.timestamp,
                meta.message,
                meta.parent_hashes.join(" "),
            ],
        )?;
        Ok(())
    }

    /// Whether the commit's analyzed flag is set.
    pub fn is_analyzed(&self, commit_hash: &str) -> Result<bool> {
        let analyzed: Option<i64> = self
            .conn
            .query_row(
                "SELECT analyzed FROM commits WHERE commit_hash = ?1",
                params![commit_hash],
                |r| r.get(0),
            )
            .optional()?;
        Ok(analyzed == Some(1))
    }

    /// Replace the commit's event set with `events`, atomically, and flip its
    /// analyzed flag. Keyed by commit hash so re-analysis is idempotent.
    pub fn replace_events(&mut self, commit_hash: &str, events: &[SemanticEvent]) -> Result<usize> {
        let (author, timestamp, branch) = self.commit_context(commit_hash)?;
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM semantic_events WHERE commit_hash = ?1",
            params![commit_hash],
        )?;
        for event in events {
            insert_event(&tx, commit_hash, &branch, &author, timestamp, event)?;
        }
        tx.execute(
            "UPDATE commits SET analyzed = 1 WHERE commit_hash = ?1",
            params![commit_hash],
        )?;
        tx.commit()?;
        debug!(commit = commit_hash, count = events.len(), "event set replaced");
        Ok(events.len())
    }

    /// Merge `events` into the commit's set, skipping those already present
    /// by (commit, type, node, layer, details) tuple equality. Used by note
    /// import. Returns the number actually inserted.
    pub fn merge_events(&mut self, commit_hash: &str, events: &[SemanticEvent]) -> Result<usize> {
        let (author, timestamp, branch) = self.commit_context(commit_hash)?;
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        for event in events {
            let exists: Option<i64> = tx
                .query_row(
                    "SELECT event_id FROM semantic_events
                     WHERE commit_hash = ?1 AND event_type = ?2 AND node_id = ?3
                       AND layer = ?4 AND details = ?5",
                    params![
                        commit_hash,
                        event.event_type.as_str(),
                        event.node_id,
                        event.layer().as_str(),
                        event.details,
                    ],
                    |r| r.get(0),
                )
                .optional()?;
            if exists.is_none() {
                insert_event(&tx, commit_hash, &branch, &author, timestamp, event)?;
                inserted += 1;
            }
        }
        if inserted > 0 {
            tx.execute(
                "UPDATE commits SET analyzed = 1 WHERE commit_hash = ?1",
                params![commit_hash],
            )?;
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn commit_context(&self, commit_hash: &str) -> Result<(String, i64, String)> {
        self.conn
            .query_row(
                "SELECT author, timestamp, branch FROM commits WHERE commit_hash = ?1",
                params![commit_hash],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?
            .ok_or_else(|| StoreError::UnknownCommit(commit_hash.to_string()))
    }

    /// Query events with the full filter surface.
    pub fn query_events(&self, filter: &EventFilter) -> Result<Vec<StoredEvent>> {
        let mut sql = String::from(
            "SELECT event_id, commit_hash, branch, event_type, node_id, location, details,
                    layer, confidence, reasoning, impact, created_at, author
             FROM semantic_events WHERE 1=1",
        );
        let mut args: Vec<Value> = Vec::new();

        if let Some(branch) = &filter.branch {
            sql.push_str(&format!(" AND branch = ?{}", args.len() + 1));
            args.push(Value::from(branch.clone()));
        }
        if let Some(author) = &filter.author_pattern {
            sql.push_str(&format!(" AND author LIKE ?{}", args.len() + 1));
            args.push(Value::from(format!("%{author}%")));
        }
        if let Some(types) = &filter.event_types {
            sql.push_str(" AND event_type IN (");
            for (i, ty) in types.iter().enumerate() {
                if i > 0 {
                    sql.push(',');
                }
                sql.push_str(&format!("?{}", args.len() + 1));
                args.push(Value::from(ty.as_str().to_string()));
            }
            sql.push(')');
        }
        if let Some(node) = &filter.node_pattern {
            sql.push_str(&format!(" AND node_id LIKE ?{}", args.len() + 1));
            args.push(Value::from(format!("%{node}%")));
        }
        if let Some(path) = &filter.path_pattern {
            sql.push_str(&format!(" AND location LIKE ?{}", args.len() + 1));
            args.push(Value::from(format!("%{path}%")));
        }
        if let Some(since) = filter.since {
            sql.push_str(&format!(" AND created_at >= ?{}", args.len() + 1));
            args.push(Value::from(since));
        }
        if let Some(until) = filter.until {
            sql.push_str(&format!(" AND created_at <= ?{}", args.len() + 1));
            args.push(Value::from(until));
        }
        if let Some(min) = filter.min_confidence {
            sql.push_str(&format!(" AND confidence >= ?{}", args.len() + 1));
            args.push(Value::from(min));
        }
        if let Some(max) = filter.max_confidence {
            sql.push_str(&format!(" AND confidence <= ?{}", args.len() + 1));
            args.push(Value::from(max));
        }
        if let Some(layers) = &filter.layers {
            sql.push_str(" AND layer IN (");
            for (i, layer) in layers.iter().enumerate() {
                if i > 0 {
                    sql.push(',');
                }
                sql.push_str(&format!("?{}", args.len() + 1));
                args.push(Value::from(layer.as_str().to_string()));
            }
            sql.push(')');
        }

        match filter.order {
            OrderBy::Timestamp => sql.push_str(" ORDER BY created_at DESC, event_id DESC"),
            OrderBy::Confidence => {
                sql.push_str(" ORDER BY confidence DESC NULLS LAST, event_id DESC");
            }
        }
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
            if let Some(offset) = filter.offset {
                sql.push_str(&format!(" OFFSET {offset}"));
            }
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), row_to_event)?;
        let mut out = Vec::new();
        for row in rows {
            match row? {
                Ok(event) => out.push(event),
                Err(ty) => warn!(event_type = %ty, "skipping stored row with unknown event type"),
            }
        }
        Ok(out)
    }

    /// All events for one node id, ordered by commit timestamp.
    pub fn evolution_of(&self, node_id: &str, filter: &EventFilter) -> Result<Vec<StoredEvent>> {
        let mut events = self.query_events(&EventFilter {
            node_pattern: None,
            ..filter.clone()
        })?;
        events.retain(|e| e.event.node_id == node_id);
        events.sort_by_key(|e| (e.created_at, e.event_id));
        Ok(events)
    }

    /// All events recorded against one commit, in insertion order.
    pub fn events_for_commit(&self, commit_hash: &str) -> Result<Vec<StoredEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT event_id, commit_hash, branch, event_type, node_id, location, details,
                    layer, confidence, reasoning, impact, created_at, author
             FROM semantic_events WHERE commit_hash = ?1 ORDER BY event_id",
        )?;
        let rows = stmt.query_map(params![commit_hash], row_to_event)?;
        let mut out = Vec::new();
        for row in rows {
            match row? {
                Ok(event) => out.push(event),
                Err(ty) => warn!(event_type = %ty, "skipping stored row with unknown event type"),
            }
        }
        Ok(out)
    }

    /// Events on `branch_a` not present on `branch_b` (and the reverse),
    /// keyed by (event_type, node_id, details).
    pub fn branch_event_diff(
        &self,
        branch_a: &str,
        branch_b: &str,
    ) -> Result<(Vec<StoredEvent>, Vec<StoredEvent>)> {
        let key =
            |e: &StoredEvent| (e.event.event_type, e.event.node_id.clone(), e.event.details.clone());
        let a = self.query_events(&EventFilter {
            branch: Some(branch_a.to_string()),
            ..EventFilter::default()
        })?;
        let b = self.query_events(&EventFilter {
            branch: Some(branch_b.to_string()),
            ..EventFilter::default()
        })?;
        let keys_a: HashSet<_> = a.iter().map(&key).collect();
        let keys_b: HashSet<_> = b.iter().map(&key).collect();
        let only_a = a
            .iter()
            .filter(|e| !keys_b.contains(&key(e)))
            .cloned()
            .collect();
        let only_b = b
            .iter()
            .filter(|e| !keys_a.contains(&key(e)))
            .cloned()
            .collect();
        Ok((only_a, only_b))
    }

    /// Delete commits and events whose hash is not in the caller-supplied
    /// reachable set.
    pub fn cleanup_unreachable(&mut self, reachable: &HashSet<String>) -> Result<CleanupReport> {
        let tx = self.conn.transaction()?;
        tx.execute_batch("CREATE TEMP TABLE IF NOT EXISTS reachable (hash TEXT PRIMARY KEY)")?;
        tx.execute("DELETE FROM reachable", [])?;
        {
            let mut stmt = tx.prepare("INSERT OR IGNORE INTO reachable (hash) VALUES (?1)")?;
            for hash in reachable {
                stmt.execute(params![hash])?;
            }
        }
        let events_deleted = tx.execute(
            "DELETE FROM semantic_events
             WHERE commit_hash NOT IN (SELECT hash FROM reachable)",
            [],
        )?;
        let commits_deleted = tx.execute(
            "DELETE FROM commits WHERE commit_hash NOT IN (SELECT hash FROM reachable)",
            [],
        )?;
        tx.execute_batch("DROP TABLE reachable")?;
        tx.commit()?;
        info!(commits_deleted, events_deleted, "cleanup of unreachable commits done");
        Ok(CleanupReport {
            commits_deleted,
            events_deleted,
        })
    }

    /// Aggregate counters and distributions.
    pub fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats {
            commit_count: self
                .conn
                .query_row("SELECT COUNT(*) FROM commits", [], |r| r.get(0))?,
            event_count: self
                .conn
                .query_row("SELECT COUNT(*) FROM semantic_events", [], |r| r.get(0))?,
            distinct_event_types: self.conn.query_row(
                "SELECT COUNT(DISTINCT event_type) FROM semantic_events",
                [],
                |r| r.get(0),
            )?,
            ..StoreStats::default()
        };
        stats.events_per_layer = self.grouped("layer")?;
        stats.events_per_author = self.grouped("author")?;
        stats.events_per_type = self.grouped("event_type")?;
        stats.events_per_branch = self.grouped("branch")?;
        Ok(stats)
    }

    fn grouped(&self, column: &str) -> Result<BTreeMap<String, i64>> {
        // Column names come from a fixed internal list, never user input.
        let sql = format!("SELECT {column}, COUNT(*) FROM semantic_events GROUP BY {column}");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
        let mut map = BTreeMap::new();
        for row in rows {
            let (k, v) = row?;
            map.insert(k, v);
        }
        Ok(map)
    }

    /// Hashes of commits marked analyzed, newest first.
    pub fn analyzed_commits(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT commit_hash FROM commits WHERE analyzed = 1 ORDER BY timestamp DESC",
        )?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn insert_event(
    tx: &rusqlite::Transaction<'_>,
    commit_hash: &str,
    branch: &str,
    author: &str,
    timestamp: i64,
    event: &SemanticEvent,
) -> Result<()> {
    let layer = event.layer();
    tx.execute(
        "INSERT INTO semantic_events
             (commit_hash, branch, event_type, node_id, location, details,
              layer, layer_description, confidence, reasoning, impact, created_at, author)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            commit_hash,
            branch,
            event.event_type.as_str(),
            event.node_id,
            event.location,
            event.details,
            layer.as_str(),
            layer.description(),
            event.confidence,
            event.reasoning,
            event.impact,
            timestamp,
            author,
        ],
    )?;
    Ok(())
}

/// Map one row; inner `Err(type_string)` flags an unknown stored type.
#[allow(clippy::type_complexity)]
fn row_to_event(
    row: &rusqlite::Row<'_>,
) -> std::result::Result<std::result::Result<StoredEvent, String>, rusqlite::Error> {
    let type_str: String = row.get(3)?;
    let layer_str: String = row.get(7)?;
    let Some(event_type) = EventType::parse(&type_str) else {
        return Ok(Err(type_str));
    };
    let layer = Layer::parse(&layer_str).unwrap_or_else(|| event_type.layer());
    Ok(Ok(StoredEvent {
        event_id: row.get(0)?,
        commit_hash: row.get(1)?,
        branch: row.get(2)?,
        author: row.get(12)?,
        created_at: row.get(11)?,
        layer,
        event: SemanticEvent {
            event_type,
            node_id: row.get(4)?,
            location: row.get(5)?,
            details: row.get(6)?,
            confidence: row.get(8)?,
            reasoning: row.get(9)?,
            impact: row.get(10)?,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::EventType;

    fn meta(hash: &str, branch: &str, ts: i64) -> CommitMeta {
        CommitMeta {
            hash: hash.to_string(),
            branch: branch.to_string(),
            author: "Test User <test@example.com>".to_string(),
            timestamp: ts,
            message: "test commit".to_string(),
            parent_hashes: Vec::new(),
        }
    }

    fn event(ty: EventType, node: &str, details: &str) -> SemanticEvent {
        SemanticEvent::deterministic(ty, node, "a.py", details)
    }

    #[test]
    fn append_rejects_unknown_commit() {
        let mut store = Store::open_in_memory().unwrap();
        let err = store
            .replace_events("deadbeef", &[event(EventType::FileAdded, "file:a.py", "d")])
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownCommit(_)));
    }

    #[test]
    fn replace_is_idempotent_per_commit() {
        let mut store = Store::open_in_memory().unwrap();
        store.record_commit(&meta("c1", "main", 100)).unwrap();
        let events = vec![
            event(EventType::FileAdded, "file:a.py", "file a.py added"),
            event(EventType::NodeAdded, "func:f", "function 'f' added"),
        ];
        store.replace_events("c1", &events).unwrap();
        store.replace_events("c1", &events).unwrap();
        assert_eq!(store.events_for_commit("c1").unwrap().len(), 2);
        assert!(store.is_analyzed("c1").unwrap());
    }

    #[test]
    fn merge_deduplicates_by_tuple() {
        let mut store = Store::open_in_memory().unwrap();
        store.record_commit(&meta("c1", "main", 100)).unwrap();
        let events = vec![event(EventType::NodeAdded, "func:f", "function 'f' added")];
        store.replace_events("c1", &events).unwrap();
        let inserted = store.merge_events("c1", &events).unwrap();
        assert_eq!(inserted, 0);
        let more = vec![event(EventType::SignatureChanged, "func:f", "(a) -> (a, b)")];
        assert_eq!(store.merge_events("c1", &more).unwrap(), 1);
        assert_eq!(store.events_for_commit("c1").unwrap().len(), 2);
    }

    #[test]
    fn query_filters_compose() {
        let mut store = Store::open_in_memory().unwrap();
        store.record_commit(&meta("c1", "main", 100)).unwrap();
        store.record_commit(&meta("c2", "feature", 200)).unwrap();
        store
            .replace_events("c1", &[event(EventType::FileAdded, "file:a.py", "d")])
            .unwrap();
        store
            .replace_events(
                "c2",
                &[
                    event(EventType::NodeAdded, "func:f", "d"),
                    SemanticEvent::scored(
                        EventType::CodeSimplification,
                        "func:f",
                        "a.py",
                        "d",
                        0.8,
                        "r",
                        "i",
                    ),
                ],
            )
            .unwrap();

        let by_branch = store
            .query_events(&EventFilter {
                branch: Some("feature".to_string()),
                ..EventFilter::default()
            })
            .unwrap();
        assert_eq!(by_branch.len(), 2);

        let by_confidence = store
            .query_events(&EventFilter {
                min_confidence: Some(0.5),
                ..EventFilter::default()
            })
            .unwrap();
        assert_eq!(by_confidence.len(), 1);

        let by_type = store
            .query_events(&EventFilter {
                event_types: Some(vec![EventType::FileAdded, EventType::NodeAdded]),
                ..EventFilter::default()
            })
            .unwrap();
        assert_eq!(by_type.len(), 2);

        let by_layer = store
            .query_events(&EventFilter {
                layers: Some(vec![Layer::Patterns]),
                ..EventFilter::default()
            })
            .unwrap();
        assert_eq!(by_layer.len(), 1);

        let limited = store
            .query_events(&EventFilter {
                limit: Some(1),
                offset: Some(1),
                ..EventFilter::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn cleanup_deletes_exactly_the_unreachable() {
        let mut store = Store::open_in_memory().unwrap();
        store.record_commit(&meta("keep", "main", 100)).unwrap();
        store.record_commit(&meta("drop", "main", 200)).unwrap();
        store
            .replace_events("keep", &[event(EventType::FileAdded, "file:a.py", "d")])
            .unwrap();
        store
            .replace_events("drop", &[event(EventType::FileRemoved, "file:a.py", "d")])
            .unwrap();

        let reachable: HashSet<String> = ["keep".to_string()].into_iter().collect();
        let report = store.cleanup_unreachable(&reachable).unwrap();
        assert_eq!(report.commits_deleted, 1);
        assert_eq!(report.events_deleted, 1);
        assert_eq!(store.events_for_commit("keep").unwrap().len(), 1);
        assert!(store.events_for_commit("drop").unwrap().is_empty());
    }

    #[test]
    fn stats_aggregate_by_layer_and_author() {
        let mut store = Store::open_in_memory().unwrap();
        store.record_commit(&meta("c1", "main", 100)).unwrap();
        store
            .replace_events(
                "c1",
                &[
                    event(EventType::FileAdded, "file:a.py", "d"),
                    event(EventType::SignatureChanged, "func:f", "d"),
                ],
            )
            .unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.commit_count, 1);
        assert_eq!(stats.event_count, 2);
        assert_eq!(stats.distinct_event_types, 2);
        assert_eq!(stats.events_per_layer.get("1"), Some(&1));
        assert_eq!(stats.events_per_layer.get("2"), Some(&1));
    }

    #[test]
    fn evolution_orders_by_commit_time() {
        let mut store = Store::open_in_memory().unwrap();
        store.record_commit(&meta("old", "main", 100)).unwrap();
        store.record_commit(&meta("new", "main", 200)).unwrap();
        store
            .replace_events("new", &[event(EventType::SignatureChanged, "func:f", "later")])
            .unwrap();
        store
            .replace_events("old", &[event(EventType::NodeAdded, "func:f", "first")])
            .unwrap();
        let evolution = store.evolution_of("func:f", &EventFilter::default()).unwrap();
        assert_eq!(evolution.len(), 2);
        assert_eq!(evolution[0].event.details, "first");
        assert_eq!(evolution[1].event.details, "later");
    }

    #[test]
    fn branch_diff_keys_on_type_node_details() {
        let mut store = Store::open_in_memory().unwrap();
        store.record_commit(&meta("c1", "main", 100)).unwrap();
        store.record_commit(&meta("c2", "feature", 200)).unwrap();
        store
            .replace_events("c1", &[event(EventType::NodeAdded, "func:shared", "d")])
            .unwrap();
        store
            .replace_events(
                "c2",
                &[
                    event(EventType::NodeAdded, "func:shared", "d"),
                    event(EventType::NodeAdded, "func:only_feature", "d"),
                ],
            )
            .unwrap();
        let (only_main, only_feature) = store.branch_event_diff("main", "feature").unwrap();
        assert!(only_main.is_empty());
        assert_eq!(only_feature.len(), 1);
        assert_eq!(only_feature[0].event.node_id, "func:only_feature");
    }
}
