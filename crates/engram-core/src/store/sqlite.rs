//! SQLite Storage Implementation
//!
//! One database file backs the whole process: each module owns a logical
//! table created on demand, and the fixed tables (CMI, registry, metadata)
//! come from migrations. Connections follow the writer/reader split so every
//! handle is `Send + Sync` behind `&self` methods.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use uuid::Uuid;

use crate::config::MAX_CONTENT_BYTES;
use crate::embedding::{cosine_similarity, Embedding};
use crate::error::StoreError;
use crate::memory::{Memory, Metadata, ModuleStats};

/// Adapter result type
pub type Result<T> = std::result::Result<T, StoreError>;

/// Latency samples kept per adapter for p95 estimation
const LATENCY_WINDOW: usize = 256;

// ============================================================================
// DATABASE HANDLE
// ============================================================================

/// Shared handle to the backing SQLite file.
///
/// Owns the single writer connection; adapters and the CMI open their own
/// readers against the same path so parallel fan-out reads do not serialise
/// on one connection.
pub struct Database {
    path: PathBuf,
    writer: Arc<Mutex<Connection>>,
}

impl Database {
    /// Apply PRAGMAs to a connection
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Open (or create) the database, applying migrations.
    ///
    /// With no explicit path the platform data directory is used.
    pub fn open(db_path: Option<PathBuf>) -> Result<Self> {
        let path = match db_path {
            Some(p) => p,
            None => {
                let proj_dirs = ProjectDirs::from("dev", "engram", "core").ok_or_else(|| {
                    StoreError::Init("Could not determine project directories".to_string())
                })?;
                let data_dir = proj_dirs.data_dir();
                std::fs::create_dir_all(data_dir)?;
                data_dir.join("engram.db")
            }
        };

        let writer_conn = Connection::open(&path)?;
        Self::configure_connection(&writer_conn)?;
        super::migrations::apply_migrations(&writer_conn)?;

        Ok(Self {
            path,
            writer: Arc::new(Mutex::new(writer_conn)),
        })
    }

    /// The shared writer connection
    pub(crate) fn writer(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.writer)
    }

    /// Open a fresh read-only-use connection to the same file
    pub(crate) fn open_reader(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        Self::configure_connection(&conn)?;
        Ok(conn)
    }

    /// Database file location
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Create (if needed) and hand out the adapter for one module table.
    pub fn adapter(&self, table: &str, full_dim: usize) -> Result<SqliteVectorStore> {
        validate_table_name(table)?;
        {
            let writer = lock(&self.writer, "writer")?;
            writer.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    content TEXT NOT NULL,
                    embedding BLOB NOT NULL,
                    metadata TEXT NOT NULL DEFAULT '{{}}',
                    access_count INTEGER NOT NULL DEFAULT 0,
                    last_accessed TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_{table}_user ON {table}(user_id);
                CREATE INDEX IF NOT EXISTS idx_{table}_created ON {table}(user_id, created_at);"
            ))?;
        }

        Ok(SqliteVectorStore {
            table: table.to_string(),
            writer: self.writer(),
            reader: Mutex::new(self.open_reader()?),
            full_dim,
            metrics: AdapterMetrics::default(),
        })
    }

    /// Read the persisted projection seed, creating one on first use.
    pub fn projection_seed(&self) -> Result<u64> {
        let writer = lock(&self.writer, "writer")?;
        let existing: Option<String> = writer
            .query_row(
                "SELECT value FROM core_meta WHERE key = 'projection_seed'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(value) = existing {
            return value
                .parse()
                .map_err(|_| StoreError::Init(format!("corrupt projection seed: {value}")));
        }

        let seed: u64 = rand::random();
        writer.execute(
            "INSERT INTO core_meta (key, value) VALUES ('projection_seed', ?1)",
            params![seed.to_string()],
        )?;
        Ok(seed)
    }
}

fn lock<'a>(
    mutex: &'a Arc<Mutex<Connection>>,
    which: &'static str,
) -> Result<std::sync::MutexGuard<'a, Connection>> {
    mutex.lock().map_err(|_| StoreError::LockPoisoned(which))
}

/// Table names are spliced into SQL; only plain identifiers are accepted.
fn validate_table_name(table: &str) -> Result<()> {
    let ok = !table.is_empty()
        && table.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if ok {
        Ok(())
    } else {
        Err(StoreError::Init(format!("invalid table name: {table}")))
    }
}

// ============================================================================
// ADAPTER METRICS
// ============================================================================

/// Operation counters feeding the supervisor's health classification
#[derive(Default)]
pub struct AdapterMetrics {
    ops: AtomicU64,
    errors: AtomicU64,
    latencies_ms: Mutex<VecDeque<u32>>,
}

impl AdapterMetrics {
    fn record(&self, elapsed: Duration, failed: bool) {
        self.ops.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        if let Ok(mut window) = self.latencies_ms.lock() {
            if window.len() == LATENCY_WINDOW {
                window.pop_front();
            }
            window.push_back(elapsed.as_millis().min(u32::MAX as u128) as u32);
        }
    }

    /// Current snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let ops = self.ops.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let (average_ms, p95_ms) = match self.latencies_ms.lock() {
            Ok(window) if !window.is_empty() => {
                let mut sorted: Vec<u32> = window.iter().copied().collect();
                sorted.sort_unstable();
                let avg = sorted.iter().map(|&v| v as u64).sum::<u64>() / sorted.len() as u64;
                let p95_idx = ((sorted.len() as f64) * 0.95).ceil() as usize - 1;
                (avg as f64, sorted[p95_idx.min(sorted.len() - 1)] as f64)
            }
            _ => (0.0, 0.0),
        };

        MetricsSnapshot {
            operations: ops,
            errors,
            error_rate: if ops == 0 {
                0.0
            } else {
                errors as f64 / ops as f64
            },
            average_response_ms: average_ms,
            p95_response_ms: p95_ms,
        }
    }
}

/// Point-in-time adapter metrics
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Operations observed
    pub operations: u64,
    /// Failed operations
    pub errors: u64,
    /// errors / operations
    pub error_rate: f64,
    /// Mean latency over the sample window
    pub average_response_ms: f64,
    /// 95th percentile latency over the sample window
    pub p95_response_ms: f64,
}

// ============================================================================
// ROW INPUT
// ============================================================================

/// Input for an insert
#[derive(Debug, Clone)]
pub struct NewRow {
    /// Owning user
    pub user_id: String,
    /// Text content (<= 50 KB)
    pub content: String,
    /// Full-precision embedding
    pub embedding: Embedding,
    /// Enriched metadata
    pub metadata: Metadata,
}

// ============================================================================
// VECTOR STORE
// ============================================================================

/// Per-module persistence with cosine top-K search.
///
/// Every operation is scoped by `user_id`; no call can observe another
/// user's rows. Methods are synchronous - async callers hop through
/// `spawn_blocking` with an `Arc` of this store.
pub struct SqliteVectorStore {
    table: String,
    writer: Arc<Mutex<Connection>>,
    reader: Mutex<Connection>,
    full_dim: usize,
    metrics: AdapterMetrics,
}

impl SqliteVectorStore {
    /// The logical table backing this adapter
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Metrics snapshot for health classification
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn timed<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let start = Instant::now();
        let result = f();
        self.metrics.record(start.elapsed(), result.is_err());
        result
    }

    fn check_content(&self, content: &str) -> Result<()> {
        if content.len() > MAX_CONTENT_BYTES {
            return Err(StoreError::ContentTooLarge {
                size: content.len(),
                limit: MAX_CONTENT_BYTES,
            });
        }
        Ok(())
    }

    fn check_vector(&self, embedding: &Embedding) -> Result<()> {
        if embedding.dimensions() != self.full_dim {
            return Err(StoreError::InvalidDimensions {
                expected: self.full_dim,
                got: embedding.dimensions(),
            });
        }
        Ok(())
    }

    /// Insert a row, returning the generated id.
    pub fn insert(&self, row: NewRow) -> Result<String> {
        self.timed(|| {
            self.check_content(&row.content)?;
            self.check_vector(&row.embedding)?;

            let id = Uuid::new_v4().to_string();
            let now = Utc::now().to_rfc3339();
            let metadata_json = Value::Object(row.metadata).to_string();

            let writer = lock(&self.writer, "writer")?;
            writer.execute(
                &format!(
                    "INSERT INTO {} (id, user_id, content, embedding, metadata,
                        access_count, last_accessed, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6, ?6)",
                    self.table
                ),
                params![
                    id,
                    row.user_id,
                    row.content,
                    row.embedding.to_bytes(),
                    metadata_json,
                    now,
                ],
            )?;
            Ok(id)
        })
    }

    /// Fetch one row by id, scoped to the user.
    pub fn get(&self, user_id: &str, id: &str) -> Result<Option<Memory>> {
        self.timed(|| {
            let reader = self
                .reader
                .lock()
                .map_err(|_| StoreError::LockPoisoned("reader"))?;
            let mut stmt = reader.prepare_cached(&format!(
                "SELECT id, user_id, content, embedding, metadata,
                        access_count, last_accessed, created_at, updated_at
                 FROM {} WHERE user_id = ?1 AND id = ?2",
                self.table
            ))?;
            stmt.query_row(params![user_id, id], row_to_memory)
                .optional()
                .map_err(StoreError::from)
        })
    }

    /// Increment access counters for the given ids.
    pub fn touch(&self, user_id: &str, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.timed(|| {
            let now = Utc::now().to_rfc3339();
            let placeholders = vec!["?"; ids.len()].join(", ");
            let sql = format!(
                "UPDATE {} SET access_count = access_count + 1, last_accessed = ?1
                 WHERE user_id = ?2 AND id IN ({placeholders})",
                self.table
            );

            let writer = lock(&self.writer, "writer")?;
            let mut stmt = writer.prepare_cached(&sql)?;
            let mut values: Vec<&dyn rusqlite::ToSql> = vec![&now, &user_id];
            for id in ids {
                values.push(id);
            }
            Ok(stmt.execute(values.as_slice())?)
        })
    }

    /// Update content, embedding, and/or metadata. Returns false when the
    /// row does not exist for this user.
    pub fn update(
        &self,
        user_id: &str,
        id: &str,
        content: Option<&str>,
        embedding: Option<&Embedding>,
        metadata: Option<&Metadata>,
    ) -> Result<bool> {
        self.timed(|| {
            if let Some(content) = content {
                self.check_content(content)?;
            }
            if let Some(embedding) = embedding {
                self.check_vector(embedding)?;
            }

            let now = Utc::now().to_rfc3339();
            let mut sets = vec!["updated_at = ?1".to_string()];
            let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(now)];

            if let Some(content) = content {
                values.push(Box::new(content.to_string()));
                sets.push(format!("content = ?{}", values.len()));
            }
            if let Some(embedding) = embedding {
                values.push(Box::new(embedding.to_bytes()));
                sets.push(format!("embedding = ?{}", values.len()));
            }
            if let Some(metadata) = metadata {
                values.push(Box::new(Value::Object(metadata.clone()).to_string()));
                sets.push(format!("metadata = ?{}", values.len()));
            }

            values.push(Box::new(user_id.to_string()));
            let user_pos = values.len();
            values.push(Box::new(id.to_string()));
            let id_pos = values.len();

            let sql = format!(
                "UPDATE {} SET {} WHERE user_id = ?{} AND id = ?{}",
                self.table,
                sets.join(", "),
                user_pos,
                id_pos
            );

            let writer = lock(&self.writer, "writer")?;
            let params: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
            let changed = writer.execute(&sql, params.as_slice())?;
            Ok(changed > 0)
        })
    }

    /// Delete one row. Returns false when nothing was deleted.
    pub fn delete(&self, user_id: &str, id: &str) -> Result<bool> {
        self.timed(|| {
            let writer = lock(&self.writer, "writer")?;
            let deleted = writer.execute(
                &format!("DELETE FROM {} WHERE user_id = ?1 AND id = ?2", self.table),
                params![user_id, id],
            )?;
            Ok(deleted > 0)
        })
    }

    /// Cosine top-K over this user's rows.
    ///
    /// `filter` is an opaque metadata predicate applied after scoring
    /// (top-level key equality). Results come back sorted descending,
    /// truncated at `k`, all with `score >= min_score`.
    pub fn top_k(
        &self,
        user_id: &str,
        query: &Embedding,
        k: usize,
        min_score: f32,
        filter: Option<&Metadata>,
    ) -> Result<Vec<(Memory, f32)>> {
        self.timed(|| {
            self.check_vector(query)?;
            if k == 0 {
                return Ok(Vec::new());
            }

            let reader = self
                .reader
                .lock()
                .map_err(|_| StoreError::LockPoisoned("reader"))?;
            let mut stmt = reader.prepare_cached(&format!(
                "SELECT id, user_id, content, embedding, metadata,
                        access_count, last_accessed, created_at, updated_at
                 FROM {} WHERE user_id = ?1",
                self.table
            ))?;

            let rows = stmt.query_map(params![user_id], row_to_memory)?;
            let mut scored: Vec<(Memory, f32)> = Vec::new();
            for row in rows {
                let memory = row?;
                let Some(vector) = memory.embedding.as_deref() else {
                    continue;
                };
                let score = cosine_similarity(&query.vector, vector);
                if score < min_score {
                    continue;
                }
                if let Some(filter) = filter {
                    if !matches_filter(&memory.metadata, filter) {
                        continue;
                    }
                }
                scored.push((memory, score));
            }

            scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            scored.truncate(k);
            Ok(scored)
        })
    }

    /// Per-user statistics.
    pub fn stats(&self, user_id: &str) -> Result<ModuleStats> {
        self.timed(|| {
            let reader = self
                .reader
                .lock()
                .map_err(|_| StoreError::LockPoisoned("reader"))?;
            let mut stmt = reader.prepare_cached(&format!(
                "SELECT COUNT(*),
                        COALESCE(SUM(access_count), 0),
                        COALESCE(AVG(COALESCE(json_extract(metadata, '$.importanceScore'), 0.5)), 0),
                        MIN(created_at),
                        MAX(created_at)
                 FROM {} WHERE user_id = ?1",
                self.table
            ))?;

            stmt.query_row(params![user_id], |row| {
                let oldest: Option<String> = row.get(3)?;
                let newest: Option<String> = row.get(4)?;
                Ok(ModuleStats {
                    total_memories: row.get(0)?,
                    total_accesses: row.get(1)?,
                    average_importance: row.get::<_, f64>(2)? as f32,
                    oldest_memory: oldest.and_then(|s| s.parse().ok()),
                    newest_memory: newest.and_then(|s| s.parse().ok()),
                })
            })
            .map_err(StoreError::from)
        })
    }

    /// Total rows across all users (health metric).
    pub fn total_count(&self) -> Result<i64> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| StoreError::LockPoisoned("reader"))?;
        reader
            .query_row(&format!("SELECT COUNT(*) FROM {}", self.table), [], |row| {
                row.get(0)
            })
            .map_err(StoreError::from)
    }

    /// Whether a row exists (reconciliation probe; not user-scoped because
    /// the reconciler works from CMI rows that already carry the user).
    pub fn exists(&self, user_id: &str, id: &str) -> Result<bool> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| StoreError::LockPoisoned("reader"))?;
        let found: Option<i64> = reader
            .query_row(
                &format!(
                    "SELECT 1 FROM {} WHERE user_id = ?1 AND id = ?2",
                    self.table
                ),
                params![user_id, id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// References to rows created before the cutoff (retention pruning).
    pub fn refs_older_than(
        &self,
        cutoff: chrono::DateTime<chrono::Utc>,
        limit: usize,
    ) -> Result<Vec<(String, String)>> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| StoreError::LockPoisoned("reader"))?;
        let mut stmt = reader.prepare_cached(&format!(
            "SELECT user_id, id FROM {} WHERE created_at < ?1 ORDER BY created_at LIMIT ?2",
            self.table
        ))?;
        let rows = stmt.query_map(params![cutoff.to_rfc3339(), limit as i64], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
        rows.collect::<std::result::Result<_, _>>()
            .map_err(StoreError::from)
    }

    /// Page of `(user_id, id)` references ordered by creation time, for the
    /// reconciliation sweep.
    pub fn row_refs(&self, limit: usize, offset: usize) -> Result<Vec<(String, String)>> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| StoreError::LockPoisoned("reader"))?;
        let mut stmt = reader.prepare_cached(&format!(
            "SELECT user_id, id FROM {} ORDER BY created_at LIMIT ?1 OFFSET ?2",
            self.table
        ))?;
        let rows = stmt.query_map(params![limit as i64, offset as i64], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
        rows.collect::<std::result::Result<_, _>>()
            .map_err(StoreError::from)
    }
}

/// Top-level key equality against an opaque predicate
fn matches_filter(metadata: &Metadata, filter: &Metadata) -> bool {
    filter
        .iter()
        .all(|(key, expected)| metadata.get(key) == Some(expected))
}

fn row_to_memory(row: &rusqlite::Row<'_>) -> rusqlite::Result<Memory> {
    let embedding_blob: Vec<u8> = row.get(3)?;
    let metadata_json: String = row.get(4)?;
    let last_accessed: String = row.get(6)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;

    let metadata = serde_json::from_str::<Value>(&metadata_json)
        .ok()
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default();

    Ok(Memory {
        id: row.get(0)?,
        user_id: row.get(1)?,
        content: row.get(2)?,
        metadata,
        embedding: Embedding::from_bytes(&embedding_blob).map(|e| e.vector),
        access_count: row.get::<_, i64>(5)? as u64,
        last_accessed: last_accessed.parse().unwrap_or_else(|_| Utc::now()),
        created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
        updated_at: updated_at.parse().unwrap_or_else(|_| Utc::now()),
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_store() -> (tempfile::TempDir, Database, SqliteVectorStore) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(Some(dir.path().join("test.db"))).unwrap();
        let store = db.adapter("mem_test", 4).unwrap();
        (dir, db, store)
    }

    fn unit(values: [f32; 4]) -> Embedding {
        let mut e = Embedding::new(values.to_vec());
        e.normalize();
        e
    }

    fn new_row(user: &str, content: &str, vector: [f32; 4]) -> NewRow {
        NewRow {
            user_id: user.to_string(),
            content: content.to_string(),
            embedding: unit(vector),
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn insert_get_round_trip() {
        let (_dir, _db, store) = test_store();
        let id = store
            .insert(new_row("u1", "hello world", [1.0, 0.0, 0.0, 0.0]))
            .unwrap();

        let memory = store.get("u1", &id).unwrap().unwrap();
        assert_eq!(memory.content, "hello world");
        assert_eq!(memory.user_id, "u1");
        assert_eq!(memory.access_count, 0);
        assert!(memory.updated_at >= memory.created_at);
    }

    #[test]
    fn user_isolation_on_get() {
        let (_dir, _db, store) = test_store();
        let id = store
            .insert(new_row("u1", "secret", [1.0, 0.0, 0.0, 0.0]))
            .unwrap();
        assert!(store.get("u2", &id).unwrap().is_none());
    }

    #[test]
    fn content_limit_boundary() {
        let (_dir, _db, store) = test_store();

        let exactly = "x".repeat(MAX_CONTENT_BYTES);
        assert!(store
            .insert(new_row("u1", &exactly, [1.0, 0.0, 0.0, 0.0]))
            .is_ok());

        let over = "x".repeat(MAX_CONTENT_BYTES + 1);
        let err = store
            .insert(new_row("u1", &over, [1.0, 0.0, 0.0, 0.0]))
            .unwrap_err();
        assert!(matches!(err, StoreError::ContentTooLarge { .. }));
    }

    #[test]
    fn dimension_mismatch_rejected() {
        let (_dir, _db, store) = test_store();
        let row = NewRow {
            user_id: "u1".into(),
            content: "short vector".into(),
            embedding: Embedding::new(vec![1.0, 0.0]),
            metadata: Metadata::new(),
        };
        assert!(matches!(
            store.insert(row).unwrap_err(),
            StoreError::InvalidDimensions { expected: 4, got: 2 }
        ));
    }

    #[test]
    fn top_k_orders_and_filters() {
        let (_dir, _db, store) = test_store();
        store
            .insert(new_row("u1", "close", [1.0, 0.1, 0.0, 0.0]))
            .unwrap();
        store
            .insert(new_row("u1", "far", [0.0, 0.0, 1.0, 0.0]))
            .unwrap();
        store
            .insert(new_row("u2", "other user", [1.0, 0.0, 0.0, 0.0]))
            .unwrap();

        let hits = store
            .top_k("u1", &unit([1.0, 0.0, 0.0, 0.0]), 10, 0.5, None)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.content, "close");
        assert!(hits[0].1 >= 0.5);
    }

    #[test]
    fn top_k_zero_limit_is_empty_not_error() {
        let (_dir, _db, store) = test_store();
        store
            .insert(new_row("u1", "row", [1.0, 0.0, 0.0, 0.0]))
            .unwrap();
        let hits = store
            .top_k("u1", &unit([1.0, 0.0, 0.0, 0.0]), 0, 0.0, None)
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn metadata_filter_post_applies() {
        let (_dir, _db, store) = test_store();
        let mut tagged = new_row("u1", "tagged", [1.0, 0.0, 0.0, 0.0]);
        tagged
            .metadata
            .insert("project".into(), json!("apollo"));
        store.insert(tagged).unwrap();
        store
            .insert(new_row("u1", "untagged", [1.0, 0.0, 0.0, 0.0]))
            .unwrap();

        let mut filter = Metadata::new();
        filter.insert("project".into(), json!("apollo"));
        let hits = store
            .top_k("u1", &unit([1.0, 0.0, 0.0, 0.0]), 10, 0.0, Some(&filter))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.content, "tagged");
    }

    #[test]
    fn update_patches_fields() {
        let (_dir, _db, store) = test_store();
        let id = store
            .insert(new_row("u1", "before", [1.0, 0.0, 0.0, 0.0]))
            .unwrap();

        let updated = store
            .update("u1", &id, Some("after"), Some(&unit([0.0, 1.0, 0.0, 0.0])), None)
            .unwrap();
        assert!(updated);

        let memory = store.get("u1", &id).unwrap().unwrap();
        assert_eq!(memory.content, "after");
        let v = memory.embedding.unwrap();
        assert!((v[1] - 1.0).abs() < 1e-6);

        // Wrong user touches nothing
        assert!(!store.update("u2", &id, Some("hijack"), None, None).unwrap());
    }

    #[test]
    fn delete_is_scoped_and_reports_absence() {
        let (_dir, _db, store) = test_store();
        let id = store
            .insert(new_row("u1", "to delete", [1.0, 0.0, 0.0, 0.0]))
            .unwrap();

        assert!(!store.delete("u2", &id).unwrap());
        assert!(store.delete("u1", &id).unwrap());
        assert!(!store.delete("u1", &id).unwrap());
    }

    #[test]
    fn touch_increments_access() {
        let (_dir, _db, store) = test_store();
        let id = store
            .insert(new_row("u1", "counted", [1.0, 0.0, 0.0, 0.0]))
            .unwrap();
        store.touch("u1", &[id.clone()]).unwrap();
        store.touch("u1", &[id.clone()]).unwrap();

        let memory = store.get("u1", &id).unwrap().unwrap();
        assert_eq!(memory.access_count, 2);
        assert!(memory.last_accessed >= memory.created_at);
    }

    #[test]
    fn stats_aggregate_per_user() {
        let (_dir, _db, store) = test_store();
        let mut row = new_row("u1", "important", [1.0, 0.0, 0.0, 0.0]);
        row.metadata.insert("importanceScore".into(), json!(0.9));
        store.insert(row).unwrap();
        store
            .insert(new_row("u2", "other", [1.0, 0.0, 0.0, 0.0]))
            .unwrap();

        let stats = store.stats("u1").unwrap();
        assert_eq!(stats.total_memories, 1);
        assert!((stats.average_importance - 0.9).abs() < 1e-6);
        assert!(stats.oldest_memory.is_some());
    }

    #[test]
    fn invalid_table_name_refused() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(Some(dir.path().join("test.db"))).unwrap();
        assert!(db.adapter("mem; DROP TABLE x", 4).is_err());
        assert!(db.adapter("", 4).is_err());
        assert!(db.adapter("1bad", 4).is_err());
    }

    #[test]
    fn projection_seed_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.db");
        let first = Database::open(Some(path.clone())).unwrap().projection_seed().unwrap();
        let second = Database::open(Some(path)).unwrap().projection_seed().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn metrics_track_errors() {
        let (_dir, _db, store) = test_store();
        let _ = store.insert(new_row("u1", "ok", [1.0, 0.0, 0.0, 0.0]));
        let _ = store.insert(NewRow {
            user_id: "u1".into(),
            content: "bad".into(),
            embedding: Embedding::new(vec![1.0]),
            metadata: Metadata::new(),
        });

        let snapshot = store.metrics();
        assert_eq!(snapshot.operations, 2);
        assert_eq!(snapshot.errors, 1);
        assert!((snapshot.error_rate - 0.5).abs() < 1e-9);
    }
}
