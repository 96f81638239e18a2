//! CMI storage.
//!
//! Upsert is idempotent on the composite key and skips the write entirely
//! when the tracked fields are unchanged, so re-indexing an untouched memory
//! is a no-op.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::embedding::{cosine_similarity, Embedding};
use crate::error::CmiError;
use crate::store::Database;

/// Tracked field caps
const TITLE_MAX: usize = 60;
const SUMMARY_MAX: usize = 120;
const SET_MAX: usize = 10;

/// CMI result type
pub type Result<T> = std::result::Result<T, CmiError>;

// ============================================================================
// TYPES
// ============================================================================

/// Tracked text fields mirrored from module enrichment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CmiFields {
    /// Display title, truncated to 60 chars
    pub title: String,
    /// One-line summary, truncated to 120 chars
    pub summary: String,
    /// Keyword set, at most 10
    pub keywords: Vec<String>,
    /// Category set, at most 10
    pub categories: Vec<String>,
    /// Importance in [0,1]; routing tie-break
    pub importance_score: f32,
}

impl CmiFields {
    fn clamped(&self) -> CmiFields {
        CmiFields {
            title: truncate_chars(&self.title, TITLE_MAX),
            summary: truncate_chars(&self.summary, SUMMARY_MAX),
            keywords: self.keywords.iter().take(SET_MAX).cloned().collect(),
            categories: self.categories.iter().take(SET_MAX).cloned().collect(),
            importance_score: self.importance_score.clamp(0.0, 1.0),
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// A full index row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CmiEntry {
    /// Owning user
    pub user_id: String,
    /// Module that owns the memory
    pub module_id: String,
    /// Memory id inside that module
    pub remote_memory_id: String,
    /// Tracked fields
    #[serde(flatten)]
    pub fields: CmiFields,
    /// Routing-hit counter
    pub access_count: u64,
}

/// One scored index row from a routing scan
#[derive(Debug, Clone)]
pub struct CmiHit {
    /// Module that owns the memory
    pub module_id: String,
    /// Memory id inside that module
    pub remote_memory_id: String,
    /// Cosine score of the compressed vectors
    pub score: f32,
    /// Importance of the indexed memory
    pub importance_score: f32,
}

// ============================================================================
// INDEX
// ============================================================================

/// The Central Memory Index table
pub struct CmiIndex {
    writer: Arc<Mutex<Connection>>,
    reader: Mutex<Connection>,
    compressed_dim: usize,
}

impl CmiIndex {
    /// Attach to the shared database.
    pub fn new(db: &Database, compressed_dim: usize) -> Result<Self> {
        let reader = db
            .open_reader()
            .map_err(|e| CmiError::Init(e.to_string()))?;
        Ok(Self {
            writer: db.writer(),
            reader: Mutex::new(reader),
            compressed_dim,
        })
    }

    fn check_vector(&self, cvec: &Embedding) -> Result<()> {
        if cvec.dimensions() != self.compressed_dim {
            return Err(CmiError::InvalidDimensions {
                expected: self.compressed_dim,
                got: cvec.dimensions(),
            });
        }
        Ok(())
    }

    /// Upsert one index row. Returns false when the row already carried
    /// identical tracked fields and vector (the no-op path).
    pub fn index_memory(
        &self,
        user_id: &str,
        module_id: &str,
        remote_id: &str,
        cvec: &Embedding,
        fields: &CmiFields,
    ) -> Result<bool> {
        self.check_vector(cvec)?;
        let fields = fields.clamped();
        let cvec_bytes = cvec.to_bytes();

        if let Some((existing_vec, existing_fields)) =
            self.fetch_tracked(user_id, module_id, remote_id)?
        {
            if existing_vec == cvec_bytes && existing_fields == fields {
                return Ok(false);
            }
        }

        let now = Utc::now().to_rfc3339();
        let keywords = serde_json::to_string(&fields.keywords).unwrap_or_else(|_| "[]".into());
        let categories = serde_json::to_string(&fields.categories).unwrap_or_else(|_| "[]".into());

        let writer = self
            .writer
            .lock()
            .map_err(|_| CmiError::LockPoisoned("writer"))?;
        writer.execute(
            "INSERT INTO cmi_index (
                user_id, module_id, remote_memory_id, cvec,
                title, summary, keywords, categories, importance_score,
                access_count, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10, ?10)
            ON CONFLICT (user_id, module_id, remote_memory_id) DO UPDATE SET
                cvec = excluded.cvec,
                title = excluded.title,
                summary = excluded.summary,
                keywords = excluded.keywords,
                categories = excluded.categories,
                importance_score = excluded.importance_score,
                updated_at = excluded.updated_at",
            params![
                user_id,
                module_id,
                remote_id,
                cvec_bytes,
                fields.title,
                fields.summary,
                keywords,
                categories,
                fields.importance_score,
                now,
            ],
        )?;
        Ok(true)
    }

    fn fetch_tracked(
        &self,
        user_id: &str,
        module_id: &str,
        remote_id: &str,
    ) -> Result<Option<(Vec<u8>, CmiFields)>> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| CmiError::LockPoisoned("reader"))?;
        let mut stmt = reader.prepare_cached(
            "SELECT cvec, title, summary, keywords, categories, importance_score
             FROM cmi_index
             WHERE user_id = ?1 AND module_id = ?2 AND remote_memory_id = ?3",
        )?;
        stmt.query_row(params![user_id, module_id, remote_id], |row| {
            let keywords: String = row.get(3)?;
            let categories: String = row.get(4)?;
            Ok((
                row.get::<_, Vec<u8>>(0)?,
                CmiFields {
                    title: row.get(1)?,
                    summary: row.get(2)?,
                    keywords: serde_json::from_str(&keywords).unwrap_or_default(),
                    categories: serde_json::from_str(&categories).unwrap_or_default(),
                    importance_score: row.get::<_, f64>(5)? as f32,
                },
            ))
        })
        .optional()
        .map_err(CmiError::from)
    }

    /// Refresh only the tracked text fields, leaving the vector untouched
    /// (metadata-only updates never re-embed). Returns false when no index
    /// row exists - callers enqueue a reindex in that case.
    pub fn update_fields(
        &self,
        user_id: &str,
        module_id: &str,
        remote_id: &str,
        fields: &CmiFields,
    ) -> Result<bool> {
        let fields = fields.clamped();
        let keywords = serde_json::to_string(&fields.keywords).unwrap_or_else(|_| "[]".into());
        let categories = serde_json::to_string(&fields.categories).unwrap_or_else(|_| "[]".into());
        let now = Utc::now().to_rfc3339();

        let writer = self
            .writer
            .lock()
            .map_err(|_| CmiError::LockPoisoned("writer"))?;
        let changed = writer.execute(
            "UPDATE cmi_index SET
                title = ?1, summary = ?2, keywords = ?3, categories = ?4,
                importance_score = ?5, updated_at = ?6
             WHERE user_id = ?7 AND module_id = ?8 AND remote_memory_id = ?9",
            params![
                fields.title,
                fields.summary,
                keywords,
                categories,
                fields.importance_score,
                now,
                user_id,
                module_id,
                remote_id,
            ],
        )?;
        Ok(changed > 0)
    }

    /// Remove the row for a deleted memory, whichever user owns it.
    pub fn delete_index(&self, module_id: &str, remote_id: &str) -> Result<bool> {
        let writer = self
            .writer
            .lock()
            .map_err(|_| CmiError::LockPoisoned("writer"))?;
        let deleted = writer.execute(
            "DELETE FROM cmi_index WHERE module_id = ?1 AND remote_memory_id = ?2",
            params![module_id, remote_id],
        )?;
        Ok(deleted > 0)
    }

    /// Cosine top-K over this user's compressed vectors.
    pub fn top_k(&self, user_id: &str, query: &Embedding, k: usize) -> Result<Vec<CmiHit>> {
        self.check_vector(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let reader = self
            .reader
            .lock()
            .map_err(|_| CmiError::LockPoisoned("reader"))?;
        let mut stmt = reader.prepare_cached(
            "SELECT module_id, remote_memory_id, cvec, importance_score
             FROM cmi_index WHERE user_id = ?1",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
                row.get::<_, f64>(3)? as f32,
            ))
        })?;

        let mut hits = Vec::new();
        for row in rows {
            let (module_id, remote_memory_id, cvec, importance_score) = row?;
            let Some(vector) = Embedding::from_bytes(&cvec) else {
                continue;
            };
            let score = cosine_similarity(&query.vector, &vector.vector);
            hits.push(CmiHit {
                module_id,
                remote_memory_id,
                score,
                importance_score,
            });
        }

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    /// Bump routing-hit counters for returned memories (read path, async).
    pub fn touch(&self, user_id: &str, refs: &[(String, String)]) -> Result<usize> {
        if refs.is_empty() {
            return Ok(0);
        }
        let now = Utc::now().to_rfc3339();
        let writer = self
            .writer
            .lock()
            .map_err(|_| CmiError::LockPoisoned("writer"))?;
        let mut touched = 0;
        for (module_id, remote_id) in refs {
            touched += writer.execute(
                "UPDATE cmi_index
                 SET access_count = access_count + 1, last_accessed = ?1
                 WHERE user_id = ?2 AND module_id = ?3 AND remote_memory_id = ?4",
                params![now, user_id, module_id, remote_id],
            )?;
        }
        Ok(touched)
    }

    /// Whether an index row exists.
    pub fn exists(&self, user_id: &str, module_id: &str, remote_id: &str) -> Result<bool> {
        Ok(self.fetch_tracked(user_id, module_id, remote_id)?.is_some())
    }

    /// Fetch a full entry (tests and reconciliation diagnostics).
    pub fn get_entry(
        &self,
        user_id: &str,
        module_id: &str,
        remote_id: &str,
    ) -> Result<Option<CmiEntry>> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| CmiError::LockPoisoned("reader"))?;
        let mut stmt = reader.prepare_cached(
            "SELECT title, summary, keywords, categories, importance_score, access_count
             FROM cmi_index
             WHERE user_id = ?1 AND module_id = ?2 AND remote_memory_id = ?3",
        )?;
        stmt.query_row(params![user_id, module_id, remote_id], |row| {
            let keywords: String = row.get(2)?;
            let categories: String = row.get(3)?;
            Ok(CmiEntry {
                user_id: user_id.to_string(),
                module_id: module_id.to_string(),
                remote_memory_id: remote_id.to_string(),
                fields: CmiFields {
                    title: row.get(0)?,
                    summary: row.get(1)?,
                    keywords: serde_json::from_str(&keywords).unwrap_or_default(),
                    categories: serde_json::from_str(&categories).unwrap_or_default(),
                    importance_score: row.get::<_, f64>(4)? as f32,
                },
                access_count: row.get::<_, i64>(5)? as u64,
            })
        })
        .optional()
        .map_err(CmiError::from)
    }

    /// Page of `(user_id, remote_memory_id)` references for one module,
    /// ordered by creation time (reconciliation sweep).
    pub fn refs_for_module(
        &self,
        module_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<(String, String)>> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| CmiError::LockPoisoned("reader"))?;
        let mut stmt = reader.prepare_cached(
            "SELECT user_id, remote_memory_id FROM cmi_index
             WHERE module_id = ?1 ORDER BY created_at LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(params![module_id, limit as i64, offset as i64], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
        rows.collect::<std::result::Result<_, _>>()
            .map_err(CmiError::from)
    }

    /// Index rows held for one module (health metric).
    pub fn count_for_module(&self, module_id: &str) -> Result<i64> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| CmiError::LockPoisoned("reader"))?;
        reader
            .query_row(
                "SELECT COUNT(*) FROM cmi_index WHERE module_id = ?1",
                params![module_id],
                |row| row.get(0),
            )
            .map_err(CmiError::from)
    }
}

// ============================================================================
// TESTS
// ============================================================================
