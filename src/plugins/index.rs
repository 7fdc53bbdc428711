//! Semantic index: content + embedding + metadata, queried by cosine
//! similarity.
//!
//! The memory bus only depends on the [`SemanticIndex`] trait. The SQLite
//! implementation here stores embeddings as JSON arrays and scores every
//! entry on query, which is fine for the local, single-writer scale this
//! crate targets.

use crate::core::broker::DbBroker;
use crate::core::error::SwitchyardError;
use crate::core::schemas;
use crate::core::store::Store;
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::path::PathBuf;

pub type Metadata = Map<String, JsonValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexHit {
    pub key: String,
    pub score: f64,
    pub metadata: Metadata,
    pub content: String,
}

pub trait SemanticIndex {
    fn upsert(&self, key: &str, content: &str, metadata: &Metadata) -> Result<(), SwitchyardError>;
    fn delete(&self, key: &str) -> Result<(), SwitchyardError>;
    /// Top `top_k` entries by similarity to `text`, best first.
    fn query(&self, text: &str, top_k: usize) -> Result<Vec<IndexHit>, SwitchyardError>;
    fn count(&self) -> Result<usize, SwitchyardError>;
    fn contains(&self, key: &str) -> Result<bool, SwitchyardError>;
}

pub trait Embedder {
    fn dim(&self) -> usize;
    fn embed(&self, text: &str) -> Vec<f32>;
}

/// Deterministic stand-in for a learned embedding: each character adds 1.0
/// to bucket `(code point + position) mod dim`, then the vector is
/// L2-normalised.
#[derive(Debug, Clone, Copy)]
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }
}

impl Embedder for HashEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut buckets = vec![0.0f32; self.dim];
        for (idx, ch) in text.chars().enumerate() {
            let bucket = (ch as usize).wrapping_add(idx) % self.dim;
            buckets[bucket] += 1.0;
        }
        let norm = buckets.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut buckets {
                *v /= norm;
            }
        }
        buckets
    }
}

/// Cosine similarity; 0.0 for empty, zero-norm or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Ranks `(key, embedding, ...)` candidates against `query`. The sort is
/// stable, so equal scores keep candidate (store iteration) order.
pub fn rank_by_similarity(query: &[f32], candidates: Vec<(Vec<f32>, IndexHit)>, top_k: usize) -> Vec<IndexHit> {
    let mut scored: Vec<IndexHit> = candidates
        .into_iter()
        .map(|(embedding, mut hit)| {
            hit.score = cosine_similarity(query, &embedding);
            hit
        })
        .collect();
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(top_k);
    scored
}

pub struct SqliteSemanticIndex<E: Embedder = HashEmbedder> {
    db_path: PathBuf,
    broker: DbBroker,
    embedder: E,
}

impl SqliteSemanticIndex<HashEmbedder> {
    pub fn open(store: &Store, dim: usize) -> Result<Self, SwitchyardError> {
        Self::with_embedder(store, HashEmbedder::new(dim))
    }
}

impl<E: Embedder> SqliteSemanticIndex<E> {
    pub fn with_embedder(store: &Store, embedder: E) -> Result<Self, SwitchyardError> {
        let this = Self {
            db_path: store.index_db_path(),
            broker: DbBroker::new(&store.root, "index"),
            embedder,
        };
        this.broker.with_conn(&this.db_path, "index.init", |conn| {
            conn.execute(schemas::INDEX_DB_SCHEMA_ENTRIES, [])?;
            Ok(())
        })?;
        Ok(this)
    }

    /// Stored content for `key`, if present.
    pub fn get(&self, key: &str) -> Result<Option<(String, Metadata)>, SwitchyardError> {
        self.broker.with_conn(&self.db_path, "index.get", |conn| {
            let row: Option<(String, String)> = conn
                .query_row(
                    "SELECT content, metadata FROM entries WHERE key = ?1",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            match row {
                Some((content, metadata)) => Ok(Some((content, serde_json::from_str(&metadata)?))),
                None => Ok(None),
            }
        })
    }
}

impl<E: Embedder> SemanticIndex for SqliteSemanticIndex<E> {
    fn upsert(&self, key: &str, content: &str, metadata: &Metadata) -> Result<(), SwitchyardError> {
        let embedding = serde_json::to_string(&self.embedder.embed(content))?;
        let metadata = serde_json::to_string(metadata)?;
        self.broker.with_tx(&self.db_path, "index.upsert", |tx| {
            tx.execute(
                "INSERT INTO entries(key, embedding, metadata, content) VALUES(?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                     embedding = excluded.embedding,
                     metadata = excluded.metadata,
                     content = excluded.content",
                params![key, embedding, metadata, content],
            )?;
            Ok(())
        })?;
        tracing::debug!(key, "index entry upserted");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), SwitchyardError> {
        self.broker.with_tx(&self.db_path, "index.delete", |tx| {
            tx.execute("DELETE FROM entries WHERE key = ?1", params![key])?;
            Ok(())
        })
    }

    fn query(&self, text: &str, top_k: usize) -> Result<Vec<IndexHit>, SwitchyardError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let query = self.embedder.embed(text);
        let candidates = self.broker.with_conn(&self.db_path, "index.query", |conn| {
            let mut stmt =
                conn.prepare("SELECT key, embedding, metadata, content FROM entries ORDER BY seq")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?;
            let mut out = Vec::new();
            for r in rows {
                let (key, embedding, metadata, content) = r?;
                let embedding: Vec<f32> = serde_json::from_str(&embedding)?;
                let metadata: Metadata = serde_json::from_str(&metadata)?;
                out.push((
                    embedding,
                    IndexHit {
                        key,
                        score: 0.0,
                        metadata,
                        content,
                    },
                ));
            }
            Ok(out)
        })?;
        Ok(rank_by_similarity(&query, candidates, top_k))
    }

    fn count(&self) -> Result<usize, SwitchyardError> {
        self.broker.with_conn(&self.db_path, "index.count", |conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
            Ok(n as usize)
        })
    }

    fn contains(&self, key: &str) -> Result<bool, SwitchyardError> {
        self.broker.with_conn(&self.db_path, "index.contains", |conn| {
            let found: Option<i64> = conn
                .query_row("SELECT 1 FROM entries WHERE key = ?1", params![key], |row| row.get(0))
                .optional()?;
            Ok(found.is_some())
        })
    }
}
