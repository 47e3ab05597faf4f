//! [`IdentityStore`] over a single SQLite table.
//!
//! Embeddings are stored as little-endian `f32` blobs with their dimension,
//! sample metadata as JSON. Queries are an exhaustive cosine scan.

use std::path::Path;

use likeness_core::store::{IdentityStore, StoreError};
use likeness_core::types::IdentitySummary;
use likeness_core::{Embedding, NeighborMatch, SampleMetadata};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SqliteStoreError>;

#[derive(Debug, Error)]
pub enum SqliteStoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("metadata encoding: {0}")]
    Json(#[from] serde_json::Error),
    #[error("embedding dimension {actual} does not match store dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("invalid database value: {0}")]
    InvalidDbValue(String),
}

impl From<SqliteStoreError> for StoreError {
    fn from(err: SqliteStoreError) -> Self {
        match err {
            SqliteStoreError::DimensionMismatch { expected, actual } => {
                StoreError::DimensionMismatch { expected, actual }
            }
            other => StoreError::backend(other),
        }
    }
}

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS face_embeddings (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    identity TEXT NOT NULL CHECK(length(identity) > 0),
    dimension INTEGER NOT NULL CHECK(dimension > 0),
    embedding BLOB NOT NULL,
    metadata TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_face_embeddings_identity
    ON face_embeddings(identity);
";

pub struct SqliteIdentityStore {
    conn: Connection,
}

impl SqliteIdentityStore {
    /// Open or create the database, creating parent directories as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "opened identity store");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    /// Dimension of the stored embeddings, if any are stored.
    pub fn dimension(&self) -> Result<Option<usize>> {
        let dim: Option<i64> = self
            .conn
            .query_row("SELECT dimension FROM face_embeddings LIMIT 1", [], |row| row.get(0))
            .optional()?;
        dim.map(dimension_from_db).transpose()
    }

    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM face_embeddings", [], |row| row.get(0))?;
        usize::try_from(n).map_err(|_| SqliteStoreError::InvalidDbValue(format!("row count {n}")))
    }

    fn insert_row(&self, identity: &str, embedding: &Embedding, metadata: &SampleMetadata) -> Result<()> {
        if let Some(expected) = self.dimension()? {
            if embedding.dimension() != expected {
                return Err(SqliteStoreError::DimensionMismatch {
                    expected,
                    actual: embedding.dimension(),
                });
            }
        }
        let dimension = i64::try_from(embedding.dimension())
            .map_err(|_| SqliteStoreError::InvalidDbValue("dimension overflow".into()))?;
        self.conn.execute(
            "INSERT INTO face_embeddings (id, identity, dimension, embedding, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                uuid::Uuid::new_v4().to_string(),
                identity,
                dimension,
                encode_f32_blob(embedding.values()),
                serde_json::to_string(metadata)?,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn query_rows(&self, probe: &Embedding, k: usize) -> Result<Vec<NeighborMatch>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let dimension = i64::try_from(probe.dimension())
            .map_err(|_| SqliteStoreError::InvalidDbValue("dimension overflow".into()))?;
        let mut stmt = self.conn.prepare(
            "SELECT seq, identity, embedding, metadata
             FROM face_embeddings
             WHERE dimension = ?1
             ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![dimension], |row| {
            let seq: i64 = row.get(0)?;
            let identity: String = row.get(1)?;
            let blob: Vec<u8> = row.get(2)?;
            let metadata: String = row.get(3)?;
            Ok((seq, identity, blob, metadata))
        })?;

        let mut hits: Vec<(f32, i64, NeighborMatch)> = Vec::new();
        for row in rows {
            let (seq, identity, blob, metadata) = row?;
            let values = decode_f32_blob(&blob, probe.dimension())?;
            let stored = Embedding::from_stored(values)
                .ok_or_else(|| SqliteStoreError::InvalidDbValue(format!("row {seq}: embedding is not unit length")))?;
            let metadata: SampleMetadata = serde_json::from_str(&metadata)?;
            let distance = stored.cosine_distance(probe);
            hits.push((distance, seq, NeighborMatch::new(identity, distance).with_metadata(metadata)));
        }

        hits.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        hits.truncate(k);
        tracing::debug!(returned = hits.len(), "sqlite query");
        Ok(hits.into_iter().map(|(_, _, hit)| hit).collect())
    }

    fn delete_rows(&self, identity: &str) -> Result<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM face_embeddings WHERE identity = ?1", params![identity])?;
        tracing::debug!(identity, removed, "deleted identity rows");
        Ok(removed)
    }

    fn exists_row(&self, identity: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM face_embeddings WHERE identity = ?1 LIMIT 1",
                params![identity],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn summaries(&self) -> Result<Vec<IdentitySummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT identity, COUNT(*) FROM face_embeddings GROUP BY identity ORDER BY identity ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            let identity: String = row.get(0)?;
            let samples: i64 = row.get(1)?;
            Ok((identity, samples))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (identity, samples) = row?;
            let samples = usize::try_from(samples)
                .map_err(|_| SqliteStoreError::InvalidDbValue(format!("sample count {samples}")))?;
            out.push(IdentitySummary { identity, samples });
        }
        Ok(out)
    }
}

impl IdentityStore for SqliteIdentityStore {
    fn insert(
        &mut self,
        identity: &str,
        embedding: &Embedding,
        metadata: &SampleMetadata,
    ) -> std::result::Result<(), StoreError> {
        if identity.is_empty() {
            return Err(StoreError::EmptyIdentity);
        }
        Ok(self.insert_row(identity, embedding, metadata)?)
    }

    fn query(&self, embedding: &Embedding, k: usize) -> std::result::Result<Vec<NeighborMatch>, StoreError> {
        Ok(self.query_rows(embedding, k)?)
    }

    fn delete_by_identity(&mut self, identity: &str) -> std::result::Result<usize, StoreError> {
        Ok(self.delete_rows(identity)?)
    }

    fn exists(&self, identity: &str) -> std::result::Result<bool, StoreError> {
        Ok(self.exists_row(identity)?)
    }

    fn list_all(&self) -> std::result::Result<Vec<IdentitySummary>, StoreError> {
        Ok(self.summaries()?)
    }
}

fn dimension_from_db(value: i64) -> Result<usize> {
    usize::try_from(value).map_err(|_| SqliteStoreError::InvalidDbValue(format!("dimension {value}")))
}

fn encode_f32_blob(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(std::mem::size_of_val(vector));
    for &value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_f32_blob(blob: &[u8], dimension: usize) -> Result<Vec<f32>> {
    let expected_len = dimension * std::mem::size_of::<f32>();
    if blob.len() != expected_len {
        return Err(SqliteStoreError::InvalidDbValue(format!(
            "embedding byte length: expected {expected_len}, got {}",
            blob.len()
        )));
    }
    let mut out = Vec::with_capacity(dimension);
    for chunk in blob.chunks_exact(4) {
        let value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        if !value.is_finite() {
            return Err(SqliteStoreError::InvalidDbValue(
                "embedding contains non-finite values".to_string(),
            ));
        }
        out.push(value);
    }
    Ok(out)
}
