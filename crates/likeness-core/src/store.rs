//! Identity store abstraction and an in-memory implementation.

use thiserror::Error;
use tracing::debug;

use crate::embedding::Embedding;
use crate::types::{IdentitySummary, NeighborMatch, SampleMetadata, StoreRecord};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("embedding dimension {actual} does not match store dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("identity must not be empty")]
    EmptyIdentity,
    #[error("store backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        StoreError::Backend(Box::new(err))
    }
}

/// Persistent mapping from identity to enrolled embeddings.
///
/// `query` returns at most `k` neighbors ordered by ascending distance.
pub trait IdentityStore {
    fn insert(
        &mut self,
        identity: &str,
        embedding: &Embedding,
        metadata: &SampleMetadata,
    ) -> Result<(), StoreError>;

    fn query(&self, embedding: &Embedding, k: usize) -> Result<Vec<NeighborMatch>, StoreError>;

    /// Remove every embedding of `identity`, returning how many were removed.
    fn delete_by_identity(&mut self, identity: &str) -> Result<usize, StoreError>;

    fn exists(&self, identity: &str) -> Result<bool, StoreError>;

    /// Identities with their sample counts, sorted by identity.
    fn list_all(&self) -> Result<Vec<IdentitySummary>, StoreError>;
}

/// Brute-force store kept in memory. Used by tests and as a scratch store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Vec<StoreRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[StoreRecord] {
        &self.records
    }
}

impl IdentityStore for MemoryStore {
    fn insert(
        &mut self,
        identity: &str,
        embedding: &Embedding,
        metadata: &SampleMetadata,
    ) -> Result<(), StoreError> {
        if identity.is_empty() {
            return Err(StoreError::EmptyIdentity);
        }
        if let Some(first) = self.records.first() {
            let expected = first.embedding.dimension();
            if embedding.dimension() != expected {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    actual: embedding.dimension(),
                });
            }
        }
        self.records.push(StoreRecord {
            id: uuid::Uuid::new_v4().to_string(),
            identity: identity.to_string(),
            embedding: embedding.clone(),
            metadata: metadata.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
        });
        Ok(())
    }

    fn query(&self, embedding: &Embedding, k: usize) -> Result<Vec<NeighborMatch>, StoreError> {
        let mut scored: Vec<(f32, usize)> = self
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.embedding.dimension() == embedding.dimension())
            .map(|(i, r)| (r.embedding.cosine_distance(embedding), i))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        scored.truncate(k);

        debug!(candidates = self.records.len(), returned = scored.len(), "memory query");
        Ok(scored
            .into_iter()
            .map(|(distance, i)| {
                let r = &self.records[i];
                NeighborMatch::new(r.identity.clone(), distance).with_metadata(r.metadata.clone())
            })
            .collect())
    }

    fn delete_by_identity(&mut self, identity: &str) -> Result<usize, StoreError> {
        let before = self.records.len();
        self.records.retain(|r| r.identity != identity);
        Ok(before - self.records.len())
    }

    fn exists(&self, identity: &str) -> Result<bool, StoreError> {
        Ok(self.records.iter().any(|r| r.identity == identity))
    }

    fn list_all(&self) -> Result<Vec<IdentitySummary>, StoreError> {
        let mut counts = std::collections::BTreeMap::<&str, usize>::new();
        for r in &self.records {
            *counts.entry(r.identity.as_str()).or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .map(|(identity, samples)| IdentitySummary {
                identity: identity.to_string(),
                samples,
            })
            .collect())
    }
}
