//! likeness-core: Identity resolution pipeline.
//!
//! Quality-gates detections, normalizes embeddings, resolves top-K store
//! neighbors into a MATCH / UNCERTAIN / UNKNOWN decision, and keeps each
//! identity's enrolled embeddings consistent. Face models and persistent
//! storage plug in through the [`FaceAnalyzer`] and [`IdentityStore`] traits.

pub mod analyzer;
pub mod config;
pub mod embedding;
pub mod enrollment;
pub mod evaluation;
pub mod matcher;
pub mod pipeline;
pub mod quality;
pub mod recognition;
pub mod source;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use analyzer::{AnalyzerError, FaceAnalyzer};
pub use config::{ConfigError, Settings};
pub use embedding::{Embedding, EmbeddingNormalizer, EmbeddingRejection};
pub use enrollment::{EnrollError, EnrollPolicy, EnrollmentCoordinator, EnrollmentReport, EnrollmentStatus};
pub use evaluation::{evaluate_dataset, EvaluationTally};
pub use matcher::VoteAggregator;
pub use quality::{QualityGate, QualityRejection, QualityVerdict};
pub use recognition::{RecognitionCoordinator, RecognitionRecord, RecognizeError};
pub use source::{ImageLoader, SourceError, SourceImage};
pub use store::{IdentityStore, MemoryStore, StoreError};
pub use types::{BoundingBox, Decision, Detection, Landmarks, MatchResult, NeighborMatch, SampleMetadata};
