//! Per-identity enrollment: purge, ingest the best face of each photo,
//! then verify the identity is strong enough or roll it back.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::config::{EnrollmentConfig, Settings};
use crate::embedding::EmbeddingNormalizer;
use crate::pipeline::{FacePipeline, Prepared, SkipReason};
use crate::quality::QualityGate;
use crate::source::{ImageLoader, IdentityFolder, SourceError, SourceImage};
use crate::store::{IdentityStore, StoreError};
use crate::types::SampleMetadata;

/// Metadata `source` tag for samples written by enrollment.
pub const ENROLL_SOURCE: &str = "enroll";

/// Reason reported when too few embeddings survive.
pub const INSUFFICIENT_EMBEDDINGS: &str = "insufficient embeddings";

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("invalid identity {0:?}")]
    InvalidIdentity(String),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What to do when the identity already has records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnrollPolicy {
    /// Leave the existing records untouched and report `Exists`.
    #[default]
    SkipExisting,
    /// Delete the existing records and enroll from scratch.
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrollmentStatus {
    Enrolled,
    Failed,
    Exists,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentReport {
    pub user_id: String,
    pub status: EnrollmentStatus,
    pub stored: usize,
    pub skipped_no_face: usize,
    pub skipped_quality: usize,
    pub skipped_embedding: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl EnrollmentReport {
    fn new(user_id: &str, status: EnrollmentStatus) -> Self {
        Self {
            user_id: user_id.to_string(),
            status,
            stored: 0,
            skipped_no_face: 0,
            skipped_quality: 0,
            skipped_embedding: 0,
            reason: None,
            warnings: Vec::new(),
        }
    }

    fn count_skip(&mut self, reason: &SkipReason) {
        match reason {
            SkipReason::NoFace => self.skipped_no_face += 1,
            SkipReason::Quality(_) => self.skipped_quality += 1,
            SkipReason::Embedding(_) => self.skipped_embedding += 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnrollmentCoordinator {
    pipeline: FacePipeline,
    config: EnrollmentConfig,
}

impl EnrollmentCoordinator {
    pub fn new(pipeline: FacePipeline, config: EnrollmentConfig) -> Self {
        Self { pipeline, config }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            FacePipeline::new(
                QualityGate::new(settings.quality.clone()),
                EmbeddingNormalizer::new(settings.embedding_dim),
            ),
            settings.enrollment.clone(),
        )
    }

    /// Enroll one identity from its photos.
    ///
    /// On return the store holds either no records for `identity` or at
    /// least `min_embeddings_per_user`, including when an insert or analyzer
    /// failure aborts the call. Delete failures are tolerated and surface as
    /// report warnings.
    pub fn enroll_identity<A, S>(
        &self,
        analyzer: &mut A,
        store: &mut S,
        identity: &str,
        images: &[SourceImage],
        policy: EnrollPolicy,
    ) -> Result<EnrollmentReport, EnrollError>
    where
        A: FaceAnalyzer + ?Sized,
        S: IdentityStore + ?Sized,
    {
        if identity.trim().is_empty() {
            return Err(EnrollError::InvalidIdentity(identity.to_string()));
        }

        let existing = store.exists(identity)?;
        if existing && policy == EnrollPolicy::SkipExisting {
            info!(identity, "already enrolled, skipping");
            return Ok(EnrollmentReport::new(identity, EnrollmentStatus::Exists));
        }

        let mut report = EnrollmentReport::new(identity, EnrollmentStatus::Failed);
        if existing {
            purge(store, identity, &mut report);
        }

        let limit = self.config.max_embeddings_per_user;
        if images.len() > limit {
            let note = format!("only the first {limit} of {} images were used", images.len());
            warn!(identity, "{note}");
            report.warnings.push(note);
        }

        let accepted = &images[..images.len().min(limit)];
        if let Err(e) = self.ingest(analyzer, store, identity, accepted, &mut report) {
            warn!(identity, error = %e, stored = report.stored, "enrollment aborted, rolling back");
            purge(store, identity, &mut report);
            return Err(e);
        }

        if report.stored < self.config.min_embeddings_per_user {
            warn!(
                identity,
                stored = report.stored,
                required = self.config.min_embeddings_per_user,
                "rolling back weak enrollment"
            );
            purge(store, identity, &mut report);
            report.status = EnrollmentStatus::Failed;
            report.reason = Some(INSUFFICIENT_EMBEDDINGS.to_string());
        } else {
            report.status = EnrollmentStatus::Enrolled;
            info!(identity, stored = report.stored, "identity enrolled");
        }
        Ok(report)
    }

    fn ingest<A, S>(
        &self,
        analyzer: &mut A,
        store: &mut S,
        identity: &str,
        images: &[SourceImage],
        report: &mut EnrollmentReport,
    ) -> Result<(), EnrollError>
    where
        A: FaceAnalyzer + ?Sized,
        S: IdentityStore + ?Sized,
    {
        for source in images {
            let (_, prepared) = self.pipeline.prepare_primary(analyzer, &source.image)?;
            match prepared {
                Prepared::Ready(embedding) => {
                    let metadata = SampleMetadata::new(source.name.as_str(), ENROLL_SOURCE);
                    store.insert(identity, &embedding, &metadata)?;
                    report.stored += 1;
                    debug!(identity, image = %source.name, "stored embedding");
                }
                Prepared::Skipped(reason) => {
                    debug!(identity, image = %source.name, %reason, "skipped image");
                    report.count_skip(&reason);
                }
            }
        }
        Ok(())
    }

    /// Load an identity folder and enroll it. Unreadable images fail the call.
    pub fn enroll_folder<A, S>(
        &self,
        analyzer: &mut A,
        store: &mut S,
        loader: &ImageLoader,
        folder: &IdentityFolder,
        policy: EnrollPolicy,
    ) -> Result<EnrollmentReport, EnrollError>
    where
        A: FaceAnalyzer + ?Sized,
        S: IdentityStore + ?Sized,
    {
        let images = loader.load_folder(&folder.path)?;
        self.enroll_identity(analyzer, store, &folder.identity, &images, policy)
    }
}

fn purge<S: IdentityStore + ?Sized>(store: &mut S, identity: &str, report: &mut EnrollmentReport) {
    match store.delete_by_identity(identity) {
        Ok(removed) => debug!(identity, removed, "purged records"),
        Err(e) => {
            warn!(identity, error = %e, "failed to delete records");
            report.warnings.push(format!("delete failed: {e}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MatcherConfig, QualityConfig};
    use crate::matcher::VoteAggregator;
    use crate::recognition::RecognitionCoordinator;
    use crate::store::MemoryStore;
    use crate::types::Decision;
    use crate::test_support::{
        checkerboard, face_at, flat_image, mark, source_image, FailingDeleteStore, ScriptedAnalyzer,
    };

    const DIM: usize = 4;

    fn coordinator(min: usize, max: usize) -> EnrollmentCoordinator {
        EnrollmentCoordinator::new(
            FacePipeline::new(
                QualityGate::new(QualityConfig::default()),
                EmbeddingNormalizer::new(DIM),
            ),
            EnrollmentConfig {
                max_embeddings_per_user: max,
                min_embeddings_per_user: min,
            },
        )
    }

    fn good_face(seed: f32) -> crate::types::Detection {
        face_at(10.0, 10.0, 90.0, 90.0, vec![1.0, seed, 0.0, 0.0])
    }

    /// Five photos: two usable, two without faces, one blurry.
    fn five_photos() -> (ScriptedAnalyzer, Vec<SourceImage>) {
        let analyzer = ScriptedAnalyzer::default()
            .with_image(0, vec![good_face(0.1)])
            .with_image(2, vec![good_face(0.2)])
            .with_image(4, vec![good_face(0.3)]);
        let images = vec![
            source_image("p0.jpg", mark(checkerboard(100, 100, 64, 192), 0)),
            source_image("p1.jpg", mark(checkerboard(100, 100, 64, 192), 1)),
            source_image("p2.jpg", mark(checkerboard(100, 100, 64, 192), 2)),
            source_image("p3.jpg", mark(checkerboard(100, 100, 64, 192), 3)),
            source_image("p4.jpg", mark(flat_image(100, 100, 128), 4)),
        ];
        (analyzer, images)
    }

    #[test]
    fn test_enrolls_with_mixed_photos() {
        let (mut analyzer, images) = five_photos();
        let mut store = MemoryStore::new();
        let report = coordinator(2, 20)
            .enroll_identity(&mut analyzer, &mut store, "alice", &images, EnrollPolicy::Replace)
            .unwrap();

        assert_eq!(report.status, EnrollmentStatus::Enrolled);
        assert_eq!(report.stored, 2);
        assert_eq!(report.skipped_no_face, 2);
        assert_eq!(report.skipped_quality, 1);
        assert_eq!(report.skipped_embedding, 0);
        assert!(report.reason.is_none());
        assert_eq!(store.len(), 2);
        let names: Vec<&str> = store.records().iter().map(|r| r.metadata.image_name.as_str()).collect();
        assert_eq!(names, vec!["p0.jpg", "p2.jpg"]);
        assert!(store.records().iter().all(|r| r.metadata.source == ENROLL_SOURCE));
    }

    #[test]
    fn test_weak_identity_rolled_back() {
        let (mut analyzer, images) = five_photos();
        let mut store = MemoryStore::new();
        let report = coordinator(3, 20)
            .enroll_identity(&mut analyzer, &mut store, "alice", &images, EnrollPolicy::Replace)
            .unwrap();

        assert_eq!(report.status, EnrollmentStatus::Failed);
        assert_eq!(report.stored, 2);
        assert_eq!(report.reason.as_deref(), Some(INSUFFICIENT_EMBEDDINGS));
        assert!(!store.exists("alice").unwrap());
    }

    #[test]
    fn test_existing_identity_skipped() {
        let (mut analyzer, images) = five_photos();
        let mut store = MemoryStore::new();
        let coord = coordinator(2, 20);
        coord
            .enroll_identity(&mut analyzer, &mut store, "alice", &images, EnrollPolicy::SkipExisting)
            .unwrap();
        let calls_before = analyzer.detect_calls;

        let report = coord
            .enroll_identity(&mut analyzer, &mut store, "alice", &images, EnrollPolicy::SkipExisting)
            .unwrap();
        assert_eq!(report.status, EnrollmentStatus::Exists);
        assert_eq!(report.stored, 0);
        assert_eq!(store.len(), 2);
        assert_eq!(analyzer.detect_calls, calls_before);
    }

    #[test]
    fn test_replace_is_idempotent() {
        let (mut analyzer, images) = five_photos();
        let mut store = MemoryStore::new();
        let coord = coordinator(2, 20);
        let first = coord
            .enroll_identity(&mut analyzer, &mut store, "alice", &images, EnrollPolicy::Replace)
            .unwrap();
        let snapshot: Vec<_> = store
            .records()
            .iter()
            .map(|r| (r.identity.clone(), r.embedding.clone(), r.metadata.clone()))
            .collect();

        let second = coord
            .enroll_identity(&mut analyzer, &mut store, "alice", &images, EnrollPolicy::Replace)
            .unwrap();
        let after: Vec<_> = store
            .records()
            .iter()
            .map(|r| (r.identity.clone(), r.embedding.clone(), r.metadata.clone()))
            .collect();

        assert_eq!(first, second);
        assert_eq!(snapshot, after);
    }

    #[test]
    fn test_replace_gives_same_recognition() {
        let (mut analyzer, images) = five_photos();
        let mut store = MemoryStore::new();
        let coord = coordinator(2, 20);
        let recognizer = RecognitionCoordinator::new(
            FacePipeline::new(
                QualityGate::new(QualityConfig::default()),
                EmbeddingNormalizer::new(DIM),
            ),
            VoteAggregator::new(MatcherConfig::default()),
            20,
        );

        coord
            .enroll_identity(&mut analyzer, &mut store, "alice", &images, EnrollPolicy::Replace)
            .unwrap();
        let first = recognizer.recognize(&mut analyzer, &store, &images[0].image).unwrap();

        coord
            .enroll_identity(&mut analyzer, &mut store, "alice", &images, EnrollPolicy::Replace)
            .unwrap();
        let second = recognizer.recognize(&mut analyzer, &store, &images[0].image).unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(first[0].decision, Decision::Match);
        assert_eq!(first[0].user_id.as_deref(), Some("alice"));
        assert_eq!(first[0].matched_sample.as_deref(), Some("p0.jpg"));
        assert_eq!(first, second);
    }

    #[test]
    fn test_other_identities_untouched() {
        let (mut analyzer, images) = five_photos();
        let mut store = MemoryStore::new();
        let coord = coordinator(2, 20);
        coord
            .enroll_identity(&mut analyzer, &mut store, "bob", &images, EnrollPolicy::Replace)
            .unwrap();
        coord
            .enroll_identity(&mut analyzer, &mut store, "alice", &images, EnrollPolicy::Replace)
            .unwrap();
        coord
            .enroll_identity(&mut analyzer, &mut store, "alice", &images, EnrollPolicy::Replace)
            .unwrap();
        assert_eq!(store.records().iter().filter(|r| r.identity == "bob").count(), 2);
        assert_eq!(store.records().iter().filter(|r| r.identity == "alice").count(), 2);
    }

    #[test]
    fn test_max_images_cap() {
        let (mut analyzer, images) = five_photos();
        let mut store = MemoryStore::new();
        let report = coordinator(1, 3)
            .enroll_identity(&mut analyzer, &mut store, "alice", &images, EnrollPolicy::Replace)
            .unwrap();
        // p0..p2 considered: two faces, one without.
        assert_eq!(report.stored, 2);
        assert_eq!(report.skipped_no_face, 1);
        assert_eq!(report.skipped_quality, 0);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_largest_face_selected_per_photo() {
        let analyzer_faces = vec![
            face_at(5.0, 5.0, 60.0, 60.0, vec![0.0, 1.0, 0.0, 0.0]),
            face_at(60.0, 60.0, 195.0, 195.0, vec![0.0, 0.0, 1.0, 0.0]),
        ];
        let mut analyzer = ScriptedAnalyzer::default().with_image(7, analyzer_faces);
        let images = vec![source_image("group.jpg", mark(checkerboard(200, 200, 64, 192), 7))];
        let mut store = MemoryStore::new();
        coordinator(1, 20)
            .enroll_identity(&mut analyzer, &mut store, "carol", &images, EnrollPolicy::Replace)
            .unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.records()[0].embedding.values(), &[0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_embedding_rejections_counted() {
        let mut analyzer = ScriptedAnalyzer::default()
            .with_image(0, vec![face_at(10.0, 10.0, 90.0, 90.0, vec![1.0, 0.0])])
            .with_image(1, vec![face_at(10.0, 10.0, 90.0, 90.0, vec![0.0; DIM])]);
        let images = vec![
            source_image("a.jpg", mark(checkerboard(100, 100, 64, 192), 0)),
            source_image("b.jpg", mark(checkerboard(100, 100, 64, 192), 1)),
        ];
        let mut store = MemoryStore::new();
        let report = coordinator(1, 20)
            .enroll_identity(&mut analyzer, &mut store, "dave", &images, EnrollPolicy::Replace)
            .unwrap();
        assert_eq!(report.skipped_embedding, 2);
        assert_eq!(report.status, EnrollmentStatus::Failed);
    }

    #[test]
    fn test_failing_delete_becomes_warning() {
        let (mut analyzer, images) = five_photos();
        let mut store = FailingDeleteStore::default();
        let coord = coordinator(2, 20);
        coord
            .enroll_identity(&mut analyzer, &mut store, "alice", &images, EnrollPolicy::Replace)
            .unwrap();

        let report = coord
            .enroll_identity(&mut analyzer, &mut store, "alice", &images, EnrollPolicy::Replace)
            .unwrap();
        assert_eq!(report.status, EnrollmentStatus::Enrolled);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].starts_with("delete failed"));
    }

    #[test]
    fn test_analyzer_failure_propagates() {
        let (analyzer, images) = five_photos();
        let mut analyzer = analyzer.failing_on(2);
        let mut store = MemoryStore::new();
        let err = coordinator(2, 20)
            .enroll_identity(&mut analyzer, &mut store, "alice", &images, EnrollPolicy::Replace)
            .unwrap_err();
        assert!(matches!(err, EnrollError::Analyzer(_)));
        // p0 was stored before the failure on p2.
        assert!(!store.exists("alice").unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_failed_reenrollment_leaves_no_partial_identity() {
        let (mut analyzer, images) = five_photos();
        let mut store = MemoryStore::new();
        let coord = coordinator(2, 20);
        coord
            .enroll_identity(&mut analyzer, &mut store, "bob", &images, EnrollPolicy::Replace)
            .unwrap();
        coord
            .enroll_identity(&mut analyzer, &mut store, "alice", &images, EnrollPolicy::Replace)
            .unwrap();

        let mut analyzer = analyzer.failing_on(2);
        let err = coordinator(3, 20)
            .enroll_identity(&mut analyzer, &mut store, "alice", &images, EnrollPolicy::Replace)
            .unwrap_err();
        assert!(matches!(err, EnrollError::Analyzer(_)));
        assert!(!store.exists("alice").unwrap());
        assert_eq!(store.records().iter().filter(|r| r.identity == "bob").count(), 2);
    }

    #[test]
    fn test_empty_identity_rejected() {
        let (mut analyzer, images) = five_photos();
        let mut store = MemoryStore::new();
        let err = coordinator(2, 20)
            .enroll_identity(&mut analyzer, &mut store, "  ", &images, EnrollPolicy::Replace)
            .unwrap_err();
        assert!(matches!(err, EnrollError::InvalidIdentity(_)));
    }

    #[test]
    fn test_report_json_shape() {
        let mut report = EnrollmentReport::new("alice", EnrollmentStatus::Failed);
        report.reason = Some(INSUFFICIENT_EMBEDDINGS.to_string());
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["user_id"], "alice");
        assert_eq!(value["status"], "FAILED");
        assert_eq!(value["reason"], "insufficient embeddings");

        let ok = serde_json::to_value(EnrollmentReport::new("bob", EnrollmentStatus::Enrolled)).unwrap();
        assert!(ok.get("reason").is_none());
        assert_eq!(ok["warnings"], serde_json::json!([]));
    }
}
