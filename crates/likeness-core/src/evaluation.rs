//! Accuracy evaluation over a labelled test root.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::analyzer::FaceAnalyzer;
use crate::recognition::{Identification, RecognitionCoordinator, RecognizeError};
use crate::source::{identity_folders, image_paths, ImageLoader, SourceError};
use crate::store::IdentityStore;

#[derive(Error, Debug)]
pub enum EvaluateError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Recognize(#[from] RecognizeError),
}

/// How one evaluated image was scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    TruePositive,
    FalsePositive,
    FalseNegative,
}

impl Outcome {
    /// A prediction equal to the truth is a hit, no prediction is a miss,
    /// anything else is a false positive.
    pub fn classify(truth: &str, predicted: Option<&str>) -> Self {
        match predicted {
            Some(p) if p == truth => Outcome::TruePositive,
            Some(_) => Outcome::FalsePositive,
            None => Outcome::FalseNegative,
        }
    }
}

/// Running counters; fold per-image outcomes in and merge partial tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationTally {
    pub total_images: usize,
    pub skipped: usize,
    pub true_positive: usize,
    pub false_positive: usize,
    pub false_negative: usize,
}

impl EvaluationTally {
    pub fn record(&mut self, outcome: Outcome) {
        self.total_images += 1;
        match outcome {
            Outcome::TruePositive => self.true_positive += 1,
            Outcome::FalsePositive => self.false_positive += 1,
            Outcome::FalseNegative => self.false_negative += 1,
        }
    }

    pub fn record_skipped(&mut self) {
        self.total_images += 1;
        self.skipped += 1;
    }

    pub fn merge(&mut self, other: &EvaluationTally) {
        self.total_images += other.total_images;
        self.skipped += other.skipped;
        self.true_positive += other.true_positive;
        self.false_positive += other.false_positive;
        self.false_negative += other.false_negative;
    }

    pub fn evaluated(&self) -> usize {
        self.total_images - self.skipped
    }

    /// True positives over evaluated images, in [0, 1]; 0 when nothing
    /// was evaluated.
    pub fn accuracy(&self) -> f64 {
        match self.evaluated() {
            0 => 0.0,
            n => self.true_positive as f64 / n as f64,
        }
    }
}

/// Score every image under `root/<identity>/` against the store.
///
/// Images that cannot be loaded, or whose largest face is unusable, are
/// counted as skipped.
pub fn evaluate_dataset<A, S>(
    coordinator: &RecognitionCoordinator,
    analyzer: &mut A,
    store: &S,
    loader: &ImageLoader,
    root: &Path,
) -> Result<EvaluationTally, EvaluateError>
where
    A: FaceAnalyzer + ?Sized,
    S: IdentityStore + ?Sized,
{
    let folders = identity_folders(root)?;
    info!(identities = folders.len(), root = %root.display(), "evaluating");

    let mut tally = EvaluationTally::default();
    for folder in &folders {
        let mut partial = EvaluationTally::default();
        for path in image_paths(&folder.path)? {
            let source = match loader.load(&path) {
                Ok(source) => source,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable image");
                    partial.record_skipped();
                    continue;
                }
            };
            match coordinator.identify_primary(analyzer, store, &source.image)? {
                Identification::Skipped(reason) => {
                    debug!(image = %source.name, %reason, "skipped");
                    partial.record_skipped();
                }
                Identification::Resolved(record) => {
                    let outcome = Outcome::classify(&folder.identity, record.user_id.as_deref());
                    debug!(
                        image = %source.name,
                        truth = %folder.identity,
                        predicted = ?record.user_id,
                        ?outcome,
                        "scored"
                    );
                    partial.record(outcome);
                }
            }
        }
        tally.merge(&partial);
    }
    info!(
        total = tally.total_images,
        evaluated = tally.evaluated(),
        accuracy = tally.accuracy(),
        "evaluation finished"
    );
    Ok(tally)
}
