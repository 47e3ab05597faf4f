//! In-process command handlers. Each opens the store (and models when
//! needed), runs one operation and prints JSON to stdout.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use likeness_core::source::{identity_folders, IdentityFolder};
use likeness_core::{
    evaluate_dataset, EnrollPolicy, EnrollmentCoordinator, IdentityStore, ImageLoader,
    RecognitionCoordinator, Settings,
};
use likeness_models::OnnxFaceAnalyzer;
use likeness_store::SqliteIdentityStore;
use serde::Serialize;

pub struct Paths {
    pub db: PathBuf,
    pub models: PathBuf,
}

impl Paths {
    fn open_store(&self) -> Result<SqliteIdentityStore> {
        SqliteIdentityStore::open(&self.db)
            .with_context(|| format!("failed to open identity store {}", self.db.display()))
    }

    fn load_models(&self) -> Result<OnnxFaceAnalyzer> {
        OnnxFaceAnalyzer::load(&self.models)
            .with_context(|| format!("failed to load face models from {}", self.models.display()))
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn enroll(settings: &Settings, paths: &Paths, root: &Path, user: Option<&str>, replace: bool) -> Result<()> {
    let folders = match user {
        Some(user) => {
            let path = root.join(user);
            if !path.is_dir() {
                bail!("no photo folder for {user} under {}", root.display());
            }
            vec![IdentityFolder {
                identity: user.to_string(),
                path,
            }]
        }
        None => identity_folders(root)?,
    };
    if folders.is_empty() {
        bail!("no identity folders under {}", root.display());
    }

    let mut analyzer = paths.load_models()?;
    let mut store = paths.open_store()?;
    let coordinator = EnrollmentCoordinator::from_settings(settings);
    let loader = ImageLoader::new(settings.max_image_dimension);
    let policy = if replace {
        EnrollPolicy::Replace
    } else {
        EnrollPolicy::SkipExisting
    };

    let mut reports = Vec::with_capacity(folders.len());
    for folder in &folders {
        let report = coordinator
            .enroll_folder(&mut analyzer, &mut store, &loader, folder, policy)
            .with_context(|| format!("enrollment of {} failed", folder.identity))?;
        tracing::info!(identity = %report.user_id, status = ?report.status, stored = report.stored, "enrollment finished");
        reports.push(report);
    }
    print_json(&reports)
}

pub fn recognize(settings: &Settings, paths: &Paths, image: &Path) -> Result<()> {
    let source = ImageLoader::new(settings.max_image_dimension).load(image)?;
    let mut analyzer = paths.load_models()?;
    let store = paths.open_store()?;
    let records = RecognitionCoordinator::from_settings(settings).recognize(&mut analyzer, &store, &source.image)?;
    print_json(&records)
}

#[derive(Serialize)]
struct EvaluationSummary {
    #[serde(flatten)]
    tally: likeness_core::EvaluationTally,
    evaluated: usize,
    accuracy_percent: f64,
}

pub fn evaluate(settings: &Settings, paths: &Paths, test_root: &Path) -> Result<()> {
    let mut analyzer = paths.load_models()?;
    let store = paths.open_store()?;
    let tally = evaluate_dataset(
        &RecognitionCoordinator::from_settings(settings),
        &mut analyzer,
        &store,
        &ImageLoader::new(settings.max_image_dimension),
        test_root,
    )?;
    print_json(&EvaluationSummary {
        tally,
        evaluated: tally.evaluated(),
        accuracy_percent: tally.accuracy() * 100.0,
    })
}

pub fn list(paths: &Paths) -> Result<()> {
    let store = paths.open_store()?;
    print_json(&store.list_all()?)
}

pub fn remove(paths: &Paths, user: &str) -> Result<()> {
    let mut store = paths.open_store()?;
    let removed = store.delete_by_identity(user)?;
    if removed == 0 {
        bail!("no samples enrolled for {user}");
    }
    print_json(&serde_json::json!({ "user_id": user, "removed": removed }))
}
