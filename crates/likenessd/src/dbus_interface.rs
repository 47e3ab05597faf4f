use std::path::PathBuf;

use serde::Serialize;
use zbus::interface;

use crate::engine::{EngineError, EngineHandle};

/// D-Bus interface for the Likeness identification daemon.
///
/// Bus name: org.freedesktop.Likeness1
/// Object path: /org/freedesktop/Likeness1
pub struct LikenessService {
    pub engine: EngineHandle,
    pub model_dir: PathBuf,
    pub db_path: PathBuf,
}

fn failed(err: EngineError) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(err.to_string())
}

fn to_json<T: Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

#[interface(name = "org.freedesktop.Likeness1")]
impl LikenessService {
    /// Enroll `user` from the photos in `folder`. Returns the enrollment
    /// report as JSON.
    async fn enroll(&self, user: &str, folder: &str, replace: bool) -> zbus::fdo::Result<String> {
        tracing::info!(user, folder, replace, "enroll requested");
        let report = self
            .engine
            .enroll(user.to_string(), PathBuf::from(folder), replace)
            .await
            .map_err(failed)?;
        to_json(&report)
    }

    /// Recognize every face in the image at `image`. Returns one JSON record
    /// per processed face.
    async fn recognize(&self, image: &str) -> zbus::fdo::Result<String> {
        tracing::info!(image, "recognize requested");
        let records = self
            .engine
            .recognize(PathBuf::from(image))
            .await
            .map_err(failed)?;
        to_json(&records)
    }

    async fn list_identities(&self) -> zbus::fdo::Result<String> {
        let identities = self.engine.list().await.map_err(failed)?;
        to_json(&identities)
    }

    /// Remove every sample of `user`. Returns the number of samples deleted.
    async fn remove_identity(&self, user: &str) -> zbus::fdo::Result<u32> {
        tracing::info!(user, "remove requested");
        let removed = self.engine.remove(user.to_string()).await.map_err(failed)?;
        Ok(u32::try_from(removed).unwrap_or(u32::MAX))
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let identities = self.engine.list().await.map_err(failed)?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "identities": identities.len(),
            "samples": identities.iter().map(|s| s.samples).sum::<usize>(),
            "model_dir": self.model_dir.display().to_string(),
            "db_path": self.db_path.display().to_string(),
        })
        .to_string())
    }
}
