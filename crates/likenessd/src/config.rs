use std::path::PathBuf;

use likeness_core::{ConfigError, Settings};

/// Daemon configuration: runtime paths from `LIKENESS_*` variables plus the
/// validated pipeline settings.
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Serve on the session bus instead of the system bus.
    pub session_bus: bool,
    /// Pending requests the engine queue holds before callers wait.
    pub queue_depth: usize,
    pub settings: Settings,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let model_dir = std::env::var("LIKENESS_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| likeness_models::default_model_dir());

        Ok(Self {
            model_dir,
            db_path: likeness_store::default_db_path(),
            session_bus: env_bool("LIKENESS_SESSION_BUS", false),
            queue_depth: env_usize("LIKENESS_QUEUE_DEPTH", 4).max(1),
            settings: Settings::load()?,
        })
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
