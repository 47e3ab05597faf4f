use anyhow::{Context, Result};
use likeness_models::OnnxFaceAnalyzer;
use likeness_store::SqliteIdentityStore;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

const BUS_NAME: &str = "org.freedesktop.Likeness1";
const OBJECT_PATH: &str = "/org/freedesktop/Likeness1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("likenessd starting");

    let config = config::Config::from_env().context("invalid likeness settings")?;

    let analyzer = OnnxFaceAnalyzer::load(&config.model_dir)
        .with_context(|| format!("failed to load models from {}", config.model_dir.display()))?;
    let store = SqliteIdentityStore::open(&config.db_path)
        .with_context(|| format!("failed to open identity store {}", config.db_path.display()))?;
    tracing::info!(
        models = %config.model_dir.display(),
        db = %config.db_path.display(),
        "models and store ready"
    );

    let engine = engine::spawn_engine(analyzer, store, &config.settings, config.queue_depth)?;

    let service = dbus_interface::LikenessService {
        engine,
        model_dir: config.model_dir.clone(),
        db_path: config.db_path.clone(),
    };

    let builder = if config.session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(bus = BUS_NAME, session = config.session_bus, "likenessd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("likenessd shutting down");

    Ok(())
}
