use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use likeness_core::Settings;

mod client;
mod commands;

#[derive(Parser, Debug)]
#[command(name = "likeness", version, about = "Likeness face identification CLI")]
struct Cli {
    /// Identity database (default: $LIKENESS_DB_PATH or the XDG data dir)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Directory holding det_10g.onnx and w600k_r50.onnx
    #[arg(long, global = true, env = "LIKENESS_MODEL_DIR")]
    models: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// Enroll identities from <root>/<identity>/ photo folders
    Enroll {
        /// Dataset root with one sub-directory per identity
        root: PathBuf,
        /// Only enroll this identity
        #[arg(short, long)]
        user: Option<String>,
        /// Re-enroll identities that already have samples
        #[arg(long)]
        replace: bool,
    },
    /// Recognize every face in an image
    Recognize {
        image: PathBuf,
    },
    /// Measure accuracy over <test-root>/<identity>/ folders
    Evaluate {
        test_root: PathBuf,
    },
    /// List enrolled identities
    List,
    /// Remove every sample of an identity
    Remove {
        user: String,
    },
    /// Print the effective settings as TOML
    Config,
    /// Show daemon status over D-Bus
    Status {
        /// Use the session bus instead of the system bus
        #[arg(long)]
        session: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::load().context("invalid likeness settings")?;
    let paths = commands::Paths {
        db: cli.db.unwrap_or_else(likeness_store::default_db_path),
        models: cli.models.unwrap_or_else(likeness_models::default_model_dir),
    };

    match cli.command {
        Commands::Enroll { root, user, replace } => {
            commands::enroll(&settings, &paths, &root, user.as_deref(), replace)
        }
        Commands::Recognize { image } => commands::recognize(&settings, &paths, &image),
        Commands::Evaluate { test_root } => commands::evaluate(&settings, &paths, &test_root),
        Commands::List => commands::list(&paths),
        Commands::Remove { user } => commands::remove(&paths, &user),
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&settings)?);
            Ok(())
        }
        Commands::Status { session } => {
            let status = client::status(session).await?;
            println!("{status}");
            Ok(())
        }
    }
}
