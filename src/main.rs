use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use forgedb::{ForgeDb, Importer, ImporterConfig};

#[derive(Parser)]
#[command(name = "forgedb")]
#[command(about = "Load IPD experiment result files into the forge database")]
#[command(version)]
struct Cli {
    /// Files, directories, or glob patterns to import
    #[arg(required = true)]
    paths: Vec<String>,

    /// Username recorded for older result files missing the field
    #[arg(long)]
    username: Option<String>,

    /// Database file path (overrides config)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Configuration file path
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ImporterConfig::load(cli.config.as_deref())?;
    init_tracing(&config.log_dir);

    let db_path = cli.db.unwrap_or_else(|| config.db_path.clone());
    let db = ForgeDb::open(&db_path)
        .with_context(|| format!("cannot reach storage at {}", db_path.display()))?;
    tracing::info!("Database: {}", db_path.display());

    let default_username = cli.username.or(config.default_username);
    let mut importer = Importer::new(db, default_username);
    let summary = importer.run_batch(&cli.paths);

    println!("{summary}");
    Ok(())
}

/// Console logging plus the persistent audit log under `log_dir`.
fn init_tracing(log_dir: &std::path::Path) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    std::fs::create_dir_all(log_dir).ok();
    let file_appender = tracing_appender::rolling::daily(log_dir, "forgedb.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the guard alive for the entire program.
    Box::leak(Box::new(guard));

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_target(false)
                .with_ansi(false),
        )
        .init();
}
