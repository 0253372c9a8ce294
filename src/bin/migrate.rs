use anyhow::Context;
use clap::Parser;
use luonnonmetsakartta::utils::logger;
use luonnonmetsakartta::{db, Settings};
use std::path::PathBuf;

/// Applies pending migrations to the production database.
#[derive(Parser)]
#[command(name = "migrate")]
struct Args {
    /// TOML settings file. The environment (and .env) is used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logger::init_cli_logger(args.verbose);

    let settings = match &args.config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::from_env()?,
    };
    // migrations always target the production database
    let settings = settings.for_migration();

    let pool = db::connect(&settings)
        .await
        .context("Failed to connect to the production database")?;
    db::run_migrations(&pool).await?;
    pool.close().await;
    Ok(())
}
