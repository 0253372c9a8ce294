use anyhow::bail;
use clap::Parser;
use luonnonmetsakartta::adapters::bucket::BucketClient;
use luonnonmetsakartta::adapters::geoserver::GeoServerClient;
use luonnonmetsakartta::db::forest_layer;
use luonnonmetsakartta::utils::logger;
use luonnonmetsakartta::{db, LayerService, Settings};
use std::io::{self, BufRead, Write};
use std::sync::Arc;

/// Deletes every layer. Only runs against a sandbox GeoServer.
#[derive(Parser)]
#[command(name = "cleanup_layers")]
struct Args {
    /// Skip the confirmation prompt
    #[arg(long)]
    yes: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn confirm(count: usize) -> io::Result<bool> {
    print!("Are you sure you want to delete {count} layers? (yes/no): ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "yes" | "y"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logger::init_cli_logger(args.verbose);

    let settings = Settings::from_env()?;
    if !settings.is_sandbox() {
        tracing::error!(
            "❌ GeoServer URL '{}' does not contain 'sandbox', refusing to run",
            settings.geoserver.url
        );
        bail!("not a sandbox environment");
    }
    tracing::info!("Safety check passed: {} is a sandbox", settings.geoserver.url);

    let pool = db::connect(&settings).await?;
    let layers = forest_layer::get_all_forest_layers(&pool).await?;
    tracing::info!("Found {} layers to delete", layers.len());
    if layers.is_empty() {
        return Ok(());
    }
    if !args.yes && !confirm(layers.len())? {
        tracing::info!("Operation cancelled");
        return Ok(());
    }

    let service = LayerService::new(
        pool.clone(),
        Arc::new(GeoServerClient::new(settings.geoserver.clone())),
        Arc::new(BucketClient::new(&settings.storage)),
    );
    let mut failed = 0;
    for layer in &layers {
        tracing::info!("🗑️ Deleting layer {} ({})", layer.name, layer.id);
        if let Err(e) = service.delete_layer(layer.id).await {
            tracing::error!("❌ Failed to delete layer {}: {}", layer.name, e);
            failed += 1;
        }
    }

    tracing::info!(
        "Layer cleanup completed: {} deleted, {} failed",
        layers.len() - failed,
        failed
    );
    pool.close().await;
    Ok(())
}
