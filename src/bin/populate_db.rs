use anyhow::Context;
use clap::Parser;
use luonnonmetsakartta::adapters::bucket::BucketClient;
use luonnonmetsakartta::adapters::geoserver::GeoServerClient;
use luonnonmetsakartta::domain::model::{ColOptions, NewLayer};
use luonnonmetsakartta::utils::logger;
use luonnonmetsakartta::{db, LayerService, Settings};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

/// Imports a zipped shapefile as a new hidden layer. Nothing is published
/// on GeoServer.
#[derive(Parser)]
#[command(name = "populate_db")]
struct Args {
    /// Name of the layer
    #[arg(long, default_value = "MyLayer")]
    layer_name: String,

    /// Layer description
    #[arg(long)]
    description: Option<String>,

    /// Path to the zip file
    #[arg(long, default_value = "/app/data/test_data.zip")]
    zip: PathBuf,

    /// Column mapping as JSON, e.g. '{"name_col": "NIMI"}'
    #[arg(long)]
    col_options: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logger::init_cli_logger(args.verbose);

    let settings = Settings::from_env()?;
    let archive = tokio::fs::read(&args.zip)
        .await
        .with_context(|| format!("Failed to read {}", args.zip.display()))?;
    let col_options = match &args.col_options {
        Some(raw) => serde_json::from_str::<ColOptions>(raw).context("Invalid --col-options")?,
        None => ColOptions::default(),
    };

    let pool = db::connect(&settings).await?;
    let service = LayerService::new(
        pool.clone(),
        Arc::new(GeoServerClient::new(settings.geoserver.clone())),
        Arc::new(BucketClient::new(&settings.storage)),
    );

    let layer = NewLayer {
        name: args.layer_name,
        description: args.description,
        is_hidden: true,
        color_code: None,
        symbol: None,
        col_options,
        original_properties: json!({}),
    };
    let (created, report) = service.import_layer(&layer, archive).await?;
    tracing::info!(
        "✅ Imported {} of {} features into '{}'",
        report.written,
        report.features_read,
        created.name
    );
    println!("{}", created.id);

    pool.close().await;
    Ok(())
}
