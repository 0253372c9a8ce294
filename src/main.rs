use anyhow::Context;
use clap::Parser;
use luonnonmetsakartta::adapters::bucket::BucketClient;
use luonnonmetsakartta::api::{self, AppState};
use luonnonmetsakartta::utils::{logger, validation::Validate};
use luonnonmetsakartta::{db, Settings, StorageCleanup};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "luonnonmetsakartta")]
#[command(about = "Forest area map backend")]
struct Args {
    /// TOML settings file. The environment (and .env) is used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Address to listen on, overrides the settings
    #[arg(long)]
    bind: Option<String>,

    /// Apply pending migrations before serving
    #[arg(long)]
    migrate: bool,
}

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("❌ Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("❌ Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("📡 Shutdown signal received");
    token.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => Settings::from_file(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => Settings::from_env().context("Failed to load settings from the environment")?,
    };
    if let Some(bind) = args.bind {
        settings.bind_address = bind;
    }

    logger::init_logger(args.verbose, settings.log_json);
    tracing::info!("🌲 Starting luonnonmetsakartta");

    settings.validate().context("Invalid configuration")?;

    let pool = db::connect(&settings).await?;
    if args.migrate {
        db::run_migrations(&pool).await?;
    }

    let shutdown = CancellationToken::new();
    let cleanup = StorageCleanup::new(pool.clone(), Arc::new(BucketClient::new(&settings.storage)));
    let worker = tokio::spawn(cleanup.start_storage_cleanup_worker(
        shutdown.clone(),
        Duration::from_secs(settings.cleanup_interval_seconds),
    ));

    let app = api::router(AppState::new(&settings, pool.clone()), &settings.cors_origins);
    let listener = TcpListener::bind(&settings.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", settings.bind_address))?;
    tracing::info!("🚀 Listening on {}", settings.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    match worker.await {
        Ok(Err(e)) => tracing::error!("❌ Storage cleanup worker failed: {}", e),
        Err(e) => tracing::error!("❌ Storage cleanup worker panicked: {}", e),
        Ok(Ok(())) => {}
    }
    pool.close().await;

    tracing::info!("👋 Shut down cleanly");
    Ok(())
}
