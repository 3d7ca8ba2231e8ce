use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use summadb::{build_router, SummaConfig, SummaDb};

#[derive(Parser)]
#[command(name = "summadb", about = "Hierarchical document database", version)]
struct Cli {
    /// Path of the underlying database file
    #[arg(long, default_value = "/tmp/summa.db")]
    db: String,

    /// Port the HTTP server listens on
    #[arg(long, default_value_t = 5000)]
    port: u16,

    /// Erase all database contents before starting
    #[arg(long)]
    reset: bool,

    /// Force debug logging (overrides RUST_LOG)
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if cli.reset {
        SummaDb::erase(&cli.db)?;
    }

    let config = SummaConfig {
        db_path: Some(cli.db.clone()),
        port: cli.port,
        ..Default::default()
    };
    info!(db = %cli.db, port = cli.port, "starting database server");

    let db = Arc::new(SummaDb::open(config)?);
    let app = build_router(db.clone());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", cli.port)).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("exiting...");
    match Arc::try_unwrap(db) {
        Ok(db) => db.close()?,
        Err(_) => tracing::warn!("database handle still shared at shutdown"),
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
