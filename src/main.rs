use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use parley_core::{ObjectClass, SystemClock};
use parley_settings::{load_settings, resolve_database_path, ParleySettings};
use parley_store::{ConnectionConfig, Database, SearchIndex};
use parley_telemetry::{init_telemetry, TelemetryConfig};

#[derive(Parser)]
#[command(name = "parley", version, about = "Multi-tenant object store with secure sharing")]
struct Cli {
    /// Log human-readable lines instead of JSON.
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server until interrupted.
    Serve,
    /// Create the search index for one class.
    CreateIndex {
        #[arg(long)]
        class_name: String,
    },
    /// Create every missing search index.
    MigrateAllIndex,
}

fn open_database(settings: &ParleySettings) -> anyhow::Result<Database> {
    let path = resolve_database_path(&settings.database.path);
    let config = ConnectionConfig {
        pool_size: settings.database.pool_size,
        busy_timeout_ms: settings.database.busy_timeout_ms,
        cache_size_kib: settings.database.cache_size_kib,
    };
    Database::open(&path, &config, Arc::new(SystemClock))
        .with_context(|| format!("failed to open database at {}", path.display()))
}

async fn serve(settings: ParleySettings, db: Database) -> anyhow::Result<()> {
    if settings.uses_default_secret() {
        tracing::warn!("secret_key is the built-in default; set PARLEY_SECRET_KEY before exposing this server");
    }
    let handle = parley_server::start(&settings, db.clone())
        .await
        .context("failed to start server")?;
    tracing::info!(port = handle.port(), "parley ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;
    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

async fn run(command: Command, settings: ParleySettings, db: Database) -> anyhow::Result<()> {
    match command {
        Command::Serve => serve(settings, db).await,
        Command::CreateIndex { class_name } => {
            let class: ObjectClass = class_name.parse()?;
            SearchIndex::new(db).create_index(class).await?;
            println!("created index for {class}");
            Ok(())
        }
        Command::MigrateAllIndex => {
            let created = SearchIndex::new(db).migrate_all().await?;
            if created.is_empty() {
                println!("all indexes already exist");
            }
            for class in created {
                println!("created index for {class}");
            }
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _telemetry = init_telemetry(TelemetryConfig {
        json: !cli.pretty,
        ..Default::default()
    });

    let settings = load_settings().context("failed to load settings")?;
    let db = open_database(&settings)?;

    let result = run(cli.command, settings, db.clone()).await;

    db.shutdown().context("failed to close database")?;
    result
}
