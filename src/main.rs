//! pgkeeper - PostgreSQL migration runner and admin server
//!
//! # Commands
//!
//! - `serve`: connect, migrate, then serve the admin HTTP API
//! - `migrate`: apply pending migrations and exit
//! - `status`: print the migration status snapshot as JSON
//! - `rollback <VERSION>`: run the companion rollback script of a version
//! - `create <NAME>`: author a new migration file
//! - `verify`: report applied migrations whose files changed
//!
//! Any failure exits non-zero.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use pgkeeper::{AppConfig, Database, DatabaseConfig, MigrationRepository, handlers};

#[derive(Parser)]
#[command(name = "pgkeeper", version, about = "PostgreSQL migrations and pooling")]
struct Cli {
    /// Directory holding `<version>_<name>.sql` files (overrides MIGRATIONS_DIR)
    #[arg(long, global = true)]
    migrations_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Migrate, then serve the admin HTTP API
    Serve,
    /// Apply pending migrations
    Migrate,
    /// Print the migration status
    Status,
    /// Run `<VERSION>_rollback.sql` and drop the version's record
    Rollback { version: String },
    /// Create the next migration file
    Create {
        name: String,
        /// Read the migration body from this file instead of a template
        #[arg(long)]
        from: Option<PathBuf>,
    },
    /// List applied migrations whose file content changed
    Verify,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Reads RUST_LOG environment variable (defaults to "info" level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let app = AppConfig::from_env().context("invalid application configuration")?;
    let migrations_dir = cli.migrations_dir.unwrap_or(app.migrations_dir);

    // Authoring never touches the database.
    if let Command::Create { name, from } = &cli.command {
        let content = match from {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?,
            None => format!("-- Migration: {name}\n\n"),
        };
        let unit = MigrationRepository::new(&migrations_dir).create(name, &content)?;
        println!("{}", unit.path.display());
        return Ok(());
    }

    let config = DatabaseConfig::from_env().context("invalid database configuration")?;
    tracing::info!(url = %config.masked_connection_string(), "Configuration loaded");

    let db = Arc::new(Database::new(config, &migrations_dir)?);
    let result = run(Arc::clone(&db), cli.command, app.server_port).await;
    db.close().await;
    result
}

async fn run(db: Arc<Database>, command: Command, server_port: u16) -> anyhow::Result<()> {
    match command {
        Command::Serve => {
            db.initialize().await?;
            serve(db, server_port).await?;
        }
        Command::Migrate => {
            let report = db.migrations().run_pending().await?;
            if report.is_no_op() {
                println!("No pending migrations");
            } else {
                for applied in &report.applied {
                    println!("Applied {} ({} ms)", applied.filename, applied.execution_time_ms);
                }
            }
        }
        Command::Status => {
            let status = db.migrations().status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Rollback { version } => {
            if db.migrations().rollback(&version).await? {
                println!("Rolled back {version}");
            } else {
                println!("Rollback script ran; {version} had no record");
            }
        }
        Command::Verify => {
            let mismatches = db.migrations().verify().await?;
            for mismatch in &mismatches {
                println!(
                    "{} changed: recorded {} current {}",
                    mismatch.filename, mismatch.recorded, mismatch.current
                );
            }
            if !mismatches.is_empty() {
                anyhow::bail!("{} applied migration(s) changed on disk", mismatches.len());
            }
        }
        Command::Create { .. } => {}
    }
    Ok(())
}

async fn serve(db: Arc<Database>, port: u16) -> anyhow::Result<()> {
    let app = handlers::router(db).layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
