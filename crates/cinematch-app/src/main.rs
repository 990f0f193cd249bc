//! CineMatch application binary - composition root.
//!
//! Ties together all CineMatch crates into a single executable:
//! 1. Parse the CLI and load configuration from TOML
//! 2. Open the SQLite catalog and register the collection's shard key
//! 3. Build the poster embedder (ONNX model or pooled fallback)
//! 4. Either ingest a file of scraped movies, or serve the axum REST API

mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;

use cinematch_api::routes;
use cinematch_api::state::AppState;
use cinematch_core::config::CinematchConfig;
use cinematch_core::error::{CinematchError, Result};
use cinematch_core::types::RawItemRecord;
use cinematch_storage::{
    movie_schema, CatalogRepository, Database, SqliteBlobStore, SqliteMetadataStore,
};
use cinematch_vector::{embedder_from_config, HttpPosterFetcher, IngestReport, IngestionPipeline};

use crate::cli::{CliArgs, Command};

/// Expand ~ to home directory in a path string.
fn resolve_data_dir(data_dir: &str) -> PathBuf {
    if data_dir.starts_with("~/") || data_dir.starts_with("~\\") {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(&data_dir[2..])
    } else {
        PathBuf::from(data_dir)
    }
}

/// Open the catalog under `data_dir`, registering the schema and shard key.
fn open_catalog(config: &CinematchConfig, data_dir: &Path) -> Result<CatalogRepository> {
    std::fs::create_dir_all(data_dir)?;

    let db_path = data_dir.join("cinematch.db");
    let db = Arc::new(Database::new(&db_path)?);
    tracing::info!(path = %db_path.display(), "SQLite database opened");

    let collection = &config.storage.collection;
    let documents = Arc::new(SqliteMetadataStore::new(Arc::clone(&db)));
    documents.set_schema(collection, movie_schema())?;
    documents.configure_shard_key(collection, config.storage.shard_key.as_deref())?;
    tracing::info!(
        collection = %collection,
        shard_key = ?config.storage.shard_key,
        "Catalog collection configured"
    );

    let blobs = Arc::new(SqliteBlobStore::new(db, config.storage.max_poster_bytes));
    Ok(CatalogRepository::new(documents, blobs, collection.clone()))
}

fn build_state(config: CinematchConfig, repo: CatalogRepository) -> Result<AppState> {
    let embedder = embedder_from_config(&config.embedding);
    let fetcher = Arc::new(HttpPosterFetcher::new(
        &config.ingest,
        config.storage.max_poster_bytes,
    )?);
    Ok(AppState::new(config, repo, embedder, fetcher))
}

/// Read a JSON array of scraped movies from `file` and ingest it.
async fn ingest_file(pipeline: &IngestionPipeline, file: &Path) -> Result<IngestReport> {
    let content = std::fs::read_to_string(file)?;
    let records: Vec<RawItemRecord> = serde_json::from_str(&content)?;
    tracing::info!(path = %file.display(), records = records.len(), "Ingesting scraped movies");
    Ok(pipeline.ingest(&records).await)
}

async fn serve(state: AppState, port: u16) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let addr = format!("127.0.0.1:{}", port);
    let router = routes::create_router(state);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind - is another instance running?");
            tracing::error!("Try: CINEMATCH_PORT={} cargo run -p cinematch-app", port.saturating_add(1));
            return Err(e.into());
        }
    };

    tracing::info!(addr = %addr, "API server listening");
    axum::serve(listener, router).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config, with CLI and env overrides applied on top.
    let config_file = args.resolve_config_path();
    let config_exists = config_file.exists();
    let mut config = CinematchConfig::load_or_default(&config_file);
    config.general.port = args.resolve_port(config.general.port);
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }
    if let Some(level) = args.resolve_log_level() {
        config.general.log_level = level;
    }

    // Tracing. RUST_LOG wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    tracing::info!("Starting CineMatch v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), found = config_exists, "Configuration resolved");

    let data_dir = resolve_data_dir(&config.general.data_dir);
    let repo = match open_catalog(&config, &data_dir) {
        Ok(repo) => repo,
        Err(e) => {
            tracing::error!(path = %data_dir.display(), error = %e, "Failed to open catalog");
            return Err(e.into());
        }
    };

    let port = config.general.port;
    let state = build_state(config, repo)?;

    match args.command() {
        Command::Serve => serve(state, port).await,
        Command::Ingest { file } => {
            let report = ingest_file(&state.pipeline, &file).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.failed > 0 {
                return Err(CinematchError::StoreUnavailable(format!(
                    "{} of {} records were not stored",
                    report.failed,
                    report.failed + report.inserted
                ))
                .into());
            }
            Ok(())
        }
    }
}
