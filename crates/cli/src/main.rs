//! sitecache command line entry point.
//!
//! Drives the cache manager lifecycle from the shell: seed the manifest,
//! evict stale generations, and fetch URLs through the cache. Logging goes
//! to stderr so body output on stdout stays clean.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sitecache_client::fetch::{FetchClient, FetchConfig, canonicalize};
use sitecache_client::{CacheManager, Request, Source};
use sitecache_core::{AppConfig, CacheStore};

#[derive(Parser)]
#[command(name = "sitecache", about = "Versioned offline asset cache for a single origin")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch and store the asset manifest, then activate immediately
    Install,
    /// Evict generations not matching the configured cache version
    Activate,
    /// Resolve a URL through the cache
    Get {
        /// Absolute URL, or an origin-relative path like /css/style.css
        url: String,
        /// Write the body to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show generations and entry counts
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load().context("failed to load configuration")?;
    tracing::info!(
        origin = %config.origin,
        generation = %config.cache_version,
        db_path = %config.db_path.display(),
        "starting sitecache"
    );
    let store = CacheStore::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open store at {}", config.db_path.display()))?;
    let fetcher = Arc::new(FetchClient::new(FetchConfig::from(&config))?);
    let manager = CacheManager::from_config(store.clone(), fetcher, &config)?;

    match cli.command {
        Command::Install => {
            manager.install().await?;
            let report = manager.activate().await?;
            let count = store.count_entries(manager.version()).await?;
            println!("installed generation {} ({} assets, {} stale generations evicted)",
                manager.version(), count, report.evicted.len());
        }
        Command::Activate => {
            let report = manager.activate().await?;
            if report.evicted.is_empty() {
                println!("no stale generations");
            } else {
                for tag in &report.evicted {
                    println!("evicted {tag}");
                }
            }
        }
        Command::Get { url, output } => {
            let url = if url.starts_with('/') {
                config.origin_url()?.join(&url)?
            } else {
                canonicalize(&url)?
            };
            let response = manager.handle_request(Request::get(url)).await?;
            let source = match response.source {
                Source::Cache => "cache",
                Source::Network => "network",
            };
            eprintln!(
                "{} {} ({} bytes, {})",
                response.status,
                response.url,
                response.body.len(),
                source
            );
            match output {
                Some(path) => std::fs::write(&path, &response.body)
                    .with_context(|| format!("failed to write {}", path.display()))?,
                None => std::io::stdout().write_all(&response.body)?,
            }
        }
        Command::Status => {
            let generations = store.list_generations().await?;
            if generations.is_empty() {
                println!("store is empty");
            }
            for tag in generations {
                let count = store.count_entries(&tag).await?;
                let marker = if tag == config.cache_version { " (current)" } else { "" };
                println!("{tag}: {count} entries{marker}");
            }
        }
    }

    Ok(())
}
