//! bmrb-reload: rebuild the entry cache from the archive.
//!
//! Reads settings from an optional YAML file, then the environment:
//!   DATABASE_URL: Postgres connection string (required)
//!   REDIS_URL: cache server (default: redis://127.0.0.1:6379)
//!   RUST_LOG: log filter (default: bmrb_reload=info)

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use bmrb_core::Namespace;
use bmrb_postgres::{connect, load_schema_directory, mask_database_url, DatabaseConfig};
use bmrb_reload::{
    run_reload, ArchiveLoaderFactory, PgIdSource, RedisConnector, ReloadConfig, ReloadOptions,
};

#[derive(Parser, Debug)]
#[command(name = "bmrb-reload", version, about = "Update the entries in the cache database")]
struct Cli {
    /// Update the metabolomics entries
    #[arg(long)]
    metabolomics: bool,

    /// Update the macromolecule entries
    #[arg(long)]
    macromolecules: bool,

    /// Update the chemical component entries
    #[arg(long)]
    chemcomps: bool,

    /// Update every namespace
    #[arg(long)]
    all: bool,

    /// Empty the cache database before loading
    #[arg(long)]
    flush: bool,

    /// Logical cache database to load into
    #[arg(long)]
    redis_db: Option<i64>,

    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// YAML settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Worker threads (default: available parallelism)
    #[arg(long)]
    workers: Option<usize>,

    /// Attach raw store errors to failure reasons
    #[arg(long)]
    diagnostic: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn namespaces(&self) -> Vec<Namespace> {
        if self.all {
            return Namespace::RELOADABLE.to_vec();
        }
        [
            (self.metabolomics, Namespace::Metabolomics),
            (self.macromolecules, Namespace::Macromolecules),
            (self.chemcomps, Namespace::Chemcomps),
        ]
        .into_iter()
        .filter_map(|(selected, ns)| selected.then_some(ns))
        .collect()
    }

    fn settings(&self) -> Result<ReloadConfig> {
        let mut config = match &self.config {
            Some(path) => ReloadConfig::from_file(path)?,
            None => ReloadConfig::default(),
        };
        if let Some(url) = &self.database_url {
            config.database.url = Some(url.clone());
        }
        if let Some(url) = &self.redis_url {
            config.redis.url = url.clone();
        }
        if let Some(db) = self.redis_db {
            config.redis.db = db;
        }
        if self.workers.is_some() {
            config.workers = self.workers;
        }
        config.diagnostic |= self.diagnostic;
        Ok(config)
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "bmrb_reload=debug,bmrb_postgres=debug"
    } else {
        "bmrb_reload=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let options = ReloadOptions::new(cli.namespaces(), cli.flush)?;
    let config = cli.settings()?;

    let mut database = DatabaseConfig::with_url(config.database_url()?);
    database.max_connections = config.database.pool_size;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;
    let pool = runtime
        .block_on(connect(&database))
        .with_context(|| format!("connecting to {}", mask_database_url(&database.database_url)))?;
    let directory = runtime
        .block_on(load_schema_directory(&pool))
        .context("loading the schema directory")?;
    tracing::info!(
        sections = directory.section_count(),
        fields = directory.field_count(),
        "schema directory loaded"
    );

    let connector = RedisConnector::new(&config.redis.url, config.redis.db)?;
    let mut ids = PgIdSource::new(runtime.handle().clone(), pool);
    let reconstructs = options.namespaces().contains(&Namespace::Chemcomps);
    let factory = ArchiveLoaderFactory::new(
        Arc::new(directory),
        reconstructs.then(|| database.clone()),
        config.diagnostic,
    );

    let report = run_reload(&options, &config, &mut ids, &connector, &factory)?;
    for namespace in &report.namespaces {
        for failure in &namespace.failures {
            tracing::warn!(
                namespace = %namespace.namespace,
                entry_id = %failure.identifier,
                reason = %failure.reason,
                "failed"
            );
        }
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
