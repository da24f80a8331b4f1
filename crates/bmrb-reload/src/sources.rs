//! Where entries come from: identifier enumeration and per-worker loaders.

use std::path::Path;
use std::sync::Arc;

use sqlx::PgPool;
use tokio::runtime::{Builder, Handle, Runtime};

use bmrb_core::error::{BmrbError, Result};
use bmrb_core::{nmrstar, Entry, Namespace, Reconstructor, SchemaDirectory};
use bmrb_postgres::{connect, released_ids, DatabaseConfig, PgRowSource};

use crate::worker::{EntryLoader, LoaderFactory, WorkItem};

// ── Enumeration ───────────────────────────────────────────────

/// Lists every identifier that should exist in a namespace.
pub trait IdSource {
    fn released_ids(&mut self, namespace: Namespace) -> Result<Vec<String>>;
}

/// Enumerates from the relational store on the caller's runtime.
pub struct PgIdSource {
    runtime: Handle,
    pool: PgPool,
}

impl PgIdSource {
    pub fn new(runtime: Handle, pool: PgPool) -> Self {
        Self { runtime, pool }
    }
}

impl IdSource for PgIdSource {
    fn released_ids(&mut self, namespace: Namespace) -> Result<Vec<String>> {
        self.runtime.block_on(released_ids(&self.pool, namespace))
    }
}

// ── Loading ───────────────────────────────────────────────────

/// Reads one NMR-STAR file into an entry.
pub fn read_entry_file(path: &Path) -> Result<Entry> {
    let source = std::fs::read_to_string(path).map_err(|e| {
        BmrbError::Io(std::io::Error::new(e.kind(), format!("{}: {e}", path.display())))
    })?;
    nmrstar::parse_entry(&source)
}

/// Per-worker loader. Flat-file namespaces are read from disk; chemical
/// components are reconstructed over the worker's own connection.
pub struct ArchiveLoader {
    runtime: Runtime,
    reconstructor: Option<Reconstructor<PgRowSource>>,
}

impl ArchiveLoader {
    fn reconstructor(&self) -> Result<&Reconstructor<PgRowSource>> {
        self.reconstructor.as_ref().ok_or_else(|| {
            BmrbError::ServerError("this worker has no database connection".to_string())
        })
    }
}

impl EntryLoader for ArchiveLoader {
    fn load(&mut self, item: &WorkItem) -> Result<Entry> {
        match (&item.location, item.namespace) {
            (Some(path), _) => read_entry_file(path),
            (None, Namespace::Chemcomps) => {
                let reconstructor = self.reconstructor()?;
                self.runtime
                    .block_on(reconstructor.chemcomp_entry(&item.identifier))
            }
            (None, namespace) => Err(BmrbError::InvalidRequest(format!(
                "{namespace} entry {} has no source file",
                item.identifier
            ))),
        }
    }
}

pub struct ArchiveLoaderFactory {
    directory: Arc<SchemaDirectory>,
    /// `None` when no selected namespace needs the database.
    database: Option<DatabaseConfig>,
    diagnostic: bool,
}

impl ArchiveLoaderFactory {
    pub fn new(directory: Arc<SchemaDirectory>, database: Option<DatabaseConfig>, diagnostic: bool) -> Self {
        Self {
            directory,
            database,
            diagnostic,
        }
    }
}

impl LoaderFactory for ArchiveLoaderFactory {
    type Loader = ArchiveLoader;

    fn create(&self, worker: usize) -> Result<ArchiveLoader> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| BmrbError::ServerError(format!("worker {worker} runtime: {e}")))?;

        let reconstructor = match &self.database {
            Some(config) => {
                let pool = runtime
                    .block_on(connect(&config.for_worker()))
                    .map_err(|e| BmrbError::ServerError(format!("worker {worker} database: {e}")))?;
                let source = PgRowSource::new(pool).with_diagnostics(self.diagnostic);
                Some(Reconstructor::new(Arc::clone(&self.directory), source))
            }
            None => None,
        };

        Ok(ArchiveLoader {
            runtime,
            reconstructor,
        })
    }
}
