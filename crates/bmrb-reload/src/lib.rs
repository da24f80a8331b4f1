//! Cache reload for the BMRB entry store.
//!
//! Enumerates released identifiers, loads each entry on a pool of worker
//! threads, stores it compressed and republishes every namespace's
//! identifier list.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod publish;
pub mod redis_cache;
pub mod reload;
pub mod sources;
pub mod worker;

pub use config::ReloadConfig;
pub use error::{ReloadError, Result};
pub use pipeline::{run_dispatch, CacheConnector};
pub use redis_cache::{RedisCache, RedisConnector};
pub use reload::{run_reload, NamespaceReport, ReloadOptions, ReloadReport};
pub use sources::{ArchiveLoaderFactory, IdSource, PgIdSource};
pub use worker::{EntryLoader, LoaderFactory, Outcome, ReloadResult, WorkItem};
