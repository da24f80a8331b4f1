//! Worker side of the reload pool.
//!
//! A worker owns one cache connection and one entry loader. It announces
//! itself with [`WorkerReply::Ready`], then answers every
//! [`WorkerCommand::Process`] with exactly one [`WorkerReply::Done`] until it
//! receives [`WorkerCommand::Shutdown`].

use std::path::PathBuf;

use crossbeam_channel::{Receiver, Sender};

use bmrb_core::cache::{CacheLocator, CacheStore};
use bmrb_core::codec;
use bmrb_core::error::Result;
use bmrb_core::{Entry, Namespace};

/// One entry to load and cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub namespace: Namespace,
    pub identifier: String,
    /// Flat-file source; `None` for entries reconstructed from the database.
    pub location: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Loaded,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadResult {
    pub namespace: Namespace,
    pub identifier: String,
    pub outcome: Outcome,
}

impl ReloadResult {
    pub fn is_loaded(&self) -> bool {
        self.outcome == Outcome::Loaded
    }

    pub fn failed(item: &WorkItem, reason: impl Into<String>) -> Self {
        Self {
            namespace: item.namespace,
            identifier: item.identifier.clone(),
            outcome: Outcome::Failed(reason.into()),
        }
    }
}

#[derive(Debug)]
pub enum WorkerCommand {
    Process(WorkItem),
    Shutdown,
}

#[derive(Debug)]
pub enum WorkerReply {
    Ready,
    Done(ReloadResult),
}

/// Produces the entry for a work item, from the database or a file.
pub trait EntryLoader {
    fn load(&mut self, item: &WorkItem) -> Result<Entry>;
}

/// Builds one loader per worker. Called on the dispatcher thread before
/// any worker starts.
pub trait LoaderFactory {
    type Loader: EntryLoader + Send + 'static;

    fn create(&self, worker: usize) -> Result<Self::Loader>;
}

/// Load, compress and store one item. Errors are logged and folded into the
/// result; nothing here aborts the worker.
pub fn process_item<L, C>(loader: &mut L, cache: &mut C, locator: &CacheLocator, item: &WorkItem) -> ReloadResult
where
    L: EntryLoader + ?Sized,
    C: CacheStore + ?Sized,
{
    let stored = loader.load(item).and_then(|entry| {
        let payload = codec::compress_entry(&entry)?;
        let key = CacheLocator::key_for(&item.identifier);
        locator.store(cache, &key, &payload)
    });

    match stored {
        Ok(()) => {
            tracing::debug!(namespace = %item.namespace, entry_id = %item.identifier, "loaded");
            ReloadResult {
                namespace: item.namespace,
                identifier: item.identifier.clone(),
                outcome: Outcome::Loaded,
            }
        }
        Err(e) => {
            tracing::warn!(
                namespace = %item.namespace,
                entry_id = %item.identifier,
                error = %e,
                "entry not loaded"
            );
            ReloadResult::failed(item, e.to_string())
        }
    }
}

/// Worker thread body.
pub fn run_worker<L, C>(
    id: usize,
    mut loader: L,
    mut cache: C,
    locator: CacheLocator,
    commands: Receiver<WorkerCommand>,
    replies: Sender<WorkerReply>,
) where
    L: EntryLoader,
    C: CacheStore,
{
    if replies.send(WorkerReply::Ready).is_err() {
        return;
    }

    // A closed command channel means the dispatcher is gone; stop as if told to.
    while let Ok(command) = commands.recv() {
        match command {
            WorkerCommand::Process(item) => {
                let result = process_item(&mut loader, &mut cache, &locator, &item);
                if replies.send(WorkerReply::Done(result)).is_err() {
                    break;
                }
            }
            WorkerCommand::Shutdown => break,
        }
    }
    tracing::debug!(worker = id, "worker stopped");
}
