//! DISPATCH and DRAIN.
//!
//! One dispatcher thread hands work items to a fixed pool of worker
//! threads. Every worker has its own command and reply channel; the
//! dispatcher waits on all reply channels at once and serves whichever
//! worker answers first.

use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Select, Sender};

use bmrb_core::cache::{CacheLocator, CacheStore, MemoryCache};

use crate::error::{ReloadError, Result};
use crate::redis_cache::{RedisCache, RedisConnector};
use crate::worker::{run_worker, LoaderFactory, ReloadResult, WorkItem, WorkerCommand, WorkerReply};

// ── Cache connections ─────────────────────────────────────────

/// Opens private cache connections, one per worker plus one for the
/// dispatcher.
pub trait CacheConnector {
    type Cache: CacheStore + 'static;

    /// Where connections go, for error messages.
    fn target(&self) -> String;

    fn open(&self) -> bmrb_core::Result<Self::Cache>;

    /// Like [`open`](Self::open), but a failure is fatal for the run.
    fn open_required(&self) -> Result<Self::Cache> {
        self.open().map_err(|e| ReloadError::CacheUnavailable {
            target: self.target(),
            reason: e.to_string(),
        })
    }
}

impl CacheConnector for RedisConnector {
    type Cache = RedisCache;

    fn target(&self) -> String {
        RedisConnector::target(self)
    }

    fn open(&self) -> bmrb_core::Result<RedisCache> {
        self.connect()
    }
}

impl CacheConnector for MemoryCache {
    type Cache = MemoryCache;

    fn target(&self) -> String {
        "memory".to_string()
    }

    fn open(&self) -> bmrb_core::Result<MemoryCache> {
        Ok(self.clone())
    }
}

// ── Dispatcher ────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
enum WorkerState {
    /// Spawned, has not reported ready yet.
    Starting,
    Idle,
    Busy(WorkItem),
    /// Reply channel closed; the thread is gone.
    Dead,
}

struct WorkerHandle {
    id: usize,
    commands: Sender<WorkerCommand>,
    replies: Receiver<WorkerReply>,
    thread: Option<JoinHandle<()>>,
    state: WorkerState,
}

impl WorkerHandle {
    fn is_alive(&self) -> bool {
        self.state != WorkerState::Dead
    }

    fn is_busy(&self) -> bool {
        matches!(self.state, WorkerState::Busy(_))
    }
}

/// Runs every item through the worker pool and returns one result per item.
///
/// All cache connections and loaders are opened before the first thread
/// starts, so an unreachable cache aborts the run with nothing dispatched.
pub fn run_dispatch<K, F>(
    items: Vec<WorkItem>,
    pool_size: usize,
    connector: &K,
    factory: &F,
    locator: &CacheLocator,
) -> Result<Vec<ReloadResult>>
where
    K: CacheConnector,
    F: LoaderFactory,
{
    let pool_size = pool_size.max(1);

    let mut resources = Vec::with_capacity(pool_size);
    for id in 0..pool_size {
        let cache = connector.open_required()?;
        let loader = factory.create(id)?;
        resources.push((cache, loader));
    }

    let mut workers = Vec::with_capacity(pool_size);
    for (id, (cache, loader)) in resources.into_iter().enumerate() {
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (reply_tx, reply_rx) = crossbeam_channel::unbounded();
        let locator = locator.clone();
        let thread = std::thread::Builder::new()
            .name(format!("reload-worker-{id}"))
            .spawn(move || run_worker(id, loader, cache, locator, command_rx, reply_tx))
            .map_err(|e| ReloadError::WorkerSpawn(id, e.to_string()))?;
        workers.push(WorkerHandle {
            id,
            commands: command_tx,
            replies: reply_rx,
            thread: Some(thread),
            state: WorkerState::Starting,
        });
    }

    tracing::info!(items = items.len(), workers = pool_size, "dispatching");
    let results = dispatch(items, &mut workers);
    drain(&mut workers);
    Ok(results)
}

fn dispatch(mut backlog: Vec<WorkItem>, workers: &mut [WorkerHandle]) -> Vec<ReloadResult> {
    let total = backlog.len();
    let mut results = Vec::with_capacity(total);

    while !backlog.is_empty() || workers.iter().any(WorkerHandle::is_busy) {
        let live: Vec<usize> = workers
            .iter()
            .enumerate()
            .filter(|(_, w)| w.is_alive())
            .map(|(i, _)| i)
            .collect();
        if live.is_empty() {
            tracing::error!(remaining = backlog.len(), "every worker has exited");
            results.extend(
                backlog
                    .drain(..)
                    .map(|item| ReloadResult::failed(&item, "no live workers")),
            );
            break;
        }

        let (index, reply) = {
            let mut select = Select::new();
            for &i in &live {
                select.recv(&workers[i].replies);
            }
            let operation = select.select();
            let index = live[operation.index()];
            (index, operation.recv(&workers[index].replies))
        };
        let worker = &mut workers[index];

        match reply {
            Ok(WorkerReply::Ready) => {}
            Ok(WorkerReply::Done(result)) => {
                results.push(result);
                if results.len() % 1000 == 0 {
                    tracing::info!(done = results.len(), total, "reload progress");
                }
            }
            Err(_) => {
                tracing::error!(worker = worker.id, "worker exited unexpectedly");
                if let WorkerState::Busy(item) = std::mem::replace(&mut worker.state, WorkerState::Dead) {
                    results.push(ReloadResult::failed(&item, "worker exited while loading"));
                }
                continue;
            }
        }

        worker.state = WorkerState::Idle;
        if let Some(item) = backlog.pop() {
            match worker.commands.send(WorkerCommand::Process(item.clone())) {
                Ok(()) => worker.state = WorkerState::Busy(item),
                Err(_) => {
                    worker.state = WorkerState::Dead;
                    results.push(ReloadResult::failed(&item, "worker exited before loading"));
                }
            }
        }
    }

    results
}

/// Tells every worker to stop and waits for it.
fn drain(workers: &mut [WorkerHandle]) {
    for worker in workers.iter() {
        // A worker that already exited has dropped its receiver.
        let _ = worker.commands.send(WorkerCommand::Shutdown);
    }
    for worker in workers.iter_mut() {
        if let Some(thread) = worker.thread.take() {
            if thread.join().is_err() {
                tracing::error!(worker = worker.id, "worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::{EntryLoader, Outcome};
    use bmrb_core::{BmrbError, Entry, Namespace};
    use pretty_assertions::assert_eq;

    struct Loader {
        panic_on: Option<&'static str>,
    }

    impl EntryLoader for Loader {
        fn load(&mut self, item: &WorkItem) -> bmrb_core::Result<Entry> {
            if Some(item.identifier.as_str()) == self.panic_on {
                panic!("loader blew up");
            }
            if item.identifier.ends_with("x") {
                return Err(BmrbError::NotFound("no matching record".into()));
            }
            Ok(Entry::new(item.identifier.clone()))
        }
    }

    struct Factory {
        panic_on: Option<&'static str>,
    }

    impl LoaderFactory for Factory {
        type Loader = Loader;

        fn create(&self, _worker: usize) -> bmrb_core::Result<Loader> {
            Ok(Loader {
                panic_on: self.panic_on,
            })
        }
    }

    struct Unreachable;

    impl CacheConnector for Unreachable {
        type Cache = MemoryCache;

        fn target(&self) -> String {
            "redis://10.0.0.1:6379/0".into()
        }

        fn open(&self) -> bmrb_core::Result<MemoryCache> {
            Err(BmrbError::Cache("connection refused".into()))
        }
    }

    fn items(ids: &[&str]) -> Vec<WorkItem> {
        ids.iter()
            .map(|id| WorkItem {
                namespace: Namespace::Macromolecules,
                identifier: id.to_string(),
                location: None,
            })
            .collect()
    }

    #[test]
    fn every_item_gets_exactly_one_result() {
        let cache = MemoryCache::new();
        let ids: Vec<String> = (0..50).map(|i| i.to_string()).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();

        let mut results = run_dispatch(
            items(&refs),
            4,
            &cache,
            &Factory { panic_on: None },
            &CacheLocator::default(),
        )
        .unwrap();

        results.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        let mut expected = ids.clone();
        expected.sort();
        assert_eq!(
            results.iter().map(|r| r.identifier.clone()).collect::<Vec<_>>(),
            expected
        );
        assert!(results.iter().all(ReloadResult::is_loaded));
        assert_eq!(cache.keys().len(), 50);
    }

    #[test]
    fn failures_do_not_stop_the_pool() {
        let cache = MemoryCache::new();
        let results = run_dispatch(
            items(&["1", "2x", "3"]),
            2,
            &cache,
            &Factory { panic_on: None },
            &CacheLocator::default(),
        )
        .unwrap();

        let failed: Vec<_> = results.iter().filter(|r| !r.is_loaded()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].identifier, "2x");
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn panicking_worker_fails_its_item_and_the_rest_continue() {
        let cache = MemoryCache::new();
        let results = run_dispatch(
            items(&["1", "2", "boom", "4", "5"]),
            3,
            &cache,
            &Factory {
                panic_on: Some("boom"),
            },
            &CacheLocator::default(),
        )
        .unwrap();

        assert_eq!(results.len(), 5);
        let boom = results.iter().find(|r| r.identifier == "boom").unwrap();
        assert!(matches!(boom.outcome, Outcome::Failed(_)));
        assert_eq!(results.iter().filter(|r| r.is_loaded()).count(), 4);
    }

    #[test]
    fn unreachable_cache_aborts_before_dispatch() {
        let err = run_dispatch(
            items(&["1"]),
            2,
            &Unreachable,
            &Factory { panic_on: None },
            &CacheLocator::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ReloadError::CacheUnavailable { ref target, .. } if target.contains("10.0.0.1")));
    }

    #[test]
    fn empty_backlog_still_shuts_workers_down() {
        let results = run_dispatch(
            Vec::new(),
            2,
            &MemoryCache::new(),
            &Factory { panic_on: None },
            &CacheLocator::default(),
        )
        .unwrap();
        assert!(results.is_empty());
    }
}
