//! One reload run: ENUMERATE, DISPATCH, DRAIN, PUBLISH.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use bmrb_core::cache::{CacheLocator, CacheStore};
use bmrb_core::Namespace;

use crate::config::ReloadConfig;
use crate::error::{ReloadError, Result};
use crate::pipeline::{run_dispatch, CacheConnector};
use crate::publish::{dropped_ids, publish_combined, publish_namespace};
use crate::sources::IdSource;
use crate::worker::{LoaderFactory, Outcome, ReloadResult, WorkItem};

/// What to reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadOptions {
    namespaces: Vec<Namespace>,
    pub flush: bool,
}

impl ReloadOptions {
    /// Namespaces are reloaded and published in [`Namespace::RELOADABLE`]
    /// order regardless of the order given.
    pub fn new(namespaces: impl IntoIterator<Item = Namespace>, flush: bool) -> Result<Self> {
        let requested: Vec<Namespace> = namespaces.into_iter().collect();
        let namespaces: Vec<Namespace> = Namespace::RELOADABLE
            .into_iter()
            .filter(|ns| requested.contains(ns))
            .collect();
        if namespaces.is_empty() {
            return Err(ReloadError::NothingSelected);
        }
        Ok(Self { namespaces, flush })
    }

    pub fn namespaces(&self) -> &[Namespace] {
        &self.namespaces
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub identifier: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamespaceReport {
    pub namespace: Namespace,
    pub enumerated: usize,
    /// Size of the published list; 0 when publishing was skipped.
    pub published: usize,
    /// Cache keys removed because their identifier left the list.
    pub deleted: Vec<String>,
    /// Enumerated identifiers missing from the published list.
    pub dropped: Vec<String>,
    pub failures: Vec<Failure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReloadReport {
    pub run_id: Uuid,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    pub namespaces: Vec<NamespaceReport>,
    pub combined_entries: usize,
    pub background_save_requested: bool,
}

impl ReloadReport {
    pub fn failure_count(&self) -> usize {
        self.namespaces.iter().map(|n| n.failures.len()).sum()
    }

    pub fn namespace(&self, namespace: Namespace) -> Option<&NamespaceReport> {
        self.namespaces.iter().find(|n| n.namespace == namespace)
    }
}

/// Per-namespace bookkeeping while results come back.
#[derive(Default)]
struct Tally {
    enumerated: Vec<String>,
    loaded: Vec<String>,
    failures: Vec<Failure>,
}

pub fn run_reload<I, K, F>(
    options: &ReloadOptions,
    config: &ReloadConfig,
    ids: &mut I,
    connector: &K,
    factory: &F,
) -> Result<ReloadReport>
where
    I: IdSource + ?Sized,
    K: CacheConnector,
    F: LoaderFactory,
{
    let run_id = Uuid::new_v4();
    let started = Utc::now();
    tracing::info!(%run_id, namespaces = ?options.namespaces(), "reload started");

    let mut control = connector.open_required()?;

    // ── ENUMERATE ──
    let mut tallies: BTreeMap<Namespace, Tally> = BTreeMap::new();
    let mut backlog = Vec::new();
    for &namespace in options.namespaces() {
        let identifiers = ids.released_ids(namespace)?;
        let minimum = config.minimum_for(namespace);
        if identifiers.len() < minimum {
            return Err(ReloadError::TooFewEntries {
                namespace,
                found: identifiers.len(),
                minimum,
            });
        }
        tracing::info!(%namespace, count = identifiers.len(), "enumerated");

        backlog.extend(identifiers.iter().map(|identifier| WorkItem {
            namespace,
            identifier: identifier.clone(),
            location: config.source_path(namespace, identifier),
        }));
        tallies.entry(namespace).or_default().enumerated = identifiers;
    }

    if options.flush {
        tracing::warn!("flushing cache database before reload");
        control.flush_db()?;
    }

    // ── DISPATCH / DRAIN ──
    let locator = CacheLocator::new(config.upload_timeout());
    let results = run_dispatch(backlog, config.worker_count(), connector, factory, &locator)?;
    for ReloadResult {
        namespace,
        identifier,
        outcome,
    } in results
    {
        let tally = tallies.entry(namespace).or_default();
        match outcome {
            Outcome::Loaded => tally.loaded.push(identifier),
            Outcome::Failed(reason) => tally.failures.push(Failure { identifier, reason }),
        }
    }

    // ── PUBLISH ──
    let now = Utc::now();
    let mut reports = Vec::with_capacity(options.namespaces().len());
    for &namespace in options.namespaces() {
        let Tally {
            enumerated,
            loaded,
            mut failures,
        } = tallies.remove(&namespace).unwrap_or_default();
        failures.sort_by(|a, b| a.identifier.cmp(&b.identifier));

        let dropped = dropped_ids(&enumerated, &loaded);
        if !dropped.is_empty() {
            tracing::info!(%namespace, ?dropped, "entries not loaded");
        }
        let outcome = publish_namespace(&mut control, namespace, loaded, now)?;
        let (published, deleted) = match outcome {
            Some(outcome) => (outcome.published.len(), outcome.deleted),
            None => (0, Vec::new()),
        };

        reports.push(NamespaceReport {
            namespace,
            enumerated: enumerated.len(),
            published,
            deleted,
            dropped,
            failures,
        });
    }

    let combined_entries = publish_combined(&mut control, now)?;
    let background_save_requested = control.request_background_save()?;
    if !background_save_requested {
        tracing::info!("background save already in progress");
    }

    let report = ReloadReport {
        run_id,
        started,
        finished: Utc::now(),
        namespaces: reports,
        combined_entries,
        background_save_requested,
    };
    tracing::info!(
        %run_id,
        failures = report.failure_count(),
        combined = report.combined_entries,
        "reload finished"
    );
    Ok(report)
}
