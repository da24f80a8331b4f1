//! PUBLISH: replace a namespace's identifier list in one step.
//!
//! The new list is written under a loading key and renamed over the
//! published key, so readers see either the old list or the new one.
//! Entries whose identifiers left the list are deleted first.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use bmrb_core::cache::{CacheLocator, CacheStore};
use bmrb_core::error::Result;
use bmrb_core::natural::natural_sort;
use bmrb_core::Namespace;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishOutcome {
    pub namespace: Namespace,
    /// Identifiers now published, in natural order.
    pub published: Vec<String>,
    /// Cache keys removed because their identifier disappeared.
    pub deleted: Vec<String>,
}

/// Publishes `loaded` as the namespace's list.
///
/// Returns `None` without touching the cache when nothing loaded; an empty
/// result means the source is broken, not that the archive is empty.
pub fn publish_namespace<C: CacheStore + ?Sized>(
    cache: &mut C,
    namespace: Namespace,
    mut loaded: Vec<String>,
    now: DateTime<Utc>,
) -> Result<Option<PublishOutcome>> {
    natural_sort(&mut loaded);
    if loaded.is_empty() {
        tracing::error!(%namespace, "no entries loaded; keeping the published list");
        return Ok(None);
    }

    let keep: HashSet<&str> = loaded.iter().map(String::as_str).collect();
    let previous = cache.list_range(&CacheLocator::list_key(namespace))?;
    let mut deleted = Vec::new();
    for stale in previous.iter().filter(|id| !keep.contains(id.as_str())) {
        let key = CacheLocator::entry_key(namespace, stale);
        if cache.delete(std::slice::from_ref(&key))? > 0 {
            tracing::info!(%key, "deleted stale entry");
            deleted.push(key);
        }
    }

    write_list(cache, namespace, &loaded, now)?;
    tracing::info!(%namespace, entries = loaded.len(), deleted = deleted.len(), "published");

    Ok(Some(PublishOutcome {
        namespace,
        published: loaded,
        deleted,
    }))
}

/// Rebuilds the combined list from the published archive lists. Entries
/// live in their own namespaces, so nothing is deleted here.
pub fn publish_combined<C: CacheStore + ?Sized>(cache: &mut C, now: DateTime<Utc>) -> Result<usize> {
    let mut combined = Vec::new();
    for namespace in Namespace::RELOADABLE {
        combined.extend(cache.list_range(&CacheLocator::list_key(namespace))?);
    }
    if combined.is_empty() {
        tracing::warn!("no published lists; combined list left as is");
        return Ok(0);
    }
    write_list(cache, Namespace::Combined, &combined, now)?;
    Ok(combined.len())
}

fn write_list<C: CacheStore + ?Sized>(
    cache: &mut C,
    namespace: Namespace,
    ids: &[String],
    now: DateTime<Utc>,
) -> Result<()> {
    cache.hash_set(
        &CacheLocator::meta_key(namespace),
        &[
            ("update_time", now.timestamp().to_string()),
            ("num_entries", ids.len().to_string()),
        ],
    )?;
    let loading = CacheLocator::loading_key(namespace);
    cache.delete(std::slice::from_ref(&loading))?;
    cache.list_push(&loading, ids)?;
    cache.rename(&loading, &CacheLocator::list_key(namespace))
}

/// Enumerated identifiers that did not make it into the list.
pub fn dropped_ids(enumerated: &[String], loaded: &[String]) -> Vec<String> {
    let loaded: HashSet<&str> = loaded.iter().map(String::as_str).collect();
    enumerated
        .iter()
        .filter(|id| !loaded.contains(id.as_str()))
        .cloned()
        .collect()
}
