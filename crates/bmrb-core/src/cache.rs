//! Cache Locator
//!
//! Routes entry identifiers to cache namespaces and keys, and applies each
//! namespace's retention policy. The same routing serves the reload (write)
//! path and the entry read path, so it has to stay a pure function of the
//! identifier.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::codec;
use crate::document::Entry;
use crate::error::{BmrbError, Result};
use crate::namespace::Namespace;
use crate::nmrstar;

/// Uploaded entry keys are 32 hex characters.
pub const UPLOAD_KEY_LEN: usize = 32;

/// Most ids a single read may ask for.
pub const MAX_ENTRIES_PER_READ: usize = 500;

pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24 * 7);

// ── Cache store port ──────────────────────────────────────────

/// The key-value operations the system needs from the cache.
///
/// One handle is one connection; handles are never shared between workers.
pub trait CacheStore: Send {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>>;
    fn set(&mut self, key: &str, value: &[u8]) -> Result<()>;
    fn set_ex(&mut self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;
    fn exists(&mut self, key: &str) -> Result<bool>;
    fn expire(&mut self, key: &str, ttl: Duration) -> Result<bool>;
    /// Deletes keys, returning how many existed.
    fn delete(&mut self, keys: &[String]) -> Result<usize>;
    /// The whole list stored at `key`; empty when absent.
    fn list_range(&mut self, key: &str) -> Result<Vec<String>>;
    fn list_push(&mut self, key: &str, values: &[String]) -> Result<()>;
    fn rename(&mut self, from: &str, to: &str) -> Result<()>;
    fn hash_set(&mut self, key: &str, fields: &[(&str, String)]) -> Result<()>;
    fn flush_db(&mut self) -> Result<()>;
    fn ping(&mut self) -> Result<()>;
    /// Asks the server to snapshot to disk. Returns false when a save was
    /// already running.
    fn request_background_save(&mut self) -> Result<bool>;
}

impl<T: CacheStore + ?Sized> CacheStore for Box<T> {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }
    fn set(&mut self, key: &str, value: &[u8]) -> Result<()> {
        (**self).set(key, value)
    }
    fn set_ex(&mut self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        (**self).set_ex(key, value, ttl)
    }
    fn exists(&mut self, key: &str) -> Result<bool> {
        (**self).exists(key)
    }
    fn expire(&mut self, key: &str, ttl: Duration) -> Result<bool> {
        (**self).expire(key, ttl)
    }
    fn delete(&mut self, keys: &[String]) -> Result<usize> {
        (**self).delete(keys)
    }
    fn list_range(&mut self, key: &str) -> Result<Vec<String>> {
        (**self).list_range(key)
    }
    fn list_push(&mut self, key: &str, values: &[String]) -> Result<()> {
        (**self).list_push(key, values)
    }
    fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        (**self).rename(from, to)
    }
    fn hash_set(&mut self, key: &str, fields: &[(&str, String)]) -> Result<()> {
        (**self).hash_set(key, fields)
    }
    fn flush_db(&mut self) -> Result<()> {
        (**self).flush_db()
    }
    fn ping(&mut self) -> Result<()> {
        (**self).ping()
    }
    fn request_background_save(&mut self) -> Result<bool> {
        (**self).request_background_save()
    }
}

// ── Locator ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    Permanent,
    /// Expires after the duration; every read restarts the clock.
    Sliding(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub namespace: Namespace,
    pub key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryFormat {
    /// The stored zlib payload, untouched.
    Zlib,
    /// Decompressed JSON text.
    Json,
    #[default]
    Entry,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadedEntry {
    Zlib(Vec<u8>),
    Json(String),
    Entry(Entry),
}

/// Result of storing an uploaded entry.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Upload {
    pub entry_id: String,
    /// Unix timestamp at which the upload expires unless read again.
    pub expiration: i64,
}

#[derive(Debug, Clone)]
pub struct CacheLocator {
    upload_timeout: Duration,
}

impl Default for CacheLocator {
    fn default() -> Self {
        Self::new(DEFAULT_UPLOAD_TIMEOUT)
    }
}

impl CacheLocator {
    pub fn new(upload_timeout: Duration) -> Self {
        Self { upload_timeout }
    }

    pub fn upload_timeout(&self) -> Duration {
        self.upload_timeout
    }

    /// Namespace routing by identifier convention, checked in order:
    /// `bm` prefix, `chemcomp` prefix, 32-character token, everything else.
    pub fn namespace_for(identifier: &str) -> Namespace {
        if identifier.starts_with("bm") {
            Namespace::Metabolomics
        } else if identifier.starts_with("chemcomp") {
            Namespace::Chemcomps
        } else if identifier.len() == UPLOAD_KEY_LEN {
            Namespace::Uploaded
        } else {
            Namespace::Macromolecules
        }
    }

    pub fn key_for(identifier: &str) -> CacheKey {
        let namespace = Self::namespace_for(identifier);
        CacheKey {
            namespace,
            key: Self::entry_key(namespace, identifier),
        }
    }

    pub fn entry_key(namespace: Namespace, identifier: &str) -> String {
        format!("{namespace}:entry:{identifier}")
    }

    pub fn list_key(namespace: Namespace) -> String {
        format!("{namespace}:entry_list")
    }

    pub fn loading_key(namespace: Namespace) -> String {
        format!("{namespace}:entry_list_loading")
    }

    pub fn meta_key(namespace: Namespace) -> String {
        format!("{namespace}:meta")
    }

    pub fn retention(&self, namespace: Namespace) -> Retention {
        if namespace.is_transient() {
            Retention::Sliding(self.upload_timeout)
        } else {
            Retention::Permanent
        }
    }

    pub fn store<C: CacheStore + ?Sized>(&self, cache: &mut C, key: &CacheKey, payload: &[u8]) -> Result<()> {
        match self.retention(key.namespace) {
            Retention::Permanent => cache.set(&key.key, payload),
            Retention::Sliding(ttl) => cache.set_ex(&key.key, payload, ttl),
        }
    }

    /// Restarts the expiration clock of a transient entry. Permanent keys
    /// are left alone. Returns whether an expiration was refreshed.
    pub fn touch<C: CacheStore + ?Sized>(&self, cache: &mut C, key: &CacheKey) -> Result<bool> {
        match self.retention(key.namespace) {
            Retention::Permanent => Ok(false),
            Retention::Sliding(ttl) => {
                if cache.exists(&key.key)? {
                    cache.expire(&key.key, ttl)
                } else {
                    Ok(false)
                }
            }
        }
    }

    pub fn load_compressed<C: CacheStore + ?Sized>(&self, cache: &mut C, identifier: &str) -> Result<Vec<u8>> {
        let key = Self::key_for(identifier);
        self.touch(cache, &key)?;
        cache.get(&key.key)?.ok_or_else(|| {
            BmrbError::NotFound(format!(
                "Entry '{identifier}' does not exist in the public database."
            ))
        })
    }

    pub fn load_entry<C: CacheStore + ?Sized>(
        &self,
        cache: &mut C,
        identifier: &str,
        format: EntryFormat,
    ) -> Result<LoadedEntry> {
        let payload = self.load_compressed(cache, identifier)?;
        Ok(match format {
            EntryFormat::Zlib => LoadedEntry::Zlib(payload),
            EntryFormat::Json => LoadedEntry::Json(codec::decompress_json(&payload)?),
            EntryFormat::Entry => LoadedEntry::Entry(codec::decompress_entry(&payload)?),
        })
    }

    /// Loads several entries in request order. Any missing id fails the
    /// whole call.
    pub fn load_many<C: CacheStore + ?Sized>(
        &self,
        cache: &mut C,
        identifiers: &[String],
        format: EntryFormat,
    ) -> Result<Vec<(String, LoadedEntry)>> {
        if identifiers.len() > MAX_ENTRIES_PER_READ {
            return Err(BmrbError::InvalidRequest(format!(
                "Too many IDs queried. Please query {MAX_ENTRIES_PER_READ} or fewer entries at a time. \
                 You attempted to query {} IDs.",
                identifiers.len()
            )));
        }
        identifiers
            .iter()
            .map(|id| Ok((id.clone(), self.load_entry(cache, id, format)?)))
            .collect()
    }

    /// Stores a user-supplied entry, either NMR-STAR text or entry JSON,
    /// under a key derived from its content.
    pub fn store_upload<C: CacheStore + ?Sized>(&self, cache: &mut C, raw: &[u8]) -> Result<Upload> {
        if raw.is_empty() {
            return Err(BmrbError::InvalidRequest(
                "No data uploaded. Please post the NMR-STAR file as the request body.".to_string(),
            ));
        }
        let text = std::str::from_utf8(raw)
            .map_err(|e| BmrbError::InvalidRequest(format!("Uploaded data is not UTF-8: {e}")))?;
        let entry: Entry = if text.trim_start().starts_with('{') {
            serde_json::from_str(text).map_err(|e| {
                BmrbError::InvalidRequest(format!("Invalid uploaded JSON NMR-STAR data. Exception: {e}"))
            })?
        } else {
            nmrstar::parse_entry(text)?
        };

        let digest = hex::encode(Sha256::digest(raw));
        let entry_id = digest[..UPLOAD_KEY_LEN].to_string();
        let key = CacheKey {
            namespace: Namespace::Uploaded,
            key: Self::entry_key(Namespace::Uploaded, &entry_id),
        };
        self.store(cache, &key, &codec::compress_entry(&entry)?)?;

        let expiration = chrono::Utc::now().timestamp() + self.upload_timeout.as_secs() as i64;
        tracing::info!(entry_id = %entry_id, expiration, "stored uploaded entry");
        Ok(Upload {
            entry_id,
            expiration,
        })
    }
}

// ── In-memory store ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Stored {
    Bytes(Vec<u8>),
    List(Vec<String>),
    Hash(BTreeMap<String, String>),
}

#[derive(Debug, Default)]
struct MemoryState {
    values: HashMap<String, Stored>,
    ttls: HashMap<String, Duration>,
    deleted: Vec<String>,
    background_saves: usize,
}

/// Process-local [`CacheStore`]. Clones share the same data, the way
/// separate connections share one server.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| BmrbError::Cache("memory cache lock poisoned".to_string()))
    }

    /// Every key removed through [`CacheStore::delete`], in order.
    pub fn deleted_keys(&self) -> Vec<String> {
        self.state().map(|s| s.deleted.clone()).unwrap_or_default()
    }

    pub fn ttl(&self, key: &str) -> Option<Duration> {
        self.state().ok()?.ttls.get(key).copied()
    }

    pub fn hash(&self, key: &str) -> Option<BTreeMap<String, String>> {
        match self.state().ok()?.values.get(key) {
            Some(Stored::Hash(h)) => Some(h.clone()),
            _ => None,
        }
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .state()
            .map(|s| s.values.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn background_saves(&self) -> usize {
        self.state().map(|s| s.background_saves).unwrap_or_default()
    }
}

fn wrong_type(key: &str) -> BmrbError {
    BmrbError::Cache(format!(
        "WRONGTYPE operation against key {key} holding the wrong kind of value"
    ))
}

impl CacheStore for MemoryCache {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.state()?.values.get(key) {
            None => Ok(None),
            Some(Stored::Bytes(b)) => Ok(Some(b.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn set(&mut self, key: &str, value: &[u8]) -> Result<()> {
        let mut state = self.state()?;
        state.ttls.remove(key);
        state.values.insert(key.to_string(), Stored::Bytes(value.to_vec()));
        Ok(())
    }

    fn set_ex(&mut self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut state = self.state()?;
        state.ttls.insert(key.to_string(), ttl);
        state.values.insert(key.to_string(), Stored::Bytes(value.to_vec()));
        Ok(())
    }

    fn exists(&mut self, key: &str) -> Result<bool> {
        Ok(self.state()?.values.contains_key(key))
    }

    fn expire(&mut self, key: &str, ttl: Duration) -> Result<bool> {
        let mut state = self.state()?;
        if !state.values.contains_key(key) {
            return Ok(false);
        }
        state.ttls.insert(key.to_string(), ttl);
        Ok(true)
    }

    fn delete(&mut self, keys: &[String]) -> Result<usize> {
        let mut state = self.state()?;
        let mut removed = 0;
        for key in keys {
            state.ttls.remove(key);
            if state.values.remove(key).is_some() {
                removed += 1;
            }
            state.deleted.push(key.clone());
        }
        Ok(removed)
    }

    fn list_range(&mut self, key: &str) -> Result<Vec<String>> {
        match self.state()?.values.get(key) {
            None => Ok(Vec::new()),
            Some(Stored::List(items)) => Ok(items.clone()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn list_push(&mut self, key: &str, values: &[String]) -> Result<()> {
        let mut state = self.state()?;
        match state
            .values
            .entry(key.to_string())
            .or_insert_with(|| Stored::List(Vec::new()))
        {
            Stored::List(items) => {
                items.extend(values.iter().cloned());
                Ok(())
            }
            _ => Err(wrong_type(key)),
        }
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let mut state = self.state()?;
        let value = state
            .values
            .remove(from)
            .ok_or_else(|| BmrbError::Cache(format!("ERR no such key: {from}")))?;
        state.values.insert(to.to_string(), value);
        match state.ttls.remove(from) {
            Some(ttl) => state.ttls.insert(to.to_string(), ttl),
            None => state.ttls.remove(to),
        };
        Ok(())
    }

    fn hash_set(&mut self, key: &str, fields: &[(&str, String)]) -> Result<()> {
        let mut state = self.state()?;
        match state
            .values
            .entry(key.to_string())
            .or_insert_with(|| Stored::Hash(BTreeMap::new()))
        {
            Stored::Hash(hash) => {
                for (field, value) in fields {
                    hash.insert(field.to_string(), value.clone());
                }
                Ok(())
            }
            _ => Err(wrong_type(key)),
        }
    }

    fn flush_db(&mut self) -> Result<()> {
        let mut state = self.state()?;
        state.values.clear();
        state.ttls.clear();
        Ok(())
    }

    fn ping(&mut self) -> Result<()> {
        self.state().map(|_| ())
    }

    fn request_background_save(&mut self) -> Result<bool> {
        self.state()?.background_saves += 1;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use pretty_assertions::assert_eq;

    #[test]
    fn routes_by_identifier_convention() {
        let cases = [
            ("bmse000001", Namespace::Metabolomics),
            ("bmst000042", Namespace::Metabolomics),
            ("chemcomp_ALA", Namespace::Chemcomps),
            ("0123456789abcdef0123456789abcdef", Namespace::Uploaded),
            ("15000", Namespace::Macromolecules),
            ("", Namespace::Macromolecules),
        ];
        for (id, namespace) in cases {
            assert_eq!(CacheLocator::namespace_for(id), namespace, "{id}");
        }
        // Prefixes win over length.
        assert_eq!(
            CacheLocator::namespace_for("bm000000000000000000000000000000"),
            Namespace::Metabolomics
        );
        assert_eq!(
            CacheLocator::key_for("15000").key,
            "macromolecules:entry:15000"
        );
        assert_eq!(
            CacheLocator::key_for("chemcomp_ALA").key,
            "chemcomps:entry:chemcomp_ALA"
        );
    }

    #[test]
    fn key_for_is_stable() {
        for id in ["15000", "bmse000001", "chemcomp_0G", "deadbeefdeadbeefdeadbeefdeadbeef"] {
            assert_eq!(CacheLocator::key_for(id), CacheLocator::key_for(id));
        }
    }

    #[test]
    fn store_then_load_round_trips() {
        let locator = CacheLocator::default();
        let mut cache = MemoryCache::new();
        let mut entry = Entry::new("15000");
        let mut doc = Document::new("entry_information", "entry_information", "_Entry");
        doc.add_field("ID", "15000");
        entry.documents.push(doc);

        let key = CacheLocator::key_for("15000");
        locator
            .store(&mut cache, &key, &codec::compress_entry(&entry).unwrap())
            .unwrap();
        assert_eq!(cache.ttl(&key.key), None);

        match locator.load_entry(&mut cache, "15000", EntryFormat::Entry).unwrap() {
            LoadedEntry::Entry(loaded) => assert_eq!(loaded, entry),
            other => panic!("unexpected {other:?}"),
        }
        match locator.load_entry(&mut cache, "15000", EntryFormat::Json).unwrap() {
            LoadedEntry::Json(json) => assert!(json.contains("\"entry_id\":\"15000\"")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_entry_is_not_found() {
        let mut cache = MemoryCache::new();
        let err = CacheLocator::default()
            .load_compressed(&mut cache, "99999")
            .unwrap_err();
        assert!(matches!(err, BmrbError::NotFound(_)));
        assert_eq!(err.http_status(), 404);
    }

    #[test]
    fn load_many_enforces_limit() {
        let mut cache = MemoryCache::new();
        let ids: Vec<String> = (0..=MAX_ENTRIES_PER_READ).map(|i| i.to_string()).collect();
        let err = CacheLocator::default()
            .load_many(&mut cache, &ids, EntryFormat::Zlib)
            .unwrap_err();
        assert!(matches!(err, BmrbError::InvalidRequest(_)));
    }

    #[test]
    fn uploads_expire_and_are_touched_on_read() {
        let locator = CacheLocator::new(Duration::from_secs(60));
        let mut cache = MemoryCache::new();
        let upload = locator
            .store_upload(&mut cache, b"data_test\nsave_a\n_A.Sf_category a\nsave_\n")
            .unwrap();

        assert_eq!(upload.entry_id.len(), UPLOAD_KEY_LEN);
        let key = CacheLocator::key_for(&upload.entry_id);
        assert_eq!(key.namespace, Namespace::Uploaded);
        assert_eq!(cache.ttl(&key.key), Some(Duration::from_secs(60)));

        // Simulate the clock running down, then read.
        cache.expire(&key.key, Duration::from_secs(5)).unwrap();
        locator
            .load_entry(&mut cache, &upload.entry_id, EntryFormat::Zlib)
            .unwrap();
        assert_eq!(cache.ttl(&key.key), Some(Duration::from_secs(60)));
    }

    #[test]
    fn upload_rejects_garbage() {
        let locator = CacheLocator::default();
        let mut cache = MemoryCache::new();
        assert!(matches!(
            locator.store_upload(&mut cache, b""),
            Err(BmrbError::InvalidRequest(_))
        ));
        assert!(matches!(
            locator.store_upload(&mut cache, b"{not json"),
            Err(BmrbError::InvalidRequest(_))
        ));
        assert!(matches!(
            locator.store_upload(&mut cache, b"save_x\n"),
            Err(BmrbError::Parse { .. })
        ));
    }

    #[test]
    fn memory_cache_rename_and_lists() {
        let mut cache = MemoryCache::new();
        cache
            .list_push("m:entry_list_loading", &["1".into(), "2".into()])
            .unwrap();
        cache.rename("m:entry_list_loading", "m:entry_list").unwrap();
        assert_eq!(cache.list_range("m:entry_list").unwrap(), vec!["1", "2"]);
        assert!(cache.list_range("m:entry_list_loading").unwrap().is_empty());
        assert!(cache.rename("missing", "x").is_err());

        cache.set("k", b"v").unwrap();
        assert!(cache.list_range("k").is_err());
    }
}
