//! Reload configuration
//!
//! Loaded once at startup from YAML (every field defaulted), then overridden
//! by command line flags and the environment, and passed down explicitly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use bmrb_core::Namespace;

use crate::error::{ReloadError, Result};

/// Placeholder substituted with the entry identifier in source templates.
pub const ID_PLACEHOLDER: &str = "{id}";

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ReloadConfig {
    pub database: DatabaseSection,
    pub redis: RedisSection,
    pub sources: SourceSection,
    pub minimum_entries: MinimumEntries,
    /// Worker pool size; available parallelism when unset.
    pub workers: Option<usize>,
    /// Attach raw store errors to reported failures.
    pub diagnostic: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: Option<String>,
    pub pool_size: u32,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: None,
            pool_size: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RedisSection {
    pub url: String,
    /// Logical database index; 0 is the serving database.
    pub db: i64,
    pub upload_timeout_secs: u64,
}

impl Default for RedisSection {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            db: 0,
            upload_timeout_secs: 60 * 60 * 24 * 7,
        }
    }
}

/// Where a flat-file namespace keeps its entries.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FileSource {
    /// Directory template; `{id}` is replaced by the entry identifier.
    pub directory: String,
    /// File name template inside that directory.
    pub file_name: String,
}

impl FileSource {
    pub fn path_for(&self, identifier: &str) -> PathBuf {
        Path::new(&self.directory.replace(ID_PLACEHOLDER, identifier))
            .join(self.file_name.replace(ID_PLACEHOLDER, identifier))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SourceSection {
    pub metabolomics: FileSource,
    pub macromolecules: FileSource,
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            metabolomics: FileSource {
                directory: "/reboxitory/metabolomics/{id}".to_string(),
                file_name: "{id}.str".to_string(),
            },
            macromolecules: FileSource {
                directory: "/reboxitory/macromolecules/bmr{id}".to_string(),
                file_name: "bmr{id}_3.str".to_string(),
            },
        }
    }
}

/// Enumerations smaller than this mean the source database is broken.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MinimumEntries {
    pub metabolomics: usize,
    pub macromolecules: usize,
    pub chemcomps: usize,
}

impl Default for MinimumEntries {
    fn default() -> Self {
        Self {
            metabolomics: 1000,
            macromolecules: 10000,
            chemcomps: 1000,
        }
    }
}

impl ReloadConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ReloadError::Config(format!("reading {}: {e}", path.as_ref().display()))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.filter(|n| *n > 0).unwrap_or_else(num_cpus::get)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.redis.upload_timeout_secs)
    }

    pub fn minimum_for(&self, namespace: Namespace) -> usize {
        match namespace {
            Namespace::Metabolomics => self.minimum_entries.metabolomics,
            Namespace::Macromolecules => self.minimum_entries.macromolecules,
            Namespace::Chemcomps => self.minimum_entries.chemcomps,
            Namespace::Uploaded | Namespace::Combined => 0,
        }
    }

    /// Flat-file location of an entry, for namespaces loaded from files.
    pub fn source_path(&self, namespace: Namespace, identifier: &str) -> Option<PathBuf> {
        match namespace {
            Namespace::Metabolomics => Some(self.sources.metabolomics.path_for(identifier)),
            Namespace::Macromolecules => Some(self.sources.macromolecules.path_for(identifier)),
            _ => None,
        }
    }

    pub fn database_url(&self) -> Result<&str> {
        self.database.url.as_deref().ok_or_else(|| {
            ReloadError::Config("no database URL; set DATABASE_URL or --database-url".to_string())
        })
    }
}
