//! Core of the BMRB entry service.
//!
//! Everything here is storage-agnostic. The relational store is reached
//! through [`reconstruct::RowSource`] and the key-value cache through
//! [`cache::CacheStore`]; the Postgres and redis implementations live in
//! their own crates.

pub mod cache;
pub mod codec;
pub mod document;
pub mod error;
pub mod namespace;
pub mod natural;
pub mod nmrstar;
pub mod query;
pub mod reconstruct;
pub mod schema;

pub use cache::{CacheKey, CacheLocator, CacheStore, EntryFormat, LoadedEntry, MemoryCache, Retention};
pub use document::{DataTable, Document, Entry, TagName};
pub use error::{BmrbError, Result};
pub use namespace::Namespace;
pub use query::{build_select, Modifiers, SelectQuery, SelectStatement, SqlParam};
pub use reconstruct::{Reconstructor, Record, RowSource};
pub use schema::{FieldDescriptor, PrintFlag, SchemaDirectory, SectionDescriptor, SectionGroup};
