//! Postgres implementations of the bmrb-core ports.
//!
//! All SQL is runtime-checked (`sqlx::query`, not `sqlx::query!`) so the
//! crate builds without a database.

pub mod connection;
pub mod dictionary;
pub mod enumerate;
pub mod rows;

pub use connection::{connect, mask_database_url, DatabaseConfig};
pub use dictionary::load_schema_directory;
pub use enumerate::released_ids;
pub use rows::{execute_select, PgRowSource};
