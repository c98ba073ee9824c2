//! Configuration datastore for File Integrity Monitoring (FIM) sections and
//! YARA signature groups.
//!
//! Writes go through the [`Datastore`] trait and accept an optional
//! [`Transaction`]; without one they auto-commit. Reads rebuild the
//! denormalized [`YaraSection`] aggregate fresh on every call.
//!
//! Two backends: [`PgDatastore`] (Postgres, full transaction support) and
//! [`MemoryDatastore`] (in-process, auto-commit only).

pub mod config;
pub mod datastore;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod render;
pub mod transaction;
pub mod types;
pub mod yara;

pub use config::DatastoreConfig;
pub use datastore::Datastore;
pub use error::{DatastoreError, EntityKind, Result};
pub use memory::MemoryDatastore;
pub use postgres::PgDatastore;
pub use render::FimConfig;
pub use transaction::Transaction;
pub use types::{FimSection, FimSections, NewFimSection, NewYaraSignatureGroup, YaraSignatureGroup};
pub use yara::YaraSection;
