pub mod cache;
pub mod claims;
pub mod config;
pub mod db;
pub mod error;
pub mod homepage;
pub mod importer;
pub mod merges;
pub mod models;
pub mod query;
pub mod visitors;
pub mod wordfreq;
mod migrations;

pub use cache::{AnalyticsEngine, RefreshReport};
pub use config::Config;
pub use db::{open_archive, ArchiveDb};
pub use error::CoreError;
pub use importer::{import_export, import_export_with_progress, ImportOptions, ImportReport};
