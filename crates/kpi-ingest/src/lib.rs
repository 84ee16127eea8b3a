//! KPI ingestion: CSV exports in, typed samples out, plus fuzzy lookup of
//! user-typed metric and entity names against what the data contains.

pub mod loader;
pub mod resolve;

pub use loader::{CsvLoader, LoaderOptions, Snapshot};
pub use resolve::{resolve, MatchKind, Resolution};
