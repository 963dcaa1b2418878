//! ETL pipeline for municipal open-data weather readings.
//!
//! Fetches raw readings per station from the upstream paginated API, cleans
//! and deduplicates them, and persists them idempotently into SQLite. The
//! station catalog and loader staging sit on three hand-built containers
//! (binary search tree, chained hash map, singly linked list).

pub mod catalog;
pub mod config;
pub mod error;
pub mod extract;
pub mod load;
pub mod logging;
pub mod pipeline;
pub mod structures;
pub mod transform;
pub mod types;

pub use catalog::StationCatalog;
pub use config::Config;
pub use error::{EtlError, ExtractError, LoadError, RejectReason, Result};
pub use pipeline::Pipeline;
pub use types::{CancelFlag, CleanReading, RawReading, RunReport, StationDescriptor};
