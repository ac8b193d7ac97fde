//! SQL corpus pipeline: workspace crawl -> SQL extraction -> fingerprint
//! analysis -> clustering -> document authoring with cross-doc validation
//! and optional focus docs.

pub mod author;
pub mod client;
pub mod clusters;
pub mod counters;
pub mod discovery;
pub mod fingerprint;
pub mod focus;
pub mod jobs;
pub mod orchestrator;
pub mod payload;
pub mod qfp;
pub mod sql_extract;
pub mod storage;
pub mod validation;

pub use orchestrator::DatabricksService;
pub use storage::SqlCorpusStore;

/// Sync progress callback: (phase, completed, total, detail).
pub type ProgressFn<'a> = &'a (dyn Fn(&str, usize, usize, &str) + Send + Sync);
