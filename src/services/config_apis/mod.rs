//! Configuration-object pipeline: platform API fan-out, structural
//! fingerprinting, clustering with diverse templates, and reference-doc
//! authoring.

pub mod author;
pub mod categories;
pub mod client;
pub mod clusters;
pub mod counters;
pub mod fingerprint;
pub mod orchestrator;
pub mod payload;
pub mod storage;

pub use orchestrator::ConfigApiService;
pub use storage::ConfigStore;

/// Sync progress callback: (phase, completed, total, detail).
pub type ProgressFn<'a> = &'a (dyn Fn(&str, usize, usize, &str) + Send + Sync);
