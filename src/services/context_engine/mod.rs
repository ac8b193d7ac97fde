//! Context-tree engine: collect every context document, structure them via
//! LLM into a health-scored hierarchy, and enrich with secret, redundancy,
//! and conflict analysis.

pub mod collector;
pub mod conflicts;
pub mod health;
pub mod node;
pub mod orchestrator;
pub mod parsing;
pub mod redundancy;
pub mod restructure;
pub mod sanitizer;
pub mod secret_scanner;
pub mod storage;
pub mod tree_builder;

pub use node::TreeNode;
pub use orchestrator::ContextEngineService;
pub use storage::TreeRunStore;

/// Sync progress callback: (phase, completed, total, detail).
pub type ProgressFn<'a> = &'a (dyn Fn(&str, usize, usize, &str) + Send + Sync);
