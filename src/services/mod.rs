pub mod chat;
pub mod config_apis;
pub mod confluence;
pub mod context_docs;
pub mod context_engine;
pub mod databricks;
pub mod llm;
pub mod progress;
pub mod task_registry;
pub mod tools;

pub use chat::ChatService;
pub use config_apis::{ConfigApiService, ConfigStore};
pub use confluence::ConfluenceService;
pub use context_docs::ContextDocStore;
pub use context_engine::{ContextEngineService, TreeRunStore};
pub use databricks::{DatabricksService, SqlCorpusStore};
pub use llm::LlmGateway;
pub use progress::ProgressHub;
pub use task_registry::TaskRegistry;
pub use tools::ToolRegistry;
