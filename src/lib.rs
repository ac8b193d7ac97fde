//! Prism Library
//!
//! This library contains all the core modules for the Prism application:
//! the SQL corpus pipeline, the configuration-object pipeline, the wiki
//! ingest, and the context-tree engine, on shared task/progress/LLM
//! infrastructure.

use sqlx::SqlitePool;
use std::sync::Arc;

pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use config::Config;
pub use services::llm::{LlmError, LlmGateway};
pub use services::{
    ChatService, ConfigApiService, ConfigStore, ConfluenceService, ContextDocStore,
    ContextEngineService, DatabricksService, ProgressHub, SqlCorpusStore, TaskRegistry,
    ToolRegistry, TreeRunStore,
};

/// Application shared state
///
/// Design Philosophy: Keep it simple - Rust's type system IS our DI container.
/// All services are wrapped in Arc for cheap cloning and thread safety.
pub struct AppState {
    pub db: SqlitePool,
    pub config: Config,

    pub hub: Arc<ProgressHub>,
    pub task_registry: Arc<TaskRegistry>,
    pub tool_registry: Arc<ToolRegistry>,
    pub gateway: LlmGateway,

    pub doc_store: ContextDocStore,
    pub databricks_service: Arc<DatabricksService>,
    pub config_api_service: Arc<ConfigApiService>,
    pub context_engine_service: Arc<ContextEngineService>,
    pub confluence_service: Arc<ConfluenceService>,
    pub chat_service: Arc<ChatService>,
}
