use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use prism::config::Config;
use prism::db;
use prism::services::chat::store::ChatStore;
use prism::services::tools::{context_tools, AllowAll};
use prism::{
    handlers, AppState, ChatService, ConfigApiService, ConfigStore, ConfluenceService,
    ContextDocStore, ContextEngineService, DatabricksService, LlmGateway, ProgressHub,
    SqlCorpusStore, TaskRegistry, ToolRegistry, TreeRunStore,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);
    let registry = tracing_subscriber::registry().with(log_filter);

    // Keep the file-appender guard alive for the process lifetime.
    let mut _log_guard = None;
    if let Some(log_file) = &config.logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("prism.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        _log_guard = Some(guard);
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
    tracing::info!("Prism starting up");
    tracing::info!("Configuration loaded successfully");

    let pool = db::create_pool(&config.database.url).await?;
    tracing::info!("Database pool created and migrations applied");

    let hub = Arc::new(ProgressHub::new());
    let task_registry = Arc::new(TaskRegistry::new());
    let gateway = LlmGateway::new(config.llm.clone());

    let tool_registry = Arc::new(ToolRegistry::new(Arc::new(AllowAll)));
    context_tools::register_context_tools(&tool_registry);
    tracing::info!("Tool registry initialized with {} tools", tool_registry.len());

    let doc_store = ContextDocStore::new(pool.clone());

    let databricks_service = Arc::new(DatabricksService::new(
        SqlCorpusStore::new(pool.clone()),
        doc_store.clone(),
        gateway.clone(),
        Arc::clone(&hub),
        Arc::clone(&task_registry),
        config.budgets.clone(),
        config.filters.clone(),
        config.pipeline.clone(),
    ));

    let config_api_service = Arc::new(ConfigApiService::new(
        ConfigStore::new(pool.clone()),
        doc_store.clone(),
        gateway.clone(),
        Arc::clone(&hub),
        Arc::clone(&task_registry),
        config.budgets.clone(),
    ));

    let context_engine_service = Arc::new(ContextEngineService::new(
        TreeRunStore::new(pool.clone()),
        doc_store.clone(),
        gateway.clone(),
        Arc::clone(&hub),
        Arc::clone(&task_registry),
        config.budgets.clone(),
        config.chat.clone(),
    ));

    let confluence_service = Arc::new(ConfluenceService::new(
        pool.clone(),
        doc_store.clone(),
        config.confluence.clone(),
        Arc::clone(&hub),
        Arc::clone(&task_registry),
    ));

    let chat_service = Arc::new(ChatService::new(
        ChatStore::new(pool.clone()),
        gateway.clone(),
        Arc::clone(&tool_registry),
        Arc::clone(&hub),
        config.chat.clone(),
    ));
    tracing::info!("Services initialized");

    let app_state = Arc::new(AppState {
        db: pool.clone(),
        config: config.clone(),
        hub: Arc::clone(&hub),
        task_registry: Arc::clone(&task_registry),
        tool_registry: Arc::clone(&tool_registry),
        gateway: gateway.clone(),
        doc_store,
        databricks_service,
        config_api_service,
        context_engine_service,
        confluence_service,
        chat_service,
    });

    let api_routes = Router::new()
        .route(
            "/api/extraction/runs",
            post(handlers::extraction::submit_extraction)
                .get(handlers::extraction::list_extraction_runs),
        )
        .route("/api/extraction/runs/:id", get(handlers::extraction::get_extraction_run))
        .route("/api/extraction/runs/:id", delete(handlers::extraction::delete_extraction_run))
        .route("/api/extraction/runs/:id/cancel", post(handlers::extraction::cancel_extraction_run))
        .route("/api/extraction/runs/:id/analyze", post(handlers::extraction::submit_analysis))
        .route("/api/analysis/:id", get(handlers::extraction::get_analysis_run))
        .route("/api/analysis/:id/cancel", post(handlers::extraction::cancel_analysis_run))
        .route("/api/analysis/:id/docs", post(handlers::extraction::submit_doc_generation))
        .route("/api/config-apis/categories", get(handlers::config_apis::list_categories))
        .route(
            "/api/config-apis/runs",
            post(handlers::config_apis::submit_extraction)
                .get(handlers::config_apis::list_extraction_runs),
        )
        .route("/api/config-apis/runs/:id", get(handlers::config_apis::get_extraction_run))
        .route(
            "/api/config-apis/runs/:id/cancel",
            post(handlers::config_apis::cancel_extraction_run),
        )
        .route("/api/config-apis/runs/:id/analyze", post(handlers::config_apis::submit_analysis))
        .route("/api/config-apis/analysis/:id", get(handlers::config_apis::get_analysis_run))
        .route(
            "/api/config-apis/analysis/:id/docs",
            post(handlers::config_apis::submit_doc_generation),
        )
        .route("/api/confluence/runs", post(handlers::confluence::submit_extraction))
        .route("/api/context-tree/runs", post(handlers::context_engine::submit_tree_run))
        .route("/api/context-tree/runs/:id", get(handlers::context_engine::get_tree_run))
        .route("/api/context-tree/runs/:id/cancel", post(handlers::context_engine::cancel_tree_run))
        .route(
            "/api/context-tree/runs/:id/restructure",
            post(handlers::context_engine::propose_restructure),
        )
        .route(
            "/api/context-tree/runs/:id/restructure/apply",
            post(handlers::context_engine::apply_restructure),
        )
        .route("/api/contexts", get(handlers::contexts::list_contexts))
        .route("/api/contexts/:id", get(handlers::contexts::get_context))
        .route("/api/llm/status", get(handlers::system::llm_status))
        .route("/api/tasks", get(handlers::system::list_tasks))
        .route("/api/ws", get(handlers::ws::ws_endpoint))
        .with_state(Arc::clone(&app_state));

    let health_routes = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check));

    let app = Router::new()
        .merge(api_routes)
        .merge(health_routes)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("Prism is ready to serve requests");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&task_registry)))
        .await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn ready_check() -> &'static str {
    "READY"
}

/// Wait for ctrl-c, then drain background tasks before the server stops.
async fn shutdown_signal(task_registry: Arc<TaskRegistry>) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received, cancelling background tasks");
    task_registry.cancel_all(Duration::from_secs(10)).await;
}
