//! Tool registry — inventory of LLM-callable tools with JSON-schema
//! parameters, permission filtering through a pluggable checker, and
//! error-absorbing execution: a tool call always yields a string result
//! the LLM can react to, never an exception.

pub mod context_tools;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::services::llm::ToolSpec;

/// Per-request execution context injected into every handler; it is not
/// visible to the LLM as a parameter.
#[derive(Clone)]
pub struct ToolContext {
    pub user_id: i64,
    pub org_id: String,
    pub is_admin: bool,
    /// Tools open their own short-lived sessions from this pool.
    pub pool: SqlitePool,
}

pub type ToolHandler =
    Arc<dyn Fn(ToolContext, Value) -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync>;

#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub module: String,
    pub requires_permission: Option<(String, String)>,
    /// Display annotations, e.g. {"display": "Fetching contexts..."}.
    pub annotations: Value,
    pub input_schema: Value,
    pub handler: ToolHandler,
}

impl ToolDefinition {
    pub fn to_spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }

    pub fn display(&self) -> String {
        self.annotations["display"]
            .as_str()
            .map(String::from)
            .unwrap_or_else(|| format!("Running {}...", self.name))
    }
}

/// The RBAC collaborator seam. The real checker lives with the outer auth
/// layer; the default permits everything.
#[async_trait]
pub trait PermissionChecker: Send + Sync {
    async fn check(&self, ctx: &ToolContext, module: &str, operation: &str) -> bool;
}

pub struct AllowAll;

#[async_trait]
impl PermissionChecker for AllowAll {
    async fn check(&self, _ctx: &ToolContext, _module: &str, _operation: &str) -> bool {
        true
    }
}

pub struct ToolRegistry {
    tools: DashMap<String, ToolDefinition>,
    checker: Arc<dyn PermissionChecker>,
}

impl ToolRegistry {
    pub fn new(checker: Arc<dyn PermissionChecker>) -> Self {
        Self { tools: DashMap::new(), checker }
    }

    pub fn register(&self, definition: ToolDefinition) {
        tracing::info!("Registered tool: {} (module={})", definition.name, definition.module);
        self.tools.insert(definition.name.clone(), definition);
    }

    pub fn get(&self, name: &str) -> Option<ToolDefinition> {
        self.tools.get(name).map(|t| t.clone())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tools the caller may invoke, in neutral spec form for the gateway.
    pub async fn permitted_tools(&self, ctx: &ToolContext) -> Vec<ToolDefinition> {
        let mut permitted = Vec::new();
        for entry in self.tools.iter() {
            let allowed = match &entry.requires_permission {
                None => true,
                Some((module, operation)) => self.checker.check(ctx, module, operation).await,
            };
            if allowed {
                permitted.push(entry.clone());
            }
        }
        permitted.sort_by(|a, b| a.name.cmp(&b.name));
        permitted
    }

    /// Execute a tool. Unknown tools, denied permissions, and handler
    /// errors all come back as plain result strings.
    pub async fn execute(&self, name: &str, ctx: &ToolContext, arguments: Value) -> String {
        let Some(tool) = self.get(name) else {
            return format!("Error: Unknown tool '{}'", name);
        };

        if let Some((module, operation)) = &tool.requires_permission {
            if !self.checker.check(ctx, module, operation).await {
                return format!(
                    "Permission denied: You don't have '{}.{}' permission to use the '{}' tool.",
                    module, operation, name
                );
            }
        }

        match (tool.handler)(ctx.clone(), arguments).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Tool '{}' execution failed: {:#}", name, e);
                format!("Error executing '{}': {}", name, e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct DenyAll;

    #[async_trait]
    impl PermissionChecker for DenyAll {
        async fn check(&self, _ctx: &ToolContext, _m: &str, _o: &str) -> bool {
            false
        }
    }

    fn echo_tool(requires_permission: Option<(String, String)>) -> ToolDefinition {
        ToolDefinition {
            name: "echo".to_string(),
            description: "Echo the input".to_string(),
            module: "test".to_string(),
            requires_permission,
            annotations: json!({"display": "Echoing..."}),
            input_schema: json!({"type": "object", "properties": {"text": {"type": "string"}}}),
            handler: Arc::new(|_ctx, args| {
                Box::pin(async move { Ok(args["text"].as_str().unwrap_or("").to_string()) })
            }),
        }
    }

    async fn ctx() -> ToolContext {
        ToolContext {
            user_id: 1,
            org_id: "42".into(),
            is_admin: false,
            pool: SqlitePool::connect("sqlite::memory:").await.unwrap(),
        }
    }

    #[tokio::test]
    async fn execution_returns_result_string() {
        let registry = ToolRegistry::new(Arc::new(AllowAll));
        registry.register(echo_tool(None));
        let result = registry
            .execute("echo", &ctx().await, json!({"text": "hello"}))
            .await;
        assert_eq!(result, "hello");
    }

    #[tokio::test]
    async fn denied_permission_yields_typed_string_not_error() {
        let registry = ToolRegistry::new(Arc::new(DenyAll));
        registry.register(echo_tool(Some(("contexts".into(), "view".into()))));
        let context = ctx().await;

        let permitted = registry.permitted_tools(&context).await;
        assert!(permitted.is_empty());

        let result = registry.execute("echo", &context, json!({})).await;
        assert!(result.starts_with("Permission denied"));
    }

    #[tokio::test]
    async fn unknown_tool_and_handler_errors_are_strings() {
        let registry = ToolRegistry::new(Arc::new(AllowAll));
        assert!(registry
            .execute("nope", &ctx().await, json!({}))
            .await
            .starts_with("Error: Unknown tool"));

        registry.register(ToolDefinition {
            handler: Arc::new(|_ctx, _args| {
                Box::pin(async move { Err(anyhow::anyhow!("boom")) })
            }),
            ..echo_tool(None)
        });
        let result = registry.execute("echo", &ctx().await, json!({})).await;
        assert!(result.contains("boom"));
    }
}
