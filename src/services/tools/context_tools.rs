//! Built-in tools over the context library: list and fetch generated docs
//! and tree runs for the caller's organization.

use serde_json::json;
use std::sync::Arc;

use crate::models::ContextDocSummary;
use crate::services::context_docs::ContextDocStore;
use crate::services::context_engine::storage::TreeRunStore;

use super::{ToolDefinition, ToolRegistry};

pub fn register_context_tools(registry: &ToolRegistry) {
    registry.register(ToolDefinition {
        name: "list_context_docs".to_string(),
        description: "List all generated context documents for the current organization, \
                      with their source pipeline, doc key, and status."
            .to_string(),
        module: "context_management".to_string(),
        requires_permission: Some(("context_management".to_string(), "view".to_string())),
        annotations: json!({"display": "Fetching context documents..."}),
        input_schema: json!({"type": "object", "properties": {}}),
        handler: Arc::new(|ctx, _args| {
            Box::pin(async move {
                let store = ContextDocStore::new(ctx.pool.clone());
                let docs = store.list_for_org(&ctx.org_id).await?;
                let summaries: Vec<ContextDocSummary> =
                    docs.iter().map(ContextDocSummary::from).collect();
                Ok(serde_json::to_string_pretty(&summaries)?)
            })
        }),
    });

    registry.register(ToolDefinition {
        name: "get_context_doc".to_string(),
        description: "Fetch the full markdown content of one context document by its id."
            .to_string(),
        module: "context_management".to_string(),
        requires_permission: Some(("context_management".to_string(), "view".to_string())),
        annotations: json!({"display": "Reading context document..."}),
        input_schema: json!({
            "type": "object",
            "properties": {
                "doc_id": {"type": "integer", "description": "Context document id"},
            },
            "required": ["doc_id"],
        }),
        handler: Arc::new(|ctx, args| {
            Box::pin(async move {
                let doc_id = args["doc_id"]
                    .as_i64()
                    .ok_or_else(|| anyhow::anyhow!("doc_id is required"))?;
                let store = ContextDocStore::new(ctx.pool.clone());
                let doc = store.get(doc_id).await?;
                if doc.org_id != ctx.org_id {
                    anyhow::bail!("Context doc {} belongs to another organization", doc_id);
                }
                Ok(format!("# {} ({})\n\n{}", doc.doc_name, doc.doc_key, doc.doc_content))
            })
        }),
    });

    registry.register(ToolDefinition {
        name: "list_context_tree_runs".to_string(),
        description: "List context tree runs for the current organization with their status \
                      and node counts."
            .to_string(),
        module: "context_engine".to_string(),
        requires_permission: Some(("context_engine".to_string(), "view".to_string())),
        annotations: json!({"display": "Listing context tree runs..."}),
        input_schema: json!({"type": "object", "properties": {}}),
        handler: Arc::new(|ctx, _args| {
            Box::pin(async move {
                let store = TreeRunStore::new(ctx.pool.clone());
                let runs = store.list_runs(&ctx.org_id).await?;
                let rows: Vec<serde_json::Value> = runs
                    .iter()
                    .map(|run| {
                        json!({
                            "id": run.id,
                            "status": run.status,
                            "input_context_count": run.input_context_count,
                            "started_at": run.started_at.to_rfc3339(),
                        })
                    })
                    .collect();
                Ok(serde_json::to_string_pretty(&rows)?)
            })
        }),
    });

    registry.register(ToolDefinition {
        name: "get_context_tree".to_string(),
        description: "Fetch the context tree JSON of one tree run by id, including health \
                      scores and analysis annotations."
            .to_string(),
        module: "context_engine".to_string(),
        requires_permission: Some(("context_engine".to_string(), "view".to_string())),
        annotations: json!({"display": "Loading context tree..."}),
        input_schema: json!({
            "type": "object",
            "properties": {
                "run_id": {"type": "string", "description": "Tree run id"},
            },
            "required": ["run_id"],
        }),
        handler: Arc::new(|ctx, args| {
            Box::pin(async move {
                let run_id = args["run_id"]
                    .as_str()
                    .ok_or_else(|| anyhow::anyhow!("run_id is required"))?;
                let store = TreeRunStore::new(ctx.pool.clone());
                let run = store.get_run(run_id).await?;
                if run.org_id != ctx.org_id {
                    anyhow::bail!("Tree run {} belongs to another organization", run_id);
                }
                Ok(run
                    .tree_data_json
                    .unwrap_or_else(|| "Tree is not built yet for this run".to_string()))
            })
        }),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::tools::{AllowAll, ToolRegistry};

    #[test]
    fn all_context_tools_register() {
        let registry = ToolRegistry::new(Arc::new(AllowAll));
        register_context_tools(&registry);
        assert_eq!(registry.len(), 4);
        let tool = registry.get("get_context_doc").unwrap();
        assert_eq!(tool.input_schema["required"][0], "doc_id");
        assert_eq!(tool.display(), "Reading context document...");
    }
}
