//! Context-tree run store tests, including the durable progress log.

use crate::models::RunStatus;
use crate::services::context_engine::storage::TreeRunStore;
use crate::tests::common::setup_test_db;

#[tokio::test]
async fn tree_run_completion_persists_artifacts() {
    let pool = setup_test_db().await;
    let store = TreeRunStore::new(pool);

    let run_id = store.create_run(1, "42").await.unwrap();
    store
        .save_progress(&run_id, r#"[{"phase":"collecting","detail":"...","status":"running"}]"#)
        .await
        .unwrap();

    store
        .save_completion(
            &run_id,
            r#"{"type":"root","id":"root","name":"Organization Context","children":[]}"#,
            r#"{"databricks":[1]}"#,
            3,
            "model-x",
            "anthropic",
            r#"{"input_tokens":10,"output_tokens":20}"#,
            "system prompt",
            r#"[{"phase":"complete","detail":"done","status":"done"}]"#,
        )
        .await
        .unwrap();

    let run = store.get_run(&run_id).await.unwrap();
    assert_eq!(run.status_enum(), RunStatus::Completed);
    assert!(run.completed_at.is_some());
    assert_eq!(run.input_context_count, 3);
    assert_eq!(run.provider_used.as_deref(), Some("anthropic"));
    assert!(run.tree_data_json.unwrap().contains("Organization Context"));
    assert!(run.progress_data_json.unwrap().contains("complete"));
}

#[tokio::test]
async fn restructure_apply_replaces_tree() {
    let pool = setup_test_db().await;
    let store = TreeRunStore::new(pool);
    let run_id = store.create_run(1, "42").await.unwrap();

    store.update_tree(&run_id, r#"{"type":"root","id":"root","name":"N"}"#).await.unwrap();
    let run = store.get_run(&run_id).await.unwrap();
    assert!(run.tree_data_json.unwrap().contains("\"id\":\"root\""));
}

#[tokio::test]
async fn failed_run_records_message_and_progress() {
    let pool = setup_test_db().await;
    let store = TreeRunStore::new(pool);
    let run_id = store.create_run(1, "42").await.unwrap();

    store
        .mark_terminal(
            &run_id,
            "failed",
            Some("No contexts found for this organization"),
            r#"[{"phase":"collecting","detail":"empty","status":"failed"}]"#,
        )
        .await
        .unwrap();
    let run = store.get_run(&run_id).await.unwrap();
    assert_eq!(run.status_enum(), RunStatus::Failed);
    assert!(run.error_message.unwrap().contains("No contexts"));
}
