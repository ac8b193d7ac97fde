//! SQL corpus store tests: run lifecycle invariants, bulk inserts, hash
//! rule, version assignment, and the context-doc supersede behavior.

use crate::models::RunStatus;
use crate::services::context_docs::{ContextDocStore, NewContextDoc};
use crate::services::databricks::sql_extract::sha256_hash;
use crate::services::databricks::storage::{
    ExtractionSummary, NewExtractedSql, NewNotebookMetadata, SqlCorpusStore,
};
use crate::tests::common::setup_test_db;

async fn create_run(store: &SqlCorpusStore, run_id: &str) {
    store
        .create_extraction_run(run_id, 1, "https://ws.example.com", "/Workspace/Users", None)
        .await
        .unwrap();
}

#[tokio::test]
async fn completed_at_is_set_iff_status_terminal() {
    let pool = setup_test_db().await;
    let store = SqlCorpusStore::new(pool);

    create_run(&store, "run-1").await;
    let run = store.get_extraction_run("run-1").await.unwrap();
    assert_eq!(run.status_enum(), RunStatus::Running);
    assert!(run.completed_at.is_none());

    store
        .complete_extraction_run("run-1", &ExtractionSummary::default())
        .await
        .unwrap();
    let run = store.get_extraction_run("run-1").await.unwrap();
    assert!(run.status_enum().is_terminal());
    assert!(run.completed_at.is_some());

    create_run(&store, "run-2").await;
    store
        .mark_extraction_terminal("run-2", "cancelled", Some("Cancelled by user"))
        .await
        .unwrap();
    let run = store.get_extraction_run("run-2").await.unwrap();
    assert_eq!(run.status_enum(), RunStatus::Cancelled);
    assert!(run.completed_at.is_some());

    create_run(&store, "run-3").await;
    store
        .mark_extraction_terminal("run-3", "failed", Some("boom"))
        .await
        .unwrap();
    let run = store.get_extraction_run("run-3").await.unwrap();
    assert_eq!(run.status_enum(), RunStatus::Failed);
    assert!(run.completed_at.is_some());
    assert_eq!(run.error_message.as_deref(), Some("boom"));
}

#[tokio::test]
async fn stored_hash_matches_sha256_of_trimmed_sql() {
    let pool = setup_test_db().await;
    let store = SqlCorpusStore::new(pool.clone());
    create_run(&store, "run-h").await;

    let cleaned = "SELECT a FROM t WHERE o = 123";
    store
        .save_extracted_sqls(
            "run-h",
            &[NewExtractedSql {
                org_id: Some("42".to_string()),
                notebook_path: "/Workspace/Users/a/nb".to_string(),
                notebook_name: "nb".to_string(),
                cell_number: 1,
                cleaned_sql: Some(cleaned.to_string()),
                sql_hash: sha256_hash(cleaned),
                is_valid: true,
                ..Default::default()
            }],
        )
        .await
        .unwrap();

    let (stored_sql, stored_hash): (String, String) = sqlx::query_as(
        "SELECT cleaned_sql, sql_hash FROM extracted_sqls WHERE run_id = 'run-h'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(stored_hash, sha256_hash(stored_sql.trim()).unwrap());
    assert_eq!(stored_hash.len(), 64);
}

#[tokio::test]
async fn analysis_versions_increment_per_run_and_org() {
    let pool = setup_test_db().await;
    let store = SqlCorpusStore::new(pool);
    create_run(&store, "run-v").await;

    let first = store.create_analysis_run("run-v", "42").await.unwrap();
    let second = store.create_analysis_run("run-v", "42").await.unwrap();
    let other_org = store.create_analysis_run("run-v", "7").await.unwrap();

    assert_eq!(first.version, 1);
    assert_eq!(second.version, 2);
    assert_eq!(other_org.version, 1);
}

#[tokio::test]
async fn deleting_a_run_cascades_to_children() {
    let pool = setup_test_db().await;
    let store = SqlCorpusStore::new(pool.clone());
    create_run(&store, "run-d").await;

    store
        .save_notebook_metadata(
            "run-d",
            &[NewNotebookMetadata {
                notebook_path: "/a".to_string(),
                notebook_name: "a".to_string(),
                status: "Processed".to_string(),
                ..Default::default()
            }],
        )
        .await
        .unwrap();
    let analysis = store.create_analysis_run("run-d", "42").await.unwrap();

    store.delete_extraction_run("run-d").await.unwrap();
    assert!(store.get_extraction_run("run-d").await.is_err());
    assert!(store.get_analysis_run(&analysis.id).await.is_err());
    let metadata_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM notebook_metadata WHERE run_id = 'run-d'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(metadata_count, 0);
}

#[tokio::test]
async fn saving_a_doc_supersedes_the_previous_active_slot() {
    let pool = setup_test_db().await;
    let doc_store = ContextDocStore::new(pool);

    let doc = |content: &str| NewContextDoc {
        source_type: "databricks".to_string(),
        source_run_id: "a-1".to_string(),
        org_id: "42".to_string(),
        doc_key: "01_MASTER".to_string(),
        doc_name: "01_MASTER_RULES".to_string(),
        doc_content: content.to_string(),
        provider_used: "anthropic".to_string(),
        model_used: "m".to_string(),
        system_prompt_used: "sp".to_string(),
        payload_sent: "{}".to_string(),
        warnings_json: None,
    };

    doc_store.save(&doc("first version")).await.unwrap();
    doc_store.save(&doc("second version")).await.unwrap();

    let active = doc_store.list_active("42", "databricks").await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].doc_content, "second version");

    let all = doc_store.list_for_org("42").await.unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.iter().any(|d| d.status == "superseded"));
}
