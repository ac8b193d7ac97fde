//! Config pipeline store tests.

use crate::models::RunStatus;
use crate::services::config_apis::storage::{ConfigExtractionCounters, ConfigStore};
use crate::tests::common::setup_test_db;

#[tokio::test]
async fn config_extraction_run_lifecycle() {
    let pool = setup_test_db().await;
    let store = ConfigStore::new(pool);

    store
        .create_extraction_run(
            "cfg-1",
            1,
            "api.example.com",
            "42",
            "[\"loyalty\"]",
            "{}",
        )
        .await
        .unwrap();
    let run = store.get_extraction_run("cfg-1").await.unwrap();
    assert_eq!(run.status_enum(), RunStatus::Running);
    assert!(run.completed_at.is_none());

    let counters = ConfigExtractionCounters {
        categories_requested: 1,
        categories_completed: 1,
        api_calls: 8,
        api_failures: 1,
        items_extracted: 37,
    };
    store
        .complete_extraction_run("cfg-1", "{\"loyalty\": {}}", "[]", &counters)
        .await
        .unwrap();

    let run = store.get_extraction_run("cfg-1").await.unwrap();
    assert_eq!(run.status_enum(), RunStatus::Completed);
    assert!(run.completed_at.is_some());
    assert_eq!(run.api_calls, 8);
    assert_eq!(run.api_failures, 1);
    assert_eq!(run.items_extracted, 37);
}

#[tokio::test]
async fn config_analysis_versions_are_monotone() {
    let pool = setup_test_db().await;
    let store = ConfigStore::new(pool);
    store
        .create_extraction_run("cfg-2", 1, "api.example.com", "42", "[]", "{}")
        .await
        .unwrap();

    let first = store.create_analysis_run("cfg-2", "42").await.unwrap();
    let second = store.create_analysis_run("cfg-2", "42").await.unwrap();
    assert_eq!(first.version, 1);
    assert_eq!(second.version, 2);

    store
        .complete_analysis_run(&second.id, "{\"inventory\": {}}")
        .await
        .unwrap();
    let second = store.get_analysis_run(&second.id).await.unwrap();
    assert_eq!(second.status_enum(), RunStatus::Completed);
    assert!(second.analysis_data_json.unwrap().contains("inventory"));
}

#[tokio::test]
async fn cancelled_config_run_is_terminal() {
    let pool = setup_test_db().await;
    let store = ConfigStore::new(pool);
    store
        .create_extraction_run("cfg-3", 1, "api.example.com", "42", "[]", "{}")
        .await
        .unwrap();
    store
        .mark_extraction_terminal("cfg-3", "cancelled", Some("Cancelled by user"))
        .await
        .unwrap();
    let run = store.get_extraction_run("cfg-3").await.unwrap();
    assert_eq!(run.status_enum(), RunStatus::Cancelled);
    assert!(run.completed_at.is_some());
}
