//! Chat persistence tests: conversation bootstrap, history window, and
//! tool-use round-tripping through the content-block JSON.

use crate::services::chat::store::ChatStore;
use crate::services::llm::ContentBlock;
use crate::tests::common::setup_test_db;

#[tokio::test]
async fn conversation_is_created_once_and_reused() {
    let pool = setup_test_db().await;
    let store = ChatStore::new(pool);

    let id = store
        .ensure_conversation(None, 1, "42", "what tables exist?")
        .await
        .unwrap();
    let same = store
        .ensure_conversation(Some(&id), 1, "42", "ignored")
        .await
        .unwrap();
    assert_eq!(id, same);

    // Unknown ids fall back to a fresh conversation.
    let fresh = store
        .ensure_conversation(Some("missing"), 1, "42", "hello")
        .await
        .unwrap();
    assert_ne!(fresh, "missing");
}

#[tokio::test]
async fn history_window_returns_newest_messages_in_order() {
    let pool = setup_test_db().await;
    let store = ChatStore::new(pool);
    let id = store.ensure_conversation(None, 1, "42", "t").await.unwrap();

    for i in 0..6 {
        store
            .append_message(&id, "user", &[ContentBlock::text(format!("m{}", i))], None, None)
            .await
            .unwrap();
    }

    let history = store.load_history(&id, 4).await.unwrap();
    assert_eq!(history.len(), 4);
    assert_eq!(history[0].text(), "m2");
    assert_eq!(history[3].text(), "m5");
}

#[tokio::test]
async fn tool_use_blocks_survive_persistence() {
    let pool = setup_test_db().await;
    let store = ChatStore::new(pool);
    let id = store.ensure_conversation(None, 1, "42", "t").await.unwrap();

    let blocks = vec![
        ContentBlock::text("Let me check."),
        ContentBlock::ToolUse {
            id: "tu_1".to_string(),
            name: "list_context_docs".to_string(),
            input: serde_json::json!({}),
        },
    ];
    store
        .append_message(&id, "assistant", &blocks, Some(10), Some(20))
        .await
        .unwrap();

    let history = store.load_history(&id, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    match &history[0].content[1] {
        ContentBlock::ToolUse { name, .. } => assert_eq!(name, "list_context_docs"),
        other => panic!("expected tool_use, got {:?}", other),
    }
}
