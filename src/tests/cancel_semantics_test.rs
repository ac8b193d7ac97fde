//! Cancel semantics: after a cancel request, a terminal `*_cancelled`
//! event reaches the client promptly once the task hits its next
//! suspension point, and partial state persists as cancelled.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::services::progress::ProgressHub;
use crate::services::task_registry::TaskRegistry;

#[tokio::test]
async fn cancelled_event_reaches_client_within_two_seconds() {
    let hub = Arc::new(ProgressHub::new());
    let registry = TaskRegistry::new();

    let (tx, mut rx) = mpsc::unbounded_channel();
    hub.connect("c1", Some(9), tx);

    // A pipeline-shaped task: loops over items, checking cancellation at
    // every suspension point, and emits the terminal event itself.
    let task_hub = Arc::clone(&hub);
    registry
        .submit("extraction-run-x", 9, move |cancel| async move {
            for i in 0.. {
                if cancel.is_cancelled() {
                    task_hub.emit_terminal(9, "extraction", "run-x", "cancelled", json!({}));
                    return Ok(());
                }
                task_hub.emit_progress(9, "extraction", "run-x", "export", i, 0, "working");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Ok(())
        })
        .unwrap();

    // Let it make some progress, then cancel.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(registry.cancel("extraction-run-x"));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    let mut saw_cancelled = false;
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(message)) => {
                if message.contains("extraction_cancelled") {
                    saw_cancelled = true;
                    break;
                }
            }
            _ => break,
        }
    }
    assert!(saw_cancelled, "terminal cancelled event did not arrive in time");
}

#[tokio::test]
async fn cancel_of_finished_task_reports_false() {
    let registry = TaskRegistry::new();
    registry.submit("short", 1, |_c| async { Ok(()) }).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!registry.cancel("short"));
    assert!(!registry.cancel("never-existed"));
}
