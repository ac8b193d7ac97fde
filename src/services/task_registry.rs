//! Background task registry — named in-flight tasks with cooperative
//! cancellation and shutdown draining.
//!
//! Every pipeline run is registered as `<pipeline>-<run-id>`. Names are
//! unique; re-submitting a live name is an error unless the caller cancels
//! first. The registry itself never panics: task outcomes are logged by the
//! completion wrapper and the entry is removed.

use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::utils::{ApiError, ApiResult, CancelToken};

struct TaskEntry {
    cancel: Arc<CancelToken>,
    handle: JoinHandle<()>,
    user_id: i64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TaskInfo {
    pub name: String,
    pub user_id: i64,
    pub finished: bool,
}

#[derive(Default)]
pub struct TaskRegistry {
    tasks: Arc<DashMap<String, TaskEntry>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register and spawn a background task.
    ///
    /// The future receives the task's cancel token and is expected to honor
    /// it at suspension points, persisting `status=cancelled` itself. Any
    /// error it returns is logged here; nothing propagates out of the
    /// registry.
    pub fn submit<F, Fut>(&self, name: &str, user_id: i64, f: F) -> ApiResult<Arc<CancelToken>>
    where
        F: FnOnce(Arc<CancelToken>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        if let Some(existing) = self.tasks.get(name) {
            if !existing.handle.is_finished() {
                return Err(ApiError::conflict(format!(
                    "Task '{}' is already running; cancel it first",
                    name
                )));
            }
        }

        let cancel = CancelToken::new();
        let task_cancel = Arc::clone(&cancel);
        let task_name = name.to_string();
        let tasks = Arc::clone(&self.tasks);

        let handle = tokio::spawn(async move {
            let result = f(task_cancel).await;
            match &result {
                Ok(()) => tracing::info!("Background task '{}' completed", task_name),
                Err(e) => {
                    tracing::error!("Background task '{}' failed: {:#}", task_name, e)
                }
            }
            tasks.remove(&task_name);
        });

        self.tasks.insert(
            name.to_string(),
            TaskEntry { cancel: Arc::clone(&cancel), handle, user_id },
        );
        tracing::info!("Background task created: '{}' (user={})", name, user_id);
        Ok(cancel)
    }

    /// Request cooperative cancellation by name.
    /// Returns true if the task was found and still running.
    pub fn cancel(&self, name: &str) -> bool {
        match self.tasks.get(name) {
            Some(entry) if !entry.handle.is_finished() => {
                entry.cancel.cancel();
                tracing::info!("Cancellation requested for task '{}'", name);
                true
            }
            _ => false,
        }
    }

    /// List active tasks for one user.
    pub fn list_by_user(&self, user_id: i64) -> Vec<TaskInfo> {
        self.tasks
            .iter()
            .filter(|e| e.value().user_id == user_id)
            .map(|e| TaskInfo {
                name: e.key().clone(),
                user_id: e.value().user_id,
                finished: e.value().handle.is_finished(),
            })
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.tasks.iter().filter(|e| !e.value().handle.is_finished()).count()
    }

    /// Cancel every task and wait up to `timeout` for them to drain.
    /// Called at shutdown.
    pub async fn cancel_all(&self, timeout: Duration) {
        let names: Vec<String> = self.tasks.iter().map(|e| e.key().clone()).collect();
        if names.is_empty() {
            return;
        }
        tracing::info!("Cancelling {} background tasks...", names.len());
        for name in &names {
            if let Some(entry) = self.tasks.get(name) {
                entry.cancel.cancel();
            }
        }

        let deadline = tokio::time::Instant::now() + timeout;
        for name in &names {
            let finished = loop {
                match self.tasks.get(name) {
                    None => break true,
                    Some(entry) if entry.handle.is_finished() => break true,
                    Some(_) => {}
                }
                if tokio::time::Instant::now() >= deadline {
                    break false;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            };
            if !finished {
                tracing::warn!("Task '{}' did not stop within shutdown timeout", name);
            }
        }
        tracing::info!("Background task cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn submit_runs_and_removes_entry() {
        let registry = TaskRegistry::new();
        registry
            .submit("t-1", 1, |_cancel| async { Ok(()) })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(registry.active_count(), 0);
        assert!(registry.list_by_user(1).is_empty());
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected_while_running() {
        let registry = TaskRegistry::new();
        registry
            .submit("dup", 1, |cancel| async move {
                cancel.cancelled().await;
                Ok(())
            })
            .unwrap();

        let second = registry.submit("dup", 1, |_c| async { Ok(()) });
        assert!(second.is_err());

        assert!(registry.cancel("dup"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(registry.submit("dup", 1, |_c| async { Ok(()) }).is_ok());
    }

    #[tokio::test]
    async fn cancel_all_drains_within_timeout() {
        let registry = TaskRegistry::new();
        for i in 0..3 {
            registry
                .submit(&format!("drain-{}", i), 2, |cancel| async move {
                    cancel.cancelled().await;
                    Ok(())
                })
                .unwrap();
        }
        assert_eq!(registry.active_count(), 3);
        registry.cancel_all(Duration::from_secs(2)).await;
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn failing_task_does_not_poison_registry() {
        let registry = TaskRegistry::new();
        registry
            .submit("boom", 3, |_c| async { Err(anyhow::anyhow!("kaput")) })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(registry.active_count(), 0);
        // Name is reusable after failure.
        assert!(registry.submit("boom", 3, |_c| async { Ok(()) }).is_ok());
    }
}
