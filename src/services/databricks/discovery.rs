//! Notebook discovery: serialized BFS over directory listings, then
//! bounded-concurrency metadata fetches.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};

use crate::utils::cancel::Cancelled;
use crate::utils::CancelToken;

use super::client::{WorkspaceClient, WorkspaceError};
use super::sql_extract::epoch_ms_to_str;
use super::ProgressFn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotebookInfo {
    pub path: String,
    pub object_id: Option<String>,
    pub language: Option<String>,
    pub created_at: Option<i64>,
    pub modified_at: Option<i64>,
    pub created_at_str: Option<String>,
    pub modified_at_str: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// BFS the workspace from `root_path`, then fetch metadata for every
/// discovered notebook with at most `max_workers` requests in flight.
pub async fn find_all_notebooks(
    client: &Arc<WorkspaceClient>,
    root_path: &str,
    limit: Option<usize>,
    max_workers: usize,
    cancel: &CancelToken,
    on_progress: Option<ProgressFn<'_>>,
) -> Result<Vec<NotebookInfo>, DiscoveryError> {
    let mut notebook_paths: Vec<String> = Vec::new();
    let mut queue: VecDeque<String> = VecDeque::from([root_path.to_string()]);
    let mut dirs_scanned = 0usize;

    tracing::info!("Discovering notebooks under: {}", root_path);

    // Phase 1: BFS discovery. Listing calls are serialized because the
    // queue evolves as results arrive.
    while let Some(current_path) = queue.pop_front() {
        cancel.check()?;
        let items = client.list_workspace_path(&current_path).await?;
        dirs_scanned += 1;

        if dirs_scanned % 5 == 0 {
            if let Some(progress) = on_progress {
                let mut detail = format!(
                    "{} dirs scanned, {} notebooks, {} queued",
                    dirs_scanned,
                    notebook_paths.len(),
                    queue.len()
                );
                let failures = client.failure_count();
                if failures > 0 {
                    detail.push_str(&format!(", {} failures", failures));
                }
                progress("discovery", notebook_paths.len(), 0, &detail);
            }
        }

        for item in &items {
            let item_type = item["object_type"].as_str().unwrap_or_default();
            let Some(item_path) = item["path"].as_str() else { continue };
            match item_type {
                "NOTEBOOK" => {
                    notebook_paths.push(item_path.to_string());
                    if limit.is_some_and(|l| notebook_paths.len() >= l) {
                        break;
                    }
                }
                "DIRECTORY" | "FOLDER" | "REPO" => queue.push_back(item_path.to_string()),
                _ => {}
            }
        }

        if limit.is_some_and(|l| notebook_paths.len() >= l) {
            tracing::info!("Reached notebook limit: {:?}", limit);
            break;
        }
    }

    tracing::info!(
        "Discovery complete: {} notebooks found, {} dirs scanned, {} API failures",
        notebook_paths.len(),
        dirs_scanned,
        client.failure_count()
    );
    if let Some(progress) = on_progress {
        progress(
            "discovery",
            notebook_paths.len(),
            notebook_paths.len(),
            &format!("Discovery complete — {} dirs scanned", dirs_scanned),
        );
    }

    // Phase 2: parallel metadata fetching behind a semaphore.
    let total = notebook_paths.len();
    if total == 0 {
        return Ok(Vec::new());
    }

    let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));
    let results: Arc<Mutex<Vec<Option<NotebookInfo>>>> =
        Arc::new(Mutex::new(vec![None; total]));
    let mut handles = Vec::with_capacity(total);

    for (idx, path) in notebook_paths.iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let results = Arc::clone(&results);
        let client = Arc::clone(client);
        let path = path.clone();
        handles.push(tokio::spawn(async move {
            let permit = match semaphore.acquire_owned().await {
                Ok(p) => p,
                Err(_) => return,
            };
            let meta = client.get_notebook_metadata(&path).await.unwrap_or_default();
            drop(permit);

            let created_at = meta["created_at"].as_i64();
            let modified_at = meta["modified_at"].as_i64();
            let info = NotebookInfo {
                path: path.clone(),
                object_id: meta["object_id"].as_i64().map(|v| v.to_string()),
                language: meta["language"].as_str().map(String::from),
                created_at,
                modified_at,
                created_at_str: epoch_ms_to_str(created_at),
                modified_at_str: epoch_ms_to_str(modified_at),
            };
            results.lock().await[idx] = Some(info);
        }));
    }

    let log_interval = (total / 20).max(1);
    for (done, handle) in handles.into_iter().enumerate() {
        let _ = handle.await;
        let completed = done + 1;
        if completed % log_interval == 0 || completed == total {
            if let Some(progress) = on_progress {
                let pct = completed as f64 / total as f64 * 100.0;
                progress("metadata", completed, total, &format!("{:.0}%", pct));
            }
        }
    }

    cancel.check()?;
    let collected = Arc::try_unwrap(results)
        .map(|m| m.into_inner())
        .unwrap_or_default();
    Ok(collected
        .into_iter()
        .enumerate()
        .map(|(idx, info)| {
            info.unwrap_or(NotebookInfo {
                path: notebook_paths[idx].clone(),
                ..Default::default()
            })
        })
        .collect())
}

/// Freshness filter: keep notebooks whose modified timestamp is unknown or
/// at/after the cutoff. Returns (kept, skipped).
pub fn filter_notebooks_by_modified_date(
    notebooks: Vec<NotebookInfo>,
    since_epoch_ms: i64,
) -> (Vec<NotebookInfo>, Vec<NotebookInfo>) {
    let mut kept = Vec::new();
    let mut skipped = Vec::new();
    for nb in notebooks {
        match nb.modified_at {
            None => kept.push(nb),
            Some(ts) if ts >= since_epoch_ms => kept.push(nb),
            Some(_) => skipped.push(nb),
        }
    }
    (kept, skipped)
}

/// Export notebooks in parallel behind the shared semaphore discipline.
/// Returns path -> (content, file_type) for the exports that succeeded.
pub async fn export_notebooks_parallel(
    client: &Arc<WorkspaceClient>,
    notebooks: &[NotebookInfo],
    max_workers: usize,
    cancel: &CancelToken,
    on_progress: Option<ProgressFn<'_>>,
) -> Result<std::collections::HashMap<String, (String, String)>, DiscoveryError> {
    let total = notebooks.len();
    let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));
    let mut handles = Vec::with_capacity(total);

    for nb in notebooks {
        let semaphore = Arc::clone(&semaphore);
        let client = Arc::clone(client);
        let path = nb.path.clone();
        handles.push(tokio::spawn(async move {
            let permit = match semaphore.acquire_owned().await {
                Ok(p) => p,
                Err(_) => return (path, Ok(None)),
            };
            let result = client.export_notebook(&path).await;
            drop(permit);
            (path, result)
        }));
    }

    let mut exports = std::collections::HashMap::new();
    let log_interval = (total / 20).max(1);
    let mut fatal: Option<WorkspaceError> = None;
    for (done, handle) in handles.into_iter().enumerate() {
        if let Ok((path, result)) = handle.await {
            match result {
                Ok(Some((content, file_type))) => {
                    exports.insert(path, (content, file_type));
                }
                Ok(None) => {}
                Err(e) => fatal = Some(e),
            }
        }
        let completed = done + 1;
        if completed % log_interval == 0 || completed == total {
            if let Some(progress) = on_progress {
                progress("export", completed, total, &format!("{} exported", exports.len()));
            }
        }
    }

    if let Some(e) = fatal {
        return Err(e.into());
    }
    cancel.check()?;
    Ok(exports)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nb(path: &str, modified_at: Option<i64>) -> NotebookInfo {
        NotebookInfo { path: path.to_string(), modified_at, ..Default::default() }
    }

    #[test]
    fn freshness_filter_keeps_unknown_and_recent() {
        let notebooks = vec![
            nb("/a", Some(100)),
            nb("/b", Some(500)),
            nb("/c", None),
        ];
        let (kept, skipped) = filter_notebooks_by_modified_date(notebooks, 200);
        let kept_paths: Vec<&str> = kept.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(kept_paths, vec!["/b", "/c"]);
        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].path, "/a");
    }

    #[test]
    fn cutoff_is_inclusive() {
        let (kept, skipped) = filter_notebooks_by_modified_date(vec![nb("/x", Some(200))], 200);
        assert_eq!(kept.len(), 1);
        assert!(skipped.is_empty());
    }
}
