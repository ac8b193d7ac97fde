//! Job association and run history enrichment.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;

use super::client::WorkspaceClient;
use super::sql_extract::epoch_ms_to_str;
use super::ProgressFn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRef {
    pub job_id: i64,
    pub job_name: String,
    pub has_schedule: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRunRecord {
    pub start_time_str: Option<String>,
    pub start_time_ms: Option<i64>,
    pub state: Option<String>,
    pub trigger: Option<String>,
}

/// Aggregated job columns for one notebook.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotebookJobInfo {
    pub attached: bool,
    pub job_ids: Option<String>,
    pub job_names: Option<String>,
    pub cont_success_run_count: Option<i64>,
    pub earliest_run_date: Option<String>,
    pub trigger_type: Option<String>,
}

/// Build notebook_path -> job refs from both single-notebook-task and
/// multi-task job shapes.
pub fn build_job_notebook_map(jobs: &[Value]) -> HashMap<String, Vec<JobRef>> {
    let mut map: HashMap<String, Vec<JobRef>> = HashMap::new();

    for job in jobs {
        let Some(job_id) = job["job_id"].as_i64() else { continue };
        let settings = &job["settings"];
        let job_name = settings["name"].as_str().unwrap_or("unnamed").to_string();
        let has_schedule = settings.get("schedule").is_some_and(|s| !s.is_null());

        let mut push = |path: Option<&str>| {
            if let Some(path) = path {
                map.entry(path.to_string()).or_default().push(JobRef {
                    job_id,
                    job_name: job_name.clone(),
                    has_schedule,
                });
            }
        };

        push(settings["notebook_task"]["notebook_path"].as_str());
        for task in settings["tasks"].as_array().into_iter().flatten() {
            push(task["notebook_task"]["notebook_path"].as_str());
        }
    }

    map
}

/// Fetch run history for every unique job id backing a discovered notebook,
/// in parallel behind the shared semaphore discipline.
pub async fn fetch_run_history_for_notebooks(
    client: &Arc<WorkspaceClient>,
    nb_to_jobs: &HashMap<String, Vec<JobRef>>,
    max_workers: usize,
    max_runs: usize,
    on_progress: Option<ProgressFn<'_>>,
) -> HashMap<String, Vec<JobRunRecord>> {
    let mut job_to_notebooks: HashMap<i64, HashSet<String>> = HashMap::new();
    for (path, refs) in nb_to_jobs {
        for job_ref in refs {
            job_to_notebooks
                .entry(job_ref.job_id)
                .or_default()
                .insert(path.clone());
        }
    }

    let unique_job_ids: Vec<i64> = job_to_notebooks.keys().copied().collect();
    let total = unique_job_ids.len();
    if total == 0 {
        return HashMap::new();
    }

    let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));
    let mut handles = Vec::with_capacity(total);
    for job_id in unique_job_ids {
        let semaphore = Arc::clone(&semaphore);
        let client = Arc::clone(client);
        handles.push(tokio::spawn(async move {
            let permit = match semaphore.acquire_owned().await {
                Ok(p) => p,
                Err(_) => return (job_id, Vec::new()),
            };
            let runs = client.get_job_runs(job_id, max_runs).await;
            drop(permit);
            (job_id, runs)
        }));
    }

    let mut job_runs: HashMap<i64, Vec<Value>> = HashMap::new();
    let log_interval = (total / 20).max(1);
    for (done, handle) in handles.into_iter().enumerate() {
        if let Ok((job_id, runs)) = handle.await {
            job_runs.insert(job_id, runs);
        }
        let completed = done + 1;
        if completed % log_interval == 0 || completed == total {
            if let Some(progress) = on_progress {
                let pct = completed as f64 / total as f64 * 100.0;
                progress("jobs", completed, total, &format!("{:.0}%", pct));
            }
        }
    }

    // Map runs back to notebook paths.
    let mut nb_runs: HashMap<String, Vec<JobRunRecord>> = HashMap::new();
    for (job_id, runs) in &job_runs {
        let Some(paths) = job_to_notebooks.get(job_id) else { continue };
        for path in paths {
            for run in runs {
                let start_ms = run["start_time"].as_i64();
                nb_runs.entry(path.clone()).or_default().push(JobRunRecord {
                    start_time_str: epoch_ms_to_str(start_ms),
                    start_time_ms: start_ms,
                    state: run["state"]["result_state"].as_str().map(String::from),
                    trigger: run["trigger"].as_str().map(String::from),
                });
            }
        }
    }

    nb_runs
}

/// Aggregate job columns for one notebook.
///
/// `cont_success_run_count` counts newest-first runs with state SUCCESS
/// before the first non-SUCCESS.
pub fn compute_notebook_job_info(
    notebook_path: &str,
    nb_to_jobs: &HashMap<String, Vec<JobRef>>,
    nb_runs: &HashMap<String, Vec<JobRunRecord>>,
) -> NotebookJobInfo {
    let Some(job_entries) = nb_to_jobs.get(notebook_path) else {
        return NotebookJobInfo::default();
    };

    let mut seen_ids = HashSet::new();
    let mut unique_ids = Vec::new();
    let mut unique_names = Vec::new();
    let mut any_periodic = false;
    for entry in job_entries {
        if seen_ids.insert(entry.job_id) {
            unique_ids.push(entry.job_id.to_string());
            unique_names.push(entry.job_name.clone());
        }
        if entry.has_schedule {
            any_periodic = true;
        }
    }

    let runs = nb_runs.get(notebook_path).cloned().unwrap_or_default();

    let earliest = runs
        .iter()
        .filter_map(|r| r.start_time_str.clone())
        .min();

    let mut sorted_runs = runs.clone();
    sorted_runs.sort_by_key(|r| std::cmp::Reverse(r.start_time_ms.unwrap_or(0)));
    let mut streak = 0i64;
    for run in &sorted_runs {
        if run.state.as_deref() == Some("SUCCESS") {
            streak += 1;
        } else {
            break;
        }
    }

    let run_triggers: HashSet<&str> =
        runs.iter().filter_map(|r| r.trigger.as_deref()).collect();
    let trigger_type = if any_periodic || run_triggers.contains("PERIODIC") {
        Some("PERIODIC".to_string())
    } else if !run_triggers.is_empty() {
        Some("ONE_TIME".to_string())
    } else {
        None
    };

    NotebookJobInfo {
        attached: true,
        job_ids: Some(unique_ids.join(", ")),
        job_names: Some(unique_names.join(", ")),
        cont_success_run_count: Some(streak),
        earliest_run_date: earliest,
        trigger_type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(ms: i64, state: &str, trigger: Option<&str>) -> JobRunRecord {
        JobRunRecord {
            start_time_str: epoch_ms_to_str(Some(ms)),
            start_time_ms: Some(ms),
            state: Some(state.to_string()),
            trigger: trigger.map(String::from),
        }
    }

    #[test]
    fn map_handles_single_and_multi_task_jobs() {
        let jobs = vec![
            json!({"job_id": 1, "settings": {"name": "nightly", "schedule": {"cron": "0 0 * * *"},
                    "notebook_task": {"notebook_path": "/a"}}}),
            json!({"job_id": 2, "settings": {"name": "multi", "tasks": [
                {"notebook_task": {"notebook_path": "/a"}},
                {"notebook_task": {"notebook_path": "/b"}},
            ]}}),
        ];
        let map = build_job_notebook_map(&jobs);
        assert_eq!(map.get("/a").unwrap().len(), 2);
        assert_eq!(map.get("/b").unwrap().len(), 1);
        assert!(map.get("/a").unwrap()[0].has_schedule);
        assert!(!map.get("/b").unwrap()[0].has_schedule);
    }

    #[test]
    fn success_streak_counts_newest_first() {
        let mut nb_to_jobs = HashMap::new();
        nb_to_jobs.insert(
            "/a".to_string(),
            vec![JobRef { job_id: 1, job_name: "j".into(), has_schedule: false }],
        );
        let mut nb_runs = HashMap::new();
        nb_runs.insert(
            "/a".to_string(),
            vec![
                run(1_000, "SUCCESS", Some("ONE_TIME")),
                run(4_000, "SUCCESS", Some("ONE_TIME")),
                run(3_000, "SUCCESS", Some("ONE_TIME")),
                run(2_000, "FAILED", Some("ONE_TIME")),
            ],
        );
        let info = compute_notebook_job_info("/a", &nb_to_jobs, &nb_runs);
        // Newest-first: 4000 ok, 3000 ok, 2000 failed -> streak 2.
        assert_eq!(info.cont_success_run_count, Some(2));
        assert_eq!(info.trigger_type.as_deref(), Some("ONE_TIME"));
        assert!(info.attached);
    }

    #[test]
    fn schedule_forces_periodic_trigger() {
        let mut nb_to_jobs = HashMap::new();
        nb_to_jobs.insert(
            "/a".to_string(),
            vec![JobRef { job_id: 1, job_name: "j".into(), has_schedule: true }],
        );
        let info = compute_notebook_job_info("/a", &nb_to_jobs, &HashMap::new());
        assert_eq!(info.trigger_type.as_deref(), Some("PERIODIC"));
        assert_eq!(info.cont_success_run_count, Some(0));
        assert!(info.earliest_run_date.is_none());
    }

    #[test]
    fn unattached_notebook_gets_default_info() {
        let info = compute_notebook_job_info("/zzz", &HashMap::new(), &HashMap::new());
        assert!(!info.attached);
        assert!(info.job_ids.is_none());
        assert!(info.trigger_type.is_none());
    }
}
