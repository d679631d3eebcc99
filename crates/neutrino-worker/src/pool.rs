//! The worker pool loop: repeatedly claim the oldest Added task for a
//! rotating replica-set tag, copy its range, and report the result.
//!
//! Grounded on `original_source/worker.go` (§4.3).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mongodb::{Client, Collection};
use neutrino_types::{split_namespace, TaskStatus};
use neutrino_workspace::{SortRev, Workspace};

use crate::copy::copy_data;

const CLAIM_BACKOFF: Duration = Duration::from_secs(1);
const TASK_PAUSE: Duration = Duration::from_millis(100);
const PROGRESS_EVERY: u64 = 100;
const PROGRESS_INTERVAL: Duration = Duration::from_secs(600);

/// Runs one worker's claim/copy loop until `exit` is set. `replicas` maps a
/// replica-set tag to its source client handle; `target` is the single
/// target cluster client shared by all workers.
pub async fn run_worker(
    worker_id: String,
    workspace: Workspace,
    replicas: HashMap<String, Client>,
    target: Client,
    set_names: Vec<String>,
    exit: Arc<AtomicBool>,
) {
    tracing::info!(%worker_id, "joined");
    let mut index: usize = 0;
    let mut rev = SortRev::Descending;
    let mut processed: u64 = 0;
    let mut last_progress = Instant::now();

    while !exit.load(Ordering::Relaxed) {
        rev = rev.flip();
        if !set_names.is_empty() {
            index = (index + 1) % set_names.len();
        }
        let tag = set_names.get(index).cloned().unwrap_or_default();

        let claimed = match workspace.find_next_task_and_update(&tag, &worker_id, rev).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                tokio::time::sleep(CLAIM_BACKOFF).await;
                continue;
            }
            Err(err) => {
                tracing::warn!(%worker_id, error = %err, "claim failed");
                tokio::time::sleep(CLAIM_BACKOFF).await;
                continue;
            }
        };

        let mut task = claimed;
        let result = copy_claimed_task(&replicas, &target, &task).await;
        match result {
            Ok(inserted) => {
                task.status = TaskStatus::Completed;
                task.end_time = Some(chrono::Utc::now());
                task.inserted = inserted;
            }
            Err(err) => {
                tracing::warn!(%worker_id, task_id = %task.id, error = %err, "copy failed, requeueing");
                task.status = TaskStatus::Added;
            }
        }
        task.updated_by = worker_id.clone();
        if let Err(err) = workspace.update_task(&task).await {
            tracing::error!(%worker_id, task_id = %task.id, error = %err, "failed to record task outcome");
        }

        processed += 1;
        if processed % PROGRESS_EVERY == 0 || last_progress.elapsed() >= PROGRESS_INTERVAL {
            tracing::info!(%worker_id, processed, "worker progress");
            last_progress = Instant::now();
        }
        tokio::time::sleep(TASK_PAUSE).await;
    }
}

async fn copy_claimed_task(
    replicas: &HashMap<String, Client>,
    target: &Client,
    task: &neutrino_types::Task,
) -> Result<i64, crate::error::CopyError> {
    let Some(source_client) = replicas.get(&task.replica_set) else {
        return Err(crate::error::CopyError::Workspace(
            neutrino_workspace::WorkspaceError::NotConfigured("no source client for replica set"),
        ));
    };
    let (db_name, coll_name) = split_namespace(&task.namespace);
    let (db_to, coll_to) = match task.include.to.as_deref() {
        Some(to) => split_namespace(to),
        None => (db_name.clone(), coll_name.clone()),
    };
    let source: Collection<bson::Document> = source_client.database(&db_name).collection(&coll_name);
    let target: Collection<bson::Document> = target.database(&db_to).collection(&coll_to);
    copy_data(task, &source, &target).await
}
