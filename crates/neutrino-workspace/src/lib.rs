//! Durable store for tasks, the run log, and per-replica-set checkpoints.
//!
//! Grounded on `original_source/workspace.go`: a dedicated database on the
//! target cluster (`_neutrino` by default) with `tasks`, `oplogs`, and `logs`
//! collections. All mutation goes through atomic find-and-modify style
//! primitives; the workspace itself performs no retries and owns all
//! persisted migration state (§3, "Ownership").

pub mod clients;
pub mod error;

use std::path::{Path, PathBuf};

use bson::{doc, Bson};
use chrono::{DateTime, Utc};
use futures::stream::TryStreamExt;
use mongodb::options::{FindOneAndUpdateOptions, ReturnDocument};
use mongodb::{Client, Collection, IndexModel};
use neutrino_types::{Task, TaskStatus, TaskStatusCounts};

pub use error::{Result, WorkspaceError};

pub const META_DB_NAME: &str = "_neutrino";
pub const META_TASKS: &str = "tasks";
pub const META_OPLOGS: &str = "oplogs";
pub const META_LOGS: &str = "logs";

/// Sort direction used by `find_next_task_and_update` to alternate between
/// parent-heavy and child-heavy tails of the task queue, shuffling worker
/// contention across calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortRev {
    Ascending,
    Descending,
}

impl SortRev {
    fn as_i32(self) -> i32 {
        match self {
            SortRev::Ascending => 1,
            SortRev::Descending => -1,
        }
    }

    /// Flips direction; callers alternate this every claim attempt.
    pub fn flip(self) -> Self {
        match self {
            SortRev::Ascending => SortRev::Descending,
            SortRev::Descending => SortRev::Ascending,
        }
    }
}

#[derive(Clone)]
pub struct Workspace {
    client: Client,
    db_name: String,
    spool: PathBuf,
}

impl Workspace {
    pub fn new(client: Client, spool: impl Into<PathBuf>) -> Self {
        Self {
            client,
            db_name: META_DB_NAME.to_string(),
            spool: spool.into(),
        }
    }

    pub fn spool_dir(&self) -> &Path {
        &self.spool
    }

    fn tasks(&self) -> Collection<Task> {
        self.client.database(&self.db_name).collection(META_TASKS)
    }

    fn tasks_raw(&self) -> Collection<bson::Document> {
        self.client.database(&self.db_name).collection(META_TASKS)
    }

    fn oplogs(&self) -> Collection<bson::Document> {
        self.client.database(&self.db_name).collection(META_OPLOGS)
    }

    fn logs(&self) -> Collection<bson::Document> {
        self.client.database(&self.db_name).collection(META_LOGS)
    }

    /// Drops the meta database entirely.
    pub async fn drop_meta_db(&self) -> Result<()> {
        self.client.database(&self.db_name).drop().await?;
        Ok(())
    }

    /// Removes every spooled change-log file left behind by followers.
    pub async fn clean_up_workspace(&self) -> Result<()> {
        if !self.spool.exists() {
            return Ok(());
        }
        let mut entries = tokio::fs::read_dir(&self.spool)
            .await
            .map_err(|source| WorkspaceError::SpoolCleanup {
                path: self.spool.display().to_string(),
                source,
            })?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| WorkspaceError::SpoolCleanup {
                path: self.spool.display().to_string(),
                source,
            })?
        {
            let path = entry.path();
            if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".bson.gz"))
            {
                tokio::fs::remove_file(&path).await.map_err(|source| {
                    WorkspaceError::SpoolCleanup {
                        path: path.display().to_string(),
                        source,
                    }
                })?;
            }
        }
        Ok(())
    }

    /// Drops prior run state, (re)creates the task indexes, and clears the
    /// spool directory. Used at the start of a fresh (non-resume) run.
    pub async fn reset(&self) -> Result<()> {
        self.drop_meta_db().await?;
        self.create_task_indexes().await?;
        self.clean_up_workspace().await?;
        tokio::fs::create_dir_all(&self.spool)
            .await
            .map_err(|source| WorkspaceError::SpoolCleanup {
                path: self.spool.display().to_string(),
                source,
            })?;
        Ok(())
    }

    pub async fn create_task_indexes(&self) -> Result<()> {
        let coll = self.tasks_raw();
        let claim_index = IndexModel::builder()
            .keys(doc! { "status": 1, "replica_set": 1, "_id": 1 })
            .build();
        let splitter_index = IndexModel::builder()
            .keys(doc! { "replica_set": 1, "parent_id": 1 })
            .build();
        coll.create_indexes(vec![claim_index, splitter_index])
            .await?;
        Ok(())
    }

    /// Appends a status line to the run log.
    pub async fn log(&self, status: impl Into<String>) -> Result<()> {
        let doc = doc! { "ts": Bson::DateTime(bson::DateTime::now()), "status": status.into() };
        self.logs().insert_one(doc).await?;
        Ok(())
    }

    pub async fn insert_tasks(&self, tasks: &[Task]) -> Result<()> {
        if tasks.is_empty() {
            return Ok(());
        }
        self.tasks().insert_many(tasks).await?;
        Ok(())
    }

    /// Updates one task's mutable fields, matched by id. When the task just
    /// completed and has a parent, atomically increments the parent's
    /// `inserted` tally by this task's count — a commutative `$inc` that
    /// needs no compare-and-set even under concurrent sibling completions
    /// (see DESIGN.md's Open Question).
    pub async fn update_task(&self, task: &Task) -> Result<()> {
        let mut set = doc! {
            "status": task.status.as_str(),
            "source_counts": task.source_counts,
            "updated_by": &task.updated_by,
        };
        if let Some(begin) = task.begin_time {
            set.insert("begin_time", to_bson_datetime(begin));
        }
        if let Some(end) = task.end_time {
            set.insert("end_time", to_bson_datetime(end));
        }
        if task.status == TaskStatus::Completed {
            set.insert("inserted", task.inserted);
        }
        let result = self
            .tasks_raw()
            .update_one(doc! { "_id": task.id }, doc! { "$set": set })
            .await?;
        if result.matched_count == 0 {
            return Err(WorkspaceError::NoMatchedTask(task.id));
        }

        if task.status != TaskStatus::Completed || task.inserted == 0 {
            return Ok(());
        }
        let Some(parent_id) = task.parent_id else {
            return Ok(());
        };
        let result = self
            .tasks_raw()
            .update_one(
                doc! { "_id": parent_id },
                doc! { "$inc": { "inserted": task.inserted } },
            )
            .await?;
        if result.matched_count == 0 {
            return Err(WorkspaceError::NoMatchedParent(parent_id));
        }
        Ok(())
    }

    /// Atomically claims one Added task for `replica_set` (or any replica
    /// set, if empty), flipping it to Processing and stamping begin-time and
    /// claimant. Returns `Ok(None)` if nothing is available.
    pub async fn find_next_task_and_update(
        &self,
        replica_set: &str,
        updated_by: &str,
        rev: SortRev,
    ) -> Result<Option<Task>> {
        let mut filter = doc! { "status": TaskStatus::Added.as_str() };
        if !replica_set.is_empty() {
            filter.insert("replica_set", replica_set);
        }
        let update = doc! {
            "$set": {
                "status": TaskStatus::Processing.as_str(),
                "begin_time": to_bson_datetime(Utc::now()),
                "updated_by": updated_by,
            }
        };
        let options = FindOneAndUpdateOptions::builder()
            .sort(doc! { "replica_set": 1, "parent_id": rev.as_i32() })
            .return_document(ReturnDocument::After)
            .build();
        let task = self
            .tasks()
            .find_one_and_update(filter, update)
            .with_options(options)
            .await?;
        Ok(task)
    }

    pub async fn count_all_status(&self) -> Result<TaskStatusCounts> {
        let pipeline = vec![
            doc! { "$sort": { "status": 1 } },
            doc! { "$group": { "_id": "$status", "count": { "$sum": 1 } } },
        ];
        let mut cursor = self.tasks_raw().aggregate(pipeline).await?;
        let mut counts = TaskStatusCounts::default();
        while let Some(doc) = cursor.try_next().await? {
            let status = doc.get_str("_id").unwrap_or_default();
            let count = doc.get_i32("count").unwrap_or_default() as i64;
            match status {
                "added" => counts.added = count,
                "splitting" => counts.splitting = count,
                "processing" => counts.processing = count,
                "completed" => counts.completed = count,
                "failed" => counts.failed = count,
                _ => {}
            }
        }
        Ok(counts)
    }

    /// The lease mechanism: reverts any Processing task whose begin-time is
    /// older than `now + ago` (ago negative) back to Added, so a worker that
    /// died or stalled releases its hold.
    pub async fn reset_long_running_tasks(&self, ago: chrono::Duration) -> Result<u64> {
        if ago >= chrono::Duration::zero() {
            return Err(WorkspaceError::InvalidLeaseWindow(ago));
        }
        let cutoff = Utc::now() + ago;
        let filter = doc! {
            "status": TaskStatus::Processing.as_str(),
            "begin_time": { "$lt": to_bson_datetime(cutoff) },
        };
        let update = doc! {
            "$set": { "status": TaskStatus::Added.as_str(), "updated_by": "maid" },
            "$unset": { "begin_time": "" },
        };
        let result = self.tasks_raw().update_many(filter, update).await?;
        Ok(result.modified_count)
    }

    pub async fn find_all_parent_tasks(&self) -> Result<Vec<Task>> {
        let filter = doc! { "parent_id": Bson::Null };
        let cursor = self.tasks().find(filter).await?;
        let tasks: Vec<Task> = cursor.try_collect().await?;
        Ok(tasks)
    }

    /// Requeues a parent that was mid-split and discards its children,
    /// so the split is rebuilt from scratch on resume.
    pub async fn reset_parent_task(&self, parent_id: bson::oid::ObjectId) -> Result<()> {
        self.tasks_raw()
            .update_one(
                doc! { "_id": parent_id },
                doc! { "$set": { "status": TaskStatus::Added.as_str() } },
            )
            .await?;
        self.tasks_raw()
            .delete_many(doc! { "parent_id": parent_id })
            .await?;
        Ok(())
    }

    /// Mass-reverts every Processing task to Added; used once at resume,
    /// before the lease sweep takes over for the remainder of the run.
    pub async fn reset_processing_tasks(&self) -> Result<u64> {
        let result = self
            .tasks_raw()
            .update_many(
                doc! { "status": TaskStatus::Processing.as_str() },
                doc! { "$set": { "status": TaskStatus::Added.as_str() } },
            )
            .await?;
        Ok(result.modified_count)
    }

    pub async fn save_oplog_timestamp(
        &self,
        replica_set: &str,
        ts: bson::Timestamp,
    ) -> Result<()> {
        self.oplogs()
            .update_one(
                doc! { "_id": replica_set },
                doc! { "$set": { "ts": ts } },
            )
            .upsert(true)
            .await?;
        Ok(())
    }

    pub async fn get_oplog_timestamp(&self, replica_set: &str) -> Result<Option<bson::Timestamp>> {
        let doc = self.oplogs().find_one(doc! { "_id": replica_set }).await?;
        Ok(doc.and_then(|d| d.get_timestamp("ts").ok()))
    }
}

fn to_bson_datetime(dt: DateTime<Utc>) -> bson::DateTime {
    bson::DateTime::from_chrono(dt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_rev_flips() {
        assert_eq!(SortRev::Ascending.flip(), SortRev::Descending);
        assert_eq!(SortRev::Descending.flip(), SortRev::Ascending);
    }

    #[test]
    fn sort_rev_as_i32() {
        assert_eq!(SortRev::Ascending.as_i32(), 1);
        assert_eq!(SortRev::Descending.as_i32(), -1);
    }

    const FIXED_MONGO_URL: &str = "mongodb://localhost:27017";

    #[tokio::test]
    async fn claims_and_completes_a_task() {
        let client = mongodb::Client::with_uri_str(FIXED_MONGO_URL).await.unwrap();
        let workspace = Workspace::new(client, std::env::temp_dir());
        workspace.drop_meta_db().await.unwrap();
        workspace.create_task_indexes().await.unwrap();

        let task = Task::new_parent(
            "db1.a".to_string(),
            "rs0".to_string(),
            neutrino_types::Include {
                namespace: "db1.a".to_string(),
                ..Default::default()
            },
        );
        workspace.insert_tasks(&[task]).await.unwrap();

        let claimed = workspace
            .find_next_task_and_update("rs0", "tester", SortRev::Ascending)
            .await
            .unwrap()
            .expect("the just-inserted task should be claimable");
        assert_eq!(claimed.status, TaskStatus::Processing);

        let mut done = claimed;
        done.status = TaskStatus::Completed;
        done.inserted = 5;
        workspace.update_task(&done).await.unwrap();

        let counts = workspace.count_all_status().await.unwrap();
        assert_eq!(counts.completed, 1);
        assert!(counts.drained());

        workspace.drop_meta_db().await.unwrap();
    }

    #[tokio::test]
    async fn resume_sweep_discards_children_of_a_splitting_parent() {
        let client = mongodb::Client::with_uri_str(FIXED_MONGO_URL).await.unwrap();
        let workspace = Workspace::new(client, std::env::temp_dir());
        workspace.drop_meta_db().await.unwrap();
        workspace.create_task_indexes().await.unwrap();

        let mut parent = Task::new_parent(
            "db1.a".to_string(),
            "rs0".to_string(),
            neutrino_types::Include { namespace: "db1.a".to_string(), ..Default::default() },
        );
        parent.status = TaskStatus::Splitting;
        workspace.insert_tasks(std::slice::from_ref(&parent)).await.unwrap();

        let mut child_a = Task::new_child(&parent, bson::Bson::Int64(1), bson::Bson::Int64(10), 10);
        child_a.status = TaskStatus::Processing;
        let mut child_b = Task::new_child(&parent, bson::Bson::Int64(11), bson::Bson::Int64(20), 10);
        child_b.status = TaskStatus::Processing;
        workspace.insert_tasks(&[child_a, child_b]).await.unwrap();

        workspace.reset_parent_task(parent.id).await.unwrap();
        let reverted = workspace.reset_processing_tasks().await.unwrap();
        assert_eq!(reverted, 0, "children were deleted, not left processing");

        let parents = workspace.find_all_parent_tasks().await.unwrap();
        assert_eq!(parents.len(), 1);
        assert_eq!(parents[0].status, TaskStatus::Added);

        let counts = workspace.count_all_status().await.unwrap();
        assert_eq!(counts.total(), 1, "the split's children were discarded");

        workspace.drop_meta_db().await.unwrap();
    }

    #[tokio::test]
    async fn lease_sweep_reclaims_only_stale_processing_tasks() {
        let client = mongodb::Client::with_uri_str(FIXED_MONGO_URL).await.unwrap();
        let workspace = Workspace::new(client, std::env::temp_dir());
        workspace.drop_meta_db().await.unwrap();
        workspace.create_task_indexes().await.unwrap();

        let parent = Task::new_parent(
            "db1.a".to_string(),
            "rs0".to_string(),
            neutrino_types::Include { namespace: "db1.a".to_string(), ..Default::default() },
        );
        workspace.insert_tasks(std::slice::from_ref(&parent)).await.unwrap();
        workspace
            .find_next_task_and_update("rs0", "stale-worker", SortRev::Ascending)
            .await
            .unwrap()
            .unwrap();

        // A lease window in the future relative to begin_time (now) never reclaims.
        let reclaimed = workspace.reset_long_running_tasks(chrono::Duration::minutes(-10)).await.unwrap();
        assert_eq!(reclaimed, 0);

        // A window that already elapsed reclaims the stale task back to Added.
        let reclaimed = workspace.reset_long_running_tasks(chrono::Duration::seconds(-1)).await.unwrap();
        assert_eq!(reclaimed, 0, "the lease was claimed a moment ago, well within a one-second window");

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        let reclaimed = workspace.reset_long_running_tasks(chrono::Duration::seconds(-1)).await.unwrap();
        assert_eq!(reclaimed, 1);

        let counts = workspace.count_all_status().await.unwrap();
        assert_eq!(counts.added, 1);
        assert_eq!(counts.processing, 0);

        workspace.drop_meta_db().await.unwrap();
    }

    #[tokio::test]
    async fn reset_long_running_tasks_rejects_a_non_negative_window() {
        let client = mongodb::Client::with_uri_str(FIXED_MONGO_URL).await.unwrap();
        let workspace = Workspace::new(client, std::env::temp_dir());
        let result = workspace.reset_long_running_tasks(chrono::Duration::zero()).await;
        assert!(matches!(result, Err(WorkspaceError::InvalidLeaseWindow(_))));
    }
}
