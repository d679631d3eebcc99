//! The unit of work dispatched to the worker pool: either a parent task
//! (an entire included namespace) or a child task (a bounded primary-key
//! sub-range of a parent).

use bson::oid::ObjectId;
use bson::Bson;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::namespace::Include;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Added,
    Splitting,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Added => "added",
            TaskStatus::Splitting => "splitting",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

/// A task document, as persisted in the workspace's `tasks` collection.
///
/// Invariant: a parent task has `parent_id = None`; a child has `parent_id`
/// pointing to an extant parent. `bounds` is empty for a parent task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ObjectId>,
    pub replica_set: String,
    pub status: TaskStatus,
    /// Inclusive `[low, high]` primary-key bounds. Empty for a parent task.
    #[serde(default)]
    pub bounds: Vec<Bson>,
    #[serde(default)]
    pub source_counts: i64,
    #[serde(default)]
    pub inserted: i64,
    #[serde(default)]
    pub include: Include,
    #[serde(default)]
    pub begin_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    pub updated_by: String,
}

impl Task {
    pub fn new_parent(namespace: String, replica_set: String, include: Include) -> Self {
        Self {
            id: ObjectId::new(),
            namespace,
            parent_id: None,
            replica_set,
            status: TaskStatus::Added,
            bounds: Vec::new(),
            source_counts: 0,
            inserted: 0,
            include,
            begin_time: None,
            end_time: None,
            updated_by: "init".to_string(),
        }
    }

    pub fn new_child(
        parent: &Task,
        low: Bson,
        high: Bson,
        source_counts: i64,
    ) -> Self {
        Self {
            id: ObjectId::new(),
            namespace: parent.namespace.clone(),
            parent_id: Some(parent.id),
            replica_set: parent.replica_set.clone(),
            status: TaskStatus::Added,
            bounds: vec![low, high],
            source_counts,
            inserted: 0,
            include: parent.include.clone(),
            begin_time: None,
            end_time: None,
            updated_by: "splitter".to_string(),
        }
    }

    pub fn is_parent(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Grouped counts returned by `Workspace::count_all_status`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskStatusCounts {
    pub added: i64,
    pub splitting: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
}

impl TaskStatusCounts {
    pub fn total(&self) -> i64 {
        self.added + self.splitting + self.processing + self.completed + self.failed
    }

    /// True once there is nothing left for a worker to claim or finish.
    pub fn drained(&self) -> bool {
        self.added + self.processing == 0
    }
}
