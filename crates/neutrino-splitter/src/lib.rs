//! Decomposes each parent task (one included namespace) into bounded
//! primary-key range child tasks.
//!
//! Grounded on `original_source/splitter.go`: at most `NUMBER_SPLITTERS`
//! parents are split concurrently; each split walks a `_id`-projected,
//! `_id`-sorted cursor and emits one child every `block` documents.

use std::collections::HashMap;

use bson::{doc, Bson};
use futures::stream::{self, StreamExt, TryStreamExt};
use mongodb::options::FindOptions;
use mongodb::Client;
use neutrino_types::{split_namespace, Task, TaskStatus};
use neutrino_workspace::Workspace;
use thiserror::Error;

/// Number of parents split concurrently, mirroring the original's fixed
/// `NumberSplitters = 4`.
pub const NUMBER_SPLITTERS: usize = 4;

#[derive(Debug, Error)]
pub enum SplitError {
    #[error("workspace error: {0}")]
    Workspace(#[from] neutrino_workspace::WorkspaceError),
    #[error("mongo error: {0}")]
    Mongo(#[from] mongodb::error::Error),
    #[error("no source client configured for replica set {0}")]
    MissingReplica(String),
}

/// Splits every parent task that is not already Completed, running at most
/// `NUMBER_SPLITTERS` splits concurrently.
pub async fn split_all(
    workspace: &Workspace,
    replicas: &HashMap<String, Client>,
    parents: Vec<Task>,
    block: i64,
) -> Result<(), SplitError> {
    let started = std::time::Instant::now();
    let pending: Vec<Task> = parents
        .into_iter()
        .filter(|t| t.status != TaskStatus::Completed)
        .collect();

    stream::iter(pending.into_iter().map(|parent| {
        let workspace = workspace.clone();
        let client = replicas.get(&parent.replica_set).cloned();
        async move {
            let client =
                client.ok_or_else(|| SplitError::MissingReplica(parent.replica_set.clone()))?;
            split_one(&workspace, &client, parent, block).await
        }
    }))
    .buffer_unordered(NUMBER_SPLITTERS)
    .try_for_each(|()| futures::future::ready(Ok(())))
    .await?;

    tracing::info!(elapsed = ?started.elapsed(), "collections split");
    Ok(())
}

async fn split_one(
    workspace: &Workspace,
    client: &Client,
    mut parent: Task,
    block: i64,
) -> Result<(), SplitError> {
    let (db_name, coll_name) = split_namespace(&parent.namespace);
    let coll = client
        .database(&db_name)
        .collection::<bson::Document>(&coll_name);

    parent.status = TaskStatus::Splitting;
    parent.begin_time = Some(chrono::Utc::now());
    workspace.update_task(&parent).await?;

    let query = parent.include.filter.clone().unwrap_or_default();
    let options = FindOptions::builder()
        .projection(doc! { "_id": 1 })
        .sort(doc! { "_id": 1 })
        .build();
    let mut cursor = coll.find(query).with_options(options).await?;

    let mut total: i64 = 0;
    let mut count: i64 = 0;
    let mut first: Option<Bson> = None;
    let mut last: Option<Bson> = None;
    let mut children = Vec::new();

    while let Some(doc) = cursor.try_next().await? {
        let id = doc.get("_id").cloned().unwrap_or(Bson::Null);
        total += 1;
        count += 1;
        if first.is_none() {
            first = Some(id.clone());
        }
        last = Some(id);
        if count == block {
            let child = Task::new_child(
                &parent,
                first.take().unwrap(),
                last.take().unwrap(),
                count,
            );
            children.push(child);
            count = 0;
        }
    }
    if let Some(first) = first {
        let last = last.unwrap_or_else(|| first.clone());
        children.push(Task::new_child(&parent, first, last, count));
    }

    // Insert in one shot per parent; each parent's own children never race
    // with another parent's, so a single bulk insert is safe here even
    // though individual tasks are claimed/updated independently afterward.
    workspace.insert_tasks(&children).await?;

    parent.status = TaskStatus::Completed;
    parent.end_time = Some(chrono::Utc::now());
    parent.source_counts = total;
    workspace.update_task(&parent).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use neutrino_types::Include;

    fn parent(namespace: &str) -> Task {
        Task::new_parent(namespace.to_string(), "rs0".to_string(), Include {
            namespace: namespace.to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn child_bounds_come_from_first_and_last_seen_id() {
        let p = parent("db1.a");
        let child = Task::new_child(&p, Bson::Int64(1), Bson::Int64(10_000), 10_000);
        assert_eq!(child.bounds, vec![Bson::Int64(1), Bson::Int64(10_000)]);
        assert_eq!(child.parent_id, Some(p.id));
        assert_eq!(child.source_counts, 10_000);
    }

    #[test]
    fn single_document_child_has_equal_bounds() {
        let p = parent("db1.a");
        let child = Task::new_child(&p, Bson::Int64(42), Bson::Int64(42), 1);
        assert_eq!(child.bounds[0], child.bounds[1]);
    }

    const FIXED_MONGO_URL: &str = "mongodb://localhost:27017";

    #[tokio::test]
    async fn splits_a_namespace_into_bounded_children() {
        let client = mongodb::Client::with_uri_str(FIXED_MONGO_URL).await.unwrap();
        let db = "neutrino_splitter_test";
        client.database(db).drop().await.unwrap();
        let source = client.database(db).collection::<bson::Document>("widgets");
        let docs: Vec<bson::Document> = (1..=25).map(|i| doc! { "_id": i }).collect();
        source.insert_many(docs).await.unwrap();

        let workspace_client = client.clone();
        let workspace = Workspace::new(workspace_client, std::env::temp_dir());
        workspace.drop_meta_db().await.unwrap();
        workspace.create_task_indexes().await.unwrap();

        let p = parent(&format!("{db}.widgets"));
        workspace.insert_tasks(std::slice::from_ref(&p)).await.unwrap();

        let mut replicas = HashMap::new();
        replicas.insert("rs0".to_string(), client.clone());

        split_all(&workspace, &replicas, vec![p.clone()], 10).await.unwrap();

        let counts = workspace.count_all_status().await.unwrap();
        assert_eq!(counts.completed, 1);
        assert_eq!(counts.added, 3);

        client.database(db).drop().await.unwrap();
        workspace.drop_meta_db().await.unwrap();
    }
}
