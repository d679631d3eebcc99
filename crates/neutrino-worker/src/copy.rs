//! Bulk range copy, grounded on `original_source/data_copier.go`'s
//! `CopyData`/`BatchedCopy` pair (§4.4 of the specification).

use bson::{doc, Document};
use futures::stream::TryStreamExt;
use mongodb::options::InsertManyOptions;
use mongodb::Collection;
use neutrino_types::Task;

use crate::error::CopyError;

/// Flush a batch once it reaches this many documents...
pub const BATCH_DOC_LIMIT: usize = 1_000;
/// ...or this many accumulated bytes, whichever comes first.
pub const BATCH_BYTE_LIMIT: usize = 64 * 1024 * 1024;

/// Copies the `[low, high]` key range of one child task from `source` into
/// `target`. Returns the number of documents credited as inserted.
pub async fn copy_data(
    task: &Task,
    source: &Collection<Document>,
    target: &Collection<Document>,
) -> Result<i64, CopyError> {
    if task.source_counts == 0 {
        return Ok(0);
    }
    if task.bounds.len() < 2 {
        return Err(CopyError::MissingBounds);
    }
    let low = task.bounds[0].clone();
    let high = task.bounds[1].clone();

    let mut query = task.include.filter.clone().unwrap_or_default();
    merge_range_filter(&mut query, low, high);

    let mut cursor = source.find(query).await?;
    let mut batch: Vec<Document> = Vec::new();
    let mut batch_bytes: usize = 0;
    let mut inserted: i64 = 0;

    while let Some(doc) = cursor.try_next().await? {
        batch_bytes += approximate_doc_size(&doc);
        batch.push(doc);
        if batch.len() >= BATCH_DOC_LIMIT || batch_bytes >= BATCH_BYTE_LIMIT {
            inserted += batched_copy(target, std::mem::take(&mut batch)).await?;
            batch_bytes = 0;
        }
    }
    if !batch.is_empty() {
        inserted += batched_copy(target, batch).await?;
    }
    Ok(inserted)
}

fn merge_range_filter(query: &mut Document, low: bson::Bson, high: bson::Bson) {
    query.insert(
        "_id",
        doc! { "$gte": low, "$lte": high },
    );
}

fn approximate_doc_size(doc: &Document) -> usize {
    bson::to_vec(doc).map(|v| v.len()).unwrap_or(0)
}

/// Issues an unordered bulk insert. A duplicate-key failure is assumed to
/// mean the batch (or part of it) already committed on a prior attempt: the
/// target is re-queried for the batch's primary keys, and if every key is
/// already present the batch is credited as fully applied. Otherwise the
/// missed documents are left uncounted for a higher-level retry to pick up.
async fn batched_copy(target: &Collection<Document>, batch: Vec<Document>) -> Result<i64, CopyError> {
    let len = batch.len();
    let ids: Vec<bson::Bson> = batch.iter().filter_map(|d| d.get("_id").cloned()).collect();
    let options = InsertManyOptions::builder().ordered(false).build();
    match target.insert_many(batch).with_options(options).await {
        Ok(result) => Ok(result.inserted_ids.len() as i64),
        Err(err) if is_duplicate_key_error(&err) => {
            let count = target
                .count_documents(doc! { "_id": { "$in": ids } })
                .await?;
            if count as usize == len {
                Ok(len as i64)
            } else {
                Ok(0)
            }
        }
        Err(err) => Err(err.into()),
    }
}

fn is_duplicate_key_error(err: &mongodb::error::Error) -> bool {
    use mongodb::error::ErrorKind;
    match err.kind.as_ref() {
        ErrorKind::BulkWrite(bulk) => bulk
            .write_errors
            .as_ref()
            .map(|errs| errs.iter().any(|e| e.code == 11000))
            .unwrap_or(false),
        ErrorKind::Write(mongodb::error::WriteFailure::WriteError(we)) => we.code == 11000,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_filter_combines_with_existing_selector() {
        let mut query = doc! { "active": true };
        merge_range_filter(&mut query, bson::Bson::Int64(1), bson::Bson::Int64(100));
        assert_eq!(query.get_bool("active").unwrap(), true);
        let range = query.get_document("_id").unwrap();
        assert_eq!(range.get_i64("$gte").unwrap(), 1);
        assert_eq!(range.get_i64("$lte").unwrap(), 100);
    }

    const FIXED_MONGO_URL: &str = "mongodb://localhost:27017";

    #[tokio::test]
    async fn copies_a_bounded_key_range() {
        let client = mongodb::Client::with_uri_str(FIXED_MONGO_URL).await.unwrap();
        let db = "neutrino_worker_test";
        client.database(db).drop().await.unwrap();

        let source: Collection<Document> = client.database(db).collection("source");
        let target: Collection<Document> = client.database(db).collection("target");
        let docs: Vec<Document> = (1..=20).map(|i| doc! { "_id": i }).collect();
        source.insert_many(docs).await.unwrap();

        let parent = Task::new_parent(
            format!("{db}.source"),
            "rs0".to_string(),
            neutrino_types::Include { namespace: format!("{db}.source"), ..Default::default() },
        );
        let child = Task::new_child(&parent, bson::Bson::Int32(5), bson::Bson::Int32(15), 11);

        let inserted = copy_data(&child, &source, &target).await.unwrap();
        assert_eq!(inserted, 11);
        let count = target.count_documents(doc! {}).await.unwrap();
        assert_eq!(count, 11);

        client.database(db).drop().await.unwrap();
    }
}
