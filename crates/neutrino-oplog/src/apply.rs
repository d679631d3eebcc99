//! The bulk applier (§4.6): translate captured entries into write models,
//! group by target namespace, and flush insert/non-insert runs with
//! different ordering guarantees.

use bson::{doc, Document};
use mongodb::options::InsertManyOptions;
use mongodb::Client;
use neutrino_types::{split_namespace, ApplyCounts, Include, OperationKind, OplogEntry};

use crate::error::OplogError;

#[derive(Debug, Clone)]
enum WriteOp {
    Insert(Document),
    Delete(Document),
    Update { filter: Document, modifier: Document },
    Replace { filter: Document, replacement: Document },
}

/// Recursively flattens `applyOps` commands, dropping other command entries
/// and no-ops, and returns `(target-namespace, write-model)` pairs in the
/// batch's original relative order.
fn flatten(entries: &[OplogEntry], includes: &[Include]) -> Vec<(String, WriteOp)> {
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        match entry.operation {
            OperationKind::Insert => {
                out.push((
                    resolve_target_namespace(&entry.namespace, includes),
                    WriteOp::Insert(entry.document.clone()),
                ));
            }
            OperationKind::Delete => {
                out.push((
                    resolve_target_namespace(&entry.namespace, includes),
                    WriteOp::Delete(entry.document.clone()),
                ));
            }
            OperationKind::Update => {
                let ns = resolve_target_namespace(&entry.namespace, includes);
                let filter = entry.query.clone().unwrap_or_default();
                match entry.first_modifier_key() {
                    Some(key) => {
                        let value = entry.document.get(key).cloned().unwrap_or(bson::Bson::Null);
                        out.push((ns, WriteOp::Update { filter, modifier: doc! { key: value } }));
                    }
                    None => out.push((ns, WriteOp::Replace { filter, replacement: entry.document.clone() })),
                }
            }
            OperationKind::Command => {
                if let Some(inner) = entry.inner_apply_ops() {
                    out.extend(flatten(&inner, includes));
                }
            }
            OperationKind::Noop => {}
        }
    }
    out
}

/// Finds the include rule matching `ns` and applies its rename, or returns
/// `ns` unchanged if no rule matches (or no includes are configured).
fn resolve_target_namespace(ns: &str, includes: &[Include]) -> String {
    let (db, coll) = split_namespace(ns);
    let all_colls_in_db = format!("{db}.*");
    let coll_in_all_dbs = format!("*.{coll}");
    includes
        .iter()
        .find(|inc| inc.namespace == ns || inc.namespace == all_colls_in_db || inc.namespace == coll_in_all_dbs)
        .and_then(|inc| inc.to.clone())
        .unwrap_or_else(|| ns.to_string())
}

/// Groups `(namespace, op)` pairs into contiguous per-namespace runs,
/// preserving each namespace's relative order but coalescing its entries
/// into one run regardless of interleaving with other namespaces.
fn group_by_namespace(pairs: Vec<(String, WriteOp)>) -> Vec<(String, Vec<WriteOp>)> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: std::collections::HashMap<String, Vec<WriteOp>> = std::collections::HashMap::new();
    for (ns, op) in pairs {
        if !groups.contains_key(&ns) {
            order.push(ns.clone());
        }
        groups.entry(ns).or_default().push(op);
    }
    order
        .into_iter()
        .map(|ns| {
            let ops = groups.remove(&ns).unwrap_or_default();
            (ns, ops)
        })
        .collect()
}

/// Applies one batch of captured entries against `target`, returning the
/// tallies for logging. Never fails the batch outright; individual
/// unmatched writes are logged and counted as missed.
pub async fn bulk_apply(
    target: &Client,
    entries: &[OplogEntry],
    includes: &[Include],
) -> Result<ApplyCounts, OplogError> {
    let pairs = flatten(entries, includes);
    let groups = group_by_namespace(pairs);
    let mut counts = ApplyCounts::default();

    for (namespace, ops) in groups {
        let (db, coll) = split_namespace(&namespace);
        let collection = target.database(&db).collection::<Document>(&coll);

        let mut run: Vec<WriteOp> = Vec::new();
        let mut run_is_insert: Option<bool> = None;
        for op in ops {
            let is_insert = matches!(op, WriteOp::Insert(_));
            if let Some(prev) = run_is_insert {
                if prev != is_insert {
                    flush_run(&collection, std::mem::take(&mut run), prev, &mut counts).await?;
                }
            }
            run.push(op);
            run_is_insert = Some(is_insert);
        }
        if !run.is_empty() {
            flush_run(&collection, run, run_is_insert.unwrap_or(false), &mut counts).await?;
        }
    }
    let total = counts.total();
    if (total as usize) < entries.len() {
        tracing::debug!(applied = total, batch_len = entries.len(), "batch applied short of input");
    }
    Ok(counts)
}

async fn flush_run(
    collection: &mongodb::Collection<Document>,
    run: Vec<WriteOp>,
    is_insert: bool,
    counts: &mut ApplyCounts,
) -> Result<(), OplogError> {
    if is_insert {
        flush_insert_run(collection, run, counts).await
    } else {
        flush_ordered_run(collection, run, counts).await
    }
}

/// Insert runs flush as one unordered bulk write; duplicate keys are treated
/// as success since the existing document already satisfies the intent.
async fn flush_insert_run(
    collection: &mongodb::Collection<Document>,
    run: Vec<WriteOp>,
    counts: &mut ApplyCounts,
) -> Result<(), OplogError> {
    let docs: Vec<Document> = run
        .into_iter()
        .filter_map(|op| match op {
            WriteOp::Insert(doc) => Some(doc),
            _ => None,
        })
        .collect();
    if docs.is_empty() {
        return Ok(());
    }
    let attempted = docs.len() as u64;
    let options = InsertManyOptions::builder().ordered(false).build();
    match collection.insert_many(docs).with_options(options).await {
        Ok(_) => counts.inserted += attempted,
        Err(err) if is_duplicate_key_error(&err) => counts.inserted += attempted,
        Err(err) => return Err(err.into()),
    }
    Ok(())
}

/// Non-insert runs flush ordered, one write at a time; the left-to-right
/// scan order already matches "ordered bulk write" semantics, and any write
/// that fails to match is logged and left uncounted rather than aborting
/// the remainder of the run.
async fn flush_ordered_run(
    collection: &mongodb::Collection<Document>,
    run: Vec<WriteOp>,
    counts: &mut ApplyCounts,
) -> Result<(), OplogError> {
    for op in run {
        match op {
            WriteOp::Delete(filter) => match collection.delete_one(filter).await {
                Ok(result) if result.deleted_count > 0 => counts.deleted += result.deleted_count,
                Ok(_) => tracing::debug!("delete matched nothing in ordered run"),
                Err(err) => tracing::warn!(error = %err, "delete missed in ordered run"),
            },
            WriteOp::Update { filter, modifier } => match collection.update_one(filter, modifier).await {
                Ok(result) if result.modified_count > 0 || result.upserted_id.is_some() => {
                    counts.modified += result.modified_count;
                    if result.upserted_id.is_some() {
                        counts.upserted += 1;
                    }
                }
                Ok(_) => tracing::debug!("update matched nothing in ordered run"),
                Err(err) => tracing::warn!(error = %err, "update missed in ordered run"),
            },
            WriteOp::Replace { filter, replacement } => {
                match collection.replace_one(filter, replacement).await {
                    Ok(result) if result.modified_count > 0 || result.upserted_id.is_some() => {
                        counts.modified += result.modified_count;
                        if result.upserted_id.is_some() {
                            counts.upserted += 1;
                        }
                    }
                    Ok(_) => tracing::debug!("replace matched nothing in ordered run"),
                    Err(err) => tracing::warn!(error = %err, "replace missed in ordered run"),
                }
            }
            WriteOp::Insert(_) => {}
        }
    }
    Ok(())
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
    use bson::Timestamp;

    fn insert(ns: &str, id: i32) -> OplogEntry {
        OplogEntry {
            operation: OperationKind::Insert,
            namespace: ns.to_string(),
            document: doc! { "_id": id },
            query: None,
            timestamp: Timestamp { time: 1, increment: 0 },
        }
    }

    #[test]
    fn resolve_target_namespace_applies_rename() {
        let includes = vec![Include { namespace: "db1.a".into(), to: Some("db2.b".into()), ..Default::default() }];
        assert_eq!(resolve_target_namespace("db1.a", &includes), "db2.b");
        assert_eq!(resolve_target_namespace("db1.c", &includes), "db1.c");
    }

    #[test]
    fn grouping_coalesces_interleaved_namespaces() {
        let pairs = flatten(&[insert("db1.a", 1), insert("db1.b", 1), insert("db1.a", 2)], &[]);
        let groups = group_by_namespace(pairs);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "db1.a");
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, "db1.b");
    }

    const FIXED_MONGO_URL: &str = "mongodb://localhost:27017";

    #[tokio::test]
    async fn applies_a_mixed_insert_and_update_batch() {
        let client = mongodb::Client::with_uri_str(FIXED_MONGO_URL).await.unwrap();
        let db = "neutrino_oplog_test";
        client.database(db).drop().await.unwrap();
        let coll = client.database(db).collection::<Document>("widgets");
        coll.insert_one(doc! { "_id": 1, "qty": 1 }).await.unwrap();

        let entries = vec![
            insert(&format!("{db}.widgets"), 2),
            OplogEntry {
                operation: OperationKind::Update,
                namespace: format!("{db}.widgets"),
                document: doc! { "$set": { "qty": 9 } },
                query: Some(doc! { "_id": 1 }),
                timestamp: Timestamp { time: 2, increment: 0 },
            },
        ];

        let counts = bulk_apply(&client, &entries, &[]).await.unwrap();
        assert_eq!(counts.inserted, 1);
        assert_eq!(counts.modified, 1);

        let updated = coll.find_one(doc! { "_id": 1 }).await.unwrap().unwrap();
        assert_eq!(updated.get_i32("qty").unwrap(), 9);
        assert_eq!(coll.count_documents(doc! {}).await.unwrap(), 2);

        client.database(db).drop().await.unwrap();
    }
}
