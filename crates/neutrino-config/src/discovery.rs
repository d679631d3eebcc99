//! Namespace discovery for the config phase: expands `includes` (or, absent
//! any, every non-system collection on the source) into concrete
//! `(source-namespace, target-namespace)` pairs.
//!
//! Grounded on `original_source/collection_creator.go`'s database/collection
//! enumeration loop.

use bson::doc;
use mongodb::Client;
use neutrino_types::{join_namespace, Include};

use crate::error::ConfigTransferError;

const SYSTEM_DB_NAMES: &[&str] = &["admin", "local", "config"];

#[derive(Debug, Clone)]
pub struct NamespacePair {
    pub source: String,
    pub target: String,
}

pub async fn discover_namespaces(
    source: &Client,
    includes: &[Include],
) -> Result<Vec<NamespacePair>, ConfigTransferError> {
    if includes.is_empty() {
        return discover_all(source).await;
    }
    let mut pairs = Vec::new();
    for include in includes {
        if let Some(db) = include.namespace.strip_suffix(".*") {
            for coll in list_user_collections(source, db).await? {
                let ns = join_namespace(db, &coll);
                pairs.push(NamespacePair { source: ns.clone(), target: ns });
            }
            continue;
        }
        if include.namespace.starts_with("*.") {
            tracing::warn!(namespace = %include.namespace, "cross-database wildcard include is not expanded by the config phase");
            continue;
        }
        let target = include.target_namespace().to_string();
        pairs.push(NamespacePair { source: include.namespace.clone(), target });
    }
    Ok(pairs)
}

async fn discover_all(source: &Client) -> Result<Vec<NamespacePair>, ConfigTransferError> {
    let mut pairs = Vec::new();
    for db in source.list_database_names().await? {
        if SYSTEM_DB_NAMES.contains(&db.as_str()) {
            continue;
        }
        for coll in list_user_collections(source, &db).await? {
            let ns = join_namespace(&db, &coll);
            pairs.push(NamespacePair { source: ns.clone(), target: ns });
        }
    }
    Ok(pairs)
}

async fn list_user_collections(source: &Client, db: &str) -> Result<Vec<String>, ConfigTransferError> {
    use futures::stream::TryStreamExt;
    let specs = source.database(db).list_collections().await?.try_collect::<Vec<_>>().await?;
    Ok(specs
        .into_iter()
        .filter(|spec| !spec.name.starts_with("system."))
        .map(|spec| spec.name)
        .collect())
}

/// Looks up the source's `config.collections` entry for `ns`, returning its
/// shard key document if the namespace is sharded. Used only to log a
/// warning; chunk/zone recreation is out of scope.
pub async fn sharded_shard_key(source: &Client, ns: &str) -> Option<bson::Document> {
    let doc = source
        .database("config")
        .collection::<bson::Document>("collections")
        .find_one(doc! { "_id": ns, "dropped": { "$ne": true } })
        .await
        .ok()??;
    doc.get_document("key").ok().cloned()
}
