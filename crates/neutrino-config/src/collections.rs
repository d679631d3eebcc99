//! Replays `listCollections` entries from source to target.
//!
//! Grounded on `original_source/collection_creator.go`: one idempotent
//! `createCollection` per non-system collection, tolerating "already exists"
//! so a re-run after a partial prior pass is a no-op rather than a failure.
//! Collection-level options (capped size, validators, collation) are not
//! replayed; only the namespace itself is recreated so index and data
//! copy have somewhere to land. Views are skipped and logged.

use futures::stream::TryStreamExt;
use mongodb::Client;
use neutrino_types::split_namespace;

use crate::discovery::NamespacePair;
use crate::error::ConfigTransferError;

/// `NamespaceExists`, returned when `create_collection` targets a name that
/// is already present.
const NAMESPACE_EXISTS_CODE: i32 = 48;

pub async fn create_collections(
    source: &Client,
    target: &Client,
    pairs: &[NamespacePair],
) -> Result<u64, ConfigTransferError> {
    let mut created = 0;
    for pair in pairs {
        let (src_db, src_coll) = split_namespace(&pair.source);
        let (dst_db, dst_coll) = split_namespace(&pair.target);

        let specs = source.database(&src_db).list_collections().await?.try_collect::<Vec<_>>().await?;
        let spec = specs.into_iter().find(|spec| spec.name == src_coll);
        let Some(spec) = spec else {
            tracing::warn!(namespace = %pair.source, "source collection vanished before config phase read it");
            continue;
        };

        if spec.collection_type == mongodb::options::CollectionType::View {
            tracing::warn!(namespace = %pair.source, "source namespace is a view; view definitions are not replayed by this phase");
            continue;
        }

        match target.database(&dst_db).create_collection(&dst_coll).await {
            Ok(()) => created += 1,
            Err(err) if command_error_code(&err) == Some(NAMESPACE_EXISTS_CODE) => {
                tracing::debug!(namespace = %pair.target, "collection already exists on target");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(created)
}

fn command_error_code(err: &mongodb::error::Error) -> Option<i32> {
    match err.kind.as_ref() {
        mongodb::error::ErrorKind::Command(cmd) => Some(cmd.code),
        _ => None,
    }
}
