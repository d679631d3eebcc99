//! Replays `listIndexes` entries from source to target.
//!
//! Grounded on `original_source/index_copier.go`. The implicit `_id` index
//! is never replayed; a conflicting index definition is logged and skipped
//! rather than failing the whole phase, since an operator re-running
//! `config` after a partial prior run is the expected case.

use futures::stream::TryStreamExt;
use mongodb::{Client, IndexModel};
use neutrino_types::split_namespace;

use crate::discovery::NamespacePair;
use crate::error::ConfigTransferError;

/// `IndexOptionsConflict` / `IndexKeySpecsConflict`.
const CONFLICT_CODES: [i32; 2] = [85, 86];

pub async fn create_indexes(
    source: &Client,
    target: &Client,
    pairs: &[NamespacePair],
) -> Result<u64, ConfigTransferError> {
    let mut created = 0;
    for pair in pairs {
        let (src_db, src_coll) = split_namespace(&pair.source);
        let (dst_db, dst_coll) = split_namespace(&pair.target);

        let source_coll = source.database(&src_db).collection::<bson::Document>(&src_coll);
        let target_coll = target.database(&dst_db).collection::<bson::Document>(&dst_coll);

        let models: Vec<IndexModel> = source_coll
            .list_indexes()
            .await?
            .try_collect::<Vec<_>>()
            .await?
            .into_iter()
            .filter(|model| !is_id_index(model))
            .collect();

        for model in models {
            match target_coll.create_index(model.clone()).await {
                Ok(_) => created += 1,
                Err(err) if command_error_code(&err).is_some_and(|c| CONFLICT_CODES.contains(&c)) => {
                    tracing::warn!(namespace = %pair.target, keys = ?model.keys, "index already exists with different options, skipping");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
    Ok(created)
}

fn is_id_index(model: &IndexModel) -> bool {
    model
        .options
        .as_ref()
        .and_then(|o| o.name.as_deref())
        .is_some_and(|name| name == "_id_")
}

fn command_error_code(err: &mongodb::error::Error) -> Option<i32> {
    match err.kind.as_ref() {
        mongodb::error::ErrorKind::Command(cmd) => Some(cmd.code),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::options::IndexOptions;

    fn model_named(name: &str) -> IndexModel {
        IndexModel::builder()
            .keys(bson::doc! { "a": 1 })
            .options(IndexOptions::builder().name(name.to_string()).build())
            .build()
    }

    #[test]
    fn recognizes_the_id_index_by_name() {
        assert!(is_id_index(&model_named("_id_")));
        assert!(!is_id_index(&model_named("a_1")));
    }

    #[test]
    fn unnamed_index_is_not_the_id_index() {
        let model = IndexModel::builder().keys(bson::doc! { "a": 1 }).build();
        assert!(!is_id_index(&model));
    }
}
