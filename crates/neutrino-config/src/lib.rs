//! Config transfer phase (§4.7): replays collection and index metadata from
//! source to target for every included namespace. Sharding zone/chunk
//! recreation is intentionally not attempted here; a sharded source
//! namespace is only logged, at `warn`, with its detected shard key.

pub mod collections;
pub mod discovery;
pub mod error;
pub mod indexes;

pub use error::ConfigTransferError;

use mongodb::Client;
use neutrino_types::Include;

#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigTransferSummary {
    pub namespaces: u64,
    pub collections_created: u64,
    pub indexes_created: u64,
}

pub async fn transfer_config(
    source: &Client,
    target: &Client,
    includes: &[Include],
) -> Result<ConfigTransferSummary, ConfigTransferError> {
    let pairs = discovery::discover_namespaces(source, includes).await?;
    warn_on_sharded_sources(source, &pairs).await;
    let collections_created = collections::create_collections(source, target, &pairs).await?;
    let indexes_created = indexes::create_indexes(source, target, &pairs).await?;
    Ok(ConfigTransferSummary {
        namespaces: pairs.len() as u64,
        collections_created,
        indexes_created,
    })
}

/// The `index` command: replays only index metadata, skipping
/// `createCollection` entirely.
pub async fn transfer_indexes_only(
    source: &Client,
    target: &Client,
    includes: &[Include],
) -> Result<ConfigTransferSummary, ConfigTransferError> {
    let pairs = discovery::discover_namespaces(source, includes).await?;
    warn_on_sharded_sources(source, &pairs).await;
    let indexes_created = indexes::create_indexes(source, target, &pairs).await?;
    Ok(ConfigTransferSummary {
        namespaces: pairs.len() as u64,
        collections_created: 0,
        indexes_created,
    })
}

async fn warn_on_sharded_sources(source: &Client, pairs: &[discovery::NamespacePair]) {
    for pair in pairs {
        if let Some(key) = discovery::sharded_shard_key(source, &pair.source).await {
            tracing::warn!(
                namespace = %pair.source,
                shard_key = ?key,
                "source namespace is sharded; target sharding/zone/chunk setup is not performed by this phase"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use discovery::NamespacePair;

    const FIXED_MONGO_URL: &str = "mongodb://localhost:27017";

    #[tokio::test]
    async fn replays_collection_and_index_metadata_idempotently() {
        let client = mongodb::Client::with_uri_str(FIXED_MONGO_URL).await.unwrap();
        let src_db = "neutrino_config_test_src";
        let dst_db = "neutrino_config_test_dst";
        client.database(src_db).drop().await.unwrap();
        client.database(dst_db).drop().await.unwrap();

        let src_coll = client.database(src_db).collection::<bson::Document>("widgets");
        src_coll.insert_one(bson::doc! { "_id": 1 }).await.unwrap();
        src_coll
            .create_index(mongodb::IndexModel::builder().keys(bson::doc! { "sku": 1 }).build())
            .await
            .unwrap();

        let pairs = vec![NamespacePair {
            source: format!("{src_db}.widgets"),
            target: format!("{dst_db}.widgets"),
        }];

        let created_colls = collections::create_collections(&client, &client, &pairs).await.unwrap();
        assert_eq!(created_colls, 1);
        let created_idx = indexes::create_indexes(&client, &client, &pairs).await.unwrap();
        assert_eq!(created_idx, 1);

        // Re-running against an already-populated target tolerates the
        // already-exists/conflict codes instead of failing.
        let recreated_colls = collections::create_collections(&client, &client, &pairs).await.unwrap();
        assert_eq!(recreated_colls, 0);
        let recreated_idx = indexes::create_indexes(&client, &client, &pairs).await.unwrap();
        assert_eq!(recreated_idx, 0);

        client.database(src_db).drop().await.unwrap();
        client.database(dst_db).drop().await.unwrap();
    }
}
