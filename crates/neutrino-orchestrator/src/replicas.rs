//! Resolves the set of upstream replica-set tag → connection URI pairs the
//! rest of the core consumes. Full cluster discovery (enumerating a sharded
//! source's shards and parsing their connection strings) is deliberately not
//! implemented here; this is the contract's minimal stand-in for a single
//! replica set, which is the common case this workspace is exercised
//! against directly.

/// A source URI with no `replicaSet` query parameter is tagged `rs0`.
const DEFAULT_TAG: &str = "rs0";

pub fn resolve_replicas(source_uri: &str) -> Vec<(String, String)> {
    let tag = replica_set_tag(source_uri).unwrap_or_else(|| DEFAULT_TAG.to_string());
    vec![(tag, source_uri.to_string())]
}

fn replica_set_tag(uri: &str) -> Option<String> {
    let query = uri.split_once('?')?.1;
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == "replicaSet").then(|| value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_replica_set_from_query_string() {
        let pairs = resolve_replicas("mongodb://host:27017/?replicaSet=rs1");
        assert_eq!(pairs, vec![("rs1".to_string(), "mongodb://host:27017/?replicaSet=rs1".to_string())]);
    }

    #[test]
    fn falls_back_to_default_tag_without_query_param() {
        let pairs = resolve_replicas("mongodb://host:27017/");
        assert_eq!(pairs[0].0, DEFAULT_TAG);
    }
}
