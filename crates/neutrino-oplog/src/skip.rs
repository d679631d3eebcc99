//! The oplog-level skip predicate (§4.5 "Skip rules").
//!
//! A `SkipPredicate` trait stands in for the inclusion rule so this crate
//! never depends on the orchestrator directly, breaking what would
//! otherwise be a follower-to-orchestrator-and-back dependency cycle.

use neutrino_types::{join_namespace, split_namespace, IncludeSet, OperationKind, OplogEntry};

pub trait SkipPredicate: Send + Sync {
    fn skip(&self, namespace: &str) -> bool;
}

impl SkipPredicate for IncludeSet {
    fn skip(&self, namespace: &str) -> bool {
        IncludeSet::skip(self, namespace)
    }
}

/// Applies the full command-aware skip predicate to one captured record.
pub fn should_skip(entry: &OplogEntry, predicate: &dyn SkipPredicate) -> bool {
    if entry.namespace.is_empty() {
        return true;
    }
    let (db, coll) = split_namespace(&entry.namespace);
    if db.is_empty() || db == "local" || db == "config" {
        return true;
    }
    if entry.operation != OperationKind::Command || coll != "$cmd" {
        return predicate.skip(&entry.namespace);
    }
    for (key, value) in entry.document.iter() {
        match key.as_str() {
            "dropDatabase" => return predicate.skip(&format!("{db}.*")),
            "create" | "createIndexes" | "drop" | "renameCollection" => {
                return match value.as_str() {
                    Some(target_coll) => predicate.skip(&join_namespace(&db, target_coll)),
                    None => false,
                };
            }
            "applyOps" => {
                return match entry.inner_apply_ops().and_then(|inner| inner.into_iter().next()) {
                    Some(first) => predicate.skip(&first.namespace),
                    None => false,
                };
            }
            _ => continue,
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, Timestamp};

    fn entry(ns: &str, op: OperationKind, document: bson::Document) -> OplogEntry {
        OplogEntry {
            operation: op,
            namespace: ns.to_string(),
            document,
            query: None,
            timestamp: Timestamp { time: 1, increment: 0 },
        }
    }

    #[test]
    fn drops_local_and_config_namespaces() {
        let set = IncludeSet::default();
        assert!(should_skip(&entry("local.oplog.rs", OperationKind::Insert, doc! {}), &set));
        assert!(should_skip(&entry("config.chunks", OperationKind::Insert, doc! {}), &set));
    }

    #[test]
    fn keeps_unknown_commands() {
        let set = IncludeSet::new(&[neutrino_types::Include { namespace: "db1.a".into(), ..Default::default() }]);
        let e = entry("db1.$cmd", OperationKind::Command, doc! { "collMod": "a" });
        assert!(!should_skip(&e, &set));
    }

    #[test]
    fn drop_database_consults_wildcard_form() {
        let set = IncludeSet::new(&[neutrino_types::Include { namespace: "db1.*".into(), ..Default::default() }]);
        let kept = entry("db1.$cmd", OperationKind::Command, doc! { "dropDatabase": 1 });
        assert!(!should_skip(&kept, &set));
        let dropped = entry("db2.$cmd", OperationKind::Command, doc! { "dropDatabase": 1 });
        assert!(should_skip(&dropped, &set));
    }

    #[test]
    fn create_consults_target_collection_in_same_db() {
        let set = IncludeSet::new(&[neutrino_types::Include { namespace: "db1.keep".into(), ..Default::default() }]);
        let kept = entry("db1.$cmd", OperationKind::Command, doc! { "create": "keep" });
        assert!(!should_skip(&kept, &set));
        let dropped = entry("db1.$cmd", OperationKind::Command, doc! { "create": "other" });
        assert!(should_skip(&dropped, &set));
    }
}
