//! Namespace parsing and the inclusion predicate used throughout the pipeline.

use serde::{Deserialize, Serialize};

/// Splits a `database.collection` namespace into its two parts.
///
/// A bare database name with no collection (`"db"`) returns an empty
/// collection part, matching the "whole database" shorthand accepted
/// by include rules.
pub fn split_namespace(ns: &str) -> (String, String) {
    match ns.split_once('.') {
        Some((db, coll)) => (db.to_string(), coll.to_string()),
        None => (ns.to_string(), String::new()),
    }
}

pub fn join_namespace(db: &str, coll: &str) -> String {
    format!("{db}.{coll}")
}

/// One entry of the `includes` configuration list: a source namespace,
/// an optional server-side filter, and optional masking/rename knobs.
///
/// `masks`/`method`/`limit` are carried through for config round-trip
/// compatibility; the masking transform itself is out of scope here and is
/// never applied to copied documents.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Include {
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<bson::Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub masks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

impl Include {
    pub fn target_namespace(&self) -> &str {
        self.to.as_deref().unwrap_or(&self.namespace)
    }
}

/// Evaluates the inclusion predicate described in §4.5 of the specification:
/// "no includes declared" never skips; otherwise a namespace is kept if any
/// of `db.coll`, `db.*`, `*.coll` appears in the include set.
#[derive(Debug, Clone, Default)]
pub struct IncludeSet {
    namespaces: std::collections::HashSet<String>,
}

impl IncludeSet {
    pub fn new(includes: &[Include]) -> Self {
        let namespaces = includes
            .iter()
            .map(|inc| inc.namespace.clone())
            .collect();
        Self { namespaces }
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }

    /// Returns true if `namespace` should be skipped (not migrated).
    pub fn skip(&self, namespace: &str) -> bool {
        if self.namespaces.is_empty() {
            return false;
        }
        let (db, coll) = split_namespace(namespace);
        let all_colls_in_db = format!("{db}.*");
        let coll_in_all_dbs = format!("*.{coll}");
        !(self.namespaces.contains(namespace)
            || self.namespaces.contains(&all_colls_in_db)
            || self.namespaces.contains(&coll_in_all_dbs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_namespace() {
        assert_eq!(split_namespace("db1.a"), ("db1".into(), "a".into()));
        assert_eq!(split_namespace("db1"), ("db1".into(), "".into()));
    }

    #[test]
    fn empty_include_set_never_skips() {
        let set = IncludeSet::default();
        assert!(!set.skip("db1.a"));
    }

    #[test]
    fn include_set_matches_wildcards() {
        let includes = vec![Include {
            namespace: "db1.*".into(),
            ..Default::default()
        }];
        let set = IncludeSet::new(&includes);
        assert!(!set.skip("db1.a"));
        assert!(set.skip("db2.a"));
    }

    #[test]
    fn include_set_matches_exact_and_cross_db_wildcard() {
        let includes = vec![Include {
            namespace: "*.a".into(),
            ..Default::default()
        }];
        let set = IncludeSet::new(&includes);
        assert!(!set.skip("db1.a"));
        assert!(set.skip("db1.b"));
    }
}
