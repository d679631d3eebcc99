//! The captured change-log record and the write-model it translates into.

use bson::{Bson, Document, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
    Command,
    Noop,
}

/// A single captured change record, modeled after a replica set's operation
/// log entry. `query` is the match criterion for updates and deletes;
/// `document` is the new value (insert/update) or command body (command).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OplogEntry {
    #[serde(rename = "op")]
    pub operation: OperationKind,
    #[serde(rename = "ns")]
    pub namespace: String,
    #[serde(rename = "o")]
    pub document: Document,
    #[serde(rename = "o2", default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Document>,
    #[serde(rename = "ts")]
    pub timestamp: Timestamp,
}

impl OplogEntry {
    /// Returns the first top-level key of `document` starting with `$`,
    /// other than `$v` (the update-language version marker), if any.
    pub fn first_modifier_key(&self) -> Option<&str> {
        self.document
            .keys()
            .find(|k| k.starts_with('$') && *k != "$v")
            .map(|s| s.as_str())
    }

    /// For an `applyOps` command entry, decodes the nested operation list.
    pub fn inner_apply_ops(&self) -> Option<Vec<OplogEntry>> {
        let inner = self.document.get_array("applyOps").ok()?;
        let mut out = Vec::with_capacity(inner.len());
        for item in inner {
            if let Bson::Document(doc) = item {
                if let Ok(entry) = bson::from_document::<OplogEntry>(doc.clone()) {
                    out.push(entry);
                }
            }
        }
        Some(out)
    }
}

/// Per-replica-set checkpoint: the last oplog timestamp successfully applied.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Checkpoint {
    pub replica_set_timestamp: Timestamp,
}

/// Tallies returned by the bulk applier for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyCounts {
    pub inserted: u64,
    pub modified: u64,
    pub deleted: u64,
    pub upserted: u64,
}

impl ApplyCounts {
    pub fn total(&self) -> u64 {
        self.inserted + self.modified + self.deleted + self.upserted
    }
}
