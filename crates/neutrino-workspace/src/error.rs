use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("workspace is not configured: {0}")]
    NotConfigured(&'static str),
    #[error("mongo operation failed: {0}")]
    Mongo(#[from] mongodb::error::Error),
    #[error("no matched task updated for id {0}")]
    NoMatchedTask(bson::oid::ObjectId),
    #[error("no matched parent task updated for id {0}")]
    NoMatchedParent(bson::oid::ObjectId),
    #[error("invalid lease window {0:?}: must be negative")]
    InvalidLeaseWindow(chrono::Duration),
    #[error("failed to clean up spool directory {path}: {source}")]
    SpoolCleanup {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("bson decode failed: {0}")]
    BsonDeserialize(#[from] bson::de::Error),
    #[error("bson encode failed: {0}")]
    BsonSerialize(#[from] bson::ser::Error),
}

pub type Result<T> = std::result::Result<T, WorkspaceError>;
