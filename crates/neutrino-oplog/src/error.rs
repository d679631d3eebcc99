use thiserror::Error;

#[derive(Debug, Error)]
pub enum OplogError {
    #[error("mongo error: {0}")]
    Mongo(#[from] mongodb::error::Error),
    #[error("workspace error: {0}")]
    Workspace(#[from] neutrino_workspace::WorkspaceError),
    #[error("spool io error at {path}: {source}")]
    SpoolIo {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("bson decode failed: {0}")]
    BsonDeserialize(#[from] bson::de::Error),
    #[error("bson encode failed: {0}")]
    BsonSerialize(#[from] bson::ser::Error),
}
