use thiserror::Error;

#[derive(Debug, Error)]
pub enum CopyError {
    #[error("task has no key-range bounds")]
    MissingBounds,
    #[error("mongo error: {0}")]
    Mongo(#[from] mongodb::error::Error),
    #[error("workspace error: {0}")]
    Workspace(#[from] neutrino_workspace::WorkspaceError),
}
