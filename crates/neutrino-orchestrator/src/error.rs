use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("mongo error: {0}")]
    Mongo(#[from] mongodb::error::Error),
    #[error("workspace error: {0}")]
    Workspace(#[from] neutrino_workspace::WorkspaceError),
    #[error("splitter error: {0}")]
    Split(#[from] neutrino_splitter::SplitError),
    #[error("config transfer error: {0}")]
    ConfigTransfer(#[from] neutrino_config::ConfigTransferError),
    #[error("oplog error: {0}")]
    Oplog(#[from] neutrino_oplog::OplogError),
    #[error("balancer is enabled on the {0} cluster; disable it before migrating")]
    BalancerEnabled(&'static str),
}
