use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigTransferError {
    #[error("mongo error: {0}")]
    Mongo(#[from] mongodb::error::Error),
}
