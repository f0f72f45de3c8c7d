use adpilot_core::ledger::LedgerError;
use thiserror::Error;

pub mod ledger;

pub use ledger::SqlChangeLedger;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for LedgerError {
    fn from(value: RepositoryError) -> Self {
        LedgerError::Storage(value.to_string())
    }
}
