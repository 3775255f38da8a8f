use thiserror::Error;

use ledgerd_store::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Whether a retry from the top of the transaction can succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(self, EngineError::Store(e) if e.is_retriable())
    }
}
