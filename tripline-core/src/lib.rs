pub mod payment;
pub mod signature;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("Line items total {actual} does not match amount {expected}")]
    Reconciliation { expected: i64, actual: i64 },
    #[error("Signature error: {0}")]
    SignatureError(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
