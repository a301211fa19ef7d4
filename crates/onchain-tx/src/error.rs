use thiserror::Error;

/// Errors produced by the transaction engine.
///
/// Only `Build` and `Validation` indicate a defect in this crate or its
/// caller; everything else is an expected, user-recoverable condition.
#[derive(Debug, Error)]
pub enum TxError {
    #[error("insufficient funds: have {available} sat, need {required} sat")]
    InsufficientFunds { available: u64, required: u64 },

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("transaction build error: {0}")]
    Build(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
}

impl TxError {
    /// Whether the user can retry after correcting input, adding funds, or
    /// re-authenticating. `Build`/`Validation` failures are defect-class and
    /// abort the whole send attempt instead.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, TxError::Build(_) | TxError::Validation(_))
    }
}

/// Pre-broadcast validation failures. Any of these blocks broadcast.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("failed to decode transaction: {0}")]
    Decode(String),

    #[error("transaction does not match draft: {0}")]
    DraftMismatch(String),

    #[error("input {outpoint} referenced more than once")]
    DuplicateInput { outpoint: String },

    #[error("input {index} carries no signature")]
    MissingSignature { index: usize },

    #[error("output {index} is dust: {value} sat <= threshold {threshold} sat")]
    DustOutput {
        index: usize,
        value: u64,
        threshold: u64,
    },

    #[error("value not conserved: inputs {input_total} sat, outputs {output_total} sat, expected fee {expected_fee} sat")]
    ValueMismatch {
        input_total: u64,
        output_total: u64,
        expected_fee: u64,
    },

    #[error("transaction weight {weight} exceeds relay limit {limit}")]
    OversizedTransaction { weight: u64, limit: u64 },
}
