use thiserror::Error;

use crate::model::Operation;

pub const INVALID_NUMBERS: &str = "Invalid input: Both parameters must be numbers";
pub const MISSING_PARAMETERS: &str =
    "Invalid or missing parameters: num1, num2, and operation are required";

/// Failures of the underlying record store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt log entry at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },

    #[error("poisoned lock: {0}")]
    LockPoisoned(&'static str),

    #[error("store task failed: {0}")]
    Task(String),
}

/// Everything a calculation or history request can fail with.
#[derive(Error, Debug)]
pub enum CalcError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Unsupported operation: {0}")]
    UnknownOperation(String),

    #[error("Division by zero is not allowed")]
    DivisionByZero,

    #[error("Modulo by zero is not allowed")]
    ModuloByZero,

    #[error("Result of {operation} is not a finite number")]
    NonFiniteResult { operation: Operation },

    #[error("Calculation not found")]
    NotFound(String),

    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),
}

impl CalcError {
    /// Errors caused by the request itself. These are detected before the
    /// store is touched and must never be retried.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, CalcError::NotFound(_) | CalcError::Persistence(_))
    }
}
