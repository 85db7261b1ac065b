use thiserror::Error;
use crate::common::ContextError;

#[derive(Debug, Clone, Error, Eq, PartialEq)]
/// Errors raised by the data access layer.
pub enum StorageError {
    /// The operation is not provided by this querier. Distinct from an empty result.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("querier is closed")]
    Closed,

    #[error("selection of {requested} samples exceeds the limit of {limit}")]
    TooManySamples { requested: u64, limit: usize },

    #[error("{0}")]
    Context(#[from] ContextError),

    #[error("{0}")]
    General(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Clone, Error, PartialEq)]
/// Errors raised while building or executing a query.
pub enum QueryError {
    #[error("parse error at char {pos}: {msg}")]
    Parse { pos: usize, msg: String },

    #[error("unknown function with name {0:?}")]
    UnknownFunction(String),

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("query processing would load too many samples into memory (limit {0})")]
    TooManySamples(usize),

    #[error("query timed out")]
    Timeout,

    #[error("query was canceled")]
    Canceled,

    #[error("unexpected value type: {0}")]
    UnexpectedValueType(String),
}

impl From<ContextError> for QueryError {
    fn from(value: ContextError) -> Self {
        match value {
            ContextError::Canceled => QueryError::Canceled,
            ContextError::DeadlineExceeded => QueryError::Timeout,
        }
    }
}

pub type QueryResult<T> = Result<T, QueryError>;
