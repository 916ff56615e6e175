use thiserror::Error;

/// Query construction and subscription failures.
///
/// Construction variants are raised synchronously by the builders and never
/// reach the host.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("Invalid field name: {0}")]
    InvalidField(String),

    #[error("Invalid limit: {0}")]
    InvalidLimit(String),

    #[error("Unknown filter operator '{0}'")]
    UnknownOperator(String),

    #[error("Unknown limit direction '{0}'")]
    UnknownDirection(String),

    #[error("Invalid filter value: {0}")]
    InvalidValue(String),

    #[error("Limit already set on this query")]
    LimitAlreadySet,

    #[error("Query already ordered by '{0}'")]
    DuplicateOrderBy(String),

    #[error("Query already has a {0} cursor")]
    CursorAlreadySet(&'static str),

    #[error("Conflicting filters: {0}")]
    ConflictingFilters(String),

    #[error(transparent)]
    Runtime(#[from] core_runtime::Error),
}

pub type Result<T> = std::result::Result<T, QueryError>;
