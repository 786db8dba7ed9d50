use derive_more::Display;
use formulary_core::{
    config::ConfigError,
    error::{ErrorClass, ErrorOrigin as CoreErrorOrigin, InternalError},
    transaction::TransactionError,
};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

///
/// Error
/// Public error type with a stable kind + origin taxonomy.
///

#[derive(Debug, Deserialize, Serialize, ThisError)]
#[error("{message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub origin: ErrorOrigin,
    pub message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            kind,
            origin,
            message: message.into(),
        }
    }
}

impl From<InternalError> for Error {
    fn from(err: InternalError) -> Self {
        let kind = match err.class {
            ErrorClass::MissingContext => ErrorKind::Query(QueryErrorKind::MissingEntities),
            ErrorClass::Unsupported => ErrorKind::Query(QueryErrorKind::Unsupported),
            ErrorClass::OutOfRange => ErrorKind::Query(QueryErrorKind::Invalid),
            ErrorClass::Conflict => ErrorKind::Conflict,
            ErrorClass::Config => ErrorKind::Config,
            ErrorClass::InvariantViolation | ErrorClass::Internal => ErrorKind::Internal,
        };

        Self::new(kind, err.origin.into(), err.message)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Self::new(ErrorKind::Config, ErrorOrigin::Config, err.to_string())
    }
}

impl From<TransactionError> for Error {
    fn from(err: TransactionError) -> Self {
        InternalError::from(err).into()
    }
}

///
/// ErrorKind
/// Public error taxonomy for callers.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ErrorKind {
    Query(QueryErrorKind),

    /// Engine configuration was rejected.
    Config,

    /// A transaction was marked rollback-only and could not commit.
    Conflict,

    /// The caller cannot remediate this.
    Internal,
}

///
/// QueryErrorKind
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum QueryErrorKind {
    /// An entity filter had no prefetched entities to evaluate over, and no
    /// candidate set bounded the query to fetch them.
    MissingEntities,

    /// The query asked a structure for an operation it does not support.
    Unsupported,

    /// Query arguments are out of range.
    Invalid,
}

///
/// ErrorOrigin
/// Public origin taxonomy for callers.
///

#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
pub enum ErrorOrigin {
    Bitmap,
    Cache,
    Config,
    Formula,
    Prefetch,
    Query,
    Transaction,
}

impl From<CoreErrorOrigin> for ErrorOrigin {
    fn from(origin: CoreErrorOrigin) -> Self {
        match origin {
            CoreErrorOrigin::Bitmap => Self::Bitmap,
            CoreErrorOrigin::Cache => Self::Cache,
            CoreErrorOrigin::Config => Self::Config,
            CoreErrorOrigin::Formula => Self::Formula,
            CoreErrorOrigin::Prefetch => Self::Prefetch,
            CoreErrorOrigin::Query => Self::Query,
            CoreErrorOrigin::Transaction => Self::Transaction,
        }
    }
}
