use crate::{
    bitmap::BitmapError, config::ConfigError, formula::FormulaError,
    transaction::TransactionError,
};
use derive_more::Display;
use thiserror::Error as ThisError;

///
/// InternalError
///
/// Structured runtime error with a stable internal classification.
/// Not a stable API; intended for internal use and may change without notice.
///

#[derive(Debug, ThisError)]
#[error("{message}")]
pub struct InternalError {
    pub class: ErrorClass,
    pub origin: ErrorOrigin,
    pub message: String,

    /// Optional structured error detail.
    /// The variant (if present) must correspond to `origin`.
    pub detail: Option<ErrorDetail>,
}

impl InternalError {
    /// Construct an InternalError without structured detail.
    pub fn new(class: ErrorClass, origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            class,
            origin,
            message: message.into(),
            detail: None,
        }
    }

    /// Construct a transaction-origin conflict error.
    pub(crate) fn transaction_conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Conflict, ErrorOrigin::Transaction, message)
    }

    /// Construct a query-origin internal error (entity fetch collaborator failures).
    pub fn query_internal(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Internal, ErrorOrigin::Query, message)
    }

    /// Construct a config-origin error.
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Config, ErrorOrigin::Config, message)
    }

    /// True when the planner may recover by prefetching entities and retrying.
    #[must_use]
    pub const fn is_missing_context(&self) -> bool {
        matches!(self.class, ErrorClass::MissingContext)
    }

    #[must_use]
    pub fn display_with_class(&self) -> String {
        format!("{}:{}: {}", self.origin, self.class, self.message)
    }
}

///
/// ErrorDetail
///
/// Structured, origin-specific error detail carried by [`InternalError`].
///

#[derive(Debug, ThisError)]
pub enum ErrorDetail {
    #[error("{0}")]
    Bitmap(BitmapError),
    #[error("{0}")]
    Formula(FormulaError),
}

impl From<BitmapError> for InternalError {
    fn from(err: BitmapError) -> Self {
        let class = match err {
            BitmapError::Unsupported { .. } => ErrorClass::Unsupported,
            BitmapError::IndexOutOfRange { .. } | BitmapError::InvalidRange { .. } => {
                ErrorClass::OutOfRange
            }
        };

        Self {
            class,
            origin: ErrorOrigin::Bitmap,
            message: err.to_string(),
            detail: Some(ErrorDetail::Bitmap(err)),
        }
    }
}

impl From<FormulaError> for InternalError {
    fn from(err: FormulaError) -> Self {
        let (class, origin) = match &err {
            FormulaError::Immutable { .. } => (ErrorClass::Unsupported, ErrorOrigin::Formula),
            FormulaError::InnerFormulaArity { .. } | FormulaError::NotInitialized { .. } => {
                (ErrorClass::InvariantViolation, ErrorOrigin::Formula)
            }
            FormulaError::MissingContext { .. } => {
                (ErrorClass::MissingContext, ErrorOrigin::Prefetch)
            }
            FormulaError::Bitmap(inner) => {
                return inner.clone().into();
            }
            FormulaError::EntityFetch(_) => (ErrorClass::Internal, ErrorOrigin::Query),
        };

        Self {
            class,
            origin,
            message: err.to_string(),
            detail: Some(ErrorDetail::Formula(err)),
        }
    }
}

impl From<TransactionError> for InternalError {
    fn from(err: TransactionError) -> Self {
        match err {
            TransactionError::RollbackOnly { .. } => Self::transaction_conflict(err.to_string()),
        }
    }
}

impl From<ConfigError> for InternalError {
    fn from(err: ConfigError) -> Self {
        Self::config(err.to_string())
    }
}

///
/// ErrorClass
/// Internal error taxonomy for runtime classification.
/// Not a stable API; may change without notice.
///

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum ErrorClass {
    #[display("unsupported")]
    Unsupported,
    #[display("invariant_violation")]
    InvariantViolation,
    #[display("out_of_range")]
    OutOfRange,
    #[display("missing_context")]
    MissingContext,
    #[display("conflict")]
    Conflict,
    #[display("internal")]
    Internal,
    #[display("config")]
    Config,
}

///
/// ErrorOrigin
/// Internal origin taxonomy for runtime classification.
/// Not a stable API; may change without notice.
///

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum ErrorOrigin {
    #[display("bitmap")]
    Bitmap,
    #[display("transaction")]
    Transaction,
    #[display("formula")]
    Formula,
    #[display("cache")]
    Cache,
    #[display("prefetch")]
    Prefetch,
    #[display("query")]
    Query,
    #[display("config")]
    Config,
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmap_unsupported_maps_to_unsupported_class() {
        let err: InternalError = BitmapError::Unsupported {
            operation: "remove",
            bitmap: "ArrayBitmap",
        }
        .into();

        assert_eq!(err.class, ErrorClass::Unsupported);
        assert_eq!(err.origin, ErrorOrigin::Bitmap);
        assert!(matches!(err.detail, Some(ErrorDetail::Bitmap(_))));
    }

    #[test]
    fn missing_context_is_flagged_recoverable() {
        let err: InternalError = FormulaError::MissingContext {
            formula: "EntityFilterFormula",
            reason: "entities were not prefetched".to_string(),
        }
        .into();

        assert!(err.is_missing_context());
        assert_eq!(err.origin, ErrorOrigin::Prefetch);
        assert_eq!(
            err.display_with_class(),
            format!("prefetch:missing_context: {}", err.message)
        );
    }

    #[test]
    fn out_of_range_bitmap_error_keeps_bitmap_origin_through_formula_error() {
        let err: InternalError = FormulaError::Bitmap(BitmapError::IndexOutOfRange {
            index: 4,
            len: 2,
        })
        .into();

        assert_eq!(err.class, ErrorClass::OutOfRange);
        assert_eq!(err.origin, ErrorOrigin::Bitmap);
    }
}
