use thiserror::Error;

use crate::lifecycle::Lifecycle;
use crate::reference::ObjRef;

/// Convenience alias used throughout the object model.
pub type ObjectResult<T> = Result<T, ObjectError>;

/// Errors produced by object-model operations.
#[derive(Debug, Error, PartialEq)]
pub enum ObjectError {
    #[error("illegal lifecycle transition {from:?} -> {to:?} for object {reference}")]
    IllegalTransition {
        reference: ObjRef,
        from: Lifecycle,
        to: Lifecycle,
    },

    #[error("expected {expected} value, got {actual}")]
    KindMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("required key /{0} is missing")]
    MissingKey(String),
}
