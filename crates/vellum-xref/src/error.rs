use thiserror::Error;

use vellum_object::{ObjRef, ObjectError};

pub type XrefResult<T> = Result<T, XrefError>;

/// Errors produced by cross-reference table operations.
#[derive(Debug, Error, PartialEq)]
pub enum XrefError {
    #[error("capacity policy rejected growth to {requested} slots")]
    CapacityExceeded { requested: usize },

    #[error("object number {0} is not in the table")]
    UnknownNumber(u32),

    #[error("generation mismatch for object {number}: table has {expected}, caller passed {actual}")]
    GenerationMismatch {
        number: u32,
        expected: u16,
        actual: u16,
    },

    #[error("slot 0 is reserved for the free-list head")]
    SlotZeroReserved,

    #[error("object {0} is already free")]
    AlreadyFree(ObjRef),

    #[error("free list is cyclic at object number {0}")]
    CyclicFreeList(u32),

    #[error(transparent)]
    Object(#[from] ObjectError),
}
