use thiserror::Error;

use vellum_container::ContainerError;
use vellum_object::ObjectError;
use vellum_xref::XrefError;

pub type ReadResult<T> = Result<T, ReadError>;

/// Errors produced while reading a document.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("not a vellum document (missing %vellum header)")]
    NotAVellumFile,

    #[error("no startxref marker in the trailing window")]
    MissingStartxref,

    #[error("malformed index section at offset {offset}: {reason}")]
    MalformedIndex { offset: u64, reason: String },

    #[error("unexpected token at byte {position}: {found}")]
    UnexpectedToken { position: usize, found: String },

    #[error("unexpected end of input at byte {position}")]
    UnexpectedEof { position: usize },

    #[error("object {number} not found at its recorded offset (found {found})")]
    HeaderMismatch { number: u32, found: String },

    #[error("object {0} is not in the table")]
    UnknownObject(u32),

    #[error("rebuild scan found no usable trailer")]
    RebuildFailed,

    #[error("filter failed: {0}")]
    Filter(String),

    #[error("decryption failed for object {number}: {reason}")]
    Crypt { number: u32, reason: String },

    #[error(transparent)]
    Object(#[from] ObjectError),

    #[error(transparent)]
    Xref(#[from] XrefError),

    #[error(transparent)]
    Container(#[from] ContainerError),
}
