use thiserror::Error;

use vellum_container::ContainerError;
use vellum_object::ObjectError;
use vellum_pages::PagesError;
use vellum_reader::ReadError;
use vellum_writer::WriteError;
use vellum_xref::XrefError;

pub type DocResult<T> = Result<T, DocError>;

/// Top-level errors of the document layer.
#[derive(Debug, Error)]
pub enum DocError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Read(#[from] ReadError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error(transparent)]
    Xref(#[from] XrefError),

    #[error(transparent)]
    Pages(#[from] PagesError),

    #[error(transparent)]
    Object(#[from] ObjectError),

    #[error(transparent)]
    Container(#[from] ContainerError),

    /// Flush-style call or in-place save on a document with no write target.
    #[error("document is read-only; it has no write target")]
    ReadOnly,

    /// Append save against an instance whose index could not be trusted,
    /// or which has no prior revision to append to.
    #[error("append-mode save is not allowed for this document: {0}")]
    AppendForbidden(&'static str),

    #[error("the catalog has no /Pages entry")]
    MissingPages,

    /// A save with a different mode already has objects staged.
    #[error("a save with a different mode is already in progress")]
    SaveConflict,

    #[error("document is closed")]
    Closed,
}
