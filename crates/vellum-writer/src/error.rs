use thiserror::Error;

use vellum_container::ContainerError;
use vellum_object::ObjectError;
use vellum_xref::XrefError;

pub type WriteResult<T> = Result<T, WriteError>;

/// Errors produced while writing a document.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("object {0} is not loaded; a full save requires every live object in memory")]
    NotLoaded(u32),

    #[error("encryption failed for object {number}: {reason}")]
    Crypt { number: u32, reason: String },

    #[error("filter failed: {0}")]
    Filter(String),

    #[error(transparent)]
    Object(#[from] ObjectError),

    #[error(transparent)]
    Xref(#[from] XrefError),

    #[error(transparent)]
    Container(#[from] ContainerError),
}
