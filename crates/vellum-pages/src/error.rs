use thiserror::Error;

pub type PagesResult<T> = Result<T, PagesError>;

/// Errors raised while reading or reshaping the page tree.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PagesError {
    #[error("page index {index} out of range ({count} pages)")]
    OutOfRange { index: usize, count: usize },

    #[error("pages node {0} has no /Kids array")]
    MissingKids(u32),

    #[error("kid of pages node {0} is not a reference")]
    KidNotReference(u32),

    #[error("node {0} is neither /Page nor /Pages")]
    UnknownNodeType(u32),

    #[error("cycle through pages node {0}")]
    TreeCycle(u32),

    #[error("node access failed: {0}")]
    Node(String),
}
