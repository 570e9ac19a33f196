use thiserror::Error;

use vellum_object::ObjRef;

pub type ContainerResult<T> = Result<T, ContainerError>;

/// Errors produced while building or decoding object-stream containers.
#[derive(Debug, Error, PartialEq)]
pub enum ContainerError {
    #[error("streams cannot be container members ({0})")]
    StreamMember(ObjRef),

    #[error("container members must have generation 0 ({0})")]
    NonZeroGeneration(ObjRef),

    #[error("container is full ({max} members)")]
    Full { max: usize },

    #[error("corrupt container at position {position}: {reason}")]
    Corrupt { position: usize, reason: String },

    #[error("object {number} is not a member of this container")]
    NotAMember { number: u32 },

    #[error("filter failed: {0}")]
    Filter(String),
}
