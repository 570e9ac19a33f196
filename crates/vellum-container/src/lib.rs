//! Object-stream containers.
//!
//! A container batches small indirect objects into a single compressed
//! stream. The decoded body is an index of `"<number> <offset> "` pairs
//! followed by the member objects themselves; the stream dictionary carries
//! `/Type /ObjStm`, the member count `/N`, and `/First`, the byte offset of
//! the first member within the decoded body. Members are addressed by
//! `(container number, position)` instead of a file byte offset.
//!
//! # Invariants
//!
//! - A member cannot itself be a stream.
//! - Members carry generation 0 (a reused number can never sit in a
//!   container written by an earlier revision).
//! - A member is never flushed independently of its container.

pub mod builder;
pub mod error;
pub mod filters;
pub mod reader;

pub use builder::{ContainerBuilder, DEFAULT_MAX_MEMBERS};
pub use error::{ContainerError, ContainerResult};
pub use filters::StandardFilters;
pub use reader::ContainerReader;
