//! Reader half of the Vellum engine.
//!
//! Opening a document locates the closing `startxref` marker, walks the
//! `prev`-linked chain of index sections (legacy table, stream-style, or
//! hybrid), and fills the cross-reference table with *unresolved* entries.
//! Objects load lazily: the first access parses the bytes at the recorded
//! offset (or expands the owning container), caches the node in its slot,
//! and leaves children as unresolved references.
//!
//! # Recovery
//!
//! Two fallbacks, bounded by "which strategy remains" rather than retry
//! loops:
//!
//! - **fix** — an object's recorded offset does not hold its header: rescan
//!   the whole file for headers, patch only the offsets, retry that one
//!   read once.
//! - **rebuild** — any failure walking index sections: linear scan for
//!   `<n> <g> obj` headers (highest generation wins) and for a standalone
//!   trailer carrying `/Root`.
//!
//! Both set a sticky flag that forbids append-mode saves for the rest of
//! the instance, since the original index could not be trusted.

pub mod error;
pub mod parse;
pub mod reader;
pub mod recovery;
pub mod source;
pub mod tokenizer;
pub mod xref_parse;

pub use error::{ReadError, ReadResult};
pub use parse::{parse_at, parse_indirect_at, Parser};
pub use reader::DocumentReader;
pub use source::ByteSource;
pub use tokenizer::{Token, Tokenizer};
