//! Object and reference model for Vellum.
//!
//! A Vellum document is a graph of typed nodes. Composite nodes (arrays,
//! dictionaries, streams) own their direct children by value and relate to
//! other nodes through *indirect references*: `(object number, generation)`
//! pairs resolved through the document's cross-reference table. The table
//! owns every indirect node by number, so the ownership structure stays a
//! DAG even though the reference structure is cyclic.
//!
//! # Node Kinds
//!
//! [`Object`] is a closed tagged union over the ten node kinds:
//! null, boolean, integer, real, literal, name, string, array, dictionary,
//! stream, and indirect reference. Every use site matches exhaustively.
//!
//! # Lifecycle
//!
//! Each indirect node moves through the validated [`Lifecycle`] state
//! machine: unresolved entries become `Reading` while their bytes are
//! parsed (guarding self-reference), then `Resolved`; mutation marks them
//! `Modified`; the writer retires them to `Flushed` and the release path
//! retires them to `Released`, from which they can be re-read later.
//! Illegal transitions are rejected with a typed error.

pub mod error;
pub mod lifecycle;
pub mod name;
pub mod object;
pub mod reference;
pub mod services;
pub mod stream;

pub use error::{ObjectError, ObjectResult};
pub use lifecycle::Lifecycle;
pub use name::Name;
pub use object::{Dictionary, Object, ObjectKind, StringKind};
pub use reference::ObjRef;
pub use services::{CryptProvider, FilterService, NoopCrypt};
pub use stream::Stream;
