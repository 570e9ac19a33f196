//! Cross-reference table for Vellum.
//!
//! The table is a growable array indexed by object number. A slot is a live
//! entry (an offset into the source, or a position inside an object-stream
//! container), a lazily-filled hole, or a member of the *free list*: an
//! intrusive singly-linked list of reusable numbers threaded through the
//! slots' offset fields and terminated at slot 0.
//!
//! # Invariants
//!
//! - Slot 0 is always free, at maximum generation, and heads the free list.
//! - A freed number's generation strictly increases until it saturates,
//!   after which the number is retired from reuse.
//! - The table owns every indirect node by number; composite nodes relate
//!   to each other only through references resolved here.
//!
//! Growth doubles the backing array, guarded by an injectable
//! [`CapacityPolicy`] so a maliciously large object-number claim cannot
//! exhaust memory.

pub mod entry;
pub mod error;
pub mod policy;
pub mod section;
pub mod table;

pub use entry::{Location, XrefEntry};
pub use error::{XrefError, XrefResult};
pub use policy::{CappedCapacity, CapacityPolicy, UnlimitedCapacity};
pub use section::{binary_rows, contiguous_runs, read_field, text_record, tuple_widths, IndexRow};
pub use table::XrefTable;
