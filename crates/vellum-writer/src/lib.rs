//! Writer half of the Vellum engine.
//!
//! The writer is strictly append-only: a [`SaveSession`] owns a single
//! forward cursor, and in append mode every byte it produces lands after
//! the original file's length — original bytes are never rewritten, which
//! is what makes incremental update cheap and safe.
//!
//! Per object the session decides to *inline-write* (`n g obj ... endobj`),
//! *batch* (queue into an object-stream container when the compressed
//! write style is active), or *skip* (append mode, unmodified). The index
//! closes the revision: a legacy text table, a stream-style section, or
//! both for hybrid sources.

pub mod error;
pub mod id;
pub mod serialize;
pub mod session;

pub use error::{WriteError, WriteResult};
pub use id::refresh_id;
pub use serialize::{serialize_object, serialized};
pub use session::{SaveMode, SaveSession, TrailerInfo, WriteStyle};
