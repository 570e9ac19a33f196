//! Document layer of the Vellum engine.
//!
//! [`Document`] ties the lower crates together: the reader resolves nodes
//! lazily into the cross-reference table, the balancer keeps the page tree
//! flat and balanced, and saves run through an append-only session that the
//! deep flush/release engine can stream into early.
//!
//! The engine's three page-scoped operations share one traversal:
//! `flush_deep` writes and drops, `release_deep` drops without writing, and
//! `append_mode_flush` writes only what changed and releases the rest, so
//! amending one page of a large document touches a bounded number of bytes.

pub mod access;
pub mod config;
pub mod document;
pub mod error;
pub mod flush;

pub use config::DocumentConfig;
pub use document::Document;
pub use error::{DocError, DocResult};
pub use flush::{Engine, FlushMode};
