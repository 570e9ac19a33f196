//! Page-tree balancer.
//!
//! The balancer keeps a flat list of page leaves plus one span per parent
//! node recording `(first_leaf, leaf_count)`, so page lookup by index is a
//! binary search over cumulative counts instead of a tree descent. In
//! memory the tree is held in a normalized two-level shape, root over
//! leaf-parents over leaves; [`tree::PageTree::generate_tree`] regroups the
//! parents bottom-up into a balanced deep tree when the document is
//! written.
//!
//! Node storage is behind the [`NodeAccess`] seam so the balancer never
//! touches the cross-reference table or the loader directly.

pub mod access;
pub mod error;
pub mod tree;

pub use access::NodeAccess;
pub use error::{PagesError, PagesResult};
pub use tree::{PageTree, DEFAULT_FAN_OUT};
