use crate::error::{ObjectError, ObjectResult};
use crate::reference::ObjRef;

/// Lifecycle state of an indirect object slot.
///
/// ```text
///            Unresolved --> Reading --> Resolved --> Modified
///                               ^          |  \          \
///                               |          |   \          +--> Flushed
///                               |          |    +--> Flushed
///                               +---- Released <--+
/// ```
///
/// `Flushed` is terminal: the node has been serialized and dropped.
/// `Released` is terminal for the in-memory instance but re-readable:
/// the node was dropped unwritten and can be parsed again from the source.
/// `Free` slots sit outside the cycle until their number is reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// Slot known from the index but never loaded.
    Unresolved,
    /// Bytes are being parsed right now; a self-reference resolves to null.
    Reading,
    /// Loaded and unchanged relative to the source.
    Resolved,
    /// Mutated (or freshly created); must be written on save.
    Modified,
    /// Serialized to output and dropped from memory. Terminal.
    Flushed,
    /// Dropped from memory unwritten; re-readable from the source.
    Released,
    /// Slot is on the free list.
    Free,
}

impl Lifecycle {
    /// Returns `true` if the transition `self -> to` is legal.
    pub fn permits(self, to: Lifecycle) -> bool {
        use Lifecycle::*;
        match (self, to) {
            // Freeing a slot is always allowed; reuse revives it as Modified.
            (_, Free) => true,
            (Free, Modified) => true,

            (Unresolved, Reading) => true,
            (Reading, Resolved) => true,
            (Resolved, Modified) => true,
            // Writing out, from either the clean or the dirty state.
            (Resolved, Flushed) | (Modified, Flushed) => true,
            // Dropping unwritten only makes sense for a clean node.
            (Resolved, Released) => true,
            (Released, Reading) => true,
            // Re-marking an already dirty node is a no-op, not an error.
            (Modified, Modified) => true,
            _ => false,
        }
    }

    /// Apply a transition, rejecting illegal moves with a typed error.
    pub fn transition(&mut self, reference: ObjRef, to: Lifecycle) -> ObjectResult<()> {
        if !self.permits(to) {
            return Err(ObjectError::IllegalTransition {
                reference,
                from: *self,
                to,
            });
        }
        *self = to;
        Ok(())
    }

    pub fn is_loaded(self) -> bool {
        matches!(self, Lifecycle::Resolved | Lifecycle::Modified)
    }
}
