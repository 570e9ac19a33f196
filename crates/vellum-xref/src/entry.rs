use vellum_object::{Lifecycle, ObjRef, Object};

/// Where an object's bytes live, from the index's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Location {
    /// Created this session; no bytes exist yet.
    Unwritten,
    /// Byte offset of the `n g obj` header in the source.
    Offset(u64),
    /// Member of an object-stream container.
    InContainer { container: u32, position: u32 },
    /// Free slot; `next` is the object number of the next free slot
    /// (the offset field doubles as the intrusive list link).
    Free { next: u32 },
}

/// One slot of the cross-reference table.
///
/// The entry owns its node (`object`); children of composite nodes are owned
/// by value inside it. `reference.generation` is the generation the number
/// currently carries — for a free slot, the generation the *next* user of
/// the number will get.
#[derive(Clone, Debug)]
pub struct XrefEntry {
    pub reference: ObjRef,
    pub location: Location,
    pub state: Lifecycle,
    /// Structural nodes that must stay resident even when unmodified.
    pub release_forbidden: bool,
    /// Queued for the next flush pass regardless of the per-node decision.
    pub must_flush: bool,
    pub object: Option<Object>,
}

impl XrefEntry {
    /// An entry parsed from an index section, not yet loaded.
    pub fn unresolved(reference: ObjRef, location: Location) -> Self {
        Self {
            reference,
            location,
            state: Lifecycle::Unresolved,
            release_forbidden: false,
            must_flush: false,
            object: None,
        }
    }

    /// A fresh entry created this session, carrying its node.
    pub fn created(reference: ObjRef, object: Object) -> Self {
        Self {
            reference,
            location: Location::Unwritten,
            state: Lifecycle::Modified,
            release_forbidden: false,
            must_flush: false,
            object: Some(object),
        }
    }

    /// A free slot linking to `next` on the intrusive list.
    pub fn free(reference: ObjRef, next: u32) -> Self {
        Self {
            reference,
            location: Location::Free { next },
            state: Lifecycle::Free,
            release_forbidden: false,
            must_flush: false,
            object: None,
        }
    }

    pub fn is_free(&self) -> bool {
        matches!(self.state, Lifecycle::Free)
    }

    /// The intrusive next-free link, if this is a free slot.
    pub fn free_next(&self) -> Option<u32> {
        match self.location {
            Location::Free { next } => Some(next),
            _ => None,
        }
    }

    pub fn number(&self) -> u32 {
        self.reference.number
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_entries_start_modified() {
        let e = XrefEntry::created(ObjRef::new(4, 0), Object::Null);
        assert_eq!(e.state, Lifecycle::Modified);
        assert_eq!(e.location, Location::Unwritten);
        assert!(e.object.is_some());
    }

    #[test]
    fn free_entry_exposes_link() {
        let e = XrefEntry::free(ObjRef::new(6, 1), 9);
        assert!(e.is_free());
        assert_eq!(e.free_next(), Some(9));
    }

    #[test]
    fn unresolved_entry_has_no_node() {
        let e = XrefEntry::unresolved(ObjRef::new(2, 0), Location::Offset(17));
        assert_eq!(e.state, Lifecycle::Unresolved);
        assert!(e.object.is_none());
        assert_eq!(e.free_next(), None);
    }
}
