use vellum_object::{Dictionary, ObjRef};

use crate::error::PagesResult;

/// Node storage seam between the balancer and the document.
///
/// The balancer only ever sees dictionaries. `get` loads (resolving lazily
/// if needed) and clones; `set` stores the new value and marks the node
/// modified; `create` allocates a fresh indirect node; `free` returns its
/// number to the free list.
pub trait NodeAccess {
    fn get(&mut self, reference: ObjRef) -> PagesResult<Dictionary>;
    fn set(&mut self, reference: ObjRef, dict: Dictionary) -> PagesResult<()>;
    fn create(&mut self, dict: Dictionary) -> PagesResult<ObjRef>;
    fn free(&mut self, reference: ObjRef) -> PagesResult<()>;
}
