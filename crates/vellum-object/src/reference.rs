use std::fmt;

/// An indirect reference: `(object number, generation)`.
///
/// The object number is stable for a document revision; the generation
/// increments each time a freed number is reused. Two references with equal
/// number and generation resolve to the same node within one document
/// instance.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjRef {
    pub number: u32,
    pub generation: u16,
}

impl ObjRef {
    /// Generation value past which a number is retired from reuse.
    pub const MAX_GENERATION: u16 = u16::MAX;

    pub const fn new(number: u32, generation: u16) -> Self {
        Self { number, generation }
    }

    /// The reserved head of the free list: slot 0 at maximum generation.
    pub const fn free_list_head() -> Self {
        Self {
            number: 0,
            generation: Self::MAX_GENERATION,
        }
    }

    /// Returns `true` once the generation can no longer be bumped.
    pub fn is_saturated(&self) -> bool {
        self.generation == Self::MAX_GENERATION
    }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} R", self.number, self.generation)
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjRef({} {})", self.number, self.generation)
    }
}
