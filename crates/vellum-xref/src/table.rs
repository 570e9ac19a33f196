//! The core table structure: slots, growth, and the intrusive free list.

use std::collections::HashSet;

use tracing::debug;
use vellum_object::{Lifecycle, ObjRef, Object};

use crate::entry::{Location, XrefEntry};
use crate::error::{XrefError, XrefResult};
use crate::policy::{CapacityPolicy, UnlimitedCapacity};

/// Cross-reference table: object number -> slot.
///
/// Owns every indirect node of one document instance. Slot 0 is the
/// permanent free-list head; empty (`None`) slots are holes that a lazily
/// parsed index has not filled yet.
pub struct XrefTable {
    slots: Vec<Option<XrefEntry>>,
    /// Highest allocated number + 1.
    next_number: u32,
    policy: Box<dyn CapacityPolicy>,
}

impl std::fmt::Debug for XrefTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XrefTable")
            .field("size", &self.size())
            .field("slots", &self.slots.len())
            .finish()
    }
}

impl Default for XrefTable {
    fn default() -> Self {
        Self::new()
    }
}

impl XrefTable {
    /// An empty table: slot 0 free at maximum generation, list empty.
    pub fn new() -> Self {
        Self::with_policy(Box::new(UnlimitedCapacity))
    }

    pub fn with_policy(policy: Box<dyn CapacityPolicy>) -> Self {
        let head = XrefEntry::free(ObjRef::free_list_head(), 0);
        Self {
            slots: vec![Some(head)],
            next_number: 1,
            policy,
        }
    }

    /// Highest object number + 1.
    pub fn size(&self) -> u32 {
        self.next_number
    }

    pub fn get(&self, number: u32) -> Option<&XrefEntry> {
        self.slots.get(number as usize).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, number: u32) -> Option<&mut XrefEntry> {
        self.slots.get_mut(number as usize).and_then(|s| s.as_mut())
    }

    /// Every allocated object number, ascending, slot 0 included.
    pub fn numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(n, s)| s.as_ref().map(|_| n as u32))
    }

    /// Record (or overwrite) the slot at the entry's object number.
    pub fn add(&mut self, entry: XrefEntry) -> XrefResult<()> {
        let number = entry.number();
        if number == 0 && !entry.is_free() {
            return Err(XrefError::SlotZeroReserved);
        }
        self.reserve_for(number)?;
        self.slots[number as usize] = Some(entry);
        if number >= self.next_number {
            self.next_number = number + 1;
        }
        Ok(())
    }

    /// Build a fresh modified reference, reusing a freed number when one is
    /// available (most recently freed first), and add its slot.
    pub fn create_next(&mut self) -> XrefResult<ObjRef> {
        if let Some(number) = self.pop_free() {
            // Generation was bumped when the slot was freed.
            let entry = self.get_mut(number).ok_or(XrefError::UnknownNumber(number))?;
            let reference = entry.reference;
            entry.location = Location::Unwritten;
            entry.state.transition(reference, Lifecycle::Modified)?;
            entry.object = None;
            debug!(number, generation = reference.generation, "reused freed number");
            return Ok(reference);
        }

        let reference = ObjRef::new(self.next_number, 0);
        self.add(XrefEntry {
            object: None,
            ..XrefEntry::created(reference, Object::Null)
        })?;
        Ok(reference)
    }

    /// `create_next` plus attaching the node in one step.
    pub fn add_object(&mut self, object: Object) -> XrefResult<ObjRef> {
        let reference = self.create_next()?;
        let entry = self
            .get_mut(reference.number)
            .ok_or(XrefError::UnknownNumber(reference.number))?;
        entry.object = Some(object);
        Ok(reference)
    }

    /// Mark a slot free and push it onto the free list.
    ///
    /// The stored generation is bumped so the next user of the number sees a
    /// strictly larger one; a number whose generation saturates is retired —
    /// left free but never threaded back into the list.
    pub fn free(&mut self, reference: ObjRef) -> XrefResult<()> {
        if reference.number == 0 {
            return Err(XrefError::SlotZeroReserved);
        }
        let entry = self
            .get(reference.number)
            .ok_or(XrefError::UnknownNumber(reference.number))?;
        if entry.is_free() {
            return Err(XrefError::AlreadyFree(entry.reference));
        }
        if entry.reference.generation != reference.generation {
            return Err(XrefError::GenerationMismatch {
                number: reference.number,
                expected: entry.reference.generation,
                actual: reference.generation,
            });
        }

        let next_generation = reference.generation.saturating_add(1);
        let retired = next_generation == ObjRef::MAX_GENERATION;
        let head_next = self.head_next();

        let entry = self.get_mut(reference.number).expect("checked above");
        entry.object = None;
        entry.state.transition(entry.reference, Lifecycle::Free)?;
        entry.reference = ObjRef::new(reference.number, next_generation);
        entry.location = Location::Free {
            next: if retired { 0 } else { head_next },
        };

        if retired {
            debug!(number = reference.number, "generation saturated; number retired");
        } else {
            self.set_head_next(reference.number);
            debug!(number = reference.number, next_generation, "freed");
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Free-list maintenance
    // ---------------------------------------------------------------

    /// Rethread the free list after parsing an index.
    ///
    /// Follows the chain the file declared (seeded at slot 0), synthesizing
    /// free entries for numbers the chain points through but the index never
    /// declares, then appends every remaining free or unallocated slot so
    /// the final chain visits each exactly once and terminates at slot 0.
    pub fn rebuild_free_list(&mut self) -> XrefResult<()> {
        let mut ordered: Vec<u32> = Vec::new();
        let mut seen: HashSet<u32> = HashSet::new();
        seen.insert(0);

        // Pass 1: the declared chain.
        let mut current = self.head_next();
        while current != 0 {
            if !seen.insert(current) {
                return Err(XrefError::CyclicFreeList(current));
            }
            let next = match self.get(current) {
                Some(e) if e.is_free() => e.free_next().unwrap_or(0),
                // Chain runs into a live slot: stop without threading it.
                Some(_) => break,
                None => {
                    // Undeclared number on the chain: synthesize it.
                    self.add(XrefEntry::free(ObjRef::new(current, 0), 0))?;
                    0
                }
            };
            ordered.push(current);
            current = next;
        }

        // Pass 2: stragglers — free or unallocated slots off the chain.
        for number in 1..self.next_number {
            if seen.contains(&number) {
                continue;
            }
            let absent = self.slots[number as usize].is_none();
            let is_free = self.get(number).is_some_and(XrefEntry::is_free);
            if absent {
                self.add(XrefEntry::free(ObjRef::new(number, 0), 0))?;
            }
            if absent || is_free {
                ordered.push(number);
            }
        }

        self.thread(&ordered);
        debug!(free_slots = ordered.len(), "free list rebuilt");
        Ok(())
    }

    /// Walk the free list from slot 0. Returns the visited numbers in chain
    /// order, excluding the terminating return to slot 0.
    pub fn free_chain(&self) -> XrefResult<Vec<u32>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        seen.insert(0u32);
        let mut current = self.head_next();
        while current != 0 {
            if !seen.insert(current) {
                return Err(XrefError::CyclicFreeList(current));
            }
            let entry = self
                .get(current)
                .ok_or(XrefError::UnknownNumber(current))?;
            chain.push(current);
            current = entry.free_next().unwrap_or(0);
        }
        Ok(chain)
    }

    /// Drop trailing free slots (non-append saves shrink the table).
    pub fn trim_trailing_free(&mut self) {
        while self.next_number > 1 {
            let last = self.next_number - 1;
            let droppable = match &self.slots[last as usize] {
                None => true,
                Some(e) => e.is_free(),
            };
            if !droppable {
                break;
            }
            self.slots.truncate(last as usize);
            self.next_number = last;
        }
        // Rethread the chain without the trimmed numbers.
        let remaining: Vec<u32> = (1..self.next_number)
            .filter(|&n| self.get(n).is_some_and(XrefEntry::is_free))
            .filter(|&n| !self.is_retired(n))
            .collect();
        self.thread(&remaining);
    }

    /// Detach every composite node's children and drop all slots.
    ///
    /// Document close path: backing storage is reclaimed immediately instead
    /// of waiting for the table to drop.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            if let Some(entry) = slot {
                if let Some(object) = entry.object.as_mut() {
                    object.take_children();
                }
            }
            *slot = None;
        }
        self.slots.clear();
        self.slots
            .push(Some(XrefEntry::free(ObjRef::free_list_head(), 0)));
        self.next_number = 1;
    }

    // ---------------------------------------------------------------
    // Internal helpers
    // ---------------------------------------------------------------

    fn head_next(&self) -> u32 {
        self.get(0).and_then(XrefEntry::free_next).unwrap_or(0)
    }

    fn set_head_next(&mut self, next: u32) {
        if let Some(head) = self.get_mut(0) {
            head.location = Location::Free { next };
        }
    }

    /// Pop the most recently freed reusable number, if any.
    fn pop_free(&mut self) -> Option<u32> {
        let number = self.head_next();
        if number == 0 {
            return None;
        }
        let next = self.get(number).and_then(XrefEntry::free_next).unwrap_or(0);
        self.set_head_next(next);
        Some(number)
    }

    fn is_retired(&self, number: u32) -> bool {
        self.get(number)
            .is_some_and(|e| e.is_free() && e.reference.is_saturated() && number != 0)
    }

    /// Rewrite the chain links so the list is exactly `ordered`, in order.
    fn thread(&mut self, ordered: &[u32]) {
        let mut next = 0u32;
        for &number in ordered.iter().rev() {
            if let Some(entry) = self.get_mut(number) {
                entry.location = Location::Free { next };
            }
            next = number;
        }
        self.set_head_next(next);
    }

    fn reserve_for(&mut self, number: u32) -> XrefResult<()> {
        let required = number as usize + 1;
        if required <= self.slots.len() {
            return Ok(());
        }
        let mut target = self.slots.len().max(1);
        while target < required {
            target *= 2;
        }
        if !self.policy.approve(target) {
            // The doubled target may overshoot a tight cap; the exact
            // requirement gets one more chance.
            if self.policy.approve(required) {
                target = required;
            } else {
                return Err(XrefError::CapacityExceeded { requested: required });
            }
        }
        self.slots.resize_with(target, || None);
        Ok(())
    }
}
