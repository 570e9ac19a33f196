//! Deep flush/release engine.
//!
//! One traversal serves all three page-scoped operations, parameterized by
//! [`FlushMode`]. The walk is driven by a declarative [`FlushContext`]: per
//! key, either *never descend* (parent links, popup and destination targets
//! point back up or sideways in the graph), descend with a fixed inner
//! context, or touch the node without descending further. A per-call open
//! set makes re-entry a no-op, so cyclic action graphs and shared resource
//! dictionaries terminate without the context table itself having to be
//! acyclic.
//!
//! Registered document fonts and optional-content layers are excluded
//! unconditionally; they are written once, at the end of the session, by
//! the whole-collection pass in the document layer.

use std::collections::HashSet;

use tracing::{debug, trace};
use vellum_object::{CryptProvider, Lifecycle, ObjRef, Object};
use vellum_writer::SaveSession;
use vellum_xref::XrefTable;

use crate::error::{DocError, DocResult};

/// What the traversal does to each node it visits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushMode {
    /// Write every visited node and drop it from memory.
    Flush,
    /// Drop every clean visited node from memory without writing.
    Release,
    /// Append-save variant: write modified nodes, release clean ones.
    AppendFlush,
}

/// Traversal rules for one dictionary shape.
///
/// `inner` entries are indices into [`CONTEXTS`], which lets contexts refer
/// to themselves (action chains) without recursive statics.
pub struct FlushContext {
    /// Keys never descended.
    pub skip: &'static [&'static str],
    /// Keys descended with a fixed inner context.
    pub inner: &'static [(&'static str, usize)],
}

pub const PAGE: usize = 0;
pub const RESOURCES: usize = 1;
pub const ANNOT: usize = 2;
pub const ACTION: usize = 3;
pub const LEAF: usize = 4;

/// Process-wide context table, one entry per dictionary shape the engine
/// understands. Built once; immutable thereafter.
pub static CONTEXTS: &[FlushContext] = &[
    // PAGE
    FlushContext {
        skip: &["Parent", "Dest"],
        inner: &[
            ("Resources", RESOURCES),
            ("Annots", ANNOT),
            ("Contents", LEAF),
            ("Thumb", LEAF),
            ("Group", LEAF),
            ("AA", ACTION),
        ],
    },
    // RESOURCES
    FlushContext {
        skip: &[],
        inner: &[
            ("Font", LEAF),
            ("XObject", LEAF),
            ("ExtGState", LEAF),
            ("Pattern", LEAF),
            ("Shading", LEAF),
            ("ColorSpace", LEAF),
            ("Properties", LEAF),
        ],
    },
    // ANNOT
    FlushContext {
        skip: &["Parent", "P", "Popup", "Dest", "D"],
        inner: &[("A", ACTION), ("AA", ACTION), ("AP", LEAF)],
    },
    // ACTION (self-referential via /Next chains)
    FlushContext {
        skip: &["D"],
        inner: &[("Next", ACTION)],
    },
    // LEAF: touch children, never descend further.
    FlushContext {
        skip: &[],
        inner: &[],
    },
];

/// Borrowed engine state for one traversal.
pub struct Engine<'a> {
    pub table: &'a mut XrefTable,
    pub session: Option<&'a mut SaveSession>,
    pub crypt: &'a dyn CryptProvider,
    pub fonts: &'a HashSet<u32>,
    pub layers: &'a HashSet<u32>,
}

impl Engine<'_> {
    /// Run one page-scoped traversal. `page` is the page dictionary's
    /// reference; the page node itself receives the final decision.
    pub fn run(&mut self, page: ObjRef, mode: FlushMode) -> DocResult<()> {
        let mut open: HashSet<u32> = HashSet::new();
        open.insert(page.number);

        let Some(mut dict) = self.loaded_dict(page.number) else {
            // Not in memory: released/unresolved pages have nothing to do.
            trace!(page = page.number, "page not resident; traversal skipped");
            return Ok(());
        };

        // Resources read-ahead: a modified resources node is handled before
        // the generic walk so everything below sees its current version.
        if let Some(Object::Reference(r)) = dict.get("Resources") {
            let r = *r;
            if self.is_modified(r.number) && open.insert(r.number) {
                self.visit_indirect(r, Some(RESOURCES), mode, &mut open)?;
            }
        }

        let page_modified = self.is_modified(page.number);
        let mut changed = false;
        for (key, value) in dict.iter_mut() {
            let ctx = &CONTEXTS[PAGE];
            if ctx.skip.contains(&key.as_str()) {
                continue;
            }
            let inner = ctx
                .inner
                .iter()
                .find(|(k, _)| *k == key.as_str())
                .map(|&(_, i)| i);
            changed |= self.visit(value, inner, mode, &mut open)?;
        }
        if changed {
            self.store_dict(page, dict.clone())?;
        }

        if mode == FlushMode::AppendFlush {
            self.force_flush_direct(&dict, &mut open)?;
        }

        // The page node's own decision closes the traversal.
        match mode {
            FlushMode::Release => self.release_node(page.number)?,
            FlushMode::Flush => self.flush_node(page)?,
            FlushMode::AppendFlush => {
                if page_modified || changed {
                    self.flush_node(page)?;
                } else {
                    self.release_node(page.number)?;
                }
            }
        }
        debug!(page = page.number, ?mode, "traversal complete");
        Ok(())
    }

    /// The whole-collection pass, run once per session as it completes:
    /// every registered font and layer that is resident or queued by a
    /// traversal is written here.
    pub fn flush_registries(&mut self) -> DocResult<()> {
        let numbers: Vec<u32> = self.fonts.iter().chain(self.layers.iter()).copied().collect();
        for number in numbers {
            if let Some(entry) = self.table.get(number) {
                if entry.state.is_loaded() || entry.must_flush {
                    self.flush_node(entry.reference)?;
                }
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Walk
    // ---------------------------------------------------------------

    /// Visit one value. Returns `true` if the value itself was rewritten
    /// (a direct composite promoted to an indirect reference).
    fn visit(
        &mut self,
        value: &mut Object,
        ctx: Option<usize>,
        mode: FlushMode,
        open: &mut HashSet<u32>,
    ) -> DocResult<bool> {
        match value {
            Object::Reference(r) => {
                let r = *r;
                if self.fonts.contains(&r.number) || self.layers.contains(&r.number) {
                    // Queue the excluded member for the close pass; a flushed
                    // parent must not leave it behind in an append delta.
                    if matches!(mode, FlushMode::Flush | FlushMode::AppendFlush) {
                        if let Some(entry) = self.table.get_mut(r.number) {
                            entry.must_flush = true;
                        }
                    }
                    return Ok(false);
                }
                if !open.insert(r.number) {
                    return Ok(false);
                }
                self.visit_indirect(r, ctx, mode, open)?;
                Ok(false)
            }
            Object::Array(items) => {
                let mut changed = false;
                for item in items {
                    changed |= self.visit(item, ctx, mode, open)?;
                }
                Ok(changed)
            }
            Object::Dictionary(_) | Object::Stream(_) => {
                if ctx.is_none() || !matches!(mode, FlushMode::Flush | FlushMode::AppendFlush) {
                    // Direct composites travel with their parent.
                    return Ok(false);
                }
                // Promote: the node needs its own number before it can be
                // written independently of the parent.
                let taken = std::mem::replace(value, Object::Null);
                let reference = self.table.add_object(taken)?;
                *value = Object::Reference(reference);
                if open.insert(reference.number) {
                    self.visit_indirect(reference, ctx, mode, open)?;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Recurse into an indirect node, then apply the per-node decision.
    fn visit_indirect(
        &mut self,
        reference: ObjRef,
        ctx: Option<usize>,
        mode: FlushMode,
        open: &mut HashSet<u32>,
    ) -> DocResult<()> {
        if let (Some(ctx_idx), Some(mut dict)) = (ctx, self.loaded_dict(reference.number)) {
            let ctx = &CONTEXTS[ctx_idx];
            let mut changed = false;
            for (key, value) in dict.iter_mut() {
                if ctx.skip.contains(&key.as_str()) {
                    continue;
                }
                let inner = ctx
                    .inner
                    .iter()
                    .find(|(k, _)| *k == key.as_str())
                    .map(|&(_, i)| i);
                changed |= self.visit(value, inner, mode, open)?;
            }
            if changed {
                self.store_dict(reference, dict)?;
            }
        }

        match mode {
            FlushMode::Release => self.release_node(reference.number),
            FlushMode::Flush => self.flush_node(reference),
            FlushMode::AppendFlush => {
                if self.is_modified(reference.number) {
                    self.flush_node(reference)
                } else {
                    self.release_node(reference.number)
                }
            }
        }
    }

    /// Append-mode extra: strictly-modified direct children of the
    /// annotation list, thumbnail, and content entries get written even if
    /// the regular walk already released around them.
    fn force_flush_direct(
        &mut self,
        dict: &vellum_object::Dictionary,
        open: &mut HashSet<u32>,
    ) -> DocResult<()> {
        for key in ["Annots", "Thumb", "Contents"] {
            let mut refs: Vec<ObjRef> = Vec::new();
            match dict.get(key) {
                Some(Object::Reference(r)) => refs.push(*r),
                Some(Object::Array(items)) => {
                    refs.extend(items.iter().filter_map(|o| match o {
                        Object::Reference(r) => Some(*r),
                        _ => None,
                    }));
                }
                _ => {}
            }
            for r in refs {
                if self.is_modified(r.number) {
                    open.insert(r.number);
                    self.flush_node(r)?;
                }
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Per-node decisions
    // ---------------------------------------------------------------

    /// Write a resident node out through the session and drop it.
    fn flush_node(&mut self, reference: ObjRef) -> DocResult<()> {
        let Some(entry) = self.table.get_mut(reference.number) else {
            return Ok(());
        };
        if !entry.state.is_loaded() && !entry.must_flush {
            return Ok(());
        }
        let Some(object) = entry.object.take() else {
            return Ok(());
        };
        let current = entry.reference;
        let session = self.session.as_deref_mut().ok_or(DocError::ReadOnly)?;
        session.stage_object(self.table, current, &object, self.crypt)?;
        trace!(number = reference.number, "flushed");
        Ok(())
    }

    /// Drop a clean resident node from memory. Modified nodes, pinned
    /// nodes, and nodes already gone are left alone, which makes a second
    /// release a no-op.
    fn release_node(&mut self, number: u32) -> DocResult<()> {
        let Some(entry) = self.table.get_mut(number) else {
            return Ok(());
        };
        if entry.release_forbidden || entry.state != Lifecycle::Resolved {
            return Ok(());
        }
        let reference = entry.reference;
        entry.object = None;
        entry.state.transition(reference, Lifecycle::Released)?;
        trace!(number, "released");
        Ok(())
    }

    // ---------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------

    fn loaded_dict(&self, number: u32) -> Option<vellum_object::Dictionary> {
        match self.table.get(number).and_then(|e| e.object.as_ref()) {
            Some(Object::Dictionary(d)) => Some(d.clone()),
            Some(Object::Stream(s)) => Some(s.dict.clone()),
            _ => None,
        }
    }

    fn store_dict(&mut self, reference: ObjRef, dict: vellum_object::Dictionary) -> DocResult<()> {
        let Some(entry) = self.table.get_mut(reference.number) else {
            return Ok(());
        };
        match entry.object.as_mut() {
            Some(Object::Stream(s)) => s.dict = dict,
            _ => entry.object = Some(Object::Dictionary(dict)),
        }
        if entry.state != Lifecycle::Modified {
            entry.state.transition(reference, Lifecycle::Modified)?;
        }
        Ok(())
    }

    fn is_modified(&self, number: u32) -> bool {
        self.table
            .get(number)
            .is_some_and(|e| e.state == Lifecycle::Modified || e.must_flush)
    }
}
