//! The balancer proper.
//!
//! # Invariants
//! - `parents` covers `leaves` exactly: spans are contiguous, in order, and
//!   their `leaf_count`s sum to `leaves.len()`.
//! - Every stored `/Pages` node's `/Count` equals the number of leaves
//!   beneath it; the root's `/Count` equals the total page count.
//! - [`PageTree::generate_tree`] runs at most once per instance.

use std::collections::HashSet;

use tracing::debug;
use vellum_object::{Dictionary, Name, ObjRef, Object};

use crate::access::NodeAccess;
use crate::error::{PagesError, PagesResult};

/// Leaves per parent node before a new parent is opened.
pub const DEFAULT_FAN_OUT: usize = 10;

/// One leaf-holding parent node and the slice of the flat list it covers.
#[derive(Clone, Copy, Debug)]
struct ParentSpan {
    reference: ObjRef,
    first_leaf: usize,
    leaf_count: usize,
}

/// Flat view of the document's page tree.
#[derive(Debug)]
pub struct PageTree {
    root: ObjRef,
    leaves: Vec<ObjRef>,
    parents: Vec<ParentSpan>,
    fan_out: usize,
    generated: bool,
}

impl PageTree {
    /// An empty tree over an existing root node.
    pub fn new(root: ObjRef, fan_out: usize) -> Self {
        Self {
            root,
            leaves: Vec::new(),
            parents: Vec::new(),
            fan_out: fan_out.max(2),
            generated: false,
        }
    }

    /// Materialize the flat view from stored nodes.
    ///
    /// Deeply nested and mixed-kid layouts are tolerated: mixed kids are
    /// split into homogeneous runs in place, and nesting beyond one parent
    /// level is flattened so the in-memory shape is always root over
    /// leaf-parents over leaves. A visited set catches cyclic layouts.
    pub fn load(root: ObjRef, fan_out: usize, access: &mut dyn NodeAccess) -> PagesResult<Self> {
        let mut tree = Self::new(root, fan_out);
        let mut visited = HashSet::new();
        visited.insert(root.number);
        let mut abandoned = Vec::new();
        let root_dict = access.get(root)?;
        let reshaped = tree.collect(root, &root_dict, access, &mut visited, 0, &mut abandoned)?;

        if reshaped {
            tree.reattach_parents(access)?;
            // Interior grouping nodes are no longer reachable.
            for node in abandoned {
                access.free(node)?;
            }
        }
        debug!(
            pages = tree.leaves.len(),
            parents = tree.parents.len(),
            reshaped,
            "page tree loaded"
        );
        Ok(tree)
    }

    pub fn root(&self) -> ObjRef {
        self.root
    }

    pub fn count(&self) -> usize {
        self.leaves.len()
    }

    /// The page leaf at `index`.
    pub fn get_page(&self, index: usize) -> PagesResult<ObjRef> {
        self.leaves
            .get(index)
            .copied()
            .ok_or(PagesError::OutOfRange {
                index,
                count: self.leaves.len(),
            })
    }

    /// The parent node covering the page at `index`.
    pub fn find_page_parent(&self, index: usize) -> PagesResult<ObjRef> {
        let at = self.parent_index(index)?;
        Ok(self.parents[at].reference)
    }

    /// Append a page to the tail parent, opening a new parent when the tail
    /// has reached the fan-out target.
    pub fn add_page(&mut self, page: Dictionary, access: &mut dyn NodeAccess) -> PagesResult<ObjRef> {
        let need_parent = match self.parents.last() {
            Some(tail) => tail.leaf_count >= self.fan_out,
            None => true,
        };
        if need_parent {
            let parent = self.open_parent(self.leaves.len(), access)?;
            self.parents.push(parent);
        }
        let at = self.parents.len() - 1;
        let local = self.parents[at].leaf_count;
        self.splice_leaf(at, local, page, access)
    }

    /// Insert a page so it becomes page number `index`.
    pub fn insert_page(
        &mut self,
        index: usize,
        page: Dictionary,
        access: &mut dyn NodeAccess,
    ) -> PagesResult<ObjRef> {
        if index >= self.leaves.len() {
            if index > self.leaves.len() {
                return Err(PagesError::OutOfRange {
                    index,
                    count: self.leaves.len(),
                });
            }
            return self.add_page(page, access);
        }
        let at = self.parent_index(index)?;
        let local = index - self.parents[at].first_leaf;
        let reference = self.splice_leaf(at, local, page, access)?;
        if self.parents[at].leaf_count > self.fan_out {
            self.split_parent(at, access)?;
        }
        Ok(reference)
    }

    /// Remove the page at `index` and free its node. An emptied parent is
    /// unlinked and freed as well.
    pub fn remove_page(&mut self, index: usize, access: &mut dyn NodeAccess) -> PagesResult<()> {
        let at = self.parent_index(index)?;
        let span = self.parents[at];
        let local = index - span.first_leaf;
        let leaf = self.leaves.remove(index);

        let mut dict = access.get(span.reference)?;
        let mut kids = take_kid_refs(&mut dict, span.reference.number)?;
        kids.remove(local);
        put_kid_refs(&mut dict, &kids, kids.len());
        access.set(span.reference, dict)?;
        access.free(leaf)?;

        self.parents[at].leaf_count -= 1;
        for later in &mut self.parents[at + 1..] {
            later.first_leaf -= 1;
        }
        if self.parents[at].leaf_count == 0 {
            let empty = self.parents.remove(at);
            self.unlink_from_root(empty.reference, access)?;
            access.free(empty.reference)?;
        }
        self.sync_root_count(access)?;
        debug!(index, pages = self.leaves.len(), "page removed");
        Ok(())
    }

    /// Regroup the flat parent list bottom-up into a balanced tree under the
    /// root. Runs at most once per instance; later calls are no-ops.
    pub fn generate_tree(&mut self, access: &mut dyn NodeAccess) -> PagesResult<()> {
        if self.generated {
            return Ok(());
        }
        self.generated = true;
        if self.parents.len() <= self.fan_out {
            return Ok(());
        }

        let mut level: Vec<(ObjRef, usize)> = self
            .parents
            .iter()
            .map(|p| (p.reference, p.leaf_count))
            .collect();

        while level.len() > self.fan_out {
            let mut chunks: Vec<Vec<(ObjRef, usize)>> =
                level.chunks(self.fan_out).map(<[_]>::to_vec).collect();
            // A trailing chunk of one would make a pointless parent; fold it
            // into its neighbor instead.
            if chunks.len() > 1 && chunks.last().is_some_and(|c| c.len() <= 1) {
                let orphan = chunks.pop().unwrap_or_default();
                if let Some(prev) = chunks.last_mut() {
                    prev.extend(orphan);
                }
            }

            let mut next = Vec::with_capacity(chunks.len());
            for chunk in chunks {
                let count: usize = chunk.iter().map(|&(_, c)| c).sum();
                let mut dict = Dictionary::new();
                dict.insert(Name::new("Type"), Object::name("Pages"));
                dict.insert(
                    Name::new("Kids"),
                    Object::Array(chunk.iter().map(|&(r, _)| Object::Reference(r)).collect()),
                );
                dict.insert(Name::new("Count"), Object::Integer(count as i64));
                let group = access.create(dict)?;
                for &(member, _) in &chunk {
                    self.set_parent_link(member, group, access)?;
                }
                next.push((group, count));
            }
            level = next;
        }

        let mut root_dict = access.get(self.root)?;
        root_dict.insert(
            Name::new("Kids"),
            Object::Array(level.iter().map(|&(r, _)| Object::Reference(r)).collect()),
        );
        root_dict.insert(Name::new("Count"), Object::Integer(self.leaves.len() as i64));
        access.set(self.root, root_dict)?;
        for &(top, _) in &level {
            self.set_parent_link(top, self.root, access)?;
        }
        debug!(
            pages = self.leaves.len(),
            top_level = level.len(),
            "page tree regenerated"
        );
        Ok(())
    }

    // ---------------------------------------------------------------
    // Loading
    // ---------------------------------------------------------------

    /// Recursive collection. Returns `true` if the layout needed reshaping
    /// (mixed kids, or nesting deeper than one parent level). Interior
    /// grouping nodes that will not survive the flattening land in
    /// `abandoned`.
    fn collect(
        &mut self,
        reference: ObjRef,
        dict: &Dictionary,
        access: &mut dyn NodeAccess,
        visited: &mut HashSet<u32>,
        depth: usize,
        abandoned: &mut Vec<ObjRef>,
    ) -> PagesResult<bool> {
        enum Kid {
            Leaf(ObjRef),
            Nested(ObjRef, Dictionary),
        }

        let kids = kid_refs(dict, reference.number)?;
        let mut classified = Vec::with_capacity(kids.len());
        let mut has_leaf = false;
        let mut has_nested = false;
        for kid in kids {
            if !visited.insert(kid.number) {
                return Err(PagesError::TreeCycle(kid.number));
            }
            let kid_dict = access.get(kid)?;
            if kid_dict.is_type("Page") {
                has_leaf = true;
                classified.push(Kid::Leaf(kid));
            } else if kid_dict.is_type("Pages") {
                has_nested = true;
                classified.push(Kid::Nested(kid, kid_dict));
            } else {
                return Err(PagesError::UnknownNodeType(kid.number));
            }
        }

        if !has_nested {
            // Homogeneous leaf parent (or an empty node, which is skipped).
            if has_leaf {
                let run: Vec<ObjRef> = classified
                    .into_iter()
                    .map(|k| match k {
                        Kid::Leaf(r) => r,
                        Kid::Nested(r, _) => r,
                    })
                    .collect();
                self.parents.push(ParentSpan {
                    reference,
                    first_leaf: self.leaves.len(),
                    leaf_count: run.len(),
                });
                self.leaves.extend(run);
            }
            return Ok(depth > 1);
        }

        // Grouping or mixed node: leaf runs become fresh parents so the
        // retained shape only ever has homogeneous nodes.
        let mut reshaped = has_leaf;
        let mut run: Vec<ObjRef> = Vec::new();
        for kid in classified {
            match kid {
                Kid::Leaf(r) => run.push(r),
                Kid::Nested(r, d) => {
                    if !run.is_empty() {
                        let parent = self.materialize_run(&run, access)?;
                        self.parents.push(parent);
                        run.clear();
                    }
                    reshaped |= self.collect(r, &d, access, visited, depth + 1, abandoned)?;
                }
            }
        }
        if !run.is_empty() {
            let parent = self.materialize_run(&run, access)?;
            self.parents.push(parent);
        }
        if depth > 0 {
            // This grouping node's children reattach directly under the root.
            abandoned.push(reference);
            reshaped = true;
        }
        Ok(reshaped)
    }

    /// Wrap a run of leaves from a mixed-kid node into a fresh parent.
    fn materialize_run(
        &mut self,
        run: &[ObjRef],
        access: &mut dyn NodeAccess,
    ) -> PagesResult<ParentSpan> {
        let mut dict = Dictionary::new();
        dict.insert(Name::new("Type"), Object::name("Pages"));
        dict.insert(
            Name::new("Kids"),
            Object::Array(run.iter().map(|&r| Object::Reference(r)).collect()),
        );
        dict.insert(Name::new("Count"), Object::Integer(run.len() as i64));
        let reference = access.create(dict)?;
        for &leaf in run {
            self.set_parent_link(leaf, reference, access)?;
        }
        let span = ParentSpan {
            reference,
            first_leaf: self.leaves.len(),
            leaf_count: run.len(),
        };
        self.leaves.extend_from_slice(run);
        Ok(span)
    }

    /// Rewrite the root so the collected leaf-parents hang directly off it.
    fn reattach_parents(&mut self, access: &mut dyn NodeAccess) -> PagesResult<()> {
        let mut root_dict = access.get(self.root)?;
        root_dict.insert(
            Name::new("Kids"),
            Object::Array(
                self.parents
                    .iter()
                    .map(|p| Object::Reference(p.reference))
                    .collect(),
            ),
        );
        root_dict.insert(Name::new("Count"), Object::Integer(self.leaves.len() as i64));
        access.set(self.root, root_dict)?;
        for span in self.parents.clone() {
            self.set_parent_link(span.reference, self.root, access)?;
            self.sync_parent_count(span, access)?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Mutation helpers
    // ---------------------------------------------------------------

    /// Binary search the span list for the parent covering `index`.
    fn parent_index(&self, index: usize) -> PagesResult<usize> {
        if index >= self.leaves.len() {
            return Err(PagesError::OutOfRange {
                index,
                count: self.leaves.len(),
            });
        }
        let at = self
            .parents
            .partition_point(|p| p.first_leaf + p.leaf_count <= index);
        debug_assert!(at < self.parents.len());
        Ok(at)
    }

    /// Create an empty parent node linked under the root.
    fn open_parent(
        &mut self,
        first_leaf: usize,
        access: &mut dyn NodeAccess,
    ) -> PagesResult<ParentSpan> {
        let mut dict = Dictionary::new();
        dict.insert(Name::new("Type"), Object::name("Pages"));
        dict.insert(Name::new("Kids"), Object::Array(Vec::new()));
        dict.insert(Name::new("Count"), Object::Integer(0));
        dict.insert(Name::new("Parent"), Object::Reference(self.root));
        let reference = access.create(dict)?;

        let mut root_dict = access.get(self.root)?;
        let mut kids = root_kid_refs(&mut root_dict);
        kids.push(reference);
        root_dict.insert(
            Name::new("Kids"),
            Object::Array(kids.into_iter().map(Object::Reference).collect()),
        );
        access.set(self.root, root_dict)?;

        Ok(ParentSpan {
            reference,
            first_leaf,
            leaf_count: 0,
        })
    }

    /// Insert `page` at position `local` inside parent `at` and update every
    /// affected count and span.
    fn splice_leaf(
        &mut self,
        at: usize,
        local: usize,
        mut page: Dictionary,
        access: &mut dyn NodeAccess,
    ) -> PagesResult<ObjRef> {
        let span = self.parents[at];
        page.insert(Name::new("Type"), Object::name("Page"));
        page.insert(Name::new("Parent"), Object::Reference(span.reference));
        let leaf = access.create(page)?;

        let mut dict = access.get(span.reference)?;
        let mut kids = take_kid_refs(&mut dict, span.reference.number)?;
        kids.insert(local, leaf);
        put_kid_refs(&mut dict, &kids, kids.len());
        access.set(span.reference, dict)?;

        self.leaves.insert(span.first_leaf + local, leaf);
        self.parents[at].leaf_count += 1;
        for later in &mut self.parents[at + 1..] {
            later.first_leaf += 1;
        }
        self.sync_root_count(access)?;
        Ok(leaf)
    }

    /// Split an over-full parent into two halves.
    fn split_parent(&mut self, at: usize, access: &mut dyn NodeAccess) -> PagesResult<()> {
        let span = self.parents[at];
        let keep = span.leaf_count / 2;

        let mut dict = access.get(span.reference)?;
        let mut kids = take_kid_refs(&mut dict, span.reference.number)?;
        let moved = kids.split_off(keep);
        put_kid_refs(&mut dict, &kids, kids.len());
        access.set(span.reference, dict)?;

        let mut new_dict = Dictionary::new();
        new_dict.insert(Name::new("Type"), Object::name("Pages"));
        new_dict.insert(
            Name::new("Kids"),
            Object::Array(moved.iter().map(|&r| Object::Reference(r)).collect()),
        );
        new_dict.insert(Name::new("Count"), Object::Integer(moved.len() as i64));
        new_dict.insert(Name::new("Parent"), Object::Reference(self.root));
        let new_ref = access.create(new_dict)?;
        for &leaf in &moved {
            self.set_parent_link(leaf, new_ref, access)?;
        }

        // Mirror the split into the root's kid list, right after the split
        // parent.
        let mut root_dict = access.get(self.root)?;
        let mut root_kids = root_kid_refs(&mut root_dict);
        if let Some(pos) = root_kids.iter().position(|&r| r == span.reference) {
            root_kids.insert(pos + 1, new_ref);
        } else {
            root_kids.push(new_ref);
        }
        root_dict.insert(
            Name::new("Kids"),
            Object::Array(root_kids.into_iter().map(Object::Reference).collect()),
        );
        access.set(self.root, root_dict)?;

        self.parents[at].leaf_count = keep;
        self.parents.insert(
            at + 1,
            ParentSpan {
                reference: new_ref,
                first_leaf: span.first_leaf + keep,
                leaf_count: moved.len(),
            },
        );
        debug!(
            parent = span.reference.number,
            kept = keep,
            moved = moved.len(),
            "parent split"
        );
        Ok(())
    }

    fn unlink_from_root(&mut self, parent: ObjRef, access: &mut dyn NodeAccess) -> PagesResult<()> {
        let mut root_dict = access.get(self.root)?;
        let kids = root_kid_refs(&mut root_dict);
        let remaining: Vec<ObjRef> = kids.into_iter().filter(|&r| r != parent).collect();
        root_dict.insert(
            Name::new("Kids"),
            Object::Array(remaining.into_iter().map(Object::Reference).collect()),
        );
        access.set(self.root, root_dict)?;
        Ok(())
    }

    fn set_parent_link(
        &mut self,
        node: ObjRef,
        parent: ObjRef,
        access: &mut dyn NodeAccess,
    ) -> PagesResult<()> {
        let mut dict = access.get(node)?;
        dict.insert(Name::new("Parent"), Object::Reference(parent));
        access.set(node, dict)?;
        Ok(())
    }

    fn sync_parent_count(&mut self, span: ParentSpan, access: &mut dyn NodeAccess) -> PagesResult<()> {
        let mut dict = access.get(span.reference)?;
        dict.insert(Name::new("Count"), Object::Integer(span.leaf_count as i64));
        access.set(span.reference, dict)?;
        Ok(())
    }

    fn sync_root_count(&mut self, access: &mut dyn NodeAccess) -> PagesResult<()> {
        let mut root_dict = access.get(self.root)?;
        root_dict.insert(Name::new("Count"), Object::Integer(self.leaves.len() as i64));
        access.set(self.root, root_dict)?;
        // Per-parent counts ride along with the spans.
        for span in self.parents.clone() {
            self.sync_parent_count(span, access)?;
        }
        Ok(())
    }
}

fn kid_refs(dict: &Dictionary, number: u32) -> PagesResult<Vec<ObjRef>> {
    let kids = dict.get_array("Kids").ok_or(PagesError::MissingKids(number))?;
    kids.iter()
        .map(|kid| match kid {
            Object::Reference(r) => Ok(*r),
            _ => Err(PagesError::KidNotReference(number)),
        })
        .collect()
}

fn take_kid_refs(dict: &mut Dictionary, number: u32) -> PagesResult<Vec<ObjRef>> {
    let refs = kid_refs(dict, number)?;
    dict.remove("Kids");
    Ok(refs)
}

fn put_kid_refs(dict: &mut Dictionary, kids: &[ObjRef], count: usize) {
    dict.insert(
        Name::new("Kids"),
        Object::Array(kids.iter().map(|&r| Object::Reference(r)).collect()),
    );
    dict.insert(Name::new("Count"), Object::Integer(count as i64));
}

fn root_kid_refs(dict: &mut Dictionary) -> Vec<ObjRef> {
    dict.get_array("Kids")
        .map(|kids| {
            kids.iter()
                .filter_map(|kid| match kid {
                    Object::Reference(r) => Some(*r),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// In-memory node store.
    #[derive(Default)]
    struct MemStore {
        nodes: HashMap<u32, Dictionary>,
        next: u32,
        freed: Vec<u32>,
    }

    impl MemStore {
        fn with_root() -> (Self, ObjRef) {
            let mut store = Self {
                next: 2,
                ..Self::default()
            };
            let mut root = Dictionary::new();
            root.insert(Name::new("Type"), Object::name("Pages"));
            root.insert(Name::new("Kids"), Object::Array(Vec::new()));
            root.insert(Name::new("Count"), Object::Integer(0));
            store.nodes.insert(1, root);
            (store, ObjRef::new(1, 0))
        }

        fn dict(&self, number: u32) -> &Dictionary {
            self.nodes.get(&number).unwrap()
        }
    }

    impl NodeAccess for MemStore {
        fn get(&mut self, reference: ObjRef) -> PagesResult<Dictionary> {
            self.nodes
                .get(&reference.number)
                .cloned()
                .ok_or_else(|| PagesError::Node(format!("missing node {}", reference.number)))
        }

        fn set(&mut self, reference: ObjRef, dict: Dictionary) -> PagesResult<()> {
            self.nodes.insert(reference.number, dict);
            Ok(())
        }

        fn create(&mut self, dict: Dictionary) -> PagesResult<ObjRef> {
            let number = self.next;
            self.next += 1;
            self.nodes.insert(number, dict);
            Ok(ObjRef::new(number, 0))
        }

        fn free(&mut self, reference: ObjRef) -> PagesResult<()> {
            self.nodes.remove(&reference.number);
            self.freed.push(reference.number);
            Ok(())
        }
    }

    fn page() -> Dictionary {
        Dictionary::new()
    }

    fn root_count(store: &MemStore) -> i64 {
        store.dict(1).get_int("Count").unwrap()
    }

    #[test]
    fn appended_pages_fill_parents_up_to_the_fan_out() {
        let (mut store, root) = MemStore::with_root();
        let mut tree = PageTree::new(root, 10);
        for _ in 0..25 {
            tree.add_page(page(), &mut store).unwrap();
        }
        assert_eq!(tree.count(), 25);
        assert_eq!(root_count(&store), 25);
        // 10 + 10 + 5.
        assert_eq!(tree.parents.len(), 3);
        assert_eq!(tree.parents[0].leaf_count, 10);
        assert_eq!(tree.parents[2].leaf_count, 5);

        // Parent counts match their spans.
        for span in &tree.parents {
            let d = store.dict(span.reference.number);
            assert_eq!(d.get_int("Count"), Some(span.leaf_count as i64));
            assert_eq!(d.get_array("Kids").unwrap().len(), span.leaf_count);
        }
    }

    #[test]
    fn lookup_uses_the_span_table() {
        let (mut store, root) = MemStore::with_root();
        let mut tree = PageTree::new(root, 3);
        let mut refs = Vec::new();
        for _ in 0..8 {
            refs.push(tree.add_page(page(), &mut store).unwrap());
        }
        for (i, r) in refs.iter().enumerate() {
            assert_eq!(tree.get_page(i).unwrap(), *r);
        }
        assert_eq!(tree.find_page_parent(0).unwrap(), tree.parents[0].reference);
        assert_eq!(tree.find_page_parent(7).unwrap(), tree.parents[2].reference);
        assert_eq!(
            tree.get_page(8).unwrap_err(),
            PagesError::OutOfRange { index: 8, count: 8 }
        );
    }

    #[test]
    fn insertion_shifts_later_spans() {
        let (mut store, root) = MemStore::with_root();
        let mut tree = PageTree::new(root, 3);
        for _ in 0..6 {
            tree.add_page(page(), &mut store).unwrap();
        }
        let inserted = tree.insert_page(1, page(), &mut store).unwrap();
        assert_eq!(tree.get_page(1).unwrap(), inserted);
        assert_eq!(tree.count(), 7);
        assert_eq!(root_count(&store), 7);

        // Spans stay contiguous.
        let mut expected_first = 0;
        for span in &tree.parents {
            assert_eq!(span.first_leaf, expected_first);
            expected_first += span.leaf_count;
        }
        assert_eq!(expected_first, 7);
    }

    #[test]
    fn overfull_parent_splits_on_insert() {
        let (mut store, root) = MemStore::with_root();
        let mut tree = PageTree::new(root, 4);
        for _ in 0..4 {
            tree.add_page(page(), &mut store).unwrap();
        }
        assert_eq!(tree.parents.len(), 1);
        tree.insert_page(2, page(), &mut store).unwrap();
        assert_eq!(tree.parents.len(), 2);
        assert_eq!(tree.parents[0].leaf_count + tree.parents[1].leaf_count, 5);

        // Moved leaves point at the new parent.
        let second = tree.parents[1];
        for i in second.first_leaf..second.first_leaf + second.leaf_count {
            let leaf = tree.get_page(i).unwrap();
            let d = store.dict(leaf.number);
            assert_eq!(d.get_ref("Parent"), Some(second.reference));
        }
    }

    #[test]
    fn removal_frees_the_leaf_and_empty_parents() {
        let (mut store, root) = MemStore::with_root();
        let mut tree = PageTree::new(root, 2);
        for _ in 0..3 {
            tree.add_page(page(), &mut store).unwrap();
        }
        // Third page sits alone in the second parent.
        let lone_parent = tree.parents[1].reference;
        let lone_leaf = tree.get_page(2).unwrap();
        tree.remove_page(2, &mut store).unwrap();

        assert_eq!(tree.count(), 2);
        assert_eq!(tree.parents.len(), 1);
        assert!(store.freed.contains(&lone_leaf.number));
        assert!(store.freed.contains(&lone_parent.number));
        assert_eq!(root_count(&store), 2);
        let root_kids = store.dict(1).get_array("Kids").unwrap();
        assert_eq!(root_kids.len(), 1);
    }

    #[test]
    fn load_round_trips_a_two_level_tree() {
        let (mut store, root) = MemStore::with_root();
        let mut built = PageTree::new(root, 3);
        let mut refs = Vec::new();
        for _ in 0..7 {
            refs.push(built.add_page(page(), &mut store).unwrap());
        }

        let loaded = PageTree::load(root, 3, &mut store).unwrap();
        assert_eq!(loaded.count(), 7);
        for (i, r) in refs.iter().enumerate() {
            assert_eq!(loaded.get_page(i).unwrap(), *r);
        }
    }

    #[test]
    fn mixed_kids_split_into_homogeneous_runs() {
        let (mut store, root) = MemStore::with_root();
        // Root kids: leaf, nested parent of two leaves, leaf.
        let mut mk_page = |store: &mut MemStore| {
            let mut d = Dictionary::new();
            d.insert(Name::new("Type"), Object::name("Page"));
            store.create(d).unwrap()
        };
        let l1 = mk_page(&mut store);
        let n1 = mk_page(&mut store);
        let n2 = mk_page(&mut store);
        let l2 = mk_page(&mut store);

        let mut nested = Dictionary::new();
        nested.insert(Name::new("Type"), Object::name("Pages"));
        nested.insert(
            Name::new("Kids"),
            Object::Array(vec![Object::Reference(n1), Object::Reference(n2)]),
        );
        nested.insert(Name::new("Count"), Object::Integer(2));
        let nested_ref = store.create(nested).unwrap();

        let mut root_dict = store.get(root).unwrap();
        root_dict.insert(
            Name::new("Kids"),
            Object::Array(vec![
                Object::Reference(l1),
                Object::Reference(nested_ref),
                Object::Reference(l2),
            ]),
        );
        root_dict.insert(Name::new("Count"), Object::Integer(4));
        store.set(root, root_dict).unwrap();

        let tree = PageTree::load(root, 10, &mut store).unwrap();
        assert_eq!(tree.count(), 4);
        assert_eq!(
            (0..4).map(|i| tree.get_page(i).unwrap()).collect::<Vec<_>>(),
            vec![l1, n1, n2, l2]
        );
        // Three homogeneous runs: [l1], [n1, n2], [l2].
        assert_eq!(tree.parents.len(), 3);
        // Root count survives the reshape.
        assert_eq!(root_count(&store), 4);
    }

    #[test]
    fn cyclic_layout_is_rejected() {
        let (mut store, root) = MemStore::with_root();
        // Nested parent whose kid is the root again.
        let mut nested = Dictionary::new();
        nested.insert(Name::new("Type"), Object::name("Pages"));
        nested.insert(Name::new("Kids"), Object::Array(vec![Object::Reference(root)]));
        nested.insert(Name::new("Count"), Object::Integer(0));
        let nested_ref = store.create(nested).unwrap();

        let mut root_dict = store.get(root).unwrap();
        root_dict.insert(
            Name::new("Kids"),
            Object::Array(vec![Object::Reference(nested_ref)]),
        );
        store.set(root, root_dict).unwrap();

        assert_eq!(
            PageTree::load(root, 10, &mut store).unwrap_err(),
            PagesError::TreeCycle(root.number)
        );
    }

    #[test]
    fn generate_tree_groups_until_one_root_and_runs_once() {
        let (mut store, root) = MemStore::with_root();
        let mut tree = PageTree::new(root, 2);
        for _ in 0..9 {
            tree.add_page(page(), &mut store).unwrap();
        }
        // Five leaf parents (2+2+2+2+1) over fan-out 2.
        assert_eq!(tree.parents.len(), 5);
        let nodes_before = store.nodes.len();

        tree.generate_tree(&mut store).unwrap();
        let root_kids = store.dict(1).get_array("Kids").unwrap();
        assert!(root_kids.len() <= 2);
        assert_eq!(root_count(&store), 9);

        // Every intermediate count equals the leaves below it.
        fn subtree_count(store: &MemStore, r: ObjRef) -> i64 {
            let d = store.dict(r.number);
            if d.is_type("Page") {
                return 1;
            }
            let sum: i64 = d
                .get_array("Kids")
                .unwrap_or(&[])
                .iter()
                .filter_map(|k| match k {
                    Object::Reference(r) => Some(subtree_count(store, *r)),
                    _ => None,
                })
                .sum();
            assert_eq!(d.get_int("Count"), Some(sum));
            sum
        }
        assert_eq!(subtree_count(&store, root), 9);

        // Second call is a no-op.
        let nodes_after = store.nodes.len();
        tree.generate_tree(&mut store).unwrap();
        assert_eq!(store.nodes.len(), nodes_after);
        assert!(nodes_after > nodes_before);
    }

    #[test]
    fn no_orphan_single_member_groups() {
        let (mut store, root) = MemStore::with_root();
        let mut tree = PageTree::new(root, 2);
        // Five parents: chunks of 2 would leave a trailing chunk of 1.
        for _ in 0..9 {
            tree.add_page(page(), &mut store).unwrap();
        }
        tree.generate_tree(&mut store).unwrap();

        // A grouping node (kids are themselves Pages nodes) always has at
        // least two members; a would-be singleton merges into its neighbor.
        fn check(store: &MemStore, r: ObjRef, is_root: bool) {
            let d = store.dict(r.number);
            if d.is_type("Page") {
                return;
            }
            let kids = d.get_array("Kids").unwrap();
            let groups_parents = kids.iter().any(|k| match k {
                Object::Reference(kr) => store.dict(kr.number).is_type("Pages"),
                _ => false,
            });
            if groups_parents && !is_root {
                assert!(kids.len() >= 2);
            }
            for k in kids {
                if let Object::Reference(kr) = k {
                    check(store, *kr, false);
                }
            }
        }
        check(&store, root, true);
    }

    use proptest::prelude::*;

    proptest! {
        /// Any interleaving of add/insert/remove keeps the span table
        /// contiguous and the stored counts in step with a shadow list.
        #[test]
        fn edits_keep_spans_and_counts_consistent(
            ops in proptest::collection::vec((0u8..3, 0usize..32), 1..48),
        ) {
            let (mut store, root) = MemStore::with_root();
            let mut tree = PageTree::new(root, 3);
            let mut shadow: Vec<ObjRef> = Vec::new();

            for (op, at) in ops {
                match op {
                    0 => {
                        let r = tree.add_page(page(), &mut store).unwrap();
                        shadow.push(r);
                    }
                    1 => {
                        let at = at.min(shadow.len());
                        let r = tree.insert_page(at, page(), &mut store).unwrap();
                        shadow.insert(at, r);
                    }
                    _ => {
                        if !shadow.is_empty() {
                            let at = at.min(shadow.len() - 1);
                            tree.remove_page(at, &mut store).unwrap();
                            shadow.remove(at);
                        }
                    }
                }
            }

            prop_assert_eq!(tree.count(), shadow.len());
            prop_assert_eq!(root_count(&store), shadow.len() as i64);
            for (i, r) in shadow.iter().enumerate() {
                prop_assert_eq!(tree.get_page(i).unwrap(), *r);
            }
            let mut expected_first = 0;
            for span in &tree.parents {
                prop_assert!(span.leaf_count > 0);
                prop_assert_eq!(span.first_leaf, expected_first);
                let d = store.dict(span.reference.number);
                prop_assert_eq!(d.get_int("Count"), Some(span.leaf_count as i64));
                expected_first += span.leaf_count;
            }
            prop_assert_eq!(expected_first, shadow.len());
        }
    }
}
