//! Node storage adapter handed to the page-tree balancer.

use std::collections::BTreeSet;

use vellum_object::{CryptProvider, Dictionary, FilterService, Lifecycle, ObjRef, Object};
use vellum_pages::{NodeAccess, PagesError, PagesResult};
use vellum_reader::DocumentReader;
use vellum_xref::XrefTable;

/// Borrowed slice of a document, exposing the table (with lazy loading
/// through the reader, when one exists) as [`NodeAccess`].
pub struct TableAccess<'a> {
    pub reader: Option<&'a mut DocumentReader>,
    pub table: &'a mut XrefTable,
    pub filters: &'a dyn FilterService,
    pub crypt: &'a dyn CryptProvider,
    /// Numbers freed through this adapter; an append index must cover them.
    pub freed: &'a mut BTreeSet<u32>,
}

impl NodeAccess for TableAccess<'_> {
    fn get(&mut self, reference: ObjRef) -> PagesResult<Dictionary> {
        if let Some(reader) = self.reader.as_deref_mut() {
            reader
                .ensure_loaded(self.table, reference.number, self.filters, self.crypt)
                .map_err(|e| PagesError::Node(e.to_string()))?;
        }
        match self.table.get(reference.number).and_then(|e| e.object.as_ref()) {
            Some(Object::Dictionary(d)) => Ok(d.clone()),
            Some(other) => Err(PagesError::Node(format!(
                "node {} is a {:?}, not a dictionary",
                reference.number,
                other.kind()
            ))),
            None => Err(PagesError::Node(format!(
                "node {} has no loaded value",
                reference.number
            ))),
        }
    }

    fn set(&mut self, reference: ObjRef, dict: Dictionary) -> PagesResult<()> {
        let entry = self
            .table
            .get_mut(reference.number)
            .ok_or_else(|| PagesError::Node(format!("unknown node {}", reference.number)))?;
        if entry.state != Lifecycle::Modified {
            entry
                .state
                .transition(reference, Lifecycle::Modified)
                .map_err(|e| PagesError::Node(e.to_string()))?;
        }
        entry.object = Some(Object::Dictionary(dict));
        Ok(())
    }

    fn create(&mut self, dict: Dictionary) -> PagesResult<ObjRef> {
        self.table
            .add_object(Object::Dictionary(dict))
            .map_err(|e| PagesError::Node(e.to_string()))
    }

    fn free(&mut self, reference: ObjRef) -> PagesResult<()> {
        self.table
            .free(reference)
            .map_err(|e| PagesError::Node(e.to_string()))?;
        self.freed.insert(reference.number);
        Ok(())
    }
}
