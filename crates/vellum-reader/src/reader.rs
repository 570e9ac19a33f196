use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, warn};
use vellum_container::ContainerReader;
use vellum_object::{
    CryptProvider, Dictionary, FilterService, Lifecycle, ObjRef, Object,
};
use vellum_xref::{Location, XrefTable};

use crate::error::{ReadError, ReadResult};
use crate::parse::{parse_at, parse_indirect_at};
use crate::recovery;
use crate::source::ByteSource;
use crate::xref_parse;

/// Magic prefix every document starts with.
pub const HEADER_MAGIC: &[u8] = b"%vellum-";

/// Reader for one document instance.
///
/// Owns the byte source and the decoded-container cache; the
/// cross-reference table is owned by the document layer and passed in, so
/// writers and the flush engine can share it.
pub struct DocumentReader {
    source: ByteSource,
    /// Sticky: the declared index failed and a scan rebuilt it. Append-mode
    /// saves are forbidden for the rest of the instance.
    pub index_untrusted: bool,
    /// The source used a hybrid (legacy + companion stream) index.
    pub hybrid: bool,
    /// At least one index section was stream-style.
    pub used_stream_index: bool,
    containers: HashMap<u32, ContainerReader>,
}

impl DocumentReader {
    pub fn open(path: &Path) -> ReadResult<Self> {
        Self::new(ByteSource::open(path)?)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> ReadResult<Self> {
        Self::new(ByteSource::from_bytes(bytes))
    }

    fn new(source: ByteSource) -> ReadResult<Self> {
        let head = &source[..source.len().min(64)];
        if !head.starts_with(HEADER_MAGIC) {
            return Err(ReadError::NotAVellumFile);
        }
        Ok(Self {
            source,
            index_untrusted: false,
            hybrid: false,
            used_stream_index: false,
            containers: HashMap::new(),
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.source
    }

    pub fn source_len(&self) -> u64 {
        self.source.len() as u64
    }

    /// Parse the index chain into `table` and return the merged trailer.
    ///
    /// Any failure walking the declared sections triggers the one rebuild
    /// this instance gets; only the rebuild's own failure surfaces.
    pub fn load_index(
        &mut self,
        table: &mut XrefTable,
        filters: &dyn FilterService,
    ) -> ReadResult<Dictionary> {
        match xref_parse::load_index(&self.source, table, filters) {
            Ok(load) => {
                self.hybrid = load.hybrid;
                self.used_stream_index = load.used_stream_index;
                xref_parse::require_root(&load.trailer)?;
                Ok(load.trailer)
            }
            Err(e) => {
                warn!(error = %e, "index walk failed; rebuilding from scan");
                self.index_untrusted = true;
                let trailer = recovery::rebuild(&self.source, table, filters)?;
                xref_parse::require_root(&trailer)?;
                Ok(trailer)
            }
        }
    }

    /// Make sure object `number` is loaded into its slot.
    ///
    /// No-op for already-loaded, free, flushed, or currently-reading slots
    /// (the last is the self-reference guard: mid-parse lookups see null).
    pub fn ensure_loaded(
        &mut self,
        table: &mut XrefTable,
        number: u32,
        filters: &dyn FilterService,
        crypt: &dyn CryptProvider,
    ) -> ReadResult<()> {
        let entry = table.get(number).ok_or(ReadError::UnknownObject(number))?;
        match entry.state {
            Lifecycle::Resolved
            | Lifecycle::Modified
            | Lifecycle::Reading
            | Lifecycle::Free
            | Lifecycle::Flushed => return Ok(()),
            Lifecycle::Unresolved | Lifecycle::Released => {}
        }
        let reference = entry.reference;
        let location = entry.location;

        let entry = table.get_mut(number).expect("entry exists");
        entry.state.transition(reference, Lifecycle::Reading)?;

        let loaded = match location {
            Location::Offset(offset) => self.load_at_offset(table, reference, offset, crypt),
            Location::InContainer {
                container,
                position,
            } => self.load_from_container(table, reference, container, position, filters, crypt),
            Location::Unwritten | Location::Free { .. } => {
                // Nothing to parse; a fresh slot with no node reads as null.
                Ok(Object::Null)
            }
        };

        match loaded {
            Ok(object) => {
                let entry = table.get_mut(number).expect("entry exists");
                entry.object = Some(object);
                entry.state.transition(reference, Lifecycle::Resolved)?;
                Ok(())
            }
            Err(e) => {
                // Leave the slot re-readable rather than wedged in Reading.
                if let Some(entry) = table.get_mut(number) {
                    entry.state = Lifecycle::Unresolved;
                }
                Err(e)
            }
        }
    }

    /// Loaded view of an object, if its slot holds one.
    pub fn object_of<'t>(&self, table: &'t XrefTable, number: u32) -> Option<&'t Object> {
        table.get(number).and_then(|e| e.object.as_ref())
    }

    fn load_at_offset(
        &mut self,
        table: &mut XrefTable,
        reference: ObjRef,
        offset: u64,
        crypt: &dyn CryptProvider,
    ) -> ReadResult<Object> {
        match self.parse_checked(table, reference, offset, crypt) {
            Ok(object) => Ok(object),
            Err(ReadError::HeaderMismatch { .. }) => {
                // Fix path: rescan the file for headers, patch only the
                // offsets, then retry this one read.
                warn!(number = reference.number, offset, "header mismatch; patching offsets");
                let headers = recovery::scan_headers(&self.source);
                recovery::patch_offsets(table, &headers);
                self.index_untrusted = true;

                let patched = match table.get(reference.number).map(|e| e.location) {
                    Some(Location::Offset(o)) => o,
                    _ => offset,
                };
                self.parse_checked(table, reference, patched, crypt)
            }
            Err(other) => Err(other),
        }
    }

    /// Parse at `offset` and verify the header names this object.
    fn parse_checked(
        &self,
        table: &XrefTable,
        reference: ObjRef,
        offset: u64,
        crypt: &dyn CryptProvider,
    ) -> ReadResult<Object> {
        let data = self.source.as_slice();
        let mut resolve_len = |r: ObjRef| -> Option<i64> {
            let entry = table.get(r.number)?;
            if entry.state == Lifecycle::Reading {
                return None;
            }
            if let Some(Object::Integer(v)) = &entry.object {
                return Some(*v);
            }
            match entry.location {
                Location::Offset(o) => {
                    let mut no_len = |_: ObjRef| None;
                    parse_indirect_at(data, o as usize, &mut no_len)
                        .ok()
                        .and_then(|(_, obj)| obj.as_int().ok())
                }
                _ => None,
            }
        };

        let (found, object) = parse_indirect_at(data, offset as usize, &mut resolve_len)?;
        if found != reference {
            return Err(ReadError::HeaderMismatch {
                number: reference.number,
                found: found.to_string(),
            });
        }
        unwrap_in_place(object, reference, crypt)
    }

    fn load_from_container(
        &mut self,
        table: &mut XrefTable,
        reference: ObjRef,
        container: u32,
        position: u32,
        filters: &dyn FilterService,
        crypt: &dyn CryptProvider,
    ) -> ReadResult<Object> {
        // The container itself is an ordinary offset-addressed stream.
        self.ensure_loaded(table, container, filters, crypt)?;

        if !self.containers.contains_key(&container) {
            let stream = table
                .get(container)
                .and_then(|e| e.object.as_ref())
                .ok_or(ReadError::UnknownObject(container))?
                .as_stream()?;
            let decoded = ContainerReader::decode(stream, filters)?;
            debug!(container, members = decoded.member_count(), "container decoded");
            self.containers.insert(container, decoded);
        }
        let decoded = self.containers.get(&container).expect("just inserted");

        let bytes = match decoded.member(position as usize) {
            Ok((member_number, bytes)) if member_number == reference.number => bytes,
            // Index position and member index disagree; trust the number.
            _ => decoded.member_by_number(reference.number)?,
        };
        let mut no_len = |_: ObjRef| None;
        parse_at(bytes, 0, &mut no_len)
    }
}

/// Apply the crypt provider to every string and stream payload in a node.
fn unwrap_in_place(
    object: Object,
    reference: ObjRef,
    crypt: &dyn CryptProvider,
) -> ReadResult<Object> {
    let map_err = |reason: String| ReadError::Crypt {
        number: reference.number,
        reason,
    };
    Ok(match object {
        Object::String(bytes, kind) => {
            Object::String(crypt.unwrap(reference, &bytes).map_err(map_err)?, kind)
        }
        Object::Stream(mut stream) => {
            stream.data = crypt.unwrap(reference, &stream.data).map_err(map_err)?;
            Object::Stream(stream)
        }
        Object::Array(items) => Object::Array(
            items
                .into_iter()
                .map(|o| unwrap_in_place(o, reference, crypt))
                .collect::<ReadResult<_>>()?,
        ),
        Object::Dictionary(dict) => {
            let rebuilt = dict
                .iter()
                .map(|(k, v)| Ok((k.clone(), unwrap_in_place(v.clone(), reference, crypt)?)))
                .collect::<ReadResult<_>>()?;
            Object::Dictionary(rebuilt)
        }
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_container::StandardFilters;
    use vellum_object::{Name, NoopCrypt};

    /// Hand-assembled single-revision document with a legacy index.
    fn tiny_document() -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"%vellum-1.0\n");
        let o1 = out.len();
        out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
        let o2 = out.len();
        out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [] /Count 0 >> endobj\n");
        let xref = out.len();
        out.extend_from_slice(b"xref\n0 3\n");
        out.extend_from_slice(b"0000000000 65535 f\r\n");
        out.extend_from_slice(format!("{o1:010} 00000 n\r\n").as_bytes());
        out.extend_from_slice(format!("{o2:010} 00000 n\r\n").as_bytes());
        out.extend_from_slice(b"trailer << /Size 3 /Root 1 0 R >>\n");
        out.extend_from_slice(format!("startxref\n{xref}\n%%EOF\n").as_bytes());
        out
    }

    #[test]
    fn open_rejects_foreign_bytes() {
        assert!(matches!(
            DocumentReader::from_bytes(b"%PDF-1.7\n".to_vec()),
            Err(ReadError::NotAVellumFile)
        ));
    }

    #[test]
    fn index_walk_and_lazy_load() {
        let mut reader = DocumentReader::from_bytes(tiny_document()).unwrap();
        let mut table = XrefTable::new();
        let trailer = reader.load_index(&mut table, &StandardFilters).unwrap();
        assert!(!reader.index_untrusted);
        assert_eq!(trailer.get_ref("Root"), Some(ObjRef::new(1, 0)));
        assert_eq!(table.size(), 3);

        // Nothing loaded yet.
        assert!(table.get(1).unwrap().object.is_none());

        reader
            .ensure_loaded(&mut table, 1, &StandardFilters, &NoopCrypt)
            .unwrap();
        let catalog = reader.object_of(&table, 1).unwrap();
        assert!(catalog.as_dict().unwrap().is_type("Catalog"));
        assert_eq!(table.get(1).unwrap().state, Lifecycle::Resolved);
    }

    #[test]
    fn broken_index_falls_back_to_rebuild() {
        let mut bytes = tiny_document();
        // Point startxref into the middle of an object.
        let pos = bytes.windows(9).rposition(|w| w == b"startxref").unwrap();
        bytes.truncate(pos);
        bytes.extend_from_slice(b"startxref\n5\n%%EOF\n");

        let mut reader = DocumentReader::from_bytes(bytes).unwrap();
        let mut table = XrefTable::new();
        let trailer = reader.load_index(&mut table, &StandardFilters).unwrap();
        assert!(reader.index_untrusted);
        assert_eq!(trailer.get_ref("Root"), Some(ObjRef::new(1, 0)));

        reader
            .ensure_loaded(&mut table, 2, &StandardFilters, &NoopCrypt)
            .unwrap();
        let pages = reader.object_of(&table, 2).unwrap();
        assert_eq!(pages.as_dict().unwrap().get_int("Count"), Some(0));
    }

    #[test]
    fn corrupted_offset_takes_the_fix_path() {
        let bytes = tiny_document();
        let mut reader = DocumentReader::from_bytes(bytes.clone()).unwrap();
        let mut table = XrefTable::new();
        reader.load_index(&mut table, &StandardFilters).unwrap();

        // Corrupt object 1's recorded offset to point at object 2's header.
        let o2 = bytes.windows(7).position(|w| w == b"2 0 obj").unwrap() as u64;
        table.get_mut(1).unwrap().location = Location::Offset(o2);

        reader
            .ensure_loaded(&mut table, 1, &StandardFilters, &NoopCrypt)
            .unwrap();
        let catalog = reader.object_of(&table, 1).unwrap();
        assert!(catalog.as_dict().unwrap().is_type("Catalog"));
        // The document is no longer trusted for append saves.
        assert!(reader.index_untrusted);
    }

    #[test]
    fn hybrid_source_reads_through_the_stream_companion() {
        use vellum_writer::{SaveSession, TrailerInfo, WriteStyle};

        let mut table = XrefTable::new();
        let catalog: Dictionary = [
            (Name::new("Type"), Object::name("Catalog")),
            (Name::new("Pages"), Object::Reference(ObjRef::new(2, 0))),
        ]
        .into_iter()
        .collect();
        let pages: Dictionary = [
            (Name::new("Type"), Object::name("Pages")),
            (Name::new("Kids"), Object::Array(Vec::new())),
            (Name::new("Count"), Object::Integer(0)),
        ]
        .into_iter()
        .collect();
        let root = table.add_object(Object::Dictionary(catalog)).unwrap();
        table.add_object(Object::Dictionary(pages)).unwrap();

        let mut session = SaveSession::fresh(WriteStyle::Plain);
        for n in 1..=2u32 {
            let object = table.get_mut(n).unwrap().object.take().unwrap();
            let r = table.get(n).unwrap().reference;
            session.stage_object(&mut table, r, &object, &NoopCrypt).unwrap();
        }
        session
            .finish(
                &mut table,
                &TrailerInfo { root: Some(root), ..Default::default() },
                true,
            )
            .unwrap();

        let mut reader = DocumentReader::from_bytes(session.into_bytes()).unwrap();
        let mut fresh = XrefTable::new();
        let trailer = reader.load_index(&mut fresh, &StandardFilters).unwrap();
        assert!(reader.hybrid);
        assert!(!reader.index_untrusted);
        assert_eq!(trailer.get_ref("Root"), Some(root));

        reader
            .ensure_loaded(&mut fresh, 1, &StandardFilters, &NoopCrypt)
            .unwrap();
        let loaded = reader.object_of(&fresh, 1).unwrap();
        assert!(loaded.as_dict().unwrap().is_type("Catalog"));
    }

    #[test]
    fn free_slots_read_as_absent() {
        let mut reader = DocumentReader::from_bytes(tiny_document()).unwrap();
        let mut table = XrefTable::new();
        reader.load_index(&mut table, &StandardFilters).unwrap();
        reader
            .ensure_loaded(&mut table, 0, &StandardFilters, &NoopCrypt)
            .unwrap();
        assert!(reader.object_of(&table, 0).is_none());
    }
}
