//! The document facade.
//!
//! A [`Document`] owns the byte source, the cross-reference table, the page
//! tree, and the trailer, and wires the collaborator services through every
//! operation. Saving runs through a [`SaveSession`]: the flush engine can
//! stream objects into an open session early, and `save`/`close` complete
//! the same session.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use vellum_container::StandardFilters;
use vellum_object::{
    CryptProvider, Dictionary, FilterService, Lifecycle, Name, NoopCrypt, ObjRef, Object,
};
use vellum_pages::PageTree;
use vellum_reader::{xref_parse, DocumentReader};
use vellum_writer::{refresh_id, SaveMode, SaveSession, TrailerInfo};
use vellum_xref::{CappedCapacity, Location, UnlimitedCapacity, XrefTable};

use crate::access::TableAccess;
use crate::config::DocumentConfig;
use crate::error::{DocError, DocResult};
use crate::flush::{Engine, FlushMode};

pub struct Document {
    reader: Option<DocumentReader>,
    table: XrefTable,
    trailer: Dictionary,
    pages: PageTree,
    fonts: HashSet<u32>,
    layers: HashSet<u32>,
    config: DocumentConfig,
    crypt: Box<dyn CryptProvider>,
    filters: Box<dyn FilterService>,
    target: Option<PathBuf>,
    session: Option<SaveSession>,
    freed: BTreeSet<u32>,
    /// Offset of the newest on-disk index, for /Prev in append saves.
    prev_start: Option<u64>,
    writable: bool,
}

impl Document {
    // ---------------------------------------------------------------
    // Construction
    // ---------------------------------------------------------------

    pub fn open(path: impl AsRef<Path>) -> DocResult<Self> {
        Self::open_with(path, DocumentConfig::default())
    }

    pub fn open_with(path: impl AsRef<Path>, config: DocumentConfig) -> DocResult<Self> {
        let path = path.as_ref();
        let reader = DocumentReader::open(path)?;
        let doc = Self::from_reader(reader, config, Some(path.to_owned()), true)?;
        info!(path = %path.display(), pages = doc.page_count(), "document opened");
        Ok(doc)
    }

    /// Open from an in-memory buffer. The result is read-only: reads and
    /// releases work, flush-style calls and in-place saves do not.
    pub fn from_bytes(bytes: Vec<u8>) -> DocResult<Self> {
        Self::from_bytes_with(bytes, DocumentConfig::default())
    }

    pub fn from_bytes_with(bytes: Vec<u8>, config: DocumentConfig) -> DocResult<Self> {
        let reader = DocumentReader::from_bytes(bytes)?;
        Self::from_reader(reader, config, None, false)
    }

    fn from_reader(
        mut reader: DocumentReader,
        config: DocumentConfig,
        target: Option<PathBuf>,
        writable: bool,
    ) -> DocResult<Self> {
        let filters: Box<dyn FilterService> = Box::new(StandardFilters);
        let crypt: Box<dyn CryptProvider> = Box::new(NoopCrypt);

        let mut table = new_table(&config);
        let trailer = reader.load_index(&mut table, filters.as_ref())?;
        table.rebuild_free_list()?;
        let prev_start = xref_parse::find_startxref(reader.data()).ok();

        let catalog = xref_parse::require_root(&trailer)?;
        reader.ensure_loaded(&mut table, catalog.number, filters.as_ref(), crypt.as_ref())?;
        let catalog_dict = match table.get(catalog.number).and_then(|e| e.object.as_ref()) {
            Some(Object::Dictionary(d)) => d.clone(),
            _ => return Err(DocError::MissingPages),
        };
        let pages_root = catalog_dict.get_ref("Pages").ok_or(DocError::MissingPages)?;

        let mut layers = HashSet::new();
        collect_layers(
            &mut reader,
            &mut table,
            filters.as_ref(),
            crypt.as_ref(),
            &catalog_dict,
            &mut layers,
        )?;

        let mut freed = BTreeSet::new();
        let mut access = TableAccess {
            reader: Some(&mut reader),
            table: &mut table,
            filters: filters.as_ref(),
            crypt: crypt.as_ref(),
            freed: &mut freed,
        };
        let pages = PageTree::load(pages_root, config.fan_out, &mut access)?;

        pin(&mut table, catalog.number);
        pin(&mut table, pages_root.number);

        Ok(Self {
            reader: Some(reader),
            table,
            trailer,
            pages,
            fonts: HashSet::new(),
            layers,
            config,
            crypt,
            filters,
            target,
            session: None,
            freed,
            prev_start,
            writable,
        })
    }

    /// A brand-new empty document: catalog, empty page root, fresh trailer.
    pub fn create() -> DocResult<Self> {
        Self::create_with(DocumentConfig::default())
    }

    pub fn create_with(config: DocumentConfig) -> DocResult<Self> {
        let mut table = new_table(&config);

        let mut root_dict = Dictionary::new();
        root_dict.insert(Name::new("Type"), Object::name("Pages"));
        root_dict.insert(Name::new("Kids"), Object::Array(Vec::new()));
        root_dict.insert(Name::new("Count"), Object::Integer(0));
        let pages_root = table.add_object(Object::Dictionary(root_dict))?;

        let mut catalog = Dictionary::new();
        catalog.insert(Name::new("Type"), Object::name("Catalog"));
        catalog.insert(Name::new("Pages"), Object::Reference(pages_root));
        let catalog_ref = table.add_object(Object::Dictionary(catalog))?;

        let mut trailer = Dictionary::new();
        trailer.insert(Name::new("Root"), Object::Reference(catalog_ref));

        pin(&mut table, catalog_ref.number);
        pin(&mut table, pages_root.number);

        Ok(Self {
            reader: None,
            table,
            trailer,
            pages: PageTree::new(pages_root, config.fan_out),
            fonts: HashSet::new(),
            layers: HashSet::new(),
            config,
            crypt: Box::new(NoopCrypt),
            filters: Box::new(StandardFilters),
            target: None,
            session: None,
            freed: BTreeSet::new(),
            prev_start: None,
            writable: true,
        })
    }

    /// Swap in an encryption service. Affects every later load and save.
    pub fn set_crypt_provider(&mut self, crypt: Box<dyn CryptProvider>) {
        self.crypt = crypt;
    }

    pub fn set_filter_service(&mut self, filters: Box<dyn FilterService>) {
        self.filters = filters;
    }

    // ---------------------------------------------------------------
    // Table surface
    // ---------------------------------------------------------------

    /// Resolve and return the node at `number`. Free and unwritten slots
    /// read as `None`.
    pub fn get_object(&mut self, number: u32) -> DocResult<Option<&Object>> {
        if let Some(reader) = self.reader.as_mut() {
            reader.ensure_loaded(
                &mut self.table,
                number,
                self.filters.as_ref(),
                self.crypt.as_ref(),
            )?;
        }
        Ok(self.table.get(number).and_then(|e| e.object.as_ref()))
    }

    pub fn add_object(&mut self, object: Object) -> DocResult<ObjRef> {
        Ok(self.table.add_object(object)?)
    }

    pub fn free_object(&mut self, reference: ObjRef) -> DocResult<()> {
        self.table.free(reference)?;
        self.freed.insert(reference.number);
        Ok(())
    }

    pub fn create_next_reference(&mut self) -> DocResult<ObjRef> {
        Ok(self.table.create_next()?)
    }

    /// Attach (or replace) the node behind a reference and mark it dirty.
    pub fn set_object(&mut self, reference: ObjRef, object: Object) -> DocResult<()> {
        let entry = self
            .table
            .get_mut(reference.number)
            .ok_or(vellum_xref::XrefError::UnknownNumber(reference.number))?;
        if entry.state != Lifecycle::Modified {
            entry.state.transition(reference, Lifecycle::Modified)?;
        }
        entry.object = Some(object);
        Ok(())
    }

    pub fn size(&self) -> u32 {
        self.table.size()
    }

    pub fn trailer(&self) -> &Dictionary {
        &self.trailer
    }

    /// Borrow the cross-reference table, for inspection tooling.
    pub fn xref(&self) -> &XrefTable {
        &self.table
    }

    /// True when the on-disk index had to be rebuilt or patched.
    pub fn index_untrusted(&self) -> bool {
        self.reader.as_ref().is_some_and(|r| r.index_untrusted)
    }

    /// True when the source carried both a legacy index and a stream index.
    pub fn hybrid_index(&self) -> bool {
        self.reader.as_ref().is_some_and(|r| r.hybrid)
    }

    /// True when the newest revision's index was a stream.
    pub fn used_stream_index(&self) -> bool {
        self.reader.as_ref().is_some_and(|r| r.used_stream_index)
    }

    // ---------------------------------------------------------------
    // Page surface
    // ---------------------------------------------------------------

    pub fn page_count(&self) -> usize {
        self.pages.count()
    }

    pub fn get_page(&self, index: usize) -> DocResult<ObjRef> {
        Ok(self.pages.get_page(index)?)
    }

    pub fn find_page_parent(&self, index: usize) -> DocResult<ObjRef> {
        Ok(self.pages.find_page_parent(index)?)
    }

    pub fn add_page(&mut self, page: Dictionary) -> DocResult<ObjRef> {
        let mut access = TableAccess {
            reader: self.reader.as_mut(),
            table: &mut self.table,
            filters: self.filters.as_ref(),
            crypt: self.crypt.as_ref(),
            freed: &mut self.freed,
        };
        Ok(self.pages.add_page(page, &mut access)?)
    }

    pub fn insert_page(&mut self, index: usize, page: Dictionary) -> DocResult<ObjRef> {
        let mut access = TableAccess {
            reader: self.reader.as_mut(),
            table: &mut self.table,
            filters: self.filters.as_ref(),
            crypt: self.crypt.as_ref(),
            freed: &mut self.freed,
        };
        Ok(self.pages.insert_page(index, page, &mut access)?)
    }

    pub fn remove_page(&mut self, index: usize) -> DocResult<()> {
        let mut access = TableAccess {
            reader: self.reader.as_mut(),
            table: &mut self.table,
            filters: self.filters.as_ref(),
            crypt: self.crypt.as_ref(),
            freed: &mut self.freed,
        };
        Ok(self.pages.remove_page(index, &mut access)?)
    }

    // ---------------------------------------------------------------
    // Registries
    // ---------------------------------------------------------------

    /// Exclude a document-wide font from page traversals. It is written
    /// once, by the whole-collection pass when the session completes.
    pub fn register_font(&mut self, reference: ObjRef) {
        self.fonts.insert(reference.number);
    }

    /// Exclude an optional-content layer from page traversals.
    pub fn register_layer(&mut self, reference: ObjRef) {
        self.layers.insert(reference.number);
    }

    // ---------------------------------------------------------------
    // Flush engine surface
    // ---------------------------------------------------------------

    /// Write the page and everything reachable under its traversal contexts,
    /// dropping the written nodes from memory.
    pub fn flush_deep(&mut self, index: usize) -> DocResult<()> {
        if !self.writable {
            return Err(DocError::ReadOnly);
        }
        let page = self.pages.get_page(index)?;
        let mode = self.full_save_mode();
        self.ensure_session(mode)?;
        self.engine().run(page, FlushMode::Flush)?;
        Ok(())
    }

    /// Drop the page's clean reachable nodes from memory without writing.
    /// Safe to repeat; already-released nodes are untouched.
    pub fn release_deep(&mut self, index: usize) -> DocResult<()> {
        let page = self.pages.get_page(index)?;
        self.engine().run(page, FlushMode::Release)?;
        Ok(())
    }

    /// Append-save traversal: modified nodes are written, clean ones
    /// released, so an unmodified page costs no output bytes.
    pub fn append_mode_flush(&mut self, index: usize) -> DocResult<()> {
        if !self.writable {
            return Err(DocError::ReadOnly);
        }
        self.check_append_allowed()?;
        let page = self.pages.get_page(index)?;
        self.ensure_session(SaveMode::Append)?;
        self.engine().run(page, FlushMode::AppendFlush)?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Saving
    // ---------------------------------------------------------------

    /// Save in place to the path the document was opened from.
    pub fn save(&mut self, mode: SaveMode) -> DocResult<()> {
        let target = self.target.clone().ok_or(DocError::ReadOnly)?;
        self.save_to(target, mode)
    }

    pub fn save_to(&mut self, path: impl AsRef<Path>, mode: SaveMode) -> DocResult<()> {
        let path = path.as_ref();
        if mode == SaveMode::Append {
            self.check_append_allowed()?;
        }
        self.ensure_session(mode)?;

        if mode != SaveMode::Append {
            let mut access = TableAccess {
                reader: self.reader.as_mut(),
                table: &mut self.table,
                filters: self.filters.as_ref(),
                crypt: self.crypt.as_ref(),
                freed: &mut self.freed,
            };
            self.pages.generate_tree(&mut access)?;
            self.load_all()?;
        }

        self.complete_session(path, mode)?;
        info!(path = %path.display(), ?mode, "document saved");
        Ok(())
    }

    /// Finish any open session, then drop every slot and detach composite
    /// children so backing storage is reclaimed immediately.
    pub fn close(&mut self) -> DocResult<()> {
        if let Some(session) = self.session.as_ref() {
            let mode = session.mode();
            let target = self.target.clone().ok_or(DocError::ReadOnly)?;
            self.complete_session(&target, mode)?;
        }
        self.table.clear();
        debug!("document closed");
        Ok(())
    }

    // ---------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------

    fn engine(&mut self) -> Engine<'_> {
        Engine {
            table: &mut self.table,
            session: self.session.as_mut(),
            crypt: self.crypt.as_ref(),
            fonts: &self.fonts,
            layers: &self.layers,
        }
    }

    fn full_save_mode(&self) -> SaveMode {
        if self.reader.is_some() {
            SaveMode::Rewrite
        } else {
            SaveMode::Fresh
        }
    }

    fn check_append_allowed(&self) -> DocResult<()> {
        let Some(reader) = self.reader.as_ref() else {
            return Err(DocError::AppendForbidden("no prior revision to append to"));
        };
        if reader.index_untrusted {
            return Err(DocError::AppendForbidden(
                "the source index had to be rebuilt or patched",
            ));
        }
        Ok(())
    }

    fn ensure_session(&mut self, mode: SaveMode) -> DocResult<()> {
        if let Some(open) = self.session.as_ref() {
            if open.mode() != mode {
                return Err(DocError::SaveConflict);
            }
            return Ok(());
        }
        let style = self.config.write_style;
        let mut session = match mode {
            SaveMode::Fresh => SaveSession::fresh(style),
            SaveMode::Rewrite => SaveSession::rewrite(style),
            SaveMode::Append => {
                let base = self.reader.as_ref().map_or(0, DocumentReader::source_len);
                SaveSession::append(base, style)
            }
        };
        session.set_max_container_members(self.config.max_container_members);
        self.session = Some(session);
        Ok(())
    }

    /// A full save needs every live object resident.
    fn load_all(&mut self) -> DocResult<()> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(());
        };
        let pending: Vec<u32> = self
            .table
            .numbers()
            .filter(|&n| n != 0)
            .filter(|&n| {
                self.table.get(n).is_some_and(|e| {
                    matches!(e.state, Lifecycle::Unresolved | Lifecycle::Released)
                        && matches!(
                            e.location,
                            Location::Offset(_) | Location::InContainer { .. }
                        )
                })
            })
            .collect();
        for number in pending {
            reader.ensure_loaded(
                &mut self.table,
                number,
                self.filters.as_ref(),
                self.crypt.as_ref(),
            )?;
        }
        Ok(())
    }

    /// Stage everything still owed, close the index, and write the file.
    fn complete_session(&mut self, path: &Path, mode: SaveMode) -> DocResult<()> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };

        for number in std::mem::take(&mut self.freed) {
            session.note_touched(number);
        }

        // Nodes queued by a traversal may never have been loaded.
        let pending: Vec<u32> = self
            .table
            .numbers()
            .filter(|&n| {
                self.table.get(n).is_some_and(|e| {
                    e.must_flush
                        && !e.state.is_loaded()
                        && matches!(
                            e.location,
                            Location::Offset(_) | Location::InContainer { .. }
                        )
                })
            })
            .collect();
        if let Some(reader) = self.reader.as_mut() {
            for number in pending {
                reader.ensure_loaded(
                    &mut self.table,
                    number,
                    self.filters.as_ref(),
                    self.crypt.as_ref(),
                )?;
            }
        }

        // Whole-collection pass: registered fonts and layers write here,
        // once, no matter which traversals ran.
        Engine {
            table: &mut self.table,
            session: Some(&mut session),
            crypt: self.crypt.as_ref(),
            fonts: &self.fonts,
            layers: &self.layers,
        }
        .flush_registries()?;

        // Stage loop: everything modified, plus (for full saves) every
        // resident clean node, plus anything a traversal queued.
        let numbers: Vec<u32> = self.table.numbers().filter(|&n| n != 0).collect();
        for number in numbers {
            let Some(entry) = self.table.get_mut(number) else {
                continue;
            };
            let write = match entry.state {
                Lifecycle::Modified => true,
                Lifecycle::Resolved => mode != SaveMode::Append || entry.must_flush,
                _ => entry.must_flush,
            };
            if !write {
                continue;
            }
            let Some(object) = entry.object.take() else {
                continue;
            };
            let reference = entry.reference;
            session.stage_object(&mut self.table, reference, &object, self.crypt.as_ref())?;
        }

        if mode != SaveMode::Append {
            self.table.trim_trailing_free();
        }

        let id = refresh_id(self.trailer.get("ID"), &session.position().to_le_bytes());
        self.trailer.insert(Name::new("ID"), id.clone());
        let info = TrailerInfo {
            root: self.trailer.get_ref("Root"),
            info: self.trailer.get_ref("Info"),
            id: Some(id),
            prev: match mode {
                SaveMode::Append => self.prev_start,
                _ => None,
            },
        };
        // A hybrid source keeps its dual index on any save over the same
        // lineage; only a fresh document picks a single encoding.
        let hybrid = mode != SaveMode::Fresh
            && self.reader.as_ref().is_some_and(|r| r.hybrid);
        session.finish(&mut self.table, &info, hybrid)?;

        let bytes = match mode {
            SaveMode::Append => {
                let mut out = self
                    .reader
                    .as_ref()
                    .map(|r| r.data().to_vec())
                    .unwrap_or_default();
                out.extend_from_slice(&session.into_bytes());
                out
            }
            _ => session.into_bytes(),
        };
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

fn new_table(config: &DocumentConfig) -> XrefTable {
    match config.capacity_limit {
        Some(max) => XrefTable::with_policy(Box::new(CappedCapacity::new(max))),
        None => XrefTable::with_policy(Box::new(UnlimitedCapacity)),
    }
}

/// Structural nodes stay resident across release passes.
fn pin(table: &mut XrefTable, number: u32) {
    if let Some(entry) = table.get_mut(number) {
        entry.release_forbidden = true;
    }
}

/// Register every optional-content layer the catalog declares.
fn collect_layers(
    reader: &mut DocumentReader,
    table: &mut XrefTable,
    filters: &dyn FilterService,
    crypt: &dyn CryptProvider,
    catalog: &Dictionary,
    layers: &mut HashSet<u32>,
) -> DocResult<()> {
    let properties = match catalog.get("OCProperties") {
        Some(Object::Dictionary(d)) => d.clone(),
        Some(Object::Reference(r)) => {
            reader.ensure_loaded(table, r.number, filters, crypt)?;
            match table.get(r.number).and_then(|e| e.object.as_ref()) {
                Some(Object::Dictionary(d)) => d.clone(),
                _ => return Ok(()),
            }
        }
        _ => return Ok(()),
    };
    if let Some(ocgs) = properties.get_array("OCGs") {
        for item in ocgs {
            if let Object::Reference(r) = item {
                layers.insert(r.number);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet as StdHashSet;
    use vellum_writer::{SaveSession, TrailerInfo, WriteStyle};

    fn plain_config() -> DocumentConfig {
        DocumentConfig {
            write_style: WriteStyle::Plain,
            ..DocumentConfig::default()
        }
    }

    /// Build a document with `pages` one-entry pages and save it fresh.
    fn saved_pages(dir: &Path, pages: usize, config: DocumentConfig) -> PathBuf {
        let path = dir.join("doc.vlm");
        let mut doc = Document::create_with(config).unwrap();
        for i in 0..pages {
            let mut d = Dictionary::new();
            d.insert(Name::new("Idx"), Object::Integer(i as i64));
            doc.add_page(d).unwrap();
        }
        doc.save_to(&path, SaveMode::Fresh).unwrap();
        path
    }

    fn page_state(doc: &Document, index: usize) -> Lifecycle {
        let page = doc.pages.get_page(index).unwrap();
        doc.table.get(page.number).unwrap().state
    }

    #[test]
    fn twenty_five_pages_group_by_fan_out_and_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.vlm");

        let mut doc = Document::create().unwrap();
        for _ in 0..25 {
            doc.add_page(Dictionary::new()).unwrap();
        }
        assert_eq!(doc.page_count(), 25);

        // Default fan-out 10: pages 0-9, 10-19, 20-24 sit under three parents.
        let parents: StdHashSet<u32> = (0..25)
            .map(|i| doc.find_page_parent(i).unwrap().number)
            .collect();
        assert_eq!(parents.len(), 3);
        assert_eq!(
            doc.find_page_parent(0).unwrap(),
            doc.find_page_parent(9).unwrap()
        );
        assert_ne!(
            doc.find_page_parent(9).unwrap(),
            doc.find_page_parent(10).unwrap()
        );

        doc.save_to(&path, SaveMode::Fresh).unwrap();

        let mut reopened = Document::open(&path).unwrap();
        assert_eq!(reopened.page_count(), 25);
        let root = reopened.pages.root();
        let Some(Object::Dictionary(root_dict)) = reopened.get_object(root.number).unwrap() else {
            panic!("root is not a dictionary");
        };
        assert_eq!(root_dict.get_int("Count"), Some(25));
    }

    #[test]
    fn plain_save_round_trips_page_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = saved_pages(dir.path(), 3, plain_config());

        let mut doc = Document::open_with(&path, plain_config()).unwrap();
        assert_eq!(doc.page_count(), 3);
        let page = doc.get_page(1).unwrap();
        let Some(Object::Dictionary(d)) = doc.get_object(page.number).unwrap() else {
            panic!("page is not a dictionary");
        };
        assert_eq!(d.get_int("Idx"), Some(1));
        assert!(d.is_type("Page"));
    }

    #[test]
    fn append_with_unmodified_page_writes_no_page_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = saved_pages(dir.path(), 1, plain_config());
        let original = std::fs::read(&path).unwrap();

        let mut doc = Document::open_with(&path, plain_config()).unwrap();
        doc.append_mode_flush(0).unwrap();
        // The clean page was released, not flushed.
        assert_eq!(page_state(&doc, 0), Lifecycle::Released);

        doc.save(SaveMode::Append).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.len() > original.len());
        assert_eq!(&bytes[..original.len()], &original[..]);

        let delta = String::from_utf8_lossy(&bytes[original.len()..]);
        assert!(!delta.contains("Page"), "page bytes leaked into the delta");
        assert!(delta.contains("/Prev"));

        let reopened = Document::open(&path).unwrap();
        assert_eq!(reopened.page_count(), 1);
    }

    #[test]
    fn append_writes_a_modified_page() {
        let dir = tempfile::tempdir().unwrap();
        let path = saved_pages(dir.path(), 2, plain_config());
        let base_len = std::fs::read(&path).unwrap().len();

        let mut doc = Document::open_with(&path, plain_config()).unwrap();
        let page = doc.get_page(0).unwrap();
        let Some(Object::Dictionary(d)) = doc.get_object(page.number).unwrap() else {
            panic!("page is not a dictionary");
        };
        let mut d = d.clone();
        d.insert(Name::new("Touched"), Object::Boolean(true));
        doc.set_object(page, Object::Dictionary(d)).unwrap();

        doc.append_mode_flush(0).unwrap();
        assert_eq!(page_state(&doc, 0), Lifecycle::Flushed);
        match doc.table.get(page.number).unwrap().location {
            Location::Offset(off) => assert!(off >= base_len as u64),
            other => panic!("unexpected location {other:?}"),
        }

        doc.save(SaveMode::Append).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        let delta = String::from_utf8_lossy(&bytes[base_len..]);
        assert!(delta.contains("/Touched true"));

        let mut reopened = Document::open_with(&path, plain_config()).unwrap();
        let page = reopened.get_page(0).unwrap();
        let Some(Object::Dictionary(d)) = reopened.get_object(page.number).unwrap() else {
            panic!("page is not a dictionary");
        };
        assert_eq!(d.get("Touched"), Some(&Object::Boolean(true)));
    }

    #[test]
    fn corrupted_offset_takes_the_fix_path_and_forbids_append() {
        let mut out = Vec::new();
        out.extend_from_slice(b"%vellum-1.0\n");
        let o1 = out.len();
        out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
        let o2 = out.len();
        out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
        out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /Idx 7 >> endobj\n");
        let xref = out.len();
        out.extend_from_slice(b"xref\n0 4\n");
        out.extend_from_slice(b"0000000000 65535 f\r\n");
        out.extend_from_slice(format!("{o1:010} 00000 n\r\n").as_bytes());
        out.extend_from_slice(format!("{o2:010} 00000 n\r\n").as_bytes());
        // Object 3's record lies: it points at object 1's header.
        out.extend_from_slice(format!("{o1:010} 00000 n\r\n").as_bytes());
        out.extend_from_slice(b"trailer << /Size 4 /Root 1 0 R >>\n");
        out.extend_from_slice(format!("startxref\n{xref}\n%%EOF\n").as_bytes());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.vlm");
        std::fs::write(&path, out).unwrap();

        // Opening loads the page through the fix path.
        let mut doc = Document::open(&path).unwrap();
        assert_eq!(doc.page_count(), 1);
        let Some(Object::Dictionary(d)) = doc.get_object(3).unwrap() else {
            panic!("page is not a dictionary");
        };
        assert_eq!(d.get_int("Idx"), Some(7));

        // A patched index is sticky-untrusted.
        assert!(matches!(
            doc.save(SaveMode::Append),
            Err(DocError::AppendForbidden(_))
        ));
    }

    #[test]
    fn release_deep_is_idempotent_and_re_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = saved_pages(dir.path(), 1, plain_config());
        let mut doc = Document::open_with(&path, plain_config()).unwrap();

        assert_eq!(page_state(&doc, 0), Lifecycle::Resolved);
        doc.release_deep(0).unwrap();
        assert_eq!(page_state(&doc, 0), Lifecycle::Released);
        doc.release_deep(0).unwrap();
        assert_eq!(page_state(&doc, 0), Lifecycle::Released);

        // A released page reloads on demand.
        let page = doc.get_page(0).unwrap();
        assert!(doc.get_object(page.number).unwrap().is_some());
        assert_eq!(page_state(&doc, 0), Lifecycle::Resolved);
    }

    #[test]
    fn read_only_documents_reject_flush_style_calls() {
        let dir = tempfile::tempdir().unwrap();
        let path = saved_pages(dir.path(), 1, plain_config());
        let bytes = std::fs::read(&path).unwrap();

        let mut doc = Document::from_bytes(bytes).unwrap();
        assert!(matches!(doc.flush_deep(0), Err(DocError::ReadOnly)));
        assert!(matches!(doc.append_mode_flush(0), Err(DocError::ReadOnly)));
        // Reading still works.
        let page = doc.get_page(0).unwrap();
        assert!(doc.get_object(page.number).unwrap().is_some());
    }

    #[test]
    fn cyclic_action_graph_flushes_without_recursing_forever() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cyclic.vlm");

        let mut doc = Document::create().unwrap();
        let action = doc.create_next_reference().unwrap();
        let mut action_dict = Dictionary::new();
        action_dict.insert(Name::new("S"), Object::name("Loop"));
        action_dict.insert(Name::new("Next"), Object::Reference(action));
        doc.set_object(action, Object::Dictionary(action_dict)).unwrap();

        let mut page = Dictionary::new();
        page.insert(Name::new("AA"), Object::Reference(action));
        doc.add_page(page).unwrap();

        doc.flush_deep(0).unwrap();
        assert_eq!(
            doc.table.get(action.number).unwrap().state,
            Lifecycle::Flushed
        );

        doc.save_to(&path, SaveMode::Fresh).unwrap();
        let reopened = Document::open(&path).unwrap();
        assert_eq!(reopened.page_count(), 1);
    }

    #[test]
    fn registered_fonts_skip_page_traversal_but_reach_the_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fonts.vlm");

        let mut doc = Document::create_with(plain_config()).unwrap();
        let mut font = Dictionary::new();
        font.insert(Name::new("Type"), Object::name("Font"));
        let font_ref = doc.add_object(Object::Dictionary(font)).unwrap();
        doc.register_font(font_ref);

        let mut resources = Dictionary::new();
        resources.insert(Name::new("Font"), Object::Reference(font_ref));
        let res_ref = doc.add_object(Object::Dictionary(resources)).unwrap();
        let mut page = Dictionary::new();
        page.insert(Name::new("Resources"), Object::Reference(res_ref));
        doc.add_page(page).unwrap();

        doc.flush_deep(0).unwrap();
        // Excluded from the traversal: still resident and dirty.
        assert_eq!(
            doc.table.get(font_ref.number).unwrap().state,
            Lifecycle::Modified
        );

        doc.save_to(&path, SaveMode::Fresh).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("/Type /Font"));
    }

    #[test]
    fn append_rewrites_registry_fonts_queued_by_the_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fonts.vlm");

        let mut doc = Document::create_with(plain_config()).unwrap();
        let mut font = Dictionary::new();
        font.insert(Name::new("Type"), Object::name("Font"));
        font.insert(Name::new("BaseFont"), Object::name("Helvetica"));
        let font_ref = doc.add_object(Object::Dictionary(font)).unwrap();
        doc.register_font(font_ref);
        let mut resources = Dictionary::new();
        resources.insert(Name::new("Font"), Object::Reference(font_ref));
        let res_ref = doc.add_object(Object::Dictionary(resources)).unwrap();
        let mut page = Dictionary::new();
        page.insert(Name::new("Resources"), Object::Reference(res_ref));
        doc.add_page(page).unwrap();
        doc.save_to(&path, SaveMode::Fresh).unwrap();
        let base_len = std::fs::read(&path).unwrap().len();

        let mut doc = Document::open_with(&path, plain_config()).unwrap();
        doc.register_font(font_ref);
        // Resident resources so the traversal sees the font reference.
        doc.get_object(res_ref.number).unwrap();
        let page = doc.get_page(0).unwrap();
        let Some(Object::Dictionary(d)) = doc.get_object(page.number).unwrap() else {
            panic!("page is not a dictionary");
        };
        let mut d = d.clone();
        d.insert(Name::new("Rotate"), Object::Integer(90));
        doc.set_object(page, Object::Dictionary(d)).unwrap();

        doc.append_mode_flush(0).unwrap();
        // Queued by the traversal, not written by it; the font itself was
        // never even loaded.
        let entry = doc.table.get(font_ref.number).unwrap();
        assert!(entry.must_flush);
        assert_eq!(entry.state, Lifecycle::Unresolved);

        doc.save(SaveMode::Append).unwrap();
        assert_eq!(
            doc.table.get(font_ref.number).unwrap().state,
            Lifecycle::Flushed
        );
        let bytes = std::fs::read(&path).unwrap();
        let delta = String::from_utf8_lossy(&bytes[base_len..]);
        assert!(delta.contains("/BaseFont /Helvetica"));

        let mut reopened = Document::open_with(&path, plain_config()).unwrap();
        let Some(Object::Dictionary(d)) = reopened.get_object(font_ref.number).unwrap() else {
            panic!("font is not a dictionary");
        };
        assert!(d.is_type("Font"));
    }

    #[test]
    fn rewrite_of_a_hybrid_source_keeps_both_encodings() {
        let mut table = XrefTable::new();
        let mut catalog = Dictionary::new();
        catalog.insert(Name::new("Type"), Object::name("Catalog"));
        catalog.insert(Name::new("Pages"), Object::Reference(ObjRef::new(2, 0)));
        let mut pages = Dictionary::new();
        pages.insert(Name::new("Type"), Object::name("Pages"));
        pages.insert(Name::new("Kids"), Object::Array(Vec::new()));
        pages.insert(Name::new("Count"), Object::Integer(0));
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

        let mut doc = Document::from_bytes_with(session.into_bytes(), plain_config()).unwrap();
        assert!(doc.hybrid_index());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rewritten.vlm");
        doc.save_to(&path, SaveMode::Rewrite).unwrap();

        let text = String::from_utf8_lossy(&std::fs::read(&path).unwrap()).into_owned();
        assert!(text.contains("trailer <<"));
        assert!(text.contains("/Type /XRef"));
        assert!(text.contains("/XRefStm"));

        let reopened = Document::from_bytes(std::fs::read(&path).unwrap()).unwrap();
        assert!(reopened.hybrid_index());
    }

    #[test]
    fn free_object_reuses_numbers_across_a_save() {
        let dir = tempfile::tempdir().unwrap();
        let mut doc = Document::create_with(plain_config()).unwrap();
        let r = doc.add_object(Object::Integer(5)).unwrap();
        doc.free_object(r).unwrap();
        let reused = doc.create_next_reference().unwrap();
        assert_eq!(reused.number, r.number);
        assert_eq!(reused.generation, r.generation + 1);

        doc.set_object(reused, Object::Integer(6)).unwrap();
        doc.add_page(Dictionary::new()).unwrap();
        let path = dir.path().join("reuse.vlm");
        doc.save_to(&path, SaveMode::Fresh).unwrap();

        let mut reopened = Document::open(&path).unwrap();
        assert_eq!(
            reopened.get_object(reused.number).unwrap(),
            Some(&Object::Integer(6))
        );
    }
}
