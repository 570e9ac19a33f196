//! One save, start to finish.
//!
//! A [`SaveSession`] owns the forward cursor for a single revision. Objects
//! are *staged* one by one: small non-stream objects batch into object-stream
//! containers when the compressed style is active, everything else is written
//! inline. Sealing the containers and emitting the closing index happens in
//! [`SaveSession::finish`].
//!
//! # Invariants
//! - The cursor only moves forward; in append mode every emitted byte lands
//!   at or past the base length, so the original file is byte-preserved.
//! - Every staged or freed number is collected so an append index covers
//!   exactly the slots this revision touched.

use std::collections::BTreeSet;

use tracing::debug;

use vellum_container::{ContainerBuilder, StandardFilters, DEFAULT_MAX_MEMBERS};
use vellum_object::{
    CryptProvider, Dictionary, FilterService, Lifecycle, Name, ObjRef, Object, Stream,
};
use vellum_xref::{
    binary_rows, contiguous_runs, text_record, tuple_widths, IndexRow, Location, XrefTable,
};

use crate::error::{WriteError, WriteResult};
use crate::serialize::{serialize_object, serialized};

/// First line of every document.
pub const FILE_HEADER: &[u8] = b"%vellum-1.0\n";

/// How a save relates to the bytes already on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveMode {
    /// Brand-new document, no prior revision.
    Fresh,
    /// Full rewrite from byte zero; prior revisions are discarded.
    Rewrite,
    /// Incremental update appended after the existing bytes.
    Append,
}

/// Which index encoding closes the revision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum WriteStyle {
    /// Legacy text table; every object written inline.
    Plain,
    /// Stream-style index; small non-stream objects batch into containers.
    #[default]
    Compressed,
}

/// Trailer material carried into index emission.
#[derive(Clone, Debug, Default)]
pub struct TrailerInfo {
    pub root: Option<ObjRef>,
    pub info: Option<ObjRef>,
    pub id: Option<Object>,
    /// Offset of the previous revision's index (append saves).
    pub prev: Option<u64>,
}

/// Append-only output cursor for one revision.
pub struct SaveSession {
    out: Vec<u8>,
    /// Length of the pre-existing bytes this session appends after.
    base: u64,
    mode: SaveMode,
    style: WriteStyle,
    batch: ContainerBuilder,
    max_members: usize,
    /// Numbers whose slots this revision redefines.
    touched: BTreeSet<u32>,
    finished: bool,
}

impl SaveSession {
    /// A session for a brand-new document. Writes the file header.
    pub fn fresh(style: WriteStyle) -> Self {
        let mut s = Self::with_base(0, SaveMode::Fresh, style);
        s.out.extend_from_slice(FILE_HEADER);
        s
    }

    /// A full-rewrite session. Writes the file header.
    pub fn rewrite(style: WriteStyle) -> Self {
        let mut s = Self::with_base(0, SaveMode::Rewrite, style);
        s.out.extend_from_slice(FILE_HEADER);
        s
    }

    /// An incremental session appending after `base` existing bytes.
    pub fn append(base: u64, style: WriteStyle) -> Self {
        let mut s = Self::with_base(base, SaveMode::Append, style);
        // A newline keeps the first appended token off the old last line.
        s.out.push(b'\n');
        s
    }

    fn with_base(base: u64, mode: SaveMode, style: WriteStyle) -> Self {
        Self {
            out: Vec::new(),
            base,
            mode,
            style,
            batch: ContainerBuilder::new(DEFAULT_MAX_MEMBERS),
            max_members: DEFAULT_MAX_MEMBERS,
            touched: BTreeSet::new(),
            finished: false,
        }
    }

    /// Cap on members per sealed container.
    pub fn set_max_container_members(&mut self, max: usize) {
        self.max_members = max;
        self.batch = ContainerBuilder::new(max);
    }

    pub fn mode(&self) -> SaveMode {
        self.mode
    }

    /// Absolute offset of the next byte this session will emit.
    pub fn position(&self) -> u64 {
        self.base + self.out.len() as u64
    }

    /// Record a slot redefined outside this session (a freed number).
    pub fn note_touched(&mut self, number: u32) {
        self.touched.insert(number);
    }

    /// Stage one object.
    ///
    /// The object either goes out inline right away or joins the pending
    /// container batch; either way its slot in `table` is updated and its
    /// lifecycle advanced to flushed. String and stream payloads pass
    /// through the crypt provider on the way out.
    pub fn stage_object(
        &mut self,
        table: &mut XrefTable,
        reference: ObjRef,
        object: &Object,
        crypt: &dyn CryptProvider,
    ) -> WriteResult<()> {
        let batchable = self.style == WriteStyle::Compressed
            && reference.generation == 0
            && !matches!(object, Object::Stream(_));

        if batchable {
            let wrapped = wrap_in_place(object.clone(), reference, crypt)?;
            if self.batch.is_full() {
                self.seal_batch(table)?;
            }
            self.batch.add_member(reference, serialized(&wrapped))?;
            self.touched.insert(reference.number);
            // Location is patched when the batch seals and gets its number.
            return Ok(());
        }

        let offset = self.write_inline(reference, object, crypt)?;
        self.commit_slot(table, reference, Location::Offset(offset))?;
        Ok(())
    }

    /// Seal the pending container batch, if any, and write it inline.
    pub fn seal_batch(&mut self, table: &mut XrefTable) -> WriteResult<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let full = std::mem::replace(&mut self.batch, ContainerBuilder::new(self.max_members));
        let members: Vec<ObjRef> = full.member_refs().collect();
        let stream = full.finish(&StandardFilters)?;

        let container = table.create_next()?;
        let offset = self.write_raw(container, &Object::Stream(stream));
        self.commit_slot(table, container, Location::Offset(offset))?;

        for (position, member) in members.iter().enumerate() {
            self.commit_slot(
                table,
                *member,
                Location::InContainer {
                    container: container.number,
                    position: position as u32,
                },
            )?;
        }
        debug!(
            container = container.number,
            members = members.len(),
            offset,
            "container sealed"
        );
        Ok(())
    }

    /// Seal any open batch and close the revision: index, trailer material,
    /// `startxref`, end marker.
    ///
    /// `hybrid` emits both encodings, the legacy trailer pointing at the
    /// stream section via /XRefStm. A plain-style save silently upgrades to
    /// the stream encoding when container rows are present, since the legacy
    /// grammar cannot express them.
    pub fn finish(
        &mut self,
        table: &mut XrefTable,
        trailer: &TrailerInfo,
        hybrid: bool,
    ) -> WriteResult<()> {
        debug_assert!(!self.finished, "finish called twice");
        self.seal_batch(table)?;

        let use_stream = match self.style {
            WriteStyle::Compressed => true,
            WriteStyle::Plain => {
                let has_container_rows = self
                    .row_numbers(table)
                    .iter()
                    .any(|&n| matches!(table.get(n).map(|e| e.location), Some(Location::InContainer { .. })));
                if has_container_rows {
                    debug!("plain index upgraded to stream encoding for container rows");
                }
                has_container_rows
            }
        };

        let index_offset = if hybrid {
            let stream_offset = self.write_stream_index(table, trailer)?;
            self.write_legacy_index(table, trailer, Some(stream_offset))?
        } else if use_stream {
            self.write_stream_index(table, trailer)?
        } else {
            self.write_legacy_index(table, trailer, None)?
        };

        self.out
            .extend_from_slice(format!("startxref\n{index_offset}\n%%EOF\n").as_bytes());
        self.finished = true;
        debug!(
            mode = ?self.mode,
            bytes = self.out.len(),
            index_offset,
            "revision closed"
        );
        Ok(())
    }

    /// The bytes this session produced (everything past the base length).
    pub fn into_bytes(self) -> Vec<u8> {
        debug_assert!(self.finished, "session consumed before finish");
        self.out
    }

    // ---------------------------------------------------------------
    // Inline emission
    // ---------------------------------------------------------------

    fn write_inline(
        &mut self,
        reference: ObjRef,
        object: &Object,
        crypt: &dyn CryptProvider,
    ) -> WriteResult<u64> {
        let wrapped = wrap_in_place(object.clone(), reference, crypt)?;
        Ok(self.write_raw(reference, &wrapped))
    }

    fn write_raw(&mut self, reference: ObjRef, object: &Object) -> u64 {
        let offset = self.position();
        self.out.extend_from_slice(
            format!("{} {} obj\n", reference.number, reference.generation).as_bytes(),
        );
        serialize_object(&mut self.out, object);
        self.out.extend_from_slice(b"\nendobj\n");
        offset
    }

    fn commit_slot(
        &mut self,
        table: &mut XrefTable,
        reference: ObjRef,
        location: Location,
    ) -> WriteResult<()> {
        let entry = table
            .get_mut(reference.number)
            .ok_or(WriteError::NotLoaded(reference.number))?;
        entry.location = location;
        entry.state.transition(reference, Lifecycle::Flushed)?;
        entry.object = None;
        entry.must_flush = false;
        self.touched.insert(reference.number);
        Ok(())
    }

    // ---------------------------------------------------------------
    // Index emission
    // ---------------------------------------------------------------

    /// The numbers this revision's index must cover. A full save declares
    /// every slot; an append declares only the touched ones plus slot 0,
    /// whose free-list head link always rides along.
    fn row_numbers(&self, table: &XrefTable) -> Vec<u32> {
        match self.mode {
            SaveMode::Append => {
                let mut numbers: Vec<u32> = self.touched.iter().copied().collect();
                if numbers.first() != Some(&0) {
                    numbers.insert(0, 0);
                }
                numbers
            }
            _ => (0..table.size()).collect(),
        }
    }

    fn row_for(table: &XrefTable, number: u32) -> WriteResult<IndexRow> {
        let Some(entry) = table.get(number) else {
            // A hole the index never declared behaves as a free slot.
            return Ok(IndexRow::Free {
                next: 0,
                next_generation: 0,
            });
        };
        match entry.location {
            Location::Free { next } => Ok(IndexRow::Free {
                next,
                next_generation: entry.reference.generation,
            }),
            Location::Offset(offset) => Ok(IndexRow::Offset {
                offset,
                generation: entry.reference.generation,
            }),
            Location::InContainer {
                container,
                position,
            } => Ok(IndexRow::InContainer {
                container,
                position,
            }),
            Location::Unwritten => Err(WriteError::NotLoaded(number)),
        }
    }

    fn write_legacy_index(
        &mut self,
        table: &XrefTable,
        trailer: &TrailerInfo,
        stream_index_offset: Option<u64>,
    ) -> WriteResult<u64> {
        let numbers = self.row_numbers(table);
        let offset = self.position();
        self.out.extend_from_slice(b"xref\n");
        for (start, count) in contiguous_runs(&numbers) {
            self.out
                .extend_from_slice(format!("{start} {count}\n").as_bytes());
            for number in start..start + count {
                let row = Self::row_for(table, number)?;
                self.out.extend_from_slice(&text_record(&row));
            }
        }

        let dict = trailer_dict(table.size(), trailer, stream_index_offset);
        self.out.extend_from_slice(b"trailer ");
        serialize_object(&mut self.out, &Object::Dictionary(dict));
        self.out.push(b'\n');
        Ok(offset)
    }

    fn write_stream_index(
        &mut self,
        table: &mut XrefTable,
        trailer: &TrailerInfo,
    ) -> WriteResult<u64> {
        // The section indexes itself, so its number and offset must exist
        // before the rows are packed.
        let own = table.create_next()?;
        let offset = self.position();

        let mut numbers = self.row_numbers(table);
        if let Err(at) = numbers.binary_search(&own.number) {
            numbers.insert(at, own.number);
        }

        let mut rows = Vec::with_capacity(numbers.len());
        for &number in &numbers {
            if number == own.number {
                rows.push(IndexRow::Offset {
                    offset,
                    generation: own.generation,
                });
            } else {
                rows.push(Self::row_for(table, number)?);
            }
        }

        let widths = tuple_widths(&rows);
        let packed = binary_rows(&rows, widths);
        let filter = Name::new("ZstdDecode");
        let compressed = StandardFilters
            .encode(&filter, &packed)
            .map_err(WriteError::Filter)?;

        let mut dict = trailer_dict(table.size(), trailer, None);
        dict.insert(Name::new("Type"), Object::name("XRef"));
        dict.insert(
            Name::new("W"),
            Object::Array(widths.iter().map(|&w| Object::Integer(w as i64)).collect()),
        );
        let mut index = Vec::new();
        for (start, count) in contiguous_runs(&numbers) {
            index.push(Object::Integer(i64::from(start)));
            index.push(Object::Integer(i64::from(count)));
        }
        dict.insert(Name::new("Index"), Object::Array(index));
        dict.insert(Name::new("Filter"), Object::Name(filter));

        let mut stream = Stream::new(dict, compressed);
        stream.sync_length();

        self.write_raw(own, &Object::Stream(stream));
        // The section's own slot is part of the table it describes.
        if let Some(entry) = table.get_mut(own.number) {
            entry.location = Location::Offset(offset);
            entry.state.transition(own, Lifecycle::Flushed)?;
        }
        self.touched.insert(own.number);
        debug!(number = own.number, offset, rows = rows.len(), "index stream written");
        Ok(offset)
    }
}

fn trailer_dict(size: u32, trailer: &TrailerInfo, stream_index_offset: Option<u64>) -> Dictionary {
    let mut dict = Dictionary::new();
    dict.insert(Name::new("Size"), Object::Integer(i64::from(size)));
    if let Some(root) = trailer.root {
        dict.insert(Name::new("Root"), Object::Reference(root));
    }
    if let Some(info) = trailer.info {
        dict.insert(Name::new("Info"), Object::Reference(info));
    }
    if let Some(id) = &trailer.id {
        dict.insert(Name::new("ID"), id.clone());
    }
    if let Some(prev) = trailer.prev {
        dict.insert(Name::new("Prev"), Object::Integer(prev as i64));
    }
    if let Some(off) = stream_index_offset {
        dict.insert(Name::new("XRefStm"), Object::Integer(off as i64));
    }
    dict
}

/// Apply the crypt provider to every string and stream payload in a node.
/// Mirror of the read-side unwrap walk.
fn wrap_in_place(
    object: Object,
    reference: ObjRef,
    crypt: &dyn CryptProvider,
) -> WriteResult<Object> {
    let map_err = |reason: String| WriteError::Crypt {
        number: reference.number,
        reason,
    };
    Ok(match object {
        Object::String(bytes, kind) => {
            Object::String(crypt.wrap(reference, &bytes).map_err(map_err)?, kind)
        }
        Object::Stream(mut stream) => {
            stream.data = crypt.wrap(reference, &stream.data).map_err(map_err)?;
            stream.sync_length();
            Object::Stream(stream)
        }
        Object::Array(items) => Object::Array(
            items
                .into_iter()
                .map(|o| wrap_in_place(o, reference, crypt))
                .collect::<WriteResult<_>>()?,
        ),
        Object::Dictionary(dict) => {
            let rebuilt = dict
                .iter()
                .map(|(k, v)| Ok((k.clone(), wrap_in_place(v.clone(), reference, crypt)?)))
                .collect::<WriteResult<_>>()?;
            Object::Dictionary(rebuilt)
        }
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_object::NoopCrypt;

    fn staged_table() -> (XrefTable, Vec<ObjRef>) {
        let mut table = XrefTable::new();
        let refs = vec![
            table.add_object(Object::Integer(1)).unwrap(),
            table.add_object(Object::name("Leaf")).unwrap(),
        ];
        (table, refs)
    }

    #[test]
    fn plain_save_writes_inline_and_a_text_table() {
        let (mut table, refs) = staged_table();
        let mut session = SaveSession::fresh(WriteStyle::Plain);

        for r in &refs {
            let object = table.get_mut(r.number).unwrap().object.take().unwrap();
            session.stage_object(&mut table, *r, &object, &NoopCrypt).unwrap();
        }
        session
            .finish(&mut table, &TrailerInfo { root: Some(refs[0]), ..Default::default() }, false)
            .unwrap();

        let bytes = session.into_bytes();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.starts_with("%vellum-1.0\n"));
        assert!(text.contains("1 0 obj\n1\nendobj\n"));
        assert!(text.contains("xref\n0 3\n"));
        assert!(text.contains("trailer << /Root 1 0 R /Size 3 >>"));
        assert!(text.trim_end().ends_with("%%EOF"));

        // startxref points at the literal `xref` keyword.
        let start: usize = text
            .rsplit("startxref\n")
            .next()
            .unwrap()
            .lines()
            .next()
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(&bytes[start..start + 4], b"xref");
    }

    #[test]
    fn compressed_save_batches_small_objects() {
        let (mut table, refs) = staged_table();
        let mut session = SaveSession::fresh(WriteStyle::Compressed);

        for r in &refs {
            let object = table.get_mut(r.number).unwrap().object.take().unwrap();
            session.stage_object(&mut table, *r, &object, &NoopCrypt).unwrap();
        }
        // Nothing inline yet: both members sit in the open batch.
        assert!(!String::from_utf8_lossy(&session.out).contains("endobj"));

        session
            .finish(&mut table, &TrailerInfo { root: Some(refs[0]), ..Default::default() }, false)
            .unwrap();

        for r in &refs {
            let entry = table.get(r.number).unwrap();
            assert!(matches!(entry.location, Location::InContainer { .. }));
            assert_eq!(entry.state, Lifecycle::Flushed);
        }
        let text = String::from_utf8_lossy(&session.out);
        assert!(text.contains("/Type /ObjStm"));
        assert!(text.contains("/Type /XRef"));
    }

    #[test]
    fn streams_never_batch() {
        let mut table = XrefTable::new();
        let mut stream = Stream::new(Dictionary::new(), b"body".to_vec());
        stream.sync_length();
        let r = table.add_object(Object::Stream(stream)).unwrap();

        let mut session = SaveSession::fresh(WriteStyle::Compressed);
        let object = table.get_mut(r.number).unwrap().object.take().unwrap();
        session.stage_object(&mut table, r, &object, &NoopCrypt).unwrap();

        assert!(matches!(
            table.get(r.number).unwrap().location,
            Location::Offset(_)
        ));
    }

    #[test]
    fn append_offsets_stay_past_the_base() {
        let base = 500u64;
        let mut table = XrefTable::new();
        let r = table.add_object(Object::Integer(9)).unwrap();

        let mut session = SaveSession::append(base, WriteStyle::Plain);
        assert_eq!(session.position(), base + 1);

        let object = table.get_mut(r.number).unwrap().object.take().unwrap();
        session.stage_object(&mut table, r, &object, &NoopCrypt).unwrap();

        match table.get(r.number).unwrap().location {
            Location::Offset(off) => assert!(off > base),
            other => panic!("unexpected location {other:?}"),
        }
    }

    #[test]
    fn append_index_covers_only_touched_slots() {
        let mut table = XrefTable::new();
        // Three pre-existing slots, one modified this session.
        for n in 1..=3u32 {
            table
                .add(vellum_xref::XrefEntry::unresolved(
                    ObjRef::new(n, 0),
                    Location::Offset(u64::from(n) * 100),
                ))
                .unwrap();
        }
        let target = ObjRef::new(2, 0);
        {
            let entry = table.get_mut(2).unwrap();
            entry.state = Lifecycle::Modified;
            entry.object = Some(Object::Integer(42));
        }

        let mut session = SaveSession::append(1000, WriteStyle::Plain);
        let object = table.get_mut(2).unwrap().object.take().unwrap();
        session.stage_object(&mut table, target, &object, &NoopCrypt).unwrap();
        session
            .finish(
                &mut table,
                &TrailerInfo {
                    root: Some(ObjRef::new(1, 0)),
                    prev: Some(700),
                    ..Default::default()
                },
                false,
            )
            .unwrap();

        let text = String::from_utf8_lossy(&session.out);
        // Two runs: slot 0, then slot 2. Slots 1 and 3 are not redeclared.
        assert!(text.contains("xref\n0 1\n"));
        assert!(text.contains("\n2 1\n"));
        assert!(!text.contains("\n1 1\n"));
        assert!(text.contains("/Prev 700"));
    }

    #[test]
    fn hybrid_emits_both_encodings() {
        let (mut table, refs) = staged_table();
        let mut session = SaveSession::fresh(WriteStyle::Plain);
        for r in &refs {
            let object = table.get_mut(r.number).unwrap().object.take().unwrap();
            session.stage_object(&mut table, *r, &object, &NoopCrypt).unwrap();
        }
        session
            .finish(&mut table, &TrailerInfo { root: Some(refs[0]), ..Default::default() }, true)
            .unwrap();

        let text = String::from_utf8_lossy(&session.out);
        assert!(text.contains("/Type /XRef"));
        assert!(text.contains("/XRefStm"));
        // startxref targets the legacy table in a hybrid file.
        let start: usize = text
            .rsplit("startxref\n")
            .next()
            .unwrap()
            .lines()
            .next()
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(&session.out[start..start + 4], b"xref");
    }

    #[test]
    fn crypt_wrap_touches_strings_and_streams_only() {
        struct Xor;
        impl CryptProvider for Xor {
            fn unwrap(&self, _r: ObjRef, data: &[u8]) -> Result<Vec<u8>, String> {
                Ok(data.iter().map(|b| b ^ 0xff).collect())
            }
            fn wrap(&self, _r: ObjRef, data: &[u8]) -> Result<Vec<u8>, String> {
                Ok(data.iter().map(|b| b ^ 0xff).collect())
            }
        }

        let wrapped = wrap_in_place(
            Object::Array(vec![Object::string("A"), Object::Integer(5)]),
            ObjRef::new(1, 0),
            &Xor,
        )
        .unwrap();
        let Object::Array(items) = wrapped else { panic!() };
        assert_eq!(items[0], Object::String(vec![b'A' ^ 0xff], vellum_object::StringKind::Literal));
        assert_eq!(items[1], Object::Integer(5));
    }
}
