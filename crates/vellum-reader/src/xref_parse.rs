//! Index-section walking: legacy tables, stream-style sections, hybrids.

use std::collections::HashSet;

use tracing::debug;
use vellum_container::ContainerReader;
use vellum_object::{Dictionary, FilterService, ObjRef, Object};
use vellum_xref::{read_field, Location, XrefEntry, XrefTable};

use crate::error::{ReadError, ReadResult};
use crate::parse::{find_bytes, parse_indirect_at};
use crate::tokenizer::{Token, Tokenizer};

/// How far back from the end the closing marker may sit.
const STARTXREF_WINDOW: usize = 1024;

/// Result of a successful index walk.
#[derive(Debug)]
pub struct IndexLoad {
    /// Trailer keys, newest section winning per key.
    pub trailer: Dictionary,
    /// At least one section was stream-style.
    pub used_stream_index: bool,
    /// A legacy trailer carried a companion-stream key.
    pub hybrid: bool,
}

/// Locate `startxref` in the trailing window and return the newest index offset.
pub fn find_startxref(data: &[u8]) -> ReadResult<u64> {
    let window_start = data.len().saturating_sub(STARTXREF_WINDOW);
    let mut found = None;
    let mut from = window_start;
    while let Some(pos) = find_bytes(data, b"startxref", from) {
        found = Some(pos);
        from = pos + 1;
    }
    let pos = found.ok_or(ReadError::MissingStartxref)?;
    let mut tz = Tokenizer::at(data, pos);
    tz.expect_keyword(b"startxref")?;
    let offset = tz.expect_integer()?;
    if offset < 0 || offset as usize >= data.len() {
        return Err(ReadError::MalformedIndex {
            offset: offset.max(0) as u64,
            reason: "startxref points outside the file".into(),
        });
    }
    Ok(offset as u64)
}

/// Walk the `prev`-linked chain of index sections into `table`.
///
/// Sections are visited newest first, so the first slot to claim an object
/// number wins; older revisions only fill holes. Any error here means the
/// index cannot be trusted and the caller falls back to a rebuild scan.
pub fn load_index(
    data: &[u8],
    table: &mut XrefTable,
    filters: &dyn FilterService,
) -> ReadResult<IndexLoad> {
    let mut load = IndexLoad {
        trailer: Dictionary::new(),
        used_stream_index: false,
        hybrid: false,
    };
    let mut head_declared = false;
    let mut visited: HashSet<u64> = HashSet::new();
    let mut next_offset = Some(find_startxref(data)?);

    while let Some(offset) = next_offset {
        if !visited.insert(offset) {
            return Err(ReadError::MalformedIndex {
                offset,
                reason: "prev chain is cyclic".into(),
            });
        }
        let section = parse_section(data, offset, table, filters, &mut head_declared)?;
        if section.stream_style {
            load.used_stream_index = true;
        }

        // Hybrid: a legacy trailer's companion stream holds the entries the
        // text grammar could not represent.
        if !section.stream_style {
            if let Some(stm_offset) = section.trailer.get_int("XRefStm") {
                load.hybrid = true;
                load.used_stream_index = true;
                let companion =
                    parse_section(data, stm_offset as u64, table, filters, &mut head_declared)?;
                merge_trailer(&mut load.trailer, &companion.trailer);
            }
        }

        next_offset = section.trailer.get_int("Prev").map(|p| p as u64);
        merge_trailer(&mut load.trailer, &section.trailer);
    }

    table.rebuild_free_list()?;
    debug!(
        size = table.size(),
        hybrid = load.hybrid,
        stream = load.used_stream_index,
        "index loaded"
    );
    Ok(load)
}

fn merge_trailer(merged: &mut Dictionary, section: &Dictionary) {
    for (key, value) in section.iter() {
        // Chain-position keys describe one section, not the document.
        if matches!(key.as_str(), "Prev" | "XRefStm") {
            continue;
        }
        if !merged.contains_key(key.as_str()) {
            merged.insert(key.clone(), value.clone());
        }
    }
}

struct Section {
    trailer: Dictionary,
    stream_style: bool,
}

fn parse_section(
    data: &[u8],
    offset: u64,
    table: &mut XrefTable,
    filters: &dyn FilterService,
    head_declared: &mut bool,
) -> ReadResult<Section> {
    // The byte at the offset distinguishes the two grammars: a legacy
    // section opens with the `xref` keyword, a stream section with an
    // object header.
    let mut tz = Tokenizer::at(data, offset as usize);
    match tz.peek() {
        Ok(Token::Keyword(ref k)) if k == b"xref" => {
            parse_legacy_section(data, offset, table, head_declared)
        }
        Ok(Token::Integer(_)) => parse_stream_section(data, offset, table, filters, head_declared),
        Ok(other) => Err(ReadError::MalformedIndex {
            offset,
            reason: format!("expected index section, found {}", other.describe()),
        }),
        Err(e) => Err(e),
    }
}

fn claim(
    table: &mut XrefTable,
    number: u32,
    entry: XrefEntry,
    head_declared: &mut bool,
) -> ReadResult<()> {
    if number == 0 {
        // Slot 0 exists from birth; only its chain link is taken, and only
        // from the newest section that declares it.
        if !*head_declared {
            if let (Some(next), Some(head)) = (entry.free_next(), table.get_mut(0)) {
                head.location = Location::Free { next };
            }
            *head_declared = true;
        }
        return Ok(());
    }
    if table.get(number).is_none() {
        table.add(entry)?;
    }
    Ok(())
}

fn parse_legacy_section(
    data: &[u8],
    offset: u64,
    table: &mut XrefTable,
    head_declared: &mut bool,
) -> ReadResult<Section> {
    let mut tz = Tokenizer::at(data, offset as usize);
    tz.expect_keyword(b"xref")?;

    loop {
        match tz.peek()? {
            Token::Integer(_) => {
                let start = tz.expect_integer()?;
                let count = tz.expect_integer()?;
                if start < 0 || count < 0 {
                    return Err(ReadError::MalformedIndex {
                        offset,
                        reason: format!("negative subsection {start} {count}"),
                    });
                }
                for i in 0..count as u32 {
                    let number = start as u32 + i;
                    let field2 = tz.expect_integer()?;
                    let field3 = tz.expect_integer()?;
                    let position = tz.position();
                    let flag = tz.next_token()?;
                    let entry = if flag.is_keyword(b"n") {
                        XrefEntry::unresolved(
                            ObjRef::new(number, field3 as u16),
                            Location::Offset(field2 as u64),
                        )
                    } else if flag.is_keyword(b"f") {
                        XrefEntry::free(ObjRef::new(number, field3 as u16), field2 as u32)
                    } else {
                        return Err(ReadError::UnexpectedToken {
                            position,
                            found: flag.describe(),
                        });
                    };
                    claim(table, number, entry, head_declared)?;
                }
            }
            Token::Keyword(ref k) if k == b"trailer" => {
                tz.expect_keyword(b"trailer")?;
                let mut no_len = |_: ObjRef| None;
                let trailer =
                    crate::parse::Parser::new(tz, &mut no_len).parse_value()?;
                let trailer = match trailer {
                    Object::Dictionary(d) => d,
                    other => {
                        return Err(ReadError::MalformedIndex {
                            offset,
                            reason: format!("trailer is a {}", other.kind()),
                        })
                    }
                };
                return Ok(Section {
                    trailer,
                    stream_style: false,
                });
            }
            other => {
                return Err(ReadError::MalformedIndex {
                    offset,
                    reason: format!("in legacy section: {}", other.describe()),
                })
            }
        }
    }
}

fn parse_stream_section(
    data: &[u8],
    offset: u64,
    table: &mut XrefTable,
    filters: &dyn FilterService,
    head_declared: &mut bool,
) -> ReadResult<Section> {
    // The index stream's own /Length must be direct; nothing can be
    // resolved before the table exists.
    let mut no_len = |_: ObjRef| None;
    let (_, object) = parse_indirect_at(data, offset as usize, &mut no_len)?;
    let stream = object.as_stream().map_err(|_| ReadError::MalformedIndex {
        offset,
        reason: "stream-style section is not a stream".into(),
    })?;
    if !stream.dict.is_type("XRef") {
        return Err(ReadError::MalformedIndex {
            offset,
            reason: "stream section lacks /Type /XRef".into(),
        });
    }

    let body = filters
        .decode_chain(&stream.filters(), &stream.data)
        .map_err(ReadError::Filter)?;

    let widths = parse_widths(&stream.dict, offset)?;
    let stride: usize = widths.iter().sum();
    let size = stream.dict.get_int("Size").unwrap_or(0);
    let ranges = match stream.dict.get_array("Index") {
        Some(items) => {
            let mut out = Vec::new();
            for pair in items.chunks(2) {
                match pair {
                    [Object::Integer(s), Object::Integer(c)] => out.push((*s as u32, *c as u32)),
                    _ => {
                        return Err(ReadError::MalformedIndex {
                            offset,
                            reason: "bad /Index pair".into(),
                        })
                    }
                }
            }
            out
        }
        None => vec![(0, size.max(0) as u32)],
    };

    let mut row = 0usize;
    for (start, count) in ranges {
        for i in 0..count {
            let number = start + i;
            let at = row * stride;
            row += 1;
            let Some(bytes) = body.get(at..at + stride) else {
                return Err(ReadError::MalformedIndex {
                    offset,
                    reason: format!("row for object {number} past body end"),
                });
            };
            // A zero-width type column defaults to "offset" rows.
            let ty = if widths[0] == 0 {
                1
            } else {
                read_field(bytes, widths[0])
            };
            let f2 = read_field(&bytes[widths[0]..], widths[1]);
            let f3 = read_field(&bytes[widths[0] + widths[1]..], widths[2]);

            let entry = match ty {
                0 => XrefEntry::free(ObjRef::new(number, f3 as u16), f2 as u32),
                1 => XrefEntry::unresolved(
                    ObjRef::new(number, f3 as u16),
                    Location::Offset(f2),
                ),
                2 => XrefEntry::unresolved(
                    ObjRef::new(number, 0),
                    Location::InContainer {
                        container: f2 as u32,
                        position: f3 as u32,
                    },
                ),
                other => {
                    return Err(ReadError::MalformedIndex {
                        offset,
                        reason: format!("unknown row type {other}"),
                    })
                }
            };
            claim(table, number, entry, head_declared)?;
        }
    }

    Ok(Section {
        trailer: stream.dict.clone(),
        stream_style: true,
    })
}

fn parse_widths(dict: &Dictionary, offset: u64) -> ReadResult<[usize; 3]> {
    let items = dict.get_array("W").ok_or_else(|| ReadError::MalformedIndex {
        offset,
        reason: "missing /W".into(),
    })?;
    match items {
        [Object::Integer(a), Object::Integer(b), Object::Integer(c)]
            if (0..=8).contains(a) && (1..=8).contains(b) && (0..=8).contains(c) =>
        {
            Ok([*a as usize, *b as usize, *c as usize])
        }
        _ => Err(ReadError::MalformedIndex {
            offset,
            reason: "bad /W widths".into(),
        }),
    }
}

/// Expand a loaded container object's member index into table entries.
///
/// Used by rebuilds, which see only byte offsets: members of a container
/// would otherwise stay invisible.
pub fn claim_container_members(
    table: &mut XrefTable,
    container_number: u32,
    reader: &ContainerReader,
) -> ReadResult<()> {
    for (position, number) in reader.numbers().enumerate() {
        if table.get(number).is_none() {
            table.add(XrefEntry::unresolved(
                ObjRef::new(number, 0),
                Location::InContainer {
                    container: container_number,
                    position: position as u32,
                },
            ))?;
        }
    }
    Ok(())
}

/// Trailer keys the engine requires before it will hand out a document.
pub fn require_root(trailer: &Dictionary) -> ReadResult<ObjRef> {
    trailer
        .get_ref("Root")
        .ok_or_else(|| ReadError::MalformedIndex {
            offset: 0,
            reason: "trailer has no /Root".into(),
        })
}
