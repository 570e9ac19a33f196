//! Scan-based recovery: the whole-file rebuild and the targeted offset fix.

use std::collections::HashMap;

use tracing::{debug, warn};
use vellum_container::ContainerReader;
use vellum_object::{Dictionary, FilterService, ObjRef, Object};
use vellum_xref::{Location, XrefEntry, XrefTable};

use crate::error::{ReadError, ReadResult};
use crate::parse::{find_bytes, parse_at, parse_indirect_at};
use crate::tokenizer::Tokenizer;
use crate::xref_parse::claim_container_members;

fn is_regular(b: u8) -> bool {
    !matches!(
        b,
        b'\0' | b'\t' | b'\n' | b'\x0c' | b'\r' | b' '
            | b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
    )
}

/// Linear scan for `<n> <g> obj` headers.
///
/// Returns object number -> (generation, header offset); when a number
/// appears more than once the highest generation wins, and among equal
/// generations the later occurrence (the newer revision's body).
pub fn scan_headers(data: &[u8]) -> HashMap<u32, (u16, u64)> {
    let mut headers: HashMap<u32, (u16, u64)> = HashMap::new();
    let mut pos = 0usize;

    while pos < data.len() {
        if !data[pos].is_ascii_digit() || (pos > 0 && is_regular(data[pos - 1])) {
            pos += 1;
            continue;
        }
        let digit_run_end = {
            let mut e = pos;
            while e < data.len() && data[e].is_ascii_digit() {
                e += 1;
            }
            e
        };

        let mut tz = Tokenizer::at(data, pos);
        let header = (|| -> Option<(u32, u16, usize)> {
            let number = tz.expect_integer().ok()?;
            let generation = tz.expect_integer().ok()?;
            tz.expect_keyword(b"obj").ok()?;
            if number < 0 || generation < 0 {
                return None;
            }
            Some((number as u32, generation as u16, tz.position()))
        })();

        match header {
            Some((number, generation, after)) => {
                let offset = pos as u64;
                match headers.get(&number) {
                    Some(&(existing, _)) if existing > generation => {}
                    _ => {
                        headers.insert(number, (generation, offset));
                    }
                }
                pos = after;
            }
            None => pos = digit_run_end,
        }
    }
    headers
}

/// Patch the table's recorded byte offsets from a header scan.
///
/// Only offsets move; generations, states and loaded nodes are untouched.
/// This is the *fix* path: one mismatching read gets one corrected retry.
pub fn patch_offsets(table: &mut XrefTable, headers: &HashMap<u32, (u16, u64)>) -> usize {
    let numbers: Vec<u32> = table.numbers().collect();
    let mut patched = 0usize;
    for number in numbers {
        let Some(&(_, scanned)) = headers.get(&number) else {
            continue;
        };
        if let Some(entry) = table.get_mut(number) {
            if let Location::Offset(recorded) = entry.location {
                if recorded != scanned {
                    entry.location = Location::Offset(scanned);
                    patched += 1;
                }
            }
        }
    }
    debug!(patched, "offsets patched from header scan");
    patched
}

/// Whole-file rebuild: repopulate `table` from a header scan and recover a
/// usable trailer.
///
/// The trailer is the last standalone `trailer` dictionary that carries
/// `/Root`; failing that, a scanned catalog object is promoted into a
/// synthesized trailer. Containers found during the scan are expanded so
/// their members become addressable again.
pub fn rebuild(
    data: &[u8],
    table: &mut XrefTable,
    filters: &dyn FilterService,
) -> ReadResult<Dictionary> {
    table.clear();
    let headers = scan_headers(data);
    debug!(objects = headers.len(), "rebuild scan");

    let mut ordered: Vec<(u32, u16, u64)> = headers
        .iter()
        .map(|(&n, &(g, o))| (n, g, o))
        .collect();
    ordered.sort_unstable();

    for &(number, generation, offset) in &ordered {
        if number == 0 {
            continue;
        }
        table.add(XrefEntry::unresolved(
            ObjRef::new(number, generation),
            Location::Offset(offset),
        ))?;
    }

    // Containers hide members behind their own number; expand them now so
    // the rebuilt index can address everything the file holds.
    let mut no_len = |_: ObjRef| None;
    for &(number, _, offset) in &ordered {
        let parsed = match parse_indirect_at(data, offset as usize, &mut no_len) {
            Ok((_, obj)) => obj,
            Err(e) => {
                warn!(number, offset, error = %e, "unparsable object skipped in rebuild");
                continue;
            }
        };
        if let Object::Stream(ref stream) = parsed {
            if stream.dict.is_type("ObjStm") {
                match ContainerReader::decode(stream, filters) {
                    Ok(reader) => claim_container_members(table, number, &reader)?,
                    Err(e) => warn!(number, error = %e, "corrupt container skipped in rebuild"),
                }
            }
        }
    }

    table.rebuild_free_list()?;

    if let Some(trailer) = scan_trailer(data) {
        return Ok(trailer);
    }

    // No standalone trailer: promote a scanned catalog.
    for &(number, generation, offset) in ordered.iter().rev() {
        if let Ok((_, obj)) = parse_indirect_at(data, offset as usize, &mut no_len) {
            let is_catalog = obj.as_dict().map(|d| d.is_type("Catalog")).unwrap_or(false);
            if is_catalog {
                let mut trailer = Dictionary::new();
                trailer.insert(
                    vellum_object::Name::new("Root"),
                    Object::reference(number, generation),
                );
                trailer.insert(
                    vellum_object::Name::new("Size"),
                    Object::Integer(i64::from(table.size())),
                );
                warn!(number, "no trailer found; synthesized from catalog");
                return Ok(trailer);
            }
        }
    }

    Err(ReadError::RebuildFailed)
}

/// Last standalone `trailer` keyword followed by a dictionary holding `/Root`.
fn scan_trailer(data: &[u8]) -> Option<Dictionary> {
    let mut best: Option<Dictionary> = None;
    let mut from = 0usize;
    while let Some(pos) = find_bytes(data, b"trailer", from) {
        from = pos + 1;
        // Keyword boundary check: `trailer` inside a longer token is noise.
        if pos > 0 && is_regular(data[pos - 1]) {
            continue;
        }
        let after = pos + b"trailer".len();
        if data.get(after).is_some_and(|&b| is_regular(b)) {
            continue;
        }
        let mut no_len = |_: ObjRef| None;
        if let Ok(Object::Dictionary(dict)) = parse_at(data, after, &mut no_len) {
            if dict.get_ref("Root").is_some() {
                best = Some(dict);
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_finds_headers_and_prefers_high_generation() {
        let data = b"junk 3 0 obj null endobj more 3 2 obj true endobj 5 0 obj 1 endobj";
        let headers = scan_headers(data);
        assert_eq!(headers.len(), 2);
        let (generation, offset) = headers[&3];
        assert_eq!(generation, 2);
        assert_eq!(&data[offset as usize..offset as usize + 7], b"3 2 obj");
        assert!(headers.contains_key(&5));
    }

    #[test]
    fn scan_ignores_digits_inside_words() {
        let headers = scan_headers(b"abc12 0 obj");
        assert!(headers.is_empty());
    }

    #[test]
    fn patch_only_moves_offsets() {
        let mut table = XrefTable::new();
        table
            .add(XrefEntry::unresolved(ObjRef::new(5, 0), Location::Offset(1)))
            .unwrap();
        let mut headers = HashMap::new();
        headers.insert(5u32, (0u16, 99u64));
        assert_eq!(patch_offsets(&mut table, &headers), 1);
        assert_eq!(table.get(5).unwrap().location, Location::Offset(99));
    }

    #[test]
    fn trailer_scan_takes_the_last_rooted_dict() {
        let data = b"trailer << /Size 3 >> trailer << /Root 1 0 R /Size 9 >>";
        let dict = scan_trailer(data).unwrap();
        assert_eq!(dict.get_int("Size"), Some(9));
    }
}
