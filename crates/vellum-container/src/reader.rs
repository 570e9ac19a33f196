use vellum_object::{FilterService, Stream};

use crate::error::{ContainerError, ContainerResult};

/// Decoded view of one object-stream container.
///
/// Resolving any member pays for decoding the whole container once; member
/// byte ranges are cached so later lookups are slicing.
#[derive(Debug)]
pub struct ContainerReader {
    body: Vec<u8>,
    /// `(object number, start, end)` per position, in index order.
    ranges: Vec<(u32, usize, usize)>,
}

impl ContainerReader {
    /// Decode a container stream and index its members.
    pub fn decode(stream: &Stream, filters: &dyn FilterService) -> ContainerResult<Self> {
        let body = filters
            .decode_chain(&stream.filters(), &stream.data)
            .map_err(ContainerError::Filter)?;

        let count = stream.dict.get_int("N").unwrap_or(0);
        let first = stream.dict.get_int("First").unwrap_or(0);
        if count < 0 || first < 0 || first as usize > body.len() {
            return Err(ContainerError::Corrupt {
                position: 0,
                reason: format!("bad /N {count} or /First {first}"),
            });
        }
        let first = first as usize;

        // Parse the `number offset` pair index that precedes the members.
        let mut pairs = Vec::with_capacity(count as usize);
        let mut fields = body[..first]
            .split(|b| b.is_ascii_whitespace())
            .filter(|t| !t.is_empty());
        for position in 0..count as usize {
            let number = parse_u64(fields.next(), position, "object number")?;
            let offset = parse_u64(fields.next(), position, "offset")?;
            pairs.push((number as u32, offset as usize));
        }

        // Turn offsets into byte ranges; each member ends where the next
        // begins (or at the end of the body).
        let mut ranges = Vec::with_capacity(pairs.len());
        for (position, &(number, offset)) in pairs.iter().enumerate() {
            let start = first + offset;
            let end = pairs
                .get(position + 1)
                .map(|&(_, next)| first + next)
                .unwrap_or(body.len());
            if start > end || end > body.len() {
                return Err(ContainerError::Corrupt {
                    position,
                    reason: format!("member range {start}..{end} outside body"),
                });
            }
            ranges.push((number, start, end));
        }

        Ok(Self { body, ranges })
    }

    pub fn member_count(&self) -> usize {
        self.ranges.len()
    }

    /// Member bytes by container position.
    pub fn member(&self, position: usize) -> ContainerResult<(u32, &[u8])> {
        let &(number, start, end) = self.ranges.get(position).ok_or(ContainerError::Corrupt {
            position,
            reason: "position past member count".into(),
        })?;
        Ok((number, &self.body[start..end]))
    }

    /// Member bytes by object number.
    pub fn member_by_number(&self, number: u32) -> ContainerResult<&[u8]> {
        self.ranges
            .iter()
            .find(|&&(n, ..)| n == number)
            .map(|&(_, start, end)| &self.body[start..end])
            .ok_or(ContainerError::NotAMember { number })
    }

    /// Object numbers in position order.
    pub fn numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.ranges.iter().map(|&(n, ..)| n)
    }
}

fn parse_u64(field: Option<&[u8]>, position: usize, what: &str) -> ContainerResult<u64> {
    let bytes = field.ok_or_else(|| ContainerError::Corrupt {
        position,
        reason: format!("index truncated before {what}"),
    })?;
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ContainerError::Corrupt {
            position,
            reason: format!("unparsable {what}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ContainerBuilder;
    use crate::filters::StandardFilters;
    use vellum_object::ObjRef;

    fn sealed() -> Stream {
        let mut b = ContainerBuilder::default();
        b.add_member(ObjRef::new(4, 0), b"12".to_vec()).unwrap();
        b.add_member(ObjRef::new(7, 0), b"/Name".to_vec()).unwrap();
        b.add_member(ObjRef::new(9, 0), b"(text)".to_vec()).unwrap();
        b.finish(&StandardFilters).unwrap()
    }

    #[test]
    fn members_round_trip_by_position_and_number() {
        let reader = ContainerReader::decode(&sealed(), &StandardFilters).unwrap();
        assert_eq!(reader.member_count(), 3);

        let (number, bytes) = reader.member(1).unwrap();
        assert_eq!(number, 7);
        assert_eq!(bytes.strip_suffix(b" ").unwrap_or(bytes), b"/Name");

        let bytes = reader.member_by_number(9).unwrap();
        assert_eq!(bytes.strip_suffix(b" ").unwrap_or(bytes), b"(text)");
    }

    #[test]
    fn unknown_number_is_not_a_member() {
        let reader = ContainerReader::decode(&sealed(), &StandardFilters).unwrap();
        assert_eq!(
            reader.member_by_number(5).unwrap_err(),
            ContainerError::NotAMember { number: 5 }
        );
    }

    #[test]
    fn corrupt_first_offset_is_reported() {
        let mut stream = sealed();
        stream
            .dict
            .insert(vellum_object::Name::new("First"), vellum_object::Object::Integer(1 << 30));
        assert!(matches!(
            ContainerReader::decode(&stream, &StandardFilters),
            Err(ContainerError::Corrupt { .. })
        ));
    }

    #[test]
    fn truncated_index_is_reported() {
        let mut stream = sealed();
        stream
            .dict
            .insert(vellum_object::Name::new("N"), vellum_object::Object::Integer(40));
        assert!(matches!(
            ContainerReader::decode(&stream, &StandardFilters),
            Err(ContainerError::Corrupt { .. })
        ));
    }
}
