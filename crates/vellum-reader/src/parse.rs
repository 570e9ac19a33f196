//! Recursive-descent parser over the tokenizer.
//!
//! Parsing is shallow: children of composites stay as unresolved
//! [`Object::Reference`] nodes. The single place that needs another object
//! mid-parse is a stream's indirect `/Length`; the caller supplies a
//! resolver for that, and an unresolvable length degrades to scanning for
//! the closing `endstream` keyword.

use tracing::warn;
use vellum_object::{Dictionary, Name, ObjRef, Object, Stream, StringKind};

use crate::error::{ReadError, ReadResult};
use crate::tokenizer::{Token, Tokenizer};

/// Find the first occurrence of `needle` at or after `from`.
pub fn find_bytes(data: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= data.len() {
        return None;
    }
    data[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Parser for one object (and its direct children) at a position.
pub struct Parser<'a, 'r> {
    tz: Tokenizer<'a>,
    resolve_len: &'r mut dyn FnMut(ObjRef) -> Option<i64>,
}

impl<'a, 'r> Parser<'a, 'r> {
    pub fn new(tz: Tokenizer<'a>, resolve_len: &'r mut dyn FnMut(ObjRef) -> Option<i64>) -> Self {
        Self { tz, resolve_len }
    }

    pub fn tokenizer(&mut self) -> &mut Tokenizer<'a> {
        &mut self.tz
    }

    /// Parse one value of any kind.
    pub fn parse_value(&mut self) -> ReadResult<Object> {
        let position = self.tz.position();
        let token = self.tz.next_token()?;
        match token {
            Token::Integer(first) => self.maybe_reference(first),
            Token::Real(v) => Ok(Object::Real(v)),
            Token::Name(n) => Ok(Object::Name(n)),
            Token::LiteralString(s) => Ok(Object::String(s, StringKind::Literal)),
            Token::HexString(s) => Ok(Object::String(s, StringKind::Hex)),
            Token::ArrayOpen => self.parse_array(),
            Token::DictOpen => self.parse_dict_or_stream(),
            Token::Keyword(word) => match word.as_slice() {
                b"true" => Ok(Object::Boolean(true)),
                b"false" => Ok(Object::Boolean(false)),
                b"null" => Ok(Object::Null),
                _ => Err(ReadError::UnexpectedToken {
                    position,
                    found: String::from_utf8_lossy(&word).into_owned(),
                }),
            },
            other => Err(ReadError::UnexpectedToken {
                position,
                found: other.describe(),
            }),
        }
    }

    /// Parse `<n> <g> obj <value> endobj` at the current position.
    pub fn parse_indirect(&mut self) -> ReadResult<(ObjRef, Object)> {
        let number = self.tz.expect_integer()?;
        let generation = self.tz.expect_integer()?;
        self.tz.expect_keyword(b"obj")?;
        let reference = ObjRef::new(number as u32, generation as u16);
        let object = self.parse_value()?;
        // A missing endobj is tolerated; plenty of real files drop it.
        if self.tz.peek().map(|t| t.is_keyword(b"endobj")).unwrap_or(false) {
            let _ = self.tz.next_token();
        }
        Ok((reference, object))
    }

    /// An integer may begin an `n g R` reference; look ahead to decide.
    fn maybe_reference(&mut self, first: i64) -> ReadResult<Object> {
        let saved = self.tz.position();
        if first >= 0 {
            if let Ok(Token::Integer(second)) = self.tz.next_token() {
                if second >= 0 && self.tz.next_token().map(|t| t.is_keyword(b"R")).unwrap_or(false)
                {
                    return Ok(Object::Reference(ObjRef::new(
                        first as u32,
                        second as u16,
                    )));
                }
            }
        }
        self.tz.seek(saved);
        Ok(Object::Integer(first))
    }

    fn parse_array(&mut self) -> ReadResult<Object> {
        let mut items = Vec::new();
        loop {
            if self.tz.peek()? == Token::ArrayClose {
                let _ = self.tz.next_token();
                return Ok(Object::Array(items));
            }
            items.push(self.parse_value()?);
        }
    }

    fn parse_dict_or_stream(&mut self) -> ReadResult<Object> {
        let mut dict = Dictionary::new();
        loop {
            let position = self.tz.position();
            match self.tz.next_token()? {
                Token::DictClose => break,
                Token::Name(key) => {
                    let value = self.parse_value()?;
                    dict.insert(key, value);
                }
                other => {
                    return Err(ReadError::UnexpectedToken {
                        position,
                        found: other.describe(),
                    })
                }
            }
        }

        // A dictionary directly followed by `stream` is a stream node.
        if self.tz.peek().map(|t| t.is_keyword(b"stream")).unwrap_or(false) {
            let _ = self.tz.next_token();
            return self.parse_stream_body(dict);
        }
        Ok(Object::Dictionary(dict))
    }

    fn parse_stream_body(&mut self, dict: Dictionary) -> ReadResult<Object> {
        self.tz.skip_stream_eol();
        let body_start = self.tz.position();

        let declared = match dict.get("Length") {
            Some(Object::Integer(v)) if *v >= 0 => Some(*v),
            Some(Object::Reference(r)) => (self.resolve_len)(*r),
            _ => None,
        };

        if let Some(len) = declared {
            let saved = self.tz.position();
            if let Ok(body) = self.tz.take_bytes(len as usize) {
                let body = body.to_vec();
                if self
                    .tz
                    .peek()
                    .map(|t| t.is_keyword(b"endstream"))
                    .unwrap_or(false)
                {
                    let _ = self.tz.next_token();
                    return Ok(Object::Stream(Stream::new(dict, body)));
                }
            }
            // Declared length did not land on endstream; fall back to a scan.
            warn!(length = len, "stream /Length does not reach endstream; scanning");
            self.tz.seek(saved);
        }

        let data = self.tz.data();
        let end = find_bytes(data, b"endstream", body_start)
            .ok_or(ReadError::UnexpectedEof { position: body_start })?;
        // Trim the end-of-line that separates body from the keyword.
        let mut body_end = end;
        if body_end > body_start && data[body_end - 1] == b'\n' {
            body_end -= 1;
        }
        if body_end > body_start && data[body_end - 1] == b'\r' {
            body_end -= 1;
        }
        let body = data[body_start..body_end].to_vec();
        self.tz.seek(end);
        self.tz.expect_keyword(b"endstream")?;

        let mut stream = Stream::new(dict, body);
        stream.sync_length();
        Ok(Object::Stream(stream))
    }
}

/// Parse a single value at `offset`.
pub fn parse_at(
    data: &[u8],
    offset: usize,
    resolve_len: &mut dyn FnMut(ObjRef) -> Option<i64>,
) -> ReadResult<Object> {
    Parser::new(Tokenizer::at(data, offset), resolve_len).parse_value()
}

/// Parse a numbered object (`n g obj ... endobj`) at `offset`.
pub fn parse_indirect_at(
    data: &[u8],
    offset: usize,
    resolve_len: &mut dyn FnMut(ObjRef) -> Option<i64>,
) -> ReadResult<(ObjRef, Object)> {
    Parser::new(Tokenizer::at(data, offset), resolve_len).parse_indirect()
}
