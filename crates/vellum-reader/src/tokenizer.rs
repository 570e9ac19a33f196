use vellum_object::Name;

use crate::error::{ReadError, ReadResult};

/// One lexical token of the document grammar.
#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    Integer(i64),
    Real(f64),
    Name(Name),
    LiteralString(Vec<u8>),
    HexString(Vec<u8>),
    ArrayOpen,
    ArrayClose,
    DictOpen,
    DictClose,
    /// Bare keyword: `obj`, `endobj`, `stream`, `R`, `true`, `xref`, ...
    Keyword(Vec<u8>),
}

impl Token {
    pub fn describe(&self) -> String {
        match self {
            Token::Integer(v) => format!("integer {v}"),
            Token::Real(v) => format!("real {v}"),
            Token::Name(n) => format!("name {n}"),
            Token::LiteralString(_) => "literal string".into(),
            Token::HexString(_) => "hex string".into(),
            Token::ArrayOpen => "[".into(),
            Token::ArrayClose => "]".into(),
            Token::DictOpen => "<<".into(),
            Token::DictClose => ">>".into(),
            Token::Keyword(k) => String::from_utf8_lossy(k).into_owned(),
        }
    }

    pub fn is_keyword(&self, word: &[u8]) -> bool {
        matches!(self, Token::Keyword(k) if k == word)
    }
}

fn is_whitespace(b: u8) -> bool {
    matches!(b, b'\0' | b'\t' | b'\n' | b'\x0c' | b'\r' | b' ')
}

fn is_delimiter(b: u8) -> bool {
    matches!(b, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%')
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Byte-level tokenizer with free seeking.
///
/// The tokenizer never allocates for plain tokens and carries no state
/// beyond its position, so callers save and restore positions to look
/// ahead (see [`Tokenizer::peek`]).
#[derive(Clone)]
pub struct Tokenizer<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn at(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Skip whitespace and `%` comments (to end of line).
    pub fn skip_whitespace(&mut self) {
        while self.pos < self.data.len() {
            let b = self.data[self.pos];
            if is_whitespace(b) {
                self.pos += 1;
            } else if b == b'%' {
                while self.pos < self.data.len() && !matches!(self.data[self.pos], b'\n' | b'\r') {
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }

    /// Read the next token, or an EOF error.
    pub fn next_token(&mut self) -> ReadResult<Token> {
        self.skip_whitespace();
        let start = self.pos;
        let b = *self
            .data
            .get(self.pos)
            .ok_or(ReadError::UnexpectedEof { position: start })?;

        match b {
            b'[' => {
                self.pos += 1;
                Ok(Token::ArrayOpen)
            }
            b']' => {
                self.pos += 1;
                Ok(Token::ArrayClose)
            }
            b'<' => {
                if self.data.get(self.pos + 1) == Some(&b'<') {
                    self.pos += 2;
                    Ok(Token::DictOpen)
                } else {
                    self.pos += 1;
                    self.read_hex_string(start)
                }
            }
            b'>' => {
                if self.data.get(self.pos + 1) == Some(&b'>') {
                    self.pos += 2;
                    Ok(Token::DictClose)
                } else {
                    Err(ReadError::UnexpectedToken {
                        position: start,
                        found: ">".into(),
                    })
                }
            }
            b'/' => {
                self.pos += 1;
                self.read_name()
            }
            b'(' => {
                self.pos += 1;
                self.read_literal_string(start)
            }
            b'+' | b'-' | b'.' | b'0'..=b'9' => self.read_number(start),
            b'a'..=b'z' | b'A'..=b'Z' | b'\'' | b'"' => {
                let mut end = self.pos;
                while end < self.data.len()
                    && !is_whitespace(self.data[end])
                    && !is_delimiter(self.data[end])
                {
                    end += 1;
                }
                let word = self.data[self.pos..end].to_vec();
                self.pos = end;
                Ok(Token::Keyword(word))
            }
            other => Err(ReadError::UnexpectedToken {
                position: start,
                found: format!("{:?}", other as char),
            }),
        }
    }

    /// Look at the next token without consuming it.
    pub fn peek(&mut self) -> ReadResult<Token> {
        let saved = self.pos;
        let token = self.next_token();
        self.pos = saved;
        token
    }

    /// Consume a specific keyword or fail.
    pub fn expect_keyword(&mut self, word: &[u8]) -> ReadResult<()> {
        let position = self.pos;
        let token = self.next_token()?;
        if token.is_keyword(word) {
            Ok(())
        } else {
            Err(ReadError::UnexpectedToken {
                position,
                found: token.describe(),
            })
        }
    }

    /// Consume an integer or fail.
    pub fn expect_integer(&mut self) -> ReadResult<i64> {
        let position = self.pos;
        match self.next_token()? {
            Token::Integer(v) => Ok(v),
            other => Err(ReadError::UnexpectedToken {
                position,
                found: other.describe(),
            }),
        }
    }

    /// Raw byte slice of the given length from the current position.
    pub fn take_bytes(&mut self, len: usize) -> ReadResult<&'a [u8]> {
        let end = self.pos + len;
        if end > self.data.len() {
            return Err(ReadError::UnexpectedEof { position: self.pos });
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// After the `stream` keyword: skip the single end-of-line marker that
    /// precedes the body.
    pub fn skip_stream_eol(&mut self) {
        if self.data.get(self.pos) == Some(&b'\r') {
            self.pos += 1;
        }
        if self.data.get(self.pos) == Some(&b'\n') {
            self.pos += 1;
        }
    }

    fn read_number(&mut self, start: usize) -> ReadResult<Token> {
        let mut end = self.pos;
        let mut is_real = false;
        if matches!(self.data[end], b'+' | b'-') {
            end += 1;
        }
        while end < self.data.len() {
            match self.data[end] {
                b'0'..=b'9' => end += 1,
                b'.' if !is_real => {
                    is_real = true;
                    end += 1;
                }
                _ => break,
            }
        }
        let text = std::str::from_utf8(&self.data[self.pos..end]).expect("digits are ascii");
        self.pos = end;
        if is_real {
            let v: f64 = text.parse().map_err(|_| ReadError::UnexpectedToken {
                position: start,
                found: text.to_owned(),
            })?;
            Ok(Token::Real(v))
        } else {
            let v: i64 = text.parse().map_err(|_| ReadError::UnexpectedToken {
                position: start,
                found: text.to_owned(),
            })?;
            Ok(Token::Integer(v))
        }
    }

    fn read_name(&mut self) -> ReadResult<Token> {
        let mut out = Vec::new();
        while self.pos < self.data.len() {
            let b = self.data[self.pos];
            if is_whitespace(b) || is_delimiter(b) {
                break;
            }
            if b == b'#' {
                let hi = self.data.get(self.pos + 1).copied().and_then(hex_value);
                let lo = self.data.get(self.pos + 2).copied().and_then(hex_value);
                if let (Some(hi), Some(lo)) = (hi, lo) {
                    out.push(hi << 4 | lo);
                    self.pos += 3;
                    continue;
                }
            }
            out.push(b);
            self.pos += 1;
        }
        let text = String::from_utf8_lossy(&out);
        Ok(Token::Name(Name::new(&text)))
    }

    fn read_literal_string(&mut self, start: usize) -> ReadResult<Token> {
        let mut out = Vec::new();
        let mut depth = 1usize;
        while self.pos < self.data.len() {
            let b = self.data[self.pos];
            self.pos += 1;
            match b {
                b'(' => {
                    depth += 1;
                    out.push(b);
                }
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(Token::LiteralString(out));
                    }
                    out.push(b);
                }
                b'\\' => {
                    let esc = *self
                        .data
                        .get(self.pos)
                        .ok_or(ReadError::UnexpectedEof { position: start })?;
                    self.pos += 1;
                    match esc {
                        b'n' => out.push(b'\n'),
                        b'r' => out.push(b'\r'),
                        b't' => out.push(b'\t'),
                        b'b' => out.push(0x08),
                        b'f' => out.push(0x0c),
                        b'(' | b')' | b'\\' => out.push(esc),
                        // Escaped newline: line continuation, no output.
                        b'\n' => {}
                        b'\r' => {
                            if self.data.get(self.pos) == Some(&b'\n') {
                                self.pos += 1;
                            }
                        }
                        b'0'..=b'7' => {
                            let mut value = u16::from(esc - b'0');
                            for _ in 0..2 {
                                match self.data.get(self.pos) {
                                    Some(&d @ b'0'..=b'7') => {
                                        value = value * 8 + u16::from(d - b'0');
                                        self.pos += 1;
                                    }
                                    _ => break,
                                }
                            }
                            out.push(value as u8);
                        }
                        other => out.push(other),
                    }
                }
                other => out.push(other),
            }
        }
        Err(ReadError::UnexpectedEof { position: start })
    }

    fn read_hex_string(&mut self, start: usize) -> ReadResult<Token> {
        let mut out = Vec::new();
        let mut pending: Option<u8> = None;
        while self.pos < self.data.len() {
            let b = self.data[self.pos];
            self.pos += 1;
            if b == b'>' {
                // An odd final digit reads as if followed by zero.
                if let Some(hi) = pending {
                    out.push(hi << 4);
                }
                return Ok(Token::HexString(out));
            }
            if is_whitespace(b) {
                continue;
            }
            let v = hex_value(b).ok_or_else(|| ReadError::UnexpectedToken {
                position: self.pos - 1,
                found: format!("{:?}", b as char),
            })?;
            match pending.take() {
                Some(hi) => out.push(hi << 4 | v),
                None => pending = Some(v),
            }
        }
        Err(ReadError::UnexpectedEof { position: start })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_tokens(input: &[u8]) -> Vec<Token> {
        let mut tz = Tokenizer::new(input);
        let mut out = Vec::new();
        loop {
            match tz.next_token() {
                Ok(t) => out.push(t),
                Err(ReadError::UnexpectedEof { .. }) => break,
                Err(e) => panic!("tokenize failed: {e}"),
            }
        }
        out
    }

    #[test]
    fn numbers_and_keywords() {
        let tokens = all_tokens(b"12 -3 4.5 .25 true null R");
        assert_eq!(
            tokens,
            vec![
                Token::Integer(12),
                Token::Integer(-3),
                Token::Real(4.5),
                Token::Real(0.25),
                Token::Keyword(b"true".to_vec()),
                Token::Keyword(b"null".to_vec()),
                Token::Keyword(b"R".to_vec()),
            ]
        );
    }

    #[test]
    fn names_with_hash_escapes() {
        let tokens = all_tokens(b"/Pages /A#20B");
        assert_eq!(tokens[0], Token::Name(Name::new("Pages")));
        assert_eq!(tokens[1], Token::Name(Name::new("A B")));
    }

    #[test]
    fn literal_string_escapes_and_nesting() {
        let tokens = all_tokens(br"(a\(b\)c (nested) \n\101)");
        assert_eq!(
            tokens,
            vec![Token::LiteralString(b"a(b)c (nested) \nA".to_vec())]
        );
    }

    #[test]
    fn hex_strings_pad_odd_digits() {
        let tokens = all_tokens(b"<48 65 6C6C6F> <7>");
        assert_eq!(tokens[0], Token::HexString(b"Hello".to_vec()));
        assert_eq!(tokens[1], Token::HexString(vec![0x70]));
    }

    #[test]
    fn dict_and_array_delimiters() {
        let tokens = all_tokens(b"<< /K [1 2] >>");
        assert_eq!(tokens[0], Token::DictOpen);
        assert_eq!(tokens.last().unwrap(), &Token::DictClose);
    }

    #[test]
    fn comments_are_whitespace() {
        let tokens = all_tokens(b"1 % a comment\n2");
        assert_eq!(tokens, vec![Token::Integer(1), Token::Integer(2)]);
    }

    #[test]
    fn peek_does_not_consume() {
        let mut tz = Tokenizer::new(b"7 8");
        assert_eq!(tz.peek().unwrap(), Token::Integer(7));
        assert_eq!(tz.next_token().unwrap(), Token::Integer(7));
        assert_eq!(tz.next_token().unwrap(), Token::Integer(8));
    }

    #[test]
    fn stream_eol_skipping() {
        let mut tz = Tokenizer::new(b"stream\r\nBODY");
        tz.expect_keyword(b"stream").unwrap();
        tz.skip_stream_eol();
        assert_eq!(tz.take_bytes(4).unwrap(), b"BODY");
    }
}
