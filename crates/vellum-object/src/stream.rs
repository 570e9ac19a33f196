use crate::name::Name;
use crate::object::{Dictionary, Object};

/// A stream node: a dictionary plus a raw byte body.
///
/// `data` holds the bytes exactly as they sit between the body delimiters on
/// the wire; whether they are encoded is described by the `/Filter` entry and
/// decided by the byte-filter service, not by this type.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Stream {
    pub dict: Dictionary,
    pub data: Vec<u8>,
}

impl Stream {
    pub fn new(dict: Dictionary, data: Vec<u8>) -> Self {
        Self { dict, data }
    }

    /// The declared filter chain, outermost first. Accepts a single name or
    /// an array of names; anything else reads as "no filters".
    pub fn filters(&self) -> Vec<Name> {
        match self.dict.get("Filter") {
            Some(Object::Name(n)) => vec![n.clone()],
            Some(Object::Array(items)) => items
                .iter()
                .filter_map(|o| match o {
                    Object::Name(n) => Some(n.clone()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Declared body length, when it is a direct integer. An indirect
    /// `/Length` must be resolved through the table by the caller.
    pub fn declared_length(&self) -> Option<i64> {
        self.dict.get_int("Length")
    }

    /// Keep the declared `/Length` in step with the body.
    pub fn sync_length(&mut self) {
        self.dict
            .insert(Name::new("Length"), Object::Integer(self.data.len() as i64));
    }
}
