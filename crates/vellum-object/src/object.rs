use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ObjectError, ObjectResult};
use crate::name::Name;
use crate::reference::ObjRef;
use crate::stream::Stream;

/// Discriminant of an [`Object`], used in errors and dispatch tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Null,
    Boolean,
    Integer,
    Real,
    Literal,
    Name,
    String,
    Array,
    Dictionary,
    Stream,
    Reference,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Literal => "literal",
            Self::Name => "name",
            Self::String => "string",
            Self::Array => "array",
            Self::Dictionary => "dictionary",
            Self::Stream => "stream",
            Self::Reference => "reference",
        };
        write!(f, "{s}")
    }
}

/// How a string node is written on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StringKind {
    /// `(parenthesized)` with backslash escapes.
    Literal,
    /// `<686578>` hex pairs.
    Hex,
}

/// A document node: the closed union over the ten node kinds.
///
/// Composite kinds own their direct children by value. Relations to other
/// indirect nodes go through `Reference`, resolved by the cross-reference
/// table that owns every indirect node.
#[derive(Clone, Debug, PartialEq)]
pub enum Object {
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    /// Pre-serialized token run, written verbatim. Never produced by the
    /// parser; carried for callers that splice raw content through.
    Literal(Vec<u8>),
    Name(Name),
    String(Vec<u8>, StringKind),
    Array(Vec<Object>),
    Dictionary(Dictionary),
    Stream(Stream),
    Reference(ObjRef),
}

impl Object {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Null => ObjectKind::Null,
            Self::Boolean(_) => ObjectKind::Boolean,
            Self::Integer(_) => ObjectKind::Integer,
            Self::Real(_) => ObjectKind::Real,
            Self::Literal(_) => ObjectKind::Literal,
            Self::Name(_) => ObjectKind::Name,
            Self::String(..) => ObjectKind::String,
            Self::Array(_) => ObjectKind::Array,
            Self::Dictionary(_) => ObjectKind::Dictionary,
            Self::Stream(_) => ObjectKind::Stream,
            Self::Reference(_) => ObjectKind::Reference,
        }
    }

    pub fn name(s: &str) -> Self {
        Self::Name(Name::new(s))
    }

    pub fn reference(number: u32, generation: u16) -> Self {
        Self::Reference(ObjRef::new(number, generation))
    }

    pub fn string(s: &str) -> Self {
        Self::String(s.as_bytes().to_vec(), StringKind::Literal)
    }

    pub fn is_composite(&self) -> bool {
        matches!(
            self,
            Self::Array(_) | Self::Dictionary(_) | Self::Stream(_)
        )
    }

    pub fn as_int(&self) -> ObjectResult<i64> {
        match self {
            Self::Integer(v) => Ok(*v),
            other => Err(mismatch("integer", other)),
        }
    }

    pub fn as_name(&self) -> ObjectResult<&Name> {
        match self {
            Self::Name(n) => Ok(n),
            other => Err(mismatch("name", other)),
        }
    }

    pub fn as_reference(&self) -> ObjectResult<ObjRef> {
        match self {
            Self::Reference(r) => Ok(*r),
            other => Err(mismatch("reference", other)),
        }
    }

    pub fn as_array(&self) -> ObjectResult<&[Object]> {
        match self {
            Self::Array(items) => Ok(items),
            other => Err(mismatch("array", other)),
        }
    }

    pub fn as_array_mut(&mut self) -> ObjectResult<&mut Vec<Object>> {
        match self {
            Self::Array(items) => Ok(items),
            other => Err(mismatch("array", other)),
        }
    }

    /// The dictionary of a dictionary node *or* of a stream node.
    pub fn as_dict(&self) -> ObjectResult<&Dictionary> {
        match self {
            Self::Dictionary(d) => Ok(d),
            Self::Stream(s) => Ok(&s.dict),
            other => Err(mismatch("dictionary", other)),
        }
    }

    pub fn as_dict_mut(&mut self) -> ObjectResult<&mut Dictionary> {
        match self {
            Self::Dictionary(d) => Ok(d),
            Self::Stream(s) => Ok(&mut s.dict),
            other => Err(mismatch("dictionary", other)),
        }
    }

    pub fn as_stream(&self) -> ObjectResult<&Stream> {
        match self {
            Self::Stream(s) => Ok(s),
            other => Err(mismatch("stream", other)),
        }
    }

    /// Detach every direct child, leaving an empty composite behind.
    ///
    /// Used at document close so backing storage can be reclaimed without
    /// waiting for the table itself to drop.
    pub fn take_children(&mut self) -> Vec<Object> {
        match self {
            Self::Array(items) => std::mem::take(items),
            Self::Dictionary(d) => d.take_values(),
            Self::Stream(s) => {
                s.data.clear();
                s.data.shrink_to_fit();
                s.dict.take_values()
            }
            _ => Vec::new(),
        }
    }
}

fn mismatch(expected: &'static str, actual: &Object) -> ObjectError {
    ObjectError::KindMismatch {
        expected,
        actual: match actual.kind() {
            ObjectKind::Null => "null",
            ObjectKind::Boolean => "boolean",
            ObjectKind::Integer => "integer",
            ObjectKind::Real => "real",
            ObjectKind::Literal => "literal",
            ObjectKind::Name => "name",
            ObjectKind::String => "string",
            ObjectKind::Array => "array",
            ObjectKind::Dictionary => "dictionary",
            ObjectKind::Stream => "stream",
            ObjectKind::Reference => "reference",
        },
    }
}

/// A dictionary node: name-keyed, order-stable map of children.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Dictionary {
    entries: BTreeMap<Name, Object>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Object> {
        self.entries.get(&Name::new(key))
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Object> {
        self.entries.get_mut(&Name::new(key))
    }

    pub fn insert(&mut self, key: impl Into<Name>, value: Object) -> Option<Object> {
        self.entries.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Object> {
        self.entries.remove(&Name::new(key))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&Name::new(key))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Name, &Object)> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&Name, &mut Object)> {
        self.entries.iter_mut()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Name> {
        self.entries.keys()
    }

    /// Required-key lookup with a typed error.
    pub fn require(&self, key: &str) -> ObjectResult<&Object> {
        self.get(key)
            .ok_or_else(|| ObjectError::MissingKey(key.to_owned()))
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Some(Object::Integer(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_name(&self, key: &str) -> Option<&Name> {
        match self.get(key) {
            Some(Object::Name(n)) => Some(n),
            _ => None,
        }
    }

    pub fn get_ref(&self, key: &str) -> Option<ObjRef> {
        match self.get(key) {
            Some(Object::Reference(r)) => Some(*r),
            _ => None,
        }
    }

    pub fn get_dict(&self, key: &str) -> Option<&Dictionary> {
        match self.get(key) {
            Some(Object::Dictionary(d)) => Some(d),
            Some(Object::Stream(s)) => Some(&s.dict),
            _ => None,
        }
    }

    pub fn get_array(&self, key: &str) -> Option<&[Object]> {
        match self.get(key) {
            Some(Object::Array(items)) => Some(items),
            _ => None,
        }
    }

    /// Type check: `/Type` equals the given name.
    pub fn is_type(&self, type_name: &str) -> bool {
        self.get_name("Type").is_some_and(|n| n.as_str() == type_name)
    }

    pub(crate) fn take_values(&mut self) -> Vec<Object> {
        std::mem::take(&mut self.entries).into_values().collect()
    }
}

impl FromIterator<(Name, Object)> for Dictionary {
    fn from_iter<T: IntoIterator<Item = (Name, Object)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_cover_every_variant() {
        assert_eq!(Object::Null.kind(), ObjectKind::Null);
        assert_eq!(Object::Boolean(true).kind(), ObjectKind::Boolean);
        assert_eq!(Object::Integer(5).kind(), ObjectKind::Integer);
        assert_eq!(Object::Real(1.5).kind(), ObjectKind::Real);
        assert_eq!(Object::Literal(vec![]).kind(), ObjectKind::Literal);
        assert_eq!(Object::name("X").kind(), ObjectKind::Name);
        assert_eq!(Object::string("s").kind(), ObjectKind::String);
        assert_eq!(Object::Array(vec![]).kind(), ObjectKind::Array);
        assert_eq!(
            Object::Dictionary(Dictionary::new()).kind(),
            ObjectKind::Dictionary
        );
        assert_eq!(Object::reference(1, 0).kind(), ObjectKind::Reference);
    }

    #[test]
    fn typed_getters_reject_wrong_kind() {
        let err = Object::Null.as_int().unwrap_err();
        assert_eq!(
            err,
            ObjectError::KindMismatch {
                expected: "integer",
                actual: "null"
            }
        );
    }

    #[test]
    fn dictionary_round_trip() {
        let mut d = Dictionary::new();
        d.insert(Name::new("Count"), Object::Integer(3));
        d.insert(Name::new("Kids"), Object::Array(vec![Object::reference(4, 0)]));
        assert_eq!(d.get_int("Count"), Some(3));
        assert_eq!(d.get_array("Kids").unwrap().len(), 1);
        assert!(d.remove("Count").is_some());
        assert!(!d.contains_key("Count"));
    }

    #[test]
    fn is_type_checks_type_key() {
        let mut d = Dictionary::new();
        d.insert(Name::new("Type"), Object::name("Page"));
        assert!(d.is_type("Page"));
        assert!(!d.is_type("Pages"));
    }

    #[test]
    fn take_children_empties_composites() {
        let mut arr = Object::Array(vec![Object::Integer(1), Object::Integer(2)]);
        let taken = arr.take_children();
        assert_eq!(taken.len(), 2);
        assert_eq!(arr, Object::Array(vec![]));
    }

    #[test]
    fn require_reports_missing_key() {
        let d = Dictionary::new();
        assert_eq!(
            d.require("Root").unwrap_err(),
            ObjectError::MissingKey("Root".into())
        );
    }
}
