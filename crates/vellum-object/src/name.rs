use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

/// A name node: an atom written on the wire as `/Name`.
///
/// Names that appear in the document-structure grammar (dictionary keys like
/// `Type`, `Pages`, `Kids`) are served from a process-wide table built once
/// and immutable afterwards, so equality-heavy code paths compare pointers
/// into the table rather than allocating.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(Cow<'static, str>);

/// Names the engine itself consults. Built lazily, never mutated.
static WELL_KNOWN: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "Type", "Catalog", "Pages", "Page", "Kids", "Count", "Parent",
        "Root", "Size", "Info", "ID", "Prev", "XRefStm", "XRef", "ObjStm",
        "N", "First", "W", "Index", "Length", "Filter", "ZstdDecode",
        "Contents", "Resources", "Annots", "Thumb", "MediaBox", "Font",
        "OCProperties", "OCGs", "Dest", "A", "P", "Popup", "AcroForm",
    ]
    .into_iter()
    .collect()
});

impl Name {
    /// Intern a name, borrowing from the well-known table when possible.
    pub fn new(s: &str) -> Self {
        match WELL_KNOWN.get(s) {
            Some(known) => Self(Cow::Borrowed(known)),
            None => Self(Cow::Owned(s.to_owned())),
        }
    }

    /// A name known at compile time. Does not consult the table.
    pub const fn from_static(s: &'static str) -> Self {
        Self(Cow::Borrowed(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if this name is in the engine's well-known table.
    pub fn is_well_known(&self) -> bool {
        WELL_KNOWN.contains(self.as_str())
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name(/{})", self.0)
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl PartialEq<str> for Name {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_names_borrow_from_table() {
        let n = Name::new("Pages");
        assert!(n.is_well_known());
        assert!(matches!(n.0, Cow::Borrowed(_)));
    }

    #[test]
    fn unknown_names_are_owned() {
        let n = Name::new("MyCustomKey");
        assert!(!n.is_well_known());
        assert!(matches!(n.0, Cow::Owned(_)));
    }

    #[test]
    fn display_has_solidus() {
        assert_eq!(Name::new("Kids").to_string(), "/Kids");
    }

    #[test]
    fn equality_ignores_interning() {
        assert_eq!(Name::new("Count"), Name::from_static("Count"));
        assert_eq!(Name::new("Other"), Name::new("Other"));
    }
}
