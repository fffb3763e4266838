use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};

use crate::types::SectionOffset;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MacroKind {
    Defined,
    Undefined,
    Vendor,
}

/// A preprocessor symbol as recorded in `.debug_macinfo`.
///
/// `raw_text` is `name value` for definitions, `name` for undefinitions and the verbatim
/// string for vendor extensions.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Macro {
    pub kind: MacroKind,
    pub raw_text: String,
}

impl Macro {
    pub fn new(kind: MacroKind, raw_text: impl Into<String>) -> Self {
        Self {
            kind,
            raw_text: raw_text.into(),
        }
    }

    pub fn defined(raw_text: impl Into<String>) -> Self {
        Self::new(MacroKind::Defined, raw_text)
    }

    pub fn undefined(raw_text: impl Into<String>) -> Self {
        Self::new(MacroKind::Undefined, raw_text)
    }

    pub fn name(&self) -> &str {
        split_macro(&self.raw_text).0
    }

    pub fn value(&self) -> Option<&str> {
        split_macro(&self.raw_text).1
    }
}

/// Splits `raw` into name and value at the first space outside a parameter list, so
/// `F(a, b) a+b` names `F(a, b)`.
fn split_macro(raw: &str) -> (&str, Option<&str>) {
    let space = raw.find(' ');
    let paren = raw.find('(');
    let name_end = match (paren, space) {
        (Some(open), Some(sp)) if open < sp => raw[open..].find(')').map(|close| open + close + 1),
        _ => space,
    };
    match name_end {
        Some(end) if end < raw.len() => {
            let value = raw[end..].strip_prefix(' ').unwrap_or(&raw[end..]);
            (&raw[..end], Some(value))
        }
        _ => (raw, None),
    }
}

impl fmt::Display for Macro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            MacroKind::Defined => match self.value() {
                Some(value) => write!(f, "-D{}={}", self.name(), value),
                None => write!(f, "-D{}", self.name()),
            },
            MacroKind::Undefined => write!(f, "-U{}", self.name()),
            MacroKind::Vendor => write!(f, "vendor: {}", self.raw_text),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IncludeKind {
    Directory,
    File,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Include {
    pub kind: IncludeKind,
    pub path: String,
}

impl Include {
    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            kind: IncludeKind::Directory,
            path: path.into(),
        }
    }

    pub fn file(path: impl Into<String>) -> Self {
        Self {
            kind: IncludeKind::File,
            path: path.into(),
        }
    }
}

impl fmt::Display for Include {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            IncludeKind::Directory => write!(f, "-I{}", self.path),
            IncludeKind::File => write!(f, "-include {}", self.path),
        }
    }
}

/// Hands out one shared allocation per distinct value.
///
/// The same few macros and include directories recur across every file of a binary, so
/// the per-file sets hold `Arc`s into this cache instead of copies.
#[derive(Debug)]
pub struct ValueCache<T> {
    values: HashSet<Arc<T>>,
}

impl<T: Eq + Hash> ValueCache<T> {
    pub fn new() -> Self {
        Self {
            values: HashSet::new(),
        }
    }

    pub fn intern(&mut self, value: T) -> Arc<T> {
        if let Some(existing) = self.values.get(&value) {
            return Arc::clone(existing);
        }
        let value = Arc::new(value);
        self.values.insert(Arc::clone(&value));
        value
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<T: Eq + Hash> Default for ValueCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub type MacroSet = IndexSet<Arc<Macro>>;
pub type IncludeSet = IndexSet<Arc<Include>>;

/// Source files keyed by resolved path, each with the `.debug_macinfo` offset of the unit it
/// is the primary file of. The first registration of a path wins.
#[derive(Clone, Debug, Default)]
pub struct SourceFiles {
    files: IndexMap<String, Option<SectionOffset>>,
}

impl SourceFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the path was not known yet.
    pub fn register(&mut self, path: impl Into<String>, macro_info: Option<SectionOffset>) -> bool {
        let path = path.into();
        if self.files.contains_key(&path) {
            return false;
        }
        self.files.insert(path, macro_info);
        true
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn macro_info(&self, path: &str) -> Option<SectionOffset> {
        self.files.get(path).copied().flatten()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<SectionOffset>)> {
        self.files.iter().map(|(path, offset)| (path.as_str(), *offset))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
