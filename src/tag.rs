use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, OnceLock};

/// A single interned tag atom.
///
/// Atoms live in a process-wide intern table: two `Tag`s built from the same
/// string share one allocation, so equality is pointer-fast (with a string
/// fallback for safety). The canonical persistence form of a tag is its
/// string; `|` is reserved as the set separator and must not appear in an
/// atom (use [`TagSet::parse`] to split a combined string).
#[derive(Debug, Clone)]
pub struct Tag(Arc<str>);

#[cfg(feature = "serde")]
impl serde::Serialize for Tag {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

fn intern_table() -> &'static Mutex<HashSet<Arc<str>>> {
    static TABLE: OnceLock<Mutex<HashSet<Arc<str>>>> = OnceLock::new();
    TABLE.get_or_init(|| Mutex::new(HashSet::new()))
}

impl Tag {
    /// Intern `name` and return its atom.
    pub fn new(name: &str) -> Tag {
        debug_assert!(
            !name.contains('|'),
            "'|' is the tag-set separator and cannot appear in an atom"
        );
        let mut table = intern_table().lock().unwrap();
        if let Some(existing) = table.get(name) {
            return Tag(existing.clone());
        }
        let atom: Arc<str> = Arc::from(name);
        table.insert(atom.clone());
        Tag(atom)
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl Eq for Tag {}

impl PartialOrd for Tag {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Tag {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl Hash for Tag {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Tag {
    fn from(s: &str) -> Self {
        Tag::new(s)
    }
}

/// A sorted, deduplicated set of tag atoms.
///
/// The canonical string form joins the atoms with `|` in sorted order and is
/// what the binary codec persists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TagSet(Vec<Tag>);

impl TagSet {
    pub const fn empty() -> TagSet {
        TagSet(Vec::new())
    }

    pub fn new<I, S>(names: I) -> TagSet
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = TagSet::empty();
        for name in names {
            set.insert(Tag::new(name.as_ref()));
        }
        set
    }

    /// Parse a canonical `|`-separated string; empty segments are skipped.
    pub fn parse(s: &str) -> TagSet {
        TagSet::new(s.split('|').map(str::trim).filter(|p| !p.is_empty()))
    }

    pub fn insert(&mut self, tag: Tag) {
        if let Err(at) = self.0.binary_search(&tag) {
            self.0.insert(at, tag);
        }
    }

    pub fn contains(&self, tag: &Tag) -> bool {
        self.0.binary_search(tag).is_ok()
    }

    /// Merge `other` into `self`.
    pub fn union_with(&mut self, other: &TagSet) {
        for tag in &other.0 {
            self.insert(tag.clone());
        }
    }

    pub fn union(mut self, other: &TagSet) -> TagSet {
        self.union_with(other);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The canonical `|`-separated persistence form.
    pub fn to_canonical(&self) -> String {
        let mut out = String::new();
        for (i, tag) in self.0.iter().enumerate() {
            if i > 0 {
                out.push('|');
            }
            out.push_str(tag.as_str());
        }
        out
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_canonical())
    }
}

impl FromIterator<Tag> for TagSet {
    fn from_iter<I: IntoIterator<Item = Tag>>(iter: I) -> Self {
        let mut set = TagSet::empty();
        for tag in iter {
            set.insert(tag);
        }
        set
    }
}
