//! Hoisting of attributes shared by a whole directory.
//!
//! Given a map from file path to a set of attributes, [`compress`] moves every attribute
//! that all entries below a directory have in common up to that directory, so it is stored
//! once instead of once per file. Paths are processed one depth at a time, deepest first;
//! at each depth the siblings of every directory are intersected and the intersection
//! replaces their individual copies.
//!
//! Directories with exactly one child do not branch, so they never receive attributes of
//! their own: the child's entry passes through them and is put back where it came from.
//! The net effect is that a shared attribute lands on the deepest directory that still
//! contains every file carrying it.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;
use std::ops::Bound::Excluded;

use indexmap::IndexSet;

/// A path split into segments. The root has no segments.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreePath {
    segments: Vec<String>,
}

impl TreePath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Splits on both `/` and `\`, dropping empty and `.` segments.
    pub fn parse(path: &str) -> Self {
        let segments = path
            .split(['/', '\\'])
            .filter(|s| !s.is_empty() && *s != ".")
            .map(str::to_string)
            .collect();
        Self { segments }
    }

    pub fn from_segments<S: Into<String>>(segments: impl IntoIterator<Item = S>) -> Self {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn parent(&self) -> Option<TreePath> {
        self.segments.split_last().map(|(_, parent)| TreePath {
            segments: parent.to_vec(),
        })
    }

    fn parent_segments(&self) -> &[String] {
        self.segments.split_last().map_or(&[], |(_, parent)| parent)
    }

    /// This path followed by each of its ancestors, ending with the root.
    pub fn ancestors(&self) -> impl Iterator<Item = TreePath> + '_ {
        (0..=self.segments.len())
            .rev()
            .map(move |len| TreePath::from_segments(self.segments[..len].iter().cloned()))
    }

    pub fn starts_with(&self, prefix: &TreePath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl From<&str> for TreePath {
    fn from(path: &str) -> Self {
        TreePath::parse(path)
    }
}

pub type PathTree<T> = BTreeMap<TreePath, IndexSet<T>>;

/// Key of the working map: real paths, plus markers that bound one depth's slice of it.
///
/// Ordered deepest first; within a depth the marker sorts before every path, and paths
/// sort by segment so that siblings are adjacent.
#[derive(Clone, Debug, PartialEq, Eq)]
enum StratumKey {
    Boundary(usize),
    Path(TreePath),
}

impl StratumKey {
    fn depth(&self) -> usize {
        match self {
            StratumKey::Boundary(depth) => *depth,
            StratumKey::Path(path) => path.depth(),
        }
    }
}

impl Ord for StratumKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other.depth().cmp(&self.depth()).then_with(|| match (self, other) {
            (StratumKey::Boundary(_), StratumKey::Boundary(_)) => Ordering::Equal,
            (StratumKey::Boundary(_), StratumKey::Path(_)) => Ordering::Less,
            (StratumKey::Path(_), StratumKey::Boundary(_)) => Ordering::Greater,
            (StratumKey::Path(a), StratumKey::Path(b)) => a.segments.cmp(&b.segments),
        })
    }
}

impl PartialOrd for StratumKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug)]
struct Slot<T> {
    attrs: IndexSet<T>,
    // Set when this entry passed up through single-child directories; where it belongs.
    origin: Option<TreePath>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            attrs: IndexSet::new(),
            origin: None,
        }
    }
}

/// Hoists attributes shared by all entries under a directory onto that directory.
///
/// Entries whose set ends up empty are left out of the result. Input entries are expected
/// to be leaves; an input entry that is also an ancestor of other entries is treated as a
/// directory whose attributes apply to everything beneath it.
pub fn compress<T, I>(entries: I) -> PathTree<T>
where
    T: Clone + Eq + Hash,
    I: IntoIterator<Item = (TreePath, IndexSet<T>)>,
{
    let mut strata: BTreeMap<StratumKey, Slot<T>> = BTreeMap::new();
    for (path, attrs) in entries {
        strata
            .entry(StratumKey::Path(path))
            .or_default()
            .attrs
            .extend(attrs);
    }

    let max_depth = strata.keys().next().map_or(0, StratumKey::depth);
    for depth in (1..=max_depth).rev() {
        let stratum: Vec<TreePath> = strata
            .range((
                Excluded(StratumKey::Boundary(depth)),
                Excluded(StratumKey::Boundary(depth - 1)),
            ))
            .filter_map(|(key, _)| match key {
                StratumKey::Path(path) => Some(path.clone()),
                StratumKey::Boundary(_) => None,
            })
            .collect();

        let mut start = 0;
        while start < stratum.len() {
            let parent = stratum[start].parent_segments();
            let mut end = start + 1;
            while end < stratum.len() && stratum[end].parent_segments() == parent {
                end += 1;
            }
            let parent = TreePath::from_segments(parent.iter().cloned());
            hoist_siblings(&mut strata, parent, &stratum[start..end]);
            start = end;
        }
    }

    strata
        .into_iter()
        .filter_map(|(key, slot)| match key {
            StratumKey::Path(path) if !slot.attrs.is_empty() => {
                Some((slot.origin.unwrap_or(path), slot.attrs))
            }
            _ => None,
        })
        .collect()
}

fn hoist_siblings<T>(strata: &mut BTreeMap<StratumKey, Slot<T>>, parent: TreePath, siblings: &[TreePath])
where
    T: Clone + Eq + Hash,
{
    let parent_key = StratumKey::Path(parent);
    let parent_present = strata.contains_key(&parent_key);

    if let [only] = siblings {
        if parent_present {
            return;
        }
        if let Some(slot) = strata.remove(&StratumKey::Path(only.clone())) {
            let origin = slot.origin.unwrap_or_else(|| only.clone());
            strata.insert(
                parent_key,
                Slot {
                    attrs: slot.attrs,
                    origin: Some(origin),
                },
            );
        }
        return;
    }

    let mut sets = siblings
        .iter()
        .filter_map(|path| strata.get(&StratumKey::Path(path.clone())))
        .map(|slot| &slot.attrs);
    let Some(first) = sets.next() else {
        return;
    };
    let mut common = first.clone();
    for set in sets {
        common.retain(|attr| set.contains(attr));
    }

    if !common.is_empty() {
        for path in siblings {
            if let Some(slot) = strata.get_mut(&StratumKey::Path(path.clone())) {
                slot.attrs.retain(|attr| !common.contains(attr));
            }
        }
    }
    strata.entry(parent_key).or_default().attrs.extend(common);
}
