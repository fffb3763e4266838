use std::fmt;
use std::hash::Hash;

use indexmap::IndexSet;
use tracing::{debug, warn};

use crate::tree::{PathTree, TreePath};

/// A path whose attributes cannot be rebuilt exactly from the compressed tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Discrepancy<T> {
    pub path: TreePath,
    /// In the original set but not reachable from the compressed tree.
    pub missing: Vec<T>,
    /// Reachable from the compressed tree but not in the original set.
    pub extraneous: Vec<T>,
}

impl<T: fmt::Display> fmt::Display for Discrepancy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.path)?;
        for item in &self.missing {
            write!(f, " -{item}")?;
        }
        for item in &self.extraneous {
            write!(f, " +{item}")?;
        }
        Ok(())
    }
}

/// Everything `path` inherits from the compressed tree: its own entry plus those of all
/// its ancestors up to the root.
pub fn reconstruct<T>(compressed: &PathTree<T>, path: &TreePath) -> IndexSet<T>
where
    T: Clone + Eq + Hash,
{
    let mut attrs = IndexSet::new();
    for ancestor in path.ancestors() {
        if let Some(own) = compressed.get(&ancestor) {
            attrs.extend(own.iter().cloned());
        }
    }
    attrs
}

/// Checks that every original path can be reconstructed from `compressed`.
///
/// Mismatches are reported, never fatal.
pub fn verify<'a, T, I>(original: I, compressed: &PathTree<T>) -> Vec<Discrepancy<T>>
where
    T: Clone + Eq + Hash + fmt::Display + 'a,
    I: IntoIterator<Item = (&'a TreePath, &'a IndexSet<T>)>,
{
    let mut discrepancies = Vec::new();
    let mut checked = 0usize;
    for (path, expected) in original {
        checked += 1;
        let rebuilt = reconstruct(compressed, path);
        let missing: Vec<T> = expected.difference(&rebuilt).cloned().collect();
        let extraneous: Vec<T> = rebuilt.difference(expected).cloned().collect();
        if missing.is_empty() && extraneous.is_empty() {
            continue;
        }
        let discrepancy = Discrepancy {
            path: path.clone(),
            missing,
            extraneous,
        };
        warn!(%discrepancy, "compressed attributes do not match");
        discrepancies.push(discrepancy);
    }
    debug!(checked, failed = discrepancies.len(), "verified compressed tree");
    discrepancies
}
