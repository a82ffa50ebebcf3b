//! Merging a partial tree (a patch) into a full one.

use std::collections::BTreeSet;

use tracing::{debug, trace};

use super::{FlatNode, FlatTree};

/// Counters describing what a merge did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    /// Patch entries whose path was not in the base.
    pub inserted: usize,
    /// Files whose contents were replaced.
    pub replaced: usize,
    /// Entries that changed kind (file to directory or back).
    pub kind_changes: usize,
    /// Base entries removed because a patch file replaced their directory.
    pub removed: usize,
    /// Directories added (or converted from files) to keep the tree consistent.
    pub materialized: usize,
}

impl MergeStats {
    /// True if the merge left the base untouched.
    pub fn is_noop(&self) -> bool {
        *self == MergeStats::default()
    }
}

/// Fold `patch` into `base`. The patch always wins on conflicting paths.
pub fn merge(base: &FlatTree, patch: &FlatTree) -> FlatTree {
    merge_with_stats(base, patch).0
}

/// [`merge`], also reporting what changed.
///
/// Base entries not mentioned by the patch are kept, except descendants of a
/// directory the patch turns into a file. After applying the patch every
/// ancestor of every entry is made a directory.
pub fn merge_with_stats(base: &FlatTree, patch: &FlatTree) -> (FlatTree, MergeStats) {
    let mut result = base.clone();
    let mut stats = MergeStats::default();

    for (path, node) in patch {
        if path.is_empty() {
            continue;
        }
        match (result.get(path), node) {
            (None, _) => stats.inserted += 1,
            (Some(FlatNode::Directory), FlatNode::Directory) => continue,
            (Some(FlatNode::File { contents: old }), FlatNode::File { contents: new }) => {
                if old == new {
                    continue;
                }
                stats.replaced += 1;
            }
            (Some(FlatNode::Directory), FlatNode::File { .. }) => {
                let doomed: Vec<String> = result
                    .descendants(path)
                    .filter(|key| !patch.contains_key(key))
                    .cloned()
                    .collect();
                debug!(path = %path, removed = doomed.len(), "file replaces directory");
                for key in &doomed {
                    result.remove(key);
                }
                stats.removed += doomed.len();
                stats.kind_changes += 1;
            }
            (Some(FlatNode::File { .. }), FlatNode::Directory) => {
                debug!(path = %path, "directory replaces file");
                stats.kind_changes += 1;
            }
        }
        result.insert(path.clone(), node.clone());
    }

    stats.materialized = materialize(&mut result);
    (result, stats)
}

/// Make sure every proper ancestor of every key is a directory entry.
///
/// Returns the number of entries added or converted.
pub fn materialize(tree: &mut FlatTree) -> usize {
    let required: BTreeSet<String> = tree
        .keys()
        .flat_map(|key| ancestors(key))
        .map(str::to_string)
        .collect();

    let mut changed = 0;
    for dir in required {
        match tree.get(&dir) {
            Some(FlatNode::Directory) => {}
            Some(FlatNode::File { .. }) => {
                debug!(path = %dir, "file is an ancestor of other entries, converting to directory");
                tree.insert(dir, FlatNode::Directory);
                changed += 1;
            }
            None => {
                trace!(path = %dir, "adding implied directory");
                tree.insert(dir, FlatNode::Directory);
                changed += 1;
            }
        }
    }
    changed
}

/// Proper ancestors of a slash-separated path, shortest first.
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('/')
        .map(move |(i, _)| &path[..i])
        .filter(|prefix| !prefix.is_empty() && !prefix.ends_with('/'))
}
