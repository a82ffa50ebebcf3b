//! Read-merge-write of project trees.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::error::StoreError;
use crate::model::ProjectId;
use crate::traits::ProjectStore;
use crate::tree::codec::normalize_report;
use crate::tree::merge::{materialize, merge_with_stats, MergeStats};
use crate::tree::FlatTree;

/// Result of applying a patch.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    /// The tree now stored.
    pub tree: FlatTree,
    /// The patch after key normalization. This is what peers should see.
    pub applied: FlatTree,
    pub stats: MergeStats,
    /// Keys dropped from the incoming patch.
    pub dropped: usize,
}

/// Applies patches to stored project trees.
///
/// There is no locking across the read and the write: two concurrent patches
/// to the same project resolve as last-write-wins.
#[derive(Clone)]
pub struct TreeSync {
    store: Arc<dyn ProjectStore>,
}

impl TreeSync {
    pub fn new(store: Arc<dyn ProjectStore>) -> Self {
        TreeSync { store }
    }

    /// Normalize `patch`, merge it into the stored tree and persist the result.
    #[instrument(skip(self, patch), fields(project = %id, entries = patch.len()))]
    pub async fn apply_patch(
        &self,
        id: ProjectId,
        patch: &FlatTree,
    ) -> Result<SyncOutcome, StoreError> {
        let (applied, dropped) = normalize_report(patch);
        let base = self.store.get_tree(id).await?;
        let (tree, stats) = merge_with_stats(&base, &applied);

        if stats.is_noop() {
            debug!("patch changes nothing, skipping write");
        } else {
            self.store.set_tree(id, &tree).await?;
            info!(
                inserted = stats.inserted,
                replaced = stats.replaced,
                removed = stats.removed,
                materialized = stats.materialized,
                "tree updated"
            );
        }

        Ok(SyncOutcome {
            tree,
            applied,
            stats,
            dropped: dropped.len(),
        })
    }

    /// Replace the stored tree wholesale (after normalization).
    #[instrument(skip(self, tree), fields(project = %id, entries = tree.len()))]
    pub async fn replace(&self, id: ProjectId, tree: &FlatTree) -> Result<FlatTree, StoreError> {
        let (mut clean, _) = normalize_report(tree);
        materialize(&mut clean);
        self.store.set_tree(id, &clean).await?;
        info!(entries = clean.len(), "tree replaced");
        Ok(clean)
    }

    /// Current stored tree.
    pub async fn snapshot(&self, id: ProjectId) -> Result<FlatTree, StoreError> {
        self.store.get_tree(id).await
    }
}
