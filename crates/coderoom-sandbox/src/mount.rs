//! Writing project trees into a sandbox.
//!
//! Both entry points work in two passes: every directory is created (parents
//! first) before any file is written. A failing entry is logged and recorded
//! in the [`MountReport`]; the rest of the batch still runs.

use std::collections::BTreeSet;

use coderoom_core::tree::codec::to_flat;
use coderoom_core::tree::merge::ancestors;
use coderoom_core::{FlatTree, NestedTree};
use tracing::{debug, info, warn};

use crate::fs::SandboxFs;

/// One entry that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountFailure {
    pub path: String,
    pub error: String,
}

/// What a mount or delta did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountReport {
    pub dirs_created: usize,
    pub files_written: usize,
    pub failures: Vec<MountFailure>,
}

impl MountReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Mount a whole nested tree. Safe to repeat.
pub async fn mount(fs: &dyn SandboxFs, tree: &NestedTree) -> MountReport {
    let flat = to_flat(tree);
    let dirs: BTreeSet<&str> = flat
        .keys()
        .flat_map(|k| ancestors(k))
        .chain(flat.directories())
        .collect();

    let report = write_batch(fs, dirs, &flat).await;
    info!(
        dirs = report.dirs_created,
        files = report.files_written,
        failures = report.failures.len(),
        "tree mounted"
    );
    report
}

/// Apply a flat patch without remounting the whole tree.
///
/// Only directories implied by the patch's own keys are (re)created.
pub async fn apply_delta(fs: &dyn SandboxFs, patch: &FlatTree) -> MountReport {
    let dirs: BTreeSet<&str> = patch
        .keys()
        .flat_map(|k| ancestors(k))
        .chain(patch.directories())
        .collect();

    let report = write_batch(fs, dirs, patch).await;
    debug!(
        dirs = report.dirs_created,
        files = report.files_written,
        failures = report.failures.len(),
        "delta applied"
    );
    report
}

async fn write_batch(fs: &dyn SandboxFs, dirs: BTreeSet<&str>, tree: &FlatTree) -> MountReport {
    let mut report = MountReport::default();

    let mut dirs: Vec<&str> = dirs.into_iter().collect();
    dirs.sort_by_key(|d| d.matches('/').count());

    for dir in dirs {
        match fs.create_dir(dir).await {
            Ok(()) => report.dirs_created += 1,
            Err(e) => {
                warn!(path = %dir, error = %e, "failed to create sandbox directory");
                report.failures.push(MountFailure {
                    path: dir.to_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    for (path, contents) in tree.files() {
        match fs.write_file(path, contents).await {
            Ok(()) => report.files_written += 1,
            Err(e) => {
                warn!(path = %path, error = %e, "failed to write sandbox file");
                report.failures.push(MountFailure {
                    path: path.to_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    report
}
