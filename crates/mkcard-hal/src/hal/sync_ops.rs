//! Tree mirroring via rsync.

use crate::HalResult;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct MirrorOptions {
    pub archive: bool,
    pub compress: bool,
    /// Delete extraneous destination files, but only after the transfer.
    pub delete_delay: bool,
    /// Also delete destination files that the exclusion rules skip.
    pub delete_excluded: bool,
    /// Exclusion-rule file passed through to rsync, if any.
    pub exclude_from: Option<PathBuf>,
    /// Extra rsync args (verbatim).
    pub extra_args: Vec<String>,
}

impl MirrorOptions {
    /// The full mirror used for both the firmware and OS trees.
    pub fn mirror(exclude_from: Option<PathBuf>) -> Self {
        Self {
            archive: true,
            compress: true,
            delete_delay: true,
            delete_excluded: true,
            exclude_from,
            extra_args: Vec::new(),
        }
    }
}

pub trait MirrorOps {
    /// Mirror the contents of `src` into `dst` (a trailing slash is added to
    /// `src` so its contents are copied, not the directory itself).
    fn mirror_tree(
        &self,
        src: &Path,
        dst: &Path,
        opts: &MirrorOptions,
        dry_run: bool,
    ) -> HalResult<()>;
}
