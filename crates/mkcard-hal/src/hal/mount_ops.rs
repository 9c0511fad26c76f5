//! Mount operations.

use crate::HalResult;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct MountOptions {
    /// Filesystem-specific mount options (comma-separated, as for mount -o).
    pub options: Option<String>,
}

pub trait MountOps {
    fn mount_device(
        &self,
        device: &Path,
        target: &Path,
        fstype: Option<&str>,
        options: MountOptions,
        dry_run: bool,
    ) -> HalResult<()>;

    fn unmount(&self, target: &Path, dry_run: bool) -> HalResult<()>;

    fn is_mounted(&self, path: &Path) -> HalResult<bool>;
}
