//! Filesystem formatting operations.

use crate::HalResult;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct FormatOptions {
    pub dry_run: bool,
    pub confirmed: bool,
}

impl FormatOptions {
    pub fn new(dry_run: bool, confirmed: bool) -> Self {
        Self { dry_run, confirmed }
    }
}

pub trait FormatOps {
    /// mkfs.vfat with the given FAT size (16 or 32) and volume label.
    fn format_fat(
        &self,
        device: &Path,
        fat_size: u8,
        label: &str,
        opts: &FormatOptions,
    ) -> HalResult<()>;

    /// mkfs.ext4 with the given volume label.
    fn format_ext4(&self, device: &Path, label: &str, opts: &FormatOptions) -> HalResult<()>;

    /// mkswap with the given volume label.
    fn format_swap(&self, device: &Path, label: &str, opts: &FormatOptions) -> HalResult<()>;
}
