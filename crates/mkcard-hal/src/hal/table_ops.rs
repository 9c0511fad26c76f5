//! Partition-table operations.
//!
//! Reading and replacing the on-disk table is delegated to parted; planning
//! geometry is not this crate's job. The types here are the wire-level view
//! the planner consumes and produces.

use crate::{HalError, HalResult};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Filesystem type tag carried by a partition entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilesystemKind {
    Fat16,
    Fat32,
    Ext4,
    LinuxSwap,
}

impl FilesystemKind {
    /// Canonical name as accepted by the partition tooling. On-disk tables
    /// may report a versioned variant of it (e.g. `linux-swap(v1)`).
    pub fn name(self) -> &'static str {
        match self {
            FilesystemKind::Fat16 => "fat16",
            FilesystemKind::Fat32 => "fat32",
            FilesystemKind::Ext4 => "ext4",
            FilesystemKind::LinuxSwap => "linux-swap",
        }
    }
}

impl fmt::Display for FilesystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FilesystemKind {
    type Err = HalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fat16" => Ok(FilesystemKind::Fat16),
            "fat32" => Ok(FilesystemKind::Fat32),
            "ext4" => Ok(FilesystemKind::Ext4),
            "linux-swap" => Ok(FilesystemKind::LinuxSwap),
            other => Err(HalError::Parse(format!(
                "unknown filesystem type: {other:?}"
            ))),
        }
    }
}

/// A partition read back from the on-disk table. Snapshot only; taken for
/// one verification pass and discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedPartition {
    /// 1-based partition number.
    pub number: u32,
    /// Type name as reported by the table, if any. Free-form; may be a
    /// versioned variant like `"linux-swap(v1)"`.
    pub fs_type: Option<String>,
    pub start_sector: u64,
    pub end_sector: u64,
    /// Mounted or otherwise in use.
    pub busy: bool,
}

/// One partition to commit when replacing the table. Sector values are
/// absolute and inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    pub fs: FilesystemKind,
    pub start_sector: u64,
    pub end_sector: u64,
}

#[derive(Debug, Clone)]
pub struct TableOptions {
    pub dry_run: bool,
    pub confirmed: bool,
}

impl TableOptions {
    pub fn new(dry_run: bool, confirmed: bool) -> Self {
        Self { dry_run, confirmed }
    }
}

pub trait TableOps {
    /// Read the current partition table, including per-partition busy state.
    ///
    /// A device with no recognisable label at all fails with
    /// `HalError::TableUninitialized`; callers treat that as "needs
    /// creation", not as a hard error.
    fn read_table(&self, disk: &Path) -> HalResult<Vec<ObservedPartition>>;

    /// Replace whatever is on the device with a fresh msdos table holding
    /// `entries`, in order.
    fn create_table(
        &self,
        disk: &Path,
        entries: &[TableEntry],
        opts: &TableOptions,
    ) -> HalResult<()>;

    /// Total addressable length of the device in logical sectors.
    fn device_length_sectors(&self, disk: &Path) -> HalResult<u64>;

    /// Logical sector size in bytes.
    fn sector_size_bytes(&self, disk: &Path) -> HalResult<u64>;
}
