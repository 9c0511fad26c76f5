//! Fake HAL implementation for testing.
//!
//! Records every operation without executing it, so pipelines can be tested
//! in CI without root privileges or real hardware. The observed partition
//! table, device length and tree revisions are scriptable per test.

use super::{
    BlockCopyOps, CloneOptions, FormatOps, FormatOptions, MirrorOps, MirrorOptions, MountOps,
    MountOptions, ObservedPartition, RevisionOps, SystemOps, TableEntry, TableOps, TableOptions,
};
use crate::{HalError, HalResult};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Operation records for testing and verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    ReadTable {
        disk: PathBuf,
    },
    CreateTable {
        disk: PathBuf,
        entries: Vec<TableEntry>,
    },
    FormatFat {
        device: PathBuf,
        fat_size: u8,
        label: String,
    },
    FormatExt4 {
        device: PathBuf,
        label: String,
    },
    FormatSwap {
        device: PathBuf,
        label: String,
    },
    Mount {
        device: PathBuf,
        target: PathBuf,
        fstype: Option<String>,
    },
    Unmount {
        target: PathBuf,
    },
    Mirror {
        src: PathBuf,
        dst: PathBuf,
    },
    CloneImage {
        image: PathBuf,
        target: PathBuf,
    },
    Sync,
    UdevSettle,
    DescribeTree {
        tree: PathBuf,
    },
}

#[derive(Debug, Default)]
struct FakeHalState {
    operations: Vec<Operation>,
    mounted_paths: HashSet<PathBuf>,
    /// What `read_table` reports; `None` means no table at all.
    observed_table: Option<Vec<ObservedPartition>>,
    device_length_sectors: u64,
    sector_size_bytes: u64,
    revisions: HashMap<PathBuf, String>,
}

/// Fake HAL implementation that records operations without executing them.
#[derive(Debug, Clone)]
pub struct FakeHal {
    state: Arc<Mutex<FakeHalState>>,
}

impl Default for FakeHal {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeHal {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeHalState {
                device_length_sectors: 15_523_840,
                sector_size_bytes: 512,
                ..Default::default()
            })),
        }
    }

    /// Get all recorded operations.
    pub fn operations(&self) -> Vec<Operation> {
        self.state.lock().unwrap().operations.clone()
    }

    /// Check if a specific operation was recorded.
    pub fn has_operation(&self, check: impl Fn(&Operation) -> bool) -> bool {
        self.state.lock().unwrap().operations.iter().any(check)
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.operations.clear();
        state.mounted_paths.clear();
    }

    /// Script what `read_table` reports.
    pub fn set_observed_table(&self, parts: Vec<ObservedPartition>) {
        self.state.lock().unwrap().observed_table = Some(parts);
    }

    /// Make `read_table` fail with `TableUninitialized`.
    pub fn set_table_uninitialized(&self) {
        self.state.lock().unwrap().observed_table = None;
    }

    pub fn set_device_length_sectors(&self, sectors: u64) {
        self.state.lock().unwrap().device_length_sectors = sectors;
    }

    pub fn set_revision(&self, tree: &Path, revision: &str) {
        self.state
            .lock()
            .unwrap()
            .revisions
            .insert(tree.to_path_buf(), revision.to_string());
    }

    fn record(&self, op: Operation) {
        self.state.lock().unwrap().operations.push(op);
    }
}

impl TableOps for FakeHal {
    fn read_table(&self, disk: &Path) -> HalResult<Vec<ObservedPartition>> {
        self.record(Operation::ReadTable {
            disk: disk.to_path_buf(),
        });
        let state = self.state.lock().unwrap();
        match &state.observed_table {
            Some(parts) => Ok(parts.clone()),
            None => Err(HalError::TableUninitialized),
        }
    }

    fn create_table(
        &self,
        disk: &Path,
        entries: &[TableEntry],
        opts: &TableOptions,
    ) -> HalResult<()> {
        if opts.dry_run {
            log::info!("FAKE HAL DRY RUN: create table on {}", disk.display());
            return Ok(());
        }
        if !opts.confirmed {
            return Err(HalError::SafetyLock);
        }
        self.record(Operation::CreateTable {
            disk: disk.to_path_buf(),
            entries: entries.to_vec(),
        });
        // The new table is what a re-read observes.
        let observed = entries
            .iter()
            .enumerate()
            .map(|(i, e)| ObservedPartition {
                number: (i + 1) as u32,
                fs_type: Some(e.fs.name().to_string()),
                start_sector: e.start_sector,
                end_sector: e.end_sector,
                busy: false,
            })
            .collect();
        self.state.lock().unwrap().observed_table = Some(observed);
        Ok(())
    }

    fn device_length_sectors(&self, _disk: &Path) -> HalResult<u64> {
        Ok(self.state.lock().unwrap().device_length_sectors)
    }

    fn sector_size_bytes(&self, _disk: &Path) -> HalResult<u64> {
        Ok(self.state.lock().unwrap().sector_size_bytes)
    }
}

impl FormatOps for FakeHal {
    fn format_fat(
        &self,
        device: &Path,
        fat_size: u8,
        label: &str,
        opts: &FormatOptions,
    ) -> HalResult<()> {
        if opts.dry_run {
            log::info!("FAKE HAL DRY RUN: mkfs.vfat {}", device.display());
            return Ok(());
        }
        if !opts.confirmed {
            return Err(HalError::SafetyLock);
        }
        self.record(Operation::FormatFat {
            device: device.to_path_buf(),
            fat_size,
            label: label.to_string(),
        });
        Ok(())
    }

    fn format_ext4(&self, device: &Path, label: &str, opts: &FormatOptions) -> HalResult<()> {
        if opts.dry_run {
            log::info!("FAKE HAL DRY RUN: mkfs.ext4 {}", device.display());
            return Ok(());
        }
        if !opts.confirmed {
            return Err(HalError::SafetyLock);
        }
        self.record(Operation::FormatExt4 {
            device: device.to_path_buf(),
            label: label.to_string(),
        });
        Ok(())
    }

    fn format_swap(&self, device: &Path, label: &str, opts: &FormatOptions) -> HalResult<()> {
        if opts.dry_run {
            log::info!("FAKE HAL DRY RUN: mkswap {}", device.display());
            return Ok(());
        }
        if !opts.confirmed {
            return Err(HalError::SafetyLock);
        }
        self.record(Operation::FormatSwap {
            device: device.to_path_buf(),
            label: label.to_string(),
        });
        Ok(())
    }
}

impl MountOps for FakeHal {
    fn mount_device(
        &self,
        device: &Path,
        target: &Path,
        fstype: Option<&str>,
        _options: MountOptions,
        dry_run: bool,
    ) -> HalResult<()> {
        if dry_run {
            log::info!(
                "FAKE HAL DRY RUN: mount {} -> {}",
                device.display(),
                target.display()
            );
            return Ok(());
        }
        self.record(Operation::Mount {
            device: device.to_path_buf(),
            target: target.to_path_buf(),
            fstype: fstype.map(str::to_string),
        });
        self.state
            .lock()
            .unwrap()
            .mounted_paths
            .insert(target.to_path_buf());
        Ok(())
    }

    fn unmount(&self, target: &Path, dry_run: bool) -> HalResult<()> {
        if dry_run {
            log::info!("FAKE HAL DRY RUN: unmount {}", target.display());
            return Ok(());
        }
        self.record(Operation::Unmount {
            target: target.to_path_buf(),
        });
        self.state.lock().unwrap().mounted_paths.remove(target);
        Ok(())
    }

    fn is_mounted(&self, path: &Path) -> HalResult<bool> {
        Ok(self.state.lock().unwrap().mounted_paths.contains(path))
    }
}

impl MirrorOps for FakeHal {
    fn mirror_tree(
        &self,
        src: &Path,
        dst: &Path,
        _opts: &MirrorOptions,
        dry_run: bool,
    ) -> HalResult<()> {
        if dry_run {
            log::info!(
                "FAKE HAL DRY RUN: rsync {} -> {}",
                src.display(),
                dst.display()
            );
            return Ok(());
        }
        self.record(Operation::Mirror {
            src: src.to_path_buf(),
            dst: dst.to_path_buf(),
        });
        Ok(())
    }
}

impl BlockCopyOps for FakeHal {
    fn clone_image(&self, image: &Path, target: &Path, opts: &CloneOptions) -> HalResult<()> {
        if opts.dry_run {
            log::info!(
                "FAKE HAL DRY RUN: clone {} -> {}",
                image.display(),
                target.display()
            );
            return Ok(());
        }
        if !opts.confirmed {
            return Err(HalError::SafetyLock);
        }
        self.record(Operation::CloneImage {
            image: image.to_path_buf(),
            target: target.to_path_buf(),
        });
        Ok(())
    }
}

impl SystemOps for FakeHal {
    fn sync(&self) -> HalResult<()> {
        self.record(Operation::Sync);
        Ok(())
    }

    fn udev_settle(&self) -> HalResult<()> {
        self.record(Operation::UdevSettle);
        Ok(())
    }
}

impl RevisionOps for FakeHal {
    fn describe_tree(&self, tree: &Path) -> HalResult<Option<String>> {
        self.record(Operation::DescribeTree {
            tree: tree.to_path_buf(),
        });
        Ok(self.state.lock().unwrap().revisions.get(tree).cloned())
    }
}
