//! Provisioning configuration.
//!
//! One explicit record holds everything a run needs: the target device, the
//! tree locations, the declared partition layout and the kernel-parameter
//! profiles. The record is built from defaults, optionally a TOML file, and
//! finally the command line.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::bootparams::KernelParamSet;
use crate::cli::Cli;
use crate::planner::{mib_to_sectors, PartitionSpec};
use mkcard_hal::FilesystemKind;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProvisionConfig {
    /// Target block device.
    pub device: String,
    /// Firmware tree mirrored onto the boot partition.
    pub firmware_dir: PathBuf,
    /// OS tree mirrored onto the root partition.
    pub os_dir: PathBuf,
    /// Work directory that receives the boot/root mount points.
    pub work_dir: PathBuf,
    /// rsync exclusion-rule file applied to both tree mirrors.
    pub exclude_file: Option<PathBuf>,
    /// Card-variant fstab installed into the target root after sync.
    pub fstab_file: Option<PathBuf>,
    pub layout: LayoutConfig,
    pub kcmd: KcmdConfig,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            device: "/dev/sdc".to_string(),
            firmware_dir: PathBuf::from("firmware-binaries"),
            os_dir: PathBuf::from("os"),
            work_dir: PathBuf::from("/tmp/mkcard"),
            exclude_file: None,
            fstab_file: None,
            layout: LayoutConfig::default(),
            kcmd: KcmdConfig::default(),
        }
    }
}

impl ProvisionConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Command-line flags override the file/default values.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(device) = &cli.device {
            self.device = device.clone();
        }
        if let Some(dir) = &cli.firmware_dir {
            self.firmware_dir = dir.clone();
        }
        if let Some(dir) = &cli.os_dir {
            self.os_dir = dir.clone();
        }
    }

    pub fn boot_mount(&self) -> PathBuf {
        self.work_dir.join("boot")
    }

    pub fn root_mount(&self) -> PathBuf {
        self.work_dir.join("root")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LayoutConfig {
    /// Sectors reserved ahead of the first partition for the MBR and
    /// alignment.
    pub reserved_start_sectors: u64,
    pub partitions: Vec<PartitionConfig>,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            reserved_start_sectors: 2048,
            partitions: vec![
                PartitionConfig {
                    fs: "fat16".to_string(),
                    label: "BOOT".to_string(),
                    size_mib: Some(512),
                    start_sector: None,
                    end_sector: None,
                },
                PartitionConfig {
                    fs: "ext4".to_string(),
                    label: "os".to_string(),
                    size_mib: None,
                    start_sector: None,
                    end_sector: None,
                },
                PartitionConfig {
                    fs: "linux-swap".to_string(),
                    label: "lplswap".to_string(),
                    size_mib: Some(512),
                    start_sector: None,
                    end_sector: None,
                },
            ],
        }
    }
}

impl LayoutConfig {
    pub fn to_specs(&self, sector_size_bytes: u64) -> Result<Vec<PartitionSpec>> {
        self.partitions
            .iter()
            .map(|p| p.to_spec(sector_size_bytes))
            .collect()
    }
}

/// One declarative partition record.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartitionConfig {
    /// Filesystem type tag: fat16, fat32, ext4 or linux-swap.
    pub fs: String,
    /// Filesystem label applied when formatting.
    pub label: String,
    /// Fixed size in MiB. Omit together with the sector fields to fill the
    /// remainder of the device.
    #[serde(default)]
    pub size_mib: Option<u64>,
    /// Pinned absolute sector range (both fields required when either is
    /// given).
    #[serde(default)]
    pub start_sector: Option<u64>,
    #[serde(default)]
    pub end_sector: Option<u64>,
}

impl PartitionConfig {
    pub fn filesystem(&self) -> Result<FilesystemKind> {
        self.fs
            .parse::<FilesystemKind>()
            .map_err(anyhow::Error::new)
            .with_context(|| format!("partition {:?}", self.label))
    }

    pub fn to_spec(&self, sector_size_bytes: u64) -> Result<PartitionSpec> {
        let fs = self.filesystem()?;
        match (self.size_mib, self.start_sector, self.end_sector) {
            (Some(mib), None, None) => {
                Ok(PartitionSpec::sized(fs, mib_to_sectors(mib, sector_size_bytes)))
            }
            (None, Some(start), Some(end)) => Ok(PartitionSpec::pinned(fs, start, end)),
            (None, None, None) => Ok(PartitionSpec::remainder(fs)),
            _ => bail!(
                "partition {:?}: give size_mib, start_sector/end_sector, or neither",
                self.label
            ),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KcmdConfig {
    /// Base profile, one token per entry, order significant.
    pub default: Vec<String>,
    /// Overrides merged over the base for the NFS-boot profile.
    pub nfs: Vec<String>,
}

impl Default for KcmdConfig {
    fn default() -> Self {
        Self {
            default: [
                "mem=128M",
                "ip=dhcp",
                "noinitrd",
                "init=/sbin/init",
                "rw",
                "root=/dev/mmcblk0p2",
                "elevator=noop",
            ]
            .map(String::from)
            .to_vec(),
            nfs: [
                "root=/dev/nfs",
                "nfsroot=10.42.0.1:/srv/os",
                "nfsrootdebug",
                "rootwait",
                "rootfstype=nfs",
            ]
            .map(String::from)
            .to_vec(),
        }
    }
}

impl KcmdConfig {
    pub fn default_set(&self) -> KernelParamSet {
        KernelParamSet::from_tokens(&self.default)
    }

    pub fn nfs_overrides(&self) -> KernelParamSet {
        KernelParamSet::from_tokens(&self.nfs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::Extent;

    #[test]
    fn default_layout_is_boot_root_swap() {
        let specs = LayoutConfig::default().to_specs(512).unwrap();
        assert_eq!(specs.len(), 3);
        assert_eq!(specs[0].fs, FilesystemKind::Fat16);
        assert_eq!(specs[0].extent, Extent::Sectors(1_048_576));
        assert_eq!(specs[1].extent, Extent::Remainder);
        assert_eq!(specs[2].fs, FilesystemKind::LinuxSwap);
    }

    #[test]
    fn config_parses_from_toml() {
        let text = r#"
            device = "/dev/sdb"
            firmware_dir = "/srv/firmware"
            os_dir = "/srv/os"

            [layout]
            reserved_start_sectors = 2048

            [[layout.partitions]]
            fs = "fat32"
            label = "BOOT"
            size_mib = 256

            [[layout.partitions]]
            fs = "ext4"
            label = "os"

            [kcmd]
            default = ["mem=64M", "rw"]
            nfs = ["root=/dev/nfs"]
        "#;
        let config: ProvisionConfig = toml::from_str(text).unwrap();
        assert_eq!(config.device, "/dev/sdb");
        assert_eq!(config.layout.partitions.len(), 2);
        assert_eq!(config.kcmd.default_set().render(), "mem=64M rw");
    }

    #[test]
    fn pinned_partitions_need_both_sector_fields() {
        let partial = PartitionConfig {
            fs: "ext4".to_string(),
            label: "os".to_string(),
            size_mib: None,
            start_sector: Some(2048),
            end_sector: None,
        };
        assert!(partial.to_spec(512).is_err());
    }

    #[test]
    fn unknown_filesystems_are_rejected() {
        let bad = PartitionConfig {
            fs: "btrfs".to_string(),
            label: "os".to_string(),
            size_mib: Some(10),
            start_sector: None,
            end_sector: None,
        };
        assert!(bad.to_spec(512).is_err());
    }

    #[test]
    fn default_profiles_render_for_both_boot_modes() {
        let kcmd = KcmdConfig::default();
        assert_eq!(
            kcmd.default_set().render(),
            "mem=128M ip=dhcp init=/sbin/init root=/dev/mmcblk0p2 elevator=noop noinitrd rw"
        );
        let nfs = kcmd.default_set().overlay(&kcmd.nfs_overrides());
        let line = nfs.render();
        assert!(line.contains("root=/dev/nfs"));
        assert!(line.contains("rootfstype=nfs"));
        assert!(line.ends_with("rootwait"));
    }
}
