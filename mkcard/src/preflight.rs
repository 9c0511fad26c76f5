//! Run preconditions.
//!
//! Rewriting a partition table needs root and a handful of external tools;
//! both are checked up front so a run never dies halfway through with the
//! card in an indeterminate state it did not have to be in.

use anyhow::{Context, Result};
use log::info;
use std::env;
use std::fs;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::cli::StepSelection;
use crate::errors::ProvisionError;

#[derive(Debug, Clone)]
pub struct PreflightConfig {
    /// Target device checked to be a block device, when given.
    pub target_device: Option<PathBuf>,
    pub required_binaries: Vec<String>,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            target_device: None,
            required_binaries: ["parted", "mkfs.vfat", "mkfs.ext4", "mkswap", "rsync", "udevadm"]
                .map(String::from)
                .to_vec(),
        }
    }
}

impl PreflightConfig {
    /// Only require the tools the selected steps will actually invoke.
    pub fn for_steps(steps: &StepSelection, target_device: Option<PathBuf>) -> Self {
        let mut required = Vec::new();
        if steps.create_partitions {
            required.push("parted".to_string());
            required.push("udevadm".to_string());
        }
        if steps.format_boot {
            required.push("mkfs.vfat".to_string());
        }
        if steps.format_os {
            required.push("mkfs.ext4".to_string());
        }
        if steps.format_swap {
            required.push("mkswap".to_string());
        }
        if steps.sync_firmware || steps.sync_os {
            required.push("rsync".to_string());
        }
        Self {
            target_device,
            required_binaries: required,
        }
    }
}

pub fn run(cfg: &PreflightConfig) -> Result<()> {
    info!("Preflight checks");

    ensure_root()?;
    for binary in &cfg.required_binaries {
        if find_on_path(binary).is_none() {
            return Err(ProvisionError::MissingBinary(binary.clone()).into());
        }
    }
    if let Some(device) = &cfg.target_device {
        check_block_device(device)?;
    }

    info!("Preflight complete");
    Ok(())
}

/// The whole pipeline runs under an elevated identity; refusing early beats
/// failing after the table is half-written.
pub fn ensure_root() -> Result<()> {
    if !nix::unistd::Uid::effective().is_root() {
        return Err(ProvisionError::NotRoot.into());
    }
    Ok(())
}

pub fn find_on_path(binary: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(binary))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn check_block_device(device: &Path) -> Result<()> {
    let metadata = fs::metadata(device)
        .with_context(|| format!("target device {} not accessible", device.display()))?;
    if !metadata.file_type().is_block_device() {
        return Err(ProvisionError::NotABlockDevice(device.to_path_buf()).into());
    }
    Ok(())
}
