//! Helpers related to block devices in sysfs.

use crate::{HalError, HalResult};
use std::fs;
use std::path::Path;

pub fn device_basename(path: &Path) -> HalResult<String> {
    let name = path
        .file_name()
        .ok_or_else(|| HalError::InvalidDevicePath(path.display().to_string()))?
        .to_string_lossy()
        .to_string();
    Ok(name)
}

/// Reads the block device size from `/sys/class/block/<dev>/size`.
///
/// The `size` file is expressed in 512-byte units regardless of the device's
/// logical sector size.
pub fn block_device_size_bytes(sys_block_dev_dir: &Path) -> HalResult<u64> {
    let units_str = fs::read_to_string(sys_block_dev_dir.join("size"))?;
    let units: u64 = units_str
        .trim()
        .parse()
        .map_err(|_| HalError::Parse(format!("bad sysfs size value: {}", units_str.trim())))?;
    Ok(units.saturating_mul(512))
}

/// Logical sector size from `queue/logical_block_size`, defaulting to 512
/// when the attribute is absent.
pub fn logical_block_size(sys_block_dev_dir: &Path) -> u64 {
    fs::read_to_string(sys_block_dev_dir.join("queue/logical_block_size"))
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(512)
}

/// Total addressable length of the device in logical sectors.
pub fn block_device_length_sectors(sys_block_dev_dir: &Path) -> HalResult<u64> {
    let bytes = block_device_size_bytes(sys_block_dev_dir)?;
    Ok(bytes / logical_block_size(sys_block_dev_dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn block_device_size_bytes_reads_units() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join("size"), "8\n").unwrap();
        assert_eq!(block_device_size_bytes(tmp.path()).unwrap(), 4096);
    }

    #[test]
    fn logical_block_size_defaults_to_512() {
        let tmp = tempdir().unwrap();
        assert_eq!(logical_block_size(tmp.path()), 512);
        fs::create_dir_all(tmp.path().join("queue")).unwrap();
        fs::write(tmp.path().join("queue/logical_block_size"), "4096\n").unwrap();
        assert_eq!(logical_block_size(tmp.path()), 4096);
    }

    #[test]
    fn length_sectors_uses_the_logical_size() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join("size"), "16\n").unwrap();
        fs::create_dir_all(tmp.path().join("queue")).unwrap();
        fs::write(tmp.path().join("queue/logical_block_size"), "4096\n").unwrap();
        assert_eq!(block_device_length_sectors(tmp.path()).unwrap(), 2);
    }

    #[test]
    fn device_basename_extracts_filename() {
        assert_eq!(device_basename(Path::new("/dev/sdc")).unwrap(), "sdc");
    }
}
