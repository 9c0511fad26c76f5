//! Linux HAL implementation using real system calls and tooling.

use super::{
    BlockCopyOps, CloneOptions, FormatOps, FormatOptions, MirrorOps, MirrorOptions, MountOps,
    MountOptions, ObservedPartition, RevisionOps, SystemOps, TableEntry, TableOps, TableOptions,
};
use crate::path::partition_path;
use crate::procfs::{mountinfo, swaps};
use crate::sysfs::block;
use crate::{HalError, HalResult};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

/// Real HAL implementation for Linux systems.
#[derive(Debug, Clone, Default)]
pub struct LinuxHal;

impl LinuxHal {
    pub fn new() -> Self {
        Self
    }
}

const SYNC_TIMEOUT: Duration = Duration::from_secs(60);
const FORMAT_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const PARTED_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const MIRROR_TIMEOUT: Duration = Duration::from_secs(6 * 60 * 60);
const GIT_TIMEOUT: Duration = Duration::from_secs(10);

fn map_command_err(program: &str, err: std::io::Error) -> HalError {
    if err.kind() == std::io::ErrorKind::NotFound {
        return HalError::CommandNotFound(program.to_string());
    }
    HalError::Io(err)
}

fn output_failed(program: &str, output: &Output) -> HalError {
    HalError::CommandFailed {
        program: program.to_string(),
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

fn output_with_timeout(program: &str, cmd: &mut Command, timeout: Duration) -> HalResult<Output> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(|e| map_command_err(program, e))?;

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();

    // Drain pipes concurrently to avoid deadlocks on large output.
    let stdout_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut out) = stdout.take() {
            let _ = out.read_to_end(&mut buf);
        }
        buf
    });
    let stderr_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut err) = stderr.take() {
            let _ = err.read_to_end(&mut buf);
        }
        buf
    });

    let status = match child.wait_timeout(timeout).map_err(HalError::Io)? {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            let _ = stdout_handle.join();
            let _ = stderr_handle.join();
            return Err(HalError::CommandTimeout {
                program: program.to_string(),
                timeout_secs: timeout.as_secs(),
            });
        }
    };

    let stdout = stdout_handle.join().unwrap_or_default();
    let stderr = stderr_handle.join().unwrap_or_default();
    Ok(Output {
        status,
        stdout,
        stderr,
    })
}

fn status_with_timeout(program: &str, cmd: &mut Command, timeout: Duration) -> HalResult<()> {
    let output = output_with_timeout(program, cmd, timeout)?;
    if !output.status.success() {
        return Err(output_failed(program, &output));
    }
    Ok(())
}

fn map_nix_err(err: nix::errno::Errno) -> HalError {
    use nix::errno::Errno;
    match err {
        Errno::EBUSY => HalError::DiskBusy,
        Errno::EACCES | Errno::EPERM => HalError::PermissionDenied,
        other => HalError::Nix(other),
    }
}

/// Parse the machine-readable output of `parted -sm <disk> unit s print`.
///
/// Partition lines look like `1:2048s:1050623s:1048576s:fat16::lba;`; the
/// leading `BYT;` marker and the device summary line are skipped. Busy state
/// is not parted's to report and is left false here.
fn parse_machine_table(output: &str) -> HalResult<Vec<ObservedPartition>> {
    let mut parts = Vec::new();
    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let line = line.strip_suffix(';').unwrap_or(line);
        let fields: Vec<&str> = line.split(':').collect();
        let number: u32 = match fields[0].parse() {
            Ok(n) => n,
            // "BYT" and the device summary line do not start with a number.
            Err(_) => continue,
        };
        if fields.len() < 5 {
            return Err(HalError::Parse(format!("malformed parted line: {line}")));
        }
        let fs_type = if fields[4].is_empty() {
            None
        } else {
            Some(fields[4].to_string())
        };
        parts.push(ObservedPartition {
            number,
            fs_type,
            start_sector: parse_sector_field(fields[1])?,
            end_sector: parse_sector_field(fields[2])?,
            busy: false,
        });
    }
    Ok(parts)
}

fn parse_sector_field(field: &str) -> HalResult<u64> {
    field
        .trim_end_matches('s')
        .parse()
        .map_err(|_| HalError::Parse(format!("bad sector value: {field}")))
}

fn sysfs_dir(disk: &Path) -> HalResult<PathBuf> {
    Ok(Path::new("/sys/class/block").join(block::device_basename(disk)?))
}

impl TableOps for LinuxHal {
    fn read_table(&self, disk: &Path) -> HalResult<Vec<ObservedPartition>> {
        let mut cmd = Command::new("parted");
        cmd.args(["-sm"]).arg(disk).args(["unit", "s", "print"]);
        let output = output_with_timeout("parted", &mut cmd, PARTED_TIMEOUT)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("unrecognised disk label") {
                return Err(HalError::TableUninitialized);
            }
            return Err(output_failed("parted", &output));
        }

        let mut parts = parse_machine_table(&String::from_utf8_lossy(&output.stdout))?;

        let mounts = fs::read_to_string("/proc/self/mountinfo").unwrap_or_default();
        let mount_entries = mountinfo::parse_mountinfo(&mounts);
        let swap_table = fs::read_to_string("/proc/swaps").unwrap_or_default();
        let disk_str = disk.display().to_string();
        for part in &mut parts {
            let node = partition_path(&disk_str, part.number)?;
            part.busy = mountinfo::is_source_mounted(&mount_entries, &node)
                || swaps::is_swap_active(&swap_table, &node);
        }
        Ok(parts)
    }

    fn create_table(
        &self,
        disk: &Path,
        entries: &[TableEntry],
        opts: &TableOptions,
    ) -> HalResult<()> {
        if opts.dry_run {
            log::info!(
                "DRY RUN: parted mklabel msdos + {} mkpart on {}",
                entries.len(),
                disk.display()
            );
            return Ok(());
        }
        if !opts.confirmed {
            return Err(HalError::SafetyLock);
        }

        // A fresh label discards whatever table was there.
        self.run_parted(disk, &["mklabel", "msdos"])?;

        for entry in entries {
            let start = format!("{}s", entry.start_sector);
            let end = format!("{}s", entry.end_sector);
            self.run_parted(
                disk,
                &["mkpart", "primary", entry.fs.name(), &start, &end],
            )?;
        }
        Ok(())
    }

    fn device_length_sectors(&self, disk: &Path) -> HalResult<u64> {
        block::block_device_length_sectors(&sysfs_dir(disk)?)
    }

    fn sector_size_bytes(&self, disk: &Path) -> HalResult<u64> {
        Ok(block::logical_block_size(&sysfs_dir(disk)?))
    }
}

impl LinuxHal {
    fn run_parted(&self, disk: &Path, op_args: &[&str]) -> HalResult<()> {
        let mut cmd = Command::new("parted");
        // Sector-exact geometry: alignment is the planner's responsibility,
        // parted must not nudge boundaries.
        cmd.args(["-s", "-a", "none"])
            .arg(disk)
            .args(["unit", "s"])
            .args(op_args);
        status_with_timeout("parted", &mut cmd, PARTED_TIMEOUT)
    }
}

impl FormatOps for LinuxHal {
    fn format_fat(
        &self,
        device: &Path,
        fat_size: u8,
        label: &str,
        opts: &FormatOptions,
    ) -> HalResult<()> {
        if opts.dry_run {
            log::info!("DRY RUN: mkfs.vfat -F {} {}", fat_size, device.display());
            return Ok(());
        }
        if !opts.confirmed {
            return Err(HalError::SafetyLock);
        }

        let mut cmd = Command::new("mkfs.vfat");
        cmd.args(["-F", &fat_size.to_string(), "-n", label])
            .arg(device);
        status_with_timeout("mkfs.vfat", &mut cmd, FORMAT_TIMEOUT)
    }

    fn format_ext4(&self, device: &Path, label: &str, opts: &FormatOptions) -> HalResult<()> {
        if opts.dry_run {
            log::info!("DRY RUN: mkfs.ext4 {}", device.display());
            return Ok(());
        }
        if !opts.confirmed {
            return Err(HalError::SafetyLock);
        }

        let mut cmd = Command::new("mkfs.ext4");
        cmd.args(["-q", "-L", label]).arg(device);
        status_with_timeout("mkfs.ext4", &mut cmd, FORMAT_TIMEOUT)
    }

    fn format_swap(&self, device: &Path, label: &str, opts: &FormatOptions) -> HalResult<()> {
        if opts.dry_run {
            log::info!("DRY RUN: mkswap {}", device.display());
            return Ok(());
        }
        if !opts.confirmed {
            return Err(HalError::SafetyLock);
        }

        let mut cmd = Command::new("mkswap");
        cmd.args(["-L", label]).arg(device);
        status_with_timeout("mkswap", &mut cmd, FORMAT_TIMEOUT)
    }
}

impl MountOps for LinuxHal {
    fn mount_device(
        &self,
        device: &Path,
        target: &Path,
        fstype: Option<&str>,
        options: MountOptions,
        dry_run: bool,
    ) -> HalResult<()> {
        if dry_run {
            log::info!(
                "DRY RUN: mount {} -> {}",
                device.display(),
                target.display()
            );
            return Ok(());
        }

        let flags = nix::mount::MsFlags::empty();
        let data = options.options.as_deref();
        nix::mount::mount(Some(device), target, fstype, flags, data).map_err(map_nix_err)?;
        Ok(())
    }

    fn unmount(&self, target: &Path, dry_run: bool) -> HalResult<()> {
        if dry_run {
            log::info!("DRY RUN: unmount {}", target.display());
            return Ok(());
        }

        nix::mount::umount2(target, nix::mount::MntFlags::empty()).map_err(map_nix_err)?;
        Ok(())
    }

    fn is_mounted(&self, path: &Path) -> HalResult<bool> {
        let content = fs::read_to_string("/proc/self/mountinfo")?;
        let entries = mountinfo::parse_mountinfo(&content);
        Ok(mountinfo::is_mount_point(&entries, path))
    }
}

impl MirrorOps for LinuxHal {
    fn mirror_tree(
        &self,
        src: &Path,
        dst: &Path,
        opts: &MirrorOptions,
        dry_run: bool,
    ) -> HalResult<()> {
        if dry_run {
            log::info!(
                "DRY RUN: rsync {} -> {}",
                src.display(),
                dst.display()
            );
            return Ok(());
        }

        let mut args: Vec<String> = Vec::new();
        if opts.archive {
            args.push("-a".to_string());
        }
        if opts.compress {
            args.push("-z".to_string());
        }
        if opts.delete_delay {
            args.push("--delete-delay".to_string());
        }
        if opts.delete_excluded {
            args.push("--delete-excluded".to_string());
        }
        if let Some(file) = &opts.exclude_from {
            args.push(format!("--exclude-from={}", file.display()));
        }
        args.extend(opts.extra_args.iter().cloned());

        // Trailing slash on src: copy contents, not the directory itself.
        args.push(format!("{}/", src.display()));
        args.push(dst.display().to_string());

        let mut cmd = Command::new("rsync");
        cmd.args(&args);
        status_with_timeout("rsync", &mut cmd, MIRROR_TIMEOUT)
    }
}

impl BlockCopyOps for LinuxHal {
    fn clone_image(&self, image: &Path, target: &Path, opts: &CloneOptions) -> HalResult<()> {
        if opts.dry_run {
            log::info!(
                "DRY RUN: clone {} -> {}",
                image.display(),
                target.display()
            );
            return Ok(());
        }
        if !opts.confirmed {
            return Err(HalError::SafetyLock);
        }

        let dest_bytes = destination_capacity_bytes(target)?;
        let metadata = fs::metadata(image)?;
        let is_xz = image.extension().is_some_and(|e| e == "xz");

        if !is_xz && metadata.len() > dest_bytes {
            return Err(HalError::SizeMismatch {
                source_bytes: metadata.len(),
                dest_bytes,
            });
        }

        let input = fs::File::open(image)?;
        let reader: Box<dyn Read> = if is_xz {
            Box::new(xz2::read::XzDecoder::new(input))
        } else {
            Box::new(input)
        };

        let mut out = fs::OpenOptions::new().write(true).open(target)?;
        let written = copy_capped(reader, &mut out, dest_bytes)?;
        if written > dest_bytes {
            return Err(HalError::SizeMismatch {
                source_bytes: written,
                dest_bytes,
            });
        }

        // Best-effort flush (block devices may ignore).
        out.sync_all().ok();
        Ok(())
    }
}

/// Copy at most `cap + 1` bytes so an oversized decompressed stream is
/// detected without running to the end of the device.
fn copy_capped(mut reader: Box<dyn Read>, out: &mut fs::File, cap: u64) -> HalResult<u64> {
    let mut written: u64 = 0;
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).map_err(HalError::Io)?;
        if n == 0 {
            return Ok(written);
        }
        written += n as u64;
        if written > cap {
            return Ok(written);
        }
        out.write_all(&buf[..n]).map_err(HalError::Io)?;
    }
}

fn destination_capacity_bytes(target: &Path) -> HalResult<u64> {
    let metadata = fs::metadata(target)?;
    if metadata.len() > 0 {
        return Ok(metadata.len());
    }
    // Block devices report zero length through metadata; sysfs knows.
    block::block_device_size_bytes(&sysfs_dir(target)?)
}

impl SystemOps for LinuxHal {
    fn sync(&self) -> HalResult<()> {
        let mut cmd = Command::new("sync");
        status_with_timeout("sync", &mut cmd, SYNC_TIMEOUT)
    }

    fn udev_settle(&self) -> HalResult<()> {
        let mut cmd = Command::new("udevadm");
        cmd.arg("settle");
        status_with_timeout("udevadm", &mut cmd, SYNC_TIMEOUT)
    }
}

impl RevisionOps for LinuxHal {
    fn describe_tree(&self, tree: &Path) -> HalResult<Option<String>> {
        let mut cmd = Command::new("git");
        cmd.arg("-C")
            .arg(tree)
            .args(["describe", "--always", "--dirty", "--tags"]);
        match output_with_timeout("git", &mut cmd, GIT_TIMEOUT) {
            Ok(output) if output.status.success() => {
                let rev = String::from_utf8_lossy(&output.stdout).trim().to_string();
                Ok(if rev.is_empty() { None } else { Some(rev) })
            }
            // Not a repository, or no git on the host: no revision to report.
            Ok(_) => Ok(None),
            Err(HalError::CommandNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FilesystemKind;
    use tempfile::tempdir;

    const MACHINE_OUTPUT: &str = "BYT;\n\
        /dev/sdc:15523840s:scsi:512:512:msdos:Mass Storage Device:;\n\
        1:2048s:1050623s:1048576s:fat16::lba;\n\
        2:1050624s:14362623s:13312000s:ext4::;\n\
        3:14362624s:15523839s:1161216s:linux-swap(v1)::;\n";

    #[test]
    fn parse_machine_table_reads_partitions() {
        let parts = parse_machine_table(MACHINE_OUTPUT).unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].number, 1);
        assert_eq!(parts[0].start_sector, 2048);
        assert_eq!(parts[0].end_sector, 1_050_623);
        assert_eq!(parts[0].fs_type.as_deref(), Some("fat16"));
        assert_eq!(parts[2].fs_type.as_deref(), Some("linux-swap(v1)"));
        assert!(parts.iter().all(|p| !p.busy));
    }

    #[test]
    fn parse_machine_table_keeps_unformatted_partitions() {
        let out = "BYT;\n/dev/sdc:100s:scsi:512:512:msdos::;\n1:10s:20s:11s:::;\n";
        let parts = parse_machine_table(out).unwrap();
        assert_eq!(parts[0].fs_type, None);
    }

    #[test]
    fn parse_machine_table_rejects_garbage_sectors() {
        let out = "1:what:20s:11s:ext4::;\n";
        assert!(matches!(
            parse_machine_table(out),
            Err(HalError::Parse(_))
        ));
    }

    #[test]
    fn create_table_requires_confirmation() {
        let hal = LinuxHal::new();
        let entries = [TableEntry {
            fs: FilesystemKind::Ext4,
            start_sector: 2048,
            end_sector: 4095,
        }];
        let err = hal
            .create_table(
                Path::new("/dev/null"),
                &entries,
                &TableOptions::new(false, false),
            )
            .unwrap_err();
        assert!(matches!(err, HalError::SafetyLock));
    }

    #[test]
    fn format_ext4_requires_confirmation() {
        let hal = LinuxHal::new();
        let err = hal
            .format_ext4(
                Path::new("/dev/null"),
                "os",
                &FormatOptions::new(false, false),
            )
            .unwrap_err();
        assert!(matches!(err, HalError::SafetyLock));
    }

    #[test]
    fn clone_image_writes_raw_file() {
        let dir = tempdir().unwrap();
        let image = dir.path().join("boot.img");
        let target = dir.path().join("target.img");
        fs::write(&image, b"bootstrap code").unwrap();
        fs::write(&target, vec![0u8; 64]).unwrap();

        let hal = LinuxHal::new();
        hal.clone_image(&image, &target, &CloneOptions::new(false, true))
            .unwrap();

        let result = fs::read(&target).unwrap();
        assert_eq!(&result[..14], b"bootstrap code");
    }

    #[test]
    fn clone_image_decompresses_xz() {
        let dir = tempdir().unwrap();
        let image = dir.path().join("boot.img.xz");
        let target = dir.path().join("target.img");

        let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
        encoder.write_all(b"compressed bootstrap").unwrap();
        fs::write(&image, encoder.finish().unwrap()).unwrap();
        fs::write(&target, vec![0u8; 64]).unwrap();

        let hal = LinuxHal::new();
        hal.clone_image(&image, &target, &CloneOptions::new(false, true))
            .unwrap();

        let result = fs::read(&target).unwrap();
        assert_eq!(&result[..20], b"compressed bootstrap");
    }

    #[test]
    fn clone_image_refuses_oversized_source() {
        let dir = tempdir().unwrap();
        let image = dir.path().join("big.img");
        let target = dir.path().join("small.img");
        fs::write(&image, vec![0xAAu8; 128]).unwrap();
        fs::write(&target, vec![0u8; 16]).unwrap();

        let hal = LinuxHal::new();
        let err = hal
            .clone_image(&image, &target, &CloneOptions::new(false, true))
            .unwrap_err();
        assert!(matches!(err, HalError::SizeMismatch { .. }));
        // Nothing was written.
        assert_eq!(fs::read(&target).unwrap(), vec![0u8; 16]);
    }
}
