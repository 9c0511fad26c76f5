//! The provisioning pipeline.
//!
//! Reconcile the partition table, format, mount, mirror the firmware and OS
//! trees, write the kernel command-line files, tear down. Every device
//! operation goes through the HAL so the whole sequence can run against the
//! fake in tests.

use anyhow::{bail, Context, Result};
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::bootparams::render_cmdline;
use crate::cli::{MatchPolicy, StepSelection};
use crate::config::{PartitionConfig, ProvisionConfig};
use crate::errors::ProvisionError;
use crate::planner::{self, ResolvedPartition};
use crate::report::ProvisionReport;
use mkcard_hal::{
    path::partition_path, FilesystemKind, FormatOptions, HalError, MirrorOptions, MountOptions,
    ProvisionHal, TableEntry, TableOptions,
};

pub const KCMD_DEFAULT_FILE: &str = "kcmd_default.txt";
pub const KCMD_NFS_FILE: &str = "kcmd_nfs.txt";
pub const KCMD_FILE: &str = "kcmd.txt";
pub const KCMD_BACKUP_FILE: &str = "kcmd.txt.bak";

pub struct ProvisionContext {
    pub hal: Arc<dyn ProvisionHal>,
    pub config: ProvisionConfig,
    pub policy: MatchPolicy,
    pub dry_run: bool,
    pub confirmed: bool,
}

impl ProvisionContext {
    fn device(&self) -> &Path {
        Path::new(&self.config.device)
    }

    /// Partition node path for a 1-based partition number.
    fn partition_node(&self, number: u32) -> Result<PathBuf> {
        Ok(PathBuf::from(partition_path(&self.config.device, number)?))
    }
}

pub fn run(ctx: &ProvisionContext, steps: &StepSelection) -> Result<ProvisionReport> {
    info!("Provisioning {} (policy: {})", ctx.config.device, ctx.policy);
    if ctx.dry_run {
        info!("DRY-RUN MODE - no changes will be made");
    } else if steps.destructive() && !ctx.confirmed {
        return Err(ProvisionError::MissingConfirmation(ctx.config.device.clone()).into());
    }

    let mut report = ProvisionReport::new(&ctx.config.device, ctx.dry_run);
    let result = run_steps(ctx, steps, &mut report);
    teardown(ctx);

    match report.write() {
        Ok(path) => info!("Report written to {}", path.display()),
        Err(e) => warn!("Could not write report: {e:#}"),
    }

    result.map(|()| report)
}

fn run_steps(
    ctx: &ProvisionContext,
    steps: &StepSelection,
    report: &mut ProvisionReport,
) -> Result<()> {
    if steps.create_partitions {
        reconcile_partitions(ctx, report)?;
        report.record_step("create-partitions", "done");
    }
    if steps.format_boot {
        format_boot(ctx)?;
        report.record_step("format-boot", "done");
    }
    if steps.format_os {
        format_os(ctx)?;
        report.record_step("format-os", "done");
    }
    if steps.format_swap {
        format_swap(ctx)?;
        report.record_step("format-swap", "done");
    }
    if steps.mount {
        mount_partitions(ctx)?;
        report.record_step("mount", "done");
    }
    if steps.sync_firmware {
        sync_firmware(ctx, report)?;
        report.record_step("sync-firmware", "done");
    }
    if steps.sync_os {
        sync_os(ctx, report)?;
        report.record_step("sync-os", "done");
    }
    if steps.write_boot_params {
        write_boot_params(ctx)?;
        report.record_step("write-boot-params", "done");
    }
    Ok(())
}

/// Read the observed table and decide whether it already satisfies the
/// declared layout; if not, compute concrete geometry and replace it.
fn reconcile_partitions(ctx: &ProvisionContext, report: &mut ProvisionReport) -> Result<()> {
    let device = ctx.device();
    let sector_size = ctx.hal.sector_size_bytes(device)?;
    let specs = ctx.config.layout.to_specs(sector_size)?;

    let observed = match ctx.hal.read_table(device) {
        Ok(parts) => parts,
        Err(HalError::TableUninitialized) => {
            info!("{} has no partition table; creating one", device.display());
            Vec::new()
        }
        Err(e) => {
            return Err(anyhow::Error::new(e))
                .with_context(|| format!("failed to read table on {}", device.display()))
        }
    };

    // A busy partition aborts here; operator intervention required.
    if planner::verify(&specs, &observed, ctx.policy)? {
        info!("Partition table already matches the declared layout");
        return Ok(());
    }

    let length = ctx.hal.device_length_sectors(device)?;
    let resolved = planner::plan(length, &specs, ctx.config.layout.reserved_start_sectors)?;
    for part in &resolved {
        info!(
            "  p{}: {} sectors {}..{} ({} MiB)",
            part.number,
            part.fs,
            part.start_sector,
            part.end_sector,
            part.len_sectors() * sector_size / (1024 * 1024)
        );
    }

    let entries: Vec<TableEntry> = resolved.iter().map(ResolvedPartition::table_entry).collect();
    ctx.hal
        .create_table(device, &entries, &TableOptions::new(ctx.dry_run, ctx.confirmed))
        .with_context(|| format!("failed to write table on {}", device.display()))?;
    if !ctx.dry_run {
        // Give the kernel a moment to pick up the new partition nodes.
        let _ = ctx.hal.udev_settle();
    }

    report.record_layout(&resolved);
    Ok(())
}

fn partition_with(
    config: &ProvisionConfig,
    pred: impl Fn(FilesystemKind) -> bool,
) -> Result<(u32, PartitionConfig)> {
    for (i, part) in config.layout.partitions.iter().enumerate() {
        if pred(part.filesystem()?) {
            return Ok(((i + 1) as u32, part.clone()));
        }
    }
    bail!("the declared layout has no matching partition");
}

fn format_boot(ctx: &ProvisionContext) -> Result<()> {
    let (number, part) = partition_with(&ctx.config, |fs| {
        matches!(fs, FilesystemKind::Fat16 | FilesystemKind::Fat32)
    })
    .context("cannot format boot partition")?;
    let node = ctx.partition_node(number)?;
    let fat_size = match part.filesystem()? {
        FilesystemKind::Fat32 => 32,
        _ => 16,
    };
    info!("Formatting boot partition {} (FAT{})", node.display(), fat_size);
    ctx.hal
        .format_fat(
            &node,
            fat_size,
            &part.label,
            &FormatOptions::new(ctx.dry_run, ctx.confirmed),
        )
        .context("mkfs.vfat failed")?;
    Ok(())
}

fn format_os(ctx: &ProvisionContext) -> Result<()> {
    let (number, part) = partition_with(&ctx.config, |fs| fs == FilesystemKind::Ext4)
        .context("cannot format root partition")?;
    let node = ctx.partition_node(number)?;
    info!("Formatting root partition {} (ext4)", node.display());
    ctx.hal
        .format_ext4(
            &node,
            &part.label,
            &FormatOptions::new(ctx.dry_run, ctx.confirmed),
        )
        .context("mkfs.ext4 failed")?;
    Ok(())
}

fn format_swap(ctx: &ProvisionContext) -> Result<()> {
    let (number, part) = partition_with(&ctx.config, |fs| fs == FilesystemKind::LinuxSwap)
        .context("cannot format swap partition")?;
    let node = ctx.partition_node(number)?;
    info!("Formatting swap partition {}", node.display());
    ctx.hal
        .format_swap(
            &node,
            &part.label,
            &FormatOptions::new(ctx.dry_run, ctx.confirmed),
        )
        .context("mkswap failed")?;
    Ok(())
}

fn mount_partitions(ctx: &ProvisionContext) -> Result<()> {
    let (boot_number, _) = partition_with(&ctx.config, |fs| {
        matches!(fs, FilesystemKind::Fat16 | FilesystemKind::Fat32)
    })?;
    let (root_number, _) = partition_with(&ctx.config, |fs| fs == FilesystemKind::Ext4)?;

    let boot_mount = ctx.config.boot_mount();
    let root_mount = ctx.config.root_mount();
    if !ctx.dry_run {
        fs::create_dir_all(&boot_mount)?;
        fs::create_dir_all(&root_mount)?;
    }

    info!("Mounting partitions under {}", ctx.config.work_dir.display());
    ctx.hal.mount_device(
        &ctx.partition_node(boot_number)?,
        &boot_mount,
        Some("vfat"),
        MountOptions::default(),
        ctx.dry_run,
    )?;
    ctx.hal.mount_device(
        &ctx.partition_node(root_number)?,
        &root_mount,
        Some("ext4"),
        MountOptions::default(),
        ctx.dry_run,
    )?;
    Ok(())
}

fn sync_firmware(ctx: &ProvisionContext, report: &mut ProvisionReport) -> Result<()> {
    report.firmware_revision = log_revision(ctx, &ctx.config.firmware_dir, "firmware");
    mirror(ctx, &ctx.config.firmware_dir, &ctx.config.boot_mount())
        .context("failed to mirror the firmware tree")
}

fn sync_os(ctx: &ProvisionContext, report: &mut ProvisionReport) -> Result<()> {
    report.os_revision = log_revision(ctx, &ctx.config.os_dir, "OS");
    mirror(ctx, &ctx.config.os_dir, &ctx.config.root_mount())
        .context("failed to mirror the OS tree")?;
    install_fstab(ctx)
}

fn log_revision(ctx: &ProvisionContext, tree: &Path, what: &str) -> Option<String> {
    match ctx.hal.describe_tree(tree) {
        Ok(Some(rev)) => {
            info!("{} tree at revision {}", what, rev);
            Some(rev)
        }
        Ok(None) => None,
        Err(e) => {
            warn!("could not query {} tree revision: {}", what, e);
            None
        }
    }
}

fn mirror(ctx: &ProvisionContext, src: &Path, dst: &Path) -> Result<()> {
    info!("Mirroring {} -> {}", src.display(), dst.display());
    let opts = MirrorOptions::mirror(ctx.config.exclude_file.clone());
    ctx.hal.mirror_tree(src, dst, &opts, ctx.dry_run)?;
    Ok(())
}

/// The card boots with a different fstab than an NFS root; install the card
/// variant into the freshly synced target root.
fn install_fstab(ctx: &ProvisionContext) -> Result<()> {
    let Some(fstab) = &ctx.config.fstab_file else {
        return Ok(());
    };
    let dst = ctx.config.root_mount().join("etc/fstab");
    if ctx.dry_run {
        info!("DRY RUN: install {} -> {}", fstab.display(), dst.display());
        return Ok(());
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(fstab, &dst)
        .with_context(|| format!("failed to install fstab {}", fstab.display()))?;
    Ok(())
}

/// Render and install the kernel command-line files on the boot partition.
/// A pre-existing kcmd.txt is preserved as kcmd.txt.bak before overwrite.
fn write_boot_params(ctx: &ProvisionContext) -> Result<()> {
    let boot = ctx.config.boot_mount();
    let base = ctx.config.kcmd.default_set();
    let nfs = ctx.config.kcmd.nfs_overrides();
    let default_line = render_cmdline(&base, None);
    let nfs_line = render_cmdline(&base, Some(&nfs));

    if ctx.dry_run {
        info!("DRY RUN: would write {} = {:?}", KCMD_DEFAULT_FILE, default_line);
        info!("DRY RUN: would write {} = {:?}", KCMD_NFS_FILE, nfs_line);
        return Ok(());
    }

    info!("Writing kernel command-line files to {}", boot.display());
    fs::write(boot.join(KCMD_DEFAULT_FILE), &default_line)?;
    fs::write(boot.join(KCMD_NFS_FILE), &nfs_line)?;

    let main = boot.join(KCMD_FILE);
    if main.exists() {
        fs::copy(&main, boot.join(KCMD_BACKUP_FILE))
            .context("failed to back up existing kcmd.txt")?;
    }
    fs::copy(boot.join(KCMD_DEFAULT_FILE), &main)?;
    Ok(())
}

/// Unmount anything the run mounted and flush buffers. Best effort; errors
/// here must not mask the pipeline result.
fn teardown(ctx: &ProvisionContext) {
    for target in [ctx.config.boot_mount(), ctx.config.root_mount()] {
        if matches!(ctx.hal.is_mounted(&target), Ok(true)) {
            info!("Unmounting {}", target.display());
            if let Err(e) = ctx.hal.unmount(&target, ctx.dry_run) {
                warn!("failed to unmount {}: {}", target.display(), e);
            }
        }
    }
    let _ = ctx.hal.sync();
}
