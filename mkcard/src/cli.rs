//! CLI argument parsing for mkcard.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// How an existing partition table is matched against the declared layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum MatchPolicy {
    /// Match by filesystem type; check sector geometry only where the layout pins one
    #[default]
    TypePrefix,
    /// Require exact sector geometry for every partition
    ExactGeometry,
}

impl std::fmt::Display for MatchPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchPolicy::TypePrefix => write!(f, "type-prefix"),
            MatchPolicy::ExactGeometry => write!(f, "exact-geometry"),
        }
    }
}

#[derive(Parser)]
#[command(name = "mkcard")]
#[command(about = "Provision an SD card for an embedded Linux target")]
#[command(long_about = "Provision an SD card for an embedded Linux target.\n\n\
    Establishes the declared partition layout (boot/FAT, root/ext4, swap),\n\
    formats the partitions, mirrors the firmware and OS trees onto them and\n\
    writes the kernel command-line files read by the bootloader.\n\n\
    With no action switch selected, the whole pipeline runs.")]
pub struct Cli {
    /// Configuration file (TOML); flags below override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Target block device (e.g. /dev/sdc)
    #[arg(long)]
    pub device: Option<String>,

    /// Firmware tree mirrored onto the boot partition
    #[arg(long)]
    pub firmware_dir: Option<PathBuf>,

    /// OS tree mirrored onto the root partition
    #[arg(long)]
    pub os_dir: Option<PathBuf>,

    /// How an existing table is matched against the declared layout
    #[arg(long, value_enum, default_value_t = MatchPolicy::TypePrefix)]
    pub match_policy: MatchPolicy,

    /// Log intended operations without touching the device
    #[arg(long)]
    pub dry_run: bool,

    /// Confirm destructive operations (required for non-dry-run)
    #[arg(long)]
    pub yes_i_know: bool,

    /// Reconcile the partition table with the declared layout
    #[arg(long)]
    pub create_partitions: bool,

    /// Format the boot (FAT) partition
    #[arg(long)]
    pub format_boot: bool,

    /// Format the root (ext4) partition
    #[arg(long)]
    pub format_os: bool,

    /// Format the swap partition
    #[arg(long)]
    pub format_swap: bool,

    /// Mount the boot and root partitions under the work directory
    #[arg(long)]
    pub mount: bool,

    /// Mirror the firmware tree onto the boot partition
    #[arg(long)]
    pub sync_firmware: bool,

    /// Mirror the OS tree onto the root partition
    #[arg(long)]
    pub sync_os: bool,

    /// Write the kernel command-line files to the boot partition
    #[arg(long)]
    pub write_boot_params: bool,
}

/// Which pipeline steps to run. Selecting no switch on the command line
/// means everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepSelection {
    pub create_partitions: bool,
    pub format_boot: bool,
    pub format_os: bool,
    pub format_swap: bool,
    pub mount: bool,
    pub sync_firmware: bool,
    pub sync_os: bool,
    pub write_boot_params: bool,
}

impl StepSelection {
    pub fn all() -> Self {
        Self {
            create_partitions: true,
            format_boot: true,
            format_os: true,
            format_swap: true,
            mount: true,
            sync_firmware: true,
            sync_os: true,
            write_boot_params: true,
        }
    }

    /// Steps that modify the device and therefore need confirmation.
    pub fn destructive(&self) -> bool {
        self.create_partitions || self.format_boot || self.format_os || self.format_swap
    }

    fn any(&self) -> bool {
        self.create_partitions
            || self.format_boot
            || self.format_os
            || self.format_swap
            || self.mount
            || self.sync_firmware
            || self.sync_os
            || self.write_boot_params
    }
}

impl Cli {
    pub fn selected_steps(&self) -> StepSelection {
        let selection = StepSelection {
            create_partitions: self.create_partitions,
            format_boot: self.format_boot,
            format_os: self.format_os,
            format_swap: self.format_swap,
            mount: self.mount,
            sync_firmware: self.sync_firmware,
            sync_os: self.sync_os,
            write_boot_params: self.write_boot_params,
        };
        if selection.any() {
            selection
        } else {
            StepSelection::all()
        }
    }
}
