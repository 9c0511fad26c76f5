//! HAL trait definitions and implementations.
//!
//! Every external tool the provisioning pipeline leans on (partition table,
//! mkfs, mount, rsync, raw copy, git) sits behind one of these traits, with
//! a real (LinuxHal) and a recording fake (FakeHal) implementation.

pub mod copy_ops;
pub mod fake_hal;
pub mod format_ops;
pub mod linux_hal;
pub mod mount_ops;
pub mod revision_ops;
pub mod sync_ops;
pub mod system_ops;
pub mod table_ops;

pub use copy_ops::{BlockCopyOps, CloneOptions};
pub use fake_hal::{FakeHal, Operation};
pub use format_ops::{FormatOps, FormatOptions};
pub use linux_hal::LinuxHal;
pub use mount_ops::{MountOps, MountOptions};
pub use revision_ops::RevisionOps;
pub use sync_ops::{MirrorOps, MirrorOptions};
pub use system_ops::SystemOps;
pub use table_ops::{FilesystemKind, ObservedPartition, TableEntry, TableOps, TableOptions};

/// Complete HAL combining all operations the pipeline needs.
pub trait ProvisionHal:
    TableOps + FormatOps + MountOps + MirrorOps + BlockCopyOps + SystemOps + RevisionOps + Send + Sync
{
}

/// Automatically implement ProvisionHal for any type implementing all
/// required traits.
impl<T> ProvisionHal for T where
    T: TableOps
        + FormatOps
        + MountOps
        + MirrorOps
        + BlockCopyOps
        + SystemOps
        + RevisionOps
        + Send
        + Sync
{
}
