//! mkcard hardware abstraction layer.
//!
//! Wraps the external collaborators of the provisioning pipeline (partition
//! table tooling, formatters, mounts, rsync, raw copy, version control) in
//! traits so the pipeline and the planner can be exercised without a device.

pub mod error;
pub mod hal;
pub mod path;
pub mod procfs;
pub mod sysfs;

pub use error::{HalError, HalResult};
pub use hal::{
    BlockCopyOps, CloneOptions, FakeHal, FilesystemKind, FormatOps, FormatOptions, LinuxHal,
    MirrorOps, MirrorOptions, MountOps, MountOptions, ObservedPartition, Operation, ProvisionHal,
    RevisionOps, SystemOps, TableEntry, TableOps, TableOptions,
};
