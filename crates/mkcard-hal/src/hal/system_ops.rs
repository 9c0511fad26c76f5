//! Miscellaneous system operations.

use crate::HalResult;

pub trait SystemOps {
    /// Flush filesystem buffers.
    fn sync(&self) -> HalResult<()>;

    /// Wait for udev to settle after table changes.
    fn udev_settle(&self) -> HalResult<()>;
}
