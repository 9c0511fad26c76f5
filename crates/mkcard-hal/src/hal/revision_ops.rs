//! Version-control queries.

use crate::HalResult;
use std::path::Path;

pub trait RevisionOps {
    /// Descriptive revision of a version-controlled tree (`git describe`).
    ///
    /// Best-effort: a tree that is not under version control, or a host
    /// without git, yields `Ok(None)`.
    fn describe_tree(&self, tree: &Path) -> HalResult<Option<String>>;
}
