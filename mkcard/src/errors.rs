use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("must run as root. This tool rewrites partition tables!")]
    NotRoot,

    #[error("required tool not found on PATH: {0}")]
    MissingBinary(String),

    #[error("{0} is not a block device")]
    NotABlockDevice(PathBuf),

    #[error("refusing to modify {0} without --yes-i-know")]
    MissingConfirmation(String),
}
