use crate::{HalError, HalResult};

/// Partition node path for a block device.
///
/// Devices whose name ends in a digit (`/dev/mmcblk0`, `/dev/loop3`) separate
/// the partition number with a `p` infix; everything else appends the number
/// directly (`/dev/sdb` -> `/dev/sdb1`).
pub fn partition_path(device: &str, number: u32) -> HalResult<String> {
    match device.chars().last() {
        None => Err(HalError::InvalidDevicePath(device.to_string())),
        Some(c) if c.is_ascii_digit() => Ok(format!("{}p{}", device, number)),
        Some(_) => Ok(format!("{}{}", device, number)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_devices_append_the_number() {
        assert_eq!(partition_path("/dev/sdb", 1).unwrap(), "/dev/sdb1");
    }

    #[test]
    fn digit_suffixed_devices_get_a_p_infix() {
        assert_eq!(partition_path("/dev/mmcblk0", 2).unwrap(), "/dev/mmcblk0p2");
        assert_eq!(partition_path("/dev/loop7", 1).unwrap(), "/dev/loop7p1");
    }

    #[test]
    fn empty_device_path_is_rejected() {
        let err = partition_path("", 1).unwrap_err();
        assert!(matches!(err, HalError::InvalidDevicePath(_)));
    }
}
