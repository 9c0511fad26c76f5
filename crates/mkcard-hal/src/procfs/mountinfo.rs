//! Parsing helpers for `/proc/self/mountinfo` (and similar mountinfo files).

use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub mount_point: String,
    pub source: String,
}

pub fn parse_mountinfo(content: &str) -> Vec<MountEntry> {
    content
        .lines()
        .filter_map(|line| {
            // mountinfo format:
            //   <id> <parent> <maj:min> <root> <mount point> <...> - <fstype> <source> <superopts>
            let (pre, post) = line.split_once(" - ")?;
            let pre_fields: Vec<&str> = pre.split_whitespace().collect();
            if pre_fields.len() < 5 {
                return None;
            }
            let mount_point = unescape_mount_path(pre_fields[4]);
            let mut post_fields = post.split_whitespace();
            let _fstype = post_fields.next()?;
            let source = post_fields.next()?.to_string();
            Some(MountEntry {
                mount_point,
                source,
            })
        })
        .collect()
}

/// Whether `device` backs any current mount.
pub fn is_source_mounted(entries: &[MountEntry], device: &str) -> bool {
    entries.iter().any(|entry| entry.source == device)
}

/// Whether `path` is a mount point.
pub fn is_mount_point(entries: &[MountEntry], path: &Path) -> bool {
    let target = normalize_path(path);
    entries
        .iter()
        .any(|entry| normalize_path(Path::new(&entry.mount_point)) == target)
}

pub fn unescape_mount_path(raw: &str) -> String {
    raw.replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

fn normalize_path(path: &Path) -> String {
    let s = path.to_string_lossy();
    if s.len() > 1 && s.ends_with('/') {
        s.trim_end_matches('/').to_string()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "36 28 0:31 / / rw,relatime - ext4 /dev/sda3 rw\n\
                          37 28 0:32 / /mnt/boot rw,relatime - vfat /dev/sdc1 rw\n";

    #[test]
    fn parse_mountinfo_extracts_points_and_sources() {
        let entries = parse_mountinfo(SAMPLE);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].mount_point, "/");
        assert_eq!(entries[0].source, "/dev/sda3");
        assert_eq!(entries[1].source, "/dev/sdc1");
    }

    #[test]
    fn is_source_mounted_matches_exact_device() {
        let entries = parse_mountinfo(SAMPLE);
        assert!(is_source_mounted(&entries, "/dev/sdc1"));
        assert!(!is_source_mounted(&entries, "/dev/sdc2"));
        // A partition of the same disk must not shadow the whole device.
        assert!(!is_source_mounted(&entries, "/dev/sdc"));
    }

    #[test]
    fn is_mount_point_matches_paths() {
        let entries = parse_mountinfo(SAMPLE);
        assert!(is_mount_point(&entries, Path::new("/mnt/boot")));
        assert!(!is_mount_point(&entries, Path::new("/mnt")));
    }

    #[test]
    fn mount_paths_are_unescaped() {
        let sample = "36 28 0:31 / /mnt/data\\040disk rw - ext4 /dev/sda3 rw\n";
        let entries = parse_mountinfo(sample);
        assert_eq!(entries[0].mount_point, "/mnt/data disk");
    }
}
