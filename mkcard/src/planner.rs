//! Partition-plan reconciliation.
//!
//! The planner is pure: it never touches a device. `plan` turns a declared
//! layout into concrete sector geometry and `verify` decides whether a table
//! read back from the card already satisfies that layout. Committing a plan
//! is the table collaborator's job (`TableOps::create_table`), which keeps
//! the geometry math testable without real or simulated hardware.

use mkcard_hal::{FilesystemKind, ObservedPartition, TableEntry};
use thiserror::Error;

use crate::cli::MatchPolicy;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PlanError {
    #[error("partition {number} is busy (mounted or in use); unmount it and retry")]
    PartitionBusy { number: u32 },

    #[error("declared layout needs {required} sectors but the device offers {available}")]
    InsufficientDeviceSpace { required: u64, available: u64 },

    #[error("partitions {first} and {second} overlap")]
    Overlap { first: u32, second: u32 },

    #[error("invalid layout: {0}")]
    InvalidLayout(String),
}

/// Geometry descriptor of a desired partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extent {
    /// Pinned absolute sector range, inclusive on both ends.
    Range { start: u64, end: u64 },
    /// Fixed length, placed directly after the preceding partition.
    Sectors(u64),
    /// Fill whatever the fixed partitions leave over.
    Remainder,
}

/// One desired partition. Position in the containing slice defines the
/// partition number (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionSpec {
    pub fs: FilesystemKind,
    pub extent: Extent,
}

impl PartitionSpec {
    pub fn pinned(fs: FilesystemKind, start: u64, end: u64) -> Self {
        Self {
            fs,
            extent: Extent::Range { start, end },
        }
    }

    pub fn sized(fs: FilesystemKind, sectors: u64) -> Self {
        Self {
            fs,
            extent: Extent::Sectors(sectors),
        }
    }

    pub fn remainder(fs: FilesystemKind) -> Self {
        Self {
            fs,
            extent: Extent::Remainder,
        }
    }
}

/// Concrete geometry produced by `plan`. Sectors are inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedPartition {
    /// 1-based, in declaration order.
    pub number: u32,
    pub fs: FilesystemKind,
    pub start_sector: u64,
    pub end_sector: u64,
}

impl ResolvedPartition {
    pub fn len_sectors(&self) -> u64 {
        self.end_sector - self.start_sector + 1
    }

    pub fn table_entry(&self) -> TableEntry {
        TableEntry {
            fs: self.fs,
            start_sector: self.start_sector,
            end_sector: self.end_sector,
        }
    }
}

/// Sectors needed to hold `mib` mebibytes at the given sector size.
pub fn mib_to_sectors(mib: u64, sector_size_bytes: u64) -> u64 {
    mib * 1024 * 1024 / sector_size_bytes
}

/// Decide whether the observed table already satisfies the desired layout.
///
/// Busy partitions take precedence over any matching verdict: operating on a
/// mounted filesystem would corrupt it, so that case is a hard stop rather
/// than a `false` that the caller would answer by rewriting the table.
pub fn verify(
    desired: &[PartitionSpec],
    observed: &[ObservedPartition],
    policy: MatchPolicy,
) -> Result<bool, PlanError> {
    if let Some(part) = observed.iter().find(|p| p.busy) {
        return Err(PlanError::PartitionBusy {
            number: part.number,
        });
    }

    if desired.len() != observed.len() {
        log::info!(
            "partition count differs: layout declares {}, device has {}",
            desired.len(),
            observed.len()
        );
        return Ok(false);
    }

    Ok(desired
        .iter()
        .zip(observed)
        .all(|(spec, part)| spec_matches(spec, part, policy)))
}

fn spec_matches(spec: &PartitionSpec, part: &ObservedPartition, policy: MatchPolicy) -> bool {
    // Tables report versioned type names ("linux-swap(v1)"), hence prefix
    // matching rather than equality.
    let type_ok = part
        .fs_type
        .as_deref()
        .is_some_and(|t| t.starts_with(spec.fs.name()));
    if !type_ok {
        return false;
    }

    match (policy, spec.extent) {
        (_, Extent::Range { start, end }) => {
            part.start_sector == start && part.end_sector == end
        }
        (MatchPolicy::TypePrefix, _) => true,
        // Without a pinned range there is nothing exact to compare against.
        (MatchPolicy::ExactGeometry, _) => false,
    }
}

/// Resolve a declared layout to concrete sector geometry.
///
/// Fixed sizes are consumed in declaration order starting at
/// `reserved_start_sectors`; at most one `Remainder` receives whatever the
/// fixed partitions leave over. Pinned ranges pass through unchanged. Any
/// overlap among the resolved partitions is rejected here rather than handed
/// to the table writer.
pub fn plan(
    device_len_sectors: u64,
    desired: &[PartitionSpec],
    reserved_start_sectors: u64,
) -> Result<Vec<ResolvedPartition>, PlanError> {
    if desired.is_empty() {
        return Err(PlanError::InvalidLayout("no partitions declared".into()));
    }

    let mut fixed_sectors: u64 = 0;
    let mut remainders = 0usize;
    for (i, spec) in desired.iter().enumerate() {
        match spec.extent {
            Extent::Range { start, end } if start > end => {
                return Err(PlanError::InvalidLayout(format!(
                    "partition {} starts at sector {} past its end {}",
                    i + 1,
                    start,
                    end
                )));
            }
            Extent::Range { .. } => {}
            Extent::Sectors(0) => {
                return Err(PlanError::InvalidLayout(format!(
                    "partition {} has zero length",
                    i + 1
                )));
            }
            Extent::Sectors(n) => fixed_sectors += n,
            Extent::Remainder => remainders += 1,
        }
    }
    if remainders > 1 {
        return Err(PlanError::InvalidLayout(
            "more than one partition fills the remainder".into(),
        ));
    }

    let remainder_len = if remainders == 1 {
        let required = reserved_start_sectors + fixed_sectors;
        if required >= device_len_sectors {
            return Err(PlanError::InsufficientDeviceSpace {
                required,
                available: device_len_sectors,
            });
        }
        device_len_sectors - required
    } else {
        0
    };

    let mut resolved = Vec::with_capacity(desired.len());
    let mut cursor = reserved_start_sectors;
    for (i, spec) in desired.iter().enumerate() {
        let (start_sector, end_sector) = match spec.extent {
            Extent::Range { start, end } => {
                cursor = cursor.max(end + 1);
                (start, end)
            }
            Extent::Sectors(n) => {
                let range = (cursor, cursor + n - 1);
                cursor = range.1 + 1;
                range
            }
            Extent::Remainder => {
                let range = (cursor, cursor + remainder_len - 1);
                cursor = range.1 + 1;
                range
            }
        };
        resolved.push(ResolvedPartition {
            number: (i + 1) as u32,
            fs: spec.fs,
            start_sector,
            end_sector,
        });
    }

    for part in &resolved {
        if part.end_sector >= device_len_sectors {
            return Err(PlanError::InsufficientDeviceSpace {
                required: part.end_sector + 1,
                available: device_len_sectors,
            });
        }
    }
    check_overlap(&resolved)?;

    Ok(resolved)
}

fn check_overlap(resolved: &[ResolvedPartition]) -> Result<(), PlanError> {
    let mut by_start: Vec<&ResolvedPartition> = resolved.iter().collect();
    by_start.sort_by_key(|p| p.start_sector);
    for pair in by_start.windows(2) {
        if pair[1].start_sector <= pair[0].end_sector {
            return Err(PlanError::Overlap {
                first: pair[0].number,
                second: pair[1].number,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observed(
        number: u32,
        fs_type: Option<&str>,
        start_sector: u64,
        end_sector: u64,
        busy: bool,
    ) -> ObservedPartition {
        ObservedPartition {
            number,
            fs_type: fs_type.map(str::to_string),
            start_sector,
            end_sector,
            busy,
        }
    }

    fn three_part_layout() -> Vec<PartitionSpec> {
        vec![
            PartitionSpec::sized(FilesystemKind::Fat16, 1_048_576),
            PartitionSpec::remainder(FilesystemKind::Ext4),
            PartitionSpec::sized(FilesystemKind::LinuxSwap, 1_048_576),
        ]
    }

    #[test]
    fn plan_lays_out_contiguous_partitions() {
        let resolved = plan(15_523_840, &three_part_layout(), 2048).unwrap();

        assert_eq!(resolved.len(), 3);
        assert_eq!(resolved[0].number, 1);
        assert_eq!(resolved[0].start_sector, 2048);
        assert_eq!(resolved[0].end_sector, 1_050_623);
        assert_eq!(resolved[1].start_sector, resolved[0].end_sector + 1);
        assert_eq!(resolved[2].start_sector, resolved[1].end_sector + 1);
        assert_eq!(resolved[2].end_sector, 15_523_839);

        let total: u64 = resolved.iter().map(ResolvedPartition::len_sectors).sum();
        assert_eq!(total, 15_523_840 - 2048);
    }

    #[test]
    fn plan_gives_the_remainder_exactly_what_is_left() {
        let specs = vec![
            PartitionSpec::sized(FilesystemKind::Fat16, 100),
            PartitionSpec::remainder(FilesystemKind::Ext4),
            PartitionSpec::sized(FilesystemKind::LinuxSwap, 200),
        ];
        let resolved = plan(10_000, &specs, 48).unwrap();
        assert_eq!(resolved[1].len_sectors(), 10_000 - 48 - 100 - 200);
    }

    #[test]
    fn plan_rejects_oversized_layouts() {
        let specs = vec![
            PartitionSpec::sized(FilesystemKind::Fat16, 6_000),
            PartitionSpec::remainder(FilesystemKind::Ext4),
            PartitionSpec::sized(FilesystemKind::LinuxSwap, 4_000),
        ];
        let err = plan(10_000, &specs, 48).unwrap_err();
        assert!(matches!(err, PlanError::InsufficientDeviceSpace { .. }));
    }

    #[test]
    fn plan_rejects_an_exactly_full_layout() {
        // The remainder partition must get at least one sector.
        let specs = vec![
            PartitionSpec::sized(FilesystemKind::Fat16, 9_952),
            PartitionSpec::remainder(FilesystemKind::Ext4),
        ];
        let err = plan(10_000, &specs, 48).unwrap_err();
        assert!(matches!(err, PlanError::InsufficientDeviceSpace { .. }));
    }

    #[test]
    fn plan_passes_pinned_ranges_through() {
        let specs = vec![
            PartitionSpec::pinned(FilesystemKind::Fat16, 2048, 1_050_623),
            PartitionSpec::pinned(FilesystemKind::Ext4, 1_050_624, 14_362_623),
            PartitionSpec::pinned(FilesystemKind::LinuxSwap, 14_362_624, 15_523_839),
        ];
        let resolved = plan(15_523_840, &specs, 2048).unwrap();
        assert_eq!(resolved[1].start_sector, 1_050_624);
        assert_eq!(resolved[1].end_sector, 14_362_623);
    }

    #[test]
    fn plan_rejects_overlapping_pinned_ranges() {
        let specs = vec![
            PartitionSpec::pinned(FilesystemKind::Fat16, 2048, 5_000),
            PartitionSpec::pinned(FilesystemKind::Ext4, 4_000, 9_000),
        ];
        let err = plan(10_000, &specs, 2048).unwrap_err();
        assert_eq!(
            err,
            PlanError::Overlap {
                first: 1,
                second: 2
            }
        );
    }

    #[test]
    fn plan_rejects_two_remainders() {
        let specs = vec![
            PartitionSpec::remainder(FilesystemKind::Fat16),
            PartitionSpec::remainder(FilesystemKind::Ext4),
        ];
        assert!(matches!(
            plan(10_000, &specs, 48),
            Err(PlanError::InvalidLayout(_))
        ));
    }

    #[test]
    fn plan_rejects_ranges_past_the_device_end() {
        let specs = vec![PartitionSpec::pinned(FilesystemKind::Ext4, 2048, 20_000)];
        assert!(matches!(
            plan(10_000, &specs, 2048),
            Err(PlanError::InsufficientDeviceSpace { .. })
        ));
    }

    #[test]
    fn verify_is_false_on_count_mismatch() {
        let desired = three_part_layout();
        let parts = vec![observed(1, Some("fat16"), 2048, 1_050_623, false)];
        assert_eq!(
            verify(&desired, &parts, MatchPolicy::TypePrefix).unwrap(),
            false
        );
    }

    #[test]
    fn verify_accepts_versioned_type_names() {
        let desired = vec![PartitionSpec::sized(FilesystemKind::LinuxSwap, 100)];
        let parts = vec![observed(1, Some("linux-swap(v1)"), 2048, 2147, false)];
        assert!(verify(&desired, &parts, MatchPolicy::TypePrefix).unwrap());
    }

    #[test]
    fn verify_does_not_confuse_ext_generations() {
        let desired = vec![PartitionSpec::sized(FilesystemKind::Ext4, 100)];
        let parts = vec![observed(1, Some("ext3"), 2048, 2147, false)];
        assert!(!verify(&desired, &parts, MatchPolicy::TypePrefix).unwrap());
    }

    #[test]
    fn verify_requires_a_reported_type() {
        let desired = vec![PartitionSpec::sized(FilesystemKind::Ext4, 100)];
        let parts = vec![observed(1, None, 2048, 2147, false)];
        assert!(!verify(&desired, &parts, MatchPolicy::TypePrefix).unwrap());
    }

    #[test]
    fn verify_checks_geometry_for_pinned_specs() {
        let desired = vec![PartitionSpec::pinned(FilesystemKind::Fat16, 2048, 4095)];
        let exact = vec![observed(1, Some("fat16"), 2048, 4095, false)];
        let shifted = vec![observed(1, Some("fat16"), 2048, 4096, false)];
        assert!(verify(&desired, &exact, MatchPolicy::TypePrefix).unwrap());
        assert!(!verify(&desired, &shifted, MatchPolicy::TypePrefix).unwrap());
    }

    #[test]
    fn exact_geometry_policy_never_matches_unpinned_specs() {
        let desired = vec![PartitionSpec::sized(FilesystemKind::Ext4, 2048)];
        let parts = vec![observed(1, Some("ext4"), 2048, 4095, false)];
        assert!(verify(&desired, &parts, MatchPolicy::TypePrefix).unwrap());
        assert!(!verify(&desired, &parts, MatchPolicy::ExactGeometry).unwrap());
    }

    #[test]
    fn busy_partitions_stop_verification() {
        let desired = vec![PartitionSpec::sized(FilesystemKind::Ext4, 2048)];
        // Even a table that matches perfectly must not pass while mounted.
        let parts = vec![observed(1, Some("ext4"), 2048, 4095, true)];
        let err = verify(&desired, &parts, MatchPolicy::TypePrefix).unwrap_err();
        assert_eq!(err, PlanError::PartitionBusy { number: 1 });
    }

    #[test]
    fn busy_takes_precedence_over_count_mismatch() {
        let desired = three_part_layout();
        let parts = vec![observed(2, Some("ext4"), 2048, 4095, true)];
        assert!(matches!(
            verify(&desired, &parts, MatchPolicy::TypePrefix),
            Err(PlanError::PartitionBusy { number: 2 })
        ));
    }

    #[test]
    fn verify_is_idempotent() {
        let desired = three_part_layout();
        let parts = vec![
            observed(1, Some("fat16"), 2048, 1_050_623, false),
            observed(2, Some("ext4"), 1_050_624, 14_362_623, false),
            observed(3, Some("linux-swap(v1)"), 14_362_624, 15_523_839, false),
        ];
        let first = verify(&desired, &parts, MatchPolicy::TypePrefix).unwrap();
        let second = verify(&desired, &parts, MatchPolicy::TypePrefix).unwrap();
        assert_eq!(first, second);
        assert!(first);
    }

    #[test]
    fn mib_to_sectors_matches_the_classic_sizes() {
        assert_eq!(mib_to_sectors(512, 512), 1_048_576);
        assert_eq!(mib_to_sectors(512, 4096), 131_072);
    }
}
