//! Boot-parameter file handling on the boot partition.

use std::fs;
use std::sync::Arc;

use mkcard::cli::{MatchPolicy, StepSelection};
use mkcard::config::ProvisionConfig;
use mkcard::provision::{self, ProvisionContext};
use mkcard_hal::FakeHal;
use tempfile::TempDir;

const DEFAULT_LINE: &str =
    "mem=128M ip=dhcp init=/sbin/init root=/dev/mmcblk0p2 elevator=noop noinitrd rw";
const NFS_LINE: &str = "mem=128M ip=dhcp init=/sbin/init root=/dev/nfs elevator=noop \
                        nfsroot=10.42.0.1:/srv/os rootfstype=nfs noinitrd rw nfsrootdebug rootwait";

fn write_params_only() -> StepSelection {
    let mut steps = StepSelection::all();
    steps.create_partitions = false;
    steps.format_boot = false;
    steps.format_os = false;
    steps.format_swap = false;
    steps.mount = false;
    steps.sync_firmware = false;
    steps.sync_os = false;
    steps
}

fn context(work_dir: &TempDir) -> ProvisionContext {
    let mut config = ProvisionConfig::default();
    config.work_dir = work_dir.path().to_path_buf();
    ProvisionContext {
        hal: Arc::new(FakeHal::new()),
        config,
        policy: MatchPolicy::TypePrefix,
        dry_run: false,
        confirmed: false,
    }
}

#[test]
fn kcmd_files_carry_both_profiles() {
    let work_dir = TempDir::new().unwrap();
    let boot = work_dir.path().join("boot");
    fs::create_dir_all(&boot).unwrap();

    let ctx = context(&work_dir);
    provision::run(&ctx, &write_params_only()).unwrap();

    assert_eq!(
        fs::read_to_string(boot.join(provision::KCMD_DEFAULT_FILE)).unwrap(),
        DEFAULT_LINE
    );
    assert_eq!(
        fs::read_to_string(boot.join(provision::KCMD_NFS_FILE)).unwrap(),
        NFS_LINE
    );
    // The main file is installed from the default profile.
    assert_eq!(
        fs::read_to_string(boot.join(provision::KCMD_FILE)).unwrap(),
        DEFAULT_LINE
    );
}

#[test]
fn existing_kcmd_is_backed_up_before_overwrite() {
    let work_dir = TempDir::new().unwrap();
    let boot = work_dir.path().join("boot");
    fs::create_dir_all(&boot).unwrap();
    fs::write(boot.join(provision::KCMD_FILE), "mem=64M quiet").unwrap();

    let ctx = context(&work_dir);
    provision::run(&ctx, &write_params_only()).unwrap();

    assert_eq!(
        fs::read_to_string(boot.join(provision::KCMD_BACKUP_FILE)).unwrap(),
        "mem=64M quiet"
    );
    assert_eq!(
        fs::read_to_string(boot.join(provision::KCMD_FILE)).unwrap(),
        DEFAULT_LINE
    );
}

#[test]
fn rendering_twice_from_one_config_is_stable() {
    let work_dir = TempDir::new().unwrap();
    let boot = work_dir.path().join("boot");
    fs::create_dir_all(&boot).unwrap();

    let ctx = context(&work_dir);
    provision::run(&ctx, &write_params_only()).unwrap();
    let first = fs::read_to_string(boot.join(provision::KCMD_NFS_FILE)).unwrap();
    provision::run(&ctx, &write_params_only()).unwrap();
    let second = fs::read_to_string(boot.join(provision::KCMD_NFS_FILE)).unwrap();

    // Overlaying the NFS profile twice must not accumulate overrides into
    // the base profile.
    assert_eq!(first, second);
    assert_eq!(
        fs::read_to_string(boot.join(provision::KCMD_DEFAULT_FILE)).unwrap(),
        DEFAULT_LINE
    );
}
