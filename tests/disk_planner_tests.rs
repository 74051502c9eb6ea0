//! Disk planner scenarios driven end to end: probe, plan, then apply on a
//! recording executor so the exact command sequence can be checked.

use std::path::{Path, PathBuf};

use archsetup::engine::apply::apply_plan;
use archsetup::engine::storage::{calculate_storage_plan, StorageOp, MIN_FREE_SPACE_MIB};
use archsetup::installer::probe_storage_input;
use archsetup::tool_runner::RecordingExecutor;
use archsetup::types::{PartitionMode, SubvolumeLayout};
use archsetup::InstallError;

const TARGET: &str = "/mnt";

/// Windows-style disk: ESP, MSR, C: and a 20 GiB unallocated tail.
const PARTED_DUAL_BOOT: &str = "BYT;\n\
    /dev/nvme0n1:122880MiB:nvme:512:512:gpt:Samsung SSD 970:;\n\
    1:1.00MiB:101MiB:100MiB:fat32:EFI system partition:boot, esp;\n\
    2:101MiB:117MiB:16.0MiB::Microsoft reserved partition:msftres;\n\
    3:117MiB:102400MiB:102283MiB:ntfs:Basic data partition:msftdata;\n";

/// One data partition with only 1 GiB left behind it.
const PARTED_NEARLY_FULL: &str = "BYT;\n\
    /dev/sda:51200MiB:scsi:512:512:gpt:ATA VBOX HARDDISK:;\n\
    1:1.00MiB:50176MiB:50175MiB:ext4:data:;\n";

/// ESP as 1, a deleted partition 2, data as 3: the next partition is 2.
const PARTED_GAPPED: &str = "BYT;\n\
    /dev/sda:81920MiB:scsi:512:512:gpt:ATA DISK:;\n\
    1:1.00MiB:513MiB:512MiB:fat32:ESP:boot, esp;\n\
    3:20000MiB:40000MiB:20000MiB:ext4:data:;\n";

/// MBR disk with one primary partition and no ESP.
const PARTED_MSDOS: &str = "BYT;\n\
    /dev/sdb:51200MiB:scsi:512:512:msdos:ATA DISK:;\n\
    1:1.00MiB:10241MiB:10240MiB:ext4::;\n";

const LSBLK_AFTER_CFDISK: &str = r#"{"blockdevices": [
    {"name": "vda", "path": "/dev/vda", "size": 42949672960, "type": "disk", "parttype": null, "fstype": null,
     "children": [
        {"name": "vda1", "path": "/dev/vda1", "size": 1073741824, "type": "part",
         "parttype": "c12a7328-f81f-11d2-ba4b-00a0c93ec93b", "fstype": null},
        {"name": "vda2", "path": "/dev/vda2", "size": 41874882560, "type": "part",
         "parttype": "0fc63daf-8483-4772-8e79-3d69d8477de4", "fstype": null}
     ]}
]}"#;

fn plan_for(exec: &RecordingExecutor, disk: &str, mode: PartitionMode, layout: SubvolumeLayout) -> archsetup::Result<archsetup::StoragePlan> {
    let disk = Path::new(disk);
    let input = probe_storage_input(exec, disk, mode)?;
    calculate_storage_plan(disk, &input, layout, Path::new(TARGET))
}

#[test]
fn test_entire_nvme_disk_end_to_end() {
    let exec = RecordingExecutor::new();
    let plan = plan_for(&exec, "/dev/nvme0n1", PartitionMode::EntireDisk, SubvolumeLayout::Full)
        .expect("plan");
    assert!(exec.commands().is_empty(), "entire-disk mode probes nothing");

    let target = apply_plan(&exec, &plan).expect("apply");
    let commands = exec.commands();

    assert_eq!(commands[0], "sgdisk --zap-all /dev/nvme0n1");
    assert_eq!(commands[1], "parted -s /dev/nvme0n1 mklabel gpt");
    assert_eq!(
        commands[2],
        "parted -s -a optimal /dev/nvme0n1 mkpart ESP fat32 1MiB 513MiB"
    );
    assert_eq!(commands[3], "parted -s /dev/nvme0n1 set 1 esp on");
    assert_eq!(
        commands[4],
        "parted -s -a optimal /dev/nvme0n1 mkpart root btrfs 513MiB 100%"
    );
    assert!(commands.contains(&"mkfs.fat -F 32 -n EFI /dev/nvme0n1p1".to_string()));
    assert!(commands.contains(&"mkfs.btrfs -f -L ARCH /dev/nvme0n1p2".to_string()));
    assert!(commands.contains(
        &"mount -o noatime,compress=zstd,subvol=@var /dev/nvme0n1p2 /mnt/var".to_string()
    ));

    assert_eq!(target.mounts().first(), Some(&PathBuf::from("/mnt")));
    assert_eq!(target.mounts().last(), Some(&PathBuf::from("/mnt/boot/efi")));
    assert_eq!(target.mounts().len(), 6);
}

#[test]
fn test_entire_sata_disk_turbo_layout() {
    let exec = RecordingExecutor::new();
    let plan = plan_for(&exec, "/dev/sda", PartitionMode::EntireDisk, SubvolumeLayout::Turbo)
        .expect("plan");

    let subvolumes: Vec<_> = plan
        .ops
        .iter()
        .filter_map(|op| match op {
            StorageOp::CreateSubvolume { path } => Some(path.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(
        subvolumes,
        vec![
            PathBuf::from("/mnt/@"),
            PathBuf::from("/mnt/@home"),
            PathBuf::from("/mnt/@snapshots"),
        ]
    );
    assert_eq!(plan.root, PathBuf::from("/dev/sda2"));
}

#[test]
fn test_free_space_reuses_windows_esp() {
    let exec = RecordingExecutor::new().respond("unit MiB print", PARTED_DUAL_BOOT);
    let plan = plan_for(&exec, "/dev/nvme0n1", PartitionMode::FreeSpace, SubvolumeLayout::Full)
        .expect("plan");

    assert!(!plan.ops.iter().any(|op| matches!(op, StorageOp::WipeDisk { .. })));
    assert!(!plan.ops.iter().any(|op| matches!(op, StorageOp::CreatePartitionTable { .. })));

    let efi = plan.efi.as_ref().expect("efi");
    assert_eq!(efi.device, PathBuf::from("/dev/nvme0n1p1"));
    assert!(!efi.format);
    assert_eq!(plan.root, PathBuf::from("/dev/nvme0n1p4"));

    let recorder = RecordingExecutor::new();
    apply_plan(&recorder, &plan).expect("apply");
    let commands = recorder.commands();
    assert!(commands.contains(
        &"parted -s -a optimal /dev/nvme0n1 mkpart root btrfs 102400MiB 100%".to_string()
    ));
    assert!(!commands.iter().any(|c| c.starts_with("mkfs.fat")));
    assert!(commands.contains(&"mount /dev/nvme0n1p1 /mnt/boot/efi".to_string()));
}

#[test]
fn test_free_space_takes_lowest_unused_number() {
    let exec = RecordingExecutor::new().respond("unit MiB print", PARTED_GAPPED);
    let plan = plan_for(&exec, "/dev/sda", PartitionMode::FreeSpace, SubvolumeLayout::Full)
        .expect("plan");
    assert_eq!(plan.root, PathBuf::from("/dev/sda2"));

    let recorder = RecordingExecutor::new();
    apply_plan(&recorder, &plan).expect("apply");
    let commands = recorder.commands();
    assert_eq!(commands[0], "parted -s -a optimal /dev/sda mkpart root btrfs 40000MiB 100%");
    assert_eq!(commands[1], "partprobe /dev/sda");
    assert_eq!(commands[2], "mkfs.btrfs -f -L ARCH /dev/sda2");
    assert!(!commands.iter().any(|c| c.contains("/dev/sda4")));
    assert!(commands.contains(&"mount /dev/sda1 /mnt/boot/efi".to_string()));
}

#[test]
fn test_free_space_on_msdos_creates_primary_partitions() {
    let exec = RecordingExecutor::new().respond("unit MiB print", PARTED_MSDOS);
    let plan = plan_for(&exec, "/dev/sdb", PartitionMode::FreeSpace, SubvolumeLayout::Turbo)
        .expect("plan");

    let recorder = RecordingExecutor::new();
    apply_plan(&recorder, &plan).expect("apply");
    let commands = recorder.commands();
    assert_eq!(
        &commands[..4],
        &[
            "parted -s -a optimal /dev/sdb mkpart primary fat32 10241MiB 10753MiB".to_string(),
            "parted -s /dev/sdb set 2 esp on".to_string(),
            "parted -s -a optimal /dev/sdb mkpart primary btrfs 10753MiB 100%".to_string(),
            "partprobe /dev/sdb".to_string(),
        ]
    );
    assert!(commands.contains(&"mkfs.fat -F 32 -n EFI /dev/sdb2".to_string()));
    assert!(commands.contains(&"mkfs.btrfs -f -L ARCH /dev/sdb3".to_string()));
}

#[test]
fn test_free_space_under_floor_is_refused() {
    let exec = RecordingExecutor::new().respond("unit MiB print", PARTED_NEARLY_FULL);
    let err = plan_for(&exec, "/dev/sda", PartitionMode::FreeSpace, SubvolumeLayout::Full)
        .expect_err("too little space");

    assert!(matches!(err, InstallError::Precondition(_)));
    let message = err.to_string();
    assert!(message.contains("1024 MiB"), "{}", message);
    assert!(message.contains(&MIN_FREE_SPACE_MIB.to_string()));
}

#[test]
fn test_manual_mode_formats_new_partitions() {
    let exec = RecordingExecutor::new().respond("lsblk", LSBLK_AFTER_CFDISK);
    let plan = plan_for(&exec, "/dev/vda", PartitionMode::Manual, SubvolumeLayout::Turbo)
        .expect("plan");

    assert!(!plan.ops.iter().any(|op| matches!(op, StorageOp::CreatePartition { .. })));
    let efi = plan.efi.as_ref().expect("efi");
    assert_eq!(efi.device, PathBuf::from("/dev/vda1"));
    assert!(efi.format, "an ESP without a filesystem gets one");
    assert_eq!(plan.root, PathBuf::from("/dev/vda2"));
}

#[test]
fn test_failed_mount_leaves_nothing_mounted() {
    let exec = RecordingExecutor::new().fail_on("/mnt/boot/efi", 32, "mount: wrong fs type");
    let plan = plan_for(&exec, "/dev/sda", PartitionMode::EntireDisk, SubvolumeLayout::Turbo)
        .expect("plan");

    assert!(apply_plan(&exec, &plan).is_err());
    let commands = exec.commands();
    let unmounts: Vec<_> = commands.iter().filter(|c| c.starts_with("umount")).collect();
    // bare top-level unmount from the plan, then the three subvolume mounts unwound
    assert_eq!(unmounts.len(), 4);
    assert_eq!(unmounts[1].as_str(), "umount /mnt/.snapshots");
    assert_eq!(unmounts[3].as_str(), "umount /mnt");
}
