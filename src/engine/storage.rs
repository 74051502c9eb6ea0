//! Storage Stack Engine
//!
//! Translates a partitioning mode plus the probed state of the target disk
//! into an ordered sequence of atomic `StorageOp` operations that
//! `engine::apply` can execute.
//!
//! # Supported Modes
//!
//! | Mode       | Operations Generated |
//! |------------|----------------------|
//! | EntireDisk | Wipe → Label → ESP + root → Rescan → Format → Subvolumes → Mount |
//! | FreeSpace  | [ESP] + root in the trailing gap → Rescan → Format → Subvolumes → Mount |
//! | Manual     | (operator ran cfdisk) → Format → Subvolumes → Mount |
//!
//! # Design
//!
//! - **Pure logic**: No I/O, no side effects. Probing happens before, in
//!   `engine::probe`, and its result is passed in.
//! - **Typed output**: Each `StorageOp` maps directly to a `ToolArgs` struct
//!   or an `Executor` file operation.
//! - **Naming before formatting**: every partition device path is computed
//!   by `partition_path` when the plan is built, so no format or mount op can
//!   see an unfixed name.
//!
//! # Mount Protocol
//!
//! ```text
//! mount ROOT TARGET                      (top level, no options)
//! btrfs subvolume create TARGET/@...     (every subvolume in the set)
//! umount TARGET
//! mount -o ...,subvol=@ ROOT TARGET
//! mkdir TARGET/home TARGET/.snapshots ...
//! mount -o ...,subvol=@home ROOT TARGET/home ...
//! mkdir TARGET/boot/efi; mount ESP TARGET/boot/efi
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use crate::engine::probe::{DiskLayout, ManualLayout};
use crate::error::{InstallError, Result};
use crate::tools::disk::{PartBound, PartitionTable};
use crate::types::{Filesystem, PartitionMode, SubvolumeLayout};

/// Size of a newly created EFI System Partition.
pub const ESP_SIZE_MIB: u64 = 512;

/// Offset of the first partition on a freshly labelled disk.
pub const FIRST_PARTITION_START_MIB: u64 = 1;

/// Free-space mode refuses to install into a smaller gap.
pub const MIN_FREE_SPACE_MIB: u64 = 2048;

/// Options shared by every subvolume mount; `subvol=` is appended.
pub const BTRFS_MOUNT_OPTIONS: &str = "noatime,compress=zstd";

/// ESP mount point, relative to the target root.
pub const EFI_MOUNT_DIR: &str = "boot/efi";

pub const EFI_PARTITION_NAME: &str = "ESP";
pub const ROOT_PARTITION_NAME: &str = "root";
pub const EFI_LABEL: &str = "EFI";
pub const ROOT_LABEL: &str = "ARCH";

// ============================================================================
// Subvolume Sets
// ============================================================================

/// A btrfs subvolume and where it is mounted inside the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subvolume {
    pub name: &'static str,
    pub mountpoint: &'static str,
}

const FULL_SUBVOLUMES: &[Subvolume] = &[
    Subvolume { name: "@", mountpoint: "/" },
    Subvolume { name: "@home", mountpoint: "/home" },
    Subvolume { name: "@var", mountpoint: "/var" },
    Subvolume { name: "@tmp", mountpoint: "/tmp" },
    Subvolume { name: "@snapshots", mountpoint: "/.snapshots" },
];

const TURBO_SUBVOLUMES: &[Subvolume] = &[
    Subvolume { name: "@", mountpoint: "/" },
    Subvolume { name: "@home", mountpoint: "/home" },
    Subvolume { name: "@snapshots", mountpoint: "/.snapshots" },
];

/// The fixed subvolume set for `layout`. The first entry is always `@` → `/`.
pub fn subvolumes(layout: SubvolumeLayout) -> &'static [Subvolume] {
    match layout {
        SubvolumeLayout::Full => FULL_SUBVOLUMES,
        SubvolumeLayout::Turbo => TURBO_SUBVOLUMES,
    }
}

/// Mount options for one subvolume.
pub fn subvolume_options(name: &str) -> String {
    format!("{},subvol={}", BTRFS_MOUNT_OPTIONS, name)
}

// ============================================================================
// Partition Naming
// ============================================================================

/// Device path of partition `number` on `disk`.
///
/// Disk names ending in a digit (`nvme0n1`, `mmcblk0`, `loop0`) take a `p`
/// infix; `sda`/`vda` style names take the bare number.
pub fn partition_path(disk: &Path, number: u32) -> PathBuf {
    let disk = disk.to_string_lossy();
    let needs_infix = disk.chars().last().map(|c| c.is_ascii_digit()).unwrap_or(false);
    if needs_infix {
        PathBuf::from(format!("{}p{}", disk, number))
    } else {
        PathBuf::from(format!("{}{}", disk, number))
    }
}

/// `mountpoint` ("/home") placed under `target` ("/mnt").
fn under(target: &Path, mountpoint: &str) -> PathBuf {
    let relative = mountpoint.trim_start_matches('/');
    if relative.is_empty() {
        target.to_path_buf()
    } else {
        target.join(relative)
    }
}

// ============================================================================
// Storage Operation Types
// ============================================================================

/// A single atomic storage operation in the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOp {
    /// Destroy existing partition tables (sgdisk --zap-all)
    WipeDisk { disk: PathBuf },

    /// Write a fresh GPT label (parted mklabel gpt)
    CreatePartitionTable { disk: PathBuf },

    /// Create one partition (parted mkpart)
    CreatePartition {
        disk: PathBuf,
        table: PartitionTable,
        number: u32,
        name: String,
        fs_hint: Filesystem,
        start: PartBound,
        end: PartBound,
    },

    /// Mark a partition as ESP (parted set N esp on)
    SetEspFlag { disk: PathBuf, number: u32 },

    /// Make the kernel re-read the table (partprobe)
    RescanPartitions { disk: PathBuf },

    /// Format a partition
    FormatFs {
        device: PathBuf,
        filesystem: Filesystem,
        label: String,
    },

    /// Mount a device at a mountpoint
    Mount {
        device: PathBuf,
        mountpoint: PathBuf,
        /// Optional mount options (e.g., "noatime,compress=zstd,subvol=@")
        options: Option<String>,
    },

    /// Create a btrfs subvolume under a mounted top level
    CreateSubvolume { path: PathBuf },

    /// Unmount a mountpoint
    Unmount { mountpoint: PathBuf },

    /// Create a mount-point directory
    CreateDir { path: PathBuf },
}

impl StorageOp {
    /// True for operations that change the partition table or erase data.
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            Self::WipeDisk { .. }
                | Self::CreatePartitionTable { .. }
                | Self::CreatePartition { .. }
                | Self::SetEspFlag { .. }
                | Self::FormatFs { .. }
        )
    }
}

impl fmt::Display for StorageOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WipeDisk { disk } => write!(f, "WipeDisk({})", disk.display()),
            Self::CreatePartitionTable { disk } => write!(f, "CreateGpt({})", disk.display()),
            Self::CreatePartition { disk, number, name, fs_hint, start, end, .. } => write!(
                f,
                "CreatePartition({} #{} '{}' {} {}..{})",
                disk.display(),
                number,
                name,
                fs_hint,
                start,
                end
            ),
            Self::SetEspFlag { disk, number } => {
                write!(f, "SetEspFlag({} #{})", disk.display(), number)
            }
            Self::RescanPartitions { disk } => write!(f, "Rescan({})", disk.display()),
            Self::FormatFs { device, filesystem, label } => {
                write!(f, "FormatFs({}, fs={}, label={})", device.display(), filesystem, label)
            }
            Self::Mount { device, mountpoint, options } => write!(
                f,
                "Mount({} -> {}, opts={})",
                device.display(),
                mountpoint.display(),
                options.as_deref().unwrap_or("-")
            ),
            Self::CreateSubvolume { path } => write!(f, "CreateSubvolume({})", path.display()),
            Self::Unmount { mountpoint } => write!(f, "Unmount({})", mountpoint.display()),
            Self::CreateDir { path } => write!(f, "CreateDir({})", path.display()),
        }
    }
}

/// The EFI System Partition a plan will mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EfiPartition {
    pub device: PathBuf,
    /// False when an existing ESP is reused as-is.
    pub format: bool,
}

/// A complete storage plan: an ordered list of operations plus the
/// partition devices it produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePlan {
    /// Ordered sequence of storage operations
    pub ops: Vec<StorageOp>,
    pub mode: PartitionMode,
    pub layout: SubvolumeLayout,
    /// Target disk
    pub disk: PathBuf,
    pub efi: Option<EfiPartition>,
    pub root: PathBuf,
    /// Mount root of the new system
    pub target: PathBuf,
}

impl StoragePlan {
    /// Returns true if this plan includes destructive operations.
    pub fn is_destructive(&self) -> bool {
        self.ops.iter().any(StorageOp::is_destructive)
    }

    /// Mountpoints in the order the plan mounts them (the bare top-level
    /// mount excluded, since it is unmounted again).
    pub fn final_mountpoints(&self) -> Vec<PathBuf> {
        let mut mounted: Vec<PathBuf> = Vec::new();
        for op in &self.ops {
            match op {
                StorageOp::Mount { mountpoint, .. } => mounted.push(mountpoint.clone()),
                StorageOp::Unmount { mountpoint } => mounted.retain(|m| m != mountpoint),
                _ => {}
            }
        }
        mounted
    }

    /// Returns a summary of the plan for logging/display.
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Storage Plan: {}", self.mode.label()),
            format!("  Target disk: {}", self.disk.display()),
            format!(
                "  EFI: {}",
                self.efi
                    .as_ref()
                    .map(|e| {
                        let action = if e.format { "format" } else { "reuse" };
                        format!("{} ({})", e.device.display(), action)
                    })
                    .unwrap_or_else(|| "none".to_string())
            ),
            format!("  Root: {} (btrfs, {:?} subvolumes)", self.root.display(), self.layout),
            format!("  Mount root: {}", self.target.display()),
            format!("  Operations ({}):", self.ops.len()),
        ];
        for (i, op) in self.ops.iter().enumerate() {
            lines.push(format!("    {}. {}", i + 1, op));
        }
        lines.join("\n")
    }
}

// ============================================================================
// Plan Calculation
// ============================================================================

/// What the planner knows about the disk for the chosen mode.
#[derive(Debug, Clone)]
pub enum StorageInput {
    /// Nothing to probe: the disk is wiped.
    EntireDisk,
    /// Current layout from `probe_layout`.
    FreeSpace(DiskLayout),
    /// Partitions detected after the operator's cfdisk session.
    Manual(ManualLayout),
}

impl StorageInput {
    pub fn mode(&self) -> PartitionMode {
        match self {
            Self::EntireDisk => PartitionMode::EntireDisk,
            Self::FreeSpace(_) => PartitionMode::FreeSpace,
            Self::Manual(_) => PartitionMode::Manual,
        }
    }
}

/// Calculate the storage operation plan.
///
/// # Errors
///
/// - `Validation` if `disk` is not a `/dev/` path
/// - `Precondition` in free-space mode when the disk has no gpt or msdos
///   table, the table has no free partition slot, or the trailing gap is
///   under `MIN_FREE_SPACE_MIB`
///
/// # What This Explicitly Refuses To Do
///
/// - Executing anything: This is pure plan generation. No I/O.
/// - Shrinking or moving existing partitions.
pub fn calculate_storage_plan(
    disk: &Path,
    input: &StorageInput,
    layout: SubvolumeLayout,
    target: &Path,
) -> Result<StoragePlan> {
    if !disk.starts_with("/dev/") || disk == Path::new("/dev/") {
        return Err(InstallError::validation(format!(
            "invalid disk path '{}', must be a device under /dev/",
            disk.display()
        )));
    }

    match input {
        StorageInput::EntireDisk => Ok(plan_entire_disk(disk, layout, target)),
        StorageInput::FreeSpace(probed) => plan_free_space(disk, probed, layout, target),
        StorageInput::Manual(detected) => Ok(plan_manual(disk, detected, layout, target)),
    }
}

/// Plan: wipe and use the whole disk.
///
/// ```text
/// DISK1 / DISKp1 - ESP  1MiB..513MiB  FAT32 "EFI"
/// DISK2 / DISKp2 - root 513MiB..100%  btrfs "ARCH"
/// ```
fn plan_entire_disk(disk: &Path, layout: SubvolumeLayout, target: &Path) -> StoragePlan {
    let esp_end = FIRST_PARTITION_START_MIB + ESP_SIZE_MIB;
    let disk_buf = disk.to_path_buf();

    let mut ops = vec![
        StorageOp::WipeDisk { disk: disk_buf.clone() },
        StorageOp::CreatePartitionTable { disk: disk_buf.clone() },
        StorageOp::CreatePartition {
            disk: disk_buf.clone(),
            table: PartitionTable::Gpt,
            number: 1,
            name: EFI_PARTITION_NAME.to_string(),
            fs_hint: Filesystem::Fat32,
            start: PartBound::Mib(FIRST_PARTITION_START_MIB),
            end: PartBound::Mib(esp_end),
        },
        StorageOp::SetEspFlag { disk: disk_buf.clone(), number: 1 },
        StorageOp::CreatePartition {
            disk: disk_buf.clone(),
            table: PartitionTable::Gpt,
            number: 2,
            name: ROOT_PARTITION_NAME.to_string(),
            fs_hint: Filesystem::Btrfs,
            start: PartBound::Mib(esp_end),
            end: PartBound::End,
        },
        StorageOp::RescanPartitions { disk: disk_buf.clone() },
    ];

    let efi = EfiPartition {
        device: partition_path(disk, 1),
        format: true,
    };
    let root = partition_path(disk, 2);
    push_format_and_mount(&mut ops, Some(&efi), &root, layout, target);

    StoragePlan {
        ops,
        mode: PartitionMode::EntireDisk,
        layout,
        disk: disk_buf,
        efi: Some(efi),
        root,
        target: target.to_path_buf(),
    }
}

/// Plan: install into the unallocated tail of the disk.
fn plan_free_space(
    disk: &Path,
    probed: &DiskLayout,
    layout: SubvolumeLayout,
    target: &Path,
) -> Result<StoragePlan> {
    if !probed.has_partition_table() {
        return Err(InstallError::precondition(format!(
            "{} has no partition table; free-space mode needs an existing table",
            disk.display()
        )));
    }
    let table = probed.partition_table().ok_or_else(|| {
        InstallError::precondition(format!(
            "{} has a {} partition table; free-space mode supports gpt and msdos",
            disk.display(),
            probed.table.as_deref().unwrap_or("unknown")
        ))
    })?;

    let start = probed.free_region_start_mib();
    let available = probed.available_mib();
    if available < MIN_FREE_SPACE_MIB {
        return Err(InstallError::precondition(format!(
            "only {} MiB free at the end of {} (need at least {} MiB)",
            available,
            disk.display(),
            MIN_FREE_SPACE_MIB
        )));
    }

    let existing_esp = probed.existing_esp();
    let needed = if existing_esp.is_some() { 1 } else { 2 };
    let numbers = probed.free_partition_numbers(needed);
    if numbers.len() < needed {
        return Err(InstallError::precondition(format!(
            "{} needs {} free partition slot(s) on its {} table, found {}",
            disk.display(),
            needed,
            table,
            numbers.len()
        )));
    }
    let mut slots = numbers.into_iter();
    let mut next_slot = || {
        slots
            .next()
            .ok_or_else(|| InstallError::precondition("partition slots exhausted"))
    };

    let disk_buf = disk.to_path_buf();
    let mut ops = Vec::new();

    let (efi, root_start) = match existing_esp {
        Some(existing) => (
            EfiPartition {
                device: partition_path(disk, existing.number),
                format: false,
            },
            start,
        ),
        None => {
            let number = next_slot()?;
            let esp_end = start + ESP_SIZE_MIB;
            ops.push(StorageOp::CreatePartition {
                disk: disk_buf.clone(),
                table,
                number,
                name: EFI_PARTITION_NAME.to_string(),
                fs_hint: Filesystem::Fat32,
                start: PartBound::Mib(start),
                end: PartBound::Mib(esp_end),
            });
            ops.push(StorageOp::SetEspFlag { disk: disk_buf.clone(), number });
            let efi = EfiPartition {
                device: partition_path(disk, number),
                format: true,
            };
            (efi, esp_end)
        }
    };

    let number = next_slot()?;
    ops.push(StorageOp::CreatePartition {
        disk: disk_buf.clone(),
        table,
        number,
        name: ROOT_PARTITION_NAME.to_string(),
        fs_hint: Filesystem::Btrfs,
        start: PartBound::Mib(root_start),
        end: PartBound::End,
    });
    ops.push(StorageOp::RescanPartitions { disk: disk_buf.clone() });

    let root = partition_path(disk, number);
    push_format_and_mount(&mut ops, Some(&efi), &root, layout, target);

    Ok(StoragePlan {
        ops,
        mode: PartitionMode::FreeSpace,
        layout,
        disk: disk_buf,
        efi: Some(efi),
        root,
        target: target.to_path_buf(),
    })
}

/// Plan: use what the operator created in cfdisk.
///
/// An ESP that already carries a filesystem is mounted as-is.
fn plan_manual(
    disk: &Path,
    detected: &ManualLayout,
    layout: SubvolumeLayout,
    target: &Path,
) -> StoragePlan {
    let efi = detected.efi.as_ref().map(|p| EfiPartition {
        device: p.path.clone(),
        format: p.fstype.is_none(),
    });
    let root = detected.root.path.clone();

    let mut ops = Vec::new();
    push_format_and_mount(&mut ops, efi.as_ref(), &root, layout, target);

    StoragePlan {
        ops,
        mode: PartitionMode::Manual,
        layout,
        disk: disk.to_path_buf(),
        efi,
        root,
        target: target.to_path_buf(),
    }
}

/// Shared tail: format, create subvolumes, mount everything.
fn push_format_and_mount(
    ops: &mut Vec<StorageOp>,
    efi: Option<&EfiPartition>,
    root: &Path,
    layout: SubvolumeLayout,
    target: &Path,
) {
    if let Some(efi) = efi.filter(|e| e.format) {
        ops.push(StorageOp::FormatFs {
            device: efi.device.clone(),
            filesystem: Filesystem::Fat32,
            label: EFI_LABEL.to_string(),
        });
    }
    ops.push(StorageOp::FormatFs {
        device: root.to_path_buf(),
        filesystem: Filesystem::Btrfs,
        label: ROOT_LABEL.to_string(),
    });

    let set = subvolumes(layout);

    // Top level mounted bare at the scratch point
    ops.push(StorageOp::CreateDir { path: target.to_path_buf() });
    ops.push(StorageOp::Mount {
        device: root.to_path_buf(),
        mountpoint: target.to_path_buf(),
        options: None,
    });
    for sub in set {
        ops.push(StorageOp::CreateSubvolume { path: target.join(sub.name) });
    }
    ops.push(StorageOp::Unmount { mountpoint: target.to_path_buf() });

    let (top, children) = match set.split_first() {
        Some(split) => split,
        None => return,
    };
    ops.push(StorageOp::Mount {
        device: root.to_path_buf(),
        mountpoint: under(target, top.mountpoint),
        options: Some(subvolume_options(top.name)),
    });
    for sub in children {
        ops.push(StorageOp::CreateDir { path: under(target, sub.mountpoint) });
    }
    for sub in children {
        ops.push(StorageOp::Mount {
            device: root.to_path_buf(),
            mountpoint: under(target, sub.mountpoint),
            options: Some(subvolume_options(sub.name)),
        });
    }

    if let Some(efi) = efi {
        let efi_dir = target.join(EFI_MOUNT_DIR);
        ops.push(StorageOp::CreateDir { path: efi_dir.clone() });
        ops.push(StorageOp::Mount {
            device: efi.device.clone(),
            mountpoint: efi_dir,
            options: None,
        });
    }
}

// ============================================================================
// Tests
// ============================================================================
