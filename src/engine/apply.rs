//! Storage plan execution.
//!
//! Runs a `StoragePlan` op by op through an `Executor`, keeping a ledger of
//! every mount it made. The ledger becomes the returned `MountedTarget`,
//! which later phases use and which rollback unwinds.
//!
//! # Failure Policy
//!
//! The first failing op stops execution. Every mount made so far is then
//! unmounted newest first and the original error is returned. Partitions
//! and filesystems already written are not undone.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::engine::storage::{StorageOp, StoragePlan};
use crate::error::Result;
use crate::tool_runner::{run_checked, Executor};
use crate::tools::disk::{
    MkfsArgs, MklabelArgs, MkpartArgs, PartprobeArgs, SetEspFlagArgs, WipeDiskArgs,
};
use crate::tools::mount::{BtrfsSubvolumeCreateArgs, MountArgs, UmountArgs};

/// The mounted target system produced by `apply_plan`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountedTarget {
    /// Mount root of the new system (usually `/mnt`)
    pub root: PathBuf,
    pub disk: PathBuf,
    /// ESP device, if the plan has one
    pub efi: Option<PathBuf>,
    /// Live mountpoints, oldest first
    mounts: Vec<PathBuf>,
}

impl MountedTarget {
    /// A target whose mounts are managed elsewhere (post-install on a
    /// running system, tests).
    pub fn unmanaged(root: impl Into<PathBuf>, disk: impl Into<PathBuf>, efi: Option<PathBuf>) -> Self {
        Self {
            root: root.into(),
            disk: disk.into(),
            efi,
            mounts: Vec::new(),
        }
    }

    pub fn mounts(&self) -> &[PathBuf] {
        &self.mounts
    }

    /// Path inside the target, e.g. `path("etc/fstab")`.
    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        let relative = relative.as_ref();
        self.root
            .join(relative.strip_prefix("/").unwrap_or(relative))
    }

    /// Unmount everything in reverse order.
    ///
    /// Keeps going past failures and returns the first error.
    pub fn unmount_all(&mut self, exec: &dyn Executor) -> Result<()> {
        unwind(exec, &mut self.mounts)
    }
}

fn unwind(exec: &dyn Executor, mounts: &mut Vec<PathBuf>) -> Result<()> {
    let mut result = Ok(());
    while let Some(target) = mounts.pop() {
        debug!("Unmounting {}", target.display());
        let args = UmountArgs {
            target: target.clone(),
            recursive: false,
        };
        if let Err(e) = run_checked(exec, &args) {
            warn!("Unable to umount {}: {}", target.display(), e);
            if result.is_ok() {
                result = Err(e);
            }
        }
    }
    result
}

/// Execute one op. Mount bookkeeping is done by the caller.
fn apply_op(exec: &dyn Executor, op: &StorageOp) -> Result<()> {
    match op {
        StorageOp::WipeDisk { disk } => {
            run_checked(exec, &WipeDiskArgs { device: disk.clone() })?;
        }
        StorageOp::CreatePartitionTable { disk } => {
            run_checked(exec, &MklabelArgs { device: disk.clone() })?;
        }
        StorageOp::CreatePartition { disk, table, name, fs_hint, start, end, .. } => {
            run_checked(
                exec,
                &MkpartArgs {
                    device: disk.clone(),
                    table: *table,
                    name: name.clone(),
                    fs_hint: *fs_hint,
                    start: *start,
                    end: *end,
                },
            )?;
        }
        StorageOp::SetEspFlag { disk, number } => {
            run_checked(
                exec,
                &SetEspFlagArgs {
                    device: disk.clone(),
                    number: *number,
                },
            )?;
        }
        StorageOp::RescanPartitions { disk } => {
            run_checked(exec, &PartprobeArgs { device: disk.clone() })?;
        }
        StorageOp::FormatFs { device, filesystem, label } => {
            run_checked(
                exec,
                &MkfsArgs {
                    device: device.clone(),
                    filesystem: *filesystem,
                    label: label.clone(),
                },
            )?;
        }
        StorageOp::Mount { device, mountpoint, options } => {
            run_checked(
                exec,
                &MountArgs {
                    device: device.clone(),
                    target: mountpoint.clone(),
                    options: options.clone(),
                },
            )?;
        }
        StorageOp::CreateSubvolume { path } => {
            run_checked(exec, &BtrfsSubvolumeCreateArgs { path: path.clone() })?;
        }
        StorageOp::Unmount { mountpoint } => {
            run_checked(
                exec,
                &UmountArgs {
                    target: mountpoint.clone(),
                    recursive: false,
                },
            )?;
        }
        StorageOp::CreateDir { path } => exec.create_dir_all(path)?,
    }
    Ok(())
}

/// Execute `plan` and return the mounted target.
pub fn apply_plan(exec: &dyn Executor, plan: &StoragePlan) -> Result<MountedTarget> {
    info!(
        "Applying storage plan for {} ({} ops)",
        plan.disk.display(),
        plan.ops.len()
    );

    let mut mounts: Vec<PathBuf> = Vec::new();
    for (i, op) in plan.ops.iter().enumerate() {
        debug!("[{}/{}] {}", i + 1, plan.ops.len(), op);
        if let Err(e) = apply_op(exec, op) {
            warn!("Storage op '{}' failed: {}", op, e);
            if !mounts.is_empty() {
                warn!("Rolling back {} mount(s)", mounts.len());
                // the original error wins over unmount failures
                let _ = unwind(exec, &mut mounts);
            }
            return Err(e);
        }
        match op {
            StorageOp::Mount { mountpoint, .. } => mounts.push(mountpoint.clone()),
            StorageOp::Unmount { mountpoint } => {
                if let Some(pos) = mounts.iter().rposition(|m| m == mountpoint) {
                    mounts.remove(pos);
                }
            }
            _ => {}
        }
    }

    info!("Target mounted at {}", plan.target.display());
    Ok(MountedTarget {
        root: plan.target.clone(),
        disk: plan.disk.clone(),
        efi: plan.efi.as_ref().map(|e| e.device.clone()),
        mounts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::storage::{calculate_storage_plan, StorageInput};
    use crate::tool_runner::RecordingExecutor;
    use crate::types::SubvolumeLayout;

    fn entire_disk_plan(disk: &str) -> StoragePlan {
        calculate_storage_plan(
            Path::new(disk),
            &StorageInput::EntireDisk,
            SubvolumeLayout::Turbo,
            Path::new("/mnt"),
        )
        .expect("plan")
    }

    #[test]
    fn test_apply_records_commands_in_order() {
        let exec = RecordingExecutor::new();
        let target = apply_plan(&exec, &entire_disk_plan("/dev/sda")).expect("apply");

        let commands = exec.commands();
        assert_eq!(commands[0], "sgdisk --zap-all /dev/sda");
        assert_eq!(commands[1], "parted -s /dev/sda mklabel gpt");
        assert!(commands.contains(&"mkfs.fat -F 32 -n EFI /dev/sda1".to_string()));
        assert!(commands.contains(&"mkfs.btrfs -f -L ARCH /dev/sda2".to_string()));
        assert!(exec.created_dir("/mnt/home"));
        assert_eq!(
            target.mounts(),
            &[
                PathBuf::from("/mnt"),
                PathBuf::from("/mnt/home"),
                PathBuf::from("/mnt/.snapshots"),
                PathBuf::from("/mnt/boot/efi"),
            ]
        );
        assert_eq!(target.efi, Some(PathBuf::from("/dev/sda1")));
    }

    #[test]
    fn test_failure_unmounts_in_reverse() {
        let exec = RecordingExecutor::new().fail_on("subvol=@snapshots", 32, "mount failed");
        let err = apply_plan(&exec, &entire_disk_plan("/dev/vda")).expect_err("should fail");
        assert!(err.to_string().contains("mount"));

        let commands = exec.commands();
        let tail: Vec<_> = commands.iter().rev().take(2).rev().cloned().collect();
        assert_eq!(tail, vec!["umount /mnt/home", "umount /mnt"]);
    }

    #[test]
    fn test_format_failure_before_mounts_has_nothing_to_unwind() {
        let exec = RecordingExecutor::new().fail_on("mkfs.btrfs", 1, "device busy");
        assert!(apply_plan(&exec, &entire_disk_plan("/dev/sda")).is_err());
        assert!(!exec.commands().iter().any(|c| c.starts_with("umount")));
        assert!(!exec.commands().iter().any(|c| c.starts_with("mount")));
    }

    #[test]
    fn test_unmount_all_reverse_order() {
        let exec = RecordingExecutor::new();
        let mut target = apply_plan(&exec, &entire_disk_plan("/dev/sda")).expect("apply");
        target.unmount_all(&exec).expect("unmount");
        let commands = exec.commands();
        let n = commands.len();
        assert_eq!(commands[n - 4], "umount /mnt/boot/efi");
        assert_eq!(commands[n - 1], "umount /mnt");
        assert!(target.mounts().is_empty());
    }

    #[test]
    fn test_target_path_strips_leading_slash() {
        let target = MountedTarget::unmanaged("/mnt", "/dev/sda", None);
        assert_eq!(target.path("/etc/fstab"), PathBuf::from("/mnt/etc/fstab"));
        assert_eq!(target.path("etc/hostname"), PathBuf::from("/mnt/etc/hostname"));
    }
}
