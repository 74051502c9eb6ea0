//! Type-safe arguments for mounting and btrfs subvolume management.

use std::path::PathBuf;

use super::path_arg;
use crate::tool_args::ToolArgs;

/// `mount [-o OPTIONS] DEVICE TARGET`
#[derive(Debug, Clone)]
pub struct MountArgs {
    pub device: PathBuf,
    pub target: PathBuf,
    pub options: Option<String>,
}

impl ToolArgs for MountArgs {
    fn program(&self) -> &'static str {
        "mount"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(ref options) = self.options {
            args.push("-o".to_string());
            args.push(options.clone());
        }
        args.push(path_arg(&self.device));
        args.push(path_arg(&self.target));
        args
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

/// `umount [-R] TARGET`
#[derive(Debug, Clone)]
pub struct UmountArgs {
    pub target: PathBuf,
    pub recursive: bool,
}

impl ToolArgs for UmountArgs {
    fn program(&self) -> &'static str {
        "umount"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.recursive {
            args.push("-R".to_string());
        }
        args.push(path_arg(&self.target));
        args
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

/// `btrfs subvolume create PATH`
#[derive(Debug, Clone)]
pub struct BtrfsSubvolumeCreateArgs {
    pub path: PathBuf,
}

impl ToolArgs for BtrfsSubvolumeCreateArgs {
    fn program(&self) -> &'static str {
        "btrfs"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "subvolume".to_string(),
            "create".to_string(),
            path_arg(&self.path),
        ]
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_with_options() {
        let args = MountArgs {
            device: PathBuf::from("/dev/sda2"),
            target: PathBuf::from("/mnt/home"),
            options: Some("noatime,compress=zstd,subvol=@home".to_string()),
        };
        assert_eq!(
            args.to_command().command_line(),
            "mount -o noatime,compress=zstd,subvol=@home /dev/sda2 /mnt/home"
        );
    }

    #[test]
    fn test_mount_without_options() {
        let args = MountArgs {
            device: PathBuf::from("/dev/sda1"),
            target: PathBuf::from("/mnt/boot/efi"),
            options: None,
        };
        assert_eq!(args.to_cli_args(), vec!["/dev/sda1", "/mnt/boot/efi"]);
    }

    #[test]
    fn test_umount_recursive() {
        let args = UmountArgs {
            target: PathBuf::from("/mnt"),
            recursive: true,
        };
        assert_eq!(args.to_command().command_line(), "umount -R /mnt");
    }

    #[test]
    fn test_subvolume_create() {
        let args = BtrfsSubvolumeCreateArgs {
            path: PathBuf::from("/mnt/@snapshots"),
        };
        assert_eq!(
            args.to_command().command_line(),
            "btrfs subvolume create /mnt/@snapshots"
        );
    }
}
