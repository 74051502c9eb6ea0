//! Typed argument structs for every external program archsetup runs.
//!
//! | Module     | Programs |
//! |------------|----------|
//! | `disk`     | sgdisk, parted, partprobe, mkfs.*, cfdisk, lsblk |
//! | `mount`    | mount, umount, btrfs subvolume |
//! | `system`   | pacstrap, genfstab, ln, hwclock, locale-gen, mkinitcpio, grub, systemctl |
//! | `packages` | pacman, reflector, curl, git |
//! | `user`     | useradd, chpasswd, passwd, usermod, chsh, chown, sudo -u |

pub mod disk;
pub mod mount;
pub mod packages;
pub mod system;
pub mod user;

use std::path::Path;

/// Render a path argument.
pub(crate) fn path_arg(path: &Path) -> String {
    path.display().to_string()
}
