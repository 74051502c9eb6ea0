//! Type-safe arguments for base-system bootstrap and configuration.
//!
//! Everything except `pacstrap` and `genfstab` is meant to run inside the
//! target via `ToolCommand::in_chroot`.

use std::path::PathBuf;

use super::path_arg;
use crate::tool_args::{OutputMode, ToolArgs};

/// `pacstrap -K ROOT PACKAGES...`
///
/// `-K` initialises an empty pacman keyring in the target.
#[derive(Debug, Clone)]
pub struct PacstrapArgs {
    pub root: PathBuf,
    pub packages: Vec<String>,
}

impl ToolArgs for PacstrapArgs {
    fn program(&self) -> &'static str {
        "pacstrap"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec!["-K".to_string(), path_arg(&self.root)];
        args.extend(self.packages.iter().cloned());
        args
    }

    fn is_destructive(&self) -> bool {
        true
    }

    fn output_mode(&self) -> OutputMode {
        OutputMode::Stream
    }
}

/// `genfstab -U ROOT`: fstab entries keyed by UUID, on stdout.
#[derive(Debug, Clone)]
pub struct GenfstabArgs {
    pub root: PathBuf,
}

impl ToolArgs for GenfstabArgs {
    fn program(&self) -> &'static str {
        "genfstab"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-U".to_string(), path_arg(&self.root)]
    }

    fn is_destructive(&self) -> bool {
        false
    }
}

/// `ln -sf /usr/share/zoneinfo/ZONE /etc/localtime`
#[derive(Debug, Clone)]
pub struct LinkTimezoneArgs {
    pub timezone: String,
}

impl ToolArgs for LinkTimezoneArgs {
    fn program(&self) -> &'static str {
        "ln"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-sf".to_string(),
            format!("/usr/share/zoneinfo/{}", self.timezone),
            "/etc/localtime".to_string(),
        ]
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

/// `hwclock --systohc`
#[derive(Debug, Clone, Default)]
pub struct HwclockArgs;

impl ToolArgs for HwclockArgs {
    fn program(&self) -> &'static str {
        "hwclock"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["--systohc".to_string()]
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

/// `locale-gen`
#[derive(Debug, Clone, Default)]
pub struct LocaleGenArgs;

impl ToolArgs for LocaleGenArgs {
    fn program(&self) -> &'static str {
        "locale-gen"
    }

    fn to_cli_args(&self) -> Vec<String> {
        Vec::new()
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

/// `mkinitcpio -P`: rebuild every preset.
#[derive(Debug, Clone, Default)]
pub struct MkinitcpioArgs;

impl ToolArgs for MkinitcpioArgs {
    fn program(&self) -> &'static str {
        "mkinitcpio"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-P".to_string()]
    }

    fn is_destructive(&self) -> bool {
        true
    }

    fn output_mode(&self) -> OutputMode {
        OutputMode::Stream
    }
}

/// Where GRUB is installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootTarget {
    /// `--target=x86_64-efi --efi-directory=DIR --bootloader-id=GRUB`
    Uefi { efi_directory: PathBuf },
    /// `--target=i386-pc DISK`
    Bios { disk: PathBuf },
}

/// `grub-install` for either firmware flavour.
#[derive(Debug, Clone)]
pub struct GrubInstallArgs {
    pub target: BootTarget,
}

impl ToolArgs for GrubInstallArgs {
    fn program(&self) -> &'static str {
        "grub-install"
    }

    fn to_cli_args(&self) -> Vec<String> {
        match &self.target {
            BootTarget::Uefi { efi_directory } => vec![
                "--target=x86_64-efi".to_string(),
                format!("--efi-directory={}", efi_directory.display()),
                "--bootloader-id=GRUB".to_string(),
            ],
            BootTarget::Bios { disk } => {
                vec!["--target=i386-pc".to_string(), path_arg(disk)]
            }
        }
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

/// `grub-mkconfig -o /boot/grub/grub.cfg`
#[derive(Debug, Clone, Default)]
pub struct GrubMkconfigArgs;

impl ToolArgs for GrubMkconfigArgs {
    fn program(&self) -> &'static str {
        "grub-mkconfig"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-o".to_string(), "/boot/grub/grub.cfg".to_string()]
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

/// `systemctl enable [--now] UNITS...`
#[derive(Debug, Clone)]
pub struct SystemctlEnableArgs {
    pub units: Vec<String>,
    /// Start immediately as well. Meaningless inside a chroot.
    pub now: bool,
}

impl ToolArgs for SystemctlEnableArgs {
    fn program(&self) -> &'static str {
        "systemctl"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec!["enable".to_string()];
        if self.now {
            args.push("--now".to_string());
        }
        args.extend(self.units.iter().cloned());
        args
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

/// `systemctl daemon-reload`
#[derive(Debug, Clone, Default)]
pub struct DaemonReloadArgs;

impl ToolArgs for DaemonReloadArgs {
    fn program(&self) -> &'static str {
        "systemctl"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["daemon-reload".to_string()]
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

/// `fc-cache -f`
#[derive(Debug, Clone, Default)]
pub struct FcCacheArgs;

impl ToolArgs for FcCacheArgs {
    fn program(&self) -> &'static str {
        "fc-cache"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-f".to_string()]
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pacstrap_streams_output() {
        let args = PacstrapArgs {
            root: PathBuf::from("/mnt"),
            packages: vec!["base".to_string(), "linux".to_string()],
        };
        assert_eq!(args.to_command().command_line(), "pacstrap -K /mnt base linux");
        assert_eq!(args.output_mode(), OutputMode::Stream);
    }

    #[test]
    fn test_grub_install_uefi() {
        let args = GrubInstallArgs {
            target: BootTarget::Uefi {
                efi_directory: PathBuf::from("/boot/efi"),
            },
        };
        assert_eq!(
            args.to_command().command_line(),
            "grub-install --target=x86_64-efi --efi-directory=/boot/efi --bootloader-id=GRUB"
        );
    }

    #[test]
    fn test_grub_install_bios() {
        let args = GrubInstallArgs {
            target: BootTarget::Bios {
                disk: PathBuf::from("/dev/sda"),
            },
        };
        assert_eq!(args.to_cli_args(), vec!["--target=i386-pc", "/dev/sda"]);
    }

    #[test]
    fn test_timezone_link_in_chroot() {
        let cmd = LinkTimezoneArgs {
            timezone: "Europe/Berlin".to_string(),
        }
        .to_command()
        .in_chroot(&PathBuf::from("/mnt"));
        assert_eq!(
            cmd.command_line(),
            "arch-chroot /mnt ln -sf /usr/share/zoneinfo/Europe/Berlin /etc/localtime"
        );
    }

    #[test]
    fn test_systemctl_enable_now() {
        let args = SystemctlEnableArgs {
            units: vec!["libvirtd.service".to_string()],
            now: true,
        };
        assert_eq!(args.to_cli_args(), vec!["enable", "--now", "libvirtd.service"]);
    }

    #[test]
    fn test_genfstab_is_read_only() {
        let args = GenfstabArgs {
            root: PathBuf::from("/mnt"),
        };
        assert!(!args.is_destructive());
        assert_eq!(args.to_cli_args(), vec!["-U", "/mnt"]);
    }
}
