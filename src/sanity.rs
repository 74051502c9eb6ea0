//! Pre-flight sanity checks for runtime environment
//!
//! This module verifies the system environment before anything runs:
//! - Required runtime binaries are present
//! - Running with root privileges (EUID 0)
//!
//! A failed check becomes a `Precondition` error listing every problem at
//! once, with the Arch package that provides each missing binary.

use tracing::{debug, info, warn};

use crate::error::{InstallError, Result};

/// Result of environment verification
#[derive(Debug)]
pub struct SanityCheckResult {
    pub missing_binaries: Vec<String>,
    pub is_root: bool,
}

impl SanityCheckResult {
    /// Returns true if all checks passed
    pub fn is_ok(&self) -> bool {
        self.missing_binaries.is_empty() && self.is_root
    }

    /// Operator-facing description of every failed check.
    pub fn report(&self) -> String {
        let mut lines = Vec::new();
        if !self.is_root {
            lines.push("Root privileges required: run with sudo or as root.".to_string());
        }
        if !self.missing_binaries.is_empty() {
            lines.push("Missing required binaries:".to_string());
            for binary in &self.missing_binaries {
                lines.push(format!("  - {} (package: {})", binary, get_package_for_binary(binary)));
            }
            let mut packages: Vec<&str> = self
                .missing_binaries
                .iter()
                .map(|b| get_package_for_binary(b))
                .collect();
            packages.sort_unstable();
            packages.dedup();
            lines.push(format!("Install them with: pacman -S {}", packages.join(" ")));
        }
        lines.join("\n")
    }
}

/// Binaries the installation pipeline runs.
pub const INSTALL_BINARIES: &[&str] = &[
    "lsblk",
    "sgdisk",
    "parted",
    "partprobe",
    "mkfs.fat",
    "mkfs.btrfs",
    "btrfs",
    "mount",
    "umount",
    "pacstrap",
    "genfstab",
    "arch-chroot",
];

/// Binaries the Feature Installer runs on a live system.
pub const POST_INSTALL_BINARIES: &[&str] = &["pacman", "systemctl", "sudo"];

/// Optional binaries (warn if missing but don't fail)
const OPTIONAL_BINARIES: &[&str] = &["reflector", "fzf", "dialog", "cfdisk"];

/// Check if a binary is available in PATH
fn binary_exists(name: &str) -> bool {
    which::which(name).is_ok()
}

/// Check if running as root (EUID 0)
fn is_running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Check `required` with `exists` as the binary probe.
pub fn verify_with<F>(required: &[&str], exists: F, is_root: bool) -> SanityCheckResult
where
    F: Fn(&str) -> bool,
{
    let missing_binaries = required
        .iter()
        .copied()
        .filter(|&b| !exists(b))
        .map(str::to_string)
        .collect();
    SanityCheckResult {
        missing_binaries,
        is_root,
    }
}

/// Perform all sanity checks and return the result
pub fn verify_environment(required: &[&str]) -> SanityCheckResult {
    for binary in OPTIONAL_BINARIES {
        if !binary_exists(binary) {
            debug!("Optional binary not found: {}", binary);
        }
    }
    verify_with(required, binary_exists, is_running_as_root())
}

/// Map binary names to their Arch Linux package names
fn get_package_for_binary(binary: &str) -> &'static str {
    match binary {
        "sgdisk" => "gptfdisk",
        "parted" | "partprobe" => "parted",
        "mkfs.fat" => "dosfstools",
        "mkfs.btrfs" | "btrfs" => "btrfs-progs",
        "lsblk" | "mount" | "umount" | "cfdisk" => "util-linux",
        "pacstrap" | "genfstab" | "arch-chroot" => "arch-install-scripts",
        "pacman" => "pacman",
        "systemctl" => "systemd",
        "sudo" => "sudo",
        "reflector" => "reflector",
        "fzf" => "fzf",
        "dialog" => "dialog",
        _ => "unknown",
    }
}

/// Skip root check (for development/testing)
/// Set ARCHSETUP_SKIP_ROOT_CHECK=1 to skip
pub fn should_skip_root_check() -> bool {
    std::env::var("ARCHSETUP_SKIP_ROOT_CHECK")
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false)
}

/// Run pre-flight checks for `required`.
pub fn run_preflight_checks(required: &[&str]) -> Result<()> {
    debug!("Running pre-flight sanity checks...");

    let mut result = verify_environment(required);

    if should_skip_root_check() {
        warn!("Root check skipped (ARCHSETUP_SKIP_ROOT_CHECK=1)");
        result.is_root = true;
    }

    if !result.is_ok() {
        return Err(InstallError::precondition(format!(
            "pre-flight check failed\n{}",
            result.report()
        )));
    }

    info!("Pre-flight checks passed");
    Ok(())
}
