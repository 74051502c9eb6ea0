//! Type-safe configuration types for archsetup
//!
//! Every closed choice the operator makes is an enum here rather than a
//! string, so menus, JSON configs and CLI flags all parse through one place.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// How the Disk Planner should carve the target disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "kebab-case")]
pub enum PartitionMode {
    /// Wipe the partition table and use the whole disk
    #[default]
    #[strum(serialize = "entire-disk")]
    EntireDisk,
    /// Keep existing partitions, install into the unallocated tail
    #[strum(serialize = "free-space")]
    FreeSpace,
    /// Operator partitions in cfdisk; layout is detected afterwards
    #[strum(serialize = "manual")]
    Manual,
}

impl PartitionMode {
    /// Menu label shown to the operator
    pub fn label(self) -> &'static str {
        match self {
            Self::EntireDisk => "Use entire disk (erases everything)",
            Self::FreeSpace => "Use remaining free space",
            Self::Manual => "Manual partitioning (cfdisk)",
        }
    }

    /// Whether the mode erases the existing partition table
    pub fn wipes_disk(self) -> bool {
        matches!(self, Self::EntireDisk)
    }
}

/// GPU driver package set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "kebab-case")]
pub enum GpuDriver {
    #[strum(serialize = "intel")]
    Intel,
    #[strum(serialize = "amd")]
    Amd,
    /// Current NVIDIA cards (open kernel modules)
    #[strum(serialize = "nvidia")]
    #[serde(rename = "nvidia")]
    NvidiaNew,
    /// Older NVIDIA cards on the dkms branch
    #[strum(serialize = "nvidia-legacy")]
    NvidiaLegacy,
    /// Generic open driver, safe on any hardware
    #[default]
    #[strum(serialize = "generic")]
    Generic,
}

impl GpuDriver {
    /// Map free-form operator input to a driver. Unrecognized input falls
    /// back to `Generic`.
    pub fn from_choice(input: &str) -> Self {
        parse_or_default(input, "GPU driver")
    }

    /// Menu label shown to the operator
    pub fn label(self) -> &'static str {
        match self {
            Self::Intel => "Intel integrated graphics",
            Self::Amd => "AMD Radeon",
            Self::NvidiaNew => "NVIDIA (Turing and newer)",
            Self::NvidiaLegacy => "NVIDIA (legacy, dkms)",
            Self::Generic => "Generic / virtual machine",
        }
    }
}

/// Filesystems the planner creates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Filesystem {
    /// Copy-on-write root with subvolumes
    #[strum(serialize = "btrfs")]
    Btrfs,
    /// FAT32 filesystem for EFI System Partition
    #[strum(serialize = "fat32")]
    Fat32,
}

/// Which fixed subvolume set to create on the root filesystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "kebab-case")]
pub enum SubvolumeLayout {
    /// `@`, `@home`, `@var`, `@tmp`, `@snapshots`
    #[default]
    #[strum(serialize = "full")]
    Full,
    /// `@`, `@home`, `@snapshots`
    #[strum(serialize = "turbo")]
    Turbo,
}

/// Simple Yes/No toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
pub enum Toggle {
    #[strum(serialize = "Yes")]
    Yes,
    #[default]
    #[strum(serialize = "No")]
    No,
}

impl Toggle {
    /// Interpret an answer to a yes/no prompt. Anything that is not
    /// clearly yes counts as no.
    pub fn from_answer(answer: &str) -> Self {
        match answer.trim().to_lowercase().as_str() {
            "y" | "yes" => Self::Yes,
            _ => Self::No,
        }
    }

    pub fn is_yes(self) -> bool {
        matches!(self, Self::Yes)
    }
}

/// Optional feature sets applied by the Feature Installer.
///
/// Declaration order is the order features are applied in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "kebab-case")]
pub enum Feature {
    /// reflector configuration and weekly refresh timer
    #[strum(serialize = "mirrors")]
    #[serde(rename = "mirrors")]
    MirrorTuning,
    /// pacman.conf/makepkg.conf quality-of-life settings and multilib
    #[strum(serialize = "pacman-tweaks")]
    PacmanTweaks,
    /// yay built from the AUR as the invoking user
    #[strum(serialize = "aur-helper")]
    AurHelper,
    /// zsh, oh-my-zsh and a managed rc block
    #[strum(serialize = "shell")]
    #[serde(rename = "shell")]
    ShellEnvironment,
    #[strum(serialize = "fonts")]
    Fonts,
    /// qemu/libvirt stack
    #[strum(serialize = "virtualization")]
    Virtualization,
    /// automounting and foreign filesystem support
    #[strum(serialize = "removable-media")]
    RemovableMedia,
    /// bootable btrfs snapshots through grub-btrfs
    #[strum(serialize = "grub-btrfs")]
    #[serde(rename = "grub-btrfs")]
    SnapshotBoot,
}

impl Feature {
    /// Question asked at the per-feature yes/no gate
    pub fn prompt(self) -> &'static str {
        match self {
            Self::MirrorTuning => "Configure reflector to keep the mirrorlist fresh?",
            Self::PacmanTweaks => "Enable pacman colors, parallel downloads and multilib?",
            Self::AurHelper => "Install the yay AUR helper?",
            Self::ShellEnvironment => "Install zsh with oh-my-zsh?",
            Self::Fonts => "Install a curated font set?",
            Self::Virtualization => "Install the QEMU/libvirt virtualization stack?",
            Self::RemovableMedia => "Install removable media utilities?",
            Self::SnapshotBoot => "Add btrfs snapshots to the GRUB menu (grub-btrfs)?",
        }
    }

    /// Parse a comma separated list such as `shell,fonts`.
    ///
    /// The result is sorted into application order and deduplicated.
    pub fn parse_list(list: &str) -> crate::error::Result<Vec<Self>> {
        let mut features = Vec::new();
        for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let feature = Self::from_str(item).map_err(|_| {
                let known: Vec<String> = Self::iter().map(|f| f.to_string()).collect();
                crate::error::InstallError::validation(format!(
                    "unknown feature '{}' (known: {})",
                    item,
                    known.join(", ")
                ))
            })?;
            features.push(feature);
        }
        features.sort();
        features.dedup();
        Ok(features)
    }
}

/// A credential that must never reach logs.
///
/// Serializes transparently so one-shot configs carry the real value,
/// while `Debug` output is masked.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the plaintext. Only for piping into chpasswd or a one-shot file.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Parse a closed choice case-insensitively, falling back to the default.
pub(crate) fn parse_or_default<T>(input: &str, what: &str) -> T
where
    T: FromStr + Default + fmt::Display,
{
    let normalized = input.trim().to_lowercase();
    match T::from_str(&normalized) {
        Ok(value) => value,
        Err(_) => {
            let fallback = T::default();
            tracing::warn!(
                "Unrecognized {} '{}', using default '{}'",
                what,
                input.trim(),
                fallback
            );
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_mode_strings() {
        assert_eq!(PartitionMode::EntireDisk.to_string(), "entire-disk");
        assert_eq!(
            PartitionMode::from_str("free-space").expect("valid mode"),
            PartitionMode::FreeSpace
        );
        assert!(PartitionMode::EntireDisk.wipes_disk());
        assert!(!PartitionMode::Manual.wipes_disk());
    }

    #[test]
    fn test_gpu_from_choice_falls_back_to_generic() {
        assert_eq!(GpuDriver::from_choice("nvidia"), GpuDriver::NvidiaNew);
        assert_eq!(GpuDriver::from_choice("  AMD "), GpuDriver::Amd);
        assert_eq!(GpuDriver::from_choice("voodoo3"), GpuDriver::Generic);
        assert_eq!(GpuDriver::from_choice(""), GpuDriver::Generic);
    }

    #[test]
    fn test_gpu_serde_uses_cli_names() {
        let json = serde_json::to_string(&GpuDriver::NvidiaLegacy).expect("serialize");
        assert_eq!(json, "\"nvidia-legacy\"");
        let parsed: GpuDriver = serde_json::from_str("\"nvidia\"").expect("deserialize");
        assert_eq!(parsed, GpuDriver::NvidiaNew);
    }

    #[test]
    fn test_toggle_from_answer() {
        assert_eq!(Toggle::from_answer("y"), Toggle::Yes);
        assert_eq!(Toggle::from_answer("YES"), Toggle::Yes);
        assert_eq!(Toggle::from_answer("no"), Toggle::No);
        assert_eq!(Toggle::from_answer("sure"), Toggle::No);
    }

    #[test]
    fn test_feature_parse_list_sorts_and_dedups() {
        let features = Feature::parse_list("fonts, shell,mirrors,fonts").expect("valid list");
        assert_eq!(
            features,
            vec![Feature::MirrorTuning, Feature::ShellEnvironment, Feature::Fonts]
        );
    }

    #[test]
    fn test_feature_parse_list_rejects_unknown() {
        let err = Feature::parse_list("shell,bogus").expect_err("should reject");
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn test_feature_serde_matches_display() {
        for feature in Feature::iter() {
            let json = serde_json::to_string(&feature).expect("serialize");
            assert_eq!(json, format!("\"{}\"", feature));
        }
    }

    #[test]
    fn test_secret_debug_is_masked() {
        let secret = Secret::new("hunter2");
        assert_eq!(format!("{:?}", secret), "***");
        assert_eq!(secret.expose(), "hunter2");
        assert_eq!(serde_json::to_string(&secret).expect("serialize"), "\"hunter2\"");
    }
}
