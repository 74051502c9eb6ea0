//! Desktop profiles and package sets.
//!
//! Package lists live in Rust so that a typo shows up in a test instead of
//! halfway through pacstrap.
//!
//! # Supported Profiles
//!
//! | Profile   | Description | Display Manager |
//! |-----------|-------------|-----------------|
//! | Minimal   | No GUI, base system only | None |
//! | Gnome     | GNOME desktop environment | GDM |
//! | Kde       | KDE Plasma desktop | SDDM |
//! | Xfce      | XFCE desktop environment | LightDM |
//! | Hyprland  | Hyprland Wayland compositor | SDDM |

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Desktop/WM profile selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(EnumIter, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Minimal installation - no GUI, just base system.
    #[default]
    Minimal,

    /// GNOME desktop environment.
    Gnome,

    /// KDE Plasma desktop.
    Kde,

    /// XFCE desktop environment.
    Xfce,

    /// Hyprland Wayland compositor.
    Hyprland,
}

impl Profile {
    /// Map free-form operator input to a profile. Unrecognized input falls
    /// back to `Minimal`.
    pub fn from_choice(input: &str) -> Self {
        crate::types::parse_or_default(input, "desktop profile")
    }

    /// Get the packages required for this profile.
    ///
    /// Package lists include the display manager where applicable.
    /// Services are enabled separately by the resolver.
    pub fn get_packages(&self) -> &'static [&'static str] {
        match self {
            Profile::Minimal => &[],

            Profile::Gnome => &[
                "gnome",
                "gnome-tweaks",
                "gdm",
                "firefox",
            ],

            Profile::Kde => &[
                "plasma-meta",
                "konsole",
                "dolphin",
                "ark",
                "sddm",
                "firefox",
            ],

            Profile::Xfce => &[
                "xfce4",
                "xfce4-goodies",
                "lightdm",
                "lightdm-gtk-greeter",
                "pipewire",
                "pipewire-pulse",
                "pavucontrol",
                "network-manager-applet",
                "firefox",
            ],

            Profile::Hyprland => &[
                "hyprland",
                "xdg-desktop-portal-hyprland",
                "waybar",
                "kitty",
                "wofi",
                "mako",
                "grim",
                "slurp",
                "wl-clipboard",
                "sddm",
                "pipewire",
                "pipewire-pulse",
                "network-manager-applet",
                "polkit-kde-agent",
                "firefox",
            ],
        }
    }

    /// Get the display manager service for this profile.
    ///
    /// Returns `None` for profiles without a GUI.
    pub fn get_display_manager(&self) -> Option<&'static str> {
        match self {
            Profile::Minimal => None,
            Profile::Gnome => Some("gdm"),
            Profile::Kde | Profile::Hyprland => Some("sddm"),
            Profile::Xfce => Some("lightdm"),
        }
    }

    /// Get a human-readable description of the profile.
    pub fn description(&self) -> &'static str {
        match self {
            Profile::Minimal => "Minimal system without GUI",
            Profile::Gnome => "GNOME desktop environment",
            Profile::Kde => "KDE Plasma desktop",
            Profile::Xfce => "XFCE desktop environment (lightweight)",
            Profile::Hyprland => "Hyprland Wayland compositor (tiling)",
        }
    }
}

// ============================================================================
// Package Constants (used by logic::resolver and logic::postinstall)
// ============================================================================

/// GPU driver packages indexed by driver type.
pub mod gpu_packages {
    /// Intel integrated graphics.
    pub const INTEL: &[&str] = &["mesa", "vulkan-intel", "intel-media-driver"];

    /// AMD open-source driver packages (mesa-based).
    pub const AMD: &[&str] = &["mesa", "vulkan-radeon", "xf86-video-amdgpu", "libva-mesa-driver"];

    /// Turing and newer NVIDIA cards, open kernel modules.
    pub const NVIDIA: &[&str] = &["nvidia-open", "nvidia-utils", "nvidia-settings"];

    /// Older NVIDIA cards that need the dkms branch.
    pub const NVIDIA_LEGACY: &[&str] = &["nvidia-dkms", "nvidia-utils", "nvidia-settings"];

    /// Generic open drivers, safe default for unknown hardware and VMs.
    pub const GENERIC: &[&str] = &["mesa", "xf86-video-vesa"];
}

/// CPU microcode packages.
pub mod microcode_packages {
    pub const INTEL: &str = "intel-ucode";
    pub const AMD: &str = "amd-ucode";
}

/// Packages pulled in by each optional feature.
pub mod feature_packages {
    pub const MIRROR_TUNING: &[&str] = &["reflector"];
    pub const AUR_HELPER: &[&str] = &["git", "base-devel"];
    pub const SHELL: &[&str] = &["zsh", "zsh-completions", "zsh-autosuggestions", "zsh-syntax-highlighting", "curl", "git"];
    pub const FONTS: &[&str] = &[
        "noto-fonts",
        "noto-fonts-emoji",
        "ttf-dejavu",
        "ttf-liberation",
        "ttf-jetbrains-mono-nerd",
    ];
    pub const VIRTUALIZATION: &[&str] = &[
        "qemu-full",
        "libvirt",
        "virt-manager",
        "dnsmasq",
        "edk2-ovmf",
        "swtpm",
    ];
    pub const REMOVABLE_MEDIA: &[&str] = &["udisks2", "udiskie", "ntfs-3g", "exfatprogs", "gvfs", "dosfstools"];
    pub const SNAPSHOT_BOOT: &[&str] = &["grub-btrfs", "inotify-tools", "snapper"];
}

/// Base system packages always installed by pacstrap.
pub const BASE_PACKAGES: &[&str] = &[
    "base",
    "base-devel",
    "linux",
    "linux-firmware",
    "linux-headers",
    "btrfs-progs",
    "grub",
    "efibootmgr",
    "networkmanager",
    "sudo",
    "git",
    "vim",
];
