//! Package & Service Resolver
//!
//! Translates configuration choices into concrete package names and
//! systemd unit names.
//!
//! # Design
//!
//! - **No hardcoded strings**: All package lists come from `profiles/mod.rs` constants
//! - **Deduplication**: Output is deduplicated and sorted for deterministic results
//! - **Pure logic**: No I/O, no side effects, only resolves names
//!
//! # Resolution Rules
//!
//! | Input              | Resolved To |
//! |--------------------|-------------|
//! | always             | `BASE_PACKAGES` |
//! | detected CPU       | microcode package |
//! | `gpu_driver`       | driver package set |
//! | `desktop`          | profile packages |
//! | `desktop`          | display manager unit |
//! | always             | `NetworkManager` unit |
//! | each `Feature`     | feature package set |

use crate::config_file::InstallationConfig;
use crate::hardware::CpuVendor;
use crate::profiles::{feature_packages, gpu_packages, BASE_PACKAGES};
use crate::types::{Feature, GpuDriver};

// ============================================================================
// Package Resolution
// ============================================================================

/// Packages for a GPU driver choice.
pub fn gpu_driver_packages(driver: GpuDriver) -> &'static [&'static str] {
    match driver {
        GpuDriver::Intel => gpu_packages::INTEL,
        GpuDriver::Amd => gpu_packages::AMD,
        GpuDriver::NvidiaNew => gpu_packages::NVIDIA,
        GpuDriver::NvidiaLegacy => gpu_packages::NVIDIA_LEGACY,
        GpuDriver::Generic => gpu_packages::GENERIC,
    }
}

/// Packages pulled in by an optional feature.
pub fn feature_package_set(feature: Feature) -> &'static [&'static str] {
    match feature {
        Feature::MirrorTuning => feature_packages::MIRROR_TUNING,
        Feature::PacmanTweaks => &[],
        Feature::AurHelper => feature_packages::AUR_HELPER,
        Feature::ShellEnvironment => feature_packages::SHELL,
        Feature::Fonts => feature_packages::FONTS,
        Feature::Virtualization => feature_packages::VIRTUALIZATION,
        Feature::RemovableMedia => feature_packages::REMOVABLE_MEDIA,
        Feature::SnapshotBoot => feature_packages::SNAPSHOT_BOOT,
    }
}

/// Resolve every package pacstrap installs into the new system.
///
/// Collects packages from:
/// 1. Base system packages (always installed)
/// 2. CPU microcode, when the vendor is known
/// 3. GPU driver packages
/// 4. Desktop profile packages (display manager included)
///
/// # What This Explicitly Refuses To Do
///
/// - Feature packages: those are installed by the Feature Installer
/// - Validate package existence: that is pacman's job at install time
pub fn resolve_packages(config: &InstallationConfig, cpu: CpuVendor) -> Vec<String> {
    let mut packages: Vec<&str> = Vec::new();

    packages.extend_from_slice(BASE_PACKAGES);

    if let Some(ucode) = cpu.microcode_package() {
        packages.push(ucode);
    }

    packages.extend_from_slice(gpu_driver_packages(config.gpu_driver));
    packages.extend_from_slice(config.desktop.get_packages());

    let mut result: Vec<String> = packages.iter().map(|s| s.to_string()).collect();
    result.sort();
    result.dedup();
    result
}

// ============================================================================
// Service Resolution
// ============================================================================

/// Resolve the systemd units enabled inside the new system.
///
/// - `NetworkManager`: always
/// - the profile's display manager, if it has one
pub fn resolve_services(config: &InstallationConfig) -> Vec<String> {
    let mut services: Vec<&str> = vec!["NetworkManager"];

    if let Some(dm) = config.desktop.get_display_manager() {
        services.push(dm);
    }

    let mut result: Vec<String> = services.iter().map(|s| s.to_string()).collect();
    result.sort();
    result.dedup();
    result
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles::Profile;
    use strum::IntoEnumIterator;

    fn has(list: &[String], name: &str) -> bool {
        list.iter().any(|p| p == name)
    }

    #[test]
    fn test_resolve_packages_always_has_base() {
        let packages = resolve_packages(&InstallationConfig::new(), CpuVendor::Unknown);
        for base in BASE_PACKAGES {
            assert!(has(&packages, base), "missing {}", base);
        }
        assert!(!has(&packages, "intel-ucode"));
        assert!(!has(&packages, "amd-ucode"));
    }

    #[test]
    fn test_resolve_packages_adds_microcode() {
        let config = InstallationConfig::new();
        assert!(has(&resolve_packages(&config, CpuVendor::Intel), "intel-ucode"));
        assert!(has(&resolve_packages(&config, CpuVendor::Amd), "amd-ucode"));
    }

    #[test]
    fn test_resolve_packages_nvidia_variants() {
        let mut config = InstallationConfig::new();
        config.gpu_driver = GpuDriver::NvidiaNew;
        let packages = resolve_packages(&config, CpuVendor::Unknown);
        assert!(has(&packages, "nvidia-open"));
        assert!(!has(&packages, "nvidia-dkms"));

        config.gpu_driver = GpuDriver::NvidiaLegacy;
        let packages = resolve_packages(&config, CpuVendor::Unknown);
        assert!(has(&packages, "nvidia-dkms"));
        assert!(!has(&packages, "nvidia-open"));
    }

    #[test]
    fn test_resolve_packages_generic_default() {
        let packages = resolve_packages(&InstallationConfig::new(), CpuVendor::Unknown);
        assert!(has(&packages, "mesa"));
        assert!(has(&packages, "xf86-video-vesa"));
    }

    #[test]
    fn test_resolve_packages_kde_desktop() {
        let mut config = InstallationConfig::new();
        config.desktop = Profile::Kde;
        let packages = resolve_packages(&config, CpuVendor::Unknown);
        assert!(has(&packages, "plasma-meta"));
        assert!(has(&packages, "sddm"));
    }

    #[test]
    fn test_resolve_packages_deduplicated() {
        let mut config = InstallationConfig::new();
        config.gpu_driver = GpuDriver::Amd;
        config.desktop = Profile::Hyprland;
        let packages = resolve_packages(&config, CpuVendor::Amd);
        let mut sorted = packages.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(packages.len(), sorted.len(), "packages list has duplicates");
    }

    #[test]
    fn test_resolve_services_minimal() {
        let services = resolve_services(&InstallationConfig::new());
        assert_eq!(services, vec!["NetworkManager"]);
    }

    #[test]
    fn test_resolve_services_display_managers() {
        let mut config = InstallationConfig::new();
        config.desktop = Profile::Gnome;
        assert!(has(&resolve_services(&config), "gdm"));
        config.desktop = Profile::Xfce;
        assert!(has(&resolve_services(&config), "lightdm"));
    }

    #[test]
    fn test_every_feature_but_tweaks_installs_packages() {
        for feature in Feature::iter() {
            let set = feature_package_set(feature);
            assert_eq!(set.is_empty(), feature == Feature::PacmanTweaks, "{}", feature);
        }
    }
}
