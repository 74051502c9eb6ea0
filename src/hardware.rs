//! Hardware environment detection
//!
//! Detects firmware mode (UEFI vs BIOS), network connectivity and the CPU
//! vendor using plain filesystem reads and a TCP connect. Nothing here
//! shells out.
//!
//! # Design
//!
//! - **Safe defaults**: ambiguous detection logs a warning and picks the
//!   conservative answer (BIOS, Offline, unknown vendor)
//! - **Advisory only**: the bootloader path is decided by the partition
//!   layout; firmware mode is used to warn about mismatches

use std::fmt;
use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::time::Duration;

use crate::profiles::microcode_packages;

/// Detected firmware mode of the system.
///
/// The kernel exposes `/sys/firmware/efi` only when booted in UEFI mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FirmwareMode {
    Uefi,
    Bios,
}

impl FirmwareMode {
    /// Returns true if the system booted in UEFI mode.
    pub fn is_uefi(self) -> bool {
        matches!(self, Self::Uefi)
    }
}

impl fmt::Display for FirmwareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uefi => write!(f, "UEFI"),
            Self::Bios => write!(f, "BIOS"),
        }
    }
}

/// Network connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
    /// TCP connection to archlinux.org:443 succeeded
    Online,
    /// TCP connection failed or timed out
    Offline,
}

impl NetworkState {
    /// Returns true if network connectivity is available.
    pub fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}

impl fmt::Display for NetworkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => write!(f, "Online"),
            Self::Offline => write!(f, "Offline"),
        }
    }
}

/// CPU vendor, used to pick a microcode package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuVendor {
    Intel,
    Amd,
    Unknown,
}

impl CpuVendor {
    /// Microcode package for this vendor, if any.
    pub fn microcode_package(self) -> Option<&'static str> {
        match self {
            Self::Intel => Some(microcode_packages::INTEL),
            Self::Amd => Some(microcode_packages::AMD),
            Self::Unknown => None,
        }
    }
}

impl fmt::Display for CpuVendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Intel => write!(f, "Intel"),
            Self::Amd => write!(f, "AMD"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Aggregated hardware detection results.
///
/// Created via `HardwareInfo::detect()` once at startup.
#[derive(Debug, Clone, Copy)]
pub struct HardwareInfo {
    pub firmware: FirmwareMode,
    pub network: NetworkState,
    pub cpu: CpuVendor,
}

impl HardwareInfo {
    /// Detect hardware environment. Never fails; see the module docs for defaults.
    pub fn detect() -> Self {
        let firmware = detect_firmware_mode();
        let network = detect_internet();
        let cpu = detect_cpu_vendor();

        tracing::info!(
            "Hardware detection: firmware={}, network={}, cpu={}",
            firmware,
            network,
            cpu
        );

        Self {
            firmware,
            network,
            cpu,
        }
    }
}

impl fmt::Display for HardwareInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Firmware: {}, Network: {}, CPU: {}",
            self.firmware, self.network, self.cpu
        )
    }
}

// ============================================================================
// Detection Functions
// ============================================================================

/// Detect firmware mode by checking for the EFI sysfs directory.
pub fn detect_firmware_mode() -> FirmwareMode {
    if Path::new("/sys/firmware/efi").exists() {
        tracing::debug!("UEFI firmware detected (/sys/firmware/efi exists)");
        FirmwareMode::Uefi
    } else {
        tracing::debug!("BIOS firmware detected (/sys/firmware/efi not found)");
        FirmwareMode::Bios
    }
}

/// Detect network connectivity via TCP connection to archlinux.org.
///
/// Uses `TcpStream::connect_timeout` with a 5-second timeout on port 443,
/// since ICMP is commonly filtered.
pub fn detect_internet() -> NetworkState {
    // archlinux.org HTTPS
    let addr: SocketAddr = match "147.75.81.97:443".parse() {
        Ok(a) => a,
        Err(e) => {
            tracing::warn!("Failed to parse socket address: {}", e);
            return NetworkState::Offline;
        }
    };

    match TcpStream::connect_timeout(&addr, Duration::from_secs(5)) {
        Ok(_stream) => {
            tracing::debug!("Network connectivity confirmed (TCP to archlinux.org:443)");
            NetworkState::Online
        }
        Err(e) => {
            tracing::warn!("Network connectivity check failed: {}", e);
            NetworkState::Offline
        }
    }
}

/// Detect the CPU vendor from `/proc/cpuinfo`.
pub fn detect_cpu_vendor() -> CpuVendor {
    match std::fs::read_to_string("/proc/cpuinfo") {
        Ok(contents) => parse_cpu_vendor(&contents),
        Err(e) => {
            tracing::warn!("Could not read /proc/cpuinfo: {}", e);
            CpuVendor::Unknown
        }
    }
}

/// Parse the first `vendor_id` line of cpuinfo output.
pub fn parse_cpu_vendor(cpuinfo: &str) -> CpuVendor {
    let vendor = cpuinfo
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim() == "vendor_id")
        .map(|(_, value)| value.trim());

    match vendor {
        Some("GenuineIntel") => CpuVendor::Intel,
        Some("AuthenticAMD") => CpuVendor::Amd,
        _ => CpuVendor::Unknown,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_firmware_mode_display() {
        assert_eq!(FirmwareMode::Uefi.to_string(), "UEFI");
        assert_eq!(FirmwareMode::Bios.to_string(), "BIOS");
        assert!(FirmwareMode::Uefi.is_uefi());
        assert!(!FirmwareMode::Bios.is_uefi());
    }

    #[test]
    fn test_network_state_predicates() {
        assert!(NetworkState::Online.is_online());
        assert!(!NetworkState::Offline.is_online());
    }

    #[test]
    fn test_parse_cpu_vendor() {
        let intel = "processor\t: 0\nvendor_id\t: GenuineIntel\ncpu family\t: 6\n";
        assert_eq!(parse_cpu_vendor(intel), CpuVendor::Intel);

        let amd = "processor\t: 0\nvendor_id\t: AuthenticAMD\n";
        assert_eq!(parse_cpu_vendor(amd), CpuVendor::Amd);

        assert_eq!(parse_cpu_vendor("processor : 0\n"), CpuVendor::Unknown);
    }

    #[test]
    fn test_microcode_package() {
        assert_eq!(CpuVendor::Intel.microcode_package(), Some("intel-ucode"));
        assert_eq!(CpuVendor::Amd.microcode_package(), Some("amd-ucode"));
        assert_eq!(CpuVendor::Unknown.microcode_package(), None);
    }

    #[test]
    fn test_hardware_info_display() {
        let info = HardwareInfo {
            firmware: FirmwareMode::Uefi,
            network: NetworkState::Online,
            cpu: CpuVendor::Amd,
        };
        assert_eq!(info.to_string(), "Firmware: UEFI, Network: Online, CPU: AMD");
    }

    #[test]
    fn test_detect_firmware_mode_runs() {
        let mode = detect_firmware_mode();
        assert!(mode.is_uefi() || mode == FirmwareMode::Bios);
    }
}
