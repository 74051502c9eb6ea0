//! Configuration file handling for saving and loading installation configs.
//!
//! `InstallationConfig` is the single value that carries every operator
//! choice through the pipeline. It is built once (interactively or from a
//! JSON file) and only read afterwards.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use crate::input::{validate_hostname, validate_username};
use crate::profiles::Profile;
use crate::types::{Feature, GpuDriver, PartitionMode, Secret, SubvolumeLayout};

/// Installation configuration that can be saved/loaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallationConfig {
    // User accounts
    pub username: String,
    pub user_password: Secret,
    /// `None` locks the root account instead of setting a password
    pub root_password: Option<Secret>,

    // System identity
    pub hostname: String,
    pub timezone: String, // Too many options for enum
    pub locale: String,   // Too many options for enum
    pub keymap: String,   // Too many options for enum

    // Disk & Storage
    pub install_disk: String, // Disk path like /dev/sda - must remain String
    pub partition_mode: PartitionMode,
    pub subvolume_layout: SubvolumeLayout,

    // Packages
    pub gpu_driver: GpuDriver,
    pub desktop: Profile,

    // Network & Mirrors
    /// ISO 3166-1 alpha-2 codes handed to reflector; empty skips ranking
    pub mirror_countries: Vec<String>,

    // Post-install features applied inside the new system
    pub features: Vec<Feature>,
}

impl Default for InstallationConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            user_password: Secret::default(),
            root_password: None,
            hostname: "archlinux".to_string(),
            timezone: "UTC".to_string(),
            locale: "en_US.UTF-8".to_string(),
            keymap: "us".to_string(),
            install_disk: String::new(),
            partition_mode: PartitionMode::default(),
            subvolume_layout: SubvolumeLayout::default(),
            gpu_driver: GpuDriver::default(),
            desktop: Profile::default(),
            mirror_countries: Vec::new(),
            features: Vec::new(),
        }
    }
}

impl InstallationConfig {
    /// Create a new empty configuration with sensible defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Save configuration to a JSON file.
    ///
    /// The file carries passwords, so it is created with mode 0600.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize configuration to JSON")?;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&path)
            .with_context(|| format!("Failed to open {:?} for writing", path.as_ref()))?;
        file.write_all(json.as_bytes())
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let config: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validate_username(&self.username)?;

        if self.user_password.is_empty() {
            anyhow::bail!("User password must be specified");
        }
        if matches!(&self.root_password, Some(pw) if pw.is_empty()) {
            anyhow::bail!("Root password must be omitted (lock root) or non-empty");
        }

        validate_hostname(&self.hostname)?;

        // Validate disk path
        let disk = self.install_disk.trim();
        if disk.is_empty() {
            anyhow::bail!("Install disk must be specified");
        }
        if !disk.starts_with("/dev/") {
            anyhow::bail!("Invalid disk path '{}' - must start with /dev/", disk);
        }

        if self.timezone.trim().is_empty() || self.timezone.contains("..") {
            anyhow::bail!("Timezone must be a zoneinfo name such as Europe/Berlin");
        }
        if self.locale.trim().is_empty() || self.locale.contains(char::is_whitespace) {
            anyhow::bail!("Locale must be a single name such as en_US.UTF-8");
        }
        if self.keymap.trim().is_empty() {
            anyhow::bail!("Keymap must be specified");
        }

        for country in &self.mirror_countries {
            if country.trim().is_empty() {
                anyhow::bail!("Mirror country entries must not be empty");
            }
        }

        Ok(())
    }

    /// Human-readable summary for the confirmation screen. Never includes passwords.
    pub fn summary(&self) -> String {
        let features = if self.features.is_empty() {
            "none".to_string()
        } else {
            self.features
                .iter()
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mirrors = if self.mirror_countries.is_empty() {
            "default mirrorlist".to_string()
        } else {
            self.mirror_countries.join(", ")
        };
        let root = if self.root_password.is_some() {
            "password set"
        } else {
            "locked"
        };

        [
            format!("  Disk:       {} ({})", self.install_disk, self.partition_mode),
            format!("  Subvolumes: {}", self.subvolume_layout),
            format!("  User:       {} (wheel)", self.username),
            format!("  Root:       {}", root),
            format!("  Hostname:   {}", self.hostname),
            format!("  Locale:     {} / {} / {}", self.locale, self.timezone, self.keymap),
            format!("  GPU:        {}", self.gpu_driver),
            format!("  Desktop:    {}", self.desktop.description()),
            format!("  Mirrors:    {}", mirrors),
            format!("  Features:   {}", features),
        ]
        .join("\n")
    }
}
