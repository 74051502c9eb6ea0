//! Pre-install orchestration
//!
//! Handles steps that must complete *before* pacstrap:
//! - Mirror ranking via reflector, with a pre-generated list as fallback
//!
//! # Design
//!
//! - Skips automatically when offline, never blocks the installation
//! - Skipped when the operator gave no mirror countries
//! - Fallback chain: `reflector` → `curl` of the archlinux.org mirrorlist
//!   generator with its `Server` lines uncommented
//!
//! # Failure Policy
//!
//! Every outcome is non-fatal. The ISO's default mirrorlist is usable, so
//! a failure is reported as `MirrorRankResult::Failed` and the caller
//! continues.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::confedit::{uncomment_servers, CONFIG_FILE_MODE};
use crate::config_file::InstallationConfig;
use crate::error::Result;
use crate::hardware::NetworkState;
use crate::tool_runner::{run_checked, Executor};
use crate::tools::packages::{CurlDownloadArgs, MirrorSortMethod, ReflectorArgs};

/// Mirrorlist generator used when reflector fails.
pub const MIRRORLIST_GENERATOR_URL: &str = "https://archlinux.org/mirrorlist/";

// ============================================================================
// Mirror Ranking Result
// ============================================================================

/// Where a ranked mirrorlist came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorSource {
    Reflector,
    /// Pre-generated list from archlinux.org
    Generated,
}

/// Outcome of mirror ranking attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorRankResult {
    /// A new mirrorlist was saved.
    Ranked(MirrorSource),
    /// Mirror ranking was skipped (with reason).
    Skipped(SkipReason),
    /// Both sources failed (non-fatal, installation continues).
    Failed(String),
}

/// Reason mirror ranking was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No network connectivity detected.
    Offline,
    /// No mirror countries were given.
    UserSkipped,
}

impl fmt::Display for MirrorRankResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ranked(MirrorSource::Reflector) => write!(f, "Ranked with reflector"),
            Self::Ranked(MirrorSource::Generated) => write!(f, "Downloaded pre-generated mirrorlist"),
            Self::Skipped(reason) => write!(f, "Skipped: {}", reason),
            Self::Failed(err) => write!(f, "Failed: {}", err),
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offline => write!(f, "no network connectivity"),
            Self::UserSkipped => write!(f, "no mirror countries selected"),
        }
    }
}

// ============================================================================
// Pre-install Configuration
// ============================================================================

/// Configuration for pre-install steps.
#[derive(Debug, Clone)]
pub struct PreinstallConfig {
    /// ISO 3166-1 alpha-2 codes.
    pub countries: Vec<String>,
    /// Number of mirrors to keep (default: 20).
    pub mirror_limit: u32,
    /// Mirror sort method (default: Rate).
    pub mirror_sort: MirrorSortMethod,
    /// Mirrorlist to replace.
    pub mirrorlist: PathBuf,
}

impl Default for PreinstallConfig {
    fn default() -> Self {
        Self {
            countries: Vec::new(),
            mirror_limit: 20,
            mirror_sort: MirrorSortMethod::Rate,
            mirrorlist: PathBuf::from("/etc/pacman.d/mirrorlist"),
        }
    }
}

/// Build a `PreinstallConfig` from an `InstallationConfig`.
pub fn preinstall_config_from(config: &InstallationConfig) -> PreinstallConfig {
    PreinstallConfig {
        countries: config.mirror_countries.clone(),
        ..PreinstallConfig::default()
    }
}

/// `https://archlinux.org/mirrorlist/?country=DE&country=FR&protocol=https&use_mirror_status=on`
pub fn generator_url(countries: &[String]) -> String {
    let mut query: Vec<String> = countries.iter().map(|c| format!("country={}", c)).collect();
    query.push("protocol=https".to_string());
    query.push("use_mirror_status=on".to_string());
    format!("{}?{}", MIRRORLIST_GENERATOR_URL, query.join("&"))
}

// ============================================================================
// Mirror Ranking
// ============================================================================

/// Rank pacman mirrors if online. Skips gracefully if offline or no
/// countries were given.
pub fn rank_mirrors(
    exec: &dyn Executor,
    network: NetworkState,
    config: &PreinstallConfig,
) -> MirrorRankResult {
    if config.countries.is_empty() {
        info!("Mirror ranking skipped: no countries selected");
        return MirrorRankResult::Skipped(SkipReason::UserSkipped);
    }
    if !network.is_online() {
        warn!("Mirror ranking skipped: no network connectivity");
        return MirrorRankResult::Skipped(SkipReason::Offline);
    }

    info!(
        "Ranking mirrors (countries={}, limit={}, sort={})",
        config.countries.join(","),
        config.mirror_limit,
        config.mirror_sort,
    );

    let reflector = ReflectorArgs {
        countries: config.countries.clone(),
        latest: config.mirror_limit,
        sort: config.mirror_sort,
        save: config.mirrorlist.clone(),
        ..ReflectorArgs::default()
    };
    let reflector_err = match run_checked(exec, &reflector) {
        Ok(_) => {
            info!("Mirror ranking completed successfully");
            return MirrorRankResult::Ranked(MirrorSource::Reflector);
        }
        Err(e) => e,
    };
    warn!("reflector failed ({}), trying the pre-generated mirrorlist", reflector_err);

    match download_generated_list(exec, &config.countries, &config.mirrorlist) {
        Ok(()) => MirrorRankResult::Ranked(MirrorSource::Generated),
        Err(e) => {
            let msg = format!(
                "reflector: {}; mirrorlist download: {}; keeping the current mirrorlist",
                reflector_err, e
            );
            warn!("{}", msg);
            MirrorRankResult::Failed(msg)
        }
    }
}

fn download_generated_list(exec: &dyn Executor, countries: &[String], mirrorlist: &Path) -> Result<()> {
    let download = mirrorlist.with_extension("archsetup-download");
    run_checked(
        exec,
        &CurlDownloadArgs {
            url: generator_url(countries),
            output: download.clone(),
        },
    )?;
    let fetched = exec.read_to_string(&download)?.unwrap_or_default();
    let enabled = uncomment_servers(&fetched);
    let result = if enabled.lines().any(|l| l.starts_with("Server")) {
        exec.write_file(mirrorlist, &enabled, CONFIG_FILE_MODE)
    } else {
        Err(crate::error::InstallError::system("downloaded mirrorlist has no servers"))
    };
    exec.remove_file(&download)?;
    result
}

// ============================================================================
// Tests
// ============================================================================
