//! Input Collector
//!
//! Gathers every operator choice and turns it into an `InstallationConfig`.
//! Free-text answers go through the `Prompter`; closed choices go through
//! the resolved `SelectorBackend`.
//!
//! # Failure Policy
//!
//! | Answer | Result |
//! |--------|--------|
//! | empty username, empty or mismatched password | `Validation` |
//! | empty root password | root account is locked |
//! | no candidate disk | `Precondition` |
//! | cancelled disk or mode selection | `Cancelled` |
//! | cancelled GPU/profile/layout selection | default value, with a warning |
//! | anything but `yes` at the final gate | `Cancelled` |

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use strum::IntoEnumIterator;
use tracing::{info, warn};

use crate::config_file::InstallationConfig;
use crate::engine::probe::list_disks;
use crate::error::{InstallError, Result};
use crate::profiles::Profile;
use crate::prompt::Prompter;
use crate::selector::SelectorBackend;
use crate::tool_runner::Executor;
use crate::types::{Feature, GpuDriver, PartitionMode, Secret, SubvolumeLayout, Toggle};

/// The only answer accepted at the destructive-action gate.
pub const CONFIRMATION_WORD: &str = "yes";

static USERNAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_-]*\$?$").expect("valid username regex"));

// ============================================================================
// Validation rules
// ============================================================================

/// Validate a login name the way `useradd` will accept it.
pub fn validate_username(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(InstallError::validation("username must not be empty"));
    }
    if name.len() > 32 {
        return Err(InstallError::validation("username must be at most 32 characters"));
    }
    if name == "root" {
        return Err(InstallError::validation("'root' cannot be used as the regular user"));
    }
    if !USERNAME.is_match(name) {
        return Err(InstallError::validation(format!(
            "invalid username '{}': use lowercase letters, digits, '_' and '-'",
            name
        )));
    }
    Ok(())
}

/// Validate a single-label hostname (RFC 1123).
pub fn validate_hostname(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 63 {
        return Err(InstallError::validation("hostname must be 1-63 characters"));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(InstallError::validation("hostname must not start or end with '-'"));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(InstallError::validation(format!(
            "invalid hostname '{}': use letters, digits and '-'",
            name
        )));
    }
    Ok(())
}

/// A user password must be non-empty and match its confirmation.
pub fn check_password_pair(password: Secret, confirmation: &Secret) -> Result<Secret> {
    if password.is_empty() {
        return Err(InstallError::validation("password must not be empty"));
    }
    if &password != confirmation {
        return Err(InstallError::validation("passwords do not match"));
    }
    Ok(password)
}

/// An empty root password means "lock the root account".
pub fn root_password_policy(password: Secret) -> Option<Secret> {
    if password.is_empty() { None } else { Some(password) }
}

/// The destructive-action gate. Only the literal `yes` passes; surrounding
/// whitespace and case variations do not.
pub fn confirm_destructive(answer: &str) -> Result<()> {
    let answer = answer.trim_end_matches(['\n', '\r']);
    if answer == CONFIRMATION_WORD {
        Ok(())
    } else {
        Err(InstallError::cancelled(format!(
            "confirmation was '{}', not '{}'; nothing was changed",
            answer, CONFIRMATION_WORD
        )))
    }
}

/// Split `de, fr ,US` into `["DE", "FR", "US"]`.
pub fn parse_mirror_countries(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_uppercase)
        .collect()
}

/// Ask the per-feature yes/no gate for each candidate, or take them all
/// when `auto_yes` is set.
pub fn select_features(
    prompter: &mut dyn Prompter,
    candidates: &[Feature],
    auto_yes: bool,
) -> Result<Vec<Feature>> {
    if auto_yes {
        return Ok(candidates.to_vec());
    }
    let mut chosen = Vec::new();
    for &feature in candidates {
        let answer = prompter.ask(&format!("{} [y/N]", feature.prompt()))?;
        if Toggle::from_answer(&answer).is_yes() {
            chosen.push(feature);
        }
    }
    Ok(chosen)
}

// ============================================================================
// Collector
// ============================================================================

/// Interactive collection of an `InstallationConfig`.
pub struct InputCollector<'a> {
    exec: &'a dyn Executor,
    prompter: &'a mut dyn Prompter,
    backend: &'a SelectorBackend,
}

impl<'a> InputCollector<'a> {
    pub fn new(
        exec: &'a dyn Executor,
        prompter: &'a mut dyn Prompter,
        backend: &'a SelectorBackend,
    ) -> Self {
        Self {
            exec,
            prompter,
            backend,
        }
    }

    /// Access the prompter (confirmation gates after collection).
    pub fn prompter(&mut self) -> &mut dyn Prompter {
        &mut *self.prompter
    }

    fn choose(&mut self, title: &str, items: &[String]) -> Result<usize> {
        self.backend.select(self.exec, &mut *self.prompter, title, items)
    }

    /// Pick from an enumeration. A cancelled or unrecognized choice falls
    /// back to the enumeration's default.
    fn choose_or_default<T>(&mut self, title: &str, label: fn(T) -> String) -> Result<T>
    where
        T: IntoEnumIterator + Default + Copy + std::fmt::Display,
    {
        let values: Vec<T> = T::iter().collect();
        let items: Vec<String> = values.iter().map(|v| label(*v)).collect();
        match self.choose(title, &items) {
            Ok(idx) => Ok(values[idx]),
            Err(e) if e.is_cancellation() || matches!(e, InstallError::Validation(_)) => {
                let fallback = T::default();
                warn!("{} not chosen ({}), using '{}'", title, e, fallback);
                Ok(fallback)
            }
            Err(e) => Err(e),
        }
    }

    pub fn collect_username(&mut self) -> Result<String> {
        let name = self.prompter.ask("Username:")?;
        let name = name.trim().to_string();
        validate_username(&name)?;
        Ok(name)
    }

    pub fn collect_user_password(&mut self, username: &str) -> Result<Secret> {
        let password = self.prompter.ask_secret(&format!("Password for {}:", username))?;
        let confirmation = self.prompter.ask_secret("Confirm password:")?;
        check_password_pair(password, &confirmation)
    }

    /// Empty answer locks root. A non-empty one must be confirmed.
    pub fn collect_root_password(&mut self) -> Result<Option<Secret>> {
        let password = self
            .prompter
            .ask_secret("Root password (empty to lock the root account):")?;
        match root_password_policy(password) {
            None => {
                info!("Root account will be locked");
                Ok(None)
            }
            Some(password) => {
                let confirmation = self.prompter.ask_secret("Confirm root password:")?;
                check_password_pair(password, &confirmation).map(Some)
            }
        }
    }

    pub fn collect_hostname(&mut self, default: &str) -> Result<String> {
        let hostname = self.prompter.ask_with_default("Hostname", default)?;
        validate_hostname(&hostname)?;
        Ok(hostname)
    }

    /// Choose the installation disk among whole disks.
    pub fn collect_disk(&mut self) -> Result<PathBuf> {
        let disks = list_disks(self.exec)?;
        if disks.is_empty() {
            return Err(InstallError::precondition(
                "no installable disk found (looked for sd*, vd* and nvme*n*)",
            ));
        }
        let labels: Vec<String> = disks.iter().map(|d| d.label()).collect();
        let idx = self.choose("Installation disk", &labels)?;
        Ok(disks[idx].path.clone())
    }

    pub fn collect_mode(&mut self) -> Result<PartitionMode> {
        let modes: Vec<PartitionMode> = PartitionMode::iter().collect();
        let labels: Vec<String> = modes.iter().map(|m| m.label().to_string()).collect();
        let idx = self.choose("Partitioning", &labels)?;
        Ok(modes[idx])
    }

    pub fn collect_layout(&mut self) -> Result<SubvolumeLayout> {
        self.choose_or_default("Subvolume layout", |l: SubvolumeLayout| match l {
            SubvolumeLayout::Full => "full: @ @home @var @tmp @snapshots".to_string(),
            SubvolumeLayout::Turbo => "turbo: @ @home @snapshots".to_string(),
        })
    }

    pub fn collect_gpu(&mut self) -> Result<GpuDriver> {
        self.choose_or_default("GPU driver", |g: GpuDriver| g.label().to_string())
    }

    pub fn collect_profile(&mut self) -> Result<Profile> {
        self.choose_or_default("Desktop profile", |p: Profile| p.description().to_string())
    }

    pub fn collect_mirror_countries(&mut self) -> Result<Vec<String>> {
        let answer = self
            .prompter
            .ask("Mirror countries, comma separated (empty for the default mirrorlist):")?;
        Ok(parse_mirror_countries(&answer))
    }

    pub fn collect_features(&mut self, auto_yes: bool) -> Result<Vec<Feature>> {
        let all: Vec<Feature> = Feature::iter().collect();
        select_features(&mut *self.prompter, &all, auto_yes)
    }

    /// Run the full interview. Defaults come from `InstallationConfig::default`.
    pub fn collect_all(&mut self) -> Result<InstallationConfig> {
        let defaults = InstallationConfig::default();

        let username = self.collect_username()?;
        let user_password = self.collect_user_password(&username)?;
        let root_password = self.collect_root_password()?;
        let hostname = self.collect_hostname(&defaults.hostname)?;
        let timezone = self.prompter.ask_with_default("Timezone", &defaults.timezone)?;
        let locale = self.prompter.ask_with_default("Locale", &defaults.locale)?;
        let keymap = self.prompter.ask_with_default("Keymap", &defaults.keymap)?;

        let install_disk = self.collect_disk()?;
        let partition_mode = self.collect_mode()?;
        let subvolume_layout = self.collect_layout()?;
        let gpu_driver = self.collect_gpu()?;
        let desktop = self.collect_profile()?;
        let mirror_countries = self.collect_mirror_countries()?;
        let features = self.collect_features(false)?;

        Ok(InstallationConfig {
            username,
            user_password,
            root_password,
            hostname,
            timezone,
            locale,
            keymap,
            install_disk: install_disk.display().to_string(),
            partition_mode,
            subvolume_layout,
            gpu_driver,
            desktop,
            mirror_countries,
            features,
        })
    }
}

/// Show `summary` and require the literal `yes`.
pub fn confirm_with_prompter(prompter: &mut dyn Prompter, summary: &str) -> Result<()> {
    prompter.say(summary)?;
    let answer = prompter.ask(&format!(
        "Type '{}' to continue. Data on the listed partitions will be lost:",
        CONFIRMATION_WORD
    ))?;
    confirm_destructive(&answer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::ScriptedPrompter;
    use crate::tool_runner::RecordingExecutor;

    const LSBLK: &str = r#"{"blockdevices":[
        {"name":"sda","path":"/dev/sda","size":500107862016,"type":"disk","model":"Samsung SSD","tran":"sata"},
        {"name":"sr0","path":"/dev/sr0","size":1073741312,"type":"rom","model":null,"tran":"sata"}
    ]}"#;

    #[test]
    fn test_username_rules() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("_svc-01").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username("root").is_err());
        assert!(validate_username("Alice").is_err());
        assert!(validate_username("1alice").is_err());
        assert!(validate_username(&"a".repeat(33)).is_err());
    }

    #[test]
    fn test_hostname_rules() {
        assert!(validate_hostname("archlinux").is_ok());
        assert!(validate_hostname("web-01").is_ok());
        assert!(validate_hostname("").is_err());
        assert!(validate_hostname("-web").is_err());
        assert!(validate_hostname("web.local").is_err());
        assert!(validate_hostname(&"h".repeat(64)).is_err());
    }

    #[test]
    fn test_password_pair() {
        assert!(check_password_pair(Secret::new("pw"), &Secret::new("pw")).is_ok());
        let mismatch = check_password_pair(Secret::new("pw"), &Secret::new("pW")).expect_err("mismatch");
        assert!(mismatch.to_string().contains("do not match"));
        assert!(check_password_pair(Secret::default(), &Secret::default()).is_err());
    }

    #[test]
    fn test_empty_root_password_locks_root() {
        assert!(root_password_policy(Secret::default()).is_none());
        assert!(root_password_policy(Secret::new("x")).is_some());
    }

    #[test]
    fn test_confirm_destructive_requires_exact_yes() {
        assert!(confirm_destructive("yes").is_ok());
        assert!(confirm_destructive("yes\n").is_ok());
        for answer in ["", "y", "YES", "Yes", " yes", "yes ", "no"] {
            let err = confirm_destructive(answer).expect_err("must refuse");
            assert!(err.is_cancellation(), "{:?}", answer);
        }
    }

    #[test]
    fn test_parse_mirror_countries() {
        assert_eq!(parse_mirror_countries("de, fr ,,US"), vec!["DE", "FR", "US"]);
        assert!(parse_mirror_countries("  ").is_empty());
    }

    #[test]
    fn test_select_features_gates_each_one() {
        let mut prompter = ScriptedPrompter::new(["y", "n", "yes"]);
        let chosen = select_features(
            &mut prompter,
            &[Feature::MirrorTuning, Feature::Fonts, Feature::ShellEnvironment],
            false,
        )
        .expect("features");
        assert_eq!(chosen, vec![Feature::MirrorTuning, Feature::ShellEnvironment]);
    }

    #[test]
    fn test_select_features_auto_yes_asks_nothing() {
        let mut prompter = ScriptedPrompter::default();
        let chosen = select_features(&mut prompter, &[Feature::Fonts], true).expect("features");
        assert_eq!(chosen, vec![Feature::Fonts]);
        assert!(prompter.transcript().is_empty());
    }

    #[test]
    fn test_unrecognized_gpu_and_profile_fall_back_to_defaults() {
        let exec = RecordingExecutor::new();
        let mut prompter = ScriptedPrompter::new(["9", "kde please"]);
        let backend = SelectorBackend::Numbered;
        let mut collector = InputCollector::new(&exec, &mut prompter, &backend);
        assert_eq!(collector.collect_gpu().expect("gpu"), GpuDriver::Generic);
        assert_eq!(collector.collect_profile().expect("profile"), Profile::Minimal);
    }

    #[test]
    fn test_out_of_range_disk_number_is_validation() {
        let exec = RecordingExecutor::new().respond("lsblk", LSBLK);
        let mut prompter = ScriptedPrompter::new(["3"]);
        let backend = SelectorBackend::Numbered;
        let err = InputCollector::new(&exec, &mut prompter, &backend)
            .collect_disk()
            .expect_err("invalid disk number");
        assert!(matches!(err, InstallError::Validation(_)));
    }

    #[test]
    fn test_collect_all_builds_config() {
        let exec = RecordingExecutor::new().respond("lsblk", LSBLK);
        let mut answers = vec![
            "alice", "pw", "pw", "",
            "", "Europe/Berlin", "", "de",
            "1", "1", "2", "", "2",
            "de,at",
        ];
        answers.extend(["n"; 8]);
        let mut prompter = ScriptedPrompter::new(answers);
        let backend = SelectorBackend::Numbered;

        let config = InputCollector::new(&exec, &mut prompter, &backend)
            .collect_all()
            .expect("config");
        assert_eq!(config.username, "alice");
        assert!(config.root_password.is_none());
        assert_eq!(config.hostname, "archlinux");
        assert_eq!(config.timezone, "Europe/Berlin");
        assert_eq!(config.keymap, "de");
        assert_eq!(config.install_disk, "/dev/sda");
        assert_eq!(config.partition_mode, PartitionMode::EntireDisk);
        assert_eq!(config.subvolume_layout, SubvolumeLayout::Turbo);
        assert_eq!(config.gpu_driver, GpuDriver::Generic);
        assert_eq!(config.desktop, Profile::Gnome);
        assert_eq!(config.mirror_countries, vec!["DE", "AT"]);
        assert!(config.features.is_empty());
        assert!(config.validate().is_ok());
        assert_eq!(prompter.remaining(), 0);
    }

    #[test]
    fn test_no_disks_is_precondition() {
        let exec = RecordingExecutor::new().respond("lsblk", r#"{"blockdevices":[]}"#);
        let mut prompter = ScriptedPrompter::default();
        let backend = SelectorBackend::Numbered;
        let err = InputCollector::new(&exec, &mut prompter, &backend)
            .collect_disk()
            .expect_err("no disks");
        assert!(matches!(err, InstallError::Precondition(_)));
    }

    #[test]
    fn test_cancelled_mode_is_fatal() {
        let exec = RecordingExecutor::new();
        let mut prompter = ScriptedPrompter::new([""]);
        let backend = SelectorBackend::Numbered;
        let err = InputCollector::new(&exec, &mut prompter, &backend)
            .collect_mode()
            .expect_err("cancelled");
        assert!(err.is_cancellation());
    }

    #[test]
    fn test_confirm_with_prompter_shows_summary() {
        let mut prompter = ScriptedPrompter::new(["no"]);
        let err = confirm_with_prompter(&mut prompter, "Disk: /dev/sda").expect_err("refused");
        assert!(err.is_cancellation());
        assert_eq!(prompter.transcript()[0], "Disk: /dev/sda");
    }
}
