//! System Installer
//!
//! Materializes a bootable base system onto the mounted target and drives
//! the end-to-end pipeline through the install stage machine:
//!
//! ```text
//! validate config → plan storage → confirm "yes" → partition/format/mount
//!   → rank mirrors + pacstrap → genfstab (append) → chroot configuration
//!   → features in chroot → done
//! ```
//!
//! # Failure Policy
//!
//! The first failing phase stops the run. The context records the stage
//! it failed in, every mount made by the run is unmounted newest first
//! (unless rollback is disabled), and the operator gets the resume hint for
//! that stage. Partitions and filesystems already written are left as they
//! are.
//!
//! # What This Explicitly Refuses To Do
//!
//! - Touching the disk before the confirmation gate passed. The stage
//!   machine rejects `PreparingDisk` without a recorded confirmation.
//! - Overwriting the target fstab. genfstab output is always appended.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::confedit::{
    apply_edit, enable_locale, set_directive, set_mkinitcpio_hooks, upsert_managed_block,
};
use crate::config_file::InstallationConfig;
use crate::engine::apply::{apply_plan, MountedTarget};
use crate::engine::probe::{detect_manual_layout, probe_layout, probe_partitions};
use crate::engine::storage::{calculate_storage_plan, StorageInput, StoragePlan};
use crate::error::InstallError;
use crate::hardware::{FirmwareMode, HardwareInfo};
use crate::input::confirm_with_prompter;
use crate::install_state::{InstallStage, InstallerContext, RollbackAction};
use crate::logic::postinstall::{run_features, FeatureContext, FeatureReport, Target};
use crate::logic::preinstall::{preinstall_config_from, rank_mirrors, MirrorRankResult};
use crate::logic::resolver::{resolve_packages, resolve_services};
use crate::prompt::Prompter;
use crate::tool_args::is_dry_run;
use crate::tool_runner::{run_checked, Executor};
use crate::tools::disk::CfdiskArgs;
use crate::tools::system::{
    BootTarget, GenfstabArgs, GrubInstallArgs, GrubMkconfigArgs, HwclockArgs, LinkTimezoneArgs,
    LocaleGenArgs, MkinitcpioArgs, PacstrapArgs,
};
use crate::tools::user::{ChpasswdArgs, PasswdLockArgs, UseraddArgs};
use crate::types::PartitionMode;

/// Default mount root of the new system.
pub const DEFAULT_TARGET: &str = "/mnt";

/// Initramfs hooks. `btrfs` is required to mount the root subvolume.
pub const MKINITCPIO_HOOKS: &[&str] = &[
    "base",
    "udev",
    "autodetect",
    "microcode",
    "modconf",
    "kms",
    "keyboard",
    "keymap",
    "consolefont",
    "block",
    "btrfs",
    "filesystems",
    "fsck",
];

pub const WHEEL_SUDOERS: &str = "/etc/sudoers.d/10-wheel";
pub const WHEEL_RULE: &str = "%wheel ALL=(ALL:ALL) ALL\n";

/// ESP mountpoint inside the target.
pub const EFI_DIRECTORY: &str = "/boot/efi";

// ============================================================================
// Confirmation Gate
// ============================================================================

/// Last check before the first destructive step.
pub trait ConfirmationGate {
    /// `Ok` to proceed. Anything else aborts with nothing changed.
    fn confirm(&mut self, summary: &str) -> crate::error::Result<()>;
}

/// Requires the operator to type the literal `yes`.
pub struct PromptGate<'a> {
    prompter: &'a mut dyn Prompter,
}

impl<'a> PromptGate<'a> {
    pub fn new(prompter: &'a mut dyn Prompter) -> Self {
        Self { prompter }
    }
}

impl ConfirmationGate for PromptGate<'_> {
    fn confirm(&mut self, summary: &str) -> crate::error::Result<()> {
        confirm_with_prompter(&mut *self.prompter, summary)
    }
}

/// Confirmation given up front (`--yes`).
pub struct PreConfirmed;

impl ConfirmationGate for PreConfirmed {
    fn confirm(&mut self, summary: &str) -> crate::error::Result<()> {
        info!("Destructive steps pre-confirmed with --yes:\n{}", summary);
        Ok(())
    }
}

// ============================================================================
// Storage
// ============================================================================

/// Gather what the planner needs for `mode`. Read-only.
///
/// In manual mode this reads the partitions as they are now; the
/// installer runs the partition editor first.
pub fn probe_storage_input(
    exec: &dyn Executor,
    disk: &Path,
    mode: PartitionMode,
) -> crate::error::Result<StorageInput> {
    match mode {
        PartitionMode::EntireDisk => Ok(StorageInput::EntireDisk),
        PartitionMode::FreeSpace => Ok(StorageInput::FreeSpace(probe_layout(exec, disk)?)),
        PartitionMode::Manual => {
            let partitions = probe_partitions(exec, disk)?;
            Ok(StorageInput::Manual(detect_manual_layout(&partitions)?))
        }
    }
}

/// Hand the disk to cfdisk until the operator quits it.
pub fn run_partition_editor(exec: &dyn Executor, disk: &Path) -> crate::error::Result<()> {
    info!("Starting cfdisk on {}; write the table and quit to continue", disk.display());
    run_checked(
        exec,
        &CfdiskArgs {
            device: disk.to_path_buf(),
        },
    )?;
    Ok(())
}

/// Partition, format and mount according to `plan`.
pub fn prepare_disks(exec: &dyn Executor, plan: &StoragePlan) -> Result<MountedTarget> {
    apply_plan(exec, plan).with_context(|| format!("Failed to prepare {}", plan.disk.display()))
}

// ============================================================================
// Base System
// ============================================================================

/// pacstrap `packages` into the target.
pub fn install_base_system(exec: &dyn Executor, target: &MountedTarget, packages: &[String]) -> Result<()> {
    info!("Installing {} packages into {}", packages.len(), target.root.display());
    run_checked(
        exec,
        &PacstrapArgs {
            root: target.root.clone(),
            packages: packages.to_vec(),
        },
    )
    .context("pacstrap failed")?;
    Ok(())
}

/// Append `genfstab -U` output to the target fstab. Never truncates.
pub fn generate_fstab(exec: &dyn Executor, target: &MountedTarget) -> Result<()> {
    let fstab = target.path("/etc/fstab");
    if is_dry_run() {
        info!("[dry-run] would append genfstab output to {}", fstab.display());
        return Ok(());
    }
    let output = run_checked(
        exec,
        &GenfstabArgs {
            root: target.root.clone(),
        },
    )
    .context("genfstab failed")?;
    if output.stdout.trim().is_empty() {
        return Err(InstallError::precondition(format!(
            "genfstab found no filesystems under {}",
            target.root.display()
        ))
        .into());
    }
    let mut entries = output.stdout;
    if !entries.ends_with('\n') {
        entries.push('\n');
    }
    exec.append_file(&fstab, &entries)
        .with_context(|| format!("Failed to append to {}", fstab.display()))?;
    Ok(())
}

// ============================================================================
// Chroot Configuration
// ============================================================================

/// `/etc/hosts` body for `hostname`.
pub fn hosts_block(hostname: &str) -> String {
    format!(
        "127.0.0.1\tlocalhost\n::1\t\tlocalhost\n127.0.1.1\t{0}.localdomain\t{0}",
        hostname
    )
}

/// UEFI when the target has an ESP, BIOS otherwise.
pub fn boot_target(target: &MountedTarget, firmware: FirmwareMode) -> BootTarget {
    match (&target.efi, firmware) {
        (Some(_), FirmwareMode::Bios) => {
            warn!("ESP present but the live system booted in BIOS mode; installing the UEFI loader anyway");
        }
        (None, FirmwareMode::Uefi) => {
            warn!("Booted in UEFI mode but the plan has no ESP; installing the BIOS loader");
        }
        _ => {}
    }
    match target.efi {
        Some(_) => BootTarget::Uefi {
            efi_directory: PathBuf::from(EFI_DIRECTORY),
        },
        None => BootTarget::Bios {
            disk: target.disk.clone(),
        },
    }
}

fn user_exists(exec: &dyn Executor, target: &MountedTarget, username: &str) -> Result<bool> {
    let passwd = exec.read_to_string(&target.path("/etc/passwd"))?.unwrap_or_default();
    let prefix = format!("{}:", username);
    Ok(passwd.lines().any(|l| l.starts_with(&prefix)))
}

fn edit_target<F>(exec: &dyn Executor, target: &MountedTarget, inside: &str, f: F) -> Result<bool>
where
    F: FnOnce(&str) -> String,
{
    let path = target.path(inside);
    apply_edit(exec, &path, f).with_context(|| format!("Failed to edit {}", path.display()))
}

/// Configure the installed system from inside a chroot.
///
/// Timezone, locale, keymap, hostname, the wheel user and passwords,
/// initramfs, bootloader and services. Every failure is fatal.
pub fn configure_system(
    exec: &dyn Executor,
    target: &MountedTarget,
    config: &InstallationConfig,
    firmware: FirmwareMode,
) -> Result<()> {
    let chroot = Target::chroot(&target.root);

    info!("Setting timezone {}", config.timezone);
    chroot.run(
        exec,
        &LinkTimezoneArgs {
            timezone: config.timezone.clone(),
        },
    )?;
    chroot.run(exec, &HwclockArgs)?;

    info!("Generating locale {}", config.locale);
    edit_target(exec, target, "/etc/locale.gen", |c| enable_locale(c, &config.locale))?;
    chroot.run(exec, &LocaleGenArgs)?;
    edit_target(exec, target, "/etc/locale.conf", |c| {
        set_directive(c, None, "LANG", &format!("LANG={}", config.locale))
    })?;
    edit_target(exec, target, "/etc/vconsole.conf", |c| {
        set_directive(c, None, "KEYMAP", &format!("KEYMAP={}", config.keymap))
    })?;

    edit_target(exec, target, "/etc/hostname", |_| format!("{}\n", config.hostname))?;
    edit_target(exec, target, "/etc/hosts", |c| {
        upsert_managed_block(c, "hosts", &hosts_block(&config.hostname))
    })?;

    if user_exists(exec, target, &config.username)? {
        info!("User {} already exists", config.username);
    } else {
        chroot
            .run(exec, &UseraddArgs::wheel_user(&config.username))
            .with_context(|| format!("Failed to create user {}", config.username))?;
    }
    chroot
        .run(
            exec,
            &ChpasswdArgs {
                username: config.username.clone(),
                password: config.user_password.clone(),
            },
        )
        .with_context(|| format!("Failed to set the password of {}", config.username))?;
    match &config.root_password {
        Some(password) => {
            chroot
                .run(
                    exec,
                    &ChpasswdArgs {
                        username: "root".to_string(),
                        password: password.clone(),
                    },
                )
                .context("Failed to set the root password")?;
        }
        None => {
            info!("Locking the root account");
            chroot.run(
                exec,
                &PasswdLockArgs {
                    username: "root".to_string(),
                },
            )?;
        }
    }
    let sudoers = target.path(WHEEL_SUDOERS);
    if let Some(dir) = sudoers.parent() {
        exec.create_dir_all(dir)?;
    }
    exec.write_file(&sudoers, WHEEL_RULE, crate::privilege::SUDOERS_DROPIN_MODE)?;

    edit_target(exec, target, "/etc/mkinitcpio.conf", |c| {
        set_mkinitcpio_hooks(c, MKINITCPIO_HOOKS)
    })?;
    chroot.run(exec, &MkinitcpioArgs).context("mkinitcpio failed")?;

    let boot = boot_target(target, firmware);
    info!("Installing GRUB ({:?})", boot);
    chroot
        .run(exec, &GrubInstallArgs { target: boot })
        .context("grub-install failed")?;
    chroot.run(exec, &GrubMkconfigArgs).context("grub-mkconfig failed")?;

    let services = resolve_services(config);
    let units: Vec<&str> = services.iter().map(String::as_str).collect();
    chroot.enable(exec, &units)?;

    Ok(())
}

// ============================================================================
// Pipeline
// ============================================================================

/// Knobs that are not part of the installation configuration.
#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// Mount root of the new system
    pub target: PathBuf,
    /// Unmount the target when a run fails
    pub rollback: bool,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            target: PathBuf::from(DEFAULT_TARGET),
            rollback: true,
        }
    }
}

/// What a completed run did.
#[derive(Debug, Clone)]
pub struct InstallReport {
    pub target: PathBuf,
    pub disk: PathBuf,
    pub packages: usize,
    pub mirrors: MirrorRankResult,
    pub features: FeatureReport,
}

impl fmt::Display for InstallReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Installed onto {} (mounted at {})", self.disk.display(), self.target.display())?;
        writeln!(f, "  Packages: {}", self.packages)?;
        writeln!(f, "  Mirrors:  {}", self.mirrors)?;
        write!(f, "  {}", self.features)
    }
}

/// End-to-end installation over one configuration.
pub struct Installer<'a> {
    exec: &'a dyn Executor,
    config: InstallationConfig,
    hardware: HardwareInfo,
    options: InstallOptions,
    context: InstallerContext,
    mounted: Option<MountedTarget>,
}

impl<'a> Installer<'a> {
    pub fn new(
        exec: &'a dyn Executor,
        config: InstallationConfig,
        hardware: HardwareInfo,
        options: InstallOptions,
    ) -> Self {
        Self {
            exec,
            config,
            hardware,
            options,
            context: InstallerContext::with_hardware(hardware),
            mounted: None,
        }
    }

    pub fn context(&self) -> &InstallerContext {
        &self.context
    }

    /// Run every stage. On failure, roll back and return the error with
    /// the failed stage and its resume hint attached.
    pub fn run(&mut self, gate: &mut dyn ConfirmationGate) -> Result<InstallReport> {
        match self.run_stages(gate) {
            Ok(report) => Ok(report),
            Err(e) => {
                let stage = self.context.current_stage();
                error!("Installation failed during '{}': {:#}", stage, e);
                if let Err(fail_err) = self.context.fail() {
                    warn!("{}", fail_err);
                }
                self.roll_back(stage);
                Err(e.context(format!(
                    "installation failed during '{}'. {}",
                    stage,
                    stage.resume_hint()
                )))
            }
        }
    }

    fn roll_back(&mut self, stage: InstallStage) {
        if stage.rollback() != RollbackAction::UnmountTarget {
            return;
        }
        let Some(target) = self.mounted.as_mut() else {
            return;
        };
        if !self.options.rollback {
            warn!(
                "Rollback disabled, leaving {} mounted for inspection",
                target.root.display()
            );
            return;
        }
        info!("Rolling back: unmounting {} mount(s)", target.mounts().len());
        if let Err(e) = target.unmount_all(self.exec) {
            warn!("Rollback incomplete: {}", e);
        }
    }

    fn run_stages(&mut self, gate: &mut dyn ConfirmationGate) -> Result<InstallReport> {
        let exec = self.exec;

        self.context.transition_to(InstallStage::CollectingInput)?;
        self.config.validate().context("Invalid installation configuration")?;
        let disk = PathBuf::from(self.config.install_disk.trim());
        info!("Hardware: {}", self.hardware);

        self.context.transition_to(InstallStage::PlanningStorage)?;
        if self.config.partition_mode == PartitionMode::Manual {
            run_partition_editor(exec, &disk)?;
        }
        let input = probe_storage_input(exec, &disk, self.config.partition_mode)?;
        let plan = calculate_storage_plan(&disk, &input, self.config.subvolume_layout, &self.options.target)?;

        self.context.transition_to(InstallStage::AwaitingConfirmation)?;
        let summary = format!("{}\n\n{}", self.config.summary(), plan.summary());
        gate.confirm(&summary)?;
        self.context.confirm_destructive_operations();

        self.context.transition_to(InstallStage::PreparingDisk)?;
        let target = prepare_disks(exec, &plan)?;
        let target = self.mounted.insert(target).clone();

        self.context.transition_to(InstallStage::InstallingBaseSystem)?;
        let mirrors = rank_mirrors(exec, self.hardware.network, &preinstall_config_from(&self.config));
        info!("Mirrors: {}", mirrors);
        let packages = resolve_packages(&self.config, self.hardware.cpu);
        install_base_system(exec, &target, &packages)?;

        self.context.transition_to(InstallStage::GeneratingFstab)?;
        generate_fstab(exec, &target)?;

        self.context.transition_to(InstallStage::ConfiguringSystem)?;
        configure_system(exec, &target, &self.config, self.hardware.firmware)?;

        self.context.transition_to(InstallStage::InstallingFeatures)?;
        let features = if self.config.features.is_empty() {
            FeatureReport::default()
        } else {
            let chroot = Target::chroot(&target.root);
            let ctx = FeatureContext {
                exec,
                target: &chroot,
                username: Some(self.config.username.clone()),
                mirror_countries: self.config.mirror_countries.clone(),
            };
            run_features(&ctx, &self.config.features)?
        };

        self.context.transition_to(InstallStage::Completed)?;
        info!("Installation complete");

        Ok(InstallReport {
            target: target.root.clone(),
            disk: target.disk.clone(),
            packages: packages.len(),
            mirrors,
            features,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
