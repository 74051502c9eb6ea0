//! Feature Installer
//!
//! Applies optional feature sets either to the running system
//! (`archsetup post-install`) or to a freshly installed target through
//! `arch-chroot`. Each feature installs its packages, makes its
//! configuration edits through `confedit`, and enables its units.
//!
//! # Failure Policy
//!
//! Fail-fast: the first failing feature stops the run and the error names
//! the feature and the ones already applied. Every edit is idempotent, so
//! re-running after a fix only redoes what is missing.
//!
//! # Privilege Dropping
//!
//! `makepkg` refuses to run as root. The AUR helper is built as the
//! target user under a `PrivilegeGrant` so that `makepkg -si` can call
//! `sudo pacman` without a password.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::confedit::{
    apply_edit, enable_section, set_directive, upsert_managed_block, CONFIG_FILE_MODE,
};
use crate::error::InstallError;
use crate::logic::resolver::feature_package_set;
use crate::privilege::PrivilegeGrant;
use crate::tool_args::{ToolArgs, ToolCommand};
use crate::tool_runner::{run_command_checked, CommandOutput, Executor};
use crate::tools::packages::{CurlDownloadArgs, GitCloneArgs, PacmanInstallArgs};
use crate::tools::system::{DaemonReloadArgs, FcCacheArgs, GrubMkconfigArgs, SystemctlEnableArgs};
use crate::tools::user::{ChownArgs, ChshArgs, RunAsUserArgs, UsermodAppendGroupsArgs};
use crate::types::Feature;

pub const YAY_BIN_REPO: &str = "https://aur.archlinux.org/yay-bin.git";
pub const OH_MY_ZSH_INSTALLER: &str =
    "https://raw.githubusercontent.com/ohmyzsh/ohmyzsh/master/tools/install.sh";
pub const GRUB_BTRFSD_OVERRIDE: &str =
    "[Service]\nExecStart=\nExecStart=/usr/bin/grub-btrfsd --syslog /.snapshots\n";

// ============================================================================
// Target
// ============================================================================

/// The system a step acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    root: PathBuf,
    chrooted: bool,
}

impl Target {
    /// The running system.
    pub fn live() -> Self {
        Self {
            root: PathBuf::from("/"),
            chrooted: false,
        }
    }

    /// A system mounted at `root`, reached through `arch-chroot`.
    pub fn chroot(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            chrooted: true,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_chrooted(&self) -> bool {
        self.chrooted
    }

    /// Host path of an absolute path inside the target.
    pub fn path(&self, inside: impl AsRef<Path>) -> PathBuf {
        let inside = inside.as_ref();
        self.root.join(inside.strip_prefix("/").unwrap_or(inside))
    }

    /// Command for `args`, wrapped in arch-chroot when needed.
    pub fn command<T: ToolArgs + ?Sized>(&self, args: &T) -> ToolCommand {
        let cmd = args.to_command();
        if self.chrooted { cmd.in_chroot(&self.root) } else { cmd }
    }

    pub fn run<T: ToolArgs + ?Sized>(&self, exec: &dyn Executor, args: &T) -> crate::error::Result<CommandOutput> {
        run_command_checked(exec, &self.command(args))
    }

    /// Enable units. They are only started on a live system.
    pub fn enable(&self, exec: &dyn Executor, units: &[&str]) -> crate::error::Result<()> {
        if units.is_empty() {
            return Ok(());
        }
        let args = SystemctlEnableArgs {
            units: units.iter().map(|u| u.to_string()).collect(),
            now: !self.chrooted,
        };
        self.run(exec, &args).map(|_| ())
    }

    /// `systemctl daemon-reload`, which only makes sense on a live system.
    pub fn daemon_reload(&self, exec: &dyn Executor) -> crate::error::Result<()> {
        if self.chrooted {
            return Ok(());
        }
        self.run(exec, &DaemonReloadArgs).map(|_| ())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.chrooted {
            write!(f, "chroot {}", self.root.display())
        } else {
            write!(f, "running system")
        }
    }
}

// ============================================================================
// Context & Report
// ============================================================================

/// Everything a feature needs.
pub struct FeatureContext<'a> {
    pub exec: &'a dyn Executor,
    pub target: &'a Target,
    /// Regular user owning shell config and AUR builds.
    pub username: Option<String>,
    pub mirror_countries: Vec<String>,
}

impl FeatureContext<'_> {
    fn require_user(&self, feature: Feature) -> Result<&str> {
        self.username.as_deref().ok_or_else(|| {
            InstallError::precondition(format!(
                "feature '{}' needs a regular user (pass --user NAME)",
                feature
            ))
            .into()
        })
    }

    fn home(&self, username: &str) -> PathBuf {
        PathBuf::from(format!("/home/{}", username))
    }

    fn edit<F>(&self, inside: impl AsRef<Path>, f: F) -> Result<bool>
    where
        F: FnOnce(&str) -> String,
    {
        let path = self.target.path(inside);
        apply_edit(self.exec, &path, f).with_context(|| format!("Failed to edit {}", path.display()))
    }
}

/// Features applied by `run_features`, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureReport {
    pub applied: Vec<Feature>,
}

impl fmt::Display for FeatureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.applied.is_empty() {
            return write!(f, "No features applied");
        }
        let names: Vec<String> = self.applied.iter().map(|f| f.to_string()).collect();
        write!(f, "Applied features: {}", names.join(", "))
    }
}

// ============================================================================
// Feature Installer
// ============================================================================

/// Apply `features` in catalogue order, stopping at the first failure.
pub fn run_features(ctx: &FeatureContext<'_>, features: &[Feature]) -> Result<FeatureReport> {
    let mut ordered = features.to_vec();
    ordered.sort();
    ordered.dedup();

    let mut report = FeatureReport::default();
    for feature in ordered {
        info!("Installing feature '{}' on {}", feature, ctx.target);
        install_feature(ctx, feature).with_context(|| {
            let done: Vec<String> = report.applied.iter().map(|f| f.to_string()).collect();
            format!(
                "Feature '{}' failed (already applied: {})",
                feature,
                if done.is_empty() { "none".to_string() } else { done.join(", ") }
            )
        })?;
        report.applied.push(feature);
    }
    Ok(report)
}

/// Install one feature: packages, configuration, services.
pub fn install_feature(ctx: &FeatureContext<'_>, feature: Feature) -> Result<()> {
    let packages = feature_package_set(feature);
    if !packages.is_empty() {
        ctx.target
            .run(ctx.exec, &PacmanInstallArgs::new(packages.iter().copied()))
            .with_context(|| format!("Failed to install packages for '{}'", feature))?;
    }

    match feature {
        Feature::MirrorTuning => configure_reflector(ctx),
        Feature::PacmanTweaks => configure_pacman(ctx),
        Feature::AurHelper => install_yay(ctx),
        Feature::ShellEnvironment => configure_shell(ctx),
        Feature::Fonts => {
            ctx.target.run(ctx.exec, &FcCacheArgs)?;
            Ok(())
        }
        Feature::Virtualization => configure_virtualization(ctx),
        Feature::RemovableMedia => Ok(()),
        Feature::SnapshotBoot => configure_grub_btrfs(ctx),
    }
}

/// reflector.conf mirroring the ranking options, plus the weekly timer.
pub fn reflector_conf(countries: &[String]) -> String {
    let mut lines = vec![
        "--save /etc/pacman.d/mirrorlist".to_string(),
        "--protocol https".to_string(),
    ];
    if !countries.is_empty() {
        lines.push(format!("--country {}", countries.join(",")));
    }
    lines.push("--latest 20".to_string());
    lines.push("--sort rate".to_string());
    lines.join("\n")
}

fn configure_reflector(ctx: &FeatureContext<'_>) -> Result<()> {
    let body = reflector_conf(&ctx.mirror_countries);
    ctx.edit("/etc/xdg/reflector/reflector.conf", |c| {
        upsert_managed_block(c, "reflector", &body)
    })?;
    ctx.target.enable(ctx.exec, &["reflector.timer"])?;
    Ok(())
}

fn configure_pacman(ctx: &FeatureContext<'_>) -> Result<()> {
    ctx.edit("/etc/pacman.conf", |c| {
        let c = set_directive(c, Some("options"), "Color", "Color");
        let c = set_directive(&c, Some("options"), "ParallelDownloads", "ParallelDownloads = 10");
        let c = set_directive(&c, Some("options"), "ILoveCandy", "ILoveCandy");
        let c = set_directive(&c, Some("options"), "VerbosePkgLists", "VerbosePkgLists");
        enable_section(&c, "multilib", &["Include = /etc/pacman.d/mirrorlist"])
    })?;
    ctx.edit("/etc/makepkg.conf", |c| {
        set_directive(c, None, "MAKEFLAGS", "MAKEFLAGS=\"-j$(nproc)\"")
    })?;
    Ok(())
}

fn install_yay(ctx: &FeatureContext<'_>) -> Result<()> {
    let user = ctx.require_user(Feature::AurHelper)?;
    if ctx.exec.exists(&ctx.target.path("/usr/bin/yay")) {
        info!("yay already installed");
        return Ok(());
    }

    let build_dir = ctx.home(user).join(".cache/archsetup/yay-bin");
    if !ctx.exec.exists(&ctx.target.path(&build_dir)) {
        ctx.target.run(
            ctx.exec,
            &GitCloneArgs {
                url: YAY_BIN_REPO.to_string(),
                dest: build_dir.clone(),
            },
        )?;
    }
    ctx.target.run(
        ctx.exec,
        &ChownArgs {
            username: user.to_string(),
            path: ctx.home(user).join(".cache/archsetup"),
        },
    )?;

    let grant = PrivilegeGrant::acquire(ctx.exec, &ctx.target.path("/etc/sudoers.d"), user)?;
    let build = RunAsUserArgs::new(user, "makepkg")
        .workdir(&build_dir)
        .arg("-si")
        .arg("--noconfirm");
    let result = ctx.target.run(ctx.exec, &build);
    grant.release()?;
    result.context("makepkg failed to build yay-bin")?;
    Ok(())
}

/// Managed block appended to the user's `.zshrc`.
pub fn zshrc_block() -> &'static str {
    "export ZSH=\"$HOME/.oh-my-zsh\"\n\
     ZSH_THEME=\"robbyrussell\"\n\
     plugins=(git sudo history)\n\
     source \"$ZSH/oh-my-zsh.sh\"\n\
     source /usr/share/zsh/plugins/zsh-autosuggestions/zsh-autosuggestions.zsh\n\
     source /usr/share/zsh/plugins/zsh-syntax-highlighting/zsh-syntax-highlighting.zsh\n\
     alias ll='ls -alF'\n\
     alias update='sudo pacman -Syu'"
}

fn configure_shell(ctx: &FeatureContext<'_>) -> Result<()> {
    let user = ctx.require_user(Feature::ShellEnvironment)?;
    let home = ctx.home(user);

    if ctx.exec.exists(&ctx.target.path(home.join(".oh-my-zsh"))) {
        info!("oh-my-zsh already present for {}", user);
    } else {
        let script = PathBuf::from("/tmp/archsetup-ohmyzsh-install.sh");
        ctx.target.run(
            ctx.exec,
            &CurlDownloadArgs {
                url: OH_MY_ZSH_INSTALLER.to_string(),
                output: script.clone(),
            },
        )?;
        let install = RunAsUserArgs::new(user, "sh")
            .env("RUNZSH", "no")
            .env("CHSH", "no")
            .env("KEEP_ZSHRC", "yes")
            .arg(script.display().to_string())
            .arg("--unattended");
        ctx.target.run(ctx.exec, &install).context("oh-my-zsh installer failed")?;
        ctx.exec.remove_file(&ctx.target.path(&script))?;
    }

    let zshrc = home.join(".zshrc");
    if ctx.edit(&zshrc, |c| upsert_managed_block(c, "shell", zshrc_block()))? {
        ctx.target.run(
            ctx.exec,
            &ChownArgs {
                username: user.to_string(),
                path: zshrc,
            },
        )?;
    }

    ctx.target.run(
        ctx.exec,
        &ChshArgs {
            username: user.to_string(),
            shell: "/usr/bin/zsh".to_string(),
        },
    )?;
    Ok(())
}

fn configure_virtualization(ctx: &FeatureContext<'_>) -> Result<()> {
    ctx.edit("/etc/libvirt/libvirtd.conf", |c| {
        let c = set_directive(c, None, "unix_sock_group", "unix_sock_group = \"libvirt\"");
        set_directive(&c, None, "unix_sock_rw_perms", "unix_sock_rw_perms = \"0770\"")
    })?;
    match ctx.username.as_deref() {
        Some(user) => {
            ctx.target.run(
                ctx.exec,
                &UsermodAppendGroupsArgs {
                    username: user.to_string(),
                    groups: vec!["libvirt".to_string()],
                },
            )?;
        }
        None => warn!("No regular user given, nobody was added to the libvirt group"),
    }
    ctx.target.enable(ctx.exec, &["libvirtd.service"])?;
    Ok(())
}

fn configure_grub_btrfs(ctx: &FeatureContext<'_>) -> Result<()> {
    let dropin = "/etc/systemd/system/grub-btrfsd.service.d/override.conf";
    let path = ctx.target.path(dropin);
    let current = ctx.exec.read_to_string(&path)?;
    if current.as_deref() != Some(GRUB_BTRFSD_OVERRIDE) {
        ctx.exec.create_dir_all(path.parent().unwrap_or(ctx.target.root()))?;
        ctx.exec.write_file(&path, GRUB_BTRFSD_OVERRIDE, CONFIG_FILE_MODE)?;
    }
    ctx.target.daemon_reload(ctx.exec)?;
    ctx.target.enable(ctx.exec, &["grub-btrfsd.service"])?;
    ctx.target.run(ctx.exec, &GrubMkconfigArgs)?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
