//! archsetup - Main entry point
//!
//! Parses the command line, sets up logging and signal handling, then hands
//! off to the library: the installation pipeline, the post-install feature
//! installer, the front-end handoff, or one of the read-only helpers.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use clap::Parser;
use strum::IntoEnumIterator;
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use archsetup::cli::{Cli, Commands};
use archsetup::config_file::InstallationConfig;
use archsetup::console;
use archsetup::engine::apply::apply_plan;
use archsetup::engine::probe::list_disks;
use archsetup::engine::storage::calculate_storage_plan;
use archsetup::frontend::run_frontend;
use archsetup::hardware::HardwareInfo;
use archsetup::input::{parse_mirror_countries, select_features, validate_username, InputCollector};
use archsetup::installer::{
    probe_storage_input, ConfirmationGate, InstallOptions, Installer, PreConfirmed, PromptGate,
};
use archsetup::logic::postinstall::{run_features, FeatureContext, Target};
use archsetup::process_guard;
use archsetup::prompt::TtyPrompter;
use archsetup::sanity::{run_preflight_checks, INSTALL_BINARIES, POST_INSTALL_BINARIES};
use archsetup::selector::{ensure_fzf, SelectorBackend};
use archsetup::tool_args::enable_dry_run;
use archsetup::tool_runner::{Executor, RecordingExecutor, SystemExecutor};
use archsetup::types::{Feature, PartitionMode, SubvolumeLayout};

/// Stderr always; `--log-file` appends a plain-text copy.
fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_layer = match log_file {
        Some(path) => {
            let file: File = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)).boxed())
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose, cli.log_file.as_deref()) {
        console::error(&format!("{:#}", e));
        return ExitCode::FAILURE;
    }

    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to install signal handlers: {}", e);
    }
    process_guard::install_panic_hook();

    if cli.dry_run {
        enable_dry_run();
        console::warn("Dry-run mode: destructive commands and file writes are skipped");
    }

    let result = run(cli.command);
    process_guard::run_cleanup();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            console::error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

fn run(command: Option<Commands>) -> Result<()> {
    let exec = SystemExecutor::new();

    match command {
        None => install(&exec, None, false, InstallOptions::default()),
        Some(Commands::Install {
            config,
            yes,
            target,
            no_rollback,
        }) => install(
            &exec,
            config.as_deref(),
            yes,
            InstallOptions {
                target,
                rollback: !no_rollback,
            },
        ),
        Some(Commands::PostInstall {
            yes,
            user,
            features,
            mirror_countries,
        }) => post_install(
            &exec,
            yes,
            user,
            features.as_deref(),
            mirror_countries.as_deref(),
        ),
        Some(Commands::Handoff { frontend }) => handoff(&exec, &frontend),
        Some(Commands::Validate { config }) => validate(&config),
        Some(Commands::Plan {
            disk,
            mode,
            layout,
            target,
            show_commands,
        }) => plan(&exec, &disk, mode, layout, &target, show_commands),
        Some(Commands::Disks) => disks(&exec),
    }
}

/// Ask for every value on the terminal, using fzf when it can be had.
fn collect_interactively(
    exec: &dyn Executor,
    prompter: &mut TtyPrompter,
    hardware: &HardwareInfo,
) -> Result<InstallationConfig> {
    if !ensure_fzf(exec, hardware.network) {
        debug!("fzf unavailable, menus fall back to dialog or numbered lists");
    }
    let backend = SelectorBackend::resolve();
    let config = InputCollector::new(exec, prompter, &backend).collect_all()?;
    Ok(config)
}

fn install(exec: &dyn Executor, config_path: Option<&Path>, yes: bool, options: InstallOptions) -> Result<()> {
    console::banner("archsetup: Arch Linux installation");
    run_preflight_checks(INSTALL_BINARIES)?;

    let hardware = HardwareInfo::detect();
    info!("{}", hardware);
    if !hardware.network.is_online() {
        console::warn("No internet connection detected; pacstrap will fail without one");
    }

    // Unattended only with both --config and --yes
    let mut tty = match (config_path, yes) {
        (Some(_), true) => None,
        _ => Some(TtyPrompter::open().context(
            "No terminal for prompts; pass --config and --yes to install unattended",
        )?),
    };

    let config = match (config_path, tty.as_mut()) {
        (Some(path), _) => {
            let config = InstallationConfig::load_from_file(path)?;
            info!("Loaded configuration from {}", path.display());
            config
        }
        (None, Some(tty)) => collect_interactively(exec, tty, &hardware)?,
        (None, None) => bail!("interactive installation needs a terminal"),
    };

    let mut gate: Box<dyn ConfirmationGate + '_> = match tty.as_mut() {
        Some(tty) if !yes => Box::new(PromptGate::new(tty)),
        _ => Box::new(PreConfirmed),
    };

    let mut installer = Installer::new(exec, config, hardware, options);
    let report = installer.run(gate.as_mut())?;

    console::success("Installation complete");
    console::block(&report.to_string());
    Ok(())
}

/// `--user`, else the account that invoked sudo.
fn resolve_post_install_user(user: Option<String>) -> Result<Option<String>> {
    let user = user.or_else(|| std::env::var("SUDO_USER").ok().filter(|u| u != "root" && !u.is_empty()));
    if let Some(ref name) = user {
        validate_username(name)?;
    }
    Ok(user)
}

fn post_install(
    exec: &dyn Executor,
    yes: bool,
    user: Option<String>,
    features: Option<&str>,
    mirror_countries: Option<&str>,
) -> Result<()> {
    console::banner("archsetup: post-install features");
    run_preflight_checks(POST_INSTALL_BINARIES)?;

    let username = resolve_post_install_user(user)?;
    match username {
        Some(ref name) => info!("Regular user: {}", name),
        None => warn!("No regular user known; shell and AUR features will fail"),
    }

    let candidates = match features {
        Some(list) => Feature::parse_list(list)?,
        None => Feature::iter().collect(),
    };
    let selected = if yes {
        candidates
    } else {
        let mut tty = TtyPrompter::open()?;
        select_features(&mut tty, &candidates, false)?
    };
    if selected.is_empty() {
        console::warn("No features selected");
        return Ok(());
    }

    let target = Target::live();
    let ctx = FeatureContext {
        exec,
        target: &target,
        username,
        mirror_countries: mirror_countries.map(parse_mirror_countries).unwrap_or_default(),
    };
    let report = run_features(&ctx, &selected)?;
    console::success(&report.to_string());
    Ok(())
}

fn handoff(exec: &dyn Executor, frontend: &str) -> Result<()> {
    console::banner("archsetup: collect and hand off");
    if which::which(frontend).is_err() {
        bail!("front-end '{}' not found in PATH", frontend);
    }
    let hardware = HardwareInfo::detect();
    let mut tty = TtyPrompter::open()?;
    let config = collect_interactively(exec, &mut tty, &hardware)?;
    run_frontend(exec, frontend, &config, &std::env::temp_dir())?;
    console::success(&format!("Front-end '{}' finished", frontend));
    Ok(())
}

fn validate(path: &Path) -> Result<()> {
    let config = InstallationConfig::load_from_file(path)?;
    config.validate()?;
    console::success(&format!("{} is valid", path.display()));
    console::block(&config.summary());
    Ok(())
}

fn plan(
    exec: &dyn Executor,
    disk: &Path,
    mode: PartitionMode,
    layout: SubvolumeLayout,
    target: &Path,
    show_commands: bool,
) -> Result<()> {
    if mode == PartitionMode::Manual {
        console::warn("Manual mode plans against the partitions as they are now");
    }
    let input = probe_storage_input(exec, disk, mode)?;
    let plan = calculate_storage_plan(disk, &input, layout, target)?;
    console::block(&plan.summary());

    if show_commands {
        let recorder = RecordingExecutor::new();
        apply_plan(&recorder, &plan).context("Failed to expand the plan into commands")?;
        console::banner("Commands");
        for line in recorder.commands() {
            console::block(&line);
        }
    }
    Ok(())
}

fn disks(exec: &dyn Executor) -> Result<()> {
    let disks = list_disks(exec)?;
    if disks.is_empty() {
        console::warn("No installable disks found");
        return Ok(());
    }
    for disk in disks {
        console::block(&disk.label());
    }
    Ok(())
}
