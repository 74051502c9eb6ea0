use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::installer::DEFAULT_TARGET;
use crate::types::{PartitionMode, SubvolumeLayout};

/// archsetup - Arch Linux installer and post-install setup
#[derive(Parser, Debug)]
#[command(name = "archsetup")]
#[command(about = "Install Arch Linux on btrfs and apply optional post-install features")]
#[command(version)]
pub struct Cli {
    /// Dry-run mode: show what would be executed without making changes.
    ///
    /// Destructive commands (partitioning, formatting, pacstrap, file
    /// writes) are logged and skipped. Read-only probes (lsblk, parted
    /// print) still run so the preview is realistic.
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// More log output (debug level). RUST_LOG takes precedence.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also append log output to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install Arch Linux (interactive unless --config is given)
    Install {
        /// Configuration file to install from (headless)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Skip the typed "yes" before destructive steps
        #[arg(short, long)]
        yes: bool,

        /// Mount root of the new system
        #[arg(long, default_value = DEFAULT_TARGET)]
        target: PathBuf,

        /// Leave the target mounted when the installation fails
        #[arg(long)]
        no_rollback: bool,
    },
    /// Apply optional features to the running system
    PostInstall {
        /// Apply every selected feature without asking
        #[arg(short, long)]
        yes: bool,

        /// Regular user for shell setup and AUR builds (default: $SUDO_USER)
        #[arg(short, long)]
        user: Option<String>,

        /// Comma separated features (default: all, each confirmed unless --yes)
        #[arg(short, long)]
        features: Option<String>,

        /// Comma separated mirror countries for the reflector configuration
        #[arg(long)]
        mirror_countries: Option<String>,
    },
    /// Collect input, then hand it to a non-interactive installer front-end
    Handoff {
        /// Front-end program, run as `PROGRAM --config FILE --silent`
        #[arg(long, default_value = "archsetup-frontend")]
        frontend: String,
    },
    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        config: PathBuf,
    },
    /// Print the storage plan for a disk without changing anything
    Plan {
        /// Disk device (e.g., /dev/sda)
        #[arg(short, long)]
        disk: PathBuf,

        /// entire-disk, free-space or manual
        #[arg(short, long, default_value = "entire-disk")]
        mode: PartitionMode,

        /// full or turbo
        #[arg(short, long, default_value = "full")]
        layout: SubvolumeLayout,

        /// Mount root used in the plan
        #[arg(long, default_value = DEFAULT_TARGET)]
        target: PathBuf,

        /// Also print the exact commands the plan runs
        #[arg(long)]
        show_commands: bool,
    },
    /// List disks that can be installed to
    Disks,
}
