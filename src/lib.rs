//! archsetup library
//!
//! Installs Arch Linux onto a btrfs root and applies optional post-install
//! features. The binary in `main.rs` is a thin command-line layer over the
//! modules here.

pub mod cli;
pub mod confedit;
pub mod config_file;
pub mod console;
pub mod engine;
pub mod error;
pub mod frontend;
pub mod hardware;
pub mod input;
pub mod install_state;
pub mod installer;
pub mod logic;
pub mod privilege;
pub mod process_guard;
pub mod profiles;
pub mod prompt;
pub mod sanity;
pub mod selector;
pub mod tool_args;
pub mod tool_runner;
pub mod tools;
pub mod types;

// Re-export main types for convenience
pub use config_file::InstallationConfig;
pub use error::{InstallError, Result};
pub use install_state::{InstallStage, InstallerContext};
pub use process_guard::{ChildRegistry, CommandProcessGroup};
pub use tool_args::{disable_dry_run, enable_dry_run, is_dry_run, ToolArgs, ToolCommand};
pub use tool_runner::{Executor, RecordingExecutor, SystemExecutor};
pub use types::{Feature, Filesystem, GpuDriver, PartitionMode, SubvolumeLayout};

pub use hardware::{FirmwareMode, HardwareInfo, NetworkState};
pub use engine::storage::{calculate_storage_plan, StorageOp, StoragePlan};
pub use logic::resolver::{resolve_packages, resolve_services};
pub use installer::{Installer, InstallOptions, InstallReport};
