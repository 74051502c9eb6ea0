//! One-shot handoff to a non-interactive installer front-end.
//!
//! The collected configuration is serialized to a JSON file readable only
//! by root, the front-end is run as `PROGRAM --config FILE --silent`, and
//! the file is deleted afterwards. The file carries passwords, so it never
//! outlives the handoff: `OneShotConfig` removes it on drop and registers
//! it with `process_guard` so a signal or panic removes it too.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config_file::InstallationConfig;
use crate::process_guard::{register_cleanup, unregister_cleanup};
use crate::tool_args::{OutputMode, ToolCommand};
use crate::tool_runner::{run_command_checked, Executor};

/// A configuration file that is deleted when dropped.
#[derive(Debug)]
pub struct OneShotConfig {
    path: PathBuf,
}

impl OneShotConfig {
    /// Write `config` into `dir` with mode 0600.
    pub fn create(dir: &Path, config: &InstallationConfig) -> Result<Self> {
        let path = dir.join(format!("archsetup-oneshot-{}.json", std::process::id()));
        register_cleanup(&path);
        let guard = Self { path };
        config
            .save_to_file(&guard.path)
            .context("Failed to write the one-shot configuration")?;
        info!("One-shot configuration written to {}", guard.path.display());
        Ok(guard)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for OneShotConfig {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Removed one-shot configuration {}", self.path.display());
                unregister_cleanup(&self.path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => unregister_cleanup(&self.path),
            Err(e) => warn!("Failed to remove {}: {}", self.path.display(), e),
        }
    }
}

/// `PROGRAM --config FILE --silent`
pub fn frontend_command(program: &str, config_path: &Path) -> ToolCommand {
    ToolCommand {
        program: program.to_string(),
        args: vec![
            "--config".to_string(),
            config_path.display().to_string(),
            "--silent".to_string(),
        ],
        env: Vec::new(),
        stdin: None,
        destructive: true,
        output: OutputMode::Stream,
    }
}

/// Hand `config` to `program` through a one-shot file in `dir`.
///
/// The file is deleted whether the front-end succeeds or not.
pub fn run_frontend(exec: &dyn Executor, program: &str, config: &InstallationConfig, dir: &Path) -> Result<()> {
    config.validate().context("Refusing to hand off an invalid configuration")?;
    let oneshot = OneShotConfig::create(dir, config)?;
    let cmd = frontend_command(program, oneshot.path());
    run_command_checked(exec, &cmd).with_context(|| format!("Front-end '{}' failed", program))?;
    info!("Front-end '{}' finished", program);
    Ok(())
}
