//! Menu selection with a ranked backend chain.
//!
//! The backend is resolved once at startup from capability probes, in
//! order: `fzf`, `dialog`, numbered prompt. The resolved backend is then
//! used for every menu in the run.
//!
//! # Failure Policy
//!
//! - Escape/cancel in fzf or dialog is `Cancelled`.
//! - A number outside the menu in the numbered prompt is `Validation`.
//! - Installing fzf is best effort: failure is a warning and the chain
//!   falls through to the next backend.

use std::fmt;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::error::{InstallError, Result};
use crate::hardware::NetworkState;
use crate::prompt::Prompter;
use crate::tool_args::{OutputMode, ToolArgs};
use crate::tool_runner::{run_checked, Executor};
use crate::tools::packages::PacmanInstallArgs;

/// How menus are shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorBackend {
    /// Fuzzy finder at the given path
    Fzf(PathBuf),
    /// ncurses dialog at the given path
    Dialog(PathBuf),
    /// Numbered list answered through the prompter
    Numbered,
}

impl SelectorBackend {
    /// Probe `PATH` for fzf, then dialog.
    pub fn resolve() -> Self {
        Self::resolve_with(|name| which::which(name).ok())
    }

    /// Resolve with a custom probe (tests).
    pub fn resolve_with<F>(probe: F) -> Self
    where
        F: Fn(&str) -> Option<PathBuf>,
    {
        let backend = if let Some(path) = probe("fzf") {
            Self::Fzf(path)
        } else if let Some(path) = probe("dialog") {
            Self::Dialog(path)
        } else {
            Self::Numbered
        };
        info!("Selection backend: {}", backend);
        backend
    }

    /// Show `items` and return the index of the chosen one.
    pub fn select(
        &self,
        exec: &dyn Executor,
        prompter: &mut dyn Prompter,
        title: &str,
        items: &[String],
    ) -> Result<usize> {
        if items.is_empty() {
            return Err(InstallError::precondition(format!("nothing to choose for '{}'", title)));
        }
        match self {
            Self::Fzf(_) => select_fzf(exec, title, items),
            Self::Dialog(_) => select_dialog(exec, title, items),
            Self::Numbered => select_numbered(prompter, title, items),
        }
    }
}

impl fmt::Display for SelectorBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fzf(path) => write!(f, "fzf ({})", path.display()),
            Self::Dialog(path) => write!(f, "dialog ({})", path.display()),
            Self::Numbered => write!(f, "numbered prompt"),
        }
    }
}

/// Try to install fzf on the live system when it is missing.
///
/// Returns true if fzf is available afterwards.
pub fn ensure_fzf(exec: &dyn Executor, network: NetworkState) -> bool {
    if which::which("fzf").is_ok() {
        return true;
    }
    if !network.is_online() {
        debug!("fzf missing and offline, not installing");
        return false;
    }
    info!("fzf not found, trying to install it");
    match run_checked(exec, &PacmanInstallArgs::new(["fzf"])) {
        Ok(_) => which::which("fzf").is_ok(),
        Err(e) => {
            warn!("Could not install fzf ({}), using fallback menus", e);
            false
        }
    }
}

// ============================================================================
// fzf
// ============================================================================

/// `fzf --prompt "TITLE> " --height 40% --reverse`, items on stdin.
#[derive(Debug, Clone)]
pub struct FzfArgs {
    pub prompt: String,
    pub items: Vec<String>,
}

impl ToolArgs for FzfArgs {
    fn program(&self) -> &'static str {
        "fzf"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "--prompt".to_string(),
            format!("{}> ", self.prompt),
            "--height".to_string(),
            "40%".to_string(),
            "--reverse".to_string(),
        ]
    }

    fn stdin_payload(&self) -> Option<String> {
        Some(self.items.join("\n"))
    }

    fn is_destructive(&self) -> bool {
        false
    }

    fn output_mode(&self) -> OutputMode {
        OutputMode::Picker
    }
}

fn select_fzf(exec: &dyn Executor, title: &str, items: &[String]) -> Result<usize> {
    let args = FzfArgs {
        prompt: title.to_string(),
        items: items.to_vec(),
    };
    let output = exec.run(&args.to_command())?;
    // 1: no match, 130: interrupted with Esc or Ctrl-C
    match output.exit_code {
        Some(0) => {}
        Some(1) | Some(130) => return Err(InstallError::cancelled(format!("{} selection cancelled", title))),
        _ => output.ensure_success("fzf")?,
    }
    let chosen = output.stdout.trim_end_matches(['\n', '\r']);
    items
        .iter()
        .position(|item| item == chosen)
        .ok_or_else(|| InstallError::cancelled(format!("{} selection cancelled", title)))
}

// ============================================================================
// dialog
// ============================================================================

/// `dialog --stdout --title TITLE --menu TEXT 0 0 0 1 item1 2 item2 ...`
#[derive(Debug, Clone)]
pub struct DialogMenuArgs {
    pub title: String,
    pub items: Vec<String>,
}

impl ToolArgs for DialogMenuArgs {
    fn program(&self) -> &'static str {
        "dialog"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec![
            "--stdout".to_string(),
            "--title".to_string(),
            self.title.clone(),
            "--menu".to_string(),
            "Choose one:".to_string(),
            "0".to_string(),
            "0".to_string(),
            "0".to_string(),
        ];
        for (i, item) in self.items.iter().enumerate() {
            args.push((i + 1).to_string());
            args.push(item.clone());
        }
        args
    }

    fn is_destructive(&self) -> bool {
        false
    }

    fn output_mode(&self) -> OutputMode {
        OutputMode::Picker
    }
}

fn select_dialog(exec: &dyn Executor, title: &str, items: &[String]) -> Result<usize> {
    let args = DialogMenuArgs {
        title: title.to_string(),
        items: items.to_vec(),
    };
    let output = exec.run(&args.to_command())?;
    // 1: Cancel button, 255: Esc
    match output.exit_code {
        Some(0) => {}
        Some(1) | Some(255) => return Err(InstallError::cancelled(format!("{} selection cancelled", title))),
        _ => output.ensure_success("dialog")?,
    }
    parse_menu_number(output.stdout.trim(), items.len())
}

// ============================================================================
// Numbered prompt
// ============================================================================

fn parse_menu_number(answer: &str, count: usize) -> Result<usize> {
    match answer.parse::<usize>() {
        Ok(n) if (1..=count).contains(&n) => Ok(n - 1),
        _ => Err(InstallError::validation(format!(
            "invalid selection '{}' (expected 1-{})",
            answer, count
        ))),
    }
}

fn select_numbered(prompter: &mut dyn Prompter, title: &str, items: &[String]) -> Result<usize> {
    prompter.say(&format!("{}:", title))?;
    for (i, item) in items.iter().enumerate() {
        prompter.say(&format!("  {:>2}) {}", i + 1, item))?;
    }
    let answer = prompter.ask(&format!("Select [1-{}]:", items.len()))?;
    let answer = answer.trim();
    if answer.is_empty() {
        return Err(InstallError::cancelled(format!("{} selection cancelled", title)));
    }
    parse_menu_number(answer, items.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::ScriptedPrompter;
    use crate::tool_runner::RecordingExecutor;

    fn items() -> Vec<String> {
        vec!["/dev/sda  500.0 GB".to_string(), "/dev/nvme0n1  1.0 TB".to_string()]
    }

    #[test]
    fn test_resolve_prefers_fzf() {
        let backend = SelectorBackend::resolve_with(|name| Some(PathBuf::from(format!("/usr/bin/{}", name))));
        assert_eq!(backend, SelectorBackend::Fzf(PathBuf::from("/usr/bin/fzf")));
    }

    #[test]
    fn test_resolve_falls_back_to_dialog_then_numbered() {
        let dialog = SelectorBackend::resolve_with(|name| {
            (name == "dialog").then(|| PathBuf::from("/usr/bin/dialog"))
        });
        assert_eq!(dialog, SelectorBackend::Dialog(PathBuf::from("/usr/bin/dialog")));
        assert_eq!(SelectorBackend::resolve_with(|_| None), SelectorBackend::Numbered);
    }

    #[test]
    fn test_numbered_selection() {
        let exec = RecordingExecutor::new();
        let mut prompter = ScriptedPrompter::new(["2"]);
        let idx = SelectorBackend::Numbered
            .select(&exec, &mut prompter, "Disk", &items())
            .expect("select");
        assert_eq!(idx, 1);
        assert!(prompter.transcript().iter().any(|l| l.contains("1) /dev/sda")));
        assert!(exec.commands().is_empty());
    }

    #[test]
    fn test_numbered_out_of_range_is_validation() {
        let exec = RecordingExecutor::new();
        let mut prompter = ScriptedPrompter::new(["7"]);
        let err = SelectorBackend::Numbered
            .select(&exec, &mut prompter, "Disk", &items())
            .expect_err("invalid");
        assert!(matches!(err, InstallError::Validation(_)));
    }

    #[test]
    fn test_numbered_empty_answer_cancels() {
        let exec = RecordingExecutor::new();
        let mut prompter = ScriptedPrompter::new([""]);
        let err = SelectorBackend::Numbered
            .select(&exec, &mut prompter, "Disk", &items())
            .expect_err("cancel");
        assert!(err.is_cancellation());
    }

    #[test]
    fn test_fzf_selection_matches_line() {
        let exec = RecordingExecutor::new().respond("fzf", "/dev/nvme0n1  1.0 TB\n");
        let mut prompter = ScriptedPrompter::default();
        let idx = SelectorBackend::Fzf(PathBuf::from("/usr/bin/fzf"))
            .select(&exec, &mut prompter, "Disk", &items())
            .expect("select");
        assert_eq!(idx, 1);
        match &exec.actions()[0] {
            crate::tool_runner::Action::Run { stdin, .. } => {
                assert_eq!(stdin.as_deref(), Some("/dev/sda  500.0 GB\n/dev/nvme0n1  1.0 TB"));
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_fzf_escape_cancels() {
        let exec = RecordingExecutor::new().fail_on("fzf", 130, "");
        let mut prompter = ScriptedPrompter::default();
        let err = SelectorBackend::Fzf(PathBuf::from("/usr/bin/fzf"))
            .select(&exec, &mut prompter, "Disk", &items())
            .expect_err("cancel");
        assert!(err.is_cancellation());
    }

    #[test]
    fn test_dialog_returns_tag() {
        let exec = RecordingExecutor::new().respond("dialog", "1");
        let mut prompter = ScriptedPrompter::default();
        let idx = SelectorBackend::Dialog(PathBuf::from("/usr/bin/dialog"))
            .select(&exec, &mut prompter, "Disk", &items())
            .expect("select");
        assert_eq!(idx, 0);
        assert!(exec.commands()[0].starts_with("dialog --stdout --title Disk --menu"));
    }

    #[test]
    fn test_empty_menu_is_precondition() {
        let exec = RecordingExecutor::new();
        let mut prompter = ScriptedPrompter::default();
        let err = SelectorBackend::Numbered
            .select(&exec, &mut prompter, "Disk", &[])
            .expect_err("empty");
        assert!(matches!(err, InstallError::Precondition(_)));
    }
}
