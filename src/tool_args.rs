//! Type-safe external tool argument contracts.
//!
//! Every external program archsetup runs (sgdisk, mkfs.btrfs, pacstrap, ...)
//! is described by a struct implementing `ToolArgs`. The struct definition is
//! the single source of truth for the flags that program receives; raw
//! string vectors never reach `std::process::Command`.
//!
//! # Design Goals
//!
//! 1. **Compile-Time Safety**: flag mismatches are caught by the compiler.
//! 2. **Secrets off the command line**: passwords travel via `stdin_payload`,
//!    which is never logged.
//! 3. **Dry-run awareness**: `is_destructive()` lets the executor skip
//!    anything that changes disks or the target system.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

// ============================================================================
// Dry-run switch
// ============================================================================

static DRY_RUN: AtomicBool = AtomicBool::new(false);

/// Enable global dry-run mode: destructive commands and file writes are
/// logged and skipped.
pub fn enable_dry_run() {
    DRY_RUN.store(true, Ordering::SeqCst);
    tracing::info!("Dry-run mode enabled: destructive operations will be skipped");
}

/// Disable global dry-run mode.
pub fn disable_dry_run() {
    DRY_RUN.store(false, Ordering::SeqCst);
}

/// Returns true if dry-run mode is active.
pub fn is_dry_run() -> bool {
    DRY_RUN.load(Ordering::SeqCst)
}

// ============================================================================
// Output handling
// ============================================================================

/// How the child's standard streams are wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// stdout/stderr captured for parsing or error reporting
    #[default]
    Capture,
    /// stdout/stderr go straight to the operator's terminal (pacstrap progress)
    Stream,
    /// Child owns the terminal: stdin is inherited and the child stays in
    /// our process group so it can read from the tty (cfdisk)
    Interactive,
    /// Child draws a menu on the terminal and prints the choice on stdout
    /// (fzf, dialog --stdout). stdout is captured, stderr inherited.
    Picker,
}

// ============================================================================
// Trait
// ============================================================================

/// Trait for typed tool arguments.
///
/// # Contract
///
/// - `program()`: executable name, resolved through `PATH` at run time.
/// - `to_cli_args()`: arguments exactly as the program expects them.
/// - `get_env_vars()`: extra environment for the child.
/// - `stdin_payload()`: data written to the child's stdin (secrets go here).
/// - `is_destructive()`: true if the command changes disks or system state.
pub trait ToolArgs {
    fn program(&self) -> &'static str;

    fn to_cli_args(&self) -> Vec<String>;

    fn get_env_vars(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn stdin_payload(&self) -> Option<String> {
        None
    }

    fn is_destructive(&self) -> bool;

    fn output_mode(&self) -> OutputMode {
        OutputMode::Capture
    }

    /// Materialize into a runnable command.
    fn to_command(&self) -> ToolCommand {
        ToolCommand {
            program: self.program().to_string(),
            args: self.to_cli_args(),
            env: self.get_env_vars(),
            stdin: self.stdin_payload(),
            destructive: self.is_destructive(),
            output: self.output_mode(),
        }
    }
}

/// A fully resolved command, ready for an `Executor`.
#[derive(Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<String>,
    pub destructive: bool,
    pub output: OutputMode,
}

impl ToolCommand {
    /// Wrap the command so it runs inside `root` via `arch-chroot`.
    ///
    /// Environment variables are moved onto an `env` prefix inside the
    /// chroot, since arch-chroot does not forward them reliably.
    pub fn in_chroot(self, root: &Path) -> Self {
        let mut args = vec![root.display().to_string()];
        if !self.env.is_empty() {
            args.push("env".to_string());
            args.extend(self.env.iter().map(|(k, v)| format!("{}={}", k, v)));
        }
        args.push(self.program);
        args.extend(self.args);

        Self {
            program: "arch-chroot".to_string(),
            args,
            env: Vec::new(),
            stdin: self.stdin,
            destructive: self.destructive,
            output: self.output,
        }
    }

    /// Program and arguments joined for display. Never includes stdin.
    pub fn command_line(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(self.args.iter().map(|a| {
            if a.is_empty() || a.contains(char::is_whitespace) {
                format!("'{}'", a)
            } else {
                a.clone()
            }
        }));
        parts.join(" ")
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.env {
            write!(f, "{}={} ", key, value)?;
        }
        write!(f, "{}", self.command_line())?;
        if self.stdin.is_some() {
            write!(f, " <stdin hidden>")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolCommand")
            .field("command", &self.command_line())
            .field("env", &self.env)
            .field("stdin", &self.stdin.as_ref().map(|_| "***"))
            .field("destructive", &self.destructive)
            .field("output", &self.output)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct EchoArgs {
        secret: Option<String>,
    }

    impl ToolArgs for EchoArgs {
        fn program(&self) -> &'static str {
            "echo"
        }

        fn to_cli_args(&self) -> Vec<String> {
            vec!["hello world".to_string()]
        }

        fn get_env_vars(&self) -> Vec<(String, String)> {
            vec![("LANG".to_string(), "C".to_string())]
        }

        fn stdin_payload(&self) -> Option<String> {
            self.secret.clone()
        }

        fn is_destructive(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_to_command_copies_contract() {
        let cmd = EchoArgs { secret: None }.to_command();
        assert_eq!(cmd.program, "echo");
        assert_eq!(cmd.args, vec!["hello world"]);
        assert_eq!(cmd.output, OutputMode::Capture);
        assert!(!cmd.destructive);
    }

    #[test]
    fn test_command_line_quotes_spaces() {
        let cmd = EchoArgs { secret: None }.to_command();
        assert_eq!(cmd.command_line(), "echo 'hello world'");
    }

    #[test]
    fn test_display_hides_stdin() {
        let cmd = EchoArgs {
            secret: Some("alice:hunter2".to_string()),
        }
        .to_command();
        let shown = format!("{} {:?}", cmd, cmd);
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("<stdin hidden>"));
    }

    #[test]
    fn test_in_chroot_moves_env_inside() {
        let cmd = EchoArgs { secret: None }
            .to_command()
            .in_chroot(&PathBuf::from("/mnt"));
        assert_eq!(cmd.program, "arch-chroot");
        assert_eq!(cmd.args, vec!["/mnt", "env", "LANG=C", "echo", "hello world"]);
        assert!(cmd.env.is_empty());
    }
}
