//! Type-Safe Tool Execution
//!
//! All external programs and all writes to the live or target system go
//! through an `Executor`. Production code uses `SystemExecutor`; tests and
//! `plan --show-commands` use `RecordingExecutor`, which captures every
//! action instead of touching the machine.
//!
//! # Architecture Rule
//!
//! `SystemExecutor::run` is the execution gatekeeper. It provides:
//!
//! - Process group isolation for non-interactive children
//! - PID registration with `ChildRegistry` for cleanup on exit
//! - Dry-run skipping of destructive commands and file writes
//! - Secrets delivered on stdin, never on the command line or in logs

use crate::error::{InstallError, Result};
use crate::process_guard::{ChildRegistry, CommandProcessGroup};
use crate::tool_args::{is_dry_run, OutputMode, ToolArgs, ToolCommand};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use tracing::{debug, info, warn};

/// Write `payload` and a trailing newline to the child's stdin, then close it.
fn feed_stdin(child: &mut Child, payload: &str) -> std::io::Result<()> {
    let Some(mut stdin) = child.stdin.take() else {
        return Ok(());
    };
    stdin.write_all(payload.as_bytes())?;
    if !payload.ends_with('\n') {
        stdin.write_all(b"\n")?;
    }
    Ok(())
}

/// Output from a command execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output (empty for streamed or interactive commands).
    pub stdout: String,
    /// Standard error (empty for streamed or interactive commands).
    pub stderr: String,
    /// Exit code (None if terminated by signal).
    pub exit_code: Option<i32>,
    /// Whether the command exited successfully (exit code 0).
    pub success: bool,
}

impl CommandOutput {
    /// A successful result with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
            success: true,
        }
    }

    /// A failed result.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: Some(code),
            success: false,
        }
    }

    /// Check if the command succeeded and return an error if not.
    pub fn ensure_success(&self, tool: &str) -> Result<()> {
        if self.success {
            Ok(())
        } else {
            Err(InstallError::command(
                tool,
                self.exit_code.unwrap_or(-1),
                self.stderr.trim(),
            ))
        }
    }
}

/// Side-effect boundary for the installer.
///
/// `run` only returns `Err` when the command could not be started; a
/// non-zero exit is reported through `CommandOutput::success`.
pub trait Executor {
    fn run(&self, cmd: &ToolCommand) -> Result<CommandOutput>;

    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Create or replace `path` with `contents` and permission bits `mode`.
    fn write_file(&self, path: &Path, contents: &str, mode: u32) -> Result<()>;

    fn append_file(&self, path: &Path, contents: &str) -> Result<()>;

    /// Read a file, `Ok(None)` if it does not exist.
    fn read_to_string(&self, path: &Path) -> Result<Option<String>>;

    /// Remove a file. Missing files are not an error.
    fn remove_file(&self, path: &Path) -> Result<()>;

    fn exists(&self, path: &Path) -> bool;
}

/// Run typed args and fail on a non-zero exit.
pub fn run_checked<T: ToolArgs + ?Sized>(exec: &dyn Executor, args: &T) -> Result<CommandOutput> {
    run_command_checked(exec, &args.to_command())
}

/// Run a prepared command and fail on a non-zero exit.
pub fn run_command_checked(exec: &dyn Executor, cmd: &ToolCommand) -> Result<CommandOutput> {
    let output = exec.run(cmd)?;
    output.ensure_success(&cmd.program)?;
    Ok(output)
}

// ============================================================================
// System executor
// ============================================================================

/// Executes against the real machine.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExecutor;

impl SystemExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Executor for SystemExecutor {
    fn run(&self, cmd: &ToolCommand) -> Result<CommandOutput> {
        if cmd.destructive && is_dry_run() {
            info!("[dry-run] would run: {}", cmd);
            return Ok(CommandOutput::ok(""));
        }

        info!("Running: {}", cmd);

        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args);
        for (key, value) in &cmd.env {
            command.env(key, value);
        }

        let owns_tty = matches!(cmd.output, OutputMode::Interactive | OutputMode::Picker);
        command.stdin(match (&cmd.stdin, owns_tty) {
            (Some(_), _) => Stdio::piped(),
            (None, true) => Stdio::inherit(),
            (None, false) => Stdio::null(),
        });
        match cmd.output {
            OutputMode::Capture => {
                command.stdout(Stdio::piped()).stderr(Stdio::piped());
            }
            OutputMode::Picker => {
                command.stdout(Stdio::piped()).stderr(Stdio::inherit());
            }
            OutputMode::Stream | OutputMode::Interactive => {
                command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            }
        }
        // Terminal-owning children must stay in the foreground process
        // group or the tty stops them with SIGTTIN.
        if !owns_tty {
            command.in_new_process_group();
        }

        let mut child = command
            .spawn()
            .map_err(|e| InstallError::system(format!("failed to start {}: {}", cmd.program, e)))?;
        let pid = child.id();

        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.register(pid);
        }

        // A failed write still waits: the child must be reaped and
        // unregistered before the error is returned.
        let fed = match &cmd.stdin {
            Some(payload) => feed_stdin(&mut child, payload),
            None => Ok(()),
        };

        let waited = child.wait_with_output();

        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.unregister(pid);
        }

        if let Err(e) = fed {
            return Err(InstallError::system(format!(
                "failed to write stdin of {}: {}",
                cmd.program, e
            )));
        }
        let output = waited?;
        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
            success: output.status.success(),
        };

        if result.success {
            debug!("{} exited successfully", cmd.program);
        } else {
            warn!(
                "{} failed with exit code {}",
                cmd.program,
                result.exit_code.unwrap_or(-1)
            );
            if !result.stderr.trim().is_empty() {
                warn!("{} stderr: {}", cmd.program, result.stderr.trim());
            }
        }

        Ok(result)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        if is_dry_run() {
            info!("[dry-run] would create directory {}", path.display());
            return Ok(());
        }
        fs::create_dir_all(path)?;
        Ok(())
    }

    fn write_file(&self, path: &Path, contents: &str, mode: u32) -> Result<()> {
        if is_dry_run() {
            info!("[dry-run] would write {} ({} bytes)", path.display(), contents.len());
            return Ok(());
        }
        debug!("Writing {} (mode {:o})", path.display(), mode);
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(path)?;
        // mode() only applies on creation
        file.set_permissions(fs::Permissions::from_mode(mode))?;
        file.write_all(contents.as_bytes())?;
        Ok(())
    }

    fn append_file(&self, path: &Path, contents: &str) -> Result<()> {
        if is_dry_run() {
            info!("[dry-run] would append {} bytes to {}", contents.len(), path.display());
            return Ok(());
        }
        debug!("Appending to {}", path.display());
        let mut file = fs::OpenOptions::new().append(true).create(true).open(path)?;
        file.write_all(contents.as_bytes())?;
        Ok(())
    }

    fn read_to_string(&self, path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        if is_dry_run() {
            info!("[dry-run] would remove {}", path.display());
            return Ok(());
        }
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

// ============================================================================
// Recording executor
// ============================================================================

/// One side effect captured by `RecordingExecutor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Run {
        command: String,
        stdin: Option<String>,
    },
    CreateDir(PathBuf),
    WriteFile {
        path: PathBuf,
        contents: String,
        mode: u32,
    },
    AppendFile {
        path: PathBuf,
        contents: String,
    },
    RemoveFile(PathBuf),
}

/// Executor that records actions and simulates a filesystem in memory.
///
/// Commands succeed with empty output unless a canned response or failure
/// was registered for a substring of their command line.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    actions: RefCell<Vec<Action>>,
    responses: Vec<(String, CommandOutput)>,
    files: RefCell<BTreeMap<PathBuf, String>>,
    dirs: RefCell<Vec<PathBuf>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with `stdout` to any command whose line contains `pattern`.
    pub fn respond(mut self, pattern: &str, stdout: &str) -> Self {
        self.responses
            .push((pattern.to_string(), CommandOutput::ok(stdout)));
        self
    }

    /// Fail any command whose line contains `pattern`.
    pub fn fail_on(mut self, pattern: &str, code: i32, stderr: &str) -> Self {
        self.responses
            .push((pattern.to_string(), CommandOutput::failed(code, stderr)));
        self
    }

    /// Seed the in-memory filesystem.
    pub fn with_file(self, path: impl Into<PathBuf>, contents: &str) -> Self {
        self.files
            .borrow_mut()
            .insert(path.into(), contents.to_string());
        self
    }

    pub fn actions(&self) -> Vec<Action> {
        self.actions.borrow().clone()
    }

    /// Command lines in execution order.
    pub fn commands(&self) -> Vec<String> {
        self.actions
            .borrow()
            .iter()
            .filter_map(|a| match a {
                Action::Run { command, .. } => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    /// Index of the first command containing `pattern`.
    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.commands().iter().position(|c| c.contains(pattern))
    }

    /// Current contents of a simulated file.
    pub fn file(&self, path: impl AsRef<Path>) -> Option<String> {
        self.files.borrow().get(path.as_ref()).cloned()
    }

    /// Whether a directory was created at `path`.
    pub fn created_dir(&self, path: impl AsRef<Path>) -> bool {
        self.dirs.borrow().iter().any(|d| d == path.as_ref())
    }
}

impl Executor for RecordingExecutor {
    fn run(&self, cmd: &ToolCommand) -> Result<CommandOutput> {
        let line = cmd.command_line();
        self.actions.borrow_mut().push(Action::Run {
            command: line.clone(),
            stdin: cmd.stdin.clone(),
        });
        let response = self
            .responses
            .iter()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| CommandOutput::ok(""));
        Ok(response)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.actions
            .borrow_mut()
            .push(Action::CreateDir(path.to_path_buf()));
        self.dirs.borrow_mut().push(path.to_path_buf());
        Ok(())
    }

    fn write_file(&self, path: &Path, contents: &str, mode: u32) -> Result<()> {
        self.actions.borrow_mut().push(Action::WriteFile {
            path: path.to_path_buf(),
            contents: contents.to_string(),
            mode,
        });
        self.files
            .borrow_mut()
            .insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    fn append_file(&self, path: &Path, contents: &str) -> Result<()> {
        self.actions.borrow_mut().push(Action::AppendFile {
            path: path.to_path_buf(),
            contents: contents.to_string(),
        });
        self.files
            .borrow_mut()
            .entry(path.to_path_buf())
            .or_default()
            .push_str(contents);
        Ok(())
    }

    fn read_to_string(&self, path: &Path) -> Result<Option<String>> {
        Ok(self.files.borrow().get(path).cloned())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        self.actions
            .borrow_mut()
            .push(Action::RemoveFile(path.to_path_buf()));
        self.files.borrow_mut().remove(path);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.borrow().contains_key(path) || self.created_dir(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TrueArgs;

    impl ToolArgs for TrueArgs {
        fn program(&self) -> &'static str {
            "true"
        }
        fn to_cli_args(&self) -> Vec<String> {
            Vec::new()
        }
        fn is_destructive(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_ensure_success_maps_to_command_error() {
        let output = CommandOutput::failed(2, "  no such device \n");
        let err = output.ensure_success("sgdisk").expect_err("should fail");
        match err {
            InstallError::Command { tool, code, stderr } => {
                assert_eq!(tool, "sgdisk");
                assert_eq!(code, 2);
                assert_eq!(stderr, "no such device");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_system_executor_runs_real_command() {
        let output = SystemExecutor::new()
            .run(&TrueArgs.to_command())
            .expect("true should spawn");
        assert!(output.success);
    }

    #[test]
    fn test_system_executor_feeds_stdin() {
        let cmd = ToolCommand {
            program: "cat".to_string(),
            args: Vec::new(),
            env: Vec::new(),
            stdin: Some("alice:pw".to_string()),
            destructive: false,
            output: OutputMode::Capture,
        };
        let output = SystemExecutor::new().run(&cmd).expect("cat should spawn");
        assert_eq!(output.stdout, "alice:pw\n");
    }

    #[test]
    fn test_stdin_write_failure_still_waits_for_child() {
        let dir = tempfile::tempdir().expect("tempdir");
        let marker = dir.path().join("exited");
        // closes stdin at once, so a payload larger than the pipe buffer
        // can never be written in full
        let script = format!("exec 0<&-; sleep 0.2; touch {}", marker.display());
        let cmd = ToolCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script],
            env: Vec::new(),
            stdin: Some("x".repeat(1 << 20)),
            destructive: false,
            output: OutputMode::Capture,
        };

        let err = SystemExecutor::new().run(&cmd).expect_err("broken pipe");
        assert!(err.to_string().contains("stdin"), "{}", err);
        assert!(marker.exists(), "run returned before the child exited");
    }

    #[test]
    fn test_system_executor_reports_missing_program() {
        let cmd = ToolCommand {
            program: "archsetup-no-such-binary".to_string(),
            args: Vec::new(),
            env: Vec::new(),
            stdin: None,
            destructive: false,
            output: OutputMode::Capture,
        };
        assert!(matches!(
            SystemExecutor::new().run(&cmd),
            Err(InstallError::System(_))
        ));
    }

    #[test]
    fn test_system_write_file_sets_mode() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("grant");
        SystemExecutor::new()
            .write_file(&path, "data\n", 0o440)
            .expect("write");
        let mode = fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o440);
        assert_eq!(
            SystemExecutor::new().read_to_string(&path).expect("read"),
            Some("data\n".to_string())
        );
    }

    #[test]
    fn test_system_read_missing_file_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("missing");
        assert_eq!(SystemExecutor::new().read_to_string(&missing).expect("read"), None);
        assert!(SystemExecutor::new().remove_file(&missing).is_ok());
    }

    #[test]
    fn test_recording_executor_canned_responses() {
        let exec = RecordingExecutor::new()
            .respond("lsblk", "{}")
            .fail_on("mkfs", 1, "busy");

        let lsblk = ToolCommand {
            program: "lsblk".to_string(),
            args: vec!["-J".to_string()],
            env: Vec::new(),
            stdin: None,
            destructive: false,
            output: OutputMode::Capture,
        };
        assert_eq!(exec.run(&lsblk).expect("run").stdout, "{}");

        let mkfs = ToolCommand {
            program: "mkfs.btrfs".to_string(),
            ..lsblk.clone()
        };
        assert!(run_command_checked(&exec, &mkfs).is_err());
        assert_eq!(exec.commands(), vec!["lsblk -J", "mkfs.btrfs -J"]);
        assert_eq!(exec.position("mkfs"), Some(1));
    }

    #[test]
    fn test_recording_executor_files() {
        let exec = RecordingExecutor::new().with_file("/etc/fstab", "# static\n");
        exec.append_file(Path::new("/etc/fstab"), "UUID=abc / btrfs\n")
            .expect("append");
        assert_eq!(
            exec.file("/etc/fstab"),
            Some("# static\nUUID=abc / btrfs\n".to_string())
        );
        exec.remove_file(Path::new("/etc/fstab")).expect("remove");
        assert!(!exec.exists(Path::new("/etc/fstab")));
    }
}
