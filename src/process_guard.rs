//! Process lifecycle management for child processes and temporary files
//!
//! Ensures that child processes are terminated and that sensitive temporary
//! files (the passwordless sudo drop-in, one-shot installer configs) are
//! removed when archsetup exits, whether normally, through an error, a
//! panic, or a fatal signal.
//!
//! # Solution
//! - Spawn non-interactive children in their own process group
//! - Track all child PIDs in a global registry
//! - Track cleanup paths in a second global registry
//! - On SIGINT/SIGTERM/SIGHUP or panic: SIGTERM children, remove files
//! - Children have a grace period before SIGKILL

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

/// Global registry of child process IDs
static CHILD_REGISTRY: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();

/// Global registry of files to delete on abnormal exit
static CLEANUP_REGISTRY: OnceLock<Mutex<CleanupRegistry>> = OnceLock::new();

/// Registry tracking all spawned child processes
#[derive(Debug, Default)]
pub struct ChildRegistry {
    /// Set of child PIDs currently running
    pids: HashSet<u32>,
    /// Whether cleanup has already been initiated (prevent double-cleanup)
    cleanup_initiated: bool,
}

impl ChildRegistry {
    /// Get or create the global child registry
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        CHILD_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
            .clone()
    }

    /// Register a new child process
    pub fn register(&mut self, pid: u32) {
        self.pids.insert(pid);
        tracing::debug!("Registered child process PID {}", pid);
    }

    /// Unregister a child process (called when it exits normally)
    pub fn unregister(&mut self, pid: u32) {
        self.pids.remove(&pid);
        tracing::debug!("Unregistered child process PID {}", pid);
    }

    /// Get count of tracked children
    pub fn count(&self) -> usize {
        self.pids.len()
    }

    /// Terminate all tracked child processes.
    /// Sends SIGTERM first, waits up to `grace_period`, then SIGKILL.
    pub fn terminate_all(&mut self, grace_period: Duration) {
        if self.cleanup_initiated {
            tracing::debug!("Cleanup already initiated, skipping");
            return;
        }
        self.cleanup_initiated = true;

        if self.pids.is_empty() {
            return;
        }

        tracing::info!("Terminating {} child process(es)...", self.pids.len());

        let pids_to_kill: Vec<u32> = self.pids.iter().copied().collect();
        for &pid in &pids_to_kill {
            // Group signal reaches grandchildren (pacman under pacstrap, etc.)
            if let Err(e) = send_signal_to_group(pid, Signal::SIGTERM) {
                tracing::debug!("Group SIGTERM to {} failed ({}), signalling PID directly", pid, e);
                if let Err(e2) = send_signal(pid, Signal::SIGTERM) {
                    tracing::warn!("Failed to send SIGTERM to PID {}: {}", pid, e2);
                }
            }
        }

        let start = Instant::now();
        while start.elapsed() < grace_period {
            if pids_to_kill.iter().all(|&pid| !is_process_alive(pid)) {
                tracing::info!("All child processes terminated gracefully");
                self.pids.clear();
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        for &pid in &pids_to_kill {
            if is_process_alive(pid) {
                tracing::warn!("Process {} did not terminate, sending SIGKILL", pid);
                if send_signal_to_group(pid, Signal::SIGKILL).is_err() {
                    let _ = send_signal(pid, Signal::SIGKILL);
                }
            }
        }

        self.pids.clear();
    }
}

/// Send a signal to a process
fn send_signal(pid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(pid as i32), signal)
}

/// Send a signal to an entire process group (negative PID)
fn send_signal_to_group(pgid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(-(pgid as i32)), signal)
}

/// Check if a process is still alive (not dead or zombie)
fn is_process_alive(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }

    // Field 3 of /proc/pid/stat is the state; Z and X are not running
    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        let fields: Vec<&str> = stat.split_whitespace().collect();
        if fields.len() > 2 {
            return !matches!(fields[2], "Z" | "X");
        }
    }

    true
}

// ============================================================================
// Cleanup paths
// ============================================================================

/// Files that must not outlive the process, removed newest first.
#[derive(Debug, Default)]
pub struct CleanupRegistry {
    paths: Vec<PathBuf>,
}

impl CleanupRegistry {
    pub fn register(&mut self, path: &Path) {
        if !self.paths.iter().any(|p| p == path) {
            self.paths.push(path.to_path_buf());
            tracing::debug!("Registered cleanup path {}", path.display());
        }
    }

    pub fn unregister(&mut self, path: &Path) {
        self.paths.retain(|p| p != path);
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    /// Remove every registered path. Missing files are not an error.
    pub fn remove_all(&mut self) {
        while let Some(path) = self.paths.pop() {
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::info!("Removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::error!("Failed to remove {}: {}", path.display(), e),
            }
        }
    }
}

fn cleanup_registry() -> &'static Mutex<CleanupRegistry> {
    CLEANUP_REGISTRY.get_or_init(|| Mutex::new(CleanupRegistry::default()))
}

/// Register a file that must not survive the process.
pub fn register_cleanup(path: &Path) {
    if let Ok(mut registry) = cleanup_registry().lock() {
        registry.register(path);
    }
}

/// Forget a path once its owner has removed it.
pub fn unregister_cleanup(path: &Path) {
    if let Ok(mut registry) = cleanup_registry().lock() {
        registry.unregister(path);
    }
}

/// Whether `path` is currently scheduled for removal.
pub fn is_pending_cleanup(path: &Path) -> bool {
    cleanup_registry()
        .lock()
        .map(|registry| registry.contains(path))
        .unwrap_or(false)
}

/// Remove every registered path. Safe to call more than once.
pub fn run_cleanup() {
    if let Ok(mut registry) = cleanup_registry().lock() {
        registry.remove_all();
    }
}

// ============================================================================
// Exit paths
// ============================================================================

/// Initialize global signal handlers for graceful shutdown.
/// Handles SIGINT (Ctrl+C), SIGTERM, and SIGHUP. Call once at program start.
pub fn init_signal_handlers() -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;
    use std::thread;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            let signal_name = match sig {
                SIGINT => "SIGINT",
                SIGTERM => "SIGTERM",
                SIGHUP => "SIGHUP",
                _ => "UNKNOWN",
            };

            tracing::warn!("Received {}, cleaning up...", signal_name);

            if let Ok(mut registry) = ChildRegistry::global().lock() {
                registry.terminate_all(Duration::from_secs(3));
            }
            run_cleanup();

            std::process::exit(128 + sig);
        }
    });

    Ok(())
}

/// Chain a panic hook that removes registered files before the default hook
/// runs. Release builds abort on panic, so Drop guards cannot be relied on.
pub fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        if let Ok(mut registry) = ChildRegistry::global().lock() {
            registry.terminate_all(Duration::from_secs(1));
        }
        run_cleanup();
        previous(info);
    }));
}

/// Extension trait for std::process::Command to set up process groups
pub trait CommandProcessGroup {
    /// Run the command in its own process group and tie its life to ours.
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::other)?;

                // Child dies with us instead of finishing a half-applied wipe
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }

                Ok(())
            });
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_register_unregister() {
        let mut registry = ChildRegistry::default();

        registry.register(1234);
        registry.register(5678);
        assert_eq!(registry.count(), 2);

        registry.unregister(1234);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_terminate_all_kills_real_process() {
        use std::process::Command;

        let mut child = Command::new("sleep")
            .arg("60")
            .in_new_process_group()
            .spawn()
            .expect("Failed to spawn sleep");

        let mut registry = ChildRegistry::default();
        registry.register(child.id());

        registry.terminate_all(Duration::from_millis(500));

        let status = child.wait().expect("wait");
        assert!(!status.success());
    }

    #[test]
    fn test_cleanup_flag_prevents_double_cleanup() {
        let mut registry = ChildRegistry::default();
        registry.register(999_999);

        registry.terminate_all(Duration::from_millis(10));
        assert!(registry.cleanup_initiated);

        registry.terminate_all(Duration::from_millis(10));
        assert!(registry.cleanup_initiated);
    }

    #[test]
    fn test_is_process_alive_nonexistent() {
        assert!(!is_process_alive(999_999));
    }

    #[test]
    fn test_cleanup_registry_removes_files_newest_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = dir.path().join("grant");
        let second = dir.path().join("oneshot.json");
        std::fs::write(&first, "x").expect("write");
        std::fs::write(&second, "y").expect("write");

        let mut registry = CleanupRegistry::default();
        registry.register(&first);
        registry.register(&second);
        registry.register(&second);
        assert!(registry.contains(&second));

        registry.remove_all();
        assert!(!first.exists());
        assert!(!second.exists());
        assert!(!registry.contains(&first));
    }

    #[test]
    fn test_cleanup_registry_unregister_keeps_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("keep");
        std::fs::write(&path, "x").expect("write");

        let mut registry = CleanupRegistry::default();
        registry.register(&path);
        registry.unregister(&path);
        registry.remove_all();
        assert!(path.exists());
    }

    #[test]
    fn test_cleanup_registry_ignores_missing_files() {
        let mut registry = CleanupRegistry::default();
        registry.register(Path::new("/nonexistent/archsetup-test"));
        registry.remove_all();
        assert!(!registry.contains(Path::new("/nonexistent/archsetup-test")));
    }
}
