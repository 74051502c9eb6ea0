//! Scoped passwordless sudo for the invoking user.
//!
//! AUR builds run `makepkg` as the regular user, and makepkg calls `sudo
//! pacman` to install what it built. `PrivilegeGrant` writes a sudoers
//! drop-in for exactly that window.
//!
//! # Cleanup Guarantees
//!
//! The drop-in is removed by whichever comes first:
//!
//! - `release()` or `Drop` on every normal and error return
//! - `process_guard::run_cleanup()` from the signal handler or panic hook

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{InstallError, Result};
use crate::process_guard::{register_cleanup, unregister_cleanup};
use crate::tool_runner::Executor;

/// sudoers requires drop-ins to be read-only.
pub const SUDOERS_DROPIN_MODE: u32 = 0o440;

/// Path of the drop-in for `username` inside `sudoers_dir`.
pub fn grant_path(sudoers_dir: &Path, username: &str) -> PathBuf {
    sudoers_dir.join(format!("99-archsetup-nopasswd-{}", username))
}

/// A live passwordless-sudo grant. Revoked on drop.
pub struct PrivilegeGrant<'a> {
    exec: &'a dyn Executor,
    path: PathBuf,
    released: bool,
}

impl<'a> PrivilegeGrant<'a> {
    /// Write the drop-in and register it for exit-time cleanup.
    pub fn acquire(exec: &'a dyn Executor, sudoers_dir: &Path, username: &str) -> Result<Self> {
        if username.is_empty() || username.contains(|c: char| c.is_whitespace() || c == '/') {
            return Err(InstallError::validation(format!(
                "refusing to grant sudo to '{}'",
                username
            )));
        }
        let path = grant_path(sudoers_dir, username);
        // registered first so a signal during the write still removes it
        register_cleanup(&path);
        let rule = format!("{} ALL=(ALL:ALL) NOPASSWD: ALL\n", username);
        if let Err(e) = exec.write_file(&path, &rule, SUDOERS_DROPIN_MODE) {
            unregister_cleanup(&path);
            return Err(e);
        }
        info!("Temporary passwordless sudo granted to {}", username);
        Ok(Self {
            exec,
            path,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the drop-in now.
    pub fn release(mut self) -> Result<()> {
        self.revoke()
    }

    fn revoke(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        let result = self.exec.remove_file(&self.path);
        if result.is_ok() {
            unregister_cleanup(&self.path);
            info!("Temporary sudo grant revoked");
        }
        result
    }
}

impl Drop for PrivilegeGrant<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.revoke() {
            // still registered, so exit-time cleanup retries
            warn!("Failed to remove {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process_guard::is_pending_cleanup;
    use crate::tool_runner::{Action, RecordingExecutor};

    #[test]
    fn test_grant_written_read_only_and_removed_on_drop() {
        let exec = RecordingExecutor::new();
        let dir = Path::new("/unit/grant-drop/sudoers.d");
        let path = {
            let grant = PrivilegeGrant::acquire(&exec, dir, "alice").expect("grant");
            assert_eq!(
                exec.file(grant.path()).as_deref(),
                Some("alice ALL=(ALL:ALL) NOPASSWD: ALL\n")
            );
            assert!(is_pending_cleanup(grant.path()));
            grant.path().to_path_buf()
        };
        assert!(exec.file(&path).is_none());
        assert!(!is_pending_cleanup(&path));
        assert!(exec.actions().iter().any(|a| matches!(
            a,
            Action::WriteFile { mode, .. } if *mode == SUDOERS_DROPIN_MODE
        )));
    }

    #[test]
    fn test_release_is_single_removal() {
        let exec = RecordingExecutor::new();
        let grant = PrivilegeGrant::acquire(&exec, Path::new("/unit/grant-release"), "bob").expect("grant");
        grant.release().expect("release");
        let removals = exec
            .actions()
            .iter()
            .filter(|a| matches!(a, Action::RemoveFile(_)))
            .count();
        assert_eq!(removals, 1);
    }

    #[test]
    fn test_rejects_odd_usernames() {
        let exec = RecordingExecutor::new();
        assert!(PrivilegeGrant::acquire(&exec, Path::new("/x"), "").is_err());
        assert!(PrivilegeGrant::acquire(&exec, Path::new("/x"), "a b").is_err());
        assert!(PrivilegeGrant::acquire(&exec, Path::new("/x"), "../etc").is_err());
        assert!(exec.actions().is_empty());
    }
}
