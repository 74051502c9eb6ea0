//! Passwordless sudo grants against a real directory.
//!
//! The grant must never outlive its window: not on success, not on an
//! error return, and not when the guard is leaked and only exit-time
//! cleanup runs.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::sync::Mutex;

use archsetup::privilege::{grant_path, PrivilegeGrant, SUDOERS_DROPIN_MODE};
use archsetup::process_guard::{is_pending_cleanup, run_cleanup};
use archsetup::tool_runner::SystemExecutor;
use archsetup::InstallError;

/// run_cleanup() empties the process-wide registry
static SERIAL: Mutex<()> = Mutex::new(());

fn serial() -> std::sync::MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[test]
fn test_grant_is_read_only_and_revoked_on_release() {
    let _serial = serial();
    let dir = tempfile::tempdir().expect("tempdir");
    let exec = SystemExecutor::new();

    let grant = PrivilegeGrant::acquire(&exec, dir.path(), "alice").expect("grant");
    let path = grant.path().to_path_buf();
    assert_eq!(path, grant_path(dir.path(), "alice"));

    let mode = fs::metadata(&path).expect("metadata").permissions().mode() & 0o777;
    assert_eq!(mode, SUDOERS_DROPIN_MODE);
    assert_eq!(
        fs::read_to_string(&path).expect("read"),
        "alice ALL=(ALL:ALL) NOPASSWD: ALL\n"
    );

    grant.release().expect("release");
    assert!(!path.exists());
    assert!(!is_pending_cleanup(&path));
}

fn build_that_fails(exec: &SystemExecutor, dir: &std::path::Path) -> archsetup::Result<()> {
    let _grant = PrivilegeGrant::acquire(exec, dir, "bob")?;
    Err(InstallError::command("makepkg", 4, "==> ERROR: A failure occurred in build()."))
}

#[test]
fn test_grant_revoked_when_build_fails() {
    let _serial = serial();
    let dir = tempfile::tempdir().expect("tempdir");
    let exec = SystemExecutor::new();

    let err = build_that_fails(&exec, dir.path()).expect_err("build fails");
    assert!(err.to_string().contains("makepkg"));

    let path = grant_path(dir.path(), "bob");
    assert!(!path.exists());
    assert!(!is_pending_cleanup(&path));
}

#[test]
fn test_leaked_grant_removed_by_exit_cleanup() {
    let _serial = serial();
    let dir = tempfile::tempdir().expect("tempdir");
    let exec = SystemExecutor::new();

    let grant = PrivilegeGrant::acquire(&exec, dir.path(), "carol").expect("grant");
    let path = grant.path().to_path_buf();
    // what a signal arriving mid-build looks like: no destructor runs
    std::mem::forget(grant);
    assert!(path.exists());
    assert!(is_pending_cleanup(&path));

    run_cleanup();
    assert!(!path.exists());
    assert!(!is_pending_cleanup(&path));
}

#[test]
fn test_rejects_suspicious_usernames() {
    let _serial = serial();
    let dir = tempfile::tempdir().expect("tempdir");
    let exec = SystemExecutor::new();

    for name in ["", "eve ALL", "../etc/passwd"] {
        assert!(PrivilegeGrant::acquire(&exec, dir.path(), name).is_err(), "{:?}", name);
    }
    assert_eq!(fs::read_dir(dir.path()).expect("read_dir").count(), 0);
}
