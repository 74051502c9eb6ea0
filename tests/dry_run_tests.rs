//! Dry-run against the real executor.
//!
//! The dry-run switch is process-wide, so everything lives in one test and
//! this file holds nothing else.

use std::path::Path;

use archsetup::engine::apply::apply_plan;
use archsetup::engine::storage::{calculate_storage_plan, StorageInput};
use archsetup::privilege::{grant_path, PrivilegeGrant};
use archsetup::tool_args::OutputMode;
use archsetup::tool_runner::Executor;
use archsetup::types::SubvolumeLayout;
use archsetup::{disable_dry_run, enable_dry_run, is_dry_run, SystemExecutor, ToolCommand};

fn command(program: &str, args: &[&str], destructive: bool) -> ToolCommand {
    ToolCommand {
        program: program.to_string(),
        args: args.iter().map(|a| a.to_string()).collect(),
        env: Vec::new(),
        stdin: None,
        destructive,
        output: OutputMode::Capture,
    }
}

#[test]
fn test_dry_run_skips_every_change_but_keeps_probes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let exec = SystemExecutor::new();

    enable_dry_run();
    assert!(is_dry_run());

    // destructive commands are not even spawned
    let skipped = exec
        .run(&command("archsetup-no-such-wipe-tool", &["/dev/sda"], true))
        .expect("skipped");
    assert!(skipped.success);
    assert!(skipped.stdout.is_empty());

    // read-only probes still run
    let probe = exec
        .run(&command("sh", &["-c", "echo probe"], false))
        .expect("probe");
    assert!(probe.success);
    assert_eq!(probe.stdout.trim(), "probe");

    let file = dir.path().join("etc-hostname");
    exec.write_file(&file, "archlinux\n", 0o644).expect("write");
    exec.append_file(&file, "more\n").expect("append");
    assert!(!file.exists());

    let target = dir.path().join("mnt");
    let plan = calculate_storage_plan(
        Path::new("/dev/archsetup-dry-run"),
        &StorageInput::EntireDisk,
        SubvolumeLayout::Full,
        &target,
    )
    .expect("plan");
    let mounted = apply_plan(&exec, &plan).expect("dry-run apply");
    assert_eq!(mounted.root, target);
    assert!(!target.exists());

    let sudoers = dir.path().join("sudoers.d");
    std::fs::create_dir(&sudoers).expect("mkdir");
    let grant = PrivilegeGrant::acquire(&exec, &sudoers, "alice").expect("grant");
    assert!(!grant_path(&sudoers, "alice").exists());
    grant.release().expect("release");

    disable_dry_run();
    assert!(!is_dry_run());
}
