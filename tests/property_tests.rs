//! Property-Based Tests for archsetup
//!
//! These tests verify:
//! - Partition device naming for SATA/virtio and NVMe style disks
//! - Shape of the entire-disk plan for any disk and layout
//! - Idempotency of the configuration file edits
//! - The destructive-action gate accepting nothing but "yes"

use std::path::{Path, PathBuf};

use proptest::prelude::*;

use archsetup::confedit::{enable_locale, set_directive, upsert_managed_block};
use archsetup::engine::storage::{calculate_storage_plan, partition_path, StorageInput, StorageOp};
use archsetup::input::{confirm_destructive, validate_hostname};
use archsetup::types::SubvolumeLayout;

// =============================================================================
// Strategies
// =============================================================================

/// Disks whose names end in a letter: sda, vdb, xvdc
fn lettered_disk() -> impl Strategy<Value = String> {
    "(sd|vd|xvd)[a-z]".prop_map(|name| format!("/dev/{}", name))
}

/// Disks whose names end in a digit: nvme0n1, mmcblk0
fn numbered_disk() -> impl Strategy<Value = String> {
    prop_oneof![
        (0u8..4, 1u8..4).prop_map(|(c, n)| format!("/dev/nvme{}n{}", c, n)),
        (0u8..3).prop_map(|n| format!("/dev/mmcblk{}", n)),
    ]
}

fn layout_strategy() -> impl Strategy<Value = SubvolumeLayout> {
    prop_oneof![Just(SubvolumeLayout::Full), Just(SubvolumeLayout::Turbo)]
}

/// Config-file-ish text without managed block markers or sections.
fn config_text() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-zA-Z0-9_ =#.\"-]{0,24}", 0..12).prop_map(|lines| lines.join("\n"))
}

// =============================================================================
// Partition naming
// =============================================================================

proptest! {
    /// Letter-terminated disks take the bare partition number
    #[test]
    fn lettered_disks_append_number(disk in lettered_disk(), n in 1u32..128) {
        let path = partition_path(Path::new(&disk), n);
        prop_assert_eq!(path, PathBuf::from(format!("{}{}", disk, n)));
    }

    /// Digit-terminated disks take a `p` infix
    #[test]
    fn numbered_disks_use_p_infix(disk in numbered_disk(), n in 1u32..128) {
        let path = partition_path(Path::new(&disk), n);
        prop_assert_eq!(path, PathBuf::from(format!("{}p{}", disk, n)));
    }
}

// =============================================================================
// Entire-disk plan
// =============================================================================

proptest! {
    /// Wipe first, exactly ESP + root, everything mounted under the target
    #[test]
    fn entire_disk_plan_shape(
        disk in prop_oneof![lettered_disk(), numbered_disk()],
        layout in layout_strategy(),
    ) {
        let disk = PathBuf::from(disk);
        let plan = calculate_storage_plan(&disk, &StorageInput::EntireDisk, layout, Path::new("/mnt"))
            .expect("entire-disk plan");

        let wipes_first = matches!(plan.ops.first(), Some(StorageOp::WipeDisk { .. }));
        prop_assert!(wipes_first, "plan must start by wiping the disk");
        let created: Vec<u32> = plan
            .ops
            .iter()
            .filter_map(|op| match op {
                StorageOp::CreatePartition { number, .. } => Some(*number),
                _ => None,
            })
            .collect();
        prop_assert_eq!(created, vec![1, 2]);

        prop_assert_eq!(&plan.root, &partition_path(&disk, 2));
        let efi = plan.efi.as_ref().expect("efi partition");
        prop_assert!(efi.format);
        prop_assert_eq!(&efi.device, &partition_path(&disk, 1));

        for op in &plan.ops {
            if let StorageOp::Mount { mountpoint, .. } = op {
                prop_assert!(mountpoint.starts_with("/mnt"));
            }
        }
        prop_assert!(plan.is_destructive());
    }
}

// =============================================================================
// Configuration edits
// =============================================================================

proptest! {
    /// Regenerating a managed block a second time changes nothing
    #[test]
    fn managed_block_is_idempotent(content in config_text(), body in config_text()) {
        let once = upsert_managed_block(&content, "hosts", &body);
        let twice = upsert_managed_block(&once, "hosts", &body);
        prop_assert_eq!(&once, &twice);
        prop_assert_eq!(once.matches("# >>> archsetup: hosts >>>").count(), 1);
    }

    /// Setting a directive twice equals setting it once
    #[test]
    fn set_directive_is_idempotent(content in config_text(), n in 1u8..32) {
        let rendered = format!("ParallelDownloads = {}", n);
        let once = set_directive(&content, Some("options"), "ParallelDownloads", &rendered);
        let twice = set_directive(&once, Some("options"), "ParallelDownloads", &rendered);
        prop_assert_eq!(&once, &twice);
        prop_assert_eq!(once.lines().filter(|l| l.trim() == rendered).count(), 1);
    }

    /// A locale is enabled exactly once however often it is requested
    #[test]
    fn enable_locale_is_idempotent(content in config_text()) {
        let once = enable_locale(&content, "de_DE.UTF-8");
        let twice = enable_locale(&once, "de_DE.UTF-8");
        prop_assert_eq!(&once, &twice);
        prop_assert_eq!(once.lines().filter(|l| l.trim() == "de_DE.UTF-8 UTF-8").count(), 1);
    }
}

// =============================================================================
// Input validation
// =============================================================================

proptest! {
    /// Only the literal word passes the gate
    #[test]
    fn gate_rejects_everything_but_yes(answer in ".{0,12}") {
        prop_assume!(answer.trim_end_matches(['\n', '\r']) != "yes");
        prop_assert!(confirm_destructive(&answer).is_err());
    }

    /// RFC 1123 labels are accepted
    #[test]
    fn valid_hostnames_accepted(name in "[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?") {
        prop_assert!(validate_hostname(&name).is_ok());
    }
}

#[test]
fn gate_rejects_near_misses() {
    for answer in ["YES", "Yes", " yes", "yes ", "y", "yes!", ""] {
        assert!(confirm_destructive(answer).is_err(), "{:?} must not pass", answer);
    }
    assert!(confirm_destructive("yes").is_ok());
}
