//! Type-safe arguments for partitioning, formatting and probing tools.

use std::fmt;
use std::path::PathBuf;

use super::path_arg;
use crate::tool_args::{OutputMode, ToolArgs};
use crate::types::Filesystem;

/// A partition boundary as understood by `parted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartBound {
    /// Absolute offset in MiB from the start of the disk
    Mib(u64),
    /// The last usable sector (`100%`)
    End,
}

impl fmt::Display for PartBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mib(n) => write!(f, "{}MiB", n),
            Self::End => write!(f, "100%"),
        }
    }
}

/// Partition table types partitions can be added to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionTable {
    Gpt,
    Msdos,
}

impl PartitionTable {
    /// Map parted's label name; other label types are not written to.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "gpt" => Some(Self::Gpt),
            "msdos" => Some(Self::Msdos),
            _ => None,
        }
    }

    /// Highest partition number parted can hand out for a new partition.
    pub fn max_new_number(self) -> u32 {
        match self {
            Self::Gpt => 128,
            // primary slots; 5 and up are logical
            Self::Msdos => 4,
        }
    }
}

impl fmt::Display for PartitionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gpt => write!(f, "gpt"),
            Self::Msdos => write!(f, "msdos"),
        }
    }
}

/// `sgdisk --zap-all DISK`: destroy GPT and MBR structures.
#[derive(Debug, Clone)]
pub struct WipeDiskArgs {
    pub device: PathBuf,
}

impl ToolArgs for WipeDiskArgs {
    fn program(&self) -> &'static str {
        "sgdisk"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["--zap-all".to_string(), path_arg(&self.device)]
    }

    /// Wiping is DESTRUCTIVE - erases the partition table.
    fn is_destructive(&self) -> bool {
        true
    }
}

/// `parted -s DISK mklabel gpt`
#[derive(Debug, Clone)]
pub struct MklabelArgs {
    pub device: PathBuf,
}

impl ToolArgs for MklabelArgs {
    fn program(&self) -> &'static str {
        "parted"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-s".to_string(),
            path_arg(&self.device),
            "mklabel".to_string(),
            "gpt".to_string(),
        ]
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

/// Create one partition.
///
/// # Field to Flag Mapping
///
/// | Rust Field | parted argument |
/// |------------|-----------------|
/// | `device`   | disk path |
/// | `table`    | decides what the name position holds |
/// | `name`     | GPT partition name (`ESP`, `root`); `primary` on msdos |
/// | `fs_hint`  | filesystem type hint (`fat32`, `btrfs`) |
/// | `start`    | start boundary |
/// | `end`      | end boundary |
#[derive(Debug, Clone)]
pub struct MkpartArgs {
    pub device: PathBuf,
    pub table: PartitionTable,
    pub name: String,
    pub fs_hint: Filesystem,
    pub start: PartBound,
    pub end: PartBound,
}

impl ToolArgs for MkpartArgs {
    fn program(&self) -> &'static str {
        "parted"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-s".to_string(),
            "-a".to_string(),
            "optimal".to_string(),
            path_arg(&self.device),
            "mkpart".to_string(),
            match self.table {
                PartitionTable::Gpt => self.name.clone(),
                PartitionTable::Msdos => "primary".to_string(),
            },
            self.fs_hint.to_string(),
            self.start.to_string(),
            self.end.to_string(),
        ]
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

/// `parted -s DISK set N esp on`
#[derive(Debug, Clone)]
pub struct SetEspFlagArgs {
    pub device: PathBuf,
    pub number: u32,
}

impl ToolArgs for SetEspFlagArgs {
    fn program(&self) -> &'static str {
        "parted"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-s".to_string(),
            path_arg(&self.device),
            "set".to_string(),
            self.number.to_string(),
            "esp".to_string(),
            "on".to_string(),
        ]
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

/// `partprobe DISK`: ask the kernel to re-read the partition table.
#[derive(Debug, Clone)]
pub struct PartprobeArgs {
    pub device: PathBuf,
}

impl ToolArgs for PartprobeArgs {
    fn program(&self) -> &'static str {
        "partprobe"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![path_arg(&self.device)]
    }

    /// Skipped in dry-run: no table was written to re-read.
    fn is_destructive(&self) -> bool {
        true
    }
}

/// Create a filesystem.
///
/// FAT32 maps to `mkfs.fat -F 32 -n LABEL`, btrfs to `mkfs.btrfs -f -L LABEL`.
#[derive(Debug, Clone)]
pub struct MkfsArgs {
    pub device: PathBuf,
    pub filesystem: Filesystem,
    pub label: String,
}

impl ToolArgs for MkfsArgs {
    fn program(&self) -> &'static str {
        match self.filesystem {
            Filesystem::Fat32 => "mkfs.fat",
            Filesystem::Btrfs => "mkfs.btrfs",
        }
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = match self.filesystem {
            Filesystem::Fat32 => vec![
                "-F".to_string(),
                "32".to_string(),
                "-n".to_string(),
                self.label.clone(),
            ],
            Filesystem::Btrfs => vec!["-f".to_string(), "-L".to_string(), self.label.clone()],
        };
        args.push(path_arg(&self.device));
        args
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

/// `cfdisk DISK`, run attached to the operator's terminal.
#[derive(Debug, Clone)]
pub struct CfdiskArgs {
    pub device: PathBuf,
}

impl ToolArgs for CfdiskArgs {
    fn program(&self) -> &'static str {
        "cfdisk"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![path_arg(&self.device)]
    }

    fn is_destructive(&self) -> bool {
        true
    }

    fn output_mode(&self) -> OutputMode {
        OutputMode::Interactive
    }
}

/// `parted -m -s DISK unit MiB print`: machine-readable layout in MiB.
#[derive(Debug, Clone)]
pub struct PartedPrintArgs {
    pub device: PathBuf,
}

impl ToolArgs for PartedPrintArgs {
    fn program(&self) -> &'static str {
        "parted"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-m".to_string(),
            "-s".to_string(),
            path_arg(&self.device),
            "unit".to_string(),
            "MiB".to_string(),
            "print".to_string(),
        ]
    }

    fn is_destructive(&self) -> bool {
        false
    }
}

/// `lsblk -J -b -d -o ...`: whole disks as JSON, sizes in bytes.
#[derive(Debug, Clone, Default)]
pub struct LsblkDisksArgs;

impl ToolArgs for LsblkDisksArgs {
    fn program(&self) -> &'static str {
        "lsblk"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-J".to_string(),
            "-b".to_string(),
            "-d".to_string(),
            "-o".to_string(),
            "NAME,PATH,SIZE,TYPE,MODEL,TRAN".to_string(),
        ]
    }

    fn is_destructive(&self) -> bool {
        false
    }
}

/// `lsblk -J -b -o ... DISK`: one disk and its partitions as JSON.
#[derive(Debug, Clone)]
pub struct LsblkPartitionsArgs {
    pub device: PathBuf,
}

impl ToolArgs for LsblkPartitionsArgs {
    fn program(&self) -> &'static str {
        "lsblk"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-J".to_string(),
            "-b".to_string(),
            "-o".to_string(),
            "NAME,PATH,SIZE,TYPE,PARTTYPE,FSTYPE".to_string(),
            path_arg(&self.device),
        ]
    }

    fn is_destructive(&self) -> bool {
        false
    }
}
