//! Read-only disk probes.
//!
//! Parsers for `lsblk -J -b` and `parted -m` output, plus thin wrappers that
//! run the probe through an `Executor`. The parsers are pure so that the
//! Disk Planner can be tested against captured tool output.
//!
//! # Failure Policy
//!
//! Probes never modify the disk. Malformed tool output is an error; a disk
//! without a partition table is not (it is reported through
//! `DiskLayout::has_partition_table`).

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::error::{InstallError, Result};
use crate::tool_args::ToolArgs;
use crate::tool_runner::{run_checked, Executor};
use crate::tools::disk::{LsblkDisksArgs, LsblkPartitionsArgs, PartedPrintArgs, PartitionTable};

/// GPT partition type GUID of an EFI System Partition.
pub const ESP_TYPE_GUID: &str = "c12a7328-f81f-11d2-ba4b-00a0c93ec93b";

/// MBR partition type of an EFI System Partition.
pub const ESP_TYPE_MBR: &str = "0xef";

/// SATA/SCSI, virtio and NVMe namespaces. Partitions, loop devices,
/// optical drives and zram never match.
static WHOLE_DISK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(sd[a-z]+|vd[a-z]+|nvme[0-9]+n[0-9]+)$").expect("valid whole-disk regex")
});

/// Returns true if `name` (without `/dev/`) is an installable whole disk.
pub fn is_whole_disk_name(name: &str) -> bool {
    WHOLE_DISK.is_match(name)
}

// ============================================================================
// lsblk
// ============================================================================

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    #[serde(default)]
    blockdevices: Vec<LsblkDevice>,
}

/// lsblk prints sizes as numbers in recent util-linux and as strings in
/// older releases.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LsblkSize {
    Number(u64),
    Text(String),
}

impl LsblkSize {
    fn bytes(&self) -> u64 {
        match self {
            Self::Number(n) => *n,
            Self::Text(s) => s.trim().parse().unwrap_or(0),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    size: Option<LsblkSize>,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    tran: Option<String>,
    #[serde(default)]
    parttype: Option<String>,
    #[serde(default)]
    fstype: Option<String>,
    #[serde(default)]
    children: Vec<LsblkDevice>,
}

impl LsblkDevice {
    fn device_path(&self) -> PathBuf {
        self.path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(format!("/dev/{}", self.name)))
    }

    fn size_bytes(&self) -> u64 {
        self.size.as_ref().map(LsblkSize::bytes).unwrap_or(0)
    }
}

/// A candidate installation disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskInfo {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub model: Option<String>,
    pub transport: Option<String>,
}

impl DiskInfo {
    /// One-line description for selection menus.
    pub fn label(&self) -> String {
        let mut label = format!("{}  {}", self.path.display(), format_size(self.size_bytes));
        if let Some(ref model) = self.model {
            label.push_str("  ");
            label.push_str(model);
        }
        if let Some(ref tran) = self.transport {
            label.push_str(&format!(" ({})", tran));
        }
        label
    }
}

/// Parse `lsblk -J -b -d` output into installable whole disks.
pub fn parse_lsblk_disks(json: &str) -> Result<Vec<DiskInfo>> {
    let output: LsblkOutput = serde_json::from_str(json)?;
    let disks = output
        .blockdevices
        .into_iter()
        .filter(|d| d.kind == "disk" && is_whole_disk_name(&d.name))
        .map(|d| DiskInfo {
            path: d.device_path(),
            size_bytes: d.size_bytes(),
            model: d
                .model
                .as_deref()
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string),
            transport: d.tran.clone().filter(|t| !t.is_empty()),
            name: d.name,
        })
        .collect();
    Ok(disks)
}

/// Enumerate installable whole disks. May return an empty list.
pub fn list_disks(exec: &dyn Executor) -> Result<Vec<DiskInfo>> {
    let output = run_checked(exec, &LsblkDisksArgs)?;
    let disks = parse_lsblk_disks(&output.stdout)?;
    debug!("Found {} candidate disk(s)", disks.len());
    Ok(disks)
}

/// A partition as reported by lsblk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPartition {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub parttype: Option<String>,
    pub fstype: Option<String>,
}

impl BlockPartition {
    /// ESP by partition type (GPT GUID or MBR id).
    pub fn has_esp_type(&self) -> bool {
        self.parttype
            .as_deref()
            .map(|t| t.eq_ignore_ascii_case(ESP_TYPE_GUID) || t.eq_ignore_ascii_case(ESP_TYPE_MBR))
            .unwrap_or(false)
    }

    fn is_vfat(&self) -> bool {
        self.fstype.as_deref() == Some("vfat")
    }
}

fn collect_partitions(devices: Vec<LsblkDevice>, out: &mut Vec<BlockPartition>) {
    for device in devices {
        if device.kind == "part" {
            out.push(BlockPartition {
                path: device.device_path(),
                size_bytes: device.size_bytes(),
                parttype: device.parttype.clone().filter(|t| !t.is_empty()),
                fstype: device.fstype.clone().filter(|t| !t.is_empty()),
            });
        }
        collect_partitions(device.children, out);
    }
}

/// Parse `lsblk -J -b -o NAME,PATH,SIZE,TYPE,PARTTYPE,FSTYPE DISK`.
pub fn parse_lsblk_partitions(json: &str) -> Result<Vec<BlockPartition>> {
    let output: LsblkOutput = serde_json::from_str(json)?;
    let mut partitions = Vec::new();
    collect_partitions(output.blockdevices, &mut partitions);
    Ok(partitions)
}

/// Partitions the operator left behind after manual partitioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualLayout {
    pub efi: Option<BlockPartition>,
    pub root: BlockPartition,
}

/// Identify ESP and root among `partitions`.
///
/// The ESP is the first partition with the ESP type, or failing that the
/// first vfat partition. Root is the largest remaining partition.
pub fn detect_manual_layout(partitions: &[BlockPartition]) -> Result<ManualLayout> {
    let efi = partitions
        .iter()
        .find(|p| p.has_esp_type())
        .or_else(|| partitions.iter().find(|p| p.is_vfat()))
        .cloned();

    let root = partitions
        .iter()
        .filter(|p| efi.as_ref().map(|e| e.path != p.path).unwrap_or(true))
        .max_by_key(|p| p.size_bytes)
        .cloned()
        .ok_or_else(|| {
            InstallError::precondition("no root partition could be identified after manual partitioning")
        })?;

    Ok(ManualLayout { efi, root })
}

/// Re-read a disk's partitions through lsblk.
pub fn probe_partitions(exec: &dyn Executor, disk: &Path) -> Result<Vec<BlockPartition>> {
    let output = run_checked(
        exec,
        &LsblkPartitionsArgs {
            device: disk.to_path_buf(),
        },
    )?;
    parse_lsblk_partitions(&output.stdout)
}

// ============================================================================
// parted
// ============================================================================

/// A partition as reported by `parted -m ... unit MiB print`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExistingPartition {
    pub number: u32,
    pub start_mib: f64,
    pub end_mib: f64,
    pub filesystem: Option<String>,
    pub name: Option<String>,
    pub flags: Vec<String>,
}

impl ExistingPartition {
    /// `esp` flag, or a FAT filesystem carrying the legacy `boot` flag.
    pub fn is_esp(&self) -> bool {
        let has = |flag: &str| self.flags.iter().any(|f| f == flag);
        let fat = self
            .filesystem
            .as_deref()
            .map(|fs| fs.starts_with("fat"))
            .unwrap_or(false);
        has("esp") || (fat && has("boot"))
    }
}

/// Current layout of one disk.
#[derive(Debug, Clone, PartialEq)]
pub struct DiskLayout {
    pub device: PathBuf,
    pub size_mib: f64,
    /// `gpt`, `msdos`, ... or `None` when parted reports `unknown`
    pub table: Option<String>,
    pub partitions: Vec<ExistingPartition>,
}

impl DiskLayout {
    pub fn has_partition_table(&self) -> bool {
        self.table.is_some()
    }

    pub fn existing_esp(&self) -> Option<&ExistingPartition> {
        self.partitions.iter().find(|p| p.is_esp())
    }

    /// First whole MiB after the last partition, or 1 MiB on an empty table.
    pub fn free_region_start_mib(&self) -> u64 {
        self.partitions
            .iter()
            .map(|p| p.end_mib)
            .fold(None, |acc: Option<f64>, end| Some(acc.map_or(end, |a| a.max(end))))
            .map(|end| end.ceil() as u64)
            .unwrap_or(1)
            .max(1)
    }

    /// MiB between the free region start and the end of the disk.
    pub fn available_mib(&self) -> u64 {
        (self.size_mib.floor() as u64).saturating_sub(self.free_region_start_mib())
    }

    /// The table type, when partitions can be added to it.
    pub fn partition_table(&self) -> Option<PartitionTable> {
        self.table.as_deref().and_then(PartitionTable::from_label)
    }

    /// Numbers parted gives the next `count` created partitions.
    ///
    /// parted fills the lowest unused slot, so a gap left by a deleted
    /// partition is reused before the highest number grows. Fewer than
    /// `count` numbers come back when the table runs out of slots.
    pub fn free_partition_numbers(&self, count: usize) -> Vec<u32> {
        let limit = self
            .partition_table()
            .map_or(PartitionTable::Gpt.max_new_number(), PartitionTable::max_new_number);
        (1..=limit)
            .filter(|n| self.partitions.iter().all(|p| p.number != *n))
            .take(count)
            .collect()
    }
}

fn parse_mib(field: &str) -> Result<f64> {
    let value = field.trim().trim_end_matches("MiB");
    value
        .parse::<f64>()
        .map_err(|_| InstallError::system(format!("unparseable parted size '{}'", field)))
}

fn non_empty(field: &str) -> Option<String> {
    let field = field.trim();
    (!field.is_empty()).then(|| field.to_string())
}

/// Parse `parted -m -s DISK unit MiB print` output.
///
/// ```text
/// BYT;
/// /dev/sda:10240MiB:scsi:512:512:gpt:ATA VBOX HARDDISK:;
/// 1:1.00MiB:513MiB:512MiB:fat32:ESP:boot, esp;
/// ```
pub fn parse_parted_machine(output: &str) -> Result<DiskLayout> {
    let mut lines = output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && *l != "BYT;");

    let disk_line = lines
        .next()
        .ok_or_else(|| InstallError::system("parted printed no disk information"))?;
    let disk_fields: Vec<&str> = disk_line.trim_end_matches(';').split(':').collect();
    if disk_fields.len() < 6 {
        return Err(InstallError::system(format!(
            "unexpected parted disk line '{}'",
            disk_line
        )));
    }

    let table = match disk_fields[5].trim() {
        "" | "unknown" | "loop" => None,
        other => Some(other.to_string()),
    };

    let mut partitions = Vec::new();
    for line in lines {
        let fields: Vec<&str> = line.trim_end_matches(';').split(':').collect();
        let Ok(number) = fields[0].trim().parse::<u32>() else {
            continue;
        };
        if fields.len() < 4 {
            return Err(InstallError::system(format!(
                "unexpected parted partition line '{}'",
                line
            )));
        }
        partitions.push(ExistingPartition {
            number,
            start_mib: parse_mib(fields[1])?,
            end_mib: parse_mib(fields[2])?,
            filesystem: fields.get(4).and_then(|f| non_empty(f)),
            name: fields.get(5).and_then(|f| non_empty(f)),
            flags: fields
                .get(6)
                .map(|f| {
                    f.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        });
    }

    Ok(DiskLayout {
        device: PathBuf::from(disk_fields[0]),
        size_mib: parse_mib(disk_fields[1])?,
        table,
        partitions,
    })
}

/// Probe the current layout of `disk`.
///
/// parted exits non-zero on a disk without a label but still prints the
/// disk line, so the exit status alone is not treated as failure.
pub fn probe_layout(exec: &dyn Executor, disk: &Path) -> Result<DiskLayout> {
    let args = PartedPrintArgs {
        device: disk.to_path_buf(),
    };
    let output = exec.run(&args.to_command())?;
    if !output.stdout.contains(':') {
        output.ensure_success(args.program())?;
        return Err(InstallError::system(format!(
            "parted printed no layout for {}",
            disk.display()
        )));
    }
    let layout = parse_parted_machine(&output.stdout)?;
    debug!(
        "{}: {:.0} MiB, table {:?}, {} partition(s)",
        disk.display(),
        layout.size_mib,
        layout.table,
        layout.partitions.len()
    );
    Ok(layout)
}

/// Format a size in bytes to human readable string
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.1} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
