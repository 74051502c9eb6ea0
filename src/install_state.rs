//! Install State Machine
//!
//! Authoritative record of how far an installation got. The `Installer`
//! advances the context before each phase; when a phase fails, the stage it
//! failed in decides what rollback is possible and what the operator is told
//! about resuming.
//!
//! # Design Principles
//!
//! - **Single Source of Truth**: The `InstallerContext` owns the current stage
//! - **Validated Transitions**: Only forward transitions to the next stage are allowed
//! - **No Global State**: State is owned by `InstallerContext`, not global/static
//! - **Confirmation Gate**: `PreparingDisk` cannot be entered unless the
//!   destructive confirmation was recorded
//!
//! # Stage Flow
//!
//! ```text
//! NotStarted
//!     ↓
//! CollectingInput
//!     ↓
//! PlanningStorage
//!     ↓
//! AwaitingConfirmation
//!     ↓
//! PreparingDisk            ← first destructive stage
//!     ↓
//! InstallingBaseSystem
//!     ↓
//! GeneratingFstab
//!     ↓
//! ConfiguringSystem
//!     ↓
//! InstallingFeatures
//!     ↓
//! Completed
//!
//! (Any non-terminal stage can transition to Failed)
//! ```

use std::fmt;

use thiserror::Error;
use tracing::{debug, info};

use crate::hardware::{FirmwareMode, HardwareInfo, NetworkState};

/// Installation stages in sequential order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InstallStage {
    /// Installation has not started yet
    NotStarted = 0,

    /// Prompts or configuration file are being read and validated
    CollectingInput = 1,

    /// Disk is probed and the storage plan computed (read-only)
    PlanningStorage = 2,

    /// Waiting for the literal "yes"
    AwaitingConfirmation = 3,

    /// Partitioning, formatting, subvolumes, mounts.
    /// This is a DESTRUCTIVE stage - requires explicit confirmation
    PreparingDisk = 4,

    /// pacstrap of the resolved package set
    InstallingBaseSystem = 5,

    /// genfstab appended to the target fstab
    GeneratingFstab = 6,

    /// Configuration inside the chroot (locale, users, bootloader, initramfs)
    ConfiguringSystem = 7,

    /// Optional features inside the chroot
    InstallingFeatures = 8,

    /// Installation completed successfully (terminal state)
    Completed = 9,

    /// Installation failed (terminal state)
    Failed = 255,
}

/// What can be undone when a run fails in a given stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackAction {
    /// Nothing was changed on disk
    None,
    /// Unmount everything the run mounted, newest first
    UnmountTarget,
}

impl InstallStage {
    /// Returns the numeric order of this stage (0-9, 255 for Failed)
    #[inline]
    pub const fn order(self) -> u8 {
        self as u8
    }

    /// Returns true if this is a terminal state (Completed or Failed)
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true if entering this stage needs the destructive confirmation
    #[inline]
    pub const fn is_destructive(self) -> bool {
        matches!(self, Self::PreparingDisk)
    }

    /// Returns the next stage in the sequence, or None if at a terminal state
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::NotStarted => Some(Self::CollectingInput),
            Self::CollectingInput => Some(Self::PlanningStorage),
            Self::PlanningStorage => Some(Self::AwaitingConfirmation),
            Self::AwaitingConfirmation => Some(Self::PreparingDisk),
            Self::PreparingDisk => Some(Self::InstallingBaseSystem),
            Self::InstallingBaseSystem => Some(Self::GeneratingFstab),
            Self::GeneratingFstab => Some(Self::ConfiguringSystem),
            Self::ConfiguringSystem => Some(Self::InstallingFeatures),
            Self::InstallingFeatures => Some(Self::Completed),
            Self::Completed | Self::Failed => None,
        }
    }

    /// Returns a human-readable description of this stage
    pub const fn description(self) -> &'static str {
        match self {
            Self::NotStarted => "Not started",
            Self::CollectingInput => "Collecting input",
            Self::PlanningStorage => "Planning storage",
            Self::AwaitingConfirmation => "Awaiting confirmation",
            Self::PreparingDisk => "Preparing disk",
            Self::InstallingBaseSystem => "Installing base system",
            Self::GeneratingFstab => "Generating fstab",
            Self::ConfiguringSystem => "Configuring system",
            Self::InstallingFeatures => "Installing features",
            Self::Completed => "Installation complete",
            Self::Failed => "Installation failed",
        }
    }

    /// What rollback applies to a failure in this stage.
    pub const fn rollback(self) -> RollbackAction {
        match self {
            Self::NotStarted
            | Self::CollectingInput
            | Self::PlanningStorage
            | Self::AwaitingConfirmation
            | Self::Completed
            | Self::Failed => RollbackAction::None,
            Self::PreparingDisk
            | Self::InstallingBaseSystem
            | Self::GeneratingFstab
            | Self::ConfiguringSystem
            | Self::InstallingFeatures => RollbackAction::UnmountTarget,
        }
    }

    /// Advice for the operator after a failure in this stage.
    pub const fn resume_hint(self) -> &'static str {
        match self {
            Self::NotStarted | Self::CollectingInput => {
                "Nothing was changed. Fix the input and run the installer again."
            }
            Self::PlanningStorage => {
                "Nothing was changed. Check the disk layout (partition table, free space) or choose another mode."
            }
            Self::AwaitingConfirmation => "Nothing was changed. Run again and type 'yes' to proceed.",
            Self::PreparingDisk => {
                "The disk may be partially partitioned. Re-run with the 'entire disk' mode, or repartition manually."
            }
            Self::InstallingBaseSystem => {
                "Partitions are ready. Check network and mirrors, mount the target and re-run pacstrap, or start over."
            }
            Self::GeneratingFstab => {
                "The base system is installed. Mount the target and run 'genfstab -U /mnt >> /mnt/etc/fstab'."
            }
            Self::ConfiguringSystem => {
                "The base system and fstab are in place. Mount the target and finish configuration with arch-chroot."
            }
            Self::InstallingFeatures => {
                "The system is bootable. Boot into it and run 'archsetup post-install' to add the remaining features."
            }
            Self::Completed => "Installation finished.",
            Self::Failed => "Installation failed.",
        }
    }

    /// Returns all stages in order (excluding Failed)
    pub const fn all_stages() -> &'static [Self] {
        &[
            Self::NotStarted,
            Self::CollectingInput,
            Self::PlanningStorage,
            Self::AwaitingConfirmation,
            Self::PreparingDisk,
            Self::InstallingBaseSystem,
            Self::GeneratingFstab,
            Self::ConfiguringSystem,
            Self::InstallingFeatures,
            Self::Completed,
        ]
    }
}

impl fmt::Display for InstallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur during state transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstallTransitionError {
    /// Attempted to skip one or more stages
    #[error("Cannot skip from {from} to {to} (must transition through intermediate stages)")]
    SkippedStage {
        from: InstallStage,
        to: InstallStage,
    },

    /// Attempted to go backwards (not allowed)
    #[error("Cannot go backwards from {from} to {to} (installation is forward-only)")]
    BackwardTransition {
        from: InstallStage,
        to: InstallStage,
    },

    /// Attempted to transition from a terminal state
    #[error("Cannot transition from terminal state {from}")]
    FromTerminalState { from: InstallStage },

    /// Attempted a transition that requires confirmation without providing it
    #[error("Stage {stage} requires explicit confirmation (destructive operation)")]
    MissingConfirmation { stage: InstallStage },

    /// Attempted to transition to the same state
    #[error("Already at stage {stage}")]
    AlreadyAtStage { stage: InstallStage },
}

impl From<InstallTransitionError> for crate::error::InstallError {
    fn from(err: InstallTransitionError) -> Self {
        crate::error::InstallError::InstallTransition(err.to_string())
    }
}

/// Context for tracking installation state.
///
/// # Example
///
/// ```
/// use archsetup::install_state::{InstallerContext, InstallStage};
///
/// let mut ctx = InstallerContext::new();
/// assert_eq!(ctx.current_stage(), InstallStage::NotStarted);
///
/// ctx.advance().unwrap();
/// assert_eq!(ctx.current_stage(), InstallStage::CollectingInput);
///
/// // Cannot skip stages
/// assert!(ctx.transition_to(InstallStage::PreparingDisk).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct InstallerContext {
    current: InstallStage,
    failed_at: Option<InstallStage>,
    /// Completed transitions with unix timestamps
    stage_history: Vec<(InstallStage, u64)>,
    destructive_confirmed: bool,
    firmware_mode: FirmwareMode,
    network_state: NetworkState,
}

impl Default for InstallerContext {
    fn default() -> Self {
        Self::new()
    }
}

impl InstallerContext {
    /// Create a new installer context in the NotStarted state.
    ///
    /// Defaults to BIOS firmware and Offline network.
    pub fn new() -> Self {
        Self {
            current: InstallStage::NotStarted,
            failed_at: None,
            stage_history: Vec::with_capacity(InstallStage::all_stages().len()),
            destructive_confirmed: false,
            firmware_mode: FirmwareMode::Bios,
            network_state: NetworkState::Offline,
        }
    }

    /// Create a new installer context initialized with detected hardware info.
    pub fn with_hardware(hw: HardwareInfo) -> Self {
        Self {
            firmware_mode: hw.firmware,
            network_state: hw.network,
            ..Self::new()
        }
    }

    #[inline]
    pub fn firmware_mode(&self) -> FirmwareMode {
        self.firmware_mode
    }

    #[inline]
    pub fn network_state(&self) -> NetworkState {
        self.network_state
    }

    #[inline]
    pub fn current_stage(&self) -> InstallStage {
        self.current
    }

    /// Returns the stage at which failure occurred, if any
    #[inline]
    pub fn failed_at(&self) -> Option<InstallStage> {
        self.failed_at
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.current == InstallStage::Completed
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        self.current == InstallStage::Failed
    }

    pub fn stage_history(&self) -> &[(InstallStage, u64)] {
        &self.stage_history
    }

    /// Record that the operator typed "yes". One-way.
    pub fn confirm_destructive_operations(&mut self) {
        info!("Destructive operations confirmed");
        self.destructive_confirmed = true;
    }

    #[inline]
    pub fn is_destructive_confirmed(&self) -> bool {
        self.destructive_confirmed
    }

    /// Advance to the next stage in sequence.
    ///
    /// # Errors
    ///
    /// - `FromTerminalState` if already at Completed or Failed
    /// - `MissingConfirmation` if entering a destructive stage without confirmation
    pub fn advance(&mut self) -> Result<InstallStage, InstallTransitionError> {
        let next_stage = self
            .current
            .next()
            .ok_or(InstallTransitionError::FromTerminalState { from: self.current })?;

        if next_stage.is_destructive() && !self.destructive_confirmed {
            return Err(InstallTransitionError::MissingConfirmation { stage: next_stage });
        }

        self.record_stage_transition(next_stage);
        self.current = next_stage;
        Ok(next_stage)
    }

    /// Transition to a specific stage (must be the next stage in sequence).
    ///
    /// # Errors
    ///
    /// - `AlreadyAtStage` if target is the current stage
    /// - `BackwardTransition` if target is before current
    /// - `SkippedStage` if target is not the immediate next stage
    /// - `FromTerminalState` if current is a terminal state
    /// - `MissingConfirmation` if entering a destructive stage without confirmation
    pub fn transition_to(
        &mut self,
        target: InstallStage,
    ) -> Result<InstallStage, InstallTransitionError> {
        if self.current.is_terminal() {
            return Err(InstallTransitionError::FromTerminalState { from: self.current });
        }
        if target == self.current {
            return Err(InstallTransitionError::AlreadyAtStage { stage: target });
        }
        // Failed is reached through fail() only
        if target == InstallStage::Failed {
            return Err(InstallTransitionError::SkippedStage {
                from: self.current,
                to: target,
            });
        }
        if target.order() < self.current.order() {
            return Err(InstallTransitionError::BackwardTransition {
                from: self.current,
                to: target,
            });
        }
        if self.current.next() != Some(target) {
            return Err(InstallTransitionError::SkippedStage {
                from: self.current,
                to: target,
            });
        }
        if target.is_destructive() && !self.destructive_confirmed {
            return Err(InstallTransitionError::MissingConfirmation { stage: target });
        }

        self.record_stage_transition(target);
        self.current = target;
        Ok(target)
    }

    /// Mark the installation as failed, remembering the stage it failed in.
    ///
    /// # Errors
    ///
    /// - `FromTerminalState` if already at Completed or Failed
    pub fn fail(&mut self) -> Result<(), InstallTransitionError> {
        if self.current.is_terminal() {
            return Err(InstallTransitionError::FromTerminalState { from: self.current });
        }

        self.failed_at = Some(self.current);
        self.record_stage_transition(InstallStage::Failed);
        self.current = InstallStage::Failed;
        Ok(())
    }

    fn record_stage_transition(&mut self, stage: InstallStage) {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        debug!("Stage -> {}", stage);
        self.stage_history.push((stage, timestamp));
    }
}
