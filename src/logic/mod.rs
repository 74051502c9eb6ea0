//! Logic modules: translate high-level choices into concrete actions.
//!
//! The logic layer resolves abstract selections (e.g., "KDE", "Nvidia") into
//! package names and service lists, and applies the steps that surround the
//! base installation.
//!
//! # Modules
//!
//! - `resolver`: package and service name resolution
//! - `preinstall`: mirror ranking before pacstrap
//! - `postinstall`: the Feature Installer, on a live system or in a chroot

pub mod postinstall;
pub mod preinstall;
pub mod resolver;
