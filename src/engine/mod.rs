//! Engine modules: probe the disk, plan the storage layout, apply the plan.
//!
//! `probe` reads, `storage` decides, `apply` acts. Only `apply` has side
//! effects, and only through an `Executor`.

pub mod apply;
pub mod probe;
pub mod storage;
