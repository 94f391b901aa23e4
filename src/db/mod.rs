//! Database module: entity models and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: typed rows returned by repositories.
//! - `repo`: SQL-only functions over the `repos`, `releases` and `sync_log`
//!   relations.
//!
//! Callers use the repository API re-exported at `astrolabe::db`. During a
//! sync every mutation is issued from the single sequential writer in `sync`,
//! so no function here needs more than per-statement atomicity.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{NewReleaseRow, ReleaseEvent, ReleaseWithRepo, SyncRun, TrackedRepo};
