//! Track releases of a user's starred GitHub repositories.
//!
//! `sync` drives a run: it lists stars through the `github` client, records
//! them in the `db` store, looks up latest releases in parallel batches, and
//! diffs them against the last known tags. `report` renders what was found.

pub mod config;
pub mod db;
pub mod github;
pub mod model;
pub mod report;
pub mod sync;
