//! Reconciliation of the local project tree with the media service

mod engine;
mod report;

pub use engine::SyncEngine;
pub use report::{DriftEntry, DriftReport, SyncEntry, SyncReport, UnknownRemote};
