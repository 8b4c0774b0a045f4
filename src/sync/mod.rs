//! The A/V synchronization clock (C1): a master-clock abstraction that
//! normalizes per-stream presentation timestamps, tracks drift, survives
//! pause/seek, and drives per-frame display/drop/repeat decisions.

pub mod controller;

pub use controller::{AVSyncController, SyncMode, SyncParams, SyncQuality, SyncStats};
