//! # snapcycle
//!
//! Tiered, hard-linked snapshots of a directory tree.
//!
//! This crate provides:
//! - Settings validation ([`Settings`] into [`Config`])
//! - Retention tiers ordered finest to coarsest
//! - Bucket naming from a single per-run timestamp
//! - A persisted marker of the last good finest-tier snapshot
//! - A destination-scoped run lock
//! - The rotation engine: setup and crash recovery, purge, materialization
//!
//! ## Layout
//!
//! ```text
//! <destination>/
//! ├─ .snapcycle.json      # marker and other state
//! ├─ hourly/2024-03-11.14/
//! ├─ daily/2024-03-11/
//! ├─ weekly/2024-03-week-01/
//! ├─ monthly/2024-03/
//! └─ yearly/2024/
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use snapcycle_core::{trigger, Settings};
//!
//! let settings = Settings::new("/home", "/backup")
//!     .with_intervals([("hourly", 24), ("daily", 7)]);
//! let report = trigger(settings)?;
//! assert!(report.is_success());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod lock;
mod naming;
mod state;
mod status;
mod sync;
mod tier;

pub use config::{Config, Settings, SyncFlags, DEFAULT_SYNC_PROGRAM};
pub use engine::{
    list_snapshots, Recovery, Rotator, RunContext, RunReport, Snapshot, TierOutcome, TierReport,
};
pub use error::{SnapError, SnapResult};
pub use lock::{lock_file_name, DestinationLock};
pub use naming::{bucket_name, week_of_month, RunTimestamp};
pub use state::{
    read_marker, write_marker, JsonFileStore, MemoryStore, StateStore, MARKER_KEY, STATE_FILE,
};
pub use status::{status, Status, TierStatus};
pub use sync::{relative_link_base, RsyncInvoker, SyncInvoker, SyncRequest};
pub use tier::{active_tiers, default_intervals, Granularity, Tier};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How to acquire the destination lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    /// Wait for as long as another run holds the lock.
    #[default]
    Wait,
    /// Fail with [`SnapError::Locked`] if the lock is held.
    NoWait,
}

impl LockMode {
    fn acquire(self, config: &Config) -> SnapResult<DestinationLock> {
        match self {
            Self::Wait => DestinationLock::acquire(config.lock_dir(), config.destination()),
            Self::NoWait => DestinationLock::try_acquire(config.lock_dir(), config.destination()),
        }
    }
}

/// Validates settings and rotates snapshots.
///
/// # Errors
///
/// Returns `MissingSetting` or `MissingFolder` before touching the
/// destination. Sync failures are reported in the [`RunReport`].
pub fn trigger(settings: Settings) -> SnapResult<RunReport> {
    let config = Config::from_settings(settings)?;
    trigger_config(&config, LockMode::Wait)
}

/// Rotates snapshots for an already validated configuration.
///
/// Uses the configured sync program and the destination's state file.
/// The run timestamp is captured once the lock is held.
pub fn trigger_config(config: &Config, mode: LockMode) -> SnapResult<RunReport> {
    let _lock = mode.acquire(config)?;
    let at = RunTimestamp::capture();
    let sync = RsyncInvoker::new(config.sync_program());
    let store = JsonFileStore::for_destination(config.destination());
    Rotator::new(config, sync, store).run(at)
}

/// Rotates snapshots with injected collaborators and timestamp.
pub fn trigger_with<S: SyncInvoker, M: StateStore>(
    config: &Config,
    mode: LockMode,
    sync: S,
    store: M,
    at: RunTimestamp,
) -> SnapResult<RunReport> {
    let _lock = mode.acquire(config)?;
    Rotator::new(config, sync, store).run(at)
}
