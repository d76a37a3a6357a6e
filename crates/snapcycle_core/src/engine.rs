//! Snapshot rotation engine.
//!
//! A run has three phases, always in this order and always under the
//! destination lock:
//!
//! 1. **Setup** - create tier directories, find each tier's newest snapshot,
//!    and adopt an orphaned finest-tier snapshot left by an interrupted run.
//! 2. **Purge** - evict the oldest snapshots of each tier, leaving room for
//!    the snapshot this run creates.
//! 3. **Materialize** - sync the finest tier from the source, then clone
//!    every coarser tier from the finest tier's fresh snapshot.
//!
//! ## Key Invariants
//!
//! - Tiers are processed finest first
//! - The marker only advances after a successful finest-tier sync
//! - A tier never holds more snapshots than its retention count

use crate::config::Config;
use crate::error::{SnapError, SnapResult};
use crate::naming::{bucket_name, RunTimestamp};
use crate::state::{read_marker, write_marker, StateStore};
use crate::sync::{SyncInvoker, SyncRequest};
use crate::tier::Tier;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// A snapshot directory inside a tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Bucket name.
    pub name: String,
    /// Full path of the snapshot directory.
    pub path: PathBuf,
    /// Creation time, or inode change time where the platform has none.
    pub created: SystemTime,
}

/// Lists the snapshot directories of a tier, oldest first.
///
/// Only directories count. Equal timestamps are ordered by name. A missing
/// tier directory has no snapshots.
pub fn list_snapshots(tier_dir: &Path) -> SnapResult<Vec<Snapshot>> {
    let entries = match fs::read_dir(tier_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut snapshots = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            warn!(path = %entry.path().display(), "ignoring snapshot with non UTF-8 name");
            continue;
        };
        let created = creation_time(&entry.metadata()?)?;
        snapshots.push(Snapshot {
            name,
            path: entry.path(),
            created,
        });
    }

    snapshots.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.name.cmp(&b.name)));
    Ok(snapshots)
}

/// Birth time where the filesystem records it.
///
/// Otherwise the inode change time on Unix, which the sync tool cannot
/// backdate the way it does modification times.
fn creation_time(metadata: &fs::Metadata) -> std::io::Result<SystemTime> {
    if let Ok(created) = metadata.created() {
        return Ok(created);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        use std::time::{Duration, UNIX_EPOCH};

        let secs = u64::try_from(metadata.ctime()).unwrap_or(0);
        let nanos = u32::try_from(metadata.ctime_nsec()).unwrap_or(0);
        Ok(UNIX_EPOCH + Duration::new(secs, nanos))
    }
    #[cfg(not(unix))]
    {
        metadata.modified()
    }
}

/// An interrupted finest-tier snapshot adopted by this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovery {
    /// Name of the orphaned snapshot.
    pub orphan: String,
    /// Name it now carries (this run's finest bucket).
    pub adopted_as: String,
    /// Last confirmed snapshot, used as the link base.
    pub marker: String,
}

/// In-memory state of one run.
#[derive(Debug, Clone)]
pub struct RunContext {
    at: RunTimestamp,
    previous: BTreeMap<String, String>,
    recovery: Option<Recovery>,
}

impl RunContext {
    /// Timestamp shared by every tier in this run.
    #[must_use]
    pub fn at(&self) -> RunTimestamp {
        self.at
    }

    /// Newest snapshot of a tier when the run started, or `""` for none.
    #[must_use]
    pub fn previous(&self, tier: &str) -> &str {
        self.previous.get(tier).map_or("", String::as_str)
    }

    /// Orphan adopted during setup, if any.
    #[must_use]
    pub fn recovery(&self) -> Option<&Recovery> {
        self.recovery.as_ref()
    }
}

/// What materialization did for one tier.
#[derive(Debug)]
pub enum TierOutcome {
    /// First snapshot of the finest tier, copied in full.
    Full,
    /// Finest-tier snapshot hard-linked against an earlier one.
    Incremental {
        /// Snapshot used as link base.
        base: String,
    },
    /// Coarser-tier snapshot cloned from the finest tier.
    Cloned {
        /// Finest-tier snapshot it was cloned from.
        from: String,
    },
    /// The bucket already existed; nothing was done.
    Unchanged,
    /// Not attempted.
    Skipped {
        /// Why the tier was skipped.
        reason: String,
    },
    /// The sync failed; a partial directory may remain.
    Failed(SnapError),
}

impl TierOutcome {
    /// Returns true if a new snapshot was written.
    #[must_use]
    pub fn is_created(&self) -> bool {
        matches!(
            self,
            Self::Full | Self::Incremental { .. } | Self::Cloned { .. }
        )
    }
}

/// Per-tier result of a run.
#[derive(Debug)]
pub struct TierReport {
    /// Tier name.
    pub tier: String,
    /// This run's bucket name for the tier.
    pub snapshot: String,
    /// Snapshots evicted during purge, oldest first.
    pub purged: Vec<String>,
    /// Materialization result.
    pub outcome: TierOutcome,
}

/// Result of a complete run.
#[derive(Debug)]
pub struct RunReport {
    /// Timestamp shared by every tier.
    pub at: RunTimestamp,
    /// Orphan adopted during setup, if any.
    pub recovery: Option<Recovery>,
    /// One entry per active tier, finest first.
    pub tiers: Vec<TierReport>,
}

impl RunReport {
    /// Returns true if no tier failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.tiers.iter().any(|t| {
            matches!(
                t.outcome,
                TierOutcome::Failed(_) | TierOutcome::Skipped { .. }
            )
        })
    }

    /// Returns the report for a tier.
    #[must_use]
    pub fn tier(&self, name: &str) -> Option<&TierReport> {
        self.tiers.iter().find(|t| t.tier == name)
    }
}

/// Drives one rotation run over a destination.
///
/// The caller must hold the destination lock for the whole run.
pub struct Rotator<'a, S, M> {
    config: &'a Config,
    sync: S,
    store: M,
}

impl<'a, S: SyncInvoker, M: StateStore> Rotator<'a, S, M> {
    /// Creates a rotator.
    pub fn new(config: &'a Config, sync: S, store: M) -> Self {
        Self {
            config,
            sync,
            store,
        }
    }

    /// Runs setup, purge and materialization.
    ///
    /// # Errors
    ///
    /// Setup and purge errors abort the run. Sync failures do not; they
    /// are reported per tier in the returned [`RunReport`].
    pub fn run(&self, at: RunTimestamp) -> SnapResult<RunReport> {
        let ctx = self.setup(at)?;
        let mut purged = self.purge(&ctx)?;
        let outcomes = self.materialize(&ctx)?;

        let tiers = self
            .config
            .tiers()
            .iter()
            .zip(outcomes)
            .map(|(tier, outcome)| TierReport {
                tier: tier.name().to_string(),
                snapshot: bucket_name(tier, at),
                purged: purged.remove(tier.name()).unwrap_or_default(),
                outcome,
            })
            .collect();

        Ok(RunReport {
            at,
            recovery: ctx.recovery,
            tiers,
        })
    }

    /// Phase 1: prepares tier directories and recovers an interrupted run.
    pub fn setup(&self, at: RunTimestamp) -> SnapResult<RunContext> {
        let mut previous = BTreeMap::new();
        for tier in self.config.tiers() {
            let dir = self.config.tier_dir(tier);
            ensure_tier_dir(&dir)?;

            let newest = list_snapshots(&dir)?
                .pop()
                .map(|s| s.name)
                .unwrap_or_default();
            debug!(tier = %tier, previous = %newest, "found previous snapshot");
            previous.insert(tier.name().to_string(), newest);
        }

        let mut ctx = RunContext {
            at,
            previous,
            recovery: None,
        };
        if let Some(finest) = self.config.tiers().first() {
            self.recover(finest, &mut ctx)?;
        }
        Ok(ctx)
    }

    /// Adopts the newest finest-tier snapshot if it is newer than the marker.
    ///
    /// The orphan is renamed to this run's bucket so the coming sync
    /// completes it, and the marker snapshot becomes the link base.
    fn recover(&self, finest: &Tier, ctx: &mut RunContext) -> SnapResult<()> {
        let Some(marker) = read_marker(&self.store)? else {
            return Ok(());
        };
        let orphan = ctx.previous(finest.name()).to_string();
        if orphan.is_empty() || orphan == marker {
            return Ok(());
        }

        let dir = self.config.tier_dir(finest);
        if !dir.join(&marker).is_dir() {
            return Ok(());
        }

        let current = bucket_name(finest, ctx.at);
        if orphan != current {
            let target = dir.join(&current);
            if target.exists() {
                warn!(
                    tier = %finest,
                    orphan = %orphan,
                    current = %current,
                    "cannot adopt interrupted snapshot, bucket already exists"
                );
                return Ok(());
            }
            fs::rename(dir.join(&orphan), &target)?;
        }
        info!(
            tier = %finest,
            orphan = %orphan,
            adopted_as = %current,
            marker = %marker,
            "recovered interrupted snapshot"
        );

        ctx.previous
            .insert(finest.name().to_string(), marker.clone());
        ctx.recovery = Some(Recovery {
            orphan,
            adopted_as: current,
            marker,
        });
        Ok(())
    }

    /// Phase 2: evicts the oldest snapshots of each tier.
    ///
    /// Each tier is trimmed to one below its retention count, leaving a slot
    /// for this run's snapshot. When this run's bucket already exists no
    /// slot is needed, and that bucket is never evicted.
    ///
    /// Returns the evicted snapshot names per tier.
    pub fn purge(&self, ctx: &RunContext) -> SnapResult<BTreeMap<String, Vec<String>>> {
        let mut purged = BTreeMap::new();
        for tier in self.config.tiers() {
            let current = bucket_name(tier, ctx.at);
            let mut snapshots = list_snapshots(&self.config.tier_dir(tier))?;

            let retention = tier.retention() as usize;
            let limit = if snapshots.iter().any(|s| s.name == current) {
                retention
            } else {
                retention.saturating_sub(1)
            };

            let mut evicted = Vec::new();
            while snapshots.len() > limit {
                let Some(index) = snapshots.iter().position(|s| s.name != current) else {
                    break;
                };
                let victim = snapshots.remove(index);
                info!(tier = %tier, snapshot = %victim.name, "purging snapshot");
                remove_snapshot(&victim.path)?;
                evicted.push(victim.name);
            }
            purged.insert(tier.name().to_string(), evicted);
        }
        Ok(purged)
    }

    /// Phase 3: creates this run's snapshot in every tier, finest first.
    ///
    /// Returns one outcome per active tier.
    ///
    /// # Errors
    ///
    /// Only failures to create a snapshot directory or persist the marker
    /// are returned as errors.
    pub fn materialize(&self, ctx: &RunContext) -> SnapResult<Vec<TierOutcome>> {
        let tiers = self.config.tiers();
        let Some(finest) = tiers.first() else {
            return Ok(Vec::new());
        };

        let finest_dir = self.config.tier_dir(finest);
        let finest_current = bucket_name(finest, ctx.at);
        let finest_path = finest_dir.join(&finest_current);

        let mut outcomes = Vec::with_capacity(tiers.len());
        let finest_outcome = self.materialize_finest(finest, ctx, &finest_current)?;
        let finest_ok = !matches!(finest_outcome, TierOutcome::Failed(_));
        outcomes.push(finest_outcome);

        for tier in &tiers[1..] {
            let current = bucket_name(tier, ctx.at);
            let outcome = if ctx.previous(tier.name()) == current {
                TierOutcome::Unchanged
            } else if !finest_ok {
                TierOutcome::Skipped {
                    reason: format!("{} sync failed", finest.name()),
                }
            } else if !finest_path.is_dir() {
                TierOutcome::Skipped {
                    reason: format!("{}/{} is missing", finest.name(), finest_current),
                }
            } else {
                let request = SyncRequest {
                    tier: tier.name().to_string(),
                    source: finest_path.clone(),
                    target: self.config.tier_dir(tier).join(&current),
                    link_base: Some(finest_path.clone()),
                    extra_flags: self.config.sync_flags().to_vec(),
                };
                match self.run_sync(&request)? {
                    None => TierOutcome::Cloned {
                        from: finest_current.clone(),
                    },
                    Some(err) => {
                        // A partial clone would pass for this period's snapshot.
                        if let Err(cleanup) = remove_snapshot(&request.target) {
                            warn!(tier = %tier, error = %cleanup, "could not remove failed clone");
                        }
                        TierOutcome::Failed(err)
                    }
                }
            };
            log_outcome(tier, &current, &outcome);
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    fn materialize_finest(
        &self,
        finest: &Tier,
        ctx: &RunContext,
        current: &str,
    ) -> SnapResult<TierOutcome> {
        let dir = self.config.tier_dir(finest);
        let previous = ctx.previous(finest.name());

        let link_base = if previous == current {
            if read_marker(&self.store)?.as_deref() == Some(current) {
                log_outcome(finest, current, &TierOutcome::Unchanged);
                return Ok(TierOutcome::Unchanged);
            }
            warn!(
                tier = %finest,
                snapshot = current,
                "current snapshot was never confirmed, syncing it again"
            );
            None
        } else {
            (!previous.is_empty()).then(|| dir.join(previous))
        };
        let request = SyncRequest {
            tier: finest.name().to_string(),
            source: self.config.source().to_path_buf(),
            target: dir.join(current),
            link_base,
            extra_flags: self.config.sync_flags().to_vec(),
        };

        let outcome = match self.run_sync(&request)? {
            Some(err) => TierOutcome::Failed(err),
            None => {
                write_marker(&self.store, current)?;
                if request.link_base.is_none() {
                    TierOutcome::Full
                } else {
                    TierOutcome::Incremental {
                        base: previous.to_string(),
                    }
                }
            }
        };
        log_outcome(finest, current, &outcome);
        Ok(outcome)
    }

    /// Creates the target directory and runs the sync.
    ///
    /// Returns `Some(err)` for a sync failure; other errors propagate.
    fn run_sync(&self, request: &SyncRequest) -> SnapResult<Option<SnapError>> {
        fs::create_dir_all(&request.target)?;
        match self.sync.sync(request) {
            Ok(()) => Ok(None),
            Err(err) if !err.is_fatal() => Ok(Some(err)),
            Err(err) => Err(err),
        }
    }
}

fn ensure_tier_dir(dir: &Path) -> SnapResult<()> {
    match fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(SnapError::TierPathConflict {
            path: dir.to_path_buf(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %dir.display(), "creating tier directory");
            fs::create_dir(dir)?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Removes a snapshot directory and everything in it.
///
/// Read-only directories left by the sync tool are made writable first.
fn remove_snapshot(path: &Path) -> SnapResult<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            make_writable(path).map_err(|err| SnapError::purge(path, err))?;
            fs::remove_dir_all(path).map_err(|err| SnapError::purge(path, err))
        }
        Err(e) => Err(SnapError::purge(path, e)),
    }
}

fn make_writable(path: &Path) -> std::io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if !meta.is_dir() {
        return Ok(());
    }
    allow_owner_write(path, &meta)?;
    for entry in fs::read_dir(path)? {
        make_writable(&entry?.path())?;
    }
    Ok(())
}

/// Grants the owner full access, leaving group and other bits alone.
#[cfg(unix)]
fn allow_owner_write(path: &Path, meta: &fs::Metadata) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = meta.permissions().mode() & 0o7777;
    if mode & 0o700 != 0o700 {
        fs::set_permissions(path, fs::Permissions::from_mode(mode | 0o700))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn allow_owner_write(path: &Path, meta: &fs::Metadata) -> std::io::Result<()> {
    let mut perms = meta.permissions();
    if perms.readonly() {
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(false);
        fs::set_permissions(path, perms)?;
    }
    Ok(())
}

fn log_outcome(tier: &Tier, snapshot: &str, outcome: &TierOutcome) {
    match outcome {
        TierOutcome::Full => info!(tier = %tier, snapshot, "created full snapshot"),
        TierOutcome::Incremental { base } => {
            info!(tier = %tier, snapshot, base = %base, "created incremental snapshot");
        }
        TierOutcome::Cloned { from } => {
            info!(tier = %tier, snapshot, from = %from, "cloned snapshot");
        }
        TierOutcome::Unchanged => debug!(tier = %tier, snapshot, "bucket unchanged"),
        TierOutcome::Skipped { reason } => {
            warn!(tier = %tier, snapshot, reason = %reason, "skipped snapshot");
        }
        TierOutcome::Failed(err) => warn!(tier = %tier, snapshot, error = %err, "snapshot failed"),
    }
}
