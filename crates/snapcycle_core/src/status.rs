//! Read-only view of a destination.

use crate::config::Config;
use crate::engine::list_snapshots;
use crate::error::SnapResult;
use crate::state::{read_marker, StateStore};
use serde::Serialize;
use std::path::PathBuf;

/// Snapshots held by one tier.
#[derive(Debug, Clone, Serialize)]
pub struct TierStatus {
    /// Tier name.
    pub tier: String,
    /// Retention count.
    pub retention: u32,
    /// Snapshot names, oldest first.
    pub snapshots: Vec<String>,
}

/// Snapshots and marker of a destination.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    /// Destination root.
    pub destination: PathBuf,
    /// Last confirmed finest-tier snapshot.
    pub marker: Option<String>,
    /// Active tiers, finest first.
    pub tiers: Vec<TierStatus>,
}

/// Collects the status of a destination without modifying it.
pub fn status(config: &Config, store: &dyn StateStore) -> SnapResult<Status> {
    let tiers = config
        .tiers()
        .iter()
        .map(|tier| {
            let snapshots = list_snapshots(&config.tier_dir(tier))?
                .into_iter()
                .map(|s| s.name)
                .collect();
            Ok(TierStatus {
                tier: tier.name().to_string(),
                retention: tier.retention(),
                snapshots,
            })
        })
        .collect::<SnapResult<Vec<_>>>()?;

    Ok(Status {
        destination: config.destination().to_path_buf(),
        marker: read_marker(store)?,
        tiers,
    })
}
