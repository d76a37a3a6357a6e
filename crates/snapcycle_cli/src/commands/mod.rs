//! CLI command implementations.

pub mod run;
pub mod status;

use snapcycle_core::SnapError;
use thiserror::Error;

/// Errors reported by the CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// The rotation engine failed.
    #[error(transparent)]
    Snap(#[from] SnapError),

    /// Some tiers did not get their snapshot.
    #[error("{failed} of {total} tiers failed")]
    TiersFailed {
        /// Tiers that failed or were skipped.
        failed: usize,
        /// Active tiers.
        total: usize,
    },

    /// Unknown output format.
    #[error("unknown format {0:?}, expected text or json")]
    UnknownFormat(String),

    /// JSON encoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parses `TIER=COUNT`.
pub fn parse_interval(value: &str) -> Result<(String, u32), String> {
    let (tier, count) = value
        .split_once('=')
        .ok_or_else(|| format!("expected TIER=COUNT, got {value:?}"))?;
    let tier = tier.trim();
    if tier.is_empty() {
        return Err(format!("missing tier name in {value:?}"));
    }
    let count = count
        .trim()
        .parse::<u32>()
        .map_err(|e| format!("invalid count in {value:?}: {e}"))?;
    Ok((tier.to_string(), count))
}
