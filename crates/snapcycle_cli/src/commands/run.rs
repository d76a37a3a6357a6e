//! Run command implementation.

use super::CliError;
use snapcycle_core::{trigger_config, Config, LockMode, RunReport, Settings, TierOutcome};
use tracing::info;

/// Validates settings and takes this run's snapshots.
pub fn run(settings: Settings, no_wait: bool) -> Result<(), CliError> {
    let config = Config::from_settings(settings)?;
    let mode = if no_wait {
        LockMode::NoWait
    } else {
        LockMode::Wait
    };

    info!(
        source = %config.source().display(),
        destination = %config.destination().display(),
        "starting rotation"
    );
    let report = trigger_config(&config, mode)?;
    print_report(&report);

    let failed = report
        .tiers
        .iter()
        .filter(|t| {
            matches!(
                t.outcome,
                TierOutcome::Failed(_) | TierOutcome::Skipped { .. }
            )
        })
        .count();
    if failed > 0 {
        return Err(CliError::TiersFailed {
            failed,
            total: report.tiers.len(),
        });
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("Snapshot run at {}", report.at);
    if let Some(recovery) = &report.recovery {
        println!(
            "  recovered interrupted snapshot {} as {} (last good: {})",
            recovery.orphan, recovery.adopted_as, recovery.marker
        );
    }
    for tier in &report.tiers {
        println!(
            "  {:<8} {:<16} {}",
            tier.tier,
            tier.snapshot,
            describe(&tier.outcome)
        );
        for purged in &tier.purged {
            println!("  {:<8} {:<16} purged", tier.tier, purged);
        }
    }
}

fn describe(outcome: &TierOutcome) -> String {
    match outcome {
        TierOutcome::Full => "✓ full copy".to_string(),
        TierOutcome::Incremental { base } => format!("✓ linked against {base}"),
        TierOutcome::Cloned { from } => format!("✓ cloned from {from}"),
        TierOutcome::Unchanged => "unchanged".to_string(),
        TierOutcome::Skipped { reason } => format!("✗ skipped: {reason}"),
        TierOutcome::Failed(err) => format!("✗ failed: {err}"),
    }
}
