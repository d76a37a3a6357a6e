//! Status command implementation.

use super::CliError;
use snapcycle_core::{status, Config, JsonFileStore, Settings, Status};

/// Prints the tiers, snapshots and marker of a destination.
pub fn run(settings: Settings, format: &str) -> Result<(), CliError> {
    let config = Config::from_settings(settings)?;
    let store = JsonFileStore::for_destination(config.destination());
    let status = status(&config, &store)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&status)?),
        "text" => print!("{}", render_text(&status)),
        other => return Err(CliError::UnknownFormat(other.to_string())),
    }
    Ok(())
}

fn render_text(status: &Status) -> String {
    let mut out = format!("Destination: {}\n", status.destination.display());
    out.push_str(&format!(
        "Last confirmed: {}\n",
        status.marker.as_deref().unwrap_or("(none)")
    ));
    for tier in &status.tiers {
        out.push_str(&format!(
            "{} ({}/{})\n",
            tier.tier,
            tier.snapshots.len(),
            tier.retention
        ));
        for name in &tier.snapshots {
            out.push_str(&format!("  {name}\n"));
        }
    }
    out
}
