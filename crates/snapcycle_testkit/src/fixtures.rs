//! Temporary directory fixtures.
//!
//! A [`Fixture`] owns one temporary directory holding a source tree, an
//! empty destination and a private lock directory, so tests never share
//! lock files with each other or with real runs.

use chrono::NaiveDate;
use snapcycle_core::{Config, RunTimestamp, Settings};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Source and destination directories with automatic cleanup.
pub struct Fixture {
    source: PathBuf,
    destination: PathBuf,
    lock_dir: PathBuf,
    _temp_dir: TempDir,
}

impl Fixture {
    /// Creates an empty source and destination.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source = temp_dir.path().join("source");
        let destination = temp_dir.path().join("destination");
        let lock_dir = temp_dir.path().join("locks");
        for dir in [&source, &destination, &lock_dir] {
            fs::create_dir(dir).expect("Failed to create fixture directory");
        }
        Self {
            source,
            destination,
            lock_dir,
            _temp_dir: temp_dir,
        }
    }

    /// Source tree root.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Destination root.
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Directory of a tier under the destination.
    pub fn tier_dir(&self, tier: &str) -> PathBuf {
        self.destination.join(tier)
    }

    /// Writes a file into the source tree, creating parent directories.
    pub fn write(&self, relative: &str, contents: impl AsRef<[u8]>) {
        let path = self.source.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create source subdirectory");
        }
        fs::write(&path, contents).expect("Failed to write source file");
    }

    /// Removes a file from the source tree.
    pub fn remove(&self, relative: &str) {
        fs::remove_file(self.source.join(relative)).expect("Failed to remove source file");
    }

    /// Settings pointing at this fixture, with a private lock directory.
    pub fn settings(&self) -> Settings {
        Settings::new(&self.source, &self.destination).with_lock_dir(&self.lock_dir)
    }

    /// Validated configuration with the given retention counts.
    pub fn config(&self, intervals: &[(&str, u32)]) -> Config {
        let settings = self
            .settings()
            .with_intervals(intervals.iter().map(|&(tier, count)| (tier, count)));
        Config::from_settings(settings).expect("Fixture settings must validate")
    }

    /// Snapshot names of a tier, sorted by name.
    pub fn snapshots(&self, tier: &str) -> Vec<String> {
        entry_names(&self.tier_dir(tier))
    }

    /// Entries directly under the destination, sorted by name.
    pub fn destination_entries(&self) -> Vec<String> {
        entry_names(&self.destination)
    }

    /// Creates empty snapshot directories in a tier, in the order given.
    pub fn seed_snapshots(&self, tier: &str, names: &[&str]) {
        let dir = self.tier_dir(tier);
        fs::create_dir_all(&dir).expect("Failed to create tier directory");
        for name in names {
            fs::create_dir(dir.join(name)).expect("Failed to create snapshot directory");
        }
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a run timestamp at minute 30 of the given hour.
pub fn timestamp(year: i32, month: u32, day: u32, hour: u32) -> RunTimestamp {
    let when = NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, 30, 0))
        .expect("Invalid fixture timestamp");
    RunTimestamp::at(when)
}

/// Reads every regular file under `root`, keyed by relative path.
pub fn read_tree(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut files = BTreeMap::new();
    collect(root, root, &mut files);
    files
}

fn collect(root: &Path, dir: &Path, files: &mut BTreeMap<PathBuf, Vec<u8>>) {
    for entry in fs::read_dir(dir).expect("Failed to read directory") {
        let path = entry.expect("Failed to read directory entry").path();
        if path.is_dir() {
            collect(root, &path, files);
        } else {
            let relative = path
                .strip_prefix(root)
                .expect("Entry outside root")
                .to_path_buf();
            files.insert(relative, fs::read(&path).expect("Failed to read file"));
        }
    }
}

fn entry_names(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .map(|e| {
            e.expect("Failed to read directory entry")
                .file_name()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    names.sort();
    names
}
