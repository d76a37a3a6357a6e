//! Run configuration.
//!
//! [`Settings`] is the raw mapping a caller supplies, either built in code
//! or loaded from a JSON file. [`Config::from_settings`] validates it into
//! an immutable [`Config`] before anything on disk is touched.

use crate::error::{SnapError, SnapResult};
use crate::tier::{self, Tier};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Default sync tool.
pub const DEFAULT_SYNC_PROGRAM: &str = "rsync";

/// Sync tool flags, given either as one string or as a list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SyncFlags {
    /// Whitespace-separated flags.
    Line(String),
    /// One flag per element.
    List(Vec<String>),
}

impl SyncFlags {
    /// Flattens into individual arguments.
    #[must_use]
    pub fn into_args(self) -> Vec<String> {
        match self {
            Self::Line(line) => line.split_whitespace().map(str::to_string).collect(),
            Self::List(list) => list,
        }
    }
}

/// Unvalidated settings for a rotation run.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Directory tree to snapshot.
    pub source: Option<PathBuf>,
    /// Root directory holding one folder per tier.
    pub destination: Option<PathBuf>,
    /// Extra flags passed verbatim to the sync tool.
    #[serde(alias = "rsync_flags")]
    pub sync_flags: Option<SyncFlags>,
    /// Retention count per tier name.
    #[serde(deserialize_with = "retention_counts")]
    pub intervals: Option<BTreeMap<String, u32>>,
    /// Deprecated alias of `intervals`.
    #[serde(deserialize_with = "retention_counts")]
    pub reserves: Option<BTreeMap<String, u32>>,
    /// Sync tool executable.
    pub sync_program: Option<String>,
    /// Directory for lock files.
    pub lock_dir: Option<PathBuf>,
}

impl Settings {
    /// Creates settings with the two required paths.
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: Some(source.into()),
            destination: Some(destination.into()),
            ..Self::default()
        }
    }

    /// Sets the retention counts.
    #[must_use]
    pub fn with_intervals<I, K>(mut self, intervals: I) -> Self
    where
        I: IntoIterator<Item = (K, u32)>,
        K: Into<String>,
    {
        self.intervals = Some(intervals.into_iter().map(|(k, v)| (k.into(), v)).collect());
        self
    }

    /// Sets the extra sync flags.
    #[must_use]
    pub fn with_sync_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sync_flags = Some(SyncFlags::List(flags.into_iter().map(Into::into).collect()));
        self
    }

    /// Sets the sync tool executable.
    #[must_use]
    pub fn with_sync_program(mut self, program: impl Into<String>) -> Self {
        self.sync_program = Some(program.into());
        self
    }

    /// Sets the lock file directory.
    #[must_use]
    pub fn with_lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = Some(dir.into());
        self
    }

    /// Loads settings from a JSON file.
    pub fn from_json_file(path: &Path) -> SnapResult<Self> {
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data)
            .map_err(|e| SnapError::invalid_setting("settings", format!("{}: {e}", path.display())))
    }
}

/// Reads retention counts, treating zero or negative counts as disabled.
fn retention_counts<'de, D>(deserializer: D) -> Result<Option<BTreeMap<String, u32>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, i64>>::deserialize(deserializer)?;
    Ok(raw.map(|counts| {
        counts
            .into_iter()
            .map(|(name, count)| (name, u32::try_from(count.max(0)).unwrap_or(u32::MAX)))
            .collect()
    }))
}

/// Validated, immutable configuration for a rotation run.
#[derive(Debug, Clone)]
pub struct Config {
    source: PathBuf,
    destination: PathBuf,
    sync_flags: Vec<String>,
    sync_program: String,
    lock_dir: PathBuf,
    intervals: BTreeMap<String, u32>,
    tiers: Vec<Tier>,
}

impl Config {
    /// Validates settings.
    ///
    /// # Errors
    ///
    /// - `MissingSetting` if `source` or `destination` is absent
    /// - `MissingFolder` if either is not an existing directory
    /// - `InvalidSetting` if a tier name cannot be used as a directory name
    pub fn from_settings(settings: Settings) -> SnapResult<Self> {
        let source = settings
            .source
            .ok_or(SnapError::MissingSetting { name: "source" })?;
        let destination = settings
            .destination
            .ok_or(SnapError::MissingSetting {
                name: "destination",
            })?;

        if !source.is_dir() {
            return Err(SnapError::missing_folder(source));
        }
        if !destination.is_dir() {
            return Err(SnapError::missing_folder(destination));
        }

        let intervals = match (settings.intervals, settings.reserves) {
            (Some(intervals), _) => intervals,
            (None, Some(reserves)) => {
                warn!("the `reserves` setting is deprecated, use `intervals` instead");
                reserves
            }
            (None, None) => tier::default_intervals(),
        };
        for name in intervals.keys() {
            validate_tier_name(name)?;
        }
        let tiers = tier::active_tiers(&intervals);

        Ok(Self {
            source,
            destination,
            sync_flags: settings
                .sync_flags
                .map(SyncFlags::into_args)
                .unwrap_or_default(),
            sync_program: settings
                .sync_program
                .unwrap_or_else(|| DEFAULT_SYNC_PROGRAM.to_string()),
            lock_dir: settings.lock_dir.unwrap_or_else(std::env::temp_dir),
            intervals,
            tiers,
        })
    }

    /// Directory tree being snapshotted.
    #[must_use]
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Destination root.
    #[must_use]
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Directory of a tier under the destination.
    #[must_use]
    pub fn tier_dir(&self, tier: &Tier) -> PathBuf {
        self.destination.join(tier.name())
    }

    /// Extra sync flags, in the order given.
    #[must_use]
    pub fn sync_flags(&self) -> &[String] {
        &self.sync_flags
    }

    /// Sync tool executable.
    #[must_use]
    pub fn sync_program(&self) -> &str {
        &self.sync_program
    }

    /// Directory holding lock files.
    #[must_use]
    pub fn lock_dir(&self) -> &Path {
        &self.lock_dir
    }

    /// Retention counts as configured, including disabled tiers.
    #[must_use]
    pub fn intervals(&self) -> &BTreeMap<String, u32> {
        &self.intervals
    }

    /// Active tiers, finest first.
    #[must_use]
    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }
}

fn validate_tier_name(name: &str) -> SnapResult<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(SnapError::invalid_setting(
            "intervals",
            format!("unusable tier name {name:?}"),
        ));
    }
    if name.contains(['/', '\\']) {
        return Err(SnapError::invalid_setting(
            "intervals",
            format!("tier name {name:?} contains a path separator"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::io;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn missing_required_settings() {
        let err = Config::from_settings(Settings::default()).unwrap_err();
        assert!(matches!(err, SnapError::MissingSetting { name: "source" }));

        let settings = Settings {
            source: Some("/tmp".into()),
            ..Settings::default()
        };
        let err = Config::from_settings(settings).unwrap_err();
        assert!(matches!(
            err,
            SnapError::MissingSetting {
                name: "destination"
            }
        ));
    }

    #[test]
    fn missing_folders() {
        let temp = tempdir().unwrap();
        let present = temp.path().to_path_buf();
        let missing = temp.path().join("missing");

        let err = Config::from_settings(Settings::new(&missing, &present)).unwrap_err();
        assert!(matches!(err, SnapError::MissingFolder { ref path } if *path == missing));

        let err = Config::from_settings(Settings::new(&present, &missing)).unwrap_err();
        assert!(matches!(err, SnapError::MissingFolder { ref path } if *path == missing));

        let file = temp.path().join("file");
        std::fs::write(&file, b"x").unwrap();
        let err = Config::from_settings(Settings::new(&present, &file)).unwrap_err();
        assert!(matches!(err, SnapError::MissingFolder { .. }));
    }

    #[test]
    fn validation_happens_before_any_mutation() {
        let temp = tempdir().unwrap();
        let missing = temp.path().join("missing");
        let _ = Config::from_settings(Settings::new(temp.path(), &missing));
        assert!(!missing.exists());
    }

    #[test]
    fn defaults_apply() {
        let temp = tempdir().unwrap();
        let config = Config::from_settings(Settings::new(temp.path(), temp.path())).unwrap();

        assert_eq!(config.sync_program(), "rsync");
        assert!(config.sync_flags().is_empty());
        assert_eq!(config.tiers().len(), 5);
        assert_eq!(config.intervals(), &tier::default_intervals());
        assert_eq!(config.lock_dir(), std::env::temp_dir());
    }

    #[test]
    fn intervals_win_over_reserves() {
        let temp = tempdir().unwrap();
        let mut settings = Settings::new(temp.path(), temp.path()).with_intervals([("daily", 3)]);
        settings.reserves = Some([("hourly".to_string(), 2)].into_iter().collect());

        let config = Config::from_settings(settings).unwrap();
        let names: Vec<&str> = config.tiers().iter().map(Tier::name).collect();
        assert_eq!(names, vec!["daily"]);
    }

    #[test]
    fn reserves_alone_are_used() {
        let temp = tempdir().unwrap();
        let mut settings = Settings::new(temp.path(), temp.path());
        settings.reserves = Some([("weekly".to_string(), 2)].into_iter().collect());

        let config = Config::from_settings(settings).unwrap();
        assert_eq!(config.tiers().len(), 1);
        assert_eq!(config.tiers()[0].name(), "weekly");
    }

    #[test]
    fn rejects_path_like_tier_names() {
        let temp = tempdir().unwrap();
        for bad in ["", "..", "a/b"] {
            let settings = Settings::new(temp.path(), temp.path()).with_intervals([(bad, 1)]);
            let err = Config::from_settings(settings).unwrap_err();
            assert!(matches!(err, SnapError::InvalidSetting { .. }), "{bad:?}");
        }
    }

    #[test]
    fn parses_json_settings() {
        let json = r#"{
            "source": "/src",
            "destination": "/dst",
            "rsync_flags": "-L --exclude=.cache",
            "intervals": { "hourly": 24, "daily": 0 }
        }"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.source, Some(PathBuf::from("/src")));
        assert_eq!(
            settings.sync_flags.clone().map(SyncFlags::into_args),
            Some(vec!["-L".to_string(), "--exclude=.cache".to_string()])
        );
        assert_eq!(settings.intervals.unwrap().get("daily"), Some(&0));

        let json = r#"{ "sync_flags": ["-L", "--exclude=a b"] }"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(
            settings.sync_flags.map(SyncFlags::into_args),
            Some(vec!["-L".to_string(), "--exclude=a b".to_string()])
        );
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(serde_json::from_str::<Settings>(r#"{ "sauce": "/src" }"#).is_err());
        assert!(serde_json::from_str::<Settings>(r#"{ "intervals": { "daily": "x" } }"#).is_err());
    }

    #[test]
    fn negative_counts_disable_tiers() {
        let temp = tempdir().unwrap();
        let json = format!(
            r#"{{ "source": {0:?}, "destination": {0:?},
                 "intervals": {{ "hourly": 2, "daily": -1, "weekly": 0 }} }}"#,
            temp.path().display().to_string()
        );
        let settings: Settings = serde_json::from_str(&json).unwrap();
        let intervals = settings.intervals.as_ref().unwrap();
        assert_eq!(intervals.get("daily"), Some(&0));

        let config = Config::from_settings(settings).unwrap();
        let names: Vec<&str> = config.tiers().iter().map(Tier::name).collect();
        assert_eq!(names, vec!["hourly"]);

        let settings: Settings =
            serde_json::from_str(r#"{ "reserves": { "yearly": 99999999999 } }"#).unwrap();
        assert_eq!(settings.reserves.unwrap().get("yearly"), Some(&u32::MAX));
    }

    /// Collects formatted log output in memory.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn warnings_while(f: impl FnOnce()) -> Vec<String> {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::WARN)
            .finish();
        tracing::subscriber::with_default(subscriber, f);

        let text = String::from_utf8(captured.0.lock().clone()).unwrap();
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn reserves_alone_warn_once() {
        let temp = tempdir().unwrap();
        let mut settings = Settings::new(temp.path(), temp.path());
        settings.reserves = Some([("daily".to_string(), 2)].into_iter().collect());

        let lines = warnings_while(|| {
            Config::from_settings(settings).unwrap();
        });
        assert_eq!(lines.len(), 1, "{lines:?}");
        assert!(lines[0].contains("WARN"));
        assert!(lines[0].contains("`reserves` setting is deprecated"));
    }

    #[test]
    fn intervals_with_reserves_do_not_warn() {
        let temp = tempdir().unwrap();
        let mut settings = Settings::new(temp.path(), temp.path()).with_intervals([("daily", 3)]);
        settings.reserves = Some([("hourly".to_string(), 2)].into_iter().collect());

        let lines = warnings_while(|| {
            Config::from_settings(settings).unwrap();
        });
        assert!(lines.is_empty(), "{lines:?}");

        let lines = warnings_while(|| {
            Config::from_settings(Settings::new(temp.path(), temp.path())).unwrap();
        });
        assert!(lines.is_empty(), "{lines:?}");
    }
}
