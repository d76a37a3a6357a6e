//! External sync tool adapter.
//!
//! Snapshot content is copied by an external directory-sync tool run as a
//! subprocess. The tool must mirror deletions and support a hard-link base
//! directory, so unchanged files are linked rather than copied.

use crate::error::{SnapError, SnapResult};
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// One sync tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    /// Tier the target snapshot belongs to.
    pub tier: String,
    /// Directory whose contents are copied.
    pub source: PathBuf,
    /// Snapshot directory being populated.
    pub target: PathBuf,
    /// Prior snapshot to hard-link unchanged files from.
    pub link_base: Option<PathBuf>,
    /// Caller flags, appended after the defaults.
    pub extra_flags: Vec<String>,
}

/// Runs a sync.
///
/// Implementations make a single attempt; there are no retries.
pub trait SyncInvoker {
    /// Mirrors `request.source` into `request.target`.
    ///
    /// # Errors
    ///
    /// Returns `SyncFailed` if the tool fails.
    fn sync(&self, request: &SyncRequest) -> SnapResult<()>;
}

impl<T: SyncInvoker + ?Sized> SyncInvoker for &T {
    fn sync(&self, request: &SyncRequest) -> SnapResult<()> {
        (**self).sync(request)
    }
}

impl<T: SyncInvoker + ?Sized> SyncInvoker for Box<T> {
    fn sync(&self, request: &SyncRequest) -> SnapResult<()> {
        (**self).sync(request)
    }
}

/// Invokes rsync (or a compatible tool) as a subprocess.
#[derive(Debug, Clone)]
pub struct RsyncInvoker {
    program: String,
}

impl Default for RsyncInvoker {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_SYNC_PROGRAM)
    }
}

impl RsyncInvoker {
    /// Creates an invoker for the given executable.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Executable that will be run.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Builds the argument list for a request.
    ///
    /// Order: defaults, link base, caller flags, source, target. The source
    /// gets a trailing separator so its contents, not the directory itself,
    /// land in the target.
    #[must_use]
    pub fn args(request: &SyncRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["--archive".into(), "--delete".into()];

        if let Some(base) = &request.link_base {
            let relative = relative_link_base(&request.target, base);
            let mut flag = OsString::from("--link-dest=");
            flag.push(relative.as_os_str());
            args.push(flag);
        }

        args.extend(request.extra_flags.iter().map(OsString::from));

        let mut source = request.source.clone().into_os_string();
        if !source.to_string_lossy().ends_with(std::path::MAIN_SEPARATOR) {
            source.push(std::path::MAIN_SEPARATOR_STR);
        }
        args.push(source);
        args.push(request.target.clone().into_os_string());
        args
    }
}

impl SyncInvoker for RsyncInvoker {
    fn sync(&self, request: &SyncRequest) -> SnapResult<()> {
        let args = Self::args(request);
        debug!(tier = %request.tier, program = %self.program, ?args, "running sync");

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                SnapError::sync_failed(&request.tier, &self.program, None, e.to_string())
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
            return Err(SnapError::sync_failed(
                &request.tier,
                &self.program,
                output.status.code(),
                stderr,
            ));
        }
        Ok(())
    }
}

/// Expresses `base` relative to the directory `target`.
///
/// rsync resolves a relative link base against the target directory, so
/// `dest/hourly/b` with base `dest/hourly/a` yields `../a`. Paths that share
/// no common prefix fall back to `base` unchanged.
#[must_use]
pub fn relative_link_base(target: &Path, base: &Path) -> PathBuf {
    let target: Vec<Component<'_>> = target.components().collect();
    let base_parts: Vec<Component<'_>> = base.components().collect();

    let common = target
        .iter()
        .zip(base_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();
    if common == 0 {
        return base.to_path_buf();
    }

    let mut relative = PathBuf::new();
    for _ in common..target.len() {
        relative.push("..");
    }
    for part in &base_parts[common..] {
        relative.push(part.as_os_str());
    }
    relative
}
