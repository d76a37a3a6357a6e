//! In-process stand-in for the external sync tool.
//!
//! [`MirrorSync`] copies the source into the target, mirrors deletions, and
//! hard-links every file whose bytes match the same path in the link base.
//! That is enough to observe link sharing between snapshots without
//! depending on an installed rsync.

use snapcycle_core::{SnapError, SnapResult, SyncInvoker, SyncRequest};
use std::fs;
use std::io;
use std::path::Path;

/// Mirrors directories in-process, honouring link bases.
///
/// Symlinks in the source are skipped.
#[derive(Debug, Default, Clone, Copy)]
pub struct MirrorSync;

impl SyncInvoker for MirrorSync {
    fn sync(&self, request: &SyncRequest) -> SnapResult<()> {
        mirror(
            &request.source,
            &request.target,
            request.link_base.as_deref(),
        )
        .map_err(|e| SnapError::sync_failed(&request.tier, "mirror", None, e.to_string()))
    }
}

fn mirror(source: &Path, target: &Path, base: Option<&Path>) -> io::Result<()> {
    fs::create_dir_all(target)?;

    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let name = entry.file_name();
        let from = entry.path();
        let to = target.join(&name);
        let base_entry = base.map(|b| b.join(&name));

        if file_type.is_dir() {
            if to.is_file() {
                fs::remove_file(&to)?;
            }
            mirror(&from, &to, base_entry.as_deref())?;
        } else if file_type.is_file() {
            if to.is_dir() {
                fs::remove_dir_all(&to)?;
            } else if to.exists() {
                fs::remove_file(&to)?;
            }
            match base_entry {
                Some(candidate) if same_contents(&from, &candidate)? => {
                    fs::hard_link(&candidate, &to)?;
                }
                _ => {
                    fs::copy(&from, &to)?;
                }
            }
        }
    }

    for entry in fs::read_dir(target)? {
        let entry = entry?;
        if source.join(entry.file_name()).exists() {
            continue;
        }
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

fn same_contents(a: &Path, b: &Path) -> io::Result<bool> {
    let Ok(meta_b) = fs::metadata(b) else {
        return Ok(false);
    };
    if !meta_b.is_file() || fs::metadata(a)?.len() != meta_b.len() {
        return Ok(false);
    }
    Ok(fs::read(a)? == fs::read(b)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn request(source: &Path, target: &Path, base: Option<&Path>) -> SyncRequest {
        SyncRequest {
            tier: "hourly".into(),
            source: source.to_path_buf(),
            target: target.to_path_buf(),
            link_base: base.map(Path::to_path_buf),
            extra_flags: Vec::new(),
        }
    }

    #[test]
    fn copies_and_mirrors_deletions() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("sub/a"), b"a").unwrap();
        fs::create_dir_all(&dst).unwrap();
        fs::write(dst.join("stale"), b"old").unwrap();

        MirrorSync.sync(&request(&src, &dst, None)).unwrap();

        assert_eq!(fs::read(dst.join("sub/a")).unwrap(), b"a");
        assert!(!dst.join("stale").exists());
    }

    #[cfg(unix)]
    #[test]
    fn links_unchanged_files_from_base() {
        use std::os::unix::fs::MetadataExt;

        let temp = tempdir().unwrap();
        let src = temp.path().join("src");
        let base = temp.path().join("base");
        let dst = temp.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("same"), b"unchanged").unwrap();
        fs::write(src.join("edited"), b"new").unwrap();
        MirrorSync.sync(&request(&src, &base, None)).unwrap();
        fs::write(src.join("edited"), b"newer").unwrap();

        MirrorSync.sync(&request(&src, &dst, Some(&base))).unwrap();

        let same_dst = fs::metadata(dst.join("same")).unwrap();
        let same_base = fs::metadata(base.join("same")).unwrap();
        assert_eq!(same_dst.ino(), same_base.ino());
        assert_eq!(same_dst.nlink(), 2);
        assert_eq!(fs::metadata(dst.join("edited")).unwrap().nlink(), 1);
        assert_eq!(fs::read(base.join("edited")).unwrap(), b"new");
    }
}
