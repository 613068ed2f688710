//! Crash-safe file replacement: write to a temp sibling, fsync, rename over the target.
//!
//! A reader observes either the old content or the new content, never a
//! partially written file. The temp file is removed on every error path
//! (`NamedTempFile` deletes itself on drop).

use std::fs::{self, Permissions};
use std::io::Write;
use std::path::Path;

use crate::error::{SafeError, SafeResult};

const TMP_PREFIX: &str = ".sf-tmp-";

/// Atomically replace `target` with `data`.
///
/// Permissions of an existing `target` are kept; otherwise `perms` (when
/// given) is applied to the new file.
pub fn write_atomic(target: &Path, data: &[u8], perms: Option<Permissions>) -> SafeResult<()> {
    let dir = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut tmp = tempfile::Builder::new()
        .prefix(TMP_PREFIX)
        .tempfile_in(dir)
        .map_err(|e| SafeError::from_io(dir, e))?;

    tmp.write_all(data)
        .map_err(|e| SafeError::from_io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| SafeError::from_io(tmp.path(), e))?;

    let perms = fs::metadata(target).ok().map(|m| m.permissions()).or(perms);
    if let Some(perms) = perms {
        if let Err(e) = tmp.as_file().set_permissions(perms) {
            tracing::debug!(path = %target.display(), "could not carry permissions: {e}");
        }
    }

    tmp.persist(target)
        .map_err(|e| SafeError::from_io(target, e.error))?;

    tracing::trace!(path = %target.display(), bytes = data.len(), "atomic write");
    Ok(())
}

/// True if `name` looks like a leftover temp file from [`write_atomic`].
pub fn is_temp_artifact(name: &str) -> bool {
    name.starts_with(TMP_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");

        write_atomic(&path, b"hello", None).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn test_write_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        fs::write(&path, b"old content that is longer").unwrap();

        write_atomic(&path, b"new", None).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new");
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        write_atomic(&path, b"data", None).unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["out.bin".to_string()]);
    }

    #[test]
    fn test_missing_parent_fails_without_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope").join("out.bin");

        let err = write_atomic(&path, b"data", None).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_existing_mode_preserved() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.sh");
        fs::write(&path, b"#!/bin/sh").unwrap();
        fs::set_permissions(&path, Permissions::from_mode(0o750)).unwrap();

        write_atomic(&path, b"#!/bin/sh\necho hi", None).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o750);
    }

    #[test]
    fn test_temp_artifact_detection() {
        assert!(is_temp_artifact(".sf-tmp-abc123"));
        assert!(!is_temp_artifact("notes.txt"));
    }
}
