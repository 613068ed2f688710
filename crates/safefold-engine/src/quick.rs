//! Quick protection: hide, deny and rename a folder without touching its
//! contents.
//!
//! Lock:
//!   1. seal `{ name, mode }` into `<parent>/.sf_recovery_<obfuscated>`
//!   2. conceal the folder and everything under it (best-effort per entry)
//!   3. deny the current user (best-effort)
//!   4. rename to `\u{200B}<uuid>`; on failure undo 1-3 and return the error
//!
//! Unlock reverses the steps; only the final rename decides the outcome.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use safefold_core::{write_atomic, SafeError, SafeResult};
use safefold_secrets::SecretStore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::platform::FolderGuard;

/// Prefix of obfuscated folder names (zero-width space)
pub const OBFUSCATED_PREFIX: char = '\u{200B}';

const RECOVERY_PREFIX: &str = ".sf_recovery_";
const FALLBACK_PREFIX: &str = "Restored_";

#[derive(Debug, Serialize, Deserialize)]
struct RecoveryRecord {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mode: Option<u32>,
}

pub struct QuickProtectEngine {
    secrets: Arc<SecretStore>,
    guard: Box<dyn FolderGuard>,
}

impl QuickProtectEngine {
    pub fn new(secrets: Arc<SecretStore>, guard: Box<dyn FolderGuard>) -> Self {
        Self { secrets, guard }
    }

    /// Lock `folder` and return its new obfuscated path.
    pub fn lock(&self, folder: &Path) -> SafeResult<PathBuf> {
        let obfuscated = format!("{OBFUSCATED_PREFIX}{}", uuid::Uuid::new_v4().simple());
        self.lock_as(folder, &obfuscated)
    }

    /// Lock `folder` under a given obfuscated name. Re-locking under the
    /// name a folder had before keeps its metadata record valid.
    pub fn lock_as(&self, folder: &Path, obfuscated: &str) -> SafeResult<PathBuf> {
        let (parent, name) = split_folder(folder)?;
        if !is_obfuscated_name(obfuscated) {
            return Err(SafeError::InvalidInput(format!(
                "not an obfuscated name: {obfuscated:?}"
            )));
        }
        let obfuscated = validate_name(obfuscated)?;
        if !folder.is_dir() {
            return Err(SafeError::NotFound(folder.display().to_string()));
        }

        let target = parent.join(&obfuscated);
        if target.exists() {
            return Err(SafeError::InvalidState(format!(
                "{} already exists",
                target.display()
            )));
        }
        let record_path = recovery_path(parent, &obfuscated);
        let snapshot = self.guard.access_snapshot(folder);

        let record = RecoveryRecord {
            name: name.to_string(),
            mode: snapshot,
        };
        let json = serde_json::to_string(&record)
            .map_err(|e| SafeError::Other(anyhow::anyhow!("encoding recovery record: {e}")))?;
        let sealed = self.secrets.seal_str(&json)?;
        write_atomic(&record_path, sealed.as_bytes(), None)?;

        let failed = self.conceal_tree(folder, true);
        if failed > 0 {
            warn!(folder = %folder.display(), failed, "some entries could not be concealed");
        }
        let denied = match self.guard.deny_current_user(folder) {
            Ok(()) => true,
            Err(e) => {
                warn!(folder = %folder.display(), "deny rule not applied: {e}");
                false
            }
        };

        if let Err(e) = std::fs::rename(folder, &target) {
            if denied {
                if let Err(allow) = self.guard.allow_current_user(folder, snapshot) {
                    warn!(
                        folder = %folder.display(),
                        "deny rule not removed during rollback: {allow}"
                    );
                }
            }
            self.conceal_tree(folder, false);
            if let Err(rm) = std::fs::remove_file(&record_path) {
                warn!(path = %record_path.display(), "recovery record not removed: {rm}");
            }
            return Err(SafeError::from_io(folder, e));
        }

        info!(folder = %folder.display(), "folder quick-locked");
        Ok(target)
    }

    /// Unlock an obfuscated folder and return the restored path.
    ///
    /// The original name comes from the recovery record unless `restore_name`
    /// is given; if neither is available a `Restored_<id>` name is used.
    pub fn unlock(&self, locked: &Path, restore_name: Option<&str>) -> SafeResult<PathBuf> {
        let (parent, obfuscated) = split_folder(locked)?;
        if !locked.exists() {
            return Err(SafeError::NotFound(locked.display().to_string()));
        }

        let record_path = recovery_path(parent, obfuscated);
        let record = self.read_recovery(&record_path);
        let name = match (restore_name, &record) {
            (Some(explicit), _) => validate_name(explicit)?,
            (None, Some(r)) => validate_name(&r.name)?,
            (None, None) => {
                let id = uuid::Uuid::new_v4().simple().to_string();
                let fallback = format!("{FALLBACK_PREFIX}{}", &id[..8]);
                warn!(
                    folder = %locked.display(),
                    name = %fallback,
                    "no recovery record, using placeholder name"
                );
                fallback
            }
        };
        let target = parent.join(&name);
        if target.exists() {
            return Err(SafeError::InvalidState(format!(
                "{} already exists",
                target.display()
            )));
        }

        let snapshot = record.as_ref().and_then(|r| r.mode);
        if let Err(e) = self.guard.allow_current_user(locked, snapshot) {
            warn!(folder = %locked.display(), "deny rule not removed: {e}");
        }
        let failed = self.conceal_tree(locked, false);
        if failed > 0 {
            warn!(folder = %locked.display(), failed, "some entries could not be revealed");
        }

        std::fs::rename(locked, &target).map_err(|e| SafeError::from_io(locked, e))?;

        match std::fs::remove_file(&record_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %record_path.display(), "recovery record not removed: {e}"),
        }

        info!(folder = %target.display(), "folder unlocked");
        Ok(target)
    }

    fn read_recovery(&self, path: &Path) -> Option<RecoveryRecord> {
        let blob = std::fs::read_to_string(path).ok()?;
        let json = match self.secrets.unseal_string(&blob) {
            Ok(j) => j,
            Err(e) => {
                warn!(path = %path.display(), "recovery record unreadable: {e}");
                return None;
            }
        };
        serde_json::from_str(&json).ok()
    }

    /// Apply concealment to `root` and every entry beneath it. Returns the
    /// number of entries that failed.
    fn conceal_tree(&self, root: &Path, concealed: bool) -> usize {
        let mut failed = 0;
        let mut stack = vec![root.to_path_buf()];
        while let Some(path) = stack.pop() {
            if let Err(e) = self.guard.set_concealed(&path, concealed) {
                debug!(path = %path.display(), "attribute change failed: {e}");
                failed += 1;
            }
            let is_dir = std::fs::symlink_metadata(&path)
                .map(|m| m.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }
            match std::fs::read_dir(&path) {
                Ok(entries) => stack.extend(entries.filter_map(|e| e.ok()).map(|e| e.path())),
                Err(e) => {
                    debug!(path = %path.display(), "cannot list directory: {e}");
                    failed += 1;
                }
            }
        }
        failed
    }
}

/// True if `name` has the shape of an obfuscated folder name.
pub fn is_obfuscated_name(name: &str) -> bool {
    name.starts_with(OBFUSCATED_PREFIX)
}

fn split_folder(folder: &Path) -> SafeResult<(&Path, &str)> {
    let parent = folder
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| {
            SafeError::InvalidInput(format!("{} has no parent directory", folder.display()))
        })?;
    let name = folder
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| SafeError::InvalidInput(format!("invalid folder name: {}", folder.display())))?;
    Ok((parent, name))
}

fn recovery_path(parent: &Path, obfuscated: &str) -> PathBuf {
    parent.join(format!("{RECOVERY_PREFIX}{obfuscated}"))
}

fn validate_name(name: &str) -> SafeResult<String> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.contains('\0');
    if bad {
        return Err(SafeError::InvalidInput(format!("invalid folder name: {name:?}")));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::PlatformGuard;
    use safefold_crypto::MachineKey;
    use std::sync::Mutex;

    fn secrets() -> Arc<SecretStore> {
        Arc::new(SecretStore::with_key(MachineKey::from_bytes([5u8; 32]), "quick-test"))
    }

    fn setup() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("MyDocs");
        std::fs::create_dir_all(folder.join("sub")).unwrap();
        std::fs::write(folder.join("a.txt"), b"alpha").unwrap();
        std::fs::write(folder.join("sub").join("b.txt"), b"beta").unwrap();
        (dir, folder)
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// Records calls; optionally fails deny, or moves the folder away
    /// while denying so the rename that follows cannot find it.
    #[derive(Default)]
    struct RecordingGuard {
        fail_deny: bool,
        move_on_deny: bool,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl FolderGuard for RecordingGuard {
        fn set_concealed(&self, _path: &Path, concealed: bool) -> SafeResult<()> {
            self.calls.lock().unwrap().push(format!("conceal:{concealed}"));
            Ok(())
        }
        fn access_snapshot(&self, _path: &Path) -> Option<u32> {
            Some(0o755)
        }
        fn deny_current_user(&self, path: &Path) -> SafeResult<()> {
            self.calls.lock().unwrap().push("deny".into());
            if self.move_on_deny {
                std::fs::rename(path, path.with_file_name("Elsewhere")).unwrap();
            }
            if self.fail_deny {
                Err(SafeError::PermissionDenied("acl".into()))
            } else {
                Ok(())
            }
        }
        fn allow_current_user(&self, _path: &Path, snapshot: Option<u32>) -> SafeResult<()> {
            self.calls.lock().unwrap().push(format!("allow:{snapshot:?}"));
            Ok(())
        }
    }

    #[test]
    fn test_lock_then_unlock_restores_name() {
        let (dir, folder) = setup();
        let engine = QuickProtectEngine::new(secrets(), Box::new(PlatformGuard));

        let locked = engine.lock(&folder).unwrap();
        assert!(!folder.exists());
        let locked_name = locked.file_name().unwrap().to_str().unwrap();
        assert!(is_obfuscated_name(locked_name));
        assert!(dir
            .path()
            .join(format!("{RECOVERY_PREFIX}{locked_name}"))
            .exists());

        let restored = engine.unlock(&locked, None).unwrap();
        assert!(restored.ends_with("MyDocs"));
        assert_eq!(std::fs::read(restored.join("a.txt")).unwrap(), b"alpha");
        assert_eq!(entries(dir.path()), vec!["MyDocs".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn test_lock_unlock_restores_mode() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, folder) = setup();
        std::fs::set_permissions(&folder, std::fs::Permissions::from_mode(0o750)).unwrap();
        let engine = QuickProtectEngine::new(secrets(), Box::new(PlatformGuard));

        let locked = engine.lock(&folder).unwrap();
        let mode = std::fs::metadata(&locked).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode, 0);

        let restored = engine.unlock(&locked, None).unwrap();
        let mode = std::fs::metadata(&restored).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode, 0o750);
    }

    #[test]
    fn test_unlock_with_explicit_name() {
        let (dir, folder) = setup();
        let engine = QuickProtectEngine::new(secrets(), Box::new(PlatformGuard));
        let locked = engine.lock(&folder).unwrap();

        let restored = engine.unlock(&locked, Some("Renamed")).unwrap();
        assert_eq!(restored, dir.path().join("Renamed"));
        assert_eq!(entries(dir.path()), vec!["Renamed".to_string()]);
    }

    #[test]
    fn test_unlock_without_record_uses_placeholder() {
        let (dir, folder) = setup();
        let engine = QuickProtectEngine::new(secrets(), Box::new(PlatformGuard));
        let locked = engine.lock(&folder).unwrap();
        let name = locked.file_name().unwrap().to_str().unwrap().to_string();
        std::fs::remove_file(dir.path().join(format!("{RECOVERY_PREFIX}{name}"))).unwrap();

        let restored = engine.unlock(&locked, None).unwrap();
        let restored_name = restored.file_name().unwrap().to_str().unwrap();
        assert!(restored_name.starts_with(FALLBACK_PREFIX));
    }

    #[test]
    fn test_record_from_other_machine_falls_back() {
        let (_dir, folder) = setup();
        let locking = QuickProtectEngine::new(secrets(), Box::new(PlatformGuard));
        let locked = locking.lock(&folder).unwrap();

        let other = Arc::new(SecretStore::with_key(
            MachineKey::from_bytes([6u8; 32]),
            "quick-test",
        ));
        let unlocking = QuickProtectEngine::new(other, Box::new(PlatformGuard));
        let restored = unlocking.unlock(&locked, None).unwrap();
        assert!(restored
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with(FALLBACK_PREFIX));
    }

    #[test]
    fn test_recovery_record_is_sealed() {
        let (dir, folder) = setup();
        let engine = QuickProtectEngine::new(secrets(), Box::new(PlatformGuard));
        let locked = engine.lock(&folder).unwrap();
        let name = locked.file_name().unwrap().to_str().unwrap().to_string();

        let record = dir.path().join(format!("{RECOVERY_PREFIX}{name}"));
        let raw = std::fs::read_to_string(record).unwrap();
        assert!(!raw.contains("MyDocs"));
        engine.unlock(&locked, None).unwrap();
    }

    #[test]
    fn test_deny_failure_is_tolerated() {
        let (_dir, folder) = setup();
        let guard = RecordingGuard {
            fail_deny: true,
            ..Default::default()
        };
        let calls = guard.calls.clone();
        let engine = QuickProtectEngine::new(secrets(), Box::new(guard));

        let locked = engine.lock(&folder).unwrap();
        assert!(locked.exists());
        // folder, a.txt, sub, sub/b.txt
        let concealed = calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| *c == "conceal:true")
            .count();
        assert_eq!(concealed, 4);

        engine.unlock(&locked, None).unwrap();
        assert!(calls.lock().unwrap().contains(&"allow:Some(493)".to_string()));
    }

    #[test]
    fn test_failed_rename_rolls_back() {
        let (dir, folder) = setup();
        let guard = RecordingGuard {
            move_on_deny: true,
            ..Default::default()
        };
        let calls = guard.calls.clone();
        let engine = QuickProtectEngine::new(secrets(), Box::new(guard));

        let err = engine.lock(&folder).unwrap_err();
        assert!(matches!(err, SafeError::NotFound(_)));

        // No recovery record and no obfuscated folder left behind
        assert_eq!(entries(dir.path()), vec!["Elsewhere".to_string()]);
        let calls = calls.lock().unwrap();
        assert!(calls.contains(&"allow:Some(493)".to_string()));
        assert_eq!(calls.last().map(String::as_str), Some("conceal:false"));
    }

    #[test]
    fn test_lock_as_reuses_name() {
        let (dir, folder) = setup();
        let engine = QuickProtectEngine::new(secrets(), Box::new(PlatformGuard));
        let locked = engine.lock(&folder).unwrap();
        let name = locked.file_name().unwrap().to_str().unwrap().to_string();

        let restored = engine.unlock(&locked, None).unwrap();
        let relocked = engine.lock_as(&restored, &name).unwrap();
        assert_eq!(relocked, locked);
        assert!(dir.path().join(format!("{RECOVERY_PREFIX}{name}")).exists());
        assert_eq!(engine.unlock(&relocked, None).unwrap(), folder);

        let err = engine.lock_as(&folder, "plain").unwrap_err();
        assert!(matches!(err, SafeError::InvalidInput(_)));
    }

    #[test]
    fn test_root_path_rejected() {
        let engine = QuickProtectEngine::new(secrets(), Box::new(PlatformGuard));
        let root = if cfg!(windows) { Path::new("C:\\") } else { Path::new("/") };
        let err = engine.lock(root).unwrap_err();
        assert!(matches!(err, SafeError::InvalidInput(_)));
    }

    #[test]
    fn test_unlock_refuses_to_overwrite() {
        let (dir, folder) = setup();
        let engine = QuickProtectEngine::new(secrets(), Box::new(PlatformGuard));
        let locked = engine.lock(&folder).unwrap();
        std::fs::create_dir(dir.path().join("MyDocs")).unwrap();

        let err = engine.unlock(&locked, None).unwrap_err();
        assert!(matches!(err, SafeError::InvalidState(_)));
        assert!(locked.exists());

        std::fs::remove_dir(dir.path().join("MyDocs")).unwrap();
        engine.unlock(&locked, None).unwrap();
    }

    #[test]
    fn test_invalid_explicit_name() {
        let (_dir, folder) = setup();
        let engine = QuickProtectEngine::new(secrets(), Box::new(PlatformGuard));
        let locked = engine.lock(&folder).unwrap();

        let err = engine.unlock(&locked, Some("../escape")).unwrap_err();
        assert!(matches!(err, SafeError::InvalidInput(_)));
        engine.unlock(&locked, None).unwrap();
    }

    #[test]
    fn test_lock_missing_folder() {
        let dir = tempfile::tempdir().unwrap();
        let engine = QuickProtectEngine::new(secrets(), Box::new(PlatformGuard));
        let err = engine.lock(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, SafeError::NotFound(_)));
        assert!(entries(dir.path()).is_empty());
    }
}
