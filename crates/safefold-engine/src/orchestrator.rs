//! Folder encryption: FEK lifecycle plus a sequential best-effort walk.
//!
//! ```text
//! encrypt: check Normal → protect_folder → persist wrapped key → encrypt each file → drop FEK
//! resume:  check Encrypted → unwrap (fail fast) → encrypt files not yet sealed under the FEK
//! decrypt: check Encrypted → unwrap (fail fast) → decrypt each file → clear key iff all succeeded
//! ```
//!
//! Files are processed one at a time in sorted path order. A failing file is
//! recorded in the [`BatchReport`] and the walk continues. Cancellation is
//! checked between files only, so an interrupted encrypt leaves the folder
//! `Encrypted` with some files still plain; running encrypt again finishes it.

use std::path::{Path, PathBuf};

use safefold_core::atomic::is_temp_artifact;
use safefold_core::{ErrorKind, FolderRecord, ProtectionMode, SafeError, SafeResult};
use safefold_crypto::{EnvelopeKeyManager, FileCipher, FileKey};
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::store::{lock_store, SharedStore};

/// Progress sink: `(percent 0..=100, message)`.
pub type ProgressFn = Box<dyn Fn(u8, &str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOp {
    Encrypt,
    Decrypt,
}

impl std::fmt::Display for BatchOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            BatchOp::Encrypt => "encrypt",
            BatchOp::Decrypt => "decrypt",
        })
    }
}

/// Outcome of one batch pass over a folder
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub op: BatchOp,
    pub folder: PathBuf,
    pub total: usize,
    pub succeeded: usize,
    /// Files already sealed under the folder key and left as they were
    pub skipped: usize,
    pub failures: Vec<(PathBuf, ErrorKind)>,
    pub cancelled: bool,
}

impl BatchReport {
    fn new(op: BatchOp, folder: &Path, total: usize) -> Self {
        Self {
            op,
            folder: folder.to_path_buf(),
            total,
            succeeded: 0,
            skipped: 0,
            failures: Vec::new(),
            cancelled: false,
        }
    }

    pub fn processed(&self) -> usize {
        self.succeeded + self.failures.len()
    }

    /// Every file handled and none failed.
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.failures.is_empty()
    }

    /// Collapse into an error: `Cancelled` or `PartialBatchFailure`.
    pub fn into_result(self) -> SafeResult<Self> {
        if self.cancelled {
            return Err(SafeError::Cancelled {
                processed: self.processed(),
                total: self.total,
            });
        }
        if !self.failures.is_empty() {
            return Err(SafeError::PartialBatchFailure {
                failed: self.failures.len(),
                total: self.total,
            });
        }
        Ok(self)
    }
}

/// Integer percentage; an empty set counts as complete.
pub fn percent(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((processed.min(total) * 100) / total) as u8
}

pub struct FolderEncryptionOrchestrator {
    keys: EnvelopeKeyManager,
    cipher: FileCipher,
}

impl FolderEncryptionOrchestrator {
    pub fn new(keys: EnvelopeKeyManager, cipher: FileCipher) -> Self {
        Self { keys, cipher }
    }

    pub fn keys(&self) -> &EnvelopeKeyManager {
        &self.keys
    }

    /// Encrypt every file under a registered folder.
    ///
    /// A `Normal` folder gets a fresh FEK whose wrapped form is persisted
    /// before the first file is touched. An `Encrypted` folder is resumed:
    /// its FEK is unwrapped and files already sealed under it are skipped.
    pub fn encrypt_folder(
        &self,
        store: &SharedStore,
        folder: &Path,
        password: &SecretString,
        progress: Option<&ProgressFn>,
        cancel: &CancellationToken,
    ) -> SafeResult<BatchReport> {
        let mut record = registered_dir(store, folder)?;
        let fek = match record.protection_mode {
            ProtectionMode::Normal => {
                let (fek, material) = self.keys.protect_folder(folder, password)?;
                record.set_key_material(material);
                lock_store(store).upsert_folder_record(record)?;
                debug!(folder = %folder.display(), "wrapped key persisted");
                fek
            }
            ProtectionMode::Encrypted => {
                let fek = self.keys.unwrap_record_key(&record, password)?;
                info!(folder = %folder.display(), "resuming encrypt");
                fek
            }
            ProtectionMode::QuickLocked => {
                return Err(SafeError::InvalidState(format!(
                    "{} is quick-locked",
                    folder.display()
                )))
            }
        };
        let files = collect_files(folder)?;

        let report = self.run(BatchOp::Encrypt, folder, &files, &fek, progress, cancel);
        drop(fek);

        info!(
            folder = %folder.display(),
            succeeded = report.succeeded,
            skipped = report.skipped,
            failed = report.failures.len(),
            cancelled = report.cancelled,
            "folder encrypted"
        );
        Ok(report)
    }

    /// Decrypt every file under an `Encrypted` folder.
    ///
    /// A wrong password fails before any file is read. Key material is
    /// cleared only when every file decrypted.
    pub fn decrypt_folder(
        &self,
        store: &SharedStore,
        folder: &Path,
        password: &SecretString,
        progress: Option<&ProgressFn>,
        cancel: &CancellationToken,
    ) -> SafeResult<BatchReport> {
        let record = registered_dir(store, folder)?;
        if record.protection_mode == ProtectionMode::QuickLocked {
            return Err(SafeError::InvalidState(format!(
                "{} is quick-locked",
                folder.display()
            )));
        }
        let fek = self.keys.unwrap_record_key(&record, password)?;
        let files = collect_files(folder)?;

        let report = self.run(BatchOp::Decrypt, folder, &files, &fek, progress, cancel);
        drop(fek);

        if report.is_complete() {
            lock_store(store).clear_key_fields(folder)?;
            info!(folder = %folder.display(), files = report.total, "folder decrypted");
        } else {
            warn!(
                folder = %folder.display(),
                failed = report.failures.len(),
                cancelled = report.cancelled,
                "decrypt incomplete, key material kept"
            );
        }
        Ok(report)
    }

    fn run(
        &self,
        op: BatchOp,
        folder: &Path,
        files: &[PathBuf],
        fek: &FileKey,
        progress: Option<&ProgressFn>,
        cancel: &CancellationToken,
    ) -> BatchReport {
        let total = files.len();
        let mut report = BatchReport::new(op, folder, total);

        if total == 0 {
            if let Some(cb) = progress {
                cb(100, "no files");
            }
            return report;
        }

        for (i, path) in files.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(folder = %folder.display(), processed = i, total, "{op} cancelled");
                report.cancelled = true;
                break;
            }

            let result = match op {
                BatchOp::Encrypt => self.encrypt_unless_sealed(path, fek),
                BatchOp::Decrypt => self.cipher.decrypt_atomic(path, path, fek).map(|()| true),
            };
            match result {
                Ok(changed) => {
                    report.succeeded += 1;
                    if !changed {
                        report.skipped += 1;
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), "{op} failed: {e}");
                    report.failures.push((path.clone(), e.kind()));
                }
            }

            if let Some(cb) = progress {
                let rel = path.strip_prefix(folder).unwrap_or(path);
                let msg = format!("[{}/{}] {}", i + 1, total, rel.display());
                cb(percent(i + 1, total), &msg);
            }
        }
        report
    }

    /// Encrypt `path` in place; `Ok(false)` if it was already sealed under `fek`.
    fn encrypt_unless_sealed(&self, path: &Path, fek: &FileKey) -> SafeResult<bool> {
        if self.cipher.is_sealed_with(path, fek)? {
            debug!(path = %path.display(), "already encrypted, skipping");
            return Ok(false);
        }
        self.cipher.encrypt_atomic(path, path, fek)?;
        Ok(true)
    }
}

fn registered_dir(store: &SharedStore, folder: &Path) -> SafeResult<FolderRecord> {
    let record = lock_store(store)
        .get_folder_record(folder)
        .ok_or_else(|| SafeError::NotFound(format!("no record for {}", folder.display())))?;
    if !folder.is_dir() {
        return Err(SafeError::NotFound(folder.display().to_string()));
    }
    Ok(record)
}

/// All regular files under `root`, recursively, in sorted order.
///
/// Symlinks are not followed. Leftover atomic-write temp files are skipped.
pub fn collect_files(root: &Path) -> SafeResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    collect_files_inner(root, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_files_inner(dir: &Path, out: &mut Vec<PathBuf>) -> SafeResult<()> {
    for entry in std::fs::read_dir(dir).map_err(|e| SafeError::from_io(dir, e))? {
        let entry = entry.map_err(|e| SafeError::from_io(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| SafeError::from_io(&path, e))?;

        if file_type.is_dir() {
            collect_files_inner(&path, out)?;
        } else if file_type.is_file() {
            let name = entry.file_name();
            if is_temp_artifact(&name.to_string_lossy()) {
                debug!(path = %path.display(), "skipping temp artifact");
                continue;
            }
            out.push(path);
        }
    }
    Ok(())
}
