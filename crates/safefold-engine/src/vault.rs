//! `Vault`: the composed engine behind the CLI.
//!
//! Owns the metadata store, the master password gate and both protection
//! engines. Every protection operation verifies the master password first
//! and holds a per-folder in-flight slot; a second operation on the same
//! folder fails with `Busy`. The failed-attempt counter lives in the store
//! so the lockout delay carries over between runs.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use safefold_core::{FolderRecord, ProtectionMode, SafeConfig, SafeError, SafeResult};
use safefold_crypto::{
    EnvelopeKeyManager, FileCipher, KdfParams, LockoutPolicy, PasswordAuthenticator,
};
use safefold_secrets::{get_or_create_store_key, source_from_config, SecretStore};
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::orchestrator::{BatchReport, FolderEncryptionOrchestrator, ProgressFn};
use crate::platform::{FolderGuard, PlatformGuard};
use crate::quick::QuickProtectEngine;
use crate::store::{lock_store, JsonMetadataStore, SharedStore};

pub struct Vault {
    store: SharedStore,
    auth: PasswordAuthenticator,
    orchestrator: FolderEncryptionOrchestrator,
    quick: QuickProtectEngine,
    in_flight: Mutex<HashSet<PathBuf>>,
}

/// Releases a folder's in-flight slot on drop.
struct FlightGuard<'a> {
    set: &'a Mutex<HashSet<PathBuf>>,
    path: PathBuf,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.path);
    }
}

impl Vault {
    /// Open the vault described by `config`: machine key, sealed store key,
    /// metadata document.
    pub fn open(config: &SafeConfig) -> SafeResult<Self> {
        config.validate()?;
        let data_dir = config.data_dir();
        std::fs::create_dir_all(&data_dir).map_err(|e| SafeError::from_io(&data_dir, e))?;

        let source = source_from_config(config)?;
        let secrets = Arc::new(SecretStore::open(source.as_ref(), &config.secrets.context_tag)?);

        let store_key = if config.storage.encrypt_metadata {
            Some(get_or_create_store_key(&secrets, &config.store_key_path())?)
        } else {
            None
        };
        let store: SharedStore = Arc::new(Mutex::new(JsonMetadataStore::open(
            &config.metadata_path(),
            store_key,
        )?));

        info!(data_dir = %data_dir.display(), backend = source.name(), "vault opened");
        Ok(Self::with_parts(
            store,
            secrets,
            KdfParams::from(&config.crypto),
            LockoutPolicy::from(&config.auth),
            Box::new(PlatformGuard),
        ))
    }

    /// Assemble a vault from explicit parts.
    pub fn with_parts(
        store: SharedStore,
        secrets: Arc<SecretStore>,
        params: KdfParams,
        policy: LockoutPolicy,
        guard: Box<dyn FolderGuard>,
    ) -> Self {
        Self {
            store,
            auth: PasswordAuthenticator::new(params.clone(), policy),
            orchestrator: FolderEncryptionOrchestrator::new(
                EnvelopeKeyManager::new(params),
                FileCipher::default(),
            ),
            quick: QuickProtectEngine::new(secrets, guard),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Replace the authenticator (tests inject a non-blocking sleeper).
    pub fn with_authenticator(mut self, auth: PasswordAuthenticator) -> Self {
        self.auth = auth;
        self
    }

    pub fn authenticator(&self) -> &PasswordAuthenticator {
        &self.auth
    }

    // ── master credential ────────────────────────────────────────────────

    pub fn is_initialized(&self) -> bool {
        lock_store(&self.store).master_credential().is_some()
    }

    /// First run: hash and store the master password.
    pub fn initialize(&self, password: &SecretString) -> SafeResult<()> {
        let mut store = lock_store(&self.store);
        if store.master_credential().is_some() {
            return Err(SafeError::InvalidState("vault already initialized".into()));
        }
        store.set_master_credential(self.auth.hash(password)?)?;
        info!("master password set");
        Ok(())
    }

    /// Verify the master password.
    pub fn unlock_session(&self, password: &SecretString) -> SafeResult<()> {
        let stored = lock_store(&self.store)
            .master_credential()
            .ok_or_else(|| SafeError::InvalidState("vault not initialized".into()))?;
        if self.gated(|auth| auth.verify(password, &stored))? {
            Ok(())
        } else {
            Err(SafeError::WrongPassword)
        }
    }

    /// Run a password check with the lockout counter loaded from the store
    /// beforehand and written back afterwards, whatever the outcome.
    fn gated<T>(
        &self,
        check: impl FnOnce(&PasswordAuthenticator) -> SafeResult<T>,
    ) -> SafeResult<T> {
        self.auth.restore_lockout(lock_store(&self.store).lockout());
        let outcome = check(&self.auth);
        let record = self.auth.lockout_record();
        let mut store = lock_store(&self.store);
        if store.lockout() != record {
            store.set_lockout(record)?;
        }
        outcome
    }

    /// Change the master password and re-wrap every encrypted folder's key.
    ///
    /// The new credential and every re-wrapped record land in one store
    /// commit; if any folder fails to re-wrap nothing is written.
    pub fn change_master_password(&self, old: &SecretString, new: &SecretString) -> SafeResult<()> {
        if !self
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
        {
            return Err(SafeError::InvalidState(
                "folder operations in progress; retry when they finish".into(),
            ));
        }
        let stored = lock_store(&self.store)
            .master_credential()
            .ok_or_else(|| SafeError::InvalidState("vault not initialized".into()))?;
        let credential = self.gated(|auth| auth.change_password(old, new, &stored))?;

        let keys = self.orchestrator.keys();
        let mut count = 0;
        lock_store(&self.store).commit_rekey(credential, &mut |mut record| {
            if let Some(material) = record.key_material() {
                let next = keys.rewrap_folder_key(&record.path, old, new, &material)?;
                record.set_key_material(next);
                count += 1;
            }
            Ok(record)
        })?;
        info!(folders = count, "master password changed");
        Ok(())
    }

    // ── folder registry ──────────────────────────────────────────────────

    /// Register an existing directory as a `Normal` folder.
    pub fn add_folder(&self, path: &Path) -> SafeResult<FolderRecord> {
        if !path.is_dir() {
            return Err(SafeError::NotFound(path.display().to_string()));
        }
        let path = normalize(path);
        let mut store = lock_store(&self.store);
        if store.get_folder_record(&path).is_some() {
            return Err(SafeError::InvalidInput(format!(
                "{} is already registered",
                path.display()
            )));
        }
        let record = FolderRecord::new(&path);
        store.upsert_folder_record(record.clone())?;
        info!(folder = %path.display(), "folder registered");
        Ok(record)
    }

    /// Forget a `Normal` folder.
    pub fn remove_folder(&self, path: &Path) -> SafeResult<FolderRecord> {
        let record = self.folder(path)?;
        if record.protection_mode != ProtectionMode::Normal {
            return Err(SafeError::InvalidState(format!(
                "{} is {}; unprotect it first",
                record.path.display(),
                record.protection_mode
            )));
        }
        let _flight = self.begin(&record.path)?;
        lock_store(&self.store).remove_folder_record(&record.path)?;
        info!(folder = %record.path.display(), "folder unregistered");
        Ok(record)
    }

    pub fn list_folders(&self) -> Vec<FolderRecord> {
        lock_store(&self.store).list_folder_records()
    }

    pub fn folder(&self, path: &Path) -> SafeResult<FolderRecord> {
        lock_store(&self.store)
            .get_folder_record(&normalize(path))
            .ok_or_else(|| SafeError::NotFound(format!("no record for {}", path.display())))
    }

    // ── protection ───────────────────────────────────────────────────────

    pub fn encrypt_folder(
        &self,
        path: &Path,
        password: &SecretString,
        progress: Option<&ProgressFn>,
        cancel: &CancellationToken,
    ) -> SafeResult<BatchReport> {
        self.unlock_session(password)?;
        let path = normalize(path);
        let _flight = self.begin(&path)?;
        self.orchestrator
            .encrypt_folder(&self.store, &path, password, progress, cancel)
    }

    pub fn decrypt_folder(
        &self,
        path: &Path,
        password: &SecretString,
        progress: Option<&ProgressFn>,
        cancel: &CancellationToken,
    ) -> SafeResult<BatchReport> {
        self.unlock_session(password)?;
        let path = normalize(path);
        let _flight = self.begin(&path)?;
        self.orchestrator
            .decrypt_folder(&self.store, &path, password, progress, cancel)
    }

    /// Quick-lock a `Normal` folder and move its record to the new path.
    pub fn lock_folder(&self, path: &Path, password: &SecretString) -> SafeResult<PathBuf> {
        self.unlock_session(password)?;
        let record = self.folder(path)?;
        if record.protection_mode != ProtectionMode::Normal {
            return Err(SafeError::InvalidState(format!(
                "{} is {}, expected normal",
                record.path.display(),
                record.protection_mode
            )));
        }
        let _flight = self.begin(&record.path)?;

        let locked = self.quick.lock(&record.path)?;
        let mut moved = record.clone();
        moved.path = locked.clone();
        moved.protection_mode = ProtectionMode::QuickLocked;
        if let Err(e) = lock_store(&self.store).move_folder_record(&record.path, moved) {
            let name = record.path.file_name().and_then(|n| n.to_str());
            match self.quick.unlock(&locked, name) {
                Ok(_) => warn!(folder = %record.path.display(), "record not saved, lock undone: {e}"),
                Err(undo) => warn!(
                    folder = %record.path.display(),
                    locked = %locked.display(),
                    "record not saved and lock could not be undone: {undo}"
                ),
            }
            return Err(e);
        }
        Ok(locked)
    }

    /// Unlock a quick-locked folder and move its record back.
    pub fn unlock_folder(
        &self,
        path: &Path,
        password: &SecretString,
        restore_name: Option<&str>,
    ) -> SafeResult<PathBuf> {
        self.unlock_session(password)?;
        let record = self.folder(path)?;
        if record.protection_mode != ProtectionMode::QuickLocked {
            return Err(SafeError::InvalidState(format!(
                "{} is not quick-locked",
                record.path.display()
            )));
        }
        let _flight = self.begin(&record.path)?;

        let obfuscated = record
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_owned)
            .ok_or_else(|| {
                SafeError::InvalidInput(format!("invalid folder name: {}", record.path.display()))
            })?;

        let restored = self.quick.unlock(&record.path, restore_name)?;
        let mut moved = record.clone();
        moved.path = restored.clone();
        moved.protection_mode = ProtectionMode::Normal;
        if let Some(name) = restored.file_name() {
            moved.display_name = name.to_string_lossy().into_owned();
        }
        if let Err(e) = lock_store(&self.store).move_folder_record(&record.path, moved) {
            match self.quick.lock_as(&restored, &obfuscated) {
                Ok(_) => warn!(folder = %restored.display(), "record not saved, unlock undone: {e}"),
                Err(undo) => warn!(
                    folder = %restored.display(),
                    "record not saved and folder could not be re-locked: {undo}"
                ),
            }
            return Err(e);
        }
        Ok(restored)
    }

    fn begin(&self, path: &Path) -> SafeResult<FlightGuard<'_>> {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(path.to_path_buf()) {
            return Err(SafeError::Busy(path.to_path_buf()));
        }
        Ok(FlightGuard {
            set: &self.in_flight,
            path: path.to_path_buf(),
        })
    }
}

/// Canonical form of an existing path; otherwise the path made absolute.
fn normalize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
