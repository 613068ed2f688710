//! Metadata store: master credential, lockout counter and folder records.
//!
//! The JSON backend keeps a cached copy of the document for reads. Every
//! mutation takes an exclusive advisory lock on `<file>.lock`, re-reads the
//! document from disk, applies the change and writes it back via temp+rename,
//! so processes working on different folders never drop each other's
//! records. A failed write leaves the cached copy untouched. When a store key
//! is supplied the file is encrypted at rest:
//!
//! ```text
//! [4 bytes: "SFM1"][12 bytes: nonce][N bytes: ciphertext of JSON][16 bytes: tag]
//! ```
//!
//! Documents are upgraded to [`SCHEMA_VERSION`] on load.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use fs2::FileExt;
use safefold_core::{
    write_atomic, FolderRecord, LockoutRecord, MasterCredential, ProtectionMode, SafeError,
    SafeResult,
};
use safefold_crypto::{FileCipher, StoreKey};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Current metadata document schema
pub const SCHEMA_VERSION: u32 = 2;

const ENCRYPTED_MAGIC: &[u8; 4] = b"SFM1";

/// Re-wraps one record during [`MetadataStore::commit_rekey`].
pub type RewrapFn<'a> = dyn FnMut(FolderRecord) -> SafeResult<FolderRecord> + 'a;

/// Record store boundary used by the orchestrator and the vault.
pub trait MetadataStore: Send {
    fn get_folder_record(&self, path: &Path) -> Option<FolderRecord>;
    /// Insert or replace the record keyed by `record.path`.
    fn upsert_folder_record(&mut self, record: FolderRecord) -> SafeResult<()>;
    /// Drop wrapped key material for `path` and return it to `Normal`.
    fn clear_key_fields(&mut self, path: &Path) -> SafeResult<()>;
    /// Re-key a record after its folder moved on disk.
    fn move_folder_record(&mut self, from: &Path, record: FolderRecord) -> SafeResult<()>;
    fn remove_folder_record(&mut self, path: &Path) -> SafeResult<Option<FolderRecord>>;
    fn list_folder_records(&self) -> Vec<FolderRecord>;
    fn master_credential(&self) -> Option<MasterCredential>;
    fn set_master_credential(&mut self, credential: MasterCredential) -> SafeResult<()>;
    fn lockout(&self) -> LockoutRecord;
    fn set_lockout(&mut self, lockout: LockoutRecord) -> SafeResult<()>;
    /// Replace the credential and pass every record holding key material
    /// through `rewrap`, all in a single write. Nothing changes if any
    /// rewrap fails.
    fn commit_rekey(
        &mut self,
        credential: MasterCredential,
        rewrap: &mut RewrapFn<'_>,
    ) -> SafeResult<()>;
}

/// A store shared between the vault and long-running operations.
pub type SharedStore = Arc<Mutex<dyn MetadataStore>>;

/// Lock a shared store, recovering from a poisoned mutex.
pub fn lock_store(store: &SharedStore) -> MutexGuard<'_, dyn MetadataStore + 'static> {
    store.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MetadataDocument {
    #[serde(default)]
    schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    master: Option<MasterCredential>,
    #[serde(default)]
    lockout: LockoutRecord,
    /// path key → record
    #[serde(default)]
    folders: BTreeMap<String, FolderRecord>,
}

impl MetadataDocument {
    fn empty() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            ..Default::default()
        }
    }

    /// Upgrade older documents in place. Returns true if anything changed.
    fn migrate(&mut self) -> bool {
        if self.schema_version >= SCHEMA_VERSION {
            return false;
        }
        let from = self.schema_version;

        // v1 and earlier: no wrapped-key fields, records keyed loosely
        let records: Vec<FolderRecord> = std::mem::take(&mut self.folders).into_values().collect();
        for mut record in records {
            if record.key_material().is_some() {
                record.protection_mode = ProtectionMode::Encrypted;
            } else if record.protection_mode == ProtectionMode::Encrypted {
                warn!(
                    path = %record.path.display(),
                    "record marked encrypted without key material"
                );
            }
            self.folders.insert(path_key(&record.path), record);
        }

        self.schema_version = SCHEMA_VERSION;
        info!(from, to = SCHEMA_VERSION, "migrated metadata schema");
        true
    }

    fn upsert(&mut self, record: FolderRecord) {
        self.folders.insert(path_key(&record.path), record);
    }

    fn clear_key_fields(&mut self, path: &Path) -> SafeResult<()> {
        self.folders
            .get_mut(&path_key(path))
            .ok_or_else(|| SafeError::NotFound(path.display().to_string()))?
            .clear_key_material();
        Ok(())
    }

    fn move_record(&mut self, from: &Path, record: FolderRecord) {
        self.folders.remove(&path_key(from));
        self.upsert(record);
    }

    fn rekey(&mut self, credential: MasterCredential, rewrap: &mut RewrapFn<'_>) -> SafeResult<()> {
        for record in self.folders.values_mut() {
            if record.key_material().is_some() {
                *record = rewrap(record.clone())?;
            }
        }
        self.master = Some(credential);
        Ok(())
    }
}

/// Exclusive advisory lock held for the duration of one mutation.
struct StoreLock(File);

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.0);
    }
}

/// JSON document store, optionally encrypted at rest.
pub struct JsonMetadataStore {
    path: PathBuf,
    lock_path: PathBuf,
    doc: MetadataDocument,
    key: Option<StoreKey>,
    cipher: FileCipher,
}

impl JsonMetadataStore {
    /// Load or create the store at `path`. A missing file starts empty.
    pub fn open(path: &Path, key: Option<StoreKey>) -> SafeResult<Self> {
        let mut lock_name = path.as_os_str().to_owned();
        lock_name.push(".lock");

        let mut store = Self {
            path: path.to_path_buf(),
            lock_path: PathBuf::from(lock_name),
            doc: MetadataDocument::empty(),
            key,
            cipher: FileCipher::default(),
        };
        {
            let _lock = store.acquire()?;
            store.doc = store.load()?;
        }
        debug!(
            path = %store.path.display(),
            folders = store.doc.folders.len(),
            encrypted = store.key.is_some(),
            "metadata store opened"
        );
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn acquire(&self) -> SafeResult<StoreLock> {
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SafeError::from_io(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(|e| SafeError::from_io(&self.lock_path, e))?;
        file.lock_exclusive()
            .map_err(|e| SafeError::from_io(&self.lock_path, e))?;
        Ok(StoreLock(file))
    }

    /// Read the current on-disk document. Caller holds the lock.
    fn load(&self) -> SafeResult<MetadataDocument> {
        let mut doc = match std::fs::read(&self.path) {
            Ok(bytes) => decode_document(&self.cipher, self.key.as_ref(), &bytes, &self.path)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => MetadataDocument::empty(),
            Err(e) => return Err(SafeError::from_io(&self.path, e)),
        };
        if doc.migrate() {
            self.write(&doc)?;
        }
        Ok(doc)
    }

    fn write(&self, doc: &MetadataDocument) -> SafeResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SafeError::from_io(parent, e))?;
        }
        let json = serde_json::to_vec_pretty(doc)
            .map_err(|e| SafeError::Other(anyhow::anyhow!("serializing metadata: {e}")))?;

        let bytes = match &self.key {
            Some(key) => {
                let mut out = ENCRYPTED_MAGIC.to_vec();
                out.extend_from_slice(&self.cipher.seal_bytes(key.as_bytes(), &json)?);
                out
            }
            None => json,
        };
        write_atomic(&self.path, &bytes, owner_only())
    }

    /// Lock, re-read, apply `change`, write. The cached document is replaced
    /// only once the write succeeded.
    fn mutate<R>(
        &mut self,
        change: impl FnOnce(&mut MetadataDocument) -> SafeResult<R>,
    ) -> SafeResult<R> {
        let _lock = self.acquire()?;
        let mut next = self.load()?;
        let out = change(&mut next)?;
        self.write(&next)?;
        self.doc = next;
        Ok(out)
    }
}

impl MetadataStore for JsonMetadataStore {
    fn get_folder_record(&self, path: &Path) -> Option<FolderRecord> {
        self.doc.folders.get(&path_key(path)).cloned()
    }

    fn upsert_folder_record(&mut self, record: FolderRecord) -> SafeResult<()> {
        self.mutate(|doc| {
            doc.upsert(record);
            Ok(())
        })
    }

    fn clear_key_fields(&mut self, path: &Path) -> SafeResult<()> {
        self.mutate(|doc| doc.clear_key_fields(path))
    }

    fn move_folder_record(&mut self, from: &Path, record: FolderRecord) -> SafeResult<()> {
        self.mutate(|doc| {
            doc.move_record(from, record);
            Ok(())
        })
    }

    fn remove_folder_record(&mut self, path: &Path) -> SafeResult<Option<FolderRecord>> {
        self.mutate(|doc| Ok(doc.folders.remove(&path_key(path))))
    }

    fn list_folder_records(&self) -> Vec<FolderRecord> {
        self.doc.folders.values().cloned().collect()
    }

    fn master_credential(&self) -> Option<MasterCredential> {
        self.doc.master.clone()
    }

    fn set_master_credential(&mut self, credential: MasterCredential) -> SafeResult<()> {
        self.mutate(|doc| {
            doc.master = Some(credential);
            Ok(())
        })
    }

    fn lockout(&self) -> LockoutRecord {
        self.doc.lockout
    }

    fn set_lockout(&mut self, lockout: LockoutRecord) -> SafeResult<()> {
        self.mutate(|doc| {
            doc.lockout = lockout;
            Ok(())
        })
    }

    fn commit_rekey(
        &mut self,
        credential: MasterCredential,
        rewrap: &mut RewrapFn<'_>,
    ) -> SafeResult<()> {
        self.mutate(|doc| doc.rekey(credential, rewrap))
    }
}

/// In-memory store for embedding and tests.
#[derive(Default)]
pub struct MemoryMetadataStore {
    doc: MetadataDocument,
}

impl MemoryMetadataStore {
    fn mutate<R>(
        &mut self,
        change: impl FnOnce(&mut MetadataDocument) -> SafeResult<R>,
    ) -> SafeResult<R> {
        let mut next = self.doc.clone();
        let out = change(&mut next)?;
        self.doc = next;
        Ok(out)
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn get_folder_record(&self, path: &Path) -> Option<FolderRecord> {
        self.doc.folders.get(&path_key(path)).cloned()
    }

    fn upsert_folder_record(&mut self, record: FolderRecord) -> SafeResult<()> {
        self.doc.upsert(record);
        Ok(())
    }

    fn clear_key_fields(&mut self, path: &Path) -> SafeResult<()> {
        self.doc.clear_key_fields(path)
    }

    fn move_folder_record(&mut self, from: &Path, record: FolderRecord) -> SafeResult<()> {
        self.doc.move_record(from, record);
        Ok(())
    }

    fn remove_folder_record(&mut self, path: &Path) -> SafeResult<Option<FolderRecord>> {
        Ok(self.doc.folders.remove(&path_key(path)))
    }

    fn list_folder_records(&self) -> Vec<FolderRecord> {
        self.doc.folders.values().cloned().collect()
    }

    fn master_credential(&self) -> Option<MasterCredential> {
        self.doc.master.clone()
    }

    fn set_master_credential(&mut self, credential: MasterCredential) -> SafeResult<()> {
        self.doc.master = Some(credential);
        Ok(())
    }

    fn lockout(&self) -> LockoutRecord {
        self.doc.lockout
    }

    fn set_lockout(&mut self, lockout: LockoutRecord) -> SafeResult<()> {
        self.doc.lockout = lockout;
        Ok(())
    }

    fn commit_rekey(
        &mut self,
        credential: MasterCredential,
        rewrap: &mut RewrapFn<'_>,
    ) -> SafeResult<()> {
        self.mutate(|doc| doc.rekey(credential, rewrap))
    }
}

fn decode_document(
    cipher: &FileCipher,
    key: Option<&StoreKey>,
    bytes: &[u8],
    path: &Path,
) -> SafeResult<MetadataDocument> {
    let json = match (bytes.strip_prefix(ENCRYPTED_MAGIC.as_slice()), key) {
        (Some(envelope), Some(key)) => cipher
            .open_bytes(key.as_bytes(), envelope)
            .map_err(|_| SafeError::CorruptOrWrongContext)?
            .to_vec(),
        (Some(_), None) => {
            return Err(SafeError::Config(format!(
                "{} is encrypted but no store key is configured",
                path.display()
            )))
        }
        // Plaintext documents are accepted and re-encrypted on next write
        (None, _) => bytes.to_vec(),
    };
    serde_json::from_slice(&json)
        .map_err(|e| SafeError::Other(anyhow::anyhow!("parsing {}: {e}", path.display())))
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(unix)]
fn owner_only() -> Option<std::fs::Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn owner_only() -> Option<std::fs::Permissions> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use safefold_core::WrappedKeyMaterial;

    fn material() -> WrappedKeyMaterial {
        WrappedKeyMaterial {
            wrapped_fek: vec![1; 48],
            salt: vec![2; 32],
            iv: vec![3; 12],
        }
    }

    #[test]
    fn test_open_nonexistent() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonMetadataStore::open(&dir.path().join("meta.json"), None).unwrap();
        assert!(store.list_folder_records().is_empty());
        assert!(store.master_credential().is_none());
    }

    #[test]
    fn test_upsert_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");

        {
            let mut store = JsonMetadataStore::open(&path, None).unwrap();
            let mut rec = FolderRecord::new(Path::new("/data/F"));
            rec.set_key_material(material());
            store.upsert_folder_record(rec).unwrap();
        }

        let store = JsonMetadataStore::open(&path, None).unwrap();
        let rec = store.get_folder_record(Path::new("/data/F")).unwrap();
        assert_eq!(rec.protection_mode, ProtectionMode::Encrypted);
        assert_eq!(rec.key_material(), Some(material()));
    }

    #[test]
    fn test_clear_key_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");
        let mut store = JsonMetadataStore::open(&path, None).unwrap();
        let mut rec = FolderRecord::new(Path::new("/data/F"));
        rec.set_key_material(material());
        store.upsert_folder_record(rec).unwrap();

        store.clear_key_fields(Path::new("/data/F")).unwrap();
        let rec = store.get_folder_record(Path::new("/data/F")).unwrap();
        assert_eq!(rec.protection_mode, ProtectionMode::Normal);
        assert!(rec.is_consistent());

        let err = store.clear_key_fields(Path::new("/nope")).unwrap_err();
        assert!(matches!(err, SafeError::NotFound(_)));
    }

    #[test]
    fn test_move_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonMetadataStore::open(&dir.path().join("m.json"), None).unwrap();
        let rec = FolderRecord::new(Path::new("/data/MyDocs"));
        store.upsert_folder_record(rec.clone()).unwrap();

        let mut moved = rec;
        moved.path = PathBuf::from("/data/\u{200B}abc");
        moved.protection_mode = ProtectionMode::QuickLocked;
        store
            .move_folder_record(Path::new("/data/MyDocs"), moved)
            .unwrap();

        assert!(store.get_folder_record(Path::new("/data/MyDocs")).is_none());
        let rec = store.get_folder_record(Path::new("/data/\u{200B}abc")).unwrap();
        assert_eq!(rec.display_name, "MyDocs");
    }

    #[test]
    fn test_encrypted_at_rest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");
        let key = [7u8; 32];

        {
            let mut store =
                JsonMetadataStore::open(&path, Some(StoreKey::from_bytes(key))).unwrap();
            store
                .upsert_folder_record(FolderRecord::new(Path::new("/data/Secret Project")))
                .unwrap();
        }

        let raw = std::fs::read(&path).unwrap();
        assert!(raw.starts_with(b"SFM1"));
        assert!(!String::from_utf8_lossy(&raw).contains("Secret Project"));

        let store = JsonMetadataStore::open(&path, Some(StoreKey::from_bytes(key))).unwrap();
        assert_eq!(store.list_folder_records().len(), 1);

        let err = JsonMetadataStore::open(&path, Some(StoreKey::from_bytes([8u8; 32])))
            .err()
            .unwrap();
        assert!(matches!(err, SafeError::CorruptOrWrongContext));

        let err = JsonMetadataStore::open(&path, None).err().unwrap();
        assert!(matches!(err, SafeError::Config(_)));
    }

    #[test]
    fn test_legacy_document_migrated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");
        std::fs::write(
            &path,
            r#"{"folders":{"/data/F":{"path":"/data/F","display_name":"F","created_at":1}}}"#,
        )
        .unwrap();

        let store = JsonMetadataStore::open(&path, None).unwrap();
        let rec = store.get_folder_record(Path::new("/data/F")).unwrap();
        assert_eq!(rec.protection_mode, ProtectionMode::Normal);

        let on_disk: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk["schema_version"], SCHEMA_VERSION);

        // Idempotent
        let again = JsonMetadataStore::open(&path, None).unwrap();
        assert_eq!(again.list_folder_records().len(), 1);
    }

    #[test]
    fn test_commit_rekey_single_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");
        let mut store = JsonMetadataStore::open(&path, None).unwrap();
        let cred = MasterCredential {
            hash: vec![1; 64],
            salt: vec![2; 32],
            iterations: 1000,
        };
        store.set_master_credential(cred.clone()).unwrap();

        let mut rec = FolderRecord::new(Path::new("/data/F"));
        rec.set_key_material(material());
        store.upsert_folder_record(rec).unwrap();
        store
            .upsert_folder_record(FolderRecord::new(Path::new("/data/Plain")))
            .unwrap();

        let new_cred = MasterCredential {
            hash: vec![9; 64],
            ..cred
        };
        let mut seen = Vec::new();
        store
            .commit_rekey(new_cred.clone(), &mut |mut rec| {
                seen.push(rec.path.clone());
                let mut m = rec.key_material().unwrap();
                m.wrapped_fek = vec![5; 48];
                rec.set_key_material(m);
                Ok(rec)
            })
            .unwrap();
        assert_eq!(seen, vec![PathBuf::from("/data/F")]);

        let reopened = JsonMetadataStore::open(&path, None).unwrap();
        assert_eq!(reopened.master_credential(), Some(new_cred));
        let material = reopened
            .get_folder_record(Path::new("/data/F"))
            .unwrap()
            .key_material()
            .unwrap();
        assert_eq!(material.wrapped_fek, vec![5; 48]);
    }

    #[test]
    fn test_commit_rekey_failure_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");
        let mut store = JsonMetadataStore::open(&path, None).unwrap();
        let cred = MasterCredential {
            hash: vec![1; 64],
            salt: vec![2; 32],
            iterations: 1000,
        };
        store.set_master_credential(cred.clone()).unwrap();
        for name in ["/data/A", "/data/B"] {
            let mut rec = FolderRecord::new(Path::new(name));
            rec.set_key_material(material());
            store.upsert_folder_record(rec).unwrap();
        }

        let new_cred = MasterCredential {
            hash: vec![9; 64],
            ..cred.clone()
        };
        let mut calls = 0;
        let err = store
            .commit_rekey(new_cred, &mut |mut rec| {
                calls += 1;
                if calls == 2 {
                    return Err(SafeError::WrongPassword);
                }
                let mut m = rec.key_material().unwrap();
                m.wrapped_fek = vec![5; 48];
                rec.set_key_material(m);
                Ok(rec)
            })
            .unwrap_err();
        assert!(matches!(err, SafeError::WrongPassword));

        for check in [&store, &JsonMetadataStore::open(&path, None).unwrap()] {
            assert_eq!(check.master_credential(), Some(cred.clone()));
            for rec in check.list_folder_records() {
                assert_eq!(rec.key_material(), Some(material()));
            }
        }
    }

    #[test]
    fn test_two_stores_on_one_file_keep_both_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");
        let key = [7u8; 32];
        let mut a = JsonMetadataStore::open(&path, Some(StoreKey::from_bytes(key))).unwrap();
        let mut b = JsonMetadataStore::open(&path, Some(StoreKey::from_bytes(key))).unwrap();

        let mut first = FolderRecord::new(Path::new("/data/F1"));
        first.set_key_material(material());
        a.upsert_folder_record(first).unwrap();

        // b opened before a wrote; its write must not drop F1's key
        let mut second = FolderRecord::new(Path::new("/data/F2"));
        second.set_key_material(material());
        b.upsert_folder_record(second).unwrap();
        assert!(b.get_folder_record(Path::new("/data/F1")).is_some());

        let reopened = JsonMetadataStore::open(&path, Some(StoreKey::from_bytes(key))).unwrap();
        assert_eq!(reopened.list_folder_records().len(), 2);
        assert_eq!(
            reopened
                .get_folder_record(Path::new("/data/F1"))
                .unwrap()
                .key_material(),
            Some(material())
        );
    }

    #[test]
    fn test_concurrent_writers_lose_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");
        JsonMetadataStore::open(&path, None).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let mut store = JsonMetadataStore::open(&path, None).unwrap();
                    for i in 0..5 {
                        let name = format!("/data/t{t}_{i}");
                        store
                            .upsert_folder_record(FolderRecord::new(Path::new(&name)))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let store = JsonMetadataStore::open(&path, None).unwrap();
        assert_eq!(store.list_folder_records().len(), 20);
    }

    #[test]
    fn test_failed_write_keeps_cached_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");
        let mut store = JsonMetadataStore::open(&path, None).unwrap();
        store
            .upsert_folder_record(FolderRecord::new(Path::new("/data/F")))
            .unwrap();

        // A directory in place of the document makes the next read fail
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        let mut moved = FolderRecord::new(Path::new("/data/\u{200B}x"));
        moved.protection_mode = ProtectionMode::QuickLocked;
        assert!(store
            .move_folder_record(Path::new("/data/F"), moved)
            .is_err());
        assert!(store
            .upsert_folder_record(FolderRecord::new(Path::new("/data/G")))
            .is_err());

        let records = store.list_folder_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path, PathBuf::from("/data/F"));
        assert_eq!(records[0].protection_mode, ProtectionMode::Normal);
    }

    #[test]
    fn test_lockout_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");
        {
            let mut store = JsonMetadataStore::open(&path, None).unwrap();
            assert_eq!(store.lockout(), LockoutRecord::default());
            store
                .set_lockout(LockoutRecord {
                    failed_attempts: 4,
                    last_failure_ms: Some(1_700_000_000_000),
                })
                .unwrap();
        }
        let store = JsonMetadataStore::open(&path, None).unwrap();
        assert_eq!(store.lockout().failed_attempts, 4);
        assert_eq!(store.lockout().last_failure_ms, Some(1_700_000_000_000));
    }

    #[test]
    fn test_memory_store_behaves_like_json() {
        let mut store = MemoryMetadataStore::default();
        let mut rec = FolderRecord::new(Path::new("/m/F"));
        rec.set_key_material(material());
        store.upsert_folder_record(rec).unwrap();
        store.clear_key_fields(Path::new("/m/F")).unwrap();
        assert!(store
            .get_folder_record(Path::new("/m/F"))
            .unwrap()
            .is_consistent());
        assert!(store.remove_folder_record(Path::new("/m/F")).unwrap().is_some());
    }
}
