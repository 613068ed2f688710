//! The metadata store key: random, generated once, kept on disk only in
//! sealed form.

use std::path::Path;

use safefold_core::{write_atomic, SafeError, SafeResult};
use safefold_crypto::{random_key_bytes, StoreKey};

use crate::seal::SecretStore;

/// Load the sealed store key at `path`, generating and sealing a new one if
/// the file does not exist yet.
pub fn get_or_create_store_key(secrets: &SecretStore, path: &Path) -> SafeResult<StoreKey> {
    match std::fs::read_to_string(path) {
        Ok(blob) => {
            let bytes = secrets.unseal(&blob)?;
            StoreKey::from_slice(&bytes).map_err(|_| SafeError::CorruptOrWrongContext)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| SafeError::from_io(parent, e))?;
            }
            let bytes = random_key_bytes();
            let blob = secrets.seal(bytes.as_ref())?;
            write_atomic(path, blob.as_bytes(), None)?;
            tracing::info!(path = %path.display(), "generated sealed store key");
            Ok(StoreKey::from_bytes(*bytes))
        }
        Err(e) => Err(SafeError::from_io(path, e)),
    }
}
