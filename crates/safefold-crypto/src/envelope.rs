//! Envelope key management: per-folder FEK wrapped under a password-derived KEK.
//!
//! ```text
//! master password ──PBKDF2(salt, kek_iterations)──▶ KEK (transient)
//! KEK ──AES-256-GCM(iv)──▶ wrapped_fek = ciphertext(32) || tag(16)
//! persisted: { wrapped_fek, salt, iv }
//! ```
//!
//! An unwrap failure is reported as `WrongPassword` whether the password is
//! wrong or the stored material was modified.

use std::path::Path;
use std::sync::Arc;

use safefold_core::{FolderRecord, SafeError, SafeResult, WrappedKeyMaterial};
use secrecy::SecretString;
use tracing::debug;
use zeroize::Zeroizing;

use crate::aead::{AeadCipher, Aes256GcmCipher};
use crate::kdf::{derive_kek, KdfParams};
use crate::keys::{generate_file_key, random_nonce, random_salt, FileKey};
use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// Size of a wrapped FEK: key ciphertext plus tag
pub const WRAPPED_KEY_SIZE: usize = KEY_SIZE + TAG_SIZE;

pub struct EnvelopeKeyManager {
    params: KdfParams,
    cipher: Arc<dyn AeadCipher>,
}

impl EnvelopeKeyManager {
    pub fn new(params: KdfParams) -> Self {
        Self::with_cipher(params, Arc::new(Aes256GcmCipher))
    }

    pub fn with_cipher(params: KdfParams, cipher: Arc<dyn AeadCipher>) -> Self {
        Self { params, cipher }
    }

    /// Generate a fresh FEK for `folder` and wrap it under `password`.
    ///
    /// Returns the in-memory FEK handle (zeroized on drop) together with the
    /// material to persist.
    pub fn protect_folder(
        &self,
        folder: &Path,
        password: &SecretString,
    ) -> SafeResult<(FileKey, WrappedKeyMaterial)> {
        let fek = generate_file_key();
        let material = self.wrap(&fek, password)?;
        debug!(folder = %folder.display(), "generated and wrapped folder key");
        Ok((fek, material))
    }

    /// Recover the FEK from stored material.
    pub fn unwrap_folder_key(
        &self,
        folder: &Path,
        password: &SecretString,
        material: &WrappedKeyMaterial,
    ) -> SafeResult<FileKey> {
        // Malformed material is indistinguishable from a wrong password
        if material.wrapped_fek.len() != WRAPPED_KEY_SIZE || material.iv.len() != NONCE_SIZE {
            debug!(folder = %folder.display(), "stored key material has unexpected shape");
            return Err(SafeError::WrongPassword);
        }
        let kek = match derive_kek(password, &material.salt, self.params.kek_iterations) {
            Ok(k) => k,
            Err(SafeError::InvalidInput(_)) => return Err(SafeError::WrongPassword),
            Err(e) => return Err(e),
        };

        let (ct, tag) = material.wrapped_fek.split_at(KEY_SIZE);
        let mut iv = [0u8; NONCE_SIZE];
        iv.copy_from_slice(&material.iv);
        let mut tag_bytes = [0u8; TAG_SIZE];
        tag_bytes.copy_from_slice(tag);

        let plain = self
            .cipher
            .decrypt(kek.as_bytes(), &iv, &[], ct, &tag_bytes)
            .map(Zeroizing::new)
            .map_err(|_| SafeError::WrongPassword)?;
        drop(kek);

        FileKey::from_slice(&plain).map_err(|_| SafeError::WrongPassword)
    }

    /// Unwrap the FEK recorded for `record`; `NoKeyMaterial` if none is stored.
    pub fn unwrap_record_key(
        &self,
        record: &FolderRecord,
        password: &SecretString,
    ) -> SafeResult<FileKey> {
        let material = record
            .key_material()
            .ok_or_else(|| SafeError::NoKeyMaterial(record.path.clone()))?;
        self.unwrap_folder_key(&record.path, password, &material)
    }

    /// Re-wrap an existing FEK under a new password with fresh salt and IV.
    /// The file contents do not change.
    pub fn rewrap_folder_key(
        &self,
        folder: &Path,
        old_password: &SecretString,
        new_password: &SecretString,
        material: &WrappedKeyMaterial,
    ) -> SafeResult<WrappedKeyMaterial> {
        let fek = self.unwrap_folder_key(folder, old_password, material)?;
        let rewrapped = self.wrap(&fek, new_password)?;
        debug!(folder = %folder.display(), "re-wrapped folder key");
        Ok(rewrapped)
    }

    fn wrap(&self, fek: &FileKey, password: &SecretString) -> SafeResult<WrappedKeyMaterial> {
        let salt = random_salt(self.params.salt_len);
        let iv = random_nonce();
        let kek = derive_kek(password, &salt, self.params.kek_iterations)?;

        let (mut wrapped, tag) = self
            .cipher
            .encrypt(kek.as_bytes(), &iv, &[], fek.as_bytes())
            .map_err(|e| SafeError::Other(anyhow::anyhow!("key wrapping failed: {e}")))?;
        drop(kek);

        wrapped.extend_from_slice(&tag);
        Ok(WrappedKeyMaterial {
            wrapped_fek: wrapped,
            salt,
            iv: iv.to_vec(),
        })
    }
}
