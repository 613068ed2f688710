//! Whole-file AES-256-GCM with atomic replacement.
//!
//! Envelope format (binary):
//! ```text
//! [12 bytes: random nonce][N bytes: ciphertext][16 bytes: GCM tag]
//! ```
//!
//! The output is first written to a temp sibling of the target and renamed
//! into place, so the target is always either untouched or fully replaced.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use safefold_core::{write_atomic, SafeError, SafeResult};
use tracing::trace;
use zeroize::Zeroizing;

use crate::aead::{AeadCipher, Aes256GcmCipher};
use crate::keys::{random_nonce, FileKey};
use crate::{ENVELOPE_OVERHEAD, KEY_SIZE, NONCE_SIZE, TAG_SIZE};

#[derive(Clone)]
pub struct FileCipher {
    cipher: Arc<dyn AeadCipher>,
}

impl Default for FileCipher {
    fn default() -> Self {
        Self::new(Arc::new(Aes256GcmCipher))
    }
}

impl FileCipher {
    pub fn new(cipher: Arc<dyn AeadCipher>) -> Self {
        Self { cipher }
    }

    /// Encrypt bytes into an envelope with a fresh nonce.
    pub fn seal_bytes(&self, key: &[u8; KEY_SIZE], plaintext: &[u8]) -> SafeResult<Vec<u8>> {
        let nonce = random_nonce();
        let (ct, tag) = self
            .cipher
            .encrypt(key, &nonce, &[], plaintext)
            .map_err(|e| SafeError::Other(anyhow::anyhow!("file encryption failed: {e}")))?;

        let mut envelope = Vec::with_capacity(ENVELOPE_OVERHEAD + ct.len());
        envelope.extend_from_slice(&nonce);
        envelope.extend_from_slice(&ct);
        envelope.extend_from_slice(&tag);
        Ok(envelope)
    }

    /// Open an envelope. Any authentication failure, including a truncated
    /// envelope, is `TamperedOrWrongKey`.
    pub fn open_bytes(
        &self,
        key: &[u8; KEY_SIZE],
        envelope: &[u8],
    ) -> SafeResult<Zeroizing<Vec<u8>>> {
        if envelope.len() < ENVELOPE_OVERHEAD {
            return Err(SafeError::TamperedOrWrongKey);
        }
        let (nonce_bytes, rest) = envelope.split_at(NONCE_SIZE);
        let (ct, tag_bytes) = rest.split_at(rest.len() - TAG_SIZE);

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(nonce_bytes);
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(tag_bytes);

        self.cipher
            .decrypt(key, &nonce, &[], ct, &tag)
            .map(Zeroizing::new)
            .map_err(|_| SafeError::TamperedOrWrongKey)
    }

    /// Encrypt `input` and atomically write the envelope to `output`.
    /// `input` and `output` may be the same path.
    pub fn encrypt_atomic(&self, input: &Path, output: &Path, fek: &FileKey) -> SafeResult<()> {
        let plaintext = Zeroizing::new(fs::read(input).map_err(|e| SafeError::from_io(input, e))?);
        let envelope = self.seal_bytes(fek.as_bytes(), &plaintext)?;
        write_atomic(output, &envelope, source_permissions(input))?;
        trace!(path = %output.display(), bytes = plaintext.len(), "encrypted file");
        Ok(())
    }

    /// Decrypt the envelope at `input` and atomically write the plaintext to
    /// `output`. On authentication failure `output` is not touched.
    pub fn decrypt_atomic(&self, input: &Path, output: &Path, fek: &FileKey) -> SafeResult<()> {
        let envelope = fs::read(input).map_err(|e| SafeError::from_io(input, e))?;
        let plaintext = self.open_bytes(fek.as_bytes(), &envelope)?;
        write_atomic(output, &plaintext, source_permissions(input))?;
        trace!(path = %output.display(), bytes = plaintext.len(), "decrypted file");
        Ok(())
    }

    /// True if the file at `path` is already an envelope sealed under `fek`.
    /// Used to skip files a previous, interrupted encrypt pass finished.
    pub fn is_sealed_with(&self, path: &Path, fek: &FileKey) -> SafeResult<bool> {
        let bytes = fs::read(path).map_err(|e| SafeError::from_io(path, e))?;
        Ok(self.open_bytes(fek.as_bytes(), &bytes).is_ok())
    }
}

fn source_permissions(path: &Path) -> Option<fs::Permissions> {
    fs::metadata(path).ok().map(|m| m.permissions())
}
