//! Sealing of small secrets under the per-user machine key.
//!
//! Blob format (base64 of):
//! ```text
//! [1 byte: version = 1][12 bytes: nonce][N bytes: ciphertext][16 bytes: tag]
//! AAD = context tag
//! ```
//!
//! A blob only opens with the same machine key and the same context tag.
//! Blobs do not move between machines or user accounts.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use safefold_core::{SafeError, SafeResult};
use safefold_crypto::{random_nonce, AeadCipher, Aes256GcmCipher, MachineKey, NONCE_SIZE, TAG_SIZE};
use zeroize::Zeroizing;

use crate::keychain::MachineKeySource;

const BLOB_VERSION: u8 = 1;
const HEADER_LEN: usize = 1 + NONCE_SIZE;

pub struct SecretStore {
    key: MachineKey,
    context: Vec<u8>,
    cipher: Arc<dyn AeadCipher>,
}

impl SecretStore {
    /// Open the store, creating the machine key if the source has none yet.
    pub fn open(source: &dyn MachineKeySource, context_tag: &str) -> SafeResult<Self> {
        let key = source.load_or_create()?;
        tracing::debug!(source = source.name(), "secret store opened");
        Ok(Self::with_key(key, context_tag))
    }

    pub fn with_key(key: MachineKey, context_tag: &str) -> Self {
        Self {
            key,
            context: context_tag.as_bytes().to_vec(),
            cipher: Arc::new(Aes256GcmCipher),
        }
    }

    pub fn seal(&self, plaintext: &[u8]) -> SafeResult<String> {
        let nonce = random_nonce();
        let (ct, tag) = self
            .cipher
            .encrypt(self.key.as_bytes(), &nonce, &self.context, plaintext)
            .map_err(|e| SafeError::Other(anyhow::anyhow!("sealing failed: {e}")))?;

        let mut blob = Vec::with_capacity(HEADER_LEN + ct.len() + TAG_SIZE);
        blob.push(BLOB_VERSION);
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ct);
        blob.extend_from_slice(&tag);
        Ok(STANDARD.encode(blob))
    }

    pub fn unseal(&self, blob: &str) -> SafeResult<Zeroizing<Vec<u8>>> {
        let raw = STANDARD
            .decode(blob.trim())
            .map_err(|_| SafeError::CorruptOrWrongContext)?;
        if raw.len() < HEADER_LEN + TAG_SIZE || raw[0] != BLOB_VERSION {
            return Err(SafeError::CorruptOrWrongContext);
        }

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&raw[1..HEADER_LEN]);
        let body = &raw[HEADER_LEN..];
        let (ct, tag_bytes) = body.split_at(body.len() - TAG_SIZE);
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(tag_bytes);

        self.cipher
            .decrypt(self.key.as_bytes(), &nonce, &self.context, ct, &tag)
            .map(Zeroizing::new)
            .map_err(|_| SafeError::CorruptOrWrongContext)
    }

    pub fn seal_str(&self, plaintext: &str) -> SafeResult<String> {
        self.seal(plaintext.as_bytes())
    }

    /// Unseal a blob holding UTF-8 text.
    pub fn unseal_string(&self, blob: &str) -> SafeResult<String> {
        let bytes = self.unseal(blob)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| SafeError::CorruptOrWrongContext)
    }
}

impl std::fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretStore")
            .field("context", &String::from_utf8_lossy(&self.context))
            .finish_non_exhaustive()
    }
}
