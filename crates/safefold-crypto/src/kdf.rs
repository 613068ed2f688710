//! Key derivation: PBKDF2-HMAC-SHA256 password → key bytes

use safefold_core::config::{CryptoConfig, MIN_SALT_LEN};
use safefold_core::{SafeError, SafeResult};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::keys::Kek;
use crate::KEY_SIZE;

/// Largest output accepted from [`derive`]
pub const MAX_OUTPUT_LEN: usize = 64;

/// PBKDF2 parameters for the two uses of the KDF
#[derive(Debug, Clone)]
pub struct KdfParams {
    /// Iterations for folder key-encryption keys
    pub kek_iterations: u32,
    /// Iterations for master password verification hashes
    pub auth_iterations: u32,
    /// Length of freshly generated salts
    pub salt_len: usize,
    /// Length of master password verification hashes
    pub auth_hash_len: usize,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::from(&CryptoConfig::default())
    }
}

impl From<&CryptoConfig> for KdfParams {
    fn from(c: &CryptoConfig) -> Self {
        Self {
            kek_iterations: c.kek_iterations,
            auth_iterations: c.auth_iterations,
            salt_len: c.salt_len,
            auth_hash_len: c.auth_hash_len,
        }
    }
}

/// Derive `out_len` bytes from `password` and `salt`.
///
/// Deterministic for identical inputs. Fails on a zero iteration count, a
/// salt shorter than 16 bytes, or an output length outside `1..=64`.
pub fn derive(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
    out_len: usize,
) -> SafeResult<Zeroizing<Vec<u8>>> {
    if iterations == 0 {
        return Err(SafeError::InvalidInput("KDF iteration count must be positive".into()));
    }
    if salt.len() < MIN_SALT_LEN {
        return Err(SafeError::InvalidInput(format!(
            "KDF salt too short: {} bytes (minimum {MIN_SALT_LEN})",
            salt.len()
        )));
    }
    if out_len == 0 || out_len > MAX_OUTPUT_LEN {
        return Err(SafeError::InvalidInput(format!(
            "KDF output length {out_len} out of range 1..={MAX_OUTPUT_LEN}"
        )));
    }

    let mut out = Zeroizing::new(vec![0u8; out_len]);
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut out);
    Ok(out)
}

/// Derive a 256-bit key-encryption key from the master password.
pub fn derive_kek(password: &SecretString, salt: &[u8], iterations: u32) -> SafeResult<Kek> {
    let bytes = derive(password.expose_secret().as_bytes(), salt, iterations, KEY_SIZE)?;
    Kek::from_slice(&bytes)
}
