//! Key types and randomness: per-folder FEK, password-derived KEK, salts and nonces

use rand::RngCore;
use safefold_core::{SafeError, SafeResult};
use zeroize::Zeroize;

use crate::{KEY_SIZE, NONCE_SIZE};

macro_rules! secret_key {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        pub struct $name {
            bytes: [u8; KEY_SIZE],
        }

        impl $name {
            pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
                Self { bytes }
            }

            /// Copy from a slice, rejecting anything but exactly 32 bytes.
            pub fn from_slice(slice: &[u8]) -> SafeResult<Self> {
                if slice.len() != KEY_SIZE {
                    return Err(SafeError::InvalidInput(format!(
                        "key must be {KEY_SIZE} bytes, got {}",
                        slice.len()
                    )));
                }
                let mut bytes = [0u8; KEY_SIZE];
                bytes.copy_from_slice(slice);
                Ok(Self { bytes })
            }

            pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
                &self.bytes
            }
        }

        impl Drop for $name {
            fn drop(&mut self) {
                self.bytes.zeroize();
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("bytes", &"[REDACTED]")
                    .finish()
            }
        }
    };
}

secret_key!(
    /// A per-folder 256-bit file encryption key. Zeroized on drop.
    ///
    /// Not `Clone`: exactly one plaintext copy exists per operation.
    FileKey
);

secret_key!(
    /// A 256-bit key-encryption key derived from the master password.
    /// Zeroized on drop.
    Kek
);

secret_key!(
    /// Per-user machine key backing the secret store. Zeroized on drop.
    MachineKey
);

secret_key!(
    /// Key encrypting the metadata document at rest. Zeroized on drop.
    StoreKey
);

/// Fresh random 256-bit key bytes.
pub fn random_key_bytes() -> zeroize::Zeroizing<[u8; KEY_SIZE]> {
    let mut bytes = zeroize::Zeroizing::new([0u8; KEY_SIZE]);
    rand::thread_rng().fill_bytes(bytes.as_mut());
    bytes
}

/// Generate a random 256-bit file encryption key.
pub fn generate_file_key() -> FileKey {
    FileKey::from_bytes(*random_key_bytes())
}

/// Fresh random salt of `len` bytes.
pub fn random_salt(len: usize) -> Vec<u8> {
    let mut salt = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Fresh random 96-bit AEAD nonce.
pub fn random_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_key_generation() {
        let k1 = generate_file_key();
        let k2 = generate_file_key();
        assert_ne!(k1.as_bytes(), k2.as_bytes(), "random keys must differ");
    }

    #[test]
    fn test_from_slice_rejects_wrong_length() {
        assert!(FileKey::from_slice(&[0u8; 31]).is_err());
        assert!(Kek::from_slice(&[0u8; 33]).is_err());
        assert!(Kek::from_slice(&[0u8; 32]).is_ok());
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = FileKey::from_bytes([0x41; KEY_SIZE]);
        let dbg = format!("{key:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains("65"), "raw bytes must not be printed");
    }

    #[test]
    fn test_random_salt_length() {
        assert_eq!(random_salt(32).len(), 32);
        assert_ne!(random_salt(32), random_salt(32));
    }

    #[test]
    fn test_random_nonces_differ() {
        assert_ne!(random_nonce(), random_nonce());
    }
}
