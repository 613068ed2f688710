//! safefold-crypto: folder content encryption and master password handling
//!
//! Key hierarchy:
//! ```text
//! Master password
//!   ├── Verification hash: PBKDF2-HMAC-SHA256(salt, auth_iterations) → 64 bytes
//!   └── KEK per folder:   PBKDF2-HMAC-SHA256(folder salt, kek_iterations) → 32 bytes
//!         └── FEK (random 256-bit, wrapped by KEK with AES-256-GCM)
//!               └── File envelope: AES-256-GCM(nonce=random 96-bit) per file
//! ```

pub mod aead;
pub mod auth;
pub mod envelope;
pub mod file_cipher;
pub mod kdf;
pub mod keys;

pub use aead::{AeadCipher, Aes256GcmCipher, AuthFailure};
pub use auth::{LockoutPolicy, PasswordAuthenticator};
pub use envelope::EnvelopeKeyManager;
pub use file_cipher::FileCipher;
pub use kdf::{derive, derive_kek, KdfParams};
pub use keys::{
    generate_file_key, random_key_bytes, random_nonce, random_salt, FileKey, Kek, MachineKey,
    StoreKey,
};

/// Size of an AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Smallest valid file envelope: nonce plus tag around an empty ciphertext
pub const ENVELOPE_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;
