//! AEAD cipher boundary.
//!
//! Everything above this module sees an opaque cipher taking a 32-byte key
//! and a 12-byte nonce and producing a ciphertext plus a detached 16-byte
//! tag. [`Aes256GcmCipher`] is the stock implementation; any other
//! [`AeadCipher`] honoring the same contract can be swapped in.

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce, Tag};
use zeroize::Zeroize;

use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// Tag verification failed: wrong key, wrong nonce, wrong AAD, or modified
/// ciphertext. Deliberately carries no detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("AEAD authentication failed")]
pub struct AuthFailure;

pub trait AeadCipher: Send + Sync {
    /// Encrypt `plaintext`, returning the ciphertext (same length) and tag.
    fn encrypt(
        &self,
        key: &[u8; KEY_SIZE],
        nonce: &[u8; NONCE_SIZE],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<(Vec<u8>, [u8; TAG_SIZE]), AuthFailure>;

    /// Verify `tag` and decrypt. Nothing is returned unless the tag checks out.
    fn decrypt(
        &self,
        key: &[u8; KEY_SIZE],
        nonce: &[u8; NONCE_SIZE],
        aad: &[u8],
        ciphertext: &[u8],
        tag: &[u8; TAG_SIZE],
    ) -> Result<Vec<u8>, AuthFailure>;
}

/// AES-256-GCM via the RustCrypto `aes-gcm` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct Aes256GcmCipher;

impl AeadCipher for Aes256GcmCipher {
    fn encrypt(
        &self,
        key: &[u8; KEY_SIZE],
        nonce: &[u8; NONCE_SIZE],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<(Vec<u8>, [u8; TAG_SIZE]), AuthFailure> {
        let cipher = Aes256Gcm::new(key.into());
        let mut buf = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(nonce), aad, &mut buf)
            .map_err(|_| AuthFailure)?;

        let mut out = [0u8; TAG_SIZE];
        out.copy_from_slice(tag.as_slice());
        Ok((buf, out))
    }

    fn decrypt(
        &self,
        key: &[u8; KEY_SIZE],
        nonce: &[u8; NONCE_SIZE],
        aad: &[u8],
        ciphertext: &[u8],
        tag: &[u8; TAG_SIZE],
    ) -> Result<Vec<u8>, AuthFailure> {
        let cipher = Aes256Gcm::new(key.into());
        let mut buf = ciphertext.to_vec();
        match cipher.decrypt_in_place_detached(
            Nonce::from_slice(nonce),
            aad,
            &mut buf,
            Tag::from_slice(tag),
        ) {
            Ok(()) => Ok(buf),
            Err(_) => {
                buf.zeroize();
                Err(AuthFailure)
            }
        }
    }
}
