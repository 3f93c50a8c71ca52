//! AES-256-GCM encryption of exactly one block payload.
//!
//! Every 4096-byte page on disk is the sealed form of one 4068-byte block
//! plaintext.  The framing is fixed:
//!
//! ```text
//! [ nonce (12 B) | ciphertext (4052 B) | GCM tag (16 B) ]  = 4096 B
//! ```
//!
//! A fresh random nonce is generated for every seal; nothing about the page
//! is reused between writes.  Decryption fails hard when the tag does not
//! verify — there is no partial read of an unauthenticated page.
//!
//! The engine is keyed by a caller-supplied 32-byte secret.  Password
//! handling and key derivation live outside the engine; it never sees a
//! password.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::Aes256Gcm;

use crate::error::{Error, Result};

/// Sealed page size on disk.
pub const PAGE_SIZE: usize = 4096;

/// Byte length of the nonce prepended to every page.
pub const NONCE_LEN: usize = 12;

/// Byte length of the GCM authentication tag trailing every page.
pub const TAG_LEN: usize = 16;

/// Block plaintext size: one page minus the AEAD framing overhead.
pub const BLOCK_SIZE: usize = PAGE_SIZE - NONCE_LEN - TAG_LEN;

/// Authenticated page cipher keyed by a 32-byte secret.
pub struct SecretBox {
    cipher: Aes256Gcm,
}

impl SecretBox {
    pub fn new(secret: &[u8; 32]) -> Self {
        let cipher = Aes256Gcm::new(secret.into());
        Self { cipher }
    }

    /// Seal one block plaintext into a page.  Uses a fresh random nonce.
    pub fn encrypt(&self, plain: &[u8; BLOCK_SIZE]) -> Result<[u8; PAGE_SIZE]> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plain.as_slice())
            .map_err(|_| Error::Auth)?;

        let mut page = [0u8; PAGE_SIZE];
        page[..NONCE_LEN].copy_from_slice(nonce.as_slice());
        page[NONCE_LEN..].copy_from_slice(&sealed);
        Ok(page)
    }

    /// Open one page back into a block plaintext.
    ///
    /// Returns [`Error::Auth`] when the GCM tag does not verify — a wrong
    /// secret and a corrupted page are indistinguishable here by design of
    /// the AEAD.
    pub fn decrypt(&self, page: &[u8; PAGE_SIZE]) -> Result<[u8; BLOCK_SIZE]> {
        let nonce = aes_gcm::Nonce::from_slice(&page[..NONCE_LEN]);
        let plain = self
            .cipher
            .decrypt(nonce, &page[NONCE_LEN..])
            .map_err(|_| Error::Auth)?;

        let mut block = [0u8; BLOCK_SIZE];
        block.copy_from_slice(&plain);
        Ok(block)
    }
}
