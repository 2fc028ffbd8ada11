// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! AEAD cipher for OAuth tokens at rest.
//!
//! The actual cipher key is derived from the configured master key with
//! HKDF-SHA256, so the environment variable never touches the ciphertext
//! directly. Ciphertext layout is `base64(nonce || ciphertext || tag)` with a
//! fresh random nonce per encryption. The associated data binds a ciphertext
//! to its owning user, so tokens cannot be swapped between account rows.
//!
//! The cipher is constructed once at startup from [`crate::config::Config`]
//! and handed to the services that need it; there is no global key.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hkdf::Hkdf;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, CHACHA20_POLY1305, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::Sha256;
use std::sync::Arc;

use crate::error::AppError;

/// HKDF info label; versioned so a future key schedule can coexist.
const KEY_CONTEXT: &[u8] = b"tandem.token-cipher.v1";

/// Token encryption service.
#[derive(Clone)]
pub struct TokenCipher {
    key: Arc<LessSafeKey>,
    rng: SystemRandom,
}

impl TokenCipher {
    /// Derive the cipher from master key material.
    pub fn new(master_key: &[u8]) -> Result<Self, AppError> {
        let hk = Hkdf::<Sha256>::new(None, master_key);
        let mut derived = [0u8; 32];
        hk.expand(KEY_CONTEXT, &mut derived)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Key derivation failed: {}", e)))?;

        let unbound = UnboundKey::new(&CHACHA20_POLY1305, &derived)
            .map_err(|_| AppError::Internal(anyhow::anyhow!("Cipher key rejected")))?;

        Ok(Self {
            key: Arc::new(LessSafeKey::new(unbound)),
            rng: SystemRandom::new(),
        })
    }

    /// Encrypt plaintext bound to `aad`. Returns base64(nonce || ciphertext).
    pub fn encrypt(&self, plaintext: &str, aad: &[u8]) -> Result<String, AppError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| AppError::Internal(anyhow::anyhow!("Nonce generation failed")))?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(nonce, Aad::from(aad), &mut in_out)
            .map_err(|_| AppError::Internal(anyhow::anyhow!("Encryption failed")))?;

        let mut wire = Vec::with_capacity(NONCE_LEN + in_out.len());
        wire.extend_from_slice(&nonce_bytes);
        wire.extend_from_slice(&in_out);
        Ok(BASE64.encode(wire))
    }

    /// Decrypt a stored token.
    ///
    /// Any failure (corrupt base64, truncated data, wrong key, wrong aad,
    /// tampered ciphertext) surfaces as [`AppError::DecryptionFailed`];
    /// ciphertext is never passed through as if it were plaintext.
    pub fn decrypt(&self, ciphertext_b64: &str, aad: &[u8]) -> Result<String, AppError> {
        let wire = BASE64
            .decode(ciphertext_b64)
            .map_err(|_| AppError::DecryptionFailed)?;
        if wire.len() < NONCE_LEN + CHACHA20_POLY1305.tag_len() {
            return Err(AppError::DecryptionFailed);
        }

        let (nonce_bytes, sealed) = wire.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| AppError::DecryptionFailed)?;

        let mut in_out = sealed.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::from(aad), &mut in_out)
            .map_err(|_| AppError::DecryptionFailed)?;

        String::from_utf8(plaintext.to_vec()).map_err(|_| AppError::DecryptionFailed)
    }
}

/// Encrypt an access/refresh token pair before storing.
pub fn encrypt_tokens(
    cipher: &TokenCipher,
    access_token: &str,
    refresh_token: Option<&str>,
    user_id: i64,
) -> Result<(String, Option<String>), AppError> {
    let aad = user_id.to_string();
    let encrypted_access = cipher.encrypt(access_token, aad.as_bytes())?;
    let encrypted_refresh = refresh_token
        .map(|t| cipher.encrypt(t, aad.as_bytes()))
        .transpose()?;
    Ok((encrypted_access, encrypted_refresh))
}
