// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! External provider account models.
//!
//! Token columns hold AEAD ciphertext (base64), never plaintext. Decryption
//! happens in the sync service just before a provider call.

/// A linked external calendar account (one per user and provider).
#[derive(Debug, Clone)]
pub struct ExternalAccount {
    pub id: i64,
    pub user_id: i64,
    /// Provider name, e.g. "google"
    pub provider: String,
    /// Provider-side account identity (email)
    pub provider_account_id: String,
    /// Encrypted access token (base64 of nonce || ciphertext)
    pub access_token_encrypted: String,
    /// Encrypted refresh token; absent when Google withheld one
    pub refresh_token_encrypted: Option<String>,
    /// When the access token expires (unix seconds)
    pub token_expires_at: i64,
    /// Granted OAuth scopes (space separated)
    pub scope: String,
    /// Set when the provider rejected our refresh token; terminal until
    /// the user reconnects
    pub revoked_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ExternalAccount {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

/// Fields for inserting or replacing an account after an OAuth exchange.
#[derive(Debug, Clone)]
pub struct NewExternalAccount {
    pub user_id: i64,
    pub provider: String,
    pub provider_account_id: String,
    pub access_token_encrypted: String,
    /// `None` keeps any previously stored refresh token
    pub refresh_token_encrypted: Option<String>,
    pub token_expires_at: i64,
    pub scope: String,
}

/// Per-account sync bookkeeping.
#[derive(Debug, Clone)]
pub struct SyncState {
    pub external_account_id: i64,
    /// Last successful sync (unix seconds)
    pub last_synced_at: Option<i64>,
    /// Error message of the most recent failed attempt, cleared on success
    pub last_sync_error: Option<String>,
}

/// Result of a completed free/busy sync.
#[derive(Debug, Clone, Copy)]
pub struct SyncSummary {
    /// Number of availability blocks stored after dedup
    pub blocks_count: u32,
    /// When the sync ran (unix seconds)
    pub synced_at: i64,
}
