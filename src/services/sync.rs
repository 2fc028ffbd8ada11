// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Calendar sync service: token lifecycle, calendar-list mirroring, and the
//! free/busy sync engine.
//!
//! Sync runs only on explicit triggers (OAuth callback, manual "sync now",
//! calendar toggle). There is no background scheduler; the last-known-good
//! availability snapshot stays in place until a sync succeeds.

use crate::db::Db;
use crate::error::AppError;
use crate::models::{CalendarUpsert, ExternalAccount, NewExternalAccount, SyncSummary};
use crate::services::crypto::{self, TokenCipher};
use crate::services::google::{GoogleClient, TokenResponse, OAUTH_SCOPES};
use crate::time_utils;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Provider tag stored on accounts and external availability blocks.
pub const PROVIDER_GOOGLE: &str = "google";

/// Margin before token expiration when we proactively refresh (5 minutes).
const TOKEN_REFRESH_MARGIN_SECS: i64 = 5 * 60;

/// Shared refresh locks type for use in AppState.
pub type RefreshLocks = Arc<DashMap<i64, Arc<Mutex<()>>>>;

/// Outcome of a successful OAuth callback exchange.
#[derive(Debug, Clone)]
pub struct OAuthResult {
    pub account_id: i64,
    /// Provider-side identity, shown in the connection status UI.
    pub email: String,
}

/// High-level calendar service that manages token lifecycle and sync.
///
/// This service encapsulates:
/// - Token decryption and re-encryption around provider calls
/// - Automatic token refresh when expiring (with 5-minute margin)
/// - Per-account locking to prevent duplicate refresh calls
/// - Calendar-list mirroring that never overwrites user selections
/// - Free/busy queries and atomic replacement of the availability snapshot
#[derive(Clone)]
pub struct CalendarSyncService {
    client: GoogleClient,
    db: Db,
    cipher: TokenCipher,
    /// Per-account mutex to serialize token refresh operations.
    refresh_locks: RefreshLocks,
    /// How far ahead free/busy queries look, in weeks.
    sync_horizon_weeks: i64,
}

impl CalendarSyncService {
    /// Create a new sync service.
    ///
    /// The `refresh_locks` map should be shared across all instances so
    /// concurrent requests in one process serialize their refreshes.
    pub fn new(
        client: GoogleClient,
        db: Db,
        cipher: TokenCipher,
        refresh_locks: RefreshLocks,
        sync_horizon_weeks: i64,
    ) -> Self {
        Self {
            client,
            db,
            cipher,
            refresh_locks,
            sync_horizon_weeks,
        }
    }

    // ─── Token Management ────────────────────────────────────────────────────

    /// Get a valid (non-expired) access token for the given account.
    ///
    /// Strategy:
    /// 1. Refuse revoked accounts outright
    /// 2. Fast path: decrypt and return the stored token if not near expiry
    /// 3. Acquire the per-account refresh lock
    /// 4. Re-read the account (another task may have refreshed while waiting)
    /// 5. Refresh with Google, tolerating a lost cross-process refresh race
    /// 6. Encrypt and store the rotated tokens
    ///
    /// A true `invalid_grant` from Google marks the account revoked; every
    /// later call fails with [`AppError::Revoked`] until the user reconnects.
    pub async fn valid_access_token(
        &self,
        account: &ExternalAccount,
    ) -> Result<String, AppError> {
        if account.is_revoked() {
            return Err(AppError::Revoked);
        }

        // ─────────────────────────────────────────────────────────────
        // STEP 1: Fast path - stored token still valid
        // ─────────────────────────────────────────────────────────────
        let now = Utc::now().timestamp();
        if account.token_expires_at > now + TOKEN_REFRESH_MARGIN_SECS {
            return self.decrypt_token(&account.access_token_encrypted, account.user_id);
        }

        // ─────────────────────────────────────────────────────────────
        // STEP 2: Acquire per-account refresh lock
        // ─────────────────────────────────────────────────────────────
        // Only one task per account performs the refresh; others wait
        // here until it completes.
        let lock = self
            .refresh_locks
            .entry(account.id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let _guard = lock.lock().await;

        // ─────────────────────────────────────────────────────────────
        // STEP 3: Re-read after acquiring lock (double-check)
        // ─────────────────────────────────────────────────────────────
        // Another task may have rotated the tokens while we waited.
        let account = self
            .db
            .get_external_account_by_id(account.id)
            .await?
            .ok_or(AppError::NotConnected)?;
        if account.is_revoked() {
            return Err(AppError::Revoked);
        }
        let now = Utc::now().timestamp();
        if account.token_expires_at > now + TOKEN_REFRESH_MARGIN_SECS {
            return self.decrypt_token(&account.access_token_encrypted, account.user_id);
        }

        // ─────────────────────────────────────────────────────────────
        // STEP 4: Decrypt the refresh token
        // ─────────────────────────────────────────────────────────────
        tracing::info!(account_id = account.id, "Access token expired, refreshing");

        let refresh_token_encrypted = match &account.refresh_token_encrypted {
            Some(ciphertext) => ciphertext,
            None => {
                // Google never gave us a refresh token, so there is no way
                // back except re-consent.
                tracing::warn!(
                    account_id = account.id,
                    "No refresh token stored, marking account revoked"
                );
                self.db.mark_account_revoked(account.id, now).await?;
                return Err(AppError::Revoked);
            }
        };
        let refresh_token = self.decrypt_token(refresh_token_encrypted, account.user_id)?;

        // ─────────────────────────────────────────────────────────────
        // STEP 5: Refresh with Google, with cross-process race handling
        // ─────────────────────────────────────────────────────────────
        // If another process already rotated the token, Google rejects our
        // old refresh token with invalid_grant. Re-read before concluding
        // the grant is truly dead.
        let refreshed = match self.client.refresh_token(&refresh_token).await {
            Ok(t) => t,
            Err(ref e) if e.is_invalid_grant() => {
                if let Some(current) = self.db.get_external_account_by_id(account.id).await? {
                    let now = Utc::now().timestamp();
                    if !current.is_revoked()
                        && current.token_expires_at > now + TOKEN_REFRESH_MARGIN_SECS
                    {
                        tracing::info!(
                            account_id = account.id,
                            "Refresh race detected - another process won, using their token"
                        );
                        return self
                            .decrypt_token(&current.access_token_encrypted, current.user_id);
                    }
                }
                tracing::warn!(
                    account_id = account.id,
                    "Refresh token rejected (invalid_grant), marking account revoked"
                );
                self.db
                    .mark_account_revoked(account.id, Utc::now().timestamp())
                    .await?;
                return Err(AppError::Revoked);
            }
            Err(e) => return Err(e),
        };

        // ─────────────────────────────────────────────────────────────
        // STEP 6: Encrypt and store rotated tokens
        // ─────────────────────────────────────────────────────────────
        let expires_at = Utc::now().timestamp() + refreshed.expires_in;
        let (enc_access, enc_refresh) = crypto::encrypt_tokens(
            &self.cipher,
            &refreshed.access_token,
            refreshed.refresh_token.as_deref(),
            account.user_id,
        )?;

        self.db
            .update_account_tokens(account.id, enc_access, enc_refresh, expires_at)
            .await?;

        tracing::info!(account_id = account.id, "Token refreshed and stored");
        Ok(refreshed.access_token)
    }

    fn decrypt_token(&self, ciphertext: &str, user_id: i64) -> Result<String, AppError> {
        self.cipher.decrypt(ciphertext, user_id.to_string().as_bytes())
    }

    // ─── OAuth Callback Handling ─────────────────────────────────────────────

    /// Consent URL for the OAuth redirect.
    pub fn authorize_url(&self, state: &str) -> String {
        self.client.authorize_url(state)
    }

    /// Handle OAuth callback: exchange the code, resolve the Google identity,
    /// and store the account with encrypted tokens.
    ///
    /// Reconnecting an existing account replaces its tokens and clears any
    /// revocation; a token response without a refresh token keeps the one
    /// already stored.
    pub async fn handle_oauth_callback(
        &self,
        user_id: i64,
        code: &str,
    ) -> Result<OAuthResult, AppError> {
        let token_response = self.client.exchange_code(code).await?;

        // The userinfo call pins the provider-side identity so reconnects
        // land on the same account row.
        let userinfo = self.client.get_userinfo(&token_response.access_token).await?;
        let email = userinfo.identity().to_string();

        let account = self.store_account(user_id, &email, &token_response).await?;

        tracing::info!(
            account_id = account.id,
            user_id,
            "OAuth callback handled, account connected"
        );

        Ok(OAuthResult {
            account_id: account.id,
            email,
        })
    }

    async fn store_account(
        &self,
        user_id: i64,
        provider_account_id: &str,
        tokens: &TokenResponse,
    ) -> Result<ExternalAccount, AppError> {
        let (enc_access, enc_refresh) = crypto::encrypt_tokens(
            &self.cipher,
            &tokens.access_token,
            tokens.refresh_token.as_deref(),
            user_id,
        )?;

        self.db
            .upsert_external_account(NewExternalAccount {
                user_id,
                provider: PROVIDER_GOOGLE.to_string(),
                provider_account_id: provider_account_id.to_string(),
                access_token_encrypted: enc_access,
                refresh_token_encrypted: enc_refresh,
                token_expires_at: Utc::now().timestamp() + tokens.expires_in,
                scope: tokens.scope.clone().unwrap_or_else(|| OAUTH_SCOPES.to_string()),
            })
            .await
    }

    // ─── Calendar List Sync ──────────────────────────────────────────────────

    /// Mirror the provider's calendar list into local rows.
    ///
    /// Upserts are keyed by (account, calendar id): metadata is refreshed on
    /// every run, but the user's `selected` flag is only initialized on first
    /// insert (primary calendar on, everything else off) and never touched
    /// again. Calendars that disappear from the provider list are kept.
    pub async fn sync_calendar_list(&self, account: &ExternalAccount) -> Result<u32, AppError> {
        let access_token = self.valid_access_token(account).await?;
        let entries = self.client.list_calendars(&access_token).await?;

        let count = entries.len() as u32;
        for entry in entries {
            self.db
                .upsert_calendar(
                    account.id,
                    CalendarUpsert {
                        summary: entry.summary.clone().unwrap_or_else(|| entry.id.clone()),
                        calendar_id: entry.id,
                        is_primary: entry.primary.unwrap_or(false),
                        background_color: entry.background_color,
                        foreground_color: entry.foreground_color,
                    },
                )
                .await?;
        }

        tracing::debug!(account_id = account.id, count, "Calendar list mirrored");
        Ok(count)
    }

    // ─── Free/Busy Sync ──────────────────────────────────────────────────────

    /// Sync external availability blocks from Google free/busy.
    ///
    /// Fails fast with [`AppError::NotConnected`] / [`AppError::Revoked`]
    /// before touching any sync bookkeeping. Any later failure is recorded in
    /// the account's sync state and then propagated; the previous block
    /// snapshot stays in place.
    pub async fn sync_availability(&self, user_id: i64) -> Result<SyncSummary, AppError> {
        let account = self
            .db
            .get_external_account(user_id, PROVIDER_GOOGLE)
            .await?
            .ok_or(AppError::NotConnected)?;
        if account.is_revoked() {
            return Err(AppError::Revoked);
        }

        match self.run_free_busy_sync(&account).await {
            Ok(blocks_count) => {
                let synced_at = Utc::now().timestamp();
                self.db.record_sync_success(account.id, synced_at).await?;
                tracing::info!(
                    account_id = account.id,
                    blocks_count,
                    "Availability sync complete"
                );
                Ok(SyncSummary {
                    blocks_count,
                    synced_at,
                })
            }
            Err(e) => {
                // Record for the status endpoint, then surface the original
                // error to the caller.
                if let Err(record_err) = self
                    .db
                    .record_sync_error(account.id, &e.to_string())
                    .await
                {
                    tracing::error!(
                        account_id = account.id,
                        error = %record_err,
                        "Failed to record sync error"
                    );
                }
                Err(e)
            }
        }
    }

    /// The sync pipeline proper: token, selected calendars, free/busy query,
    /// normalize, atomic snapshot replace.
    async fn run_free_busy_sync(&self, account: &ExternalAccount) -> Result<u32, AppError> {
        let access_token = self.valid_access_token(account).await?;

        let calendar_ids = self.db.selected_calendar_ids(account.id).await?;

        let now = Utc::now().timestamp();

        // Zero selected calendars is a valid state: the mirror becomes empty.
        // Skip the network call, the snapshot replace still runs.
        if calendar_ids.is_empty() {
            return self
                .db
                .replace_external_blocks(
                    account.id,
                    account.user_id,
                    PROVIDER_GOOGLE.to_string(),
                    Vec::new(),
                    now,
                )
                .await;
        }

        let horizon_end = now + self.sync_horizon_weeks * 7 * 24 * 60 * 60;
        let time_min = time_utils::format_unix_rfc3339(now);
        let time_max = time_utils::format_unix_rfc3339(horizon_end);

        let free_busy = self
            .client
            .free_busy(&access_token, &time_min, &time_max, &calendar_ids)
            .await?;

        // Normalize to (start, end) unix pairs. Overlapping calendars often
        // return the same event twice; exact duplicates collapse to one row.
        let mut intervals: Vec<(i64, i64)> = Vec::new();
        for (calendar_id, calendar) in &free_busy.calendars {
            if !calendar.errors.is_empty() {
                tracing::warn!(
                    account_id = account.id,
                    calendar_id = %calendar_id,
                    errors = ?calendar.errors,
                    "Free/busy reported calendar errors, skipping its intervals"
                );
                continue;
            }
            for period in &calendar.busy {
                let start = time_utils::parse_rfc3339_unix(&period.start).ok_or_else(|| {
                    AppError::GoogleApi(format!("Unparseable busy start: {}", period.start))
                })?;
                let end = time_utils::parse_rfc3339_unix(&period.end).ok_or_else(|| {
                    AppError::GoogleApi(format!("Unparseable busy end: {}", period.end))
                })?;
                intervals.push((start, end));
            }
        }
        intervals.sort_unstable();
        intervals.dedup();

        self.db
            .replace_external_blocks(
                account.id,
                account.user_id,
                PROVIDER_GOOGLE.to_string(),
                intervals,
                now,
            )
            .await
    }

    // ─── Connection Management ───────────────────────────────────────────────

    /// Toggle whether a calendar contributes to availability, then re-run the
    /// free/busy sync so blocks reflect the change immediately.
    ///
    /// The flag is persisted before the sync; a sync failure propagates but
    /// does not revert the selection.
    pub async fn set_calendar_selected(
        &self,
        user_id: i64,
        calendar_row_id: i64,
        selected: bool,
    ) -> Result<SyncSummary, AppError> {
        let account = self
            .db
            .get_external_account(user_id, PROVIDER_GOOGLE)
            .await?
            .ok_or(AppError::NotConnected)?;

        let calendar = self
            .db
            .get_calendar(calendar_row_id)
            .await?
            .filter(|c| c.external_account_id == account.id)
            .ok_or_else(|| AppError::NotFound(format!("Calendar {}", calendar_row_id)))?;

        self.db.set_calendar_selected(calendar.id, selected).await?;
        self.sync_availability(user_id).await
    }

    /// Disconnect the account: delete it and every dependent row (calendars,
    /// external blocks, sync state) via cascade. No provider call is made.
    pub async fn disconnect(&self, user_id: i64) -> Result<(), AppError> {
        let account = self
            .db
            .get_external_account(user_id, PROVIDER_GOOGLE)
            .await?
            .ok_or(AppError::NotConnected)?;

        self.db.delete_external_account(account.id).await?;
        self.refresh_locks.remove(&account.id);

        tracing::info!(account_id = account.id, user_id, "Account disconnected");
        Ok(())
    }
}
