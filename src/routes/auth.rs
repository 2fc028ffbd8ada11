// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Google OAuth authentication routes.
//!
//! The connect flow is CSRF-protected with a signed double-submit state: a
//! random nonce goes to Google as the `state` query parameter, and an
//! HMAC-signed `nonce|user_id` payload rides in a short-lived httponly
//! cookie scoped to the callback path. The callback only proceeds when the
//! echoed state matches the cookie's nonce under a valid signature.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Redirect,
    routing::{get, post},
    Extension, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use ring::rand::SecureRandom;
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result};
use crate::middleware::auth::{AuthUser, SESSION_COOKIE};
use crate::AppState;

// Type alias for HMAC-SHA256
type HmacSha256 = Hmac<Sha256>;

/// Cookie holding the signed OAuth state between start and callback.
const STATE_COOKIE: &str = "tandem_oauth_state";
const CALLBACK_PATH: &str = "/auth/google/callback";

/// How long a pending OAuth flow stays valid.
const STATE_TTL_SECS: i64 = 10 * 60;

/// Public routes: the provider redirects the browser here without our SPA
/// involved, so the callback cannot sit behind the auth layer.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(CALLBACK_PATH, get(auth_callback))
        .route("/auth/logout", post(logout))
}

/// Session-required routes: starting a connect flow must know which user is
/// linking their calendar.
pub fn connect_routes() -> Router<Arc<AppState>> {
    Router::new().route("/auth/google", get(auth_start))
}

/// Start OAuth flow - set the state cookie and redirect to Google consent.
async fn auth_start(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect)> {
    let rng = ring::rand::SystemRandom::new();
    let mut nonce_bytes = [0u8; 32];
    rng.fill(&mut nonce_bytes)
        .map_err(|_| AppError::Internal(anyhow::anyhow!("RNG failure")))?;
    let nonce = URL_SAFE_NO_PAD.encode(nonce_bytes);

    let signed = sign_state(&nonce, user.user_id, &state.config.oauth_state_key)?;

    let cookie = Cookie::build((STATE_COOKIE, signed))
        .path(CALLBACK_PATH)
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(STATE_TTL_SECS))
        .build();

    let auth_url = state.sync_service.authorize_url(&nonce);

    tracing::info!(user_id = user.user_id, "Starting OAuth flow, redirecting to Google");

    Ok((jar.add(cookie), Redirect::temporary(&auth_url)))
}

#[derive(Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// OAuth callback - exchange the code, store the account, kick off the
/// first sync.
///
/// Every outcome lands the browser on the frontend settings page with a
/// `calendar=<status>` query parameter; provider error bodies never reach
/// the user. The state cookie is consumed unconditionally.
async fn auth_callback(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> (CookieJar, Redirect) {
    let frontend_url = state.config.frontend_url.clone();

    let cookie_value = jar.get(STATE_COOKIE).map(|c| c.value().to_string());
    let jar = jar.remove(Cookie::build((STATE_COOKIE, "")).path(CALLBACK_PATH));

    // Provider-reported outcome first: the user may have hit "cancel" on
    // the consent screen.
    if let Some(error) = &params.error {
        let status = if error == "access_denied" {
            "cancelled"
        } else {
            "error"
        };
        tracing::warn!(error = %error, "OAuth error from Google");
        return (jar, redirect_with_status(&frontend_url, status));
    }

    let decoded = cookie_value
        .as_deref()
        .and_then(|v| verify_and_decode_state(v, &state.config.oauth_state_key));
    let (nonce, user_id) = match decoded {
        Some(d) => d,
        None => {
            tracing::warn!("OAuth callback without a valid state cookie");
            return (jar, redirect_with_status(&frontend_url, "state_mismatch"));
        }
    };

    if !states_match(&nonce, params.state.as_deref().unwrap_or("")) {
        tracing::warn!("OAuth state mismatch between cookie and query");
        return (jar, redirect_with_status(&frontend_url, "state_mismatch"));
    }

    let code = match &params.code {
        Some(code) => code,
        None => {
            tracing::warn!("OAuth callback missing authorization code");
            return (jar, redirect_with_status(&frontend_url, "error"));
        }
    };

    let result = match state.sync_service.handle_oauth_callback(user_id, code).await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "OAuth code exchange failed");
            return (jar, redirect_with_status(&frontend_url, "error"));
        }
    };

    // Opportunistic first sync so the settings page has calendars and
    // blocks when the browser arrives. Failures only log; the connection
    // itself already succeeded.
    match state.db.get_external_account_by_id(result.account_id).await {
        Ok(Some(account)) => {
            if let Err(e) = state.sync_service.sync_calendar_list(&account).await {
                tracing::warn!(error = %e, "Initial calendar list sync failed");
            }
            if let Err(e) = state.sync_service.sync_availability(user_id).await {
                tracing::warn!(error = %e, "Initial availability sync failed");
            }
        }
        Ok(None) => tracing::warn!(
            account_id = result.account_id,
            "Connected account missing before initial sync"
        ),
        Err(e) => tracing::warn!(error = %e, "Could not load account for initial sync"),
    }

    tracing::info!(
        account_id = result.account_id,
        user_id,
        "Google Calendar connected"
    );

    (jar, redirect_with_status(&frontend_url, "connected"))
}

/// Logout - clear the session cookie.
async fn logout(jar: CookieJar) -> (CookieJar, StatusCode) {
    let jar = jar.remove(Cookie::build((SESSION_COOKIE, "")).path("/"));
    (jar, StatusCode::NO_CONTENT)
}

fn redirect_with_status(frontend_url: &str, status: &str) -> Redirect {
    Redirect::temporary(&format!(
        "{}/settings/calendar?calendar={}",
        frontend_url, status
    ))
}

/// Sign `nonce|user_id` and encode the cookie payload.
fn sign_state(nonce: &str, user_id: i64, secret: &[u8]) -> Result<String> {
    let payload = format!("{}|{}", nonce, user_id);

    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("HMAC init failed: {}", e)))?;
    mac.update(payload.as_bytes());
    let signature = mac.finalize().into_bytes();

    // Combine payload + signature: "payload|signature_hex"
    let signed = format!("{}|{}", payload, hex::encode(signature));
    Ok(URL_SAFE_NO_PAD.encode(signed.as_bytes()))
}

/// Verify the HMAC signature and decode (nonce, user_id) from the state
/// cookie.
fn verify_and_decode_state(cookie_value: &str, secret: &[u8]) -> Option<(String, i64)> {
    let bytes = URL_SAFE_NO_PAD.decode(cookie_value).ok()?;
    let state_str = String::from_utf8(bytes).ok()?;

    // Format is "nonce|user_id|signature_hex"
    let parts: Vec<&str> = state_str.splitn(3, '|').collect();
    if parts.len() != 3 {
        return None;
    }

    let nonce = parts[0];
    let user_id_str = parts[1];
    let signature_hex = parts[2];

    // Reconstruct payload and verify signature
    let payload = format!("{}|{}", nonce, user_id_str);

    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(payload.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    if !states_match(&expected, signature_hex) {
        tracing::error!("OAuth state signature mismatch! Potential tampering.");
        return None;
    }

    let user_id = user_id_str.parse().ok()?;
    Some((nonce.to_string(), user_id))
}

/// Constant-time string comparison for state values.
fn states_match(a: &str, b: &str) -> bool {
    bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}
