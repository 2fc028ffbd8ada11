// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use std::sync::Arc;
use tandem_api::config::Config;
use tandem_api::db::Db;
use tandem_api::middleware::auth::create_jwt;
use tandem_api::models::{ExternalAccount, NewExternalAccount, Space, User};
use tandem_api::routes::create_router;
use tandem_api::services::{
    crypto, AvailabilityService, CalendarSyncService, GoogleClient, TokenCipher,
};
use tandem_api::AppState;
use tempfile::TempDir;

/// A fully wired app over a throwaway SQLite file.
pub struct TestApp {
    pub router: axum::Router,
    pub state: Arc<AppState>,
    // Keeps the database directory alive for the test's duration.
    _db_dir: TempDir,
}

/// Create a test app. When `google_base` is given (a wiremock server URI),
/// all Google endpoints point there; no test ever talks to the real
/// provider.
#[allow(dead_code)]
pub fn create_test_app_with_google(google_base: Option<&str>) -> TestApp {
    let config = Config::test_default();

    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("tandem-test.db");
    let db = Db::open(db_path.to_str().unwrap()).expect("open test db");

    let cipher = TokenCipher::new(&config.token_encryption_key).expect("cipher");
    let refresh_locks = Arc::new(dashmap::DashMap::new());

    let mut google = GoogleClient::new(
        config.google_client_id.clone(),
        config.google_client_secret.clone(),
        config.oauth_redirect_uri(),
    );
    if let Some(base) = google_base {
        google = google.with_endpoints(
            format!("{}/token", base),
            format!("{}/userinfo", base),
            format!("{}/calendar/v3", base),
        );
    }

    let sync_service = CalendarSyncService::new(
        google,
        db.clone(),
        cipher,
        refresh_locks,
        config.sync_horizon_weeks,
    );
    let availability_service = AvailabilityService::new(db.clone());

    let state = Arc::new(AppState {
        config,
        db,
        sync_service,
        availability_service,
    });

    TestApp {
        router: create_router(state.clone()),
        state,
        _db_dir: dir,
    }
}

/// Create a test app with no provider wired up.
#[allow(dead_code)]
pub fn create_test_app() -> TestApp {
    create_test_app_with_google(None)
}

/// Two users sharing one space.
#[allow(dead_code)]
pub struct Couple {
    pub space: Space,
    pub alex: User,
    pub sam: User,
}

/// Seed a couple: two users joined in one shared space.
#[allow(dead_code)]
pub async fn seed_couple(db: &Db) -> Couple {
    let alex = db.create_user("alex@example.com", "Alex").await.unwrap();
    let sam = db.create_user("sam@example.com", "Sam").await.unwrap();
    let space = db
        .create_space("Alex & Sam", vec![alex.id, sam.id])
        .await
        .unwrap();
    Couple { space, alex, sam }
}

/// Store a connected Google account with properly encrypted tokens.
///
/// `expires_in` is seconds from now; use a comfortable positive value to
/// stay on the no-refresh fast path, or something under the refresh margin
/// to force a refresh.
#[allow(dead_code)]
pub async fn seed_connected_account(
    state: &AppState,
    user_id: i64,
    access_token: &str,
    refresh_token: Option<&str>,
    expires_in: i64,
) -> ExternalAccount {
    let cipher = TokenCipher::new(&state.config.token_encryption_key).unwrap();
    let (enc_access, enc_refresh) =
        crypto::encrypt_tokens(&cipher, access_token, refresh_token, user_id).unwrap();

    state
        .db
        .upsert_external_account(NewExternalAccount {
            user_id,
            provider: "google".to_string(),
            provider_account_id: format!("user{}@gmail.com", user_id),
            access_token_encrypted: enc_access,
            refresh_token_encrypted: enc_refresh,
            token_expires_at: chrono::Utc::now().timestamp() + expires_in,
            scope: "openid email https://www.googleapis.com/auth/calendar.readonly".to_string(),
        })
        .await
        .unwrap()
}

/// Bearer token for an authenticated request as `user_id`.
#[allow(dead_code)]
pub fn session_token(state: &AppState, user_id: i64) -> String {
    create_jwt(user_id, &state.config.jwt_signing_key).unwrap()
}
