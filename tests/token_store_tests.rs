// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Token storage tests.
//!
//! OAuth tokens must be encrypted in account rows, bound to their owning
//! user, and survive the reconnect quirks of Google's token endpoint. When a
//! stored token cannot be decrypted the API fails loudly instead of sending
//! ciphertext to the provider.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use tandem_api::models::NewExternalAccount;
use tandem_api::services::TokenCipher;
use tower::ServiceExt;

mod common;

#[tokio::test]
async fn test_tokens_are_opaque_at_rest() {
    let app = common::create_test_app();
    let couple = common::seed_couple(&app.state.db).await;

    let account = common::seed_connected_account(
        &app.state,
        couple.alex.id,
        "ya29.super-secret",
        Some("1//refresh-secret"),
        3600,
    )
    .await;

    assert_ne!(account.access_token_encrypted, "ya29.super-secret");
    assert_ne!(
        account.refresh_token_encrypted.as_deref(),
        Some("1//refresh-secret")
    );

    // The app's own cipher can read them back.
    let cipher = TokenCipher::new(&app.state.config.token_encryption_key).unwrap();
    let aad = couple.alex.id.to_string();
    assert_eq!(
        cipher
            .decrypt(&account.access_token_encrypted, aad.as_bytes())
            .unwrap(),
        "ya29.super-secret"
    );
    assert_eq!(
        cipher
            .decrypt(account.refresh_token_encrypted.as_ref().unwrap(), aad.as_bytes())
            .unwrap(),
        "1//refresh-secret"
    );
}

#[tokio::test]
async fn test_reconnect_without_refresh_token_keeps_stored_one() {
    let app = common::create_test_app();
    let couple = common::seed_couple(&app.state.db).await;

    common::seed_connected_account(&app.state, couple.alex.id, "access-1", Some("r1"), 3600)
        .await;
    // Repeat consent: Google only returns an access token.
    let account =
        common::seed_connected_account(&app.state, couple.alex.id, "access-2", None, 3600).await;

    let cipher = TokenCipher::new(&app.state.config.token_encryption_key).unwrap();
    let aad = couple.alex.id.to_string();
    assert_eq!(
        cipher
            .decrypt(&account.access_token_encrypted, aad.as_bytes())
            .unwrap(),
        "access-2"
    );
    assert_eq!(
        cipher
            .decrypt(account.refresh_token_encrypted.as_ref().unwrap(), aad.as_bytes())
            .unwrap(),
        "r1"
    );
}

#[tokio::test]
async fn test_reconnect_clears_revocation() {
    let app = common::create_test_app();
    let couple = common::seed_couple(&app.state.db).await;

    let account =
        common::seed_connected_account(&app.state, couple.alex.id, "access-1", Some("r1"), 3600)
            .await;
    app.state
        .db
        .mark_account_revoked(account.id, chrono::Utc::now().timestamp())
        .await
        .unwrap();

    let account =
        common::seed_connected_account(&app.state, couple.alex.id, "access-2", Some("r2"), 3600)
            .await;
    assert!(account.revoked_at.is_none());
}

#[tokio::test]
async fn test_stored_tokens_bound_to_owning_user() {
    let app = common::create_test_app();
    let couple = common::seed_couple(&app.state.db).await;

    let account =
        common::seed_connected_account(&app.state, couple.alex.id, "access-1", Some("r1"), 3600)
            .await;

    // Moving the ciphertext onto Sam's row must not decrypt.
    let cipher = TokenCipher::new(&app.state.config.token_encryption_key).unwrap();
    let err = cipher
        .decrypt(
            &account.access_token_encrypted,
            couple.sam.id.to_string().as_bytes(),
        )
        .unwrap_err();
    assert!(matches!(err, tandem_api::error::AppError::DecryptionFailed));
}

#[tokio::test]
async fn test_undecryptable_token_fails_sync_with_500() {
    let app = common::create_test_app();
    let couple = common::seed_couple(&app.state.db).await;
    let token = common::session_token(&app.state, couple.alex.id);

    // A row written under a different master key decrypts to garbage today.
    let account = app
        .state
        .db
        .upsert_external_account(NewExternalAccount {
            user_id: couple.alex.id,
            provider: "google".to_string(),
            provider_account_id: "alex.g@gmail.com".to_string(),
            access_token_encrypted: "bm90LWEtcmVhbC1jaXBoZXJ0ZXh0".to_string(),
            refresh_token_encrypted: None,
            token_expires_at: chrono::Utc::now().timestamp() + 3600,
            scope: "openid email".to_string(),
        })
        .await
        .unwrap();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/calendar/sync")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"], "decryption_failed");

    // The failure shows up in sync bookkeeping for the status endpoint.
    let sync_state = app
        .state
        .db
        .get_sync_state(account.id)
        .await
        .unwrap()
        .unwrap();
    assert!(sync_state
        .last_sync_error
        .unwrap()
        .contains("could not be decrypted"));
}
