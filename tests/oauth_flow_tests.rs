// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! End-to-end Google OAuth connect flow tests.
//!
//! These drive the start and callback routes through the real router with
//! Google's endpoints replaced by a local wiremock server, and verify the
//! CSRF state cookie handling plus the account/calendar/block rows the flow
//! leaves behind.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
};
use serde_json::json;
use tower::ServiceExt;
use wiremock::matchers::{body_string_contains, header as header_matcher, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod common;

fn set_cookie_headers(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|value| value.to_str().unwrap().to_string())
        .collect()
}

fn find_cookie(headers: &[String], name: &str) -> String {
    headers
        .iter()
        .find(|value| value.starts_with(&format!("{name}=")))
        .cloned()
        .unwrap_or_else(|| panic!("missing Set-Cookie header for {name}: {headers:?}"))
}

fn cookie_value(set_cookie: &str) -> String {
    set_cookie
        .split_once('=')
        .and_then(|(_, rest)| rest.split(';').next())
        .unwrap()
        .to_string()
}

fn location(response: &Response) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .expect("missing Location header")
        .to_str()
        .unwrap()
        .to_string()
}

/// Run the start request and pull out the signed state cookie plus the nonce
/// Google would echo back as `state`.
async fn start_flow(app: &common::TestApp, user_id: i64) -> (String, String) {
    let token = common::session_token(&app.state, user_id);

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/auth/google")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);

    let set_cookies = set_cookie_headers(&response);
    let signed_state = cookie_value(&find_cookie(&set_cookies, "tandem_oauth_state"));

    // `state` is the last query parameter of the consent URL and is
    // base64url, so no percent-decoding is needed.
    let auth_url = location(&response);
    let nonce = auth_url
        .split("state=")
        .nth(1)
        .expect("consent URL missing state")
        .to_string();

    (signed_state, nonce)
}

#[tokio::test]
async fn test_auth_start_sets_state_cookie_and_redirects_to_consent() {
    let app = common::create_test_app();
    let couple = common::seed_couple(&app.state.db).await;
    let token = common::session_token(&app.state, couple.alex.id);

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/auth/google")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);

    let auth_url = location(&response);
    assert!(auth_url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
    assert!(auth_url.contains("access_type=offline"));
    assert!(auth_url.contains("prompt=consent"));
    assert!(auth_url.contains("state="));

    let set_cookies = set_cookie_headers(&response);
    let state_cookie = find_cookie(&set_cookies, "tandem_oauth_state");
    assert!(state_cookie.contains("Path=/auth/google/callback"));
    assert!(state_cookie.contains("HttpOnly"));
    assert!(state_cookie.contains("SameSite=Lax"));
    assert!(state_cookie.contains("Max-Age=600"));
}

#[tokio::test]
async fn test_auth_start_requires_session() {
    let app = common::create_test_app();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/auth/google")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_callback_connects_account_and_runs_first_sync() {
    let server = MockServer::start().await;
    let app = common::create_test_app_with_google(Some(&server.uri()));
    let couple = common::seed_couple(&app.state.db).await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=auth-code-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-1",
            "refresh_token": "refresh-1",
            "expires_in": 3600,
            "scope": "openid email https://www.googleapis.com/auth/calendar.readonly",
            "token_type": "Bearer"
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .and(header_matcher("authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sub": "google-sub-1",
            "email": "alex.g@gmail.com"
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/calendar/v3/users/me/calendarList"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                {"id": "alex.g@gmail.com", "summary": "Personal", "primary": true}
            ]
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/calendar/v3/freeBusy"))
        .and(header_matcher("authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "calendars": {
                "alex.g@gmail.com": {
                    "busy": [
                        {"start": "2025-06-01T09:00:00Z", "end": "2025-06-01T10:30:00Z"}
                    ]
                }
            }
        })))
        .mount(&server)
        .await;

    let (signed_state, nonce) = start_flow(&app, couple.alex.id).await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!(
                    "/auth/google/callback?code=auth-code-1&state={nonce}"
                ))
                .header(header::COOKIE, format!("tandem_oauth_state={signed_state}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        location(&response),
        format!(
            "{}/settings/calendar?calendar=connected",
            app.state.config.frontend_url
        )
    );

    // State cookie is single-use.
    let set_cookies = set_cookie_headers(&response);
    let removal = find_cookie(&set_cookies, "tandem_oauth_state");
    assert!(removal.contains("Max-Age=0"));
    assert!(removal.contains("Path=/auth/google/callback"));

    let account = app
        .state
        .db
        .get_external_account(couple.alex.id, "google")
        .await
        .unwrap()
        .expect("account should exist after callback");
    assert_eq!(account.provider_account_id, "alex.g@gmail.com");
    assert!(account.revoked_at.is_none());
    // Tokens are never stored in the clear.
    assert_ne!(account.access_token_encrypted, "access-1");
    assert_ne!(account.refresh_token_encrypted.as_deref(), Some("refresh-1"));

    let calendars = app.state.db.list_calendars(account.id).await.unwrap();
    assert_eq!(calendars.len(), 1);
    assert!(calendars[0].is_primary);
    assert!(calendars[0].selected);

    let blocks = app
        .state
        .db
        .list_external_blocks_for_account(account.id)
        .await
        .unwrap();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].user_id, couple.alex.id);
    assert_eq!(blocks[0].source, "google");
}

#[tokio::test]
async fn test_callback_rejects_tampered_state() {
    let app = common::create_test_app();
    let couple = common::seed_couple(&app.state.db).await;

    let (signed_state, _nonce) = start_flow(&app, couple.alex.id).await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/auth/google/callback?code=auth-code-1&state=attacker-nonce")
                .header(header::COOKIE, format!("tandem_oauth_state={signed_state}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert!(location(&response).ends_with("?calendar=state_mismatch"));

    let account = app
        .state
        .db
        .get_external_account(couple.alex.id, "google")
        .await
        .unwrap();
    assert!(account.is_none());
}

#[tokio::test]
async fn test_callback_without_state_cookie_rejected() {
    let app = common::create_test_app();
    common::seed_couple(&app.state.db).await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/auth/google/callback?code=auth-code-1&state=whatever")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert!(location(&response).ends_with("?calendar=state_mismatch"));
}

#[tokio::test]
async fn test_callback_access_denied_reports_cancelled() {
    let app = common::create_test_app();
    let couple = common::seed_couple(&app.state.db).await;

    let (signed_state, nonce) = start_flow(&app, couple.alex.id).await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!(
                    "/auth/google/callback?error=access_denied&state={nonce}"
                ))
                .header(header::COOKIE, format!("tandem_oauth_state={signed_state}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert!(location(&response).ends_with("?calendar=cancelled"));

    // The pending state is consumed even on cancel.
    let set_cookies = set_cookie_headers(&response);
    assert!(find_cookie(&set_cookies, "tandem_oauth_state").contains("Max-Age=0"));
}

#[tokio::test]
async fn test_callback_missing_code_reports_error() {
    let app = common::create_test_app();
    let couple = common::seed_couple(&app.state.db).await;

    let (signed_state, nonce) = start_flow(&app, couple.alex.id).await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/auth/google/callback?state={nonce}"))
                .header(header::COOKIE, format!("tandem_oauth_state={signed_state}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert!(location(&response).ends_with("?calendar=error"));
}

#[tokio::test]
async fn test_callback_token_exchange_failure_reports_error() {
    let server = MockServer::start().await;
    let app = common::create_test_app_with_google(Some(&server.uri()));
    let couple = common::seed_couple(&app.state.db).await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_request",
            "error_description": "Malformed auth code."
        })))
        .mount(&server)
        .await;

    let (signed_state, nonce) = start_flow(&app, couple.alex.id).await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/auth/google/callback?code=bad-code&state={nonce}"))
                .header(header::COOKIE, format!("tandem_oauth_state={signed_state}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert!(location(&response).ends_with("?calendar=error"));

    let account = app
        .state
        .db
        .get_external_account(couple.alex.id, "google")
        .await
        .unwrap();
    assert!(account.is_none());
}
