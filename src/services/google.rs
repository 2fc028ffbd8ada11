// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Google OAuth and Calendar API client.
//!
//! Handles:
//! - Consent URL construction
//! - Authorization-code exchange and token refresh
//! - Calendar list fetching (paginated)
//! - Batched free/busy queries
//!
//! All endpoint bases are overridable so tests can point the client at a
//! local mock server.

use crate::error::AppError;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";
const GOOGLE_CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

/// Scopes requested on connect: identity (for the account email) plus
/// read-only calendar access.
pub const OAUTH_SCOPES: &str = "openid email https://www.googleapis.com/auth/calendar.readonly";

/// Per-request timeout for all Google calls. A hung provider call must not
/// hold a sync open indefinitely.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Google API client.
#[derive(Clone)]
pub struct GoogleClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    auth_url: String,
    token_url: String,
    userinfo_url: String,
    api_base: String,
}

impl GoogleClient {
    /// Create a new Google client with OAuth credentials.
    pub fn new(client_id: String, client_secret: String, redirect_uri: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            client_id,
            client_secret,
            redirect_uri,
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            userinfo_url: GOOGLE_USERINFO_URL.to_string(),
            api_base: GOOGLE_CALENDAR_API_BASE.to_string(),
        }
    }

    /// Point the client at alternate endpoints (mock server in tests).
    pub fn with_endpoints(
        mut self,
        token_url: String,
        userinfo_url: String,
        api_base: String,
    ) -> Self {
        self.token_url = token_url;
        self.userinfo_url = userinfo_url;
        self.api_base = api_base;
        self
    }

    /// Build the consent-screen URL for the OAuth redirect.
    ///
    /// `access_type=offline` + `prompt=consent` ask Google for a refresh
    /// token; repeated grants may still omit it, which the caller handles by
    /// keeping the stored one.
    pub fn authorize_url(&self, state: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent&state={}",
            self.auth_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(OAUTH_SCOPES),
            urlencoding::encode(state),
        )
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse, AppError> {
        let response = self
            .http
            .post(&self.token_url)
            .timeout(REQUEST_TIMEOUT)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", self.redirect_uri.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AppError::TokenExchangeFailed(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, "Google token exchange failed");
            return Err(AppError::TokenExchangeFailed(format!(
                "HTTP {}: {}",
                status,
                token_error_summary(&body)
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::TokenExchangeFailed(format!("JSON parse error: {}", e)))
    }

    /// Refresh an expired access token.
    ///
    /// A true `invalid_grant` rejection is surfaced in the error message so
    /// the caller can distinguish terminal revocation from transient
    /// failures (see [`AppError::is_invalid_grant`]).
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, AppError> {
        let response = self
            .http
            .post(&self.token_url)
            .timeout(REQUEST_TIMEOUT)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| AppError::GoogleApi(format!("Token refresh request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::GoogleApi(format!(
                "Token refresh HTTP {}: {}",
                status,
                token_error_summary(&body)
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::GoogleApi(format!("JSON parse error: {}", e)))
    }

    /// Fetch the account identity behind an access token.
    pub async fn get_userinfo(&self, access_token: &str) -> Result<UserInfo, AppError> {
        let response = self
            .http
            .get(&self.userinfo_url)
            .timeout(REQUEST_TIMEOUT)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AppError::GoogleApi(e.to_string()))?;

        self.check_response_json(response).await
    }

    /// List all calendars on the account's calendar list.
    pub async fn list_calendars(
        &self,
        access_token: &str,
    ) -> Result<Vec<CalendarListEntry>, AppError> {
        let url = format!("{}/users/me/calendarList", self.api_base);
        let mut entries = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.http.get(&url).timeout(REQUEST_TIMEOUT).bearer_auth(access_token);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| AppError::GoogleApi(e.to_string()))?;
            let page: CalendarListPage = self.check_response_json(response).await?;

            entries.extend(page.items);
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(entries)
    }

    /// Query busy intervals for a batch of calendars in one call.
    pub async fn free_busy(
        &self,
        access_token: &str,
        time_min: &str,
        time_max: &str,
        calendar_ids: &[String],
    ) -> Result<FreeBusyResponse, AppError> {
        let url = format!("{}/freeBusy", self.api_base);

        let items: Vec<serde_json::Value> = calendar_ids
            .iter()
            .map(|id| serde_json::json!({ "id": id }))
            .collect();
        let body = serde_json::json!({
            "timeMin": time_min,
            "timeMax": time_max,
            "items": items,
        });

        let response = self
            .http
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::GoogleApi(e.to_string()))?;

        self.check_response_json(response).await
    }

    /// Check response and parse JSON body.
    async fn check_response_json<T: for<'de> Deserialize<'de>>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, AppError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            if status.as_u16() == 429 {
                tracing::warn!("Google rate limit hit (429)");
            }

            return Err(AppError::GoogleApi(format!("HTTP {}: {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::GoogleApi(format!("JSON parse error: {}", e)))
    }
}

/// Condense an OAuth token-endpoint error body (`{"error": ...,
/// "error_description": ...}`) into a log-safe one-liner.
fn token_error_summary(body: &str) -> String {
    match serde_json::from_str::<TokenErrorBody>(body) {
        Ok(parsed) => match parsed.error_description {
            Some(desc) => format!("{} ({})", parsed.error, desc),
            None => parsed.error,
        },
        Err(_) => "unrecognized error response".to_string(),
    }
}

/// Token endpoint success response.
///
/// Google reports lifetime as `expires_in` seconds; the refresh token is
/// only present on the first consent (or after `prompt=consent`).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Token endpoint error response.
#[derive(Debug, Deserialize)]
struct TokenErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// OpenID userinfo response (subset).
#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
}

impl UserInfo {
    /// Stable display identity: the email when granted, else the subject id.
    pub fn identity(&self) -> &str {
        self.email.as_deref().unwrap_or(&self.sub)
    }
}

/// One page of the calendar list.
#[derive(Debug, Deserialize)]
struct CalendarListPage {
    #[serde(default)]
    items: Vec<CalendarListEntry>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

/// A calendar-list entry (subset of the Google resource).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarListEntry {
    pub id: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub primary: Option<bool>,
    #[serde(default)]
    pub background_color: Option<String>,
    #[serde(default)]
    pub foreground_color: Option<String>,
}

/// Free/busy query response.
#[derive(Debug, Deserialize)]
pub struct FreeBusyResponse {
    #[serde(default)]
    pub calendars: HashMap<String, FreeBusyCalendar>,
}

/// Busy intervals (or errors) for one queried calendar.
#[derive(Debug, Deserialize)]
pub struct FreeBusyCalendar {
    #[serde(default)]
    pub busy: Vec<BusyPeriod>,
    #[serde(default)]
    pub errors: Vec<FreeBusyError>,
}

/// One busy interval, RFC3339 bounds.
#[derive(Debug, Clone, Deserialize)]
pub struct BusyPeriod {
    pub start: String,
    pub end: String,
}

/// Per-calendar error entry in a free/busy response.
#[derive(Debug, Clone, Deserialize)]
pub struct FreeBusyError {
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorize_url_contains_oauth_params() {
        let client = GoogleClient::new(
            "the-client-id".to_string(),
            "shh".to_string(),
            "http://localhost:8080/auth/google/callback".to_string(),
        );

        let url = client.authorize_url("random-state");

        assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(url.contains("client_id=the-client-id"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
        assert!(url.contains("state=random-state"));
        assert!(url.contains(&format!(
            "redirect_uri={}",
            urlencoding::encode("http://localhost:8080/auth/google/callback")
        )));
        assert!(url.contains(&format!("scope={}", urlencoding::encode(OAUTH_SCOPES))));
    }

    #[test]
    fn test_token_error_summary() {
        assert_eq!(
            token_error_summary(r#"{"error":"invalid_grant","error_description":"Bad Request"}"#),
            "invalid_grant (Bad Request)"
        );
        assert_eq!(
            token_error_summary(r#"{"error":"invalid_client"}"#),
            "invalid_client"
        );
        assert_eq!(token_error_summary("<html>nope</html>"), "unrecognized error response");
    }

    #[test]
    fn test_calendar_list_entry_parses_google_casing() {
        let entry: CalendarListEntry = serde_json::from_str(
            r##"{
                "id": "alex@example.com",
                "summary": "Personal",
                "primary": true,
                "backgroundColor": "#9fe1e7",
                "foregroundColor": "#000000",
                "accessRole": "owner"
            }"##,
        )
        .unwrap();

        assert_eq!(entry.id, "alex@example.com");
        assert_eq!(entry.primary, Some(true));
        assert_eq!(entry.background_color.as_deref(), Some("#9fe1e7"));
    }

    #[test]
    fn test_free_busy_response_parses_errors_entry() {
        let resp: FreeBusyResponse = serde_json::from_str(
            r#"{
                "kind": "calendar#freeBusy",
                "calendars": {
                    "ok@example.com": {
                        "busy": [{"start": "2025-01-10T09:00:00Z", "end": "2025-01-10T10:00:00Z"}]
                    },
                    "gone@example.com": {
                        "errors": [{"domain": "global", "reason": "notFound"}],
                        "busy": []
                    }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(resp.calendars["ok@example.com"].busy.len(), 1);
        assert_eq!(
            resp.calendars["gone@example.com"].errors[0].reason.as_deref(),
            Some("notFound")
        );
    }
}
