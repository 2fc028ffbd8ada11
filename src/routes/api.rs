// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API routes for authenticated users.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::{AvailabilityBlock, ExternalAvailabilityBlock, ExternalCalendar, Space};
use crate::services::sync::PROVIDER_GOOGLE;
use crate::time_utils::{format_unix_rfc3339, parse_rfc3339_unix};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, patch, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Longest accepted note on a manual availability block.
const MAX_NOTE_LEN: usize = 500;

/// API routes (require authentication via JWT).
/// The auth middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/me", get(get_me))
        .route(
            "/api/calendar/connection",
            get(get_connection_status).delete(disconnect),
        )
        .route("/api/calendar/sync", post(sync_now))
        .route("/api/calendar/calendars/{id}", patch(toggle_calendar))
        .route("/api/availability", get(get_availability).post(create_block))
        .route("/api/availability/{id}", delete(delete_block))
}

// ─── User Profile ────────────────────────────────────────────

/// Current user response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct UserResponse {
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub id: i64,
    pub email: String,
    pub display_name: String,
    pub created_at: String,
}

/// Get current user profile.
async fn get_me(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<UserResponse>> {
    let profile = state
        .db
        .get_user(user.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", user.user_id)))?;

    Ok(Json(UserResponse {
        id: profile.id,
        email: profile.email,
        display_name: profile.display_name,
        created_at: format_unix_rfc3339(profile.created_at),
    }))
}

// ─── Calendar Connection ─────────────────────────────────────

/// One mirrored calendar in the connection status.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct CalendarView {
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub id: i64,
    pub calendar_id: String,
    pub summary: String,
    pub primary: bool,
    pub selected: bool,
    pub background_color: Option<String>,
    pub foreground_color: Option<String>,
}

/// Connection status response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ConnectionStatusResponse {
    pub connected: bool,
    /// Email of the linked Google account.
    pub provider_email: Option<String>,
    /// True when the stored grant died and the user must reconnect.
    pub requires_reauth: bool,
    pub last_synced_at: Option<String>,
    pub last_sync_error: Option<String>,
    pub calendars: Vec<CalendarView>,
}

/// Get the Google Calendar connection status for the current user.
async fn get_connection_status(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<ConnectionStatusResponse>> {
    let account = match state
        .db
        .get_external_account(user.user_id, PROVIDER_GOOGLE)
        .await?
    {
        Some(account) => account,
        None => {
            return Ok(Json(ConnectionStatusResponse {
                connected: false,
                provider_email: None,
                requires_reauth: false,
                last_synced_at: None,
                last_sync_error: None,
                calendars: vec![],
            }));
        }
    };

    let sync_state = state.db.get_sync_state(account.id).await?;
    let calendars = state.db.list_calendars(account.id).await?;

    Ok(Json(ConnectionStatusResponse {
        connected: true,
        provider_email: Some(account.provider_account_id.clone()),
        requires_reauth: account.is_revoked(),
        last_synced_at: sync_state
            .as_ref()
            .and_then(|s| s.last_synced_at)
            .map(format_unix_rfc3339),
        last_sync_error: sync_state.and_then(|s| s.last_sync_error),
        calendars: calendars.into_iter().map(calendar_view).collect(),
    }))
}

/// Sync trigger / toggle response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct SyncResponse {
    pub blocks_count: u32,
    pub synced_at: String,
}

/// Manually trigger a free/busy sync for the current user.
async fn sync_now(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<SyncResponse>> {
    tracing::debug!(user_id = user.user_id, "Manual sync requested");

    let summary = state.sync_service.sync_availability(user.user_id).await?;

    Ok(Json(SyncResponse {
        blocks_count: summary.blocks_count,
        synced_at: format_unix_rfc3339(summary.synced_at),
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleCalendarRequest {
    pub selected: bool,
}

/// Toggle whether a calendar contributes to availability. Re-syncs
/// immediately so the grid reflects the change.
async fn toggle_calendar(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(calendar_row_id): Path<i64>,
    Json(body): Json<ToggleCalendarRequest>,
) -> Result<Json<SyncResponse>> {
    tracing::debug!(
        user_id = user.user_id,
        calendar_row_id,
        selected = body.selected,
        "Toggling calendar"
    );

    let summary = state
        .sync_service
        .set_calendar_selected(user.user_id, calendar_row_id, body.selected)
        .await?;

    Ok(Json(SyncResponse {
        blocks_count: summary.blocks_count,
        synced_at: format_unix_rfc3339(summary.synced_at),
    }))
}

/// Response for disconnecting the calendar account.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct DisconnectResponse {
    pub success: bool,
}

/// Disconnect Google Calendar: the account row and everything hanging off
/// it (calendars, synced blocks, sync state) goes away.
async fn disconnect(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<DisconnectResponse>> {
    tracing::info!(user_id = user.user_id, "User-initiated calendar disconnect");

    state.sync_service.disconnect(user.user_id).await?;

    Ok(Json(DisconnectResponse { success: true }))
}

// ─── Availability ────────────────────────────────────────────

#[derive(Deserialize)]
struct AvailabilityQuery {
    /// Window start (RFC3339)
    from: String,
    /// Window end (RFC3339)
    to: String,
}

/// A manually entered availability block.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ManualBlockView {
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub id: i64,
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub user_id: i64,
    pub start_at: String,
    pub end_at: String,
    pub note: Option<String>,
}

/// A block synced from an external calendar.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ExternalBlockView {
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub id: i64,
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub user_id: i64,
    pub source: String,
    pub start_at: String,
    pub end_at: String,
}

/// Availability listing response.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct AvailabilityResponse {
    pub manual: Vec<ManualBlockView>,
    pub external: Vec<ExternalBlockView>,
}

/// List availability blocks for the caller's space over a window.
///
/// Returns manual blocks of the space plus external blocks of every member,
/// so each partner sees the other's synced busy times.
async fn get_availability(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<AvailabilityQuery>,
) -> Result<Json<AvailabilityResponse>> {
    let from = parse_rfc3339_param(&params.from, "from")?;
    let to = parse_rfc3339_param(&params.to, "to")?;
    if from > to {
        return Err(AppError::BadRequest(
            "'from' must not be after 'to'".to_string(),
        ));
    }

    tracing::debug!(
        user_id = user.user_id,
        from = %params.from,
        to = %params.to,
        "Fetching availability window"
    );

    let space = require_space(&state, user.user_id).await?;
    let window = state.availability_service.window(space.id, from, to).await?;

    Ok(Json(AvailabilityResponse {
        manual: window.manual.into_iter().map(manual_view).collect(),
        external: window.external.into_iter().map(external_view).collect(),
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBlockRequest {
    pub start_at: String,
    pub end_at: String,
    #[serde(default)]
    pub note: Option<String>,
}

/// Create a manual availability block in the caller's space.
async fn create_block(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<CreateBlockRequest>,
) -> Result<Json<ManualBlockView>> {
    let start_at = parse_rfc3339_param(&body.start_at, "startAt")?;
    let end_at = parse_rfc3339_param(&body.end_at, "endAt")?;

    if let Some(note) = &body.note {
        // Characters, not bytes: multibyte notes count the same as ASCII.
        if note.chars().count() > MAX_NOTE_LEN {
            return Err(AppError::BadRequest(format!(
                "Note must be at most {} characters",
                MAX_NOTE_LEN
            )));
        }
    }

    let space = require_space(&state, user.user_id).await?;
    let block = state
        .availability_service
        .create_block(space.id, user.user_id, start_at, end_at, body.note)
        .await?;

    Ok(Json(manual_view(block)))
}

/// Response for deleting a manual block.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct DeleteBlockResponse {
    pub success: bool,
}

/// Delete a manual availability block from the caller's space.
async fn delete_block(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(block_id): Path<i64>,
) -> Result<Json<DeleteBlockResponse>> {
    let space = require_space(&state, user.user_id).await?;
    state
        .availability_service
        .delete_block(space.id, block_id)
        .await?;

    Ok(Json(DeleteBlockResponse { success: true }))
}

// ─── Helpers ─────────────────────────────────────────────────

async fn require_space(state: &Arc<AppState>, user_id: i64) -> Result<Space> {
    state
        .db
        .get_space_for_user(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("No shared space for user".to_string()))
}

fn parse_rfc3339_param(raw: &str, name: &str) -> Result<i64> {
    parse_rfc3339_unix(raw).ok_or_else(|| {
        AppError::BadRequest(format!(
            "Invalid '{}' parameter: must be RFC3339 datetime",
            name
        ))
    })
}

fn calendar_view(c: ExternalCalendar) -> CalendarView {
    CalendarView {
        id: c.id,
        calendar_id: c.calendar_id,
        summary: c.summary,
        primary: c.is_primary,
        selected: c.selected,
        background_color: c.background_color,
        foreground_color: c.foreground_color,
    }
}

fn manual_view(b: AvailabilityBlock) -> ManualBlockView {
    ManualBlockView {
        id: b.id,
        user_id: b.user_id,
        start_at: format_unix_rfc3339(b.start_at),
        end_at: format_unix_rfc3339(b.end_at),
        note: b.note,
    }
}

fn external_view(b: ExternalAvailabilityBlock) -> ExternalBlockView {
    ExternalBlockView {
        id: b.id,
        user_id: b.user_id,
        source: b.source,
        start_at: format_unix_rfc3339(b.start_at),
        end_at: format_unix_rfc3339(b.end_at),
    }
}
