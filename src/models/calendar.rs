// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Mirrored calendar-list models.

/// A calendar mirrored from the provider's calendar list.
///
/// `selected` is user intent: it controls whether the calendar participates
/// in free/busy syncs and it survives calendar-list refreshes.
#[derive(Debug, Clone)]
pub struct ExternalCalendar {
    pub id: i64,
    pub external_account_id: i64,
    /// Provider-native calendar id
    pub calendar_id: String,
    pub summary: String,
    pub is_primary: bool,
    pub selected: bool,
    pub background_color: Option<String>,
    pub foreground_color: Option<String>,
}

/// Provider-sourced fields for the calendar-list upsert.
///
/// Deliberately has no `selected` field; the upsert only sets it on first
/// insert (primary calendars default to selected).
#[derive(Debug, Clone)]
pub struct CalendarUpsert {
    pub calendar_id: String,
    pub summary: String,
    pub is_primary: bool,
    pub background_color: Option<String>,
    pub foreground_color: Option<String>,
}
