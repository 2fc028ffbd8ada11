// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod account;
pub mod availability;
pub mod calendar;
pub mod user;

pub use account::{ExternalAccount, NewExternalAccount, SyncState, SyncSummary};
pub use availability::{AvailabilityBlock, ExternalAvailabilityBlock};
pub use calendar::{CalendarUpsert, ExternalCalendar};
pub use user::{Space, User};
