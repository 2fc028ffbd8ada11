// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Tandem: shared availability planning for two people
//!
//! This crate provides the backend API for linking Google Calendar accounts
//! and aggregating each partner's busy times into one availability view.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::Db;
use services::{AvailabilityService, CalendarSyncService};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub db: Db,
    pub sync_service: CalendarSyncService,
    pub availability_service: AvailabilityService,
}
