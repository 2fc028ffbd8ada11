// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod availability;
pub mod crypto;
pub mod google;
pub mod sync;

pub use availability::AvailabilityService;
pub use crypto::TokenCipher;
pub use google::GoogleClient;
pub use sync::{CalendarSyncService, OAuthResult, RefreshLocks};
