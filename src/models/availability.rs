// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Availability block models.
//!
//! Manual blocks are authored by space members; external blocks are derived
//! from provider busy intervals and replaced wholesale on each sync.

/// A manually entered availability block, scoped to a space.
#[derive(Debug, Clone)]
pub struct AvailabilityBlock {
    pub id: i64,
    pub space_id: i64,
    /// Member who created the block
    pub user_id: i64,
    /// Start of the interval (unix seconds)
    pub start_at: i64,
    /// End of the interval (unix seconds)
    pub end_at: i64,
    pub note: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A busy interval mirrored from an external calendar account.
#[derive(Debug, Clone)]
pub struct ExternalAvailabilityBlock {
    pub id: i64,
    pub external_account_id: i64,
    /// Owner of the linked account (denormalized for space-wide queries)
    pub user_id: i64,
    /// Provider name, e.g. "google"
    pub source: String,
    pub start_at: i64,
    pub end_at: i64,
    pub created_at: i64,
}
