// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! User and space models for storage.

/// User row.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub display_name: String,
    /// When the user was created (unix seconds)
    pub created_at: i64,
}

/// A space is the shared planning unit a couple belongs to.
#[derive(Debug, Clone)]
pub struct Space {
    pub id: i64,
    pub name: String,
    /// When the space was created (unix seconds)
    pub created_at: i64,
}
