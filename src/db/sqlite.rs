// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! SQLite client wrapper with typed operations.
//!
//! Provides high-level operations for:
//! - Users and spaces (membership)
//! - External accounts (encrypted OAuth tokens)
//! - Mirrored calendars (with durable `selected` flags)
//! - Sync state and availability blocks (manual + external)
//!
//! All calls run on the blocking thread pool; handlers stay async.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use crate::error::AppError;
use crate::models::{
    AvailabilityBlock, CalendarUpsert, ExternalAccount, ExternalAvailabilityBlock,
    ExternalCalendar, NewExternalAccount, Space, SyncState, User,
};

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    display_name TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS spaces (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS space_members (
    space_id INTEGER NOT NULL REFERENCES spaces(id) ON DELETE CASCADE,
    user_id INTEGER NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
    PRIMARY KEY (space_id, user_id)
);

CREATE TABLE IF NOT EXISTS external_accounts (
    id INTEGER PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    provider TEXT NOT NULL,
    provider_account_id TEXT NOT NULL,
    access_token_encrypted TEXT NOT NULL,
    refresh_token_encrypted TEXT,
    token_expires_at INTEGER NOT NULL,
    scope TEXT NOT NULL,
    revoked_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE (user_id, provider)
);

CREATE TABLE IF NOT EXISTS external_calendars (
    id INTEGER PRIMARY KEY,
    external_account_id INTEGER NOT NULL REFERENCES external_accounts(id) ON DELETE CASCADE,
    calendar_id TEXT NOT NULL,
    summary TEXT NOT NULL,
    is_primary INTEGER NOT NULL DEFAULT 0,
    selected INTEGER NOT NULL DEFAULT 0,
    background_color TEXT,
    foreground_color TEXT,
    UNIQUE (external_account_id, calendar_id)
);

CREATE TABLE IF NOT EXISTS sync_states (
    external_account_id INTEGER PRIMARY KEY
        REFERENCES external_accounts(id) ON DELETE CASCADE,
    last_synced_at INTEGER,
    last_sync_error TEXT
);

CREATE TABLE IF NOT EXISTS external_availability_blocks (
    id INTEGER PRIMARY KEY,
    external_account_id INTEGER NOT NULL
        REFERENCES external_accounts(id) ON DELETE CASCADE,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    source TEXT NOT NULL,
    start_at INTEGER NOT NULL,
    end_at INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_external_blocks_window
    ON external_availability_blocks (user_id, start_at, end_at);

CREATE TABLE IF NOT EXISTS availability_blocks (
    id INTEGER PRIMARY KEY,
    space_id INTEGER NOT NULL REFERENCES spaces(id) ON DELETE CASCADE,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    start_at INTEGER NOT NULL,
    end_at INTEGER NOT NULL,
    note TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_availability_blocks_window
    ON availability_blocks (space_id, start_at, end_at);
";

/// SQLite database client.
#[derive(Clone)]
pub struct Db {
    pool: Pool<SqliteConnectionManager>,
}

impl Db {
    /// Open (or create) the database at `path` and ensure the schema exists.
    pub fn open(path: &str) -> Result<Self, AppError> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
            )
        });

        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| AppError::Database(format!("Failed to open database: {}", e)))?;

        let conn = pool
            .get()
            .map_err(|e| AppError::Database(format!("Connection pool: {}", e)))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| AppError::Database(format!("Schema init failed: {}", e)))?;

        tracing::info!(path, "Database opened");

        Ok(Self { pool })
    }

    /// Run a blocking closure against a pooled connection.
    async fn run<T, F>(&self, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| AppError::Database(format!("Connection pool: {}", e)))?;
            f(&mut conn).map_err(|e| AppError::Database(e.to_string()))
        })
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Blocking task panicked: {}", e)))?
    }

    // ─── User & Space Operations ─────────────────────────────────

    /// Create a user.
    pub async fn create_user(&self, email: &str, display_name: &str) -> Result<User, AppError> {
        let email = email.to_string();
        let display_name = display_name.to_string();
        let now = chrono::Utc::now().timestamp();

        self.run(move |conn| {
            conn.execute(
                "INSERT INTO users (email, display_name, created_at) VALUES (?1, ?2, ?3)",
                params![email, display_name, now],
            )?;
            Ok(User {
                id: conn.last_insert_rowid(),
                email,
                display_name,
                created_at: now,
            })
        })
        .await
    }

    /// Get a user by id.
    pub async fn get_user(&self, user_id: i64) -> Result<Option<User>, AppError> {
        self.run(move |conn| {
            conn.query_row(
                "SELECT id, email, display_name, created_at FROM users WHERE id = ?1",
                params![user_id],
                map_user,
            )
            .optional()
        })
        .await
    }

    /// Create a space with its members in one transaction.
    pub async fn create_space(
        &self,
        name: &str,
        member_ids: Vec<i64>,
    ) -> Result<Space, AppError> {
        let name = name.to_string();
        let now = chrono::Utc::now().timestamp();

        self.run(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO spaces (name, created_at) VALUES (?1, ?2)",
                params![name, now],
            )?;
            let space_id = tx.last_insert_rowid();
            for user_id in &member_ids {
                tx.execute(
                    "INSERT INTO space_members (space_id, user_id) VALUES (?1, ?2)",
                    params![space_id, user_id],
                )?;
            }
            tx.commit()?;
            Ok(Space {
                id: space_id,
                name,
                created_at: now,
            })
        })
        .await
    }

    /// Get the space a user belongs to (each user has at most one).
    pub async fn get_space_for_user(&self, user_id: i64) -> Result<Option<Space>, AppError> {
        self.run(move |conn| {
            conn.query_row(
                "SELECT s.id, s.name, s.created_at
                 FROM spaces s
                 JOIN space_members m ON m.space_id = s.id
                 WHERE m.user_id = ?1",
                params![user_id],
                |row| {
                    Ok(Space {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                },
            )
            .optional()
        })
        .await
    }

    // ─── External Account Operations ─────────────────────────────

    /// Insert or replace the account for `(user_id, provider)`.
    ///
    /// A `None` refresh token keeps any previously stored one (Google omits
    /// the refresh token on repeat consent). Reconnecting always clears
    /// `revoked_at`.
    pub async fn upsert_external_account(
        &self,
        account: NewExternalAccount,
    ) -> Result<ExternalAccount, AppError> {
        let now = chrono::Utc::now().timestamp();

        self.run(move |conn| {
            conn.execute(
                "INSERT INTO external_accounts (
                    user_id, provider, provider_account_id, access_token_encrypted,
                    refresh_token_encrypted, token_expires_at, scope, revoked_at,
                    created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8, ?8)
                ON CONFLICT(user_id, provider) DO UPDATE SET
                    provider_account_id = excluded.provider_account_id,
                    access_token_encrypted = excluded.access_token_encrypted,
                    refresh_token_encrypted =
                        COALESCE(excluded.refresh_token_encrypted, refresh_token_encrypted),
                    token_expires_at = excluded.token_expires_at,
                    scope = excluded.scope,
                    revoked_at = NULL,
                    updated_at = excluded.updated_at",
                params![
                    account.user_id,
                    account.provider,
                    account.provider_account_id,
                    account.access_token_encrypted,
                    account.refresh_token_encrypted,
                    account.token_expires_at,
                    account.scope,
                    now
                ],
            )?;

            conn.query_row(
                &format!("{} WHERE user_id = ?1 AND provider = ?2", SELECT_ACCOUNT),
                params![account.user_id, account.provider],
                map_account,
            )
        })
        .await
    }

    /// Get a user's account for a provider.
    pub async fn get_external_account(
        &self,
        user_id: i64,
        provider: &str,
    ) -> Result<Option<ExternalAccount>, AppError> {
        let provider = provider.to_string();
        self.run(move |conn| {
            conn.query_row(
                &format!("{} WHERE user_id = ?1 AND provider = ?2", SELECT_ACCOUNT),
                params![user_id, provider],
                map_account,
            )
            .optional()
        })
        .await
    }

    /// Get an account by id.
    pub async fn get_external_account_by_id(
        &self,
        account_id: i64,
    ) -> Result<Option<ExternalAccount>, AppError> {
        self.run(move |conn| {
            conn.query_row(
                &format!("{} WHERE id = ?1", SELECT_ACCOUNT),
                params![account_id],
                map_account,
            )
            .optional()
        })
        .await
    }

    /// Store refreshed tokens. A `None` refresh token keeps the stored one.
    pub async fn update_account_tokens(
        &self,
        account_id: i64,
        access_token_encrypted: String,
        refresh_token_encrypted: Option<String>,
        token_expires_at: i64,
    ) -> Result<(), AppError> {
        let now = chrono::Utc::now().timestamp();
        self.run(move |conn| {
            conn.execute(
                "UPDATE external_accounts SET
                    access_token_encrypted = ?2,
                    refresh_token_encrypted = COALESCE(?3, refresh_token_encrypted),
                    token_expires_at = ?4,
                    updated_at = ?5
                 WHERE id = ?1",
                params![
                    account_id,
                    access_token_encrypted,
                    refresh_token_encrypted,
                    token_expires_at,
                    now
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Mark an account revoked. Sync refuses revoked accounts until the user
    /// reconnects.
    pub async fn mark_account_revoked(&self, account_id: i64, at: i64) -> Result<(), AppError> {
        self.run(move |conn| {
            conn.execute(
                "UPDATE external_accounts SET revoked_at = ?2, updated_at = ?2 WHERE id = ?1",
                params![account_id, at],
            )?;
            Ok(())
        })
        .await
    }

    /// Delete an account; calendars, sync state and external blocks cascade.
    pub async fn delete_external_account(&self, account_id: i64) -> Result<(), AppError> {
        self.run(move |conn| {
            conn.execute(
                "DELETE FROM external_accounts WHERE id = ?1",
                params![account_id],
            )?;
            Ok(())
        })
        .await
    }

    // ─── Calendar Operations ─────────────────────────────────────

    /// Upsert one calendar-list entry.
    ///
    /// The update column list deliberately omits `selected`: it is user
    /// intent and must survive list refreshes. On first insert, `selected`
    /// starts as `is_primary`.
    pub async fn upsert_calendar(
        &self,
        account_id: i64,
        calendar: CalendarUpsert,
    ) -> Result<(), AppError> {
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO external_calendars (
                    external_account_id, calendar_id, summary, is_primary, selected,
                    background_color, foreground_color
                ) VALUES (?1, ?2, ?3, ?4, ?4, ?5, ?6)
                ON CONFLICT(external_account_id, calendar_id) DO UPDATE SET
                    summary = excluded.summary,
                    is_primary = excluded.is_primary,
                    background_color = excluded.background_color,
                    foreground_color = excluded.foreground_color",
                params![
                    account_id,
                    calendar.calendar_id,
                    calendar.summary,
                    calendar.is_primary,
                    calendar.background_color,
                    calendar.foreground_color
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// List all mirrored calendars for an account.
    pub async fn list_calendars(
        &self,
        account_id: i64,
    ) -> Result<Vec<ExternalCalendar>, AppError> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, external_account_id, calendar_id, summary, is_primary,
                        selected, background_color, foreground_color
                 FROM external_calendars
                 WHERE external_account_id = ?1
                 ORDER BY is_primary DESC, summary",
            )?;
            let rows = stmt.query_map(params![account_id], map_calendar)?;
            rows.collect()
        })
        .await
    }

    /// Get one mirrored calendar by row id.
    pub async fn get_calendar(
        &self,
        calendar_row_id: i64,
    ) -> Result<Option<ExternalCalendar>, AppError> {
        self.run(move |conn| {
            conn.query_row(
                "SELECT id, external_account_id, calendar_id, summary, is_primary,
                        selected, background_color, foreground_color
                 FROM external_calendars WHERE id = ?1",
                params![calendar_row_id],
                map_calendar,
            )
            .optional()
        })
        .await
    }

    /// Provider-native ids of the calendars currently selected for sync.
    pub async fn selected_calendar_ids(&self, account_id: i64) -> Result<Vec<String>, AppError> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT calendar_id FROM external_calendars
                 WHERE external_account_id = ?1 AND selected = 1
                 ORDER BY calendar_id",
            )?;
            let rows = stmt.query_map(params![account_id], |row| row.get(0))?;
            rows.collect()
        })
        .await
    }

    /// Flip a calendar's `selected` flag.
    pub async fn set_calendar_selected(
        &self,
        calendar_row_id: i64,
        selected: bool,
    ) -> Result<(), AppError> {
        self.run(move |conn| {
            conn.execute(
                "UPDATE external_calendars SET selected = ?2 WHERE id = ?1",
                params![calendar_row_id, selected],
            )?;
            Ok(())
        })
        .await
    }

    // ─── Sync State Operations ───────────────────────────────────

    /// Get the sync bookkeeping row for an account.
    pub async fn get_sync_state(&self, account_id: i64) -> Result<Option<SyncState>, AppError> {
        self.run(move |conn| {
            conn.query_row(
                "SELECT external_account_id, last_synced_at, last_sync_error
                 FROM sync_states WHERE external_account_id = ?1",
                params![account_id],
                |row| {
                    Ok(SyncState {
                        external_account_id: row.get(0)?,
                        last_synced_at: row.get(1)?,
                        last_sync_error: row.get(2)?,
                    })
                },
            )
            .optional()
        })
        .await
    }

    /// Record a successful sync: stamp `last_synced_at`, clear the error.
    pub async fn record_sync_success(&self, account_id: i64, at: i64) -> Result<(), AppError> {
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO sync_states (external_account_id, last_synced_at, last_sync_error)
                 VALUES (?1, ?2, NULL)
                 ON CONFLICT(external_account_id) DO UPDATE SET
                    last_synced_at = excluded.last_synced_at,
                    last_sync_error = NULL",
                params![account_id, at],
            )?;
            Ok(())
        })
        .await
    }

    /// Record a failed sync attempt. `last_synced_at` keeps pointing at the
    /// last success.
    pub async fn record_sync_error(&self, account_id: i64, error: &str) -> Result<(), AppError> {
        let error = error.to_string();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO sync_states (external_account_id, last_synced_at, last_sync_error)
                 VALUES (?1, NULL, ?2)
                 ON CONFLICT(external_account_id) DO UPDATE SET
                    last_sync_error = excluded.last_sync_error",
                params![account_id, error],
            )?;
            Ok(())
        })
        .await
    }

    // ─── External Availability Blocks ────────────────────────────

    /// Replace the account's whole block snapshot in one transaction.
    ///
    /// Readers never observe a partial write: either the old snapshot or the
    /// new one. Returns the number of rows inserted.
    pub async fn replace_external_blocks(
        &self,
        account_id: i64,
        user_id: i64,
        source: String,
        blocks: Vec<(i64, i64)>,
        now: i64,
    ) -> Result<u32, AppError> {
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute(
                "DELETE FROM external_availability_blocks WHERE external_account_id = ?1",
                params![account_id],
            )?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO external_availability_blocks (
                        external_account_id, user_id, source, start_at, end_at, created_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for (start_at, end_at) in &blocks {
                    stmt.execute(params![account_id, user_id, source, start_at, end_at, now])?;
                }
            }
            tx.commit()?;
            Ok(blocks.len() as u32)
        })
        .await
    }

    /// All external blocks for an account, ordered by start.
    pub async fn list_external_blocks_for_account(
        &self,
        account_id: i64,
    ) -> Result<Vec<ExternalAvailabilityBlock>, AppError> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, external_account_id, user_id, source, start_at, end_at, created_at
                 FROM external_availability_blocks
                 WHERE external_account_id = ?1
                 ORDER BY start_at, end_at",
            )?;
            let rows = stmt.query_map(params![account_id], map_external_block)?;
            rows.collect()
        })
        .await
    }

    /// External blocks of all space members overlapping `[from, to]`
    /// (inclusive on both ends).
    pub async fn external_blocks_in_window(
        &self,
        space_id: i64,
        from: i64,
        to: i64,
    ) -> Result<Vec<ExternalAvailabilityBlock>, AppError> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT b.id, b.external_account_id, b.user_id, b.source,
                        b.start_at, b.end_at, b.created_at
                 FROM external_availability_blocks b
                 JOIN space_members m ON m.user_id = b.user_id
                 WHERE m.space_id = ?1 AND b.start_at <= ?3 AND b.end_at >= ?2
                 ORDER BY b.start_at, b.end_at",
            )?;
            let rows = stmt.query_map(params![space_id, from, to], map_external_block)?;
            rows.collect()
        })
        .await
    }

    // ─── Manual Availability Blocks ──────────────────────────────

    /// Create a manual availability block.
    pub async fn create_availability_block(
        &self,
        space_id: i64,
        user_id: i64,
        start_at: i64,
        end_at: i64,
        note: Option<String>,
    ) -> Result<AvailabilityBlock, AppError> {
        let now = chrono::Utc::now().timestamp();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO availability_blocks (
                    space_id, user_id, start_at, end_at, note, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![space_id, user_id, start_at, end_at, note, now],
            )?;
            Ok(AvailabilityBlock {
                id: conn.last_insert_rowid(),
                space_id,
                user_id,
                start_at,
                end_at,
                note,
                created_at: now,
                updated_at: now,
            })
        })
        .await
    }

    /// Delete a manual block scoped to a space. Returns whether a row went.
    pub async fn delete_availability_block(
        &self,
        block_id: i64,
        space_id: i64,
    ) -> Result<bool, AppError> {
        self.run(move |conn| {
            let changed = conn.execute(
                "DELETE FROM availability_blocks WHERE id = ?1 AND space_id = ?2",
                params![block_id, space_id],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    /// Manual blocks of a space overlapping `[from, to]` (inclusive).
    pub async fn availability_blocks_in_window(
        &self,
        space_id: i64,
        from: i64,
        to: i64,
    ) -> Result<Vec<AvailabilityBlock>, AppError> {
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, space_id, user_id, start_at, end_at, note, created_at, updated_at
                 FROM availability_blocks
                 WHERE space_id = ?1 AND start_at <= ?3 AND end_at >= ?2
                 ORDER BY start_at, end_at",
            )?;
            let rows = stmt.query_map(params![space_id, from, to], map_manual_block)?;
            rows.collect()
        })
        .await
    }
}

const SELECT_ACCOUNT: &str = "SELECT id, user_id, provider, provider_account_id,
    access_token_encrypted, refresh_token_encrypted, token_expires_at, scope,
    revoked_at, created_at, updated_at
 FROM external_accounts";

fn map_user(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        display_name: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn map_account(row: &Row) -> rusqlite::Result<ExternalAccount> {
    Ok(ExternalAccount {
        id: row.get(0)?,
        user_id: row.get(1)?,
        provider: row.get(2)?,
        provider_account_id: row.get(3)?,
        access_token_encrypted: row.get(4)?,
        refresh_token_encrypted: row.get(5)?,
        token_expires_at: row.get(6)?,
        scope: row.get(7)?,
        revoked_at: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn map_calendar(row: &Row) -> rusqlite::Result<ExternalCalendar> {
    Ok(ExternalCalendar {
        id: row.get(0)?,
        external_account_id: row.get(1)?,
        calendar_id: row.get(2)?,
        summary: row.get(3)?,
        is_primary: row.get(4)?,
        selected: row.get(5)?,
        background_color: row.get(6)?,
        foreground_color: row.get(7)?,
    })
}

fn map_external_block(row: &Row) -> rusqlite::Result<ExternalAvailabilityBlock> {
    Ok(ExternalAvailabilityBlock {
        id: row.get(0)?,
        external_account_id: row.get(1)?,
        user_id: row.get(2)?,
        source: row.get(3)?,
        start_at: row.get(4)?,
        end_at: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn map_manual_block(row: &Row) -> rusqlite::Result<AvailabilityBlock> {
    Ok(AvailabilityBlock {
        id: row.get(0)?,
        space_id: row.get(1)?,
        user_id: row.get(2)?,
        start_at: row.get(3)?,
        end_at: row.get(4)?,
        note: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}
