// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Availability aggregation for a couple's shared space.
//!
//! Merges the two sources of truth: manually entered blocks (owned by the
//! space) and externally synced blocks (owned by each member's connected
//! calendar account). Overlap with the requested window is inclusive on both
//! ends: a block counts when `start_at <= to && end_at >= from`.

use crate::db::Db;
use crate::error::AppError;
use crate::models::{AvailabilityBlock, ExternalAvailabilityBlock};
use chrono::{DateTime, NaiveDate};

/// Combined availability for one query window.
#[derive(Debug)]
pub struct AvailabilityWindow {
    pub manual: Vec<AvailabilityBlock>,
    pub external: Vec<ExternalAvailabilityBlock>,
}

/// Read-side service over stored availability blocks.
#[derive(Clone)]
pub struct AvailabilityService {
    db: Db,
}

impl AvailabilityService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// All blocks overlapping `[from, to]` for a space: manual blocks of the
    /// space itself plus external blocks of every member, whoever asked.
    pub async fn window(
        &self,
        space_id: i64,
        from: i64,
        to: i64,
    ) -> Result<AvailabilityWindow, AppError> {
        let manual = self.db.availability_blocks_in_window(space_id, from, to).await?;
        let external = self.db.external_blocks_in_window(space_id, from, to).await?;
        Ok(AvailabilityWindow { manual, external })
    }

    /// Store a manual block for a member of the space.
    pub async fn create_block(
        &self,
        space_id: i64,
        user_id: i64,
        start_at: i64,
        end_at: i64,
        note: Option<String>,
    ) -> Result<AvailabilityBlock, AppError> {
        if start_at >= end_at {
            return Err(AppError::BadRequest(
                "Block must end after it starts".to_string(),
            ));
        }
        self.db
            .create_availability_block(space_id, user_id, start_at, end_at, note)
            .await
    }

    /// Delete a manual block, scoped to the space so members cannot delete
    /// blocks of another couple.
    pub async fn delete_block(&self, space_id: i64, block_id: i64) -> Result<(), AppError> {
        let deleted = self.db.delete_availability_block(block_id, space_id).await?;
        if !deleted {
            return Err(AppError::NotFound(format!(
                "Availability block {}",
                block_id
            )));
        }
        Ok(())
    }
}

/// One clipped piece of a block, covering a single UTC calendar day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySegment {
    pub day: NaiveDate,
    pub start_at: i64,
    pub end_at: i64,
}

/// Expand a block into per-day segments for grid rendering.
///
/// Purely presentational: storage keeps one row per block no matter how many
/// days it spans. A block ending exactly at midnight does not spill a
/// zero-length segment into the next day.
pub fn expand_for_grid(start_at: i64, end_at: i64) -> Vec<DaySegment> {
    let mut segments = Vec::new();
    let mut cursor = start_at;

    while cursor < end_at {
        let day = match DateTime::from_timestamp(cursor, 0) {
            Some(dt) => dt.date_naive(),
            None => break,
        };
        let next_midnight = match day.succ_opt().and_then(|d| d.and_hms_opt(0, 0, 0)) {
            Some(dt) => dt.and_utc().timestamp(),
            None => break,
        };

        segments.push(DaySegment {
            day,
            start_at: cursor,
            end_at: end_at.min(next_midnight),
        });
        cursor = next_midnight;
    }

    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2025-01-10T00:00:00Z
    const JAN_10: i64 = 1_736_467_200;
    const DAY: i64 = 86_400;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_expand_single_day_block() {
        let start = JAN_10 + 9 * 3600;
        let end = JAN_10 + 11 * 3600;

        let segments = expand_for_grid(start, end);

        assert_eq!(
            segments,
            vec![DaySegment {
                day: date(2025, 1, 10),
                start_at: start,
                end_at: end,
            }]
        );
    }

    #[test]
    fn test_expand_block_spanning_three_days() {
        let start = JAN_10 + 22 * 3600; // Jan 10, 22:00
        let end = JAN_10 + 2 * DAY + 8 * 3600; // Jan 12, 08:00

        let segments = expand_for_grid(start, end);

        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].day, date(2025, 1, 10));
        assert_eq!(segments[0].start_at, start);
        assert_eq!(segments[0].end_at, JAN_10 + DAY);
        assert_eq!(segments[1].day, date(2025, 1, 11));
        assert_eq!(segments[1].start_at, JAN_10 + DAY);
        assert_eq!(segments[1].end_at, JAN_10 + 2 * DAY);
        assert_eq!(segments[2].day, date(2025, 1, 12));
        assert_eq!(segments[2].start_at, JAN_10 + 2 * DAY);
        assert_eq!(segments[2].end_at, end);
    }

    #[test]
    fn test_expand_block_ending_at_midnight_stays_on_one_day() {
        let start = JAN_10 + 23 * 3600;
        let end = JAN_10 + DAY;

        let segments = expand_for_grid(start, end);

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].day, date(2025, 1, 10));
        assert_eq!(segments[0].end_at, end);
    }

    #[test]
    fn test_expand_full_day_block() {
        let segments = expand_for_grid(JAN_10, JAN_10 + DAY);

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].start_at, JAN_10);
        assert_eq!(segments[0].end_at, JAN_10 + DAY);
    }

    #[test]
    fn test_expand_empty_and_inverted_ranges() {
        assert!(expand_for_grid(JAN_10, JAN_10).is_empty());
        assert!(expand_for_grid(JAN_10 + 100, JAN_10).is_empty());
    }
}
