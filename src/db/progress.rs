use chrono::{DateTime, Utc};
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use super::catalog::{fetch_item, item_from_row};
use super::stats::{close_cycle_if_finished, load_user_stats, save_user_stats};
use super::Database;
use crate::error::{Error, Result};
use crate::models::{Completion, ItemFilter, ItemWithProgress, Progress, ProgressStatus};
use crate::sampler::pick_uniform;
use crate::streak;

// Catalog left-joined with one user's overlay; ?1 is always the user id
const JOINED_SELECT: &str = r#"
    SELECT i.id, i.title, i.category, i.subcategory, i.attachments, i.created_at,
           COALESCE(p.status, 'pending'), COALESCE(p.starred, 0), COALESCE(p.notes, ''),
           p.started_at, p.completed_at, p.updated_at
    FROM items i
    LEFT JOIN progress p ON p.item_id = i.id AND p.user_id = ?1
"#;

fn joined_from_row(row: &Row<'_>, user_id: i64) -> rusqlite::Result<ItemWithProgress> {
    let item = item_from_row(row, 0)?;
    let progress = Progress {
        user_id,
        item_id: item.id,
        status: row.get(6)?,
        starred: row.get::<_, i64>(7)? != 0,
        notes: row.get(8)?,
        started_at: row.get(9)?,
        completed_at: row.get(10)?,
        updated_at: row.get(11)?,
    };
    Ok(ItemWithProgress { item, progress })
}

pub(crate) fn fetch_joined(conn: &Connection, user_id: i64, item_id: i64) -> Result<ItemWithProgress> {
    conn.query_row(
        &format!("{JOINED_SELECT} WHERE i.id = ?2"),
        params![user_id, item_id],
        |row| joined_from_row(row, user_id),
    )
    .optional()?
    .ok_or_else(|| Error::NotFound(format!("item {item_id}")))
}

/// Effective status of an item for a user; `NotFound` if the item doesn't exist.
fn effective_status(conn: &Connection, user_id: i64, item_id: i64) -> Result<ProgressStatus> {
    fetch_item(conn, item_id)?;
    let status: Option<ProgressStatus> = conn
        .query_row(
            "SELECT status FROM progress WHERE user_id = ?1 AND item_id = ?2",
            params![user_id, item_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(status.unwrap_or(ProgressStatus::Pending))
}

fn pending_item_ids(conn: &Connection, user_id: i64) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT i.id
        FROM items i
        LEFT JOIN progress p ON p.item_id = i.id AND p.user_id = ?1
        WHERE COALESCE(p.status, 'pending') = 'pending'
        ORDER BY i.id
        "#,
    )?;
    let rows = stmt.query_map(params![user_id], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<i64>>>()?)
}

fn in_progress_item(conn: &Connection, user_id: i64) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT item_id FROM progress WHERE user_id = ?1 AND status = 'in_progress'",
            params![user_id],
            |row| row.get(0),
        )
        .optional()?)
}

/// Upsert the status of one overlay row, keeping `completed_at` in step with
/// `done` and `started_at` in step with the most recent start.
fn write_status(
    conn: &Connection,
    user_id: i64,
    item_id: i64,
    status: ProgressStatus,
    now: DateTime<Utc>,
) -> Result<()> {
    let (started_at, completed_at) = match status {
        ProgressStatus::Pending => (None, None),
        ProgressStatus::InProgress => (Some(now), None),
        ProgressStatus::Done => (Some(now), Some(now)),
    };

    conn.execute(
        r#"
        INSERT INTO progress (user_id, item_id, status, started_at, completed_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(user_id, item_id) DO UPDATE SET
            status = excluded.status,
            started_at = CASE
                WHEN excluded.status = 'done' THEN COALESCE(progress.started_at, excluded.started_at)
                ELSE excluded.started_at
            END,
            completed_at = excluded.completed_at,
            updated_at = excluded.updated_at
        "#,
        params![user_id, item_id, status, started_at, completed_at, now],
    )?;
    Ok(())
}

/// Clear the user's active item (if any) and make `item_id` the active one.
fn activate(conn: &Connection, user_id: i64, item_id: i64, now: DateTime<Utc>) -> Result<()> {
    if let Some(previous) = in_progress_item(conn, user_id)? {
        if previous != item_id {
            write_status(conn, user_id, previous, ProgressStatus::Pending, now)?;
            debug!(user_id, item_id = previous, "previous item returned to pending");
        }
    }
    write_status(conn, user_id, item_id, ProgressStatus::InProgress, now)
}

fn write_direct(
    conn: &Connection,
    user_id: i64,
    item_id: i64,
    target: ProgressStatus,
    now: DateTime<Utc>,
) -> Result<()> {
    match target {
        ProgressStatus::InProgress => activate(conn, user_id, item_id, now),
        ProgressStatus::Pending => write_status(conn, user_id, item_id, target, now),
        ProgressStatus::Done => {
            write_status(conn, user_id, item_id, target, now)?;
            let mut stats = load_user_stats(conn, user_id)?;
            if close_cycle_if_finished(conn, &mut stats)? {
                save_user_stats(conn, &stats)?;
            }
            Ok(())
        }
    }
}

impl Database {
    pub fn start(&self, user_id: i64, item_id: i64) -> Result<ItemWithProgress> {
        self.start_at(user_id, item_id, Utc::now())
    }

    /// Move a pending item to in_progress, sending any other active item back
    /// to pending in the same transaction.
    pub fn start_at(
        &self,
        user_id: i64,
        item_id: i64,
        now: DateTime<Utc>,
    ) -> Result<ItemWithProgress> {
        let tx = self.begin()?;
        let status = effective_status(&tx, user_id, item_id)?;
        if status != ProgressStatus::Pending {
            return Err(Error::NotEligible(format!(
                "item {item_id} is {status}, only pending items can be started"
            )));
        }
        activate(&tx, user_id, item_id, now)?;
        tx.commit()?;

        info!(user_id, item_id, "item started");
        fetch_joined(&self.conn, user_id, item_id)
    }

    /// Get-next-pending: pick a pending item uniformly at random and start it.
    pub fn start_next(&self, user_id: i64) -> Result<ItemWithProgress> {
        self.start_next_with(user_id, &mut rand::thread_rng(), Utc::now())
    }

    pub fn start_next_with<R: Rng + ?Sized>(
        &self,
        user_id: i64,
        rng: &mut R,
        now: DateTime<Utc>,
    ) -> Result<ItemWithProgress> {
        let tx = self.begin()?;
        let pending = pending_item_ids(&tx, user_id)?;
        let item_id = pick_uniform(&pending, rng).ok_or(Error::NoPendingItems)?;
        debug!(user_id, item_id, candidates = pending.len(), "picked next pending item");

        activate(&tx, user_id, item_id, now)?;
        tx.commit()?;

        info!(user_id, item_id, "item started");
        fetch_joined(&self.conn, user_id, item_id)
    }

    /// Give up on the active item and start a different random pending one.
    pub fn skip(&self, user_id: i64) -> Result<ItemWithProgress> {
        self.skip_with(user_id, &mut rand::thread_rng(), Utc::now())
    }

    pub fn skip_with<R: Rng + ?Sized>(
        &self,
        user_id: i64,
        rng: &mut R,
        now: DateTime<Utc>,
    ) -> Result<ItemWithProgress> {
        let tx = self.begin()?;
        let current = in_progress_item(&tx, user_id)?;
        // Read before releasing the current item so it can't be drawn again
        let pending = pending_item_ids(&tx, user_id)?;
        let item_id = pick_uniform(&pending, rng).ok_or(Error::NoPendingItems)?;

        activate(&tx, user_id, item_id, now)?;
        tx.commit()?;

        info!(user_id, skipped = ?current, item_id, "item skipped");
        fetch_joined(&self.conn, user_id, item_id)
    }

    pub fn complete(&self, user_id: i64, item_id: i64) -> Result<Completion> {
        self.complete_at(user_id, item_id, Utc::now())
    }

    /// Finish the active item, then update the streak and the cycle counter.
    pub fn complete_at(&self, user_id: i64, item_id: i64, now: DateTime<Utc>) -> Result<Completion> {
        let tx = self.begin()?;
        let status = effective_status(&tx, user_id, item_id)?;
        if status != ProgressStatus::InProgress {
            return Err(Error::NotEligible(format!(
                "item {item_id} is {status}, only the in-progress item can be completed"
            )));
        }
        write_status(&tx, user_id, item_id, ProgressStatus::Done, now)?;

        let previous = load_user_stats(&tx, user_id)?;
        let mut stats = streak::record_activity(&previous, now.date_naive());
        let cycle_completed = close_cycle_if_finished(&tx, &mut stats)?;
        save_user_stats(&tx, &stats)?;
        tx.commit()?;

        info!(
            user_id,
            item_id,
            streak = stats.current_streak,
            cycle_completed,
            "item completed"
        );

        Ok(Completion {
            item: fetch_joined(&self.conn, user_id, item_id)?,
            cycle_completed,
            stats: self.get_stats_at(user_id, now.date_naive())?,
        })
    }

    /// Flip between done and pending without passing through in_progress.
    /// Manual corrections don't count towards the streak.
    pub fn toggle_status(&self, user_id: i64, item_id: i64) -> Result<ItemWithProgress> {
        let now = Utc::now();
        let tx = self.begin()?;
        let target = match effective_status(&tx, user_id, item_id)? {
            ProgressStatus::Done => ProgressStatus::Pending,
            ProgressStatus::Pending | ProgressStatus::InProgress => ProgressStatus::Done,
        };
        write_direct(&tx, user_id, item_id, target, now)?;
        tx.commit()?;

        info!(user_id, item_id, status = %target, "status toggled");
        fetch_joined(&self.conn, user_id, item_id)
    }

    /// Direct status set for corrections. Setting in_progress still honours the
    /// one-active-item rule.
    pub fn set_status(
        &self,
        user_id: i64,
        item_id: i64,
        target: ProgressStatus,
    ) -> Result<ItemWithProgress> {
        let now = Utc::now();
        let tx = self.begin()?;
        let current = effective_status(&tx, user_id, item_id)?;
        if current != target {
            write_direct(&tx, user_id, item_id, target, now)?;
            tx.commit()?;
            info!(user_id, item_id, from = %current, to = %target, "status set");
        }
        fetch_joined(&self.conn, user_id, item_id)
    }

    pub fn toggle_star(&self, user_id: i64, item_id: i64) -> Result<ItemWithProgress> {
        fetch_item(&self.conn, item_id)?;
        self.conn.execute(
            r#"
            INSERT INTO progress (user_id, item_id, starred, updated_at)
            VALUES (?1, ?2, 1, ?3)
            ON CONFLICT(user_id, item_id) DO UPDATE SET
                starred = 1 - progress.starred,
                updated_at = excluded.updated_at
            "#,
            params![user_id, item_id, Utc::now()],
        )?;
        fetch_joined(&self.conn, user_id, item_id)
    }

    pub fn set_notes(&self, user_id: i64, item_id: i64, notes: &str) -> Result<ItemWithProgress> {
        fetch_item(&self.conn, item_id)?;
        self.conn.execute(
            r#"
            INSERT INTO progress (user_id, item_id, notes, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(user_id, item_id) DO UPDATE SET
                notes = excluded.notes,
                updated_at = excluded.updated_at
            "#,
            params![user_id, item_id, notes, Utc::now()],
        )?;
        fetch_joined(&self.conn, user_id, item_id)
    }

    /// Send every touched item back to pending to begin a new cycle. The cycle
    /// counter was already bumped when the previous cycle closed.
    pub fn reset_all(&self, user_id: i64) -> Result<usize> {
        let rows = self.conn.execute(
            r#"
            UPDATE progress
            SET status = 'pending', started_at = NULL, completed_at = NULL, updated_at = ?2
            WHERE user_id = ?1 AND status != 'pending'
            "#,
            params![user_id, Utc::now()],
        )?;
        info!(user_id, reset = rows, "progress reset");
        Ok(rows)
    }

    pub fn get_progress(&self, user_id: i64, item_id: i64) -> Result<ItemWithProgress> {
        fetch_joined(&self.conn, user_id, item_id)
    }

    pub fn current_item(&self, user_id: i64) -> Result<Option<ItemWithProgress>> {
        match in_progress_item(&self.conn, user_id)? {
            Some(item_id) => Ok(Some(fetch_joined(&self.conn, user_id, item_id)?)),
            None => Ok(None),
        }
    }

    pub fn list_with_progress(
        &self,
        user_id: i64,
        filter: &ItemFilter,
    ) -> Result<Vec<ItemWithProgress>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"{JOINED_SELECT}
            WHERE (?2 IS NULL OR i.category = ?2)
              AND (?3 IS NULL OR COALESCE(p.status, 'pending') = ?3)
              AND (?4 = 0 OR COALESCE(p.starred, 0) = 1)
            ORDER BY i.category, i.subcategory, i.id
            "#
        ))?;
        let rows = stmt.query_map(
            params![user_id, filter.category, filter.status, filter.starred_only],
            |row| joined_from_row(row, user_id),
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
