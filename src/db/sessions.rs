use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};
use uuid::Uuid;

use super::stats::{load_user_stats, save_user_stats};
use super::Database;
use crate::error::{Error, Result};
use crate::models::{Category, Eligibility, SessionItem, SessionItemStatus, TestSession};
use crate::policy::EligibilityContext;
use crate::sampler::{check_pool, sample_composition};
use crate::streak;

const SESSION_ITEM_SELECT: &str = r#"
    SELECT s.session_id, s.user_id, s.item_id, i.category, s.status, s.created_at, s.resolved_at
    FROM session_items s
    JOIN items i ON i.id = s.item_id
"#;

fn session_item_from_row(row: &Row<'_>) -> rusqlite::Result<SessionItem> {
    Ok(SessionItem {
        session_id: row.get(0)?,
        user_id: row.get(1)?,
        item_id: row.get(2)?,
        category: row.get(3)?,
        status: row.get(4)?,
        created_at: row.get(5)?,
        resolved_at: row.get(6)?,
    })
}

/// Group consecutive rows that share a session id.
fn group_sessions(rows: Vec<SessionItem>) -> Vec<TestSession> {
    let mut sessions: Vec<TestSession> = Vec::new();
    for row in rows {
        match sessions.last_mut() {
            Some(last) if last.session_id == row.session_id => last.items.push(row),
            _ => sessions.push(TestSession {
                session_id: row.session_id.clone(),
                user_id: row.user_id,
                created_at: row.created_at,
                items: vec![row],
            }),
        }
    }
    sessions
}

fn count_by_status(
    conn: &Connection,
    user_id: i64,
    status: &str,
) -> Result<BTreeMap<Category, usize>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT i.category, COUNT(*)
        FROM progress p
        JOIN items i ON i.id = p.item_id
        WHERE p.user_id = ?1 AND p.status = ?2
        GROUP BY i.category
        "#,
    )?;
    let rows = stmt.query_map(params![user_id, status], |row| {
        Ok((row.get::<_, Category>(0)?, row.get::<_, i64>(1)? as usize))
    })?;
    Ok(rows.collect::<rusqlite::Result<BTreeMap<_, _>>>()?)
}

fn open_session_count(conn: &Connection, user_id: i64) -> Result<usize> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(DISTINCT session_id) FROM session_items WHERE user_id = ?1 AND status = 'pending'",
        params![user_id],
        |row| row.get(0),
    )?;
    Ok(n as usize)
}

fn completed_pools(conn: &Connection, user_id: i64) -> Result<BTreeMap<Category, Vec<i64>>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT i.category, i.id
        FROM progress p
        JOIN items i ON i.id = p.item_id
        WHERE p.user_id = ?1 AND p.status = 'done'
        ORDER BY i.id
        "#,
    )?;
    let rows = stmt.query_map(params![user_id], |row| {
        Ok((row.get::<_, Category>(0)?, row.get::<_, i64>(1)?))
    })?;

    let mut pools: BTreeMap<Category, Vec<i64>> = BTreeMap::new();
    for row in rows {
        let (category, id) = row?;
        pools.entry(category).or_default().push(id);
    }
    Ok(pools)
}

fn fetch_session_item(conn: &Connection, session_id: &str, item_id: i64) -> Result<SessionItem> {
    conn.query_row(
        &format!("{SESSION_ITEM_SELECT} WHERE s.session_id = ?1 AND s.item_id = ?2"),
        params![session_id, item_id],
        session_item_from_row,
    )
    .optional()?
    .ok_or_else(|| Error::NotFound(format!("item {item_id} in session {session_id}")))
}

impl Database {
    fn evaluate_policy(
        &self,
        conn: &Connection,
        user_id: i64,
    ) -> Result<(Eligibility, BTreeMap<Category, usize>)> {
        let completed = count_by_status(conn, user_id, "done")?;
        let in_progress = count_by_status(conn, user_id, "in_progress")?;
        let ctx = EligibilityContext {
            user_id,
            open_sessions: open_session_count(conn, user_id)?,
            completed_by_category: &completed,
            in_progress_by_category: &in_progress,
            composition: &self.composition,
        };
        let verdict = self.policy.evaluate(&ctx);
        Ok((verdict, completed))
    }

    /// Whether a review session could be created right now, and why (not).
    pub fn can_create_session(&self, user_id: i64) -> Result<Eligibility> {
        let (verdict, completed) = self.evaluate_policy(&self.conn, user_id)?;
        if !verdict.eligible {
            return Ok(verdict);
        }
        match check_pool(&completed, &self.composition) {
            Ok(()) => Ok(Eligibility::allow(format!(
                "{} completed items available for review",
                completed.values().sum::<usize>()
            ))),
            Err(e) if e.is_business() => Ok(Eligibility::deny(e.to_string())),
            Err(e) => Err(e),
        }
    }

    pub fn create_session(&self, user_id: i64) -> Result<TestSession> {
        self.create_session_with(user_id, &mut rand::thread_rng(), Utc::now())
    }

    /// Sample the configured composition from the user's completed items and
    /// store it as one batch under a fresh session id.
    pub fn create_session_with<R: Rng + ?Sized>(
        &self,
        user_id: i64,
        rng: &mut R,
        now: DateTime<Utc>,
    ) -> Result<TestSession> {
        if self.composition.is_empty() {
            return Err(Error::NotEligible(
                "session composition is empty, nothing to review".into(),
            ));
        }

        let tx = self.begin()?;

        let (verdict, _) = self.evaluate_policy(&tx, user_id)?;
        if !verdict.eligible {
            return Err(Error::NotEligible(verdict.reason));
        }

        let pools = completed_pools(&tx, user_id)?;
        let picked = sample_composition(&pools, &self.composition, rng)?;

        let session_id = Uuid::new_v4().to_string();
        {
            let mut insert = tx.prepare(
                "INSERT INTO session_items (session_id, user_id, item_id, status, created_at) \
                 VALUES (?1, ?2, ?3, 'pending', ?4)",
            )?;
            for (category, item_id) in &picked {
                insert.execute(params![session_id, user_id, item_id, now])?;
                debug!(%session_id, item_id, %category, "review item sampled");
            }
        }
        tx.commit()?;

        info!(user_id, %session_id, items = picked.len(), "review session created");
        self.get_session(&session_id)
    }

    pub fn get_session(&self, session_id: &str) -> Result<TestSession> {
        let mut stmt = self.conn.prepare(&format!(
            "{SESSION_ITEM_SELECT} WHERE s.session_id = ?1 ORDER BY i.category, s.item_id"
        ))?;
        let rows = stmt
            .query_map(params![session_id], session_item_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        group_sessions(rows)
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("session {session_id}")))
    }

    /// All sessions for a user, newest first.
    pub fn list_sessions(&self, user_id: i64) -> Result<Vec<TestSession>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SESSION_ITEM_SELECT} WHERE s.user_id = ?1 \
             ORDER BY s.created_at DESC, s.session_id, i.category, s.item_id"
        ))?;
        let rows = stmt
            .query_map(params![user_id], session_item_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(group_sessions(rows))
    }

    pub fn complete_session_item(&self, session_id: &str, item_id: i64) -> Result<SessionItem> {
        self.complete_session_item_at(session_id, item_id, Utc::now())
    }

    /// Mark a review done. Counts as activity for the streak; the item's own
    /// catalog status stays `done`.
    pub fn complete_session_item_at(
        &self,
        session_id: &str,
        item_id: i64,
        now: DateTime<Utc>,
    ) -> Result<SessionItem> {
        self.resolve_session_item(session_id, item_id, SessionItemStatus::Completed, now)
    }

    pub fn abandon_session_item(&self, session_id: &str, item_id: i64) -> Result<SessionItem> {
        self.abandon_session_item_at(session_id, item_id, Utc::now())
    }

    pub fn abandon_session_item_at(
        &self,
        session_id: &str,
        item_id: i64,
        now: DateTime<Utc>,
    ) -> Result<SessionItem> {
        self.resolve_session_item(session_id, item_id, SessionItemStatus::Abandoned, now)
    }

    fn resolve_session_item(
        &self,
        session_id: &str,
        item_id: i64,
        outcome: SessionItemStatus,
        now: DateTime<Utc>,
    ) -> Result<SessionItem> {
        let tx = self.begin()?;
        let row = fetch_session_item(&tx, session_id, item_id)?;
        if row.status.is_terminal() {
            return Err(Error::NotEligible(format!(
                "item {item_id} in session {session_id} is already {}",
                row.status.as_str()
            )));
        }

        tx.execute(
            "UPDATE session_items SET status = ?1, resolved_at = ?2 \
             WHERE session_id = ?3 AND item_id = ?4 AND status = 'pending'",
            params![outcome, now, session_id, item_id],
        )?;

        if outcome == SessionItemStatus::Completed {
            let previous = load_user_stats(&tx, row.user_id)?;
            let stats = streak::record_activity(&previous, now.date_naive());
            save_user_stats(&tx, &stats)?;
        }
        tx.commit()?;

        info!(session_id, item_id, outcome = outcome.as_str(), "review item resolved");
        fetch_session_item(&self.conn, session_id, item_id)
    }

    /// Explicit removal; sessions are never cleaned up automatically.
    pub fn delete_session(&self, session_id: &str) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM session_items WHERE session_id = ?1",
            params![session_id],
        )?;
        if rows > 0 {
            info!(session_id, "review session deleted");
        }
        Ok(rows > 0)
    }
}
