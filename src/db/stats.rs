use std::collections::BTreeMap;

use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use super::Database;
use crate::error::Result;
use crate::models::{
    Category, DetailedStats, ProgressStatus, Stats, StatusCounts, SubcategoryCounts, UserStats,
};
use crate::streak;

pub(crate) fn load_user_stats(conn: &Connection, user_id: i64) -> Result<UserStats> {
    let stats = conn
        .query_row(
            r#"
            SELECT user_id, completed_all_count, current_streak, longest_streak, last_activity_date
            FROM user_stats
            WHERE user_id = ?1
            "#,
            params![user_id],
            |row| {
                Ok(UserStats {
                    user_id: row.get(0)?,
                    completed_all_count: row.get(1)?,
                    current_streak: row.get(2)?,
                    longest_streak: row.get(3)?,
                    last_activity_date: row.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(stats.unwrap_or_else(|| UserStats::new(user_id)))
}

pub(crate) fn save_user_stats(conn: &Connection, stats: &UserStats) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO user_stats (user_id, completed_all_count, current_streak, longest_streak, last_activity_date)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(user_id) DO UPDATE SET
            completed_all_count = excluded.completed_all_count,
            current_streak = excluded.current_streak,
            longest_streak = excluded.longest_streak,
            last_activity_date = excluded.last_activity_date
        "#,
        params![
            stats.user_id,
            stats.completed_all_count,
            stats.current_streak,
            stats.longest_streak,
            stats.last_activity_date
        ],
    )?;
    Ok(())
}

/// (total items, items not done) for one user over the whole catalog.
fn completion_counts(conn: &Connection, user_id: i64) -> Result<(i64, i64)> {
    Ok(conn.query_row(
        r#"
        SELECT COUNT(*),
               COALESCE(SUM(CASE WHEN COALESCE(p.status, 'pending') != 'done' THEN 1 ELSE 0 END), 0)
        FROM items i
        LEFT JOIN progress p ON p.item_id = i.id AND p.user_id = ?1
        "#,
        params![user_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?)
}

/// Bump the cycle counter if the user has nothing left outside `done`.
pub(crate) fn close_cycle_if_finished(conn: &Connection, stats: &mut UserStats) -> Result<bool> {
    let (total, remaining) = completion_counts(conn, stats.user_id)?;
    if streak::cycle_closed(total, remaining) {
        stats.completed_all_count += 1;
        info!(
            user_id = stats.user_id,
            cycles = stats.completed_all_count,
            "full catalog completed"
        );
        return Ok(true);
    }
    Ok(false)
}

/// Per (category, subcategory, status) counts with absent rows as pending.
fn grouped_counts(
    conn: &Connection,
    user_id: i64,
) -> Result<Vec<(Category, String, ProgressStatus, i64)>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT i.category, i.subcategory, COALESCE(p.status, 'pending') AS eff_status, COUNT(*)
        FROM items i
        LEFT JOIN progress p ON p.item_id = i.id AND p.user_id = ?1
        GROUP BY i.category, i.subcategory, eff_status
        ORDER BY i.category, i.subcategory
        "#,
    )?;
    let rows = stmt.query_map(params![user_id], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

impl Database {
    pub fn get_stats(&self, user_id: i64) -> Result<Stats> {
        self.get_stats_at(user_id, Utc::now().date_naive())
    }

    /// Aggregate counts plus streak fields as they should read on `today`.
    pub fn get_stats_at(&self, user_id: i64, today: NaiveDate) -> Result<Stats> {
        self.conn.execute(
            "INSERT OR IGNORE INTO user_stats (user_id) VALUES (?1)",
            params![user_id],
        )?;
        let stored = load_user_stats(&self.conn, user_id)?;
        let view = streak::present(&stored, today);

        let mut totals = StatusCounts::default();
        for (_, _, status, n) in grouped_counts(&self.conn, user_id)? {
            totals.add(status, n);
        }

        let starred_items: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM progress WHERE user_id = ?1 AND starred = 1",
            params![user_id],
            |row| row.get(0),
        )?;

        Ok(Stats {
            user_id,
            total_items: totals.total,
            completed_items: totals.done,
            in_progress_items: totals.in_progress,
            pending_items: totals.pending,
            starred_items,
            completed_all_count: view.completed_all_count,
            current_streak: view.current_streak,
            longest_streak: view.longest_streak,
            last_activity_date: view.last_activity_date,
        })
    }

    pub fn get_detailed_stats(&self, user_id: i64) -> Result<DetailedStats> {
        self.get_detailed_stats_at(user_id, Utc::now().date_naive())
    }

    pub fn get_detailed_stats_at(&self, user_id: i64, today: NaiveDate) -> Result<DetailedStats> {
        let summary = self.get_stats_at(user_id, today)?;

        let mut by_category: BTreeMap<Category, StatusCounts> = Category::ALL
            .iter()
            .map(|c| (*c, StatusCounts::default()))
            .collect();
        let mut by_subcategory: Vec<SubcategoryCounts> = Vec::new();

        for (category, subcategory, status, n) in grouped_counts(&self.conn, user_id)? {
            by_category.entry(category).or_default().add(status, n);

            match by_subcategory.last_mut() {
                Some(last) if last.category == category && last.subcategory == subcategory => {
                    last.counts.add(status, n);
                }
                _ => {
                    let mut counts = StatusCounts::default();
                    counts.add(status, n);
                    by_subcategory.push(SubcategoryCounts {
                        category,
                        subcategory,
                        counts,
                    });
                }
            }
        }

        Ok(DetailedStats {
            summary,
            by_category,
            by_subcategory,
        })
    }

    /// Zero the full-cycle counter without touching progress.
    pub fn reset_cycle_count(&self, user_id: i64) -> Result<()> {
        let mut stats = load_user_stats(&self.conn, user_id)?;
        stats.completed_all_count = 0;
        save_user_stats(&self.conn, &stats)?;
        info!(user_id, "cycle counter reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    fn today(day: u32) -> NaiveDate {
        at(day).date_naive()
    }

    mod lazy_row_tests {
        use super::*;

        #[test]
        fn stats_row_created_on_first_read() {
            let db = setup_db();
            let stats = db.get_stats_at(9, today(1)).unwrap();
            assert_eq!(stats.current_streak, 0);
            assert_eq!(stats.completed_all_count, 0);

            let rows: i64 = db
                .conn
                .query_row("SELECT COUNT(*) FROM user_stats WHERE user_id = 9", [], |row| {
                    row.get(0)
                })
                .unwrap();
            assert_eq!(rows, 1);
        }

        #[test]
        fn untouched_items_count_as_pending() {
            let db = setup_db();
            add_algo(&db, "A");
            add_algo(&db, "B");

            let stats = db.get_stats_at(1, today(1)).unwrap();
            assert_eq!(stats.total_items, 2);
            assert_eq!(stats.pending_items, 2);
            assert_eq!(stats.completed_items, 0);

            let overlay_rows: i64 = db
                .conn
                .query_row("SELECT COUNT(*) FROM progress", [], |row| row.get(0))
                .unwrap();
            assert_eq!(overlay_rows, 0);
        }
    }

    mod streak_tests {
        use super::*;

        fn complete_on(db: &Database, item: i64, day: u32) {
            db.start_at(1, item, at(day)).unwrap();
            db.complete_at(1, item, at(day)).unwrap();
        }

        #[test]
        fn first_completion_starts_streak() {
            let db = setup_db();
            let a = add_algo(&db, "A");
            add_algo(&db, "B");
            complete_on(&db, a, 1);

            let stats = db.get_stats_at(1, today(1)).unwrap();
            assert_eq!(stats.current_streak, 1);
            assert_eq!(stats.longest_streak, 1);
            assert_eq!(stats.last_activity_date, Some(today(1)));
        }

        #[test]
        fn next_day_completion_extends_streak() {
            let db = setup_db();
            let ids: Vec<i64> = (0..4).map(|i| add_algo(&db, &format!("P{i}"))).collect();
            complete_on(&db, ids[0], 1);
            complete_on(&db, ids[1], 2);

            let stats = db.get_stats_at(1, today(2)).unwrap();
            assert_eq!(stats.current_streak, 2);
            assert_eq!(stats.longest_streak, 2);
        }

        #[test]
        fn same_day_completions_count_once() {
            let db = setup_db();
            let ids: Vec<i64> = (0..4).map(|i| add_algo(&db, &format!("P{i}"))).collect();
            complete_on(&db, ids[0], 1);
            complete_on(&db, ids[1], 1);
            complete_on(&db, ids[2], 1);

            assert_eq!(db.get_stats_at(1, today(1)).unwrap().current_streak, 1);
        }

        #[test]
        fn gap_of_two_days_resets_streak() {
            let db = setup_db();
            let ids: Vec<i64> = (0..4).map(|i| add_algo(&db, &format!("P{i}"))).collect();
            complete_on(&db, ids[0], 1);
            complete_on(&db, ids[1], 2);
            complete_on(&db, ids[2], 4);

            let stats = db.get_stats_at(1, today(4)).unwrap();
            assert_eq!(stats.current_streak, 1);
            assert_eq!(stats.longest_streak, 2);
        }

        #[test]
        fn streak_lapses_on_read_after_missed_day() {
            let db = setup_db();
            let a = add_algo(&db, "A");
            add_algo(&db, "B");
            complete_on(&db, a, 1);

            let stats = db.get_stats_at(1, today(3)).unwrap();
            assert_eq!(stats.current_streak, 0);
            assert_eq!(stats.longest_streak, 1);
        }

        #[test]
        fn read_lapse_is_not_persisted() {
            let db = setup_db();
            let ids: Vec<i64> = (0..3).map(|i| add_algo(&db, &format!("P{i}"))).collect();
            complete_on(&db, ids[0], 1);

            // Reading the next morning shows zero until something is done today
            assert_eq!(db.get_stats_at(1, today(2)).unwrap().current_streak, 0);
            complete_on(&db, ids[1], 2);
            assert_eq!(db.get_stats_at(1, today(2)).unwrap().current_streak, 2);
        }

        #[test]
        fn rejected_double_complete_does_not_touch_stats() {
            let db = setup_db();
            let a = add_algo(&db, "A");
            add_algo(&db, "B");
            complete_on(&db, a, 1);
            let before = db.get_stats_at(1, today(2)).unwrap();

            assert!(db.complete_at(1, a, at(2)).is_err());

            let after = db.get_stats_at(1, today(2)).unwrap();
            assert_eq!(after.completed_items, before.completed_items);
            assert_eq!(after.last_activity_date, Some(today(1)));
        }
    }

    mod cycle_tests {
        use super::*;

        #[test]
        fn completing_every_item_closes_one_cycle() {
            let db = setup_db();
            let ids = vec![
                add_algo(&db, "A"),
                add(&db, "B", Category::DesignLowLevel, "concurrency"),
                add(&db, "C", Category::Miscellaneous, "behavioral"),
            ];

            for (n, id) in ids.iter().enumerate() {
                db.start_at(1, *id, at(1)).unwrap();
                let done = db.complete_at(1, *id, at(1)).unwrap();
                assert_eq!(done.cycle_completed, n == ids.len() - 1);
            }

            let stats = db.get_stats_at(1, today(1)).unwrap();
            assert_eq!(stats.completed_all_count, 1);
            assert_eq!(stats.completed_items, 3);

            assert_eq!(db.reset_all(1).unwrap(), 3);
            let stats = db.get_stats_at(1, today(1)).unwrap();
            assert_eq!(stats.completed_all_count, 1);
            assert_eq!(stats.pending_items, 3);
        }

        #[test]
        fn second_pass_closes_second_cycle() {
            let db = setup_db();
            let a = add_algo(&db, "A");
            let b = add_algo(&db, "B");

            for _ in 0..2 {
                for id in [a, b] {
                    db.start_at(1, id, at(1)).unwrap();
                    db.complete_at(1, id, at(1)).unwrap();
                }
                db.reset_all(1).unwrap();
            }

            assert_eq!(db.get_stats_at(1, today(1)).unwrap().completed_all_count, 2);
        }

        #[test]
        fn toggle_to_done_can_close_cycle() {
            let db = setup_db();
            let a = add_algo(&db, "A");
            let b = add_algo(&db, "B");
            db.toggle_status(1, a).unwrap();
            db.toggle_status(1, b).unwrap();

            let stats = db.get_stats_at(1, today(1)).unwrap();
            assert_eq!(stats.completed_all_count, 1);
            // Manual corrections aren't activity
            assert_eq!(stats.current_streak, 0);
        }

        #[test]
        fn reset_cycle_count_leaves_progress_alone() {
            let db = setup_db();
            let a = add_algo(&db, "A");
            db.start_at(1, a, at(1)).unwrap();
            db.complete_at(1, a, at(1)).unwrap();
            assert_eq!(db.get_stats_at(1, today(1)).unwrap().completed_all_count, 1);

            db.reset_cycle_count(1).unwrap();

            let stats = db.get_stats_at(1, today(1)).unwrap();
            assert_eq!(stats.completed_all_count, 0);
            assert_eq!(stats.completed_items, 1);
            assert_eq!(stats.current_streak, 1);
        }

        #[test]
        fn other_users_do_not_close_my_cycle() {
            let db = setup_db();
            let a = add_algo(&db, "A");
            let b = add_algo(&db, "B");
            db.start_at(2, a, at(1)).unwrap();
            db.complete_at(2, a, at(1)).unwrap();
            db.start_at(1, b, at(1)).unwrap();
            db.complete_at(1, b, at(1)).unwrap();

            assert_eq!(db.get_stats_at(1, today(1)).unwrap().completed_all_count, 0);
            assert_eq!(db.get_stats_at(2, today(1)).unwrap().completed_all_count, 0);
        }
    }

    mod detailed_tests {
        use super::*;

        #[test]
        fn counts_by_category_and_subcategory() {
            let db = setup_db();
            let a = add(&db, "Two Sum", Category::Algorithmic, "arrays");
            add(&db, "Max Subarray", Category::Algorithmic, "arrays");
            let g = add(&db, "Course Schedule", Category::Algorithmic, "graphs");
            add(&db, "Rate Limiter", Category::DesignHighLevel, "case-study");

            db.start_at(1, a, at(1)).unwrap();
            db.complete_at(1, a, at(1)).unwrap();
            db.start_at(1, g, at(1)).unwrap();
            db.toggle_star(1, g).unwrap();

            let detailed = db.get_detailed_stats_at(1, today(1)).unwrap();
            assert_eq!(detailed.summary.total_items, 4);
            assert_eq!(detailed.summary.completed_items, 1);
            assert_eq!(detailed.summary.in_progress_items, 1);
            assert_eq!(detailed.summary.pending_items, 2);
            assert_eq!(detailed.summary.starred_items, 1);

            let algo = detailed.by_category[&Category::Algorithmic];
            assert_eq!(algo.total, 3);
            assert_eq!(algo.done, 1);
            assert_eq!(algo.in_progress, 1);
            assert_eq!(algo.pending, 1);
            assert_eq!(detailed.by_category[&Category::Miscellaneous].total, 0);

            let arrays = detailed
                .by_subcategory
                .iter()
                .find(|s| s.subcategory == "arrays")
                .unwrap();
            assert_eq!(arrays.counts.total, 2);
            assert_eq!(arrays.counts.done, 1);
            assert_eq!(detailed.by_subcategory.len(), 3);
        }

        #[test]
        fn statuses_partition_total() {
            let db = setup_db();
            let ids: Vec<i64> = (0..5).map(|i| add_algo(&db, &format!("P{i}"))).collect();
            db.start_at(1, ids[0], at(1)).unwrap();
            db.complete_at(1, ids[0], at(1)).unwrap();
            db.set_status(1, ids[1], ProgressStatus::InProgress).unwrap();

            let s = db.get_stats_at(1, today(1)).unwrap();
            assert_eq!(
                s.total_items,
                s.pending_items + s.in_progress_items + s.completed_items
            );
        }
    }
}
