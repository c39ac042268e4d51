//! Streak and full-cycle bookkeeping.
//!
//! These are pure functions over [`UserStats`]; the store calls them at every
//! completion (write) and every stats read so both paths agree.

use chrono::NaiveDate;

use crate::models::UserStats;

/// Apply a completion event that happened on `today`.
pub fn record_activity(stats: &UserStats, today: NaiveDate) -> UserStats {
    let mut next = stats.clone();

    match stats.last_activity_date {
        None => {
            next.current_streak = 1;
        }
        Some(last) => match (today - last).num_days() {
            // Already counted today
            0 => {}
            1 => next.current_streak += 1,
            // Clock went backwards; keep the streak, adopt the new date
            d if d < 0 => {}
            _ => next.current_streak = 1,
        },
    }

    next.longest_streak = next.longest_streak.max(next.current_streak);
    next.last_activity_date = Some(today);
    next
}

/// The view of `stats` a reader should see on `today`.
///
/// A streak lapses on the first day without activity, even though nothing has
/// been written yet. The stored value is left alone so a completion tomorrow
/// still extends it.
pub fn present(stats: &UserStats, today: NaiveDate) -> UserStats {
    let mut view = stats.clone();
    if let Some(last) = stats.last_activity_date {
        if (today - last).num_days() >= 1 && view.current_streak > 0 {
            view.current_streak = 0;
        }
    }
    view
}

/// A cycle closes when a transition leaves no item outside `done`.
pub fn cycle_closed(total_items: i64, non_done_items: i64) -> bool {
    total_items > 0 && non_done_items == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn stats(current: i64, longest: i64, last: Option<NaiveDate>) -> UserStats {
        UserStats {
            user_id: 1,
            completed_all_count: 0,
            current_streak: current,
            longest_streak: longest,
            last_activity_date: last,
        }
    }

    mod record_activity_tests {
        use super::*;

        #[test]
        fn first_ever_completion_starts_streak() {
            let next = record_activity(&stats(0, 0, None), day(1));
            assert_eq!(next.current_streak, 1);
            assert_eq!(next.longest_streak, 1);
            assert_eq!(next.last_activity_date, Some(day(1)));
        }

        #[test]
        fn first_completion_keeps_higher_longest() {
            let next = record_activity(&stats(0, 7, None), day(1));
            assert_eq!(next.current_streak, 1);
            assert_eq!(next.longest_streak, 7);
        }

        #[test]
        fn same_day_does_not_change_streak() {
            let next = record_activity(&stats(3, 5, Some(day(10))), day(10));
            assert_eq!(next.current_streak, 3);
            assert_eq!(next.longest_streak, 5);
            assert_eq!(next.last_activity_date, Some(day(10)));
        }

        #[test]
        fn consecutive_day_extends_streak() {
            let next = record_activity(&stats(3, 5, Some(day(10))), day(11));
            assert_eq!(next.current_streak, 4);
            assert_eq!(next.longest_streak, 5);
        }

        #[test]
        fn consecutive_day_raises_longest() {
            let next = record_activity(&stats(5, 5, Some(day(10))), day(11));
            assert_eq!(next.current_streak, 6);
            assert_eq!(next.longest_streak, 6);
        }

        #[test]
        fn gap_resets_streak_but_not_longest() {
            let next = record_activity(&stats(4, 9, Some(day(10))), day(12));
            assert_eq!(next.current_streak, 1);
            assert_eq!(next.longest_streak, 9);
            assert_eq!(next.last_activity_date, Some(day(12)));
        }

        #[test]
        fn earlier_date_keeps_streak_and_moves_date() {
            let next = record_activity(&stats(2, 2, Some(day(10))), day(9));
            assert_eq!(next.current_streak, 2);
            assert_eq!(next.longest_streak, 2);
            assert_eq!(next.last_activity_date, Some(day(9)));

            // The next day counts as consecutive from the adopted date
            let after = record_activity(&next, day(10));
            assert_eq!(after.current_streak, 3);
        }

        #[test]
        fn current_never_exceeds_longest() {
            let mut s = stats(0, 0, None);
            for d in [1, 2, 3, 5, 6, 6, 7, 10] {
                s = record_activity(&s, day(d));
                assert!(s.current_streak <= s.longest_streak);
            }
            assert_eq!(s.longest_streak, 3);
            assert_eq!(s.current_streak, 1);
        }
    }

    mod present_tests {
        use super::*;

        #[test]
        fn same_day_shows_streak() {
            let view = present(&stats(3, 3, Some(day(5))), day(5));
            assert_eq!(view.current_streak, 3);
        }

        #[test]
        fn next_day_without_activity_lapses() {
            let view = present(&stats(3, 3, Some(day(5))), day(6));
            assert_eq!(view.current_streak, 0);
            assert_eq!(view.longest_streak, 3);
        }

        #[test]
        fn no_activity_ever_is_zero() {
            let view = present(&stats(0, 0, None), day(5));
            assert_eq!(view.current_streak, 0);
        }

        #[test]
        fn decay_is_not_persisted_into_next_completion() {
            let stored = stats(2, 2, Some(day(5)));
            assert_eq!(present(&stored, day(6)).current_streak, 0);
            let next = record_activity(&stored, day(6));
            assert_eq!(next.current_streak, 3);
        }
    }

    mod cycle_tests {
        use super::*;

        #[test]
        fn closes_when_nothing_left() {
            assert!(cycle_closed(3, 0));
        }

        #[test]
        fn open_while_items_remain() {
            assert!(!cycle_closed(3, 1));
        }

        #[test]
        fn empty_catalog_never_closes() {
            assert!(!cycle_closed(0, 0));
        }
    }
}
