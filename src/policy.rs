use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{Category, Eligibility};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub category: Category,
    pub count: usize,
}

/// How many completed items of each category a review session draws.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionComposition {
    slots: Vec<Slot>,
}

impl SessionComposition {
    pub fn new(slots: Vec<(Category, usize)>) -> Self {
        Self {
            slots: slots
                .into_iter()
                .filter(|(_, count)| *count > 0)
                .map(|(category, count)| Slot { category, count })
                .collect(),
        }
    }

    pub fn slots(&self) -> impl Iterator<Item = (Category, usize)> + '_ {
        self.slots.iter().map(|s| (s.category, s.count))
    }

    /// Total required per category, merging repeated slots.
    pub fn demand(&self) -> BTreeMap<Category, usize> {
        let mut demand = BTreeMap::new();
        for (category, count) in self.slots() {
            *demand.entry(category).or_insert(0) += count;
        }
        demand
    }

    pub fn total(&self) -> usize {
        self.slots.iter().map(|s| s.count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Default for SessionComposition {
    fn default() -> Self {
        Self::new(vec![
            (Category::Algorithmic, 2),
            (Category::DesignLowLevel, 1),
            (Category::DesignHighLevel, 1),
        ])
    }
}

/// Snapshot of the user's state handed to a [`SessionPolicy`].
#[derive(Debug, Clone)]
pub struct EligibilityContext<'a> {
    pub user_id: i64,
    /// Sessions that still have at least one pending row
    pub open_sessions: usize,
    pub completed_by_category: &'a BTreeMap<Category, usize>,
    pub in_progress_by_category: &'a BTreeMap<Category, usize>,
    pub composition: &'a SessionComposition,
}

pub trait SessionPolicy: Send + Sync {
    fn evaluate(&self, ctx: &EligibilityContext<'_>) -> Eligibility;
}

/// Default gate: one review session at a time.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpenSessionPolicy;

impl SessionPolicy for NoOpenSessionPolicy {
    fn evaluate(&self, ctx: &EligibilityContext<'_>) -> Eligibility {
        if ctx.open_sessions > 0 {
            Eligibility::deny(format!(
                "Finish the {} open review session(s) first",
                ctx.open_sessions
            ))
        } else {
            Eligibility::allow("No review session in progress")
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysEligible;

impl SessionPolicy for AlwaysEligible {
    fn evaluate(&self, _ctx: &EligibilityContext<'_>) -> Eligibility {
        Eligibility::allow("Always eligible")
    }
}

/// Only allow a review while the user is working on a miscellaneous item.
#[derive(Debug, Clone, Copy, Default)]
pub struct MiscInProgressPolicy;

impl SessionPolicy for MiscInProgressPolicy {
    fn evaluate(&self, ctx: &EligibilityContext<'_>) -> Eligibility {
        let open = NoOpenSessionPolicy.evaluate(ctx);
        if !open.eligible {
            return open;
        }
        let misc_active = ctx
            .in_progress_by_category
            .get(&Category::Miscellaneous)
            .copied()
            .unwrap_or(0);
        if misc_active > 0 {
            Eligibility::allow("A miscellaneous item is in progress")
        } else {
            Eligibility::deny("Start a miscellaneous item to unlock a review session")
        }
    }
}

impl<F> SessionPolicy for F
where
    F: Fn(&EligibilityContext<'_>) -> Eligibility + Send + Sync,
{
    fn evaluate(&self, ctx: &EligibilityContext<'_>) -> Eligibility {
        self(ctx)
    }
}
