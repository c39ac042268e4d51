use std::collections::{BTreeMap, HashSet};

use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{Error, Result};
use crate::models::Category;
use crate::policy::SessionComposition;

/// Uniform choice over the current candidate set.
pub fn pick_uniform<T: Copy, R: Rng + ?Sized>(candidates: &[T], rng: &mut R) -> Option<T> {
    candidates.choose(rng).copied()
}

/// Draw the fixed composition from the per-category pools of completed items.
///
/// Each category is sampled without replacement. An item id never appears twice
/// in the result even if a caller hands in overlapping pools.
pub fn sample_composition<R: Rng + ?Sized>(
    pools: &BTreeMap<Category, Vec<i64>>,
    composition: &SessionComposition,
    rng: &mut R,
) -> Result<Vec<(Category, i64)>> {
    let available: BTreeMap<Category, usize> =
        pools.iter().map(|(c, ids)| (*c, ids.len())).collect();
    check_pool(&available, composition)?;

    let mut seen = HashSet::new();
    let mut picked = Vec::with_capacity(composition.total());

    for (category, count) in composition.slots() {
        let pool: Vec<i64> = pools
            .get(&category)
            .map(|p| p.iter().copied().filter(|id| !seen.contains(id)).collect())
            .unwrap_or_default();

        if pool.len() < count {
            return Err(Error::InsufficientPool {
                category,
                needed: count,
                available: pool.len(),
            });
        }

        for id in pool.choose_multiple(rng, count) {
            seen.insert(*id);
            picked.push((category, *id));
        }
    }

    Ok(picked)
}

/// Fail with the first category whose completed count can't cover its demand.
pub fn check_pool(
    available: &BTreeMap<Category, usize>,
    composition: &SessionComposition,
) -> Result<()> {
    for (category, needed) in composition.demand() {
        let available = available.get(&category).copied().unwrap_or(0);
        if available < needed {
            return Err(Error::InsufficientPool {
                category,
                needed,
                available,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    fn pools(entries: &[(Category, &[i64])]) -> BTreeMap<Category, Vec<i64>> {
        entries.iter().map(|(c, ids)| (*c, ids.to_vec())).collect()
    }

    mod pick_uniform_tests {
        use super::*;

        #[test]
        fn empty_returns_none() {
            let empty: [i64; 0] = [];
            assert_eq!(pick_uniform(&empty, &mut rng()), None);
        }

        #[test]
        fn single_candidate_always_picked() {
            let mut r = rng();
            for _ in 0..20 {
                assert_eq!(pick_uniform(&[7i64], &mut r), Some(7));
            }
        }

        #[test]
        fn selection_is_uniform() {
            let candidates = [10i64, 20, 30, 40, 50];
            let trials = 50_000;
            let mut r = rng();
            let mut counts: HashMap<i64, usize> = HashMap::new();
            for _ in 0..trials {
                let id = pick_uniform(&candidates, &mut r).unwrap();
                *counts.entry(id).or_default() += 1;
            }

            // Chi-squared with 4 degrees of freedom; 18.47 is the p=0.001 cutoff
            let expected = trials as f64 / candidates.len() as f64;
            let chi2: f64 = candidates
                .iter()
                .map(|id| {
                    let observed = *counts.get(id).unwrap_or(&0) as f64;
                    (observed - expected).powi(2) / expected
                })
                .sum();
            assert!(chi2 < 18.47, "chi-squared too high: {chi2}");
        }
    }

    mod composition_tests {
        use super::*;

        #[test]
        fn draws_exact_composition() {
            let p = pools(&[
                (Category::Algorithmic, &[1, 2, 3, 4][..]),
                (Category::DesignLowLevel, &[5, 6][..]),
                (Category::DesignHighLevel, &[7][..]),
            ]);
            let picked =
                sample_composition(&p, &SessionComposition::default(), &mut rng()).unwrap();

            assert_eq!(picked.len(), 4);
            let algo = picked
                .iter()
                .filter(|(c, _)| *c == Category::Algorithmic)
                .count();
            assert_eq!(algo, 2);
            assert!(picked.contains(&(Category::DesignHighLevel, 7)));
            assert!(picked
                .iter()
                .all(|(c, id)| p.get(c).unwrap().contains(id)));
        }

        #[test]
        fn no_duplicate_ids() {
            let p = pools(&[
                (Category::Algorithmic, &[1, 2][..]),
                (Category::DesignLowLevel, &[3][..]),
                (Category::DesignHighLevel, &[4][..]),
            ]);
            let mut r = rng();
            for _ in 0..100 {
                let picked = sample_composition(&p, &SessionComposition::default(), &mut r)
                    .unwrap();
                let ids: HashSet<i64> = picked.iter().map(|(_, id)| *id).collect();
                assert_eq!(ids.len(), picked.len());
            }
        }

        #[test]
        fn insufficient_category_fails() {
            let p = pools(&[
                (Category::Algorithmic, &[1][..]),
                (Category::DesignLowLevel, &[3][..]),
                (Category::DesignHighLevel, &[4][..]),
            ]);
            let err =
                sample_composition(&p, &SessionComposition::default(), &mut rng()).unwrap_err();
            match err {
                Error::InsufficientPool {
                    category,
                    needed,
                    available,
                } => {
                    assert_eq!(category, Category::Algorithmic);
                    assert_eq!(needed, 2);
                    assert_eq!(available, 1);
                }
                other => panic!("unexpected error: {other}"),
            }
        }

        #[test]
        fn missing_category_fails() {
            let p = pools(&[(Category::Algorithmic, &[1, 2][..])]);
            let err =
                sample_composition(&p, &SessionComposition::default(), &mut rng()).unwrap_err();
            assert!(matches!(
                err,
                Error::InsufficientPool {
                    category: Category::DesignLowLevel,
                    ..
                }
            ));
        }

        #[test]
        fn repeated_category_slots_draw_distinct_items() {
            let composition = SessionComposition::new(vec![
                (Category::Algorithmic, 1),
                (Category::Algorithmic, 1),
            ]);
            let p = pools(&[(Category::Algorithmic, &[1, 2][..])]);
            let picked = sample_composition(&p, &composition, &mut rng()).unwrap();
            let ids: HashSet<i64> = picked.iter().map(|(_, id)| *id).collect();
            assert_eq!(ids, HashSet::from([1, 2]));
        }

        #[test]
        fn check_pool_reports_shortfall() {
            let available = BTreeMap::from([
                (Category::Algorithmic, 5),
                (Category::DesignLowLevel, 1),
            ]);
            let err = check_pool(&available, &SessionComposition::default()).unwrap_err();
            assert!(matches!(
                err,
                Error::InsufficientPool {
                    category: Category::DesignHighLevel,
                    needed: 1,
                    available: 0,
                }
            ));
        }

        #[test]
        fn every_pool_member_eventually_drawn() {
            let p = pools(&[
                (Category::Algorithmic, &[1, 2, 3, 4, 5][..]),
                (Category::DesignLowLevel, &[6][..]),
                (Category::DesignHighLevel, &[7][..]),
            ]);
            let mut r = rng();
            let mut seen = HashSet::new();
            for _ in 0..200 {
                for (_, id) in sample_composition(&p, &SessionComposition::default(), &mut r)
                    .unwrap()
                {
                    seen.insert(id);
                }
            }
            assert_eq!(seen.len(), 7);
        }
    }
}
