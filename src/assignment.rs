//! Giver to receiver assignment: a single-cycle derangement of a chain's roster
use super::error::MatchingError;
use super::types::Fid;
use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::{BTreeMap, BTreeSet};

/// Complete giver -> receiver mapping for one chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment(BTreeMap<Fid, Fid>);

impl Assignment {
    /// Wrap raw pairs without checking them. Use [`validate_assignment`].
    pub fn from_pairs<I: IntoIterator<Item = (Fid, Fid)>>(pairs: I) -> Self {
        Self(pairs.into_iter().collect())
    }
    pub fn receiver_of(&self, giver: Fid) -> Option<Fid> {
        self.0.get(&giver).copied()
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn pairs(&self) -> impl Iterator<Item = (Fid, Fid)> + '_ {
        self.0.iter().map(|(giver, receiver)| (*giver, *receiver))
    }
    pub fn givers(&self) -> impl Iterator<Item = Fid> + '_ {
        self.0.keys().copied()
    }
}

/// Shuffle `participants` and link each to its successor, wrapping the last
/// back to the first. `participants` must not contain duplicates.
pub fn compute_assignment<R>(participants: &[Fid], rng: &mut R) -> Result<Assignment, MatchingError>
where
    R: Rng + ?Sized,
{
    if participants.len() < 2 {
        return Err(MatchingError::InsufficientParticipants {
            found: participants.len(),
        });
    }

    let mut ring = participants.to_vec();
    // Fisher-Yates
    ring.shuffle(rng);

    let n = ring.len();
    let pairs = (0..n).map(|i| (ring[i], ring[(i + 1) % n]));

    Ok(Assignment::from_pairs(pairs))
}

/// False if anyone gives to themselves.
pub fn validate_assignment(assignment: &Assignment) -> bool {
    assignment.pairs().all(|(giver, receiver)| giver != receiver)
}

/// Every giver receives exactly once.
pub fn is_bijection(assignment: &Assignment) -> bool {
    let receivers: BTreeSet<Fid> = assignment.0.values().copied().collect();
    receivers.len() == assignment.len() && assignment.givers().all(|g| receivers.contains(&g))
}

/// Following the mapping from any giver visits everyone once before
/// returning to the start.
pub fn is_single_cycle(assignment: &Assignment) -> bool {
    let Some(start) = assignment.givers().next() else {
        return false;
    };

    let mut current = start;
    for step in 1..=assignment.len() {
        match assignment.receiver_of(current) {
            Some(next) if next == start => return step == assignment.len(),
            Some(next) => current = next,
            None => return false,
        }
    }
    false
}

/// Run `attempt` until it yields a valid assignment, at most `max_attempts`
/// times. Exhaustion means the construction is broken, not bad luck.
pub fn assign_with_retry<F>(max_attempts: u32, mut attempt: F) -> Result<Assignment, MatchingError>
where
    F: FnMut() -> Result<Assignment, MatchingError>,
{
    let max_attempts = max_attempts.max(1);
    for attempts in 1..=max_attempts {
        let candidate = attempt()?;
        if validate_assignment(&candidate) {
            return Ok(candidate);
        }
        tracing::warn!(attempts, "assignment contained a self-match, reshuffling");
    }

    tracing::error!(
        attempts = max_attempts,
        "no valid assignment produced; ring construction invariant broken"
    );
    Err(MatchingError::AssignmentFailed {
        attempts: max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashMap;

    fn fids(ids: &[u64]) -> Vec<Fid> {
        ids.iter().copied().map(Fid).collect()
    }

    #[test]
    fn rejects_empty_and_single_rosters() {
        let mut rng = StdRng::seed_from_u64(1);

        assert!(matches!(
            compute_assignment(&[], &mut rng),
            Err(MatchingError::InsufficientParticipants { found: 0 })
        ));
        assert!(matches!(
            compute_assignment(&fids(&[42]), &mut rng),
            Err(MatchingError::InsufficientParticipants { found: 1 })
        ));
    }

    #[test]
    fn pair_always_swaps() {
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..20 {
            let assignment = compute_assignment(&fids(&[1, 2]), &mut rng).unwrap();
            assert_eq!(assignment.receiver_of(Fid(1)), Some(Fid(2)));
            assert_eq!(assignment.receiver_of(Fid(2)), Some(Fid(1)));
        }
    }

    #[test]
    fn trio_forms_one_three_cycle() {
        let mut rng = StdRng::seed_from_u64(3);
        let assignment = compute_assignment(&fids(&[1, 2, 3]), &mut rng).unwrap();

        assert_eq!(assignment.len(), 3);
        assert!(validate_assignment(&assignment));
        assert!(is_bijection(&assignment));
        assert!(is_single_cycle(&assignment));
    }

    #[test]
    fn validation_flags_self_gifting() {
        let bad = Assignment::from_pairs([(Fid(1), Fid(1)), (Fid(2), Fid(2))]);
        assert!(!validate_assignment(&bad));
        assert!(is_bijection(&bad));
        assert!(!is_single_cycle(&bad));
    }

    #[test]
    fn two_disjoint_swaps_are_not_a_single_cycle() {
        let split = Assignment::from_pairs([
            (Fid(1), Fid(2)),
            (Fid(2), Fid(1)),
            (Fid(3), Fid(4)),
            (Fid(4), Fid(3)),
        ]);
        assert!(validate_assignment(&split));
        assert!(is_bijection(&split));
        assert!(!is_single_cycle(&split));
    }

    #[test]
    fn retry_gives_up_after_budget() {
        let mut calls = 0;
        let res = assign_with_retry(10, || {
            calls += 1;
            Ok(Assignment::from_pairs([(Fid(1), Fid(1)), (Fid(2), Fid(2))]))
        });

        assert!(matches!(res, Err(MatchingError::AssignmentFailed { attempts: 10 })));
        assert_eq!(calls, 10);
    }

    #[test]
    fn retry_returns_first_valid_candidate() {
        let mut calls = 0;
        let res = assign_with_retry(10, || {
            calls += 1;
            if calls < 3 {
                Ok(Assignment::from_pairs([(Fid(1), Fid(1)), (Fid(2), Fid(2))]))
            } else {
                Ok(Assignment::from_pairs([(Fid(1), Fid(2)), (Fid(2), Fid(1))]))
            }
        })
        .unwrap();

        assert_eq!(calls, 3);
        assert!(validate_assignment(&res));
    }

    #[test]
    fn retry_propagates_construction_errors() {
        let res = assign_with_retry(10, || {
            Err(MatchingError::InsufficientParticipants { found: 1 })
        });
        assert!(matches!(
            res,
            Err(MatchingError::InsufficientParticipants { found: 1 })
        ));
    }

    // Each of the (n-1)! cycles over four people should come up about as
    // often as the others. Chi-square with 5 degrees of freedom, p = 0.001.
    #[test]
    fn cycles_are_uniformly_distributed() {
        let roster = fids(&[1, 2, 3, 4]);
        let trials = 12_000;
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut counts: HashMap<Vec<Fid>, u32> = HashMap::new();

        for _ in 0..trials {
            let assignment = compute_assignment(&roster, &mut rng).unwrap();
            // canonical form: walk the cycle from the smallest fid
            let mut walk = vec![Fid(1)];
            while walk.len() < roster.len() {
                let last = walk[walk.len() - 1];
                walk.push(assignment.receiver_of(last).unwrap());
            }
            *counts.entry(walk).or_default() += 1;
        }

        assert_eq!(counts.len(), 6);
        let expected = trials as f64 / 6.0;
        let chi_square: f64 = counts
            .values()
            .map(|&observed| {
                let diff = observed as f64 - expected;
                diff * diff / expected
            })
            .sum();
        assert!(chi_square < 20.52, "chi-square {chi_square} too large");
    }
}
