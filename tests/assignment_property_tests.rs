//! Property-based tests for the ring assignment
//!
//! Whatever roster and seed proptest picks, the assignment must be a
//! derangement covering the whole roster in a single cycle.

use gift_chain::assignment::{
    compute_assignment, is_bijection, is_single_cycle, validate_assignment,
};
use gift_chain::error::MatchingError;
use gift_chain::types::Fid;
use proptest::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::BTreeSet;

/// Strategy to generate a roster of 2 to 64 distinct fids
fn roster_strategy() -> impl Strategy<Value = Vec<Fid>> {
    prop::collection::btree_set(any::<u64>(), 2..=64)
        .prop_map(|ids| ids.into_iter().map(Fid).collect())
        .prop_shuffle()
}

proptest! {
    /// Property: nobody is assigned to themselves
    #[test]
    fn prop_no_fixed_points(roster in roster_strategy(), seed in any::<u64>()) {
        let mut rng = StdRng::seed_from_u64(seed);
        let assignment = compute_assignment(&roster, &mut rng).unwrap();

        prop_assert!(validate_assignment(&assignment));
        for (giver, receiver) in assignment.pairs() {
            prop_assert_ne!(giver, receiver);
        }
    }

    /// Property: every participant gives once and receives once
    #[test]
    fn prop_every_participant_gives_and_receives_once(
        roster in roster_strategy(),
        seed in any::<u64>()
    ) {
        let mut rng = StdRng::seed_from_u64(seed);
        let assignment = compute_assignment(&roster, &mut rng).unwrap();

        let expected: BTreeSet<Fid> = roster.iter().copied().collect();
        let givers: BTreeSet<Fid> = assignment.givers().collect();
        let receivers: BTreeSet<Fid> = assignment.pairs().map(|(_, r)| r).collect();

        prop_assert_eq!(assignment.len(), roster.len());
        prop_assert_eq!(&givers, &expected);
        prop_assert_eq!(&receivers, &expected);
        prop_assert!(is_bijection(&assignment));
    }

    /// Property: the mapping is one cycle through the whole roster
    #[test]
    fn prop_single_cycle(roster in roster_strategy(), seed in any::<u64>()) {
        let mut rng = StdRng::seed_from_u64(seed);
        let assignment = compute_assignment(&roster, &mut rng).unwrap();

        prop_assert!(is_single_cycle(&assignment));

        // walk it by hand as well
        let start = roster[0];
        let mut seen = BTreeSet::new();
        let mut current = start;
        loop {
            prop_assert!(seen.insert(current), "revisited {} before closing the cycle", current);
            current = assignment.receiver_of(current).unwrap();
            if current == start {
                break;
            }
        }
        prop_assert_eq!(seen.len(), roster.len());
    }

    /// Property: rosters under two people are always rejected
    #[test]
    fn prop_tiny_rosters_rejected(ids in prop::collection::vec(any::<u64>(), 0..=1), seed in any::<u64>()) {
        let roster: Vec<Fid> = ids.into_iter().map(Fid).collect();
        let mut rng = StdRng::seed_from_u64(seed);

        let res = compute_assignment(&roster, &mut rng);
        let rejected = matches!(res, Err(MatchingError::InsufficientParticipants { found }) if found == roster.len());
        prop_assert!(rejected);
    }
}
