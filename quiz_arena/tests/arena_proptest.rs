/// Property-based tests for prize distribution, streak transitions and
/// leaderboard ranking using proptest.
use chrono::{DateTime, Duration, TimeZone, Utc};
use quiz_arena::db::InMemoryStore;
use quiz_arena::leaderboard::{LeaderboardAggregator, Period, ScoreContribution};
use quiz_arena::streak::{Multiplier, StreakChange, StreakConfig, StreakState};
use quiz_arena::tournament::{Tier, distribute};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

fn tier_strategy() -> impl Strategy<Value = Tier> {
    prop_oneof![
        Just(Tier::Small),
        Just(Tier::Medium),
        Just(Tier::Large),
        Just(Tier::Mega),
    ]
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
}

proptest! {
    #[test]
    fn prop_payouts_never_exceed_pool(tier in tier_strategy(), pool in 0i64..10_000_000) {
        let payouts = distribute(tier, pool);
        let total: i64 = payouts.iter().map(|p| p.tokens).sum();
        prop_assert!(total <= pool);
        prop_assert!(payouts.iter().all(|p| p.tokens >= 0));
    }

    #[test]
    fn prop_ranks_are_contiguous_and_payouts_non_increasing(
        tier in tier_strategy(),
        pool in 0i64..1_000_000,
    ) {
        let payouts = distribute(tier, pool);
        for (idx, payout) in payouts.iter().enumerate() {
            prop_assert_eq!(payout.rank, idx as u32 + 1);
        }
        for pair in payouts.windows(2) {
            prop_assert!(pair[0].tokens >= pair[1].tokens);
        }
    }

    #[test]
    fn prop_streak_stays_positive_after_any_play_sequence(
        gaps in prop::collection::vec(0i64..5, 1..40),
        freezes in prop::collection::vec(any::<bool>(), 40),
    ) {
        let lock = Duration::days(3);
        let mut now = base_time();
        let mut state = StreakState::default();

        for (gap, freeze) in gaps.iter().zip(freezes.iter()) {
            now += Duration::days(*gap);
            let before = state.streak;
            let (next, change) = state.advance(now, *freeze, lock);

            prop_assert!(next.streak >= 1);
            match change {
                StreakChange::Extended => prop_assert_eq!(next.streak, before + 1),
                StreakChange::SameDay | StreakChange::Forgiven => {
                    prop_assert_eq!(next.streak, before)
                }
                StreakChange::Reset => {
                    prop_assert_eq!(next.streak, 1);
                    prop_assert!(next.locked);
                }
                StreakChange::Started => prop_assert_eq!(next.streak, 1),
            }
            state = next;
        }
    }

    #[test]
    fn prop_multiplier_is_monotonic(a in 0u32..100, b in 0u32..100) {
        let config = StreakConfig::default();
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(config.multiplier_for(low) <= config.multiplier_for(high));
        prop_assert!(config.multiplier_for(low) >= Multiplier::ONE);
    }

    #[test]
    fn prop_award_never_exceeds_three_halves_of_score(score in 0i64..100_000, streak in 0u32..60) {
        let multiplier = StreakConfig::default().multiplier_for(streak);
        let award = multiplier.award(score);
        prop_assert!(award >= 0);
        prop_assert!(award <= score / 2 * 3);
    }

    #[test]
    fn prop_leaderboard_ranks_are_dense_and_ordered(
        writes in prop::collection::vec((1i64..8, 0i64..500), 1..25),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let store = Arc::new(InMemoryStore::new());
            let aggregator = LeaderboardAggregator::new(store);
            let now = base_time();
            let mut totals: HashMap<i64, i64> = HashMap::new();

            for (user, score) in &writes {
                let contribution = ScoreContribution { score: *score, won: false, tokens_earned: 0 };
                aggregator.record(*user, contribution, now).await.unwrap();
                *totals.entry(*user).or_default() += score;
            }

            for period in Period::ALL {
                let rows = aggregator.top(period, now, Some(usize::MAX)).await.unwrap();
                prop_assert_eq!(rows.len(), totals.len());
                for (idx, row) in rows.iter().enumerate() {
                    prop_assert_eq!(row.rank, Some(idx as u32 + 1));
                    prop_assert_eq!(row.score, totals[&row.user_id]);
                }
                for pair in rows.windows(2) {
                    prop_assert!(pair[0].score >= pair[1].score);
                }
            }
            Ok(())
        })?;
    }
}
