//! Prize distribution tables.
//!
//! Each tier maps to a fixed percentage table. Payouts are floored per rank,
//! so the distributed total can fall short of the prize pool; the remainder
//! stays undistributed.

use super::models::Tier;
use serde::{Deserialize, Serialize};

/// Percentages expressed in basis points (1/100 of a percent)
const SMALL: &[i64] = &[5000, 3000, 2000];
const MEDIUM: &[i64] = &[3000, 2000, 1500, 1000, 800, 600, 400, 300, 200, 200];
const LARGE: &[i64] = &[2500, 1500, 1000, 800, 700, 500, 300, 100, 50, 50];
const MEGA: &[i64] = &[2000, 1200, 800, 500, 400, 300, 250, 200, 150, 150];

const BASIS_POINTS: i64 = 10_000;

/// A single ranked payout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    /// 1-based rank
    pub rank: u32,
    pub tokens: i64,
}

/// Percentage table for a tier, in basis points
pub fn payout_table(tier: Tier) -> &'static [i64] {
    match tier {
        Tier::Small => SMALL,
        Tier::Medium => MEDIUM,
        Tier::Large => LARGE,
        Tier::Mega => MEGA,
    }
}

/// Split a prize pool by the tier's table.
///
/// Ranks are contiguous from 1. A negative pool is treated as empty.
pub fn distribute(tier: Tier, prize_pool: i64) -> Vec<Payout> {
    let pool = prize_pool.max(0) as i128;

    payout_table(tier)
        .iter()
        .enumerate()
        .map(|(idx, bps)| Payout {
            rank: idx as u32 + 1,
            tokens: (pool * *bps as i128 / BASIS_POINTS as i128) as i64,
        })
        .collect()
}

/// Tokens left over after flooring
pub fn undistributed(tier: Tier, prize_pool: i64) -> i64 {
    let paid: i64 = distribute(tier, prize_pool).iter().map(|p| p.tokens).sum();
    prize_pool.max(0) - paid
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_tier_splits_fifty_thirty_twenty() {
        let payouts = distribute(Tier::Small, 100);
        assert_eq!(
            payouts,
            vec![
                Payout { rank: 1, tokens: 50 },
                Payout { rank: 2, tokens: 30 },
                Payout { rank: 3, tokens: 20 },
            ]
        );
        assert_eq!(undistributed(Tier::Small, 100), 0);
    }

    #[test]
    fn test_every_table_sums_to_at_most_one_hundred_percent() {
        for tier in [Tier::Small, Tier::Medium, Tier::Large, Tier::Mega] {
            let total: i64 = payout_table(tier).iter().sum();
            assert!(total <= BASIS_POINTS, "{tier} table sums to {total} bps");
        }
    }

    #[test]
    fn test_large_and_mega_tables_leave_remainder() {
        // large pays out 75% of the pool, mega 59.5%, medium all of it
        assert_eq!(undistributed(Tier::Large, 1000), 250);
        assert_eq!(undistributed(Tier::Mega, 1000), 405);
        assert_eq!(undistributed(Tier::Medium, 1000), 0);
    }

    #[test]
    fn test_floor_rounding_is_kept() {
        // 50% of 7 = 3.5 -> 3, 30% -> 2.1 -> 2, 20% -> 1.4 -> 1
        let payouts = distribute(Tier::Small, 7);
        let tokens: Vec<i64> = payouts.iter().map(|p| p.tokens).collect();
        assert_eq!(tokens, vec![3, 2, 1]);
        assert_eq!(undistributed(Tier::Small, 7), 1);
    }

    #[test]
    fn test_half_percent_ranks_on_large_tier() {
        let payouts = distribute(Tier::Large, 1000);
        assert_eq!(payouts.len(), 10);
        assert_eq!(payouts[8].tokens, 5);
        assert_eq!(payouts[9].tokens, 5);
    }

    #[test]
    fn test_empty_and_negative_pool() {
        assert!(distribute(Tier::Medium, 0).iter().all(|p| p.tokens == 0));
        assert!(distribute(Tier::Medium, -40).iter().all(|p| p.tokens == 0));
    }
}
