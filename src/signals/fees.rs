// =============================================================================
// Fee model — the single source of truth for fee and PnL arithmetic
// =============================================================================
//
// Fees bite twice: once in the edge computation (a signal must clear the
// market price PLUS the fee) and once in realised PnL. Both call sites use
// these two functions so the numbers can never drift apart.
//
// The taker/winner fee is proportional to p·(1−p) — maximal at even odds,
// vanishing near certainty — normalised so the quoted base rate applies at
// an implied price of 0.50.
// =============================================================================

use crate::types::Timeframe;

/// Base fee rate at even odds, per timeframe. Short windows clear at the
/// higher rate.
fn base_fee_rate(timeframe: Timeframe) -> f64 {
    match timeframe {
        Timeframe::M5 | Timeframe::M15 => 0.02,
        Timeframe::H1 | Timeframe::H4 => 0.015,
    }
}

/// Estimated round-trip fee (as probability points) for a position entered
/// at `implied_price`.
pub fn fee_estimate(timeframe: Timeframe, implied_price: f64) -> f64 {
    let p = implied_price.clamp(0.01, 0.99);
    base_fee_rate(timeframe) * 4.0 * p * (1.0 - p)
}

/// Realised PnL for a resolved binary position.
///
/// A win pays one dollar per share minus the winner fee on the payout; a
/// loss forfeits the stake.
pub fn pnl(won: bool, shares: f64, size_usd: f64, fee_rate: f64) -> f64 {
    if won {
        shares * (1.0 - fee_rate) - size_usd
    } else {
        -size_usd
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_at_even_odds_is_the_base_rate() {
        assert!((fee_estimate(Timeframe::M5, 0.50) - 0.02).abs() < 1e-12);
        assert!((fee_estimate(Timeframe::M15, 0.50) - 0.02).abs() < 1e-12);
        assert!((fee_estimate(Timeframe::H1, 0.50) - 0.015).abs() < 1e-12);
        assert!((fee_estimate(Timeframe::H4, 0.50) - 0.015).abs() < 1e-12);
    }

    #[test]
    fn fee_vanishes_toward_certainty() {
        let near_even = fee_estimate(Timeframe::M5, 0.55);
        let near_sure = fee_estimate(Timeframe::M5, 0.95);
        assert!(near_sure < near_even);
        assert!(near_sure < 0.005);
    }

    #[test]
    fn fee_clamps_degenerate_prices() {
        // 0.0 and 1.0 clamp to 0.01/0.99 rather than producing a zero fee.
        assert!(fee_estimate(Timeframe::M5, 0.0) > 0.0);
        assert!(fee_estimate(Timeframe::M5, 1.0) > 0.0);
    }

    #[test]
    fn win_pnl_is_payout_minus_stake() {
        // 17.24 shares bought for $10: win pays shares - stake (no fee).
        let p = pnl(true, 17.24, 10.0, 0.0);
        assert!((p - 7.24).abs() < 1e-9);
    }

    #[test]
    fn winner_fee_reduces_payout() {
        let gross = pnl(true, 20.0, 10.0, 0.0);
        let net = pnl(true, 20.0, 10.0, 0.02);
        assert!(net < gross);
        assert!((gross - net - 20.0 * 0.02).abs() < 1e-9);
    }

    #[test]
    fn loss_pnl_is_full_stake() {
        assert_eq!(pnl(false, 17.24, 10.0, 0.02), -10.0);
    }
}
