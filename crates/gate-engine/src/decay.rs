//! Seeded Monte Carlo of leveraged-ETF holding-period returns.
//!
//! A daily LETF factor is `1 + L·r`, floored at -0.999 to keep extreme
//! paths finite. A trial's return is the product of its factors minus one.

use common::{DecayMethod, DecayStats, Error, Result};
use rand::distributions::Distribution;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use statrs::distribution::Normal;
use statrs::statistics::Statistics;

/// Length of the synthetic history drawn when real returns are too short.
pub const SYNTHETIC_HISTORY_DAYS: usize = 2_000;

const FACTOR_FLOOR: f64 = -0.999;

/// Bootstraps `trials` windows of `window` consecutive days from `returns`.
///
/// Identical arguments always produce bit-identical statistics.
pub fn simulate_letf_decay(
    returns: &[f64],
    leverage: f64,
    window: usize,
    trials: u32,
    seed: u64,
) -> Result<DecayStats> {
    if window < 1 {
        return Err(Error::InvalidSignal("decay window must be >= 1".into()));
    }
    if returns.len() < window {
        return Err(Error::InvalidSignal(format!(
            "need at least {} returns for a {}-day window, got {}",
            window,
            window,
            returns.len()
        )));
    }
    if trials == 0 {
        return Err(Error::Config("decay_trials must be > 0".into()));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let last_start = returns.len() - window;
    let mut results: Vec<f64> = (0..trials)
        .map(|_| {
            let start = rng.gen_range(0..=last_start);
            returns[start..start + window]
                .iter()
                .map(|r| (1.0 + leverage * r).max(FACTOR_FLOOR))
                .product::<f64>()
                - 1.0
        })
        .collect();

    let mean = results.iter().mean();
    results.sort_by(f64::total_cmp);

    Ok(DecayStats {
        method: DecayMethod::Bootstrap,
        seed,
        trials,
        window: window as u32,
        leverage,
        mean,
        median: percentile(&results, 50.0),
        p10: percentile(&results, 10.0),
        p25: percentile(&results, 25.0),
        p75: percentile(&results, 75.0),
        p90: percentile(&results, 90.0),
        worst: results[0],
        best: results[results.len() - 1],
    })
}

/// Normal daily returns with annualized vol `vol_annual`.
///
/// Drawn from a separate ChaCha stream so the history and the bootstrap
/// indices never share random numbers. Non-positive vol yields a flat path.
pub fn synthetic_returns(vol_annual: f64, days: usize, trading_days: u32, seed: u64) -> Vec<f64> {
    if vol_annual <= 0.0 || trading_days == 0 {
        return vec![0.0; days];
    }
    let daily_sigma = vol_annual / f64::from(trading_days).sqrt();
    let Ok(normal) = Normal::new(0.0, daily_sigma) else {
        return vec![0.0; days];
    };
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(1);
    (0..days).map(|_| normal.sample(&mut rng)).collect()
}

/// Continuous-time decay estimate `1 - exp((L - L²)·σ²·T/2)`, floored at 0.
pub fn analytic_decay(leverage: f64, vol_annual: f64, horizon_days: u32, trading_days: u32) -> f64 {
    if trading_days == 0 {
        return 0.0;
    }
    let sigma = vol_annual.max(0.0);
    let years = f64::from(horizon_days) / f64::from(trading_days);
    let exponent = (leverage - leverage * leverage) * sigma * sigma * years / 2.0;
    (1.0 - exponent.exp()).max(0.0)
}

/// Linear-interpolated percentile of an ascending slice.
pub(crate) fn percentile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let pos = (q / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
        }
    }
}
