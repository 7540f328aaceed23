//! Volatility targeting, VaR and drawdown helpers.

use serde::{Deserialize, Serialize};
use statrs::function::erf::erf_inv;
use statrs::statistics::Statistics;

use crate::decay::percentile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Long,
    Short,
}

/// Sample standard deviation of daily returns, annualized.
pub fn annualized_vol(returns: &[f64], trading_days: u32) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    returns.iter().std_dev() * f64::from(trading_days).sqrt()
}

/// `target / vol` clamped to `[min_scale, max_scale]`. Zero vol scales 1.0.
pub fn scale_for_vol(target_annual_vol: f64, vol_annual: f64, min_scale: f64, max_scale: f64) -> f64 {
    if vol_annual <= 0.0 {
        return 1.0;
    }
    // Unlike `clamp`, never panics on inverted or NaN bounds.
    (target_annual_vol / vol_annual).max(min_scale).min(max_scale)
}

/// Returns `(scale_factor, recent_annual_vol)` for a return series.
pub fn compute_scale_factor(
    target_annual_vol: f64,
    returns: &[f64],
    min_scale: f64,
    max_scale: f64,
    trading_days: u32,
) -> (f64, f64) {
    let vol = annualized_vol(returns, trading_days);
    (scale_for_vol(target_annual_vol, vol, min_scale, max_scale), vol)
}

/// Standard normal quantile. `p` must lie in (0, 1).
pub fn normal_quantile(p: f64) -> f64 {
    std::f64::consts::SQRT_2 * erf_inv(2.0 * p - 1.0)
}

/// 1-day parametric VaR `-(μ + zₐσ)`, floored at zero.
pub fn parametric_var(returns: &[f64], alpha: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let mu = returns.iter().mean();
    let sigma = if returns.len() < 2 {
        0.0
    } else {
        returns.iter().std_dev()
    };
    // zₐ = -z₁₋ₐ
    let var = -(mu - normal_quantile(1.0 - alpha) * sigma);
    var.max(0.0)
}

/// Empirical VaR: the negated `alpha` percentile of returns, floored at zero.
pub fn historical_var(returns: &[f64], alpha: f64) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let mut sorted = returns.to_vec();
    sorted.sort_by(f64::total_cmp);
    (-percentile(&sorted, 100.0 * alpha)).max(0.0)
}

pub fn stop_loss_price(entry_price: f64, stop_loss_pct: f64, side: Side) -> f64 {
    match side {
        Side::Long => entry_price * (1.0 - stop_loss_pct.abs()),
        Side::Short => entry_price * (1.0 + stop_loss_pct.abs()),
    }
}

/// True once drawdown from `peak_nav` reaches `trigger_drawdown`.
pub fn emergency_drawdown_trigger(current_nav: f64, peak_nav: f64, trigger_drawdown: f64) -> bool {
    if peak_nav <= 0.0 {
        return false;
    }
    (peak_nav - current_nav) / peak_nav >= trigger_drawdown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantile_matches_tables() {
        assert!((normal_quantile(0.99) - 2.326_347_874_040_841).abs() < 1e-9);
        assert!((normal_quantile(0.975) - 1.959_963_984_540_054).abs() < 1e-9);
        assert!(normal_quantile(0.5).abs() < 1e-12);
    }

    #[test]
    fn test_scale_factor_clamps() {
        assert_eq!(scale_for_vol(0.10, 0.0, 0.3, 2.0), 1.0);
        assert_eq!(scale_for_vol(0.10, 0.01, 0.3, 2.0), 2.0);
        assert_eq!(scale_for_vol(0.10, 1.0, 0.3, 2.0), 0.3);
        assert!((scale_for_vol(0.10, 0.20, 0.3, 2.0) - 0.5).abs() < 1e-12);
        assert!((scale_for_vol(0.10, 0.20, f64::NAN, 2.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_annualized_vol_needs_two_points() {
        assert_eq!(annualized_vol(&[0.01], 252), 0.0);
        let vol = annualized_vol(&[0.01, -0.01], 252);
        // Sample std of ±1% is √2 %.
        assert!((vol - 0.01 * 2f64.sqrt() * 252f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_parametric_var_is_positive_loss() {
        let returns = [0.01, -0.01, 0.02, -0.02, 0.0];
        let var = parametric_var(&returns, 0.01);
        let sigma = returns.iter().std_dev();
        assert!((var - 2.326_347_874_040_841 * sigma).abs() < 1e-9);
        assert_eq!(parametric_var(&[], 0.01), 0.0);
        // Strong positive drift floors at zero.
        assert_eq!(parametric_var(&[0.5, 0.5001], 0.01), 0.0);
    }

    #[test]
    fn test_historical_var_uses_tail_percentile() {
        let returns: Vec<f64> = (0..101).map(|i| (i as f64 - 50.0) / 1000.0).collect();
        assert!((historical_var(&returns, 0.01) - 0.049).abs() < 1e-12);
    }

    #[test]
    fn test_stop_and_drawdown() {
        assert!((stop_loss_price(100.0, 0.03, Side::Long) - 97.0).abs() < 1e-12);
        assert!((stop_loss_price(100.0, -0.03, Side::Short) - 103.0).abs() < 1e-12);
        assert!(emergency_drawdown_trigger(90.0, 100.0, 0.10));
        assert!(!emergency_drawdown_trigger(91.0, 100.0, 0.10));
        assert!(!emergency_drawdown_trigger(0.0, 0.0, 0.10));
    }
}
