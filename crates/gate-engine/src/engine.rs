use common::{
    distinct_sources, DecayMethod, Error, Evidence, GateConfig, LlmOutput, MarketContext,
    QuantChecks, Result, HIGH_CONFIDENCE, MIN_EVIDENCE_SOURCES,
};
use serde_json::Value;
use tracing::debug;

use crate::decay::{analytic_decay, simulate_letf_decay, synthetic_returns, SYNTHETIC_HISTORY_DAYS};
use crate::ev::compute_ev;
use crate::pretrade::check_instrument;
use crate::risk::{annualized_vol, historical_var, normal_quantile, parametric_var, scale_for_vol};

const BASELINE_VOL: f64 = 0.20;
const MAX_T_DAYS: i64 = 90;

/// Pure evaluator holding the gate parameters.
///
/// Evaluation has no side effects, so a caller may drop an in-flight
/// result at any point.
#[derive(Debug, Clone, Default)]
pub struct GateEngine {
    config: GateConfig,
}

impl GateEngine {
    pub fn new(config: GateConfig) -> Result<Self> {
        validate_config(&config)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn evaluate(
        &self,
        signal: &LlmOutput,
        evidence: &[Evidence],
        market: &MarketContext,
    ) -> Result<QuantChecks> {
        validate_signal(signal)?;
        validate_market(market)?;

        if signal.p_confidence >= HIGH_CONFIDENCE
            && distinct_sources(evidence) < MIN_EVIDENCE_SOURCES
        {
            return Err(Error::InsufficientEvidence {
                p_confidence: signal.p_confidence,
                required: MIN_EVIDENCE_SOURCES,
                found: distinct_sources(evidence),
            });
        }

        let cfg = &self.config;
        let leverage = signal.suggested_instrument.leverage;
        let window = signal.horizon_days as usize;
        let vol = market
            .est_vol_annual
            .unwrap_or_else(|| annualized_vol(&market.underlying_returns, cfg.trading_days));

        let decay = if market.underlying_returns.len() >= window {
            simulate_letf_decay(
                &market.underlying_returns,
                leverage,
                window,
                cfg.decay_trials,
                cfg.decay_seed,
            )?
        } else {
            let history = synthetic_returns(
                vol,
                SYNTHETIC_HISTORY_DAYS.max(window),
                cfg.trading_days,
                cfg.decay_seed,
            );
            let mut stats =
                simulate_letf_decay(&history, leverage, window, cfg.decay_trials, cfg.decay_seed)?;
            stats.method = DecayMethod::Synthetic;
            stats
        };

        let ev = compute_ev(
            signal,
            decay.mean,
            market.trading_costs,
            market.slippage,
            cfg.safety_margin,
            cfg.min_confidence,
        );
        let mut notes = ev.notes;
        let mut viability_pass = ev.viability_pass;

        let t_max_days = compute_t_max(leverage, vol);
        let mut requires_human_review = signal.flags.requires_human_review;
        if signal.horizon_days > t_max_days {
            requires_human_review = true;
            notes.push(format!(
                "Horizon {} days exceeds T_max {} days; human review required.",
                signal.horizon_days, t_max_days
            ));
        }

        let scale_factor = scale_for_vol(cfg.target_annual_vol, vol, cfg.min_scale, cfg.max_scale);

        let underlying_var = self.tail_loss(&market.underlying_returns, vol);
        let position_var = cfg.allocation_fraction * scale_factor * leverage.abs() * underlying_var;
        let portfolio_var = self.portfolio_var(&market.portfolio_returns) + position_var;
        let var_limit_breached = portfolio_var > cfg.var_limit;
        if var_limit_breached {
            viability_pass = false;
            notes.push(format!(
                "Portfolio VaR {:.4} exceeds limit {:.4}.",
                portfolio_var, cfg.var_limit
            ));
        }

        let notional_usd = match (signal.suggested_instrument.qty, market.price) {
            (Some(qty), Some(price)) => qty as f64 * price,
            _ => cfg.allocation_fraction * cfg.portfolio_nav_usd * scale_factor,
        };
        let pretrade = check_instrument(
            &signal.suggested_instrument,
            market.ticker_metrics.as_ref(),
            notional_usd,
            cfg,
        );
        if !pretrade.allowed {
            viability_pass = false;
            notes.push(format!("Pre-trade checks failed: {}.", pretrade.reasons.join("; ")));
        }

        debug!(
            ticker = %signal.suggested_instrument.ticker,
            ev_net = ev.ev_net,
            viability_pass,
            "gate evaluated"
        );

        Ok(QuantChecks {
            ev_gross: ev.ev_gross,
            letf_decay: ev.letf_decay,
            ev_net: ev.ev_net,
            viability_pass,
            p_confidence: signal.p_confidence,
            safety_margin: cfg.safety_margin,
            notes,
            letf_decay_analytic: analytic_decay(leverage, vol, signal.horizon_days, cfg.trading_days),
            decay,
            t_max_days,
            requires_human_review,
            scale_factor,
            recent_annual_vol: vol,
            position_var,
            portfolio_var,
            var_limit: cfg.var_limit,
            var_limit_breached,
            pretrade,
        })
    }

    /// 1-day VaR of the underlying. Falls back to a zero-mean normal at
    /// `vol` when there is not enough history.
    fn tail_loss(&self, returns: &[f64], vol: f64) -> f64 {
        let cfg = &self.config;
        if returns.len() < 2 {
            let daily_sigma = vol.max(0.0) / f64::from(cfg.trading_days).sqrt();
            return normal_quantile(1.0 - cfg.var_alpha) * daily_sigma;
        }
        self.portfolio_var(returns)
    }

    fn portfolio_var(&self, returns: &[f64]) -> f64 {
        let cfg = &self.config;
        let parametric = parametric_var(returns, cfg.var_alpha);
        if cfg.use_historical_var {
            parametric.max(historical_var(returns, cfg.var_alpha))
        } else {
            parametric
        }
    }
}

/// Runs the gate once with `config`.
pub fn evaluate(
    signal: &LlmOutput,
    evidence: &[Evidence],
    market: &MarketContext,
    config: &GateConfig,
) -> Result<QuantChecks> {
    GateEngine::new(config.clone())?.evaluate(signal, evidence, market)
}

/// Longest advisable LETF holding period in trading days.
///
/// Baselines of 5, 10 and 30 days at 20% vol for |L| ≥ 3, ≥ 2 and below,
/// scaled by `0.20 / vol` and clamped to [1, 90].
pub fn compute_t_max(leverage: f64, est_vol_annual: f64) -> u32 {
    let vol = if est_vol_annual > 0.0 {
        est_vol_annual
    } else {
        BASELINE_VOL
    };
    let baseline = if leverage.abs() >= 3.0 {
        5.0
    } else if leverage.abs() >= 2.0 {
        10.0
    } else {
        30.0
    };
    let days = (baseline * BASELINE_VOL / vol).round();
    if !days.is_finite() {
        return MAX_T_DAYS as u32;
    }
    (days as i64).clamp(1, MAX_T_DAYS) as u32
}

pub fn validate_signal(signal: &LlmOutput) -> Result<()> {
    if !(0.0..=1.0).contains(&signal.p_success) {
        return Err(Error::InvalidSignal("p_success must be in [0,1]".into()));
    }
    if !(0.0..=1.0).contains(&signal.p_confidence) {
        return Err(Error::InvalidSignal("p_confidence must be in [0,1]".into()));
    }
    let delta = &signal.expected_delta;
    if ![delta.fav, delta.neutral, delta.unfav].iter().all(|d| d.is_finite()) {
        return Err(Error::InvalidSignal("expected_delta must be finite".into()));
    }
    if signal.horizon_days < 1 {
        return Err(Error::InvalidSignal("horizon_days must be >= 1".into()));
    }
    let leverage = signal.suggested_instrument.leverage;
    if !leverage.is_finite() || leverage == 0.0 {
        return Err(Error::InvalidSignal(
            "suggested_instrument.leverage must be finite and non-zero".into(),
        ));
    }
    if signal.suggested_instrument.ticker.trim().is_empty() {
        return Err(Error::InvalidSignal("suggested_instrument.ticker is empty".into()));
    }
    Ok(())
}

fn validate_market(market: &MarketContext) -> Result<()> {
    let finite = |xs: &[f64]| xs.iter().all(|x| x.is_finite());
    if !finite(&market.underlying_returns) {
        return Err(Error::InvalidSignal("underlying_returns must be finite".into()));
    }
    if !finite(&market.portfolio_returns) {
        return Err(Error::InvalidSignal("portfolio_returns must be finite".into()));
    }
    let scalars = [
        Some(market.trading_costs),
        Some(market.slippage),
        market.est_vol_annual,
        market.price,
    ];
    if !scalars.iter().flatten().all(|x| x.is_finite()) {
        return Err(Error::InvalidSignal("market context values must be finite".into()));
    }
    if market.est_vol_annual.is_some_and(|v| v < 0.0) {
        return Err(Error::InvalidSignal("est_vol_annual must be non-negative".into()));
    }
    Ok(())
}

fn validate_config(config: &GateConfig) -> Result<()> {
    let floats = [
        ("safety_margin", Some(config.safety_margin)),
        ("min_confidence", Some(config.min_confidence)),
        ("target_annual_vol", Some(config.target_annual_vol)),
        ("min_scale", Some(config.min_scale)),
        ("max_scale", Some(config.max_scale)),
        ("allocation_fraction", Some(config.allocation_fraction)),
        ("portfolio_nav_usd", Some(config.portfolio_nav_usd)),
        ("var_alpha", Some(config.var_alpha)),
        ("var_limit", Some(config.var_limit)),
        ("adv_threshold_usd", Some(config.adv_threshold_usd)),
        ("max_spread_bps", Some(config.max_spread_bps)),
        ("min_ask_size", config.min_ask_size),
        ("max_notional_usd", config.max_notional_usd),
    ];
    for (name, value) in floats {
        if value.is_some_and(|v| !v.is_finite()) {
            return Err(Error::Config(format!("gate.{name} must be finite")));
        }
    }
    if !(config.var_alpha > 0.0 && config.var_alpha < 1.0) {
        return Err(Error::Config("gate.var_alpha must be in (0,1)".into()));
    }
    if config.decay_trials == 0 {
        return Err(Error::Config("gate.decay_trials must be > 0".into()));
    }
    if config.trading_days == 0 {
        return Err(Error::Config("gate.trading_days must be > 0".into()));
    }
    if config.min_scale > config.max_scale {
        return Err(Error::Config("gate.min_scale exceeds gate.max_scale".into()));
    }
    Ok(())
}

/// JSON schema the signal model's output must satisfy.
pub fn llm_output_schema() -> Result<Value> {
    let schema = schemars::schema_for!(LlmOutput);
    serde_json::to_value(&schema).map_err(|e| Error::Serialization(e.to_string()))
}
