//! Liquidity, universe and notional checks run before a plan is built.

use common::{GateConfig, PretradeResult, SuggestedInstrument, TickerMetrics};

/// Checks one instrument against the desk's pre-trade limits.
///
/// Missing liquidity metrics fail the liquidity filter. `notional_usd` is
/// the size the trade would carry, checked against `max_notional_usd`.
pub fn check_instrument(
    instrument: &SuggestedInstrument,
    metrics: Option<&TickerMetrics>,
    notional_usd: f64,
    config: &GateConfig,
) -> PretradeResult {
    let mut reasons = Vec::new();

    if instrument.ticker.trim().is_empty() {
        reasons.push("instrument has no ticker".to_string());
    } else if !config.allowed_universe.is_empty()
        && !config.allowed_universe.iter().any(|t| t == &instrument.ticker)
    {
        reasons.push(format!("{} not in allowed universe", instrument.ticker));
    }

    match metrics {
        None => reasons.push("no liquidity metrics".to_string()),
        Some(m) => {
            if m.adv_usd < config.adv_threshold_usd {
                reasons.push(format!(
                    "ADV ${:.0} below ${:.0}",
                    m.adv_usd, config.adv_threshold_usd
                ));
            }
            if m.spread_bps > config.max_spread_bps {
                reasons.push(format!(
                    "spread {:.2}bps above {:.2}bps",
                    m.spread_bps, config.max_spread_bps
                ));
            }
            if let Some(min_ask) = config.min_ask_size {
                match m.ask_size {
                    Some(ask) if ask >= min_ask => {}
                    Some(ask) => reasons.push(format!("ask size {ask} below {min_ask}")),
                    None => reasons.push("ask size unavailable".to_string()),
                }
            }
        }
    }

    if let Some(cap) = config.max_notional_usd {
        if notional_usd > cap {
            reasons.push(format!("notional ${notional_usd:.2} exceeds cap ${cap:.2}"));
        }
    }

    PretradeResult {
        allowed: reasons.is_empty(),
        reasons,
        notional_usd,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::InstrumentType;

    fn sso() -> SuggestedInstrument {
        SuggestedInstrument {
            ticker: "SSO".into(),
            kind: InstrumentType::Letf,
            leverage: 2.0,
            qty: None,
        }
    }

    fn liquid() -> TickerMetrics {
        TickerMetrics {
            adv_usd: 50_000_000.0,
            spread_bps: 1.5,
            ask_size: Some(500.0),
        }
    }

    #[test]
    fn test_liquid_instrument_passes_open_universe() {
        let result = check_instrument(&sso(), Some(&liquid()), 20_000.0, &GateConfig::default());
        assert!(result.allowed, "{:?}", result.reasons);
        assert_eq!(result.notional_usd, 20_000.0);
    }

    #[test]
    fn test_each_limit_adds_a_reason() {
        let config = GateConfig {
            allowed_universe: vec!["SPY".into()],
            min_ask_size: Some(1_000.0),
            max_notional_usd: Some(10_000.0),
            ..GateConfig::default()
        };
        let metrics = TickerMetrics {
            adv_usd: 10.0,
            spread_bps: 25.0,
            ask_size: Some(1.0),
        };
        let result = check_instrument(&sso(), Some(&metrics), 20_000.0, &config);
        assert!(!result.allowed);
        assert_eq!(result.reasons.len(), 5);
    }

    #[test]
    fn test_missing_metrics_fail() {
        let result = check_instrument(&sso(), None, 0.0, &GateConfig::default());
        assert!(!result.allowed);
        assert_eq!(result.reasons, vec!["no liquidity metrics".to_string()]);
    }
}
