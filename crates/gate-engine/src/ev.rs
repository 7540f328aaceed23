use common::{LlmOutput, HIGH_CONFIDENCE};
use serde::{Deserialize, Serialize};

pub const LOW_CONFIDENCE_NOTE: &str = "Low model confidence; human review recommended.";
pub const BELOW_MARGIN_NOTE: &str = "Net EV below safety margin.";

/// Expected value of a signal net of decay and costs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvBreakdown {
    pub ev_gross: f64,
    pub letf_decay: f64,
    pub ev_net: f64,
    pub viability_pass: bool,
    pub notes: Vec<String>,
}

/// `ev_gross = p·fav + (1-p)·unfav`, then decay, costs and slippage come off.
///
/// `decay_mean` is the mean simulated holding-period return; only a negative
/// mean counts as drag. Viability also needs `p_confidence` at or above both
/// `min_confidence` and the high-confidence threshold.
pub fn compute_ev(
    signal: &LlmOutput,
    decay_mean: f64,
    trading_costs: f64,
    slippage: f64,
    safety_margin: f64,
    min_confidence: f64,
) -> EvBreakdown {
    let p = signal.p_success;
    let ev_gross = p * signal.expected_delta.fav + (1.0 - p) * signal.expected_delta.unfav;
    let letf_decay = (-decay_mean).max(0.0);
    let ev_net = ev_gross - letf_decay - trading_costs - slippage;

    let confident = signal.p_confidence >= min_confidence.max(HIGH_CONFIDENCE);
    let mut notes = Vec::new();
    if !confident {
        notes.push(LOW_CONFIDENCE_NOTE.to_string());
    } else if ev_net <= safety_margin {
        notes.push(BELOW_MARGIN_NOTE.to_string());
    }

    EvBreakdown {
        ev_gross,
        letf_decay,
        ev_net,
        viability_pass: ev_net > safety_margin && confident,
        notes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{ExpectedDelta, InstrumentType, SignalFlags, SuggestedInstrument};
    use std::collections::BTreeMap;

    fn signal(p_success: f64, p_confidence: f64, fav: f64, unfav: f64) -> LlmOutput {
        LlmOutput {
            p_success,
            p_confidence,
            expected_delta: ExpectedDelta {
                fav,
                neutral: 0.0,
                unfav,
            },
            horizon_days: 5,
            suggested_instrument: SuggestedInstrument {
                ticker: "SSO".into(),
                kind: InstrumentType::Letf,
                leverage: 2.0,
                qty: None,
            },
            flags: SignalFlags::default(),
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn test_net_ev_scenario_is_viable() {
        // ev_gross = 0.5·0.15 + 0.5·(-0.05) = 0.05
        let ev = compute_ev(&signal(0.5, 0.8, 0.15, -0.05), -0.01, 0.005, 0.002, 0.01, 0.7);
        assert!((ev.ev_gross - 0.05).abs() < 1e-12);
        assert!((ev.letf_decay - 0.01).abs() < 1e-12);
        assert!((ev.ev_net - 0.033).abs() < 1e-12);
        assert!(ev.viability_pass);
        assert!(ev.notes.is_empty());
    }

    #[test]
    fn test_positive_mean_is_not_drag() {
        let ev = compute_ev(&signal(0.5, 0.8, 0.15, -0.05), 0.02, 0.0, 0.0, 0.01, 0.7);
        assert_eq!(ev.letf_decay, 0.0);
    }

    #[test]
    fn test_low_confidence_blocks_viability() {
        let ev = compute_ev(&signal(0.9, 0.69, 0.2, -0.01), 0.0, 0.0, 0.0, 0.01, 0.7);
        assert!(!ev.viability_pass);
        assert_eq!(ev.notes, vec![LOW_CONFIDENCE_NOTE.to_string()]);
    }

    #[test]
    fn test_margin_is_strict() {
        // ev_net lands on the margin exactly and must not pass.
        let ev = compute_ev(&signal(1.0, 0.9, 0.01, 0.0), 0.0, 0.0, 0.0, 0.01, 0.7);
        assert!(!ev.viability_pass);
        assert_eq!(ev.notes, vec![BELOW_MARGIN_NOTE.to_string()]);
    }
}
