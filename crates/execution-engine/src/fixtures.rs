use std::collections::BTreeMap;

use chrono::Utc;
use common::{
    DecayMethod, DecayStats, DecisionDraft, DecisionRecord, ExpectedDelta, InstrumentType, LlmOutput,
    PretradeResult, QuantChecks, SignalFlags, SuggestedInstrument,
};

/// A stored-looking SSO decision for 10 shares.
pub fn record(viable: bool, review: bool) -> DecisionRecord {
    let llm_output = LlmOutput {
        p_success: 0.7,
        p_confidence: 0.82,
        expected_delta: ExpectedDelta {
            fav: 0.08,
            neutral: 0.0,
            unfav: -0.05,
        },
        horizon_days: 5,
        suggested_instrument: SuggestedInstrument {
            ticker: "SSO".into(),
            kind: InstrumentType::Letf,
            leverage: 2.0,
            qty: Some(10),
        },
        flags: SignalFlags {
            requires_human_review: review,
        },
        extra: BTreeMap::new(),
    };
    let quant_checks = QuantChecks {
        ev_gross: 0.041,
        letf_decay: 0.0,
        ev_net: 0.034,
        viability_pass: viable,
        p_confidence: 0.82,
        safety_margin: 0.01,
        notes: Vec::new(),
        decay: DecayStats {
            method: DecayMethod::Bootstrap,
            seed: 42,
            trials: 10,
            window: 5,
            leverage: 2.0,
            mean: 0.0,
            median: 0.0,
            p10: 0.0,
            p25: 0.0,
            p75: 0.0,
            p90: 0.0,
            worst: 0.0,
            best: 0.0,
        },
        letf_decay_analytic: 0.0,
        t_max_days: 10,
        requires_human_review: review,
        scale_factor: 1.0,
        recent_annual_vol: 0.2,
        position_var: 0.001,
        portfolio_var: 0.001,
        var_limit: 0.02,
        var_limit_breached: false,
        pretrade: PretradeResult {
            allowed: true,
            reasons: Vec::new(),
            notional_usd: 1000.0,
        },
    };
    DecisionDraft::new("test-model", "prompt", llm_output, quant_checks)
        .with_decision_id("dec-1")
        .into_record(Utc::now())
}
