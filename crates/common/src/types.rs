//! Domain types shared across the engine.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::Error;

/// Confidence at or above which a record must cite multiple sources.
pub const HIGH_CONFIDENCE: f64 = 0.7;

/// Distinct evidence sources required for a high-confidence record.
pub const MIN_EVIDENCE_SOURCES: usize = 2;

// ── Execution mode ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Live,
    #[default]
    Shadow,
    Disabled,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Live => "live",
            ExecutionMode::Shadow => "shadow",
            ExecutionMode::Disabled => "disabled",
        }
    }

    /// Shadow and disabled both stop outbound live orders.
    pub fn is_safe(&self) -> bool {
        !matches!(self, ExecutionMode::Live)
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "live" => Ok(ExecutionMode::Live),
            "shadow" => Ok(ExecutionMode::Shadow),
            "disabled" => Ok(ExecutionMode::Disabled),
            other => Err(Error::Config(format!("unknown execution mode: {other}"))),
        }
    }
}

// ── LLM signal ────────────────────────────────────────────────────────

/// Scenario returns the model expects for the trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExpectedDelta {
    pub fav: f64,
    #[serde(default)]
    pub neutral: f64,
    pub unfav: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstrumentType {
    Etf,
    Letf,
    Equity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SuggestedInstrument {
    pub ticker: String,
    #[serde(rename = "type")]
    pub kind: InstrumentType,
    #[serde(default = "default_leverage")]
    pub leverage: f64,
    #[serde(default)]
    pub qty: Option<i64>,
}

fn default_leverage() -> f64 {
    1.0
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SignalFlags {
    #[serde(default)]
    pub requires_human_review: bool,
}

/// Structured output of the signal-generation model.
///
/// Only the named fields are interpreted; anything else the model emits is
/// carried through `extra` untouched so it stays covered by the audit hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LlmOutput {
    pub p_success: f64,
    pub p_confidence: f64,
    pub expected_delta: ExpectedDelta,
    pub horizon_days: u32,
    pub suggested_instrument: SuggestedInstrument,
    #[serde(default)]
    pub flags: SignalFlags,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Evidence {
    pub source_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub filecite: Option<String>,
    #[serde(default)]
    pub excerpt: Option<String>,
}

/// Number of distinct `source_id`s among the evidence items.
pub fn distinct_sources(evidence: &[Evidence]) -> usize {
    evidence
        .iter()
        .map(|e| e.source_id.trim())
        .filter(|s| !s.is_empty())
        .collect::<HashSet<_>>()
        .len()
}

/// True when a high-confidence signal lacks corroborating sources.
pub fn evidence_insufficient(p_confidence: f64, evidence: &[Evidence]) -> bool {
    p_confidence >= HIGH_CONFIDENCE && distinct_sources(evidence) < MIN_EVIDENCE_SOURCES
}

// ── Market context ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerMetrics {
    pub adv_usd: f64,
    pub spread_bps: f64,
    #[serde(default)]
    pub ask_size: Option<f64>,
}

/// Market snapshot the gate evaluates a signal against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketContext {
    /// Daily simple returns of the underlying, oldest first.
    #[serde(default)]
    pub underlying_returns: Vec<f64>,
    /// Overrides the vol estimated from `underlying_returns`.
    #[serde(default)]
    pub est_vol_annual: Option<f64>,
    /// Daily returns of the current book, for portfolio VaR.
    #[serde(default)]
    pub portfolio_returns: Vec<f64>,
    #[serde(default)]
    pub trading_costs: f64,
    #[serde(default)]
    pub slippage: f64,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub ticker_metrics: Option<TickerMetrics>,
}

// ── Gate output ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecayMethod {
    Bootstrap,
    Synthetic,
}

/// Summary of a seeded LETF decay simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecayStats {
    pub method: DecayMethod,
    pub seed: u64,
    pub trials: u32,
    pub window: u32,
    pub leverage: f64,
    pub mean: f64,
    pub median: f64,
    pub p10: f64,
    pub p25: f64,
    pub p75: f64,
    pub p90: f64,
    pub worst: f64,
    pub best: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PretradeResult {
    pub allowed: bool,
    pub reasons: Vec<String>,
    pub notional_usd: f64,
}

/// Everything the deterministic gate computed for one signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantChecks {
    pub ev_gross: f64,
    pub letf_decay: f64,
    pub ev_net: f64,
    pub viability_pass: bool,
    pub p_confidence: f64,
    pub safety_margin: f64,
    pub notes: Vec<String>,
    pub decay: DecayStats,
    pub letf_decay_analytic: f64,
    pub t_max_days: u32,
    pub requires_human_review: bool,
    pub scale_factor: f64,
    pub recent_annual_vol: f64,
    pub position_var: f64,
    pub portfolio_var: f64,
    pub var_limit: f64,
    pub var_limit_breached: bool,
    pub pretrade: PretradeResult,
}

// ── Decision record ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanReview {
    pub reviewer: String,
    pub approved: bool,
    #[serde(default)]
    pub notes: String,
    pub reviewed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalSignature {
    pub signed_by: String,
    pub signature_hash: String,
    pub signed_at: DateTime<Utc>,
}

/// Immutable audit unit for one trading decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub decision_id: String,
    pub timestamp_utc: DateTime<Utc>,
    pub model_version: String,
    pub prompt_hash: String,
    pub inputs: BTreeMap<String, Value>,
    pub llm_output: LlmOutput,
    pub quant_checks: QuantChecks,
    pub human_review: Option<HumanReview>,
    pub execution_plan: Option<Value>,
    pub execution_result: Option<Value>,
    pub evidence: Vec<Evidence>,
    pub audit_hash: String,
    pub signature: Option<ApprovalSignature>,
}

impl DecisionRecord {
    /// A viable record must satisfy the evidence rule.
    pub fn violates_evidence_rule(&self) -> bool {
        self.quant_checks.viability_pass
            && evidence_insufficient(self.llm_output.p_confidence, &self.evidence)
    }

    /// Cleared for automatic submission without a reviewer in the loop.
    pub fn review_cleared(&self) -> bool {
        if !self.quant_checks.requires_human_review {
            return true;
        }
        self.human_review.as_ref().is_some_and(|r| r.approved)
    }
}

/// A record under construction, before the store stamps and hashes it.
#[derive(Debug, Clone)]
pub struct DecisionDraft {
    pub decision_id: String,
    pub model_version: String,
    pub prompt_hash: String,
    pub inputs: BTreeMap<String, Value>,
    pub llm_output: LlmOutput,
    pub quant_checks: QuantChecks,
    pub human_review: Option<HumanReview>,
    pub execution_plan: Option<Value>,
    pub execution_result: Option<Value>,
    pub evidence: Vec<Evidence>,
    /// Who signs the record once its audit hash exists.
    pub signer: Option<String>,
}

impl DecisionDraft {
    pub fn new(
        model_version: impl Into<String>,
        prompt_hash: impl Into<String>,
        llm_output: LlmOutput,
        quant_checks: QuantChecks,
    ) -> Self {
        Self {
            decision_id: Uuid::new_v4().simple().to_string(),
            model_version: model_version.into(),
            prompt_hash: prompt_hash.into(),
            inputs: BTreeMap::new(),
            llm_output,
            quant_checks,
            human_review: None,
            execution_plan: None,
            execution_result: None,
            evidence: Vec::new(),
            signer: None,
        }
    }

    pub fn with_decision_id(mut self, decision_id: impl Into<String>) -> Self {
        self.decision_id = decision_id.into();
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, snapshot: Value) -> Self {
        self.inputs.insert(name.into(), snapshot);
        self
    }

    pub fn with_evidence(mut self, evidence: Vec<Evidence>) -> Self {
        self.evidence = evidence;
        self
    }

    pub fn with_human_review(mut self, review: HumanReview) -> Self {
        self.human_review = Some(review);
        self
    }

    pub fn with_execution_plan(mut self, plan: Value) -> Self {
        self.execution_plan = Some(plan);
        self
    }

    pub fn signed_by(mut self, signer: impl Into<String>) -> Self {
        self.signer = Some(signer.into());
        self
    }

    pub fn violates_evidence_rule(&self) -> bool {
        self.quant_checks.viability_pass
            && evidence_insufficient(self.llm_output.p_confidence, &self.evidence)
    }

    /// Fixes the timestamp. Hash and signature are left for the store.
    pub fn into_record(self, timestamp_utc: DateTime<Utc>) -> DecisionRecord {
        DecisionRecord {
            decision_id: self.decision_id,
            timestamp_utc,
            model_version: self.model_version,
            prompt_hash: self.prompt_hash,
            inputs: self.inputs,
            llm_output: self.llm_output,
            quant_checks: self.quant_checks,
            human_review: self.human_review,
            execution_plan: self.execution_plan,
            execution_result: self.execution_result,
            evidence: self.evidence,
            audit_hash: String::new(),
            signature: None,
        }
    }
}

// ── Finite-value checks ───────────────────────────────────────────────

/// Reports the first float field that cannot be canonically serialized.
///
/// `serde_json` silently writes NaN and infinities as `null`, which would
/// make two different records hash identically.
pub trait FiniteCheck {
    fn non_finite_field(&self) -> Option<&'static str>;
}

fn first_non_finite(fields: &[(&'static str, f64)]) -> Option<&'static str> {
    fields.iter().find(|(_, v)| !v.is_finite()).map(|(name, _)| *name)
}

impl FiniteCheck for LlmOutput {
    fn non_finite_field(&self) -> Option<&'static str> {
        first_non_finite(&[
            ("llm_output.p_success", self.p_success),
            ("llm_output.p_confidence", self.p_confidence),
            ("llm_output.expected_delta.fav", self.expected_delta.fav),
            ("llm_output.expected_delta.neutral", self.expected_delta.neutral),
            ("llm_output.expected_delta.unfav", self.expected_delta.unfav),
            (
                "llm_output.suggested_instrument.leverage",
                self.suggested_instrument.leverage,
            ),
        ])
    }
}

impl FiniteCheck for QuantChecks {
    fn non_finite_field(&self) -> Option<&'static str> {
        first_non_finite(&[
            ("quant_checks.ev_gross", self.ev_gross),
            ("quant_checks.letf_decay", self.letf_decay),
            ("quant_checks.ev_net", self.ev_net),
            ("quant_checks.p_confidence", self.p_confidence),
            ("quant_checks.safety_margin", self.safety_margin),
            ("quant_checks.decay.leverage", self.decay.leverage),
            ("quant_checks.decay.mean", self.decay.mean),
            ("quant_checks.decay.median", self.decay.median),
            ("quant_checks.decay.p10", self.decay.p10),
            ("quant_checks.decay.p25", self.decay.p25),
            ("quant_checks.decay.p75", self.decay.p75),
            ("quant_checks.decay.p90", self.decay.p90),
            ("quant_checks.decay.worst", self.decay.worst),
            ("quant_checks.decay.best", self.decay.best),
            ("quant_checks.letf_decay_analytic", self.letf_decay_analytic),
            ("quant_checks.scale_factor", self.scale_factor),
            ("quant_checks.recent_annual_vol", self.recent_annual_vol),
            ("quant_checks.position_var", self.position_var),
            ("quant_checks.portfolio_var", self.portfolio_var),
            ("quant_checks.var_limit", self.var_limit),
            ("quant_checks.pretrade.notional_usd", self.pretrade.notional_usd),
        ])
    }
}

impl FiniteCheck for DecisionRecord {
    fn non_finite_field(&self) -> Option<&'static str> {
        self.llm_output
            .non_finite_field()
            .or_else(|| self.quant_checks.non_finite_field())
    }
}
