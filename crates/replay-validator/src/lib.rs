//! Read-only replay of stored decision records.
//!
//! A replay recomputes the audit hash, re-runs the gate against the inputs
//! captured in the record, and compares every stored `quant_checks` value
//! with the recomputed one. Divergences are reported, never repaired.

use audit_hash::{compute_audit_hash, digest_parts};
use chrono::{DateTime, Utc};
use common::{DecisionRecord, GateConfig, MarketContext, Result};
use gate_engine::GateEngine;
use record_store::RecordStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

/// Input key holding the market snapshot the gate saw.
pub const MARKET_CONTEXT_INPUT: &str = "market_context";
/// Input key holding the gate parameters in force at decision time.
pub const GATE_CONFIG_INPUT: &str = "gate_config";

const ABS_TOLERANCE: f64 = 1e-9;
const REL_TOLERANCE: f64 = 1e-8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mismatch {
    /// Dotted path into the record, e.g. `quant_checks.decay.mean`.
    pub field: String,
    pub stored: Value,
    pub recomputed: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReplayOutcome {
    Match,
    Mismatch { mismatches: Vec<Mismatch> },
    /// The gate could not be re-run. Hash findings are still reported.
    ValidatorError { message: String, mismatches: Vec<Mismatch> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub decision_id: String,
    pub sequence: u64,
    pub outcome: ReplayOutcome,
}

impl ReplayReport {
    pub fn is_match(&self) -> bool {
        self.outcome == ReplayOutcome::Match
    }

    pub fn mismatches(&self) -> &[Mismatch] {
        match &self.outcome {
            ReplayOutcome::Match => &[],
            ReplayOutcome::Mismatch { mismatches } => mismatches,
            ReplayOutcome::ValidatorError { mismatches, .. } => mismatches,
        }
    }
}

/// Replays one stored decision. Fails only when the id is unknown.
pub fn replay(store: &RecordStore, decision_id: &str, fallback: &GateConfig) -> Result<ReplayReport> {
    let stored = store.get_stored(decision_id)?;
    Ok(replay_record(&stored.record, stored.sequence, fallback))
}

/// Replays every record stamped at or after `since`, in sequence order.
pub fn replay_since(store: &RecordStore, since: DateTime<Utc>, fallback: &GateConfig) -> Vec<ReplayReport> {
    store
        .list_since(since)
        .map(|stored| replay_record(&stored.record, stored.sequence, fallback))
        .collect()
}

pub fn replay_record(record: &DecisionRecord, sequence: u64, fallback: &GateConfig) -> ReplayReport {
    let mut mismatches = check_integrity(record);

    let outcome = match rerun_gate(record, fallback) {
        Ok(recomputed) => {
            let stored = serde_json::to_value(&record.quant_checks);
            match stored {
                Ok(stored) => {
                    diff_values("quant_checks", &stored, &recomputed, &mut mismatches);
                    if mismatches.is_empty() {
                        ReplayOutcome::Match
                    } else {
                        ReplayOutcome::Mismatch { mismatches }
                    }
                }
                Err(e) => ReplayOutcome::ValidatorError {
                    message: e.to_string(),
                    mismatches,
                },
            }
        }
        Err(message) => ReplayOutcome::ValidatorError { message, mismatches },
    };

    match &outcome {
        ReplayOutcome::Match => info!("Replay of {} matched", record.decision_id),
        ReplayOutcome::Mismatch { mismatches } => warn!(
            "Replay of {} diverged on {} field(s): {}",
            record.decision_id,
            mismatches.len(),
            mismatches
                .iter()
                .map(|m| m.field.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ),
        ReplayOutcome::ValidatorError { message, .. } => {
            warn!("Replay of {} could not run: {}", record.decision_id, message)
        }
    }

    ReplayReport {
        decision_id: record.decision_id.clone(),
        sequence,
        outcome,
    }
}

fn check_integrity(record: &DecisionRecord) -> Vec<Mismatch> {
    let mut mismatches = Vec::new();
    let recomputed = match compute_audit_hash(record) {
        Ok(hash) => hash,
        Err(e) => {
            mismatches.push(Mismatch {
                field: "audit_hash".into(),
                stored: Value::String(record.audit_hash.clone()),
                recomputed: Value::String(format!("<unhashable: {e}>")),
            });
            return mismatches;
        }
    };
    if recomputed != record.audit_hash {
        mismatches.push(Mismatch {
            field: "audit_hash".into(),
            stored: Value::String(record.audit_hash.clone()),
            recomputed: Value::String(recomputed.clone()),
        });
    }
    if let Some(signature) = &record.signature {
        // Bound to the hash the record should carry, not the stored one.
        let expected = digest_parts(&[&recomputed, &signature.signed_by]);
        if expected != signature.signature_hash {
            mismatches.push(Mismatch {
                field: "signature.signature_hash".into(),
                stored: Value::String(signature.signature_hash.clone()),
                recomputed: Value::String(expected),
            });
        }
    }
    mismatches
}

fn rerun_gate(record: &DecisionRecord, fallback: &GateConfig) -> std::result::Result<Value, String> {
    let market: MarketContext = record
        .inputs
        .get(MARKET_CONTEXT_INPUT)
        .ok_or_else(|| format!("record has no `{MARKET_CONTEXT_INPUT}` input"))
        .and_then(|v| serde_json::from_value(v.clone()).map_err(|e| format!("bad market_context: {e}")))?;

    let mut config: GateConfig = match record.inputs.get(GATE_CONFIG_INPUT) {
        Some(v) => serde_json::from_value(v.clone()).map_err(|e| format!("bad gate_config: {e}"))?,
        None => fallback.clone(),
    };
    config.decay_seed = record.quant_checks.decay.seed;
    config.decay_trials = record.quant_checks.decay.trials;

    let checks = GateEngine::new(config)
        .and_then(|gate| gate.evaluate(&record.llm_output, &record.evidence, &market))
        .map_err(|e| e.to_string())?;
    serde_json::to_value(&checks).map_err(|e| e.to_string())
}

fn within_tolerance(stored: f64, recomputed: f64) -> bool {
    let tolerance = ABS_TOLERANCE.max(REL_TOLERANCE * stored.abs().max(1.0));
    (stored - recomputed).abs() <= tolerance
}

fn diff_values(path: &str, stored: &Value, recomputed: &Value, out: &mut Vec<Mismatch>) {
    match (stored, recomputed) {
        (Value::Object(a), Value::Object(b)) => {
            for (key, sv) in a {
                let child = format!("{path}.{key}");
                diff_values(&child, sv, b.get(key).unwrap_or(&Value::Null), out);
            }
            for (key, rv) in b {
                if !a.contains_key(key) {
                    diff_values(&format!("{path}.{key}"), &Value::Null, rv, out);
                }
            }
        }
        (Value::Array(a), Value::Array(b)) if a.len() == b.len() => {
            for (i, (sv, rv)) in a.iter().zip(b).enumerate() {
                diff_values(&format!("{path}[{i}]"), sv, rv, out);
            }
        }
        (Value::Number(a), Value::Number(b)) => {
            let equal = match (a.as_i64(), b.as_i64(), a.as_u64(), b.as_u64()) {
                (Some(x), Some(y), _, _) => x == y,
                (_, _, Some(x), Some(y)) => x == y,
                _ => match (a.as_f64(), b.as_f64()) {
                    (Some(x), Some(y)) => within_tolerance(x, y),
                    _ => false,
                },
            };
            if !equal {
                out.push(mismatch(path, stored, recomputed));
            }
        }
        _ if stored != recomputed => out.push(mismatch(path, stored, recomputed)),
        _ => {}
    }
}

fn mismatch(path: &str, stored: &Value, recomputed: &Value) -> Mismatch {
    Mismatch {
        field: path.to_string(),
        stored: stored.clone(),
        recomputed: recomputed.clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use common::{
        DecisionDraft, Evidence, ExpectedDelta, InstrumentType, LlmOutput, SignalFlags, StoreConfig,
        SuggestedInstrument, TickerMetrics,
    };
    use gate_engine::synthetic_returns;
    use record_store::RECORDS_DIR;
    use serde_json::json;

    use super::*;

    fn signal() -> LlmOutput {
        LlmOutput {
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
                qty: None,
            },
            flags: SignalFlags::default(),
            extra: BTreeMap::new(),
        }
    }

    fn market() -> MarketContext {
        MarketContext {
            underlying_returns: synthetic_returns(0.18, 500, 252, 11),
            est_vol_annual: None,
            portfolio_returns: synthetic_returns(0.08, 250, 252, 12),
            trading_costs: 0.0005,
            slippage: 0.0003,
            price: Some(85.0),
            ticker_metrics: Some(TickerMetrics {
                adv_usd: 5_000_000_000.0,
                spread_bps: 0.5,
                ask_size: None,
            }),
        }
    }

    fn evidence() -> Vec<Evidence> {
        ["FRED.1", "SEC.2"]
            .iter()
            .map(|id| Evidence {
                source_id: id.to_string(),
                kind: "research".into(),
                filecite: None,
                excerpt: None,
            })
            .collect()
    }

    fn config() -> GateConfig {
        GateConfig {
            decay_trials: 500,
            ..GateConfig::default()
        }
    }

    async fn seeded_store(dir: &std::path::Path, decision_id: &str) -> RecordStore {
        let store = RecordStore::open(dir, StoreConfig::default()).unwrap();
        let market = market();
        let checks = GateEngine::new(config())
            .unwrap()
            .evaluate(&signal(), &evidence(), &market)
            .unwrap();
        let draft = DecisionDraft::new("model-v1", "prompt-hash", signal(), checks)
            .with_decision_id(decision_id)
            .with_evidence(evidence())
            .with_input(MARKET_CONTEXT_INPUT, serde_json::to_value(&market).unwrap())
            .with_input(GATE_CONFIG_INPUT, serde_json::to_value(config()).unwrap())
            .signed_by("desk-lead");
        store.append(draft).await.unwrap();
        store
    }

    fn edit_on_disk(dir: &std::path::Path, decision_id: &str, edit: impl FnOnce(&mut Value)) {
        let path = dir.join(RECORDS_DIR).join(format!("{decision_id}.json"));
        let mut envelope: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        edit(&mut envelope["record"]);
        std::fs::write(&path, serde_json::to_vec_pretty(&envelope).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_untouched_record_matches() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path(), "dec-1").await;

        let report = replay(&store, "dec-1", &GateConfig::default()).unwrap();
        assert!(report.is_match(), "{:?}", report.outcome);
        assert_eq!(report.sequence, 1);
    }

    #[tokio::test]
    async fn test_altered_hash_is_reported_and_not_repaired() {
        let dir = tempfile::tempdir().unwrap();
        drop(seeded_store(dir.path(), "dec-1").await);
        edit_on_disk(dir.path(), "dec-1", |record| {
            record["audit_hash"] = json!("0".repeat(64));
        });
        let path = dir.path().join(RECORDS_DIR).join("dec-1.json");
        let before = std::fs::read(&path).unwrap();

        let store = RecordStore::open(dir.path(), StoreConfig::default()).unwrap();
        let report = replay(&store, "dec-1", &GateConfig::default()).unwrap();

        let fields: Vec<&str> = report.mismatches().iter().map(|m| m.field.as_str()).collect();
        assert!(matches!(report.outcome, ReplayOutcome::Mismatch { .. }));
        assert_eq!(fields, vec!["audit_hash"]);
        assert_eq!(report.mismatches()[0].stored, json!("0".repeat(64)));
        assert_eq!(std::fs::read(&path).unwrap(), before);
        assert_eq!(store.get("dec-1").unwrap().audit_hash, "0".repeat(64));
    }

    #[tokio::test]
    async fn test_tampered_quant_checks_are_located() {
        let dir = tempfile::tempdir().unwrap();
        drop(seeded_store(dir.path(), "dec-1").await);
        edit_on_disk(dir.path(), "dec-1", |record| {
            record["quant_checks"]["ev_net"] = json!(0.5);
        });

        let store = RecordStore::open(dir.path(), StoreConfig::default()).unwrap();
        let report = replay(&store, "dec-1", &GateConfig::default()).unwrap();
        let fields: Vec<&str> = report.mismatches().iter().map(|m| m.field.as_str()).collect();

        assert!(fields.contains(&"audit_hash"));
        assert!(fields.contains(&"signature.signature_hash"));
        assert!(fields.contains(&"quant_checks.ev_net"));
    }

    #[tokio::test]
    async fn test_missing_inputs_is_validator_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path(), StoreConfig::default()).unwrap();
        let checks = GateEngine::new(config())
            .unwrap()
            .evaluate(&signal(), &evidence(), &market())
            .unwrap();
        store
            .append(
                DecisionDraft::new("model-v1", "prompt-hash", signal(), checks)
                    .with_decision_id("bare")
                    .with_evidence(evidence()),
            )
            .await
            .unwrap();

        let report = replay(&store, "bare", &GateConfig::default()).unwrap();
        match report.outcome {
            ReplayOutcome::ValidatorError { message, mismatches } => {
                assert!(message.contains("market_context"));
                assert!(mismatches.is_empty());
            }
            other => panic!("expected validator error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::open(dir.path(), StoreConfig::default()).unwrap();
        assert!(matches!(
            replay(&store, "ghost", &GateConfig::default()),
            Err(common::Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_replay_since_covers_range() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path(), "dec-1").await;
        let checks = GateEngine::new(config())
            .unwrap()
            .evaluate(&signal(), &evidence(), &market())
            .unwrap();
        store
            .append(
                DecisionDraft::new("model-v1", "prompt-hash", signal(), checks)
                    .with_decision_id("dec-2")
                    .with_evidence(evidence())
                    .with_input(MARKET_CONTEXT_INPUT, serde_json::to_value(market()).unwrap()),
            )
            .await
            .unwrap();

        // dec-2 has no stored gate_config; the fallback matches what produced it.
        let reports = replay_since(&store, DateTime::<Utc>::MIN_UTC, &config());
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(ReplayReport::is_match));
        assert_eq!(reports[1].decision_id, "dec-2");
    }

    #[test]
    fn test_float_tolerance() {
        assert!(within_tolerance(0.0, 5e-9));
        assert!(!within_tolerance(0.0, 2e-8));
        assert!(within_tolerance(1e6, 1e6 + 5e-3));
        assert!(!within_tolerance(1e6, 1e6 + 0.1));
    }

    #[test]
    fn test_diff_reports_paths() {
        let stored = json!({"a": 1, "b": {"c": 0.5, "d": ["x", "y"]}, "e": true});
        let recomputed = json!({"a": 1, "b": {"c": 0.5000001, "d": ["x", "z"]}, "f": 1});
        let mut out = Vec::new();
        diff_values("q", &stored, &recomputed, &mut out);

        let fields: Vec<&str> = out.iter().map(|m| m.field.as_str()).collect();
        assert_eq!(fields, vec!["q.b.c", "q.b.d[1]", "q.e", "q.f"]);
    }
}
