//! Canonical serialization and SHA-256 audit hashing for decision records.
//!
//! The canonical form is compact JSON with object keys sorted
//! byte-lexicographically at every depth, UTF-8 strings left unescaped, and
//! floats in shortest round-trip notation. `audit_hash` and `signature` are
//! removed from a record before it is canonicalized.

use chrono::Utc;
use common::{ApprovalSignature, DecisionRecord, Error, FiniteCheck, Result};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Fields left out of the audit hash.
pub const EXCLUDED_FIELDS: [&str; 2] = ["audit_hash", "signature"];

/// Canonical bytes of any serializable value.
pub fn canonicalize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(value).map_err(|e| Error::Serialization(e.to_string()))?;
    canonicalize_value(&value)
}

/// Canonical bytes of an already-built JSON tree.
pub fn canonicalize_value(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(1024);
    write_canonical(value, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push(b'{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_scalar(&Value::String(key.clone()), out)?;
                out.push(b':');
                write_canonical(&map[key], out)?;
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out)?;
            }
            out.push(b']');
        }
        scalar => write_scalar(scalar, out)?,
    }
    Ok(())
}

fn write_scalar(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    if let Value::Number(n) = value {
        if n.as_f64().is_some_and(|f| !f.is_finite()) {
            return Err(Error::Serialization(format!("non-finite number {n}")));
        }
    }
    serde_json::to_writer(&mut *out, value).map_err(|e| Error::Serialization(e.to_string()))
}

/// Canonical bytes of a record with the self-referential fields removed.
pub fn canonicalize_record(record: &DecisionRecord) -> Result<Vec<u8>> {
    if let Some(field) = record.non_finite_field() {
        return Err(Error::Serialization(format!(
            "{field} is not a finite number"
        )));
    }
    let mut value =
        serde_json::to_value(record).map_err(|e| Error::Serialization(e.to_string()))?;
    let Value::Object(map) = &mut value else {
        return Err(Error::Serialization("decision record is not an object".into()));
    };
    for field in EXCLUDED_FIELDS {
        map.remove(field);
    }
    canonicalize_value(&value)
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// SHA-256 over `parts` joined by `|`.
pub fn digest_parts(parts: &[&str]) -> String {
    sha256_hex(parts.join("|").as_bytes())
}

pub fn compute_audit_hash(record: &DecisionRecord) -> Result<String> {
    Ok(sha256_hex(&canonicalize_record(record)?))
}

/// True when the stored hash matches a fresh recomputation.
pub fn verify_audit_hash(record: &DecisionRecord) -> bool {
    if record.audit_hash.is_empty() {
        return false;
    }
    compute_audit_hash(record).is_ok_and(|h| h == record.audit_hash)
}

/// Lightweight signature binding `signer` to the record's audit hash.
///
/// This is a digest, not a private-key signature; it proves which hash a
/// signer approved, not who the signer was.
pub fn sign(record: &DecisionRecord, signer: &str) -> Result<ApprovalSignature> {
    if record.audit_hash.is_empty() {
        return Err(Error::Serialization(
            "record must carry an audit_hash before it can be signed".into(),
        ));
    }
    Ok(ApprovalSignature {
        signed_by: signer.to_string(),
        signature_hash: digest_parts(&[&record.audit_hash, signer]),
        signed_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use common::{
        DecayMethod, DecayStats, DecisionDraft, Evidence, ExpectedDelta, InstrumentType,
        LlmOutput, PretradeResult, QuantChecks, SignalFlags, SuggestedInstrument,
    };
    use serde_json::json;
    use std::collections::BTreeMap;

    fn sample_record() -> DecisionRecord {
        let llm_output = LlmOutput {
            p_success: 0.8,
            p_confidence: 0.85,
            expected_delta: ExpectedDelta {
                fav: 0.1,
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
        };
        let quant_checks = QuantChecks {
            ev_gross: 0.07,
            letf_decay: 0.002,
            ev_net: 0.067,
            viability_pass: true,
            p_confidence: 0.85,
            safety_margin: 0.01,
            notes: vec![],
            decay: DecayStats {
                method: DecayMethod::Bootstrap,
                seed: 42,
                trials: 500,
                window: 5,
                leverage: 2.0,
                mean: -0.002,
                median: -0.001,
                p10: -0.05,
                p25: -0.02,
                p75: 0.02,
                p90: 0.05,
                worst: -0.1,
                best: 0.1,
            },
            letf_decay_analytic: 0.001,
            t_max_days: 10,
            requires_human_review: false,
            scale_factor: 1.0,
            recent_annual_vol: 0.16,
            position_var: 0.001,
            portfolio_var: 0.004,
            var_limit: 0.02,
            var_limit_breached: false,
            pretrade: PretradeResult {
                allowed: true,
                reasons: vec![],
                notional_usd: 20_000.0,
            },
        };
        let evidence = vec![
            Evidence {
                source_id: "FRED.1".into(),
                kind: "macro".into(),
                filecite: None,
                excerpt: None,
            },
            Evidence {
                source_id: "SEC.2".into(),
                kind: "filing".into(),
                filecite: Some("10-K|L1-L4".into()),
                excerpt: None,
            },
        ];
        DecisionDraft::new("test-model-v1", "test_prompt_hash", llm_output, quant_checks)
            .with_decision_id("0f0e0d0c0b0a09080706050403020100")
            .with_input("market_snapshot", json!({"SPY": {"price": 400.0}}))
            .with_evidence(evidence)
            .into_record(Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap())
    }

    #[test]
    fn test_key_order_does_not_change_canonical_form() {
        let a = json!({"b": 1, "a": {"y": [1, 2], "x": "é"}});
        let b = json!({"a": {"x": "é", "y": [1, 2]}, "b": 1});
        let bytes = canonicalize_value(&a).unwrap();
        assert_eq!(bytes, canonicalize_value(&b).unwrap());
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"a":{"x":"é","y":[1,2]},"b":1}"#
        );
    }

    #[test]
    fn test_audit_hash_ignores_hash_and_signature_fields() {
        let mut record = sample_record();
        let hash = compute_audit_hash(&record).unwrap();
        record.audit_hash = hash.clone();
        record.signature = Some(sign(&record, "alice").unwrap());
        assert_eq!(compute_audit_hash(&record).unwrap(), hash);
        assert!(verify_audit_hash(&record));
    }

    #[test]
    fn test_any_field_change_is_detected() {
        let mut record = sample_record();
        record.audit_hash = compute_audit_hash(&record).unwrap();
        record.quant_checks.ev_net += 1e-12;
        assert!(!verify_audit_hash(&record));
    }

    #[test]
    fn test_hash_survives_json_round_trip() {
        let mut record = sample_record();
        record.audit_hash = compute_audit_hash(&record).unwrap();
        let text = serde_json::to_string_pretty(&record).unwrap();
        let reloaded: DecisionRecord = serde_json::from_str(&text).unwrap();
        assert!(verify_audit_hash(&reloaded));
    }

    #[test]
    fn test_nan_is_rejected() {
        let mut record = sample_record();
        record.quant_checks.ev_gross = f64::NAN;
        match compute_audit_hash(&record) {
            Err(Error::Serialization(msg)) => assert!(msg.contains("quant_checks.ev_gross")),
            other => panic!("expected serialization error, got {other:?}"),
        }
    }

    #[test]
    fn test_sign_requires_hash() {
        let record = sample_record();
        assert!(sign(&record, "alice").is_err());
    }

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
