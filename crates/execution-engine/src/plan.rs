use std::fmt;
use std::str::FromStr;

use common::{DecisionRecord, Error, ExecutionConfig, InstrumentType, Result};
use gate_engine::{stop_loss_price, Side};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
    /// Worked algorithmically; see `TwapParams`.
    Alg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwapParams {
    pub duration_minutes: u32,
    pub slices: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedOrder {
    pub ticker: String,
    pub side: OrderSide,
    pub qty: i64,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    /// Price the order was sized at.
    pub reference_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twap: Option<TwapParams>,
    /// Overrides the plan's routing participation for this order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent_of_adv: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub decision_id: String,
    pub orders: Vec<PlannedOrder>,
    pub sor_policy: SorPolicy,
    pub max_slippage_bps: f64,
    #[serde(default)]
    pub stop_loss_price: Option<f64>,
}

/// Smart-order-routing participation cap, written `percent_of_adv=0.05`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SorPolicy {
    PercentOfAdv(f64),
}

impl SorPolicy {
    pub fn percent_of_adv(&self) -> f64 {
        match self {
            SorPolicy::PercentOfAdv(p) => *p,
        }
    }
}

impl Default for SorPolicy {
    fn default() -> Self {
        SorPolicy::PercentOfAdv(0.05)
    }
}

impl FromStr for SorPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(SorPolicy::default());
        }
        let Some(raw) = s.strip_prefix("percent_of_adv=") else {
            return Err(Error::Config(format!("unknown sor_policy: {s}")));
        };
        match raw.trim().parse::<f64>() {
            Ok(p) if p > 0.0 && p <= 1.0 => Ok(SorPolicy::PercentOfAdv(p)),
            _ => Err(Error::Config(format!("invalid percent_of_adv: {raw}"))),
        }
    }
}

impl fmt::Display for SorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SorPolicy::PercentOfAdv(p) => write!(f, "percent_of_adv={p}"),
        }
    }
}

impl TryFrom<String> for SorPolicy {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<SorPolicy> for String {
    fn from(policy: SorPolicy) -> Self {
        policy.to_string()
    }
}

/// Sizes a single buy order for a decision.
///
/// Quantity comes from the signal when it names one, otherwise from
/// `nav · allocation_fraction · scale_factor` at `price`, at least one share.
/// LETFs and large orders are worked with TWAP.
pub fn build_execution_plan(
    record: &DecisionRecord,
    nav: f64,
    price: f64,
    config: &ExecutionConfig,
) -> Result<ExecutionPlan> {
    if !(price.is_finite() && price > 0.0) {
        return Err(Error::InvalidSignal(format!("price must be positive, got {price}")));
    }
    if !(nav.is_finite() && nav > 0.0) {
        return Err(Error::InvalidSignal(format!("nav must be positive, got {nav}")));
    }

    let instrument = &record.llm_output.suggested_instrument;
    let qty = match instrument.qty {
        Some(q) if q > 0 => q,
        _ => {
            let notional = nav * config.allocation_fraction * record.quant_checks.scale_factor;
            ((notional / price).round() as i64).max(1)
        }
    };

    let worked = qty > config.twap_qty_threshold || instrument.kind == InstrumentType::Letf;
    let order = PlannedOrder {
        ticker: instrument.ticker.clone(),
        side: OrderSide::Buy,
        qty,
        order_type: if worked { OrderType::Alg } else { OrderType::Market },
        reference_price: price,
        limit: None,
        twap: worked.then_some(TwapParams {
            duration_minutes: config.twap_duration_minutes,
            slices: config.twap_slices,
        }),
        percent_of_adv: None,
    };

    Ok(ExecutionPlan {
        decision_id: record.decision_id.clone(),
        orders: vec![order],
        sor_policy: config.sor_policy.parse()?,
        max_slippage_bps: config.max_slippage_bps,
        stop_loss_price: Some(stop_loss_price(price, config.stop_loss_pct, Side::Long)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::record;

    #[test]
    fn test_signal_qty_wins_and_letf_is_worked() {
        let plan = build_execution_plan(&record(true, false), 100_000.0, 50.0, &ExecutionConfig::default()).unwrap();
        let order = &plan.orders[0];

        assert_eq!(plan.decision_id, "dec-1");
        assert_eq!(order.qty, 10);
        assert_eq!(order.side, OrderSide::Buy);
        assert_eq!(order.order_type, OrderType::Alg);
        assert_eq!(
            order.twap,
            Some(TwapParams {
                duration_minutes: 30,
                slices: 6
            })
        );
        assert!((plan.stop_loss_price.unwrap() - 48.5).abs() < 1e-9);
        assert_eq!(plan.sor_policy, SorPolicy::PercentOfAdv(0.05));
    }

    #[test]
    fn test_sizing_from_nav_for_plain_etf() {
        let mut rec = record(true, false);
        rec.llm_output.suggested_instrument.kind = InstrumentType::Etf;
        rec.llm_output.suggested_instrument.qty = None;
        rec.quant_checks.scale_factor = 0.5;

        // 1_000_000 · 0.02 · 0.5 / 100 = 100 shares
        let plan = build_execution_plan(&rec, 1_000_000.0, 100.0, &ExecutionConfig::default()).unwrap();
        assert_eq!(plan.orders[0].qty, 100);
        assert_eq!(plan.orders[0].order_type, OrderType::Market);
        assert!(plan.orders[0].twap.is_none());

        // 10_000_000 · 0.02 · 0.5 / 10 = 10_000 shares, above the TWAP threshold
        let plan = build_execution_plan(&rec, 10_000_000.0, 10.0, &ExecutionConfig::default()).unwrap();
        assert_eq!(plan.orders[0].qty, 10_000);
        assert_eq!(plan.orders[0].order_type, OrderType::Alg);
    }

    #[test]
    fn test_tiny_allocation_still_buys_one_share() {
        let mut rec = record(true, false);
        rec.llm_output.suggested_instrument.qty = None;
        let plan = build_execution_plan(&rec, 1_000.0, 5_000.0, &ExecutionConfig::default()).unwrap();
        assert_eq!(plan.orders[0].qty, 1);
    }

    #[test]
    fn test_rejects_bad_price_and_nav() {
        let rec = record(true, false);
        let config = ExecutionConfig::default();
        assert!(matches!(
            build_execution_plan(&rec, 1_000.0, 0.0, &config),
            Err(Error::InvalidSignal(_))
        ));
        assert!(matches!(
            build_execution_plan(&rec, f64::NAN, 10.0, &config),
            Err(Error::InvalidSignal(_))
        ));
    }

    #[test]
    fn test_sor_policy_parsing() {
        assert_eq!("percent_of_adv=0.1".parse::<SorPolicy>().unwrap(), SorPolicy::PercentOfAdv(0.1));
        assert_eq!("".parse::<SorPolicy>().unwrap(), SorPolicy::default());
        assert!("percent_of_adv=0".parse::<SorPolicy>().is_err());
        assert!("percent_of_adv=1.5".parse::<SorPolicy>().is_err());
        assert!("vwap".parse::<SorPolicy>().is_err());
    }

    #[test]
    fn test_plan_json_shape() {
        let plan = build_execution_plan(&record(true, false), 100_000.0, 50.0, &ExecutionConfig::default()).unwrap();
        let json = serde_json::to_value(&plan).unwrap();

        assert_eq!(json["sor_policy"], "percent_of_adv=0.05");
        assert_eq!(json["orders"][0]["type"], "ALG");
        assert_eq!(json["orders"][0]["side"], "BUY");
        assert!(json["orders"][0].get("limit").is_none());
    }
}
