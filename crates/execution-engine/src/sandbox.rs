//! Deterministic sandbox broker.
//!
//! Fills MARKET orders at the reference price plus jittered slippage, fills
//! LIMIT orders only when marketable, and works ALG orders as TWAP slices
//! capped by a share of the slice's ADV. Every submission reseeds from the
//! broker seed, so the same plan always produces the same report.

use std::collections::HashMap;

use common::Result;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::broker::{BrokerAdapter, ExecutionMetrics, ExecutionReport, Fill, FillStatus, OrderReport};
use crate::plan::{ExecutionPlan, OrderSide, OrderType, PlannedOrder, TwapParams};

const MINUTES_PER_SESSION: f64 = 390.0;
const SLIPPAGE_JITTER: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketQuote {
    pub price: f64,
    pub adv_usd: f64,
}

pub struct SandboxBroker {
    seed: u64,
    quotes: HashMap<String, MarketQuote>,
}

impl SandboxBroker {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            quotes: HashMap::new(),
        }
    }

    pub fn with_quote(mut self, ticker: impl Into<String>, quote: MarketQuote) -> Self {
        self.quotes.insert(ticker.into(), quote);
        self
    }

    pub fn execute(&self, plan: &ExecutionPlan) -> ExecutionReport {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut metrics = ExecutionMetrics::default();
        let mut reports = Vec::with_capacity(plan.orders.len());

        for order in &plan.orders {
            let quote = self.quotes.get(&order.ticker);
            let market_price = quote.map_or(order.reference_price, |q| q.price);
            let adv_usd = quote.map_or(0.0, |q| q.adv_usd);

            let report = match (order.order_type, order.twap) {
                (OrderType::Alg, Some(twap)) => {
                    let percent = order
                        .percent_of_adv
                        .unwrap_or_else(|| plan.sor_policy.percent_of_adv());
                    work_twap(order, twap, market_price, adv_usd, percent, plan.max_slippage_bps, &mut rng)
                }
                (OrderType::Limit, _) => fill_limit(order, market_price, plan.max_slippage_bps, &mut rng),
                _ => fill_market(order, market_price, plan.max_slippage_bps, &mut rng),
            };

            metrics.total_requested += order.qty;
            metrics.total_filled += report.filled_qty;
            if let Some(avg) = report.avg_fill_price {
                metrics.notional_filled_usd += report.filled_qty as f64 * avg;
            }
            reports.push(report);
        }

        ExecutionReport {
            broker: self.name().to_string(),
            fills: reports,
            metrics,
        }
    }
}

#[async_trait::async_trait]
impl BrokerAdapter for SandboxBroker {
    fn name(&self) -> &str {
        "sandbox"
    }

    async fn submit(&self, plan: &ExecutionPlan) -> Result<ExecutionReport> {
        let report = self.execute(plan);
        info!(
            "Sandbox worked plan {}: filled {}/{} (${:.2})",
            plan.decision_id,
            report.metrics.total_filled,
            report.metrics.total_requested,
            report.metrics.notional_filled_usd
        );
        Ok(report)
    }
}

/// Price after `slippage_bps` of adverse slippage, jittered by ±25%.
fn fill_price(price: f64, side: OrderSide, slippage_bps: f64, rng: &mut ChaCha8Rng) -> f64 {
    let sign = match side {
        OrderSide::Buy => 1.0,
        OrderSide::Sell => -1.0,
    };
    let jitter = rng.gen_range(-SLIPPAGE_JITTER..=SLIPPAGE_JITTER);
    price * (1.0 + sign * slippage_bps * (1.0 + jitter) / 10_000.0)
}

/// Shares one slice may take at `percent_of_adv` participation.
fn slice_capacity(adv_usd: f64, percent_of_adv: f64, slice_minutes: f64, price: f64) -> i64 {
    if adv_usd <= 0.0 || price <= 0.0 {
        return 0;
    }
    let allowed_usd = adv_usd / MINUTES_PER_SESSION * slice_minutes * percent_of_adv;
    (allowed_usd / price).floor().max(0.0) as i64
}

fn invalid(order: &PlannedOrder) -> OrderReport {
    OrderReport {
        ticker: order.ticker.clone(),
        requested_qty: order.qty,
        filled_qty: 0,
        avg_fill_price: None,
        status: FillStatus::InvalidOrder,
        fills: Vec::new(),
    }
}

fn single_fill(order: &PlannedOrder, price: f64) -> OrderReport {
    OrderReport {
        ticker: order.ticker.clone(),
        requested_qty: order.qty,
        filled_qty: order.qty,
        avg_fill_price: Some(price),
        status: FillStatus::Filled,
        fills: vec![Fill {
            slice: None,
            requested: order.qty,
            filled: order.qty,
            price: Some(price),
            status: FillStatus::Filled,
        }],
    }
}

fn fill_market(order: &PlannedOrder, market_price: f64, slippage_bps: f64, rng: &mut ChaCha8Rng) -> OrderReport {
    if order.qty <= 0 {
        return invalid(order);
    }
    single_fill(order, fill_price(market_price, order.side, slippage_bps, rng))
}

fn fill_limit(order: &PlannedOrder, market_price: f64, slippage_bps: f64, rng: &mut ChaCha8Rng) -> OrderReport {
    let Some(limit) = order.limit.filter(|_| order.qty > 0) else {
        return invalid(order);
    };
    let marketable = match order.side {
        OrderSide::Buy => limit >= market_price,
        OrderSide::Sell => limit <= market_price,
    };
    if !marketable {
        return OrderReport {
            status: FillStatus::NoFill,
            ..invalid(order)
        };
    }
    single_fill(order, fill_price(limit, order.side, slippage_bps, rng))
}

fn work_twap(
    order: &PlannedOrder,
    twap: TwapParams,
    market_price: f64,
    adv_usd: f64,
    percent_of_adv: f64,
    slippage_bps: f64,
    rng: &mut ChaCha8Rng,
) -> OrderReport {
    if order.qty <= 0 || twap.slices == 0 {
        return invalid(order);
    }
    let slice_minutes = f64::from(twap.duration_minutes) / f64::from(twap.slices);
    let intended = (order.qty + i64::from(twap.slices) - 1) / i64::from(twap.slices);
    let capacity = slice_capacity(adv_usd, percent_of_adv, slice_minutes, market_price);
    // Thin or unknown ADV still trades a share per slice.
    let allowed = if capacity > 0 { intended.min(capacity) } else { intended }.max(1);

    let mut remaining = order.qty;
    let mut fills = Vec::new();
    let mut notional = 0.0;
    for slice in 1..=twap.slices {
        let qty = allowed.min(remaining);
        let price = fill_price(market_price, order.side, slippage_bps, rng);
        fills.push(Fill {
            slice: Some(slice),
            requested: intended,
            filled: qty,
            price: Some(price),
            status: FillStatus::Filled,
        });
        notional += qty as f64 * price;
        remaining -= qty;
        if remaining == 0 {
            break;
        }
    }

    let filled = order.qty - remaining;
    OrderReport {
        ticker: order.ticker.clone(),
        requested_qty: order.qty,
        filled_qty: filled,
        avg_fill_price: Some(notional / filled as f64),
        status: if remaining == 0 {
            FillStatus::Filled
        } else {
            FillStatus::Partial
        },
        fills,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::SorPolicy;

    fn order(qty: i64, order_type: OrderType) -> PlannedOrder {
        PlannedOrder {
            ticker: "SSO".into(),
            side: OrderSide::Buy,
            qty,
            order_type,
            reference_price: 100.0,
            limit: None,
            twap: None,
            percent_of_adv: None,
        }
    }

    fn plan(orders: Vec<PlannedOrder>) -> ExecutionPlan {
        ExecutionPlan {
            decision_id: "dec-1".into(),
            orders,
            sor_policy: SorPolicy::default(),
            max_slippage_bps: 10.0,
            stop_loss_price: None,
        }
    }

    #[test]
    fn test_same_seed_same_report() {
        let p = plan(vec![order(50, OrderType::Market), order(20, OrderType::Market)]);
        let a = SandboxBroker::new(9).execute(&p);
        let b = SandboxBroker::new(9).execute(&p);
        assert_eq!(a, b);
    }

    #[test]
    fn test_market_fill_slips_within_jitter_band() {
        let report = SandboxBroker::new(1).execute(&plan(vec![order(50, OrderType::Market)]));
        let fill = &report.fills[0];

        assert_eq!(fill.status, FillStatus::Filled);
        assert_eq!(fill.filled_qty, 50);
        // 10bps ± 25%
        let price = fill.avg_fill_price.unwrap();
        assert!(price >= 100.0 * (1.0 + 7.5 / 10_000.0) - 1e-9);
        assert!(price <= 100.0 * (1.0 + 12.5 / 10_000.0) + 1e-9);

        let mut sell = order(50, OrderType::Market);
        sell.side = OrderSide::Sell;
        let report = SandboxBroker::new(1).execute(&plan(vec![sell]));
        assert!(report.fills[0].avg_fill_price.unwrap() < 100.0);
    }

    #[test]
    fn test_limit_orders_fill_only_when_marketable() {
        let broker = SandboxBroker::new(3).with_quote(
            "SSO",
            MarketQuote {
                price: 100.0,
                adv_usd: 1e9,
            },
        );

        let mut passive = order(10, OrderType::Limit);
        passive.limit = Some(99.0);
        let report = broker.execute(&plan(vec![passive]));
        assert_eq!(report.fills[0].status, FillStatus::NoFill);
        assert_eq!(report.metrics.total_filled, 0);
        assert_eq!(report.metrics.total_requested, 10);

        let mut marketable = order(10, OrderType::Limit);
        marketable.limit = Some(101.0);
        let report = broker.execute(&plan(vec![marketable]));
        assert_eq!(report.fills[0].status, FillStatus::Filled);
        assert!(report.fills[0].avg_fill_price.unwrap() > 101.0);
    }

    #[test]
    fn test_invalid_orders_are_reported_not_filled() {
        let limitless = order(10, OrderType::Limit);
        let report = SandboxBroker::new(3).execute(&plan(vec![order(0, OrderType::Market), limitless]));

        assert!(report
            .fills
            .iter()
            .all(|f| f.status == FillStatus::InvalidOrder && f.filled_qty == 0));
        assert_eq!(report.metrics.notional_filled_usd, 0.0);
    }

    #[test]
    fn test_twap_capped_by_adv_is_partial() {
        // 390 minutes of $3.9m ADV: $10k per minute, $50k per 5-minute
        // slice, 5% of that is $2.5k = 25 shares at $100.
        let broker = SandboxBroker::new(5).with_quote(
            "SSO",
            MarketQuote {
                price: 100.0,
                adv_usd: 3_900_000.0,
            },
        );
        let mut alg = order(600, OrderType::Alg);
        alg.twap = Some(TwapParams {
            duration_minutes: 30,
            slices: 6,
        });

        let report = broker.execute(&plan(vec![alg]));
        let fill = &report.fills[0];
        assert_eq!(fill.status, FillStatus::Partial);
        assert_eq!(fill.fills.len(), 6);
        assert!(fill.fills.iter().all(|s| s.filled == 25 && s.requested == 100));
        assert_eq!(fill.filled_qty, 150);
        assert_eq!(report.metrics.total_filled, 150);
        let expected = 150.0 * fill.avg_fill_price.unwrap();
        assert!((report.metrics.notional_filled_usd - expected).abs() < 1e-6);
    }

    #[test]
    fn test_twap_without_adv_fills_evenly() {
        let mut alg = order(10, OrderType::Alg);
        alg.twap = Some(TwapParams {
            duration_minutes: 30,
            slices: 4,
        });

        let report = SandboxBroker::new(5).execute(&plan(vec![alg]));
        let fill = &report.fills[0];
        assert_eq!(fill.status, FillStatus::Filled);
        let slices: Vec<i64> = fill.fills.iter().map(|s| s.filled).collect();
        assert_eq!(slices, vec![3, 3, 3, 1]);
    }
}
