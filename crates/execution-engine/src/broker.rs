use common::Result;
use serde::{Deserialize, Serialize};

use crate::plan::ExecutionPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillStatus {
    Filled,
    Partial,
    NoFill,
    NotFilled,
    InvalidOrder,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    /// 1-based TWAP slice, absent for single-shot orders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slice: Option<u32>,
    pub requested: i64,
    pub filled: i64,
    pub price: Option<f64>,
    pub status: FillStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReport {
    pub ticker: String,
    pub requested_qty: i64,
    pub filled_qty: i64,
    pub avg_fill_price: Option<f64>,
    pub status: FillStatus,
    pub fills: Vec<Fill>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub total_requested: i64,
    pub total_filled: i64,
    pub notional_filled_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub broker: String,
    pub fills: Vec<OrderReport>,
    pub metrics: ExecutionMetrics,
}

/// Anything that can work an execution plan: a live venue or the sandbox.
#[async_trait::async_trait]
pub trait BrokerAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn submit(&self, plan: &ExecutionPlan) -> Result<ExecutionReport>;
}
