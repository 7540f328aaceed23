//! Execution planning, brokers, and kill-switch-gated submission.

pub mod broker;
pub mod engine;
pub mod plan;
pub mod sandbox;

#[cfg(test)]
mod fixtures;

pub use broker::{BrokerAdapter, ExecutionMetrics, ExecutionReport, Fill, FillStatus, OrderReport};
pub use engine::{ExecutionEngine, ExecutionOutcome};
pub use plan::{build_execution_plan, ExecutionPlan, OrderSide, OrderType, PlannedOrder, SorPolicy, TwapParams};
pub use sandbox::{MarketQuote, SandboxBroker};
