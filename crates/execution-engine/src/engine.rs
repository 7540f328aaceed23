use std::sync::Arc;

use common::{DecisionRecord, Error, ExecutionMode, Result};
use kill_switch::KillSwitch;
use tracing::{error, info, warn};

use crate::broker::{BrokerAdapter, ExecutionReport};
use crate::plan::ExecutionPlan;

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// The gate did not pass the decision.
    NotViable,
    /// Flagged for human review and not yet approved.
    AwaitingReview,
    /// Shadow mode: worked by the sandbox for observation only.
    ShadowFilled(ExecutionReport),
    Placed(ExecutionReport),
}

pub struct ExecutionEngine {
    kill_switch: Arc<KillSwitch>,
    live: Arc<dyn BrokerAdapter>,
    sandbox: Arc<dyn BrokerAdapter>,
}

impl ExecutionEngine {
    pub fn new(
        kill_switch: Arc<KillSwitch>,
        live: Arc<dyn BrokerAdapter>,
        sandbox: Arc<dyn BrokerAdapter>,
    ) -> Self {
        Self {
            kill_switch,
            live,
            sandbox,
        }
    }

    pub async fn execute(&self, record: &DecisionRecord, plan: &ExecutionPlan) -> Result<ExecutionOutcome> {
        info!("EXECUTING: decision {} ({} orders)", record.decision_id, plan.orders.len());

        if plan.decision_id != record.decision_id {
            return Err(Error::InvalidSignal(format!(
                "plan for {} does not belong to decision {}",
                plan.decision_id, record.decision_id
            )));
        }

        if !record.quant_checks.viability_pass {
            info!("Decision {} failed the gate - not executing", record.decision_id);
            return Ok(ExecutionOutcome::NotViable);
        }

        if !record.review_cleared() {
            warn!(
                "Decision {} requires human review - holding execution",
                record.decision_id
            );
            return Ok(ExecutionOutcome::AwaitingReview);
        }

        match self.kill_switch.submit_live(self.live.submit(plan)).await {
            Ok(report) => {
                info!(
                    "Live plan {} placed via {}: filled {}/{}",
                    plan.decision_id,
                    report.broker,
                    report.metrics.total_filled,
                    report.metrics.total_requested
                );
                Ok(ExecutionOutcome::Placed(report))
            }
            Err(Error::LiveTradingHalted {
                mode: ExecutionMode::Shadow,
            }) => {
                warn!(
                    "Shadow mode active - working {} in {} only",
                    plan.decision_id,
                    self.sandbox.name()
                );
                let report = self.sandbox.submit(plan).await?;
                Ok(ExecutionOutcome::ShadowFilled(report))
            }
            Err(e) => {
                error!("Execution of {} failed: {}", plan.decision_id, e);
                Err(e)
            }
        }
    }
}
