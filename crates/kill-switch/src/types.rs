use std::fmt;

use chrono::{DateTime, Utc};
use common::{ApprovalSignature, ExecutionMode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Operator,
    Custodian,
    Unprivileged,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    BringUp,
    Activate,
    RequestReactivation,
    ConfirmReactivation,
    Reject,
    Test,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::BringUp => "bring_up",
            AuditAction::Activate => "activate",
            AuditAction::RequestReactivation => "request_reactivation",
            AuditAction::ConfirmReactivation => "confirm_reactivation",
            AuditAction::Reject => "reject",
            AuditAction::Test => "test",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Applied,
    Rejected,
}

/// First custodian approval, waiting for a second.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingReactivation {
    pub request_id: String,
    pub custodian: String,
    pub approval: String,
    #[serde(default)]
    pub notes: String,
    pub requested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub signature: ApprovalSignature,
}

impl PendingReactivation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Controller state as captured in an audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeSnapshot {
    pub execution_mode: ExecutionMode,
    pub live_order_count: u64,
    #[serde(default)]
    pub pending_reactivation: Option<PendingReactivation>,
}

/// One line of the kill-switch audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillSwitchAuditEntry {
    pub entry_id: String,
    pub action: AuditAction,
    /// Set on `reject` entries: the action that was refused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempted_action: Option<AuditAction>,
    pub actor: String,
    pub role: Role,
    pub timestamp_utc: DateTime<Utc>,
    pub reason: String,
    #[serde(default)]
    pub evidence_refs: Vec<String>,
    pub pre_state: ModeSnapshot,
    pub post_state: ModeSnapshot,
    #[serde(default)]
    pub signatures: Vec<ApprovalSignature>,
    pub outcome: AuditOutcome,
}

/// Operator-facing status answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillSwitchStatus {
    pub execution_mode: ExecutionMode,
    pub live_order_count: u64,
    /// True while live submission is blocked.
    pub kill_switch: bool,
}

/// Handle returned to the first custodian; the second must quote it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactivationTicket {
    pub request_id: String,
    pub custodian: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationRequest {
    pub actor: String,
    pub reason: String,
    #[serde(default)]
    pub evidence_refs: Vec<String>,
}

/// One custodian's half of a reactivation. `request_id` is absent on the
/// first call and must name the pending request on the second.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactivationRequest {
    pub operator: String,
    pub approval: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum ReactivationReply {
    Pending(ReactivationTicket),
    Confirmed(KillSwitchStatus),
}
