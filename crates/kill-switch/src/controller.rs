//! Execution mode controller.
//!
//! All mode transitions and every live submission pass through one
//! `tokio::sync::RwLock`. Submissions hold the read side for their whole
//! duration; transitions take the write side and make their audit entry
//! durable before releasing it. Once a flip to a safe mode is recorded, no
//! submission that observed `live` is still running.
//!
//! The lock only means something if it is the only one, so a controller
//! holds an exclusive lock on its log directory for its whole lifetime and
//! a second `open` on the same directory fails.

use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use audit_hash::digest_parts;
use chrono::{DateTime, Utc};
use common::{ApprovalSignature, DirLock, Error, ExecutionMode, KillSwitchConfig, Result};
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::audit_log::{KillSwitchLog, LOG_DIR};
use crate::types::{
    ActivationRequest, AuditAction, AuditOutcome, KillSwitchAuditEntry, KillSwitchStatus,
    ModeSnapshot, PendingReactivation, ReactivationReply, ReactivationRequest,
    ReactivationTicket, Role,
};

pub const SYSTEM_ACTOR: &str = "system";

/// Told when trading goes live again after two-person approval.
pub trait ReactivationObserver: Send + Sync {
    fn elevate_telemetry(&self, window: Duration, entry: &KillSwitchAuditEntry);
}

/// Logs the elevated-telemetry window for operators.
pub struct LoggingObserver;

impl ReactivationObserver for LoggingObserver {
    fn elevate_telemetry(&self, window: Duration, entry: &KillSwitchAuditEntry) {
        warn!(
            "Live trading reactivated by {} (entry {}); keep telemetry elevated for {}s",
            entry.actor,
            entry.entry_id,
            window.as_secs()
        );
    }
}

struct Inner {
    mode: ExecutionMode,
    pending: Option<PendingReactivation>,
    last_timestamp: DateTime<Utc>,
    log: KillSwitchLog,
}

impl Inner {
    /// Entry timestamps never go backwards within one log.
    fn stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now().max(self.last_timestamp);
        self.last_timestamp = now;
        now
    }
}

pub struct KillSwitch {
    config: KillSwitchConfig,
    state: RwLock<Inner>,
    /// Live submissions through this handle since it opened or last changed
    /// mode. Not restored across restarts.
    live_order_count: AtomicU64,
    observers: Vec<Arc<dyn ReactivationObserver>>,
    _lock: DirLock,
}

impl KillSwitch {
    /// Opens the controller under `root`, restoring state from its log.
    ///
    /// A deployment without history starts in `initial_mode` and records a
    /// `bring_up` entry. Fails with [`Error::Locked`] while another
    /// controller has the log directory.
    pub fn open(root: impl AsRef<Path>, config: KillSwitchConfig) -> Result<Self> {
        if !config.initial_mode.is_safe() {
            return Err(Error::Config(
                "kill_switch.initial_mode must be shadow or disabled".into(),
            ));
        }
        if !config.activation_target.is_safe() {
            return Err(Error::Config(
                "kill_switch.activation_target must be shadow or disabled".into(),
            ));
        }

        let dir = root.as_ref().join(LOG_DIR);
        std::fs::create_dir_all(&dir)?;
        let lock = DirLock::acquire(&dir)?;
        let history = KillSwitchLog::load_all(&dir)?;
        let log = KillSwitchLog::open(dir)?;

        let inner = match history.last() {
            Some(last) => {
                let restored = &last.post_state;
                if restored.execution_mode == ExecutionMode::Live {
                    warn!("Restored kill switch state is LIVE");
                }
                info!(
                    "Restored kill switch: mode={} from entry {} ({} entries)",
                    restored.execution_mode,
                    last.entry_id,
                    history.len()
                );
                Inner {
                    mode: restored.execution_mode,
                    pending: restored.pending_reactivation.clone(),
                    last_timestamp: last.timestamp_utc,
                    log,
                }
            }
            None => {
                let mut inner = Inner {
                    mode: config.initial_mode,
                    pending: None,
                    last_timestamp: DateTime::<Utc>::MIN_UTC,
                    log,
                };
                let snapshot = ModeSnapshot {
                    execution_mode: config.initial_mode,
                    live_order_count: 0,
                    pending_reactivation: None,
                };
                let entry = KillSwitchAuditEntry {
                    entry_id: new_entry_id(),
                    action: AuditAction::BringUp,
                    attempted_action: None,
                    actor: SYSTEM_ACTOR.to_string(),
                    role: Role::System,
                    timestamp_utc: inner.stamp(),
                    reason: "initial bring-up".to_string(),
                    evidence_refs: Vec::new(),
                    pre_state: snapshot.clone(),
                    post_state: snapshot,
                    signatures: Vec::new(),
                    outcome: AuditOutcome::Applied,
                };
                inner.log.append(&entry)?;
                info!("Kill switch brought up in {} mode", config.initial_mode);
                inner
            }
        };

        Ok(Self {
            config,
            state: RwLock::new(inner),
            live_order_count: AtomicU64::new(0),
            observers: Vec::new(),
            _lock: lock,
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn ReactivationObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn config(&self) -> &KillSwitchConfig {
        &self.config
    }

    fn role_of(&self, actor: &str) -> Role {
        if self.config.custodians.iter().any(|c| c == actor) {
            Role::Custodian
        } else if self.config.operators.iter().any(|o| o == actor) {
            Role::Operator
        } else {
            Role::Unprivileged
        }
    }

    fn snapshot(&self, inner: &Inner) -> ModeSnapshot {
        ModeSnapshot {
            execution_mode: inner.mode,
            live_order_count: self.live_order_count.load(Ordering::SeqCst),
            pending_reactivation: inner.pending.clone(),
        }
    }

    pub async fn mode(&self) -> ExecutionMode {
        self.state.read().await.mode
    }

    pub async fn status(&self) -> KillSwitchStatus {
        let inner = self.state.read().await;
        KillSwitchStatus {
            execution_mode: inner.mode,
            live_order_count: self.live_order_count.load(Ordering::SeqCst),
            kill_switch: inner.mode.is_safe(),
        }
    }

    /// Every audit entry written so far, oldest first.
    pub async fn audit_entries(&self) -> Result<Vec<KillSwitchAuditEntry>> {
        let inner = self.state.read().await;
        KillSwitchLog::load_all(inner.log.dir())
    }

    /// Runs `submit` only if the mode is `live`, holding the mode lock until
    /// it finishes or `order_submit_timeout_ms` elapses.
    pub async fn submit_live<F, T>(&self, submit: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let inner = self.state.read().await;
        if inner.mode != ExecutionMode::Live {
            warn!("Live submission refused: execution mode is {}", inner.mode);
            return Err(Error::LiveTradingHalted { mode: inner.mode });
        }

        let timeout_ms = self.config.order_submit_timeout_ms;
        let result = match tokio::time::timeout(Duration::from_millis(timeout_ms), submit).await {
            Ok(result) => result,
            Err(_) => {
                error!("Live submission exceeded {}ms and was abandoned", timeout_ms);
                Err(Error::SubmitTimeout { timeout_ms })
            }
        };
        if result.is_ok() {
            self.live_order_count.fetch_add(1, Ordering::SeqCst);
        }
        drop(inner);
        result
    }

    /// Engages the kill switch: any mode goes to `activation_target` and the
    /// live order count resets.
    ///
    /// The safe mode is applied even if the audit entry cannot be written;
    /// the write error is still returned.
    pub async fn activate(
        &self,
        actor: &str,
        reason: &str,
        evidence_refs: Vec<String>,
    ) -> Result<KillSwitchStatus> {
        let mut inner = self.state.write().await;
        let role = self.role_of(actor);
        if !matches!(role, Role::Operator | Role::Custodian) {
            let err = Error::Unauthorized {
                actor: actor.to_string(),
                action: AuditAction::Activate.to_string(),
            };
            return Err(self.reject(&mut inner, AuditAction::Activate, actor, role, evidence_refs, err));
        }

        let pre_state = self.snapshot(&inner);
        let target = self.config.activation_target;
        let post_state = ModeSnapshot {
            execution_mode: target,
            live_order_count: 0,
            pending_reactivation: None,
        };
        let entry = KillSwitchAuditEntry {
            entry_id: new_entry_id(),
            action: AuditAction::Activate,
            attempted_action: None,
            actor: actor.to_string(),
            role,
            timestamp_utc: inner.stamp(),
            reason: reason.to_string(),
            evidence_refs,
            pre_state: pre_state.clone(),
            post_state,
            signatures: Vec::new(),
            outcome: AuditOutcome::Applied,
        };
        let written = inner.log.append(&entry);

        inner.mode = target;
        inner.pending = None;
        self.live_order_count.store(0, Ordering::SeqCst);

        if let Err(e) = written {
            error!(
                "Kill switch engaged by {} but audit entry {} was not written: {}",
                actor, entry.entry_id, e
            );
            return Err(e);
        }
        info!(
            "Kill switch engaged by {} ({:?}): {} -> {} ({})",
            actor, role, pre_state.execution_mode, target, reason
        );
        Ok(KillSwitchStatus {
            execution_mode: target,
            live_order_count: 0,
            kill_switch: true,
        })
    }

    /// First custodian approval. The mode does not change.
    pub async fn request_reactivation(
        &self,
        custodian: &str,
        approval: &str,
        notes: &str,
    ) -> Result<ReactivationTicket> {
        let mut inner = self.state.write().await;
        let role = self.role_of(custodian);
        let action = AuditAction::RequestReactivation;
        if role != Role::Custodian {
            let err = Error::Unauthorized {
                actor: custodian.to_string(),
                action: action.to_string(),
            };
            return Err(self.reject(&mut inner, action, custodian, role, Vec::new(), err));
        }
        if inner.mode == ExecutionMode::Live {
            let err = Error::InvalidTransition("execution mode is already live".into());
            return Err(self.reject(&mut inner, action, custodian, role, Vec::new(), err));
        }
        if approval.trim().is_empty() {
            let err = Error::InsufficientApproval("approval statement is empty".into());
            return Err(self.reject(&mut inner, action, custodian, role, Vec::new(), err));
        }

        let pre_state = self.snapshot(&inner);
        let requested_at = inner.stamp();
        let request_id = Uuid::new_v4().simple().to_string();
        let signature = ApprovalSignature {
            signed_by: custodian.to_string(),
            signature_hash: digest_parts(&[&request_id, custodian, approval]),
            signed_at: requested_at,
        };
        let pending = PendingReactivation {
            request_id: request_id.clone(),
            custodian: custodian.to_string(),
            approval: approval.to_string(),
            notes: notes.to_string(),
            requested_at,
            expires_at: expiry(requested_at, self.config.approval_ttl_secs),
            signature: signature.clone(),
        };
        let post_state = ModeSnapshot {
            pending_reactivation: Some(pending.clone()),
            ..pre_state.clone()
        };
        let entry = KillSwitchAuditEntry {
            entry_id: new_entry_id(),
            action,
            attempted_action: None,
            actor: custodian.to_string(),
            role,
            timestamp_utc: requested_at,
            reason: notes.to_string(),
            evidence_refs: Vec::new(),
            pre_state,
            post_state,
            signatures: vec![signature],
            outcome: AuditOutcome::Applied,
        };
        inner.log.append(&entry)?;

        let ticket = ReactivationTicket {
            request_id,
            custodian: custodian.to_string(),
            expires_at: pending.expires_at,
        };
        inner.pending = Some(pending);
        info!(
            "Reactivation requested by {} (request {}, expires {})",
            custodian, ticket.request_id, ticket.expires_at
        );
        Ok(ticket)
    }

    /// Second custodian approval. Goes live only when a matching, unexpired
    /// request from a different custodian is pending.
    pub async fn confirm_reactivation(
        &self,
        custodian: &str,
        request_id: &str,
        approval: &str,
        notes: &str,
    ) -> Result<KillSwitchStatus> {
        let mut inner = self.state.write().await;
        let role = self.role_of(custodian);
        let action = AuditAction::ConfirmReactivation;
        if role != Role::Custodian {
            let err = Error::Unauthorized {
                actor: custodian.to_string(),
                action: action.to_string(),
            };
            return Err(self.reject(&mut inner, action, custodian, role, Vec::new(), err));
        }

        let now = inner.stamp();
        let refusal = match &inner.pending {
            None => Some("no pending reactivation request".to_string()),
            Some(p) if p.request_id != request_id => {
                Some(format!("request {request_id} does not match the pending request"))
            }
            Some(p) if p.is_expired(now) => {
                Some(format!("request {} expired at {}", p.request_id, p.expires_at))
            }
            Some(p) if p.custodian == custodian => {
                Some("second approval must come from a different custodian".to_string())
            }
            Some(_) if approval.trim().is_empty() => Some("approval statement is empty".to_string()),
            Some(_) => None,
        };
        if let Some(msg) = refusal {
            let err = Error::InsufficientApproval(msg);
            return Err(self.reject(&mut inner, action, custodian, role, Vec::new(), err));
        }
        let Some(pending) = inner.pending.clone() else {
            return Err(Error::InsufficientApproval(
                "no pending reactivation request".into(),
            ));
        };

        let pre_state = self.snapshot(&inner);
        let second = ApprovalSignature {
            signed_by: custodian.to_string(),
            signature_hash: digest_parts(&[request_id, custodian, approval]),
            signed_at: now,
        };
        let post_state = ModeSnapshot {
            execution_mode: ExecutionMode::Live,
            live_order_count: 0,
            pending_reactivation: None,
        };
        let entry = KillSwitchAuditEntry {
            entry_id: new_entry_id(),
            action,
            attempted_action: None,
            actor: custodian.to_string(),
            role,
            timestamp_utc: now,
            reason: notes.to_string(),
            evidence_refs: vec![pending.request_id.clone()],
            pre_state,
            post_state,
            signatures: vec![pending.signature.clone(), second],
            outcome: AuditOutcome::Applied,
        };
        inner.log.append(&entry)?;

        inner.mode = ExecutionMode::Live;
        inner.pending = None;
        self.live_order_count.store(0, Ordering::SeqCst);
        info!(
            "Live trading reactivated: approved by {} and {}",
            pending.custodian, custodian
        );

        let window = Duration::from_secs(self.config.elevated_telemetry_secs);
        for observer in &self.observers {
            observer.elevate_telemetry(window, &entry);
        }

        Ok(KillSwitchStatus {
            execution_mode: ExecutionMode::Live,
            live_order_count: 0,
            kill_switch: false,
        })
    }

    /// Records a drill entry without changing state.
    pub async fn self_test(&self, actor: &str) -> Result<KillSwitchAuditEntry> {
        let mut inner = self.state.write().await;
        let role = self.role_of(actor);
        if !matches!(role, Role::Operator | Role::Custodian) {
            let err = Error::Unauthorized {
                actor: actor.to_string(),
                action: AuditAction::Test.to_string(),
            };
            return Err(self.reject(&mut inner, AuditAction::Test, actor, role, Vec::new(), err));
        }
        let snapshot = self.snapshot(&inner);
        let entry = KillSwitchAuditEntry {
            entry_id: new_entry_id(),
            action: AuditAction::Test,
            attempted_action: None,
            actor: actor.to_string(),
            role,
            timestamp_utc: inner.stamp(),
            reason: "kill switch self-test".to_string(),
            evidence_refs: Vec::new(),
            pre_state: snapshot.clone(),
            post_state: snapshot,
            signatures: Vec::new(),
            outcome: AuditOutcome::Applied,
        };
        inner.log.append(&entry)?;
        info!("Kill switch self-test recorded by {}", actor);
        Ok(entry)
    }

    pub async fn handle_activation(&self, request: ActivationRequest) -> Result<KillSwitchStatus> {
        self.activate(&request.actor, &request.reason, request.evidence_refs)
            .await
    }

    /// Routes a reactivation call: without `request_id` it opens a request,
    /// with one it confirms that request.
    pub async fn handle_reactivation(
        &self,
        request: ReactivationRequest,
    ) -> Result<ReactivationReply> {
        match request.request_id.as_deref() {
            None => self
                .request_reactivation(&request.operator, &request.approval, &request.notes)
                .await
                .map(ReactivationReply::Pending),
            Some(id) => self
                .confirm_reactivation(&request.operator, id, &request.approval, &request.notes)
                .await
                .map(ReactivationReply::Confirmed),
        }
    }

    /// Writes a `reject` entry for a refused attempt and hands back `err`,
    /// or the write error if the entry could not be recorded.
    fn reject(
        &self,
        inner: &mut Inner,
        attempted: AuditAction,
        actor: &str,
        role: Role,
        evidence_refs: Vec<String>,
        err: Error,
    ) -> Error {
        let snapshot = self.snapshot(inner);
        let entry = KillSwitchAuditEntry {
            entry_id: new_entry_id(),
            action: AuditAction::Reject,
            attempted_action: Some(attempted),
            actor: actor.to_string(),
            role,
            timestamp_utc: inner.stamp(),
            reason: err.to_string(),
            evidence_refs,
            pre_state: snapshot.clone(),
            post_state: snapshot,
            signatures: Vec::new(),
            outcome: AuditOutcome::Rejected,
        };
        if let Err(log_err) = inner.log.append(&entry) {
            error!(
                "Rejected {} by {} ({}) but the reject entry was not written: {}",
                attempted, actor, err, log_err
            );
            return log_err;
        }
        warn!("Rejected {} by {} ({:?}): {}", attempted, actor, role, err);
        err
    }
}

fn new_entry_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn expiry(from: DateTime<Utc>, ttl_secs: u64) -> DateTime<Utc> {
    i64::try_from(ttl_secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|ttl| from.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
