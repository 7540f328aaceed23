//! Unified error type for the hedge engine.

use thiserror::Error;

use crate::types::ExecutionMode;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Duplicate decision_id: {0}")]
    DuplicateId(String),

    #[error("Decision record not found: {0}")]
    NotFound(String),

    #[error(
        "Insufficient evidence: p_confidence={p_confidence:.3} needs {required} distinct sources, found {found}"
    )]
    InsufficientEvidence {
        p_confidence: f64,
        required: usize,
        found: usize,
    },

    #[error("Unauthorized: actor '{actor}' may not {action}")]
    Unauthorized { actor: String, action: String },

    #[error("Insufficient approval: {0}")]
    InsufficientApproval(String),

    #[error("Invalid signal: {0}")]
    InvalidSignal(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Live trading halted: execution mode is {mode}")]
    LiveTradingHalted { mode: ExecutionMode },

    #[error("Store write for {decision_id} did not complete within {timeout_ms}ms")]
    StoreTimeout { decision_id: String, timeout_ms: u64 },

    #[error("{0} is held by another process")]
    Locked(String),

    #[error("Store durability failure: {0}")]
    StoreDurability(String),

    #[error("Order submission did not complete within {timeout_ms}ms")]
    SubmitTimeout { timeout_ms: u64 },

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable machine-readable code, used in audit entries and CLI output.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::DuplicateId(_) => "DUPLICATE_ID",
            Error::NotFound(_) => "NOT_FOUND",
            Error::InsufficientEvidence { .. } => "INSUFFICIENT_EVIDENCE",
            Error::Unauthorized { .. } => "UNAUTHORIZED",
            Error::InsufficientApproval(_) => "INSUFFICIENT_APPROVAL",
            Error::InvalidSignal(_) => "INVALID_SIGNAL",
            Error::InvalidTransition(_) => "INVALID_TRANSITION",
            Error::LiveTradingHalted { .. } => "LIVE_TRADING_HALTED",
            Error::StoreTimeout { .. } => "STORE_TIMEOUT",
            Error::Locked(_) => "LOCKED",
            Error::StoreDurability(_) => "STORE_DURABILITY",
            Error::SubmitTimeout { .. } => "SUBMIT_TIMEOUT",
            Error::Broker(_) => "BROKER_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Json(_) => "JSON_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }
}
