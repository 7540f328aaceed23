pub mod audit_log;
pub mod controller;
pub mod types;

pub use audit_log::{KillSwitchLog, LOG_DIR};
pub use controller::{KillSwitch, LoggingObserver, ReactivationObserver, SYSTEM_ACTOR};
pub use types::*;
