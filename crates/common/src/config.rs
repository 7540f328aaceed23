//! Configuration types shared by the engine crates.

use serde::{Deserialize, Serialize};

use crate::types::ExecutionMode;

/// Deterministic gate parameters.
///
/// Stored alongside each decision so replay evaluates with the same numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Minimum net EV (fraction) for a viable trade.
    #[serde(default = "default_safety_margin")]
    pub safety_margin: f64,

    /// Minimum model confidence for a viable trade.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// RNG seed for the decay simulation.
    #[serde(default = "default_decay_seed")]
    pub decay_seed: u64,

    /// Monte Carlo trials for the decay simulation.
    #[serde(default = "default_decay_trials")]
    pub decay_trials: u32,

    /// Trading days per year, for annualization.
    #[serde(default = "default_trading_days")]
    pub trading_days: u32,

    /// Annualized vol the position is scaled towards.
    #[serde(default = "default_target_annual_vol")]
    pub target_annual_vol: f64,

    #[serde(default = "default_min_scale")]
    pub min_scale: f64,

    #[serde(default = "default_max_scale")]
    pub max_scale: f64,

    /// Fraction of NAV allocated to a new position before vol scaling.
    #[serde(default = "default_allocation_fraction")]
    pub allocation_fraction: f64,

    /// Portfolio NAV in USD.
    #[serde(default = "default_portfolio_nav")]
    pub portfolio_nav_usd: f64,

    /// VaR tail probability (0.01 = 99% VaR).
    #[serde(default = "default_var_alpha")]
    pub var_alpha: f64,

    /// Max 1-day portfolio VaR as a fraction of NAV.
    #[serde(default = "default_var_limit")]
    pub var_limit: f64,

    /// Take the larger of parametric and historical VaR.
    #[serde(default)]
    pub use_historical_var: bool,

    /// Tickers the desk may trade. Empty means unrestricted.
    #[serde(default)]
    pub allowed_universe: Vec<String>,

    #[serde(default = "default_adv_threshold")]
    pub adv_threshold_usd: f64,

    #[serde(default = "default_max_spread_bps")]
    pub max_spread_bps: f64,

    #[serde(default)]
    pub min_ask_size: Option<f64>,

    #[serde(default)]
    pub max_notional_usd: Option<f64>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            safety_margin: default_safety_margin(),
            min_confidence: default_min_confidence(),
            decay_seed: default_decay_seed(),
            decay_trials: default_decay_trials(),
            trading_days: default_trading_days(),
            target_annual_vol: default_target_annual_vol(),
            min_scale: default_min_scale(),
            max_scale: default_max_scale(),
            allocation_fraction: default_allocation_fraction(),
            portfolio_nav_usd: default_portfolio_nav(),
            var_alpha: default_var_alpha(),
            var_limit: default_var_limit(),
            use_historical_var: false,
            allowed_universe: Vec::new(),
            adv_threshold_usd: default_adv_threshold(),
            max_spread_bps: default_max_spread_bps(),
            min_ask_size: None,
            max_notional_usd: None,
        }
    }
}

/// Decision record store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Upper bound on one durable write.
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

/// Execution mode controller settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillSwitchConfig {
    /// Actors allowed to engage the kill switch.
    #[serde(default)]
    pub operators: Vec<String>,

    /// Actors allowed to approve reactivation. Custodians may also engage.
    #[serde(default)]
    pub custodians: Vec<String>,

    /// Mode entered on activation (`shadow` or the stricter `disabled`).
    #[serde(default = "default_activation_target")]
    pub activation_target: ExecutionMode,

    /// Mode for a deployment with no audit history.
    #[serde(default = "default_initial_mode")]
    pub initial_mode: ExecutionMode,

    /// How long a first custodian approval stays valid.
    #[serde(default = "default_approval_ttl_secs")]
    pub approval_ttl_secs: u64,

    /// Elevated telemetry window requested after reactivation.
    #[serde(default = "default_elevated_telemetry_secs")]
    pub elevated_telemetry_secs: u64,

    /// Upper bound on one live submission holding the mode lock.
    #[serde(default = "default_order_submit_timeout_ms")]
    pub order_submit_timeout_ms: u64,
}

impl Default for KillSwitchConfig {
    fn default() -> Self {
        Self {
            operators: Vec::new(),
            custodians: Vec::new(),
            activation_target: default_activation_target(),
            initial_mode: default_initial_mode(),
            approval_ttl_secs: default_approval_ttl_secs(),
            elevated_telemetry_secs: default_elevated_telemetry_secs(),
            order_submit_timeout_ms: default_order_submit_timeout_ms(),
        }
    }
}

/// Sandbox execution and plan sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_sandbox_seed")]
    pub sandbox_seed: u64,

    #[serde(default = "default_max_slippage_bps")]
    pub max_slippage_bps: f64,

    /// Smart-order-routing policy, e.g. `percent_of_adv=0.05`.
    #[serde(default = "default_sor_policy")]
    pub sor_policy: String,

    #[serde(default = "default_twap_duration")]
    pub twap_duration_minutes: u32,

    #[serde(default = "default_twap_slices")]
    pub twap_slices: u32,

    /// Plans above this quantity are worked with TWAP.
    #[serde(default = "default_twap_qty_threshold")]
    pub twap_qty_threshold: i64,

    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,

    /// Fraction of NAV a plan deploys, before the gate's vol scaling.
    #[serde(default = "default_allocation_fraction")]
    pub allocation_fraction: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            sandbox_seed: default_sandbox_seed(),
            max_slippage_bps: default_max_slippage_bps(),
            sor_policy: default_sor_policy(),
            twap_duration_minutes: default_twap_duration(),
            twap_slices: default_twap_slices(),
            twap_qty_threshold: default_twap_qty_threshold(),
            stop_loss_pct: default_stop_loss_pct(),
            allocation_fraction: default_allocation_fraction(),
        }
    }
}

// ── Defaults ──────────────────────────────────────────────────────────

fn default_safety_margin() -> f64 {
    0.01
}
fn default_min_confidence() -> f64 {
    0.7
}
fn default_decay_seed() -> u64 {
    42
}
fn default_decay_trials() -> u32 {
    2_000
}
fn default_trading_days() -> u32 {
    252
}
fn default_target_annual_vol() -> f64 {
    0.10
}
fn default_min_scale() -> f64 {
    0.3
}
fn default_max_scale() -> f64 {
    2.0
}
fn default_allocation_fraction() -> f64 {
    0.02
}
fn default_portfolio_nav() -> f64 {
    1_000_000.0
}
fn default_var_alpha() -> f64 {
    0.01
}
fn default_var_limit() -> f64 {
    0.02
}
fn default_adv_threshold() -> f64 {
    1_000_000.0
}
fn default_max_spread_bps() -> f64 {
    5.0
}

fn default_write_timeout_ms() -> u64 {
    5_000
}

fn default_activation_target() -> ExecutionMode {
    ExecutionMode::Shadow
}
fn default_initial_mode() -> ExecutionMode {
    ExecutionMode::Shadow
}
fn default_approval_ttl_secs() -> u64 {
    900
}
fn default_elevated_telemetry_secs() -> u64 {
    3_600
}
fn default_order_submit_timeout_ms() -> u64 {
    10_000
}

fn default_sandbox_seed() -> u64 {
    42
}
fn default_max_slippage_bps() -> f64 {
    5.0
}
fn default_sor_policy() -> String {
    "percent_of_adv=0.05".into()
}
fn default_twap_duration() -> u32 {
    30
}
fn default_twap_slices() -> u32 {
    6
}
fn default_twap_qty_threshold() -> i64 {
    1_000
}
fn default_stop_loss_pct() -> f64 {
    0.03
}
