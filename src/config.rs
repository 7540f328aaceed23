//! Configuration loader: merges env vars, .env file, and config.toml.

use std::path::{Path, PathBuf};

use common::{Error, ExecutionConfig, ExecutionMode, GateConfig, KillSwitchConfig, StoreConfig};
use serde::{Deserialize, Serialize};

pub const DATA_DIR_NAME: &str = "HEDGE_DATA";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Root for decision records and kill switch logs.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Recorded as `model_version` on every decision.
    #[serde(default = "default_model_version")]
    pub model_version: String,

    /// Who signs stored records, if anyone.
    #[serde(default)]
    pub signer: Option<String>,

    #[serde(default)]
    pub gate: GateConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub kill_switch: KillSwitchConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub demo: DemoConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            model_version: default_model_version(),
            signer: None,
            gate: GateConfig::default(),
            store: StoreConfig::default(),
            kill_switch: KillSwitchConfig::default(),
            execution: ExecutionConfig::default(),
            demo: DemoConfig::default(),
        }
    }
}

/// Synthetic market and signal used by `demo`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoConfig {
    #[serde(default = "default_demo_seed")]
    pub seed: u64,
    #[serde(default = "default_demo_ticker")]
    pub ticker: String,
    #[serde(default = "default_demo_leverage")]
    pub leverage: f64,
    #[serde(default = "default_demo_price")]
    pub price: f64,
    #[serde(default = "default_history_days")]
    pub history_days: usize,
    #[serde(default = "default_underlying_vol")]
    pub underlying_vol: f64,
    #[serde(default = "default_portfolio_vol")]
    pub portfolio_vol: f64,
    #[serde(default = "default_demo_adv")]
    pub adv_usd: f64,
    #[serde(default = "default_demo_spread")]
    pub spread_bps: f64,
    #[serde(default = "default_trading_costs")]
    pub trading_costs: f64,
    #[serde(default = "default_slippage")]
    pub slippage: f64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            seed: default_demo_seed(),
            ticker: default_demo_ticker(),
            leverage: default_demo_leverage(),
            price: default_demo_price(),
            history_days: default_history_days(),
            underlying_vol: default_underlying_vol(),
            portfolio_vol: default_portfolio_vol(),
            adv_usd: default_demo_adv(),
            spread_bps: default_demo_spread(),
            trading_costs: default_trading_costs(),
            slippage: default_slippage(),
        }
    }
}

// ── Defaults ──────────────────────────────────────────────────────────

fn default_model_version() -> String {
    "hedge-signal-v1".into()
}
fn default_demo_seed() -> u64 {
    7
}
fn default_demo_ticker() -> String {
    "SSO".into()
}
fn default_demo_leverage() -> f64 {
    2.0
}
fn default_demo_price() -> f64 {
    85.0
}
fn default_history_days() -> usize {
    750
}
fn default_underlying_vol() -> f64 {
    0.18
}
fn default_portfolio_vol() -> f64 {
    0.08
}
fn default_demo_adv() -> f64 {
    2_500_000_000.0
}
fn default_demo_spread() -> f64 {
    1.0
}
fn default_trading_costs() -> f64 {
    0.0005
}
fn default_slippage() -> f64 {
    0.0003
}

// ── Config loader ─────────────────────────────────────────────────────

/// Load configuration from environment and an optional config file.
pub fn load_config(path: &Path) -> Result<AppConfig, Error> {
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    let mut config = AppConfig::default();
    if path.exists() {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
    } else {
        tracing::debug!("{} not found, using defaults", path.display());
    }

    if let Ok(dir) = std::env::var("HEDGE_DATA_DIR") {
        let trimmed = dir.trim();
        if !trimmed.is_empty() {
            config.data_dir = Some(PathBuf::from(trimmed));
        }
    }
    if let Ok(mode) = std::env::var("HEDGE_INITIAL_MODE") {
        config.kill_switch.initial_mode = mode.parse::<ExecutionMode>()?;
    }

    Ok(config)
}

fn resolve_repo_root() -> Option<PathBuf> {
    let mut cursor = std::env::current_dir().ok()?;
    loop {
        if cursor.join(".git").is_dir() {
            return Some(cursor);
        }
        if !cursor.pop() {
            return None;
        }
    }
}

impl AppConfig {
    /// Configured data dir, else `HEDGE_DATA` at the repo root or here.
    pub fn resolve_data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        if let Some(root) = resolve_repo_root() {
            return root.join(DATA_DIR_NAME);
        }
        PathBuf::from(DATA_DIR_NAME)
    }
}
