//! Deterministic quantitative gate for LLM trade signals.

pub mod decay;
pub mod engine;
pub mod ev;
pub mod pretrade;
pub mod risk;

pub use decay::{analytic_decay, simulate_letf_decay, synthetic_returns, SYNTHETIC_HISTORY_DAYS};
pub use engine::{compute_t_max, evaluate, llm_output_schema, validate_signal, GateEngine};
pub use ev::{compute_ev, EvBreakdown};
pub use pretrade::check_instrument;
pub use risk::{
    annualized_vol, compute_scale_factor, emergency_drawdown_trigger, historical_var,
    normal_quantile, parametric_var, scale_for_vol, stop_loss_price, Side,
};
