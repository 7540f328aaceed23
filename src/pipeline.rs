use std::sync::Arc;

use audit_hash::sha256_hex;
use common::{
    DecisionDraft, Error, Evidence, ExpectedDelta, GateConfig, InstrumentType, LlmOutput,
    MarketContext, Result, SignalFlags, SuggestedInstrument, TickerMetrics,
};
use gate_engine::{synthetic_returns, GateEngine};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use record_store::{RecordStore, StoreReceipt};
use replay_validator::{GATE_CONFIG_INPUT, MARKET_CONTEXT_INPUT};
use tracing::{info, warn};

use crate::config::DemoConfig;

/// One model answer plus what it cites.
#[derive(Debug, Clone)]
pub struct GeneratedSignal {
    pub llm_output: LlmOutput,
    pub evidence: Vec<Evidence>,
    pub prompt_hash: String,
}

/// Whatever produces trade signals. The real one calls a model.
#[async_trait::async_trait]
pub trait SignalSource: Send {
    async fn next_signal(&mut self, market: &MarketContext) -> Result<GeneratedSignal>;
}

/// Seeded stand-in for the model, for demos and tests.
pub struct SyntheticSignalSource {
    rng: ChaCha8Rng,
    ticker: String,
    leverage: f64,
}

impl SyntheticSignalSource {
    pub fn new(seed: u64, ticker: impl Into<String>, leverage: f64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            ticker: ticker.into(),
            leverage,
        }
    }
}

#[async_trait::async_trait]
impl SignalSource for SyntheticSignalSource {
    async fn next_signal(&mut self, _market: &MarketContext) -> Result<GeneratedSignal> {
        let nudge = self.rng.gen_range(-0.02..=0.02);
        let prompt = format!(
            "Assess a {}-day hedge in {} ({}x) given the latest macro and filing evidence.",
            5, self.ticker, self.leverage
        );
        let llm_output = LlmOutput {
            p_success: 0.7 + nudge,
            p_confidence: 0.82,
            expected_delta: ExpectedDelta {
                fav: 0.08,
                neutral: 0.0,
                unfav: -0.05,
            },
            horizon_days: 5,
            suggested_instrument: SuggestedInstrument {
                ticker: self.ticker.clone(),
                kind: if self.leverage.abs() > 1.0 {
                    InstrumentType::Letf
                } else {
                    InstrumentType::Etf
                },
                leverage: self.leverage,
                qty: None,
            },
            flags: SignalFlags::default(),
            extra: Default::default(),
        };
        let evidence = vec![
            Evidence {
                source_id: "FRED:SP500".into(),
                kind: "macro_series".into(),
                filecite: None,
                excerpt: Some("Index closed above its 50-day average.".into()),
            },
            Evidence {
                source_id: "SEC:10-K".into(),
                kind: "filing".into(),
                filecite: None,
                excerpt: Some("Guidance reaffirmed for the fiscal year.".into()),
            },
        ];
        Ok(GeneratedSignal {
            llm_output,
            evidence,
            prompt_hash: sha256_hex(prompt.as_bytes()),
        })
    }
}

/// Market snapshot built from seeded synthetic history.
pub fn demo_market(demo: &DemoConfig, trading_days: u32) -> MarketContext {
    MarketContext {
        underlying_returns: synthetic_returns(demo.underlying_vol, demo.history_days, trading_days, demo.seed),
        est_vol_annual: None,
        portfolio_returns: synthetic_returns(demo.portfolio_vol, 250, trading_days, demo.seed.wrapping_add(1)),
        trading_costs: demo.trading_costs,
        slippage: demo.slippage,
        price: Some(demo.price),
        ticker_metrics: Some(TickerMetrics {
            adv_usd: demo.adv_usd,
            spread_bps: demo.spread_bps,
            ask_size: None,
        }),
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub receipt: StoreReceipt,
    pub viability_pass: bool,
    pub requires_human_review: bool,
}

/// Signal, then gate, then the append-only store.
pub struct DecisionPipeline<S> {
    source: S,
    gate: GateEngine,
    store: Arc<RecordStore>,
    model_version: String,
    signer: Option<String>,
}

impl<S: SignalSource> DecisionPipeline<S> {
    pub fn new(
        source: S,
        gate_config: GateConfig,
        store: Arc<RecordStore>,
        model_version: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            source,
            gate: GateEngine::new(gate_config)?,
            store,
            model_version: model_version.into(),
            signer: None,
        })
    }

    pub fn with_signer(mut self, signer: Option<String>) -> Self {
        self.signer = signer;
        self
    }

    /// Evaluates one signal against `market` and stores the decision.
    ///
    /// Inputs and gate parameters go into the record so it can be replayed.
    pub async fn run_once(&mut self, market: &MarketContext) -> Result<PipelineOutcome> {
        let signal = self.source.next_signal(market).await?;
        let checks = self
            .gate
            .evaluate(&signal.llm_output, &signal.evidence, market)
            .inspect_err(|e| {
                if matches!(e, Error::InsufficientEvidence { .. }) {
                    warn!("Signal for {} refused: {}", signal.llm_output.suggested_instrument.ticker, e);
                }
            })?;
        let viability_pass = checks.viability_pass;
        let requires_human_review = checks.requires_human_review;

        let mut draft = DecisionDraft::new(&self.model_version, signal.prompt_hash, signal.llm_output, checks)
            .with_evidence(signal.evidence)
            .with_input(MARKET_CONTEXT_INPUT, serde_json::to_value(market)?)
            .with_input(GATE_CONFIG_INPUT, serde_json::to_value(self.gate.config())?);
        if let Some(signer) = &self.signer {
            draft = draft.signed_by(signer);
        }

        let receipt = self.store.append(draft).await?;
        info!(
            "Decision {} stored (seq {}): viable={} review={}",
            receipt.decision_id, receipt.sequence, viability_pass, requires_human_review
        );
        Ok(PipelineOutcome {
            receipt,
            viability_pass,
            requires_human_review,
        })
    }
}
