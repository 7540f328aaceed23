//! Hedge engine entry point.
//!
//! Every subcommand works against the same data dir:
//! 1. Decisions (demo, show, list, replay, execute)
//! 2. Kill switch (status, activation, two-custodian reactivation)

mod config;
mod pipeline;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use common::MarketContext;
use execution_engine::{
    build_execution_plan, ExecutionEngine, ExecutionOutcome, MarketQuote, SandboxBroker,
};
use gate_engine::{emergency_drawdown_trigger, llm_output_schema};
use kill_switch::{ActivationRequest, KillSwitch, ReactivationRequest};
use record_store::RecordStore;
use replay_validator::{replay, replay_since, MARKET_CONTEXT_INPUT};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::config::{load_config, AppConfig};
use crate::pipeline::{demo_market, DecisionPipeline, SyntheticSignalSource};

#[derive(Parser)]
#[command(name = "hedge-engine", version, about = "Decision ledger, gate and kill switch for the LETF hedge desk")]
struct Cli {
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the synthetic signal through the gate and store the decisions.
    Demo {
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
    /// Re-run the gate for stored decisions and report divergence.
    Replay {
        decision_id: Option<String>,
        #[arg(long, conflicts_with = "decision_id")]
        all: bool,
        /// With --all, only records stamped at or after this RFC 3339 time.
        #[arg(long, requires = "all")]
        since: Option<DateTime<Utc>>,
    },
    Show {
        decision_id: String,
    },
    List {
        #[arg(long)]
        since: Option<DateTime<Utc>>,
    },
    /// Print the JSON schema a model answer must satisfy.
    Schema,
    /// Plan a stored decision and submit it through the kill switch.
    Execute {
        decision_id: String,
        /// Entry price; defaults to the price the gate saw.
        #[arg(long)]
        price: Option<f64>,
    },
    #[command(subcommand)]
    KillSwitch(KillSwitchCommand),
}

#[derive(Subcommand)]
enum KillSwitchCommand {
    Status,
    /// Halt live trading.
    Activate {
        #[arg(long)]
        actor: String,
        #[arg(long)]
        reason: String,
        #[arg(long = "evidence")]
        evidence_refs: Vec<String>,
    },
    /// First custodian approval for going live.
    Request {
        #[arg(long)]
        custodian: String,
        #[arg(long)]
        approval: String,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Second custodian approval; goes live.
    Confirm {
        #[arg(long)]
        custodian: String,
        #[arg(long)]
        request_id: String,
        #[arg(long)]
        approval: String,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Record a drill entry without changing the mode.
    Test {
        #[arg(long)]
        actor: String,
    },
    /// Activate if NAV has drawn down past the trigger from its peak.
    DrawdownCheck {
        #[arg(long)]
        actor: String,
        #[arg(long)]
        nav: f64,
        #[arg(long)]
        peak_nav: f64,
        #[arg(long, default_value_t = 0.10)]
        trigger: f64,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn open_store(config: &AppConfig) -> Result<Arc<RecordStore>> {
    let dir = config.resolve_data_dir();
    let store = RecordStore::open(&dir, config.store.clone())
        .with_context(|| format!("opening decision store under {}", dir.display()))?;
    Ok(Arc::new(store))
}

fn open_kill_switch(config: &AppConfig) -> Result<Arc<KillSwitch>> {
    let dir = config.resolve_data_dir();
    let ks = KillSwitch::open(&dir, config.kill_switch.clone())
        .with_context(|| format!("opening kill switch log under {}", dir.display()))?;
    Ok(Arc::new(ks))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "hedge_engine=info,record_store=info,kill_switch=info,execution_engine=info,replay_validator=info".into()
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config).context("loading configuration")?;

    match cli.command {
        Command::Demo { count } => run_demo(&config, count).await,
        Command::Replay {
            decision_id,
            all,
            since,
        } => {
            let store = open_store(&config)?;
            if all {
                let since = since.unwrap_or(DateTime::<Utc>::MIN_UTC);
                let reports = replay_since(&store, since, &config.gate);
                let diverged = reports.iter().filter(|r| !r.is_match()).count();
                print_json(&reports)?;
                if diverged > 0 {
                    bail!("{} of {} replays diverged", diverged, reports.len());
                }
                Ok(())
            } else if let Some(id) = decision_id {
                let report = replay(&store, &id, &config.gate)?;
                print_json(&report)?;
                if !report.is_match() {
                    bail!("replay of {} diverged", id);
                }
                Ok(())
            } else {
                bail!("replay needs a decision id or --all")
            }
        }
        Command::Show { decision_id } => {
            let store = open_store(&config)?;
            print_json(&*store.get_stored(&decision_id)?)
        }
        Command::List { since } => {
            let store = open_store(&config)?;
            let rows: Vec<_> = store
                .list_since(since.unwrap_or(DateTime::<Utc>::MIN_UTC))
                .map(|s| {
                    json!({
                        "sequence": s.sequence,
                        "decision_id": s.record.decision_id,
                        "timestamp_utc": s.record.timestamp_utc,
                        "ticker": s.record.llm_output.suggested_instrument.ticker,
                        "ev_net": s.record.quant_checks.ev_net,
                        "viability_pass": s.record.quant_checks.viability_pass,
                        "requires_human_review": s.record.quant_checks.requires_human_review,
                    })
                })
                .collect();
            print_json(&rows)
        }
        Command::Schema => print_json(&llm_output_schema()?),
        Command::Execute { decision_id, price } => run_execute(&config, &decision_id, price).await,
        Command::KillSwitch(cmd) => run_kill_switch(&config, cmd).await,
    }
}

async fn run_demo(config: &AppConfig, count: u32) -> Result<()> {
    let store = open_store(config)?;
    let demo = &config.demo;
    let market = demo_market(demo, config.gate.trading_days);
    let source = SyntheticSignalSource::new(demo.seed, &demo.ticker, demo.leverage);
    let mut pipeline = DecisionPipeline::new(source, config.gate.clone(), store, &config.model_version)?
        .with_signer(config.signer.clone());

    info!("Running {} demo decision(s) for {}", count, demo.ticker);
    let mut rows = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let outcome = pipeline.run_once(&market).await?;
        rows.push(json!({
            "decision_id": outcome.receipt.decision_id,
            "sequence": outcome.receipt.sequence,
            "audit_hash": outcome.receipt.audit_hash,
            "viability_pass": outcome.viability_pass,
            "requires_human_review": outcome.requires_human_review,
        }));
    }
    print_json(&rows)
}

async fn run_execute(config: &AppConfig, decision_id: &str, price: Option<f64>) -> Result<()> {
    let store = open_store(config)?;
    let record = store.get(decision_id)?;
    let market: Option<MarketContext> = record
        .inputs
        .get(MARKET_CONTEXT_INPUT)
        .map(|v| serde_json::from_value(v.clone()))
        .transpose()
        .context("stored market_context is unreadable")?;

    let price = price
        .or_else(|| market.as_ref().and_then(|m| m.price))
        .unwrap_or(config.demo.price);
    let adv_usd = market
        .as_ref()
        .and_then(|m| m.ticker_metrics.as_ref())
        .map_or(0.0, |t| t.adv_usd);

    let plan = build_execution_plan(&record, config.gate.portfolio_nav_usd, price, &config.execution)?;
    let ticker = &record.llm_output.suggested_instrument.ticker;
    // No venue adapter ships; live submissions are worked by the sandbox too.
    let broker = Arc::new(
        SandboxBroker::new(config.execution.sandbox_seed)
            .with_quote(ticker.clone(), MarketQuote { price, adv_usd }),
    );
    let engine = ExecutionEngine::new(open_kill_switch(config)?, broker.clone(), broker);

    let result = match engine.execute(&record, &plan).await? {
        ExecutionOutcome::NotViable => json!({ "outcome": "not_viable" }),
        ExecutionOutcome::AwaitingReview => json!({ "outcome": "awaiting_review" }),
        ExecutionOutcome::ShadowFilled(report) => {
            warn!("Kill switch engaged: {} was worked in shadow only", decision_id);
            json!({ "outcome": "shadow_filled", "plan": plan, "report": report })
        }
        ExecutionOutcome::Placed(report) => json!({ "outcome": "placed", "plan": plan, "report": report }),
    };
    print_json(&result)
}

async fn run_kill_switch(config: &AppConfig, cmd: KillSwitchCommand) -> Result<()> {
    let ks = open_kill_switch(config)?;
    match cmd {
        KillSwitchCommand::Status => print_json(&ks.status().await),
        KillSwitchCommand::Activate {
            actor,
            reason,
            evidence_refs,
        } => {
            let status = ks
                .handle_activation(ActivationRequest {
                    actor,
                    reason,
                    evidence_refs,
                })
                .await?;
            print_json(&status)
        }
        KillSwitchCommand::Request {
            custodian,
            approval,
            notes,
        } => {
            let reply = ks
                .handle_reactivation(ReactivationRequest {
                    operator: custodian,
                    approval,
                    notes,
                    request_id: None,
                })
                .await?;
            print_json(&reply)
        }
        KillSwitchCommand::Confirm {
            custodian,
            request_id,
            approval,
            notes,
        } => {
            let reply = ks
                .handle_reactivation(ReactivationRequest {
                    operator: custodian,
                    approval,
                    notes,
                    request_id: Some(request_id),
                })
                .await?;
            print_json(&reply)
        }
        KillSwitchCommand::Test { actor } => print_json(&ks.self_test(&actor).await?),
        KillSwitchCommand::DrawdownCheck {
            actor,
            nav,
            peak_nav,
            trigger,
        } => {
            if !emergency_drawdown_trigger(nav, peak_nav, trigger) {
                info!("Drawdown within {:.1}% trigger", trigger * 100.0);
                return print_json(&json!({ "triggered": false, "status": ks.status().await }));
            }
            let drawdown = (peak_nav - nav) / peak_nav;
            warn!(
                "Drawdown {:.2}% breached {:.2}% trigger, engaging kill switch",
                drawdown * 100.0,
                trigger * 100.0
            );
            let status = ks
                .activate(
                    &actor,
                    &format!("emergency drawdown {:.2}% >= {:.2}%", drawdown * 100.0, trigger * 100.0),
                    vec![format!("nav={nav}"), format!("peak_nav={peak_nav}")],
                )
                .await?;
            print_json(&json!({ "triggered": true, "status": status }))
        }
    }
}
