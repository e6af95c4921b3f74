//! MarketPay Simulator
//!
//! Drives the payment engine with concurrent payments, withdrawals and
//! provider webhooks, then checks the ledger invariants.

use clap::Parser;
use rust_decimal::Decimal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod controller;
mod metrics;
mod scenario;

use controller::SimulationController;
use marketpay_engine::EngineConfig;
use scenario::Scenario;

const SIMULATOR_WEBHOOK_SECRET: &str = "whsec_simulator";

/// MarketPay Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "MarketPay ledger load simulator")]
struct Args {
    /// Scenario to run (steady, webhook-storm, provider-outage)
    #[arg(short, long, default_value = "steady")]
    scenario: String,

    /// Number of paying organizations
    #[arg(long, default_value = "5")]
    payers: usize,

    /// Number of developer wallets
    #[arg(long, default_value = "10")]
    developers: usize,

    /// Opening balance of each payer account
    #[arg(long, default_value = "500.00")]
    payer_balance: Decimal,

    /// Override the scenario's settlement count
    #[arg(long)]
    settlements: Option<usize>,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Print engine counters in Prometheus text format
    #[arg(long)]
    prometheus: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let args = Args::parse();

    let mut scenario = Scenario::load(&args.scenario)?;
    if let Some(settlements) = args.settlements {
        scenario.settlements = settlements;
    }

    let mut config = EngineConfig::from_env();
    if config.webhook.secret.is_empty() {
        config.webhook.secret = SIMULATOR_WEBHOOK_SECRET.to_string();
    }
    config.validate().map_err(anyhow::Error::msg)?;

    info!(
        scenario = %scenario.name,
        payers = args.payers,
        developers = args.developers,
        seed = ?args.seed,
        "Starting MarketPay Simulator"
    );

    let mut controller = SimulationController::new(
        config,
        args.payers,
        args.developers,
        args.payer_balance,
        args.seed,
    )?;
    controller.initialize().await?;
    let report = controller.run_scenario(&scenario).await?;

    let metrics = controller.metrics();
    info!(
        settlements = metrics.settlements_attempted,
        succeeded = metrics.settlements_succeeded,
        refused = metrics.settlements_refused,
        success_rate = metrics.settlement_success_rate(),
        avg_latency_ms = metrics.average_latency_ms(),
        p99_latency_ms = metrics.p99_latency_ms(),
        "Settlements"
    );
    info!(
        requested = metrics.withdrawals_attempted,
        accepted = metrics.withdrawals_accepted,
        refused = metrics.withdrawals_refused,
        completed = report.completed,
        failed = report.failed,
        rejected = report.rejected,
        outstanding = report.outstanding,
        "Withdrawals"
    );
    info!(
        delivered = metrics.webhooks_delivered,
        acknowledged = metrics.webhooks_acknowledged,
        rejected = metrics.webhooks_rejected,
        "Webhooks"
    );
    info!(
        total_earned = %report.total_earned,
        total_withdrawn = %report.total_withdrawn,
        integrity_violations = report.integrity_violations,
        overcommitted_wallets = report.overcommitted_wallets,
        "Ledger"
    );

    if args.prometheus {
        print!("{}", controller.engine().metrics().to_prometheus());
    }

    if !report.is_consistent() {
        error!("Ledger invariants violated");
        anyhow::bail!(
            "{} integrity violations, {} overcommitted wallets",
            report.integrity_violations,
            report.overcommitted_wallets
        );
    }

    info!("Simulation complete");
    Ok(())
}
