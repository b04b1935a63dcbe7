// bin/sim.rs - Contract Net market simulation

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use tracing::info;

use fipa_tick_agents::market::{Market, MarketRole, MarketSummary};
use fipa_tick_agents::observability::{init_metrics, init_tracing, TracingFormat};
use fipa_tick_agents::SimulationConfig;

/// Tick-driven FIPA Contract Net market
#[derive(Parser, Debug)]
#[command(name = "fipa-tick-sim")]
#[command(version)]
#[command(about = "Run buyers and sellers negotiating over Contract Net", long_about = None)]
struct Args {
    /// Config file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Ticks to run (overrides world.ticks)
    #[arg(short, long)]
    ticks: Option<u64>,

    /// RNG seed (overrides world.seed)
    #[arg(short, long)]
    seed: Option<u64>,

    /// Log level (trace, debug, info, warn, error); overrides logging.filter
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty, compact, json)
    #[arg(long)]
    log_format: Option<String>,

    /// Print Prometheus metrics after the run
    #[arg(long)]
    metrics: bool,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = SimulationConfig::load(args.config.as_deref())
        .with_context(|| "failed to load simulation config")?;
    if let Some(ticks) = args.ticks {
        config.world.ticks = ticks;
    }
    if let Some(seed) = args.seed {
        config.world.seed = seed;
    }
    if let Some(level) = &args.log_level {
        config.logging.filter = format!("{},fipa_tick_agents={}", level, level);
        config.logging.with_span_events = level == "trace" || level == "debug";
    }
    if let Some(format) = &args.log_format {
        config.logging.format = match format.as_str() {
            "json" => TracingFormat::Json,
            "compact" => TracingFormat::Compact,
            _ => TracingFormat::Pretty,
        };
        config.logging.with_ansi = format != "json";
    }

    init_tracing(&config.logging)?;

    let metrics = if args.metrics {
        Some(init_metrics()?)
    } else {
        None
    };

    info!(
        ticks = config.world.ticks,
        seed = config.world.seed,
        topic = %config.negotiation.topic,
        "Starting simulation"
    );

    let mut market = Market::build(&config)?;
    market.run(config.world.ticks)?;
    let summary = market.summary();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    if let Some(handle) = metrics {
        println!("\n{}", handle.render());
    }

    Ok(())
}

fn print_summary(summary: &MarketSummary) {
    println!("{}", format!("Market after {} ticks", summary.tick).bold().cyan());
    println!("{}", "─".repeat(72));
    println!(
        "  {:<12} {:<22} {:>5} {:<14} {:>6} {:>6} {:>7}",
        "Agent".bold(),
        "State".bold(),
        "Runs".bold(),
        "Last end".bold(),
        "Stock".bold(),
        "Units".bold(),
        "Money".bold()
    );

    for report in &summary.agents {
        let state = report.state.to_string();
        let state = if report.state.is_terminal() || report.state.is_runnable() {
            state.green()
        } else {
            state.yellow()
        };
        let (stock, units, money) = match &report.account {
            Some(a) if a.role == MarketRole::Seller => {
                (a.stock.to_string(), a.sold.to_string(), a.earned.to_string())
            }
            Some(a) => ("-".to_string(), a.bought.to_string(), a.spent.to_string()),
            None => ("-".to_string(), "-".to_string(), "-".to_string()),
        };
        println!(
            "  {:<12} {:<22} {:>5} {:<14} {:>6} {:>6} {:>7}",
            report.agent.to_string(),
            state,
            report.completions,
            report.last_end.as_deref().unwrap_or("-"),
            stock,
            units,
            money
        );
    }

    println!();
    println!("{}", "Messages".bold().cyan());
    println!("{}", "─".repeat(72));
    for (performative, count) in &summary.messages {
        println!("  {:<18} {}", performative, count);
    }
}
