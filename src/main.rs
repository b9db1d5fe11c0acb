use clap::{Parser, Subcommand};
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::path::PathBuf;
use std::sync::Arc;

use stockr::config::Config;
use stockr::domain::PriceTier;
use stockr::host::{Host, SimCounterparty, SimHost};
use stockr::scheduler::Scheduler;

#[derive(Parser)]
#[command(name = "stockr", about = "Priority-driven inventory restocking scheduler")]
struct Cli {
    /// Path to a YAML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted in-memory scenario and print what got bought
    Simulate,
    /// Load and validate the configuration
    CheckConfig,
}

fn setup_logging() {
    env_logger::Builder::from_default_env().init();
}

fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    match cli.command.as_ref().unwrap_or(&Commands::Simulate) {
        Commands::Simulate => run_simulation(config, cli.verbose),
        Commands::CheckConfig => check_config(config),
    }
}

fn check_config(config: &Config) -> Result<()> {
    config.validate()?;
    println!("{}", "Config OK".green());
    println!("  tracked item kinds: {}", config.targets.len());
    println!(
        "  thresholds: discounted {}% / normal {}% / markup {}% / premium {}%",
        config.thresholds.discounted,
        config.thresholds.normal,
        config.thresholds.markup,
        config.thresholds.premium
    );
    Ok(())
}

/// Drive the scheduler through a small scripted world: three
/// counterparties arrive, transactions complete, the fulfillment queue
/// backs up and recovers.
fn run_simulation(config: &Config, verbose: bool) -> Result<()> {
    let mut config = config.clone();
    if config.targets.is_empty() {
        // Demo targets so an empty config still shows behavior
        config.targets.insert(1, 100);
        config.targets.insert(2, 60);
        config.targets.insert(3, 40);
    }
    // The scripted counterparties should trade immediately
    config.timing.warmup_ms = 0;
    config.limits.min_budget_reserve = 1_000;

    let host = Arc::new(SimHost::new());
    host.set_consumer(100);
    host.set_budget(50_000);
    host.set_base_price(1, 20);
    host.set_base_price(2, 45);
    host.set_base_price(3, 120);
    host.set_on_hand(1, 35);

    let scheduler = Scheduler::new(Arc::clone(&host), config);

    info!("Simulation starting");
    println!("{}", "Counterparties arriving...".cyan());

    host.insert_counterparty(
        201,
        SimCounterparty::new()
            .with_offer(1, 30, PriceTier::Discounted)
            .with_offer(2, 10, PriceTier::Normal),
    );
    scheduler.on_counterparty_arrived(201);

    host.insert_counterparty(
        202,
        SimCounterparty::new()
            .with_offer(2, 25, PriceTier::Markup)
            .with_offer(3, 15, PriceTier::Premium),
    );
    scheduler.on_counterparty_arrived(202);

    host.insert_counterparty(203, SimCounterparty::new().with_offer(1, 50, PriceTier::Normal));
    scheduler.on_counterparty_arrived(203);

    // Fulfillment completes the first transaction, freeing a slot
    if let Some(first) = host.committed().first().cloned()
        && let Some(done) = host.complete(first.id)
    {
        println!("{} transaction {} fulfilled", "Done:".green(), done.id);
        scheduler.on_transaction_completed(&done);
    }

    // The fulfillment queue backs up, then drains
    println!("{}", "Fulfillment queue backing up...".yellow());
    host.set_queue_depth(45);
    scheduler.on_backpressure_sample(host.downstream_queue_depth());
    println!("  throttle: {:?}", scheduler.throttle_state());
    host.set_queue_depth(10);
    scheduler.on_backpressure_sample(host.downstream_queue_depth());
    println!("  throttle: {:?}", scheduler.throttle_state());

    // Summary
    let committed = host.committed();
    println!();
    println!(
        "{} {} transactions, {} credits spent",
        "Committed:".green(),
        committed.len(),
        committed.iter().map(|t| t.cost).sum::<u64>()
    );
    for tx in &committed {
        println!(
            "  tx {} with counterparty {}: {} units for {} credits",
            tx.id,
            tx.counterparty,
            tx.total_units(),
            tx.cost
        );
        if verbose {
            for item in &tx.items {
                println!("    item {} x{}", item.kind, item.qty);
            }
        }
    }
    let cancelled = host.cancelled();
    if !cancelled.is_empty() {
        println!("{} {} transactions", "Cancelled:".red(), cancelled.len());
    }
    println!(
        "open: {}, budget left: {}, tracked counterparties: {}",
        host.open_count(),
        host.available_budget(),
        scheduler.tracked_counterparties()
    );

    Ok(())
}

fn main() -> Result<()> {
    setup_logging();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    run_application(&cli, &config).context("Application failed")?;

    Ok(())
}
