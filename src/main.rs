use anyhow::{Context, Result};
use clap::Parser;

use metrics_aggregator::config::{AggregateArgs, CliArgs, Command, GenerateArgs};
use metrics_aggregator::{aggregate, generate, SqliteStore, VERSION};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let args = CliArgs::parse();
    log::debug!("metrics-aggregator v{} using {}", VERSION, args.db.display());

    let store = SqliteStore::open(&args.db)
        .with_context(|| format!("Unable to open database {}", args.db.display()))?;

    match args.command {
        Command::GenerateData(generate_args) => run_generate(&store, &generate_args),
        Command::AggregateData(aggregate_args) => run_aggregate(&store, &aggregate_args),
    }
}

fn run_generate(store: &SqliteStore, args: &GenerateArgs) -> Result<()> {
    let scale = args.scale();
    let report = generate(store, &scale, args.insert_mode()).context(
        "Data generation failed; the store may be partially populated, run generate-data again",
    )?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    println!(
        "✓ Generated {} ad accounts, {} campaigns, {} ads",
        report.scale.n_ad_accounts, report.scale.n_campaigns, report.scale.n_ads
    );
    println!(
        "✓ Inserted {} metric rows in {:?} (total {:?})",
        report.metrics_inserted, report.insert_elapsed, report.elapsed
    );

    Ok(())
}

fn run_aggregate(store: &SqliteStore, args: &AggregateArgs) -> Result<()> {
    let run = aggregate(store, args.strategy, args.workers())
        .with_context(|| format!("Aggregation with {} strategy failed", args.strategy))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&run)?);
    }

    println!(
        "✓ Aggregated {} campaigns (grand total {}) in {:?} using {} strategy",
        run.campaign_count(),
        run.grand_total(),
        run.elapsed,
        run.strategy
    );

    Ok(())
}
