use crate::aggregate::Strategy;
use crate::error::{Error, Result};
use crate::generator::InsertMode;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;

const DEFAULT_DB_PATH: &str = "metrics.db";
const DEFAULT_INSERT_WORKERS: usize = 8;

/// Size of the synthetic dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Scale {
    pub n_ad_accounts: usize,
    pub n_campaigns: usize,
    pub n_ads: usize,
    /// Number of metric series; each series spans `n_days` rows
    pub n_metrics: usize,
    pub n_days: usize,
}

impl Default for Scale {
    fn default() -> Self {
        Self {
            n_ad_accounts: 400,
            n_campaigns: 100,
            n_ads: 1000,
            n_metrics: 1000,
            n_days: 365,
        }
    }
}

impl Scale {
    /// Accounts, campaigns and ads are modulo divisors in the fan-out rule and
    /// must be non-zero.
    pub fn validate(&self) -> Result<()> {
        let divisors = [
            ("n_ad_accounts", self.n_ad_accounts),
            ("n_campaigns", self.n_campaigns),
            ("n_ads", self.n_ads),
        ];
        match divisors.into_iter().find(|(_, n)| *n == 0) {
            Some((field, _)) => Err(Error::InvalidScale { field }),
            None => Ok(()),
        }
    }

    pub fn metric_rows(&self) -> usize {
        self.n_metrics * self.n_days
    }
}

#[derive(Parser, Debug)]
#[command(name = "metrics-aggregator", about = "Generate and aggregate synthetic ad metrics")]
pub struct CliArgs {
    /// SQLite database file
    #[arg(long, env = "METRICS_DB_PATH", default_value = DEFAULT_DB_PATH, global = true)]
    pub db: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Clear the store and load a fresh synthetic dataset
    GenerateData(GenerateArgs),
    /// Sum metric values per campaign
    AggregateData(AggregateArgs),
}

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Number of AdAccounts to generate
    #[arg(long = "adacc", default_value_t = Scale::default().n_ad_accounts)]
    pub n_ad_accounts: usize,

    /// Number of Campaigns to generate
    #[arg(long = "camp", default_value_t = Scale::default().n_campaigns)]
    pub n_campaigns: usize,

    /// Number of Ads to generate
    #[arg(long = "ad", default_value_t = Scale::default().n_ads)]
    pub n_ads: usize,

    /// Number of Metrics to generate
    #[arg(long = "met", default_value_t = Scale::default().n_metrics)]
    pub n_metrics: usize,

    /// Number of days of Metrics to generate
    #[arg(long = "days", default_value_t = Scale::default().n_days)]
    pub n_days: usize,

    #[arg(long, value_enum, default_value_t = LoadMode::Bulk)]
    pub mode: LoadMode,

    /// Worker count for parallel-bulk mode
    #[arg(long, default_value_t = DEFAULT_INSERT_WORKERS)]
    pub insert_workers: usize,

    /// Print the generation report as JSON
    #[arg(long)]
    pub json: bool,
}

impl GenerateArgs {
    pub fn scale(&self) -> Scale {
        Scale {
            n_ad_accounts: self.n_ad_accounts,
            n_campaigns: self.n_campaigns,
            n_ads: self.n_ads,
            n_metrics: self.n_metrics,
            n_days: self.n_days,
        }
    }

    pub fn insert_mode(&self) -> InsertMode {
        match self.mode {
            LoadMode::PerRow => InsertMode::PerRow,
            LoadMode::Bulk => InsertMode::Bulk,
            LoadMode::ParallelBulk => InsertMode::ParallelBulk {
                workers: self.insert_workers,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LoadMode {
    PerRow,
    Bulk,
    ParallelBulk,
}

#[derive(Args, Debug)]
pub struct AggregateArgs {
    #[arg(long, value_enum, default_value_t = Strategy::Sequential)]
    pub strategy: Strategy,

    /// Worker count for the fan-out strategies (defaults to the CPU count)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Print the aggregation run as JSON
    #[arg(long)]
    pub json: bool,
}

impl AggregateArgs {
    pub fn workers(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get)
    }
}
