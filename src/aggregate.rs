//! Per-campaign aggregation.
//!
//! The sum itself runs inside the store, one query per campaign. The
//! strategies only differ in how those queries are scheduled; for the same
//! dataset they all produce the same mapping.

use crate::distributor::WorkDistributor;
use crate::error::Result;
use crate::model::{AdAccount, AggregationResult, Campaign};
use crate::store::SchemaStore;
use clap::ValueEnum;
use serde::Serialize;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

const PROGRESS_EVERY: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// One query at a time, accounts and campaigns in store order
    Sequential,
    /// Workers take whole accounts and keep private partial results
    ByAccount,
    /// Workers take single campaigns and write into one locked map
    ByCampaign,
}

impl Strategy {
    pub const ALL: [Strategy; 3] = [Strategy::Sequential, Strategy::ByAccount, Strategy::ByCampaign];
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Sequential => write!(f, "sequential"),
            Strategy::ByAccount => write!(f, "by-account"),
            Strategy::ByCampaign => write!(f, "by-campaign"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregationRun {
    pub strategy: Strategy,
    pub totals: AggregationResult,
    pub elapsed: Duration,
}

impl AggregationRun {
    pub fn campaign_count(&self) -> usize {
        self.totals.len()
    }

    pub fn grand_total(&self) -> f64 {
        self.totals.values().sum()
    }
}

/// Runs one aggregation pass with the chosen strategy. `workers` only
/// matters for the fan-out strategies.
pub fn aggregate(store: &dyn SchemaStore, strategy: Strategy, workers: usize) -> Result<AggregationRun> {
    let started = Instant::now();
    let distributor = WorkDistributor::new(workers);

    let totals = match strategy {
        Strategy::Sequential => aggregate_sequential(store)?,
        Strategy::ByAccount => aggregate_by_account(store, &distributor)?,
        Strategy::ByCampaign => aggregate_by_campaign(store, &distributor)?,
    };

    let elapsed = started.elapsed();
    log::info!(
        "Aggregated {} campaigns with {} strategy in {:?}",
        totals.len(),
        strategy,
        elapsed
    );

    Ok(AggregationRun {
        strategy,
        totals,
        elapsed,
    })
}

pub fn aggregate_sequential(store: &dyn SchemaStore) -> Result<AggregationResult> {
    let mut totals = AggregationResult::new();

    log::info!("Getting ad account IDs");
    let ad_accounts = store.get_ad_accounts()?;

    log::info!("Processing {} ad accounts", ad_accounts.len());
    for ad_account in &ad_accounts {
        log::debug!("Processing ad account {}", ad_account.id);
        let campaigns = store.get_campaigns_for_ad_account(ad_account.id)?;

        let started = Instant::now();
        for (j, campaign) in campaigns.iter().enumerate() {
            let total = store.aggregate_metrics_for_campaign(campaign.id)?;
            totals.insert(campaign.id, total.total_value);

            let done = j + 1;
            if done % PROGRESS_EVERY == 0 {
                let elapsed = started.elapsed();
                let remaining = campaigns.len() - done;
                log::debug!(
                    "Processed {} of {} campaigns in {:?}, estimated {:?} left",
                    done,
                    campaigns.len(),
                    elapsed,
                    elapsed.mul_f64(remaining as f64 / done as f64)
                );
            }
        }
    }

    Ok(totals)
}

/// Fans accounts out to the workers. Every account goes to exactly one
/// worker, so each worker collects into its own map and the maps are merged
/// after the join.
pub fn aggregate_by_account(store: &dyn SchemaStore, distributor: &WorkDistributor) -> Result<AggregationResult> {
    log::info!("Getting ad account IDs");
    let ad_accounts = store.get_ad_accounts()?;

    log::info!(
        "Processing {} ad accounts with {} workers",
        ad_accounts.len(),
        distributor.workers()
    );
    let partials = distributor.run(
        ad_accounts,
        |_| AggregationResult::new(),
        |partial, ad_account: AdAccount| {
            let campaigns = store.get_campaigns_for_ad_account(ad_account.id)?;
            log::debug!(
                "Processing {} campaigns of ad account {}",
                campaigns.len(),
                ad_account.id
            );
            for campaign in campaigns {
                let total = store.aggregate_metrics_for_campaign(campaign.id)?;
                partial.insert(campaign.id, total.total_value);
            }
            Ok(())
        },
    )?;

    let mut totals = AggregationResult::with_capacity(partials.iter().map(|p| p.len()).sum());
    for partial in partials {
        totals.extend(partial);
    }
    Ok(totals)
}

/// Walks the whole hierarchy up front, then fans single campaigns out to the
/// workers. All workers write into one map; the lock covers the insert only,
/// never the query.
pub fn aggregate_by_campaign(store: &dyn SchemaStore, distributor: &WorkDistributor) -> Result<AggregationResult> {
    log::info!("Getting ad account IDs");
    let ad_accounts = store.get_ad_accounts()?;

    let mut campaigns = Vec::new();
    for ad_account in &ad_accounts {
        campaigns.extend(store.get_campaigns_for_ad_account(ad_account.id)?);
    }

    log::info!(
        "Processing {} campaigns with {} workers",
        campaigns.len(),
        distributor.workers()
    );
    let totals = Mutex::new(AggregationResult::with_capacity(campaigns.len()));
    distributor.run(
        campaigns,
        |_| (),
        |_, campaign: Campaign| {
            let started = Instant::now();
            let total = store.aggregate_metrics_for_campaign(campaign.id)?;

            totals
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(campaign.id, total.total_value);

            log::debug!("Processed campaign {} in {:?}", campaign.id, started.elapsed());
            Ok(())
        },
    )?;

    Ok(totals.into_inner().unwrap_or_else(PoisonError::into_inner))
}
