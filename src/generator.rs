use crate::config::Scale;
use crate::distributor::WorkDistributor;
use crate::error::Result;
use crate::model::NewMetric;
use crate::store::SchemaStore;
use serde::Serialize;
use std::time::{Duration, Instant};

/// 2021-01-01T00:00:00Z, timestamp of the first day of every series.
pub const START_TIMESTAMP: i64 = 1_609_459_200;
pub const SECONDS_PER_DAY: i64 = 86_400;
/// Every generated metric carries this value.
pub const METRIC_VALUE: f64 = 10.0;

const PROGRESS_EVERY: usize = 10_000;

/// How the metric rows reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsertMode {
    /// One insert per row. Slow; kept as a baseline.
    PerRow,
    /// All rows in a single bulk-insert call.
    #[default]
    Bulk,
    /// Rows split into `workers` contiguous chunks, each chunk bulk-inserted
    /// by its own worker.
    ParallelBulk { workers: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationReport {
    pub scale: Scale,
    pub metrics_inserted: usize,
    /// Time spent loading metric rows
    pub insert_elapsed: Duration,
    /// Whole run, reset included
    pub elapsed: Duration,
}

/// Clears all four tables, children before parents.
pub fn clear_test_data(store: &dyn SchemaStore) -> Result<()> {
    store.clear_metrics()?;
    store.clear_ads()?;
    store.clear_campaigns()?;
    store.clear_ad_accounts()?;
    Ok(())
}

/// Replaces the store's contents with a synthetic hierarchy of the given
/// scale.
///
/// Campaign `i` belongs to account `i % n_ad_accounts`, ad `i` to campaign
/// `i % n_campaigns`, and metric series `i` to ad `i % n_ads`. Any store
/// error aborts the run and leaves the store partially populated; running
/// again starts with a reset.
pub fn generate(store: &dyn SchemaStore, scale: &Scale, mode: InsertMode) -> Result<GenerationReport> {
    scale.validate()?;
    let started = Instant::now();

    log::info!("Clearing test data");
    clear_test_data(store)?;

    log::info!("Generating {} test ad accounts", scale.n_ad_accounts);
    for i in 0..scale.n_ad_accounts {
        store.create_ad_account(i as i64, &format!("AdAccount {}", i))?;
    }

    log::info!("Generating {} test campaigns", scale.n_campaigns);
    for i in 0..scale.n_campaigns {
        let ad_account_id = (i % scale.n_ad_accounts) as i64;
        store.create_campaign(i as i64, ad_account_id, &format!("Campaign {}", i))?;
    }

    log::info!("Generating {} test ads", scale.n_ads);
    for i in 0..scale.n_ads {
        let campaign_id = (i % scale.n_campaigns) as i64;
        store.create_ad(i as i64, campaign_id, &format!("Ad {}", i))?;
    }

    log::info!("Generating test metrics");
    let metrics = build_metrics(scale);

    let insert_started = Instant::now();
    let metrics_inserted = match mode {
        InsertMode::PerRow => insert_per_row(store, &metrics)?,
        InsertMode::Bulk => insert_bulk(store, &metrics)?,
        InsertMode::ParallelBulk { workers } => insert_parallel(store, &metrics, workers)?,
    };
    let insert_elapsed = insert_started.elapsed();

    Ok(GenerationReport {
        scale: *scale,
        metrics_inserted,
        insert_elapsed,
        elapsed: started.elapsed(),
    })
}

/// Builds every metric row in memory: `n_metrics` series of `n_days` points.
pub fn build_metrics(scale: &Scale) -> Vec<NewMetric> {
    let mut metrics = Vec::with_capacity(scale.metric_rows());
    for i in 0..scale.n_metrics {
        let ad_id = (i % scale.n_ads) as i64;
        let name = format!("Metric {}", i);
        for day in 0..scale.n_days {
            metrics.push(NewMetric {
                name: name.clone(),
                ad_id,
                timestamp: START_TIMESTAMP + day as i64 * SECONDS_PER_DAY,
                value: METRIC_VALUE,
            });
        }
    }
    metrics
}

fn insert_per_row(store: &dyn SchemaStore, metrics: &[NewMetric]) -> Result<usize> {
    let mut batch_started = Instant::now();

    for (n, metric) in metrics.iter().enumerate() {
        store.create_metric(metric)?;

        let inserted = n + 1;
        if inserted % PROGRESS_EVERY == 0 {
            let elapsed = batch_started.elapsed();
            let remaining = metrics.len() - inserted;
            log::info!("Inserted {} records in {:?}", inserted, elapsed);
            log::info!(
                "Estimated time till end: {:?}",
                elapsed.mul_f64(remaining as f64 / PROGRESS_EVERY as f64)
            );
            batch_started = Instant::now();
        }
    }

    Ok(metrics.len())
}

fn insert_bulk(store: &dyn SchemaStore, metrics: &[NewMetric]) -> Result<usize> {
    log::info!("Starting bulk insert of {} records", metrics.len());
    let started = Instant::now();

    let inserted = store.bulk_insert_metrics(metrics)?;

    log::info!("Inserted {} records in {:?}", inserted, started.elapsed());
    Ok(inserted)
}

fn insert_parallel(store: &dyn SchemaStore, metrics: &[NewMetric], workers: usize) -> Result<usize> {
    let distributor = WorkDistributor::new(workers);
    let workers = distributor.workers();
    log::info!(
        "Starting bulk insert of {} records using {} workers",
        metrics.len(),
        workers
    );
    let started = Instant::now();

    let chunk_size = metrics.len().div_ceil(workers).max(1);
    let counts = distributor.run_streaming(
        metrics.chunks(chunk_size),
        |_| 0usize,
        |inserted, chunk: &[NewMetric]| {
            let n = store.bulk_insert_metrics(chunk)?;
            log::debug!("Inserted {} records", n);
            *inserted += n;
            Ok(())
        },
    )?;
    let inserted: usize = counts.into_iter().sum();

    log::info!(
        "Inserted {} records in {:?} using {} workers",
        inserted,
        started.elapsed(),
        workers
    );
    Ok(inserted)
}
