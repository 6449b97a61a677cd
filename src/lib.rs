// Metrics Aggregator - Core Library
// Synthetic ad-metrics generation and per-campaign aggregation over SQLite

pub mod aggregate;
pub mod config;
pub mod distributor;
pub mod error;
pub mod generator;
pub mod model;
pub mod store;

// Re-export commonly used types
pub use aggregate::{
    aggregate, aggregate_by_account, aggregate_by_campaign, aggregate_sequential,
    AggregationRun, Strategy,
};
pub use config::Scale;
pub use distributor::WorkDistributor;
pub use error::{Error, Result};
pub use generator::{
    build_metrics, clear_test_data, generate, GenerationReport, InsertMode,
    METRIC_VALUE, SECONDS_PER_DAY, START_TIMESTAMP,
};
pub use model::{
    Ad, AdAccount, AdAccountId, AdId, AggregationResult, Campaign, CampaignId,
    CampaignTotal, NewMetric,
};
pub use store::{setup_database, SchemaStore, SqliteStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
