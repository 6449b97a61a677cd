use std::collections::HashMap;

pub type AdAccountId = i64;
pub type CampaignId = i64;
pub type AdId = i64;

/// Root of the hierarchy. Owns zero or more campaigns.
#[derive(Debug, Clone, PartialEq)]
pub struct AdAccount {
    pub id: AdAccountId,
    pub name: String,
}

/// Owned by exactly one ad account.
#[derive(Debug, Clone, PartialEq)]
pub struct Campaign {
    pub id: CampaignId,
    pub ad_account_id: AdAccountId,
    pub name: String,
}

/// Owned by exactly one campaign.
#[derive(Debug, Clone, PartialEq)]
pub struct Ad {
    pub id: AdId,
    pub campaign_id: CampaignId,
    pub name: String,
}

/// One time-series point for an ad.
///
/// Metrics have no identity of their own beyond `(ad_id, timestamp)`;
/// several ads may carry series with the same name.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMetric {
    pub name: String,
    pub ad_id: AdId,
    /// Epoch seconds
    pub timestamp: i64,
    pub value: f64,
}

/// Result row of the per-campaign aggregate query.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CampaignTotal {
    pub total_value: f64,
}

/// Campaign ID → summed metric value, scoped to one aggregation run.
pub type AggregationResult = HashMap<CampaignId, f64>;
