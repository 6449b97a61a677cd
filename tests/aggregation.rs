// End-to-end checks: generate into a fresh SQLite file, aggregate with every
// strategy, compare against totals derived from the modulo fan-out rule.

use metrics_aggregator::{
    aggregate, clear_test_data, generate, AggregationResult, InsertMode, Scale, SchemaStore,
    SqliteStore, Strategy, METRIC_VALUE,
};
use rusqlite::Connection;
use tempfile::TempDir;

fn open_temp_store() -> (TempDir, SqliteStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(dir.path().join("metrics.db")).unwrap();
    (dir, store)
}

/// Expected per-campaign totals computed from the generator's distribution
/// rule, independent of the store.
fn expected_totals(scale: &Scale) -> AggregationResult {
    let mut totals: AggregationResult = (0..scale.n_campaigns as i64).map(|c| (c, 0.0)).collect();
    for series in 0..scale.n_metrics {
        let ad = series % scale.n_ads;
        let campaign = (ad % scale.n_campaigns) as i64;
        *totals.get_mut(&campaign).unwrap() += METRIC_VALUE * scale.n_days as f64;
    }
    totals
}

#[test]
fn test_small_scenario_all_strategies() {
    let (_dir, store) = open_temp_store();
    let scale = Scale {
        n_ad_accounts: 2,
        n_campaigns: 2,
        n_ads: 2,
        n_metrics: 2,
        n_days: 3,
    };

    let report = generate(&store, &scale, InsertMode::Bulk).unwrap();
    assert_eq!(report.metrics_inserted, 6);
    assert_eq!(store.count_metrics().unwrap(), 6);

    // Series 0 → ad 0 → campaign 0, series 1 → ad 1 → campaign 1, 3 days of 10 each
    let expected = expected_totals(&scale);
    assert_eq!(expected[&0], 30.0);
    assert_eq!(expected[&1], 30.0);

    for strategy in Strategy::ALL {
        let run = aggregate(&store, strategy, 2).unwrap();
        assert_eq!(run.totals, expected, "strategy {}", strategy);
    }
}

#[test]
fn test_uneven_scenario_matches_modulo_rule() {
    let (_dir, store) = open_temp_store();
    let scale = Scale {
        n_ad_accounts: 3,
        n_campaigns: 8,
        n_ads: 13,
        n_metrics: 50,
        n_days: 4,
    };
    generate(&store, &scale, InsertMode::ParallelBulk { workers: 4 }).unwrap();

    let expected = expected_totals(&scale);
    for strategy in Strategy::ALL {
        for workers in [1, 2, 7] {
            let run = aggregate(&store, strategy, workers).unwrap();
            assert_eq!(run.totals, expected, "strategy {} with {} workers", strategy, workers);
        }
    }
}

#[test]
fn test_generated_rows_reference_existing_parents() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metrics.db");
    let store = SqliteStore::open(&path).unwrap();
    let scale = Scale {
        n_ad_accounts: 4,
        n_campaigns: 10,
        n_ads: 25,
        n_metrics: 30,
        n_days: 2,
    };
    generate(&store, &scale, InsertMode::Bulk).unwrap();

    let conn = Connection::open(&path).unwrap();
    let count = |sql: &str| -> i64 { conn.query_row(sql, [], |row| row.get(0)).unwrap() };

    assert_eq!(
        count("SELECT COUNT(*) FROM campaigns c LEFT JOIN ad_accounts a ON a.id = c.ad_account_id WHERE a.id IS NULL"),
        0
    );
    assert_eq!(
        count("SELECT COUNT(*) FROM ads d LEFT JOIN campaigns c ON c.id = d.campaign_id WHERE c.id IS NULL"),
        0
    );
    assert_eq!(
        count("SELECT COUNT(*) FROM metrics m LEFT JOIN ads d ON d.id = m.ad_id WHERE d.id IS NULL"),
        0
    );
    // Parent ids follow the modulo fan-out rule
    assert_eq!(count("SELECT COUNT(*) FROM campaigns WHERE ad_account_id <> id % 4"), 0);
    assert_eq!(count("SELECT COUNT(*) FROM ads WHERE campaign_id <> id % 10"), 0);

    // Campaign 3 owns ads 3, 13 and 23
    let ads = store.get_ads_for_campaign(3).unwrap();
    let ids: Vec<i64> = ads.iter().map(|ad| ad.id).collect();
    assert_eq!(ids, vec![3, 13, 23]);
    assert!(ads.iter().all(|ad| ad.campaign_id == 3));
}

#[test]
fn test_reset_twice_then_aggregate_empty() {
    let (_dir, store) = open_temp_store();
    let scale = Scale {
        n_ad_accounts: 2,
        n_campaigns: 2,
        n_ads: 2,
        n_metrics: 2,
        n_days: 2,
    };
    generate(&store, &scale, InsertMode::Bulk).unwrap();

    clear_test_data(&store).unwrap();
    clear_test_data(&store).unwrap();

    assert_eq!(store.count_metrics().unwrap(), 0);
    let run = aggregate(&store, Strategy::ByCampaign, 4).unwrap();
    assert!(run.totals.is_empty());
}
