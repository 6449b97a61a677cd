use crate::error::{Error, Result};
use crate::model::{Ad, AdAccount, AdAccountId, AdId, Campaign, CampaignId, CampaignTotal, NewMetric};
use rusqlite::{params, Connection, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Query interface over the relational store holding the ad hierarchy.
///
/// Implementations are shared by reference across aggregation workers, so
/// every operation takes `&self` and the store must be `Sync`.
pub trait SchemaStore: Sync {
    fn clear_metrics(&self) -> Result<()>;
    fn clear_ads(&self) -> Result<()>;
    fn clear_campaigns(&self) -> Result<()>;
    fn clear_ad_accounts(&self) -> Result<()>;

    fn create_ad_account(&self, id: AdAccountId, name: &str) -> Result<()>;
    fn create_campaign(&self, id: CampaignId, ad_account_id: AdAccountId, name: &str) -> Result<()>;
    fn create_ad(&self, id: AdId, campaign_id: CampaignId, name: &str) -> Result<()>;

    /// Single-row insert. Only the per-row loader uses this.
    fn create_metric(&self, metric: &NewMetric) -> Result<()>;

    /// Loads the whole batch without a round trip per row and returns the
    /// number of rows inserted.
    fn bulk_insert_metrics(&self, metrics: &[NewMetric]) -> Result<usize>;

    fn get_ad_accounts(&self) -> Result<Vec<AdAccount>>;
    fn get_campaigns_for_ad_account(&self, ad_account_id: AdAccountId) -> Result<Vec<Campaign>>;
    fn get_ads_for_campaign(&self, campaign_id: CampaignId) -> Result<Vec<Ad>>;

    /// Sum of all metric values of the campaign's ads. A campaign without ads
    /// or metrics totals zero.
    fn aggregate_metrics_for_campaign(&self, campaign_id: CampaignId) -> Result<CampaignTotal>;

    fn count_metrics(&self) -> Result<i64>;
    fn count_metrics_for_ad(&self, ad_id: AdId) -> Result<i64>;
    fn sum_metrics_for_ad(&self, ad_id: AdId) -> Result<f64>;
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode so readers do not block each other or the writer
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS ad_accounts (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS campaigns (
            id INTEGER PRIMARY KEY,
            ad_account_id INTEGER NOT NULL REFERENCES ad_accounts(id),
            name TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS ads (
            id INTEGER PRIMARY KEY,
            campaign_id INTEGER NOT NULL REFERENCES campaigns(id),
            name TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS metrics (
            name TEXT NOT NULL,
            ad_id INTEGER NOT NULL REFERENCES ads(id),
            timestamp INTEGER NOT NULL,
            value REAL NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_campaigns_ad_account ON campaigns(ad_account_id);
        CREATE INDEX IF NOT EXISTS idx_ads_campaign ON ads(campaign_id);
        CREATE INDEX IF NOT EXISTS idx_metrics_ad ON metrics(ad_id);",
    )?;

    Ok(())
}

fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.pragma_update(None, "foreign_keys", true)?;
    Ok(conn)
}

/// SQLite-backed store.
///
/// Holds a small pool of idle connections; each call checks one out and
/// puts it back afterwards, so concurrent workers each query on their own
/// connection.
pub struct SqliteStore {
    path: PathBuf,
    idle: Mutex<Vec<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) the database file and makes sure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = open_connection(&path)?;
        setup_database(&conn)?;

        log::debug!("Opened metrics store at {}", path.display());

        Ok(Self {
            path,
            idle: Mutex::new(vec![conn]),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `f` on a pooled connection, opening a new one when the pool is
    /// empty. The connection goes back to the pool whether `f` succeeds or not.
    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let pooled = self.idle.lock().map_err(|_| Error::PoolPoisoned)?.pop();
        let mut conn = match pooled {
            Some(conn) => conn,
            None => open_connection(&self.path)?,
        };

        let result = f(&mut conn);

        // A poisoned pool just closes the connection
        if let Ok(mut idle) = self.idle.lock() {
            idle.push(conn);
        }
        result
    }
}

impl SchemaStore for SqliteStore {
    fn clear_metrics(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM metrics", [])?;
            Ok(())
        })
    }

    fn clear_ads(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM ads", [])?;
            Ok(())
        })
    }

    fn clear_campaigns(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM campaigns", [])?;
            Ok(())
        })
    }

    fn clear_ad_accounts(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM ad_accounts", [])?;
            Ok(())
        })
    }

    fn create_ad_account(&self, id: AdAccountId, name: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO ad_accounts (id, name) VALUES (?1, ?2)",
                params![id, name],
            )?;
            Ok(())
        })
    }

    fn create_campaign(&self, id: CampaignId, ad_account_id: AdAccountId, name: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO campaigns (id, ad_account_id, name) VALUES (?1, ?2, ?3)",
                params![id, ad_account_id, name],
            )?;
            Ok(())
        })
    }

    fn create_ad(&self, id: AdId, campaign_id: CampaignId, name: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO ads (id, campaign_id, name) VALUES (?1, ?2, ?3)",
                params![id, campaign_id, name],
            )?;
            Ok(())
        })
    }

    fn create_metric(&self, metric: &NewMetric) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO metrics (name, ad_id, timestamp, value) VALUES (?1, ?2, ?3, ?4)",
                params![metric.name, metric.ad_id, metric.timestamp, metric.value],
            )?;
            Ok(())
        })
    }

    fn bulk_insert_metrics(&self, metrics: &[NewMetric]) -> Result<usize> {
        self.with_conn(|conn| {
            // One write transaction and one prepared statement for the whole batch.
            // IMMEDIATE takes the write lock up front so concurrent loaders wait on
            // the busy timeout instead of failing on lock upgrade.
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut inserted = 0;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO metrics (name, ad_id, timestamp, value) VALUES (?1, ?2, ?3, ?4)",
                )?;
                for metric in metrics {
                    inserted += stmt.execute(params![
                        metric.name,
                        metric.ad_id,
                        metric.timestamp,
                        metric.value
                    ])?;
                }
            }
            tx.commit()?;

            Ok(inserted)
        })
    }

    fn get_ad_accounts(&self) -> Result<Vec<AdAccount>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached("SELECT id, name FROM ad_accounts ORDER BY id")?;

            let accounts = stmt
                .query_map([], |row| {
                    Ok(AdAccount {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(accounts)
        })
    }

    fn get_campaigns_for_ad_account(&self, ad_account_id: AdAccountId) -> Result<Vec<Campaign>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, ad_account_id, name
                 FROM campaigns
                 WHERE ad_account_id = ?1
                 ORDER BY id",
            )?;

            let campaigns = stmt
                .query_map([ad_account_id], |row| {
                    Ok(Campaign {
                        id: row.get(0)?,
                        ad_account_id: row.get(1)?,
                        name: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(campaigns)
        })
    }

    fn get_ads_for_campaign(&self, campaign_id: CampaignId) -> Result<Vec<Ad>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, campaign_id, name
                 FROM ads
                 WHERE campaign_id = ?1
                 ORDER BY id",
            )?;

            let ads = stmt
                .query_map([campaign_id], |row| {
                    Ok(Ad {
                        id: row.get(0)?,
                        campaign_id: row.get(1)?,
                        name: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(ads)
        })
    }

    fn aggregate_metrics_for_campaign(&self, campaign_id: CampaignId) -> Result<CampaignTotal> {
        self.with_conn(|conn| {
            let total_value: f64 = conn.query_row(
                "SELECT COALESCE(SUM(m.value), 0.0)
                 FROM metrics m
                 JOIN ads a ON a.id = m.ad_id
                 WHERE a.campaign_id = ?1",
                [campaign_id],
                |row| row.get(0),
            )?;

            Ok(CampaignTotal { total_value })
        })
    }

    fn count_metrics(&self) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row("SELECT COUNT(*) FROM metrics", [], |row| row.get(0))?;
            Ok(count)
        })
    }

    fn count_metrics_for_ad(&self, ad_id: AdId) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM metrics WHERE ad_id = ?1",
                [ad_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    fn sum_metrics_for_ad(&self, ad_id: AdId) -> Result<f64> {
        self.with_conn(|conn| {
            let sum = conn.query_row(
                "SELECT COALESCE(SUM(value), 0.0) FROM metrics WHERE ad_id = ?1",
                [ad_id],
                |row| row.get(0),
            )?;
            Ok(sum)
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_temp_store() -> (TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("metrics.db")).unwrap();
        (dir, store)
    }

    fn metric(ad_id: AdId, timestamp: i64, value: f64) -> NewMetric {
        NewMetric {
            name: "Metric test".to_string(),
            ad_id,
            timestamp,
            value,
        }
    }

    #[test]
    fn test_count_metrics_for_ad() {
        let (_dir, store) = open_temp_store();

        store.create_ad_account(777, "777").unwrap();
        store.create_campaign(777, 777, "777").unwrap();
        store.create_ad(777, 777, "777").unwrap();
        store.create_metric(&metric(777, 1_700_000_000, 1.0)).unwrap();

        assert_eq!(store.count_metrics_for_ad(777).unwrap(), 1);
        assert_eq!(store.count_metrics_for_ad(778).unwrap(), 0);
    }

    #[test]
    fn test_create_campaign_with_missing_account_fails() {
        let (_dir, store) = open_temp_store();

        let err = store.create_campaign(1, 42, "orphan").unwrap_err();
        assert!(err.is_constraint_violation(), "unexpected error: {err}");
    }

    #[test]
    fn test_create_ad_with_missing_campaign_fails() {
        let (_dir, store) = open_temp_store();
        store.create_ad_account(0, "AdAccount 0").unwrap();

        let err = store.create_ad(0, 9, "orphan").unwrap_err();
        assert!(err.is_constraint_violation(), "unexpected error: {err}");
    }

    #[test]
    fn test_bulk_insert_returns_row_count() {
        let (_dir, store) = open_temp_store();
        store.create_ad_account(0, "AdAccount 0").unwrap();
        store.create_campaign(0, 0, "Campaign 0").unwrap();
        store.create_ad(0, 0, "Ad 0").unwrap();

        let batch: Vec<NewMetric> = (0..500).map(|day| metric(0, day * 86_400, 2.5)).collect();
        let inserted = store.bulk_insert_metrics(&batch).unwrap();

        assert_eq!(inserted, 500);
        assert_eq!(store.count_metrics().unwrap(), 500);
        assert_eq!(store.sum_metrics_for_ad(0).unwrap(), 1250.0);
    }

    #[test]
    fn test_bulk_insert_is_atomic_on_failure() {
        let (_dir, store) = open_temp_store();
        store.create_ad_account(0, "AdAccount 0").unwrap();
        store.create_campaign(0, 0, "Campaign 0").unwrap();
        store.create_ad(0, 0, "Ad 0").unwrap();

        // Second row points at an ad that does not exist
        let batch = vec![metric(0, 0, 1.0), metric(5, 0, 1.0)];
        assert!(store.bulk_insert_metrics(&batch).is_err());
        assert_eq!(store.count_metrics().unwrap(), 0);
    }

    #[test]
    fn test_aggregate_empty_campaign_is_zero() {
        let (_dir, store) = open_temp_store();
        store.create_ad_account(0, "AdAccount 0").unwrap();
        store.create_campaign(0, 0, "Campaign 0").unwrap();
        store.create_campaign(1, 0, "Campaign 1").unwrap();
        store.create_ad(0, 1, "Ad 0").unwrap();

        // Campaign 0 has no ads, campaign 1 has an ad without metrics
        assert_eq!(store.aggregate_metrics_for_campaign(0).unwrap().total_value, 0.0);
        assert_eq!(store.aggregate_metrics_for_campaign(1).unwrap().total_value, 0.0);
        // Unknown campaign is not an error either
        assert_eq!(store.aggregate_metrics_for_campaign(99).unwrap().total_value, 0.0);
    }

    #[test]
    fn test_hierarchy_reads_are_ordered_by_id() {
        let (_dir, store) = open_temp_store();
        for id in [2, 0, 1] {
            store.create_ad_account(id, &format!("AdAccount {id}")).unwrap();
        }
        for id in [5, 3, 1] {
            store.create_campaign(id, 1, &format!("Campaign {id}")).unwrap();
        }

        let accounts: Vec<_> = store.get_ad_accounts().unwrap().into_iter().map(|a| a.id).collect();
        assert_eq!(accounts, vec![0, 1, 2]);

        let campaigns = store.get_campaigns_for_ad_account(1).unwrap();
        let ids: Vec<_> = campaigns.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 3, 5]);
        assert!(campaigns.iter().all(|c| c.ad_account_id == 1));
        assert!(store.get_campaigns_for_ad_account(0).unwrap().is_empty());
    }

    #[test]
    fn test_get_ads_for_campaign() {
        let (_dir, store) = open_temp_store();
        store.create_ad_account(0, "AdAccount 0").unwrap();
        store.create_campaign(0, 0, "Campaign 0").unwrap();
        store.create_campaign(1, 0, "Campaign 1").unwrap();
        for id in [4, 2, 3] {
            store.create_ad(id, id % 2, &format!("Ad {id}")).unwrap();
        }

        let ads = store.get_ads_for_campaign(0).unwrap();
        assert_eq!(
            ads,
            vec![
                Ad { id: 2, campaign_id: 0, name: "Ad 2".to_string() },
                Ad { id: 4, campaign_id: 0, name: "Ad 4".to_string() },
            ]
        );
        assert_eq!(store.get_ads_for_campaign(1).unwrap().len(), 1);
        assert!(store.get_ads_for_campaign(7).unwrap().is_empty());
    }

    #[test]
    fn test_pool_reuses_connection_after_error() {
        let (_dir, store) = open_temp_store();

        assert!(store.create_campaign(1, 42, "orphan").is_err());
        // Failed call still returned its connection
        assert_eq!(store.idle.lock().unwrap().len(), 1);
        store.create_ad_account(0, "AdAccount 0").unwrap();
        assert_eq!(store.idle.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_clear_child_to_parent_twice() {
        let (_dir, store) = open_temp_store();
        store.create_ad_account(0, "AdAccount 0").unwrap();
        store.create_campaign(0, 0, "Campaign 0").unwrap();

        for _ in 0..2 {
            store.clear_metrics().unwrap();
            store.clear_ads().unwrap();
            store.clear_campaigns().unwrap();
            store.clear_ad_accounts().unwrap();
        }

        assert!(store.get_ad_accounts().unwrap().is_empty());
    }

    #[test]
    fn test_clear_parent_before_child_is_rejected() {
        let (_dir, store) = open_temp_store();
        store.create_ad_account(0, "AdAccount 0").unwrap();
        store.create_campaign(0, 0, "Campaign 0").unwrap();

        let err = store.clear_ad_accounts().unwrap_err();
        assert!(err.is_constraint_violation(), "unexpected error: {err}");
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.create_ad_account(3, "AdAccount 3").unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.path(), path.as_path());
        assert_eq!(store.get_ad_accounts().unwrap().len(), 1);
    }
}
