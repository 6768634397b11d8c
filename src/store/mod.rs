//! Postgres persistence for flattened ad metric rows.

use anyhow::Result;
use chrono::NaiveDate;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::PgPool;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

/// One metric fact: a single action type for a single ad on a single day.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRow {
    pub account_name: String,
    pub date_start: NaiveDate,
    pub campaign_id: String,
    pub account_id: String,
    pub campaign_name: Option<String>,
    pub objective: Option<String>,
    pub adset_id: String,
    pub adset_name: Option<String>,
    pub ad_id: String,
    pub ad_name: Option<String>,
    pub metric_type: String,
    pub metric_value: i64,
}

/// Composite key uniquely identifying one metric fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricKey {
    pub date_start: NaiveDate,
    pub campaign_id: String,
    pub account_id: String,
    pub adset_id: String,
    pub ad_id: String,
    pub metric_type: String,
}

impl MetricRow {
    pub fn key(&self) -> MetricKey {
        MetricKey {
            date_start: self.date_start,
            campaign_id: self.campaign_id.clone(),
            account_id: self.account_id.clone(),
            adset_id: self.adset_id.clone(),
            ad_id: self.ad_id.clone(),
            metric_type: self.metric_type.clone(),
        }
    }
}

/// Result of a store-level upsert: did the row land fresh, or replace an
/// existing fact with the same composite key?
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Added,
    Overwritten,
}

#[derive(Clone)]
pub struct Db {
    pub pool: PgPool,
}

impl Db {
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let mut connect_options = PgConnectOptions::from_str(database_url)?;

        // Be explicit about TLS when the DSN asks for it.
        if database_url.contains("sslmode=require") && !database_url.contains("sslmode=disable") {
            connect_options = connect_options.ssl_mode(PgSslMode::Require);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(connect_options)
            .await?;
        info!("connected to db");
        Ok(Self { pool })
    }
}

const COMPOSITE_KEY_COLUMNS: &str =
    "date_start, campaign_id, account_id, adset_id, ad_id, metric_type";

/// Table access for `ad_metrics`. One row per composite key at any time; the
/// unique index created by `ensure_schema` backs the atomic upsert.
#[derive(Clone)]
pub struct MetricStore {
    db: Db,
}

impl MetricStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &PgPool {
        &self.db.pool
    }

    /// Idempotently create the metrics table and its composite-key index.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS ad_metrics (
                id BIGSERIAL PRIMARY KEY,
                account_name TEXT,
                date_start DATE NOT NULL,
                campaign_id TEXT NOT NULL,
                account_id TEXT NOT NULL,
                campaign_name TEXT,
                objective TEXT,
                adset_id TEXT NOT NULL,
                adset_name TEXT,
                ad_id TEXT NOT NULL,
                ad_name TEXT,
                metric_type TEXT NOT NULL,
                metric_value BIGINT NOT NULL DEFAULT 0,
                inserted_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        )
        .execute(&self.db.pool)
        .await?;
        sqlx::raw_sql(
            "CREATE UNIQUE INDEX IF NOT EXISTS ad_metrics_fact_key
             ON ad_metrics (date_start, campaign_id, account_id, adset_id, ad_id, metric_type)",
        )
        .execute(&self.db.pool)
        .await?;
        info!("ad_metrics schema ensured");
        Ok(())
    }

    /// True iff a row with the given composite key is present. A query error
    /// propagates; it must not read as "not a duplicate".
    pub async fn exists(&self, key: &MetricKey) -> Result<bool> {
        let found: bool = sqlx::query_scalar(&format!(
            "SELECT EXISTS (
                SELECT 1 FROM ad_metrics
                WHERE ({COMPOSITE_KEY_COLUMNS}) = ($1, $2, $3, $4, $5, $6)
            )"
        ))
        .persistent(false)
        .bind(key.date_start)
        .bind(&key.campaign_id)
        .bind(&key.account_id)
        .bind(&key.adset_id)
        .bind(&key.ad_id)
        .bind(&key.metric_type)
        .fetch_one(&self.db.pool)
        .await?;
        Ok(found)
    }

    /// Remove all rows matching the composite key (expected 0 or 1).
    pub async fn delete(&self, key: &MetricKey) -> Result<u64> {
        let result = sqlx::query(&format!(
            "DELETE FROM ad_metrics
             WHERE ({COMPOSITE_KEY_COLUMNS}) = ($1, $2, $3, $4, $5, $6)"
        ))
        .persistent(false)
        .bind(key.date_start)
        .bind(&key.campaign_id)
        .bind(&key.account_id)
        .bind(&key.adset_id)
        .bind(&key.ad_id)
        .bind(&key.metric_type)
        .execute(&self.db.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Append one row; identity and insertion timestamp come from the database.
    pub async fn insert(&self, row: &MetricRow) -> Result<()> {
        sqlx::query(
            "INSERT INTO ad_metrics
             (account_name, date_start, campaign_id, account_id, campaign_name,
              objective, adset_id, adset_name, ad_id, ad_name, metric_type, metric_value)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .persistent(false)
        .bind(&row.account_name)
        .bind(row.date_start)
        .bind(&row.campaign_id)
        .bind(&row.account_id)
        .bind(&row.campaign_name)
        .bind(&row.objective)
        .bind(&row.adset_id)
        .bind(&row.adset_name)
        .bind(&row.ad_id)
        .bind(&row.ad_name)
        .bind(&row.metric_type)
        .bind(row.metric_value)
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }

    /// Atomic insert-or-replace keyed on the composite key: one round-trip,
    /// no check/delete/insert race. `xmax = 0` distinguishes a fresh insert
    /// from a conflict-path replace.
    pub async fn upsert(&self, row: &MetricRow) -> Result<UpsertOutcome> {
        let inserted: bool = sqlx::query_scalar(
            "INSERT INTO ad_metrics
             (account_name, date_start, campaign_id, account_id, campaign_name,
              objective, adset_id, adset_name, ad_id, ad_name, metric_type, metric_value)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             ON CONFLICT (date_start, campaign_id, account_id, adset_id, ad_id, metric_type)
             DO UPDATE SET account_name = EXCLUDED.account_name,
                           campaign_name = EXCLUDED.campaign_name,
                           objective = EXCLUDED.objective,
                           adset_name = EXCLUDED.adset_name,
                           ad_name = EXCLUDED.ad_name,
                           metric_value = EXCLUDED.metric_value,
                           inserted_at = now()
             RETURNING (xmax = 0) AS inserted",
        )
        .persistent(false)
        .bind(&row.account_name)
        .bind(row.date_start)
        .bind(&row.campaign_id)
        .bind(&row.account_id)
        .bind(&row.campaign_name)
        .bind(&row.objective)
        .bind(&row.adset_id)
        .bind(&row.adset_name)
        .bind(&row.ad_id)
        .bind(&row.ad_name)
        .bind(&row.metric_type)
        .bind(row.metric_value)
        .fetch_one(&self.db.pool)
        .await?;
        Ok(if inserted {
            UpsertOutcome::Added
        } else {
            UpsertOutcome::Overwritten
        })
    }
}
