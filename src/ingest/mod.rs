//! Flattening and upsert routing: raw insights records become individual
//! metric rows, each routed through the store with per-row and per-record
//! error containment.

pub mod window;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::warn;

use crate::graph::{coerce_metric_value, RawAdRecord};
use crate::store::{MetricRow, MetricStore, UpsertOutcome};

/// Destination for metric rows. Seam between the pipeline and Postgres so the
/// routing logic is testable without a live database.
#[async_trait]
pub trait MetricSink: Send + Sync {
    async fn upsert(&self, row: &MetricRow) -> Result<UpsertOutcome>;
}

#[async_trait]
impl<T: MetricSink + ?Sized> MetricSink for &T {
    async fn upsert(&self, row: &MetricRow) -> Result<UpsertOutcome> {
        (**self).upsert(row).await
    }
}

#[async_trait]
impl MetricSink for MetricStore {
    async fn upsert(&self, row: &MetricRow) -> Result<UpsertOutcome> {
        MetricStore::upsert(self, row).await
    }
}

/// Per-row result after error absorption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Added,
    Overwritten,
    Errored,
}

/// Tri-count accumulated over a batch or a whole run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub added: u64,
    pub overwritten: u64,
    pub errored: u64,
}

impl RunSummary {
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Added => self.added += 1,
            Outcome::Overwritten => self.overwritten += 1,
            Outcome::Errored => self.errored += 1,
        }
    }

    pub fn merge(&mut self, other: RunSummary) {
        self.added += other.added;
        self.overwritten += other.overwritten;
        self.errored += other.errored;
    }

    pub fn total(&self) -> u64 {
        self.added + self.overwritten + self.errored
    }
}

/// Routes one row into the sink. A store failure is absorbed: the row is
/// dropped, the failure counted, processing continues with the next row.
pub struct Upserter<S> {
    sink: S,
}

impl<S: MetricSink> Upserter<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    pub async fn upsert(&self, row: &MetricRow) -> Outcome {
        match self.sink.upsert(row).await {
            Ok(UpsertOutcome::Added) => Outcome::Added,
            Ok(UpsertOutcome::Overwritten) => Outcome::Overwritten,
            Err(err) => {
                warn!(
                    date_start = %row.date_start,
                    ad_id = %row.ad_id,
                    metric_type = %row.metric_type,
                    error = %err,
                    "metric upsert failed; row dropped"
                );
                Outcome::Errored
            }
        }
    }
}

/// Flattens raw records and drives the upserter. A record that cannot be
/// flattened counts as exactly one error and never aborts the batch.
pub struct BatchProcessor<S> {
    upserter: Upserter<S>,
}

impl<S: MetricSink> BatchProcessor<S> {
    pub fn new(sink: S) -> Self {
        Self {
            upserter: Upserter::new(sink),
        }
    }

    pub async fn process(&self, records: &[RawAdRecord], account_name: &str) -> RunSummary {
        let mut summary = RunSummary::default();
        for record in records {
            match flatten_record(record, account_name) {
                Ok(rows) => {
                    for row in rows {
                        summary.record(self.upserter.upsert(&row).await);
                    }
                }
                Err(err) => {
                    warn!(
                        ad_id = record.ad_id.as_deref().unwrap_or("?"),
                        date_start = record.date_start.as_deref().unwrap_or("?"),
                        error = %err,
                        "record could not be flattened; skipped"
                    );
                    summary.record(Outcome::Errored);
                }
            }
        }
        summary
    }
}

/// Expand one raw record into metric rows, one per action entry. Key fields
/// are required; descriptive fields stay optional. A record with no actions
/// flattens to zero rows.
pub fn flatten_record(record: &RawAdRecord, account_name: &str) -> Result<Vec<MetricRow>> {
    let date_start: NaiveDate = record
        .date_start
        .as_deref()
        .context("record missing date_start")?
        .parse()
        .context("record has malformed date_start")?;
    let campaign_id = record
        .campaign_id
        .clone()
        .context("record missing campaign_id")?;
    let account_id = record
        .account_id
        .clone()
        .context("record missing account_id")?;
    let adset_id = record.adset_id.clone().context("record missing adset_id")?;
    let ad_id = record.ad_id.clone().context("record missing ad_id")?;

    let mut rows = Vec::with_capacity(record.actions.len());
    for action in &record.actions {
        let metric_type = action
            .action_type
            .clone()
            .context("action missing action_type")?;
        rows.push(MetricRow {
            account_name: account_name.to_string(),
            date_start,
            campaign_id: campaign_id.clone(),
            account_id: account_id.clone(),
            campaign_name: record.campaign_name.clone(),
            objective: record.objective.clone(),
            adset_id: adset_id.clone(),
            adset_name: record.adset_name.clone(),
            ad_id: ad_id.clone(),
            ad_name: record.ad_name.clone(),
            metric_type,
            metric_value: coerce_metric_value(action.value.as_ref()),
        });
    }
    Ok(rows)
}
