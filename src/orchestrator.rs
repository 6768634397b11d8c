//! Drives one sync run: a single linear walk over 7-day windows, fetching
//! and upserting each window in turn. No concurrency; one writer.

use chrono::NaiveDate;
use tracing::{error, info, warn};

use crate::graph::client::{FetchEnd, GraphClient};
use crate::ingest::window::{partition, DateWindow};
use crate::ingest::{BatchProcessor, MetricSink, RunSummary};

/// Aggregated result of one run. `failed_windows` lists windows whose fetch
/// ended in an error (their partial records were still processed).
#[derive(Debug, Default)]
pub struct RunReport {
    pub summary: RunSummary,
    pub windows: usize,
    pub failed_windows: Vec<DateWindow>,
}

pub struct SyncJob<S> {
    graph: GraphClient,
    processor: BatchProcessor<S>,
    /// Replicates the legacy behavior of treating a mid-pagination failure
    /// as ordinary end-of-data. Off by default; failures are surfaced.
    lenient_fetch: bool,
}

impl<S: MetricSink> SyncJob<S> {
    pub fn new(graph: GraphClient, sink: S, lenient_fetch: bool) -> Self {
        Self {
            graph,
            processor: BatchProcessor::new(sink),
            lenient_fetch,
        }
    }

    pub async fn run(&self, account_id: &str, start: NaiveDate, end: NaiveDate) -> RunReport {
        let account_name = self.graph.fetch_account_name(account_id).await;
        info!(account_id, account_name, %start, %end, "starting metrics sync");

        let mut report = RunReport::default();
        for window in partition(start, end) {
            info!(since = %window.since, until = %window.until, "processing window");
            let fetch = self.graph.fetch_daily_records(account_id, &window).await;

            match &fetch.end {
                FetchEnd::Exhausted => {}
                FetchEnd::Failed(err) => {
                    if self.lenient_fetch {
                        warn!(
                            since = %window.since,
                            until = %window.until,
                            records = fetch.records.len(),
                            error = %err,
                            "window fetch truncated; continuing with partial data (lenient mode)"
                        );
                    } else {
                        error!(
                            since = %window.since,
                            until = %window.until,
                            records = fetch.records.len(),
                            error = %err,
                            "window fetch failed; partial data only"
                        );
                        report.failed_windows.push(window);
                    }
                }
            }

            let summary = self.processor.process(&fetch.records, &account_name).await;
            info!(
                since = %window.since,
                until = %window.until,
                added = summary.added,
                overwritten = summary.overwritten,
                errored = summary.errored,
                "window complete"
            );
            report.summary.merge(summary);
            report.windows += 1;
        }

        info!(
            windows = report.windows,
            failed_windows = report.failed_windows.len(),
            added = report.summary.added,
            overwritten = report.summary.overwritten,
            errored = report.summary.errored,
            "sync complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::client::GraphClient;
    use crate::ingest::MetricSink;
    use crate::store::{MetricKey, MetricRow, UpsertOutcome};
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use wiremock::matchers::{method, path, query_param_contains};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct MemSink {
        rows: Mutex<HashMap<MetricKey, MetricRow>>,
    }

    #[async_trait]
    impl MetricSink for MemSink {
        async fn upsert(&self, row: &MetricRow) -> Result<UpsertOutcome> {
            let mut rows = self.rows.lock().unwrap();
            Ok(match rows.insert(row.key(), row.clone()) {
                Some(_) => UpsertOutcome::Overwritten,
                None => UpsertOutcome::Added,
            })
        }
    }

    fn record(date: &str, ad_id: &str) -> serde_json::Value {
        json!({
            "date_start": date,
            "campaign_id": "c1",
            "account_id": "act_1",
            "adset_id": "as1",
            "ad_id": ad_id,
            "actions": [{"action_type": "purchase", "value": "1"}]
        })
    }

    #[tokio::test]
    async fn run_walks_every_window_and_aggregates() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/act_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "Acme"})))
            .mount(&server)
            .await;
        // First 7-day window returns one record, second (clipped) window two.
        Mock::given(method("GET"))
            .and(path("/act_1/insights"))
            .and(query_param_contains("time_range", "2024-01-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [record("2024-01-02", "ad1")]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/act_1/insights"))
            .and(query_param_contains("time_range", "2024-01-08"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [record("2024-01-08", "ad1"), record("2024-01-09", "ad2")]
            })))
            .mount(&server)
            .await;

        let graph = GraphClient::new(&server.uri(), "tok").unwrap();
        let sink = MemSink::default();
        let job = SyncJob::new(graph, &sink, false);

        let report = job
            .run(
                "act_1",
                "2024-01-01".parse().unwrap(),
                "2024-01-10".parse().unwrap(),
            )
            .await;

        assert_eq!(report.windows, 2);
        assert!(report.failed_windows.is_empty());
        assert_eq!(report.summary.added, 3);
        assert_eq!(report.summary.errored, 0);
        assert_eq!(sink.rows.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn failed_window_is_recorded_and_run_continues() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/act_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "Acme"})))
            .mount(&server)
            .await;
        // First window fails outright; second succeeds.
        Mock::given(method("GET"))
            .and(path("/act_1/insights"))
            .and(query_param_contains("time_range", "2024-01-01"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/act_1/insights"))
            .and(query_param_contains("time_range", "2024-01-08"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [record("2024-01-08", "ad1")]
            })))
            .mount(&server)
            .await;

        let graph = GraphClient::new(&server.uri(), "tok").unwrap();
        let sink = MemSink::default();
        let job = SyncJob::new(graph, &sink, false);

        let report = job
            .run(
                "act_1",
                "2024-01-01".parse().unwrap(),
                "2024-01-10".parse().unwrap(),
            )
            .await;

        assert_eq!(report.windows, 2);
        assert_eq!(report.failed_windows.len(), 1);
        assert_eq!(report.failed_windows[0].since, "2024-01-01".parse().unwrap());
        assert_eq!(report.summary.added, 1);
    }

    #[tokio::test]
    async fn lenient_mode_hides_fetch_failures_from_the_report() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/act_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "Acme"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/act_1/insights"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let graph = GraphClient::new(&server.uri(), "tok").unwrap();
        let sink = MemSink::default();
        let job = SyncJob::new(graph, &sink, true);

        let report = job
            .run(
                "act_1",
                "2024-01-01".parse().unwrap(),
                "2024-01-03".parse().unwrap(),
            )
            .await;

        assert_eq!(report.windows, 1);
        assert!(report.failed_windows.is_empty());
        assert_eq!(report.summary, RunSummary::default());
    }
}
