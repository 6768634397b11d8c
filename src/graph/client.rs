//! Graph API client: account metadata lookup and cursor-paginated insights.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::RawAdRecord;
use crate::ingest::window::DateWindow;

const INSIGHT_FIELDS: &str = "date_start,campaign_id,account_id,campaign_name,objective,\
adset_id,adset_name,ad_id,ad_name,actions";

pub const UNKNOWN_ACCOUNT: &str = "Unknown Account";

/// How a window fetch ended: the cursor chain ran out, or a request failed
/// mid-pagination. Callers get the records gathered either way and decide
/// what a failure means for the run.
#[derive(Debug)]
pub enum FetchEnd {
    Exhausted,
    Failed(anyhow::Error),
}

#[derive(Debug)]
pub struct WindowFetch {
    pub records: Vec<RawAdRecord>,
    pub end: FetchEnd,
}

impl WindowFetch {
    pub fn is_complete(&self) -> bool {
        matches!(self.end, FetchEnd::Exhausted)
    }
}

#[derive(Debug, Deserialize)]
struct InsightsPage {
    #[serde(default)]
    data: Vec<RawAdRecord>,
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    next: Option<String>,
}

#[derive(Clone)]
pub struct GraphClient {
    client: Client,
    base_url: String,
    access_token: String,
}

impl GraphClient {
    pub fn new(base_url: &str, access_token: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        })
    }

    /// Display name of the ad account; falls back to a placeholder on any
    /// failure rather than erroring the run.
    pub async fn fetch_account_name(&self, account_id: &str) -> String {
        match self.account_name(account_id).await {
            Ok(name) => name,
            Err(err) => {
                warn!(account_id, error = %err, "account lookup failed; using placeholder");
                UNKNOWN_ACCOUNT.to_string()
            }
        }
    }

    async fn account_name(&self, account_id: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct AccountMeta {
            name: Option<String>,
        }

        let url = format!("{}/{}", self.base_url, account_id);
        let meta: AccountMeta = self
            .client
            .get(&url)
            .query(&[
                ("access_token", self.access_token.as_str()),
                ("fields", "name"),
            ])
            .send()
            .await
            .context("account metadata request failed")?
            .error_for_status()
            .context("account metadata request returned an error status")?
            .json()
            .await
            .context("failed to decode account metadata")?;
        Ok(meta.name.unwrap_or_else(|| UNKNOWN_ACCOUNT.to_string()))
    }

    /// Ad-level daily insights for one window, following `paging.next`
    /// cursors until absent. A mid-pagination failure ends the fetch with
    /// `FetchEnd::Failed`, keeping whatever records already arrived.
    pub async fn fetch_daily_records(&self, account_id: &str, window: &DateWindow) -> WindowFetch {
        let first_url = format!("{}/{}/insights", self.base_url, account_id);
        let time_range = serde_json::json!({
            "since": window.since.format("%Y-%m-%d").to_string(),
            "until": window.until.format("%Y-%m-%d").to_string(),
        })
        .to_string();

        let mut records: Vec<RawAdRecord> = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0u32;
        loop {
            // The first request carries the query; `paging.next` URLs arrive
            // with the cursor and all parameters already baked in.
            let request = match &cursor {
                None => self.client.get(&first_url).query(&[
                    ("access_token", self.access_token.as_str()),
                    ("fields", INSIGHT_FIELDS),
                    ("level", "ad"),
                    ("time_range", time_range.as_str()),
                    ("time_increment", "1"),
                ]),
                Some(next) => self.client.get(next.as_str()),
            };

            let page: InsightsPage = match Self::fetch_page(request).await {
                Ok(page) => page,
                Err(err) => {
                    return WindowFetch {
                        records,
                        end: FetchEnd::Failed(err.context(format!(
                            "insights pagination failed on page {}",
                            pages + 1
                        ))),
                    };
                }
            };
            pages += 1;
            records.extend(page.data);

            match page.paging.and_then(|p| p.next) {
                Some(next) => cursor = Some(next),
                None => {
                    debug!(
                        since = %window.since,
                        until = %window.until,
                        pages,
                        records = records.len(),
                        "insights window exhausted"
                    );
                    return WindowFetch {
                        records,
                        end: FetchEnd::Exhausted,
                    };
                }
            }
        }
    }

    async fn fetch_page(request: reqwest::RequestBuilder) -> Result<InsightsPage> {
        request
            .send()
            .await
            .context("insights request failed")?
            .error_for_status()
            .context("insights request returned an error status")?
            .json()
            .await
            .context("failed to decode insights page")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::window::DateWindow;
    use chrono::NaiveDate;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn window() -> DateWindow {
        DateWindow {
            since: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            until: NaiveDate::from_ymd_opt(2024, 1, 7).unwrap(),
        }
    }

    fn record(ad_id: &str) -> serde_json::Value {
        json!({
            "date_start": "2024-01-01",
            "campaign_id": "c1",
            "account_id": "act_1",
            "adset_id": "as1",
            "ad_id": ad_id,
            "actions": [{"action_type": "purchase", "value": "1"}]
        })
    }

    #[tokio::test]
    async fn follows_next_cursor_across_pages() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/act_1/insights"))
            .and(query_param("level", "ad"))
            .and(query_param("time_increment", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [record("ad1"), record("ad2")],
                "paging": {"next": format!("{}/page2", server.uri())}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [record("ad3")]
            })))
            .mount(&server)
            .await;

        let client = GraphClient::new(&server.uri(), "tok").unwrap();
        let fetch = client.fetch_daily_records("act_1", &window()).await;

        assert!(fetch.is_complete());
        let ids: Vec<_> = fetch
            .records
            .iter()
            .map(|r| r.ad_id.as_deref().unwrap())
            .collect();
        assert_eq!(ids, ["ad1", "ad2", "ad3"]);
    }

    #[tokio::test]
    async fn mid_pagination_failure_keeps_partial_records() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/act_1/insights"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [record("ad1"), record("ad2")],
                "paging": {"next": format!("{}/page2", server.uri())}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/page2"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = GraphClient::new(&server.uri(), "tok").unwrap();
        let fetch = client.fetch_daily_records("act_1", &window()).await;

        assert_eq!(fetch.records.len(), 2);
        assert!(matches!(fetch.end, FetchEnd::Failed(_)));
    }

    #[tokio::test]
    async fn first_request_failure_yields_no_records() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/act_1/insights"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = GraphClient::new(&server.uri(), "bad-token").unwrap();
        let fetch = client.fetch_daily_records("act_1", &window()).await;

        assert!(fetch.records.is_empty());
        assert!(matches!(fetch.end, FetchEnd::Failed(_)));
    }

    #[tokio::test]
    async fn account_name_falls_back_to_placeholder() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/act_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "Acme Retail"})))
            .mount(&server)
            .await;

        let client = GraphClient::new(&server.uri(), "tok").unwrap();
        assert_eq!(client.fetch_account_name("act_1").await, "Acme Retail");
        // Unknown id: the mock returns 404 and the caller gets the placeholder.
        assert_eq!(client.fetch_account_name("act_2").await, UNKNOWN_ACCOUNT);
    }
}
