//! Startup configuration. Env is read exactly once here; every component
//! receives the values it needs at construction instead of reaching into
//! process-wide state.

use anyhow::{Context, Result};

use crate::util::env as env_util;

pub const DEFAULT_GRAPH_API_BASE: &str = "https://graph.facebook.com/v21.0";
pub const DEFAULT_OAUTH_TOKEN_URL: &str = "https://api.example.com/oauth/token";

/// Everything the sync pipeline needs for one run.
#[derive(Debug, Clone)]
pub struct Config {
    pub access_token: String,
    pub database_url: String,
    pub graph_api_base: String,
    /// Optional default ad account id (AD_ACCOUNT_ID).
    pub account_id: Option<String>,
    pub db_max_connections: u32,
}

impl Config {
    /// Load the sync configuration. A missing access token or database URL is
    /// a fatal startup error.
    pub fn load(db_url_override: Option<String>) -> Result<Self> {
        env_util::init_env();
        env_util::preflight_check(
            "adsync",
            &["ACCESS_TOKEN"],
            &["DATABASE_URL", "GRAPH_API_BASE", "AD_ACCOUNT_ID"],
        )?;

        let access_token =
            env_util::env_req("ACCESS_TOKEN").context("ACCESS_TOKEN is required for metric sync")?;
        let database_url = match db_url_override {
            Some(url) => url,
            None => env_util::db_url().context("no database URL configured")?,
        };

        Ok(Self {
            access_token,
            database_url,
            graph_api_base: env_util::env_opt("GRAPH_API_BASE")
                .unwrap_or_else(|| DEFAULT_GRAPH_API_BASE.to_string()),
            account_id: env_util::env_opt("AD_ACCOUNT_ID"),
            db_max_connections: env_util::env_parse("DB_MAX_CONNS", 5u32),
        })
    }
}

/// Credentials for the OAuth refresh-token exchange.
#[derive(Debug, Clone)]
pub struct OauthCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

impl OauthCredentials {
    pub fn load() -> Result<(Self, String)> {
        env_util::init_env();
        let creds = Self {
            client_id: env_util::env_req("CLIENT_ID")
                .context("CLIENT_ID is required for token refresh")?,
            client_secret: env_util::env_req("CLIENT_SECRET")
                .context("CLIENT_SECRET is required for token refresh")?,
            refresh_token: env_util::env_req("REFRESH_TOKEN")
                .context("REFRESH_TOKEN is required for token refresh")?,
        };
        let token_url = env_util::env_opt("OAUTH_TOKEN_URL")
            .unwrap_or_else(|| DEFAULT_OAUTH_TOKEN_URL.to_string());
        Ok((creds, token_url))
    }
}
