//! OAuth refresh-token exchange. On success the new access token is written
//! back into the env file in place; every other line is preserved verbatim.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::config::OauthCredentials;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

pub struct TokenRefresher {
    client: Client,
    token_url: String,
    credentials: OauthCredentials,
    env_path: PathBuf,
}

impl TokenRefresher {
    pub fn new(token_url: &str, credentials: OauthCredentials, env_path: PathBuf) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            token_url: token_url.to_string(),
            credentials,
            env_path,
        })
    }

    /// Exchange the refresh token for a new access token and persist it.
    /// On any failure the stored token is left unchanged.
    pub async fn refresh(&self) -> Result<String> {
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("refresh_token", self.credentials.refresh_token.as_str()),
        ];

        let response: TokenResponse = self
            .client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .context("token refresh request failed")?
            .error_for_status()
            .context("token endpoint returned an error status")?
            .json()
            .await
            .context("failed to decode token response")?;

        let token = response
            .access_token
            .filter(|t| !t.is_empty())
            .context("token response did not contain an access token")?;

        self.persist(&token)
            .context("failed to rewrite stored access token")?;
        info!(env_file = %self.env_path.display(), "access token refreshed");
        Ok(token)
    }

    fn persist(&self, token: &str) -> Result<()> {
        let contents = fs::read_to_string(&self.env_path)
            .with_context(|| format!("failed to read {}", self.env_path.display()))?;
        fs::write(&self.env_path, rewrite_access_token(&contents, token))
            .with_context(|| format!("failed to write {}", self.env_path.display()))?;
        Ok(())
    }
}

/// Replace the `ACCESS_TOKEN=` line, keeping all other lines as they are.
/// Appends the line when the file never had one.
pub fn rewrite_access_token(contents: &str, token: &str) -> String {
    let mut out = String::with_capacity(contents.len() + token.len());
    let mut replaced = false;
    for line in contents.lines() {
        if line.starts_with("ACCESS_TOKEN=") {
            out.push_str("ACCESS_TOKEN=");
            out.push_str(token);
            replaced = true;
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }
    if !replaced {
        out.push_str("ACCESS_TOKEN=");
        out.push_str(token);
        out.push('\n');
    }
    out
}
