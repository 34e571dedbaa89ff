use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{de, Deserialize, Deserializer, Serialize};

use crate::errors::{AppError, AppResult};

const USAGE_PATH: &str = "/2/usage/tweets";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageSnapshot {
    pub consumed: u64,
    pub total: u64,
}

impl UsageSnapshot {
    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.consumed)
    }
}

#[async_trait]
pub trait UsageSource: Send + Sync {
    async fn get_usage(&self) -> AppResult<UsageSnapshot>;
}

pub struct HttpUsageClient {
    http: reqwest::Client,
    base_url: String,
    bearer_token: SecretString,
}

impl HttpUsageClient {
    pub fn new(base_url: impl Into<String>, bearer_token: SecretString) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("geo-harvest/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            bearer_token,
        })
    }
}

#[async_trait]
impl UsageSource for HttpUsageClient {
    async fn get_usage(&self) -> AppResult<UsageSnapshot> {
        #[derive(Deserialize)]
        struct Response {
            data: Option<UsageData>,
        }

        #[derive(Deserialize)]
        struct UsageData {
            #[serde(deserialize_with = "count_from_any")]
            project_usage: u64,
            #[serde(deserialize_with = "count_from_any")]
            project_cap: u64,
        }

        let url = format!("{}{}", self.base_url, USAGE_PATH);
        let response = self
            .http
            .get(&url)
            .bearer_auth(self.bearer_token.expose_secret())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::BudgetQuery(format!("status {status}: {body}")));
        }

        let parsed: Response = response.json().await?;
        let data = parsed
            .data
            .ok_or_else(|| AppError::BudgetQuery("usage response missing data".into()))?;
        Ok(UsageSnapshot {
            consumed: data.project_usage,
            total: data.project_cap,
        })
    }
}

// The usage endpoint reports counts as numeric strings.
fn count_from_any<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Count {
        Number(u64),
        Text(String),
    }

    match Count::deserialize(deserializer)? {
        Count::Number(value) => Ok(value),
        Count::Text(text) => text.trim().parse().map_err(de::Error::custom),
    }
}
