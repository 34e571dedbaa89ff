use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::interval::Interval;

pub const DEFAULT_QUERY: &str = "-is:retweet lang:en has:geo place_country:US";
const USER_FIELDS: &[&str] = &["username", "public_metrics", "description", "location"];
const TWEET_FIELDS: &[&str] = &["created_at", "geo", "public_metrics", "text"];
const PLACE_FIELDS: &[&str] = &["id", "geo", "name", "full_name"];
const EXPANSIONS: &[&str] = &["author_id", "geo.place_id"];
const SEARCH_PATH: &str = "/2/tweets/search/all";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_metrics: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// Embedded geo reference on a post. The place id is optional because the
// API sometimes sends exact coordinates without a place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostGeo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo: Option<PostGeo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_metrics: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Includes {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub places: Vec<Place>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PageMeta {
    #[serde(default)]
    pub result_count: u64,
    #[serde(default)]
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SearchPage {
    #[serde(default)]
    pub data: Vec<Post>,
    #[serde(default)]
    pub includes: Includes,
    #[serde(default)]
    pub meta: PageMeta,
}

#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub query: String,
    pub interval: Interval,
    pub max_results: u32,
}

impl SearchQuery {
    pub fn new(interval: Interval, max_results: u32) -> Self {
        Self {
            query: DEFAULT_QUERY.to_string(),
            interval,
            max_results,
        }
    }

    pub fn to_params(&self, next_token: Option<&str>) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("query", self.query.clone()),
            ("start_time", format_timestamp(self.interval.start())),
            ("end_time", format_timestamp(self.interval.end())),
            ("max_results", self.max_results.to_string()),
            ("expansions", EXPANSIONS.join(",")),
            ("tweet.fields", TWEET_FIELDS.join(",")),
            ("user.fields", USER_FIELDS.join(",")),
            ("place.fields", PLACE_FIELDS.join(",")),
        ];
        if let Some(token) = next_token {
            params.push(("next_token", token.to_string()));
        }
        params
    }
}

fn format_timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[async_trait]
pub trait SearchApi: Send + Sync {
    async fn search_page(
        &self,
        query: &SearchQuery,
        next_token: Option<&str>,
    ) -> AppResult<SearchPage>;
}

pub struct HttpSearchClient {
    http: reqwest::Client,
    base_url: String,
    bearer_token: SecretString,
}

impl HttpSearchClient {
    pub fn new(base_url: impl Into<String>, bearer_token: SecretString) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("geo-harvest/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            bearer_token,
        })
    }
}

#[async_trait]
impl SearchApi for HttpSearchClient {
    async fn search_page(
        &self,
        query: &SearchQuery,
        next_token: Option<&str>,
    ) -> AppResult<SearchPage> {
        let url = format!("{}{}", self.base_url, SEARCH_PATH);
        let response = self
            .http
            .get(&url)
            .bearer_auth(self.bearer_token.expose_secret())
            .query(&query.to_params(next_token))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let page: SearchPage = response.json().await?;
        debug!(
            result_count = page.meta.result_count,
            has_next = page.meta.next_token.is_some(),
            "search page received"
        );
        Ok(page)
    }
}
