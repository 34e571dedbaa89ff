use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs, io};

use chrono::NaiveDate;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{AppError, AppResult};

const DEFAULT_API_BASE: &str = "https://api.twitter.com";
const DEFAULT_TARGET_RECORDS: u64 = 7_637_707;
const DEFAULT_TARGET_SLACK: u64 = 10_000;
const DEFAULT_CHANGEOVER_DATES: &[(i32, u32, u32)] = &[(2020, 11, 1), (2021, 11, 7)];
const MIN_PAGE_SIZE: u32 = 10;
const MAX_PAGE_SIZE: u32 = 500;
const MAX_INTERVAL_SECS: u64 = 56 * 86_400;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HarvestMode {
    Uniform,
    CatchUp,
}

impl HarvestMode {
    pub fn parse(value: &str) -> AppResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "uniform" => Ok(HarvestMode::Uniform),
            "catchup" | "catch-up" | "catch_up" => Ok(HarvestMode::CatchUp),
            _ => Err(AppError::Config(format!("invalid harvest mode: {value}"))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetPolicy {
    Fixed(u64),
    Budget,
}

impl TargetPolicy {
    pub fn resolve(&self, remaining: u64) -> u64 {
        match self {
            TargetPolicy::Fixed(count) => *count,
            TargetPolicy::Budget => remaining,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bearer_token: Option<SecretString>,
    pub api_base: String,
    pub output_path: PathBuf,
    pub mode: HarvestMode,
    pub summary_database: PathBuf,
    pub changeover_dates: Vec<NaiveDate>,
    pub target: TargetPolicy,
    pub target_slack: u64,
    pub interval_secs: u64,
    pub page_size: u32,
    pub page_limit: u32,
    pub page_delay_ms: u64,
    pub retry_attempts: u32,
    pub retry_backoff_secs: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub api_base: String,
    pub output_path: String,
    pub mode: HarvestMode,
    pub summary_database: String,
    pub changeover_dates: Vec<NaiveDate>,
    pub target: TargetPolicy,
    pub target_slack: u64,
    pub interval_secs: u64,
    pub page_size: u32,
    pub page_limit: u32,
    pub page_delay_ms: u64,
    pub retry_attempts: u32,
    pub retry_backoff_secs: u64,
    pub has_bearer_token: bool,
}

#[derive(Deserialize)]
struct CredentialsFile {
    bearer_token: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> AppResult<Self> {
        load_dotenv_if_applicable();
        let credentials_file = env::var("HARVEST_CREDENTIALS_FILE")
            .unwrap_or_else(|_| "config.json".to_string());
        Ok(Self {
            bearer_token: env::var("TWITTER_BEARER_TOKEN")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .or_else(|| read_credentials_file(Path::new(&credentials_file)))
                .map(SecretString::from),
            api_base: env::var("TWITTER_API_BASE")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
            output_path: env::var("HARVEST_OUTPUT_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("tweets.json")),
            mode: parse_mode(env::var("HARVEST_MODE").ok().as_deref())?,
            summary_database: env::var("HARVEST_SUMMARY_DB")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("tweet-summary.db")),
            changeover_dates: parse_dates(env::var("HARVEST_CHANGEOVER_DATES").ok().as_deref())?,
            target: parse_target(env::var("HARVEST_TARGET_RECORDS").ok().as_deref())?,
            target_slack: parse_u64("HARVEST_TARGET_SLACK", DEFAULT_TARGET_SLACK),
            interval_secs: parse_u64("HARVEST_INTERVAL_SECS", 300).clamp(1, MAX_INTERVAL_SECS),
            page_size: parse_u32("HARVEST_PAGE_SIZE", MAX_PAGE_SIZE)
                .clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE),
            page_limit: parse_u32("HARVEST_PAGE_LIMIT", 10).max(1),
            page_delay_ms: parse_u64("HARVEST_PAGE_DELAY_MS", 1_000),
            retry_attempts: parse_u32("HARVEST_RETRY_ATTEMPTS", 3).max(1),
            retry_backoff_secs: parse_u64("HARVEST_RETRY_BACKOFF_SECS", 10),
        })
    }

    pub fn require_bearer_token(&self) -> AppResult<SecretString> {
        self.bearer_token.clone().ok_or_else(|| {
            AppError::Config(
                "no bearer token: set TWITTER_BEARER_TOKEN or provide a credentials file".into(),
            )
        })
    }

    pub fn interval_duration(&self) -> chrono::Duration {
        // Anything longer than a whole window can never be placed inside one.
        let secs = self.interval_secs.clamp(1, MAX_INTERVAL_SECS);
        chrono::Duration::seconds(secs as i64)
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            api_base: self.api_base.clone(),
            output_path: self.output_path.to_string_lossy().to_string(),
            mode: self.mode,
            summary_database: self.summary_database.to_string_lossy().to_string(),
            changeover_dates: self.changeover_dates.clone(),
            target: self.target,
            target_slack: self.target_slack,
            interval_secs: self.interval_secs,
            page_size: self.page_size,
            page_limit: self.page_limit,
            page_delay_ms: self.page_delay_ms,
            retry_attempts: self.retry_attempts,
            retry_backoff_secs: self.retry_backoff_secs,
            has_bearer_token: self.bearer_token.is_some(),
        }
    }
}

fn read_credentials_file(path: &Path) -> Option<String> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
        Err(err) => {
            warn!(path = %path.display(), ?err, "unable to read credentials file");
            return None;
        }
    };
    match serde_json::from_str::<CredentialsFile>(&contents) {
        Ok(file) => file.bearer_token.filter(|v| !v.trim().is_empty()),
        Err(err) => {
            warn!(path = %path.display(), ?err, "failed to parse credentials file");
            None
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn default_changeover_dates() -> Vec<NaiveDate> {
    DEFAULT_CHANGEOVER_DATES
        .iter()
        .filter_map(|(y, m, d)| NaiveDate::from_ymd_opt(*y, *m, *d))
        .collect()
}

fn parse_dates(raw: Option<&str>) -> AppResult<Vec<NaiveDate>> {
    let Some(raw) = raw else {
        return Ok(default_changeover_dates());
    };
    let dates = raw
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| {
            NaiveDate::parse_from_str(v, "%Y-%m-%d")
                .map_err(|err| AppError::Config(format!("invalid changeover date {v}: {err}")))
        })
        .collect::<AppResult<Vec<_>>>()?;
    if dates.is_empty() {
        return Ok(default_changeover_dates());
    }
    Ok(dates)
}

fn parse_mode(raw: Option<&str>) -> AppResult<HarvestMode> {
    match raw.map(str::trim) {
        None | Some("") => Ok(HarvestMode::Uniform),
        Some(value) => HarvestMode::parse(value),
    }
}

fn parse_target(raw: Option<&str>) -> AppResult<TargetPolicy> {
    let value = match raw.map(str::trim) {
        None | Some("") => return Ok(TargetPolicy::Fixed(DEFAULT_TARGET_RECORDS)),
        Some(value) => value,
    };
    if value.eq_ignore_ascii_case("budget") {
        return Ok(TargetPolicy::Budget);
    }
    value.parse::<u64>().map(TargetPolicy::Fixed).map_err(|_| {
        AppError::Config(format!(
            "invalid HARVEST_TARGET_RECORDS: {value} (expected a count or \"budget\")"
        ))
    })
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
}
