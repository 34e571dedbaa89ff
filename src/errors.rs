use std::io;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("search API error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("usage query failed: {0}")]
    BudgetQuery(String),
    #[error("window of {window} cannot hold an interval of {duration}")]
    InvalidWindow { window: Duration, duration: Duration },
    #[error("interval must end after it starts ({start} .. {end})")]
    InvalidInterval { start: DateTime<Utc>, end: DateTime<Utc> },
    #[error("can't fetch any posts, too little usage remaining ({remaining})")]
    InsufficientBudget { remaining: u64 },
    #[error("no candidate days to sample from")]
    NoCandidateDays,
    #[error("{0}")]
    Config(String),
}

impl AppError {
    pub fn is_throttled(&self) -> bool {
        matches!(self, AppError::Api { status: 429, .. })
    }
}
