mod config;
mod errors;
mod fetcher;
mod interval;
mod pacing;
mod retry;
mod sampler;
mod scheduler;
mod search;
mod summary;
mod usage;
mod writer;

use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use config::{AppConfig, HarvestMode, PublicAppConfig, TargetPolicy};
pub use errors::{AppError, AppResult};
pub use fetcher::{join_page, FetchBatch, Fetcher, JoinedRecord, PageJoin, RecordIssue};
pub use interval::{pick_random_sub_interval, Interval};
pub use pacing::RequestPacer;
pub use retry::RetryPolicy;
pub use sampler::{
    accepted_threshold, build_buckets, candidate_days, shortage_total, DayBucket,
    SamplingDistribution,
};
pub use scheduler::{IntervalSelector, RunReport, SamplingMode, Scheduler};
pub use search::{
    HttpSearchClient, Includes, PageMeta, Place, Post, PostGeo, SearchApi, SearchPage,
    SearchQuery, User,
};
pub use summary::SummaryStore;
pub use usage::{HttpUsageClient, UsageSnapshot, UsageSource};
pub use writer::{OutputLog, RecordWriter};

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,geo_harvest_lib=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}

pub fn build_scheduler(config: &AppConfig) -> AppResult<Scheduler<BufWriter<File>>> {
    let token = config.require_bearer_token()?;
    let search = HttpSearchClient::new(config.api_base.clone(), token.clone())?;
    let usage = HttpUsageClient::new(config.api_base.clone(), token)?;

    let mode = match config.mode {
        HarvestMode::Uniform => SamplingMode::Uniform {
            transitions: config.changeover_dates.clone(),
            duration: config.interval_duration(),
        },
        HarvestMode::CatchUp => {
            let store = SummaryStore::open(&config.summary_database)?;
            let observed = store.day_counts()?;
            info!(
                path = %store.path().display(),
                days = observed.len(),
                "loaded per-day summary"
            );
            SamplingMode::CatchUp {
                transitions: config.changeover_dates.clone(),
                observed,
            }
        }
    };

    let pacer = Arc::new(RequestPacer::new(config.page_delay()));
    let fetcher = Fetcher::new(Arc::new(search), pacer)
        .with_page_size(config.page_size)
        .with_page_limit(config.page_limit);
    let retry = RetryPolicy::new(config.retry_backoff(), config.retry_attempts);
    let writer = OutputLog::open_append(&config.output_path)?;

    Ok(
        Scheduler::new(mode, fetcher, retry, Arc::new(usage), writer)
            .with_target(config.target, config.target_slack),
    )
}

pub async fn run() -> AppResult<RunReport> {
    init_tracing();
    let config = AppConfig::from_env()?;
    match serde_json::to_string(&config.public_profile()) {
        Ok(profile) => info!(config = %profile, "configuration loaded"),
        Err(err) => warn!(?err, "failed to render configuration profile"),
    }
    let mut scheduler = build_scheduler(&config)?;
    scheduler.run().await
}
