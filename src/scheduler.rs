use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::info;

use crate::config::TargetPolicy;
use crate::errors::{AppError, AppResult};
use crate::fetcher::{FetchBatch, Fetcher};
use crate::interval::{pick_random_sub_interval, Interval};
use crate::retry::RetryPolicy;
use crate::sampler::{SamplingDistribution, WINDOW_DAYS};
use crate::usage::{UsageSnapshot, UsageSource};
use crate::writer::RecordWriter;

#[derive(Debug, Clone)]
pub enum SamplingMode {
    Uniform {
        transitions: Vec<NaiveDate>,
        duration: Duration,
    },
    CatchUp {
        transitions: Vec<NaiveDate>,
        observed: BTreeMap<NaiveDate, u64>,
    },
}

pub enum IntervalSelector {
    Uniform {
        transitions: Vec<NaiveDate>,
        duration: Duration,
    },
    CatchUp(SamplingDistribution),
}

impl IntervalSelector {
    pub fn prepare(mode: &SamplingMode, remaining: u64) -> AppResult<Self> {
        match mode {
            SamplingMode::Uniform {
                transitions,
                duration,
            } => {
                if transitions.is_empty() {
                    return Err(AppError::NoCandidateDays);
                }
                Ok(Self::Uniform {
                    transitions: transitions.clone(),
                    duration: *duration,
                })
            }
            SamplingMode::CatchUp {
                transitions,
                observed,
            } => {
                let distribution =
                    SamplingDistribution::from_counts(transitions, observed, remaining)?;
                info!(
                    threshold = distribution.threshold(),
                    days = distribution.len(),
                    "catch-up distribution ready"
                );
                Ok(Self::CatchUp(distribution))
            }
        }
    }

    pub fn next_interval<R: Rng>(&self, rng: &mut R) -> AppResult<Interval> {
        match self {
            IntervalSelector::Uniform {
                transitions,
                duration,
            } => {
                let transition = transitions.choose(rng).ok_or(AppError::NoCandidateDays)?;
                let midnight = transition
                    .and_hms_opt(0, 0, 0)
                    .ok_or_else(|| AppError::Config(format!("invalid day {transition}")))?;
                let center = Utc.from_utc_datetime(&midnight);
                pick_random_sub_interval(
                    rng,
                    center - Duration::days(WINDOW_DAYS),
                    center + Duration::days(WINDOW_DAYS),
                    *duration,
                )
            }
            IntervalSelector::CatchUp(distribution) => distribution.pick_catchup_interval(rng),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub fetched: u64,
    pub dropped: u64,
    pub intervals: u64,
    pub target: u64,
    pub usage_start: UsageSnapshot,
    pub usage_end: UsageSnapshot,
}

impl RunReport {
    pub fn consumed(&self) -> u64 {
        self.usage_end
            .consumed
            .saturating_sub(self.usage_start.consumed)
    }
}

enum Phase {
    SelectInterval,
    Fetching(Interval),
    Writing(FetchBatch),
    BudgetCheck,
    Done,
}

pub struct Scheduler<W: Write> {
    mode: SamplingMode,
    fetcher: Fetcher,
    retry: RetryPolicy,
    usage: Arc<dyn UsageSource>,
    writer: RecordWriter<W>,
    target: TargetPolicy,
    slack: u64,
    rng: StdRng,
}

impl<W: Write> Scheduler<W> {
    pub fn new(
        mode: SamplingMode,
        fetcher: Fetcher,
        retry: RetryPolicy,
        usage: Arc<dyn UsageSource>,
        writer: RecordWriter<W>,
    ) -> Self {
        Self {
            mode,
            fetcher,
            retry,
            usage,
            writer,
            target: TargetPolicy::Budget,
            slack: 0,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_target(mut self, target: TargetPolicy, slack: u64) -> Self {
        self.target = target;
        self.slack = slack;
        self
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn into_writer(self) -> RecordWriter<W> {
        self.writer
    }

    pub async fn run(&mut self) -> AppResult<RunReport> {
        let usage_start = self.usage.get_usage().await?;
        let remaining = usage_start.remaining();
        let target = self.target.resolve(remaining);
        let stop_at = target.saturating_sub(self.slack);
        info!(
            consumed = usage_start.consumed,
            total = usage_start.total,
            remaining,
            target,
            "starting harvest run"
        );

        let selector = IntervalSelector::prepare(&self.mode, remaining)?;
        let mut fetched = 0_u64;
        let mut dropped = 0_u64;
        let mut intervals = 0_u64;
        let mut phase = Phase::BudgetCheck;

        loop {
            phase = match phase {
                Phase::SelectInterval => Phase::Fetching(selector.next_interval(&mut self.rng)?),
                Phase::Fetching(interval) => {
                    let fetcher = &self.fetcher;
                    let batch = self.retry.run(move || fetcher.fetch(interval)).await?;
                    intervals += 1;
                    Phase::Writing(batch)
                }
                Phase::Writing(batch) => {
                    fetched += self.writer.append(&batch.records)? as u64;
                    dropped += batch.issues.len() as u64;
                    Phase::BudgetCheck
                }
                Phase::BudgetCheck if fetched >= stop_at => Phase::Done,
                Phase::BudgetCheck => {
                    if intervals > 0 {
                        info!(fetched, target, intervals, dropped, "harvest progress");
                    }
                    Phase::SelectInterval
                }
                Phase::Done => break,
            };
        }

        let usage_end = self.usage.get_usage().await?;
        let report = RunReport {
            fetched,
            dropped,
            intervals,
            target,
            usage_start,
            usage_end,
        };
        info!(
            fetched,
            dropped,
            intervals,
            consumed = report.consumed(),
            usage = usage_end.consumed,
            total = usage_end.total,
            "harvest run complete"
        );
        Ok(report)
    }
}
