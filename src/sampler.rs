use std::collections::{BTreeMap, BTreeSet};

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde::Serialize;
use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::interval::{pick_random_sub_interval, Interval};

pub const WINDOW_DAYS: i64 = 28;
pub const THRESHOLD_STEP: u64 = 1_000;
pub const CATCHUP_INTERVAL_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DayBucket {
    pub date: NaiveDate,
    pub observed_count: u64,
}

pub fn candidate_days(transitions: &[NaiveDate]) -> BTreeSet<NaiveDate> {
    transitions
        .iter()
        .flat_map(|transition| {
            (-WINDOW_DAYS..WINDOW_DAYS).map(move |offset| *transition + Duration::days(offset))
        })
        .collect()
}

pub fn build_buckets(
    candidates: &BTreeSet<NaiveDate>,
    observed: &BTreeMap<NaiveDate, u64>,
) -> Vec<DayBucket> {
    candidates
        .iter()
        .map(|date| DayBucket {
            date: *date,
            observed_count: observed.get(date).copied().unwrap_or(0),
        })
        .collect()
}

pub fn shortage_total(buckets: &[DayBucket], threshold: u64) -> u64 {
    buckets
        .iter()
        .filter(|bucket| bucket.observed_count <= threshold)
        .map(|bucket| threshold - bucket.observed_count)
        .sum()
}

pub fn accepted_threshold(buckets: &[DayBucket], remaining: u64) -> Option<u64> {
    if buckets.is_empty() {
        return None;
    }
    let max_observed = buckets.iter().map(|b| b.observed_count).max().unwrap_or(0);
    let mut accepted = None;
    let mut threshold = 0_u64;
    loop {
        let required = shortage_total(buckets, threshold);
        debug!(
            threshold,
            days = buckets.iter().filter(|b| b.observed_count <= threshold).count(),
            required,
            "evaluated catch-up threshold"
        );
        if required > remaining {
            break;
        }
        accepted = Some(threshold);
        if threshold >= max_observed {
            // Every day is below the line, so each further step costs the same.
            let per_step = buckets.len() as u64 * THRESHOLD_STEP;
            let steps = (remaining - required) / per_step;
            accepted = Some(threshold.saturating_add(steps * THRESHOLD_STEP));
            break;
        }
        threshold = match threshold.checked_add(THRESHOLD_STEP) {
            Some(next) => next,
            None => break,
        };
    }
    accepted
}

#[derive(Debug, Clone)]
pub struct SamplingDistribution {
    threshold: u64,
    days: Vec<NaiveDate>,
    shortages: Vec<u64>,
    total_shortage: u64,
    index: WeightedIndex<u64>,
}

impl SamplingDistribution {
    pub fn compute(buckets: &[DayBucket], remaining: u64) -> AppResult<Self> {
        if buckets.is_empty() {
            return Err(AppError::NoCandidateDays);
        }
        let threshold = accepted_threshold(buckets, remaining)
            .ok_or(AppError::InsufficientBudget { remaining })?;

        let (days, shortages): (Vec<_>, Vec<_>) = buckets
            .iter()
            .filter(|bucket| bucket.observed_count <= threshold)
            .map(|bucket| (bucket.date, threshold - bucket.observed_count))
            .unzip();
        let total_shortage: u64 = shortages.iter().sum();
        if total_shortage == 0 {
            return Err(AppError::InsufficientBudget { remaining });
        }
        let index = WeightedIndex::new(shortages.iter().copied())
            .map_err(|_| AppError::InsufficientBudget { remaining })?;

        debug!(
            threshold,
            days = days.len(),
            total_shortage,
            "catch-up distribution computed"
        );
        Ok(Self {
            threshold,
            days,
            shortages,
            total_shortage,
            index,
        })
    }

    pub fn from_counts(
        transitions: &[NaiveDate],
        observed: &BTreeMap<NaiveDate, u64>,
        remaining: u64,
    ) -> AppResult<Self> {
        let buckets = build_buckets(&candidate_days(transitions), observed);
        Self::compute(&buckets, remaining)
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn probability(&self, date: NaiveDate) -> f64 {
        self.days
            .iter()
            .position(|day| *day == date)
            .map(|idx| self.shortages[idx] as f64 / self.total_shortage as f64)
            .unwrap_or(0.0)
    }

    pub fn probabilities(&self) -> BTreeMap<NaiveDate, f64> {
        self.days
            .iter()
            .zip(&self.shortages)
            .map(|(day, shortage)| (*day, *shortage as f64 / self.total_shortage as f64))
            .collect()
    }

    pub fn sample_day<R: Rng>(&self, rng: &mut R) -> NaiveDate {
        self.days[self.index.sample(rng)]
    }

    pub fn pick_catchup_interval<R: Rng>(&self, rng: &mut R) -> AppResult<Interval> {
        let day = self.sample_day(rng);
        let midnight = day
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| AppError::Config(format!("invalid day {day}")))?;
        let start = Utc.from_utc_datetime(&midnight);
        pick_random_sub_interval(
            rng,
            start,
            start + Duration::days(1),
            Duration::seconds(CATCHUP_INTERVAL_SECS),
        )
    }
}
