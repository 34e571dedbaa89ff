use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use rusqlite::{Connection, OpenFlags};
use tracing::{info, warn};

use crate::errors::{AppError, AppResult};

pub const SUMMARY_TABLE: &str = "tweet_time_summary";

pub struct SummaryStore {
    connection: Connection,
    path: PathBuf,
}

impl SummaryStore {
    pub fn open<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(AppError::Config(format!(
                "summary database not found at {}",
                path.display()
            )));
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let connection = Connection::open_with_flags(path, flags)?;
        info!(
            target: "summary_store",
            path = %path.display(),
            "summary database opened"
        );
        Ok(Self {
            connection,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn day_counts(&self) -> AppResult<BTreeMap<NaiveDate, u64>> {
        let sql = format!("SELECT date_day, cnt FROM {SUMMARY_TABLE}");
        let mut stmt = self.connection.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                let day: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((day, count))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut counts = BTreeMap::new();
        for (day, count) in rows {
            match parse_day(&day) {
                Some(date) => {
                    *counts.entry(date).or_insert(0) += count.max(0) as u64;
                }
                None => warn!(target: "summary_store", day, "skipping unparseable summary day"),
            }
        }
        Ok(counts)
    }
}

fn parse_day(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    let day = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}
