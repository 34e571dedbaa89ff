use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::errors::AppResult;
use crate::fetcher::JoinedRecord;

pub struct RecordWriter<W: Write> {
    sink: W,
    written: u64,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(sink: W) -> Self {
        Self { sink, written: 0 }
    }

    pub fn append(&mut self, records: &[JoinedRecord]) -> AppResult<usize> {
        for record in records {
            serde_json::to_writer(&mut self.sink, record)?;
            self.sink.write_all(b"\n")?;
        }
        self.sink.flush()?;
        self.written += records.len() as u64;
        debug!(count = records.len(), total = self.written, "records appended");
        Ok(records.len())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

pub struct OutputLog;

impl OutputLog {
    pub fn open_append<P: AsRef<Path>>(path: P) -> AppResult<RecordWriter<BufWriter<File>>> {
        let path: PathBuf = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!(path = %path.display(), "output log opened for append");
        Ok(RecordWriter::new(BufWriter::new(file)))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;

    fn record(id: &str) -> JoinedRecord {
        serde_json::from_value(json!({
            "user": { "id": "u1", "username": "alice", "public_metrics": { "followers_count": 3 } },
            "place": { "id": "p1", "full_name": "Austin, TX", "geo": { "type": "Feature", "bbox": [1, 2, 3, 4] } },
            "tweet": {
                "id": id,
                "text": format!("post {id}"),
                "author_id": "u1",
                "created_at": "2021-11-07T08:01:00.000Z",
                "geo": { "place_id": "p1" },
                "lang": "en"
            }
        }))
        .unwrap()
    }

    #[test]
    fn writes_one_line_per_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tweets.json");
        let records = vec![record("1"), record("2"), record("3")];
        {
            let mut writer = OutputLog::open_append(&path).unwrap();
            assert_eq!(writer.append(&records).unwrap(), 3);
            assert_eq!(writer.written(), 3);
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.ends_with('\n'));
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        for (line, original) in lines.iter().zip(&records) {
            let parsed: JoinedRecord = serde_json::from_str(line).unwrap();
            assert_eq!(&parsed, original);
            let raw: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(raw.get("tweet").is_some());
        }
    }

    #[test]
    fn reopening_appends_instead_of_truncating() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("tweets.json");
        OutputLog::open_append(&path)
            .unwrap()
            .append(&[record("1")])
            .unwrap();
        OutputLog::open_append(&path)
            .unwrap()
            .append(&[record("2"), record("3")])
            .unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 3);
    }

    #[test]
    fn empty_batch_writes_nothing() {
        let mut writer = RecordWriter::new(Vec::new());
        writer.append(&[]).unwrap();
        assert!(writer.into_inner().is_empty());
    }
}
