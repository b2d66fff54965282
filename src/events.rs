use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::errors::AppResult;

const DEFAULT_BATCH_SIZE: usize = 25;

/// Append-only JSONL log of run lifecycle events, buffered in memory and
/// flushed in batches.
#[derive(Clone)]
pub struct EventLog {
    queue: Arc<Mutex<Vec<RunEvent>>>,
    buffer_path: PathBuf,
    batch_size: usize,
}

impl EventLog {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> AppResult<Self> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;
        let buffer_path = data_dir.join("run-events.jsonl");
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&buffer_path)?;

        Ok(Self {
            queue: Arc::new(Mutex::new(Vec::new())),
            buffer_path,
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    pub fn record(&self, name: impl Into<String>, payload: serde_json::Value) -> AppResult<()> {
        let mut queue = self.queue.lock();
        queue.push(RunEvent::new(name.into(), payload));
        if queue.len() >= self.batch_size {
            self.persist_locked(&mut queue)?;
        }
        Ok(())
    }

    pub fn flush(&self) -> AppResult<()> {
        let mut queue = self.queue.lock();
        self.persist_locked(&mut queue)
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn buffer_path(&self) -> &Path {
        &self.buffer_path
    }

    fn persist_locked(&self, queue: &mut Vec<RunEvent>) -> AppResult<()> {
        if queue.is_empty() {
            return Ok(());
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.buffer_path)?;
        for event in queue.iter() {
            let line = serde_json::to_vec(event)?;
            file.write_all(&line)?;
            file.write_all(b"\n")?;
        }
        file.flush()?;
        queue.clear();
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct RunEvent {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl RunEvent {
    fn new(name: String, payload: serde_json::Value) -> Self {
        Self {
            name,
            timestamp: Utc::now(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn writes_events_to_disk() {
        let dir = tempdir().unwrap();
        let log = EventLog::new(dir.path()).unwrap();
        log.record("run_started", json!({ "city": "Stuttgart" }))
            .unwrap();
        log.flush().unwrap();

        let buffer = std::fs::read_to_string(log.buffer_path()).unwrap();
        assert!(buffer.contains("run_started"));
        assert!(buffer.contains("Stuttgart"));
        assert_eq!(log.queue_depth(), 0);
    }

    #[test]
    fn keeps_buffer_across_instances() {
        let dir = tempdir().unwrap();
        {
            let log = EventLog::new(dir.path()).unwrap();
            log.record("first", json!({})).unwrap();
            log.flush().unwrap();
        }

        let log = EventLog::new(dir.path()).unwrap();
        log.record("second", json!({})).unwrap();
        log.flush().unwrap();

        let buffer = std::fs::read_to_string(log.buffer_path()).unwrap();
        assert!(buffer.contains("first"));
        assert!(buffer.contains("second"));
    }
}
