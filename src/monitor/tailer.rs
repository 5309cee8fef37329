//! Follows the run log file and mirrors new lines into a [`Monitor`].

use std::path::PathBuf;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{LogLevel, Monitor, FILE_WATCHER_SOURCE};

static LEVEL_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"level=([A-Za-z]+)").expect("valid level field regex"));

static LEVEL_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(TRACE|DEBUG|INFO|WARN|ERROR)\b").expect("valid level token regex")
});

/// Level of a log line, `info` when nothing recognizable is found.
pub fn extract_level(line: &str) -> LogLevel {
    if let Some(level) = LEVEL_FIELD
        .captures(line)
        .and_then(|caps| LogLevel::parse(&caps[1]))
    {
        return level;
    }

    LEVEL_TOKEN
        .captures(line)
        .and_then(|caps| LogLevel::parse(&caps[1]))
        .unwrap_or(LogLevel::Info)
}

pub struct LogTailer {
    path: PathBuf,
    monitor: Monitor,
    poll_interval: Duration,
    open_attempts: u32,
    open_retry_delay: Duration,
}

impl LogTailer {
    pub fn new(path: impl Into<PathBuf>, monitor: Monitor) -> Self {
        Self {
            path: path.into(),
            monitor,
            poll_interval: Duration::from_millis(100),
            open_attempts: 10,
            open_retry_delay: Duration::from_millis(500),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_open_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.open_attempts = attempts.max(1);
        self.open_retry_delay = delay;
        self
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Tail until `cancel` fires. Never returns an error: problems are logged
    /// and the tailer either retries on the next tick or stops.
    pub async fn run(self, cancel: CancellationToken) {
        let Some(mut position) = self.wait_for_file(&cancel).await else {
            return;
        };
        debug!(path = %self.path.display(), position, "Tailing log file");

        let mut pending: Vec<u8> = Vec::new();
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let size = match fs::metadata(&self.path).await {
                Ok(meta) => meta.len(),
                // Briefly missing while being rotated
                Err(_) => continue,
            };

            if size < position {
                debug!(path = %self.path.display(), "Log file shrank, reading from start");
                position = 0;
                pending.clear();
            }
            if size == position {
                continue;
            }

            match self.read_from(position).await {
                Ok(bytes) => {
                    position += bytes.len() as u64;
                    pending.extend_from_slice(&bytes);
                    self.forward_complete_lines(&mut pending);
                }
                Err(e) => warn!(path = %self.path.display(), "Failed to read log file: {}", e),
            }
        }
        debug!(path = %self.path.display(), "Log tailer stopped");
    }

    /// Returns the end-of-file offset once the file exists.
    async fn wait_for_file(&self, cancel: &CancellationToken) -> Option<u64> {
        for attempt in 1..=self.open_attempts {
            if let Ok(meta) = fs::metadata(&self.path).await {
                return Some(meta.len());
            }
            if attempt == self.open_attempts {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(self.open_retry_delay) => {}
            }
        }
        warn!(
            path = %self.path.display(),
            "Log file did not appear, live log mirroring disabled"
        );
        None
    }

    async fn read_from(&self, position: u64) -> std::io::Result<Vec<u8>> {
        let mut file = fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(position)).await?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).await?;
        Ok(bytes)
    }

    fn forward_complete_lines(&self, pending: &mut Vec<u8>) {
        let Some(last_newline) = pending.iter().rposition(|b| *b == b'\n') else {
            return;
        };
        let rest = pending.split_off(last_newline + 1);
        let complete = std::mem::replace(pending, rest);

        for raw in complete.split(|b| *b == b'\n') {
            let line = String::from_utf8_lossy(raw);
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            self.monitor
                .add_log(extract_level(line), line, FILE_WATCHER_SOURCE);
        }
    }
}
