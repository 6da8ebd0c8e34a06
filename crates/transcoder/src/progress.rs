//! Progress monitoring for a running encode.
//!
//! ffmpeg appends `key=value` blocks to the file given with `-progress`. The
//! [`ProgressReader`] consumes that file incrementally and the
//! [`ProgressMonitor`] polls it on an interval, forwarding the encoded time to
//! a [`ProgressSink`].

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, warn};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const OUT_TIME_KEYS: &[&str] = &["out_time_us", "out_time_ms"];

/// Parses one progress line, returning the encoded time it carries.
///
/// `out_time_ms` is reported in microseconds by ffmpeg as well. Any other key,
/// `N/A`, negative or garbled values yield `None`.
pub fn parse_out_time(line: &str) -> Option<Duration> {
    let (key, value) = line.trim().split_once('=')?;
    if !OUT_TIME_KEYS.contains(&key.trim()) {
        return None;
    }
    let micros: i64 = value.trim().parse().ok()?;
    u64::try_from(micros).ok().map(Duration::from_micros)
}

/// Incremental reader over an append-only progress file.
///
/// Remembers how far it has read and only consumes complete lines, so a line
/// still being written is picked up on a later poll.
#[derive(Debug)]
pub struct ProgressReader {
    path: PathBuf,
    offset: u64,
}

impl ProgressReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Latest encoded time written since the previous poll.
    ///
    /// `None` means no new data this tick: the file is missing, nothing complete
    /// was appended, or the new lines carry no usable time.
    pub fn poll(&mut self) -> Option<Duration> {
        match self.read_new_lines() {
            Ok(chunk) => chunk.lines().filter_map(parse_out_time).last(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                debug!("Progress file {} not readable yet: {}", self.path.display(), e);
                None
            }
        }
    }

    fn read_new_lines(&mut self) -> io::Result<String> {
        let mut file = File::open(&self.path)?;
        let len = file.metadata()?.len();
        if len < self.offset {
            // truncated underneath us; start over
            self.offset = 0;
        }
        file.seek(SeekFrom::Start(self.offset))?;

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let complete = match buf.iter().rposition(|b| *b == b'\n') {
            Some(pos) => pos + 1,
            None => return Ok(String::new()),
        };
        self.offset += complete as u64;
        Ok(String::from_utf8_lossy(&buf[..complete]).into_owned())
    }
}

/// Display collaborator for encode progress.
pub trait ProgressSink: Send + Sync {
    fn start(&self, total: Duration);
    fn update(&self, encoded: Duration);
    fn finish(&self);
}

/// Sink that discards every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn start(&self, _total: Duration) {}
    fn update(&self, _encoded: Duration) {}
    fn finish(&self) {}
}

/// Terminal progress bar measured in encoded seconds.
#[derive(Clone)]
pub struct IndicatifSink {
    bar: ProgressBar,
}

impl IndicatifSink {
    pub fn new() -> Self {
        let bar = ProgressBar::hidden();
        let style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {percent}% | ETA: {eta}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
        bar.set_style(style);
        Self { bar }
    }
}

impl Default for IndicatifSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for IndicatifSink {
    fn start(&self, total: Duration) {
        self.bar.reset();
        self.bar.set_length(total.as_secs().max(1));
        self.bar.set_position(0);
        self.bar.set_draw_target(ProgressDrawTarget::stderr());
    }

    fn update(&self, encoded: Duration) {
        self.bar.set_position(encoded.as_secs());
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
        self.bar.set_draw_target(ProgressDrawTarget::hidden());
    }
}

/// Background task polling one job's progress file.
pub struct ProgressMonitor {
    handle: JoinHandle<Option<Duration>>,
    stop: CancellationToken,
    path: PathBuf,
}

impl ProgressMonitor {
    /// Starts polling `path` every `interval` against a source of length `total`.
    pub fn spawn(
        path: PathBuf,
        total: Duration,
        interval: Duration,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        let stop = CancellationToken::new();
        let task_stop = stop.clone();
        let mut reader = ProgressReader::new(path.clone());

        let handle = tokio::spawn(async move {
            sink.start(total);
            let mut ticker = tokio::time::interval(interval);
            let mut latest = None;

            loop {
                tokio::select! {
                    _ = task_stop.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Some(encoded) = reader.poll() {
                            sink.update(encoded.min(total));
                            latest = Some(encoded);
                        }
                    }
                }
            }

            // one last read for whatever was flushed right before exit
            if let Some(encoded) = reader.poll() {
                sink.update(encoded.min(total));
                latest = Some(encoded);
            }
            sink.finish();
            latest
        });

        Self { handle, stop, path }
    }

    /// Stops polling, removes the progress file and returns the last encoded time seen.
    pub async fn stop(self) -> Option<Duration> {
        self.stop.cancel();
        let latest = match self.handle.await {
            Ok(latest) => latest,
            Err(e) => {
                warn!("Progress monitor task ended abnormally: {}", e);
                None
            }
        };

        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove progress file {}: {}", self.path.display(), e),
        }

        latest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingSink {
        updates: Mutex<Vec<Duration>>,
        finished: Mutex<bool>,
    }

    impl ProgressSink for RecordingSink {
        fn start(&self, _total: Duration) {}
        fn update(&self, encoded: Duration) {
            self.updates.lock().unwrap().push(encoded);
        }
        fn finish(&self) {
            *self.finished.lock().unwrap() = true;
        }
    }

    fn append(path: &Path, text: &str) {
        let mut file = OpenOptions::new().create(true).append(true).open(path).unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    #[test]
    fn test_parse_out_time() {
        assert_eq!(parse_out_time("out_time_us=1500000"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_out_time("out_time_ms=2000000"), Some(Duration::from_secs(2)));
        assert_eq!(parse_out_time("out_time_us=N/A"), None);
        assert_eq!(parse_out_time("out_time_us=-9223372036854775807"), None);
        assert_eq!(parse_out_time("out_time=00:00:01.500000"), None);
        assert_eq!(parse_out_time("frame=42"), None);
        assert_eq!(parse_out_time("garbage"), None);
    }

    #[test]
    fn test_missing_file_is_no_data() {
        let temp = TempDir::new().unwrap();
        let mut reader = ProgressReader::new(temp.path().join("job.progress"));
        assert_eq!(reader.poll(), None);
    }

    #[test]
    fn test_reader_is_incremental() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("job.progress");
        let mut reader = ProgressReader::new(&path);

        append(&path, "frame=10\nout_time_us=1000000\nout_time_us=2000000\nprogress=continue\n");
        assert_eq!(reader.poll(), Some(Duration::from_secs(2)));

        // nothing new
        assert_eq!(reader.poll(), None);

        append(&path, "out_time_us=3000000\n");
        assert_eq!(reader.poll(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_partial_line_waits_for_newline() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("job.progress");
        let mut reader = ProgressReader::new(&path);

        append(&path, "out_time_us=40");
        assert_eq!(reader.poll(), None);

        append(&path, "00000\n");
        assert_eq!(reader.poll(), Some(Duration::from_secs(4)));
    }

    #[tokio::test]
    async fn test_monitor_reports_and_removes_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("job.progress");
        let sink = Arc::new(RecordingSink::default());

        let monitor = ProgressMonitor::spawn(
            path.clone(),
            Duration::from_secs(10),
            Duration::from_millis(10),
            sink.clone(),
        );

        append(&path, "out_time_us=5000000\n");
        tokio::time::sleep(Duration::from_millis(50)).await;
        append(&path, "out_time_us=20000000\nprogress=end\n");

        let latest = monitor.stop().await;

        assert_eq!(latest, Some(Duration::from_secs(20)));
        assert!(!path.exists());
        assert!(*sink.finished.lock().unwrap());
        let updates = sink.updates.lock().unwrap();
        // clamped to the source duration
        assert_eq!(updates.last(), Some(&Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn test_monitor_without_progress_file() {
        let temp = TempDir::new().unwrap();
        let monitor = ProgressMonitor::spawn(
            temp.path().join("never-written.progress"),
            Duration::from_secs(10),
            Duration::from_millis(10),
            Arc::new(NoopSink),
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(monitor.stop().await, None);
    }
}
