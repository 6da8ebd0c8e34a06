//! Scripted collaborators for unit tests.

use crate::encode::{EncodeError, EncodeOutcome, EncodeProcess, EncodeRequest, Encoder};
use crate::probe::{Dimensions, MediaProbe, ProbeError, ProbeResult};
use async_trait::async_trait;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Probe returning a fixed result for every path.
#[derive(Debug)]
pub struct FakeProbe {
    result: ProbeResult,
    fail: bool,
    cancel_on_probe: Option<CancellationToken>,
    calls: AtomicUsize,
}

impl Default for FakeProbe {
    fn default() -> Self {
        Self {
            result: ProbeResult {
                duration_secs: Some(1200.0),
                bit_rate_bps: Some(8_000_000.0),
                dimensions: Some(Dimensions {
                    width: 1920,
                    height: 1080,
                }),
            },
            fail: false,
            cancel_on_probe: None,
            calls: AtomicUsize::new(0),
        }
    }
}

impl FakeProbe {
    pub fn with_bitrate_mbps(mut self, mbps: f64) -> Self {
        self.result.bit_rate_bps = Some(mbps * 1_000_000.0);
        self
    }

    pub fn without_bitrate(mut self) -> Self {
        self.result.bit_rate_bps = None;
        self
    }

    pub fn without_duration(mut self) -> Self {
        self.result.duration_secs = None;
        self
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.result.dimensions = Some(Dimensions { width, height });
        self
    }

    pub fn without_dimensions(mut self) -> Self {
        self.result.dimensions = None;
        self
    }

    /// Every probe fails as if ffprobe crashed.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Cancels `token` during every probe, like an interrupt arriving mid-ffprobe.
    pub fn cancel_on_probe(mut self, token: CancellationToken) -> Self {
        self.cancel_on_probe = Some(token);
        self
    }

    pub fn probe_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaProbe for FakeProbe {
    async fn probe(&self, _path: &Path) -> Result<ProbeResult, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = &self.cancel_on_probe {
            token.cancel();
        }
        if self.fail {
            return Err(ProbeError::FfprobeFailed("scripted failure".to_string()));
        }
        Ok(self.result.clone())
    }
}

/// How a fake encode ends if nobody interrupts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeBehaviour {
    Succeed,
    Fail(i32),
    /// Exits successfully but leaves no output file behind.
    SucceedWithoutOutput,
    /// Runs until terminated or killed.
    Hang,
    /// Runs until killed; ignores graceful termination.
    Stubborn,
}

/// Encoder that simulates ffmpeg with a spawned task.
///
/// The partial output is written synchronously on start, then the task appends
/// progress lines every tick.
#[derive(Debug)]
pub struct FakeEncoder {
    behaviour: FakeBehaviour,
    ticks: u32,
    tick: Duration,
    cancel_on_start: Option<CancellationToken>,
    starts: AtomicUsize,
    requests: Mutex<Vec<EncodeRequest>>,
}

/// Bytes of a finished fake encode.
pub const ENCODED_BYTES: usize = 4;

impl FakeEncoder {
    pub fn new(behaviour: FakeBehaviour) -> Self {
        Self {
            behaviour,
            ticks: 3,
            tick: Duration::from_millis(5),
            cancel_on_start: None,
            starts: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(FakeBehaviour::Succeed)
    }

    /// Cancels `token` right after the encode starts, like an interrupt mid-job.
    pub fn cancel_on_start(mut self, token: CancellationToken) -> Self {
        self.cancel_on_start = Some(token);
        self
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<EncodeRequest> {
        self.requests.lock().unwrap().clone()
    }
}

fn append_line(path: &Path, line: &str) {
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
        let _ = writeln!(file, "{}", line);
    }
}

#[async_trait]
impl Encoder for FakeEncoder {
    async fn start(&self, request: &EncodeRequest) -> Result<Box<dyn EncodeProcess>, EncodeError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        fs::write(&request.output_path, b"partial")?;

        let terminate = CancellationToken::new();
        let kill = CancellationToken::new();
        let behaviour = self.behaviour;
        let ticks = self.ticks;
        let tick = self.tick;
        let progress_path = request.progress_path.clone();
        let output_path = request.output_path.clone();
        let task_terminate = terminate.clone();
        let task_kill = kill.clone();

        let handle = tokio::spawn(async move {
            let endless = matches!(behaviour, FakeBehaviour::Hang | FakeBehaviour::Stubborn);
            let graceful = behaviour != FakeBehaviour::Stubborn;
            let mut step: u64 = 0;

            while endless || step < u64::from(ticks) {
                step += 1;
                append_line(&progress_path, &format!("out_time_us={}", step * 1_000_000));
                append_line(&progress_path, "progress=continue");
                tokio::select! {
                    _ = task_kill.cancelled() => return EncodeOutcome::Failure(None),
                    _ = task_terminate.cancelled(), if graceful => return EncodeOutcome::Success,
                    _ = tokio::time::sleep(tick) => {}
                }
            }

            append_line(&progress_path, "progress=end");
            match behaviour {
                FakeBehaviour::Fail(code) => EncodeOutcome::Failure(Some(code)),
                FakeBehaviour::SucceedWithoutOutput => {
                    let _ = fs::remove_file(&output_path);
                    EncodeOutcome::Success
                }
                _ => {
                    let _ = fs::write(&output_path, vec![0u8; ENCODED_BYTES]);
                    EncodeOutcome::Success
                }
            }
        });

        if let Some(token) = &self.cancel_on_start {
            token.cancel();
        }

        Ok(Box::new(FakeProcess {
            handle: Some(handle),
            outcome: None,
            terminate,
            kill,
        }))
    }
}

/// Handle to a fake encode task.
#[derive(Debug)]
pub struct FakeProcess {
    handle: Option<JoinHandle<EncodeOutcome>>,
    outcome: Option<EncodeOutcome>,
    terminate: CancellationToken,
    kill: CancellationToken,
}

#[async_trait]
impl EncodeProcess for FakeProcess {
    async fn wait(&mut self) -> Result<EncodeOutcome, EncodeError> {
        if let Some(outcome) = self.outcome {
            return Ok(outcome);
        }
        let Some(handle) = self.handle.as_mut() else {
            return Ok(EncodeOutcome::Failure(None));
        };
        let outcome = handle.await.unwrap_or(EncodeOutcome::Failure(None));
        self.handle = None;
        self.outcome = Some(outcome);
        Ok(outcome)
    }

    async fn terminate(&mut self) -> Result<(), EncodeError> {
        self.terminate.cancel();
        Ok(())
    }

    async fn kill(&mut self) -> Result<(), EncodeError> {
        self.kill.cancel();
        self.wait().await.map(|_| ())
    }
}
