//! Progress tracking for transfers

use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::debug;

/// Snapshot of one stream transfer
#[derive(Debug, Clone, PartialEq)]
pub struct TransferProgress {
    pub downloaded_bytes: u64,
    /// Unknown when the server sends no length
    pub total_bytes: Option<u64>,
    pub speed: f64, // bytes per second
    pub eta: Option<Duration>,
    pub status: TransferStatus,
}

impl TransferProgress {
    pub fn new(total_bytes: Option<u64>) -> Self {
        Self {
            downloaded_bytes: 0,
            total_bytes,
            speed: 0.0,
            eta: None,
            status: TransferStatus::Starting,
        }
    }

    /// Update progress with new data
    pub fn update(&mut self, downloaded_bytes: u64, speed: f64) {
        self.downloaded_bytes = downloaded_bytes;
        self.speed = speed;
        self.status = TransferStatus::Downloading;

        self.eta = match self.total_bytes {
            Some(total) if downloaded_bytes >= total => Some(Duration::ZERO),
            Some(total) if speed > 0.0 => {
                Some(Duration::from_secs_f64((total - downloaded_bytes) as f64 / speed))
            }
            _ => None,
        };
    }

    pub fn complete(&mut self) {
        self.status = TransferStatus::Completed;
        self.eta = Some(Duration::ZERO);
        if self.total_bytes.is_none() {
            self.total_bytes = Some(self.downloaded_bytes);
        }
    }

    /// Progress in `0.0..=1.0`; zero while the total is unknown
    pub fn percentage(&self) -> f64 {
        match self.total_bytes {
            Some(total) if total > 0 => self.downloaded_bytes as f64 / total as f64,
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferStatus {
    #[default]
    Starting,
    Downloading,
    Completed,
}

/// Receiver of progress updates
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, progress: &TransferProgress);
}

/// `|bytes_written, total_bytes| ...`
impl<F> ProgressSink for F
where
    F: Fn(u64, Option<u64>) + Send + Sync,
{
    fn on_progress(&self, progress: &TransferProgress) {
        self(progress.downloaded_bytes, progress.total_bytes)
    }
}

/// Updates are dropped rather than awaited when the receiver lags
impl ProgressSink for mpsc::Sender<TransferProgress> {
    fn on_progress(&self, progress: &TransferProgress) {
        if let Err(e) = self.try_send(progress.clone()) {
            debug!("Progress update dropped: {}", e);
        }
    }
}

/// Sink that ignores every update
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&self, _progress: &TransferProgress) {}
}

/// Rate limit for progress updates: one every `min_bytes` or every
/// `interval`, whichever comes first.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    interval: Duration,
    min_bytes: u64,
    last_emit: Option<Instant>,
    last_bytes: u64,
}

impl ProgressThrottle {
    pub fn new(interval: Duration, min_bytes: u64) -> Self {
        Self {
            interval,
            min_bytes,
            last_emit: None,
            last_bytes: 0,
        }
    }

    /// Whether an update at `bytes` should be emitted now; records it if so
    pub fn should_emit(&mut self, bytes: u64, now: Instant) -> bool {
        let due = match self.last_emit {
            None => true,
            Some(last) => {
                bytes.saturating_sub(self.last_bytes) >= self.min_bytes
                    || now.duration_since(last) >= self.interval
            }
        };
        if due {
            self.last_emit = Some(now);
            self.last_bytes = bytes;
        }
        due
    }
}

/// Throttled progress reporting for one transfer
pub struct ProgressReporter<'a> {
    sink: &'a dyn ProgressSink,
    throttle: ProgressThrottle,
    progress: TransferProgress,
    started: Instant,
    /// Bytes already on disk when this attempt started, excluded from speed
    baseline: u64,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(sink: &'a dyn ProgressSink, throttle: ProgressThrottle, total_bytes: Option<u64>) -> Self {
        Self {
            sink,
            throttle,
            progress: TransferProgress::new(total_bytes),
            started: Instant::now(),
            baseline: 0,
        }
    }

    /// Restart speed measurement for a new attempt that begins at `bytes`
    pub fn restart(&mut self, bytes: u64, total_bytes: Option<u64>) {
        self.started = Instant::now();
        self.baseline = bytes;
        self.progress.total_bytes = total_bytes;
        self.progress.downloaded_bytes = bytes;
    }

    pub fn advance(&mut self, bytes_written: u64) {
        let now = Instant::now();
        if !self.throttle.should_emit(bytes_written, now) {
            self.progress.downloaded_bytes = bytes_written;
            return;
        }

        let elapsed = now.duration_since(self.started).as_secs_f64();
        let speed = if elapsed > 0.0 {
            bytes_written.saturating_sub(self.baseline) as f64 / elapsed
        } else {
            0.0
        };
        self.progress.update(bytes_written, speed);
        self.sink.on_progress(&self.progress);
    }

    /// Emit the final update, whatever the throttle says
    pub fn finish(&mut self, bytes_written: u64) {
        self.progress.downloaded_bytes = bytes_written;
        self.progress.complete();
        self.sink.on_progress(&self.progress);
    }
}
