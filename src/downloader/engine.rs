//! Single-stream transfer engine
//!
//! Bytes go to a `.part` sibling of the destination and are renamed into
//! place only once the advertised length has been received. A part file left
//! behind by an interrupted attempt is resumed with a range request.

use crate::downloader::progress::{ProgressReporter, ProgressSink, ProgressThrottle};
use crate::downloader::retry::{with_backoff, RetryPolicy};
use crate::extractor::models::StreamDescriptor;
use crate::utils::error::{Result, TubeloaderError};
use crate::utils::filename::part_path;
use futures::StreamExt;
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Transfer configuration
#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub retry: RetryPolicy,
    /// Longest wait for the response headers or for one body chunk
    pub read_timeout: Duration,
    pub progress_interval: Duration,
    pub progress_min_bytes: u64,
    /// Continue from an existing part file instead of starting over
    pub enable_resume: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            read_timeout: Duration::from_secs(30),
            progress_interval: Duration::from_millis(500),
            progress_min_bytes: 1024 * 1024,
            enable_resume: true,
        }
    }
}

/// A finished transfer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferResult {
    pub output_path: PathBuf,
    /// Size of the final file, resumed bytes included
    pub bytes_written: u64,
    pub duration: Duration,
}

pub struct TransferEngine {
    client: Client,
    config: TransferConfig,
    cancel: Option<CancellationToken>,
}

impl TransferEngine {
    pub fn new(client: Client, config: TransferConfig) -> Self {
        Self {
            client,
            config,
            cancel: None,
        }
    }

    /// Abort transfers between chunks once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Download one stream to `destination`.
    ///
    /// `tag` names the part file; callers pass item id and format id so
    /// concurrent transfers into one directory never share it.
    pub async fn transfer(
        &self,
        descriptor: &StreamDescriptor,
        destination: &Path,
        tag: &str,
        progress: &dyn ProgressSink,
    ) -> Result<TransferResult> {
        debug!(
            "Transferring format {} ({}) to {}",
            descriptor.format_id,
            descriptor.describe(),
            destination.display()
        );
        self.transfer_url(&descriptor.source_url, destination, tag, progress)
            .await
    }

    /// Download `url` to `destination` with resume and bounded retries
    pub async fn transfer_url(
        &self,
        url: &str,
        destination: &Path,
        tag: &str,
        progress: &dyn ProgressSink,
    ) -> Result<TransferResult> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await?;
        }

        let part = part_path(destination, tag);
        let throttle =
            ProgressThrottle::new(self.config.progress_interval, self.config.progress_min_bytes);
        let mut reporter = ProgressReporter::new(progress, throttle, None);
        let started = Instant::now();

        let policy = &self.config.retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            self.check_cancelled()?;

            let outcome = self
                .attempt(url, destination, &part, &mut reporter)
                .await;
            let err = match outcome {
                Ok(bytes_written) => {
                    info!(
                        "Saved {} ({} bytes in {:.1}s)",
                        destination.display(),
                        bytes_written,
                        started.elapsed().as_secs_f64()
                    );
                    return Ok(TransferResult {
                        output_path: destination.to_path_buf(),
                        bytes_written,
                        duration: started.elapsed(),
                    });
                }
                Err(e) => e,
            };

            if err.is_retryable() && attempt < max_attempts {
                let delay = policy.delay_for(attempt);
                warn!(
                    "Transfer of {} failed (attempt {}/{}): {}. Resuming in {:?}",
                    destination.display(),
                    attempt,
                    max_attempts,
                    err,
                    delay
                );
                self.pause(delay).await?;
                attempt += 1;
                continue;
            }

            if matches!(err, TubeloaderError::TransferIntegrity { .. }) {
                let _ = fs::remove_file(&part).await;
            }
            return Err(err);
        }
    }

    /// One request/stream cycle. Returns the final file size.
    async fn attempt(
        &self,
        url: &str,
        destination: &Path,
        part: &Path,
        reporter: &mut ProgressReporter<'_>,
    ) -> Result<u64> {
        let mut existing = self.existing_part_len(part).await;
        let mut response = self.request(url, existing).await?;

        if existing > 0 && response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            info!("Resume range rejected, restarting {}", part.display());
            fs::remove_file(part).await?;
            existing = 0;
            response = self.request(url, 0).await?;
        }

        let status = response.status();
        if !status.is_success() {
            return Err(TubeloaderError::from_transfer_status(status));
        }

        let resumed = existing > 0 && status == StatusCode::PARTIAL_CONTENT;
        let (start, total) = if resumed {
            let (range_start, total) = parse_content_range(&response);
            if range_start.is_some_and(|s| s != existing) {
                fs::remove_file(part).await?;
                return Err(TubeloaderError::TransientNetwork(format!(
                    "server resumed at byte {:?} instead of {}",
                    range_start, existing
                )));
            }
            let total = total.or_else(|| response.content_length().map(|len| existing + len));
            debug!("Resuming {} at byte {}", part.display(), existing);
            (existing, total)
        } else {
            if existing > 0 {
                debug!("Server ignored range request, restarting {}", part.display());
            }
            (0, response.content_length())
        };

        let mut file = if resumed {
            OpenOptions::new().append(true).open(part).await?
        } else {
            File::create(part).await?
        };

        reporter.restart(start, total);
        let written = self.stream_body(response, &mut file, start, total, reporter).await;
        file.flush().await?;
        drop(file);
        let written = written?;

        if let Some(expected) = total {
            if written < expected {
                return Err(TubeloaderError::TransientNetwork(format!(
                    "stream ended early: {} of {} bytes",
                    written, expected
                )));
            }
        }

        fs::rename(part, destination).await?;
        reporter.finish(written);
        Ok(written)
    }

    async fn stream_body(
        &self,
        response: Response,
        file: &mut File,
        start: u64,
        total: Option<u64>,
        reporter: &mut ProgressReporter<'_>,
    ) -> Result<u64> {
        let mut written = start;
        let mut stream = response.bytes_stream();

        loop {
            self.check_cancelled()?;

            let next = match &self.cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(TubeloaderError::Cancelled),
                    next = timeout(self.config.read_timeout, stream.next()) => next,
                },
                None => timeout(self.config.read_timeout, stream.next()).await,
            };

            let chunk = match next {
                Ok(Some(Ok(chunk))) => chunk,
                Ok(Some(Err(e))) => {
                    return Err(TubeloaderError::TransientNetwork(format!(
                        "stream interrupted after {} bytes: {}",
                        written, e
                    )))
                }
                Ok(None) => return Ok(written),
                Err(_) => {
                    return Err(TubeloaderError::TransientNetwork(format!(
                        "no data received for {:?}",
                        self.config.read_timeout
                    )))
                }
            };

            file.write_all(&chunk).await?;
            written += chunk.len() as u64;

            if let Some(expected) = total {
                if written > expected {
                    return Err(TubeloaderError::TransferIntegrity {
                        expected,
                        received: written,
                    });
                }
            }
            reporter.advance(written);
        }
    }

    async fn request(&self, url: &str, offset: u64) -> Result<Response> {
        let mut request = self.client.get(url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={}-", offset));
        }

        timeout(self.config.read_timeout, request.send())
            .await
            .map_err(|_| {
                TubeloaderError::TransientNetwork("timed out waiting for response".to_string())
            })?
            .map_err(TubeloaderError::from)
    }

    async fn existing_part_len(&self, part: &Path) -> u64 {
        if !self.config.enable_resume {
            let _ = fs::remove_file(part).await;
            return 0;
        }
        fs::metadata(part).await.map(|m| m.len()).unwrap_or(0)
    }

    fn check_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(TubeloaderError::Cancelled),
            _ => Ok(()),
        }
    }

    /// Sleep between attempts, cut short by cancellation
    async fn pause(&self, delay: Duration) -> Result<()> {
        match &self.cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => Err(TubeloaderError::Cancelled),
                _ = sleep(delay) => Ok(()),
            },
            None => {
                sleep(delay).await;
                Ok(())
            }
        }
    }

    /// Fetch a small text document (caption track) with the transfer retry policy
    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        let this = self;
        with_backoff(&self.config.retry, "fetch", move |_| async move {
            this.check_cancelled()?;
            let response = this.request(url, 0).await?;
            let status = response.status();
            if !status.is_success() {
                return Err(TubeloaderError::from_transfer_status(status));
            }
            timeout(this.config.read_timeout, response.text())
                .await
                .map_err(|_| {
                    TubeloaderError::TransientNetwork("timed out reading document".to_string())
                })?
                .map_err(TubeloaderError::from)
        })
        .await
    }

    /// Write `bytes` through a part file so `path` never holds partial content
    pub async fn write_atomically(&self, path: &Path, tag: &str, bytes: &[u8]) -> Result<u64> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let part = part_path(path, tag);
        let mut file = File::create(&part).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);
        fs::rename(&part, path).await?;
        Ok(bytes.len() as u64)
    }
}

/// `Content-Range: bytes <start>-<end>/<total>`; total may be `*`
fn parse_content_range(response: &Response) -> (Option<u64>, Option<u64>) {
    let Some(value) = response
        .headers()
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
    else {
        return (None, None);
    };
    parse_content_range_value(value)
}

fn parse_content_range_value(value: &str) -> (Option<u64>, Option<u64>) {
    let Some(spec) = value.trim().strip_prefix("bytes ") else {
        return (None, None);
    };
    let (range, total) = spec.split_once('/').unwrap_or((spec, "*"));
    let start = range
        .split_once('-')
        .and_then(|(start, _)| start.trim().parse().ok());
    (start, total.trim().parse().ok())
}
