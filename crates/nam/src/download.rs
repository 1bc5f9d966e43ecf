//! Retrying HTTP downloader for raw forecast files.
//!
//! Every file gets up to `max_tries` attempts. A failed attempt removes
//! whatever it wrote, then waits `initial_retry_delay * 2^i` before retry
//! `i`. No wait follows the last failure.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use metrics::counter;
use reqwest::{Client, Response, StatusCode};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::DownloadPolicy;
use crate::error::{NamError, Result};

/// What happened to one requested file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The file was fetched; holds the number of bytes written.
    Fetched(u64),
    /// A local copy already existed.
    Skipped,
}

/// Downloads files with bounded retries and exponential backoff.
pub struct Downloader {
    client: Client,
    policy: DownloadPolicy,
}

impl Downloader {
    pub fn new(policy: DownloadPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(policy.timeout_secs))
            .connect_timeout(Duration::from_secs(policy.timeout_secs))
            .tcp_nodelay(true)
            .build()?;

        Ok(Self { client, policy })
    }

    pub fn policy(&self) -> &DownloadPolicy {
        &self.policy
    }

    /// Delay before retry `retry` (0-based).
    pub fn retry_delay(&self, retry: u32) -> Duration {
        let factor = 2f64.powi(retry.min(30) as i32);
        Duration::from_secs_f64(self.policy.initial_retry_delay_secs.max(0.0) * factor)
    }

    /// Fetch `url` into `dest`.
    ///
    /// An existing `dest` is left alone unless `force` is set. Cancellation
    /// is honoured both mid-transfer and during backoff; the partial file is
    /// removed either way.
    #[instrument(skip(self, cancel), fields(url = %url, path = %dest.display()))]
    pub async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome> {
        if !force && fs::try_exists(dest).await? {
            debug!("File already exists, skipping download");
            counter!("nam_downloads_skipped_total").increment(1);
            return Ok(DownloadOutcome::Skipped);
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        let bytes = self
            .with_retries(url, dest, cancel, || self.attempt(url, dest))
            .await?;
        counter!("nam_downloads_total").increment(1);
        Ok(DownloadOutcome::Fetched(bytes))
    }

    /// Run `attempt` until it succeeds, giving up after `max_tries`.
    ///
    /// `dest` is removed after every failed attempt and on cancellation.
    async fn with_retries<F, Fut>(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
        mut attempt: F,
    ) -> Result<u64>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<u64>>,
    {
        let max_tries = self.policy.max_tries.max(1);
        let mut last_error = String::new();

        for tried in 0..max_tries {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    remove_partial(dest).await?;
                    return Err(NamError::Cancelled);
                }
                result = attempt() => result,
            };

            match result {
                Ok(bytes) => {
                    info!(bytes = bytes, attempt = tried + 1, "Download completed");
                    return Ok(bytes);
                }
                Err(e) => {
                    counter!("nam_download_failures_total").increment(1);
                    remove_partial(dest).await?;
                    last_error = e.to_string();

                    if tried + 1 == max_tries {
                        break;
                    }

                    let delay = self.retry_delay(tried);
                    warn!(
                        error = %e,
                        attempt = tried + 1,
                        max_tries = max_tries,
                        delay_secs = delay.as_secs_f64(),
                        "Download failed, retrying"
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => return Err(NamError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        warn!(attempts = max_tries, error = %last_error, "Giving up on download");
        Err(NamError::Download {
            url: url.to_string(),
            attempts: max_tries,
            reason: last_error,
        })
    }

    async fn attempt(&self, url: &str, dest: &Path) -> Result<u64> {
        let response = self.client.get(url).send().await?;
        match response.status() {
            StatusCode::OK => self.stream_to_file(response, dest).await,
            status => Err(NamError::Download {
                url: url.to_string(),
                attempts: 1,
                reason: format!("HTTP status {}", status),
            }),
        }
    }

    async fn stream_to_file(&self, response: Response, path: &Path) -> Result<u64> {
        let mut file = File::create(path).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}

/// Remove a file, treating an absent file as success.
pub(crate) async fn remove_partial(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
