//! Rate-limited, retried GET requests shared by the resolvers

use crate::downloader::retry::{with_backoff, RetryPolicy};
use crate::extractor::limiter::RequestLimiter;
use crate::utils::error::{Result, TubeloaderError};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Outbound side of a metadata resolver
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    limiter: Arc<RequestLimiter>,
    retry: RetryPolicy,
    read_timeout: Duration,
}

impl Fetcher {
    pub fn new(
        client: Client,
        limiter: Arc<RequestLimiter>,
        retry: RetryPolicy,
        read_timeout: Duration,
    ) -> Self {
        Self {
            client,
            limiter,
            retry,
            read_timeout,
        }
    }

    /// GET `url` and return its body, mapping HTTP failures with the resolver defaults
    pub async fn get_text(&self, url: &str, context: &str) -> Result<String> {
        self.get_text_with(url, context, |status, _body| {
            TubeloaderError::from_resolver_status(status, context)
        })
        .await
    }

    /// GET `url`; non-success statuses go through `map_error` with the response body
    pub async fn get_text_with<M>(&self, url: &str, context: &str, map_error: M) -> Result<String>
    where
        M: Fn(StatusCode, &str) -> TubeloaderError,
    {
        let this = self;
        let map_error = &map_error;
        with_backoff(&self.retry, context, move |attempt| async move {
            this.limiter.acquire().await;
            debug!("GET {} ({}, attempt {})", redact(url), context, attempt);

            let response = timeout(this.read_timeout, this.client.get(url).send())
                .await
                .map_err(|_| {
                    TubeloaderError::TransientNetwork(format!("{}: request timed out", context))
                })??;

            let status = response.status();
            let body = timeout(this.read_timeout, response.text())
                .await
                .map_err(|_| {
                    TubeloaderError::TransientNetwork(format!("{}: body read timed out", context))
                })??;

            if status.is_success() {
                Ok(body)
            } else {
                Err(map_error(status, &body))
            }
        })
        .await
    }
}

/// Drop the query string so credentials never reach the logs
fn redact(url: &str) -> &str {
    url.split_once('?').map(|(base, _)| base).unwrap_or(url)
}
