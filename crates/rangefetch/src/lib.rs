#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `rangefetch` is component F: it plans HTTP range requests covering a
//! [`store::PendingRanges`], issues them with bounded concurrency, and
//! streams the returned bytes into a [`store::TargetStore`] (`spec` §4.F).
//!
//! # Design
//!
//! Concurrency here is cooperative, not parallel: per `spec` §5 the whole
//! session runs on a single-threaded scheduler, so bounded fan-out is
//! expressed as a [`futures_util::stream::FuturesUnordered`] that the
//! dispatch loop below feeds by hand, rather than spawned OS threads or even
//! spawned tasks. The fetch futures never touch the target store directly —
//! only the consuming loop does, one completed range at a time — so no
//! synchronization primitive is needed around it.
//!
//! Dispatch is hand-rolled instead of `buffer_unordered` so that exhaustion
//! (`spec` §4.F: "the downloader stops dispatching new requests but waits
//! for outstanding ones to settle") and cancellation (`spec` §4.F/§5:
//! abort and drop immediately) can have different drain behavior. A
//! `buffer_unordered` stream keeps pulling new items from its source
//! whenever it is polled and has spare capacity, so returning early out of
//! its consuming loop on the first non-cancel error would also have to stop
//! polling it — which drops every other still-in-flight future along with
//! it, aborting requests that `spec` requires be allowed to finish.
//!
//! The preflight request (`spec` §6, "redirects followed on the preflight
//! GET") resolves the final URL once, up front, with a 1-byte range probe:
//! a `206 Partial Content` response confirms range support and hands back
//! the post-redirect URL for every subsequent request; anything else falls
//! back to a plain whole-file download per `spec` §9's redesign note.

use bytes::Bytes;
use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT_RANGES, CONTENT_RANGE, RANGE};
use reqwest::StatusCode;
use std::time::Duration;
use store::{ByteRange, PendingRanges, StoreError, TargetStore};
use thiserror::Error;
use url::Url;

const CHUNK_YIELD_BYTES: u64 = 64 * 1024;

/// Tunables for the range downloader, per `spec` §5's resource model.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Maximum number of range requests in flight at once.
    pub parallelism: usize,
    /// Number of retry attempts for a transient range failure before it is
    /// terminal, per `spec` §7.
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries (doubled per
    /// attempt: `initial_backoff * 2^attempt`).
    pub initial_backoff: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        let hw = std::thread::available_parallelism().map_or(2, std::num::NonZeroUsize::get);
        Self {
            parallelism: (hw * 2).clamp(2, 16),
            max_retries: 3,
            initial_backoff: Duration::from_millis(200),
        }
    }
}

impl FetchConfig {
    fn backoff_for(&self, attempt: u32) -> Duration {
        self.initial_backoff * 2u32.saturating_pow(attempt)
    }
}

/// Failure fetching one or more ranges.
#[derive(Debug, Error)]
pub enum RangeFetchError {
    /// The HTTP request itself failed (connect, TLS, decode, etc.).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    /// The origin returned a non-success, non-partial-content status.
    #[error("unexpected HTTP status {0}")]
    UnexpectedStatus(StatusCode),
    /// The origin rejected a byte-range request it previously claimed to
    /// support (HTTP 416).
    #[error("range not satisfiable")]
    RangeNotSatisfiable,
    /// The response body was shorter than the requested range.
    #[error("incomplete range: expected {expected} bytes, received {received}")]
    IncompleteRange {
        /// Bytes requested.
        expected: u64,
        /// Bytes actually received before the stream ended.
        received: u64,
    },
    /// Retries were exhausted for a transient failure.
    #[error("exceeded {0} retry attempts")]
    RetriesExhausted(u32),
    /// Writing fetched bytes into the target store failed.
    #[error("target store error: {0}")]
    Store(#[from] StoreError),
    /// The fetch was canceled.
    #[error("range fetch canceled")]
    Canceled,
}

/// Outcome of the preflight probe: the post-redirect URL and whether the
/// origin honors byte-range requests.
#[derive(Debug, Clone)]
pub struct PreflightInfo {
    /// The URL to issue every subsequent request against (redirects
    /// already resolved).
    pub resolved_url: Url,
    /// Whether the origin responded `206 Partial Content` to the probe.
    pub supports_ranges: bool,
    /// The origin's reported total content length, if present.
    pub content_length: Option<u64>,
}

/// Summary of a completed fetch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchReport {
    /// Total bytes written into the target store.
    pub bytes_fetched: u64,
    /// Number of HTTP requests issued (including retries).
    pub requests_issued: u64,
}

/// Plans and issues the HTTP range requests covering a target's missing
/// bytes, per `spec` §4.F.
pub struct RangeFetcher {
    client: reqwest::Client,
    config: FetchConfig,
}

impl RangeFetcher {
    /// Builds a fetcher with the given configuration, using `rustls` for
    /// TLS per the workspace's dependency stack.
    pub fn new(config: FetchConfig) -> Result<Self, RangeFetchError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client, config })
    }

    /// Probes `url` with a single-byte range request to resolve redirects
    /// and determine range support, per `spec` §6.
    pub async fn preflight(&self, url: &Url) -> Result<PreflightInfo, RangeFetchError> {
        let response = self
            .client
            .get(url.clone())
            .header(RANGE, "bytes=0-0")
            .send()
            .await?;

        let resolved_url = response.url().clone();
        let supports_ranges = response.status() == StatusCode::PARTIAL_CONTENT
            || response
                .headers()
                .get(ACCEPT_RANGES)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.eq_ignore_ascii_case("bytes"));

        let content_length = total_length_from_headers(&response);

        Ok(PreflightInfo {
            resolved_url,
            supports_ranges,
            content_length,
        })
    }

    /// Fetches every range in `pending`, writing completed ranges into
    /// `target_store` as they arrive. Falls back to a single whole-file
    /// download when `info.supports_ranges` is false, per `spec` §9.
    pub async fn fetch_missing<P, C>(
        &self,
        info: &PreflightInfo,
        pending: &PendingRanges,
        target_store: &mut TargetStore,
        mut on_progress: P,
        is_canceled: C,
    ) -> Result<FetchReport, RangeFetchError>
    where
        P: FnMut(u64),
        C: Fn() -> bool,
    {
        if !info.supports_ranges {
            tracing::warn!("origin does not support byte ranges, falling back to whole-file download");
            return self
                .fetch_whole_file(info, target_store, &mut on_progress, &is_canceled)
                .await;
        }

        let mut report = FetchReport::default();
        let requests_issued = std::sync::atomic::AtomicU64::new(0);
        let requests_issued_ref = &requests_issued;
        let resolved_url = &info.resolved_url;
        let is_canceled_ref = &is_canceled;
        let parallelism = self.config.parallelism.max(1);

        let mut todo = pending.ranges.iter().copied();
        let mut in_flight = FuturesUnordered::new();
        let mut pending_error: Option<RangeFetchError> = None;

        for range in todo.by_ref().take(parallelism) {
            in_flight.push(self.fetch_range_tagged(resolved_url, range, is_canceled_ref, requests_issued_ref));
        }

        while let Some((range, result)) = in_flight.next().await {
            if is_canceled() {
                return Err(RangeFetchError::Canceled);
            }

            match result {
                Ok(data) if pending_error.is_none() => {
                    if let Err(err) = target_store.write_range(range.lo, &data) {
                        pending_error = Some(RangeFetchError::Store(err));
                    } else {
                        report.bytes_fetched += data.len() as u64;
                        on_progress(report.bytes_fetched);
                    }
                }
                Ok(_) => {
                    // A prior range already failed; keep draining without
                    // touching the store so outstanding requests can settle.
                }
                Err(err) => {
                    if pending_error.is_none() {
                        pending_error = Some(err);
                    }
                }
            }

            // Stop dispatching new requests once something has failed, but
            // keep draining what is already in flight.
            if pending_error.is_none() {
                if let Some(next_range) = todo.next() {
                    in_flight.push(self.fetch_range_tagged(resolved_url, next_range, is_canceled_ref, requests_issued_ref));
                }
            }
        }

        if let Some(err) = pending_error {
            return Err(err);
        }

        report.requests_issued = requests_issued.load(std::sync::atomic::Ordering::Relaxed);
        Ok(report)
    }

    /// Runs [`fetch_range_with_retry`] and pairs its result with the range
    /// it was for, so the dispatch loop can match a completion from
    /// [`FuturesUnordered`] back to the range that produced it.
    ///
    /// [`fetch_range_with_retry`]: Self::fetch_range_with_retry
    async fn fetch_range_tagged<C>(
        &self,
        url: &Url,
        range: ByteRange,
        is_canceled: &C,
        requests_issued: &std::sync::atomic::AtomicU64,
    ) -> (ByteRange, Result<Bytes, RangeFetchError>)
    where
        C: Fn() -> bool,
    {
        let result = self.fetch_range_with_retry(url, range, is_canceled, requests_issued).await;
        (range, result)
    }

    async fn fetch_range_with_retry<C>(
        &self,
        url: &Url,
        range: ByteRange,
        is_canceled: &C,
        requests_issued: &std::sync::atomic::AtomicU64,
    ) -> Result<Bytes, RangeFetchError>
    where
        C: Fn() -> bool,
    {
        let mut attempt = 0u32;
        loop {
            if is_canceled() {
                return Err(RangeFetchError::Canceled);
            }
            requests_issued.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            match self.fetch_range_once(url, range, is_canceled).await {
                Ok(bytes) => return Ok(bytes),
                Err(RangeFetchError::RangeNotSatisfiable) => return Err(RangeFetchError::RangeNotSatisfiable),
                Err(err) if attempt < self.config.max_retries => {
                    tracing::debug!(attempt, error = %err, "range fetch failed, retrying");
                    tokio::time::sleep(self.config.backoff_for(attempt)).await;
                    attempt += 1;
                }
                Err(_) => return Err(RangeFetchError::RetriesExhausted(self.config.max_retries)),
            }
        }
    }

    async fn fetch_range_once<C>(&self, url: &Url, range: ByteRange, is_canceled: &C) -> Result<Bytes, RangeFetchError>
    where
        C: Fn() -> bool,
    {
        let header_value = format!("bytes={}-{}", range.lo, range.hi);
        let response = self.client.get(url.clone()).header(RANGE, header_value).send().await?;

        if response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            return Err(RangeFetchError::RangeNotSatisfiable);
        }
        if response.status() != StatusCode::PARTIAL_CONTENT && response.status() != StatusCode::OK {
            return Err(RangeFetchError::UnexpectedStatus(response.status()));
        }

        let expected = range.len();
        let mut buf = Vec::with_capacity(expected as usize);
        let mut stream = response.bytes_stream();
        let mut since_yield: u64 = 0;
        while let Some(chunk) = stream.next().await {
            if is_canceled() {
                return Err(RangeFetchError::Canceled);
            }
            let chunk = chunk?;
            buf.extend_from_slice(&chunk);
            since_yield += chunk.len() as u64;
            if since_yield >= CHUNK_YIELD_BYTES {
                tokio::task::yield_now().await;
                since_yield = 0;
            }
        }

        if buf.len() as u64 != expected {
            return Err(RangeFetchError::IncompleteRange {
                expected,
                received: buf.len() as u64,
            });
        }

        Ok(Bytes::from(buf))
    }

    async fn fetch_whole_file<P, C>(
        &self,
        info: &PreflightInfo,
        target_store: &mut TargetStore,
        on_progress: &mut P,
        is_canceled: &C,
    ) -> Result<FetchReport, RangeFetchError>
    where
        P: FnMut(u64),
        C: Fn() -> bool,
    {
        let response = self.client.get(info.resolved_url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(RangeFetchError::UnexpectedStatus(response.status()));
        }

        let mut offset = 0u64;
        let mut stream = response.bytes_stream();
        let mut since_yield: u64 = 0;
        while let Some(chunk) = stream.next().await {
            if is_canceled() {
                return Err(RangeFetchError::Canceled);
            }
            let chunk = chunk?;
            target_store.write_range(offset, &chunk)?;
            offset += chunk.len() as u64;
            on_progress(offset);
            since_yield += chunk.len() as u64;
            if since_yield >= CHUNK_YIELD_BYTES {
                tokio::task::yield_now().await;
                since_yield = 0;
            }
        }

        Ok(FetchReport {
            bytes_fetched: offset,
            requests_issued: 1,
        })
    }
}

fn total_length_from_headers(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.rsplit('/').next())
        .and_then(|total| total.parse::<u64>().ok())
        .or_else(|| response.content_length())
}
