#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `coordinator` is component G: the top-level state machine that
//! sequences parsing, seeding, downloading, and verification, and emits
//! the [`UpdateEvent`] taxonomy a front-end subscribes to (`spec` §4.G,
//! §9 "signals/slots to event taxonomy").
//!
//! # Design
//!
//! `Coordinator::run` owns the [`store::TargetStore`], the
//! [`blockindex::BlockIndex`], and every component instance for the
//! duration of one session, per `spec` §3's ownership note. Components
//! never hold back-references into the coordinator; progress and
//! cancellation flow through plain closures and an `Fn() -> bool` poll,
//! not a callback registry.

mod config;
mod events;
mod rate;
mod state;

pub use config::{CancelToken, SessionConfig};
pub use events::{FinishedResult, UpdateEvent};
pub use state::CoordinatorState;

use checksums::whole_file::{format_hex_sha1, Sha1Digest};
use descriptor::UpdateDescriptor;
use rangefetch::RangeFetcher;
use rate::RateEstimator;
use reqwest::Client;
use std::io::Read;
use std::path::Path;
use updater_errors::{Action, ErrorKind, UpdaterError};
use url::Url;

const VERIFY_YIELD_BYTES: usize = 64 * 1024;

/// Runs one update session from start to a terminal state.
pub struct Coordinator {
    config: SessionConfig,
    state: CoordinatorState,
    cancel: CancelToken,
    http: Client,
}

impl Coordinator {
    /// Creates an idle coordinator with the given session configuration.
    pub fn new(config: SessionConfig) -> Result<Self, UpdaterError> {
        let http = Client::builder()
            .build()
            .map_err(|_| UpdaterError::new(ErrorKind::NetworkError(0), Action::Update))?;
        Ok(Self {
            config,
            state: CoordinatorState::Idle,
            cancel: CancelToken::new(),
            http,
        })
    }

    /// The session's current phase.
    #[must_use]
    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    /// A cloneable handle a front-end can use to request cancellation from
    /// another task, per `spec` §5.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Runs `action` to completion, emitting events via `emit` as the
    /// session progresses.
    ///
    /// `resolved_control_file_url` is the already-resolved URL of the
    /// control file (descriptor resolution is an external collaborator's
    /// responsibility per `spec` §1); it is ignored for
    /// [`Action::GetEmbeddedInfo`].
    pub async fn run(
        &mut self,
        action: Action,
        update_descriptor: UpdateDescriptor,
        resolved_control_file_url: Option<&Url>,
        local_bundle_path: &Path,
        output_dir: &Path,
        mut emit: impl FnMut(UpdateEvent),
    ) -> Result<FinishedResult, UpdaterError> {
        emit(UpdateEvent::Started { action });

        let result = match action {
            Action::GetEmbeddedInfo => Ok(FinishedResult::GetEmbeddedInfo {
                descriptor: update_descriptor,
            }),
            Action::CheckForUpdate => {
                self.run_check_for_update(action, resolved_control_file_url, local_bundle_path, &mut emit)
                    .await
            }
            Action::Update => {
                self.run_update(action, resolved_control_file_url, local_bundle_path, output_dir, &mut emit)
                    .await
            }
        };

        match &result {
            Ok(finished) => {
                self.state = CoordinatorState::Finished;
                emit(UpdateEvent::Finished {
                    result: Box::new(finished.clone()),
                    action,
                });
            }
            Err(err) if err.kind == ErrorKind::Canceled => {
                self.state = CoordinatorState::Canceled;
                emit(UpdateEvent::Canceled { action });
            }
            Err(err) => {
                self.state = CoordinatorState::Failed;
                emit(UpdateEvent::Error {
                    kind: err.kind.clone(),
                    action,
                });
            }
        }

        result
    }

    async fn fetch_control_file(
        &self,
        url: &Url,
        action: Action,
    ) -> Result<(control::ControlHeader, Vec<control::BlockEntry>), UpdaterError> {
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|_| UpdaterError::new(ErrorKind::NetworkError(0), action))?;
        let status = response.status();
        if !status.is_success() {
            return Err(UpdaterError::new(ErrorKind::NetworkError(status.as_u16()), action));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|_| UpdaterError::new(ErrorKind::NetworkError(0), action))?;

        let parsed = control::parse(&bytes, url)
            .map_err(|err| UpdaterError::new(ErrorKind::MalformedControlFile(err.to_string()), action))?;
        Ok((parsed.header, parsed.blocks))
    }

    async fn run_check_for_update(
        &mut self,
        action: Action,
        resolved_control_file_url: Option<&Url>,
        local_bundle_path: &Path,
        emit: &mut impl FnMut(UpdateEvent),
    ) -> Result<FinishedResult, UpdaterError> {
        let url = resolved_control_file_url
            .ok_or_else(|| UpdaterError::new(ErrorKind::EmptyUpdateInformation, action))?;

        self.state = CoordinatorState::Parsing;
        let (header, _blocks) = self.fetch_control_file(url, action).await?;

        if self.cancel.is_canceled() {
            return Err(UpdaterError::new(ErrorKind::Canceled, action));
        }

        let local_sha1 = hash_local_file(local_bundle_path)
            .map_err(|err| UpdaterError::new(ErrorKind::CannotOpen(err.to_string()), action))?;
        let remote_sha1_hash = format_hex_sha1(&header.target_sha1);
        let sha1_hash = format_hex_sha1(&local_sha1);
        let update_available = local_sha1 != header.target_sha1;

        emit(UpdateEvent::Log(format!(
            "checked for update: local={sha1_hash} remote={remote_sha1_hash} available={update_available}"
        )));

        Ok(FinishedResult::CheckForUpdate {
            update_available,
            absolute_path: local_bundle_path.to_path_buf(),
            sha1_hash,
            remote_sha1_hash,
            release_notes: None,
        })
    }

    async fn run_update(
        &mut self,
        action: Action,
        resolved_control_file_url: Option<&Url>,
        local_bundle_path: &Path,
        output_dir: &Path,
        emit: &mut impl FnMut(UpdateEvent),
    ) -> Result<FinishedResult, UpdaterError> {
        let url = resolved_control_file_url
            .ok_or_else(|| UpdaterError::new(ErrorKind::EmptyUpdateInformation, action))?;

        self.state = CoordinatorState::Parsing;
        let (header, blocks) = self.fetch_control_file(url, action).await?;

        let part_path = output_dir.join(format!("{}.part", header.target_filename));
        let final_path = output_dir.join(&header.target_filename);

        let run_result = self
            .run_update_inner(action, &header, &blocks, local_bundle_path, &part_path, &final_path, emit)
            .await;

        if run_result.is_err() {
            remove_partial(&part_path);
        }
        run_result
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_update_inner(
        &mut self,
        action: Action,
        header: &control::ControlHeader,
        blocks: &[control::BlockEntry],
        local_bundle_path: &Path,
        part_path: &Path,
        final_path: &Path,
        emit: &mut impl FnMut(UpdateEvent),
    ) -> Result<FinishedResult, UpdaterError> {
        let index = blockindex::BlockIndex::build(header, blocks);
        let mut target_store = store::TargetStore::create(part_path, u64::from(header.block_size.get()), header.target_length)
            .map_err(|err| UpdaterError::new(ErrorKind::CannotOpen(err.to_string()), action))?;

        self.state = CoordinatorState::Seeding;
        self.run_seed_scan(action, header, &index, local_bundle_path, &mut target_store, emit)
            .await?;

        if self.cancel.is_canceled() {
            return Err(UpdaterError::new(ErrorKind::Canceled, action));
        }

        self.state = CoordinatorState::Downloading;
        self.run_download(action, header, &mut target_store, emit).await?;

        if self.cancel.is_canceled() {
            return Err(UpdaterError::new(ErrorKind::Canceled, action));
        }

        self.state = CoordinatorState::Verifying;
        self.run_verify(action, header, part_path, emit).await?;

        std::fs::rename(part_path, final_path)
            .map_err(|err| UpdaterError::new(ErrorKind::CannotOpen(err.to_string()), action))?;

        Ok(FinishedResult::Update {
            old_version_path: local_bundle_path.to_path_buf(),
            new_version_path: final_path.to_path_buf(),
            new_version_sha1_hash: format_hex_sha1(&header.target_sha1),
        })
    }

    async fn run_seed_scan(
        &mut self,
        action: Action,
        header: &control::ControlHeader,
        index: &blockindex::BlockIndex<'_>,
        local_bundle_path: &Path,
        target_store: &mut store::TargetStore,
        emit: &mut impl FnMut(UpdateEvent),
    ) -> Result<(), UpdaterError> {
        let poll_cancel = self.cancel.as_poll_fn();
        let Ok(mut local_file) = std::fs::File::open(local_bundle_path) else {
            emit(UpdateEvent::Log(
                "local bundle could not be opened for seeding, downloading every block".to_string(),
            ));
            return Ok(());
        };

        match seedscan::scan(&mut local_file, header, index, target_store, poll_cancel).await {
            Ok(report) => {
                emit(UpdateEvent::Log(format!(
                    "seed scan recovered {} of {} blocks locally",
                    report.blocks_recovered,
                    header.block_count()
                )));
                Ok(())
            }
            Err(seedscan::SeedScanError::Canceled) => Err(UpdaterError::new(ErrorKind::Canceled, action)),
            Err(err) => {
                emit(UpdateEvent::Log(format!(
                    "seed scan failed ({err}), proceeding to download every block"
                )));
                Ok(())
            }
        }
    }

    async fn run_download(
        &mut self,
        action: Action,
        header: &control::ControlHeader,
        target_store: &mut store::TargetStore,
        emit: &mut impl FnMut(UpdateEvent),
    ) -> Result<(), UpdaterError> {
        let pending = target_store.missing_ranges();
        if pending.is_empty() {
            return Ok(());
        }
        let bytes_needed = pending.total_bytes();

        let fetcher = RangeFetcher::new(self.config.fetch.clone())
            .map_err(|_| UpdaterError::new(ErrorKind::NetworkError(0), action))?;
        let preflight = fetcher
            .preflight(&header.target_url)
            .await
            .map_err(|err| map_range_fetch_error(&err, action))?;

        let mut rate_estimator = RateEstimator::new();
        let poll_cancel = self.cancel.as_poll_fn();

        let on_progress = move |bytes_done: u64| {
            let pct = if bytes_needed == 0 {
                100
            } else {
                ((bytes_done.min(bytes_needed) * 100) / bytes_needed) as u8
            };
            let rate = rate_estimator.sample(bytes_done);
            emit(UpdateEvent::Progress {
                pct,
                bytes_done,
                bytes_total: bytes_needed,
                rate,
                units: "bytes",
                action,
            });
        };

        fetcher
            .fetch_missing(&preflight, &pending, target_store, on_progress, poll_cancel)
            .await
            .map_err(|err| map_range_fetch_error(&err, action))?;

        Ok(())
    }

    async fn run_verify(
        &mut self,
        action: Action,
        header: &control::ControlHeader,
        part_path: &Path,
        emit: &mut impl FnMut(UpdateEvent),
    ) -> Result<(), UpdaterError> {
        let mut file = std::fs::File::open(part_path)
            .map_err(|err| UpdaterError::new(ErrorKind::CannotOpen(err.to_string()), action))?;
        let mut hasher = Sha1Digest::new();
        let mut buf = vec![0u8; VERIFY_YIELD_BYTES];
        loop {
            if self.cancel.is_canceled() {
                return Err(UpdaterError::new(ErrorKind::Canceled, action));
            }
            let n = file
                .read(&mut buf)
                .map_err(|err| UpdaterError::new(ErrorKind::CannotOpen(err.to_string()), action))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            tokio::task::yield_now().await;
        }

        let digest = hasher.finalize();
        if digest != header.target_sha1 {
            emit(UpdateEvent::Log(format!(
                "verification failed: expected {} got {}",
                format_hex_sha1(&header.target_sha1),
                format_hex_sha1(&digest)
            )));
            return Err(UpdaterError::new(ErrorKind::VerificationFailed, action));
        }
        Ok(())
    }
}

fn map_range_fetch_error(err: &rangefetch::RangeFetchError, action: Action) -> UpdaterError {
    let kind = match err {
        rangefetch::RangeFetchError::RangeNotSatisfiable => ErrorKind::RangeNotSatisfiable,
        rangefetch::RangeFetchError::Canceled => ErrorKind::Canceled,
        rangefetch::RangeFetchError::UnexpectedStatus(status) => ErrorKind::NetworkError(status.as_u16()),
        rangefetch::RangeFetchError::Network(_)
        | rangefetch::RangeFetchError::IncompleteRange { .. }
        | rangefetch::RangeFetchError::RetriesExhausted(_) => ErrorKind::NetworkError(0),
        rangefetch::RangeFetchError::Store(store_err) => ErrorKind::CannotOpen(store_err.to_string()),
    };
    UpdaterError::new(kind, action)
}

fn hash_local_file(path: &Path) -> std::io::Result<[u8; 20]> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha1Digest::new();
    let mut buf = vec![0u8; VERIFY_YIELD_BYTES];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

fn remove_partial(path: &Path) {
    if let Err(err) = std::fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %err, "failed to remove partial target file");
        }
    }
}
