//! The event taxonomy emitted by a running session, replacing the
//! signal/slot interface of the original implementation with an explicit
//! closed union (`spec` §9 design note).

use std::path::PathBuf;
use updater_errors::{Action, ErrorKind};

/// A finished session's result payload, shaped per action (`spec` §6).
#[derive(Debug, Clone)]
pub enum FinishedResult {
    /// Result of a completed `Update` action.
    Update {
        /// Path of the bundle before the update.
        old_version_path: PathBuf,
        /// Path of the newly assembled bundle.
        new_version_path: PathBuf,
        /// SHA-1 of the newly assembled bundle, as lowercase hex.
        new_version_sha1_hash: String,
    },
    /// Result of a completed `CheckForUpdate` action.
    CheckForUpdate {
        /// Whether the remote target differs from the local file.
        update_available: bool,
        /// Path of the local bundle that was checked.
        absolute_path: PathBuf,
        /// SHA-1 of the local bundle, as lowercase hex.
        sha1_hash: String,
        /// SHA-1 the control file declares for the remote target, as
        /// lowercase hex.
        remote_sha1_hash: String,
        /// Release notes, when the collaborator supplied any. The core
        /// never fetches these itself.
        release_notes: Option<String>,
    },
    /// Result of a completed `GetEmbeddedInfo` action: the descriptor as
    /// given, unmodified.
    GetEmbeddedInfo {
        /// The parsed update descriptor.
        descriptor: descriptor::UpdateDescriptor,
    },
}

/// Events emitted over the lifetime of a session, per `spec` §6.
#[derive(Debug, Clone)]
pub enum UpdateEvent {
    /// The session has begun running `action`.
    Started {
        /// The action in progress.
        action: Action,
    },
    /// Progress update. `pct` is monotonically non-decreasing within a
    /// session.
    Progress {
        /// Integer percent complete, `0..=100`.
        pct: u8,
        /// Bytes transferred so far in the current phase.
        bytes_done: u64,
        /// Total bytes expected in the current phase.
        bytes_total: u64,
        /// Smoothed transfer rate, in `units` per second.
        rate: f64,
        /// The unit `rate` is expressed in (always `"bytes"` for now;
        /// kept as a field so a future phase reporting block-granularity
        /// progress does not need a new event variant).
        units: &'static str,
        /// The action in progress.
        action: Action,
    },
    /// The session completed successfully.
    Finished {
        /// The result payload.
        result: Box<FinishedResult>,
        /// The action that completed.
        action: Action,
    },
    /// The session ended in an unrecoverable error.
    Error {
        /// The kind of error.
        kind: ErrorKind,
        /// The action that was in progress.
        action: Action,
    },
    /// The session was canceled.
    Canceled {
        /// The action that was in progress.
        action: Action,
    },
    /// An informational log line. Non-fatal; sinks are pluggable and the
    /// core never aborts on a log-sink failure (`spec` §7).
    Log(String),
}
