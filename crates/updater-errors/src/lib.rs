#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `updater-errors` defines the closed error taxonomy surfaced across every
//! phase of an update session, plus the [`Action`] tag that every error is
//! bound to. Leaf crates (`control`, `store`, `rangefetch`, ...) define their
//! own narrow [`thiserror`] enums for the failures they can produce; the
//! coordinator maps those into [`ErrorKind`] at the phase boundary so a
//! collaborator only ever has to match on one enum regardless of which
//! component failed.
//!
//! # Design
//!
//! [`ErrorKind`] is intentionally flat rather than nested per-component: the
//! external interface (`spec` §6) promises a fixed set of error kinds to
//! front-ends, and nesting would leak internal crate boundaries into that
//! contract.

use std::fmt;

/// The logical operation an update session is performing when an event or
/// error is emitted.
///
/// Mirrors the three front-end actions a collaborator can request: reading
/// back the embedded descriptor, checking whether a newer version exists,
/// and actually applying an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Echo the already-parsed update descriptor back to the collaborator.
    GetEmbeddedInfo,
    /// Fetch and parse the control file, compare hashes, but do not
    /// reconstruct or download anything.
    CheckForUpdate,
    /// Run the full parse -> seed-scan -> download -> verify pipeline.
    Update,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::GetEmbeddedInfo => "GetEmbeddedInfo",
            Self::CheckForUpdate => "CheckForUpdate",
            Self::Update => "Update",
        };
        f.write_str(name)
    }
}

/// The closed set of error kinds a session can surface, per `spec` §6.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    /// No AppImage path was given to the core entry point.
    #[error("no AppImage path given")]
    NoAppImagePathGiven,
    /// The given AppImage path does not exist on disk.
    #[error("AppImage not found")]
    AppImageNotFound,
    /// The local bundle exists but could not be opened for reading.
    #[error("no read permission for local bundle")]
    NoReadPermission,
    /// A file required by the session could not be opened.
    #[error("cannot open file: {0}")]
    CannotOpen(String),
    /// The local bundle does not start with a recognized magic number.
    #[error("invalid magic number in local bundle")]
    InvalidMagic,
    /// The local bundle's ELF container is of an unsupported class/format.
    #[error("unsupported ELF format")]
    UnsupportedElfFormat,
    /// The expected ELF section header could not be located.
    #[error("section header not found")]
    SectionHeaderNotFound,
    /// The embedded update-information string was empty.
    #[error("embedded update information is empty")]
    EmptyUpdateInformation,
    /// The descriptor named a transport this core does not implement.
    #[error("unsupported update transport: {0}")]
    UnsupportedTransport(String),
    /// The control file could not be parsed.
    #[error("malformed control file: {0}")]
    MalformedControlFile(String),
    /// A network request failed. Carries the HTTP status code when one was
    /// received, or `0` for a transport-level failure (DNS, connect, etc).
    #[error("network error (code {0})")]
    NetworkError(u16),
    /// The origin rejected a range request outright (HTTP 416) and no
    /// fallback to a whole-file download was possible.
    #[error("range not satisfiable")]
    RangeNotSatisfiable,
    /// The assembled target's whole-file digest did not match the control
    /// file's expected digest.
    #[error("verification failed")]
    VerificationFailed,
    /// Allocation of an in-memory structure (block index, bitmap) failed
    /// because the control file described an implausibly large target.
    #[error("not enough memory")]
    NotEnoughMemory,
    /// The session was canceled before completing.
    #[error("canceled")]
    Canceled,
}

/// An error bound to the [`Action`] that was in progress when it occurred,
/// per `spec` §7 ("errors are typed by kind and always bound to the action
/// in progress").
#[derive(Debug, Clone, thiserror::Error)]
#[error("{action}: {kind}")]
pub struct UpdaterError {
    /// The error kind.
    pub kind: ErrorKind,
    /// The action in progress when the error occurred.
    pub action: Action,
}

impl UpdaterError {
    /// Binds an [`ErrorKind`] to the [`Action`] that produced it.
    pub fn new(kind: ErrorKind, action: Action) -> Self {
        Self { kind, action }
    }
}
