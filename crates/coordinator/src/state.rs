//! The coordinator's top-level state machine, per `spec` §3/§4.G.

/// A delta-update session's current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// No session has been started yet.
    Idle,
    /// The control file is being fetched and parsed.
    Parsing,
    /// The local bundle is being scanned for reusable blocks.
    Seeding,
    /// Missing blocks are being fetched over HTTP.
    Downloading,
    /// The assembled target's whole-file hash is being checked.
    Verifying,
    /// The session completed successfully.
    Finished,
    /// The session ended in an unrecoverable error.
    Failed,
    /// The session was canceled.
    Canceled,
}

impl CoordinatorState {
    /// Whether this state has no further transitions (`spec` §3).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Canceled)
    }
}
