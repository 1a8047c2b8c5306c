//! Session configuration and the cooperative cancellation flag, per
//! `spec` §5.

use rangefetch::FetchConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Tunables for one update session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Range-downloader tunables (parallelism, retries, backoff).
    pub fetch: FetchConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            fetch: FetchConfig::default(),
        }
    }
}

/// A cooperative, idempotent cancellation flag shared between the
/// coordinator and its components.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a fresh, not-yet-canceled token.
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Requests cancellation. Idempotent: calling this more than once, or
    /// after the session has already reached a terminal state, has no
    /// additional effect (`spec` §5).
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns a closure suitable for passing to component APIs that poll
    /// cancellation (`Fn() -> bool`), without exposing the token itself.
    #[must_use]
    pub fn as_poll_fn(&self) -> impl Fn() -> bool + Send + Sync + 'static {
        let token = self.clone();
        move || token.is_canceled()
    }
}
