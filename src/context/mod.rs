//! Per-call fetch context: cache bypass and cooperative cancellation.
//!
//! A [`Context`] travels with one [`Runner::run`](crate::providers::Runner::run)
//! or [`TileRenderer::render_tile`](crate::render::TileRenderer::render_tile)
//! call. It carries two things:
//!
//! - a **no-cache marker**: when set, providers neither read nor write their
//!   upstream-response cache for this call;
//! - a [`CancellationToken`]: cancelling it aborts the in-flight upstream
//!   request and stops a pagination loop before its next page.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::sync::Notify;

/// Returned by [`CancellationToken::check`] once cancellation was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation was cancelled")]
pub struct Cancelled;

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// A cloneable cancellation handle shared between a caller and the fetches it
/// started.
///
/// Cancelling any clone is observed by all clones, both by polling
/// [`is_cancelled`](Self::is_cancelled) and by awaiting
/// [`cancelled`](Self::cancelled).
///
/// # Examples
///
/// ```
/// use tilefetch::context::CancellationToken;
///
/// let token = CancellationToken::new();
/// let handle = token.clone();
/// handle.cancel();
/// assert!(token.is_cancelled());
/// assert!(token.check().is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    state: Arc<CancelState>,
}

impl CancellationToken {
    /// Creates a token that has not been cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation and wakes every task awaiting [`cancelled`](Self::cancelled).
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        self.state.notify.notify_waiters();
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called on any clone.
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Returns `Err(Cancelled)` if cancellation was requested.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Completes when the token is cancelled; pending forever otherwise.
    pub async fn cancelled(&self) {
        loop {
            // Register before checking the flag so a concurrent `cancel` cannot
            // slip between the check and the await.
            let notified = self.state.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Per-call options for a fetch or render.
#[derive(Debug, Clone, Default)]
pub struct Context {
    no_cache: bool,
    cancel: CancellationToken,
}

impl Context {
    /// Creates a context that uses caches and is never cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of this context that bypasses upstream-response caches.
    pub fn with_no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }

    /// Returns a copy of this context bound to `token`.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Reports whether upstream-response caches must be bypassed.
    pub fn is_no_cache(&self) -> bool {
        self.no_cache
    }

    /// The cancellation token observed by fetches running under this context.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Shorthand for `self.cancellation().check()`.
    pub fn check(&self) -> Result<(), Cancelled> {
        self.cancel.check()
    }

    /// Shorthand for `self.cancellation().cancelled()`.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}
