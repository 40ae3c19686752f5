//! Cancellation of blocked token selections.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::pool::Waiter;

/// Handle to abandon a blocked
/// [`select_token_with_cancellation`](super::TokenPool::select_token_with_cancellation)
/// call before its timeout elapses.
///
/// Cancellation is sticky: once [`cancel`](Self::cancel) has been called, any
/// selection started with this token fails immediately with
/// [`PoolError::Cancelled`](super::PoolError::Cancelled). Clones share the
/// same state, so a supervisor can hold one clone while the selecting thread
/// carries another.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    // The waiter currently blocked under this token, if any. Registered by
    // the selecting thread, taken by cancel() to deliver the wake-up.
    waiter: Mutex<Option<Arc<Waiter>>>,
}

impl CancellationToken {
    /// New, un-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Cancel the associated selection, waking it if currently blocked.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        if let Some(waiter) = self.inner.waiter.lock().take() {
            waiter.mark_cancelled();
        }
    }

    /// Attach the blocked waiter so `cancel()` can reach its condvar.
    ///
    /// Returns `false` if cancellation already happened, in which case the
    /// caller must fail fast instead of blocking.
    pub(crate) fn register(&self, waiter: &Arc<Waiter>) -> bool {
        let mut slot = self.inner.waiter.lock();
        if self.inner.cancelled.load(Ordering::SeqCst) {
            return false;
        }
        *slot = Some(Arc::clone(waiter));
        true
    }

    /// Detach the waiter once the selection call exits.
    pub(crate) fn unregister(&self) {
        self.inner.waiter.lock().take();
    }
}
